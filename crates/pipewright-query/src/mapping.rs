//! Logical-to-physical field resolution.

use indexmap::IndexMap;

/// Where a resolved filter field lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FieldPath {
    /// A path on the document itself; filtered in the base match.
    Document(String),
    /// A path inside the elements of an array field; filtered after unwinding.
    Element {
        /// The array field, e.g. `lineItems`.
        array: String,
        /// Path relative to the element, e.g. `paintSpecId`.
        path: String,
    },
}

impl FieldPath {
    /// Whether this path addresses array elements.
    pub const fn is_element(&self) -> bool {
        matches!(self, Self::Element { .. })
    }
}

/// Resolves logical filter names through a config's field mappings.
#[derive(Debug, Clone)]
pub struct FieldMapper<'a> {
    mappings: &'a IndexMap<String, String>,
    array_prefixes: Vec<String>,
}

impl<'a> FieldMapper<'a> {
    /// Create a mapper over `mappings`, treating `array_prefixes` as array fields.
    pub const fn new(mappings: &'a IndexMap<String, String>, array_prefixes: Vec<String>) -> Self {
        Self {
            mappings,
            array_prefixes,
        }
    }

    /// The physical path for `logical`; unmapped names pass through.
    pub fn physical<'b>(&'b self, logical: &'b str) -> &'b str {
        self.mappings.get(logical).map_or(logical, String::as_str)
    }

    /// Resolve `logical` and classify the result.
    pub fn resolve(&self, logical: &str) -> FieldPath {
        let physical = self.physical(logical);
        if let Some((array, rest)) = physical.split_once('.') {
            if !rest.is_empty() && self.array_prefixes.iter().any(|p| p == array) {
                return FieldPath::Element {
                    array: array.to_string(),
                    path: rest.to_string(),
                };
            }
        }
        FieldPath::Document(physical.to_string())
    }
}
