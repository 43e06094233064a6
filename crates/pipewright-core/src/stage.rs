//! Pipeline stage intermediate representation.
//!
//! Ordering is decided on [`PipelineStage`] values; the body each variant holds
//! is already in the store's native dialect and is emitted unchanged.

use serde::de::Error as _;
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::StageError;
use crate::Document;

/// One stage of an aggregation pipeline.
#[derive(Debug, Clone, PartialEq)]
pub enum PipelineStage {
    /// `$match`.
    Match(Document),
    /// `$unwind`, either a `"$path"` string or an options object.
    Unwind(Value),
    /// `$lookup`.
    Lookup(Document),
    /// `$group`.
    Group(Document),
    /// `$project`.
    Project(Value),
    /// `$sort`.
    Sort(Value),
    /// `$limit`.
    Limit(Value),
    /// Any other stage found in a custom template, e.g. `$addFields`.
    Custom {
        /// Stage operator including the leading `$`.
        operator: String,
        /// Stage body.
        body: Value,
    },
}

impl PipelineStage {
    /// The stage operator, e.g. `"$match"`.
    pub fn operator(&self) -> &str {
        match self {
            Self::Match(_) => "$match",
            Self::Unwind(_) => "$unwind",
            Self::Lookup(_) => "$lookup",
            Self::Group(_) => "$group",
            Self::Project(_) => "$project",
            Self::Sort(_) => "$sort",
            Self::Limit(_) => "$limit",
            Self::Custom { operator, .. } => operator,
        }
    }

    /// The stage body as a JSON value.
    pub fn body(&self) -> Value {
        match self {
            Self::Match(doc) | Self::Lookup(doc) | Self::Group(doc) => Value::Object(doc.clone()),
            Self::Unwind(v) | Self::Project(v) | Self::Sort(v) | Self::Limit(v) => v.clone(),
            Self::Custom { body, .. } => body.clone(),
        }
    }

    /// The stage in native form: `{ "<operator>": <body> }`.
    pub fn to_document(&self) -> Value {
        let mut doc = Document::new();
        doc.insert(self.operator().to_string(), self.body());
        Value::Object(doc)
    }

    /// Parse a native stage document.
    pub fn from_document(value: &Value) -> Result<Self, StageError> {
        let obj = value.as_object().ok_or(StageError::NotAnObject)?;
        if obj.len() != 1 {
            return Err(StageError::OperatorCount(obj.len()));
        }
        let Some((operator, body)) = obj.iter().next() else {
            return Err(StageError::OperatorCount(0));
        };
        if !operator.starts_with('$') {
            return Err(StageError::NotAnOperator(operator.clone()));
        }

        let object_body = || {
            body.as_object().cloned().ok_or_else(|| StageError::InvalidBody {
                operator: operator.clone(),
                expected: "an object",
            })
        };

        Ok(match operator.as_str() {
            "$match" => Self::Match(object_body()?),
            "$lookup" => Self::Lookup(object_body()?),
            "$group" => Self::Group(object_body()?),
            "$unwind" => {
                if unwind_path(body).is_none() {
                    return Err(StageError::InvalidBody {
                        operator: operator.clone(),
                        expected: "a path string or an object with `path`",
                    });
                }
                Self::Unwind(body.clone())
            }
            "$project" => Self::Project(body.clone()),
            "$sort" => Self::Sort(body.clone()),
            "$limit" => Self::Limit(body.clone()),
            _ => Self::Custom {
                operator: operator.clone(),
                body: body.clone(),
            },
        })
    }

    /// Whether this is a `$match` stage.
    pub const fn is_match(&self) -> bool {
        matches!(self, Self::Match(_))
    }

    /// Whether this is an `$unwind` stage.
    pub const fn is_unwind(&self) -> bool {
        matches!(self, Self::Unwind(_))
    }

    /// The predicate of a `$match` stage.
    pub const fn as_match(&self) -> Option<&Document> {
        match self {
            Self::Match(doc) => Some(doc),
            _ => None,
        }
    }

    /// The array path of an `$unwind` stage, as written (usually `$`-prefixed).
    pub fn unwind_path(&self) -> Option<&str> {
        match self {
            Self::Unwind(body) => unwind_path(body),
            _ => None,
        }
    }
}

/// Extract the array path from an `$unwind` body.
pub fn unwind_path(body: &Value) -> Option<&str> {
    match body {
        Value::String(path) => Some(path.as_str()),
        Value::Object(obj) => obj.get("path").and_then(Value::as_str),
        _ => None,
    }
}

impl Serialize for PipelineStage {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(1))?;
        map.serialize_entry(self.operator(), &self.body())?;
        map.end()
    }
}

impl<'de> Deserialize<'de> for PipelineStage {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;
        Self::from_document(&value).map_err(D::Error::custom)
    }
}
