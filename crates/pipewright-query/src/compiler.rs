//! The aggregation compiler.
//!
//! Compilation is a pure function of the config, the filters and the clock:
//! the same inputs always produce the same stage list, and the config is never
//! mutated.

use pipewright_core::{AggregationConfig, Clock, FilterParameters, PipelineStage, SystemClock};

use crate::assembler::PipelineAssembler;
use crate::error::ConfigurationError;
use crate::filter::is_blank;
use crate::matcher::MatchStageBuilder;

/// Base-filter keys accepted as the document-type discriminator.
pub const DEFAULT_DISCRIMINATOR_KEYS: &[&str] = &["documentType", "entityId"];

/// Compiler options.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompilerOptions {
    /// At least one of these keys must be present and non-blank in every
    /// config's base filter. Runtime filters cannot override them.
    pub discriminator_keys: Vec<String>,
}

impl Default for CompilerOptions {
    fn default() -> Self {
        Self {
            discriminator_keys: DEFAULT_DISCRIMINATOR_KEYS
                .iter()
                .map(ToString::to_string)
                .collect(),
        }
    }
}

impl CompilerOptions {
    /// Replace the discriminator keys.
    #[must_use]
    pub fn with_discriminator_keys<I, S>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.discriminator_keys = keys.into_iter().map(Into::into).collect();
        self
    }
}

/// Compiles an [`AggregationConfig`] and runtime filters into pipeline stages.
#[derive(Debug, Clone, Default)]
pub struct Compiler<C: Clock = SystemClock> {
    clock: C,
    options: CompilerOptions,
}

impl Compiler<SystemClock> {
    /// A compiler reading the system clock.
    pub fn new() -> Self {
        Self::default()
    }
}

impl<C: Clock> Compiler<C> {
    /// A compiler reading `clock`.
    pub fn with_clock(clock: C) -> Self {
        Self {
            clock,
            options: CompilerOptions::default(),
        }
    }

    /// Replace the options.
    #[must_use]
    pub fn options(mut self, options: CompilerOptions) -> Self {
        self.options = options;
        self
    }

    /// The clock relative dates are resolved against.
    pub const fn clock(&self) -> &C {
        &self.clock
    }

    /// Check the config's structural invariants.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigurationError::MissingDiscriminator`] when the base filter
    /// has no non-blank discriminator key.
    pub fn validate(&self, config: &AggregationConfig) -> Result<(), ConfigurationError> {
        let scoped = self.options.discriminator_keys.iter().any(|key| {
            config
                .base_filter
                .get(key)
                .is_some_and(|value| !is_blank(value))
        });
        if scoped {
            Ok(())
        } else {
            Err(ConfigurationError::MissingDiscriminator {
                config: config.name.clone(),
                expected: self.options.discriminator_keys.clone(),
            })
        }
    }

    /// Compile `config` and `filters` into an ordered stage list.
    ///
    /// # Errors
    ///
    /// Fails if the config does not validate or a template stage is malformed.
    pub fn compile(
        &self,
        config: &AggregationConfig,
        filters: &FilterParameters,
    ) -> Result<Vec<PipelineStage>, ConfigurationError> {
        self.validate(config)?;

        let now = self.clock.now();
        let fragments = MatchStageBuilder::new(config, now)
            .protect(&self.options.discriminator_keys)
            .build(filters);
        let stages = PipelineAssembler::new(config, now).assemble(fragments)?;

        tracing::debug!(
            "compiled aggregation `{}` on `{}` into {} stages",
            config.name,
            config.collection,
            stages.len()
        );
        Ok(stages)
    }
}

/// Compile with the system clock and default options.
///
/// # Errors
///
/// See [`Compiler::compile`].
pub fn compile(
    config: &AggregationConfig,
    filters: &FilterParameters,
) -> Result<Vec<PipelineStage>, ConfigurationError> {
    Compiler::new().compile(config, filters)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};
    use pipewright_core::FixedClock;
    use serde_json::json;

    fn compiler() -> Compiler<FixedClock> {
        Compiler::with_clock(FixedClock::new(Utc.with_ymd_and_hms(2024, 6, 15, 8, 0, 0).unwrap()))
    }

    #[test]
    fn test_missing_discriminator() {
        for base in [json!({}), json!({ "documentType": "" }), json!({ "entityId": null })] {
            let config = AggregationConfig::builder("loose", "documents")
                .base_filter(base)
                .build();
            let err = compiler().compile(&config, &FilterParameters::new()).unwrap_err();
            assert!(matches!(err, ConfigurationError::MissingDiscriminator { .. }));
        }
    }

    #[test]
    fn test_either_discriminator_accepted() {
        for base in [json!({ "documentType": "order" }), json!({ "entityId": { "$in": ["a"] } })] {
            let config = AggregationConfig::builder("scoped", "documents")
                .base_filter(base)
                .build();
            assert!(compiler().validate(&config).is_ok());
        }
    }

    #[test]
    fn test_custom_discriminator_keys() {
        let config = AggregationConfig::builder("tenant", "documents")
            .base_filter(json!({ "tenantId": "t1" }))
            .build();
        assert!(compiler().validate(&config).is_err());

        let compiler = compiler()
            .options(CompilerOptions::default().with_discriminator_keys(["tenantId"]));
        assert!(compiler.validate(&config).is_ok());
    }

    #[test]
    fn test_compile_is_deterministic() {
        let config = AggregationConfig::builder("orders", "documents")
            .base_filter(json!({ "documentType": "order", "date": { "$gte": "now-7d" } }))
            .limit(json!(10))
            .build();
        let filters = json!({ "status": "open" }).as_object().cloned().unwrap();
        let before = config.clone();

        let first = compiler().compile(&config, &filters).unwrap();
        let second = compiler().compile(&config, &filters).unwrap();
        assert_eq!(first, second);
        assert_eq!(config, before);
        assert_eq!(
            first[0].body(),
            json!({
                "documentType": "order",
                "date": { "$gte": "2024-06-08T00:00:00.000Z" },
                "status": "open"
            })
        );
    }
}
