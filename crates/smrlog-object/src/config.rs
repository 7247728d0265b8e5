use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ObjectError, ObjectResult};

/// Configuration shared by every object opened through a runtime.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectConfig {
    /// How long a mutator-accessor waits for its own write to be applied.
    pub apply_timeout: Duration,
    /// Refuse dispatch tables containing operations registered without a kind.
    pub strict_classification: bool,
    /// Apply failures each replica keeps for inspection.
    pub max_recorded_failures: usize,
}

impl Default for ObjectConfig {
    fn default() -> Self {
        Self {
            apply_timeout: Duration::from_secs(30),
            strict_classification: false,
            max_recorded_failures: 64,
        }
    }
}

impl ObjectConfig {
    /// Defaults, with strict operation classification.
    pub fn strict() -> Self {
        Self {
            strict_classification: true,
            ..Default::default()
        }
    }

    /// Parse from TOML. Missing keys take their default values.
    ///
    /// ```toml
    /// strict_classification = true
    /// max_recorded_failures = 16
    ///
    /// [apply_timeout]
    /// secs = 5
    /// nanos = 0
    /// ```
    pub fn from_toml(text: &str) -> ObjectResult<Self> {
        let config: Self = toml::from_str(text).map_err(|e| ObjectError::Config(e.to_string()))?;
        if config.apply_timeout.is_zero() {
            return Err(ObjectError::Config("apply_timeout must be non-zero".into()));
        }
        Ok(config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_toml_yields_defaults() {
        assert_eq!(ObjectConfig::from_toml("").unwrap(), ObjectConfig::default());
    }

    #[test]
    fn toml_overrides_individual_fields() {
        let config = ObjectConfig::from_toml(
            "strict_classification = true\n[apply_timeout]\nsecs = 5\nnanos = 0\n",
        )
        .unwrap();
        assert!(config.strict_classification);
        assert_eq!(config.apply_timeout, Duration::from_secs(5));
        assert_eq!(config.max_recorded_failures, 64);
    }

    #[test]
    fn zero_timeout_is_rejected() {
        let err = ObjectConfig::from_toml("[apply_timeout]\nsecs = 0\nnanos = 0\n").unwrap_err();
        assert!(matches!(err, ObjectError::Config(_)));
    }

    #[test]
    fn malformed_toml_is_a_config_error() {
        assert!(matches!(
            ObjectConfig::from_toml("strict_classification = \"yes\""),
            Err(ObjectError::Config(_))
        ));
    }
}
