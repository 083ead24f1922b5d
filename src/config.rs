use std::path::Path;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::marker::Retention;

/// Tuning knobs for a [`RangeMarkerTree`](crate::model::marker_tree::RangeMarkerTree)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct TreeConfig {
    /// Whether the tree keeps markers alive on its own
    #[serde(default)]
    pub retention: Retention,

    /// Run the full structural check after every mutation (slow)
    #[serde(default)]
    pub verify_invariants: bool,

    /// Reclaimed markers are purged once their count exceeds
    /// `max(1, len / purge_divisor)`
    #[serde(default = "default_purge_divisor")]
    pub purge_divisor: usize,
}

fn default_purge_divisor() -> usize {
    3
}

impl Default for TreeConfig {
    fn default() -> Self {
        Self {
            retention: Retention::default(),
            verify_invariants: false,
            purge_divisor: default_purge_divisor(),
        }
    }
}

impl TreeConfig {
    /// Config holding markers strongly
    pub fn strong() -> Self {
        Self {
            retention: Retention::Strong,
            ..Self::default()
        }
    }

    /// Load configuration from a JSON file
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path.as_ref())
            .map_err(|e| ConfigError::IoError(e.to_string()))?;
        Self::from_json_str(&contents)
    }

    /// Parse and validate configuration from JSON text
    pub fn from_json_str(contents: &str) -> Result<Self, ConfigError> {
        let config: TreeConfig =
            serde_json::from_str(contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    /// Save configuration to a JSON file
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        let contents = serde_json::to_string_pretty(self)
            .map_err(|e| ConfigError::SerializeError(e.to_string()))?;

        std::fs::write(path.as_ref(), contents).map_err(|e| ConfigError::IoError(e.to_string()))?;

        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.purge_divisor == 0 {
            return Err(ConfigError::ValidationError(
                "purge_divisor must be greater than 0".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(String),
    #[error("Parse error: {0}")]
    ParseError(String),
    #[error("Serialize error: {0}")]
    SerializeError(String),
    #[error("Validation error: {0}")]
    ValidationError(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = TreeConfig::default();
        assert_eq!(config.retention, Retention::Weak);
        assert!(!config.verify_invariants);
        assert_eq!(config.purge_divisor, 3);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config = TreeConfig::from_json_str(r#"{"retention": "strong"}"#).unwrap();
        assert_eq!(config.retention, Retention::Strong);
        assert_eq!(config.purge_divisor, 3);

        let empty = TreeConfig::from_json_str("{}").unwrap();
        assert_eq!(empty, TreeConfig::default());
    }

    #[test]
    fn test_validation_rejects_zero_divisor() {
        let result = TreeConfig::from_json_str(r#"{"purge_divisor": 0}"#);
        assert!(matches!(result, Err(ConfigError::ValidationError(_))));
    }

    #[test]
    fn test_parse_error() {
        let result = TreeConfig::from_json_str(r#"{"retention": "sometimes"}"#);
        assert!(matches!(result, Err(ConfigError::ParseError(_))));
    }

    #[test]
    fn test_config_save_and_load() {
        let temp_dir = tempfile::tempdir().unwrap();
        let config_path = temp_dir.path().join("markers.json");

        let config = TreeConfig {
            retention: Retention::Strong,
            verify_invariants: true,
            purge_divisor: 5,
        };
        config.save_to_file(&config_path).unwrap();

        let loaded = TreeConfig::load_from_file(&config_path).unwrap();
        assert_eq!(loaded, config);
    }

    #[test]
    fn test_load_missing_file() {
        let temp_dir = tempfile::tempdir().unwrap();
        let result = TreeConfig::load_from_file(temp_dir.path().join("absent.json"));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
