//! Engine configuration
//!
//! Defaults, TOML/JSON file loading, `KEYGATE_*` environment overrides and
//! accumulated validation.

use keygate_core::{ErrorCode, KeygateError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;

/// Environment variable prefix for overrides
pub const ENV_PREFIX: &str = "KEYGATE_";

/// Configuration error
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {reason}")]
    Io { path: String, reason: String },

    #[error("Invalid {format}: {reason}")]
    Parse { format: &'static str, reason: String },

    #[error("Unsupported config file format: {0}")]
    UnsupportedFormat(String),

    #[error("Unknown configuration key: {0}")]
    UnknownKey(String),

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: String, value: String },

    #[error("Invalid configuration: {}", join_errors(.0))]
    Validation(Vec<ValidationError>),
}

fn join_errors(errors: &[ValidationError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

impl From<ConfigError> for KeygateError {
    fn from(err: ConfigError) -> Self {
        KeygateError::new(ErrorCode::InvalidParameter, err.to_string())
    }
}

/// A single failed validation rule
#[derive(Debug, Clone, PartialEq)]
pub enum ValidationError {
    /// String field is empty
    Required { field: String },
    /// Number outside its accepted range
    OutOfRange {
        field: String,
        min: Option<u64>,
        max: Option<u64>,
        actual: u64,
    },
    /// Custom rule failed
    Custom { field: String, message: String },
}

impl fmt::Display for ValidationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ValidationError::Required { field } => {
                write!(f, "Field '{field}' is required but empty")
            }
            ValidationError::OutOfRange {
                field,
                min,
                max,
                actual,
            } => {
                let range = match (min, max) {
                    (Some(min), Some(max)) => format!("between {min} and {max}"),
                    (Some(min), None) => format!("at least {min}"),
                    (None, Some(max)) => format!("at most {max}"),
                    (None, None) => "in valid range".to_string(),
                };
                write!(f, "Field '{field}' must be {range} (got {actual})")
            }
            ValidationError::Custom { field, message } => write!(f, "Field '{field}': {message}"),
        }
    }
}

/// Validator that accumulates failed rules instead of stopping at the first
#[derive(Debug, Default)]
pub struct ConfigValidator {
    errors: Vec<ValidationError>,
}

impl ConfigValidator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Require a non-empty string
    pub fn non_empty(&mut self, field: &str, value: &str) -> &mut Self {
        if value.is_empty() {
            self.errors.push(ValidationError::Required {
                field: field.to_string(),
            });
        }
        self
    }

    /// Require `min <= value <= max`
    pub fn range(&mut self, field: &str, value: u64, min: Option<u64>, max: Option<u64>) -> &mut Self {
        let below = min.is_some_and(|min| value < min);
        let above = max.is_some_and(|max| value > max);
        if below || above {
            self.errors.push(ValidationError::OutOfRange {
                field: field.to_string(),
                min,
                max,
                actual: value,
            });
        }
        self
    }

    /// Require a custom predicate to hold
    pub fn custom<T, F>(&mut self, field: &str, value: &T, predicate: F, message: &str) -> &mut Self
    where
        T: ?Sized,
        F: FnOnce(&T) -> bool,
    {
        if !predicate(value) {
            self.errors.push(ValidationError::Custom {
                field: field.to_string(),
                message: message.to_string(),
            });
        }
        self
    }

    /// Collected errors
    pub fn errors(&self) -> &[ValidationError] {
        &self.errors
    }

    /// Finish validation
    pub fn finish(self) -> Result<(), ConfigError> {
        if self.errors.is_empty() {
            Ok(())
        } else {
            Err(ConfigError::Validation(self.errors))
        }
    }
}

/// Key aliases and storage paths accept only this alphabet
pub(crate) fn is_alias_safe(value: &str) -> bool {
    value
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

/// Engine configuration
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Key-store alias of the root key
    pub root_key_name: String,
    /// Prefix of every scene key alias
    pub scene_key_prefix: String,
    /// Namespace of every persisted preference
    pub storage_namespace: String,
    /// Local failures before the guard freezes the sensor
    pub max_fail_count: u32,
    /// How long a local freeze lasts
    pub freeze_window_ms: u64,
    /// How long to wait for the sensor to confirm a cancel
    pub cancel_wait_ms: u64,
    /// Salt length forwarded with every signature
    pub signature_salt_len: u32,
    /// Delete permanently invalidated keys when they are detected
    pub auto_delete_invalid_keys: bool,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            root_key_name: "keygate_root".to_string(),
            scene_key_prefix: "keygate_scene_".to_string(),
            storage_namespace: "keygate".to_string(),
            max_fail_count: 5,
            freeze_window_ms: 30_000,
            cancel_wait_ms: 300,
            signature_salt_len: 20,
            auto_delete_invalid_keys: true,
        }
    }
}

impl EngineConfig {
    /// Load from a `.toml` or `.json` file
    pub fn load_from_file(path: &Path) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::Io {
            path: path.display().to_string(),
            reason: e.to_string(),
        })?;

        match path.extension().and_then(|ext| ext.to_str()) {
            Some("toml") => Self::from_toml_str(&content),
            Some("json") => serde_json::from_str(&content).map_err(|e| ConfigError::Parse {
                format: "JSON",
                reason: e.to_string(),
            }),
            other => Err(ConfigError::UnsupportedFormat(
                other.unwrap_or("<none>").to_string(),
            )),
        }
    }

    /// Parse TOML; missing fields keep their defaults
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            format: "TOML",
            reason: e.to_string(),
        })
    }

    /// Apply `KEYGATE_*` variables from the process environment
    pub fn merge_with_env(&mut self) -> Result<(), ConfigError> {
        self.merge_with_vars(std::env::vars())
    }

    /// Apply `KEYGATE_*` overrides from an explicit variable list.
    ///
    /// Variables without a matching field are skipped so unrelated
    /// `KEYGATE_*` settings can share the prefix.
    pub fn merge_with_vars<I>(&mut self, vars: I) -> Result<(), ConfigError>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        for (name, value) in vars {
            let Some(key) = name.strip_prefix(ENV_PREFIX) else {
                continue;
            };
            let key = key.to_ascii_lowercase();
            match self.set_from_string(&key, &value) {
                Err(ConfigError::UnknownKey(_)) => {
                    tracing::debug!(var = %name, "Ignoring unrecognized environment override");
                }
                other => other?,
            }
        }
        Ok(())
    }

    /// Set one field by name
    pub fn set_from_string(&mut self, key: &str, value: &str) -> Result<(), ConfigError> {
        fn parse<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
            value.parse().map_err(|_| ConfigError::InvalidValue {
                key: key.to_string(),
                value: value.to_string(),
            })
        }

        match key.replace('-', "_").as_str() {
            "root_key_name" => self.root_key_name = value.to_string(),
            "scene_key_prefix" => self.scene_key_prefix = value.to_string(),
            "storage_namespace" => self.storage_namespace = value.to_string(),
            "max_fail_count" => self.max_fail_count = parse(key, value)?,
            "freeze_window_ms" => self.freeze_window_ms = parse(key, value)?,
            "cancel_wait_ms" => self.cancel_wait_ms = parse(key, value)?,
            "signature_salt_len" => self.signature_salt_len = parse(key, value)?,
            "auto_delete_invalid_keys" => self.auto_delete_invalid_keys = parse(key, value)?,
            _ => return Err(ConfigError::UnknownKey(key.to_string())),
        }
        Ok(())
    }

    /// Validate every field, reporting all failures at once
    pub fn validate(&self) -> Result<(), ConfigError> {
        let mut validator = ConfigValidator::new();
        validator
            .non_empty("root_key_name", &self.root_key_name)
            .non_empty("scene_key_prefix", &self.scene_key_prefix)
            .non_empty("storage_namespace", &self.storage_namespace)
            .custom(
                "root_key_name",
                self.root_key_name.as_str(),
                is_alias_safe,
                "only ASCII letters, digits, '_' and '-' are allowed",
            )
            .custom(
                "scene_key_prefix",
                self.scene_key_prefix.as_str(),
                is_alias_safe,
                "only ASCII letters, digits, '_' and '-' are allowed",
            )
            .custom(
                "storage_namespace",
                self.storage_namespace.as_str(),
                is_alias_safe,
                "only ASCII letters, digits, '_' and '-' are allowed",
            )
            .range("max_fail_count", u64::from(self.max_fail_count), Some(1), Some(100))
            .range("freeze_window_ms", self.freeze_window_ms, Some(1), None)
            .range("cancel_wait_ms", self.cancel_wait_ms, Some(1), Some(60_000))
            .range("signature_salt_len", u64::from(self.signature_salt_len), None, Some(1024));
        validator.finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> Vec<(String, String)> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[test]
    fn test_defaults_are_valid() {
        let config = EngineConfig::default();
        assert_eq!(config.max_fail_count, 5);
        assert_eq!(config.freeze_window_ms, 30_000);
        assert_eq!(config.cancel_wait_ms, 300);
        config.validate().unwrap();
    }

    #[test]
    fn test_toml_keeps_defaults_for_missing_fields() {
        let config = EngineConfig::from_toml_str(
            r#"
            storage_namespace = "app"
            cancel_wait_ms = 150
            "#,
        )
        .unwrap();
        assert_eq!(config.storage_namespace, "app");
        assert_eq!(config.cancel_wait_ms, 150);
        assert_eq!(config.root_key_name, "keygate_root");
    }

    #[test]
    fn test_load_from_toml_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        writeln!(file, "max_fail_count = 3").unwrap();
        let config = EngineConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config.max_fail_count, 3);
    }

    #[test]
    fn test_unsupported_extension() {
        let file = tempfile::Builder::new().suffix(".yaml").tempfile().unwrap();
        assert!(matches!(
            EngineConfig::load_from_file(file.path()),
            Err(ConfigError::UnsupportedFormat(_))
        ));
    }

    #[test]
    fn test_env_overrides() {
        let mut config = EngineConfig::default();
        config
            .merge_with_vars(vars(&[
                ("KEYGATE_CANCEL_WAIT_MS", "500"),
                ("KEYGATE_AUTO_DELETE_INVALID_KEYS", "false"),
                ("KEYGATE_LOG_STYLE", "pretty"),
                ("HOME", "/root"),
            ]))
            .unwrap();
        assert_eq!(config.cancel_wait_ms, 500);
        assert!(!config.auto_delete_invalid_keys);
    }

    #[test]
    fn test_env_override_with_bad_number() {
        let mut config = EngineConfig::default();
        let err = config
            .merge_with_vars(vars(&[("KEYGATE_MAX_FAIL_COUNT", "many")]))
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { .. }));
        assert_eq!(KeygateError::from(err).code, ErrorCode::InvalidParameter);
    }

    #[test]
    fn test_validation_accumulates_errors() {
        let config = EngineConfig {
            storage_namespace: String::new(),
            max_fail_count: 0,
            scene_key_prefix: "bad/prefix".to_string(),
            ..EngineConfig::default()
        };
        match config.validate() {
            Err(ConfigError::Validation(errors)) => assert_eq!(errors.len(), 3),
            other => panic!("expected validation errors, got {other:?}"),
        }
    }
}
