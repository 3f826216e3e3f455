//! Configuration management for the orchestrator
//!
//! Values are resolved from, in increasing precedence:
//! 1. Built-in defaults
//! 2. `MEDFLOW_*` environment variables
//! 3. A `medflow.yaml` file (explicit path, or discovered in the working directory)
//!
//! The required-field rule table consumed by the validator lives here too,
//! so deployments can change validation rules without touching handlers.

use crate::common::env_loader::EnvLoader;
use crate::handlers::{
    AUDIO_TRANSCRIPTION, BATCH_PROCESSING, CONSENT_HANDLING, PATIENT_REGISTRATION,
    PRESCRIPTION_PROCESSING, RECORD_CREATION,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

/// Name of the configuration file searched for in the working directory
pub const CONFIG_FILE_NAME: &str = "medflow.yaml";

/// Default number of handler attempts per workflow
pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

/// Default per-attempt deadline
pub const DEFAULT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(300);

/// Default base delay for exponential backoff
pub const DEFAULT_BACKOFF_BASE: Duration = Duration::from_secs(1);

/// Default ceiling for a single backoff delay
pub const DEFAULT_BACKOFF_MAX: Duration = Duration::from_secs(60);

/// Default lifetime of a status snapshot in the state store
pub const DEFAULT_STATUS_TTL: Duration = Duration::from_secs(3600);

const MAX_ALLOWED_ATTEMPTS: u32 = 100;

/// Errors that can occur during configuration loading
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to read a configuration file from disk
    #[error("Failed to read configuration file {path}: {source}")]
    FileRead {
        /// Path to the configuration file that could not be read
        path: PathBuf,
        /// Underlying I/O error
        #[source]
        source: std::io::Error,
    },

    /// Failed to parse YAML content from a configuration file
    #[error("Invalid YAML syntax in {path}:\n{source}\n\nHint: Check for proper indentation and YAML formatting")]
    YamlParse {
        /// Path to the configuration file with invalid YAML content
        path: PathBuf,
        /// Underlying YAML parsing error
        #[source]
        source: serde_yaml::Error,
    },

    /// Invalid configuration value for a specific field
    #[error("Invalid configuration value for '{field}': {value}\n{hint}")]
    InvalidValue {
        /// Name of the configuration field
        field: String,
        /// The invalid value that was provided
        value: String,
        /// How to fix it
        hint: String,
    },

    /// Configuration validation failed
    #[error("Configuration validation failed: {message}")]
    Validation {
        /// Descriptive message about the validation failure
        message: String,
    },
}

/// Settings for the orchestrator, its retry executor and the validator
#[derive(Debug, Clone, PartialEq)]
pub struct OrchestratorConfig {
    /// Maximum handler invocations per workflow (default: 3)
    pub max_attempts: u32,
    /// Deadline for a single handler invocation (default: 300s)
    pub attempt_timeout: Duration,
    /// Delay before the second attempt; doubles after each further attempt (default: 1s)
    pub backoff_base: Duration,
    /// Upper bound for any single backoff delay (default: 60s)
    pub backoff_max: Duration,
    /// TTL applied to every status snapshot write (default: 3600s)
    pub status_ttl: Duration,
    /// Required top-level data keys per workflow type
    pub required_fields: BTreeMap<String, Vec<String>>,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            attempt_timeout: DEFAULT_ATTEMPT_TIMEOUT,
            backoff_base: DEFAULT_BACKOFF_BASE,
            backoff_max: DEFAULT_BACKOFF_MAX,
            status_ttl: DEFAULT_STATUS_TTL,
            required_fields: default_required_fields(),
        }
    }
}

/// The rule table for the built-in workflow kinds
pub fn default_required_fields() -> BTreeMap<String, Vec<String>> {
    let rules: [(&str, &[&str]); 6] = [
        (
            PATIENT_REGISTRATION,
            &["first_name", "last_name", "date_of_birth"],
        ),
        (RECORD_CREATION, &["patient_id", "record_type"]),
        (
            PRESCRIPTION_PROCESSING,
            &["patient_id", "medication", "dosage"],
        ),
        (CONSENT_HANDLING, &["patient_id", "consent_type"]),
        (AUDIO_TRANSCRIPTION, &["audio_ref"]),
        (BATCH_PROCESSING, &["items"]),
    ];

    rules
        .iter()
        .map(|(workflow_type, fields)| {
            (
                workflow_type.to_string(),
                fields.iter().map(|f| f.to_string()).collect(),
            )
        })
        .collect()
}

impl OrchestratorConfig {
    /// Defaults overlaid with `MEDFLOW_*` environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env_vars();
        config
    }

    /// Resolve the full configuration and validate it
    ///
    /// When `path` is `None`, `medflow.yaml` in the working directory is used
    /// if present. A file that exists but cannot be read or parsed is an
    /// error rather than being silently skipped.
    pub fn load(path: Option<&Path>) -> Result<Self, ConfigError> {
        let mut config = Self::from_env();

        let yaml_path = match path {
            Some(path) => Some(path.to_path_buf()),
            None => Self::find_yaml_config_file(),
        };

        if let Some(yaml_path) = yaml_path {
            let yaml_config = YamlConfig::load_from_file(&yaml_path)?;
            yaml_config.apply_to_config(&mut config);
        }

        config.validate()?;
        Ok(config)
    }

    fn apply_env_vars(&mut self) {
        let loader = EnvLoader::new("MEDFLOW");

        self.max_attempts = loader.load_parsed("MAX_ATTEMPTS", self.max_attempts);
        self.attempt_timeout = loader.load_secs("ATTEMPT_TIMEOUT_SECS", self.attempt_timeout);
        self.backoff_base = loader.load_millis("BACKOFF_BASE_MS", self.backoff_base);
        self.backoff_max = loader.load_secs("BACKOFF_MAX_SECS", self.backoff_max);
        self.status_ttl = loader.load_secs("STATUS_TTL_SECS", self.status_ttl);
    }

    /// Look for `medflow.yaml` in the current working directory
    pub fn find_yaml_config_file() -> Option<PathBuf> {
        let candidate = PathBuf::from(CONFIG_FILE_NAME);
        match candidate.try_exists() {
            Ok(true) if candidate.is_file() => {
                tracing::debug!("Found configuration file: {:?}", candidate);
                Some(candidate)
            }
            Ok(_) => None,
            Err(e) => {
                tracing::warn!(
                    "Error checking for configuration file {:?}: {}",
                    candidate,
                    e
                );
                None
            }
        }
    }

    /// Required fields declared for a workflow type (empty when none)
    pub fn required_fields_for(&self, workflow_type: &str) -> &[String] {
        self.required_fields
            .get(workflow_type)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// Validate the current configuration settings
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_attempts == 0 || self.max_attempts > MAX_ALLOWED_ATTEMPTS {
            return Err(ConfigError::InvalidValue {
                field: "max_attempts".to_string(),
                value: self.max_attempts.to_string(),
                hint: format!("max_attempts must be between 1 and {MAX_ALLOWED_ATTEMPTS}"),
            });
        }

        if self.attempt_timeout.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "attempt_timeout_secs".to_string(),
                value: "0".to_string(),
                hint: "attempt_timeout_secs must be greater than zero".to_string(),
            });
        }

        if self.status_ttl.is_zero() {
            return Err(ConfigError::InvalidValue {
                field: "status_ttl_secs".to_string(),
                value: "0".to_string(),
                hint: "status_ttl_secs must be greater than zero".to_string(),
            });
        }

        if self.backoff_base > self.backoff_max {
            return Err(ConfigError::Validation {
                message: format!(
                    "backoff_base ({:?}) must be less than or equal to backoff_max ({:?})",
                    self.backoff_base, self.backoff_max
                ),
            });
        }

        for (workflow_type, fields) in &self.required_fields {
            if workflow_type.trim().is_empty() {
                return Err(ConfigError::Validation {
                    message: "required_fields contains an empty workflow type".to_string(),
                });
            }
            if let Some(field) = fields.iter().find(|f| f.trim().is_empty()) {
                return Err(ConfigError::InvalidValue {
                    field: format!("required_fields.{workflow_type}"),
                    value: format!("{field:?}"),
                    hint: "required field names cannot be empty".to_string(),
                });
            }
        }

        Ok(())
    }

    /// Fully populated YAML view of this configuration
    pub fn to_yaml_config(&self) -> YamlConfig {
        YamlConfig {
            max_attempts: Some(self.max_attempts),
            attempt_timeout_secs: Some(self.attempt_timeout.as_secs()),
            backoff_base_ms: Some(self.backoff_base.as_millis() as u64),
            backoff_max_secs: Some(self.backoff_max.as_secs()),
            status_ttl_secs: Some(self.status_ttl.as_secs()),
            required_fields: Some(self.required_fields.clone()),
        }
    }

    /// Generate an example YAML configuration file content
    pub fn example_yaml_config() -> &'static str {
        r#"# medflow.yaml
max_attempts: 3
attempt_timeout_secs: 300
backoff_base_ms: 1000
backoff_max_secs: 60
status_ttl_secs: 3600

# Entries replace the built-in rule for that workflow type
required_fields:
  patient_registration: [first_name, last_name, date_of_birth]
"#
    }
}

/// Configuration loaded from a medflow.yaml file
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct YamlConfig {
    /// Maximum handler invocations per workflow
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_attempts: Option<u32>,
    /// Per-attempt deadline in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub attempt_timeout_secs: Option<u64>,
    /// Backoff base delay in milliseconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_base_ms: Option<u64>,
    /// Backoff ceiling in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backoff_max_secs: Option<u64>,
    /// Status snapshot TTL in seconds
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status_ttl_secs: Option<u64>,
    /// Per workflow type rule overrides
    #[serde(skip_serializing_if = "Option::is_none")]
    pub required_fields: Option<BTreeMap<String, Vec<String>>>,
}

impl YamlConfig {
    /// Apply YAML configuration values to an existing config
    pub fn apply_to_config(&self, config: &mut OrchestratorConfig) {
        if let Some(max_attempts) = self.max_attempts {
            config.max_attempts = max_attempts;
        }
        if let Some(secs) = self.attempt_timeout_secs {
            config.attempt_timeout = Duration::from_secs(secs);
        }
        if let Some(ms) = self.backoff_base_ms {
            config.backoff_base = Duration::from_millis(ms);
        }
        if let Some(secs) = self.backoff_max_secs {
            config.backoff_max = Duration::from_secs(secs);
        }
        if let Some(secs) = self.status_ttl_secs {
            config.status_ttl = Duration::from_secs(secs);
        }
        if let Some(ref rules) = self.required_fields {
            for (workflow_type, fields) in rules {
                config
                    .required_fields
                    .insert(workflow_type.clone(), fields.clone());
            }
        }
    }

    /// Load YAML configuration from a file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        tracing::info!("Loading YAML configuration from: {:?}", path);

        let content = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
            path: path.to_path_buf(),
            source: e,
        })?;

        // An empty file is a valid "no overrides" configuration
        if content.trim().is_empty() {
            return Ok(Self::default());
        }

        serde_yaml::from_str(&content).map_err(|e| ConfigError::YamlParse {
            path: path.to_path_buf(),
            source: e,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::env;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const ENV_KEYS: [&str; 5] = [
        "MEDFLOW_MAX_ATTEMPTS",
        "MEDFLOW_ATTEMPT_TIMEOUT_SECS",
        "MEDFLOW_BACKOFF_BASE_MS",
        "MEDFLOW_BACKOFF_MAX_SECS",
        "MEDFLOW_STATUS_TTL_SECS",
    ];

    fn clear_env() {
        for key in ENV_KEYS {
            env::remove_var(key);
        }
    }

    fn write_yaml(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = OrchestratorConfig::default();

        assert_eq!(config.max_attempts, 3);
        assert_eq!(config.attempt_timeout, Duration::from_secs(300));
        assert_eq!(config.backoff_base, Duration::from_secs(1));
        assert_eq!(config.status_ttl, Duration::from_secs(3600));
        assert_eq!(config.required_fields.len(), 6);
        assert_eq!(
            config.required_fields_for(PRESCRIPTION_PROCESSING),
            ["patient_id", "medication", "dosage"]
        );
        assert!(config.required_fields_for("unknown").is_empty());
        assert!(config.validate().is_ok());
    }

    #[test]
    #[serial]
    fn test_config_with_env_vars() {
        clear_env();
        env::set_var("MEDFLOW_MAX_ATTEMPTS", "5");
        env::set_var("MEDFLOW_ATTEMPT_TIMEOUT_SECS", "30");
        env::set_var("MEDFLOW_BACKOFF_BASE_MS", "10");

        let config = OrchestratorConfig::from_env();
        clear_env();

        assert_eq!(config.max_attempts, 5);
        assert_eq!(config.attempt_timeout, Duration::from_secs(30));
        assert_eq!(config.backoff_base, Duration::from_millis(10));
        assert_eq!(config.backoff_max, DEFAULT_BACKOFF_MAX);
    }

    #[test]
    #[serial]
    fn test_yaml_overrides_env() {
        clear_env();
        env::set_var("MEDFLOW_MAX_ATTEMPTS", "7");
        let file = write_yaml("max_attempts: 2\nstatus_ttl_secs: 60\n");

        let config = OrchestratorConfig::load(Some(file.path())).unwrap();
        clear_env();

        assert_eq!(config.max_attempts, 2);
        assert_eq!(config.status_ttl, Duration::from_secs(60));
    }

    #[test]
    #[serial]
    fn test_yaml_required_fields_replace_single_rule() {
        clear_env();
        let file = write_yaml(
            "required_fields:\n  patient_registration: [mrn]\n  lab_order: [patient_id, panel]\n",
        );

        let config = OrchestratorConfig::load(Some(file.path())).unwrap();

        assert_eq!(config.required_fields_for(PATIENT_REGISTRATION), ["mrn"]);
        assert_eq!(config.required_fields_for("lab_order"), ["patient_id", "panel"]);
        assert_eq!(
            config.required_fields_for(RECORD_CREATION),
            ["patient_id", "record_type"]
        );
    }

    #[test]
    fn test_yaml_load_from_file_errors() {
        let missing = YamlConfig::load_from_file("/definitely/not/here/medflow.yaml");
        assert!(matches!(missing, Err(ConfigError::FileRead { .. })));

        let file = write_yaml("max_attempts: [not, a, number]\n");
        let invalid = YamlConfig::load_from_file(file.path());
        assert!(matches!(invalid, Err(ConfigError::YamlParse { .. })));

        let file = write_yaml("max_attempts: 3\nunknown_key: true\n");
        let unknown = YamlConfig::load_from_file(file.path());
        assert!(matches!(unknown, Err(ConfigError::YamlParse { .. })));
    }

    #[test]
    fn test_yaml_load_from_empty_file() {
        let file = write_yaml("   \n");
        let config = YamlConfig::load_from_file(file.path()).unwrap();
        assert_eq!(config, YamlConfig::default());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let mut config = OrchestratorConfig::default();
        config.max_attempts = 0;
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "max_attempts"
        ));

        let mut config = OrchestratorConfig::default();
        config.attempt_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        let mut config = OrchestratorConfig::default();
        config.backoff_base = Duration::from_secs(120);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Validation { .. })
        ));

        let mut config = OrchestratorConfig::default();
        config
            .required_fields
            .insert("lab_order".to_string(), vec![" ".to_string()]);
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_yaml_view_round_trips_into_config() {
        let mut config = OrchestratorConfig::default();
        config.max_attempts = 4;
        config.backoff_base = Duration::from_millis(250);

        let mut restored = OrchestratorConfig::default();
        config.to_yaml_config().apply_to_config(&mut restored);

        assert_eq!(restored, config);
    }

    #[test]
    fn test_example_yaml_config_parses() {
        let parsed: YamlConfig =
            serde_yaml::from_str(OrchestratorConfig::example_yaml_config()).unwrap();
        assert_eq!(parsed.max_attempts, Some(3));
        assert!(parsed.required_fields.is_some());
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue {
            field: "max_attempts".to_string(),
            value: "0".to_string(),
            hint: "max_attempts must be between 1 and 100".to_string(),
        };
        let msg = err.to_string();
        assert!(msg.contains("max_attempts"));
        assert!(msg.contains("between 1 and 100"));
    }
}
