//! Environment variable loading utilities
//!
//! Typed lookups with fallback defaults, used to overlay `MEDFLOW_*`
//! variables on top of the orchestrator configuration.

use std::env;
use std::str::FromStr;
use std::time::Duration;

/// Load an environment variable with type conversion and default
///
/// Unparseable values fall back to `default` and are logged.
pub fn load_env_parsed<T>(key: &str, default: T) -> T
where
    T: FromStr,
{
    match env::var(key) {
        Ok(raw) => match raw.trim().parse() {
            Ok(value) => value,
            Err(_) => {
                tracing::warn!(key, value = %raw, "ignoring unparseable environment override");
                default
            }
        },
        Err(_) => default,
    }
}

/// Load an environment variable as an `Option<T>`
pub fn load_env_optional<T>(key: &str) -> Option<T>
where
    T: FromStr,
{
    env::var(key).ok().and_then(|v| v.trim().parse().ok())
}

/// Builder for loading multiple environment variables with consistent prefix
#[derive(Debug)]
pub struct EnvLoader {
    prefix: String,
}

impl EnvLoader {
    /// Create a new environment loader with the given prefix
    pub fn new(prefix: &str) -> Self {
        Self {
            prefix: prefix.to_string(),
        }
    }

    fn key(&self, suffix: &str) -> String {
        format!("{}_{}", self.prefix, suffix)
    }

    /// Load a parsed value with default
    pub fn load_parsed<T>(&self, suffix: &str, default: T) -> T
    where
        T: FromStr,
    {
        load_env_parsed(&self.key(suffix), default)
    }

    /// Load an optional value
    pub fn load_optional<T>(&self, suffix: &str) -> Option<T>
    where
        T: FromStr,
    {
        load_env_optional(&self.key(suffix))
    }

    /// Load a duration expressed in whole seconds
    pub fn load_secs(&self, suffix: &str, default: Duration) -> Duration {
        self.load_optional::<u64>(suffix)
            .map(Duration::from_secs)
            .unwrap_or(default)
    }

    /// Load a duration expressed in milliseconds
    pub fn load_millis(&self, suffix: &str, default: Duration) -> Duration {
        self.load_optional::<u64>(suffix)
            .map(Duration::from_millis)
            .unwrap_or(default)
    }
}
