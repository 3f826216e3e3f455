//! Common utilities module
//!
//! Small helpers shared by the configuration and workflow modules.

/// Environment variable loading utilities
pub mod env_loader;

/// Monotonic ULID generation for workflow ids
pub mod ulid_generator;

pub use env_loader::{load_env_optional, load_env_parsed, EnvLoader};
pub use ulid_generator::{generate_monotonic_ulid, generate_monotonic_ulid_string};
