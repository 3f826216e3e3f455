//! medflow CLI library
//!
//! Command definitions and their implementations, exposed so the binary and
//! the tests share one code path.

/// Command-line interface definitions and argument parsing
pub mod cli;
/// `medflow config`
pub mod config_cmd;
/// CLI error type carrying exit codes
pub mod error;
/// Exit codes used by the CLI application
pub mod exit_codes;
/// `medflow list`
pub mod list;
/// `medflow run`
pub mod run;

use medflow::OrchestratorConfig;
use std::path::Path;

use error::{CliResult, IntoCliResult};

/// Resolve configuration for a command; failures are usage errors
pub fn load_config(path: Option<&Path>) -> CliResult<OrchestratorConfig> {
    OrchestratorConfig::load(path).cli_usage_error()
}
