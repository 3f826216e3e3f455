//! Exit code constants for CLI commands
//!
//! - 0: Success
//! - 1: Workflow failed or was cancelled, or output could not be written
//! - 2: Invalid arguments or configuration

/// Successful execution
pub const EXIT_SUCCESS: i32 = 0;

/// Workflow did not complete
pub const EXIT_WARNING: i32 = 1;

/// Usage or configuration error
pub const EXIT_ERROR: i32 = 2;
