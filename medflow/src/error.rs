//! Unified error handling for the medflow library
//!
//! Errors that cross the library boundary are `MedflowError`. Handler
//! failures have their own closed type (`crate::workflow::HandlerError`)
//! because their retryability drives the retry loop, and configuration
//! problems are reported as `crate::config::ConfigError`.

use crate::config::ConfigError;
use crate::workflow::WorkflowStatus;
use thiserror::Error;

/// The main error type for the medflow library
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MedflowError {
    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// State store backend error
    #[error("Storage error: {0}")]
    Storage(String),

    /// A status change the workflow state machine does not allow
    #[error("Invalid transition for workflow {workflow_id}: {from} -> {to}")]
    InvalidTransition {
        /// Workflow whose record rejected the change
        workflow_id: String,
        /// Status the record was in
        from: WorkflowStatus,
        /// Status that was requested
        to: WorkflowStatus,
    },

    /// JSON serialization/deserialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

/// Result type alias for medflow operations
pub type Result<T> = std::result::Result<T, MedflowError>;
