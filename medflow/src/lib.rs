//! # medflow
//!
//! Workflow orchestration core for a medical platform backend.
//!
//! ## Features
//!
//! - **Orchestrator**: validate, dispatch and track named workflows
//! - **Retry**: bounded attempts with exponential backoff and per-attempt timeouts
//! - **Cancellation**: cooperative, through a token handed to every handler
//! - **Status**: snapshots in an injected key/value store with TTL
//! - **Handlers**: reference implementations for the built-in workflow kinds
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use medflow::handlers::{default_registry, EntityStore, UnavailableTranscriber};
//! use medflow::{ContextMap, MemoryStateStore, Orchestrator, OrchestratorConfig};
//! use serde_json::json;
//! use std::sync::Arc;
//!
//! # async fn run() -> medflow::Result<()> {
//! let config = OrchestratorConfig::load(None)?;
//! let registry = default_registry(
//!     Arc::new(EntityStore::new()),
//!     Arc::new(UnavailableTranscriber),
//!     &config,
//! );
//! let orchestrator = Orchestrator::new(config, registry, Arc::new(MemoryStateStore::new()));
//!
//! let data = [
//!     ("first_name".to_string(), json!("Ada")),
//!     ("last_name".to_string(), json!("Lovelace")),
//!     ("date_of_birth".to_string(), json!("1815-12-10")),
//! ]
//! .into_iter()
//! .collect();
//!
//! let result = orchestrator
//!     .orchestrate("patient_registration", data, ContextMap::new())
//!     .await;
//! let status = orchestrator.get_status(&result.workflow_id.to_string())?;
//! println!("{:?}", status.map(|record| record.status));
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]

/// Shared helpers
pub mod common;

/// Orchestrator configuration
pub mod config;

/// Error types used throughout the library
pub mod error;

/// Reference workflow handlers
pub mod handlers;

/// Orchestration core
pub mod workflow;

pub use config::{ConfigError, OrchestratorConfig, YamlConfig};
pub use error::{MedflowError, Result};
pub use workflow::{
    CancelOutcome, ContextMap, ErrorType, Handler, HandlerContext, HandlerError,
    HandlerRegistry, HandlerResult, MemoryStateStore, MetricsSnapshot, OrchestrationResult,
    Orchestrator, RequiredFieldsValidator, StateStore, Validator, WorkflowData, WorkflowId,
    WorkflowRecord, WorkflowStatus,
};

/// Library version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Prelude module for convenient imports
pub mod prelude {
    pub use crate::{
        CancelOutcome, ContextMap, ErrorType, Handler, HandlerContext, HandlerError,
        HandlerRegistry, HandlerResult, MedflowError, OrchestrationResult, Orchestrator,
        OrchestratorConfig, Result, StateStore, WorkflowData, WorkflowId, WorkflowRecord,
        WorkflowStatus,
    };
}

/// Test utilities module for testing support
#[doc(hidden)]
pub mod test_utils;
