//! Workflow orchestration core
//!
//! Types for workflow records and their status state machine, the handler
//! trait and registry, input validation, the retry executor, the injected
//! state store and the orchestrator that ties them together.

mod handler;
mod metrics;
mod orchestrator;
mod record;
mod retry;
mod store;
mod validator;

#[cfg(test)]
mod orchestrator_tests;

pub use handler::{
    Handler, HandlerContext, HandlerError, HandlerRegistry, HandlerRegistryBuilder,
    HandlerResult, Retryability,
};
pub use metrics::{
    MetricsSnapshot, OrchestratorMetrics, Outcome, WorkflowTypeMetrics, UNREGISTERED_TYPE,
};
pub use orchestrator::{CancelOutcome, OrchestrationResult, Orchestrator, OrchestratorBuilder};
pub use record::{ContextMap, ErrorType, WorkflowData, WorkflowId, WorkflowRecord, WorkflowStatus};
pub use retry::{
    AttemptObserver, NoopObserver, RetryExecutor, RetryOutcome, RetryPolicy, RetryStrategy,
};
pub use store::{status_key, MemoryStateStore, StateStore, StatusStore, STATUS_KEY_PREFIX};
pub use validator::{RequiredFieldsValidator, ValidationOutcome, Validator};
