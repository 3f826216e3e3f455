//! Workflow handlers and the registry that maps workflow types to them

use super::record::{ContextMap, WorkflowData, WorkflowId};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Whether an error is worth another attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Retryability {
    /// Another attempt may succeed
    Recoverable,
    /// Retrying cannot change the outcome
    NonRecoverable,
}

/// Failure reported by a [`Handler`]
///
/// The variant decides retry behavior: input, lookup and conflict errors
/// stop the retry loop immediately, while transient, dependency and
/// timeout errors consume further attempts.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum HandlerError {
    /// The payload is well-formed but semantically invalid
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// A referenced entity does not exist
    #[error("not found: {0}")]
    NotFound(String),

    /// The operation conflicts with existing state
    #[error("conflict: {0}")]
    Conflict(String),

    /// A temporary failure inside the handler
    #[error("transient failure: {0}")]
    Transient(String),

    /// An external service the handler relies on is unavailable
    #[error("dependency unavailable: {0}")]
    Dependency(String),

    /// The attempt exceeded its time limit
    #[error("attempt timed out after {0:?}")]
    Timeout(Duration),

    /// The handler observed cancellation and stopped
    #[error("cancelled")]
    Cancelled,
}

impl HandlerError {
    /// Retry classification for this error
    pub fn retryability(&self) -> Retryability {
        match self {
            HandlerError::Transient(_) | HandlerError::Dependency(_) | HandlerError::Timeout(_) => {
                Retryability::Recoverable
            }
            HandlerError::InvalidInput(_)
            | HandlerError::NotFound(_)
            | HandlerError::Conflict(_)
            | HandlerError::Cancelled => Retryability::NonRecoverable,
        }
    }

    /// Shorthand for `retryability() == Recoverable`
    pub fn is_retryable(&self) -> bool {
        self.retryability() == Retryability::Recoverable
    }

    /// Stable snake case name of the variant
    pub fn kind(&self) -> &'static str {
        match self {
            HandlerError::InvalidInput(_) => "invalid_input",
            HandlerError::NotFound(_) => "not_found",
            HandlerError::Conflict(_) => "conflict",
            HandlerError::Transient(_) => "transient",
            HandlerError::Dependency(_) => "dependency",
            HandlerError::Timeout(_) => "timeout",
            HandlerError::Cancelled => "cancelled",
        }
    }

    /// Structured summary stored on failed records
    pub fn summary(&self) -> Value {
        json!({
            "kind": self.kind(),
            "message": self.to_string(),
            "retryable": self.is_retryable(),
        })
    }
}

/// Result type returned by handlers
pub type HandlerResult<T> = std::result::Result<T, HandlerError>;

/// Per-attempt information passed to a handler
#[derive(Debug, Clone)]
pub struct HandlerContext {
    workflow_id: WorkflowId,
    attempt: u32,
    max_attempts: u32,
    context: Arc<ContextMap>,
    cancellation: CancellationToken,
}

impl HandlerContext {
    /// Context for the first attempt of a workflow
    pub fn new(
        workflow_id: WorkflowId,
        context: Arc<ContextMap>,
        cancellation: CancellationToken,
    ) -> Self {
        Self {
            workflow_id,
            attempt: 1,
            max_attempts: 1,
            context,
            cancellation,
        }
    }

    /// Context with fresh id, empty metadata and its own token
    pub fn detached() -> Self {
        Self::new(
            WorkflowId::new(),
            Arc::new(ContextMap::new()),
            CancellationToken::new(),
        )
    }

    /// Copy of this context for a specific attempt
    pub fn for_attempt(&self, attempt: u32, max_attempts: u32) -> Self {
        Self {
            attempt,
            max_attempts,
            ..self.clone()
        }
    }

    /// Workflow this attempt belongs to
    pub fn workflow_id(&self) -> WorkflowId {
        self.workflow_id
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    /// Attempt ceiling for this workflow
    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether a failure now will not be retried
    pub fn is_last_attempt(&self) -> bool {
        self.attempt >= self.max_attempts
    }

    /// Caller metadata
    pub fn context(&self) -> &ContextMap {
        &self.context
    }

    /// Look up a single metadata value
    pub fn get(&self, key: &str) -> Option<&Value> {
        self.context.get(key)
    }

    /// Token that fires when the workflow is cancelled
    pub fn cancellation_token(&self) -> &CancellationToken {
        &self.cancellation
    }

    /// Whether the workflow has been cancelled
    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    /// Resolves once the workflow is cancelled
    pub async fn cancelled(&self) {
        self.cancellation.cancelled().await
    }
}

/// Business logic for one workflow type
///
/// Handlers should watch [`HandlerContext::cancelled`] around long waits.
/// A handler that ignores the token still runs to completion, but its
/// result is discarded once the workflow is cancelled.
#[async_trait]
pub trait Handler: Send + Sync {
    /// Workflow type this handler serves
    fn workflow_type(&self) -> &str;

    /// One-line description for listings
    fn description(&self) -> &str {
        ""
    }

    /// Execute one attempt
    async fn handle(&self, data: &WorkflowData, ctx: &HandlerContext) -> HandlerResult<Value>;
}

/// Immutable map from workflow type to handler
///
/// Built once at startup through [`HandlerRegistryBuilder`] and cheap to
/// clone afterwards.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: Arc<HashMap<String, Arc<dyn Handler>>>,
}

impl std::fmt::Debug for HandlerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HandlerRegistry")
            .field("workflow_types", &self.workflow_types())
            .finish()
    }
}

impl HandlerRegistry {
    /// Start building a registry
    pub fn builder() -> HandlerRegistryBuilder {
        HandlerRegistryBuilder::default()
    }

    /// Handler for a workflow type
    pub fn get(&self, workflow_type: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(workflow_type).cloned()
    }

    /// Whether a handler is registered for the workflow type
    pub fn contains(&self, workflow_type: &str) -> bool {
        self.handlers.contains_key(workflow_type)
    }

    /// Registered workflow types, sorted
    pub fn workflow_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Registered handlers, sorted by workflow type
    pub fn handlers(&self) -> Vec<Arc<dyn Handler>> {
        let mut handlers: Vec<Arc<dyn Handler>> = self.handlers.values().cloned().collect();
        handlers.sort_by(|a, b| a.workflow_type().cmp(b.workflow_type()));
        handlers
    }

    /// Number of registered handlers
    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    /// Whether no handlers are registered
    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }
}

/// Builder for [`HandlerRegistry`]
#[derive(Default)]
pub struct HandlerRegistryBuilder {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistryBuilder {
    /// Register a handler under its own workflow type
    pub fn register<H: Handler + 'static>(self, handler: H) -> Self {
        self.register_arc(Arc::new(handler))
    }

    /// Register a shared handler; a later registration for the same type wins
    pub fn register_arc(mut self, handler: Arc<dyn Handler>) -> Self {
        let workflow_type = handler.workflow_type().to_string();
        if self.handlers.insert(workflow_type.clone(), handler).is_some() {
            tracing::warn!(workflow_type = %workflow_type, "replacing previously registered handler");
        }
        self
    }

    /// Freeze the registry
    pub fn build(self) -> HandlerRegistry {
        tracing::debug!(handlers = self.handlers.len(), "handler registry built");
        HandlerRegistry {
            handlers: Arc::new(self.handlers),
        }
    }
}
