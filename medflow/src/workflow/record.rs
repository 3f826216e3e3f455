//! Workflow status records
//!
//! A `WorkflowRecord` is the snapshot the orchestrator writes to the state
//! store on every transition. Its status follows a small forward-only state
//! machine; terminal records are never modified again.

use crate::common::ulid_generator::generate_monotonic_ulid;
use crate::{MedflowError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::fmt;
use ulid::Ulid;

/// Input payload handed to a workflow handler
pub type WorkflowData = HashMap<String, Value>;

/// Caller-supplied metadata (acting user, request id, ...), stored verbatim
pub type ContextMap = HashMap<String, Value>;

/// Unique identifier for a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WorkflowId(Ulid);

impl WorkflowId {
    /// Create a new workflow id, ordered after every id created before it
    pub fn new() -> Self {
        Self(generate_monotonic_ulid())
    }

    /// Parse a WorkflowId from its string representation
    pub fn parse(s: &str) -> std::result::Result<Self, String> {
        Ulid::from_string(s.trim())
            .map(Self)
            .map_err(|e| format!("Invalid workflow id '{}': {}", s, e))
    }
}

impl Default for WorkflowId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for WorkflowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Status of a workflow instance
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    /// Record created, nothing executed yet
    Started,
    /// A handler attempt is in progress or scheduled
    Running,
    /// The handler returned a value
    Completed,
    /// Validation, lookup or execution failed
    Failed,
    /// Cancelled before reaching another terminal status
    Cancelled,
}

impl WorkflowStatus {
    /// Whether no further transition is permitted
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled
        )
    }

    /// Whether the state machine allows moving from `self` to `next`
    ///
    /// `running -> running` is allowed so each retry attempt can re-enter it.
    pub fn can_transition_to(self, next: WorkflowStatus) -> bool {
        match self {
            WorkflowStatus::Started => next != WorkflowStatus::Started,
            WorkflowStatus::Running => next != WorkflowStatus::Started,
            WorkflowStatus::Completed | WorkflowStatus::Failed | WorkflowStatus::Cancelled => {
                false
            }
        }
    }

    /// Lowercase name, matching the serialized form
    pub fn as_str(self) -> &'static str {
        match self {
            WorkflowStatus::Started => "started",
            WorkflowStatus::Running => "running",
            WorkflowStatus::Completed => "completed",
            WorkflowStatus::Failed => "failed",
            WorkflowStatus::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for WorkflowStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure taxonomy surfaced on results and terminal records
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorType {
    /// Required input fields were missing; never retried
    ValidationFailed,
    /// No handler registered for the workflow type; never retried
    UnsupportedWorkflow,
    /// Attempts exhausted or a non-recoverable handler error
    ExecutionFailed,
    /// Cancelled before a terminal outcome
    Cancelled,
}

impl ErrorType {
    /// Snake case name, matching the serialized form
    pub fn as_str(self) -> &'static str {
        match self {
            ErrorType::ValidationFailed => "validation_failed",
            ErrorType::UnsupportedWorkflow => "unsupported_workflow",
            ErrorType::ExecutionFailed => "execution_failed",
            ErrorType::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for ErrorType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Snapshot of one workflow instance
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowRecord {
    /// Unique identifier for this instance
    pub id: WorkflowId,
    /// Which handler this instance runs
    pub workflow_type: String,
    /// Current status
    pub status: WorkflowStatus,
    /// Number of handler attempts started so far
    pub attempt_count: u32,
    /// When the instance was created
    pub started_at: DateTime<Utc>,
    /// When the record last changed
    pub last_update_at: DateTime<Utc>,
    /// When the record became terminal
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,
    /// When the instance was cancelled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cancelled_at: Option<DateTime<Utc>>,
    /// Caller metadata, never modified by the orchestrator
    #[serde(default)]
    pub context: ContextMap,
    /// Handler value when completed, error summary when failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure category for failed or cancelled records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    /// Short human readable status note
    pub message: String,
}

impl WorkflowRecord {
    /// Create a record in `started` status with a fresh id
    pub fn new(workflow_type: impl Into<String>, context: ContextMap) -> Self {
        let now = Utc::now();
        Self {
            id: WorkflowId::new(),
            workflow_type: workflow_type.into(),
            status: WorkflowStatus::Started,
            attempt_count: 0,
            started_at: now,
            last_update_at: now,
            completed_at: None,
            cancelled_at: None,
            context,
            result: None,
            error_type: None,
            message: "started".to_string(),
        }
    }

    /// Whether the record can no longer change
    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    fn transition(&mut self, next: WorkflowStatus) -> Result<()> {
        if !self.status.can_transition_to(next) {
            return Err(MedflowError::InvalidTransition {
                workflow_id: self.id.to_string(),
                from: self.status,
                to: next,
            });
        }
        let now = Utc::now();
        self.status = next;
        self.last_update_at = now;
        if next.is_terminal() {
            self.completed_at = Some(now);
        }
        Ok(())
    }

    /// Enter `running` for the next attempt
    pub fn begin_attempt(&mut self, max_attempts: u32) -> Result<()> {
        self.transition(WorkflowStatus::Running)?;
        self.attempt_count += 1;
        self.message = format!("attempt {}/{}", self.attempt_count, max_attempts);
        Ok(())
    }

    /// Replace the status note without changing status
    pub fn note(&mut self, message: impl Into<String>) -> Result<()> {
        if self.is_terminal() {
            return Err(MedflowError::InvalidTransition {
                workflow_id: self.id.to_string(),
                from: self.status,
                to: self.status,
            });
        }
        self.message = message.into();
        self.last_update_at = Utc::now();
        Ok(())
    }

    /// Mark the record completed with the handler's value
    pub fn complete(&mut self, result: Value) -> Result<()> {
        self.transition(WorkflowStatus::Completed)?;
        self.result = Some(result);
        self.message = "completed".to_string();
        Ok(())
    }

    /// Mark the record failed with an error summary
    pub fn fail(
        &mut self,
        error_type: ErrorType,
        summary: Value,
        message: impl Into<String>,
    ) -> Result<()> {
        self.transition(WorkflowStatus::Failed)?;
        self.error_type = Some(error_type);
        self.result = Some(summary);
        self.message = message.into();
        Ok(())
    }

    /// Mark the record cancelled
    pub fn cancel(&mut self) -> Result<()> {
        self.transition(WorkflowStatus::Cancelled)?;
        self.cancelled_at = self.completed_at;
        self.error_type = Some(ErrorType::Cancelled);
        self.message = "cancelled".to_string();
        Ok(())
    }
}
