//! Workflow orchestration
//!
//! [`Orchestrator::orchestrate`] drives one workflow instance end to end:
//! it creates the status record, validates input, looks up the handler,
//! runs it through the [`RetryExecutor`] and writes the terminal status.
//! Every write goes through a per-instance lock shared with
//! [`Orchestrator::cancel`], so whichever of the two reaches a terminal
//! status first wins and the record never changes afterwards.

use super::handler::{HandlerContext, HandlerError, HandlerRegistry};
use super::metrics::{MetricsSnapshot, OrchestratorMetrics, Outcome, UNREGISTERED_TYPE};
use super::record::{
    ContextMap, ErrorType, WorkflowData, WorkflowId, WorkflowRecord, WorkflowStatus,
};
use super::retry::{AttemptObserver, RetryExecutor, RetryOutcome, RetryPolicy};
use super::store::{MemoryStateStore, StateStore, StatusStore};
use super::validator::{RequiredFieldsValidator, Validator};
use crate::config::OrchestratorConfig;
use crate::Result;
use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// What a caller gets back from [`Orchestrator::orchestrate`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrchestrationResult {
    /// Whether the handler completed
    pub success: bool,
    /// Id of the workflow instance
    pub workflow_id: WorkflowId,
    /// Handler value on success
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
    /// Failure category when unsuccessful
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_type: Option<ErrorType>,
    /// Structured failure details when unsuccessful
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_data: Option<Value>,
}

impl OrchestrationResult {
    fn completed(workflow_id: WorkflowId, value: Value) -> Self {
        Self {
            success: true,
            workflow_id,
            result: Some(value),
            error_type: None,
            error_data: None,
        }
    }

    fn failed(workflow_id: WorkflowId, error_type: ErrorType, error_data: Value) -> Self {
        Self {
            success: false,
            workflow_id,
            result: None,
            error_type: Some(error_type),
            error_data: Some(error_data),
        }
    }

    fn cancelled(workflow_id: WorkflowId) -> Self {
        Self {
            success: false,
            workflow_id,
            result: None,
            error_type: Some(ErrorType::Cancelled),
            error_data: None,
        }
    }
}

/// Result of [`Orchestrator::cancel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CancelOutcome {
    /// The record moved to `cancelled`
    Cancelled,
    /// The record was already terminal and was left untouched
    AlreadyTerminal(WorkflowStatus),
    /// No live record has this id
    NotFound,
}

impl CancelOutcome {
    /// Whether this call cancelled the workflow
    pub fn ok(self) -> bool {
        matches!(self, CancelOutcome::Cancelled)
    }

    /// Whether a record with the id exists
    pub fn found(self) -> bool {
        !matches!(self, CancelOutcome::NotFound)
    }
}

/// Failures settled through [`Orchestrator::finish_failed`]
#[derive(Debug, Clone, Copy)]
enum Failure {
    Validation,
    Unsupported,
    Execution,
}

impl Failure {
    fn error_type(self) -> ErrorType {
        match self {
            Failure::Validation => ErrorType::ValidationFailed,
            Failure::Unsupported => ErrorType::UnsupportedWorkflow,
            Failure::Execution => ErrorType::ExecutionFailed,
        }
    }

    fn outcome(self) -> Outcome {
        match self {
            Failure::Validation => Outcome::ValidationFailed,
            Failure::Unsupported => Outcome::Unsupported,
            Failure::Execution => Outcome::ExecutionFailed,
        }
    }
}

/// A workflow instance currently being driven by this orchestrator
struct ActiveWorkflow {
    id: WorkflowId,
    metrics_key: String,
    token: CancellationToken,
    record: Mutex<WorkflowRecord>,
    status_store: StatusStore,
    metrics: Arc<OrchestratorMetrics>,
    started: Instant,
}

impl ActiveWorkflow {
    fn new(
        record: WorkflowRecord,
        metrics_key: String,
        status_store: StatusStore,
        metrics: Arc<OrchestratorMetrics>,
    ) -> Self {
        Self {
            id: record.id,
            metrics_key,
            token: CancellationToken::new(),
            record: Mutex::new(record),
            status_store,
            metrics,
            started: Instant::now(),
        }
    }

    fn persist(&self, record: &WorkflowRecord) {
        if let Err(e) = self.status_store.save(record) {
            tracing::warn!(
                workflow_id = %record.id,
                status = %record.status,
                error = %e,
                "failed to persist workflow status"
            );
        }
    }

    async fn persist_current(&self) {
        let record = self.record.lock().await;
        self.persist(&record);
    }

    /// Pick up a terminal status written by another orchestrator sharing the store
    fn adopt_stored_terminal(&self, record: &mut WorkflowRecord) {
        match self.status_store.load(&self.id) {
            Ok(Some(stored)) if stored.is_terminal() => {
                tracing::info!(
                    workflow_id = %self.id,
                    status = %stored.status,
                    "workflow finished elsewhere"
                );
                *record = stored;
                self.token.cancel();
            }
            Ok(_) => {}
            Err(e) => {
                tracing::warn!(workflow_id = %self.id, error = %e, "failed to read workflow status")
            }
        }
    }

    /// Apply `change` and persist it; `false` if the record was already terminal
    async fn update<F>(&self, change: F) -> bool
    where
        F: FnOnce(&mut WorkflowRecord) -> Result<()>,
    {
        let mut record = self.record.lock().await;
        if !record.is_terminal() {
            self.adopt_stored_terminal(&mut record);
        }
        if record.is_terminal() {
            return false;
        }
        if let Err(e) = change(&mut *record) {
            tracing::warn!(workflow_id = %self.id, error = %e, "rejected status change");
            return false;
        }
        self.persist(&record);
        true
    }

    async fn cancel(&self) -> Result<CancelOutcome> {
        let mut record = self.record.lock().await;
        if !record.is_terminal() {
            self.adopt_stored_terminal(&mut record);
        }
        if record.is_terminal() {
            return Ok(CancelOutcome::AlreadyTerminal(record.status));
        }
        record.cancel()?;
        self.persist(&record);
        self.token.cancel();
        Ok(CancelOutcome::Cancelled)
    }

    fn finish(&self, outcome: Outcome) {
        self.metrics
            .record_finished(&self.metrics_key, outcome, self.started.elapsed());
    }

    /// Settle a workflow whose `orchestrate` future was dropped mid-flight
    fn abandon(&self) {
        self.token.cancel();
        match self.record.try_lock() {
            Ok(mut record) => {
                if !record.is_terminal() {
                    self.adopt_stored_terminal(&mut record);
                }
                if !record.is_terminal() {
                    if let Err(e) = record.cancel() {
                        tracing::warn!(workflow_id = %self.id, error = %e, "rejected status change");
                        return;
                    }
                    record.message = "abandoned before completion".to_string();
                    self.persist(&record);
                }
            }
            // a concurrent cancel holds the record and settles it
            Err(_) => {
                tracing::debug!(workflow_id = %self.id, "record busy while abandoning workflow")
            }
        }
        tracing::warn!(workflow_id = %self.id, "workflow abandoned before completion");
        self.finish(Outcome::Cancelled);
    }
}

/// Keeps a workflow in the active set for as long as its `orchestrate` call runs
///
/// Dropping the guard unsettled, which happens when the caller drops the
/// `orchestrate` future, cancels the workflow so the stored record does not
/// stay live until its TTL runs out.
struct ActiveEntry<'a> {
    active: &'a DashMap<WorkflowId, Arc<ActiveWorkflow>>,
    workflow: Arc<ActiveWorkflow>,
    settled: bool,
}

impl<'a> ActiveEntry<'a> {
    fn register(
        active: &'a DashMap<WorkflowId, Arc<ActiveWorkflow>>,
        workflow: Arc<ActiveWorkflow>,
    ) -> Self {
        active.insert(workflow.id, Arc::clone(&workflow));
        Self {
            active,
            workflow,
            settled: false,
        }
    }

    fn settle(mut self) {
        self.settled = true;
    }
}

impl Drop for ActiveEntry<'_> {
    fn drop(&mut self) {
        self.active.remove(&self.workflow.id);
        if !self.settled {
            self.workflow.abandon();
        }
    }
}

#[async_trait]
impl AttemptObserver for ActiveWorkflow {
    async fn attempt_started(&self, attempt: u32, max_attempts: u32) {
        tracing::debug!(attempt, max_attempts, "starting attempt");
        if self.update(|record| record.begin_attempt(max_attempts)).await {
            self.metrics.record_attempt(attempt);
        }
    }

    async fn attempt_failed(
        &self,
        attempt: u32,
        max_attempts: u32,
        error: &HandlerError,
        retry_in: Option<Duration>,
    ) {
        if matches!(error, HandlerError::Timeout(_)) {
            self.metrics.record_timeout();
        }
        if let Some(delay) = retry_in {
            let note = format!(
                "attempt {}/{} failed: {}; retrying in {:?}",
                attempt, max_attempts, error, delay
            );
            self.update(|record| record.note(note)).await;
        }
    }
}

/// Entry point for running workflows
pub struct Orchestrator {
    registry: HandlerRegistry,
    validator: Arc<dyn Validator>,
    status_store: StatusStore,
    executor: RetryExecutor,
    active: DashMap<WorkflowId, Arc<ActiveWorkflow>>,
    metrics: Arc<OrchestratorMetrics>,
}

impl std::fmt::Debug for Orchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Orchestrator")
            .field("registry", &self.registry)
            .field("policy", self.executor.policy())
            .field("active", &self.active.len())
            .finish()
    }
}

impl Orchestrator {
    /// Orchestrator with the configured validator rules and the given store
    pub fn new(
        config: OrchestratorConfig,
        registry: HandlerRegistry,
        state_store: Arc<dyn StateStore>,
    ) -> Self {
        Self::builder(registry)
            .config(config)
            .state_store(state_store)
            .build()
    }

    /// Start building an orchestrator around a handler registry
    pub fn builder(registry: HandlerRegistry) -> OrchestratorBuilder {
        OrchestratorBuilder {
            config: OrchestratorConfig::default(),
            registry,
            validator: None,
            state_store: None,
        }
    }

    /// Run a workflow to a terminal status
    ///
    /// Never returns an error: every failure is reported through the
    /// returned [`OrchestrationResult`] and the stored record.
    pub async fn orchestrate(
        &self,
        workflow_type: &str,
        data: WorkflowData,
        context: ContextMap,
    ) -> OrchestrationResult {
        let shared_context = Arc::new(context.clone());
        let record = WorkflowRecord::new(workflow_type, context);
        let workflow_id = record.id;
        let metrics_key = if self.registry.get(workflow_type).is_some() {
            workflow_type.to_string()
        } else {
            UNREGISTERED_TYPE.to_string()
        };
        let active = Arc::new(ActiveWorkflow::new(
            record,
            metrics_key,
            self.status_store.clone(),
            Arc::clone(&self.metrics),
        ));

        // Registered before the first write so a cancel can never miss a stored live record.
        let entry = ActiveEntry::register(&self.active, Arc::clone(&active));
        active.persist_current().await;
        self.metrics.record_started();

        let span = tracing::info_span!(
            "workflow",
            workflow_id = %workflow_id,
            workflow_type = %workflow_type
        );
        let result = self
            .drive(&active, workflow_type, &data, shared_context)
            .instrument(span)
            .await;

        entry.settle();
        result
    }

    async fn drive(
        &self,
        active: &ActiveWorkflow,
        workflow_type: &str,
        data: &WorkflowData,
        context: Arc<ContextMap>,
    ) -> OrchestrationResult {
        let workflow_id = active.id;
        tracing::info!("workflow started");

        let missing = if workflow_type.trim().is_empty() {
            vec!["workflow_type".to_string()]
        } else {
            self.validator.validate(workflow_type, data).missing_fields
        };
        if !missing.is_empty() {
            let error_data = json!({ "missing_fields": missing });
            let message = format!("validation failed: missing {}", missing.join(", "));
            tracing::info!(missing = ?missing, "workflow rejected by validator");
            return self
                .finish_failed(active, Failure::Validation, error_data, message)
                .await;
        }

        let Some(handler) = self.registry.get(workflow_type) else {
            let error_data = json!({
                "workflow_type": workflow_type,
                "supported": self.registry.workflow_types(),
            });
            let message = format!("no handler registered for '{}'", workflow_type);
            tracing::info!("unsupported workflow type");
            return self
                .finish_failed(active, Failure::Unsupported, error_data, message)
                .await;
        };

        let ctx = HandlerContext::new(workflow_id, context, active.token.clone());
        match self
            .executor
            .execute(handler.as_ref(), data, &ctx, active)
            .await
        {
            RetryOutcome::Succeeded { value, attempts } => {
                let stored = value.clone();
                if !active.update(|record| record.complete(stored)).await {
                    return Self::finish_cancelled(active);
                }
                tracing::info!(attempts, "workflow completed");
                active.finish(Outcome::Completed);
                OrchestrationResult::completed(workflow_id, value)
            }
            RetryOutcome::Failed { error, attempts } => {
                let error_data = json!({ "error": error.summary(), "attempts": attempts });
                let message = format!("failed after {} attempt(s): {}", attempts, error);
                tracing::warn!(attempts, error = %error, "workflow failed");
                self.finish_failed(active, Failure::Execution, error_data, message)
                    .await
            }
            RetryOutcome::Cancelled { attempts } => {
                tracing::info!(attempts, "workflow cancelled");
                Self::finish_cancelled(active)
            }
        }
    }

    async fn finish_failed(
        &self,
        active: &ActiveWorkflow,
        failure: Failure,
        error_data: Value,
        message: String,
    ) -> OrchestrationResult {
        let summary = error_data.clone();
        if !active
            .update(|record| record.fail(failure.error_type(), summary, message))
            .await
        {
            return Self::finish_cancelled(active);
        }
        active.finish(failure.outcome());
        OrchestrationResult::failed(active.id, failure.error_type(), error_data)
    }

    fn finish_cancelled(active: &ActiveWorkflow) -> OrchestrationResult {
        active.finish(Outcome::Cancelled);
        OrchestrationResult::cancelled(active.id)
    }

    /// Latest stored snapshot, `None` for unknown, malformed or expired ids
    pub fn get_status(&self, workflow_id: &str) -> Result<Option<WorkflowRecord>> {
        match WorkflowId::parse(workflow_id) {
            Ok(id) => self.status_store.load(&id),
            Err(_) => Ok(None),
        }
    }

    /// Request cancellation of a workflow
    ///
    /// A workflow driven by this orchestrator has its token fired so any
    /// pending backoff ends and the in-flight result is discarded. A live
    /// record written by another orchestrator sharing the store is marked
    /// cancelled in the store; that orchestrator picks the cancellation up
    /// at its next status write.
    pub async fn cancel(&self, workflow_id: &str) -> Result<CancelOutcome> {
        let Ok(id) = WorkflowId::parse(workflow_id) else {
            return Ok(CancelOutcome::NotFound);
        };

        let active = self.active.get(&id).map(|entry| Arc::clone(entry.value()));
        let outcome = match active {
            Some(active) => active.cancel().await?,
            None => match self.status_store.load(&id)? {
                None => CancelOutcome::NotFound,
                Some(record) if record.is_terminal() => {
                    CancelOutcome::AlreadyTerminal(record.status)
                }
                Some(mut record) => {
                    record.cancel()?;
                    self.status_store.save(&record)?;
                    CancelOutcome::Cancelled
                }
            },
        };

        match outcome {
            CancelOutcome::Cancelled => {
                tracing::info!(workflow_id = %id, "workflow cancelled");
            }
            CancelOutcome::AlreadyTerminal(status) => {
                tracing::debug!(workflow_id = %id, status = %status, "cancel ignored for terminal workflow");
            }
            CancelOutcome::NotFound => {
                tracing::debug!(workflow_id = %id, "cancel requested for unknown workflow");
            }
        }
        Ok(outcome)
    }

    /// Cancel every workflow this orchestrator is driving, returning how many were cancelled
    pub async fn cancel_all(&self) -> usize {
        let mut cancelled = 0;
        for id in self.active_workflow_ids() {
            match self.cancel(&id.to_string()).await {
                Ok(outcome) if outcome.ok() => cancelled += 1,
                Ok(_) => {}
                Err(e) => tracing::warn!(workflow_id = %id, error = %e, "failed to cancel workflow"),
            }
        }
        cancelled
    }

    /// Ids of workflows this orchestrator is currently driving, oldest first
    pub fn active_workflow_ids(&self) -> Vec<WorkflowId> {
        let mut ids: Vec<WorkflowId> = self.active.iter().map(|entry| *entry.key()).collect();
        ids.sort();
        ids
    }

    /// Every live record in the state store, oldest first
    pub fn list_workflows(&self) -> Result<Vec<WorkflowRecord>> {
        self.status_store.list()
    }

    /// Point-in-time execution metrics
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Registered handlers
    pub fn registry(&self) -> &HandlerRegistry {
        &self.registry
    }

    /// Retry limits in effect
    pub fn retry_policy(&self) -> &RetryPolicy {
        self.executor.policy()
    }
}

/// Builder for [`Orchestrator`]
pub struct OrchestratorBuilder {
    config: OrchestratorConfig,
    registry: HandlerRegistry,
    validator: Option<Arc<dyn Validator>>,
    state_store: Option<Arc<dyn StateStore>>,
}

impl OrchestratorBuilder {
    /// Use the given settings (default: [`OrchestratorConfig::default`])
    pub fn config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self
    }

    /// Replace the rule-table validator built from the config
    pub fn validator(mut self, validator: Arc<dyn Validator>) -> Self {
        self.validator = Some(validator);
        self
    }

    /// Store for status records (default: a fresh [`MemoryStateStore`])
    pub fn state_store(mut self, state_store: Arc<dyn StateStore>) -> Self {
        self.state_store = Some(state_store);
        self
    }

    /// Assemble the orchestrator
    pub fn build(self) -> Orchestrator {
        let validator = self
            .validator
            .unwrap_or_else(|| Arc::new(RequiredFieldsValidator::from_config(&self.config)));
        let state_store = self
            .state_store
            .unwrap_or_else(|| Arc::new(MemoryStateStore::new()));

        Orchestrator {
            registry: self.registry,
            validator,
            status_store: StatusStore::new(state_store, self.config.status_ttl),
            executor: RetryExecutor::new(RetryPolicy::from_config(&self.config)),
            active: DashMap::new(),
            metrics: Arc::new(OrchestratorMetrics::new()),
        }
    }
}
