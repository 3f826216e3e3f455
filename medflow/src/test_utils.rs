//! Test utilities for medflow tests
//!
//! Scripted handlers with shared invocation counters, plus a pinned
//! configuration for timing tests. Clones of a handler share their counters, so
//! a test can register one clone and inspect the other.

use crate::config::OrchestratorConfig;
use crate::workflow::{Handler, HandlerContext, HandlerError, HandlerResult, WorkflowData};
use async_trait::async_trait;
use serde_json::{json, Value};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

/// Configuration with the default retry shape, pinned so environment
/// overrides cannot leak into timing assertions
pub fn test_config() -> OrchestratorConfig {
    OrchestratorConfig {
        max_attempts: 3,
        attempt_timeout: Duration::from_secs(300),
        backoff_base: Duration::from_secs(1),
        backoff_max: Duration::from_secs(60),
        status_ttl: Duration::from_secs(3600),
        ..OrchestratorConfig::default()
    }
}

/// Assert that `expected` has elapsed on the tokio clock since `start`
///
/// Allows some slack for timer-wheel rounding.
pub fn assert_elapsed(start: Instant, expected: Duration) {
    let elapsed = start.elapsed();
    let slack = Duration::from_millis(50);
    assert!(
        elapsed >= expected && elapsed <= expected + slack,
        "expected {:?} to have elapsed, got {:?}",
        expected,
        elapsed
    );
}

/// Build a `WorkflowData` from key/value pairs
pub fn workflow_data(pairs: &[(&str, Value)]) -> WorkflowData {
    pairs
        .iter()
        .map(|(key, value)| (key.to_string(), value.clone()))
        .collect()
}

/// Handler that replays a fixed sequence of outcomes
///
/// The last outcome repeats once the script is exhausted.
#[derive(Clone)]
pub struct ScriptedHandler {
    workflow_type: String,
    script: Arc<Mutex<VecDeque<HandlerResult<Value>>>>,
    last: Arc<Mutex<Option<HandlerResult<Value>>>>,
    invocations: Arc<AtomicU32>,
}

impl ScriptedHandler {
    /// Handler with an empty script; it returns `null` until scripted
    pub fn new(workflow_type: &str) -> Self {
        Self {
            workflow_type: workflow_type.to_string(),
            script: Arc::new(Mutex::new(VecDeque::new())),
            last: Arc::new(Mutex::new(None)),
            invocations: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Append a successful outcome
    pub fn then_ok(self, value: Value) -> Self {
        self.push(Ok(value))
    }

    /// Append a failing outcome
    pub fn then_err(self, error: HandlerError) -> Self {
        self.push(Err(error))
    }

    fn push(self, outcome: HandlerResult<Value>) -> Self {
        self.script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .push_back(outcome);
        self
    }

    /// Number of times `handle` was called
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for ScriptedHandler {
    fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    fn description(&self) -> &str {
        "replays scripted outcomes"
    }

    async fn handle(&self, _data: &WorkflowData, _ctx: &HandlerContext) -> HandlerResult<Value> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        let next = self
            .script
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .pop_front();
        let mut last = self.last.lock().unwrap_or_else(|p| p.into_inner());
        match next {
            Some(outcome) => {
                *last = Some(outcome.clone());
                outcome
            }
            None => last.clone().unwrap_or(Ok(Value::Null)),
        }
    }
}

/// Handler that sleeps without watching the cancellation token
#[derive(Clone)]
pub struct SleepHandler {
    workflow_type: String,
    duration: Duration,
    invocations: Arc<AtomicU32>,
}

impl SleepHandler {
    /// Handler sleeping for `duration` on every attempt
    pub fn new(workflow_type: &str, duration: Duration) -> Self {
        Self {
            workflow_type: workflow_type.to_string(),
            duration,
            invocations: Arc::new(AtomicU32::new(0)),
        }
    }

    /// Number of times `handle` was called
    pub fn invocations(&self) -> u32 {
        self.invocations.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for SleepHandler {
    fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    fn description(&self) -> &str {
        "sleeps then succeeds"
    }

    async fn handle(&self, _data: &WorkflowData, ctx: &HandlerContext) -> HandlerResult<Value> {
        self.invocations.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.duration).await;
        Ok(json!({
            "slept_ms": self.duration.as_millis() as u64,
            "attempt": ctx.attempt(),
        }))
    }
}

/// Handler that waits for cancellation and reports it
#[derive(Clone)]
pub struct CooperativeHandler {
    workflow_type: String,
    observed_cancel: Arc<AtomicBool>,
}

impl CooperativeHandler {
    /// Handler that blocks until its workflow is cancelled
    pub fn new(workflow_type: &str) -> Self {
        Self {
            workflow_type: workflow_type.to_string(),
            observed_cancel: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Whether the handler saw its token fire
    pub fn observed_cancel(&self) -> bool {
        self.observed_cancel.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Handler for CooperativeHandler {
    fn workflow_type(&self) -> &str {
        &self.workflow_type
    }

    fn description(&self) -> &str {
        "waits for cancellation"
    }

    async fn handle(&self, _data: &WorkflowData, ctx: &HandlerContext) -> HandlerResult<Value> {
        ctx.cancelled().await;
        self.observed_cancel.store(true, Ordering::SeqCst);
        Err(HandlerError::Cancelled)
    }
}
