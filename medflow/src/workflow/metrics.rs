//! Orchestrator execution metrics
//!
//! Counters are updated lock-free from concurrent workflows; per workflow
//! type summaries track terminal outcomes and run time. Callers key the
//! summaries by registered type only and fold anything else into
//! [`UNREGISTERED_TYPE`] so arbitrary input cannot grow the map.

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

/// Summary key shared by every workflow type without a registered handler
pub const UNREGISTERED_TYPE: &str = "<unregistered>";

/// Live counters owned by an orchestrator
#[derive(Debug, Default)]
pub struct OrchestratorMetrics {
    started: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    cancelled: AtomicU64,
    validation_failures: AtomicU64,
    unsupported: AtomicU64,
    attempts: AtomicU64,
    retries: AtomicU64,
    timeouts: AtomicU64,
    by_type: DashMap<String, WorkflowTypeMetrics>,
}

/// Terminal outcomes for one workflow type
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct WorkflowTypeMetrics {
    /// Instances that completed
    pub completed: u64,
    /// Instances that failed for any reason
    pub failed: u64,
    /// Instances that were cancelled
    pub cancelled: u64,
    /// Wall time of all finished instances
    pub total_duration: Duration,
}

impl WorkflowTypeMetrics {
    /// Instances that reached a terminal status
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled
    }

    /// Mean wall time per finished instance
    pub fn average_duration(&self) -> Option<Duration> {
        let finished = self.finished();
        if finished == 0 {
            return None;
        }
        let nanos = self.total_duration.as_nanos() / u128::from(finished);
        Some(Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX)))
    }
}

/// Terminal outcome reported to [`OrchestratorMetrics::record_finished`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Handler returned a value
    Completed,
    /// Handler failed after its attempts
    ExecutionFailed,
    /// Payload was missing required fields
    ValidationFailed,
    /// No handler was registered
    Unsupported,
    /// Cancelled by a caller
    Cancelled,
}

impl OrchestratorMetrics {
    /// Create zeroed counters
    pub fn new() -> Self {
        Self::default()
    }

    /// A workflow instance was accepted
    pub fn record_started(&self) {
        self.started.fetch_add(1, Ordering::Relaxed);
    }

    /// A handler attempt began; attempts past the first count as retries
    pub fn record_attempt(&self, attempt: u32) {
        self.attempts.fetch_add(1, Ordering::Relaxed);
        if attempt > 1 {
            self.retries.fetch_add(1, Ordering::Relaxed);
        }
    }

    /// An attempt hit its deadline
    pub fn record_timeout(&self) {
        self.timeouts.fetch_add(1, Ordering::Relaxed);
    }

    /// A workflow instance reached a terminal status
    pub fn record_finished(&self, workflow_type: &str, outcome: Outcome, elapsed: Duration) {
        let counter = match outcome {
            Outcome::Completed => &self.completed,
            Outcome::ExecutionFailed => &self.failed,
            Outcome::ValidationFailed => &self.validation_failures,
            Outcome::Unsupported => &self.unsupported,
            Outcome::Cancelled => &self.cancelled,
        };
        counter.fetch_add(1, Ordering::Relaxed);

        let mut entry = self.by_type.entry(workflow_type.to_string()).or_default();
        match outcome {
            Outcome::Completed => entry.completed += 1,
            Outcome::Cancelled => entry.cancelled += 1,
            Outcome::ExecutionFailed | Outcome::ValidationFailed | Outcome::Unsupported => {
                entry.failed += 1
            }
        }
        entry.total_duration += elapsed;
    }

    /// Point-in-time copy of every counter
    pub fn snapshot(&self) -> MetricsSnapshot {
        let by_workflow_type = self
            .by_type
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().clone()))
            .collect();

        MetricsSnapshot {
            started: self.started.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
            validation_failures: self.validation_failures.load(Ordering::Relaxed),
            unsupported: self.unsupported.load(Ordering::Relaxed),
            attempts: self.attempts.load(Ordering::Relaxed),
            retries: self.retries.load(Ordering::Relaxed),
            timeouts: self.timeouts.load(Ordering::Relaxed),
            by_workflow_type,
        }
    }
}

/// Serializable copy of [`OrchestratorMetrics`]
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MetricsSnapshot {
    /// Workflow instances accepted
    pub started: u64,
    /// Instances that completed
    pub completed: u64,
    /// Instances that failed during execution
    pub failed: u64,
    /// Instances cancelled before finishing
    pub cancelled: u64,
    /// Instances rejected by the validator
    pub validation_failures: u64,
    /// Instances with no registered handler
    pub unsupported: u64,
    /// Handler attempts started
    pub attempts: u64,
    /// Attempts beyond the first
    pub retries: u64,
    /// Attempts that timed out
    pub timeouts: u64,
    /// Outcomes per workflow type
    pub by_workflow_type: BTreeMap<String, WorkflowTypeMetrics>,
}

impl MetricsSnapshot {
    /// Instances that reached any terminal status
    pub fn finished(&self) -> u64 {
        self.completed + self.failed + self.cancelled + self.validation_failures + self.unsupported
    }

    /// Fraction of finished instances that completed, 0.0 when none finished
    pub fn success_rate(&self) -> f64 {
        match self.finished() {
            0 => 0.0,
            finished => self.completed as f64 / finished as f64,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_counters_and_success_rate() {
        let metrics = OrchestratorMetrics::new();
        for _ in 0..4 {
            metrics.record_started();
        }
        metrics.record_attempt(1);
        metrics.record_attempt(2);
        metrics.record_attempt(3);
        metrics.record_timeout();

        metrics.record_finished("record_creation", Outcome::Completed, Duration::from_secs(2));
        metrics.record_finished("record_creation", Outcome::Completed, Duration::from_secs(4));
        metrics.record_finished("record_creation", Outcome::ExecutionFailed, Duration::from_secs(6));
        metrics.record_finished(UNREGISTERED_TYPE, Outcome::Unsupported, Duration::ZERO);

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.started, 4);
        assert_eq!(snapshot.attempts, 3);
        assert_eq!(snapshot.retries, 2);
        assert_eq!(snapshot.timeouts, 1);
        assert_eq!(snapshot.completed, 2);
        assert_eq!(snapshot.failed, 1);
        assert_eq!(snapshot.unsupported, 1);
        assert_eq!(snapshot.finished(), 4);
        assert!((snapshot.success_rate() - 0.5).abs() < f64::EPSILON);

        let records = &snapshot.by_workflow_type["record_creation"];
        assert_eq!(records.completed, 2);
        assert_eq!(records.failed, 1);
        assert_eq!(records.average_duration(), Some(Duration::from_secs(4)));
        assert_eq!(snapshot.by_workflow_type[UNREGISTERED_TYPE].failed, 1);
    }

    #[test]
    fn test_empty_snapshot() {
        let snapshot = OrchestratorMetrics::new().snapshot();
        assert_eq!(snapshot, MetricsSnapshot::default());
        assert_eq!(snapshot.success_rate(), 0.0);
        assert_eq!(WorkflowTypeMetrics::default().average_duration(), None);
    }
}
