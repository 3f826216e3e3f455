//! Bounded retry with per-attempt timeouts and cancellable backoff

use super::handler::{Handler, HandlerContext, HandlerError};
use super::record::WorkflowData;
use crate::config::OrchestratorConfig;
use async_trait::async_trait;
use serde_json::Value;
use std::time::Duration;
use tokio::time::{sleep, timeout};

/// Delay schedule between attempts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryStrategy {
    /// `base * 2^(n-1)` after the n-th failed attempt, capped at `max`
    ExponentialBackoff {
        /// Delay after the first failure
        base: Duration,
        /// Upper bound for any single delay
        max: Duration,
    },
    /// Same delay after every failure
    FixedDelay(Duration),
}

impl RetryStrategy {
    /// Delay to wait after the given 1-based failed attempt
    pub fn delay_after(&self, attempt: u32) -> Duration {
        match *self {
            RetryStrategy::ExponentialBackoff { base, max } => {
                let multiplier = 2u32
                    .checked_pow(attempt.saturating_sub(1))
                    .unwrap_or(u32::MAX);
                base.saturating_mul(multiplier).min(max)
            }
            RetryStrategy::FixedDelay(delay) => delay,
        }
    }
}

/// Limits applied by the [`RetryExecutor`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Maximum handler invocations, at least 1
    pub max_attempts: u32,
    /// Deadline for each invocation
    pub attempt_timeout: Duration,
    /// Delay schedule between invocations
    pub strategy: RetryStrategy,
}

impl RetryPolicy {
    /// Policy derived from orchestrator settings
    pub fn from_config(config: &OrchestratorConfig) -> Self {
        Self {
            max_attempts: config.max_attempts.max(1),
            attempt_timeout: config.attempt_timeout,
            strategy: RetryStrategy::ExponentialBackoff {
                base: config.backoff_base,
                max: config.backoff_max,
            },
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_config(&OrchestratorConfig::default())
    }
}

/// How a retried execution ended
#[derive(Debug, Clone, PartialEq)]
pub enum RetryOutcome {
    /// An attempt returned a value
    Succeeded {
        /// The handler's value
        value: Value,
        /// Attempts used, including the successful one
        attempts: u32,
    },
    /// A non-recoverable error, or the last allowed attempt failed
    Failed {
        /// The final error
        error: HandlerError,
        /// Attempts used
        attempts: u32,
    },
    /// Cancellation was observed; any in-flight result was discarded
    Cancelled {
        /// Attempts started before cancellation
        attempts: u32,
    },
}

/// Callbacks fired as the executor progresses
#[async_trait]
pub trait AttemptObserver: Send + Sync {
    /// An attempt is about to invoke the handler
    async fn attempt_started(&self, attempt: u32, max_attempts: u32);

    /// An attempt failed; `retry_in` is set when another attempt follows
    async fn attempt_failed(
        &self,
        _attempt: u32,
        _max_attempts: u32,
        _error: &HandlerError,
        _retry_in: Option<Duration>,
    ) {
    }
}

/// Observer that ignores every event
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopObserver;

#[async_trait]
impl AttemptObserver for NoopObserver {
    async fn attempt_started(&self, _attempt: u32, _max_attempts: u32) {}
}

/// Runs a handler until it succeeds, fails for good, or is cancelled
#[derive(Debug, Clone, Default)]
pub struct RetryExecutor {
    policy: RetryPolicy,
}

impl RetryExecutor {
    /// Executor applying the given policy
    pub fn new(policy: RetryPolicy) -> Self {
        Self { policy }
    }

    /// The policy in effect
    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Run `handler` against `data`
    ///
    /// The cancellation token in `ctx` is checked before every attempt, after
    /// the observer has been told about it, and again when each attempt
    /// returns. Backoff sleeps end early on
    /// cancellation.
    pub async fn execute(
        &self,
        handler: &dyn Handler,
        data: &WorkflowData,
        ctx: &HandlerContext,
        observer: &dyn AttemptObserver,
    ) -> RetryOutcome {
        let max_attempts = self.policy.max_attempts.max(1);
        let token = ctx.cancellation_token();
        let mut attempt = 0;

        loop {
            if token.is_cancelled() {
                return RetryOutcome::Cancelled { attempts: attempt };
            }
            attempt += 1;
            observer.attempt_started(attempt, max_attempts).await;
            // the observer may have seen a cancel persisted elsewhere
            if token.is_cancelled() {
                return RetryOutcome::Cancelled {
                    attempts: attempt - 1,
                };
            }

            let attempt_ctx = ctx.for_attempt(attempt, max_attempts);
            let result = match timeout(
                self.policy.attempt_timeout,
                handler.handle(data, &attempt_ctx),
            )
            .await
            {
                Ok(result) => result,
                Err(_) => Err(HandlerError::Timeout(self.policy.attempt_timeout)),
            };

            if token.is_cancelled() {
                tracing::debug!(attempt, "discarding attempt result after cancellation");
                return RetryOutcome::Cancelled { attempts: attempt };
            }

            let error = match result {
                Ok(value) => {
                    return RetryOutcome::Succeeded {
                        value,
                        attempts: attempt,
                    }
                }
                Err(error) => error,
            };

            if !error.is_retryable() {
                tracing::warn!(attempt, error = %error, "non-recoverable handler error");
                observer
                    .attempt_failed(attempt, max_attempts, &error, None)
                    .await;
                return RetryOutcome::Failed {
                    error,
                    attempts: attempt,
                };
            }

            if attempt >= max_attempts {
                tracing::warn!(attempt, error = %error, "retry attempts exhausted");
                observer
                    .attempt_failed(attempt, max_attempts, &error, None)
                    .await;
                return RetryOutcome::Failed {
                    error,
                    attempts: attempt,
                };
            }

            let wait_time = self.policy.strategy.delay_after(attempt);
            tracing::warn!(
                "Error occurred (attempt {}/{}): {}. Waiting {:?} before retry...",
                attempt,
                max_attempts,
                error,
                wait_time
            );
            observer
                .attempt_failed(attempt, max_attempts, &error, Some(wait_time))
                .await;

            tokio::select! {
                biased;
                _ = token.cancelled() => {
                    tracing::debug!(attempt, "backoff interrupted by cancellation");
                    return RetryOutcome::Cancelled { attempts: attempt };
                }
                _ = sleep(wait_time) => {}
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{assert_elapsed, ScriptedHandler, SleepHandler};
    use std::sync::Mutex;
    use tokio::time::Instant;

    fn policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy {
            max_attempts,
            attempt_timeout: Duration::from_secs(300),
            strategy: RetryStrategy::ExponentialBackoff {
                base: Duration::from_secs(1),
                max: Duration::from_secs(60),
            },
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        events: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl AttemptObserver for RecordingObserver {
        async fn attempt_started(&self, attempt: u32, max_attempts: u32) {
            self.events
                .lock()
                .unwrap()
                .push(format!("start {attempt}/{max_attempts}"));
        }

        async fn attempt_failed(
            &self,
            attempt: u32,
            _max_attempts: u32,
            error: &HandlerError,
            retry_in: Option<Duration>,
        ) {
            self.events
                .lock()
                .unwrap()
                .push(format!("fail {attempt} {} {:?}", error.kind(), retry_in));
        }
    }

    #[test]
    fn test_exponential_delays() {
        let strategy = RetryStrategy::ExponentialBackoff {
            base: Duration::from_secs(1),
            max: Duration::from_secs(10),
        };
        assert_eq!(strategy.delay_after(1), Duration::from_secs(1));
        assert_eq!(strategy.delay_after(2), Duration::from_secs(2));
        assert_eq!(strategy.delay_after(3), Duration::from_secs(4));
        assert_eq!(strategy.delay_after(5), Duration::from_secs(10));
        assert_eq!(strategy.delay_after(64), Duration::from_secs(10));

        let fixed = RetryStrategy::FixedDelay(Duration::from_millis(250));
        assert_eq!(fixed.delay_after(7), Duration::from_millis(250));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retries_until_success() {
        let handler = ScriptedHandler::new("scripted")
            .then_err(HandlerError::Transient("first".into()))
            .then_err(HandlerError::Dependency("second".into()))
            .then_ok(serde_json::json!({"done": true}));
        let observer = RecordingObserver::default();
        let start = Instant::now();

        let outcome = RetryExecutor::new(policy(3))
            .execute(&handler, &WorkflowData::new(), &HandlerContext::detached(), &observer)
            .await;

        assert_eq!(
            outcome,
            RetryOutcome::Succeeded {
                value: serde_json::json!({"done": true}),
                attempts: 3
            }
        );
        assert_elapsed(start, Duration::from_secs(3));
        assert_eq!(
            *observer.events.lock().unwrap(),
            vec![
                "start 1/3",
                "fail 1 transient Some(1s)",
                "start 2/3",
                "fail 2 dependency Some(2s)",
                "start 3/3",
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn test_non_recoverable_stops_immediately() {
        let handler = ScriptedHandler::new("scripted")
            .then_err(HandlerError::InvalidInput("bad".into()))
            .then_ok(serde_json::json!(1));

        let outcome = RetryExecutor::new(policy(3))
            .execute(&handler, &WorkflowData::new(), &HandlerContext::detached(), &NoopObserver)
            .await;

        assert!(matches!(
            outcome,
            RetryOutcome::Failed {
                error: HandlerError::InvalidInput(_),
                attempts: 1
            }
        ));
        assert_eq!(handler.invocations(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_retryable() {
        let handler = SleepHandler::new("slow", Duration::from_secs(10));
        let mut policy = policy(2);
        policy.attempt_timeout = Duration::from_secs(5);
        let start = Instant::now();

        let outcome = RetryExecutor::new(policy)
            .execute(&handler, &WorkflowData::new(), &HandlerContext::detached(), &NoopObserver)
            .await;

        assert_eq!(
            outcome,
            RetryOutcome::Failed {
                error: HandlerError::Timeout(Duration::from_secs(5)),
                attempts: 2
            }
        );
        assert_eq!(handler.invocations(), 2);
        // two 5s timeouts plus one 1s backoff
        assert_elapsed(start, Duration::from_secs(11));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_before_first_attempt() {
        let handler = ScriptedHandler::new("scripted").then_ok(serde_json::json!(1));
        let ctx = HandlerContext::detached();
        ctx.cancellation_token().cancel();

        let outcome = RetryExecutor::new(policy(3))
            .execute(&handler, &WorkflowData::new(), &ctx, &NoopObserver)
            .await;

        assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 0 });
        assert_eq!(handler.invocations(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_interrupts_backoff() {
        let handler = ScriptedHandler::new("scripted").then_err(HandlerError::Transient("x".into()));
        let mut policy = policy(3);
        policy.strategy = RetryStrategy::FixedDelay(Duration::from_secs(30));
        let ctx = HandlerContext::detached();
        let token = ctx.cancellation_token().clone();
        let start = Instant::now();

        tokio::spawn(async move {
            sleep(Duration::from_secs(2)).await;
            token.cancel();
        });

        let outcome = RetryExecutor::new(policy)
            .execute(&handler, &WorkflowData::new(), &ctx, &NoopObserver)
            .await;

        assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 1 });
        assert_eq!(handler.invocations(), 1);
        assert_elapsed(start, Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn test_result_discarded_after_cancel() {
        let handler = SleepHandler::new("slow", Duration::from_secs(10));
        let ctx = HandlerContext::detached();
        let token = ctx.cancellation_token().clone();

        tokio::spawn(async move {
            sleep(Duration::from_secs(1)).await;
            token.cancel();
        });

        let outcome = RetryExecutor::new(policy(3))
            .execute(&handler, &WorkflowData::new(), &ctx, &NoopObserver)
            .await;

        assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 1 });
        assert_eq!(handler.invocations(), 1);
    }

    /// Cancels the run when the given attempt is announced
    struct CancelOnAttempt {
        attempt: u32,
        token: tokio_util::sync::CancellationToken,
    }

    #[async_trait]
    impl AttemptObserver for CancelOnAttempt {
        async fn attempt_started(&self, attempt: u32, _max_attempts: u32) {
            if attempt == self.attempt {
                self.token.cancel();
            }
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_cancel_seen_by_observer_skips_handler() {
        let handler = ScriptedHandler::new("scripted").then_err(HandlerError::Transient("x".into()));
        let ctx = HandlerContext::detached();
        let observer = CancelOnAttempt {
            attempt: 2,
            token: ctx.cancellation_token().clone(),
        };

        let outcome = RetryExecutor::new(policy(3))
            .execute(&handler, &WorkflowData::new(), &ctx, &observer)
            .await;

        assert_eq!(outcome, RetryOutcome::Cancelled { attempts: 1 });
        assert_eq!(handler.invocations(), 1);
    }
}
