//! Retry-with-backoff around a single dispatcher call.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use super::{AgentDispatcher, Task};
use crate::config::duration_millis;
use crate::error::StepError;

/// Exponential backoff between attempts.
///
/// The delay after failed attempt `n` (1-based) is
/// `base_delay * multiplier^(n-1)`, capped at `max_delay`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    #[serde(rename = "base_delay_ms", with = "duration_millis")]
    pub base_delay: Duration,
    pub multiplier: f64,
    #[serde(rename = "max_delay_ms", with = "duration_millis")]
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_secs(30),
            multiplier: 2.0,
            max_delay: Duration::from_secs(10 * 60),
        }
    }
}

impl RetryPolicy {
    pub fn new(base_delay: Duration) -> Self {
        Self {
            base_delay,
            ..Self::default()
        }
    }

    pub fn with_multiplier(mut self, multiplier: f64) -> Self {
        self.multiplier = multiplier;
        self
    }

    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }

    /// Delay before the attempt following failed attempt `attempt`.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(i32::MAX as u32) as i32;
        let secs = self.base_delay.as_secs_f64() * self.multiplier.powi(exponent);
        if !secs.is_finite() || secs >= self.max_delay.as_secs_f64() {
            return self.max_delay;
        }
        Duration::from_secs_f64(secs)
    }
}

/// Dispatches `task`, retrying transient failures and timeouts.
///
/// Each attempt is bounded by `timeout`. Up to `task.max_retries` retries
/// follow the first attempt, separated by `policy` delays. A permanent
/// dispatch error ends the loop immediately.
///
/// Cancellation never interrupts an attempt in flight. It only stops a
/// pending backoff sleep, in which case the step ends as
/// [`StepError::Cancelled`].
///
/// Returns the final result and the number of attempts made.
pub async fn dispatch_with_retry(
    dispatcher: &dyn AgentDispatcher,
    task: Task,
    timeout: Duration,
    policy: &RetryPolicy,
    cancel: &CancellationToken,
) -> (Result<JsonValue, StepError>, u32) {
    let max_retries = task.max_retries;
    let step = task.task_type.clone();
    let mut attempts = 0;

    loop {
        attempts += 1;

        let result = match tokio::time::timeout(timeout, dispatcher.dispatch(task.clone())).await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => Err(StepError::Dispatch(e)),
            Err(_) => {
                warn!(step = %step, timeout = ?timeout, "Step attempt timed out");
                Err(StepError::Timeout {
                    step: step.clone(),
                    timeout,
                })
            }
        };

        match result {
            Ok(output) => {
                if attempts > 1 {
                    info!(
                        step = %step,
                        "Step succeeded on attempt {}/{}",
                        attempts,
                        max_retries + 1
                    );
                }
                return (Ok(output), attempts);
            }
            Err(e) if e.is_retryable() && attempts <= max_retries => {
                let delay = policy.delay_for(attempts);
                warn!(
                    step = %step,
                    "Step failed (attempt {}/{}): {}. Retrying in {:?}",
                    attempts,
                    max_retries + 1,
                    e,
                    delay
                );
                tokio::select! {
                    _ = cancel.cancelled() => {
                        warn!(step = %step, "Retry abandoned, workflow cancelled");
                        return (Err(StepError::Cancelled { step }), attempts);
                    }
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            Err(e) => {
                if e.is_retryable() {
                    error!(
                        step = %step,
                        "Step failed after {} attempts (retries exhausted): {}",
                        attempts,
                        e
                    );
                } else {
                    error!(step = %step, "Step failed with non-retryable error: {}", e);
                }
                return (Err(e), attempts);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::dispatch::DispatchError;
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicU32, Ordering};

    /// Fails with the given error until `succeed_on` calls have been made.
    struct FlakyDispatcher {
        calls: Arc<AtomicU32>,
        succeed_on: u32,
        error: DispatchError,
    }

    #[async_trait]
    impl AgentDispatcher for FlakyDispatcher {
        async fn dispatch(&self, _task: Task) -> Result<JsonValue, DispatchError> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            if call >= self.succeed_on {
                Ok(json!({"call": call}))
            } else {
                Err(self.error.clone())
            }
        }
    }

    struct SlowDispatcher;

    #[async_trait]
    impl AgentDispatcher for SlowDispatcher {
        async fn dispatch(&self, _task: Task) -> Result<JsonValue, DispatchError> {
            tokio::time::sleep(Duration::from_millis(200)).await;
            Ok(json!("late"))
        }
    }

    fn task(max_retries: u32) -> Task {
        Task {
            task_id: "wf_step".to_string(),
            task_type: "step".to_string(),
            agent_id: "agent".to_string(),
            input_data: json!({}),
            priority: 5,
            max_retries,
        }
    }

    fn fast_policy() -> RetryPolicy {
        RetryPolicy::new(Duration::from_millis(5))
    }

    #[test]
    fn test_backoff_doubles() {
        let policy = RetryPolicy::default();
        assert_eq!(policy.delay_for(1), Duration::from_secs(30));
        assert_eq!(policy.delay_for(2), Duration::from_secs(60));
        assert_eq!(policy.delay_for(3), Duration::from_secs(120));
    }

    #[test]
    fn test_backoff_is_capped() {
        let policy = RetryPolicy::default().with_max_delay(Duration::from_secs(90));
        assert_eq!(policy.delay_for(3), Duration::from_secs(90));
        assert_eq!(policy.delay_for(u32::MAX), Duration::from_secs(90));
    }

    #[tokio::test]
    async fn test_transient_error_is_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let dispatcher = FlakyDispatcher {
            calls: calls.clone(),
            succeed_on: 3,
            error: DispatchError::transient("busy"),
        };

        let (result, attempts) = dispatch_with_retry(
            &dispatcher,
            task(2),
            Duration::from_secs(1),
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert_eq!(result.unwrap(), json!({"call": 3}));
        assert_eq!(attempts, 3);
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_retries_exhausted() {
        let calls = Arc::new(AtomicU32::new(0));
        let dispatcher = FlakyDispatcher {
            calls: calls.clone(),
            succeed_on: u32::MAX,
            error: DispatchError::transient("busy"),
        };

        let (result, attempts) = dispatch_with_retry(
            &dispatcher,
            task(2),
            Duration::from_secs(1),
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(StepError::Dispatch(e)) if e.transient));
        assert_eq!(attempts, 3, "Should try once + 2 retries");
    }

    #[tokio::test]
    async fn test_permanent_error_is_not_retried() {
        let calls = Arc::new(AtomicU32::new(0));
        let dispatcher = FlakyDispatcher {
            calls: calls.clone(),
            succeed_on: u32::MAX,
            error: DispatchError::permanent("malformed statement"),
        };

        let (result, attempts) = dispatch_with_retry(
            &dispatcher,
            task(5),
            Duration::from_secs(1),
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert!(result.is_err());
        assert_eq!(attempts, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_retryable_attempt() {
        let (result, attempts) = dispatch_with_retry(
            &SlowDispatcher,
            task(1),
            Duration::from_millis(20),
            &fast_policy(),
            &CancellationToken::new(),
        )
        .await;

        assert!(matches!(result, Err(StepError::Timeout { .. })));
        assert_eq!(attempts, 2);
    }

    #[tokio::test]
    async fn test_cancel_abandons_backoff() {
        let dispatcher = FlakyDispatcher {
            calls: Arc::new(AtomicU32::new(0)),
            succeed_on: u32::MAX,
            error: DispatchError::transient("busy"),
        };
        let cancel = CancellationToken::new();
        cancel.cancel();

        let (result, attempts) = dispatch_with_retry(
            &dispatcher,
            task(3),
            Duration::from_secs(1),
            &RetryPolicy::new(Duration::from_secs(60)),
            &cancel,
        )
        .await;

        assert!(matches!(result, Err(StepError::Cancelled { .. })));
        assert_eq!(attempts, 1);
    }
}
