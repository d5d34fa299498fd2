use std::sync::Arc;
use std::time::{Duration, Instant};

use cp_telemetry::metrics::{
    global_metrics, CLIENT_ATTEMPTS_TOTAL, CLIENT_FAILURES_TOTAL, CLIENT_REQUEST_DURATION,
};
use serde_json::Value;
use tracing::{debug, error, info, warn};

use crate::error::{AttemptError, ClientError, Result};
use crate::transport::{ApiRequest, Transport};

// ---------------------------------------------------------------------------
// RetryPolicy
// ---------------------------------------------------------------------------

/// Attempt cap and linear backoff unit for one logical call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `1` disables retries.
    pub max_attempts: u32,
    /// The wait after attempt `k` is `base_delay * k`.
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_millis(1_000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// A single timed attempt.
    pub fn no_retry() -> Self {
        Self::new(1, Duration::ZERO)
    }

    /// Delay between attempt `attempt` and `attempt + 1`.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }

    /// Where the call goes after attempt `attempt` failed.
    pub fn after_failure(&self, attempt: u32) -> RetryState {
        if attempt < self.max_attempts {
            RetryState::Backoff {
                attempt,
                delay: self.backoff_for(attempt),
            }
        } else {
            RetryState::Exhausted { attempts: attempt }
        }
    }
}

/// Position of a logical call in its retry loop. A successful attempt leaves
/// the loop directly with the decoded body.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryState {
    /// Attempt number `attempt` (1-based) is about to run.
    Attempting { attempt: u32 },
    /// Attempt `attempt` failed; wait `delay` before the next one.
    Backoff { attempt: u32, delay: Duration },
    /// No attempts left.
    Exhausted { attempts: u32 },
}

// ---------------------------------------------------------------------------
// RequestExecutor
// ---------------------------------------------------------------------------

/// Runs one logical call as a strictly sequential series of timed attempts.
#[derive(Clone)]
pub struct RequestExecutor {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RequestExecutor {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        Self { transport, policy }
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    /// Execute `request`, bounding every attempt by `budget`.
    ///
    /// Transport failures, non-success statuses, undecodable bodies and
    /// timeouts are all retried identically. When attempts run out the error
    /// is [`ClientError::Timeout`] if the last attempt timed out and
    /// [`ClientError::Connection`] otherwise.
    pub async fn execute(&self, request: &ApiRequest, budget: Duration) -> Result<Value> {
        let endpoint = request.endpoint();
        let mut state = RetryState::Attempting { attempt: 1 };
        let mut last_error: Option<AttemptError> = None;

        loop {
            state = match state {
                RetryState::Attempting { attempt } => {
                    match self.attempt(request, budget).await {
                        Ok(value) => {
                            if attempt > 1 {
                                info!(endpoint, attempt, "request succeeded after retry");
                            } else {
                                debug!(endpoint, "request succeeded");
                            }
                            return Ok(value);
                        }
                        Err(e) => {
                            warn!(
                                endpoint,
                                attempt,
                                max_attempts = self.policy.max_attempts,
                                kind = e.kind(),
                                error = %e,
                                "request attempt failed"
                            );
                            last_error = Some(e);
                            self.policy.after_failure(attempt)
                        }
                    }
                }
                RetryState::Backoff { attempt, delay } => {
                    debug!(endpoint, attempt, ?delay, "backing off before retry");
                    tokio::time::sleep(delay).await;
                    RetryState::Attempting {
                        attempt: attempt + 1,
                    }
                }
                RetryState::Exhausted { attempts } => {
                    let err = ClientError::exhausted(endpoint, attempts, last_error.take());
                    let kind = if err.is_timeout() { "timeout" } else { "connection" };
                    global_metrics().increment_counter(CLIENT_FAILURES_TOTAL, &[("kind", kind)]);
                    error!(endpoint, attempts, error = %err, "request failed");
                    return Err(err);
                }
            };
        }
    }

    /// One attempt. The transport future is dropped when the budget fires,
    /// which aborts the in-flight request.
    async fn attempt(
        &self,
        request: &ApiRequest,
        budget: Duration,
    ) -> std::result::Result<Value, AttemptError> {
        let started = Instant::now();
        let result = match tokio::time::timeout(budget, self.transport.send(request)).await {
            Ok(inner) => inner,
            Err(_) => Err(AttemptError::Timeout(budget)),
        };

        let metrics = global_metrics();
        let outcome = match &result {
            Ok(_) => "ok",
            Err(e) => e.kind(),
        };
        metrics.increment_counter(CLIENT_ATTEMPTS_TOTAL, &[("outcome", outcome)]);
        metrics.record_histogram(CLIENT_REQUEST_DURATION, started.elapsed().as_secs_f64());
        result
    }
}

impl std::fmt::Debug for RequestExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RequestExecutor")
            .field("policy", &self.policy)
            .finish()
    }
}
