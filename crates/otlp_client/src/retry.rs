//! Retry Engine
//!
//! [`Retrier::request`] runs one network operation with retry semantics:
//!
//! 1. Retries disabled: call the operation once and return its result as is.
//! 2. Otherwise call it; on success return immediately.
//! 3. Classify the failure. Non-retryable failures return immediately.
//! 4. Pick the wait: a server throttle delay replaces the computed backoff.
//! 5. If waiting would overrun `max_elapsed_time`, give up before waiting.
//! 6. Wait (cancellable). Cancellation returns the reason wrapping the cause.
//! 7. If the budget is gone after the wait, give up; otherwise go to 2.
//!
//! A `Retrier` holds only immutable configuration, so one instance can serve
//! any number of concurrent requests.

use crate::backoff::{Backoff, TokioWaiter, WaiterBoxed};
use crate::config::RetryConfig;
use crate::error::{ExportError, StatusCode};
use crate::scope::Scope;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::Instant;
use tracing::debug;

/// Classifier verdict for one failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RetryDecision {
    pub retryable: bool,
    /// Server-mandated wait. Non-zero overrides the computed backoff.
    pub throttle_delay: Duration,
}

impl RetryDecision {
    pub const STOP: Self = Self {
        retryable: false,
        throttle_delay: Duration::ZERO,
    };

    pub fn retry() -> Self {
        Self {
            retryable: true,
            throttle_delay: Duration::ZERO,
        }
    }

    pub fn retry_after(delay: Duration) -> Self {
        Self {
            retryable: true,
            throttle_delay: delay,
        }
    }
}

/// Decides whether a failure is worth another attempt.
pub trait RetryClassifier: Send + Sync {
    fn classify(&self, err: &ExportError) -> RetryDecision;
}

impl<F> RetryClassifier for F
where
    F: Fn(&ExportError) -> RetryDecision + Send + Sync,
{
    fn classify(&self, err: &ExportError) -> RetryDecision {
        self(err)
    }
}

/// Default classifier keyed on the transport status code.
///
/// Errors without a transport status (partial success alone, lifecycle
/// errors, cancellations) are never retried.
#[derive(Debug, Default, Clone, Copy)]
pub struct StatusClassifier;

impl RetryClassifier for StatusClassifier {
    fn classify(&self, err: &ExportError) -> RetryDecision {
        if err.cancel_reason().is_some() {
            return RetryDecision::STOP;
        }
        let Some(status) = err.transport_error() else {
            return RetryDecision::STOP;
        };
        let throttle = status.retry_delay.unwrap_or_default();
        match status.code {
            StatusCode::Cancelled
            | StatusCode::DeadlineExceeded
            | StatusCode::Aborted
            | StatusCode::OutOfRange
            | StatusCode::Unavailable
            | StatusCode::DataLoss => RetryDecision::retry_after(throttle),
            // Only retry when the server says recovery is possible.
            StatusCode::ResourceExhausted => match status.retry_delay {
                Some(delay) => RetryDecision::retry_after(delay),
                None => RetryDecision::STOP,
            },
            _ => RetryDecision::STOP,
        }
    }
}

/// Wraps network operations with retry semantics.
#[derive(Clone)]
pub struct Retrier {
    config: RetryConfig,
    backoff: Backoff,
    classifier: Arc<dyn RetryClassifier>,
    waiter: Arc<dyn WaiterBoxed>,
}

impl std::fmt::Debug for Retrier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Retrier")
            .field("config", &self.config)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl Retrier {
    /// Create a retrier with the status classifier and the Tokio waiter.
    pub fn new(config: RetryConfig) -> Self {
        Self {
            config,
            backoff: Backoff::default(),
            classifier: Arc::new(StatusClassifier),
            waiter: Arc::new(TokioWaiter),
        }
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    pub fn with_classifier(mut self, classifier: Arc<dyn RetryClassifier>) -> Self {
        self.classifier = classifier;
        self
    }

    pub fn with_waiter(mut self, waiter: Arc<dyn WaiterBoxed>) -> Self {
        self.waiter = waiter;
        self
    }

    /// Runs `op` until it succeeds, fails permanently, or the budget or scope
    /// runs out. `op` receives the scope it must honor.
    pub async fn request<F, Fut>(&self, scope: &Scope, mut op: F) -> Result<(), ExportError>
    where
        F: FnMut(Scope) -> Fut,
        Fut: Future<Output = Result<(), ExportError>>,
    {
        if !self.config.enabled {
            return op(scope.clone()).await;
        }

        let started = Instant::now();
        let max_elapsed = self.config.max_elapsed_time;
        let mut attempt: u32 = 0;

        loop {
            let cause = match op(scope.clone()).await {
                Ok(()) => return Ok(()),
                Err(err) => err,
            };

            let decision = self.classifier.classify(&cause);
            if !decision.retryable {
                return Err(cause);
            }

            let delay = if decision.throttle_delay.is_zero() {
                self.backoff.delay(&self.config, attempt)
            } else {
                decision.throttle_delay
            };
            attempt = attempt.saturating_add(1);

            if !max_elapsed.is_zero() && started.elapsed().saturating_add(delay) > max_elapsed {
                return Err(ExportError::RetryWouldElapse {
                    source: Box::new(cause),
                });
            }

            debug!(attempt, ?delay, error = %cause, "retrying export");

            if let Err(reason) = self.waiter.wait_boxed(scope, delay).await {
                return Err(ExportError::Cancelled {
                    reason,
                    source: Some(Box::new(cause)),
                });
            }

            if !max_elapsed.is_zero() && started.elapsed() > max_elapsed {
                return Err(ExportError::RetryElapsed {
                    source: Box::new(cause),
                });
            }
        }
    }
}
