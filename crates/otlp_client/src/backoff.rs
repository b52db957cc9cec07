//! Backoff Engine
//!
//! Pure delay computation plus the injectable wait primitive:
//!
//! - [`Backoff`]: jittered exponential delay for a given attempt count
//! - [`Waiter`]: cancellable sleep, swappable in tests
//! - [`TokioWaiter`]: the production waiter built on `tokio::time::sleep`
//!
//! The exponential schedule itself lives on
//! [`RetryConfig::interval_for_attempt`]; this module only adds jitter.

use crate::config::RetryConfig;
use crate::error::CancelReason;
use crate::scope::Scope;
use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

/// Maps `unit ∈ [0, 1)` onto `[interval * (1 - factor), interval * (1 + factor)]`.
///
/// `factor` is clamped to `[0, 1]`. Saturates at `Duration::MAX`.
pub fn randomize(interval: Duration, factor: f64, unit: f64) -> Duration {
    let factor = factor.clamp(0.0, 1.0);
    let unit = unit.clamp(0.0, 1.0);
    let scale = 1.0 - factor + 2.0 * factor * unit;
    Duration::try_from_secs_f64(interval.as_secs_f64() * scale).unwrap_or(Duration::MAX)
}

/// Jittered exponential backoff.
#[derive(Debug, Clone, Copy)]
pub struct Backoff {
    randomization_factor: f64,
}

impl Default for Backoff {
    fn default() -> Self {
        Self::new(Self::DEFAULT_RANDOMIZATION_FACTOR)
    }
}

impl Backoff {
    /// Fraction of the computed interval used as the jitter half-width.
    pub const DEFAULT_RANDOMIZATION_FACTOR: f64 = 0.5;

    pub fn new(randomization_factor: f64) -> Self {
        Self {
            randomization_factor: randomization_factor.clamp(0.0, 1.0),
        }
    }

    /// No jitter; delays follow the exponential schedule exactly.
    pub fn deterministic() -> Self {
        Self::new(0.0)
    }

    /// Delay before retry number `attempt` (0-indexed).
    pub fn delay(&self, config: &RetryConfig, attempt: u32) -> Duration {
        let interval = config.interval_for_attempt(attempt);
        if self.randomization_factor == 0.0 {
            return interval;
        }
        randomize(interval, self.randomization_factor, rand::random::<f64>())
    }
}

/// Cancellable wait used between retry attempts.
///
/// Returns `Err` with the scope's reason if the scope fires before the delay
/// elapses.
pub trait Waiter: Send + Sync {
    fn wait(&self, scope: &Scope, delay: Duration)
        -> impl Future<Output = Result<(), CancelReason>> + Send;
}

/// Object-safe version of [`Waiter`] for dynamic dispatch.
pub trait WaiterBoxed: Send + Sync {
    fn wait_boxed<'a>(
        &'a self,
        scope: &'a Scope,
        delay: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), CancelReason>> + Send + 'a>>;
}

impl<T: Waiter> WaiterBoxed for T {
    fn wait_boxed<'a>(
        &'a self,
        scope: &'a Scope,
        delay: Duration,
    ) -> Pin<Box<dyn Future<Output = Result<(), CancelReason>> + Send + 'a>> {
        Box::pin(self.wait(scope, delay))
    }
}

/// Sleeps on the Tokio timer, racing the scope.
#[derive(Debug, Default, Clone, Copy)]
pub struct TokioWaiter;

impl Waiter for TokioWaiter {
    async fn wait(&self, scope: &Scope, delay: Duration) -> Result<(), CancelReason> {
        if let Some(reason) = scope.reason() {
            return Err(reason);
        }
        tokio::select! {
            () = tokio::time::sleep(delay) => Ok(()),
            reason = scope.cancelled() => Err(reason),
        }
    }
}
