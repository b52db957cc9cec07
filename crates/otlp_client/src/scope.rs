//! Cancellation scopes.
//!
//! A [`Scope`] is a cloneable cancellation signal with an optional deadline.
//! Every clone observes the same state; the first reason recorded wins and
//! later cancellations are no-ops.
//!
//! [`Scope::merge`] links two parents into a child scope that fires when
//! either parent fires. One lightweight watcher task per merged scope does
//! the forwarding and exits as soon as any of the three scopes fires; the
//! returned [`ScopeGuard`] cancels the child on drop so the watcher never
//! outlives the operation it guards.

use crate::error::CancelReason;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{sleep_until, Instant};

#[derive(Debug)]
struct ScopeState {
    reason: watch::Sender<Option<CancelReason>>,
    deadline: Option<Instant>,
}

/// A cloneable cancellation signal.
#[derive(Debug, Clone)]
pub struct Scope {
    state: Arc<ScopeState>,
}

impl Default for Scope {
    fn default() -> Self {
        Self::new()
    }
}

impl Scope {
    /// A scope that only fires when cancelled explicitly.
    pub fn new() -> Self {
        Self::with_optional_deadline(None)
    }

    /// A scope that fires with [`CancelReason::DeadlineExceeded`] after `timeout`.
    ///
    /// A timeout too large to represent as an instant means no deadline.
    pub fn with_timeout(timeout: Duration) -> Self {
        Self::with_optional_deadline(Instant::now().checked_add(timeout))
    }

    /// A scope that fires with [`CancelReason::DeadlineExceeded`] at `deadline`.
    pub fn with_deadline(deadline: Instant) -> Self {
        Self::with_optional_deadline(Some(deadline))
    }

    fn with_optional_deadline(deadline: Option<Instant>) -> Self {
        let (reason, _) = watch::channel(None);
        Self {
            state: Arc::new(ScopeState { reason, deadline }),
        }
    }

    /// Returns the deadline, if any.
    pub fn deadline(&self) -> Option<Instant> {
        self.state.deadline
    }

    /// Cancels the scope with [`CancelReason::Cancelled`].
    pub fn cancel(&self) {
        self.cancel_with(CancelReason::Cancelled);
    }

    /// Cancels the scope, keeping the first reason if already cancelled.
    ///
    /// Returns `true` if this call recorded the reason.
    pub fn cancel_with(&self, reason: CancelReason) -> bool {
        // send_if_modified updates the value even with no live receivers.
        self.state.reason.send_if_modified(|current| {
            if current.is_some() {
                false
            } else {
                *current = Some(reason);
                true
            }
        })
    }

    /// Returns why the scope fired, or `None` while it is still live.
    ///
    /// An elapsed deadline is recorded lazily on first observation.
    pub fn reason(&self) -> Option<CancelReason> {
        let current = *self.state.reason.borrow();
        if current.is_some() {
            return current;
        }
        match self.state.deadline {
            Some(deadline) if Instant::now() >= deadline => {
                self.cancel_with(CancelReason::DeadlineExceeded);
                *self.state.reason.borrow()
            }
            _ => None,
        }
    }

    /// Returns `true` once the scope has fired.
    pub fn is_cancelled(&self) -> bool {
        self.reason().is_some()
    }

    /// Completes when the scope fires, yielding the reason.
    pub async fn cancelled(&self) -> CancelReason {
        let mut rx = self.state.reason.subscribe();
        let signalled = async move {
            loop {
                let current = *rx.borrow_and_update();
                if let Some(reason) = current {
                    return reason;
                }
                if rx.changed().await.is_err() {
                    // The sender lives in `self.state`, so this cannot happen
                    // while `self` is borrowed.
                    return CancelReason::Cancelled;
                }
            }
        };

        match self.state.deadline {
            Some(deadline) => {
                tokio::select! {
                    reason = signalled => reason,
                    () = sleep_until(deadline) => {
                        self.cancel_with(CancelReason::DeadlineExceeded);
                        self.reason().unwrap_or(CancelReason::DeadlineExceeded)
                    }
                }
            }
            None => signalled.await,
        }
    }

    /// Creates a child scope that fires when `parent` or `linked` fires, or
    /// after `timeout` if one is given.
    ///
    /// The child inherits the reason of whichever parent fired first. Must be
    /// called from within a Tokio runtime.
    pub fn merge(parent: &Scope, linked: &Scope, timeout: Option<Duration>) -> ScopeGuard {
        let deadline = [
            parent.deadline(),
            linked.deadline(),
            timeout.and_then(|t| Instant::now().checked_add(t)),
        ]
        .into_iter()
        .flatten()
        .min();
        let child = Scope::with_optional_deadline(deadline);

        if let Some(reason) = parent.reason().or_else(|| linked.reason()) {
            child.cancel_with(reason);
        } else {
            let (parent, linked, watched) = (parent.clone(), linked.clone(), child.clone());
            tokio::spawn(async move {
                tokio::select! {
                    reason = parent.cancelled() => { watched.cancel_with(reason); }
                    reason = linked.cancelled() => { watched.cancel_with(reason); }
                    _ = watched.cancelled() => {}
                }
            });
        }

        ScopeGuard { scope: child }
    }
}

/// Owns a merged scope and cancels it when dropped.
#[derive(Debug)]
pub struct ScopeGuard {
    scope: Scope,
}

impl ScopeGuard {
    pub fn scope(&self) -> &Scope {
        &self.scope
    }
}

impl std::ops::Deref for ScopeGuard {
    type Target = Scope;

    fn deref(&self) -> &Scope {
        &self.scope
    }
}

impl Drop for ScopeGuard {
    fn drop(&mut self) {
        self.scope.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_first_reason_wins() {
        let scope = Scope::new();
        assert!(!scope.is_cancelled());
        assert!(scope.cancel_with(CancelReason::Shutdown));
        assert!(!scope.cancel_with(CancelReason::Cancelled));
        assert_eq!(scope.reason(), Some(CancelReason::Shutdown));
        assert_eq!(scope.cancelled().await, CancelReason::Shutdown);
    }

    #[tokio::test(start_paused = true)]
    async fn test_deadline_fires() {
        let scope = Scope::with_timeout(Duration::from_millis(50));
        let start = Instant::now();
        assert_eq!(scope.cancelled().await, CancelReason::DeadlineExceeded);
        assert!(start.elapsed() >= Duration::from_millis(50));
        assert!(scope.is_cancelled());
    }

    #[tokio::test]
    async fn test_clones_share_state() {
        let scope = Scope::new();
        let clone = scope.clone();
        let waiter = tokio::spawn(async move { clone.cancelled().await });
        tokio::task::yield_now().await;
        scope.cancel();
        assert_eq!(waiter.await.unwrap(), CancelReason::Cancelled);
    }

    #[tokio::test]
    async fn test_merge_follows_either_parent() {
        let caller = Scope::new();
        let shutdown = Scope::new();

        let from_caller = Scope::merge(&caller, &shutdown, None);
        caller.cancel();
        assert_eq!(from_caller.cancelled().await, CancelReason::Cancelled);

        let caller = Scope::new();
        let from_shutdown = Scope::merge(&caller, &shutdown, None);
        shutdown.cancel_with(CancelReason::Shutdown);
        assert_eq!(from_shutdown.cancelled().await, CancelReason::Shutdown);
        assert!(!caller.is_cancelled());
    }

    #[tokio::test]
    async fn test_merge_of_fired_parent_starts_cancelled() {
        let caller = Scope::new();
        let shutdown = Scope::new();
        shutdown.cancel_with(CancelReason::Shutdown);
        let child = Scope::merge(&caller, &shutdown, None);
        assert_eq!(child.reason(), Some(CancelReason::Shutdown));
    }

    #[tokio::test(start_paused = true)]
    async fn test_merge_timeout() {
        let child = Scope::merge(&Scope::new(), &Scope::new(), Some(Duration::from_secs(1)));
        assert_eq!(child.cancelled().await, CancelReason::DeadlineExceeded);
    }

    #[tokio::test]
    async fn test_guard_drop_does_not_touch_parents() {
        let caller = Scope::new();
        let shutdown = Scope::new();
        let child = Scope::merge(&caller, &shutdown, None);
        let observer = child.scope().clone();
        drop(child);
        assert_eq!(observer.reason(), Some(CancelReason::Cancelled));
        assert!(!caller.is_cancelled());
        assert!(!shutdown.is_cancelled());
    }

    #[tokio::test]
    async fn test_unrepresentable_timeout_means_no_deadline() {
        let scope = Scope::with_timeout(Duration::MAX);
        assert_eq!(scope.deadline(), None);
        assert!(!scope.is_cancelled());

        let guard = Scope::merge(&Scope::new(), &Scope::new(), Some(Duration::MAX));
        assert_eq!(guard.deadline(), None);
        assert!(!guard.is_cancelled());
    }
}
