//! Cooperative cancellation signals.
//!
//! A [`Signal`] tells concurrent work "you should stop" without forcing it to.
//! Signals form a derivation tree: cancelling a signal cancels every signal
//! derived from it, and a derived signal can additionally carry its own
//! deadline. Work that receives a `Signal` is expected to poll it (typically
//! via [`Signal::cancelled`] inside a `select!`) and wind down promptly.
//!
//! Cancellation is latched: the first reason to fire sticks, and later
//! cancellations of the same signal are ignored.

use std::future::pending;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::watch;
use tokio::time;

/// Why a signal was cancelled.
///
/// Propagated verbatim to every derived signal, so an observer can tell an
/// explicit cancellation apart from an expired deadline anywhere up the tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum CancelReason {
    /// The signal (or an ancestor) was cancelled explicitly.
    #[error("signal cancelled")]
    Cancelled,
    /// The signal's (or an ancestor's) deadline elapsed.
    #[error("deadline exceeded")]
    DeadlineExceeded,
}

/// An observer handle onto a cancellation state.
///
/// Cheap to clone; all clones observe the same state. A `Signal` cannot
/// cancel itself - that authority belongs to the [`CancelGuard`] returned
/// alongside it at derivation time.
#[derive(Debug, Clone)]
pub struct Signal {
    state: watch::Receiver<Option<CancelReason>>,
}

/// The owning side of a [`Signal`].
///
/// Cancels the signal either explicitly via [`CancelGuard::cancel`] or
/// implicitly when dropped. Hold it for as long as the signal should stay
/// live; letting it fall out of scope is how a finished caller tears its
/// derived signals down.
#[derive(Debug)]
pub struct CancelGuard {
    tx: watch::Sender<Option<CancelReason>>,
}

impl Signal {
    /// A root signal that can never be cancelled.
    #[must_use]
    pub fn never() -> Self {
        let (_tx, state) = watch::channel(None);
        Self { state }
    }

    /// A root signal with cancellation authority over it.
    #[must_use]
    pub fn root() -> (Self, CancelGuard) {
        let (tx, state) = watch::channel(None);
        (Self { state }, CancelGuard { tx })
    }

    /// Derive a signal that inherits this signal's cancellation and can also
    /// be cancelled independently through the returned guard.
    ///
    /// Must be called from within a tokio runtime.
    #[must_use = "dropping the guard cancels the derived signal"]
    pub fn child(&self) -> (Self, CancelGuard) {
        self.derive(None)
    }

    /// Like [`Signal::child`], but the derived signal additionally cancels
    /// itself with [`CancelReason::DeadlineExceeded`] once `timeout` elapses.
    #[must_use = "dropping the guard cancels the derived signal"]
    pub fn with_timeout(&self, timeout: Duration) -> (Self, CancelGuard) {
        self.derive(Some(timeout))
    }

    fn derive(&self, timeout: Option<Duration>) -> (Self, CancelGuard) {
        let (tx, state) = watch::channel(None);
        let mut parent = self.state.clone();
        let forward = tx.clone();
        tokio::spawn(async move {
            tokio::select! {
                // All observer handles dropped; nobody is left to notify.
                () = forward.closed() => {}
                reason = wait(&mut parent) => latch(&forward, reason),
                () = elapse(timeout) => latch(&forward, CancelReason::DeadlineExceeded),
            }
        });
        (Self { state }, CancelGuard { tx })
    }

    /// The latched cancellation reason, or `None` while the signal is live.
    /// Non-blocking.
    #[must_use]
    pub fn error(&self) -> Option<CancelReason> {
        *self.state.borrow()
    }

    /// Whether the signal has been cancelled. Non-blocking.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.error().is_some()
    }

    /// Resolves with the reason once the signal is cancelled.
    ///
    /// Pends forever on a signal that can never be cancelled, such as
    /// [`Signal::never`].
    pub async fn cancelled(&self) -> CancelReason {
        let mut state = self.state.clone();
        wait(&mut state).await
    }
}

impl CancelGuard {
    /// Cancel the associated signal with [`CancelReason::Cancelled`].
    ///
    /// Dropping the guard has the same effect; this method only makes the
    /// intent explicit at the call site.
    pub fn cancel(self) {
        drop(self);
    }
}

impl Drop for CancelGuard {
    fn drop(&mut self) {
        latch(&self.tx, CancelReason::Cancelled);
    }
}

async fn wait(state: &mut watch::Receiver<Option<CancelReason>>) -> CancelReason {
    loop {
        if let Some(reason) = *state.borrow_and_update() {
            return reason;
        }
        if state.changed().await.is_err() {
            // Every cancel source is gone, so this signal can never fire.
            pending::<()>().await;
        }
    }
}

async fn elapse(timeout: Option<Duration>) {
    match timeout {
        Some(timeout) => time::sleep(timeout).await,
        None => pending().await,
    }
}

/// First cancellation wins; a latched reason is never overwritten.
fn latch(tx: &watch::Sender<Option<CancelReason>>, reason: CancelReason) {
    let latched = tx.send_if_modified(|state| {
        if state.is_some() {
            return false;
        }
        *state = Some(reason);
        true
    });
    if latched {
        tracing::trace!(%reason, "signal cancelled");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn root_guard_cancels_with_reason() {
        let (signal, guard) = Signal::root();
        assert!(!signal.is_cancelled());
        assert_eq!(signal.error(), None);

        guard.cancel();
        assert_eq!(signal.cancelled().await, CancelReason::Cancelled);
        assert_eq!(signal.error(), Some(CancelReason::Cancelled));
    }

    #[tokio::test]
    async fn dropping_guard_cancels() {
        let (signal, guard) = Signal::root();
        drop(guard);
        assert_eq!(signal.cancelled().await, CancelReason::Cancelled);
    }

    #[tokio::test(start_paused = true)]
    async fn deadline_fires_with_deadline_reason() {
        let (signal, _guard) = Signal::never().with_timeout(Duration::from_millis(50));
        assert_eq!(signal.cancelled().await, CancelReason::DeadlineExceeded);
    }

    #[tokio::test]
    async fn child_inherits_parent_cancellation() {
        let (parent, guard) = Signal::root();
        let (child, _child_guard) = parent.child();

        guard.cancel();
        assert_eq!(child.cancelled().await, CancelReason::Cancelled);
        assert_eq!(parent.error(), Some(CancelReason::Cancelled));
    }

    #[tokio::test(start_paused = true)]
    async fn child_inherits_ancestor_deadline_reason() {
        let (mid, _mid_guard) = Signal::never().with_timeout(Duration::from_millis(10));
        let (leaf, _leaf_guard) = mid.child();
        assert_eq!(leaf.cancelled().await, CancelReason::DeadlineExceeded);
    }

    #[tokio::test]
    async fn child_guard_cancels_independently_of_parent() {
        let (parent, _parent_guard) = Signal::root();
        let (child, child_guard) = parent.child();

        child_guard.cancel();
        assert_eq!(child.cancelled().await, CancelReason::Cancelled);
        assert!(!parent.is_cancelled());
    }

    #[tokio::test(start_paused = true)]
    async fn latched_reason_never_changes() {
        let (signal, guard) = Signal::never().with_timeout(Duration::from_millis(5));
        assert_eq!(signal.cancelled().await, CancelReason::DeadlineExceeded);

        // A later explicit cancel must not replace the deadline reason.
        guard.cancel();
        assert_eq!(signal.error(), Some(CancelReason::DeadlineExceeded));
    }

    #[tokio::test(start_paused = true)]
    async fn never_signal_outlives_any_wait() {
        let signal = Signal::never();
        let waited = time::timeout(Duration::from_secs(3600), signal.cancelled()).await;
        assert!(waited.is_err());
        assert!(!signal.is_cancelled());
    }

    #[tokio::test]
    async fn clones_observe_the_same_state() {
        let (signal, guard) = Signal::root();
        let observer = signal.clone();
        guard.cancel();
        assert_eq!(observer.cancelled().await, CancelReason::Cancelled);
        assert_eq!(signal.cancelled().await, CancelReason::Cancelled);
    }
}
