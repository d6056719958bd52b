use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use futures_util::FutureExt;
use futures_util::future::BoxFuture;
use tokio::sync::watch;
use tokio::time;

use eventual_signal::Signal;

use crate::PromiseError;

/// The settled result of a [`Promise`].
pub type Outcome<T> = Result<T, PromiseError>;

type Producer<T> = Box<dyn FnOnce(Signal) -> BoxFuture<'static, anyhow::Result<T>> + Send>;

/// Construction-time configuration for a [`Promise`].
///
/// The default is eager evaluation with no deadline.
#[derive(Debug, Clone, Copy, Default)]
pub struct PromiseConfig {
    /// Abandon the producer and settle with [`PromiseError::TimedOut`] once
    /// this much time has passed. `None` and `Some(Duration::ZERO)` both mean
    /// "no deadline".
    pub timeout: Option<Duration>,
    /// Defer starting the producer until the first [`Promise::resolve`] call
    /// instead of starting it at construction.
    pub lazy: bool,
}

/// A handle onto the eventual outcome of an asynchronous producer.
///
/// Cheap to clone; all clones share one settlement. The producer runs exactly
/// once per promise no matter how many handles exist or how many tasks
/// resolve concurrently.
pub struct Promise<T> {
    shared: Arc<Shared<T>>,
}

struct Shared<T> {
    signal: Signal,
    timeout: Option<Duration>,
    /// Taken by whichever trigger call comes first; doubles as the one-shot
    /// gate that keeps the settlement task from ever being spawned twice.
    producer: Mutex<Option<Producer<T>>>,
    /// Completion latch and published outcome in one: `None` until the
    /// settlement task writes the outcome, then latched forever. The watch
    /// channel orders that write before any reader observing it.
    outcome: watch::Sender<Option<Outcome<T>>>,
}

impl<T> Promise<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// Create a promise over `producer`, which receives a signal derived from
    /// `signal` (or `signal` itself when no timeout is configured) and is
    /// expected to wind down promptly once that signal is cancelled.
    ///
    /// In eager mode the settlement task is spawned before `new` returns, so
    /// the promise settles even if nobody ever resolves it. Must be called
    /// from within a tokio runtime.
    pub fn new<F, Fut>(signal: Signal, config: PromiseConfig, producer: F) -> Self
    where
        F: FnOnce(Signal) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<T>> + Send + 'static,
    {
        let producer: Producer<T> = Box::new(move |signal| producer(signal).boxed());
        let (outcome, _) = watch::channel(None);
        let shared = Arc::new(Shared {
            signal,
            timeout: config.timeout.filter(|timeout| !timeout.is_zero()),
            producer: Mutex::new(Some(producer)),
            outcome,
        });

        if !config.lazy {
            shared.trigger();
        }

        Self { shared }
    }

    /// Wait for the promise to settle and return its outcome.
    ///
    /// On a lazy promise the first call starts the settlement task; it and
    /// every other caller then await the completion latch. Settlement runs on
    /// its own task, so a caller that stops waiting (its `resolve` future is
    /// dropped, or its task aborted) abandons only its wait - the promise
    /// still settles and later calls still succeed. After settlement this
    /// returns immediately, and every call observes the identical outcome.
    pub async fn resolve(&self) -> Outcome<T> {
        self.shared.trigger();
        self.shared.wait().await
    }

    /// The settled outcome, or `None` while the promise is unsettled.
    ///
    /// Non-blocking and non-forcing: never triggers a lazy producer.
    #[must_use]
    pub fn peek(&self) -> Option<Outcome<T>> {
        self.shared.outcome.borrow().clone()
    }
}

impl<T> Promise<T> {
    /// Whether the promise has settled. Non-blocking and non-forcing: a lazy
    /// promise that nobody resolves stays unsettled indefinitely.
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.shared.outcome.borrow().is_some()
    }
}

impl<T> Clone for Promise<T> {
    fn clone(&self) -> Self {
        Self {
            shared: Arc::clone(&self.shared),
        }
    }
}

impl<T> fmt::Debug for Promise<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Promise")
            .field("settled", &self.is_settled())
            .finish_non_exhaustive()
    }
}

impl<T> Shared<T>
where
    T: Clone + Send + Sync + 'static,
{
    /// One-shot trigger: the first call takes the producer and spawns the
    /// settlement task; later calls find it already gone and do nothing.
    fn trigger(self: &Arc<Self>) {
        let producer = self
            .producer
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(producer) = producer else { return };

        let task = Arc::clone(self);
        tokio::spawn(async move {
            let outcome = task.settle(producer).await;
            task.outcome.send_replace(Some(outcome));
        });
    }

    async fn wait(&self) -> Outcome<T> {
        let mut settled = self.outcome.subscribe();
        loop {
            if let Some(outcome) = settled.borrow_and_update().clone() {
                return outcome;
            }
            settled
                .changed()
                .await
                .expect("outcome sender lives as long as this promise");
        }
    }

    /// The settlement routine. Runs on its own task, exactly once per
    /// promise, guarded by the producer take in [`Shared::trigger`].
    async fn settle(&self, producer: Producer<T>) -> Outcome<T> {
        let Some(timeout) = self.timeout else {
            // No local deadline: the producer inherits the base signal
            // directly and governs the outcome itself, even if that signal
            // is already cancelled.
            return producer(self.signal.clone())
                .await
                .map_err(PromiseError::failed);
        };

        let (work_signal, guard) = self.signal.child();
        let work = producer(work_signal);

        // Biased polling order encodes the precedence of the race: the
        // producer's result counts only if neither inherited cancellation nor
        // the local deadline has already fired.
        let outcome = tokio::select! {
            biased;
            reason = self.signal.cancelled() => {
                tracing::trace!(%reason, "promise settled by inherited cancellation");
                Err(PromiseError::Cancelled(reason))
            }
            () = time::sleep(timeout) => {
                tracing::trace!(?timeout, "promise settled by its own deadline");
                Err(PromiseError::TimedOut)
            }
            result = work => result.map_err(PromiseError::failed),
        };

        // Losing the race drops the producer future outright; cancelling the
        // derived signal additionally reaches any work it detached.
        drop(guard);
        outcome
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn eager_resolve_returns_producer_value() {
        let promise = Promise::new(Signal::never(), PromiseConfig::default(), |_signal| async {
            Ok(42u32)
        });
        assert_eq!(promise.resolve().await.unwrap(), 42);
        assert!(promise.is_settled());
        assert_eq!(promise.peek().unwrap().unwrap(), 42);
    }

    #[tokio::test]
    async fn debug_reports_settlement() {
        let config = PromiseConfig {
            lazy: true,
            ..PromiseConfig::default()
        };
        let promise = Promise::new(Signal::never(), config, |_signal| async { Ok(1u32) });
        assert_eq!(format!("{promise:?}"), "Promise { settled: false, .. }");

        promise.resolve().await.unwrap();
        assert_eq!(format!("{promise:?}"), "Promise { settled: true, .. }");
    }

    #[tokio::test]
    async fn clones_share_one_settlement() {
        let config = PromiseConfig {
            lazy: true,
            ..PromiseConfig::default()
        };
        let promise = Promise::new(Signal::never(), config, |_signal| async { Ok(7u32) });
        let clone = promise.clone();

        assert_eq!(clone.resolve().await.unwrap(), 7);
        // The original settled too, without triggering the producer again.
        assert!(promise.is_settled());
        assert_eq!(promise.peek().unwrap().unwrap(), 7);
    }
}
