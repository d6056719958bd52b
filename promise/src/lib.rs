//! Deferred results over tokio.
//!
//! A [`Promise<T>`] is a handle onto the eventual outcome of an asynchronous
//! producer. The handle is available immediately; the outcome is fixed
//! ("settled") exactly once, by whichever of three events happens first: the
//! producer finishes, the promise's own deadline elapses, or the inherited
//! [`Signal`] is cancelled. Once settled, the outcome never changes and any
//! number of callers can read it, concurrently or repeatedly.
//!
//! Evaluation is either eager (the producer starts before the constructor
//! returns) or lazy (the first [`Promise::resolve`] call starts it; concurrent
//! first callers race for a one-shot gate so the producer still runs exactly
//! once). Settlement always runs on its own task: a resolver that stops
//! waiting abandons only its wait, never the settlement.
//!
//! ```no_run
//! use std::time::Duration;
//!
//! use eventual_promise::{Promise, PromiseConfig, Signal};
//!
//! # async fn demo() {
//! let config = PromiseConfig {
//!     timeout: Some(Duration::from_millis(100)),
//!     ..PromiseConfig::default()
//! };
//! let promise = Promise::new(Signal::never(), config, |signal| async move {
//!     tokio::select! {
//!         () = tokio::time::sleep(Duration::from_millis(500)) => Ok(1u32),
//!         reason = signal.cancelled() => Err(reason.into()),
//!     }
//! });
//! // The producer cannot finish in time, so the promise settles with
//! // `PromiseError::TimedOut` after ~100ms.
//! assert!(promise.resolve().await.is_err());
//! # }
//! ```

mod error;
mod promise;

pub use error::PromiseError;
pub use promise::{Outcome, Promise, PromiseConfig};

pub use eventual_signal::{CancelGuard, CancelReason, Signal};
