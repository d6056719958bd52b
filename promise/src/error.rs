use std::sync::Arc;

use thiserror::Error;

use eventual_signal::CancelReason;

/// Why a [`Promise`](crate::Promise) settled without a value.
#[derive(Debug, Clone, Error)]
pub enum PromiseError {
    /// The promise's own deadline elapsed before the producer finished.
    #[error("promise timed out")]
    TimedOut,
    /// The inherited signal was cancelled, or an ancestor deadline expired,
    /// before the producer finished. The reason is passed through verbatim.
    #[error(transparent)]
    Cancelled(#[from] CancelReason),
    /// The producer itself failed.
    #[error("{0}")]
    Failed(Arc<anyhow::Error>),
}

impl PromiseError {
    pub(crate) fn failed(err: anyhow::Error) -> Self {
        Self::Failed(Arc::new(err))
    }

    #[must_use]
    pub fn is_timed_out(&self) -> bool {
        matches!(self, Self::TimedOut)
    }

    /// The inherited cancellation reason, if that is what settled the promise.
    #[must_use]
    pub fn cancel_reason(&self) -> Option<CancelReason> {
        match self {
            Self::Cancelled(reason) => Some(*reason),
            _ => None,
        }
    }

    /// The producer's own error, if that is what settled the promise.
    /// Downcast it to recover the concrete type the producer returned.
    #[must_use]
    pub fn failure(&self) -> Option<&anyhow::Error> {
        match self {
            Self::Failed(err) => Some(err),
            _ => None,
        }
    }
}

/// `Failed` errors compare by identity: every clone of one settled outcome is
/// equal, while two textually identical failures from different promises are
/// not. `TimedOut` and `Cancelled` compare structurally.
impl PartialEq for PromiseError {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::TimedOut, Self::TimedOut) => true,
            (Self::Cancelled(a), Self::Cancelled(b)) => a == b,
            (Self::Failed(a), Self::Failed(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}
