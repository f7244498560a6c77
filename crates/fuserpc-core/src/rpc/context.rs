//! Per-call context bridging a [`Cancel`] signal into the RPC layer.
//!
//! A context is done exactly when its signal closes. It never carries a
//! deadline and holds no values; `err` is `None` until done and
//! [`ContextError::Canceled`] afterwards.

use crate::cancel::Cancel;

/// Why a context is done.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum ContextError {
    #[error("context canceled")]
    Canceled,
}

/// Cancellation scope of one outgoing or incoming call.
#[derive(Debug, Clone, Default)]
pub struct CallContext {
    cancel: Cancel,
}

impl CallContext {
    /// A context that is never done.
    pub fn background() -> Self {
        Self { cancel: Cancel::never() }
    }

    /// Wraps a cancellation signal.
    pub fn from_cancel(cancel: Cancel) -> Self {
        Self { cancel }
    }

    /// Always `None`: cancellation is the only way a context ends.
    pub fn deadline(&self) -> Option<std::time::Instant> {
        None
    }

    pub fn is_done(&self) -> bool {
        self.cancel.is_closed()
    }

    /// Completes once the signal closes.
    pub async fn done(&self) {
        self.cancel.closed().await;
    }

    pub fn err(&self) -> Option<ContextError> {
        self.is_done().then_some(ContextError::Canceled)
    }

    /// The underlying signal, for handing to a raw filesystem operation.
    pub fn cancel_signal(&self) -> &Cancel {
        &self.cancel
    }
}

impl From<Cancel> for CallContext {
    fn from(cancel: Cancel) -> Self {
        Self::from_cancel(cancel)
    }
}
