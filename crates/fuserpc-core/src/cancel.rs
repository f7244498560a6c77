//! Close-to-notify cancellation signal handed to raw filesystem operations.
//!
//! A [`Cancel`] fires when its paired [`CancelHandle`] is cancelled or dropped,
//! the same convention as a closed channel. Operations may poll it between
//! steps or await it alongside their own work.

use tokio::sync::watch;

/// Receiving side of a cancellation signal.
#[derive(Debug, Clone, Default)]
pub struct Cancel {
    rx: Option<watch::Receiver<()>>,
}

/// Sending side of a cancellation signal. Dropping it cancels.
#[derive(Debug)]
pub struct CancelHandle {
    _tx: watch::Sender<()>,
}

impl Cancel {
    /// A signal that never fires.
    pub fn never() -> Self {
        Self { rx: None }
    }

    /// Creates a linked handle and signal.
    pub fn pair() -> (CancelHandle, Cancel) {
        let (tx, rx) = watch::channel(());
        (CancelHandle { _tx: tx }, Cancel { rx: Some(rx) })
    }

    /// True once the paired handle has been cancelled.
    pub fn is_closed(&self) -> bool {
        self.rx.as_ref().is_some_and(|rx| rx.has_changed().is_err())
    }

    /// Completes when the signal fires; pends forever for [`Cancel::never`].
    pub async fn closed(&self) {
        match &self.rx {
            Some(rx) => {
                let mut rx = rx.clone();
                while rx.changed().await.is_ok() {}
            }
            None => std::future::pending().await,
        }
    }
}

impl CancelHandle {
    /// Fires the paired signal.
    pub fn cancel(self) {}
}
