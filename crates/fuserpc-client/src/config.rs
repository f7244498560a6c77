//! Client adapter configuration.

use std::time::Duration;

/// Configuration for [`RemoteFileSystem`](crate::RemoteFileSystem).
#[derive(Debug, Clone, Default)]
pub struct ClientConfig {
    /// Upper bound on one remote call (or one stream chunk).
    ///
    /// `None` waits for as long as the call takes; kernel interrupts still
    /// cancel it.
    pub call_timeout: Option<Duration>,
}

impl ClientConfig {
    #[must_use]
    pub fn call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = Some(timeout);
        self
    }

    #[must_use]
    pub fn no_call_timeout(mut self) -> Self {
        self.call_timeout = None;
        self
    }
}
