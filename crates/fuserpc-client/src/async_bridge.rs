//! Bridge between synchronous filesystem callbacks and the async channel.
//!
//! Kernel callbacks arrive on plain threads. Each remote call is spawned on
//! the tokio runtime and the calling thread parks on a oneshot until the
//! result arrives. Must not be called from inside the runtime itself.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::oneshot;

/// Counters for bridged calls.
#[derive(Debug, Default)]
pub struct BridgeStats {
    pub calls_started: AtomicU64,
    pub calls_completed: AtomicU64,
    pub calls_timed_out: AtomicU64,
}

impl BridgeStats {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    fn record_start(&self) {
        self.calls_started.fetch_add(1, Ordering::Relaxed);
    }

    fn record_complete(&self) {
        self.calls_completed.fetch_add(1, Ordering::Relaxed);
    }

    fn record_timeout(&self) {
        self.calls_timed_out.fetch_add(1, Ordering::Relaxed);
    }

    /// Calls started but not yet finished.
    pub fn in_flight(&self) -> u64 {
        let started = self.calls_started.load(Ordering::Relaxed);
        let finished = self.calls_completed.load(Ordering::Relaxed) + self.calls_timed_out.load(Ordering::Relaxed);
        started.saturating_sub(finished)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum BridgeError {
    #[error("call timed out after {0:?}")]
    Timeout(Duration),

    /// The runtime dropped the task before it finished.
    #[error("call was abandoned by the runtime")]
    Abandoned,
}

/// Runs `future` on `handle` and blocks until it completes.
///
/// With a `timeout`, the spawned task is aborted once it expires so that
/// whatever it holds (pending call slots, stream receivers) is released.
pub fn execute<F, T>(
    handle: &Handle,
    timeout: Option<Duration>,
    stats: Option<&BridgeStats>,
    future: F,
) -> Result<T, BridgeError>
where
    F: Future<Output = T> + Send + 'static,
    T: Send + 'static,
{
    if let Some(s) = stats {
        s.record_start();
    }

    let (tx, rx) = oneshot::channel();
    let task = handle.spawn(async move {
        let result = match timeout {
            Some(limit) => tokio::time::timeout(limit, future).await.ok(),
            None => Some(future.await),
        };
        let _ = tx.send(result);
    });

    match rx.blocking_recv() {
        Ok(Some(value)) => {
            if let Some(s) = stats {
                s.record_complete();
            }
            Ok(value)
        }
        Ok(None) => {
            task.abort();
            if let Some(s) = stats {
                s.record_timeout();
            }
            Err(BridgeError::Timeout(timeout.unwrap_or_default()))
        }
        Err(_) => {
            task.abort();
            Err(BridgeError::Abandoned)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_execute_simple() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = execute(rt.handle(), None, None, async { 42 });
        assert_eq!(result.unwrap(), 42);
    }

    #[test]
    fn test_timeout() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let result = execute(rt.handle(), Some(Duration::from_millis(10)), None, async {
            tokio::time::sleep(Duration::from_secs(10)).await;
            42
        });
        assert!(matches!(result, Err(BridgeError::Timeout(_))));
    }

    #[test]
    fn test_stats() {
        let rt = tokio::runtime::Runtime::new().unwrap();
        let stats = BridgeStats::new();
        let _ = execute(rt.handle(), None, Some(&stats), async { 1 });
        let _ = execute(rt.handle(), Some(Duration::from_millis(10)), Some(&stats), async {
            tokio::time::sleep(Duration::from_secs(10)).await;
        });
        assert_eq!(stats.calls_started.load(Ordering::Relaxed), 2);
        assert_eq!(stats.calls_completed.load(Ordering::Relaxed), 1);
        assert_eq!(stats.calls_timed_out.load(Ordering::Relaxed), 1);
        assert_eq!(stats.in_flight(), 0);
    }
}
