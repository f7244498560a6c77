//! Page-multiple buffer pool for read, write and readdir payloads.
//!
//! Buffers are grouped into size classes counted in pages. A pool is an
//! ordinary value owned by whoever uses it (one per server adapter), so
//! tests and separate mounts never share free-lists.
//!
//! # Example
//!
//! ```
//! use fuserpc_core::BufferPool;
//!
//! let pool = BufferPool::new();
//! let buf = pool.alloc(100);
//! assert_eq!(buf.len(), 100);
//! assert_eq!(buf.capacity() % fuserpc_core::bufferpool::page_size(), 0);
//! pool.free(buf);
//! ```

use dashmap::DashMap;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, LazyLock};

const FALLBACK_PAGE_SIZE: usize = 4096;

static PAGE_SIZE: LazyLock<usize> = LazyLock::new(|| {
    // SAFETY: sysconf has no preconditions and only reads system configuration.
    let size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    usize::try_from(size).ok().filter(|&s| s > 0).unwrap_or(FALLBACK_PAGE_SIZE)
});

/// System page size in bytes.
pub fn page_size() -> usize {
    *PAGE_SIZE
}

/// Free-list for one size class.
pub type SizeClassPool = Mutex<Vec<Vec<u8>>>;

/// Counters for pool diagnostics.
#[derive(Debug, Default)]
pub struct PoolStats {
    pub allocated: AtomicU64,
    pub reused: AtomicU64,
    pub returned: AtomicU64,
    pub dropped: AtomicU64,
}

/// Snapshot of [`PoolStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PoolStatsSnapshot {
    pub allocated: u64,
    pub reused: u64,
    pub returned: u64,
    pub dropped: u64,
}

/// Size-class pool of reusable byte buffers.
#[derive(Debug, Default)]
pub struct BufferPool {
    classes: DashMap<usize, Arc<SizeClassPool>>,
    stats: PoolStats,
}

impl BufferPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the free-list for `pages`, creating it on first use.
    ///
    /// Concurrent callers asking for the same class always get the same pool.
    pub fn get_pool(&self, pages: usize) -> Arc<SizeClassPool> {
        Arc::clone(self.classes.entry(pages).or_default().value())
    }

    /// Returns a buffer of exactly `size` bytes whose capacity is a whole
    /// number of pages. Reused buffers are not cleared.
    pub fn alloc(&self, size: usize) -> Vec<u8> {
        let pages = pages_for(size);
        let pool = self.get_pool(pages);
        let reused = pool.lock().pop();

        let mut buf = if let Some(buf) = reused {
            self.stats.reused.fetch_add(1, Ordering::Relaxed);
            buf
        } else {
            self.stats.allocated.fetch_add(1, Ordering::Relaxed);
            Vec::with_capacity(pages * page_size())
        };
        buf.resize(size, 0);
        buf
    }

    /// Hands a buffer back for reuse.
    ///
    /// Buffers whose capacity is zero or not a page multiple did not come
    /// from a pool and are simply dropped.
    pub fn free(&self, mut buf: Vec<u8>) {
        let capacity = buf.capacity();
        if capacity == 0 {
            return;
        }
        if capacity % page_size() != 0 {
            self.stats.dropped.fetch_add(1, Ordering::Relaxed);
            return;
        }
        buf.clear();
        self.get_pool(capacity / page_size()).lock().push(buf);
        self.stats.returned.fetch_add(1, Ordering::Relaxed);
    }

    /// Number of buffers currently parked in the free-list for `pages`.
    pub fn idle(&self, pages: usize) -> usize {
        self.classes.get(&pages).map_or(0, |pool| pool.lock().len())
    }

    pub fn stats(&self) -> PoolStatsSnapshot {
        PoolStatsSnapshot {
            allocated: self.stats.allocated.load(Ordering::Relaxed),
            reused: self.stats.reused.load(Ordering::Relaxed),
            returned: self.stats.returned.load(Ordering::Relaxed),
            dropped: self.stats.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Page count for a request of `size` bytes (minimum one page).
pub fn pages_for(size: usize) -> usize {
    size.div_ceil(page_size()).max(1)
}
