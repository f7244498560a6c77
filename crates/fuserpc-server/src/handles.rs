//! Open file and directory handles of the loopback filesystem.
//!
//! Handle ids come from a shared counter starting at 1; 0 is never issued
//! so the kernel's "no handle" value stays unambiguous.

use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use dashmap::mapref::one::Ref;
use fuserpc_core::DirEntry;
use std::fs::File;
use std::sync::atomic::{AtomicU64, Ordering};

/// What an open handle refers to.
#[derive(Debug)]
pub enum Handle {
    File(File),
    /// Directory listing captured at opendir time.
    Dir(Vec<DirEntry>),
}

/// Concurrent map from handle id to [`Handle`].
#[derive(Debug)]
pub struct HandleTable {
    handles: DashMap<u64, Handle>,
    next_id: AtomicU64,
}

impl HandleTable {
    pub fn new() -> Self {
        Self {
            handles: DashMap::new(),
            next_id: AtomicU64::new(1),
        }
    }

    /// Stores `handle` under a fresh id and returns the id.
    pub fn insert(&self, handle: Handle) -> u64 {
        let mut handle = Some(handle);
        loop {
            let id = self.next_id.fetch_add(1, Ordering::Relaxed);
            if id == 0 {
                continue;
            }
            if let Entry::Vacant(entry) = self.handles.entry(id)
                && let Some(handle) = handle.take()
            {
                entry.insert(handle);
                return id;
            }
        }
    }

    pub fn get(&self, id: u64) -> Option<Ref<'_, u64, Handle>> {
        self.handles.get(&id)
    }

    pub fn remove(&self, id: u64) -> Option<Handle> {
        self.handles.remove(&id).map(|(_, h)| h)
    }

    pub fn len(&self) -> usize {
        self.handles.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handles.is_empty()
    }
}

impl Default for HandleTable {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_ids_start_at_one() {
        let table = HandleTable::new();
        let a = table.insert(Handle::Dir(Vec::new()));
        let b = table.insert(Handle::Dir(Vec::new()));
        assert_eq!((a, b), (1, 2));
        assert_eq!(table.len(), 2);
    }

    #[test]
    fn test_remove() {
        let table = HandleTable::new();
        let id = table.insert(Handle::Dir(vec![DirEntry::new("x", 2, 0)]));
        assert!(matches!(table.get(id).as_deref(), Some(Handle::Dir(entries)) if entries.len() == 1));
        assert!(table.remove(id).is_some());
        assert!(table.remove(id).is_none());
        assert!(table.is_empty());
    }

    #[test]
    fn test_concurrent_inserts_are_unique() {
        let table = Arc::new(HandleTable::new());
        let threads: Vec<_> = (0..8)
            .map(|_| {
                let table = Arc::clone(&table);
                thread::spawn(move || (0..100).map(|_| table.insert(Handle::Dir(Vec::new()))).collect::<Vec<_>>())
            })
            .collect();
        let ids: HashSet<u64> = threads.into_iter().flat_map(|t| t.join().unwrap()).collect();
        assert_eq!(ids.len(), 800);
        assert!(!ids.contains(&0));
    }
}
