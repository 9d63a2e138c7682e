//! Content-addressable object cache shared by every client in the process.
//!
//! Two append-only indexes live behind one lock:
//! - `hash -> CacheEntry`, filled by senders after a successful cycle and
//!   used to substitute placeholders for content the store already holds;
//! - `remote id -> PortableObject`, filled by receiver fetches (and by
//!   senders with what they uploaded) so unchanged objects are never pulled
//!   twice.
//!
//! There is no eviction. A hash keeps the first remote id it was seen with.

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, PoisonError, RwLock, RwLockReadGuard, RwLockWriteGuard};

use layersync_core::types::{ContentHash, ObjectRef, PortableObject, RemoteId};

/// Where a hash was uploaded to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry {
    pub remote_id: RemoteId,
    pub application_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStats {
    pub hashes: usize,
    pub objects: usize,
}

#[derive(Debug, Default)]
struct CacheState {
    by_hash: HashMap<ContentHash, CacheEntry>,
    by_remote_id: HashMap<RemoteId, PortableObject>,
}

/// Cheap-to-clone handle to the shared cache.
#[derive(Debug, Clone, Default)]
pub struct ObjectCache {
    inner: Arc<RwLock<CacheState>>,
}

impl ObjectCache {
    pub fn new() -> Self {
        Self::default()
    }

    fn read(&self) -> RwLockReadGuard<'_, CacheState> {
        self.inner.read().unwrap_or_else(PoisonError::into_inner)
    }

    fn write(&self) -> RwLockWriteGuard<'_, CacheState> {
        self.inner.write().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn lookup(&self, hash: &ContentHash) -> Option<CacheEntry> {
        self.read().by_hash.get(hash).cloned()
    }

    /// Record an uploaded hash. Returns the entry that is now authoritative,
    /// which is the earlier one when the hash was already known.
    pub fn insert(&self, hash: ContentHash, entry: CacheEntry) -> CacheEntry {
        self.write().by_hash.entry(hash).or_insert(entry).clone()
    }

    pub fn lookup_object(&self, remote_id: &RemoteId) -> Option<PortableObject> {
        self.read().by_remote_id.get(remote_id).cloned()
    }

    pub fn contains_object(&self, remote_id: &RemoteId) -> bool {
        self.read().by_remote_id.contains_key(remote_id)
    }

    /// Store a full object under its remote id. Placeholders are not stored
    /// since they carry no geometry.
    pub fn insert_object(&self, remote_id: RemoteId, object: PortableObject) -> bool {
        if object.is_placeholder() {
            return false;
        }
        let mut state = self.write();
        if state.by_remote_id.contains_key(&remote_id) {
            return false;
        }
        state.by_remote_id.insert(remote_id, object);
        true
    }

    /// Remote ids referenced by `refs` that are not cached, first-seen order,
    /// without duplicates.
    pub fn missing_objects(&self, refs: &[ObjectRef]) -> Vec<RemoteId> {
        let state = self.read();
        let mut seen = HashSet::new();
        refs.iter()
            .filter(|r| !state.by_remote_id.contains_key(&r.remote_id))
            .filter(|r| seen.insert(r.remote_id.clone()))
            .map(|r| r.remote_id.clone())
            .collect()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.read();
        CacheStats {
            hashes: state.by_hash.len(),
            objects: state.by_remote_id.len(),
        }
    }
}
