//! Per-principal permission cache.
//!
//! Owned explicitly by the caller and optionally handed to several checker
//! constructions for the same principal within one request, so they share
//! fetched state instead of re-querying. Entries are created lazily and
//! never mutated after population within the cache's lifetime; a later
//! assign/remove is visible only to a freshly constructed cache.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::target::ContentTypeId;

/// Cache key: the target's content type plus its stringified primary key.
pub type CacheKey = (ContentTypeId, String);

/// Cloneable shared cache of per-object permission codename lists.
#[derive(Debug, Clone, Default)]
pub struct PermissionCache {
    entries: Arc<Mutex<HashMap<CacheKey, Vec<String>>>>,
}

impl PermissionCache {
    /// Create an empty cache.
    pub fn new() -> Self {
        Self::default()
    }

    /// Fetch the cached codenames for a key, if populated.
    pub fn get(&self, key: &CacheKey) -> Option<Vec<String>> {
        self.entries.lock().get(key).cloned()
    }

    /// Whether the key has been populated (an empty list counts).
    pub fn contains(&self, key: &CacheKey) -> bool {
        self.entries.lock().contains_key(key)
    }

    /// Populate a key. First write wins; an already-populated key is left
    /// untouched.
    pub fn insert(&self, key: CacheKey, codenames: Vec<String>) {
        self.entries.lock().entry(key).or_insert(codenames);
    }

    /// Number of populated keys.
    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    /// Whether no key has been populated yet.
    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
