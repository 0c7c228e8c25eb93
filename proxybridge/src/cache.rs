//! Per-context object caches.
//!
//! Each sandboxed context owns an append-only arena of live values. A value's
//! position in the arena is its [`Handle`]; slot 0 is the realm's global object.
//! Caches are registered by [`ContextId`] and dropped wholesale on teardown.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use dashmap::DashMap;

use crate::bridge::protocol::{ContextId, Handle};
use crate::error::{ProxyError, Result};
use crate::value::Value;

/// Append-only arena of values visible to one context.
#[derive(Debug)]
pub struct ObjectCache {
    objects: Vec<Value>,
    /// Identity index for reference values; primitives are found by scanning.
    by_identity: HashMap<usize, Handle>,
}

impl ObjectCache {
    /// Creates a cache whose handle 0 is `root`.
    pub fn new(root: Value) -> Self {
        let mut cache = Self {
            objects: Vec::new(),
            by_identity: HashMap::new(),
        };
        cache.add(&root);
        cache
    }

    /// Returns the handle of `value`, appending it if not cached yet.
    pub fn add(&mut self, value: &Value) -> Handle {
        if let Some(handle) = self.find(value) {
            return handle;
        }

        let handle = Handle::from_index(self.objects.len());
        if let Some(identity) = value.identity() {
            self.by_identity.insert(identity, handle);
        }
        self.objects.push(value.clone());
        handle
    }

    fn find(&self, value: &Value) -> Option<Handle> {
        match value.identity() {
            Some(identity) => self.by_identity.get(&identity).copied(),
            None => self
                .objects
                .iter()
                .position(|cached| cached == value)
                .map(Handle::from_index),
        }
    }

    pub fn resolve(&self, handle: Handle) -> Result<Value> {
        handle
            .index()
            .and_then(|index| self.objects.get(index))
            .cloned()
            .ok_or(ProxyError::InvalidHandle { handle })
    }

    pub fn root(&self) -> &Value {
        &self.objects[0]
    }

    pub fn len(&self) -> usize {
        self.objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.objects.is_empty()
    }
}

pub type SharedCache = Arc<Mutex<ObjectCache>>;

/// Locks a shared cache, recovering from a poisoned lock.
pub fn lock_cache(cache: &SharedCache) -> MutexGuard<'_, ObjectCache> {
    cache.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Map from context identity to its object cache.
///
/// Lock-free across contexts; a cache is only ever locked for the duration of
/// one cache operation, never across native code.
pub struct ContextRegistry {
    caches: DashMap<ContextId, SharedCache>,
    root: Value,
}

impl ContextRegistry {
    pub fn new(root: Value) -> Self {
        Self {
            caches: DashMap::new(),
            root,
        }
    }

    /// Returns the context's cache, creating one rooted at the global object on first sight.
    pub fn ensure(&self, context: ContextId) -> SharedCache {
        let entry = self.caches.entry(context).or_insert_with(|| {
            tracing::debug!(%context, "Creating object cache");
            Arc::new(Mutex::new(ObjectCache::new(self.root.clone())))
        });
        Arc::clone(entry.value())
    }

    pub fn get(&self, context: ContextId) -> Option<SharedCache> {
        self.caches.get(&context).map(|entry| Arc::clone(entry.value()))
    }

    /// Drops the context's cache. Every handle it minted becomes invalid.
    pub fn destroy(&self, context: ContextId) -> bool {
        match self.caches.remove(&context) {
            Some((_, cache)) => {
                let released = lock_cache(&cache).len();
                tracing::debug!(%context, released, "Destroyed object cache");
                true
            }
            None => false,
        }
    }

    pub fn contains(&self, context: ContextId) -> bool {
        self.caches.contains_key(&context)
    }

    pub fn len(&self) -> usize {
        self.caches.len()
    }

    pub fn is_empty(&self) -> bool {
        self.caches.is_empty()
    }
}
