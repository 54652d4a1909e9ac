use super::errors::{lock_poisoned_error, missing_uid_error, unregistered_kind_error};
use super::resource::{Resource, TrackedKind};
use crate::error::Result;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};
use tracing::debug;

/// The cache behind the lock shared by the watcher's event handlers and the
/// reload loop
pub type SharedCache = Arc<Mutex<ResourceCache>>;

/// Latest known version of every tracked resource, partitioned by kind and
/// keyed by UID. `dirty` is raised by every mutation and cleared only by
/// [`ResourceCache::take_dirty`].
#[derive(Debug, Default)]
pub struct ResourceCache {
    entries: HashMap<TrackedKind, BTreeMap<String, Resource>>,
    dirty: bool,
}

impl ResourceCache {
    /// Create a cache that accepts mutations for `kinds`
    #[must_use]
    pub fn new(kinds: &[TrackedKind]) -> Self {
        let mut cache = Self::default();
        for kind in kinds {
            cache.register(*kind);
        }
        cache
    }

    #[must_use]
    pub fn shared(kinds: &[TrackedKind]) -> SharedCache {
        Arc::new(Mutex::new(Self::new(kinds)))
    }

    /// Start accepting mutations for `kind`. Registering twice is a no-op.
    pub fn register(&mut self, kind: TrackedKind) {
        self.entries.entry(kind).or_default();
    }

    #[must_use]
    pub fn is_registered(&self, kind: TrackedKind) -> bool {
        self.entries.contains_key(&kind)
    }

    /// Insert or replace the entry for `resource.uid`
    ///
    /// # Errors
    ///
    /// Returns an error if the resource has no UID or `kind` was never registered
    pub fn store(&mut self, kind: TrackedKind, resource: Resource) -> Result<()> {
        if resource.uid.trim().is_empty() {
            return Err(missing_uid_error(kind, &resource.name));
        }

        let table = self
            .entries
            .get_mut(&kind)
            .ok_or_else(|| unregistered_kind_error(kind, "resource cache"))?;

        debug!("💾 Cache STORE: {}/{} ({})", kind, resource.name, resource.uid);
        table.insert(resource.uid.clone(), resource);
        self.dirty = true;

        Ok(())
    }

    /// Drop the entry for `uid`. The cache is marked dirty even when nothing
    /// was removed.
    ///
    /// # Errors
    ///
    /// Returns an error if `kind` was never registered
    pub fn remove(&mut self, kind: TrackedKind, uid: &str) -> Result<()> {
        let table = self
            .entries
            .get_mut(&kind)
            .ok_or_else(|| unregistered_kind_error(kind, "resource cache"))?;

        if table.remove(uid).is_some() {
            debug!("🗑️  Cache REMOVE: {} {}", kind, uid);
        } else {
            debug!("Cache REMOVE of unknown {} {}", kind, uid);
        }
        self.dirty = true;

        Ok(())
    }

    /// Make `resources` the complete content of `kind`. Entries missing from
    /// `resources` are dropped. The cache is marked dirty only when the
    /// content actually changed.
    ///
    /// # Errors
    ///
    /// Returns an error if a resource has no UID or `kind` was never registered
    pub fn replace(&mut self, kind: TrackedKind, resources: Vec<Resource>) -> Result<()> {
        let mut fresh = BTreeMap::new();
        for resource in resources {
            if resource.uid.trim().is_empty() {
                return Err(missing_uid_error(kind, &resource.name));
            }
            fresh.insert(resource.uid.clone(), resource);
        }

        let table = self
            .entries
            .get_mut(&kind)
            .ok_or_else(|| unregistered_kind_error(kind, "resource cache"))?;

        if *table != fresh {
            debug!(
                "♻️  Cache REPLACE: {} ({} -> {} entries)",
                kind,
                table.len(),
                fresh.len()
            );
            *table = fresh;
            self.dirty = true;
        }

        Ok(())
    }

    /// Point-in-time copy of every resource of `kind`, empty for unknown kinds
    #[must_use]
    pub fn snapshot(&self, kind: TrackedKind) -> Vec<Resource> {
        self.entries
            .get(&kind)
            .map(|table| table.values().cloned().collect())
            .unwrap_or_default()
    }

    #[must_use]
    pub const fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Read and clear the dirty flag
    pub fn take_dirty(&mut self) -> bool {
        std::mem::replace(&mut self.dirty, false)
    }

    #[must_use]
    pub fn len(&self, kind: TrackedKind) -> usize {
        self.entries.get(&kind).map_or(0, BTreeMap::len)
    }
}

/// Lock the shared cache, mapping poisoning to a crate error
///
/// # Errors
///
/// Returns an error if a previous holder panicked
pub fn lock_cache(cache: &SharedCache) -> Result<MutexGuard<'_, ResourceCache>> {
    cache
        .lock()
        .map_err(|_| lock_poisoned_error("resource cache lock poisoned"))
}
