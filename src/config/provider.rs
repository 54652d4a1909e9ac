/**
 * Configuration provider
 *
 * Loads `ConfigMap` and `Secret` data into a [`FlattenedMap`] once at
 * startup, then (with `reload_on_change`) keeps it current: the resource
 * watcher feeds the cache, and a reload loop rebuilds both partitions from
 * the cache on every tick where the cache changed.
 */
use super::flattened::FlattenedMap;
use super::key::convert_key;
use super::source::ResourceSource;
use crate::error::{Error, Result};
use crate::k8s::cache::errors::lock_poisoned_error;
use crate::k8s::cache::{
    Resource, ResourceCache, ResourceWatcher, SharedCache, TrackedKind, WatchSettings, lock_cache,
};
use crate::k8s::client::{ResourceClient, ResourceScope};
use crate::k8s::selector::host_identity;
use std::collections::BTreeMap;
use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, RwLock, RwLockWriteGuard};
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Flatten every field of `resources` into `(key, value)` pairs
///
/// # Errors
///
/// Returns the first key transform failure
pub fn flatten_resources(resources: &[Resource]) -> Result<Vec<(String, String)>> {
    let mut entries = Vec::new();
    for resource in resources {
        for (field, value) in &resource.fields {
            entries.push((convert_key(field, &resource.name)?, value.to_config_value()));
        }
    }
    Ok(entries)
}

struct ProviderState<C: ResourceClient> {
    client: Arc<C>,
    source: ResourceSource,
    scope: ResourceScope,
    cache: SharedCache,
    data: RwLock<FlattenedMap>,
    /// A failed reload is retried on the next tick even without new changes
    retry_pending: AtomicBool,
    reloads: watch::Sender<u64>,
}

/// Live configuration tree mirrored from `ConfigMap`s and `Secret`s
pub struct ResourceConfigProvider<C: ResourceClient> {
    state: Arc<ProviderState<C>>,
    watcher: Option<ResourceWatcher<C>>,
    cancel: CancellationToken,
    reload_loop: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ResourceClient> ResourceConfigProvider<C> {
    /// Create the provider. With `reload_on_change` the watcher and the
    /// reload loop start immediately, so this must run inside a Tokio runtime.
    /// Call [`ResourceConfigProvider::load`] for the initial data.
    ///
    /// # Errors
    ///
    /// Returns an error if the source options are invalid
    pub fn new(client: Arc<C>, source: ResourceSource) -> Result<Self> {
        source.validate()?;

        let scope = source.scope(client.default_namespace(), host_identity().as_deref());
        info!(
            "⚙️  {} for namespace {} (selector: {})",
            source,
            scope.namespace,
            scope.label_selector.as_deref().unwrap_or("<none>")
        );

        let cache = ResourceCache::shared(&TrackedKind::ALL);
        let (reloads, _) = watch::channel(0);

        let watcher = if source.reload_on_change {
            let watcher = ResourceWatcher::new(
                Arc::clone(&client),
                Arc::clone(&cache),
                WatchSettings {
                    scope: scope.clone(),
                    timeout: source.watch_timeout,
                    restart_delay: source.reload_delay,
                },
            );
            watcher.watch(&TrackedKind::ALL)?;
            watcher.start()?;
            Some(watcher)
        } else {
            None
        };

        let provider = Self {
            state: Arc::new(ProviderState {
                client,
                source,
                scope,
                cache,
                data: RwLock::new(FlattenedMap::new()),
                retry_pending: AtomicBool::new(false),
                reloads,
            }),
            watcher,
            cancel: CancellationToken::new(),
            reload_loop: Mutex::new(None),
        };

        if provider.state.source.reload_on_change {
            provider.start_reload_loop()?;
        }

        Ok(provider)
    }

    fn start_reload_loop(&self) -> Result<()> {
        let mut reload_loop = self
            .reload_loop
            .lock()
            .map_err(|_| lock_poisoned_error("reload loop handle lock poisoned"))?;
        if reload_loop.is_some() {
            return Ok(());
        }

        let state = Arc::clone(&self.state);
        let cancel = self.cancel.clone();
        *reload_loop = Some(tokio::spawn(async move {
            state.run_reload_loop(cancel).await;
        }));

        Ok(())
    }

    /// List both kinds straight from the cluster and build the map from them
    ///
    /// # Errors
    ///
    /// Returns an error if listing fails, a required source is empty, or a
    /// field cannot be turned into a key
    pub async fn load(&self) -> Result<()> {
        for kind in TrackedKind::ALL {
            let listing = self.state.client.list(kind, &self.state.scope).await?;
            info!("📥 Listed {} {} resources", listing.resources.len(), kind);
            self.state.apply(kind, &listing.resources)?;
        }

        self.state.notify_reload();
        Ok(())
    }

    /// Rebuild the map from the cache if it changed since the last call, or
    /// if the previous rebuild failed. Returns whether a rebuild happened.
    /// The reload loop calls this on every tick.
    ///
    /// # Errors
    ///
    /// Returns the first partition failure; the rebuild is retried next time
    pub fn reload_from_cache(&self) -> Result<bool> {
        self.state.reload_from_cache()
    }

    #[must_use]
    pub fn get(&self, key: &str) -> Option<String> {
        self.state.read_data(|data| data.get(key).map(str::to_string))
    }

    /// Copy of the current configuration tree
    #[must_use]
    pub fn data(&self) -> FlattenedMap {
        self.state.read_data(Clone::clone)
    }

    #[must_use]
    pub fn to_map(&self) -> BTreeMap<String, String> {
        self.state.read_data(FlattenedMap::to_map)
    }

    /// Receiver of the reload generation, bumped after every load and reload
    #[must_use]
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.state.reloads.subscribe()
    }

    #[must_use]
    pub fn source(&self) -> &ResourceSource {
        &self.state.source
    }

    #[must_use]
    pub fn scope(&self) -> &ResourceScope {
        &self.state.scope
    }

    /// Resource cache fed by the watcher
    #[must_use]
    pub fn cache(&self) -> &SharedCache {
        &self.state.cache
    }

    #[must_use]
    pub const fn watcher(&self) -> Option<&ResourceWatcher<C>> {
        self.watcher.as_ref()
    }

    /// Stop the reload loop, then the watcher. Safe to call more than once.
    pub fn dispose(&self) {
        if self.cancel.is_cancelled() {
            return;
        }
        self.cancel.cancel();

        if let Some(watcher) = &self.watcher {
            watcher.dispose();
        }
        info!("🛑 {} disposed", self.state.source);
    }
}

impl<C: ResourceClient> Drop for ResourceConfigProvider<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<C: ResourceClient> fmt::Display for ResourceConfigProvider<C> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let requirement = if self.state.source.optional {
            "Optional"
        } else {
            "Required"
        };
        write!(f, "ResourceConfigProvider ({requirement})")
    }
}

impl<C: ResourceClient> ProviderState<C> {
    async fn run_reload_loop(&self, cancel: CancellationToken) {
        info!("🔄 Reload loop started (tick {:?})", self.source.reload_delay);

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sleep(self.source.reload_delay) => {}
            }

            match self.reload_from_cache() {
                Ok(_) => {}
                // Partition failures were already logged by the reload
                Err(Error::Configuration { .. } | Error::Validation(_)) => {}
                Err(e) => error!("❌ Reload tick failed: {}", e),
            }
        }

        info!("🔄 Reload loop stopped");
    }

    fn reload_from_cache(&self) -> Result<bool> {
        let snapshots = {
            let mut cache = lock_cache(&self.cache)?;
            let dirty = cache.take_dirty();
            let retry = self.retry_pending.swap(false, Ordering::SeqCst);
            if !dirty && !retry {
                return Ok(false);
            }

            TrackedKind::ALL.map(|kind| (kind, cache.snapshot(kind)))
        };

        let mut first_error = None;
        for (kind, resources) in snapshots {
            match self.apply(kind, &resources) {
                Ok(len) => debug!("🔄 Reloaded {} partition ({} keys)", kind.partition(), len),
                Err(e) => {
                    warn!(
                        "⚠️  Reload of the {} partition failed, retrying next tick: {}",
                        kind.partition(),
                        e
                    );
                    first_error.get_or_insert(e);
                }
            }
        }

        self.notify_reload();

        match first_error {
            Some(e) => {
                self.retry_pending.store(true, Ordering::SeqCst);
                Err(e)
            }
            None => Ok(true),
        }
    }

    /// Replace the partition of `kind` with the keys derived from `resources`
    fn apply(&self, kind: TrackedKind, resources: &[Resource]) -> Result<usize> {
        if resources.is_empty() {
            self.write_data()?.clear_partition(kind);
            if !self.source.optional {
                return Err(Error::Configuration { kind });
            }
            debug!("No {} resources, leaving the {} partition empty", kind, kind.partition());
            return Ok(0);
        }

        let entries = flatten_resources(resources)?;
        let len = self.write_data()?.replace_partition(kind, entries);
        Ok(len)
    }

    fn write_data(&self) -> Result<RwLockWriteGuard<'_, FlattenedMap>> {
        self.data
            .write()
            .map_err(|_| lock_poisoned_error("configuration data lock poisoned"))
    }

    fn read_data<T>(&self, read: impl FnOnce(&FlattenedMap) -> T) -> T {
        let data = self.data.read().unwrap_or_else(PoisonError::into_inner);
        read(&data)
    }

    fn notify_reload(&self) {
        self.reloads.send_modify(|generation| *generation += 1);
    }
}
