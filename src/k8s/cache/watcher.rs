/**
 * Resource watch supervisor
 *
 * Keeps one watch stream open per tracked kind and mirrors its events into
 * the shared resource cache. A stream that errors or closes releases its
 * handle and marks the kind for restart; a single background loop reopens
 * marked kinds on a fixed tick, forever. Every reopen lists the kind first
 * and replaces its cache entries with the listing, so deletions missed while
 * no stream was attached do not survive, then watches from the listing's
 * resource version.
 *
 * Lock order: the handle table lock and the cache lock are never held
 * together. Event handlers only touch the cache; the restart path takes
 * the cache lock for the replace and releases it before attaching.
 */
use super::errors::{lock_poisoned_error, unregistered_kind_error};
use super::resource::{ResourceEvent, TrackedKind};
use super::store::{SharedCache, lock_cache};
use crate::error::{Error, Result};
use crate::k8s::client::{ResourceClient, ResourceScope, WatchStream};
use futures::StreamExt;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Observable state of one kind's watch
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchState {
    /// A stream is attached and feeding the cache
    Running,
    /// No stream is attached; the restart loop will open one
    NeedsRestart,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WatchStats {
    pub tracked_kinds: usize,
    pub active_watchers: usize,
    pub pending_restarts: usize,
    pub total_restarts: u64,
    pub total_events: u64,
}

/// Parameters shared by every watch the supervisor opens
#[derive(Debug, Clone)]
pub struct WatchSettings {
    pub scope: ResourceScope,
    /// Server-side timeout of each watch request
    pub timeout: Duration,
    /// Tick of the restart loop, and so the floor between two attempts
    pub restart_delay: Duration,
}

/// Consumer task of one open stream
struct WatchHandle {
    task: JoinHandle<()>,
}

impl WatchHandle {
    fn close(self) {
        self.task.abort();
    }
}

/// Exactly one of `handle.is_some()` and `needs_restart` holds outside of a
/// table mutation.
struct WatchSlot {
    handle: Option<WatchHandle>,
    needs_restart: bool,
    /// Bumped on every attach so a stale consumer cannot flag its successor
    generation: u64,
}

impl WatchSlot {
    const fn pending() -> Self {
        Self {
            handle: None,
            needs_restart: true,
            generation: 0,
        }
    }
}

#[derive(Default)]
struct HandleTable {
    slots: BTreeMap<TrackedKind, WatchSlot>,
    disposed: bool,
}

struct Supervisor<C: ResourceClient> {
    client: Arc<C>,
    cache: SharedCache,
    settings: WatchSettings,
    table: Mutex<HandleTable>,
    total_restarts: AtomicU64,
    total_events: AtomicU64,
}

/// Supervises one watch stream per tracked kind
pub struct ResourceWatcher<C: ResourceClient> {
    supervisor: Arc<Supervisor<C>>,
    cancel: CancellationToken,
    restart_loop: Mutex<Option<JoinHandle<()>>>,
}

impl<C: ResourceClient> ResourceWatcher<C> {
    /// Create a watcher that tracks no kinds yet. Nothing runs until
    /// [`ResourceWatcher::start`] is called.
    #[must_use]
    pub fn new(client: Arc<C>, cache: SharedCache, settings: WatchSettings) -> Self {
        Self {
            supervisor: Arc::new(Supervisor {
                client,
                cache,
                settings,
                table: Mutex::new(HandleTable::default()),
                total_restarts: AtomicU64::new(0),
                total_events: AtomicU64::new(0),
            }),
            cancel: CancellationToken::new(),
            restart_loop: Mutex::new(None),
        }
    }

    /// Spawn the restart loop. Calling this again while the loop runs, or
    /// after disposal, does nothing.
    ///
    /// # Errors
    ///
    /// Returns an error if the loop handle lock is poisoned
    pub fn start(&self) -> Result<()> {
        let mut restart_loop = self
            .restart_loop
            .lock()
            .map_err(|_| lock_poisoned_error("restart loop handle lock poisoned"))?;

        if restart_loop.is_some() || self.cancel.is_cancelled() {
            return Ok(());
        }

        let supervisor = Arc::clone(&self.supervisor);
        let cancel = self.cancel.clone();
        *restart_loop = Some(tokio::spawn(async move {
            supervisor.run_restart_loop(cancel).await;
        }));

        Ok(())
    }

    /// Begin tracking `kinds`. Unknown kinds are registered with the cache and
    /// start out marked for restart, so the next tick opens their streams.
    ///
    /// # Errors
    ///
    /// Returns an error if a lock is poisoned
    pub fn watch(&self, kinds: &[TrackedKind]) -> Result<()> {
        {
            let mut cache = lock_cache(&self.supervisor.cache)?;
            for kind in kinds {
                cache.register(*kind);
            }
        }

        let mut table = self.supervisor.lock_table()?;
        if table.disposed {
            return Ok(());
        }
        for kind in kinds {
            if !table.slots.contains_key(kind) {
                info!("🔍 Tracking {} resources", kind);
                table.slots.insert(*kind, WatchSlot::pending());
            }
        }

        Ok(())
    }

    /// Try once to relist and reopen every kind marked for restart and return
    /// how many were attached. This is the body of one restart-loop tick.
    ///
    /// # Errors
    ///
    /// Returns an error if the handle table lock is poisoned
    pub async fn restart_marked(&self) -> Result<usize> {
        self.supervisor.restart_marked().await
    }

    /// # Errors
    ///
    /// Returns an invariant error if `kind` is not tracked
    pub fn state(&self, kind: TrackedKind) -> Result<WatchState> {
        let table = self.supervisor.lock_table()?;
        let slot = table
            .slots
            .get(&kind)
            .ok_or_else(|| unregistered_kind_error(kind, "resource watcher"))?;

        Ok(if slot.needs_restart {
            WatchState::NeedsRestart
        } else {
            WatchState::Running
        })
    }

    #[must_use]
    pub fn stats(&self) -> WatchStats {
        let (tracked_kinds, active_watchers, pending_restarts) =
            self.supervisor.lock_table().map_or((0, 0, 0), |table| {
                (
                    table.slots.len(),
                    table.slots.values().filter(|s| s.handle.is_some()).count(),
                    table.slots.values().filter(|s| s.needs_restart).count(),
                )
            });

        WatchStats {
            tracked_kinds,
            active_watchers,
            pending_restarts,
            total_restarts: self.supervisor.total_restarts.load(Ordering::Relaxed),
            total_events: self.supervisor.total_events.load(Ordering::Relaxed),
        }
    }

    #[must_use]
    pub fn is_disposed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Stop the restart loop, then close every attached stream. Kinds marked
    /// for restart have already released their handle and are skipped. Safe
    /// to call more than once.
    pub fn dispose(&self) {
        self.cancel.cancel();

        let mut table = self
            .supervisor
            .table
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        if table.disposed {
            return;
        }
        table.disposed = true;

        let mut closed = 0;
        for (kind, slot) in &mut table.slots {
            if slot.needs_restart {
                continue;
            }
            if let Some(handle) = slot.handle.take() {
                debug!("Closing {} watch", kind);
                handle.close();
                closed += 1;
            }
        }

        info!("🛑 Resource watcher disposed ({} streams closed)", closed);
    }
}

impl<C: ResourceClient> Drop for ResourceWatcher<C> {
    fn drop(&mut self) {
        self.dispose();
    }
}

impl<C: ResourceClient> Supervisor<C> {
    fn lock_table(&self) -> Result<MutexGuard<'_, HandleTable>> {
        self.table
            .lock()
            .map_err(|_| lock_poisoned_error("watch handle table lock poisoned"))
    }

    async fn run_restart_loop(self: Arc<Self>, cancel: CancellationToken) {
        info!(
            "🔁 Watch restart loop started (tick {:?})",
            self.settings.restart_delay
        );

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                () = sleep(self.settings.restart_delay) => {}
            }

            if let Err(e) = self.restart_marked().await {
                error!("❌ Watch restart tick failed: {}", e);
            }
        }

        info!("🔁 Watch restart loop stopped");
    }

    fn pending_restarts(&self) -> Result<Vec<TrackedKind>> {
        let table = self.lock_table()?;
        if table.disposed {
            return Ok(Vec::new());
        }

        Ok(table
            .slots
            .iter()
            .filter(|(_, slot)| slot.needs_restart)
            .map(|(kind, _)| *kind)
            .collect())
    }

    async fn restart_marked(self: &Arc<Self>) -> Result<usize> {
        let mut attached = 0;

        for kind in self.pending_restarts()? {
            match self.resync(kind).await {
                Ok(stream) => {
                    if self.attach(kind, stream)? {
                        attached += 1;
                    }
                }
                Err(e) => {
                    warn!(
                        "❌ Failed to open {} watch, retrying in {:?}: {}",
                        kind, self.settings.restart_delay, e
                    );
                }
            }
        }

        Ok(attached)
    }

    /// List `kind`, open a watch from the listing's version and make the
    /// listing the cache's content for `kind`. No lock is held across the
    /// network calls.
    async fn resync(&self, kind: TrackedKind) -> Result<WatchStream> {
        let listing = self.client.list(kind, &self.settings.scope).await?;
        let stream = self
            .client
            .watch(
                kind,
                &self.settings.scope,
                &listing.resource_version,
                self.settings.timeout,
            )
            .await?;

        debug!(
            "{} listed {} resources at version {:?}",
            kind,
            listing.resources.len(),
            listing.resource_version
        );
        lock_cache(&self.cache)?.replace(kind, listing.resources)?;

        Ok(stream)
    }

    fn attach(self: &Arc<Self>, kind: TrackedKind, stream: WatchStream) -> Result<bool> {
        let mut table = self.lock_table()?;
        if table.disposed {
            debug!("Dropping {} stream opened during disposal", kind);
            return Ok(false);
        }

        let Some(slot) = table.slots.get_mut(&kind) else {
            return Err(unregistered_kind_error(kind, "resource watcher"));
        };
        if !slot.needs_restart {
            return Ok(false);
        }

        if let Some(stale) = slot.handle.take() {
            stale.close();
        }

        slot.generation += 1;
        let generation = slot.generation;
        let supervisor = Arc::clone(self);
        let task = tokio::spawn(async move {
            supervisor.consume(kind, generation, stream).await;
        });

        slot.handle = Some(WatchHandle { task });
        slot.needs_restart = false;
        self.total_restarts.fetch_add(1, Ordering::Relaxed);

        info!("🔍 {} watch attached (generation {})", kind, generation);
        Ok(true)
    }

    /// Apply stream events to the cache in arrival order until the stream
    /// fails or ends
    async fn consume(&self, kind: TrackedKind, generation: u64, mut stream: WatchStream) {
        while let Some(event) = stream.next().await {
            let applied = match event {
                ResourceEvent::Added(resource) | ResourceEvent::Modified(resource) => {
                    self.total_events.fetch_add(1, Ordering::Relaxed);
                    lock_cache(&self.cache).and_then(|mut cache| cache.store(kind, resource))
                }
                ResourceEvent::Deleted(resource) => {
                    self.total_events.fetch_add(1, Ordering::Relaxed);
                    lock_cache(&self.cache).and_then(|mut cache| cache.remove(kind, &resource.uid))
                }
                ResourceEvent::Error(message) => {
                    warn!("⚠️  {} watch failed: {}", kind, message);
                    self.signal_restart(kind, generation);
                    return;
                }
            };

            match applied {
                Ok(()) => {}
                Err(Error::Validation(message)) => {
                    warn!("Skipping {} event: {}", kind, message);
                }
                Err(e) => {
                    error!("❌ {} watch cannot update the cache: {}", kind, e);
                }
            }
        }

        info!("{} watch stream closed", kind);
        self.signal_restart(kind, generation);
    }

    /// Release the handle of `generation` and mark the kind for restart
    fn signal_restart(&self, kind: TrackedKind, generation: u64) {
        let mut table = match self.lock_table() {
            Ok(table) => table,
            Err(e) => {
                error!("❌ Cannot schedule {} watch restart: {}", kind, e);
                return;
            }
        };
        if table.disposed {
            return;
        }

        let Some(slot) = table.slots.get_mut(&kind) else {
            return;
        };
        if slot.generation != generation || slot.needs_restart {
            return;
        }

        // The calling task is the handle's own consumer, so dropping the
        // handle only detaches it
        drop(slot.handle.take());
        slot.needs_restart = true;

        debug!(
            "{} watch marked for restart in {:?}",
            kind, self.settings.restart_delay
        );
    }
}
