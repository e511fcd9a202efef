use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use futures::executor::ThreadPool;

mod config;
mod error;
mod notifier;
mod queue;
mod runtime_util;
mod safety;
mod search;
mod teleport;
mod terrain;
mod types;
mod world;

#[cfg(test)]
mod test_support;

pub use config::{VerticalBounds, WildTeleportConfig};
pub use error::{SearchFailure, TeleportError, TerrainError};
pub use notifier::{Notice, Notifier, SilentNotifier};
pub use safety::{evaluate, is_safe, SafetyRules, UnsafeReason};
pub use terrain::{BlockInfo, SharedTerrainView, TerrainFuture, TerrainProvider, TerrainView};
pub use types::{
    ActorId, BlockPos, Candidate, Location, RegionArchetype, RegionCoord, Request, SearchOutcome,
    SubmitOutcome, WorldId, REGION_SIZE,
};
pub use world::{
    spawn_world_thread, world_channel, WorldAuthority, WorldHandle, WorldInbox, WorldTask,
    WorldThread,
};

use notifier::NoticeSender;
use queue::{SearchStats, TeleportQueue};
use runtime_util::lock;
use search::SearchEngine;
use terrain::TerrainAccess;

const WORKER_NAME_PREFIX: &str = "wild-teleport-worker-";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceSnapshot {
    pub running: bool,
    pub queued: usize,
    pub pending: usize,
    pub in_flight: bool,
    pub completed: u64,
    pub exhausted: u64,
    pub abandoned: u64,
    pub dropped: u64,
    pub tickets_acquired: u64,
    pub tickets_released: u64,
}

/// Everything that only exists between `start` and `stop`.
struct ServiceRuntime {
    pool: ThreadPool,
    queue: Arc<TeleportQueue>,
}

/// Random teleport scheduler: admits requests, searches them one at a time
/// on a small worker pool and hands each safe spot to the world thread.
pub struct WildTeleportService {
    config: Arc<WildTeleportConfig>,
    rules: Arc<SafetyRules>,
    terrain: TerrainAccess,
    world: WorldHandle,
    notices: NoticeSender,
    stats: Arc<SearchStats>,
    running: AtomicBool,
    runtime: Mutex<Option<ServiceRuntime>>,
}

impl fmt::Debug for WildTeleportService {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WildTeleportService")
            .field("config", &self.config)
            .field("snapshot", &self.snapshot())
            .finish()
    }
}

impl WildTeleportService {
    pub fn new(
        config: WildTeleportConfig,
        terrain: Arc<dyn TerrainProvider>,
        world: WorldHandle,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, TeleportError> {
        config.validate()?;
        let rules = Arc::new(SafetyRules::from_config(&config));
        let terrain = TerrainAccess::new(terrain, config.terrain_timeout());
        Ok(Self {
            config: Arc::new(config),
            rules,
            terrain,
            world,
            notices: NoticeSender::new(notifier),
            stats: Arc::new(SearchStats::default()),
            running: AtomicBool::new(false),
            runtime: Mutex::new(None),
        })
    }

    pub fn config(&self) -> &WildTeleportConfig {
        &self.config
    }

    pub fn start(&mut self) -> Result<(), TeleportError> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(TeleportError::AlreadyRunning);
        }

        let pool = match ThreadPool::builder()
            .pool_size(self.config.worker_threads)
            .name_prefix(WORKER_NAME_PREFIX)
            .create()
        {
            Ok(pool) => pool,
            Err(err) => {
                self.running.store(false, Ordering::SeqCst);
                return Err(TeleportError::ThreadPoolFailed {
                    reason: err.to_string(),
                });
            }
        };

        // Fresh per start so a search left over from a previous run never
        // picks up new requests.
        let accepting = Arc::new(AtomicBool::new(true));
        let engine = SearchEngine::new(
            Arc::clone(&self.config),
            Arc::clone(&self.rules),
            self.terrain.clone(),
            self.world.clone(),
            self.notices.clone(),
            Arc::clone(&accepting),
        );
        let queue = Arc::new(TeleportQueue::new(
            engine,
            self.world.clone(),
            self.notices.clone(),
            Arc::clone(&self.stats),
            accepting,
        ));
        *lock(&self.runtime) = Some(ServiceRuntime { pool, queue });
        log::info!(
            "wild teleport service started workers={} radius={}..{} max_attempts={}",
            self.config.worker_threads,
            self.config.min_radius,
            self.config.max_radius,
            self.config.max_attempts
        );
        Ok(())
    }

    pub fn stop(&mut self) -> Result<(), TeleportError> {
        if !self.running.load(Ordering::SeqCst) {
            return Err(TeleportError::NotRunning);
        }
        self.shutdown();
        Ok(())
    }

    fn shutdown(&self) {
        let runtime = lock(&self.runtime).take();
        if let Some(runtime) = runtime {
            let drained = runtime.queue.drain();
            log::info!("wild teleport service stopped drained={}", drained);
            // Worker threads exit once the last in-flight task lets go of
            // its pool handle.
            drop(runtime.pool);
        }
        self.running.store(false, Ordering::SeqCst);
    }

    /// Admits a request for `actor` starting from `origin`.
    pub fn submit(&self, actor: ActorId, origin: Location) -> Result<SubmitOutcome, TeleportError> {
        let (queue, pool) = match lock(&self.runtime).as_ref() {
            Some(runtime) => (Arc::clone(&runtime.queue), runtime.pool.clone()),
            None => return Err(TeleportError::NotRunning),
        };
        Ok(queue.submit(&pool, actor, origin))
    }

    pub fn is_pending(&self, actor: &ActorId) -> bool {
        lock(&self.runtime)
            .as_ref()
            .map(|runtime| runtime.queue.is_pending(actor))
            .unwrap_or(false)
    }

    pub fn snapshot(&self) -> ServiceSnapshot {
        let counts = lock(&self.runtime)
            .as_ref()
            .map(|runtime| runtime.queue.counts());
        let tickets = self.terrain.counters();
        ServiceSnapshot {
            running: self.running.load(Ordering::SeqCst),
            queued: counts.map(|c| c.queued).unwrap_or(0),
            pending: counts.map(|c| c.pending).unwrap_or(0),
            in_flight: counts.map(|c| c.in_flight).unwrap_or(false),
            completed: self.stats.completed(),
            exhausted: self.stats.exhausted(),
            abandoned: self.stats.abandoned(),
            dropped: self.stats.dropped(),
            tickets_acquired: tickets.acquired(),
            tickets_released: tickets.released(),
        }
    }
}

impl Drop for WildTeleportService {
    fn drop(&mut self) {
        if !self.running.load(Ordering::SeqCst) {
            return;
        }
        self.shutdown();
    }
}
