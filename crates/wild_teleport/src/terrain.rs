use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures::future::BoxFuture;

use crate::error::TerrainError;
use crate::types::{BlockPos, RegionArchetype, RegionCoord, WorldId};

/// Classification of a single block as seen through a terrain view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BlockInfo<'a> {
    pub name: &'a str,
    pub solid: bool,
    pub passable: bool,
}

impl BlockInfo<'static> {
    pub const AIR: BlockInfo<'static> = BlockInfo {
        name: "air",
        solid: false,
        passable: true,
    };
}

impl<'a> BlockInfo<'a> {
    pub fn solid(name: &'a str) -> Self {
        Self {
            name,
            solid: true,
            passable: false,
        }
    }

    pub fn passable(name: &'a str) -> Self {
        Self {
            name,
            solid: false,
            passable: true,
        }
    }
}

/// Read-only block data for one region. Snapshots handed out by a
/// [`TerrainProvider`] and the live world both implement it.
pub trait TerrainView {
    fn region(&self) -> RegionCoord;

    fn archetype(&self) -> RegionArchetype;

    /// Blocks outside the vertical extent read as air.
    fn block(&self, pos: BlockPos) -> BlockInfo<'_>;

    fn in_world_bounds(&self, x: i32, z: i32) -> bool;

    fn min_height(&self) -> i32;

    fn max_height(&self) -> i32;

    /// Y of the highest solid block in the column.
    fn surface_height(&self, x: i32, z: i32) -> i32;

    fn contains_column(&self, x: i32, z: i32) -> bool {
        self.region().contains_column(x, z)
    }
}

pub type SharedTerrainView = Arc<dyn TerrainView + Send + Sync>;

pub type TerrainFuture = BoxFuture<'static, Result<SharedTerrainView, TerrainError>>;

/// Resolves regions to snapshots without blocking the caller. Every
/// `acquire` call is paired with exactly one `release`, whatever the outcome
/// of the returned future.
pub trait TerrainProvider: Send + Sync {
    fn acquire(&self, world: &WorldId, region: RegionCoord) -> TerrainFuture;

    fn release(&self, world: &WorldId, region: RegionCoord);
}

#[derive(Debug, Default)]
pub(crate) struct TicketCounters {
    acquired: AtomicU64,
    released: AtomicU64,
}

impl TicketCounters {
    pub(crate) fn acquired(&self) -> u64 {
        self.acquired.load(Ordering::SeqCst)
    }

    pub(crate) fn released(&self) -> u64 {
        self.released.load(Ordering::SeqCst)
    }
}

struct ReleaseGuard {
    provider: Arc<dyn TerrainProvider>,
    counters: Arc<TicketCounters>,
    world: WorldId,
    region: RegionCoord,
}

impl Drop for ReleaseGuard {
    fn drop(&mut self) {
        self.provider.release(&self.world, self.region);
        self.counters.released.fetch_add(1, Ordering::SeqCst);
    }
}

/// A borrowed region snapshot; the region is released when the ticket drops.
pub(crate) struct TerrainTicket {
    view: SharedTerrainView,
    _guard: ReleaseGuard,
}

impl TerrainTicket {
    pub(crate) fn view(&self) -> &dyn TerrainView {
        self.view.as_ref()
    }
}

impl fmt::Debug for TerrainTicket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TerrainTicket")
            .field("world", &self._guard.world)
            .field("region", &self._guard.region)
            .finish()
    }
}

/// Provider adapter owning the acquisition timeout and ticket bookkeeping.
#[derive(Clone)]
pub(crate) struct TerrainAccess {
    provider: Arc<dyn TerrainProvider>,
    timeout: Duration,
    counters: Arc<TicketCounters>,
}

impl TerrainAccess {
    pub(crate) fn new(provider: Arc<dyn TerrainProvider>, timeout: Duration) -> Self {
        Self {
            provider,
            timeout,
            counters: Arc::new(TicketCounters::default()),
        }
    }

    pub(crate) fn counters(&self) -> &TicketCounters {
        &self.counters
    }

    pub(crate) async fn acquire(
        &self,
        world: &WorldId,
        region: RegionCoord,
    ) -> Result<TerrainTicket, TerrainError> {
        // Armed before the provider is touched so a panicking or stalled
        // acquire still gets its release.
        self.counters.acquired.fetch_add(1, Ordering::SeqCst);
        let guard = ReleaseGuard {
            provider: Arc::clone(&self.provider),
            counters: Arc::clone(&self.counters),
            world: world.clone(),
            region,
        };
        let pending = self.provider.acquire(world, region);
        match async_std::future::timeout(self.timeout, pending).await {
            Ok(Ok(view)) => Ok(TerrainTicket {
                view,
                _guard: guard,
            }),
            Ok(Err(err)) => Err(err),
            Err(_) => Err(TerrainError::Timeout {
                region,
                waited_ms: u64::try_from(self.timeout.as_millis()).unwrap_or(u64::MAX),
            }),
        }
    }
}
