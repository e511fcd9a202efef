use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use futures::FutureExt;

use crate::error::TerrainError;
use crate::notifier::{Notice, Notifier};
use crate::terrain::{BlockInfo, SharedTerrainView, TerrainFuture, TerrainProvider, TerrainView};
use crate::types::{ActorId, BlockPos, Location, RegionArchetype, RegionCoord, WorldId};
use crate::world::WorldAuthority;

pub(crate) fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub(crate) fn classify(name: &'static str) -> BlockInfo<'static> {
    match name {
        "air" | "cave_air" | "void_air" => BlockInfo {
            name,
            ..BlockInfo::AIR
        },
        "lava" | "water" | "fire" | "soul_fire" | "bubble_column" => BlockInfo::passable(name),
        _ => BlockInfo::solid(name),
    }
}

pub(crate) fn wait_until<F>(timeout: Duration, mut done: F) -> bool
where
    F: FnMut() -> bool,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if done() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    done()
}

/// Synthetic terrain: solid from the bottom of the world up to `ground_y`,
/// air above, with per-block overrides and lava-topped hazard columns.
#[derive(Debug, Clone)]
pub(crate) struct FlatWorld {
    archetype: RegionArchetype,
    ground_y: i32,
    min_height: i32,
    max_height: i32,
    border: i32,
    overrides: HashMap<BlockPos, &'static str>,
    hazard_columns: HashSet<(i32, i32)>,
    hazard_regions: HashSet<RegionCoord>,
}

impl FlatWorld {
    pub(crate) fn surface(ground_y: i32) -> Self {
        Self::with_archetype(RegionArchetype::Surface, ground_y)
    }

    pub(crate) fn cavern(ground_y: i32) -> Self {
        Self::with_archetype(RegionArchetype::Cavern, ground_y)
    }

    pub(crate) fn void(ground_y: i32) -> Self {
        Self::with_archetype(RegionArchetype::Void, ground_y)
    }

    fn with_archetype(archetype: RegionArchetype, ground_y: i32) -> Self {
        Self {
            archetype,
            ground_y,
            min_height: 0,
            max_height: 319,
            border: 30_000_000,
            overrides: HashMap::new(),
            hazard_columns: HashSet::new(),
            hazard_regions: HashSet::new(),
        }
    }

    pub(crate) fn with_block(mut self, pos: BlockPos, name: &'static str) -> Self {
        self.overrides.insert(pos, name);
        self
    }

    pub(crate) fn with_border(mut self, border: i32) -> Self {
        self.border = border;
        self
    }

    pub(crate) fn with_height_range(mut self, min_height: i32, max_height: i32) -> Self {
        self.min_height = min_height;
        self.max_height = max_height;
        self
    }

    pub(crate) fn with_hazard_column(mut self, x: i32, z: i32) -> Self {
        self.hazard_columns.insert((x, z));
        self
    }

    pub(crate) fn poison_region(&mut self, region: RegionCoord) {
        self.hazard_regions.insert(region);
    }

    pub(crate) fn is_hazard_column(&self, x: i32, z: i32) -> bool {
        self.hazard_columns.contains(&(x, z))
            || self.hazard_regions.contains(&RegionCoord::containing(x, z))
    }

    pub(crate) fn block_name(&self, pos: BlockPos) -> &'static str {
        if pos.y < self.min_height || pos.y > self.max_height {
            return "air";
        }
        if let Some(name) = self.overrides.get(&pos) {
            return name;
        }
        if pos.y == self.ground_y && self.is_hazard_column(pos.x, pos.z) {
            return "lava";
        }
        if pos.y == self.ground_y {
            "grass_block"
        } else if pos.y < self.ground_y {
            "stone"
        } else {
            "air"
        }
    }

    pub(crate) fn region_view(&self, region: RegionCoord) -> RegionSnapshot {
        RegionSnapshot {
            world: Arc::new(self.clone()),
            region,
        }
    }

    fn surface_height(&self, x: i32, z: i32) -> i32 {
        let mut y = self.max_height;
        while y > self.min_height {
            if classify(self.block_name(BlockPos::new(x, y, z))).solid {
                return y;
            }
            y -= 1;
        }
        self.min_height
    }
}

#[derive(Debug, Clone)]
pub(crate) struct RegionSnapshot {
    world: Arc<FlatWorld>,
    region: RegionCoord,
}

impl TerrainView for RegionSnapshot {
    fn region(&self) -> RegionCoord {
        self.region
    }

    fn archetype(&self) -> RegionArchetype {
        self.world.archetype
    }

    fn block(&self, pos: BlockPos) -> BlockInfo<'_> {
        classify(self.world.block_name(pos))
    }

    fn in_world_bounds(&self, x: i32, z: i32) -> bool {
        x.abs() <= self.world.border && z.abs() <= self.world.border
    }

    fn min_height(&self) -> i32 {
        self.world.min_height
    }

    fn max_height(&self) -> i32 {
        self.world.max_height
    }

    fn surface_height(&self, x: i32, z: i32) -> i32 {
        self.world.surface_height(x, z)
    }
}

struct PanickingView {
    region: RegionCoord,
}

impl TerrainView for PanickingView {
    fn region(&self) -> RegionCoord {
        self.region
    }

    fn archetype(&self) -> RegionArchetype {
        RegionArchetype::Surface
    }

    fn block(&self, _pos: BlockPos) -> BlockInfo<'_> {
        panic!("forced terrain read failure");
    }

    fn in_world_bounds(&self, _x: i32, _z: i32) -> bool {
        true
    }

    fn min_height(&self) -> i32 {
        0
    }

    fn max_height(&self) -> i32 {
        319
    }

    fn surface_height(&self, _x: i32, _z: i32) -> i32 {
        panic!("forced heightmap failure");
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum ProviderMode {
    Ready,
    Stall,
    Fail,
    PanicOnRead,
    PanicOnAcquire,
}

/// Terrain provider that counts acquire/release pairs and can be scripted to
/// stall, fail or panic.
pub(crate) struct CountingProvider {
    world: Arc<FlatWorld>,
    schedule: Vec<ProviderMode>,
    gate: Option<Arc<AtomicBool>>,
    calls: AtomicU64,
    acquire_calls: AtomicU64,
    release_calls: AtomicU64,
    max_outstanding: AtomicU64,
    acquisitions: Mutex<Vec<(WorldId, RegionCoord)>>,
}

impl CountingProvider {
    pub(crate) fn new(world: FlatWorld) -> Self {
        Self {
            world: Arc::new(world),
            schedule: vec![ProviderMode::Ready],
            gate: None,
            calls: AtomicU64::new(0),
            acquire_calls: AtomicU64::new(0),
            release_calls: AtomicU64::new(0),
            max_outstanding: AtomicU64::new(0),
            acquisitions: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn with_mode(self, mode: ProviderMode) -> Self {
        self.with_schedule(vec![mode])
    }

    /// Modes are applied to successive acquire calls, cycling.
    pub(crate) fn with_schedule(mut self, schedule: Vec<ProviderMode>) -> Self {
        assert!(!schedule.is_empty(), "schedule cannot be empty");
        self.schedule = schedule;
        self
    }

    /// Acquisitions stay pending until the gate is opened.
    pub(crate) fn with_gate(mut self, gate: Arc<AtomicBool>) -> Self {
        self.gate = Some(gate);
        self
    }

    pub(crate) fn acquire_calls(&self) -> u64 {
        self.acquire_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn release_calls(&self) -> u64 {
        self.release_calls.load(Ordering::SeqCst)
    }

    pub(crate) fn max_outstanding(&self) -> u64 {
        self.max_outstanding.load(Ordering::SeqCst)
    }

    pub(crate) fn acquisitions(&self) -> Vec<(WorldId, RegionCoord)> {
        self.acquisitions.lock().expect("lock acquisitions").clone()
    }
}

impl TerrainProvider for CountingProvider {
    fn acquire(&self, world: &WorldId, region: RegionCoord) -> TerrainFuture {
        let acquired = self.acquire_calls.fetch_add(1, Ordering::SeqCst) + 1;
        let outstanding = acquired - self.release_calls.load(Ordering::SeqCst);
        self.max_outstanding.fetch_max(outstanding, Ordering::SeqCst);
        self.acquisitions
            .lock()
            .expect("lock acquisitions")
            .push((world.clone(), region));

        let index = self.calls.fetch_add(1, Ordering::SeqCst) as usize;
        let mode = self.schedule[index % self.schedule.len()];
        if mode == ProviderMode::PanicOnAcquire {
            panic!("forced terrain acquire failure");
        }
        let snapshot = self.world.region_view(region);
        let gate = self.gate.clone();
        async move {
            if let Some(gate) = gate {
                while !gate.load(Ordering::SeqCst) {
                    async_std::task::sleep(Duration::from_millis(2)).await;
                }
            }
            match mode {
                ProviderMode::Ready => Ok(Arc::new(snapshot) as SharedTerrainView),
                ProviderMode::Stall => {
                    futures::future::pending::<Result<SharedTerrainView, TerrainError>>().await
                }
                ProviderMode::Fail => Err(TerrainError::LoadFailed {
                    region,
                    reason: "forced load failure".to_string(),
                }),
                ProviderMode::PanicOnRead => {
                    Ok(Arc::new(PanickingView { region }) as SharedTerrainView)
                }
                ProviderMode::PanicOnAcquire => unreachable!("panicked before the future"),
            }
        }
        .boxed()
    }

    fn release(&self, _world: &WorldId, _region: RegionCoord) {
        self.release_calls.fetch_add(1, Ordering::SeqCst);
    }
}

#[derive(Debug)]
pub(crate) struct FakeWorldState {
    pub(crate) terrain: FlatWorld,
    pub(crate) actors: HashMap<ActorId, Location>,
    pub(crate) relocations: Vec<(ActorId, Location)>,
    pub(crate) return_locations: Vec<(ActorId, Location)>,
    pub(crate) warmed: Vec<RegionCoord>,
    pub(crate) live_checks: Vec<ActorId>,
    /// Re-checks that first turn the candidate's whole region into lava.
    pub(crate) edits_before_recheck: usize,
    pub(crate) edited_regions: Vec<RegionCoord>,
}

/// World authority backed by a shared [`FakeWorldState`] the test can inspect.
#[derive(Debug, Clone)]
pub(crate) struct FakeWorld {
    state: Arc<Mutex<FakeWorldState>>,
}

impl FakeWorld {
    pub(crate) fn new(terrain: FlatWorld) -> Self {
        Self {
            state: Arc::new(Mutex::new(FakeWorldState {
                terrain,
                actors: HashMap::new(),
                relocations: Vec::new(),
                return_locations: Vec::new(),
                warmed: Vec::new(),
                live_checks: Vec::new(),
                edits_before_recheck: 0,
                edited_regions: Vec::new(),
            })),
        }
    }

    pub(crate) fn state(&self) -> MutexGuard<'_, FakeWorldState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub(crate) fn join(&self, actor: &ActorId, location: Location) {
        self.state().actors.insert(actor.clone(), location);
    }

    pub(crate) fn disconnect(&self, actor: &ActorId) {
        self.state().actors.remove(actor);
    }
}

struct LiveRegion<'a> {
    state: MutexGuard<'a, FakeWorldState>,
    region: RegionCoord,
}

impl TerrainView for LiveRegion<'_> {
    fn region(&self) -> RegionCoord {
        self.region
    }

    fn archetype(&self) -> RegionArchetype {
        self.state.terrain.archetype
    }

    fn block(&self, pos: BlockPos) -> BlockInfo<'_> {
        classify(self.state.terrain.block_name(pos))
    }

    fn in_world_bounds(&self, x: i32, z: i32) -> bool {
        x.abs() <= self.state.terrain.border && z.abs() <= self.state.terrain.border
    }

    fn min_height(&self) -> i32 {
        self.state.terrain.min_height
    }

    fn max_height(&self) -> i32 {
        self.state.terrain.max_height
    }

    fn surface_height(&self, x: i32, z: i32) -> i32 {
        self.state.terrain.surface_height(x, z)
    }
}

impl WorldAuthority for FakeWorld {
    fn is_actor_live(&self, actor: &ActorId) -> bool {
        let mut state = self.state();
        state.live_checks.push(actor.clone());
        state.actors.contains_key(actor)
    }

    fn actor_location(&self, actor: &ActorId) -> Option<Location> {
        self.state().actors.get(actor).cloned()
    }

    fn live_view(&self, _world: &WorldId, region: RegionCoord) -> Option<Box<dyn TerrainView + '_>> {
        let mut state = self.state();
        if state.edits_before_recheck > 0 {
            state.edits_before_recheck -= 1;
            state.terrain.poison_region(region);
            state.edited_regions.push(region);
        }
        Some(Box::new(LiveRegion { state, region }))
    }

    fn relocate(&mut self, actor: &ActorId, destination: Location) {
        let mut state = self.state();
        state.actors.insert(actor.clone(), destination.clone());
        state.relocations.push((actor.clone(), destination));
    }

    fn record_return_location(&mut self, actor: &ActorId, previous: Location) {
        self.state().return_locations.push((actor.clone(), previous));
    }

    fn request_region_warm(&mut self, _world: &WorldId, region: RegionCoord) {
        self.state().warmed.push(region);
    }
}

#[derive(Debug, Default)]
pub(crate) struct RecordingNotifier {
    notices: Mutex<Vec<(ActorId, Notice)>>,
    fail_delivery: AtomicBool,
    panic_on_result_for: Option<ActorId>,
}

impl RecordingNotifier {
    pub(crate) fn failing() -> Self {
        Self {
            fail_delivery: AtomicBool::new(true),
            ..Self::default()
        }
    }

    /// Panics while delivering `actor`'s final teleport or failure notice.
    pub(crate) fn panicking_on_result_for(actor: &ActorId) -> Self {
        Self {
            panic_on_result_for: Some(actor.clone()),
            ..Self::default()
        }
    }

    pub(crate) fn notices_for(&self, actor: &ActorId) -> Vec<Notice> {
        self.notices
            .lock()
            .expect("lock notices")
            .iter()
            .filter(|(target, _)| target == actor)
            .map(|(_, notice)| notice.clone())
            .collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, actor: &ActorId, notice: &Notice) -> Result<(), String> {
        self.notices
            .lock()
            .expect("lock notices")
            .push((actor.clone(), notice.clone()));
        let is_result = matches!(notice, Notice::Teleported { .. } | Notice::Failed { .. });
        if is_result && self.panic_on_result_for.as_ref() == Some(actor) {
            panic!("chat bridge crashed delivering to {actor}");
        }
        if self.fail_delivery.load(Ordering::SeqCst) {
            return Err("chat bridge offline".to_string());
        }
        Ok(())
    }
}
