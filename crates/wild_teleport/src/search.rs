//! Safe-spot search.
//!
//! One request is driven by an explicit loop over a [`SearchState`]: every
//! attempt samples a column, borrows its region, scans it for a spot and,
//! when one passes, hands it to the world thread for the final re-check. A
//! rejected or raced candidate simply becomes the next attempt.

use std::f64::consts::TAU;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::config::{VerticalBounds, WildTeleportConfig};
use crate::error::SearchFailure;
use crate::notifier::{Notice, NoticeSender};
use crate::runtime_util::lock;
use crate::safety::{self, SafetyRules};
use crate::teleport::{execute_teleport, TeleportStep};
use crate::terrain::{TerrainAccess, TerrainView};
use crate::types::{ActorId, BlockPos, Candidate, Location, RegionArchetype, Request, SearchOutcome};
use crate::world::WorldHandle;

#[derive(Debug, Clone)]
pub(crate) struct SearchState {
    pub(crate) request: Request,
    pub(crate) attempts: u32,
    next_progress_at: u32,
    progress_interval: u32,
}

impl SearchState {
    pub(crate) fn new(request: Request, progress_interval: u32) -> Self {
        Self {
            request,
            attempts: 0,
            next_progress_at: progress_interval,
            progress_interval,
        }
    }

    fn begin_attempt(&mut self) {
        self.attempts += 1;
    }

    /// True once per `progress_interval` failed attempts.
    fn progress_due(&mut self) -> bool {
        if self.attempts < self.next_progress_at {
            return false;
        }
        self.next_progress_at = self.attempts + self.progress_interval;
        true
    }
}

pub(crate) struct SearchEngine {
    config: Arc<WildTeleportConfig>,
    rules: Arc<SafetyRules>,
    terrain: TerrainAccess,
    world: WorldHandle,
    notices: NoticeSender,
    running: Arc<AtomicBool>,
    rng: Mutex<StdRng>,
}

impl SearchEngine {
    pub(crate) fn new(
        config: Arc<WildTeleportConfig>,
        rules: Arc<SafetyRules>,
        terrain: TerrainAccess,
        world: WorldHandle,
        notices: NoticeSender,
        running: Arc<AtomicBool>,
    ) -> Self {
        let rng = match config.rng_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        Self {
            config,
            rules,
            terrain,
            world,
            notices,
            running,
            rng: Mutex::new(rng),
        }
    }

    pub(crate) async fn run(&self, request: &Request) -> SearchOutcome {
        let mut state = SearchState::new(request.clone(), self.config.progress_interval);
        loop {
            if state.attempts >= self.config.max_attempts {
                return SearchOutcome::Exhausted {
                    attempts: state.attempts,
                };
            }
            if state.attempts > 0 && !self.still_wanted(&state.request.actor).await {
                log::debug!(
                    "wild teleport abandoned actor={} attempts={} failure={}",
                    state.request.actor,
                    state.attempts,
                    SearchFailure::ActorGone
                );
                return SearchOutcome::Abandoned {
                    attempts: state.attempts,
                };
            }

            state.begin_attempt();
            let failure = match self.find_candidate(&state.request).await {
                Ok(candidate) => match self.try_teleport(&state.request.actor, &candidate).await {
                    Ok(TeleportStep::Teleported) => {
                        return SearchOutcome::Teleported {
                            candidate,
                            attempts: state.attempts,
                        }
                    }
                    Ok(TeleportStep::RaceInvalidated(reason)) => {
                        log::debug!(
                            "wild teleport candidate changed before relocation actor={} position={} reason={:?}",
                            state.request.actor,
                            candidate.position,
                            reason
                        );
                        SearchFailure::TeleportRaceInvalidated
                    }
                    Ok(TeleportStep::ActorGone) => {
                        return SearchOutcome::Abandoned {
                            attempts: state.attempts,
                        }
                    }
                    Err(err) => {
                        log::warn!(
                            "wild teleport abandoned actor={} err={}",
                            state.request.actor,
                            err
                        );
                        return SearchOutcome::Abandoned {
                            attempts: state.attempts,
                        };
                    }
                },
                Err(failure) => failure,
            };
            log::debug!(
                "wild teleport attempt failed actor={} attempt={} failure={}",
                state.request.actor,
                state.attempts,
                failure
            );

            if state.attempts < self.config.max_attempts && state.progress_due() {
                self.notices.send(
                    &state.request.actor,
                    Notice::Searching {
                        attempts: state.attempts,
                    },
                );
            }
        }
    }

    async fn still_wanted(&self, actor: &ActorId) -> bool {
        if !self.running.load(Ordering::SeqCst) {
            return false;
        }
        let actor = actor.clone();
        matches!(
            self.world.call(move |world| world.is_actor_live(&actor)).await,
            Ok(true)
        )
    }

    async fn try_teleport(
        &self,
        actor: &ActorId,
        candidate: &Candidate,
    ) -> Result<TeleportStep, crate::TeleportError> {
        let actor = actor.clone();
        let candidate = candidate.clone();
        let rules = Arc::clone(&self.rules);
        self.world
            .call(move |world| execute_teleport(world, &actor, &candidate, &rules))
            .await
    }

    async fn find_candidate(&self, request: &Request) -> Result<Candidate, SearchFailure> {
        let (x, z) = self.sample_column(&request.origin);
        let region = BlockPos::new(x, 0, z).region();
        let ticket = self
            .terrain
            .acquire(&request.world, region)
            .await
            .map_err(|err| {
                log::debug!(
                    "wild teleport terrain unavailable actor={} err={}",
                    request.actor,
                    err
                );
                SearchFailure::ChunkLoadFailure
            })?;
        let position = scan_column(ticket.view(), x, z, &self.config, &self.rules)
            .ok_or(SearchFailure::UnsafeCandidate)?;
        Ok(Candidate {
            world: request.world.clone(),
            position,
        })
    }

    fn sample_column(&self, origin: &Location) -> (i32, i32) {
        let mut rng = lock(&self.rng);
        sample_offset(
            &mut *rng,
            origin,
            self.config.min_radius,
            self.config.max_radius,
        )
    }
}

pub(crate) fn sample_offset<R: Rng>(
    rng: &mut R,
    origin: &Location,
    min_radius: u32,
    max_radius: u32,
) -> (i32, i32) {
    let angle = rng.gen_range(0.0..TAU);
    let distance = if min_radius >= max_radius {
        f64::from(max_radius)
    } else {
        rng.gen_range(f64::from(min_radius)..=f64::from(max_radius))
    };
    let x = origin.x + distance * angle.cos();
    let z = origin.z + distance * angle.sin();
    (x.floor() as i32, z.floor() as i32)
}

/// Picks the standing spot in column (`x`, `z`) according to the region
/// archetype, returning it only if it passes the safety predicate.
pub(crate) fn scan_column(
    view: &dyn TerrainView,
    x: i32,
    z: i32,
    config: &WildTeleportConfig,
    rules: &SafetyRules,
) -> Option<BlockPos> {
    match view.archetype() {
        RegionArchetype::Surface => scan_surface(view, x, z, config, rules),
        RegionArchetype::Cavern => scan_band(view, x, z, config.cavern, rules),
        RegionArchetype::Void => scan_band(view, x, z, config.void, rules),
    }
}

fn feet_range(view: &dyn TerrainView, bounds: VerticalBounds) -> (i32, i32) {
    let low = bounds.min_y.max(view.min_height() + 1);
    let high = bounds.max_y.min(view.max_height() - 1);
    (low, high)
}

fn scan_surface(
    view: &dyn TerrainView,
    x: i32,
    z: i32,
    config: &WildTeleportConfig,
    rules: &SafetyRules,
) -> Option<BlockPos> {
    let (low, high) = feet_range(view, config.surface);
    if low > high {
        return None;
    }

    let mut y = high;
    while y >= low {
        let pos = BlockPos::new(x, y, z);
        if view.block(pos.below()).solid {
            if safety::is_safe(view, pos, rules) {
                return Some(pos);
            }
            break;
        }
        y -= 1;
    }

    // Heightmap-guided fallback around the reported surface.
    let surface_feet = view.surface_height(x, z) + 1;
    let window = config.surface_fallback_window;
    let top = (surface_feet + window).min(high);
    let bottom = (surface_feet - window).max(low);
    let mut y = top;
    while y >= bottom {
        let pos = BlockPos::new(x, y, z);
        if safety::is_safe(view, pos, rules) {
            return Some(pos);
        }
        y -= 1;
    }
    None
}

fn scan_band(
    view: &dyn TerrainView,
    x: i32,
    z: i32,
    bounds: VerticalBounds,
    rules: &SafetyRules,
) -> Option<BlockPos> {
    let (low, high) = feet_range(view, bounds);
    (low..=high)
        .map(|y| BlockPos::new(x, y, z))
        .find(|&pos| safety::is_safe(view, pos, rules))
}
