//! Admission gate and single-flight processor.
//!
//! Requests are searched strictly one at a time in arrival order. The
//! processor task lives on the worker pool only while there is work; the
//! admission gate re-activates it when a request lands on an idle queue.

use std::collections::{HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Instant;

use futures::executor::ThreadPool;
use futures::FutureExt;

use crate::error::SearchFailure;
use crate::notifier::{Notice, NoticeSender};
use crate::runtime_util::lock;
use crate::search::SearchEngine;
use crate::types::{ActorId, Location, Request, SearchOutcome, SubmitOutcome};
use crate::world::WorldHandle;

/// Actors with a request queued or being searched.
#[derive(Debug, Default)]
pub(crate) struct PendingSet {
    actors: Mutex<HashSet<ActorId>>,
}

impl PendingSet {
    /// False when the actor is already pending.
    pub(crate) fn insert(&self, actor: &ActorId) -> bool {
        lock(&self.actors).insert(actor.clone())
    }

    pub(crate) fn remove(&self, actor: &ActorId) -> bool {
        lock(&self.actors).remove(actor)
    }

    pub(crate) fn contains(&self, actor: &ActorId) -> bool {
        lock(&self.actors).contains(actor)
    }

    pub(crate) fn len(&self) -> usize {
        lock(&self.actors).len()
    }

    pub(crate) fn clear(&self) {
        lock(&self.actors).clear();
    }
}

#[derive(Debug, Default)]
struct QueueState {
    queue: VecDeque<Request>,
    active: bool,
    in_flight: Option<ActorId>,
}

/// Terminal outcome counters, kept across restarts.
#[derive(Debug, Default)]
pub(crate) struct SearchStats {
    completed: AtomicU64,
    exhausted: AtomicU64,
    abandoned: AtomicU64,
    dropped: AtomicU64,
}

impl SearchStats {
    pub(crate) fn completed(&self) -> u64 {
        self.completed.load(Ordering::SeqCst)
    }

    pub(crate) fn exhausted(&self) -> u64 {
        self.exhausted.load(Ordering::SeqCst)
    }

    pub(crate) fn abandoned(&self) -> u64 {
        self.abandoned.load(Ordering::SeqCst)
    }

    pub(crate) fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::SeqCst)
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, Ordering::SeqCst);
    }
}

/// Marks the queue idle if the processor unwinds, so the next submission
/// starts a new one.
struct ProcessorGuard<'a> {
    state: &'a Mutex<QueueState>,
}

impl Drop for ProcessorGuard<'_> {
    fn drop(&mut self) {
        if std::thread::panicking() {
            let mut state = lock(self.state);
            state.active = false;
            state.in_flight = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct QueueCounts {
    pub(crate) queued: usize,
    pub(crate) pending: usize,
    pub(crate) in_flight: bool,
}

pub(crate) struct TeleportQueue {
    pending: PendingSet,
    state: Mutex<QueueState>,
    stats: Arc<SearchStats>,
    engine: SearchEngine,
    world: WorldHandle,
    notices: NoticeSender,
    running: Arc<AtomicBool>,
}

impl TeleportQueue {
    pub(crate) fn new(
        engine: SearchEngine,
        world: WorldHandle,
        notices: NoticeSender,
        stats: Arc<SearchStats>,
        running: Arc<AtomicBool>,
    ) -> Self {
        Self {
            pending: PendingSet::default(),
            state: Mutex::new(QueueState::default()),
            stats,
            engine,
            world,
            notices,
            running,
        }
    }

    pub(crate) fn submit(
        self: &Arc<Self>,
        pool: &ThreadPool,
        actor: ActorId,
        origin: Location,
    ) -> SubmitOutcome {
        if !self.pending.insert(&actor) {
            log::debug!("wild teleport request ignored actor={} reason=already_pending", actor);
            return SubmitOutcome::AlreadyPending;
        }

        let request = Request {
            actor: actor.clone(),
            world: origin.world.clone(),
            origin,
            enqueued_at: Instant::now(),
        };
        let (queue_position, activate) = {
            let mut state = lock(&self.state);
            state.queue.push_back(request);
            let queue_position = state.queue.len() + usize::from(state.in_flight.is_some());
            let activate = !state.active;
            state.active = true;
            (queue_position, activate)
        };
        // A fresh processor is only spawned after this, so on an idle queue
        // the notice still precedes the request's later ones.
        self.notices.send(
            &actor,
            Notice::Queued {
                position: queue_position,
            },
        );
        log::info!(
            "wild teleport request queued actor={} position={}",
            actor,
            queue_position
        );

        if activate {
            self.spawn_processor(pool);
        }
        SubmitOutcome::Accepted { queue_position }
    }

    fn spawn_processor(self: &Arc<Self>, pool: &ThreadPool) {
        let queue = Arc::clone(self);
        pool.spawn_ok(async move {
            queue.process_queue().await;
        });
    }

    async fn process_queue(&self) {
        let _idle_on_unwind = ProcessorGuard { state: &self.state };
        loop {
            let request = {
                let mut state = lock(&self.state);
                state.in_flight = None;
                if !self.running.load(Ordering::SeqCst) {
                    state.active = false;
                    return;
                }
                match state.queue.pop_front() {
                    Some(request) => {
                        state.in_flight = Some(request.actor.clone());
                        request
                    }
                    None => {
                        state.active = false;
                        return;
                    }
                }
            };
            let actor = request.actor.clone();
            let processed = AssertUnwindSafe(self.process_request(request))
                .catch_unwind()
                .await;
            if processed.is_err() {
                log::error!("wild teleport request handling panicked actor={}", actor);
                self.pending.remove(&actor);
            }
        }
    }

    async fn process_request(&self, request: Request) {
        let actor = request.actor.clone();
        let live = {
            let actor = actor.clone();
            self.world.call(move |world| world.is_actor_live(&actor)).await
        };
        match live {
            Ok(true) => {}
            Ok(false) => {
                log::debug!("wild teleport request dropped actor={} reason=offline", actor);
                self.pending.remove(&actor);
                SearchStats::bump(&self.stats.dropped);
                return;
            }
            Err(err) => {
                log::warn!("wild teleport request dropped actor={} err={}", actor, err);
                self.pending.remove(&actor);
                SearchStats::bump(&self.stats.dropped);
                return;
            }
        }

        log::debug!(
            "wild teleport search started actor={} waited_ms={}",
            actor,
            request.enqueued_at.elapsed().as_millis()
        );
        let outcome = AssertUnwindSafe(self.engine.run(&request))
            .catch_unwind()
            .await;
        self.pending.remove(&actor);

        match outcome {
            Ok(SearchOutcome::Teleported {
                candidate,
                attempts,
            }) => {
                log::info!(
                    "wild teleport completed actor={} world={} position={} attempts={}",
                    actor,
                    candidate.world,
                    candidate.position,
                    attempts
                );
                SearchStats::bump(&self.stats.completed);
                self.notices.send(
                    &actor,
                    Notice::Teleported {
                        position: candidate.position,
                        attempts,
                    },
                );
            }
            Ok(SearchOutcome::Exhausted { attempts }) => {
                log::info!(
                    "wild teleport finished actor={} attempts={} failure={}",
                    actor,
                    attempts,
                    SearchFailure::SearchExhausted
                );
                SearchStats::bump(&self.stats.exhausted);
                self.notices.send(
                    &actor,
                    Notice::Failed {
                        attempts: Some(attempts),
                    },
                );
            }
            Ok(SearchOutcome::Abandoned { attempts }) => {
                log::debug!(
                    "wild teleport abandoned actor={} attempts={}",
                    actor,
                    attempts
                );
                SearchStats::bump(&self.stats.abandoned);
            }
            Err(_) => {
                log::error!(
                    "wild teleport search panicked actor={} failure={}",
                    actor,
                    SearchFailure::SearchExhausted
                );
                SearchStats::bump(&self.stats.exhausted);
                self.notices.send(&actor, Notice::Failed { attempts: None });
            }
        }
    }

    /// Stops accepting work and forgets every queued request. A search
    /// already running gives up at its next retry.
    pub(crate) fn drain(&self) -> usize {
        self.running.store(false, Ordering::SeqCst);
        let drained = {
            let mut state = lock(&self.state);
            let drained = state.queue.len();
            state.queue.clear();
            drained
        };
        self.pending.clear();
        drained
    }

    pub(crate) fn is_pending(&self, actor: &ActorId) -> bool {
        self.pending.contains(actor)
    }

    pub(crate) fn counts(&self) -> QueueCounts {
        let state = lock(&self.state);
        QueueCounts {
            queued: state.queue.len(),
            pending: self.pending.len(),
            in_flight: state.in_flight.is_some(),
        }
    }
}
