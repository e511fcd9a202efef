//! Bridge into the authoritative world thread.
//!
//! Nothing in the worker domain touches live world state directly. Work is
//! boxed into a [`WorldTask`], pushed through an unbounded channel and the
//! result comes back over a oneshot, so neither side ever blocks on the other.

use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::thread::{self, JoinHandle};

use futures::channel::{mpsc, oneshot};
use futures::StreamExt;

use crate::terrain::TerrainView;
use crate::types::{ActorId, Location, RegionCoord, WorldId};
use crate::TeleportError;

/// Live world operations; only ever invoked on the world-owner thread.
pub trait WorldAuthority {
    fn is_actor_live(&self, actor: &ActorId) -> bool;

    fn actor_location(&self, actor: &ActorId) -> Option<Location>;

    /// Current block data of a loaded region, `None` when it is not loaded.
    fn live_view(&self, world: &WorldId, region: RegionCoord) -> Option<Box<dyn TerrainView + '_>>;

    fn relocate(&mut self, actor: &ActorId, destination: Location);

    fn record_return_location(&mut self, actor: &ActorId, previous: Location);

    /// Fire-and-forget load request.
    fn request_region_warm(&mut self, world: &WorldId, region: RegionCoord);
}

pub type WorldTask = Box<dyn FnOnce(&mut dyn WorldAuthority) + Send>;

enum WorldMessage {
    Task(WorldTask),
    Shutdown,
}

pub fn world_channel() -> (WorldHandle, WorldInbox) {
    let (tx, rx) = mpsc::unbounded();
    (WorldHandle { tx }, WorldInbox { rx, closed: false })
}

#[derive(Clone)]
pub struct WorldHandle {
    tx: mpsc::UnboundedSender<WorldMessage>,
}

impl fmt::Debug for WorldHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldHandle")
            .field("closed", &self.tx.is_closed())
            .finish()
    }
}

impl WorldHandle {
    /// Queues `task` for the world thread and resolves with its result.
    pub async fn call<R, F>(&self, task: F) -> Result<R, TeleportError>
    where
        R: Send + 'static,
        F: FnOnce(&mut dyn WorldAuthority) -> R + Send + 'static,
    {
        let (reply_tx, reply_rx) = oneshot::channel();
        let boxed: WorldTask = Box::new(move |world: &mut dyn WorldAuthority| {
            let _ = reply_tx.send(task(world));
        });
        self.tx
            .unbounded_send(WorldMessage::Task(boxed))
            .map_err(|_| TeleportError::WorldUnavailable)?;
        reply_rx.await.map_err(|_| TeleportError::WorldUnavailable)
    }

    pub fn shutdown(&self) {
        let _ = self.tx.unbounded_send(WorldMessage::Shutdown);
    }
}

/// Receiving end, drained by whoever owns the world.
pub struct WorldInbox {
    rx: mpsc::UnboundedReceiver<WorldMessage>,
    closed: bool,
}

impl fmt::Debug for WorldInbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WorldInbox")
            .field("closed", &self.closed)
            .finish()
    }
}

impl WorldInbox {
    /// Runs every task queued so far without waiting for more; meant to be
    /// called from the host's own tick. Returns the number of tasks run.
    pub fn run_pending(&mut self, world: &mut dyn WorldAuthority) -> usize {
        let mut ran = 0;
        while !self.closed {
            match self.rx.try_next() {
                Ok(Some(WorldMessage::Task(task))) => {
                    run_task(world, task);
                    ran += 1;
                }
                Ok(Some(WorldMessage::Shutdown)) | Ok(None) => self.closed = true,
                Err(_) => break,
            }
        }
        ran
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }
}

fn run_task(world: &mut dyn WorldAuthority, task: WorldTask) {
    // A panicking task drops its reply sender; the caller sees
    // `WorldUnavailable` and the world thread keeps going.
    if panic::catch_unwind(AssertUnwindSafe(|| task(world))).is_err() {
        log::error!("wild teleport world task panicked");
    }
}

/// Dedicated world-owner thread for hosts without their own tick loop.
#[derive(Debug)]
pub struct WorldThread<A> {
    control: WorldHandle,
    worker: Option<JoinHandle<A>>,
}

pub fn spawn_world_thread<A>(authority: A) -> Result<(WorldHandle, WorldThread<A>), TeleportError>
where
    A: WorldAuthority + Send + 'static,
{
    let (handle, inbox) = world_channel();
    let mut rx = inbox.rx;
    let worker = thread::Builder::new()
        .name("wild-teleport-world".to_string())
        .spawn(move || {
            let mut authority = authority;
            async_std::task::block_on(async {
                while let Some(message) = rx.next().await {
                    match message {
                        WorldMessage::Task(task) => run_task(&mut authority, task),
                        WorldMessage::Shutdown => break,
                    }
                }
            });
            authority
        })
        .map_err(|err| TeleportError::ThreadSpawnFailed {
            reason: err.to_string(),
        })?;
    Ok((
        handle.clone(),
        WorldThread {
            control: handle,
            worker: Some(worker),
        },
    ))
}

impl<A> WorldThread<A> {
    /// Stops the thread after the tasks already queued and hands the
    /// authority back.
    pub fn stop(mut self) -> Result<A, TeleportError> {
        self.control.shutdown();
        let worker = self.worker.take().ok_or(TeleportError::ThreadJoinFailed)?;
        worker.join().map_err(|_| TeleportError::ThreadJoinFailed)
    }
}

impl<A> Drop for WorldThread<A> {
    fn drop(&mut self) {
        if let Some(worker) = self.worker.take() {
            self.control.shutdown();
            let _ = worker.join();
        }
    }
}
