use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use crate::types::{ActorId, BlockPos};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Queued { position: usize },
    Searching { attempts: u32 },
    Teleported { position: BlockPos, attempts: u32 },
    /// `attempts` is unknown when the search died unexpectedly.
    Failed { attempts: Option<u32> },
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Notice::Queued { position } => {
                write!(f, "You are #{position} in the random teleport queue.")
            }
            Notice::Searching { attempts } => write!(
                f,
                "Still looking for a safe location ({attempts} attempts so far)..."
            ),
            Notice::Teleported { position, attempts } => {
                let plural = if *attempts == 1 { "" } else { "s" };
                write!(
                    f,
                    "Teleported to {position} after {attempts} attempt{plural}."
                )
            }
            Notice::Failed {
                attempts: Some(attempts),
            } => write!(
                f,
                "Could not find a safe location after {attempts} attempts. Please try again."
            ),
            Notice::Failed { attempts: None } => {
                write!(f, "Could not find a safe location. Please try again.")
            }
        }
    }
}

/// Delivery surface for progress and result messages. Implementations must
/// not block; a returned error or a panic is logged and otherwise ignored.
pub trait Notifier: Send + Sync {
    fn notify(&self, actor: &ActorId, notice: &Notice) -> Result<(), String>;
}

/// Drops every notice.
#[derive(Debug, Clone, Copy, Default)]
pub struct SilentNotifier;

impl Notifier for SilentNotifier {
    fn notify(&self, _actor: &ActorId, _notice: &Notice) -> Result<(), String> {
        Ok(())
    }
}

#[derive(Clone)]
pub(crate) struct NoticeSender {
    notifier: Arc<dyn Notifier>,
}

impl NoticeSender {
    pub(crate) fn new(notifier: Arc<dyn Notifier>) -> Self {
        Self { notifier }
    }

    pub(crate) fn send(&self, actor: &ActorId, notice: Notice) {
        let delivered =
            panic::catch_unwind(AssertUnwindSafe(|| self.notifier.notify(actor, &notice)));
        match delivered {
            Ok(Ok(())) => {}
            Ok(Err(err)) => log::debug!(
                "wild teleport notice dropped actor={} notice={:?} err={}",
                actor,
                notice,
                err
            ),
            Err(_) => log::warn!(
                "wild teleport notifier panicked actor={} notice={:?}",
                actor,
                notice
            ),
        }
    }
}

impl fmt::Debug for NoticeSender {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NoticeSender").finish_non_exhaustive()
    }
}
