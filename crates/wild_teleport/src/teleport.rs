use crate::safety::{self, SafetyRules, UnsafeReason};
use crate::types::{ActorId, Candidate, Location};
use crate::world::WorldAuthority;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum TeleportStep {
    Teleported,
    RaceInvalidated(Option<UnsafeReason>),
    ActorGone,
}

/// Final re-check and relocation. Must run on the world-owner thread, once
/// per candidate.
pub(crate) fn execute_teleport(
    world: &mut dyn WorldAuthority,
    actor: &ActorId,
    candidate: &Candidate,
    rules: &SafetyRules,
) -> TeleportStep {
    if !world.is_actor_live(actor) {
        return TeleportStep::ActorGone;
    }

    let verdict = match world.live_view(&candidate.world, candidate.region()) {
        Some(view) => safety::evaluate(view.as_ref(), candidate.position, rules),
        None => return TeleportStep::RaceInvalidated(None),
    };
    if let Err(reason) = verdict {
        return TeleportStep::RaceInvalidated(Some(reason));
    }

    let Some(previous) = world.actor_location(actor) else {
        return TeleportStep::ActorGone;
    };
    let destination = Location::new(
        candidate.world.clone(),
        f64::from(candidate.position.x) + 0.5,
        f64::from(candidate.position.y),
        f64::from(candidate.position.z) + 0.5,
    )
    .with_rotation(previous.yaw, previous.pitch);

    world.record_return_location(actor, previous);
    world.relocate(actor, destination);
    for region in candidate.region().with_neighbors() {
        world.request_region_warm(&candidate.world, region);
    }
    TeleportStep::Teleported
}
