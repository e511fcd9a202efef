//! Terrain-safety predicate.
//!
//! [`evaluate`] is pure: the same rules run against borrowed snapshots on the
//! worker pool and against the live world during the authoritative re-check.
//!
//! The open-shaft probe and the adjacency check are approximations. The probe
//! only looks a few blocks under the footing, and neighbors are only read
//! inside the view's own region, so spots next to a region edge can be
//! misjudged either way.

use std::collections::BTreeSet;
use std::fmt;

use crate::config::WildTeleportConfig;
use crate::terrain::{BlockInfo, TerrainView};
use crate::types::{BlockPos, RegionArchetype};

const NEIGHBOR_OFFSETS: [(i32, i32); 8] = [
    (-1, -1),
    (-1, 0),
    (-1, 1),
    (0, -1),
    (0, 1),
    (1, -1),
    (1, 0),
    (1, 1),
];

#[derive(Debug, Clone, PartialEq)]
pub struct SafetyRules {
    pub hazardous_blocks: BTreeSet<String>,
    pub adjacent_hazard_blocks: BTreeSet<String>,
    pub check_adjacent_hazards: bool,
    pub shaft_probe_depth: u32,
    pub shaft_gap_threshold: u32,
    pub void_min_height: i32,
    pub void_min_center_distance: f64,
}

impl SafetyRules {
    pub fn from_config(config: &WildTeleportConfig) -> Self {
        Self {
            hazardous_blocks: config.hazardous_blocks.clone(),
            adjacent_hazard_blocks: config.adjacent_hazard_blocks.clone(),
            check_adjacent_hazards: config.check_adjacent_hazards,
            shaft_probe_depth: config.shaft_probe_depth,
            shaft_gap_threshold: config.shaft_gap_threshold,
            void_min_height: config.void_min_height,
            void_min_center_distance: config.void_min_center_distance,
        }
    }

    fn is_hazardous(&self, block: BlockInfo<'_>) -> bool {
        self.hazardous_blocks.contains(block.name)
    }

    fn is_adjacent_hazard(&self, block: BlockInfo<'_>) -> bool {
        self.adjacent_hazard_blocks.contains(block.name)
    }
}

impl Default for SafetyRules {
    fn default() -> Self {
        Self::from_config(&WildTeleportConfig::default())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnsafeReason {
    OutOfBounds,
    VoidExclusion,
    Obstructed,
    NoHeadroom,
    UnsupportedFooting,
    HazardousFooting,
    AdjacentHazard,
    OpenShaft,
}

impl UnsafeReason {
    pub fn as_str(self) -> &'static str {
        match self {
            UnsafeReason::OutOfBounds => "out_of_bounds",
            UnsafeReason::VoidExclusion => "void_exclusion",
            UnsafeReason::Obstructed => "obstructed",
            UnsafeReason::NoHeadroom => "no_headroom",
            UnsafeReason::UnsupportedFooting => "unsupported_footing",
            UnsafeReason::HazardousFooting => "hazardous_footing",
            UnsafeReason::AdjacentHazard => "adjacent_hazard",
            UnsafeReason::OpenShaft => "open_shaft",
        }
    }
}

impl fmt::Display for UnsafeReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Decides whether an actor standing with its feet at `pos` is safe.
pub fn evaluate(
    view: &dyn TerrainView,
    pos: BlockPos,
    rules: &SafetyRules,
) -> Result<(), UnsafeReason> {
    if !view.contains_column(pos.x, pos.z)
        || !view.in_world_bounds(pos.x, pos.z)
        || pos.y - 1 < view.min_height()
        || pos.y + 1 > view.max_height()
    {
        return Err(UnsafeReason::OutOfBounds);
    }

    if view.archetype() == RegionArchetype::Void {
        let distance = (f64::from(pos.x).powi(2) + f64::from(pos.z).powi(2)).sqrt();
        if pos.y < rules.void_min_height || distance < rules.void_min_center_distance {
            return Err(UnsafeReason::VoidExclusion);
        }
    }

    if !is_clear(view.block(pos), rules) {
        return Err(UnsafeReason::Obstructed);
    }
    if !is_clear(view.block(pos.above()), rules) {
        return Err(UnsafeReason::NoHeadroom);
    }

    let footing = view.block(pos.below());
    if !footing.solid {
        return Err(UnsafeReason::UnsupportedFooting);
    }
    if rules.is_hazardous(footing) {
        return Err(UnsafeReason::HazardousFooting);
    }

    if rules.check_adjacent_hazards && has_adjacent_hazard(view, pos, rules) {
        return Err(UnsafeReason::AdjacentHazard);
    }

    if has_open_shaft(view, pos.below(), rules) {
        return Err(UnsafeReason::OpenShaft);
    }

    Ok(())
}

pub fn is_safe(view: &dyn TerrainView, pos: BlockPos, rules: &SafetyRules) -> bool {
    evaluate(view, pos, rules).is_ok()
}

fn is_clear(block: BlockInfo<'_>, rules: &SafetyRules) -> bool {
    block.passable && !block.solid && !rules.is_hazardous(block)
}

fn has_adjacent_hazard(view: &dyn TerrainView, pos: BlockPos, rules: &SafetyRules) -> bool {
    NEIGHBOR_OFFSETS.iter().any(|&(dx, dz)| {
        let neighbor = pos.offset(dx, 0, dz);
        if !view.contains_column(neighbor.x, neighbor.z) {
            return false;
        }
        rules.is_adjacent_hazard(view.block(neighbor))
            || rules.is_adjacent_hazard(view.block(neighbor.below()))
    })
}

fn has_open_shaft(view: &dyn TerrainView, footing: BlockPos, rules: &SafetyRules) -> bool {
    let mut gap = 0;
    for depth in 1..=rules.shaft_probe_depth as i32 {
        if view.block(footing.offset(0, -depth, 0)).solid {
            gap = 0;
            continue;
        }
        gap += 1;
        if gap >= rules.shaft_gap_threshold {
            return true;
        }
    }
    false
}
