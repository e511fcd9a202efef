use std::collections::BTreeSet;
use std::fs;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::TeleportError;

pub const DEFAULT_MIN_RADIUS: u32 = 500;
pub const DEFAULT_MAX_RADIUS: u32 = 10_000;
pub const DEFAULT_MAX_ATTEMPTS: u32 = 100;
pub const DEFAULT_PROGRESS_INTERVAL: u32 = 10;
pub const DEFAULT_WORKER_THREADS: usize = 2;
pub const DEFAULT_TERRAIN_TIMEOUT_MS: u64 = 5_000;

const DEFAULT_HAZARDOUS_BLOCKS: &[&str] = &[
    "lava",
    "fire",
    "soul_fire",
    "cactus",
    "magma_block",
    "water",
    "bubble_column",
    "slime_block",
    "honey_block",
    "tnt",
    "powder_snow",
    "sweet_berry_bush",
    "campfire",
    "soul_campfire",
    "wither_rose",
    "pointed_dripstone",
];

const DEFAULT_ADJACENT_HAZARD_BLOCKS: &[&str] = &[
    "lava",
    "fire",
    "soul_fire",
    "magma_block",
    "campfire",
    "soul_campfire",
];

/// Inclusive vertical band searched for one region archetype.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerticalBounds {
    pub min_y: i32,
    pub max_y: i32,
}

impl VerticalBounds {
    pub const fn new(min_y: i32, max_y: i32) -> Self {
        Self { min_y, max_y }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WildTeleportConfig {
    pub min_radius: u32,
    pub max_radius: u32,
    pub max_attempts: u32,
    pub progress_interval: u32,
    pub worker_threads: usize,
    pub terrain_timeout_ms: u64,
    pub rng_seed: Option<u64>,
    pub surface: VerticalBounds,
    pub surface_fallback_window: i32,
    pub cavern: VerticalBounds,
    pub void: VerticalBounds,
    pub void_min_height: i32,
    pub void_min_center_distance: f64,
    pub hazardous_blocks: BTreeSet<String>,
    pub adjacent_hazard_blocks: BTreeSet<String>,
    /// Neighbor hazards are only looked up inside the acquired region, so a
    /// hazard just across a region edge goes unnoticed.
    pub check_adjacent_hazards: bool,
    pub shaft_probe_depth: u32,
    pub shaft_gap_threshold: u32,
}

impl Default for WildTeleportConfig {
    fn default() -> Self {
        Self {
            min_radius: DEFAULT_MIN_RADIUS,
            max_radius: DEFAULT_MAX_RADIUS,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            progress_interval: DEFAULT_PROGRESS_INTERVAL,
            worker_threads: DEFAULT_WORKER_THREADS,
            terrain_timeout_ms: DEFAULT_TERRAIN_TIMEOUT_MS,
            rng_seed: None,
            surface: VerticalBounds::new(63, 320),
            surface_fallback_window: 4,
            cavern: VerticalBounds::new(32, 100),
            void: VerticalBounds::new(40, 100),
            void_min_height: 40,
            void_min_center_distance: 1_000.0,
            hazardous_blocks: owned_set(DEFAULT_HAZARDOUS_BLOCKS),
            adjacent_hazard_blocks: owned_set(DEFAULT_ADJACENT_HAZARD_BLOCKS),
            check_adjacent_hazards: true,
            shaft_probe_depth: 4,
            shaft_gap_threshold: 3,
        }
    }
}

impl WildTeleportConfig {
    pub fn from_toml_str(content: &str) -> Result<Self, TeleportError> {
        Self::parse(content, "<inline>")
    }

    pub fn from_config_file(path: &Path) -> Result<Self, TeleportError> {
        let content = fs::read_to_string(path).map_err(|err| TeleportError::ReadConfigFile {
            path: path.display().to_string(),
            message: err.to_string(),
        })?;
        Self::parse(&content, &path.display().to_string())
    }

    fn parse(content: &str, origin: &str) -> Result<Self, TeleportError> {
        let config: Self =
            toml::from_str(content).map_err(|err| TeleportError::ParseConfigFile {
                path: origin.to_string(),
                message: err.to_string(),
            })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), TeleportError> {
        if self.min_radius > self.max_radius {
            return Err(invalid(format!(
                "min_radius {} exceeds max_radius {}",
                self.min_radius, self.max_radius
            )));
        }
        if self.max_attempts == 0 {
            return Err(invalid("max_attempts must be positive"));
        }
        if self.progress_interval == 0 {
            return Err(invalid("progress_interval must be positive"));
        }
        if self.worker_threads == 0 {
            return Err(invalid("worker_threads must be positive"));
        }
        if self.terrain_timeout_ms == 0 {
            return Err(invalid("terrain_timeout_ms must be positive"));
        }
        if self.surface_fallback_window < 0 {
            return Err(invalid("surface_fallback_window cannot be negative"));
        }
        if self.shaft_gap_threshold == 0 {
            return Err(invalid("shaft_gap_threshold must be positive"));
        }
        if !self.void_min_center_distance.is_finite() || self.void_min_center_distance < 0.0 {
            return Err(invalid("void_min_center_distance must be a non-negative number"));
        }
        for (name, bounds) in [
            ("surface", self.surface),
            ("cavern", self.cavern),
            ("void", self.void),
        ] {
            if bounds.min_y > bounds.max_y {
                return Err(invalid(format!(
                    "{name} band min_y {} exceeds max_y {}",
                    bounds.min_y, bounds.max_y
                )));
            }
        }
        Ok(())
    }

    pub fn terrain_timeout(&self) -> Duration {
        Duration::from_millis(self.terrain_timeout_ms)
    }
}

fn owned_set(names: &[&str]) -> BTreeSet<String> {
    names.iter().map(|name| name.to_string()).collect()
}

fn invalid(reason: impl Into<String>) -> TeleportError {
    TeleportError::InvalidConfig {
        reason: reason.into(),
    }
}
