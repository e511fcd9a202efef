use std::fmt;

use crate::types::RegionCoord;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeleportError {
    InvalidConfig { reason: String },
    ReadConfigFile { path: String, message: String },
    ParseConfigFile { path: String, message: String },
    AlreadyRunning,
    NotRunning,
    ThreadPoolFailed { reason: String },
    ThreadSpawnFailed { reason: String },
    ThreadJoinFailed,
    WorldUnavailable,
}

impl fmt::Display for TeleportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TeleportError::InvalidConfig { reason } => {
                write!(f, "invalid teleport config: {}", reason)
            }
            TeleportError::ReadConfigFile { path, message } => {
                write!(f, "read config file failed ({path}): {message}")
            }
            TeleportError::ParseConfigFile { path, message } => {
                write!(f, "parse config file failed ({path}): {message}")
            }
            TeleportError::AlreadyRunning => write!(f, "teleport service already running"),
            TeleportError::NotRunning => write!(f, "teleport service not running"),
            TeleportError::ThreadPoolFailed { reason } => {
                write!(f, "failed to build teleport worker pool: {}", reason)
            }
            TeleportError::ThreadSpawnFailed { reason } => {
                write!(f, "failed to spawn world thread: {}", reason)
            }
            TeleportError::ThreadJoinFailed => write!(f, "failed to join world thread"),
            TeleportError::WorldUnavailable => {
                write!(f, "world owner stopped accepting tasks")
            }
        }
    }
}

impl std::error::Error for TeleportError {}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerrainError {
    Timeout { region: RegionCoord, waited_ms: u64 },
    LoadFailed { region: RegionCoord, reason: String },
}

impl fmt::Display for TerrainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TerrainError::Timeout { region, waited_ms } => {
                write!(f, "terrain acquire timed out for {} after {}ms", region, waited_ms)
            }
            TerrainError::LoadFailed { region, reason } => {
                write!(f, "terrain load failed for {}: {}", region, reason)
            }
        }
    }
}

impl std::error::Error for TerrainError {}

/// Why one attempt, or a whole request, did not end in a teleport.
///
/// Only `SearchExhausted` is ever shown to the requester; the rest are
/// retried or dropped silently.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SearchFailure {
    ChunkLoadFailure,
    UnsafeCandidate,
    TeleportRaceInvalidated,
    SearchExhausted,
    ActorGone,
}

impl SearchFailure {
    pub fn as_str(self) -> &'static str {
        match self {
            SearchFailure::ChunkLoadFailure => "chunk_load_failure",
            SearchFailure::UnsafeCandidate => "unsafe_candidate",
            SearchFailure::TeleportRaceInvalidated => "teleport_race_invalidated",
            SearchFailure::SearchExhausted => "search_exhausted",
            SearchFailure::ActorGone => "actor_gone",
        }
    }
}

impl fmt::Display for SearchFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
