use std::fmt;
use std::time::Instant;

/// Side length, in blocks, of one terrain region column.
pub const REGION_SIZE: i32 = 16;

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActorId(String);

impl ActorId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for ActorId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct WorldId(String);

impl WorldId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for WorldId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct BlockPos {
    pub x: i32,
    pub y: i32,
    pub z: i32,
}

impl BlockPos {
    pub const fn new(x: i32, y: i32, z: i32) -> Self {
        Self { x, y, z }
    }

    pub fn offset(self, dx: i32, dy: i32, dz: i32) -> Self {
        Self::new(self.x + dx, self.y + dy, self.z + dz)
    }

    pub fn below(self) -> Self {
        self.offset(0, -1, 0)
    }

    pub fn above(self) -> Self {
        self.offset(0, 1, 0)
    }

    pub fn region(self) -> RegionCoord {
        RegionCoord::containing(self.x, self.z)
    }
}

impl fmt::Display for BlockPos {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}, {}, {}", self.x, self.y, self.z)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegionCoord {
    pub x: i32,
    pub z: i32,
}

impl RegionCoord {
    pub const fn new(x: i32, z: i32) -> Self {
        Self { x, z }
    }

    pub fn containing(block_x: i32, block_z: i32) -> Self {
        Self {
            x: block_x.div_euclid(REGION_SIZE),
            z: block_z.div_euclid(REGION_SIZE),
        }
    }

    pub fn contains_column(self, block_x: i32, block_z: i32) -> bool {
        Self::containing(block_x, block_z) == self
    }

    /// The region itself followed by its eight horizontal neighbors.
    pub fn with_neighbors(self) -> impl Iterator<Item = RegionCoord> {
        std::iter::once(self).chain(
            (-1..=1)
                .flat_map(|dx| (-1..=1).map(move |dz| (dx, dz)))
                .filter(|&(dx, dz)| dx != 0 || dz != 0)
                .map(move |(dx, dz)| RegionCoord::new(self.x + dx, self.z + dz)),
        )
    }
}

impl fmt::Display for RegionCoord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "region({}, {})", self.x, self.z)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Location {
    pub world: WorldId,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub yaw: f32,
    pub pitch: f32,
}

impl Location {
    pub fn new(world: WorldId, x: f64, y: f64, z: f64) -> Self {
        Self {
            world,
            x,
            y,
            z,
            yaw: 0.0,
            pitch: 0.0,
        }
    }

    pub fn with_rotation(mut self, yaw: f32, pitch: f32) -> Self {
        self.yaw = yaw;
        self.pitch = pitch;
        self
    }

    pub fn block(&self) -> BlockPos {
        BlockPos::new(
            self.x.floor() as i32,
            self.y.floor() as i32,
            self.z.floor() as i32,
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionArchetype {
    Surface,
    Cavern,
    Void,
}

impl RegionArchetype {
    pub fn as_str(self) -> &'static str {
        match self {
            RegionArchetype::Surface => "surface",
            RegionArchetype::Cavern => "cavern",
            RegionArchetype::Void => "void",
        }
    }
}

impl fmt::Display for RegionArchetype {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone)]
pub struct Request {
    pub actor: ActorId,
    pub world: WorldId,
    pub origin: Location,
    pub enqueued_at: Instant,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Candidate {
    pub world: WorldId,
    pub position: BlockPos,
}

impl Candidate {
    pub fn region(&self) -> RegionCoord {
        self.position.region()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    Accepted { queue_position: usize },
    AlreadyPending,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SearchOutcome {
    Teleported { candidate: Candidate, attempts: u32 },
    Exhausted { attempts: u32 },
    Abandoned { attempts: u32 },
}

impl SearchOutcome {
    pub fn attempts(&self) -> u32 {
        match self {
            SearchOutcome::Teleported { attempts, .. }
            | SearchOutcome::Exhausted { attempts }
            | SearchOutcome::Abandoned { attempts } => *attempts,
        }
    }
}
