//! World coordinates
//!
//! Positions are stored as two unsigned 32-bit coordinates biased by
//! [`XY_CENTER`], so the signed world offset `(0, 0)` sits in the middle of the
//! address space. Movement math runs on [`PositionF`] (signed world units) and
//! is rounded back on commit.
//!
//! Orientation follows screen space: North is -y, South is +y, East is +x.

use std::f64::consts::FRAC_1_SQRT_2;
use std::ops::Add;

use serde::{Deserialize, Serialize};

/// Bias applied to both coordinates (2^31)
pub const XY_CENTER: u32 = 1 << 31;

/// A committed world position in biased unsigned form
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Position {
    pub x: u32,
    pub y: u32,
}

impl Position {
    /// The world origin
    pub const CENTER: Position = Position {
        x: XY_CENTER,
        y: XY_CENTER,
    };

    /// Create a position from raw biased coordinates
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Create a position from a signed offset relative to the world origin
    pub fn from_offset(dx: i64, dy: i64) -> Self {
        Self::CENTER.offset(dx, dy)
    }

    /// Create a position from a floating-point world position (rounded)
    pub fn from_world(pos: PositionF) -> Self {
        Self::from_offset(pos.x.round() as i64, pos.y.round() as i64)
    }

    /// Signed world-space form
    pub fn to_world(self) -> PositionF {
        let (dx, dy) = Self::CENTER.delta_to(self);
        PositionF::new(dx as f64, dy as f64)
    }

    /// Move by a signed delta, saturating at the edges of the address space
    pub fn offset(self, dx: i64, dy: i64) -> Self {
        let clamp = |v: i64| v.clamp(0, u32::MAX as i64) as u32;
        Self {
            x: clamp(self.x as i64 + dx),
            y: clamp(self.y as i64 + dy),
        }
    }

    /// Signed delta from `self` to `other`
    pub fn delta_to(self, other: Position) -> (i64, i64) {
        (
            other.x as i64 - self.x as i64,
            other.y as i64 - self.y as i64,
        )
    }

    /// Euclidean distance to another position
    pub fn distance_to(self, other: Position) -> f32 {
        let (dx, dy) = self.delta_to(other);
        (dx as f64).hypot(dy as f64) as f32
    }

    /// The chunk bucket containing this position
    pub fn chunk(self, chunk_size: u32) -> ChunkCoord {
        let size = chunk_size.max(1);
        ChunkCoord::new(self.x / size, self.y / size)
    }
}

impl std::fmt::Display for Position {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let (dx, dy) = Self::CENTER.delta_to(*self);
        write!(f, "({}, {})", dx, dy)
    }
}

/// Signed floating-point world position
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct PositionF {
    pub x: f64,
    pub y: f64,
}

impl PositionF {
    pub const fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }
}

impl Add for PositionF {
    type Output = PositionF;

    fn add(self, rhs: PositionF) -> PositionF {
        PositionF::new(self.x + rhs.x, self.y + rhs.y)
    }
}

/// Chunk bucket coordinate: `floor(position / chunk_size)` on the biased form
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ChunkCoord {
    pub x: u32,
    pub y: u32,
}

impl ChunkCoord {
    pub const fn new(x: u32, y: u32) -> Self {
        Self { x, y }
    }

    /// Neighbouring coordinate, or `None` past the edge of the grid
    pub fn offset(self, dx: i32, dy: i32) -> Option<Self> {
        Some(Self {
            x: self.x.checked_add_signed(dx)?,
            y: self.y.checked_add_signed(dy)?,
        })
    }

    /// All coordinates in the square of the given radius, row by row
    pub fn square(self, radius: u32) -> impl Iterator<Item = ChunkCoord> {
        let r = radius.min(i32::MAX as u32) as i32;
        (-r..=r).flat_map(move |dy| (-r..=r).filter_map(move |dx| self.offset(dx, dy)))
    }
}

/// Compass direction, wire-compatible with the client's direction byte
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    South = 0,
    SouthWest = 1,
    West = 2,
    NorthWest = 3,
    North = 4,
    NorthEast = 5,
    East = 6,
    SouthEast = 7,
    #[default]
    None = 8,
}

impl Direction {
    /// All eight moving directions
    pub const COMPASS: [Direction; 8] = [
        Direction::South,
        Direction::SouthWest,
        Direction::West,
        Direction::NorthWest,
        Direction::North,
        Direction::NorthEast,
        Direction::East,
        Direction::SouthEast,
    ];

    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0..=7 => Some(Self::COMPASS[value as usize]),
            8 => Some(Self::None),
            _ => None,
        }
    }

    pub fn is_none(self) -> bool {
        self == Direction::None
    }

    pub fn is_diagonal(self) -> bool {
        matches!(
            self,
            Direction::SouthWest | Direction::NorthWest | Direction::NorthEast | Direction::SouthEast
        )
    }

    /// Unit grid vector (x, y) in screen orientation
    pub fn unit(self) -> (i32, i32) {
        match self {
            Direction::South => (0, 1),
            Direction::SouthWest => (-1, 1),
            Direction::West => (-1, 0),
            Direction::NorthWest => (-1, -1),
            Direction::North => (0, -1),
            Direction::NorthEast => (1, -1),
            Direction::East => (1, 0),
            Direction::SouthEast => (1, 1),
            Direction::None => (0, 0),
        }
    }

    /// Per-tick displacement for the given speed; diagonals are scaled by 1/sqrt(2)
    pub fn velocity(self, speed: f32) -> PositionF {
        let (ux, uy) = self.unit();
        let scale = if self.is_diagonal() {
            f64::from(speed) * FRAC_1_SQRT_2
        } else {
            f64::from(speed)
        };
        PositionF::new(f64::from(ux) * scale, f64::from(uy) * scale)
    }

    /// Position reached from `from` after one tick at `speed`, rounded to whole world units
    pub fn advance(self, from: Position, speed: f32) -> Position {
        Position::from_world(from.to_world() + self.velocity(speed))
    }

    /// Quantise a heading to the nearest of the eight compass directions
    pub fn toward(from: Position, to: Position) -> Direction {
        let (dx, dy) = from.delta_to(to);
        if dx == 0 && dy == 0 {
            return Direction::None;
        }
        // atan2 in screen space; 0 rad points East, positive angles point South
        let angle = (dy as f64).atan2(dx as f64);
        let octant = ((angle / std::f64::consts::FRAC_PI_4).round() as i64).rem_euclid(8);
        match octant {
            0 => Direction::East,
            1 => Direction::SouthEast,
            2 => Direction::South,
            3 => Direction::SouthWest,
            4 => Direction::West,
            5 => Direction::NorthWest,
            6 => Direction::North,
            _ => Direction::NorthEast,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_world_round_trip_near_origin() {
        let pos = Position::from_world(PositionF::new(-120.0, 75.0));
        assert_eq!(pos, Position::new(XY_CENTER - 120, XY_CENTER + 75));
        assert_eq!(pos.to_world(), PositionF::new(-120.0, 75.0));
    }

    #[test]
    fn test_offset_saturates() {
        let edge = Position::new(5, u32::MAX - 1);
        assert_eq!(edge.offset(-10, 10), Position::new(0, u32::MAX));
    }

    #[test]
    fn test_distance() {
        let a = Position::from_offset(0, 0);
        let b = Position::from_offset(3, -4);
        assert!((a.distance_to(b) - 5.0).abs() < f32::EPSILON);
    }

    #[test]
    fn test_chunk_bucket() {
        let pos = Position::new(1000, 255);
        assert_eq!(pos.chunk(256), ChunkCoord::new(3, 0));
        assert_eq!(Position::new(256, 256).chunk(256), ChunkCoord::new(1, 1));
    }

    #[test]
    fn test_chunk_square_radius() {
        let around: Vec<_> = ChunkCoord::new(10, 10).square(1).collect();
        assert_eq!(around.len(), 9);
        assert_eq!(around[0], ChunkCoord::new(9, 9));
        assert_eq!(around[8], ChunkCoord::new(11, 11));

        // The grid edge clips the square
        let corner: Vec<_> = ChunkCoord::new(0, 0).square(1).collect();
        assert_eq!(corner.len(), 4);
    }

    #[test]
    fn test_direction_wire_values() {
        assert_eq!(Direction::South.as_u8(), 0);
        assert_eq!(Direction::North.as_u8(), 4);
        assert_eq!(Direction::None.as_u8(), 8);
        assert_eq!(Direction::from_u8(5), Some(Direction::NorthEast));
        assert_eq!(Direction::from_u8(9), None);
    }

    #[test]
    fn test_diagonal_step_normalised() {
        let origin = Position::CENTER;
        assert_eq!(Direction::North.advance(origin, 12.0), Position::from_offset(0, -12));
        assert_eq!(Direction::East.advance(origin, 12.0), Position::from_offset(12, 0));
        // 12 / sqrt(2) = 8.485 -> 8
        assert_eq!(Direction::SouthWest.advance(origin, 12.0), Position::from_offset(-8, 8));
        assert_eq!(Direction::None.advance(origin, 12.0), origin);

        let far = Position::from_offset(1_500_000_000, -1_500_000_000);
        assert_eq!(
            Direction::NorthEast.advance(far, 12.0),
            Position::from_offset(1_500_000_008, -1_500_000_008)
        );
    }

    #[test]
    fn test_distance_across_the_whole_grid() {
        let a = Position::new(0, 0);
        let b = Position::new(u32::MAX, u32::MAX);
        let expected = (u32::MAX as f64 * std::f64::consts::SQRT_2) as f32;
        assert!((a.distance_to(b) / expected - 1.0).abs() < 1e-6);
        assert_eq!(Position::CENTER.distance_to(Position::from_offset(3, 4)), 5.0);
    }

    #[test]
    fn test_toward() {
        let origin = Position::CENTER;
        assert_eq!(Direction::toward(origin, origin.offset(0, -50)), Direction::North);
        assert_eq!(Direction::toward(origin, origin.offset(50, 0)), Direction::East);
        assert_eq!(Direction::toward(origin, origin.offset(-40, 40)), Direction::SouthWest);
        assert_eq!(Direction::toward(origin, origin.offset(40, -38)), Direction::NorthEast);
        assert_eq!(Direction::toward(origin, origin), Direction::None);
    }
}
