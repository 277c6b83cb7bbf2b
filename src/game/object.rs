//! Placed world objects

use serde::{Deserialize, Serialize};

use super::position::Position;

/// Unique world object identifier
pub type ObjectId = u64;

/// Broad object class; only `Blocking` takes part in collision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ObjectCategory {
    Decoration = 0,
    Blocking = 1,
    Marker = 2,
}

impl ObjectCategory {
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::Decoration),
            1 => Some(Self::Blocking),
            2 => Some(Self::Marker),
            _ => None,
        }
    }
}

/// Composite object type: category, kind within the category, sprite
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ObjectKind {
    pub category: ObjectCategory,
    pub kind: u8,
    pub sprite: u16,
}

impl ObjectKind {
    pub const fn new(category: ObjectCategory, kind: u8, sprite: u16) -> Self {
        Self {
            category,
            kind,
            sprite,
        }
    }
}

/// An object placed in a chunk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorldObject {
    pub id: ObjectId,
    #[serde(flatten)]
    pub kind: ObjectKind,
    pub position: Position,
}

impl WorldObject {
    pub fn new(id: ObjectId, kind: ObjectKind, position: Position) -> Self {
        Self { id, kind, position }
    }

    pub fn is_blocking(&self) -> bool {
        self.kind.category == ObjectCategory::Blocking
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_category_wire_values() {
        assert_eq!(ObjectCategory::Blocking.as_u8(), 1);
        assert_eq!(ObjectCategory::from_u8(2), Some(ObjectCategory::Marker));
        assert_eq!(ObjectCategory::from_u8(7), None);
    }

    #[test]
    fn test_json_shape() {
        let obj = WorldObject::new(
            7,
            ObjectKind::new(ObjectCategory::Blocking, 3, 120),
            Position::new(10, 20),
        );
        let json = serde_json::to_value(obj).unwrap();
        assert_eq!(json["id"], 7);
        assert_eq!(json["category"], "blocking");
        assert_eq!(json["sprite"], 120);
        assert_eq!(json["position"]["x"], 10);
        assert!(obj.is_blocking());
    }
}
