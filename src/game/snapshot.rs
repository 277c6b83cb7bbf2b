//! Snapshot serializer
//!
//! Builds a player's world-update payload from the chunks around them:
//!
//! ```text
//! [u32 entity_count][entity records...][u32 object_count][object records...]
//! ```
//!
//! Each chunk's two sections are encoded at most once per tick and shared by
//! every viewer whose neighbourhood includes that chunk.

use bytes::Bytes;

use crate::error::ProtocolError;
use crate::game::area::{CacheOutcome, ChunkSections};
use crate::game::entity::{EffectFlags, Entity, EntityId};
use crate::game::object::{ObjectCategory, ObjectId, WorldObject};
use crate::game::position::{Direction, Position};
use crate::game::world::Simulation;
use crate::net::buffer::PacketBuffer;

/// Encoded size of one entity record
pub const ENTITY_RECORD_SIZE: usize = 18;

/// Encoded size of one object record
pub const OBJECT_RECORD_SIZE: usize = 20;

fn write_entity(buf: &mut PacketBuffer, entity: &Entity) {
    buf.write_u32(entity.id);
    buf.write_u32(entity.position.x);
    buf.write_u32(entity.position.y);
    buf.write_i16(entity.health);
    buf.write_u16(entity.effects.bits());
    buf.write_u8(entity.facing.as_u8());
    buf.write_u8(entity.kind.wire_id());
}

fn write_object(buf: &mut PacketBuffer, object: &WorldObject) {
    buf.write_u64(object.id);
    buf.write_u8(object.kind.category.as_u8());
    buf.write_u8(object.kind.kind);
    buf.write_u16(object.kind.sprite);
    buf.write_u32(object.position.x);
    buf.write_u32(object.position.y);
}

/// Encode one chunk's sections from scratch.
///
/// Entity ids without a valid entity behind them are skipped.
pub fn encode_sections(sim: &Simulation, entities: &[EntityId], objects: &[WorldObject]) -> ChunkSections {
    let mut entity_buf = PacketBuffer::with_capacity(entities.len() * ENTITY_RECORD_SIZE);
    let mut entity_count = 0;
    for entity in entities.iter().filter_map(|id| sim.entity(*id)).filter(|e| e.valid) {
        write_entity(&mut entity_buf, entity);
        entity_count += 1;
    }

    let mut object_buf = PacketBuffer::with_capacity(objects.len() * OBJECT_RECORD_SIZE);
    for object in objects {
        write_object(&mut object_buf, object);
    }

    ChunkSections {
        entity_count,
        entities: entity_buf.freeze(),
        object_count: objects.len() as u32,
        objects: object_buf.freeze(),
    }
}

/// A built payload plus the cache behaviour behind it
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub payload: Bytes,
    pub cache_hits: u32,
    pub cache_misses: u32,
}

fn assemble(sections: &[ChunkSections]) -> Bytes {
    let entity_count: u32 = sections.iter().map(|s| s.entity_count).sum();
    let object_count: u32 = sections.iter().map(|s| s.object_count).sum();
    let size = 8 + sections
        .iter()
        .map(|s| s.entities.len() + s.objects.len())
        .sum::<usize>();

    let mut buf = PacketBuffer::with_capacity(size);
    buf.write_u32(entity_count);
    for section in sections {
        buf.write_bytes(&section.entities);
    }
    buf.write_u32(object_count);
    for section in sections {
        buf.write_bytes(&section.objects);
    }
    buf.freeze()
}

/// Build the world update for `viewer`, reusing chunk caches stamped with the current tick.
///
/// Returns `None` when the viewer no longer exists.
pub fn build_world_update(sim: &Simulation, viewer: EntityId, radius: u32) -> Option<Snapshot> {
    let entity = sim.entity(viewer).filter(|e| e.valid)?;
    let area = sim.area(entity.area)?;
    let tick = sim.tick();

    let mut hits = 0;
    let mut misses = 0;
    let sections: Vec<ChunkSections> = area
        .neighborhood(entity.position, radius)
        .iter()
        .map(|chunk| {
            let (sections, outcome) = chunk.sections(tick, |ids, objects| encode_sections(sim, ids, objects));
            match outcome {
                CacheOutcome::Hit => hits += 1,
                CacheOutcome::Miss => misses += 1,
            }
            sections
        })
        .collect();

    Some(Snapshot {
        payload: assemble(&sections),
        cache_hits: hits,
        cache_misses: misses,
    })
}

/// Build the world update for `viewer` without touching any cache
pub fn build_world_update_uncached(sim: &Simulation, viewer: EntityId, radius: u32) -> Option<Bytes> {
    let entity = sim.entity(viewer).filter(|e| e.valid)?;
    let area = sim.area(entity.area)?;
    let sections: Vec<ChunkSections> = area
        .neighborhood(entity.position, radius)
        .iter()
        .map(|chunk| {
            let contents = chunk.lock();
            encode_sections(sim, contents.entities().as_slice(), contents.objects().as_slice())
        })
        .collect();
    Some(assemble(&sections))
}

/// Decoded entity record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EntityRecord {
    pub id: EntityId,
    pub position: Position,
    pub health: i16,
    pub effects: EffectFlags,
    pub facing: Direction,
    pub kind: u8,
}

/// Decoded object record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ObjectRecord {
    pub id: ObjectId,
    pub category: ObjectCategory,
    pub kind: u8,
    pub sprite: u16,
    pub position: Position,
}

/// Reference decoder for the world-update payload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorldUpdate {
    pub entities: Vec<EntityRecord>,
    pub objects: Vec<ObjectRecord>,
}

impl WorldUpdate {
    pub fn decode(payload: &[u8]) -> Result<Self, ProtocolError> {
        let malformed = |e: ProtocolError| ProtocolError::MalformedSnapshot(e.to_string());
        let mut buf = PacketBuffer::for_opcode(crate::protocol::ServerOpcode::WorldUpdate.as_u8(), payload);

        let entity_count = buf.read_u32().map_err(malformed)? as usize;
        if entity_count * ENTITY_RECORD_SIZE > buf.remaining() {
            return Err(ProtocolError::MalformedSnapshot(format!(
                "{} entity records do not fit in {} bytes",
                entity_count,
                buf.remaining()
            )));
        }
        let mut entities = Vec::with_capacity(entity_count);
        for _ in 0..entity_count {
            let id = buf.read_u32().map_err(malformed)?;
            let x = buf.read_u32().map_err(malformed)?;
            let y = buf.read_u32().map_err(malformed)?;
            let health = buf.read_i16().map_err(malformed)?;
            let effects = EffectFlags::from_bits_retain(buf.read_u16().map_err(malformed)?);
            let facing_raw = buf.read_u8().map_err(malformed)?;
            let facing = Direction::from_u8(facing_raw).ok_or(ProtocolError::InvalidDirection(facing_raw))?;
            let kind = buf.read_u8().map_err(malformed)?;
            entities.push(EntityRecord {
                id,
                position: Position::new(x, y),
                health,
                effects,
                facing,
                kind,
            });
        }

        let object_count = buf.read_u32().map_err(malformed)? as usize;
        if object_count * OBJECT_RECORD_SIZE != buf.remaining() {
            return Err(ProtocolError::MalformedSnapshot(format!(
                "{} object records do not match {} bytes",
                object_count,
                buf.remaining()
            )));
        }
        let mut objects = Vec::with_capacity(object_count);
        for _ in 0..object_count {
            let id = buf.read_u64().map_err(malformed)?;
            let category_raw = buf.read_u8().map_err(malformed)?;
            let category = ObjectCategory::from_u8(category_raw)
                .ok_or(ProtocolError::InvalidObjectCategory(category_raw))?;
            let kind = buf.read_u8().map_err(malformed)?;
            let sprite = buf.read_u16().map_err(malformed)?;
            let x = buf.read_u32().map_err(malformed)?;
            let y = buf.read_u32().map_err(malformed)?;
            objects.push(ObjectRecord {
                id,
                category,
                kind,
                sprite,
                position: Position::new(x, y),
            });
        }

        Ok(Self { entities, objects })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::CombatMode;
    use crate::game::object::ObjectKind;
    use crate::game::world::{WorldSettings, DEFAULT_AREA};
    use pretty_assertions::assert_eq;

    fn sim() -> Simulation {
        Simulation::new(WorldSettings::default())
    }

    #[test]
    fn test_empty_neighbourhood() {
        let mut sim = sim();
        let viewer = sim.insert_player_at(None, Position::CENTER);
        sim.advance_tick();
        let snapshot = build_world_update(&sim, viewer, 2).unwrap();
        // The viewer sees itself
        assert_eq!(snapshot.payload.len(), 4 + ENTITY_RECORD_SIZE + 4);
        let update = WorldUpdate::decode(&snapshot.payload).unwrap();
        assert_eq!(update.entities.len(), 1);
        assert!(update.objects.is_empty());
    }

    #[test]
    fn test_decode_matches_source() {
        let mut sim = sim();
        let viewer = sim.insert_player_at(None, Position::from_offset(0, 0));
        let zombie = sim.insert_creature_at(Position::from_offset(300, -40));
        sim.set_mode(viewer, CombatMode::Heal).unwrap();
        sim.entity_mut(zombie).unwrap().health = -7;
        sim.entity_mut(zombie).unwrap().effects = EffectFlags::INJURED;
        let kind = ObjectKind::new(ObjectCategory::Blocking, 4, 513);
        let obj = sim
            .place_object(DEFAULT_AREA, kind, Position::from_offset(-20, 90))
            .unwrap();
        sim.advance_tick();

        let snapshot = build_world_update(&sim, viewer, 2).unwrap();
        let mut update = WorldUpdate::decode(&snapshot.payload).unwrap();
        update.entities.sort_by_key(|e| e.id);

        assert_eq!(
            update.entities[1],
            EntityRecord {
                id: zombie,
                position: Position::from_offset(300, -40),
                health: -7,
                effects: EffectFlags::INJURED,
                facing: Direction::South,
                kind: 1,
            }
        );
        assert_eq!(update.entities[0].kind, 0);
        assert_eq!(
            update.objects,
            vec![ObjectRecord {
                id: obj,
                category: ObjectCategory::Blocking,
                kind: 4,
                sprite: 513,
                position: Position::from_offset(-20, 90),
            }]
        );
    }

    #[test]
    fn test_cache_shared_between_viewers() {
        let mut sim = sim();
        let a = sim.insert_player_at(None, Position::from_offset(0, 0));
        let b = sim.insert_player_at(None, Position::from_offset(40, 0));
        sim.advance_tick();

        let first = build_world_update(&sim, a, 1).unwrap();
        let second = build_world_update(&sim, b, 1).unwrap();
        assert_eq!(first.cache_hits, 0);
        assert!(first.cache_misses > 0);
        assert_eq!(second.cache_misses, 0);
        assert_eq!(first.payload, second.payload);
    }

    #[test]
    fn test_cached_matches_fresh_encoding() {
        let mut sim = sim();
        let viewer = sim.insert_player_at(None, Position::from_offset(0, 0));
        for i in 0..12 {
            sim.insert_creature_at(Position::from_offset(i * 90 - 500, (i % 3) * 200 - 200));
        }
        sim.advance_tick();
        let cached = build_world_update(&sim, viewer, 2).unwrap();
        // Second pass is fully served from cache
        let again = build_world_update(&sim, viewer, 2).unwrap();
        assert_eq!(again.cache_misses, 0);
        assert_eq!(again.payload, cached.payload);
        assert_eq!(cached.payload, build_world_update_uncached(&sim, viewer, 2).unwrap());
    }

    #[test]
    fn test_edit_invalidates_within_tick() {
        let mut sim = sim();
        let viewer = sim.insert_player_at(None, Position::from_offset(0, 0));
        sim.advance_tick();
        build_world_update(&sim, viewer, 1).unwrap();

        let kind = ObjectKind::new(ObjectCategory::Decoration, 0, 9);
        sim.place_object(DEFAULT_AREA, kind, Position::from_offset(5, 5)).unwrap();
        let snapshot = build_world_update(&sim, viewer, 1).unwrap();
        let update = WorldUpdate::decode(&snapshot.payload).unwrap();
        assert_eq!(update.objects.len(), 1);
    }

    #[test]
    fn test_missing_viewer() {
        let sim = sim();
        assert!(build_world_update(&sim, 42, 2).is_none());
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(WorldUpdate::decode(&[]).is_err());
        // Claims one entity but carries none
        assert!(WorldUpdate::decode(&[1, 0, 0, 0, 0, 0, 0, 0]).is_err());
        // Trailing bytes after the object section
        assert!(WorldUpdate::decode(&[0, 0, 0, 0, 0, 0, 0, 0, 9]).is_err());
    }
}
