//! Movement and collision
//!
//! A move steps the entity one tick's distance in its requested direction and
//! checks the candidate position against everything in the surrounding chunk
//! neighbourhood:
//! - another valid entity closer than `contact_distance` rejects the move, and
//!   the mover engages the contacted entity in its own combat mode
//! - a blocking object closer than `blocking_distance` rejects the move
//!
//! A move that increases the distance to something it already overlaps is
//! allowed, so overlapping entities can separate. Committed moves update the
//! position and the chunk membership together.

use rand::Rng;
use tracing::{debug, trace};

use crate::game::combat;
use crate::game::entity::{AreaId, EntityId, EntityKind};
use crate::game::position::{Direction, Position};
use crate::game::world::Simulation;

/// Result of a single movement attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MoveOutcome {
    /// No direction requested, or the entity cannot move
    Idle,
    /// Position and chunk membership were updated
    Moved { from: Position, to: Position },
    /// Rejected by another entity
    Contact { other: EntityId, engaged: bool },
    /// Rejected by a blocking object
    Blocked,
}

/// What stands in the way of a candidate position
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Obstruction {
    Entity(EntityId),
    Object,
}

/// Whether moving from `from` to `to` closes in on `other` inside `threshold`
fn obstructs(from: Position, to: Position, other: Position, threshold: f32) -> bool {
    let after = to.distance_to(other);
    after < threshold && after <= from.distance_to(other)
}

/// Scan the collision neighbourhood of `from` for anything blocking `to`.
///
/// Entity contact takes precedence over objects.
fn find_obstruction(
    sim: &Simulation,
    area: AreaId,
    mover: Option<EntityId>,
    from: Position,
    to: Position,
) -> Option<Obstruction> {
    let settings = &sim.settings().world;
    let area = sim.area(area)?;

    let mut blocked = false;
    for chunk in area.neighborhood(from, settings.collision_radius) {
        let contents = chunk.lock();
        for &other_id in contents.entities() {
            if Some(other_id) == mover {
                continue;
            }
            let Some(other) = sim.entity(other_id) else {
                continue;
            };
            if other.valid && obstructs(from, to, other.position, settings.contact_distance) {
                return Some(Obstruction::Entity(other_id));
            }
        }
        if !blocked {
            blocked = contents.objects().iter().any(|object| {
                object.is_blocking()
                    && obstructs(from, to, object.position, settings.blocking_distance)
            });
        }
    }

    blocked.then_some(Obstruction::Object)
}

/// Reset stale player input and steer creatures towards their quarry
pub fn refresh_direction(sim: &mut Simulation, id: EntityId) {
    let tick = sim.tick();
    let lag_tolerance = sim.settings().world.lag_tolerance_ticks;

    let Some(entity) = sim.entity(id).filter(|e| e.valid) else {
        return;
    };

    let (dir, quarry) = match &entity.kind {
        EntityKind::Player(state) => {
            if entity.move_dir.is_none() || tick.saturating_sub(state.last_input_tick) <= lag_tolerance {
                return;
            }
            debug!(entity_id = id, tick = tick, "Movement input went stale, stopping");
            (Direction::None, None)
        }
        EntityKind::Creature(_) => {
            let quarry = if entity.is_injured() {
                None
            } else {
                nearest_quarry(sim, id)
            };
            let from = entity.position;
            let dir = quarry
                .and_then(|q| sim.entity(q))
                .map(|target| Direction::toward(from, target.position))
                .unwrap_or(Direction::None);
            (dir, quarry)
        }
    };

    if let Some(entity) = sim.entity_mut(id) {
        entity.move_dir = dir;
        if let EntityKind::Creature(state) = &mut entity.kind {
            state.quarry = quarry;
        }
    }
}

/// Closest valid, uninjured player within aggro distance of a creature
fn nearest_quarry(sim: &Simulation, id: EntityId) -> Option<EntityId> {
    let hunter = sim.entity(id)?;
    let area = sim.area(hunter.area)?;
    let aggro = sim.settings().combat.aggro_distance;
    let radius = (aggro / area.chunk_size() as f32).ceil() as u32;

    let mut best: Option<(EntityId, f32)> = None;
    for chunk in area.neighborhood(hunter.position, radius) {
        for other_id in chunk.entity_ids() {
            let Some(other) = sim.entity(other_id) else {
                continue;
            };
            if !other.valid || !other.is_player() || other.is_injured() {
                continue;
            }
            let distance = hunter.position.distance_to(other.position);
            if distance <= aggro && best.map_or(true, |(_, d)| distance < d) {
                best = Some((other_id, distance));
            }
        }
    }
    best.map(|(id, _)| id)
}

/// Attempt one tick of movement for an entity
pub fn step_entity(sim: &mut Simulation, id: EntityId) -> MoveOutcome {
    let speed = sim.settings().world.move_speed;

    let (area_id, from, dir) = match sim.entity(id) {
        Some(e) if e.valid && !e.move_dir.is_none() && !e.is_injured() => (e.area, e.position, e.move_dir),
        _ => return MoveOutcome::Idle,
    };

    let to = dir.advance(from, speed);
    if let Some(entity) = sim.entity_mut(id) {
        entity.facing = dir;
    }
    if to == from {
        return MoveOutcome::Idle;
    }

    match find_obstruction(sim, area_id, Some(id), from, to) {
        Some(Obstruction::Entity(other)) => {
            let mode = sim.entity(id).map(|e| e.mode).unwrap_or_default();
            let engaged = combat::engage(sim, id, other, mode);
            trace!(entity_id = id, other = other, engaged = engaged, "Move rejected by contact");
            MoveOutcome::Contact { other, engaged }
        }
        Some(Obstruction::Object) => {
            trace!(entity_id = id, "Move rejected by blocking object");
            MoveOutcome::Blocked
        }
        None => {
            match sim.area(area_id) {
                Some(area) => area.relocate_entity(id, from, to),
                None => {
                    debug!(entity_id = id, area = area_id, "Move in missing area ignored");
                    return MoveOutcome::Idle;
                }
            }
            if let Some(entity) = sim.entity_mut(id) {
                entity.position = to;
            }
            MoveOutcome::Moved { from, to }
        }
    }
}

/// Whether an entity could stand at `pos` without touching anything
pub fn is_position_free(sim: &Simulation, area: AreaId, pos: Position) -> bool {
    find_obstruction(sim, area, None, pos, pos).is_none()
}

/// Pick a random collision-free position within `radius` units of `center`
pub fn find_spawn_position<R: Rng>(
    sim: &Simulation,
    area: AreaId,
    center: Position,
    radius: u32,
    rng: &mut R,
    attempts: u32,
) -> Option<Position> {
    let r = radius as i64;
    (0..attempts)
        .map(|_| center.offset(rng.gen_range(-r..=r), rng.gen_range(-r..=r)))
        .find(|&pos| is_position_free(sim, area, pos))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::entity::{CombatMode, CreatureState, EffectFlags};
    use crate::game::object::{ObjectCategory, ObjectKind};
    use crate::game::world::{WorldSettings, DEFAULT_AREA};

    fn sim() -> Simulation {
        Simulation::new(WorldSettings::default())
    }

    #[test]
    fn test_free_move_north() {
        let mut sim = sim();
        let start = Position::from_offset(0, 0);
        let id = sim.insert_player_at(None, start);
        sim.set_move_direction(id, Direction::North).unwrap();

        let outcome = step_entity(&mut sim, id);
        let expected = start.offset(0, -12);
        assert_eq!(outcome, MoveOutcome::Moved { from: start, to: expected });
        assert_eq!(sim.entity(id).unwrap().position, expected);
        assert_eq!(sim.entity(id).unwrap().facing, Direction::North);
    }

    #[test]
    fn test_move_across_chunk_boundary_updates_membership() {
        let mut sim = sim();
        let area_size = sim.settings().world.chunk_size;
        // One unit left of a chunk boundary
        let start = Position::new(area_size * 100 - 1, area_size * 100);
        let id = sim.insert_player_at(None, start);
        sim.set_move_direction(id, Direction::East).unwrap();
        step_entity(&mut sim, id);

        let entity = sim.entity(id).unwrap();
        let area = sim.area(DEFAULT_AREA).unwrap();
        assert!(area.chunk_at(entity.position).unwrap().contains_entity(id));
        assert!(!area.chunk_at(start).unwrap().contains_entity(id));
    }

    #[test]
    fn test_contact_rejects_and_engages() {
        let mut sim = sim();
        let a = sim.insert_player_at(None, Position::from_offset(0, 0));
        let b = sim.insert_player_at(None, Position::from_offset(30, 0));
        sim.set_move_direction(a, Direction::East).unwrap();

        let outcome = step_entity(&mut sim, a);
        assert_eq!(outcome, MoveOutcome::Contact { other: b, engaged: true });
        assert_eq!(sim.entity(a).unwrap().position, Position::from_offset(0, 0));
        assert!(sim.entity(a).unwrap().effects.contains(EffectFlags::TARGETING));
        assert!(sim.entity(b).unwrap().effects.contains(EffectFlags::TARGETED));

        // A second bump does not duplicate the link
        let outcome = step_entity(&mut sim, a);
        assert_eq!(outcome, MoveOutcome::Contact { other: b, engaged: false });
        assert_eq!(sim.entity(a).unwrap().targets.len(), 1);
    }

    #[test]
    fn test_overlapping_entities_may_separate() {
        let mut sim = sim();
        let a = sim.insert_player_at(None, Position::from_offset(0, 0));
        sim.insert_player_at(None, Position::from_offset(10, 0));
        sim.set_move_direction(a, Direction::West).unwrap();
        assert!(matches!(step_entity(&mut sim, a), MoveOutcome::Moved { .. }));
    }

    #[test]
    fn test_blocking_object_rejects_without_side_effects() {
        let mut sim = sim();
        let a = sim.insert_player_at(None, Position::from_offset(0, 0));
        sim.place_object(
            DEFAULT_AREA,
            ObjectKind::new(ObjectCategory::Blocking, 0, 1),
            Position::from_offset(0, 30),
        )
        .unwrap();
        sim.set_move_direction(a, Direction::South).unwrap();

        assert_eq!(step_entity(&mut sim, a), MoveOutcome::Blocked);
        let entity = sim.entity(a).unwrap();
        assert_eq!(entity.position, Position::from_offset(0, 0));
        assert!(entity.targets.is_empty());
    }

    #[test]
    fn test_decoration_does_not_block() {
        let mut sim = sim();
        let a = sim.insert_player_at(None, Position::from_offset(0, 0));
        sim.place_object(
            DEFAULT_AREA,
            ObjectKind::new(ObjectCategory::Decoration, 0, 1),
            Position::from_offset(0, 20),
        )
        .unwrap();
        sim.set_move_direction(a, Direction::South).unwrap();
        assert!(matches!(step_entity(&mut sim, a), MoveOutcome::Moved { .. }));
    }

    #[test]
    fn test_stale_input_resets_direction() {
        let mut sim = sim();
        let lag = sim.settings().world.lag_tolerance_ticks;
        let id = sim.insert_player_at(None, Position::CENTER);
        sim.set_move_direction(id, Direction::East).unwrap();

        for _ in 0..lag {
            sim.advance_tick();
        }
        refresh_direction(&mut sim, id);
        assert_eq!(sim.entity(id).unwrap().move_dir, Direction::East);

        sim.advance_tick();
        refresh_direction(&mut sim, id);
        assert_eq!(sim.entity(id).unwrap().move_dir, Direction::None);
        assert_eq!(step_entity(&mut sim, id), MoveOutcome::Idle);
    }

    #[test]
    fn test_creature_steers_to_nearest_player() {
        let mut sim = sim();
        let zombie = sim.insert_creature_at(Position::from_offset(0, 0));
        let near = sim.insert_player_at(None, Position::from_offset(0, -200));
        sim.insert_player_at(None, Position::from_offset(300, 0));
        sim.insert_player_at(None, Position::from_offset(5000, 0));

        refresh_direction(&mut sim, zombie);
        let entity = sim.entity(zombie).unwrap();
        assert_eq!(entity.move_dir, Direction::North);
        let expected = EntityKind::Creature(CreatureState { quarry: Some(near) });
        assert_eq!(entity.kind, expected);
    }

    #[test]
    fn test_creature_idles_without_quarry() {
        let mut sim = sim();
        let zombie = sim.insert_creature_at(Position::from_offset(0, 0));
        sim.insert_player_at(None, Position::from_offset(5000, 0));
        refresh_direction(&mut sim, zombie);
        assert_eq!(sim.entity(zombie).unwrap().move_dir, Direction::None);
    }

    #[test]
    fn test_heal_mode_contact_requires_wounded_target() {
        let mut sim = sim();
        let healer = sim.insert_player_at(None, Position::from_offset(0, 0));
        sim.insert_player_at(None, Position::from_offset(30, 0));
        sim.set_mode(healer, CombatMode::Heal).unwrap();
        sim.set_move_direction(healer, Direction::East).unwrap();
        assert!(matches!(
            step_entity(&mut sim, healer),
            MoveOutcome::Contact { engaged: false, .. }
        ));
    }

    #[test]
    fn test_find_spawn_position_gives_up() {
        let mut sim = sim();
        sim.insert_player_at(None, Position::CENTER);
        let mut rng = rand::thread_rng();
        // Radius zero leaves only the occupied centre
        assert!(find_spawn_position(&sim, DEFAULT_AREA, Position::CENTER, 0, &mut rng, 5).is_none());
        assert!(!is_position_free(&sim, DEFAULT_AREA, Position::CENTER));
        assert!(is_position_free(&sim, DEFAULT_AREA, Position::from_offset(100, 0)));
    }
}
