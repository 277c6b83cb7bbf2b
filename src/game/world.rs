//! World module
//!
//! Owns the simulation state and the lock that serializes every mutation:
//! - [`World`] is the lifecycle-scoped registry handed to the scheduler and
//!   every connection handler
//! - [`Simulation`] holds areas, entities, id counters and the tick counter;
//!   it is only reachable through [`World::lock`]
//! - Spawning, despawning, client commands and the mutation phase all run
//!   against a locked `Simulation`

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use parking_lot::{Mutex, MutexGuard, RwLock};
use rand::Rng;
use tracing::{debug, info, warn};

use crate::config::{CombatConfig, WorldConfig};
use crate::error::{Result, WorldError};
use crate::game::area::Area;
use crate::game::combat::{self, CombatEvent};
use crate::game::entity::{AreaId, CombatMode, Entity, EntityId};
use crate::game::movement;
use crate::game::object::{ObjectId, ObjectKind, WorldObject};
use crate::game::position::{Direction, Position};

/// Area every player joins
pub const DEFAULT_AREA: AreaId = 0;

/// Random placements tried before a spawn is reported as blocked
pub const SPAWN_ATTEMPTS: u32 = 64;

/// World settings
#[derive(Debug, Clone)]
pub struct WorldSettings {
    /// Server name
    pub name: String,
    /// Whether clients may place and remove objects
    pub editor_enabled: bool,
    /// Autosave interval in ticks (0 to disable)
    pub autosave_interval: u64,
    /// Simulation tuning
    pub world: WorldConfig,
    /// Combat tuning
    pub combat: CombatConfig,
}

impl Default for WorldSettings {
    fn default() -> Self {
        Self {
            name: "Gommo".to_string(),
            editor_enabled: false,
            autosave_interval: 0,
            world: WorldConfig::default(),
            combat: CombatConfig::default(),
        }
    }
}

impl WorldSettings {
    /// Set the world name
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// Enable or disable the object editor
    pub fn with_editor(mut self, enabled: bool) -> Self {
        self.editor_enabled = enabled;
        self
    }

    /// Set the autosave interval in ticks
    pub fn with_autosave_interval(mut self, ticks: u64) -> Self {
        self.autosave_interval = ticks;
        self
    }

    /// Replace the simulation tuning
    pub fn with_world(mut self, world: WorldConfig) -> Self {
        self.world = world;
        self
    }

    /// Replace the combat tuning
    pub fn with_combat(mut self, combat: CombatConfig) -> Self {
        self.combat = combat;
        self
    }
}

/// Areas, entities and counters mutated under the world lock
#[derive(Debug)]
pub struct Simulation {
    settings: WorldSettings,
    pub(crate) areas: Vec<Area>,
    pub(crate) entities: BTreeMap<EntityId, Entity>,
    tick: u64,
    next_entity_id: EntityId,
    next_object_id: ObjectId,
}

impl Simulation {
    /// Create a simulation with its primary area
    pub fn new(settings: WorldSettings) -> Self {
        let area = Area::new(DEFAULT_AREA, settings.world.area_name.clone(), settings.world.chunk_size);
        Self {
            settings,
            areas: vec![area],
            entities: BTreeMap::new(),
            tick: 0,
            next_entity_id: 1,
            next_object_id: 1,
        }
    }

    pub fn settings(&self) -> &WorldSettings {
        &self.settings
    }

    /// Current tick number
    pub fn tick(&self) -> u64 {
        self.tick
    }

    /// Advance the tick counter; any chunk cache stamped earlier becomes stale
    pub fn advance_tick(&mut self) -> u64 {
        self.tick += 1;
        self.tick
    }

    pub fn area(&self, id: AreaId) -> Option<&Area> {
        self.areas.get(id)
    }

    pub fn area_by_name(&self, name: &str) -> Option<&Area> {
        self.areas.iter().find(|a| a.name() == name)
    }

    pub fn areas(&self) -> &[Area] {
        &self.areas
    }

    pub fn entity(&self, id: EntityId) -> Option<&Entity> {
        self.entities.get(&id)
    }

    pub fn entity_mut(&mut self, id: EntityId) -> Option<&mut Entity> {
        self.entities.get_mut(&id)
    }

    /// All entities, including ones despawned this tick
    pub fn entities(&self) -> impl Iterator<Item = &Entity> {
        self.entities.values()
    }

    pub fn valid_entity_count(&self) -> usize {
        self.entities.values().filter(|e| e.valid).count()
    }

    /// Valid entities that live in `area`
    pub fn valid_entities_in(&self, area: AreaId) -> usize {
        self.entities
            .values()
            .filter(|e| e.valid && e.area == area)
            .count()
    }

    /// Connected players as (id, name), ordered by id
    pub fn players(&self) -> Vec<(EntityId, String)> {
        self.entities
            .values()
            .filter(|e| e.valid && e.is_player())
            .map(|e| (e.id, e.name.clone()))
            .collect()
    }

    fn allocate_entity_id(&mut self) -> EntityId {
        let id = self.next_entity_id;
        self.next_entity_id += 1;
        id
    }

    fn allocate_object_id(&mut self) -> ObjectId {
        let id = self.next_object_id;
        self.next_object_id += 1;
        id
    }

    fn insert_entity(&mut self, entity: Entity) -> EntityId {
        let id = entity.id;
        match self.areas.get(entity.area) {
            Some(area) => area.insert_entity(id, entity.position),
            None => warn!(entity_id = id, area = entity.area, "Spawn into missing area"),
        }
        self.entities.insert(id, entity);
        id
    }

    /// Insert a player at an exact position, without a collision check
    pub fn insert_player_at(&mut self, name: Option<String>, pos: Position) -> EntityId {
        let id = self.allocate_entity_id();
        let name = name.unwrap_or_else(|| format!("Player-{}", id));
        let entity = Entity::player(id, name, DEFAULT_AREA, pos, self.settings.combat.max_health);
        self.insert_entity(entity)
    }

    /// Insert a creature at an exact position, without a collision check
    pub fn insert_creature_at(&mut self, pos: Position) -> EntityId {
        let id = self.allocate_entity_id();
        let entity = Entity::creature(
            id,
            format!("Zombie-{}", id),
            DEFAULT_AREA,
            pos,
            self.settings.combat.max_health,
        );
        self.insert_entity(entity)
    }

    /// Spawn a player at a random collision-free spot near the centre
    pub fn spawn_player<R: Rng>(&mut self, rng: &mut R) -> Result<EntityId> {
        let radius = self.settings.world.spawn_radius;
        let pos = movement::find_spawn_position(self, DEFAULT_AREA, Position::CENTER, radius, rng, SPAWN_ATTEMPTS)
            .ok_or(WorldError::SpawnBlocked(SPAWN_ATTEMPTS))?;
        let id = self.insert_player_at(None, pos);
        info!(entity_id = id, position = %pos, "Player spawned");
        Ok(id)
    }

    /// Spawn a hostile creature at a random collision-free spot within `range` of the centre
    pub fn spawn_creature<R: Rng>(&mut self, rng: &mut R, range: u32) -> Result<EntityId> {
        let pos = movement::find_spawn_position(self, DEFAULT_AREA, Position::CENTER, range, rng, SPAWN_ATTEMPTS)
            .ok_or(WorldError::SpawnBlocked(SPAWN_ATTEMPTS))?;
        Ok(self.insert_creature_at(pos))
    }

    /// Remove an entity from the world.
    ///
    /// The entity leaves its chunk and all links immediately; its record stays
    /// behind, marked invalid, until the end of the next mutation phase.
    pub fn despawn(&mut self, id: EntityId) -> Option<String> {
        let (area, pos, name) = match self.entities.get_mut(&id) {
            Some(entity) if entity.valid => {
                entity.valid = false;
                entity.move_dir = Direction::None;
                (entity.area, entity.position, entity.name.clone())
            }
            _ => {
                debug!(entity_id = id, "Despawn of unknown entity ignored");
                return None;
            }
        };

        combat::unlink_all(self, id);
        if let Some(area) = self.areas.get(area) {
            area.remove_entity(id, pos);
        }
        Some(name)
    }

    /// Drop despawned entity records
    pub fn reap_invalid(&mut self) -> usize {
        let before = self.entities.len();
        self.entities.retain(|_, e| e.valid);
        before - self.entities.len()
    }

    /// Record a client movement request
    pub fn set_move_direction(&mut self, id: EntityId, dir: Direction) -> Result<()> {
        let tick = self.tick;
        let entity = self
            .entities
            .get_mut(&id)
            .filter(|e| e.valid)
            .ok_or(WorldError::EntityNotFound(id))?;
        entity.record_input(dir, tick);
        Ok(())
    }

    /// Rename an entity, returning the old name
    pub fn rename(&mut self, id: EntityId, name: impl Into<String>) -> Result<String> {
        let entity = self
            .entities
            .get_mut(&id)
            .filter(|e| e.valid)
            .ok_or(WorldError::EntityNotFound(id))?;
        Ok(std::mem::replace(&mut entity.name, name.into()))
    }

    /// Switch combat mode; outgoing links from the previous mode are dropped
    pub fn set_mode(&mut self, id: EntityId, mode: CombatMode) -> Result<()> {
        let entity = self
            .entities
            .get_mut(&id)
            .filter(|e| e.valid)
            .ok_or(WorldError::EntityNotFound(id))?;
        if entity.mode == mode {
            return Ok(());
        }
        entity.mode = mode;
        let stale: Vec<EntityId> = entity.targets.iter().map(|l| l.target).collect();
        for target in stale {
            combat::disengage(self, id, target);
        }
        Ok(())
    }

    /// Place a new object and mark its area dirty
    pub fn place_object(&mut self, area: AreaId, kind: ObjectKind, pos: Position) -> Result<ObjectId> {
        if area >= self.areas.len() {
            return Err(WorldError::AreaNotFound(area.to_string()).into());
        }
        let id = self.allocate_object_id();
        let target = &self.areas[area];
        target.insert_object(WorldObject::new(id, kind, pos));
        target.mark_dirty();
        Ok(id)
    }

    /// Remove an object and mark its area dirty
    pub fn remove_object(&mut self, area: AreaId, id: ObjectId, pos: Position) -> Result<WorldObject> {
        let area = self
            .areas
            .get(area)
            .ok_or_else(|| WorldError::AreaNotFound(area.to_string()))?;
        let removed = area
            .remove_object(id, pos)
            .ok_or(WorldError::ObjectNotFound(id))?;
        area.mark_dirty();
        Ok(removed)
    }

    /// Populate an area with persisted objects, keeping the id counter ahead of them
    pub fn load_objects(&mut self, area: AreaId, objects: Vec<WorldObject>) -> Result<usize> {
        let target = self
            .areas
            .get(area)
            .ok_or_else(|| WorldError::AreaNotFound(area.to_string()))?;
        let count = objects.len();
        let mut max_id = 0;
        for object in objects {
            max_id = max_id.max(object.id);
            target.insert_object(object);
        }
        self.next_object_id = self.next_object_id.max(max_id + 1);
        Ok(count)
    }

    /// Serial mutation phase: direction refresh, movement, then combat for every entity
    pub fn run_mutation_phase(&mut self) -> Vec<CombatEvent> {
        let mut events = Vec::new();
        let ids: Vec<EntityId> = self.entities.keys().copied().collect();
        for id in ids {
            movement::refresh_direction(self, id);
            movement::step_entity(self, id);
            combat::process_entity(self, id, &mut events);
        }
        self.reap_invalid();
        events
    }

    /// Release idle chunk caches in every area
    pub fn purge_caches(&self) -> usize {
        let max_idle = self.settings.world.cache_max_idle;
        self.areas
            .iter()
            .map(|area| area.purge_caches(self.tick, max_idle))
            .sum()
    }
}

/// World registry: the simulation plus lock-free status mirrors
pub struct World {
    /// World settings
    pub settings: WorldSettings,
    sim: Mutex<Simulation>,
    /// Mirror of the simulation tick for lock-free reads
    tick: AtomicU64,
    running: AtomicBool,
    start_time: RwLock<Option<Instant>>,
}

impl World {
    /// Create a new world with custom settings
    pub fn with_settings(settings: WorldSettings) -> Self {
        info!(
            name = %settings.name,
            area = %settings.world.area_name,
            chunk_size = settings.world.chunk_size,
            tick_rate_ms = settings.world.tick_rate_ms,
            "Creating game world"
        );

        Self {
            sim: Mutex::new(Simulation::new(settings.clone())),
            settings,
            tick: AtomicU64::new(0),
            running: AtomicBool::new(false),
            start_time: RwLock::new(None),
        }
    }

    /// Acquire the global simulation lock
    pub fn lock(&self) -> MutexGuard<'_, Simulation> {
        self.sim.lock()
    }

    /// Get the current tick number
    pub fn tick(&self) -> u64 {
        self.tick.load(Ordering::SeqCst)
    }

    pub(crate) fn publish_tick(&self, tick: u64) {
        self.tick.store(tick, Ordering::SeqCst);
    }

    /// Check if the tick loop is running
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn set_running(&self, running: bool) {
        self.running.store(running, Ordering::SeqCst);
        if running {
            *self.start_time.write() = Some(Instant::now());
        }
    }

    /// Get the uptime in seconds
    pub fn uptime_secs(&self) -> u64 {
        self.start_time
            .read()
            .map(|t| t.elapsed().as_secs())
            .unwrap_or(0)
    }

    /// Seed hostile test creatures around the centre
    pub fn seed_creatures<R: Rng>(&self, count: u32, range: u32, rng: &mut R) -> usize {
        let mut sim = self.lock();
        let mut spawned = 0;
        for _ in 0..count {
            match sim.spawn_creature(rng, range) {
                Ok(_) => spawned += 1,
                Err(e) => warn!(error = %e, "Failed to place test creature"),
            }
        }
        info!(spawned = spawned, requested = count, "Seeded test creatures");
        spawned
    }

    /// Get world info as a string
    pub fn info(&self) -> String {
        let sim = self.lock();
        format!(
            "World {} - {} entities - {} players - Tick {} - Uptime {}s",
            self.settings.name,
            sim.valid_entity_count(),
            sim.players().len(),
            sim.tick(),
            self.uptime_secs()
        )
    }
}

impl std::fmt::Debug for World {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("World")
            .field("settings", &self.settings)
            .field("tick", &self.tick())
            .field("running", &self.is_running())
            .finish()
    }
}
