//! Entity module
//!
//! Players and creatures share one `Entity` type. The variant-specific state
//! lives in [`EntityKind`]; everything the simulation touches uniformly
//! (position, health, effects, target links) sits on the entity itself.

use bitflags::bitflags;

use super::position::{Direction, Position};

/// Unique entity identifier
pub type EntityId = u32;

/// Index of an area in the world registry
pub type AreaId = usize;

bitflags! {
    /// Status effects visible to clients
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
    pub struct EffectFlags: u16 {
        /// Landed an attack this tick (animation)
        const ATTACKING = 1 << 0;
        /// Source end of an attack link
        const TARGETING = 1 << 1;
        /// Target end of an attack link
        const TARGETED = 1 << 2;
        /// Source end of a heal link
        const HEALER = 1 << 3;
        /// Target end of a heal link
        const HEALING = 1 << 4;
        /// Health dropped below 1
        const INJURED = 1 << 5;
    }
}

impl EffectFlags {
    /// Flags owned by target links rather than by the entity itself
    pub const LINK_FLAGS: EffectFlags = EffectFlags::TARGETING
        .union(EffectFlags::TARGETED)
        .union(EffectFlags::HEALER)
        .union(EffectFlags::HEALING);
}

/// What an entity does to whoever it engages
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
pub enum CombatMode {
    #[default]
    Attack,
    Heal,
}

impl CombatMode {
    /// Effects for the (source, target) ends of a link in this mode
    pub fn link_effects(self) -> (EffectFlags, EffectFlags) {
        match self {
            CombatMode::Attack => (EffectFlags::TARGETING, EffectFlags::TARGETED),
            CombatMode::Heal => (EffectFlags::HEALER, EffectFlags::HEALING),
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            CombatMode::Attack => "attack",
            CombatMode::Heal => "heal",
        }
    }
}

/// Outgoing end of a target relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TargetLink {
    pub target: EntityId,
    pub mode: CombatMode,
    pub self_effects: EffectFlags,
    pub target_effects: EffectFlags,
}

impl TargetLink {
    pub fn new(target: EntityId, mode: CombatMode) -> Self {
        let (self_effects, target_effects) = mode.link_effects();
        Self {
            target,
            mode,
            self_effects,
            target_effects,
        }
    }
}

/// Incoming end of a target relationship
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct IncomingLink {
    pub source: EntityId,
    pub effects: EffectFlags,
}

/// State only players carry
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PlayerState {
    /// Tick of the last movement input
    pub last_input_tick: u64,
}

/// State only creatures carry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CreatureState {
    /// Player currently being chased
    pub quarry: Option<EntityId>,
}

/// Player/creature discriminant with per-variant state
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntityKind {
    Player(PlayerState),
    Creature(CreatureState),
}

impl EntityKind {
    /// Snapshot kind byte
    pub fn wire_id(&self) -> u8 {
        match self {
            EntityKind::Player(_) => 0,
            EntityKind::Creature(_) => 1,
        }
    }
}

/// A simulated entity
#[derive(Debug, Clone)]
pub struct Entity {
    pub id: EntityId,
    pub name: String,
    pub kind: EntityKind,
    pub area: AreaId,
    pub position: Position,
    pub facing: Direction,
    pub move_dir: Direction,
    pub health: i16,
    pub effects: EffectFlags,
    pub mode: CombatMode,
    pub targets: Vec<TargetLink>,
    pub targeted_by: Vec<IncomingLink>,
    /// Cleared on despawn; stale references must check it
    pub valid: bool,
}

impl Entity {
    fn new(id: EntityId, name: String, kind: EntityKind, area: AreaId, position: Position, health: i16) -> Self {
        Self {
            id,
            name,
            kind,
            area,
            position,
            facing: Direction::South,
            move_dir: Direction::None,
            health,
            effects: EffectFlags::empty(),
            mode: CombatMode::Attack,
            targets: Vec::new(),
            targeted_by: Vec::new(),
            valid: true,
        }
    }

    /// Create a player entity
    pub fn player(id: EntityId, name: impl Into<String>, area: AreaId, position: Position, health: i16) -> Self {
        Self::new(id, name.into(), EntityKind::Player(PlayerState::default()), area, position, health)
    }

    /// Create a creature entity
    pub fn creature(id: EntityId, name: impl Into<String>, area: AreaId, position: Position, health: i16) -> Self {
        let state = CreatureState { quarry: None };
        Self::new(id, name.into(), EntityKind::Creature(state), area, position, health)
    }

    pub fn is_player(&self) -> bool {
        matches!(self.kind, EntityKind::Player(_))
    }

    pub fn is_creature(&self) -> bool {
        matches!(self.kind, EntityKind::Creature(_))
    }

    pub fn is_injured(&self) -> bool {
        self.effects.contains(EffectFlags::INJURED)
    }

    /// Whether any link exists between this entity and `other`, in either direction
    pub fn is_linked_with(&self, other: EntityId) -> bool {
        self.targets.iter().any(|link| link.target == other)
            || self.targeted_by.iter().any(|link| link.source == other)
    }

    /// Record a movement request from the client
    pub fn record_input(&mut self, dir: Direction, tick: u64) {
        self.move_dir = dir;
        if let EntityKind::Player(state) = &mut self.kind {
            state.last_input_tick = tick;
        }
    }

    /// Rebuild the link-owned effect bits from the links this entity takes part in
    pub fn refresh_link_effects(&mut self) {
        let outgoing = self
            .targets
            .iter()
            .fold(EffectFlags::empty(), |acc, link| acc | link.self_effects);
        let incoming = self
            .targeted_by
            .iter()
            .fold(EffectFlags::empty(), |acc, link| acc | link.effects);
        self.effects = (self.effects - EffectFlags::LINK_FLAGS) | outgoing | incoming;
    }
}
