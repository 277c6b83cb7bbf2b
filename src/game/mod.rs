//! Game module
//!
//! This module contains the simulation core of the Gommo server:
//! - World registry and simulation state (areas, entities, tick counter)
//! - Spatial index of areas split into chunks with per-tick snapshot caches
//! - Movement and collision, targeting and combat
//! - The fixed-timestep tick scheduler and snapshot serializer
//! - World object persistence

pub mod area;
pub mod combat;
pub mod entity;
pub mod movement;
pub mod object;
pub mod persistence;
pub mod position;
pub mod scheduler;
pub mod snapshot;
pub mod unordered;
pub mod world;

pub use entity::{CombatMode, EffectFlags, Entity, EntityId, EntityKind};
pub use object::{ObjectCategory, ObjectId, ObjectKind, WorldObject};
pub use position::{ChunkCoord, Direction, Position};
pub use scheduler::{TickScheduler, TickStats};
pub use world::{Simulation, World, WorldSettings};
