//! Targeting, combat and effects
//!
//! A target link is stored on both ends: the source keeps a [`TargetLink`] in
//! `targets`, the target keeps an [`IncomingLink`] in `targeted_by`. Links are
//! only created and removed through [`engage`] and [`disengage`], which update
//! both ends and recompute both entities' link effects together.

use tracing::{debug, info};

use crate::config::CombatConfig;
use crate::game::entity::{CombatMode, EffectFlags, EntityId, IncomingLink, TargetLink};
use crate::game::position::Direction;
use crate::game::world::Simulation;

/// Something players should hear about
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CombatEvent {
    Injured {
        victim: EntityId,
        victim_name: String,
        attacker: EntityId,
        attacker_name: String,
    },
}

impl CombatEvent {
    /// Chat line broadcast for the event
    pub fn notice(&self) -> String {
        match self {
            CombatEvent::Injured {
                victim_name,
                attacker_name,
                ..
            } => format!("{} was injured by {}.", victim_name, attacker_name),
        }
    }
}

/// Open a link from `source` to `target` in `mode`; returns whether one was created.
///
/// Both entities must be valid and not already linked. Attack links need both
/// ends uninjured and at least one player involved; heal links need an
/// uninjured healer and a target below full health.
pub fn engage(sim: &mut Simulation, source: EntityId, target: EntityId, mode: CombatMode) -> bool {
    if source == target {
        return false;
    }
    let max_health = sim.settings().combat.max_health;
    let (Some(src), Some(dst)) = (sim.entity(source), sim.entity(target)) else {
        return false;
    };
    if !src.valid || !dst.valid || src.is_linked_with(target) {
        return false;
    }
    let eligible = match mode {
        CombatMode::Attack => {
            !src.is_injured() && !dst.is_injured() && (src.is_player() || dst.is_player())
        }
        CombatMode::Heal => !src.is_injured() && dst.health < max_health,
    };
    if !eligible {
        return false;
    }

    let link = TargetLink::new(target, mode);
    if let Some(src) = sim.entity_mut(source) {
        src.targets.push(link);
        src.refresh_link_effects();
    }
    if let Some(dst) = sim.entity_mut(target) {
        dst.targeted_by.push(IncomingLink {
            source,
            effects: link.target_effects,
        });
        dst.refresh_link_effects();
    }
    debug!(source = source, target = target, mode = mode.as_str(), "Target link opened");
    true
}

/// Remove the link from `source` to `target` on both ends
pub fn disengage(sim: &mut Simulation, source: EntityId, target: EntityId) -> bool {
    let mut removed = false;
    if let Some(src) = sim.entity_mut(source) {
        let before = src.targets.len();
        src.targets.retain(|l| l.target != target);
        removed = src.targets.len() != before;
        src.refresh_link_effects();
    }
    if let Some(dst) = sim.entity_mut(target) {
        dst.targeted_by.retain(|l| l.source != source);
        dst.refresh_link_effects();
    }
    if removed {
        debug!(source = source, target = target, "Target link closed");
    }
    removed
}

/// Remove every link `id` takes part in
pub fn unlink_all(sim: &mut Simulation, id: EntityId) {
    let Some(entity) = sim.entity(id) else {
        return;
    };
    let outgoing: Vec<EntityId> = entity.targets.iter().map(|l| l.target).collect();
    let incoming: Vec<EntityId> = entity.targeted_by.iter().map(|l| l.source).collect();
    for target in outgoing {
        disengage(sim, id, target);
    }
    for source in incoming {
        disengage(sim, source, id);
    }
}

/// Whether a link must be torn down before it is progressed
fn should_tear_down(sim: &Simulation, source: EntityId, link: &TargetLink) -> bool {
    let combat = &sim.settings().combat;
    let (Some(src), Some(dst)) = (sim.entity(source), sim.entity(link.target)) else {
        return true;
    };
    if !src.valid || !dst.valid {
        return true;
    }
    let (range, lost) = match link.mode {
        CombatMode::Attack => (combat.attack_range, src.is_injured() || dst.is_injured()),
        CombatMode::Heal => (combat.heal_range, src.is_injured()),
    };
    lost || src.position.distance_to(dst.position) > range + combat.range_grace
}

/// Progress the target links of one entity for the current tick
pub fn process_entity(sim: &mut Simulation, id: EntityId, events: &mut Vec<CombatEvent>) {
    let tick = sim.tick();
    let combat = sim.settings().combat.clone();

    let links = match sim.entity_mut(id) {
        Some(entity) if entity.valid => {
            entity.effects.remove(EffectFlags::ATTACKING);
            entity.targets.clone()
        }
        _ => return,
    };

    for link in links {
        if should_tear_down(sim, id, &link) {
            disengage(sim, id, link.target);
            continue;
        }

        match link.mode {
            CombatMode::Attack => {
                if tick % combat.attack_cadence == 0 {
                    strike(sim, id, link.target, &combat, events);
                }
            }
            CombatMode::Heal => {
                let mut finished = false;
                if let Some(target) = sim.entity_mut(link.target) {
                    if target.health > 0 {
                        target.effects.remove(EffectFlags::INJURED);
                    }
                    if tick % combat.heal_cadence == 0 {
                        target.health = target
                            .health
                            .saturating_add(combat.heal_amount)
                            .min(combat.max_health);
                    }
                    finished = target.health >= combat.max_health;
                }
                if finished {
                    disengage(sim, id, link.target);
                }
            }
        }
        // One link progressed per tick
        break;
    }
}

fn strike(
    sim: &mut Simulation,
    attacker: EntityId,
    victim: EntityId,
    combat: &CombatConfig,
    events: &mut Vec<CombatEvent>,
) {
    let Some(target) = sim.entity_mut(victim) else {
        return;
    };
    if target.is_injured() {
        return;
    }
    target.health = target.health.saturating_sub(combat.attack_damage);
    let injured = target.health < 1;
    if injured {
        target.effects.insert(EffectFlags::INJURED);
        target.move_dir = Direction::None;
        target.health = target.health.saturating_sub(combat.grace_penalty);
    }
    let victim_name = target.name.clone();

    let Some(source) = sim.entity_mut(attacker) else {
        return;
    };
    source.effects.insert(EffectFlags::ATTACKING);

    if injured {
        info!(victim = victim, attacker = attacker, "Entity injured");
        events.push(CombatEvent::Injured {
            victim,
            victim_name,
            attacker,
            attacker_name: source.name.clone(),
        });
    }
}
