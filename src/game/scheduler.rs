//! Tick scheduler
//!
//! Runs the fixed-timestep loop on a dedicated thread. Each tick:
//! 1. Lock the simulation and advance the tick counter
//! 2. Mutation phase (serial): directions, movement, combat
//! 3. Snapshot phase (parallel): one work unit per viewer on the snapshot
//!    pool, joined before the phase ends
//! 4. Periodic chunk cache purge and autosave collection
//! 5. Unlock, write pending saves, sleep the rest of the budget
//!
//! Every phase runs inside an error boundary; a fault is logged with the tick
//! and phase and the loop carries on with the next tick.

use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use tracing::{debug, error, info, warn};

use crate::error::{NetworkError, Result, ServerError};
use crate::game::entity::EntityId;
use crate::game::persistence::{self, PendingSave, WorldStore};
use crate::game::snapshot;
use crate::game::world::{Simulation, World};
use crate::protocol::outbound::{Outbound, Viewer};
use crate::protocol::packets;

/// Ticks between milestone log lines
const MILESTONE_TICKS: u64 = 1000;

/// Running tick statistics
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickStats {
    pub ticks: u64,
    pub last: Duration,
    pub max: Duration,
    pub total: Duration,
    pub overruns: u64,
    pub cache_hits: u64,
    pub cache_misses: u64,
    /// Phases that panicked and were contained
    pub faults: u64,
}

impl TickStats {
    /// Mean tick duration
    pub fn average(&self) -> Duration {
        if self.ticks == 0 {
            return Duration::ZERO;
        }
        let nanos = self.total.as_nanos() / u128::from(self.ticks);
        Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
    }

    fn record(&mut self, report: &TickReport) {
        self.ticks += 1;
        self.last = report.elapsed;
        self.max = self.max.max(report.elapsed);
        self.total += report.elapsed;
        if report.overrun {
            self.overruns += 1;
        }
        self.cache_hits += u64::from(report.cache_hits);
        self.cache_misses += u64::from(report.cache_misses);
        self.faults += u64::from(report.faults);
    }
}

/// Outcome of a single tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub tick: u64,
    pub elapsed: Duration,
    pub overrun: bool,
    pub viewers: usize,
    pub snapshots_sent: usize,
    pub cache_hits: u32,
    pub cache_misses: u32,
    pub events: usize,
    pub faults: u32,
    /// Areas written by autosave this tick
    pub saved_areas: usize,
}

/// Result of one snapshot work unit
enum UnitOutcome {
    Sent { hits: u32, misses: u32 },
    /// The viewer has no live entity
    Skipped,
    SendFailed(EntityId, NetworkError),
    Faulted,
}

/// Fixed-timestep driver for a [`World`]
pub struct TickScheduler {
    world: Arc<World>,
    outbound: Arc<dyn Outbound>,
    store: Option<Arc<dyn WorldStore>>,
    pool: ThreadPool,
    period: Duration,
    stats: Mutex<TickStats>,
}

impl TickScheduler {
    /// Create a scheduler with a snapshot pool of `workers` threads
    pub fn new(world: Arc<World>, outbound: Arc<dyn Outbound>, workers: usize) -> Result<Self> {
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers.max(1))
            .thread_name(|i| format!("snapshot-{}", i))
            .build()
            .map_err(|e| ServerError::Internal(format!("snapshot pool: {}", e)))?;
        let period = Duration::from_millis(world.settings.world.tick_rate_ms);

        Ok(Self {
            world,
            outbound,
            store: None,
            pool,
            period,
            stats: Mutex::new(TickStats::default()),
        })
    }

    /// Enable autosave into `store`
    pub fn with_store(mut self, store: Arc<dyn WorldStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn period(&self) -> Duration {
        self.period
    }

    pub fn stats(&self) -> TickStats {
        self.stats.lock().clone()
    }

    /// Run ticks until the world is marked as not running
    pub fn run(&self) {
        info!(
            tick_rate_ms = self.period.as_millis() as u64,
            snapshot_workers = self.pool.current_num_threads(),
            autosave = self.store.is_some() && self.world.settings.autosave_interval > 0,
            "Tick scheduler started"
        );

        while self.world.is_running() {
            let started = Instant::now();
            if let Err(panic) = catch_unwind(AssertUnwindSafe(|| self.run_tick())) {
                contain(self.world.tick(), "tick", panic.as_ref());
                self.stats.lock().faults += 1;
            }
            let remaining = self.period.saturating_sub(started.elapsed());
            if !remaining.is_zero() {
                thread::sleep(remaining);
            }
        }

        let stats = self.stats();
        info!(
            total_ticks = stats.ticks,
            avg_ms = stats.average().as_secs_f64() * 1000.0,
            max_ms = stats.max.as_secs_f64() * 1000.0,
            overruns = stats.overruns,
            faults = stats.faults,
            "Tick scheduler stopped"
        );
    }

    /// Run one complete tick
    pub fn run_tick(&self) -> TickReport {
        let started = Instant::now();
        let mut report = TickReport::default();

        let mut sim = self.world.lock();
        let tick = sim.advance_tick();
        self.world.publish_tick(tick);
        report.tick = tick;

        // Mutation phase
        let events = match catch_unwind(AssertUnwindSafe(|| sim.run_mutation_phase())) {
            Ok(events) => events,
            Err(panic) => {
                contain(tick, "mutation", panic.as_ref());
                report.faults += 1;
                Vec::new()
            }
        };
        report.events = events.len();
        let notified = catch_unwind(AssertUnwindSafe(|| {
            for event in &events {
                self.outbound.broadcast(packets::build_chat(&event.notice()));
            }
        }));
        if let Err(panic) = notified {
            contain(tick, "notices", panic.as_ref());
            report.faults += 1;
        }

        // Snapshot phase
        let viewers = match catch_unwind(AssertUnwindSafe(|| self.outbound.viewers())) {
            Ok(viewers) => viewers,
            Err(panic) => {
                contain(tick, "snapshot", panic.as_ref());
                report.faults += 1;
                Vec::new()
            }
        };
        report.viewers = viewers.len();
        let outcomes = self.snapshot_phase(&sim, &viewers);
        let mut lost = Vec::new();
        for outcome in outcomes {
            match outcome {
                UnitOutcome::Sent { hits, misses } => {
                    report.snapshots_sent += 1;
                    report.cache_hits += hits;
                    report.cache_misses += misses;
                }
                UnitOutcome::Skipped => {}
                UnitOutcome::SendFailed(entity, e) => {
                    debug!(tick = tick, entity_id = entity, error = %e, "Snapshot send failed");
                    lost.push(entity);
                }
                UnitOutcome::Faulted => report.faults += 1,
            }
        }

        // Cache purge
        let purge_every = sim.settings().world.cache_purge_interval;
        if purge_every > 0 && tick % purge_every == 0 {
            match catch_unwind(AssertUnwindSafe(|| sim.purge_caches())) {
                Ok(released) => debug!(tick = tick, released = released, "Chunk caches purged"),
                Err(panic) => {
                    contain(tick, "purge", panic.as_ref());
                    report.faults += 1;
                }
            }
        }

        // Autosave collection
        let pending = self.collect_autosave(&sim, tick, &mut report);

        drop(sim);

        for entity in lost {
            let dropped = catch_unwind(AssertUnwindSafe(|| {
                self.outbound.disconnect(entity, "Connection lost")
            }));
            if let Err(panic) = dropped {
                contain(tick, "disconnect", panic.as_ref());
                report.faults += 1;
            }
        }

        if !pending.is_empty() {
            self.write_autosave(pending, tick, &mut report);
        }

        report.elapsed = started.elapsed();
        report.overrun = report.elapsed > self.period;
        if report.overrun {
            warn!(
                tick = tick,
                elapsed_ms = report.elapsed.as_millis() as u64,
                budget_ms = self.period.as_millis() as u64,
                "Tick overran its budget"
            );
        }

        let stats = {
            let mut stats = self.stats.lock();
            stats.record(&report);
            stats.clone()
        };

        if tick % MILESTONE_TICKS == 0 {
            debug!(
                tick = tick,
                viewers = report.viewers,
                avg_ms = stats.average().as_secs_f64() * 1000.0,
                max_ms = stats.max.as_secs_f64() * 1000.0,
                overruns = stats.overruns,
                cache_hits = stats.cache_hits,
                cache_misses = stats.cache_misses,
                "Game tick milestone"
            );
        }

        report
    }

    /// Build and send every viewer's snapshot on the pool; returns after all units finish
    fn snapshot_phase(&self, sim: &Simulation, viewers: &[Viewer]) -> Vec<UnitOutcome> {
        let outbound = self.outbound.as_ref();
        let tick = sim.tick();
        self.pool.install(|| {
            viewers
                .par_iter()
                .map(|viewer| snapshot_unit(sim, outbound, *viewer, tick))
                .collect()
        })
    }

    fn collect_autosave(&self, sim: &Simulation, tick: u64, report: &mut TickReport) -> Vec<PendingSave> {
        let interval = self.world.settings.autosave_interval;
        if self.store.is_none() || interval == 0 || tick % interval != 0 {
            return Vec::new();
        }
        match catch_unwind(AssertUnwindSafe(|| persistence::collect_dirty(sim))) {
            Ok(pending) => pending,
            Err(panic) => {
                contain(tick, "autosave", panic.as_ref());
                report.faults += 1;
                Vec::new()
            }
        }
    }

    fn write_autosave(&self, pending: Vec<PendingSave>, tick: u64, report: &mut TickReport) {
        let store = match &self.store {
            Some(store) => store.as_ref(),
            None => return,
        };
        let attempted = pending.len();
        let failed = match catch_unwind(AssertUnwindSafe(|| persistence::write_pending(store, pending))) {
            Ok(failed) => failed,
            Err(panic) => {
                contain(tick, "autosave", panic.as_ref());
                report.faults += 1;
                return;
            }
        };
        report.saved_areas = attempted - failed.len();
        if !failed.is_empty() {
            persistence::restore_dirty(&self.world.lock(), &failed);
        }
    }
}

fn snapshot_unit(sim: &Simulation, outbound: &dyn Outbound, viewer: Viewer, tick: u64) -> UnitOutcome {
    let unit = catch_unwind(AssertUnwindSafe(|| {
        let Some(snapshot) = snapshot::build_world_update(sim, viewer.entity, viewer.view_radius) else {
            return UnitOutcome::Skipped;
        };
        match outbound.send_frame(viewer.entity, packets::build_world_update(&snapshot.payload)) {
            Ok(()) => UnitOutcome::Sent {
                hits: snapshot.cache_hits,
                misses: snapshot.cache_misses,
            },
            Err(e) => UnitOutcome::SendFailed(viewer.entity, e),
        }
    }));
    unit.unwrap_or_else(|panic| {
        contain(tick, "snapshot", panic.as_ref());
        UnitOutcome::Faulted
    })
}

fn contain(tick: u64, phase: &str, panic: &(dyn Any + Send)) {
    let message = panic
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| panic.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown panic".to_string());
    error!(tick = tick, phase = phase, message = %message, "Tick phase fault contained");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::game::combat;
    use crate::game::entity::CombatMode;
    use crate::game::object::{ObjectCategory, ObjectKind, WorldObject};
    use crate::game::position::Position;
    use crate::game::snapshot::WorldUpdate;
    use crate::game::world::{WorldSettings, DEFAULT_AREA};
    use crate::protocol::packets::ServerPacket;
    use bytes::Bytes;
    use std::collections::HashSet;

    #[derive(Default)]
    struct RecordingOutbound {
        viewers: Mutex<Vec<Viewer>>,
        failing: Mutex<HashSet<EntityId>>,
        panicking: Mutex<HashSet<EntityId>>,
        broadcast_panics: Mutex<bool>,
        frames: Mutex<Vec<(EntityId, Bytes)>>,
        broadcasts: Mutex<Vec<Bytes>>,
        disconnected: Mutex<Vec<(EntityId, String)>>,
    }

    impl RecordingOutbound {
        fn watch(&self, entity: EntityId) {
            self.viewers.lock().push(Viewer {
                entity,
                view_radius: 2,
            });
        }
    }

    impl Outbound for RecordingOutbound {
        fn viewers(&self) -> Vec<Viewer> {
            self.viewers.lock().clone()
        }

        fn send_frame(&self, entity: EntityId, frame: Bytes) -> std::result::Result<(), NetworkError> {
            if self.failing.lock().contains(&entity) {
                return Err(NetworkError::WriteBufferFull);
            }
            if self.panicking.lock().contains(&entity) {
                panic!("socket writer for {} poisoned", entity);
            }
            self.frames.lock().push((entity, frame));
            Ok(())
        }

        fn broadcast(&self, frame: Bytes) {
            if *self.broadcast_panics.lock() {
                panic!("broadcast poisoned");
            }
            self.broadcasts.lock().push(frame);
        }

        fn disconnect(&self, entity: EntityId, reason: &str) {
            self.disconnected.lock().push((entity, reason.to_string()));
        }
    }

    #[derive(Default)]
    struct MemoryStore {
        saved: Mutex<Vec<(String, usize)>>,
    }

    impl WorldStore for MemoryStore {
        fn load_objects(&self, _area: &str) -> Result<Vec<WorldObject>> {
            Ok(Vec::new())
        }

        fn save_objects(&self, area: &str, objects: &[WorldObject]) -> Result<()> {
            self.saved.lock().push((area.to_string(), objects.len()));
            Ok(())
        }
    }

    fn scheduler(settings: WorldSettings) -> (TickScheduler, Arc<RecordingOutbound>) {
        let world = Arc::new(World::with_settings(settings));
        let outbound = Arc::new(RecordingOutbound::default());
        let scheduler = TickScheduler::new(world, outbound.clone(), 2).unwrap();
        (scheduler, outbound)
    }

    #[test]
    fn test_tick_advances_and_publishes() {
        let (scheduler, _) = scheduler(WorldSettings::default());
        let report = scheduler.run_tick();
        assert_eq!(report.tick, 1);
        assert_eq!(scheduler.world.tick(), 1);
        scheduler.run_tick();
        assert_eq!(scheduler.stats().ticks, 2);
    }

    #[test]
    fn test_snapshot_sent_to_each_viewer() {
        let (scheduler, outbound) = scheduler(WorldSettings::default());
        let (a, b) = {
            let mut sim = scheduler.world.lock();
            (
                sim.insert_player_at(None, Position::from_offset(0, 0)),
                sim.insert_player_at(None, Position::from_offset(100, 0)),
            )
        };
        outbound.watch(a);
        outbound.watch(b);

        let report = scheduler.run_tick();
        assert_eq!(report.snapshots_sent, 2);
        // Both viewers share the same neighbourhood, so the second one hits the cache
        assert!(report.cache_hits > 0);

        let frames = outbound.frames.lock();
        assert_eq!(frames.len(), 2);
        for (_, frame) in frames.iter() {
            let payload = match ServerPacket::decode(frame).unwrap() {
                ServerPacket::WorldUpdate { payload } => payload,
                other => panic!("unexpected packet {:?}", other),
            };
            let update = WorldUpdate::decode(&payload).unwrap();
            let ids: HashSet<_> = update.entities.iter().map(|e| e.id).collect();
            assert_eq!(ids, HashSet::from([a, b]));
        }
    }

    #[test]
    fn test_failed_send_disconnects() {
        let (scheduler, outbound) = scheduler(WorldSettings::default());
        let id = scheduler
            .world
            .lock()
            .insert_player_at(None, Position::CENTER);
        outbound.watch(id);
        outbound.failing.lock().insert(id);

        let report = scheduler.run_tick();
        assert_eq!(report.snapshots_sent, 0);
        assert_eq!(
            outbound.disconnected.lock().as_slice(),
            &[(id, "Connection lost".to_string())]
        );
    }

    #[test]
    fn test_missing_viewer_is_skipped() {
        let (scheduler, outbound) = scheduler(WorldSettings::default());
        outbound.watch(77);
        let report = scheduler.run_tick();
        assert_eq!(report.viewers, 1);
        assert_eq!(report.snapshots_sent, 0);
        assert!(outbound.disconnected.lock().is_empty());
    }

    #[test]
    fn test_panicking_send_is_contained() {
        let (scheduler, outbound) = scheduler(WorldSettings::default());
        let (a, b) = {
            let mut sim = scheduler.world.lock();
            (
                sim.insert_player_at(None, Position::from_offset(0, 0)),
                sim.insert_player_at(None, Position::from_offset(100, 0)),
            )
        };
        outbound.watch(a);
        outbound.watch(b);
        outbound.panicking.lock().insert(a);

        let report = scheduler.run_tick();
        assert_eq!(report.faults, 1);
        assert_eq!(report.snapshots_sent, 1);
        assert_eq!(outbound.frames.lock()[0].0, b);
        assert_eq!(scheduler.stats().faults, 1);

        // The next tick runs normally once the writer recovers
        outbound.panicking.lock().clear();
        let report = scheduler.run_tick();
        assert_eq!(report.tick, 2);
        assert_eq!(report.faults, 0);
        assert_eq!(report.snapshots_sent, 2);
    }

    #[test]
    fn test_panicking_broadcast_is_contained() {
        let (scheduler, outbound) = scheduler(WorldSettings::default());
        let viewer = {
            let mut sim = scheduler.world.lock();
            let alice = sim.insert_player_at(Some("alice".into()), Position::from_offset(0, 0));
            let bob = sim.insert_player_at(Some("bob".into()), Position::from_offset(30, 0));
            assert!(combat::engage(&mut sim, alice, bob, CombatMode::Attack));
            sim.entity_mut(bob).unwrap().health = 1;
            alice
        };
        outbound.watch(viewer);
        *outbound.broadcast_panics.lock() = true;

        let cadence = scheduler.world.settings.combat.attack_cadence;
        let mut faults = 0;
        for _ in 0..cadence {
            let report = scheduler.run_tick();
            faults += report.faults;
            assert_eq!(report.snapshots_sent, 1);
        }
        assert_eq!(faults, 1);
        assert_eq!(scheduler.stats().faults, 1);
        assert_eq!(scheduler.stats().ticks, cadence);
    }

    #[test]
    fn test_injury_notice_broadcast() {
        let (scheduler, outbound) = scheduler(WorldSettings::default());
        {
            let mut sim = scheduler.world.lock();
            let alice = sim.insert_player_at(Some("alice".into()), Position::from_offset(0, 0));
            let bob = sim.insert_player_at(Some("bob".into()), Position::from_offset(30, 0));
            assert!(combat::engage(&mut sim, alice, bob, CombatMode::Attack));
            sim.entity_mut(bob).unwrap().health = 1;
        }

        let cadence = scheduler.world.settings.combat.attack_cadence;
        let mut events = 0;
        for _ in 0..cadence {
            events += scheduler.run_tick().events;
        }
        assert_eq!(events, 1);
        let notices: Vec<_> = outbound
            .broadcasts
            .lock()
            .iter()
            .map(|f| ServerPacket::decode(f).unwrap())
            .collect();
        assert_eq!(
            notices,
            vec![ServerPacket::Chat {
                text: "bob was injured by alice.".into()
            }]
        );
    }

    #[test]
    fn test_autosave_writes_dirty_area() {
        let settings = WorldSettings::default().with_autosave_interval(2);
        let (scheduler, _) = scheduler(settings);
        let store = Arc::new(MemoryStore::default());
        let scheduler = scheduler.with_store(store.clone());

        scheduler
            .world
            .lock()
            .place_object(
                DEFAULT_AREA,
                ObjectKind::new(ObjectCategory::Blocking, 1, 1),
                Position::CENTER,
            )
            .unwrap();

        assert_eq!(scheduler.run_tick().saved_areas, 0);
        assert_eq!(scheduler.run_tick().saved_areas, 1);
        assert_eq!(store.saved.lock().as_slice(), &[("test".to_string(), 1)]);

        // Clean areas are not written again
        scheduler.run_tick();
        scheduler.run_tick();
        assert_eq!(store.saved.lock().len(), 1);
    }

    #[test]
    fn test_stats_average() {
        let mut stats = TickStats::default();
        assert_eq!(stats.average(), Duration::ZERO);
        stats.record(&TickReport {
            elapsed: Duration::from_millis(10),
            overrun: true,
            ..Default::default()
        });
        stats.record(&TickReport {
            elapsed: Duration::from_millis(30),
            ..Default::default()
        });
        assert_eq!(stats.average(), Duration::from_millis(20));
        assert_eq!(stats.max, Duration::from_millis(30));
        assert_eq!(stats.overruns, 1);
    }

    #[test]
    fn test_stats_average_past_u32_ticks() {
        let stats = TickStats {
            ticks: 1 << 33,
            total: Duration::from_millis(1 << 33) * 20,
            ..Default::default()
        };
        assert_eq!(stats.average(), Duration::from_millis(20));
    }
}
