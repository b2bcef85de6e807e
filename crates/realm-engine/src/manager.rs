//! Resident world lifecycle
//!
//! Every resident world sits in a slot guarded by its own mutex. Loading,
//! admission, persistence, and eviction of a world all happen under that
//! mutex, so a world is fully hydrated before anyone is admitted and is never
//! evicted while someone is being admitted.
//!
//! Lock order is slot then map. Code holding the map lock never waits on a
//! slot, except on a slot it has just created; everything else clones the
//! slots out of the map and drops the map lock before locking them.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use realm_core::{elapsed_between, ActorId, Clock, WorldId};
use realm_store::{PersistentStore, SaveBatch};
use realm_world::{DeltaSink, InstanceOptions, TerrainGenerator, WorldInstance};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::EngineError;

/// Lifecycle limits and timers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ManagerConfig {
    pub max_concurrent: usize,
    /// How long a world with no observers stays resident
    pub unload_delay: Duration,
    /// Minimum time between autosaves of one world
    pub auto_save_interval: Duration,
    pub world_radius: u32,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 8,
            unload_delay: Duration::from_secs(30),
            auto_save_interval: Duration::from_secs(300),
            world_radius: 64,
        }
    }
}

/// Outcome of one scheduler tick
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub autosaved: Vec<WorldId>,
    pub evicted: Vec<WorldId>,
    /// Worlds whose save failed; they stay resident with changes intact
    pub failed: Vec<WorldId>,
}

impl TickReport {
    pub fn is_empty(&self) -> bool {
        self.autosaved.is_empty() && self.evicted.is_empty() && self.failed.is_empty()
    }
}

struct SlotState {
    instance: Option<Arc<WorldInstance>>,
    last_persist: DateTime<Utc>,
    /// Set once the slot has left the map; holders must look the world up again
    evicted: bool,
}

struct WorldSlot {
    id: WorldId,
    state: Mutex<SlotState>,
}

/// Owns every resident world
pub struct WorldInstanceManager {
    config: ManagerConfig,
    store: Arc<dyn PersistentStore>,
    generator: Arc<dyn TerrainGenerator>,
    sink: Arc<dyn DeltaSink>,
    clock: Arc<dyn Clock>,
    slots: Mutex<HashMap<WorldId, Arc<WorldSlot>>>,
}

impl WorldInstanceManager {
    pub fn new(
        config: ManagerConfig,
        store: Arc<dyn PersistentStore>,
        generator: Arc<dyn TerrainGenerator>,
        sink: Arc<dyn DeltaSink>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            config,
            store,
            generator,
            sink,
            clock,
            slots: Mutex::new(HashMap::new()),
        }
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    /// Make `world_id` resident (loading or creating it) and admit `actor`.
    ///
    /// At capacity, the longest-idle world that has been unobserved for the
    /// unload delay is persisted and evicted to make room. If no world is
    /// evictable this fails with `EngineError::Capacity`.
    pub fn acquire(&self, world_id: &WorldId, actor: ActorId) -> Result<Arc<WorldInstance>, EngineError> {
        loop {
            let now = self.clock.now();
            let slot: Arc<WorldSlot>;
            let mut state;
            {
                let mut slots = self.slots.lock();
                match slots.get(world_id).cloned() {
                    Some(existing) => {
                        drop(slots);
                        slot = existing;
                        state = slot.state.lock();
                    }
                    None => {
                        if slots.len() >= self.config.max_concurrent {
                            drop(slots);
                            if self.make_room(now) {
                                continue;
                            }
                            warn!(
                                "Refusing world {} for {}: {} worlds resident and none evictable",
                                world_id, actor, self.config.max_concurrent
                            );
                            return Err(EngineError::Capacity {
                                max: self.config.max_concurrent,
                            });
                        }
                        slot = Arc::new(WorldSlot {
                            id: world_id.clone(),
                            state: Mutex::new(SlotState {
                                instance: None,
                                last_persist: now,
                                evicted: false,
                            }),
                        });
                        // Nobody else can see the slot yet, so this never blocks
                        state = slot.state.lock();
                        slots.insert(world_id.clone(), slot.clone());
                    }
                }
            }

            if state.evicted {
                continue;
            }
            let resident = state.instance.clone();
            let instance = match resident {
                Some(instance) => instance,
                None => match self.load_instance(world_id, now) {
                    Ok(instance) => {
                        let instance = Arc::new(instance);
                        state.instance = Some(instance.clone());
                        state.last_persist = now;
                        instance
                    }
                    Err(e) => {
                        error!("Failed to load world {}: {}", world_id, e);
                        state.evicted = true;
                        self.remove_slot(&slot);
                        return Err(e);
                    }
                },
            };

            let role = instance.admit(actor)?;
            info!("Actor {} joined world {} as {:?}", actor, world_id, role);
            return Ok(instance);
        }
    }

    /// Remove `actor` from `world_id`'s observers. The world stays resident
    /// until the scheduler evicts it.
    pub fn release(&self, world_id: &WorldId, actor: ActorId) -> bool {
        let Some(slot) = self.slots.lock().get(world_id).cloned() else {
            return false;
        };
        let state = slot.state.lock();
        match &state.instance {
            Some(instance) if !state.evicted => {
                let removed = instance.remove_observer(actor, self.clock.now());
                if removed {
                    debug!(
                        "Actor {} left world {} ({} observers remain)",
                        actor,
                        world_id,
                        instance.observer_count()
                    );
                }
                removed
            }
            _ => false,
        }
    }

    /// The resident instance of `world_id`, if any
    pub fn get(&self, world_id: &WorldId) -> Option<Arc<WorldInstance>> {
        let slot = self.slots.lock().get(world_id).cloned()?;
        let state = slot.state.lock();
        if state.evicted {
            return None;
        }
        state.instance.clone()
    }

    pub fn is_resident(&self, world_id: &WorldId) -> bool {
        self.slots.lock().contains_key(world_id)
    }

    pub fn resident_count(&self) -> usize {
        self.slots.lock().len()
    }

    /// Autosave worlds whose changes are older than the autosave interval,
    /// and evict unobserved worlds idle longer than the unload delay.
    pub fn tick(&self, now: DateTime<Utc>) -> TickReport {
        let mut report = TickReport::default();
        let slots: Vec<Arc<WorldSlot>> = self.slots.lock().values().cloned().collect();

        for slot in slots {
            // Busy slots (loading, or saving elsewhere) wait for the next tick
            let Some(mut state) = slot.state.try_lock() else {
                continue;
            };
            if state.evicted {
                continue;
            }
            let Some(instance) = state.instance.clone() else {
                continue;
            };

            let idle = instance
                .empty_since()
                .map(|since| elapsed_between(since, now));
            if idle.is_some_and(|idle| idle >= self.config.unload_delay) {
                match self.evict_locked(&slot, &mut state, now) {
                    Ok(true) => report.evicted.push(slot.id.clone()),
                    Ok(false) => {}
                    Err(_) => report.failed.push(slot.id.clone()),
                }
                continue;
            }

            if instance.has_unsaved_changes()
                && elapsed_between(state.last_persist, now) >= self.config.auto_save_interval
            {
                match self.persist_instance(&instance, now) {
                    Ok(_) => {
                        state.last_persist = now;
                        info!("Autosaved world {}", slot.id);
                        report.autosaved.push(slot.id.clone());
                    }
                    Err(_) => report.failed.push(slot.id.clone()),
                }
            }
        }
        report
    }

    /// Persist every resident world. Every world is attempted; the first
    /// failure is returned after the rest have been tried.
    pub fn persist_all(&self) -> Result<usize, EngineError> {
        let now = self.clock.now();
        let slots: Vec<Arc<WorldSlot>> = self.slots.lock().values().cloned().collect();
        let mut saved = 0;
        let mut first_error = None;

        for slot in slots {
            let mut state = slot.state.lock();
            let Some(instance) = state.instance.clone() else {
                continue;
            };
            match self.persist_instance(&instance, now) {
                Ok(wrote) => {
                    state.last_persist = now;
                    if wrote {
                        saved += 1;
                    }
                }
                Err(e) => {
                    first_error.get_or_insert(e);
                }
            }
        }

        match first_error {
            Some(e) => Err(e),
            None => {
                info!("Persisted {} worlds", saved);
                Ok(saved)
            }
        }
    }

    /// Permanently delete a resident world. Only its owner may do this, and
    /// only when nobody else is observing it.
    pub fn delete_world(&self, world_id: &WorldId, actor: ActorId) -> Result<(), EngineError> {
        let slot = self
            .slots
            .lock()
            .get(world_id)
            .cloned()
            .ok_or_else(|| EngineError::NotResident(world_id.clone()))?;
        let mut state = slot.state.lock();
        let instance = match &state.instance {
            Some(instance) if !state.evicted => instance.clone(),
            _ => return Err(EngineError::NotResident(world_id.clone())),
        };

        instance.require_admin(actor)?;
        let others = instance.observers().into_iter().filter(|a| *a != actor).count();
        if others > 0 {
            return Err(EngineError::WorldInUse {
                world_id: world_id.clone(),
                observers: others,
            });
        }

        self.store.delete(world_id)?;
        state.instance = None;
        state.evicted = true;
        self.remove_slot(&slot);
        info!("Deleted world {} at the request of {}", world_id, actor);
        Ok(())
    }

    /// Run `tick` every `interval` until `token` is cancelled
    pub fn spawn_scheduler(self: &Arc<Self>, interval: Duration, token: CancellationToken) -> JoinHandle<()> {
        let manager = Arc::clone(self);
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let manager = Arc::clone(&manager);
                        let now = manager.clock.now();
                        match tokio::task::spawn_blocking(move || manager.tick(now)).await {
                            Ok(report) if !report.is_empty() => debug!("World tick: {:?}", report),
                            Ok(_) => {}
                            Err(e) => error!("World tick panicked: {}", e),
                        }
                    }
                    _ = token.cancelled() => {
                        info!("World scheduler shutting down");
                        break;
                    }
                }
            }
        })
    }

    fn load_instance(&self, world_id: &WorldId, now: DateTime<Utc>) -> Result<WorldInstance, EngineError> {
        let options = InstanceOptions {
            world_radius: self.config.world_radius,
            generator: self.generator.clone(),
            sink: self.sink.clone(),
        };
        match self.store.load(world_id)? {
            Some(record) => {
                info!(
                    "Hydrating world {} ({} stored chunks)",
                    world_id,
                    record.chunks.len()
                );
                Ok(WorldInstance::hydrate(
                    world_id.clone(),
                    record.header(),
                    record.chunk_entries(),
                    record.aux_entries(),
                    options,
                    now,
                ))
            }
            None => {
                let seed: i64 = rand::random();
                info!("Creating world {} with seed {}", world_id, seed);
                Ok(WorldInstance::fresh(world_id.clone(), seed, options, now))
            }
        }
    }

    /// Save everything `instance` has not yet persisted. Returns whether
    /// anything was written.
    fn persist_instance(&self, instance: &WorldInstance, now: DateTime<Utc>) -> Result<bool, EngineError> {
        let snapshot = instance.snapshot();
        if snapshot.is_empty() {
            return Ok(false);
        }
        let batch = SaveBatch::from_snapshot(&snapshot, now);
        if let Err(source) = self.store.save(instance.id(), &batch) {
            warn!(
                "Failed to persist world {} ({} dirty chunks kept): {}",
                instance.id(),
                snapshot.chunks.len(),
                source
            );
            return Err(EngineError::Persist {
                world_id: instance.id().clone(),
                source,
            });
        }
        instance.confirm_saved(&snapshot);
        debug!(
            "Persisted world {} ({} chunks, {} aux records)",
            instance.id(),
            batch.chunks.len(),
            batch.aux_records.len()
        );
        Ok(true)
    }

    /// Persist and drop an unobserved world. Returns `Ok(false)` if the
    /// world gained an observer or is already gone.
    fn evict_locked(&self, slot: &Arc<WorldSlot>, state: &mut SlotState, now: DateTime<Utc>) -> Result<bool, EngineError> {
        if state.evicted {
            return Ok(false);
        }
        let Some(instance) = state.instance.clone() else {
            return Ok(false);
        };
        if instance.observer_count() > 0 {
            return Ok(false);
        }
        self.persist_instance(&instance, now)?;
        state.instance = None;
        state.evicted = true;
        self.remove_slot(slot);
        info!("Evicted world {}", slot.id);
        Ok(true)
    }

    /// Evict the longest-idle world that has been unobserved for at least
    /// the unload delay, if there is one
    fn make_room(&self, now: DateTime<Utc>) -> bool {
        let slots: Vec<Arc<WorldSlot>> = self.slots.lock().values().cloned().collect();
        let mut candidates: Vec<(DateTime<Utc>, Arc<WorldSlot>)> = slots
            .into_iter()
            .filter_map(|slot| {
                let state = slot.state.lock();
                if state.evicted {
                    return None;
                }
                let since = state.instance.as_ref()?.empty_since()?;
                drop(state);
                (elapsed_between(since, now) >= self.config.unload_delay).then_some((since, slot))
            })
            .collect();
        candidates.sort_by_key(|(since, _)| *since);

        for (_, slot) in candidates {
            let mut state = slot.state.lock();
            let idle_enough = state
                .instance
                .as_ref()
                .and_then(|instance| instance.empty_since())
                .is_some_and(|since| elapsed_between(since, now) >= self.config.unload_delay);
            if !idle_enough {
                continue;
            }
            if let Ok(true) = self.evict_locked(&slot, &mut state, now) {
                return true;
            }
        }
        false
    }

    fn remove_slot(&self, slot: &Arc<WorldSlot>) {
        let mut slots = self.slots.lock();
        if slots.get(&slot.id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            slots.remove(&slot.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use realm_core::{BlockPos, ManualClock};
    use realm_store::{MemoryStore, WorldRecord};
    use realm_world::{Block, Chunk, FlatTerrain, NullDeltaSink, Role, Visibility, WorldError};

    struct Fixture {
        manager: Arc<WorldInstanceManager>,
        store: Arc<MemoryStore>,
        clock: Arc<ManualClock>,
    }

    fn fixture(max_concurrent: usize) -> Fixture {
        let store = Arc::new(MemoryStore::new());
        let clock = Arc::new(ManualClock::default());
        let config = ManagerConfig {
            max_concurrent,
            world_radius: 8,
            ..ManagerConfig::default()
        };
        let manager = Arc::new(WorldInstanceManager::new(
            config,
            store.clone(),
            Arc::new(FlatTerrain::default()),
            Arc::new(NullDeltaSink),
            clock.clone(),
        ));
        Fixture {
            manager,
            store,
            clock,
        }
    }

    fn id(name: &str) -> WorldId {
        WorldId::parse(name).unwrap()
    }

    impl Fixture {
        fn tick(&self) -> TickReport {
            self.manager.tick(self.clock.now())
        }
    }

    #[test]
    fn test_first_acquire_creates_world_with_owner() {
        let fx = fixture(4);
        let owner = ActorId::new();
        let world = fx.manager.acquire(&id("home"), owner).unwrap();
        assert_eq!(world.role_of(owner), Role::Owner);
        assert!(world.is_observer(owner));
        assert_eq!(fx.manager.resident_count(), 1);

        let again = fx.manager.acquire(&id("home"), ActorId::new()).unwrap();
        assert!(Arc::ptr_eq(&world, &again));
    }

    #[test]
    fn test_hydrated_before_admit() {
        let fx = fixture(4);
        let owner = ActorId::new();
        let mut chunk = Chunk::generate(realm_core::ChunkCoord::new(0, 0), 9, &FlatTerrain::default());
        chunk
            .set(realm_core::LocalPos::new(3, 40, 3), Block::new(42, 0))
            .unwrap();
        let mut record = WorldRecord::empty(id("saved"));
        record.seed = 9;
        record.owner_id = Some(owner);
        record.chunks.insert("0,0".into(), chunk.serialize());
        fx.store.insert(record);

        let visitor = ActorId::new();
        let world = fx.manager.acquire(&id("saved"), visitor).unwrap();
        assert_eq!(world.seed(), 9);
        assert_eq!(world.role_of(visitor), Role::Visitor);
        assert_eq!(
            world.read_block(visitor, BlockPos::new(3, 40, 3)).unwrap(),
            Block::new(42, 0)
        );
    }

    #[test]
    fn test_private_world_refused_at_acquire() {
        let fx = fixture(4);
        let owner = ActorId::new();
        let world = fx.manager.acquire(&id("den"), owner).unwrap();
        world.set_visibility(owner, Visibility::Private).unwrap();

        let stranger = ActorId::new();
        let err = fx.manager.acquire(&id("den"), stranger).unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { .. }));
        assert!(!world.is_observer(stranger));
    }

    #[test]
    fn test_capacity_scenario() {
        let fx = fixture(2);
        let (a, b, c) = (ActorId::new(), ActorId::new(), ActorId::new());
        fx.manager.acquire(&id("w1"), a).unwrap();
        fx.manager.acquire(&id("w2"), b).unwrap();

        let err = fx.manager.acquire(&id("w3"), c).unwrap_err();
        assert!(matches!(err, EngineError::Capacity { max: 2 }));
        assert!(err.is_retryable());
        assert!(!fx.manager.is_resident(&id("w3")));

        // An unobserved world still counts until its unload delay has passed
        assert!(fx.manager.release(&id("w1"), a));
        assert!(matches!(
            fx.manager.acquire(&id("w3"), c),
            Err(EngineError::Capacity { .. })
        ));
        fx.clock.advance(Duration::from_secs(20));
        assert!(matches!(
            fx.manager.acquire(&id("w3"), c),
            Err(EngineError::Capacity { .. })
        ));
        assert!(fx.manager.is_resident(&id("w1")));

        fx.clock.advance(Duration::from_secs(11));
        assert_eq!(fx.tick().evicted, vec![id("w1")]);
        fx.manager.acquire(&id("w3"), c).unwrap();
        assert_eq!(fx.manager.resident_count(), 2);
        assert!(fx.manager.is_resident(&id("w2")));
        assert!(fx.store.load(&id("w1")).unwrap().is_some());
    }

    #[test]
    fn test_acquire_at_cap_evicts_world_past_delay() {
        let fx = fixture(2);
        let (a, b, c) = (ActorId::new(), ActorId::new(), ActorId::new());
        fx.manager.acquire(&id("old"), a).unwrap();
        fx.manager.acquire(&id("older"), b).unwrap();
        fx.manager.release(&id("older"), b);
        fx.clock.advance(Duration::from_secs(5));
        fx.manager.release(&id("old"), a);
        fx.clock.advance(Duration::from_secs(30));

        // No tick has run: acquire itself evicts, longest idle first
        fx.manager.acquire(&id("new"), c).unwrap();
        assert!(!fx.manager.is_resident(&id("older")));
        assert!(fx.manager.is_resident(&id("old")));
        assert!(fx.store.load(&id("older")).unwrap().is_some());
    }

    #[test]
    fn test_failed_persist_blocks_capacity_eviction() {
        let fx = fixture(1);
        let (a, b) = (ActorId::new(), ActorId::new());
        fx.manager.acquire(&id("kept"), a).unwrap();
        fx.manager.release(&id("kept"), a);
        fx.clock.advance(Duration::from_secs(31));

        fx.store.set_available(false);
        assert!(matches!(
            fx.manager.acquire(&id("wanted"), b),
            Err(EngineError::Capacity { max: 1 })
        ));
        assert!(fx.manager.is_resident(&id("kept")));
    }

    #[test]
    fn test_idle_world_evicted_after_delay() {
        let fx = fixture(4);
        let owner = ActorId::new();
        let world = fx.manager.acquire(&id("idle"), owner).unwrap();
        world
            .mutate_block(owner, BlockPos::new(1, 20, 1), Block::new(7, 0))
            .unwrap();
        fx.manager.release(&id("idle"), owner);

        fx.clock.advance(Duration::from_secs(10));
        assert!(fx.tick().evicted.is_empty());
        assert!(fx.manager.is_resident(&id("idle")));

        fx.clock.advance(Duration::from_secs(21));
        assert_eq!(fx.tick().evicted, vec![id("idle")]);
        assert!(!fx.manager.is_resident(&id("idle")));

        let record = fx.store.load(&id("idle")).unwrap().unwrap();
        assert_eq!(record.owner_id, Some(owner));
        assert!(record.chunks.contains_key("0,0"));
    }

    #[test]
    fn test_observed_world_never_evicted() {
        let fx = fixture(4);
        let owner = ActorId::new();
        fx.manager.acquire(&id("busy"), owner).unwrap();
        fx.clock.advance(Duration::from_secs(3600));
        let report = fx.tick();
        assert!(report.evicted.is_empty());
        assert!(fx.manager.is_resident(&id("busy")));
    }

    #[test]
    fn test_failed_final_persist_keeps_world() {
        let fx = fixture(4);
        let owner = ActorId::new();
        let world = fx.manager.acquire(&id("fragile"), owner).unwrap();
        world
            .mutate_block(owner, BlockPos::new(0, 30, 0), Block::new(5, 0))
            .unwrap();
        fx.manager.release(&id("fragile"), owner);

        fx.store.set_available(false);
        fx.clock.advance(Duration::from_secs(60));
        let report = fx.tick();
        assert_eq!(report.failed, vec![id("fragile")]);
        assert!(fx.manager.is_resident(&id("fragile")));
        assert!(world.has_unsaved_changes());

        fx.store.set_available(true);
        assert_eq!(fx.tick().evicted, vec![id("fragile")]);
        let record = fx.store.load(&id("fragile")).unwrap().unwrap();
        assert!(record.chunks.contains_key("0,0"));
    }

    #[test]
    fn test_autosave_respects_interval() {
        let fx = fixture(4);
        let owner = ActorId::new();
        let world = fx.manager.acquire(&id("saver"), owner).unwrap();
        world
            .mutate_block(owner, BlockPos::new(2, 30, 2), Block::new(3, 0))
            .unwrap();

        fx.clock.advance(Duration::from_secs(100));
        assert!(fx.tick().autosaved.is_empty());
        assert_eq!(fx.store.save_count(), 0);

        fx.clock.advance(Duration::from_secs(201));
        assert_eq!(fx.tick().autosaved, vec![id("saver")]);
        assert!(!world.has_unsaved_changes());

        // Nothing new to write
        fx.clock.advance(Duration::from_secs(301));
        assert!(fx.tick().autosaved.is_empty());
        assert_eq!(fx.store.save_count(), 1);
    }

    #[test]
    fn test_reacquire_after_eviction_sees_changes() {
        let fx = fixture(4);
        let owner = ActorId::new();
        let pos = BlockPos::new(-5, 50, 9);
        let world = fx.manager.acquire(&id("again"), owner).unwrap();
        world.mutate_block(owner, pos, Block::new(11, 2)).unwrap();
        fx.manager.release(&id("again"), owner);
        fx.clock.advance(Duration::from_secs(31));
        fx.tick();

        let reloaded = fx.manager.acquire(&id("again"), owner).unwrap();
        assert!(!Arc::ptr_eq(&world, &reloaded));
        assert_eq!(reloaded.seed(), world.seed());
        assert_eq!(reloaded.role_of(owner), Role::Owner);
        assert_eq!(reloaded.read_block(owner, pos).unwrap(), Block::new(11, 2));
    }

    #[test]
    fn test_persist_all_reports_failure_and_keeps_changes() {
        let fx = fixture(4);
        let owner = ActorId::new();
        let world = fx.manager.acquire(&id("a"), owner).unwrap();
        fx.store.set_available(false);
        assert!(matches!(fx.manager.persist_all(), Err(EngineError::Persist { .. })));
        assert!(world.has_unsaved_changes());

        fx.store.set_available(true);
        assert_eq!(fx.manager.persist_all().unwrap(), 1);
        assert!(!world.has_unsaved_changes());
    }

    #[test]
    fn test_delete_world() {
        let fx = fixture(4);
        let (owner, guest) = (ActorId::new(), ActorId::new());
        fx.manager.acquire(&id("doomed"), owner).unwrap();
        fx.manager.persist_all().unwrap();
        fx.manager.acquire(&id("doomed"), guest).unwrap();

        let err = fx.manager.delete_world(&id("doomed"), guest).unwrap_err();
        assert!(matches!(err, EngineError::PermissionDenied { .. }));
        let err = fx.manager.delete_world(&id("doomed"), owner).unwrap_err();
        assert!(matches!(err, EngineError::WorldInUse { observers: 1, .. }));

        fx.manager.release(&id("doomed"), guest);
        fx.manager.delete_world(&id("doomed"), owner).unwrap();
        assert!(!fx.manager.is_resident(&id("doomed")));
        assert!(fx.store.load(&id("doomed")).unwrap().is_none());
        assert!(matches!(
            fx.manager.delete_world(&id("doomed"), owner),
            Err(EngineError::NotResident(_))
        ));
    }

    #[test]
    fn test_store_outage_on_load_is_retryable() {
        let fx = fixture(4);
        fx.store.set_available(false);
        let err = fx.manager.acquire(&id("later"), ActorId::new()).unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(fx.manager.resident_count(), 0);
    }

    #[test]
    fn test_out_of_world_mutation_is_world_error() {
        let fx = fixture(4);
        let owner = ActorId::new();
        let world = fx.manager.acquire(&id("small"), owner).unwrap();
        let far = BlockPos::new(16 * 100, 10, 0);
        let err: EngineError = world.mutate_block(owner, far, Block::new(1, 0)).unwrap_err().into();
        assert!(matches!(err, EngineError::World(WorldError::OutOfBounds(_))));
    }

    #[test]
    fn test_tick_racing_acquire_never_loses_writes() {
        use std::sync::atomic::{AtomicBool, Ordering};

        let fx = fixture(4);
        let owner = ActorId::new();
        let world_id = id("contested");
        let pos = BlockPos::new(2, 50, 2);
        let world = fx.manager.acquire(&world_id, owner).unwrap();
        world.mutate_block(owner, pos, Block::new(1, 0)).unwrap();
        fx.manager.release(&world_id, owner);
        drop(world);

        // Far enough ahead that every unobserved moment is evictable
        let late = fx.clock.now() + chrono::Duration::hours(1);
        let done = AtomicBool::new(false);
        let last = std::thread::scope(|scope| {
            let ticker = scope.spawn(|| {
                while !done.load(Ordering::Acquire) {
                    fx.manager.tick(late);
                }
            });

            let mut last = 1u16;
            for next in 2..=200u16 {
                let world = fx.manager.acquire(&world_id, owner).unwrap();
                assert_eq!(world.read_block(owner, pos).unwrap(), Block::new(last, 0));
                world.mutate_block(owner, pos, Block::new(next, 0)).unwrap();
                last = next;
                fx.manager.release(&world_id, owner);
            }
            done.store(true, Ordering::Release);
            ticker.join().unwrap();
            last
        });

        fx.manager.persist_all().unwrap();
        let record = fx.store.load(&world_id).unwrap().unwrap();
        let chunk = Chunk::deserialize(&record.chunks["0,0"]).unwrap();
        assert_eq!(
            chunk.get(realm_core::LocalPos::new(2, 50, 2)).unwrap(),
            Block::new(last, 0)
        );
        assert_eq!(record.owner_id, Some(owner));
    }

    #[tokio::test]
    async fn test_scheduler_evicts_in_background() {
        let fx = fixture(4);
        let owner = ActorId::new();
        fx.manager.acquire(&id("bg"), owner).unwrap();
        fx.manager.release(&id("bg"), owner);
        fx.clock.advance(Duration::from_secs(120));

        let token = CancellationToken::new();
        let handle = fx
            .manager
            .spawn_scheduler(Duration::from_millis(5), token.clone());
        for _ in 0..200 {
            if !fx.manager.is_resident(&id("bg")) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        token.cancel();
        handle.await.unwrap();

        assert!(!fx.manager.is_resident(&id("bg")));
        assert!(fx.store.load(&id("bg")).unwrap().is_some());
    }
}
