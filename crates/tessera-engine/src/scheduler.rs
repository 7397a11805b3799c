//! The four-phase entity lifecycle scheduler.
//!
//! [`Scheduler`] owns a [`SortedRegistry`] of every live [`Entity`], ordered by
//! identity, and advances it one tick at a time:
//!
//! 1. **Start** -- `start` for every entity registered since the last tick
//!    that is still registered.
//! 2. **Update** -- `update` for every executing component, ascending identity.
//! 3. **LateUpdate** -- `late_update`, same walk.
//! 4. **Settle** --
//!    a. buffered creations are merged in (one `union_with`); the newly added
//!       entities are started next tick;
//!    b. buffered active/enabled toggles are committed and components whose
//!       executing state flipped are notified;
//!    c. buffered removals are subtracted (one `except_with`);
//!    d. removed components receive `on_destroy`.
//!
//! While a tick is in flight every creation, removal and toggle request is
//! appended to a side buffer under the state lock; when no tick is running the
//! same requests apply immediately. Requests raised during the settle step
//! itself wait for the next settle.
//!
//! Callback failures (errors, and panics when
//! [`SchedulerConfig::catch_panics`] is set) are reported through the
//! [`DiagnosticSink`] and never stop the phase.
//!
//! # Locking
//!
//! `state` is taken before `registry` and before any object's container;
//! flags, listeners and the identity allocator are leaf locks. No scheduler
//! lock is held while a behavior callback runs, except the registry read lock
//! during the Update and LateUpdate walks.

use std::any::Any;
use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::mem;
use std::ops::Deref;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tessera_core::identity::{EntityId, IdentityAllocator};
use tessera_core::registry::{OrdFn, SortedRegistry};

use crate::behavior::{dispatch, Behavior, Callback, Context};
use crate::composition::ClonedBehavior;
use crate::diagnostics::{DiagnosticSink, TracingSink};
use crate::entity::{ComponentCell, ComponentRef, Entity, GameObject, ObjectInfo};
use crate::network::{NetworkLink, PacketSlot};
use crate::observer::ObserverList;
use crate::physics::{CollisionHandle, SharedPhysics};
use crate::transform::Transform;
use crate::visitor::RegistryVisitor;
use crate::{EngineError, LifecycleError};

// ---------------------------------------------------------------------------
// SchedulerConfig
// ---------------------------------------------------------------------------

/// Scheduler behavior switches.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SchedulerConfig {
    /// Reuse identities of destroyed entities (FIFO).
    pub recycle_identities: bool,
    /// Convert panics inside callbacks into logged lifecycle errors.
    pub catch_panics: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            recycle_identities: false,
            catch_panics: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Phase / TickReport
// ---------------------------------------------------------------------------

/// Where the scheduler currently is.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Phase {
    #[default]
    Idle,
    Start,
    Update,
    LateUpdate,
    Settle,
}

impl Phase {
    /// Whether a tick is in flight.
    pub fn is_ticking(self) -> bool {
        self != Phase::Idle
    }
}

/// Outcome of one [`Scheduler::tick`].
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TickReport {
    /// Zero-based index of the tick.
    pub tick: u64,
    /// Entities that went through the Start phase.
    pub started: usize,
    /// Components visited by the Update phase.
    pub updated: usize,
    /// Active/enabled flags that actually flipped at settle.
    pub state_changes: usize,
    /// Entities that received their destroy step.
    pub destroyed: usize,
    /// Callback failures, in the order they happened.
    pub failures: Vec<LifecycleError>,
}

impl TickReport {
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Shared state
// ---------------------------------------------------------------------------

/// Request buffers and phase, guarded by one lock.
#[derive(Default)]
struct PendingState {
    phase: Phase,
    adding: Vec<Entity>,
    removing: Vec<Entity>,
    refreshing: Vec<Entity>,
    /// Registered since the last Start phase.
    started: Vec<Entity>,
    /// Removed outside a tick, waiting for the destroy step.
    destroyed: Vec<Entity>,
}

pub(crate) struct Shared {
    pub(crate) config: SchedulerConfig,
    pub(crate) sink: Arc<dyn DiagnosticSink>,
    registry: RwLock<SortedRegistry<Entity>>,
    state: Mutex<PendingState>,
    identities: Mutex<IdentityAllocator>,
    delta_time: Mutex<f64>,
    tick_count: AtomicU64,
    pub(crate) physics: RwLock<Option<SharedPhysics>>,
    pub(crate) colliders: Mutex<Vec<(CollisionHandle, Arc<ComponentCell>)>>,
    pub(crate) network: RwLock<Option<Arc<dyn NetworkLink>>>,
    pub(crate) packets: Mutex<PacketSlot>,
    pub(crate) visitors: Mutex<Vec<Box<dyn RegistryVisitor>>>,
}

/// Result of committing a batch of toggle requests.
struct StateCommit {
    flips: usize,
    notifications: Vec<(Arc<ComponentCell>, bool)>,
}

fn by_cell_id(a: &Arc<ComponentCell>, b: &Arc<ComponentCell>) -> Ordering {
    a.id().cmp(&b.id())
}

thread_local! {
    /// Components whose callback is running on this thread, innermost last.
    static RUNNING: RefCell<Vec<EntityId>> = const { RefCell::new(Vec::new()) };
}

/// Marks a component as busy on this thread for the lifetime of the guard.
pub(crate) struct RunningGuard;

impl RunningGuard {
    /// `None` if `id` is already busy on this thread.
    pub(crate) fn enter(id: EntityId) -> Option<Self> {
        RUNNING.with(|running| {
            let mut running = running.borrow_mut();
            if running.contains(&id) {
                return None;
            }
            running.push(id);
            Some(RunningGuard)
        })
    }
}

impl Drop for RunningGuard {
    fn drop(&mut self) {
        RUNNING.with(|running| {
            running.borrow_mut().pop();
        });
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_owned()
    }
}

// ---------------------------------------------------------------------------
// SchedulerHandle
// ---------------------------------------------------------------------------

/// A cloneable, thread-safe reference to a scheduler.
///
/// Every request entry point lives here; only [`Scheduler::tick`] requires the
/// owning [`Scheduler`].
#[derive(Clone)]
pub struct SchedulerHandle {
    pub(crate) shared: Arc<Shared>,
}

impl SchedulerHandle {
    pub(crate) fn from_shared(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    pub fn config(&self) -> &SchedulerConfig {
        &self.shared.config
    }

    pub fn sink(&self) -> &Arc<dyn DiagnosticSink> {
        &self.shared.sink
    }

    pub fn phase(&self) -> Phase {
        self.shared.state.lock().phase
    }

    pub fn is_ticking(&self) -> bool {
        self.phase().is_ticking()
    }

    /// Elapsed time passed to the current (or last) tick.
    pub fn delta_time(&self) -> f64 {
        *self.shared.delta_time.lock()
    }

    /// Number of completed ticks.
    pub fn tick_count(&self) -> u64 {
        self.shared.tick_count.load(AtomicOrdering::Acquire)
    }

    // -- creation -----------------------------------------------------------

    /// Create an active game object named `name`.
    pub fn create_object(&self, name: &str) -> Result<Arc<GameObject>, EngineError> {
        self.create_object_with(ObjectInfo::named(name))
    }

    /// Create an active game object with the given descriptive fields.
    pub fn create_object_with(&self, info: ObjectInfo) -> Result<Arc<GameObject>, EngineError> {
        let go = self.new_object(info, true)?;
        self.register(Entity::Object(go.clone()))?;
        Ok(go)
    }

    /// Attach `behavior` to `go` as a new enabled component.
    ///
    /// The component is visible to lookups on `go` immediately and joins the
    /// registry with the usual buffering rules.
    pub fn attach<B: Behavior + Clone>(
        &self,
        go: &Arc<GameObject>,
        behavior: B,
    ) -> Result<ComponentRef<B>, EngineError> {
        if !go.is_owned_by(&self.shared) {
            return Err(EngineError::InvalidState(format!(
                "{} belongs to another scheduler",
                go.id()
            )));
        }
        let cell = self.build_cell(
            go,
            ClonedBehavior {
                behavior: Box::new(behavior),
                enabled: true,
                listeners: ObserverList::new(),
            },
        )?;
        go.container().lock().attach(cell.clone())?;
        self.register(Entity::Component(cell.clone()))?;
        ComponentRef::new(cell).ok_or_else(|| {
            EngineError::InvalidState("attached behavior has an unexpected type".to_owned())
        })
    }

    /// Create a copy of `prefab` named `"<name> (Clone)"`.
    ///
    /// Tag, layer, transform and active state are copied, then every
    /// component is cloned onto the new object.
    pub fn instantiate(&self, prefab: &Arc<GameObject>) -> Result<Arc<GameObject>, EngineError> {
        self.instantiate_with(prefab, None)
    }

    /// Like [`instantiate`](Self::instantiate), placing the copy at `transform`.
    pub fn instantiate_at(
        &self,
        prefab: &Arc<GameObject>,
        transform: Transform,
    ) -> Result<Arc<GameObject>, EngineError> {
        self.instantiate_with(prefab, Some(transform))
    }

    fn instantiate_with(
        &self,
        prefab: &Arc<GameObject>,
        transform: Option<Transform>,
    ) -> Result<Arc<GameObject>, EngineError> {
        let mut info = prefab.info();
        info.name = format!("{} (Clone)", info.name);
        if let Some(transform) = transform {
            info.transform = transform;
        }
        // Work from a copy so the prefab's container is not locked while the
        // clone is built.
        let source = prefab.container().lock().clone();
        let go = self.new_object(info, prefab.is_active())?;

        let mut spawned = Vec::new();
        let cloned = {
            let mut target = go.container().lock();
            source.clone_into(&mut target, |copy| {
                let cell = self.build_cell(&go, copy)?;
                spawned.push(cell.id());
                Ok(cell)
            })
        };
        let cells = match cloned {
            Ok(cells) => cells,
            Err(err) => {
                let mut identities = self.shared.identities.lock();
                identities.release(go.id());
                for id in spawned {
                    identities.release(id);
                }
                return Err(err);
            }
        };

        self.register(Entity::Object(go.clone()))?;
        for cell in cells {
            self.register(Entity::Component(cell))?;
        }
        Ok(go)
    }

    fn new_object(&self, info: ObjectInfo, active: bool) -> Result<Arc<GameObject>, EngineError> {
        let id = self.shared.identities.lock().allocate()?;
        Ok(Arc::new(GameObject::new(
            id,
            Arc::downgrade(&self.shared),
            info,
            active,
        )))
    }

    pub(crate) fn build_cell(
        &self,
        go: &Arc<GameObject>,
        copy: ClonedBehavior,
    ) -> Result<Arc<ComponentCell>, EngineError> {
        let id = self.shared.identities.lock().allocate()?;
        Ok(Arc::new(ComponentCell::new(
            id,
            go,
            copy.behavior,
            copy.enabled,
            copy.listeners,
        )))
    }

    fn register(&self, entity: Entity) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        if state.phase.is_ticking() {
            state.adding.push(entity);
            return Ok(());
        }
        let id = entity.id();
        self.shared
            .registry
            .write()
            .insert(entity.clone())
            .map_err(|_| EngineError::DuplicateKey(id))?;
        state.started.push(entity);
        Ok(())
    }

    // -- removal ------------------------------------------------------------

    /// Destroy an entity; game objects take their components with them.
    pub fn destroy(&self, entity: &Entity) -> Result<(), EngineError> {
        match entity {
            Entity::Object(go) => self.destroy_object(go),
            Entity::Component(cell) => self.destroy_component(cell),
        }
    }

    /// Destroy every attached component, then the object.
    ///
    /// Fails with [`EngineError::NotFound`] when no tick is running and the
    /// object is not registered.
    pub fn destroy_object(&self, go: &Arc<GameObject>) -> Result<(), EngineError> {
        let cells: Vec<Arc<ComponentCell>> = {
            let container = go.container().lock();
            container
                .cells()
                .into_iter()
                .filter(|c| !container.is_pending_removal(c.id()))
                .collect()
        };
        self.unregister(Entity::Object(go.clone()))?;
        for cell in &cells {
            self.destroy_component(cell)?;
        }
        Ok(())
    }

    /// Remove a component from the registry and detach it from its owner.
    pub fn destroy_component(&self, cell: &Arc<ComponentCell>) -> Result<(), EngineError> {
        self.unregister(Entity::Component(cell.clone()))?;
        if let Some(go) = cell.game_object() {
            let mut state = self.shared.state.lock();
            let mut container = go.container().lock();
            container.detach(cell.id());
            if state.phase.is_ticking() {
                drop(container);
                state.refreshing.push(Entity::Object(go.clone()));
            } else {
                container.refresh();
            }
        }
        Ok(())
    }

    fn unregister(&self, entity: Entity) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        if state.phase.is_ticking() {
            state.removing.push(entity);
            return Ok(());
        }
        let mut registry = self.shared.registry.write();
        // A recycled identity may name a different entity by now.
        let index = registry
            .index_of(&entity)
            .filter(|&i| registry.get(i).is_some_and(|e| e.same_as(&entity)));
        match index {
            Some(index) => {
                state.destroyed.push(registry.remove_at(index));
                Ok(())
            }
            None => Err(EngineError::NotFound(entity.id())),
        }
    }

    /// Empty the registry without running any callbacks.
    pub fn clear(&self) -> Result<(), EngineError> {
        let mut state = self.shared.state.lock();
        if state.phase.is_ticking() {
            return Err(EngineError::InvalidState(
                "cannot clear the registry while a tick is in progress".to_owned(),
            ));
        }
        self.shared.registry.write().clear();
        state.started.clear();
        Ok(())
    }

    // -- state toggles ------------------------------------------------------

    pub(crate) fn request_state_change(&self, entity: Entity, value: bool) {
        let commit = {
            let mut state = self.shared.state.lock();
            entity.toggle().lock().request(value);
            if state.phase.is_ticking() {
                state.refreshing.push(entity);
                return;
            }
            self.commit_state_changes(vec![entity])
        };
        for (cell, executing) in commit.notifications {
            self.notify_executing(&cell, executing);
        }
    }

    /// Refresh containers and commit flags of `requests`; returns the
    /// components whose executing state flipped.
    fn commit_state_changes(&self, requests: Vec<Entity>) -> StateCommit {
        // Handles on entities that are no longer registered only settle their
        // own flag; their identity may belong to a live entity now.
        let (requests, stale): (Vec<Entity>, Vec<Entity>) =
            requests.into_iter().partition(|e| self.is_registered(e));
        let mut flips = 0;
        for entity in &stale {
            if let Entity::Object(go) = entity {
                go.container().lock().refresh();
            }
            if entity.toggle().lock().commit().is_some() {
                flips += 1;
            }
        }

        let requests = SortedRegistry::from_vec(requests, Entity::cmp as OrdFn<Entity>);
        let mut affected = Vec::new();
        for entity in requests.iter() {
            match entity {
                Entity::Object(go) => affected.extend(go.components()),
                Entity::Component(cell) => affected.push(cell.clone()),
            }
        }
        let affected = SortedRegistry::from_vec(affected, by_cell_id);
        let before: Vec<bool> = affected.iter().map(|c| c.is_executing()).collect();

        for entity in requests.iter() {
            if let Entity::Object(go) = entity {
                go.container().lock().refresh();
            }
            if entity.toggle().lock().commit().is_some() {
                flips += 1;
            }
        }

        let notifications = affected
            .into_vec()
            .into_iter()
            .zip(before)
            .filter_map(|(cell, was)| {
                let now = cell.is_executing();
                (now != was).then_some((cell, now))
            })
            .collect();
        StateCommit {
            flips,
            notifications,
        }
    }

    fn notify_executing(&self, cell: &Arc<ComponentCell>, executing: bool) -> Option<LifecycleError> {
        let failure = self.invoke(cell, Callback::ExecutingChanged, executing);
        cell.listeners().notify(&executing);
        failure
    }

    // -- callbacks ----------------------------------------------------------

    fn invoke(
        &self,
        cell: &Arc<ComponentCell>,
        callback: Callback,
        executing: bool,
    ) -> Option<LifecycleError> {
        // Re-entering a running component would block on its own behavior lock.
        let Some(_running) = RunningGuard::enter(cell.id()) else {
            self.shared.sink.log_warning(&format!(
                "{callback} of {} skipped: its own callback is still running",
                cell.id()
            ));
            return None;
        };
        let result = {
            let mut behavior = cell.behavior.lock();
            let mut ctx = Context::new(self, cell, callback);
            if self.shared.config.catch_panics {
                panic::catch_unwind(AssertUnwindSafe(|| {
                    dispatch(&mut **behavior, &mut ctx, callback, executing)
                }))
                .unwrap_or_else(|payload| {
                    Err(anyhow::anyhow!("panicked: {}", panic_message(payload.as_ref())))
                })
            } else {
                dispatch(&mut **behavior, &mut ctx, callback, executing)
            }
        };

        let err = result.err()?;
        let error = LifecycleError {
            entity: cell.id(),
            behavior: cell.type_name(),
            callback,
            message: format!("{err:#}"),
        };
        self.shared.sink.log_error(&error.to_string());
        Some(error)
    }

    fn run_phase(&self, callback: Callback, failures: &mut Vec<LifecycleError>) -> usize {
        let registry = self.shared.registry.read_recursive();
        let mut visited = 0;
        for entity in registry.iter() {
            let Entity::Component(cell) = entity else {
                continue;
            };
            if !cell.is_executing() {
                continue;
            }
            visited += 1;
            failures.extend(self.invoke(cell, callback, true));
        }
        visited
    }

    fn finalize_destroyed(&self, entity: &Entity) -> Option<LifecycleError> {
        let failure = match entity {
            Entity::Component(cell) => {
                let failure = self.invoke(cell, Callback::Destroy, false);
                cell.clear_listeners();
                self.forget_collider(cell.id());
                failure
            }
            Entity::Object(_) => None,
        };
        if self.shared.config.recycle_identities {
            self.shared.identities.lock().release(entity.id());
        }
        failure
    }

    fn set_phase(&self, phase: Phase) {
        self.shared.state.lock().phase = phase;
    }

    fn is_live(registry: &SortedRegistry<Entity>, entity: &Entity) -> bool {
        registry.find(entity).is_some_and(|e| e.same_as(entity))
    }

    // -- lookup -------------------------------------------------------------

    /// The registered entity with identity `id`.
    pub fn find(&self, id: EntityId) -> Option<Entity> {
        self.shared
            .registry
            .read_recursive()
            .find_by_key(&id, |k, e| k.cmp(&e.id()))
            .cloned()
    }

    /// Every registered entity whose identity is in `ids`, ascending.
    pub fn find_all(&self, ids: &[EntityId]) -> Vec<Entity> {
        let mut keys = ids.to_vec();
        keys.sort_unstable();
        keys.dedup();
        self.shared
            .registry
            .read_recursive()
            .find_all(&keys, |k, e| k.cmp(&e.id()))
            .into_iter()
            .cloned()
            .collect()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.find(id).is_some()
    }

    fn is_registered(&self, entity: &Entity) -> bool {
        Self::is_live(&self.shared.registry.read_recursive(), entity)
    }

    /// First registered component of type `B` (lowest identity).
    pub fn find_object_of_type<B: Behavior>(&self) -> Option<ComponentRef<B>> {
        self.shared
            .registry
            .read_recursive()
            .iter()
            .filter_map(Entity::as_component)
            .find(|c| c.is::<B>())
            .and_then(|c| ComponentRef::new(c.clone()))
    }

    /// Every registered component of type `B`, ascending identity.
    pub fn find_objects_of_type<B: Behavior>(&self) -> Vec<ComponentRef<B>> {
        self.shared
            .registry
            .read_recursive()
            .iter()
            .filter_map(Entity::as_component)
            .filter_map(|c| ComponentRef::new(c.clone()))
            .collect()
    }

    /// Snapshot of the registry, ascending identity.
    pub fn entities(&self) -> Vec<Entity> {
        self.shared.registry.read_recursive().iter().cloned().collect()
    }

    pub fn entity_count(&self) -> usize {
        self.shared.registry.read_recursive().len()
    }
}

impl fmt::Debug for SchedulerHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SchedulerHandle")
            .field("phase", &self.phase())
            .field("entities", &self.entity_count())
            .field("ticks", &self.tick_count())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Scheduler
// ---------------------------------------------------------------------------

/// Owner of the tick. Dereferences to [`SchedulerHandle`].
///
/// Exactly one `Scheduler` exists per registry, so only one thread can run
/// ticks; any number of [`SchedulerHandle`]s may submit requests concurrently.
pub struct Scheduler {
    handle: SchedulerHandle,
}

impl Scheduler {
    /// Create a scheduler reporting to a [`TracingSink`].
    pub fn new(config: SchedulerConfig) -> Self {
        Self::with_sink(config, Arc::new(TracingSink))
    }

    /// Create a scheduler reporting to `sink`.
    pub fn with_sink(config: SchedulerConfig, sink: Arc<dyn DiagnosticSink>) -> Self {
        let identities = if config.recycle_identities {
            IdentityAllocator::with_recycling()
        } else {
            IdentityAllocator::new()
        };
        let shared = Shared {
            config,
            sink,
            registry: RwLock::new(SortedRegistry::new()),
            state: Mutex::new(PendingState::default()),
            identities: Mutex::new(identities),
            delta_time: Mutex::new(0.0),
            tick_count: AtomicU64::new(0),
            physics: RwLock::new(None),
            colliders: Mutex::new(Vec::new()),
            network: RwLock::new(None),
            packets: Mutex::new(PacketSlot::default()),
            visitors: Mutex::new(Vec::new()),
        };
        Self {
            handle: SchedulerHandle::from_shared(Arc::new(shared)),
        }
    }

    /// A new handle on this scheduler.
    pub fn handle(&self) -> SchedulerHandle {
        self.handle.clone()
    }

    /// Run one tick with `delta_time` seconds of elapsed time.
    pub fn tick(&mut self, delta_time: f64) -> TickReport {
        let handle = &self.handle;
        let shared = &handle.shared;
        *shared.delta_time.lock() = delta_time;
        let mut report = TickReport {
            tick: handle.tick_count(),
            ..TickReport::default()
        };

        // -- Start --
        let mut pending_start = {
            let mut state = shared.state.lock();
            state.phase = Phase::Start;
            mem::take(&mut state.started)
        };
        let ticking = TickGuard(handle);
        // Stale entries (removed, possibly with a recycled identity) are kept
        // and skipped by the registration check below.
        pending_start.sort_by_key(Entity::id);
        for entity in &pending_start {
            if !handle.is_registered(entity) {
                continue;
            }
            report.started += 1;
            if let Entity::Component(cell) = entity {
                report.failures.extend(handle.invoke(cell, Callback::Start, true));
            }
        }

        // -- Update / LateUpdate --
        handle.set_phase(Phase::Update);
        report.updated = handle.run_phase(Callback::Update, &mut report.failures);
        handle.set_phase(Phase::LateUpdate);
        handle.run_phase(Callback::LateUpdate, &mut report.failures);

        // -- Settle --
        handle.set_phase(Phase::Settle);

        let adding = mem::take(&mut shared.state.lock().adding);
        if !adding.is_empty() {
            let added = shared.registry.write().union_with(adding);
            shared.state.lock().started.extend(added);
        }

        let refreshing = mem::take(&mut shared.state.lock().refreshing);
        if !refreshing.is_empty() {
            let commit = handle.commit_state_changes(refreshing);
            report.state_changes = commit.flips;
            for (cell, executing) in commit.notifications {
                report.failures.extend(handle.notify_executing(&cell, executing));
            }
        }

        let removing = mem::take(&mut shared.state.lock().removing);
        let removed = if removing.is_empty() {
            Vec::new()
        } else {
            let mut registry = shared.registry.write();
            let live: Vec<Entity> = removing
                .into_iter()
                .filter(|e| SchedulerHandle::is_live(&registry, e))
                .collect();
            registry.except_with(live)
        };

        let mut destroyed = mem::take(&mut shared.state.lock().destroyed);
        destroyed.extend(removed);
        for entity in &destroyed {
            report.failures.extend(handle.finalize_destroyed(entity));
        }
        report.destroyed = destroyed.len();

        handle.visit_registry();

        drop(ticking);
        shared.tick_count.fetch_add(1, AtomicOrdering::AcqRel);

        tracing::debug!(
            tick = report.tick,
            started = report.started,
            updated = report.updated,
            state_changes = report.state_changes,
            destroyed = report.destroyed,
            failures = report.failures.len(),
            "tick settled"
        );
        report
    }
}

/// Returns the scheduler to [`Phase::Idle`] when a tick ends, including when a
/// callback panic unwinds out of it.
struct TickGuard<'a>(&'a SchedulerHandle);

impl Drop for TickGuard<'_> {
    fn drop(&mut self) {
        self.0.set_phase(Phase::Idle);
    }
}

impl Deref for Scheduler {
    type Target = SchedulerHandle;

    fn deref(&self) -> &SchedulerHandle {
        &self.handle
    }
}

impl fmt::Debug for Scheduler {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("Scheduler").field(&self.handle).finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
