//! Entities managed by the scheduler.
//!
//! The registry stores [`Entity`] values, a tagged variant over the two kinds
//! of entity:
//!
//! - [`GameObject`] -- a container entity with a name, tag, layer, transform,
//!   a double-buffered active flag and a [`CompositionContainer`].
//! - [`ComponentCell`] -- a behavior object attached to exactly one game
//!   object, with its own double-buffered enabled flag.
//!
//! Flag writes are requests: the new value is parked as *pending* and only
//! becomes *current* when the scheduler commits it (immediately when idle, at
//! the settle step during a tick).

use std::any::TypeId;
use std::cmp::Ordering;
use std::fmt;
use std::marker::PhantomData;
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessera_core::identity::EntityId;

use crate::behavior::Behavior;
use crate::composition::CompositionContainer;
use crate::observer::{ObserverList, SubscriptionId};
use crate::scheduler::{RunningGuard, SchedulerHandle, Shared};
use crate::transform::Transform;
use crate::EngineError;

// ---------------------------------------------------------------------------
// ToggleFlag
// ---------------------------------------------------------------------------

/// A boolean whose writes take effect on commit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct ToggleFlag {
    current: bool,
    pending: bool,
}

impl ToggleFlag {
    pub(crate) fn new(value: bool) -> Self {
        Self {
            current: value,
            pending: value,
        }
    }

    pub(crate) fn current(&self) -> bool {
        self.current
    }

    pub(crate) fn request(&mut self, value: bool) {
        self.pending = value;
    }

    /// Make the pending value current. Returns the new value if it changed.
    pub(crate) fn commit(&mut self) -> Option<bool> {
        if self.pending == self.current {
            return None;
        }
        self.current = self.pending;
        Some(self.current)
    }
}

// ---------------------------------------------------------------------------
// GameObject
// ---------------------------------------------------------------------------

/// Descriptive fields of a game object.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObjectInfo {
    pub name: String,
    pub tag: String,
    pub layer: i32,
    pub transform: Transform,
}

impl Default for ObjectInfo {
    fn default() -> Self {
        Self {
            name: "GameObject".to_owned(),
            tag: "Default".to_owned(),
            layer: 1,
            transform: Transform::default(),
        }
    }
}

impl ObjectInfo {
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Self::default()
        }
    }
}

/// A container entity owning zero or more components.
pub struct GameObject {
    id: EntityId,
    scheduler: Weak<Shared>,
    info: Mutex<ObjectInfo>,
    active: Mutex<ToggleFlag>,
    container: Mutex<CompositionContainer>,
}

impl GameObject {
    pub(crate) fn new(id: EntityId, scheduler: Weak<Shared>, info: ObjectInfo, active: bool) -> Self {
        Self {
            id,
            scheduler,
            info: Mutex::new(info),
            active: Mutex::new(ToggleFlag::new(active)),
            container: Mutex::new(CompositionContainer::new(id)),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// The scheduler this object is registered with.
    pub fn scheduler(&self) -> Result<SchedulerHandle, EngineError> {
        self.scheduler
            .upgrade()
            .map(SchedulerHandle::from_shared)
            .ok_or(EngineError::SchedulerDropped)
    }

    // -- descriptive fields -------------------------------------------------

    /// Snapshot of name, tag, layer and transform.
    pub fn info(&self) -> ObjectInfo {
        self.info.lock().clone()
    }

    pub fn name(&self) -> String {
        self.info.lock().name.clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        self.info.lock().name = name.into();
    }

    pub fn tag(&self) -> String {
        self.info.lock().tag.clone()
    }

    pub fn set_tag(&self, tag: impl Into<String>) {
        self.info.lock().tag = tag.into();
    }

    pub fn layer(&self) -> i32 {
        self.info.lock().layer
    }

    pub fn set_layer(&self, layer: i32) {
        self.info.lock().layer = layer;
    }

    pub fn transform(&self) -> Transform {
        self.info.lock().transform
    }

    pub fn set_transform(&self, transform: Transform) {
        self.info.lock().transform = transform;
    }

    // -- active state -------------------------------------------------------

    /// Current (committed) active state.
    pub fn is_active(&self) -> bool {
        self.active.lock().current()
    }

    /// A game object executes exactly when it is active.
    pub fn is_executing(&self) -> bool {
        self.is_active()
    }

    /// Request a new active state.
    ///
    /// Applied immediately when no tick is running, otherwise at the next
    /// settle step. Attached components whose executing state flips as a
    /// result are notified.
    pub fn set_active(self: &Arc<Self>, active: bool) {
        match self.scheduler() {
            Ok(handle) => handle.request_state_change(Entity::Object(self.clone()), active),
            Err(_) => {
                let mut flag = self.active.lock();
                flag.request(active);
                flag.commit();
            }
        }
    }

    pub(crate) fn active_flag(&self) -> &Mutex<ToggleFlag> {
        &self.active
    }

    pub(crate) fn is_owned_by(&self, shared: &Arc<Shared>) -> bool {
        std::ptr::eq(self.scheduler.as_ptr(), Arc::as_ptr(shared))
    }

    // -- components ---------------------------------------------------------

    /// Attach a new component.
    pub fn add_component<B: Behavior + Clone>(
        self: &Arc<Self>,
        behavior: B,
    ) -> Result<ComponentRef<B>, EngineError> {
        self.scheduler()?.attach(self, behavior)
    }

    /// First attached component of type `B`.
    pub fn component<B: Behavior>(&self) -> Option<ComponentRef<B>> {
        self.container.lock().find::<B>()
    }

    /// Every attached component of type `B`, in identity order.
    pub fn components_of<B: Behavior>(&self) -> Vec<ComponentRef<B>> {
        self.container.lock().find_all::<B>()
    }

    /// Every attached component.
    pub fn components(&self) -> Vec<Arc<ComponentCell>> {
        self.container.lock().cells()
    }

    pub fn component_count(&self) -> usize {
        self.container.lock().len()
    }

    pub(crate) fn container(&self) -> &Mutex<CompositionContainer> {
        &self.container
    }

    /// Destroy this object and every attached component.
    pub fn destroy(self: &Arc<Self>) -> Result<(), EngineError> {
        self.scheduler()?.destroy_object(self)
    }
}

impl fmt::Debug for GameObject {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GameObject")
            .field("id", &self.id)
            .field("name", &self.name())
            .field("active", &self.is_active())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentCell
// ---------------------------------------------------------------------------

/// A behavior object attached to a game object.
///
/// Name, tag, layer and transform of a component are those of its owner.
pub struct ComponentCell {
    id: EntityId,
    type_id: TypeId,
    type_name: &'static str,
    owner: Weak<GameObject>,
    enabled: Mutex<ToggleFlag>,
    pub(crate) behavior: Mutex<Box<dyn Behavior>>,
    listeners: Mutex<ObserverList<bool>>,
}

impl ComponentCell {
    pub(crate) fn new(
        id: EntityId,
        owner: &Arc<GameObject>,
        behavior: Box<dyn Behavior>,
        enabled: bool,
        listeners: ObserverList<bool>,
    ) -> Self {
        Self {
            id,
            type_id: behavior.as_any().type_id(),
            type_name: behavior.behavior_name(),
            owner: Arc::downgrade(owner),
            enabled: Mutex::new(ToggleFlag::new(enabled)),
            behavior: Mutex::new(behavior),
            listeners: Mutex::new(listeners),
        }
    }

    pub fn id(&self) -> EntityId {
        self.id
    }

    /// Full type name of the behavior.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// Whether the behavior is of type `B`.
    pub fn is<B: Behavior>(&self) -> bool {
        self.type_id == TypeId::of::<B>()
    }

    /// The owning game object, if it is still alive.
    pub fn game_object(&self) -> Option<Arc<GameObject>> {
        self.owner.upgrade()
    }

    /// Current (committed) enabled state.
    pub fn is_enabled(&self) -> bool {
        self.enabled.lock().current()
    }

    /// Owner alive and active, and this component enabled.
    pub fn is_executing(&self) -> bool {
        self.is_enabled() && self.owner.upgrade().is_some_and(|go| go.is_active())
    }

    /// Request a new enabled state, with the same timing as
    /// [`GameObject::set_active`].
    pub fn set_enabled(self: &Arc<Self>, enabled: bool) {
        match self.game_object().map(|go| go.scheduler()) {
            Some(Ok(handle)) => handle.request_state_change(Entity::Component(self.clone()), enabled),
            _ => {
                let mut flag = self.enabled.lock();
                flag.request(enabled);
                flag.commit();
            }
        }
    }

    pub(crate) fn enabled_flag(&self) -> &Mutex<ToggleFlag> {
        &self.enabled
    }

    /// Subscribe to executing-state changes of this component.
    pub fn on_executing_changed(
        &self,
        handler: impl Fn(&bool) + Send + Sync + 'static,
    ) -> SubscriptionId {
        self.listeners.lock().subscribe(handler)
    }

    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.listeners.lock().unsubscribe(id)
    }

    /// Copy of the executing-change subscriptions.
    pub fn listeners(&self) -> ObserverList<bool> {
        self.listeners.lock().clone()
    }

    pub(crate) fn clear_listeners(&self) {
        self.listeners.lock().clear();
    }

    /// Request removal of this component.
    pub fn destroy(self: &Arc<Self>) -> Result<(), EngineError> {
        self.game_object()
            .ok_or(EngineError::NotFound(self.id))?
            .scheduler()?
            .destroy_component(self)
    }
}

impl fmt::Debug for ComponentCell {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ComponentCell")
            .field("id", &self.id)
            .field("type", &self.type_name)
            .field("enabled", &self.is_enabled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ComponentRef
// ---------------------------------------------------------------------------

/// A typed handle on a component cell.
pub struct ComponentRef<B> {
    cell: Arc<ComponentCell>,
    _marker: PhantomData<fn() -> B>,
}

impl<B: Behavior> ComponentRef<B> {
    /// Wrap `cell` if its behavior is of type `B`.
    pub fn new(cell: Arc<ComponentCell>) -> Option<Self> {
        cell.is::<B>().then_some(Self {
            cell,
            _marker: PhantomData,
        })
    }

    pub fn id(&self) -> EntityId {
        self.cell.id()
    }

    pub fn cell(&self) -> &Arc<ComponentCell> {
        &self.cell
    }

    pub fn game_object(&self) -> Option<Arc<GameObject>> {
        self.cell.game_object()
    }

    pub fn is_enabled(&self) -> bool {
        self.cell.is_enabled()
    }

    pub fn is_executing(&self) -> bool {
        self.cell.is_executing()
    }

    pub fn set_enabled(&self, enabled: bool) {
        self.cell.set_enabled(enabled);
    }

    pub fn destroy(&self) -> Result<(), EngineError> {
        self.cell.destroy()
    }

    /// Read the behavior.
    ///
    /// Returns `None` while the behavior is busy (its own callback is running
    /// or another thread holds it).
    pub fn with<R>(&self, f: impl FnOnce(&B) -> R) -> Option<R> {
        let _running = RunningGuard::enter(self.cell.id)?;
        let guard = self.cell.behavior.try_lock()?;
        guard.as_any().downcast_ref::<B>().map(f)
    }

    /// Mutate the behavior. Returns `None` while it is busy.
    ///
    /// Callbacks this component would receive while `f` runs, such as the
    /// executing-change notification of an idle `set_enabled` on itself, are
    /// skipped with a warning.
    pub fn with_mut<R>(&self, f: impl FnOnce(&mut B) -> R) -> Option<R> {
        let _running = RunningGuard::enter(self.cell.id)?;
        let mut guard = self.cell.behavior.try_lock()?;
        guard.as_any_mut().downcast_mut::<B>().map(f)
    }
}

impl<B> Clone for ComponentRef<B> {
    fn clone(&self) -> Self {
        Self {
            cell: self.cell.clone(),
            _marker: PhantomData,
        }
    }
}

impl<B> fmt::Debug for ComponentRef<B> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_tuple("ComponentRef").field(&self.cell.id).finish()
    }
}

// ---------------------------------------------------------------------------
// Entity
// ---------------------------------------------------------------------------

/// Kind tag of an [`Entity`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum EntityKind {
    Object,
    Component,
}

/// A registry entry: either a game object or a component.
///
/// Equality and ordering are by identity only.
#[derive(Clone)]
pub enum Entity {
    Object(Arc<GameObject>),
    Component(Arc<ComponentCell>),
}

impl Entity {
    pub fn id(&self) -> EntityId {
        match self {
            Entity::Object(go) => go.id(),
            Entity::Component(cell) => cell.id(),
        }
    }

    pub fn kind(&self) -> EntityKind {
        match self {
            Entity::Object(_) => EntityKind::Object,
            Entity::Component(_) => EntityKind::Component,
        }
    }

    pub fn is_executing(&self) -> bool {
        match self {
            Entity::Object(go) => go.is_executing(),
            Entity::Component(cell) => cell.is_executing(),
        }
    }

    pub fn as_object(&self) -> Option<&Arc<GameObject>> {
        match self {
            Entity::Object(go) => Some(go),
            Entity::Component(_) => None,
        }
    }

    pub fn as_component(&self) -> Option<&Arc<ComponentCell>> {
        match self {
            Entity::Component(cell) => Some(cell),
            Entity::Object(_) => None,
        }
    }

    /// The owning game object for a component, the object itself otherwise.
    pub fn game_object(&self) -> Option<Arc<GameObject>> {
        match self {
            Entity::Object(go) => Some(go.clone()),
            Entity::Component(cell) => cell.game_object(),
        }
    }

    /// Whether both values wrap the same allocation.
    pub(crate) fn same_as(&self, other: &Entity) -> bool {
        match (self, other) {
            (Entity::Object(a), Entity::Object(b)) => Arc::ptr_eq(a, b),
            (Entity::Component(a), Entity::Component(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    pub(crate) fn toggle(&self) -> &Mutex<ToggleFlag> {
        match self {
            Entity::Object(go) => go.active_flag(),
            Entity::Component(cell) => cell.enabled_flag(),
        }
    }
}

impl PartialEq for Entity {
    fn eq(&self, other: &Self) -> bool {
        self.id() == other.id()
    }
}

impl Eq for Entity {}

impl PartialOrd for Entity {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Entity {
    fn cmp(&self, other: &Self) -> Ordering {
        self.id().cmp(&other.id())
    }
}

impl fmt::Debug for Entity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Entity::Object(go) => fmt::Debug::fmt(go, f),
            Entity::Component(cell) => fmt::Debug::fmt(cell, f),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
