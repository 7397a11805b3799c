//! Behavior trait, callback context and clone support.
//!
//! A [`Behavior`] is the per-tick logic of a component. The scheduler calls
//! its lifecycle methods with a [`Context`] giving access to the owning game
//! object, sibling components and the scheduler's request entry points.
//!
//! Behaviors are cloned when a game object is instantiated from a prefab.
//! Every behavior is `Clone`; fields that must start fresh on the copy are
//! wrapped in [`DoNotClone`].

use std::any::Any;
use std::fmt;
use std::ops::{Deref, DerefMut};
use std::sync::Arc;

use tessera_core::identity::EntityId;

use crate::entity::{ComponentCell, ComponentRef, Entity, GameObject};
use crate::network::{PeerId, Reliability};
use crate::physics::SharedPhysics;
use crate::scheduler::{Phase, SchedulerHandle};
use crate::transform::Transform;
use crate::EngineError;

// ---------------------------------------------------------------------------
// Callback
// ---------------------------------------------------------------------------

/// Which lifecycle callback is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum Callback {
    Start,
    Update,
    LateUpdate,
    ExecutingChanged,
    Destroy,
}

impl fmt::Display for Callback {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Callback::Start => "start",
            Callback::Update => "update",
            Callback::LateUpdate => "late_update",
            Callback::ExecutingChanged => "on_executing_changed",
            Callback::Destroy => "on_destroy",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Behavior
// ---------------------------------------------------------------------------

/// Per-tick logic attached to a game object.
///
/// All methods default to doing nothing. Returning an error (or panicking,
/// when panics are caught) is logged by the scheduler; the component is
/// skipped for the rest of that phase and visited again next tick.
pub trait Behavior: BehaviorClone + Send + 'static {
    /// Called once, in the first tick after the component is registered.
    fn start(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called every tick while the component is executing.
    fn update(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called every tick while executing, after every `update` of the tick.
    fn late_update(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called once, after the component has been removed from the registry.
    fn on_destroy(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
        Ok(())
    }

    /// Called when the component's derived `executing` state flips.
    fn on_executing_changed(
        &mut self,
        _ctx: &mut Context<'_>,
        _executing: bool,
    ) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Object-safe clone and downcast support, implemented for every
/// `Behavior + Clone`.
pub trait BehaviorClone {
    fn clone_box(&self) -> Box<dyn Behavior>;
    fn as_any(&self) -> &dyn Any;
    fn as_any_mut(&mut self) -> &mut dyn Any;
    fn behavior_name(&self) -> &'static str;
}

impl<T: Behavior + Clone> BehaviorClone for T {
    fn clone_box(&self) -> Box<dyn Behavior> {
        Box::new(self.clone())
    }

    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn behavior_name(&self) -> &'static str {
        std::any::type_name::<T>()
    }
}

pub(crate) fn dispatch(
    behavior: &mut dyn Behavior,
    ctx: &mut Context<'_>,
    callback: Callback,
    executing: bool,
) -> anyhow::Result<()> {
    match callback {
        Callback::Start => behavior.start(ctx),
        Callback::Update => behavior.update(ctx),
        Callback::LateUpdate => behavior.late_update(ctx),
        Callback::ExecutingChanged => behavior.on_executing_changed(ctx, executing),
        Callback::Destroy => behavior.on_destroy(ctx),
    }
}

// ---------------------------------------------------------------------------
// DoNotClone
// ---------------------------------------------------------------------------

/// A field that is reset to `T::default()` when its behavior is cloned.
#[derive(Debug, Default, PartialEq)]
pub struct DoNotClone<T>(pub T);

impl<T: Default> Clone for DoNotClone<T> {
    fn clone(&self) -> Self {
        Self(T::default())
    }
}

impl<T> Deref for DoNotClone<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.0
    }
}

impl<T> DerefMut for DoNotClone<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.0
    }
}

// ---------------------------------------------------------------------------
// Context
// ---------------------------------------------------------------------------

/// What a behavior can see and do from inside a callback.
///
/// Every request made through the context (create, destroy, toggle) follows
/// the scheduler's buffering rules: during a tick it is applied at the next
/// settle step.
pub struct Context<'a> {
    handle: &'a SchedulerHandle,
    cell: &'a Arc<ComponentCell>,
    callback: Callback,
    delta_time: f64,
}

impl<'a> Context<'a> {
    pub(crate) fn new(
        handle: &'a SchedulerHandle,
        cell: &'a Arc<ComponentCell>,
        callback: Callback,
    ) -> Self {
        Self {
            handle,
            cell,
            callback,
            delta_time: handle.delta_time(),
        }
    }

    /// Identity of the component being called.
    pub fn id(&self) -> EntityId {
        self.cell.id()
    }

    pub fn callback(&self) -> Callback {
        self.callback
    }

    pub fn phase(&self) -> Phase {
        self.handle.phase()
    }

    /// Elapsed time passed to the current tick, in seconds.
    pub fn delta_time(&self) -> f64 {
        self.delta_time
    }

    pub fn scheduler(&self) -> &SchedulerHandle {
        self.handle
    }

    /// The component cell being called.
    pub fn cell(&self) -> &Arc<ComponentCell> {
        self.cell
    }

    /// The game object this component is attached to.
    pub fn game_object(&self) -> Option<Arc<GameObject>> {
        self.cell.game_object()
    }

    /// First sibling component of type `T` (lowest identity).
    pub fn component<T: Behavior>(&self) -> Option<ComponentRef<T>> {
        self.game_object().and_then(|go| go.component::<T>())
    }

    /// The owner's transform.
    pub fn transform(&self) -> Option<Transform> {
        self.game_object().map(|go| go.transform())
    }

    pub fn set_transform(&self, transform: Transform) {
        if let Some(go) = self.game_object() {
            go.set_transform(transform);
        }
    }

    pub fn is_executing(&self) -> bool {
        self.cell.is_executing()
    }

    /// Request a new enabled state for this component.
    pub fn set_enabled(&self, enabled: bool) {
        self.cell.set_enabled(enabled);
    }

    pub fn create_object(&self, name: &str) -> Result<Arc<GameObject>, EngineError> {
        self.handle.create_object(name)
    }

    pub fn instantiate(&self, prefab: &Arc<GameObject>) -> Result<Arc<GameObject>, EngineError> {
        self.handle.instantiate(prefab)
    }

    pub fn instantiate_at(
        &self,
        prefab: &Arc<GameObject>,
        transform: Transform,
    ) -> Result<Arc<GameObject>, EngineError> {
        self.handle.instantiate_at(prefab, transform)
    }

    pub fn destroy(&self, entity: &Entity) -> Result<(), EngineError> {
        self.handle.destroy(entity)
    }

    /// Request removal of this component.
    pub fn destroy_self(&self) -> Result<(), EngineError> {
        self.handle.destroy_component(self.cell)
    }

    /// The physics collaborator, if one is attached.
    pub fn physics(&self) -> Option<SharedPhysics> {
        self.handle.physics()
    }

    pub fn send(
        &self,
        peer: PeerId,
        packet: &serde_json::Value,
        reliability: Reliability,
    ) -> anyhow::Result<()> {
        self.handle.send(peer, packet, reliability)
    }

    pub fn broadcast(
        &self,
        packet: &serde_json::Value,
        reliability: Reliability,
    ) -> anyhow::Result<()> {
        self.handle.broadcast(packet, reliability)
    }

    pub fn log(&self, message: &str) {
        self.handle.sink().log(message);
    }

    pub fn log_warning(&self, message: &str) {
        self.handle.sink().log_warning(message);
    }

    pub fn log_error(&self, message: &str) {
        self.handle.sink().log_error(message);
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Clone, Default)]
    struct Spawner {
        spawned: u32,
        cache: DoNotClone<Vec<u32>>,
    }

    impl Behavior for Spawner {}

    #[test]
    fn clone_box_resets_do_not_clone_fields() {
        let mut original = Spawner {
            spawned: 3,
            cache: DoNotClone(vec![1, 2]),
        };
        original.cache.push(3);

        let boxed = original.clone_box();
        let copy = boxed.as_any().downcast_ref::<Spawner>().unwrap();
        assert_eq!(copy.spawned, 3);
        assert!(copy.cache.is_empty());
        assert_eq!(original.cache.len(), 3);
    }

    #[test]
    fn behavior_name_is_the_concrete_type() {
        let boxed: Box<dyn Behavior> = Box::new(Spawner::default());
        assert!(boxed.behavior_name().ends_with("Spawner"));
    }

    #[test]
    fn callback_display_matches_method_names() {
        assert_eq!(Callback::LateUpdate.to_string(), "late_update");
        assert_eq!(Callback::Destroy.to_string(), "on_destroy");
    }
}
