//! Physics collaborator interface and the [`Collider`] behavior.
//!
//! The engine does not simulate physics itself. A host plugs in any
//! [`PhysicsEngine`] implementation; the [`GameLoop`](crate::tick::GameLoop)
//! steps it once per tick *before* the scheduler tick and hands the reported
//! [`CollisionPair`]s to [`SchedulerHandle::route_collisions`], which turns
//! them into entity-level [`Collision`] events on each side's collider.
//!
//! A pair is only delivered if both colliders are executing at delivery time.

use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessera_core::identity::EntityId;

use crate::behavior::{Behavior, Context, DoNotClone};
use crate::entity::{ComponentCell, ComponentRef, GameObject};
use crate::observer::ObserverList;
use crate::scheduler::SchedulerHandle;
use crate::transform::{Transform, Vec3};
use crate::EngineError;

// ---------------------------------------------------------------------------
// Collaborator types
// ---------------------------------------------------------------------------

/// Opaque proxy handle issued by a [`PhysicsEngine`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct CollisionHandle(pub u64);

/// Collision volume of a proxy.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum CollisionShape {
    /// Oriented box.
    Box {
        /// Half size along each local axis.
        half_extents: Vec3,
    },
    /// Sphere around the origin.
    Sphere {
        /// Sphere radius.
        radius: f32,
    },
    /// Capsule along the local y-axis.
    Capsule {
        /// Radius of the hemispherical caps.
        radius: f32,
        /// Length of the cylindrical section.
        height: f32,
    },
    /// Cone along the local y-axis.
    Cone {
        /// Base radius.
        radius: f32,
        /// Apex height.
        height: f32,
    },
}

/// Two proxies reported as touching by [`PhysicsEngine::update`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CollisionPair {
    /// First proxy in the collision.
    pub a: CollisionHandle,
    /// Second proxy in the collision.
    pub b: CollisionHandle,
}

/// Result of a ray query.
#[derive(Debug, Clone, PartialEq)]
pub struct RaycastHit {
    /// Proxy that was hit.
    pub handle: CollisionHandle,
    /// World-space hit point.
    pub point: Vec3,
    /// Distance from the ray origin.
    pub distance: f32,
}

/// A physics world the host plugs into the engine.
///
/// Proxies returned by [`create_collision`](Self::create_collision) are part
/// of the world until removed.
pub trait PhysicsEngine: Send {
    /// Create a proxy on `layer`, colliding with the layers in `mask`.
    fn create_collision(&mut self, shape: CollisionShape, layer: u32, mask: u32) -> CollisionHandle;

    /// Put a removed proxy back into the world. Returns `false` if unknown or
    /// already present.
    fn add_collision(&mut self, handle: CollisionHandle) -> bool;

    /// Take a proxy out of the world. Returns `false` if unknown or already
    /// removed.
    fn remove_collision(&mut self, handle: CollisionHandle) -> bool;

    /// Move a proxy.
    fn set_transform(&mut self, handle: CollisionHandle, transform: &Transform);

    /// Closest hit along a ray against proxies on the layers in `mask`.
    fn raycast(&self, origin: Vec3, direction: Vec3, max_distance: f32, mask: u32)
        -> Option<RaycastHit>;

    /// Every hit along a ray, nearest first.
    fn raycast_all(&self, origin: Vec3, direction: Vec3, max_distance: f32, mask: u32)
        -> Vec<RaycastHit>;

    /// Advance the simulation and report the touching pairs.
    fn update(&mut self, dt: f64) -> Vec<CollisionPair>;
}

/// A physics engine shared between the host and collider behaviors.
pub type SharedPhysics = Arc<Mutex<Box<dyn PhysicsEngine>>>;

// ---------------------------------------------------------------------------
// Collision events
// ---------------------------------------------------------------------------

/// Delivered to a collider's [`Collider::on_collision`] list.
#[derive(Debug, Clone)]
pub struct Collision {
    /// The collider receiving the event.
    pub collider: EntityId,
    /// The collider it touched.
    pub other: EntityId,
    /// The game object owning `other`.
    pub other_object: Option<Arc<GameObject>>,
}

impl SchedulerHandle {
    /// Attach (or detach with `None`) the physics collaborator.
    pub fn set_physics(&self, physics: Option<SharedPhysics>) {
        *self.shared.physics.write() = physics;
    }

    pub fn physics(&self) -> Option<SharedPhysics> {
        self.shared.physics.read().clone()
    }

    /// Map a proxy to the collider component that owns it.
    pub fn register_collider(&self, handle: CollisionHandle, cell: Arc<ComponentCell>) {
        let mut colliders = self.shared.colliders.lock();
        colliders.retain(|(h, _)| *h != handle);
        colliders.push((handle, cell));
    }

    pub fn unregister_collider(&self, handle: CollisionHandle) -> bool {
        let mut colliders = self.shared.colliders.lock();
        let before = colliders.len();
        colliders.retain(|(h, _)| *h != handle);
        colliders.len() != before
    }

    pub(crate) fn forget_collider(&self, id: EntityId) {
        self.shared.colliders.lock().retain(|(_, cell)| cell.id() != id);
    }

    /// The collider component owning `handle`, e.g. for a [`RaycastHit`].
    pub fn collider(&self, handle: CollisionHandle) -> Option<Arc<ComponentCell>> {
        self.shared
            .colliders
            .lock()
            .iter()
            .find(|(h, _)| *h == handle)
            .map(|(_, cell)| cell.clone())
    }

    /// Deliver collision pairs to both colliders' observer lists.
    ///
    /// Pairs involving an unknown proxy or a non-executing collider are
    /// dropped. Returns how many pairs were delivered.
    pub fn route_collisions(&self, pairs: &[CollisionPair]) -> usize {
        let mut routed = 0;
        for pair in pairs {
            let (Some(a), Some(b)) = (self.collider(pair.a), self.collider(pair.b)) else {
                tracing::warn!(?pair, "collision for an unregistered proxy dropped");
                continue;
            };
            if !a.is_executing() || !b.is_executing() {
                continue;
            }
            deliver(&a, &b);
            deliver(&b, &a);
            routed += 1;
        }
        routed
    }
}

fn deliver(to: &Arc<ComponentCell>, other: &Arc<ComponentCell>) {
    let Some(listeners) = ComponentRef::<Collider>::new(to.clone())
        .and_then(|collider| collider.with(|c| c.on_collision.clone()))
    else {
        return;
    };
    listeners.notify(&Collision {
        collider: to.id(),
        other: other.id(),
        other_object: other.game_object(),
    });
}

// ---------------------------------------------------------------------------
// Collider
// ---------------------------------------------------------------------------

/// A behavior giving its game object a physics proxy.
///
/// The proxy is created on `start`, follows the owner's transform every
/// `late_update`, leaves the world while the component is not executing and
/// is removed on `on_destroy`. Layer and mask are fixed once started.
#[derive(Clone)]
pub struct Collider {
    shape: CollisionShape,
    layer: u32,
    mask: u32,
    handle: DoNotClone<Option<CollisionHandle>>,
    /// Handlers run for every delivered [`Collision`].
    pub on_collision: ObserverList<Collision>,
}

impl Collider {
    /// A collider on layer 1 colliding with every layer.
    pub fn new(shape: CollisionShape) -> Self {
        Self {
            shape,
            layer: 1,
            mask: u32::MAX,
            handle: DoNotClone(None),
            on_collision: ObserverList::new(),
        }
    }

    pub fn shape(&self) -> &CollisionShape {
        &self.shape
    }

    pub fn layer(&self) -> u32 {
        self.layer
    }

    pub fn mask(&self) -> u32 {
        self.mask
    }

    /// The proxy handle, once started.
    pub fn handle(&self) -> Option<CollisionHandle> {
        *self.handle
    }

    pub fn set_layer(&mut self, layer: u32) -> Result<(), EngineError> {
        self.ensure_not_started("layer")?;
        self.layer = layer;
        Ok(())
    }

    pub fn set_mask(&mut self, mask: u32) -> Result<(), EngineError> {
        self.ensure_not_started("mask")?;
        self.mask = mask;
        Ok(())
    }

    fn ensure_not_started(&self, what: &str) -> Result<(), EngineError> {
        match *self.handle {
            Some(handle) => Err(EngineError::InvalidState(format!(
                "collision {what} cannot change after start (proxy {})",
                handle.0
            ))),
            None => Ok(()),
        }
    }
}

impl Behavior for Collider {
    fn start(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        let physics = ctx
            .physics()
            .ok_or_else(|| anyhow::anyhow!("no physics engine attached"))?;
        let transform = ctx.transform().unwrap_or_default();
        let handle = {
            let mut engine = physics.lock();
            let handle = engine.create_collision(self.shape.clone(), self.layer, self.mask);
            engine.set_transform(handle, &transform);
            if !ctx.is_executing() {
                engine.remove_collision(handle);
            }
            handle
        };
        *self.handle = Some(handle);
        ctx.scheduler().register_collider(handle, ctx.cell().clone());
        Ok(())
    }

    fn late_update(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        if let (Some(handle), Some(physics), Some(transform)) =
            (*self.handle, ctx.physics(), ctx.transform())
        {
            physics.lock().set_transform(handle, &transform);
        }
        Ok(())
    }

    fn on_executing_changed(&mut self, ctx: &mut Context<'_>, executing: bool) -> anyhow::Result<()> {
        if let (Some(handle), Some(physics)) = (*self.handle, ctx.physics()) {
            let mut engine = physics.lock();
            if executing {
                engine.add_collision(handle);
            } else {
                engine.remove_collision(handle);
            }
        }
        Ok(())
    }

    fn on_destroy(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        if let Some(handle) = self.handle.take() {
            if let Some(physics) = ctx.physics() {
                physics.lock().remove_collision(handle);
            }
            ctx.scheduler().unregister_collider(handle);
        }
        self.on_collision.clear();
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::{Scheduler, SchedulerConfig};
    use std::collections::BTreeSet;

    #[derive(Default)]
    struct Recorded {
        next: u64,
        in_world: BTreeSet<u64>,
        moves: usize,
        pending: Vec<CollisionPair>,
    }

    #[derive(Clone, Default)]
    struct MockPhysics(Arc<Mutex<Recorded>>);

    impl PhysicsEngine for MockPhysics {
        fn create_collision(&mut self, _: CollisionShape, _: u32, _: u32) -> CollisionHandle {
            let mut r = self.0.lock();
            let handle = r.next;
            r.next += 1;
            r.in_world.insert(handle);
            CollisionHandle(handle)
        }

        fn add_collision(&mut self, handle: CollisionHandle) -> bool {
            self.0.lock().in_world.insert(handle.0)
        }

        fn remove_collision(&mut self, handle: CollisionHandle) -> bool {
            self.0.lock().in_world.remove(&handle.0)
        }

        fn set_transform(&mut self, _: CollisionHandle, _: &Transform) {
            self.0.lock().moves += 1;
        }

        fn raycast(&self, _: Vec3, _: Vec3, _: f32, _: u32) -> Option<RaycastHit> {
            None
        }

        fn raycast_all(&self, _: Vec3, _: Vec3, _: f32, _: u32) -> Vec<RaycastHit> {
            Vec::new()
        }

        fn update(&mut self, _: f64) -> Vec<CollisionPair> {
            std::mem::take(&mut self.0.lock().pending)
        }
    }

    fn setup() -> (Scheduler, MockPhysics) {
        let scheduler = Scheduler::new(SchedulerConfig::default());
        let mock = MockPhysics::default();
        let engine: Box<dyn PhysicsEngine> = Box::new(mock.clone());
        scheduler.set_physics(Some(Arc::new(Mutex::new(engine))));
        (scheduler, mock)
    }

    fn sphere() -> Collider {
        Collider::new(CollisionShape::Sphere { radius: 0.5 })
    }

    #[test]
    fn proxy_lifecycle_follows_executing_state() {
        let (mut scheduler, mock) = setup();
        let go = scheduler.create_object("ball").unwrap();
        let collider = go.add_component(sphere()).unwrap();

        scheduler.tick(0.1);
        let handle = collider.with(|c| c.handle()).flatten().unwrap();
        assert!(mock.0.lock().in_world.contains(&handle.0));
        assert!(mock.0.lock().moves >= 2);

        go.set_active(false);
        assert!(!mock.0.lock().in_world.contains(&handle.0));
        go.set_active(true);
        assert!(mock.0.lock().in_world.contains(&handle.0));

        collider.destroy().unwrap();
        scheduler.tick(0.1);
        assert!(mock.0.lock().in_world.is_empty());
        assert!(scheduler.collider(handle).is_none());
    }

    #[test]
    fn layer_and_mask_lock_after_start() {
        let (mut scheduler, _mock) = setup();
        let go = scheduler.create_object("wall").unwrap();
        let collider = go.add_component(sphere()).unwrap();
        assert_eq!(collider.with_mut(|c| c.set_layer(4).is_ok()), Some(true));

        scheduler.tick(0.1);
        assert_eq!(collider.with_mut(|c| c.set_mask(2).is_err()), Some(true));
        assert_eq!(collider.with(|c| (c.layer(), c.mask())), Some((4, u32::MAX)));
    }

    #[test]
    fn collisions_reach_both_sides_only_when_executing() {
        let (mut scheduler, mock) = setup();
        let hits = Arc::new(Mutex::new(Vec::new()));
        let mut colliders = Vec::new();
        for name in ["a", "b"] {
            let go = scheduler.create_object(name).unwrap();
            let c = go.add_component(sphere()).unwrap();
            let log = hits.clone();
            c.with_mut(|c| {
                c.on_collision
                    .subscribe(move |hit: &Collision| log.lock().push((hit.collider, hit.other)));
            });
            colliders.push(c);
        }
        scheduler.tick(0.1);

        let pair = CollisionPair {
            a: colliders[0].with(|c| c.handle()).flatten().unwrap(),
            b: colliders[1].with(|c| c.handle()).flatten().unwrap(),
        };
        mock.0.lock().pending.push(pair);
        let pairs = scheduler.physics().unwrap().lock().update(0.1);
        assert_eq!(scheduler.route_collisions(&pairs), 1);
        assert_eq!(
            *hits.lock(),
            vec![
                (colliders[0].id(), colliders[1].id()),
                (colliders[1].id(), colliders[0].id())
            ]
        );

        colliders[1].set_enabled(false);
        assert_eq!(scheduler.route_collisions(&[pair]), 0);
        assert_eq!(hits.lock().len(), 2);
    }

    #[test]
    fn start_without_physics_is_a_lifecycle_failure() {
        let mut scheduler = Scheduler::new(SchedulerConfig::default());
        let go = scheduler.create_object("lost").unwrap();
        go.add_component(sphere()).unwrap();
        let report = scheduler.tick(0.1);
        assert_eq!(report.failures.len(), 1);
        assert!(report.failures[0].message.contains("no physics"));
    }
}
