//! Composition and prefab instantiation tests.
//!
//! Covers component lookup on game objects, prefab-style cloning (field
//! copies, `DoNotClone` resets, re-registered subscriptions), placement of
//! clones, and whole-object destruction.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tessera_engine::prelude::*;

// ---------------------------------------------------------------------------
// Test behaviors
// ---------------------------------------------------------------------------

#[derive(Clone, Default)]
struct Gun {
    ammo: u32,
    /// Runtime target, never copied to clones.
    target: DoNotClone<Option<EntityId>>,
    destroyed: Arc<AtomicUsize>,
}

impl Behavior for Gun {
    fn on_destroy(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
        self.destroyed.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

#[derive(Clone, Default)]
struct Engine {
    thrust: f32,
    started: bool,
    start_calls: DoNotClone<u32>,
}

impl Behavior for Engine {
    fn start(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
        self.started = true;
        *self.start_calls += 1;
        Ok(())
    }
}

/// Instantiates `prefab` once from inside a callback.
#[derive(Clone)]
struct Factory {
    prefab: Arc<GameObject>,
    made: Arc<Mutex<Vec<Arc<GameObject>>>>,
}

impl Behavior for Factory {
    fn update(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        if self.made.lock().is_empty() {
            let copy = ctx.instantiate_at(&self.prefab, Transform::from_position(Vec3::new(0.0, 5.0, 0.0)))?;
            self.made.lock().push(copy);
        }
        Ok(())
    }
}

/// Tries to clone its own object while its own callback is running.
#[derive(Clone, Default)]
struct SelfCloner {
    refused: Option<bool>,
}

impl Behavior for SelfCloner {
    fn update(&mut self, ctx: &mut Context<'_>) -> anyhow::Result<()> {
        if self.refused.is_none() {
            let own = ctx
                .game_object()
                .ok_or_else(|| anyhow::anyhow!("owner dropped"))?;
            self.refused = Some(matches!(ctx.instantiate(&own), Err(EngineError::InvalidState(_))));
        }
        Ok(())
    }
}

fn turret(scheduler: &Scheduler) -> Arc<GameObject> {
    let prefab = scheduler
        .create_object_with(ObjectInfo {
            name: "turret".to_owned(),
            tag: "Enemy".to_owned(),
            layer: 3,
            transform: Transform::from_position(Vec3::new(1.0, 2.0, 3.0)),
        })
        .unwrap();
    prefab
        .add_component(Gun {
            ammo: 30,
            target: DoNotClone(Some(EntityId::from_raw(999))),
            ..Gun::default()
        })
        .unwrap();
    prefab
        .add_component(Engine {
            thrust: 2.5,
            ..Engine::default()
        })
        .unwrap();
    prefab
}

// ---------------------------------------------------------------------------
// 1. Lookup
// ---------------------------------------------------------------------------

#[test]
fn component_lookup_by_type() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let go = scheduler.create_object("ship").unwrap();
    let first = go.add_component(Engine::default()).unwrap();
    go.add_component(Gun::default()).unwrap();
    let second = go.add_component(Engine::default()).unwrap();

    assert_eq!(go.component::<Engine>().unwrap().id(), first.id());
    let engines: Vec<EntityId> = go.components_of::<Engine>().iter().map(|c| c.id()).collect();
    assert_eq!(engines, vec![first.id(), second.id()]);
    assert_eq!(go.component_count(), 3);
    assert!(go.component::<SelfCloner>().is_none());

    assert_eq!(second.game_object().unwrap().id(), go.id());
}

// ---------------------------------------------------------------------------
// 2. Instantiate
// ---------------------------------------------------------------------------

#[test]
fn instantiate_copies_fields_and_object_info() {
    let mut scheduler = Scheduler::new(SchedulerConfig::default());
    let prefab = turret(&scheduler);
    scheduler.tick(0.1);

    let copy = scheduler.instantiate(&prefab).unwrap();
    assert_ne!(copy.id(), prefab.id());
    assert_eq!(copy.name(), "turret (Clone)");
    assert_eq!(copy.tag(), "Enemy");
    assert_eq!(copy.layer(), 3);
    assert_eq!(copy.transform(), prefab.transform());
    assert_eq!(copy.component_count(), 2);

    let gun = copy.component::<Gun>().unwrap();
    assert_eq!(gun.with(|g| (g.ammo, *g.target)), Some((30, None)));
    assert_ne!(gun.id(), prefab.component::<Gun>().unwrap().id());

    // Fields are copied as they are now, including ones set by `start`.
    let engine = copy.component::<Engine>().unwrap();
    assert_eq!(engine.with(|e| (e.thrust, e.started)), Some((2.5, true)));

    assert!(scheduler.contains(copy.id()));
    assert!(scheduler.contains(gun.id()));
    assert_eq!(scheduler.find_objects_of_type::<Gun>().len(), 2);
}

#[test]
fn instantiate_at_overrides_transform() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let prefab = turret(&scheduler);
    let at = Transform::from_position(Vec3::new(-4.0, 0.0, 9.0));
    let copy = scheduler.instantiate_at(&prefab, at).unwrap();
    assert_eq!(copy.transform(), at);
    assert_eq!(prefab.transform().position, Vec3::new(1.0, 2.0, 3.0));
}

#[test]
fn inactive_prefab_gives_inactive_clone() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let prefab = turret(&scheduler);
    let disabled = prefab.component::<Engine>().unwrap();
    disabled.set_enabled(false);
    prefab.set_active(false);

    let copy = scheduler.instantiate(&prefab).unwrap();
    assert!(!copy.is_active());
    let engine = copy.component::<Engine>().unwrap();
    assert!(!engine.is_enabled());
    assert!(copy.component::<Gun>().unwrap().is_enabled());

    copy.set_active(true);
    assert!(!engine.is_executing());
    assert!(copy.component::<Gun>().unwrap().is_executing());
}

#[test]
fn subscriptions_are_reregistered_on_clones() {
    let scheduler = Scheduler::new(SchedulerConfig::default());
    let prefab = turret(&scheduler);
    let hits = Arc::new(AtomicUsize::new(0));
    let h = hits.clone();
    prefab
        .component::<Gun>()
        .unwrap()
        .cell()
        .on_executing_changed(move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

    let copy = scheduler.instantiate(&prefab).unwrap();
    copy.component::<Gun>().unwrap().set_enabled(false);
    prefab.component::<Gun>().unwrap().set_enabled(false);
    assert_eq!(hits.load(Ordering::SeqCst), 2);
}

#[test]
fn instantiate_from_a_callback_is_started_next_tick() {
    let mut scheduler = Scheduler::new(SchedulerConfig::default());
    let prefab = turret(&scheduler);
    let made = Arc::new(Mutex::new(Vec::new()));
    let factory = scheduler.create_object("factory").unwrap();
    factory
        .add_component(Factory {
            prefab: prefab.clone(),
            made: made.clone(),
        })
        .unwrap();

    scheduler.tick(0.1);
    let copy = made.lock()[0].clone();
    assert_eq!(copy.transform().position, Vec3::new(0.0, 5.0, 0.0));
    let engine = copy.component::<Engine>().unwrap();
    assert_eq!(engine.with(|e| *e.start_calls), Some(0));
    assert!(scheduler.contains(copy.id()));

    scheduler.tick(0.1);
    scheduler.tick(0.1);
    assert_eq!(engine.with(|e| *e.start_calls), Some(1));
    assert_eq!(made.lock().len(), 1);
}

#[test]
fn cloning_a_running_behavior_is_refused() {
    let mut scheduler = Scheduler::new(SchedulerConfig::default());
    let go = scheduler.create_object("narcissus").unwrap();
    let cloner = go.add_component(SelfCloner::default()).unwrap();
    let before = scheduler.entity_count();

    scheduler.tick(0.1);
    assert_eq!(cloner.with(|c| c.refused), Some(Some(true)));
    assert_eq!(scheduler.entity_count(), before);

    // Outside a tick the same object clones fine.
    let copy = scheduler.instantiate(&go).unwrap();
    assert_eq!(copy.component_count(), 1);
}

// ---------------------------------------------------------------------------
// 3. Destroy
// ---------------------------------------------------------------------------

#[test]
fn destroying_an_object_destroys_its_components() {
    let mut scheduler = Scheduler::new(SchedulerConfig::default());
    let prefab = turret(&scheduler);
    let gun = prefab.component::<Gun>().unwrap();
    let counter = gun.with(|g| g.destroyed.clone()).unwrap();
    let engine_id = prefab.component::<Engine>().unwrap().id();

    prefab.destroy().unwrap();
    assert_eq!(scheduler.entity_count(), 0);
    assert_eq!(prefab.component_count(), 0);
    assert!(scheduler.find(engine_id).is_none());

    let report = scheduler.tick(0.1);
    assert_eq!(report.destroyed, 3);
    assert_eq!(counter.load(Ordering::SeqCst), 1);
    assert!(matches!(gun.destroy(), Err(EngineError::NotFound(_))));
}

#[test]
fn clones_share_nothing_with_the_prefab_after_destroy() {
    let mut scheduler = Scheduler::new(SchedulerConfig::default());
    let prefab = turret(&scheduler);
    let copy = scheduler.instantiate(&prefab).unwrap();
    prefab.destroy().unwrap();
    scheduler.tick(0.1);

    assert_eq!(scheduler.entity_count(), 3);
    assert_eq!(copy.component_count(), 2);
    assert!(copy.component::<Gun>().unwrap().is_executing());
}
