//! Per-object component storage.
//!
//! A [`CompositionContainer`] keeps the components attached to one game object
//! in identity order. Detaching is deferred: the component stays visible until
//! the container is refreshed (at the settle step of a tick, or right away
//! when no tick is running).

use std::cmp::Ordering;
use std::sync::Arc;

use tessera_core::identity::EntityId;
use tessera_core::registry::SortedRegistry;

use crate::behavior::Behavior;
use crate::entity::{ComponentCell, ComponentRef};
use crate::observer::ObserverList;
use crate::EngineError;

type CellOrd = fn(&Arc<ComponentCell>, &Arc<ComponentCell>) -> Ordering;

fn by_id(a: &Arc<ComponentCell>, b: &Arc<ComponentCell>) -> Ordering {
    a.id().cmp(&b.id())
}

/// A behavior copied out of a component, ready to be attached elsewhere.
pub struct ClonedBehavior {
    pub behavior: Box<dyn Behavior>,
    pub enabled: bool,
    pub listeners: ObserverList<bool>,
}

/// The components attached to one game object.
#[derive(Clone)]
pub struct CompositionContainer {
    owner: EntityId,
    live: SortedRegistry<Arc<ComponentCell>, CellOrd>,
    pending_remove: Vec<EntityId>,
}

impl CompositionContainer {
    pub fn new(owner: EntityId) -> Self {
        Self {
            owner,
            live: SortedRegistry::with_comparator(by_id as CellOrd),
            pending_remove: Vec::new(),
        }
    }

    /// Identity of the owning game object.
    pub fn owner(&self) -> EntityId {
        self.owner
    }

    pub fn len(&self) -> usize {
        self.live.len()
    }

    pub fn is_empty(&self) -> bool {
        self.live.is_empty()
    }

    pub fn contains(&self, id: EntityId) -> bool {
        self.live.index_of_key(&id, |k, c| k.cmp(&c.id())).is_some()
    }

    pub fn is_pending_removal(&self, id: EntityId) -> bool {
        self.pending_remove.contains(&id)
    }

    /// Add a component to the live list.
    pub fn attach(&mut self, cell: Arc<ComponentCell>) -> Result<(), EngineError> {
        let id = cell.id();
        self.live
            .insert(cell)
            .map(|_| ())
            .map_err(|_| EngineError::DuplicateKey(id))
    }

    /// Schedule a component for removal at the next [`refresh`](Self::refresh).
    ///
    /// Returns `false` if it is not attached or already scheduled.
    pub fn detach(&mut self, id: EntityId) -> bool {
        if !self.contains(id) || self.is_pending_removal(id) {
            return false;
        }
        self.pending_remove.push(id);
        true
    }

    /// Apply pending detaches; returns the removed components.
    pub fn refresh(&mut self) -> Vec<Arc<ComponentCell>> {
        if self.pending_remove.is_empty() {
            return Vec::new();
        }
        self.pending_remove.sort_unstable();
        let mut removed = Vec::with_capacity(self.pending_remove.len());
        for id in self.pending_remove.drain(..) {
            if let Some(cell) = self.live.remove_by_key(&id, |k, c| k.cmp(&c.id())) {
                removed.push(cell);
            }
        }
        removed
    }

    /// Remove every component immediately.
    pub fn clear(&mut self) -> Vec<Arc<ComponentCell>> {
        self.pending_remove.clear();
        std::mem::replace(
            &mut self.live,
            SortedRegistry::with_comparator(by_id as CellOrd),
        )
        .into_vec()
    }

    /// Every attached component, in identity order.
    pub fn cells(&self) -> Vec<Arc<ComponentCell>> {
        self.live.iter().cloned().collect()
    }

    /// First component of type `B` (lowest identity).
    pub fn find<B: Behavior>(&self) -> Option<ComponentRef<B>> {
        self.live
            .iter()
            .find(|c| c.is::<B>())
            .and_then(|c| ComponentRef::new(c.clone()))
    }

    /// Every component of type `B`, in identity order.
    pub fn find_all<B: Behavior>(&self) -> Vec<ComponentRef<B>> {
        self.live
            .iter()
            .filter_map(|c| ComponentRef::new(c.clone()))
            .collect()
    }

    /// Copy every attached behavior (not pending removal) into `target`.
    ///
    /// `spawn` turns each copy into a new component cell owned by the target.
    /// Behaviors are copied with [`Clone`]; enabled state and executing-change
    /// subscriptions travel with them. If any behavior is busy, nothing is
    /// spawned and [`EngineError::InvalidState`] is returned.
    pub fn clone_into(
        &self,
        target: &mut CompositionContainer,
        mut spawn: impl FnMut(ClonedBehavior) -> Result<Arc<ComponentCell>, EngineError>,
    ) -> Result<Vec<Arc<ComponentCell>>, EngineError> {
        if target.owner == self.owner {
            return Err(EngineError::InvalidState(format!(
                "cannot clone the components of {} into itself",
                self.owner
            )));
        }

        let mut copies = Vec::with_capacity(self.live.len());
        for cell in self.live.iter().filter(|c| !self.is_pending_removal(c.id())) {
            let behavior = cell.behavior.try_lock().ok_or_else(|| {
                EngineError::InvalidState(format!(
                    "component {} ({}) is busy and cannot be cloned",
                    cell.id(),
                    cell.type_name()
                ))
            })?;
            copies.push(ClonedBehavior {
                behavior: behavior.clone_box(),
                enabled: cell.is_enabled(),
                listeners: cell.listeners(),
            });
        }

        let mut spawned = Vec::with_capacity(copies.len());
        for copy in copies {
            let cell = spawn(copy)?;
            target.attach(cell.clone())?;
            spawned.push(cell);
        }
        Ok(spawned)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::behavior::DoNotClone;
    use crate::entity::{GameObject, ObjectInfo};
    use std::sync::atomic::{AtomicUsize, Ordering as AtomicOrdering};
    use std::sync::Weak;

    #[derive(Clone, Default)]
    struct Gun {
        ammo: u32,
        target: DoNotClone<Option<EntityId>>,
    }
    impl Behavior for Gun {}

    #[derive(Clone, Default)]
    struct Engine;
    impl Behavior for Engine {}

    fn detached_object(id: u64) -> Arc<GameObject> {
        Arc::new(GameObject::new(
            EntityId::from_raw(id),
            Weak::new(),
            ObjectInfo::default(),
            true,
        ))
    }

    fn cell(id: u64, owner: &Arc<GameObject>, behavior: impl Behavior) -> Arc<ComponentCell> {
        Arc::new(ComponentCell::new(
            EntityId::from_raw(id),
            owner,
            Box::new(behavior),
            true,
            ObserverList::new(),
        ))
    }

    #[test]
    fn attach_keeps_identity_order_and_rejects_duplicates() {
        let go = detached_object(0);
        let mut container = CompositionContainer::new(go.id());
        container.attach(cell(5, &go, Engine)).unwrap();
        container.attach(cell(2, &go, Gun::default())).unwrap();

        let ids: Vec<u64> = container.cells().iter().map(|c| c.id().to_raw()).collect();
        assert_eq!(ids, vec![2, 5]);
        assert!(matches!(
            container.attach(cell(5, &go, Engine)),
            Err(EngineError::DuplicateKey(id)) if id == EntityId::from_raw(5)
        ));
    }

    #[test]
    fn detach_is_deferred_until_refresh() {
        let go = detached_object(0);
        let mut container = CompositionContainer::new(go.id());
        container.attach(cell(1, &go, Gun::default())).unwrap();
        container.attach(cell(2, &go, Engine)).unwrap();

        assert!(container.detach(EntityId::from_raw(1)));
        assert!(!container.detach(EntityId::from_raw(1)));
        assert!(!container.detach(EntityId::from_raw(9)));
        assert!(container.find::<Gun>().is_some());

        let removed = container.refresh();
        assert_eq!(removed.len(), 1);
        assert!(container.find::<Gun>().is_none());
        assert_eq!(container.len(), 1);
        assert!(container.refresh().is_empty());
    }

    #[test]
    fn find_and_find_all_match_exact_type() {
        let go = detached_object(0);
        let mut container = CompositionContainer::new(go.id());
        container.attach(cell(3, &go, Gun { ammo: 3, ..Gun::default() })).unwrap();
        container.attach(cell(1, &go, Gun { ammo: 1, ..Gun::default() })).unwrap();
        container.attach(cell(2, &go, Engine)).unwrap();

        let first = container.find::<Gun>().unwrap();
        assert_eq!(first.with(|g| g.ammo), Some(1));
        assert_eq!(container.find_all::<Gun>().len(), 2);
        assert_eq!(container.find_all::<Engine>().len(), 1);
    }

    #[test]
    fn clone_into_copies_fields_state_and_subscriptions() {
        let prefab = detached_object(0);
        let target = detached_object(10);
        let mut source = CompositionContainer::new(prefab.id());
        let gun = cell(1, &prefab, Gun { ammo: 30, target: DoNotClone(Some(EntityId::from_raw(99))) });
        let hits = Arc::new(AtomicUsize::new(0));
        let h = hits.clone();
        gun.on_executing_changed(move |_| {
            h.fetch_add(1, AtomicOrdering::SeqCst);
        });
        source.attach(gun).unwrap();
        let engine = cell(2, &prefab, Engine);
        source.attach(engine.clone()).unwrap();
        source.detach(engine.id());

        let mut dest = CompositionContainer::new(target.id());
        let mut next = 11;
        let spawned = source
            .clone_into(&mut dest, |copy| {
                let c = Arc::new(ComponentCell::new(
                    EntityId::from_raw(next),
                    &target,
                    copy.behavior,
                    copy.enabled,
                    copy.listeners,
                ));
                next += 1;
                Ok(c)
            })
            .unwrap();

        assert_eq!(spawned.len(), 1);
        let copy = dest.find::<Gun>().unwrap();
        assert_eq!(copy.id(), EntityId::from_raw(11));
        assert_eq!(copy.with(|g| (g.ammo, *g.target)), Some((30, None)));
        assert!(dest.find::<Engine>().is_none());
        assert_eq!(copy.cell().listeners().notify(&false), 1);
        assert_eq!(hits.load(AtomicOrdering::SeqCst), 1);
        assert_eq!(copy.game_object().unwrap().id(), target.id());
    }

    #[test]
    fn clone_into_fails_when_a_behavior_is_busy() {
        let prefab = detached_object(0);
        let target = detached_object(1);
        let mut source = CompositionContainer::new(prefab.id());
        let gun = cell(2, &prefab, Gun::default());
        source.attach(gun.clone()).unwrap();

        let _busy = gun.behavior.lock();
        let mut dest = CompositionContainer::new(target.id());
        let result = source.clone_into(&mut dest, |_| unreachable!());
        assert!(matches!(result, Err(EngineError::InvalidState(_))));
        assert!(dest.is_empty());
    }

    #[test]
    fn clone_into_self_is_rejected() {
        let go = detached_object(0);
        let source = CompositionContainer::new(go.id());
        let mut same = CompositionContainer::new(go.id());
        assert!(source.clone_into(&mut same, |_| unreachable!()).is_err());
    }

    #[test]
    fn clear_drops_everything() {
        let go = detached_object(0);
        let mut container = CompositionContainer::new(go.id());
        container.attach(cell(1, &go, Engine)).unwrap();
        container.detach(EntityId::from_raw(1));
        assert_eq!(container.clear().len(), 1);
        assert!(container.is_empty());
        assert!(!container.is_pending_removal(EntityId::from_raw(1)));
    }
}
