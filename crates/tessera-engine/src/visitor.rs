//! Registry visitors and change tracking.
//!
//! After every settle step the scheduler builds one [`EntitySummary`] per
//! registered entity (ascending identity) and hands the slice to each
//! installed [`RegistryVisitor`]. [`ChangeTracker`] diffs consecutive
//! snapshots, which is what a replication layer needs to send deltas.

use std::mem;
use std::sync::Arc;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tessera_core::identity::EntityId;
use tessera_core::registry::SortedRegistry;

use crate::entity::{Entity, EntityKind, ObjectInfo};
use crate::scheduler::SchedulerHandle;
use crate::transform::Transform;

/// Serializable view of one registered entity.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySummary {
    pub id: EntityId,
    pub kind: EntityKind,
    /// Name of the game object (the owner's, for a component).
    pub name: String,
    pub tag: String,
    pub layer: i32,
    pub executing: bool,
    pub transform: Transform,
    /// Behavior type name, for components.
    pub behavior: Option<String>,
}

impl EntitySummary {
    pub fn of(entity: &Entity) -> Self {
        let info = entity
            .game_object()
            .map(|go| go.info())
            .unwrap_or_default();
        let ObjectInfo {
            name,
            tag,
            layer,
            transform,
        } = info;
        Self {
            id: entity.id(),
            kind: entity.kind(),
            name,
            tag,
            layer,
            executing: entity.is_executing(),
            transform,
            behavior: entity.as_component().map(|c| c.type_name().to_owned()),
        }
    }
}

/// Receives a registry snapshot after every settle step.
pub trait RegistryVisitor: Send {
    fn visit(&mut self, entities: &[EntitySummary]);
}

impl<V: RegistryVisitor> RegistryVisitor for Arc<Mutex<V>> {
    fn visit(&mut self, entities: &[EntitySummary]) {
        self.lock().visit(entities);
    }
}

/// Differences between two registry snapshots.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RegistryChanges {
    pub added: Vec<EntitySummary>,
    pub removed: Vec<EntityId>,
    /// New summaries of entities whose summary changed.
    pub updated: Vec<EntitySummary>,
}

impl RegistryChanges {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty() && self.updated.is_empty()
    }
}

/// A visitor accumulating [`RegistryChanges`] between calls to
/// [`take_changes`](Self::take_changes).
#[derive(Debug, Default)]
pub struct ChangeTracker {
    previous: Vec<EntitySummary>,
    pending: RegistryChanges,
}

impl ChangeTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Changes seen since the last call.
    pub fn take_changes(&mut self) -> RegistryChanges {
        std::mem::take(&mut self.pending)
    }

    /// The most recent snapshot.
    pub fn current(&self) -> &[EntitySummary] {
        &self.previous
    }

    fn record(&mut self, entities: &[EntitySummary]) {
        let previous = SortedRegistry::from_vec(
            std::mem::take(&mut self.previous),
            |a: &EntitySummary, b: &EntitySummary| a.id.cmp(&b.id),
        );
        let diff = previous.diff(entities, |old, new| old.id.cmp(&new.id));

        for id in diff.removed.iter().map(|s| s.id) {
            // An entity added and removed between two takes cancels out.
            if let Some(pos) = self.pending.added.iter().position(|s| s.id == id) {
                self.pending.added.remove(pos);
            } else {
                self.pending.updated.retain(|s| s.id != id);
                self.pending.removed.push(id);
            }
        }
        self.pending.added.extend(diff.added.iter().map(|s| (*s).clone()));
        let (_, updated) = diff.split_existing(|old, new| old == new);
        for (_, new) in updated {
            if let Some(slot) = self
                .pending
                .added
                .iter_mut()
                .chain(self.pending.updated.iter_mut())
                .find(|s| s.id == new.id)
            {
                *slot = new.clone();
            } else {
                self.pending.updated.push(new.clone());
            }
        }
        self.previous = entities.to_vec();
    }
}

impl RegistryVisitor for ChangeTracker {
    fn visit(&mut self, entities: &[EntitySummary]) {
        self.record(entities);
    }
}

impl SchedulerHandle {
    /// Install a visitor called after every settle step.
    pub fn add_visitor(&self, visitor: impl RegistryVisitor + 'static) {
        self.shared.visitors.lock().push(Box::new(visitor));
    }

    /// Summaries of every registered entity, ascending identity.
    pub fn snapshot(&self) -> Vec<EntitySummary> {
        self.entities().iter().map(EntitySummary::of).collect()
    }

    pub(crate) fn visit_registry(&self) {
        // Visitors run unlocked; any added meanwhile are kept after them.
        let mut visitors = mem::take(&mut *self.shared.visitors.lock());
        if visitors.is_empty() {
            return;
        }
        let snapshot = self.snapshot();
        for visitor in visitors.iter_mut() {
            visitor.visit(&snapshot);
        }
        let mut installed = self.shared.visitors.lock();
        visitors.append(&mut installed);
        *installed = visitors;
    }
}
