//! Tessera Engine -- entity lifecycle scheduling on top of [`tessera_core`].
//!
//! The engine manages a population of game objects and the behavior
//! components attached to them. A single [`Scheduler`](scheduler::Scheduler)
//! owns the registry of live entities (ordered by identity) and drives the
//! four-phase tick:
//!
//! 1. **Start** -- entities registered since the previous tick are started.
//! 2. **Update** -- every executing component is updated, in identity order.
//! 3. **LateUpdate** -- same walk, after every update of this tick.
//! 4. **Settle** -- buffered creations, state toggles and removals are applied
//!    in one batch, then removed components receive `on_destroy`.
//!
//! Any creation, removal or toggle requested while a tick is in flight (from a
//! callback or from another thread) is buffered until the settle step, so the
//! registry is never mutated under an active iteration.
//!
//! # Quick Start
//!
//! ```
//! use tessera_engine::prelude::*;
//!
//! #[derive(Clone, Default)]
//! struct Counter {
//!     updates: u32,
//! }
//!
//! impl Behavior for Counter {
//!     fn update(&mut self, _ctx: &mut Context<'_>) -> anyhow::Result<()> {
//!         self.updates += 1;
//!         Ok(())
//!     }
//! }
//!
//! let mut scheduler = Scheduler::new(SchedulerConfig::default());
//! let player = scheduler.create_object("player").unwrap();
//! let counter = player.add_component(Counter::default()).unwrap();
//!
//! scheduler.tick(1.0 / 60.0);
//! scheduler.tick(1.0 / 60.0);
//! assert_eq!(counter.with(|c| c.updates), Some(2));
//! ```

#![deny(unsafe_code)]

pub mod behavior;
pub mod composition;
pub mod diagnostics;
pub mod entity;
pub mod network;
pub mod observer;
pub mod physics;
pub mod scheduler;
pub mod tick;
pub mod transform;
pub mod visitor;

pub use tessera_core;

use tessera_core::identity::EntityId;
use tessera_core::{IdentityError, RegistryError};

// ---------------------------------------------------------------------------
// Error types
// ---------------------------------------------------------------------------

/// Errors produced by engine operations.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// An entity or component with this identity is already registered.
    #[error("entity {0} already exists")]
    DuplicateKey(EntityId),

    /// The entity is not registered.
    #[error("entity {0} not found")]
    NotFound(EntityId),

    /// The operation is not allowed in the current scheduler state.
    #[error("invalid state: {0}")]
    InvalidState(String),

    /// The scheduler that owned this entity no longer exists.
    #[error("the owning scheduler has been dropped")]
    SchedulerDropped,

    /// A structural registry error.
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// Identity allocation failed.
    #[error(transparent)]
    Identity(#[from] IdentityError),

    /// Configuration or packet (de)serialization failed.
    #[error("serialization failed: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A failure surfaced from a lifecycle callback.
///
/// These are never propagated past the scheduler; they are reported through
/// the [`DiagnosticSink`](diagnostics::DiagnosticSink) and collected in the
/// [`TickReport`](scheduler::TickReport).
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("{callback} of {behavior} on {entity} failed: {message}")]
pub struct LifecycleError {
    /// Component whose callback failed.
    pub entity: EntityId,
    /// Type name of the failing behavior.
    pub behavior: &'static str,
    /// Which callback failed.
    pub callback: behavior::Callback,
    /// Error or panic message.
    pub message: String,
}

// ---------------------------------------------------------------------------
// Prelude
// ---------------------------------------------------------------------------

/// Convenience re-exports for common engine usage.
pub mod prelude {
    pub use tessera_core::prelude::*;

    pub use crate::behavior::{Behavior, Callback, Context, DoNotClone};
    pub use crate::composition::CompositionContainer;
    pub use crate::diagnostics::{CapturingSink, DiagnosticLevel, DiagnosticSink, TracingSink};
    pub use crate::entity::{ComponentCell, ComponentRef, Entity, EntityKind, GameObject, ObjectInfo};
    pub use crate::network::{JsonCodec, NetworkLink, PacketCodec, PeerId, Reliability};
    pub use crate::observer::{ObserverList, SubscriptionId};
    pub use crate::physics::{
        Collider, Collision, CollisionHandle, CollisionPair, CollisionShape, PhysicsEngine,
        RaycastHit, SharedPhysics,
    };
    pub use crate::scheduler::{Phase, Scheduler, SchedulerConfig, SchedulerHandle, TickReport};
    pub use crate::tick::{EngineConfig, GameLoop, TickConfig, TickDiagnostics};
    pub use crate::transform::{Quat, Transform, Vec3};
    pub use crate::visitor::{ChangeTracker, EntitySummary, RegistryChanges, RegistryVisitor};
    pub use crate::{EngineError, LifecycleError};
}
