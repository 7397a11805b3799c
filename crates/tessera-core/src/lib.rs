//! # tessera-core
//!
//! Foundational data structures for the Tessera simulation framework.
//!
//! - [`EntityId`](identity::EntityId) and [`IdentityAllocator`](identity::IdentityAllocator):
//!   unique, ordered identities with optional FIFO recycling.
//! - [`SortedRegistry`](registry::SortedRegistry): an always-sorted,
//!   duplicate-free vector with merge-based set algebra, used as the
//!   engine's entity registry.
//!
//! This crate has no notion of phases, behaviors, or threads; see
//! `tessera-engine` for the lifecycle scheduler built on top of it.

#![deny(unsafe_code)]

pub mod identity;
pub mod registry;

// ---------------------------------------------------------------------------
// Errors
// ---------------------------------------------------------------------------

/// Errors raised by [`SortedRegistry`](registry::SortedRegistry).
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    /// An element with the same key is already stored at `index`.
    #[error("an element with the same key already exists at index {index}")]
    DuplicateKey { index: usize },
    /// No element with the requested key exists.
    #[error("no element with the requested key")]
    NotFound,
}

/// Errors raised by [`IdentityAllocator`](identity::IdentityAllocator).
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
pub enum IdentityError {
    /// Every 64-bit serial identity has been issued and none are pooled.
    #[error("entity identity space exhausted")]
    Exhausted,
}

/// Convenience re-exports.
pub mod prelude {
    pub use crate::identity::{EntityId, IdentityAllocator};
    pub use crate::registry::{Diff, OrdFn, SortedRegistry};
    pub use crate::{IdentityError, RegistryError};
}
