//! Entity identities and allocation.
//!
//! An [`EntityId`] is a plain 64-bit serial number. Identities are handed out
//! in increasing order by an [`IdentityAllocator`]; when recycling is enabled,
//! released identities are queued (FIFO) and handed out again before the
//! serial counter advances.

use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::fmt;

use crate::IdentityError;

// ---------------------------------------------------------------------------
// EntityId
// ---------------------------------------------------------------------------

/// A unique entity identity.
///
/// Identities are totally ordered; the scheduler visits entities in ascending
/// identity order.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct EntityId(u64);

impl EntityId {
    /// Construct an `EntityId` from its raw value.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// Raw `u64` representation.
    #[inline]
    pub const fn to_raw(self) -> u64 {
        self.0
    }
}

impl fmt::Debug for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "EntityId({})", self.0)
    }
}

impl fmt::Display for EntityId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

// ---------------------------------------------------------------------------
// IdentityAllocator
// ---------------------------------------------------------------------------

/// Issues unique, monotonically increasing [`EntityId`]s.
///
/// With recycling enabled, released identities are kept in a FIFO queue and
/// reused before a fresh serial number is issued. An identity is never queued
/// twice.
#[derive(Debug, Default)]
pub struct IdentityAllocator {
    /// Next serial number to hand out.
    next: u64,
    /// Whether released identities are reused.
    recycling: bool,
    /// Released identities waiting to be reused (FIFO).
    pool: VecDeque<EntityId>,
    /// Membership index for `pool`.
    pooled: HashSet<EntityId>,
}

impl IdentityAllocator {
    /// Create an allocator that never reuses identities.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an allocator that reuses released identities.
    pub fn with_recycling() -> Self {
        Self {
            recycling: true,
            ..Self::default()
        }
    }

    /// Continue issuing serials from `next`, e.g. after restoring a world
    /// whose identities below `next` are already taken. Clears the pool.
    pub fn resume_from(mut self, next: u64) -> Self {
        self.next = next;
        self.pool.clear();
        self.pooled.clear();
        self
    }

    /// Whether released identities are reused.
    pub fn is_recycling(&self) -> bool {
        self.recycling
    }

    /// Allocate the next identity.
    ///
    /// Recycled identities are preferred. Returns
    /// [`IdentityError::Exhausted`] once the 64-bit serial space is used up.
    pub fn allocate(&mut self) -> Result<EntityId, IdentityError> {
        if let Some(id) = self.pool.pop_front() {
            self.pooled.remove(&id);
            return Ok(id);
        }
        if self.next == u64::MAX {
            return Err(IdentityError::Exhausted);
        }
        let id = EntityId(self.next);
        self.next += 1;
        Ok(id)
    }

    /// Hand an identity back for reuse.
    ///
    /// Returns `true` if the identity was queued. Returns `false` when
    /// recycling is disabled, when the identity was never issued by this
    /// allocator, or when it is already queued.
    pub fn release(&mut self, id: EntityId) -> bool {
        if !self.recycling || id.0 >= self.next {
            return false;
        }
        if !self.pooled.insert(id) {
            return false;
        }
        self.pool.push_back(id);
        true
    }

    /// Number of identities waiting in the recycling queue.
    pub fn pooled_count(&self) -> usize {
        self.pool.len()
    }

    /// Number of serial identities issued so far (recycled reuse excluded).
    pub fn issued_count(&self) -> u64 {
        self.next
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
