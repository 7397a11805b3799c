//! Explicit subscription lists for entity-level events.
//!
//! An [`ObserverList`] is owned by the entity that raises the event. Cloning
//! the list copies every subscription, so a cloned component keeps notifying
//! the same handlers. The owner clears the list when it is destroyed.

use std::fmt;
use std::sync::Arc;

/// Token returned by [`ObserverList::subscribe`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct SubscriptionId(u64);

type Handler<E> = Arc<dyn Fn(&E) + Send + Sync>;

/// An ordered list of event handlers.
pub struct ObserverList<E> {
    next: u64,
    handlers: Vec<(SubscriptionId, Handler<E>)>,
}

impl<E> ObserverList<E> {
    pub fn new() -> Self {
        Self {
            next: 0,
            handlers: Vec::new(),
        }
    }

    /// Register a handler. Handlers run in subscription order.
    pub fn subscribe(&mut self, handler: impl Fn(&E) + Send + Sync + 'static) -> SubscriptionId {
        let id = SubscriptionId(self.next);
        self.next += 1;
        self.handlers.push((id, Arc::new(handler)));
        id
    }

    /// Remove a handler. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&mut self, id: SubscriptionId) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(sid, _)| *sid != id);
        self.handlers.len() != before
    }

    /// Invoke every handler with `event`; returns how many ran.
    pub fn notify(&self, event: &E) -> usize {
        for (_, handler) in &self.handlers {
            handler(event);
        }
        self.handlers.len()
    }

    pub fn len(&self) -> usize {
        self.handlers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.is_empty()
    }

    /// Drop every subscription.
    pub fn clear(&mut self) {
        self.handlers.clear();
    }
}

impl<E> Default for ObserverList<E> {
    fn default() -> Self {
        Self::new()
    }
}

impl<E> Clone for ObserverList<E> {
    fn clone(&self) -> Self {
        Self {
            next: self.next,
            handlers: self.handlers.clone(),
        }
    }
}

impl<E> fmt::Debug for ObserverList<E> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObserverList")
            .field("subscribers", &self.handlers.len())
            .finish()
    }
}
