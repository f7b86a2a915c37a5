//! Synchronous change notification.
//!
//! Reference frames, scene nodes and parent placements all announce changes through a
//! [`Broadcaster`]. Interested parties [`subscribe`](Broadcaster::subscribe) and receive a
//! [`Subscription`], which unsubscribes when it is dropped or [cancelled](Subscription::cancel).
//! There is no ambient registration: a handler only ever runs while someone holds its
//! `Subscription`.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

/// A callback invoked on every broadcast.
pub type ChangeHandler = Rc<dyn Fn()>;

/// Identifies one subscription on one [`Broadcaster`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionToken(u64);

#[derive(Default)]
struct Listeners {
    next: u64,
    handlers: Vec<(SubscriptionToken, ChangeHandler)>,
}

impl Listeners {
    fn contains(&self, token: SubscriptionToken) -> bool {
        self.handlers.iter().any(|(t, _)| *t == token)
    }

    fn remove(&mut self, token: SubscriptionToken) -> bool {
        let before = self.handlers.len();
        self.handlers.retain(|(t, _)| *t != token);
        self.handlers.len() != before
    }
}

/// Fans a change notification out to every current subscriber.
///
/// Delivery is synchronous: [`Broadcaster::broadcast`] returns only after every handler has run.
/// Handlers may subscribe or unsubscribe (including themselves) while a broadcast is in
/// progress; a handler removed mid-broadcast is not called afterwards, and one added
/// mid-broadcast is first called on the next broadcast.
#[derive(Default)]
pub struct Broadcaster {
    listeners: Rc<RefCell<Listeners>>,
}

impl Broadcaster {
    /// Creates a broadcaster with no subscribers.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `handler` until the returned [`Subscription`] is dropped or cancelled.
    pub fn subscribe(&self, handler: ChangeHandler) -> Subscription {
        let mut listeners = self.listeners.borrow_mut();
        let token = SubscriptionToken(listeners.next);
        listeners.next += 1;
        listeners.handlers.push((token, handler));
        Subscription {
            token,
            listeners: Rc::downgrade(&self.listeners),
        }
    }

    /// Removes a subscription by token; returns whether it was still registered.
    pub fn unsubscribe(&self, token: SubscriptionToken) -> bool {
        self.listeners.borrow_mut().remove(token)
    }

    /// Invokes every current handler, in subscription order.
    pub fn broadcast(&self) {
        // snapshot so that handlers can (un)subscribe while we iterate
        let snapshot: Vec<_> = self.listeners.borrow().handlers.clone();
        for (token, handler) in snapshot {
            if self.listeners.borrow().contains(token) {
                handler();
            }
        }
    }

    /// Returns how many subscriptions are currently registered.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.listeners.borrow().handlers.len()
    }
}

impl fmt::Debug for Broadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Broadcaster")
            .field("subscribers", &self.subscriber_count())
            .finish()
    }
}

/// Keeps a handler registered with a [`Broadcaster`].
///
/// Dropping the subscription unsubscribes. Outliving the broadcaster is fine; the subscription
/// then simply has nothing left to remove.
#[must_use = "dropping a Subscription immediately unsubscribes its handler"]
pub struct Subscription {
    token: SubscriptionToken,
    listeners: Weak<RefCell<Listeners>>,
}

impl Subscription {
    /// Returns the token identifying this subscription.
    #[must_use]
    pub fn token(&self) -> SubscriptionToken {
        self.token
    }

    /// Returns whether the handler is still registered.
    #[must_use]
    pub fn is_active(&self) -> bool {
        self.listeners
            .upgrade()
            .is_some_and(|listeners| listeners.borrow().contains(self.token))
    }

    /// Unsubscribes now rather than at the end of the scope.
    pub fn cancel(self) {
        // Drop does the work
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(listeners) = self.listeners.upgrade() {
            listeners.borrow_mut().remove(self.token);
        }
    }
}

impl fmt::Debug for Subscription {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Subscription")
            .field("token", &self.token)
            .field("active", &self.is_active())
            .finish()
    }
}
