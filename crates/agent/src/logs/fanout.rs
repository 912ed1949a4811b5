//! Fanout — an ordered set of bounded subscriber channels with an explicit
//! overflow policy.
//!
//! The set itself is not synchronised; owners wrap it in their own lock.

use std::time::Duration;

use tokio::sync::mpsc;
use tokio::sync::mpsc::error::{SendTimeoutError, TrySendError};
use tracing::warn;

/// What to do when a subscriber's queue is full.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum OverflowPolicy {
    /// Wait for room, however long it takes. A stalled subscriber stalls
    /// the whole fan-out pass.
    #[default]
    Block,
    /// Wait up to the given duration, then skip this item for that
    /// subscriber.
    BlockWithTimeout(Duration),
    /// Skip this item for a full subscriber immediately.
    DropNewest,
    /// Unregister a subscriber the moment its queue is full.
    Disconnect,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriberId(u64);

impl std::fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

pub struct Subscriber<T> {
    pub id: SubscriberId,
    tx: mpsc::Sender<T>,
    /// Overrides the set's policy for this subscriber.
    policy: Option<OverflowPolicy>,
}

impl<T> Clone for Subscriber<T> {
    fn clone(&self) -> Self {
        Self { id: self.id, tx: self.tx.clone(), policy: self.policy }
    }
}

enum Delivery {
    Sent,
    Skipped,
    Gone,
}

pub struct Fanout<T> {
    policy: OverflowPolicy,
    next_id: u64,
    subscribers: Vec<Subscriber<T>>,
}

impl<T: Clone + Send> Fanout<T> {
    pub fn new(policy: OverflowPolicy) -> Self {
        Self { policy, next_id: 0, subscribers: Vec::new() }
    }

    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    pub fn subscribe(&mut self, tx: mpsc::Sender<T>) -> SubscriberId {
        self.push(tx, None)
    }

    /// Register a subscriber that is always served under `policy`,
    /// whatever the set's own policy is.
    pub fn subscribe_with(&mut self, tx: mpsc::Sender<T>, policy: OverflowPolicy) -> SubscriberId {
        self.push(tx, Some(policy))
    }

    fn push(&mut self, tx: mpsc::Sender<T>, policy: Option<OverflowPolicy>) -> SubscriberId {
        let id = SubscriberId(self.next_id);
        self.next_id += 1;
        self.subscribers.push(Subscriber { id, tx, policy });
        id
    }

    /// Returns whether the subscriber was still registered.
    pub fn unsubscribe(&mut self, id: SubscriberId) -> bool {
        let before = self.subscribers.len();
        self.subscribers.retain(|s| s.id != id);
        self.subscribers.len() != before
    }

    pub fn remove_all(&mut self, ids: &[SubscriberId]) {
        if !ids.is_empty() {
            self.subscribers.retain(|s| !ids.contains(&s.id));
        }
    }

    pub fn len(&self) -> usize {
        self.subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.subscribers.is_empty()
    }

    /// Copy of the current subscriber list, for delivery outside the
    /// owner's lock.
    pub fn snapshot(&self) -> Vec<Subscriber<T>> {
        self.subscribers.clone()
    }

    /// Deliver to every subscriber in registration order, then drop the
    /// ones that went away.
    pub async fn broadcast(&mut self, item: &T) {
        let gone = deliver(&self.subscribers, item, self.policy).await;
        self.remove_all(&gone);
    }
}

/// Deliver `item` to each target one at a time under `policy`, or under
/// the target's own policy when it was registered with one.
///
/// Returns the ids of subscribers that should be unregistered: closed
/// channels always, full ones under [`OverflowPolicy::Disconnect`].
pub async fn deliver<T: Clone + Send>(
    targets: &[Subscriber<T>],
    item: &T,
    policy: OverflowPolicy,
) -> Vec<SubscriberId> {
    let mut gone = Vec::new();
    for sub in targets {
        match offer(sub, item.clone(), sub.policy.unwrap_or(policy)).await {
            Delivery::Sent | Delivery::Skipped => {}
            Delivery::Gone => gone.push(sub.id),
        }
    }
    gone
}

async fn offer<T: Send>(sub: &Subscriber<T>, item: T, policy: OverflowPolicy) -> Delivery {
    match policy {
        OverflowPolicy::Block => match sub.tx.send(item).await {
            Ok(()) => Delivery::Sent,
            Err(_) => Delivery::Gone,
        },
        OverflowPolicy::BlockWithTimeout(timeout) => match sub.tx.send_timeout(item, timeout).await {
            Ok(()) => Delivery::Sent,
            Err(SendTimeoutError::Timeout(_)) => {
                warn!(subscriber = %sub.id, ?timeout, "Subscriber send timed out, item skipped");
                Delivery::Skipped
            }
            Err(SendTimeoutError::Closed(_)) => Delivery::Gone,
        },
        OverflowPolicy::DropNewest => match sub.tx.try_send(item) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = %sub.id, "Subscriber queue full, item dropped");
                Delivery::Skipped
            }
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        },
        OverflowPolicy::Disconnect => match sub.tx.try_send(item) {
            Ok(()) => Delivery::Sent,
            Err(TrySendError::Full(_)) => {
                warn!(subscriber = %sub.id, "Subscriber queue full, disconnecting");
                Delivery::Gone
            }
            Err(TrySendError::Closed(_)) => Delivery::Gone,
        },
    }
}
