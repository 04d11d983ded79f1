//! Subscriber hub fanning change events out to push connections.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};

use crate::event::ChangeEvent;

/// Default capacity of each subscriber's outbound queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;

/// Identifier of a registered subscriber.
pub type SubscriberId = u64;

/// Receiving end of a subscriber's outbound queue.
///
/// The stream ends once the hub drops the subscriber, either through
/// [`SubscriberHub::unregister`] or after a failed delivery.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::Receiver<Arc<str>>,
}

impl Subscription {
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Wait for the next serialized message.
    pub async fn recv(&mut self) -> Option<Arc<str>> {
        self.rx.recv().await
    }

    /// Take a queued message without waiting.
    pub fn try_recv(&mut self) -> Option<Arc<str>> {
        self.rx.try_recv().ok()
    }
}

/// Set of live push connections.
///
/// Each subscriber owns a bounded queue. Broadcasting never waits on a
/// subscriber: a full or closed queue gets the subscriber dropped instead.
pub struct SubscriberHub {
    /// Outbound queues keyed by subscriber ID.
    subscribers: DashMap<SubscriberId, mpsc::Sender<Arc<str>>>,
    /// Next subscriber ID.
    next_id: AtomicU64,
    /// Capacity of each outbound queue.
    queue_capacity: usize,
}

impl SubscriberHub {
    /// Create a hub whose subscribers queue up to `queue_capacity` messages.
    pub fn new(queue_capacity: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            queue_capacity: queue_capacity.max(1),
        }
    }

    /// Add a subscriber.
    pub fn register(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let (tx, rx) = mpsc::channel(self.queue_capacity);
        self.subscribers.insert(id, tx);

        debug!(subscriber_id = id, "subscriber registered");
        Subscription { id, rx }
    }

    /// Remove a subscriber. Returns whether it was still registered.
    ///
    /// Safe to call repeatedly and concurrently with [`broadcast`](Self::broadcast).
    pub fn unregister(&self, id: SubscriberId) -> bool {
        let removed = self.subscribers.remove(&id).is_some();
        if removed {
            debug!(subscriber_id = id, "subscriber unregistered");
        }
        removed
    }

    /// Deliver an event to every registered subscriber.
    ///
    /// The event is serialized once. Subscribers whose queue is full or
    /// closed are unregistered; their failure never reaches the caller.
    /// Returns the number of subscribers the event was queued for.
    pub fn broadcast(&self, event: &ChangeEvent) -> usize {
        let payload: Arc<str> = match event.to_message().encode() {
            Ok(payload) => payload.into(),
            Err(e) => {
                warn!(name = %event.name(), error = %e, "failed to encode change event");
                return 0;
            }
        };

        // Membership snapshot: registrations racing with this call are
        // either included or not, never half-seen.
        let ids: Vec<SubscriberId> = self.subscribers.iter().map(|entry| *entry.key()).collect();

        let mut delivered = 0;
        for id in ids {
            // The entry guard is held across the non-blocking send, so a
            // concurrent unregister either precedes it (nothing is sent) or
            // waits for it.
            let result = match self.subscribers.get(&id) {
                Some(tx) => tx.try_send(payload.clone()),
                None => continue,
            };

            match result {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(subscriber_id = id, "subscriber queue full, dropping subscriber");
                    self.unregister(id);
                }
                Err(TrySendError::Closed(_)) => {
                    debug!(subscriber_id = id, "subscriber gone, dropping");
                    self.unregister(id);
                }
            }
        }

        tracing::trace!(name = %event.name(), delivered, "broadcast change event");
        delivered
    }

    /// Get the number of registered subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers.len()
    }

    /// Check whether a subscriber is still registered.
    pub fn is_registered(&self, id: SubscriberId) -> bool {
        self.subscribers.contains_key(&id)
    }
}

impl Default for SubscriberHub {
    fn default() -> Self {
        Self::new(DEFAULT_QUEUE_CAPACITY)
    }
}

/// Shared hub handle.
pub type SharedSubscriberHub = Arc<SubscriberHub>;
