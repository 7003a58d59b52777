use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

use tokio::sync::broadcast;

use super::{Event, SnapshotFunc, SubscribeRequest, Subscription, SubscriptionError, Topic};
use crate::acl::Authorizer;

pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

struct Inner {
    tx: broadcast::Sender<Arc<Vec<Event>>>,
    handlers: RwLock<HashMap<Topic, SnapshotFunc>>,
}

/// Fans committed event batches out to subscribers and holds the snapshot
/// handler for each topic. Cheap to clone.
#[derive(Clone)]
pub struct EventPublisher {
    inner: Arc<Inner>,
}

impl Default for EventPublisher {
    fn default() -> Self {
        Self::new(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventPublisher {
    /// `capacity` is the number of batches a subscriber may fall behind
    /// before it is told it lagged.
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self {
            inner: Arc::new(Inner {
                tx,
                handlers: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn register_handler(&self, topic: Topic, handler: SnapshotFunc) {
        self.inner
            .handlers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(topic, handler);
    }

    /// Sends one committed batch. Batches must be published in index order.
    pub fn publish(&self, events: Vec<Event>) {
        if events.is_empty() {
            return;
        }
        let index = events[0].index;
        let count = events.len();
        // An error only means nobody is subscribed right now.
        if self.inner.tx.send(Arc::new(events)).is_err() {
            tracing::trace!(index, count, "no subscribers for event batch");
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.tx.receiver_count()
    }

    /// Starts a subscription: the topic snapshot first, then live batches
    /// newer than the snapshot. Events the authorizer may not read are
    /// dropped.
    pub fn subscribe(
        &self,
        req: SubscribeRequest,
        authz: Arc<dyn Authorizer>,
    ) -> Result<Subscription, SubscriptionError> {
        let handler = self
            .inner
            .handlers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(&req.topic)
            .cloned()
            .ok_or(SubscriptionError::UnknownTopic(req.topic))?;

        // Subscribe before reading the snapshot so no batch committed in
        // between is missed.
        let rx = self.inner.tx.subscribe();

        let mut snapshot: Vec<Event> = Vec::new();
        let index = handler(&req, &mut snapshot)?;

        tracing::debug!(topic = %req.topic, key = %req.key, index, events = snapshot.len(), "subscription started");
        Ok(Subscription::new(req, authz, rx, snapshot, index))
    }
}
