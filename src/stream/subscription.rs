use std::collections::VecDeque;
use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::sync::broadcast::error::RecvError;

use super::{Event, SubscribeRequest, Topic};
use crate::acl::Authorizer;
use crate::state::StateError;

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum SubscriptionError {
    #[error("no snapshot handler for topic {0}")]
    UnknownTopic(Topic),
    #[error("snapshot failed: {0}")]
    Snapshot(#[from] StateError),
    /// The subscriber fell too far behind; it must resubscribe.
    #[error("subscription lagged behind by {0} batches")]
    Lagged(u64),
    #[error("publisher closed")]
    Closed,
}

pub struct Subscription {
    req: SubscribeRequest,
    authz: Arc<dyn Authorizer>,
    rx: broadcast::Receiver<Arc<Vec<Event>>>,
    pending: VecDeque<Event>,
    snapshot_index: u64,
}

impl Subscription {
    pub(super) fn new(
        req: SubscribeRequest,
        authz: Arc<dyn Authorizer>,
        rx: broadcast::Receiver<Arc<Vec<Event>>>,
        snapshot: Vec<Event>,
        snapshot_index: u64,
    ) -> Self {
        let mut sub = Self {
            req,
            authz,
            rx,
            pending: VecDeque::new(),
            snapshot_index,
        };
        sub.enqueue(snapshot.iter());
        sub.pending
            .push_back(Event::end_of_snapshot(sub.req.topic, snapshot_index));
        sub
    }

    pub fn request(&self) -> &SubscribeRequest {
        &self.req
    }

    /// Index the snapshot was taken at; 0 when the topic had no data yet.
    pub fn snapshot_index(&self) -> u64 {
        self.snapshot_index
    }

    fn enqueue<'e>(&mut self, events: impl Iterator<Item = &'e Event>) {
        for event in events {
            if self.req.matches(event) && event.payload.has_read_permission(self.authz.as_ref()) {
                self.pending.push_back(event.clone());
            }
        }
    }

    /// Next event for this subscriber: snapshot events, the end-of-snapshot
    /// marker, then live events.
    pub async fn next(&mut self) -> Result<Event, SubscriptionError> {
        loop {
            if let Some(event) = self.pending.pop_front() {
                return Ok(event);
            }

            let batch = match self.rx.recv().await {
                Ok(batch) => batch,
                Err(RecvError::Lagged(skipped)) => {
                    tracing::warn!(topic = %self.req.topic, key = %self.req.key, skipped, "subscriber lagged");
                    return Err(SubscriptionError::Lagged(skipped));
                }
                Err(RecvError::Closed) => return Err(SubscriptionError::Closed),
            };

            // Already covered by the snapshot.
            if batch.first().is_some_and(|event| event.index <= self.snapshot_index) {
                continue;
            }
            self.enqueue(batch.iter());
        }
    }
}
