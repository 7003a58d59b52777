//! Topic-scoped change events and the subscription machinery that delivers
//! them: a snapshot of current state followed by live, index-ordered
//! batches.

mod publisher;
mod subscription;

pub use publisher::{EventPublisher, DEFAULT_CHANNEL_CAPACITY};
pub use subscription::{Subscription, SubscriptionError};

use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::acl::Authorizer;
use crate::state::structs::{CaRoot, CheckServiceNode, EnterpriseMeta};
use crate::state::StateError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Topic {
    ServiceHealth,
    ServiceHealthConnect,
    CaRoots,
}

impl fmt::Display for Topic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Topic::ServiceHealth => "ServiceHealth",
            Topic::ServiceHealthConnect => "ServiceHealthConnect",
            Topic::CaRoots => "CARoots",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Op {
    Delete,
    Create,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceHealthPayload {
    pub op: Op,
    pub value: CheckServiceNode,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CaRootsPayload {
    pub roots: Vec<CaRoot>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    ServiceHealth(ServiceHealthPayload),
    CaRoots(CaRootsPayload),
    /// Marks the end of the snapshot part of a subscription.
    EndOfSnapshot,
}

impl Payload {
    pub fn has_read_permission(&self, authz: &dyn Authorizer) -> bool {
        match self {
            Payload::ServiceHealth(payload) => payload.value.can_read(authz),
            // Roots are cluster-wide trust material: require service:write on
            // any service in any partition and namespace.
            Payload::CaRoots(_) => {
                let ctx = EnterpriseMeta::wildcard().authz_context();
                authz.service_write_any(&ctx).is_allow()
            }
            Payload::EndOfSnapshot => true,
        }
    }

    pub fn check_service_node(&self) -> Option<&CheckServiceNode> {
        match self {
            Payload::ServiceHealth(payload) => Some(&payload.value),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Event {
    pub topic: Topic,
    pub key: String,
    pub index: u64,
    pub payload: Payload,
}

impl Event {
    pub fn end_of_snapshot(topic: Topic, index: u64) -> Self {
        Self {
            topic,
            key: String::new(),
            index,
            payload: Payload::EndOfSnapshot,
        }
    }

    pub fn is_end_of_snapshot(&self) -> bool {
        matches!(self.payload, Payload::EndOfSnapshot)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubscribeRequest {
    pub topic: Topic,
    /// Empty matches every key on the topic.
    #[serde(default)]
    pub key: String,
}

impl SubscribeRequest {
    pub fn new(topic: Topic, key: impl Into<String>) -> Self {
        Self {
            topic,
            key: key.into(),
        }
    }

    pub fn matches(&self, event: &Event) -> bool {
        event.topic == self.topic && (self.key.is_empty() || event.key == self.key)
    }
}

/// Sink a snapshot function writes its events into.
pub trait SnapshotAppender {
    fn append(&mut self, events: Vec<Event>);
}

impl SnapshotAppender for Vec<Event> {
    fn append(&mut self, events: Vec<Event>) {
        self.extend(events);
    }
}

/// Writes the current state matching a request into the appender and
/// returns the index that state was read at.
pub type SnapshotFunc =
    Arc<dyn Fn(&SubscribeRequest, &mut dyn SnapshotAppender) -> Result<u64, StateError> + Send + Sync>;
