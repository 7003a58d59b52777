//! Catalog and CA state, the change sets produced by write transactions,
//! and the derivation of stream events from those change sets.

mod catalog_events;
mod connect_ca_events;
mod memdb;
pub mod structs;

pub use catalog_events::{service_health_events_from_changes, service_health_snapshot};
pub use connect_ca_events::{ca_roots_change_events, ca_roots_snapshot};
pub use memdb::{MemStore, Snapshot, WriteTxn};

use std::sync::{Arc, Weak};

use crate::stream::Event;
use structs::{CaRoot, HealthCheck, Node, ServiceNode};

#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum StateError {
    #[error("Missing node registration")]
    MissingNode,
    #[error("Missing service registration")]
    MissingService,
    #[error("Missing CA root ID")]
    MissingCaRootId,
    #[error("there must be exactly one active CA, got {0}")]
    ActiveCaRootCount(usize),
    #[error("state store is closed")]
    Closed,
    #[error("storage error: {0}")]
    Storage(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Table {
    Nodes,
    Services,
    Checks,
    CaRoots,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChangeType {
    /// Something else changed that affects this object.
    Indirect,
    Delete,
    Create,
    Update,
}

/// Before and after images of one row. At least one side is present.
#[derive(Debug)]
pub struct RowChange<T> {
    pub before: Option<Arc<T>>,
    pub after: Option<Arc<T>>,
}

impl<T> Clone for RowChange<T> {
    fn clone(&self) -> Self {
        Self {
            before: self.before.clone(),
            after: self.after.clone(),
        }
    }
}

impl<T> RowChange<T> {
    pub fn created(&self) -> bool {
        self.before.is_none() && self.after.is_some()
    }

    pub fn deleted(&self) -> bool {
        self.before.is_some() && self.after.is_none()
    }

    pub fn updated(&self) -> bool {
        self.before.is_some() && self.after.is_some()
    }

    /// The row as it is after the change, or as it was before a delete.
    pub fn object(&self) -> Option<&Arc<T>> {
        self.after.as_ref().or(self.before.as_ref())
    }

    pub fn change_type(&self) -> ChangeType {
        if self.deleted() {
            ChangeType::Delete
        } else if self.created() {
            ChangeType::Create
        } else {
            ChangeType::Update
        }
    }
}

#[derive(Debug, Clone)]
pub enum Change {
    Node(RowChange<Node>),
    Service(RowChange<ServiceNode>),
    Check(RowChange<HealthCheck>),
    CaRoot(RowChange<CaRoot>),
}

impl Change {
    pub fn table(&self) -> Table {
        match self {
            Change::Node(_) => Table::Nodes,
            Change::Service(_) => Table::Services,
            Change::Check(_) => Table::Checks,
            Change::CaRoot(_) => Table::CaRoots,
        }
    }
}

/// Every row change committed at one index.
#[derive(Debug, Clone, Default)]
pub struct Changes {
    pub index: u64,
    pub changes: Vec<Change>,
}

/// Consistent read view of the store.
pub trait ReadTxn {
    fn node(&self, name: &str) -> Result<Option<Arc<Node>>, StateError>;
    fn services_by_node(&self, node: &str) -> Result<Vec<Arc<ServiceNode>>, StateError>;
    fn service(&self, node: &str, service_id: &str) -> Result<Option<Arc<ServiceNode>>, StateError>;
    fn checks_by_node(&self, node: &str) -> Result<Vec<Arc<HealthCheck>>, StateError>;
    /// Instances registered as `name`. With `connect`, instead the proxies
    /// whose destination is `name` and connect-native instances of `name`.
    fn services_by_name(&self, name: &str, connect: bool) -> Result<Vec<Arc<ServiceNode>>, StateError>;
    fn ca_roots(&self) -> Result<Vec<Arc<CaRoot>>, StateError>;
    /// Index of the last write to `table`, 0 if it was never written.
    fn table_index(&self, table: Table) -> u64;
}

/// Source of read transactions, so snapshot functions need not own the store.
pub trait ReadDb: Send + Sync {
    type Txn: ReadTxn;

    fn read_txn(&self) -> Result<Self::Txn, StateError>;
}

impl<D: ReadDb> ReadDb for Arc<D> {
    type Txn = D::Txn;

    fn read_txn(&self) -> Result<Self::Txn, StateError> {
        self.as_ref().read_txn()
    }
}

impl<D: ReadDb> ReadDb for Weak<D> {
    type Txn = D::Txn;

    fn read_txn(&self) -> Result<Self::Txn, StateError> {
        self.upgrade().ok_or(StateError::Closed)?.read_txn()
    }
}

/// Runs every event processor over one committed change set.
pub fn process_db_changes(tx: &dyn ReadTxn, changes: &Changes) -> Result<Vec<Event>, StateError> {
    let mut events = service_health_events_from_changes(tx, changes)?;
    events.extend(ca_roots_change_events(tx, changes)?);
    Ok(events)
}
