use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, RwLock, Weak};

use super::structs::{CaRoot, HealthCheck, Node, NodeService, ServiceKind, ServiceNode};
use super::{
    ca_roots_snapshot, process_db_changes, service_health_snapshot, Change, Changes, ReadDb, ReadTxn, RowChange,
    StateError, Table,
};
use crate::stream::{EventPublisher, Topic};

type RowKey = (String, String);

#[derive(Debug, Clone, Default)]
struct Tables {
    nodes: BTreeMap<String, Arc<Node>>,
    services: BTreeMap<RowKey, Arc<ServiceNode>>,
    checks: BTreeMap<RowKey, Arc<HealthCheck>>,
    ca_roots: BTreeMap<String, Arc<CaRoot>>,
    indexes: BTreeMap<Table, u64>,
}

fn rows_for_node<'a, T>(table: &'a BTreeMap<RowKey, Arc<T>>, node: &'a str) -> impl Iterator<Item = &'a Arc<T>> + 'a {
    table
        .range((node.to_string(), String::new())..)
        .take_while(move |((n, _), _)| n == node)
        .map(|(_, row)| row)
}

impl ReadTxn for Tables {
    fn node(&self, name: &str) -> Result<Option<Arc<Node>>, StateError> {
        Ok(self.nodes.get(name).cloned())
    }

    fn services_by_node(&self, node: &str) -> Result<Vec<Arc<ServiceNode>>, StateError> {
        Ok(rows_for_node(&self.services, node).cloned().collect())
    }

    fn service(&self, node: &str, service_id: &str) -> Result<Option<Arc<ServiceNode>>, StateError> {
        Ok(self.services.get(&(node.to_string(), service_id.to_string())).cloned())
    }

    fn checks_by_node(&self, node: &str) -> Result<Vec<Arc<HealthCheck>>, StateError> {
        Ok(rows_for_node(&self.checks, node).cloned().collect())
    }

    fn services_by_name(&self, name: &str, connect: bool) -> Result<Vec<Arc<ServiceNode>>, StateError> {
        let matches = |sn: &ServiceNode| {
            if !connect {
                return sn.service_name == name;
            }
            match sn.service_kind {
                ServiceKind::ConnectProxy => sn.service_proxy.destination_service_name == name,
                ServiceKind::Typical => sn.service_connect.native && sn.service_name == name,
            }
        };
        Ok(self.services.values().filter(|sn| matches(sn)).cloned().collect())
    }

    fn ca_roots(&self) -> Result<Vec<Arc<CaRoot>>, StateError> {
        Ok(self.ca_roots.values().cloned().collect())
    }

    fn table_index(&self, table: Table) -> u64 {
        self.indexes.get(&table).copied().unwrap_or(0)
    }
}

/// Maps a row type onto its table and `Change` variant.
trait Row: Clone + PartialEq {
    const TABLE: Table;

    fn into_change(change: RowChange<Self>) -> Change;
    fn as_row_change(change: &mut Change) -> Option<&mut RowChange<Self>>;
    fn indexes(&self) -> (u64, u64);
    fn set_indexes(&mut self, create: u64, modify: u64);
}

macro_rules! impl_row {
    ($ty:ty, $table:expr, $variant:ident) => {
        impl Row for $ty {
            const TABLE: Table = $table;

            fn into_change(change: RowChange<Self>) -> Change {
                Change::$variant(change)
            }

            fn as_row_change(change: &mut Change) -> Option<&mut RowChange<Self>> {
                match change {
                    Change::$variant(row) => Some(row),
                    _ => None,
                }
            }

            fn indexes(&self) -> (u64, u64) {
                (self.create_index, self.modify_index)
            }

            fn set_indexes(&mut self, create: u64, modify: u64) {
                self.create_index = create;
                self.modify_index = modify;
            }
        }
    };
}

impl_row!(Node, Table::Nodes, Node);
impl_row!(ServiceNode, Table::Services, Service);
impl_row!(HealthCheck, Table::Checks, Check);
impl_row!(CaRoot, Table::CaRoots, CaRoot);

/// Sets create/modify indexes for a write at `index`. Returns `None` when the
/// row matches what is stored, so no-op writes record no change.
fn stamp<T: Row>(existing: Option<&Arc<T>>, mut row: T, index: u64) -> Option<Arc<T>> {
    match existing {
        Some(existing) => {
            let (create, modify) = existing.indexes();
            row.set_indexes(create, modify);
            if **existing == row {
                return None;
            }
            row.set_indexes(create, index);
        }
        None => row.set_indexes(index, index),
    }
    Some(Arc::new(row))
}

/// Row changes of one transaction. Repeated writes to a row collapse into a
/// single change from the first before-image to the last after-image.
#[derive(Debug, Default)]
struct ChangeLog {
    changes: Vec<Change>,
    positions: HashMap<(Table, RowKey), usize>,
}

impl ChangeLog {
    fn record<T: Row>(&mut self, key: RowKey, before: Option<Arc<T>>, after: Option<Arc<T>>) {
        let slot = (T::TABLE, key);
        if let Some(&pos) = self.positions.get(&slot) {
            if let Some(existing) = T::as_row_change(&mut self.changes[pos]) {
                existing.after = after;
            }
            return;
        }
        self.positions.insert(slot, self.changes.len());
        self.changes.push(T::into_change(RowChange { before, after }));
    }

    /// Drops rows that were created and deleted within the transaction.
    fn finish(&self) -> Vec<Change> {
        self.changes
            .iter()
            .filter(|change| match change {
                Change::Node(c) => c.object().is_some(),
                Change::Service(c) => c.object().is_some(),
                Change::Check(c) => c.object().is_some(),
                Change::CaRoot(c) => c.object().is_some(),
            })
            .cloned()
            .collect()
    }
}

/// In-memory catalog and CA store.
///
/// Readers get a consistent copy-on-write view; writers are serialised and
/// publish the events derived from their changes before the next writer
/// can start, so subscribers see batches in index order.
pub struct MemStore {
    tables: RwLock<Arc<Tables>>,
    writer: Mutex<()>,
    publisher: EventPublisher,
}

impl MemStore {
    /// Creates the store and registers its snapshot handlers with `publisher`.
    pub fn new(publisher: EventPublisher) -> Arc<Self> {
        let store = Arc::new(Self {
            tables: RwLock::new(Arc::new(Tables::default())),
            writer: Mutex::new(()),
            publisher,
        });
        register_snapshot_handlers(&store.publisher, Arc::downgrade(&store));
        store
    }

    pub fn publisher(&self) -> &EventPublisher {
        &self.publisher
    }

    pub fn snapshot(&self) -> Snapshot {
        let tables = self.tables.read().unwrap_or_else(PoisonError::into_inner);
        Snapshot {
            tables: Arc::clone(&tables),
        }
    }

    /// Starts a write transaction whose changes are stamped with `index`.
    /// Blocks until any other writer has finished.
    pub fn write_txn(&self, index: u64) -> WriteTxn<'_> {
        let guard = self.writer.lock().unwrap_or_else(PoisonError::into_inner);
        let tables = Tables::clone(&self.snapshot().tables);
        WriteTxn {
            store: self,
            _guard: guard,
            index,
            tables,
            log: ChangeLog::default(),
        }
    }
}

impl ReadDb for MemStore {
    type Txn = Snapshot;

    fn read_txn(&self) -> Result<Snapshot, StateError> {
        Ok(self.snapshot())
    }
}

fn register_snapshot_handlers(publisher: &EventPublisher, db: Weak<MemStore>) {
    publisher.register_handler(
        Topic::ServiceHealth,
        service_health_snapshot(db.clone(), Topic::ServiceHealth),
    );
    publisher.register_handler(
        Topic::ServiceHealthConnect,
        service_health_snapshot(db.clone(), Topic::ServiceHealthConnect),
    );
    publisher.register_handler(Topic::CaRoots, ca_roots_snapshot(db));
}

/// Read-only view of the store at one point in time.
#[derive(Clone)]
pub struct Snapshot {
    tables: Arc<Tables>,
}

impl ReadTxn for Snapshot {
    fn node(&self, name: &str) -> Result<Option<Arc<Node>>, StateError> {
        self.tables.node(name)
    }

    fn services_by_node(&self, node: &str) -> Result<Vec<Arc<ServiceNode>>, StateError> {
        self.tables.services_by_node(node)
    }

    fn service(&self, node: &str, service_id: &str) -> Result<Option<Arc<ServiceNode>>, StateError> {
        self.tables.service(node, service_id)
    }

    fn checks_by_node(&self, node: &str) -> Result<Vec<Arc<HealthCheck>>, StateError> {
        self.tables.checks_by_node(node)
    }

    fn services_by_name(&self, name: &str, connect: bool) -> Result<Vec<Arc<ServiceNode>>, StateError> {
        self.tables.services_by_name(name, connect)
    }

    fn ca_roots(&self) -> Result<Vec<Arc<CaRoot>>, StateError> {
        self.tables.ca_roots()
    }

    fn table_index(&self, table: Table) -> u64 {
        self.tables.table_index(table)
    }
}

/// Exclusive write transaction. Reads see the transaction's own writes.
/// Dropping it without `commit` discards every change.
pub struct WriteTxn<'a> {
    store: &'a MemStore,
    _guard: MutexGuard<'a, ()>,
    index: u64,
    tables: Tables,
    log: ChangeLog,
}

impl<'a> WriteTxn<'a> {
    pub fn index(&self) -> u64 {
        self.index
    }

    /// Changes recorded so far, stamped with the transaction index.
    pub fn changes(&self) -> Changes {
        Changes {
            index: self.index,
            changes: self.log.finish(),
        }
    }

    fn bump(&mut self, table: Table) {
        self.tables.indexes.insert(table, self.index);
    }

    pub fn ensure_node(&mut self, node: Node) -> Result<(), StateError> {
        let existing = self.tables.nodes.get(&node.node).cloned();
        let Some(row) = stamp(existing.as_ref(), node, self.index) else {
            return Ok(());
        };

        self.tables.nodes.insert(row.node.clone(), Arc::clone(&row));
        self.log.record((row.node.clone(), String::new()), existing, Some(row));
        self.bump(Table::Nodes);
        Ok(())
    }

    /// Removes the node together with its services and checks. Deleting an
    /// unknown node is a no-op.
    pub fn delete_node(&mut self, name: &str) -> Result<(), StateError> {
        let Some(existing) = self.tables.nodes.get(name).cloned() else {
            return Ok(());
        };

        let service_ids: Vec<String> = rows_for_node(&self.tables.services, name)
            .map(|sn| sn.service_id.clone())
            .collect();
        for service_id in service_ids {
            self.delete_service(name, &service_id)?;
        }

        let check_ids: Vec<String> = rows_for_node(&self.tables.checks, name)
            .map(|hc| hc.check_id.clone())
            .collect();
        for check_id in check_ids {
            self.delete_check(name, &check_id)?;
        }

        self.tables.nodes.remove(name);
        self.log.record((name.to_string(), String::new()), Some(existing), None);
        self.bump(Table::Nodes);
        Ok(())
    }

    pub fn ensure_service(&mut self, node: &str, service: &NodeService) -> Result<(), StateError> {
        if !self.tables.nodes.contains_key(node) {
            return Err(StateError::MissingNode);
        }

        let key = (node.to_string(), service.id.clone());
        let existing = self.tables.services.get(&key).cloned();
        let Some(row) = stamp(existing.as_ref(), service.to_service_node(node), self.index) else {
            return Ok(());
        };

        self.tables.services.insert(key.clone(), Arc::clone(&row));
        self.log.record(key, existing, Some(row));
        self.bump(Table::Services);
        Ok(())
    }

    /// Removes the service instance and the checks linked to it.
    pub fn delete_service(&mut self, node: &str, service_id: &str) -> Result<(), StateError> {
        let key = (node.to_string(), service_id.to_string());
        let Some(existing) = self.tables.services.get(&key).cloned() else {
            return Ok(());
        };

        let check_ids: Vec<String> = rows_for_node(&self.tables.checks, node)
            .filter(|hc| hc.service_id == service_id)
            .map(|hc| hc.check_id.clone())
            .collect();
        for check_id in check_ids {
            self.delete_check(node, &check_id)?;
        }

        self.tables.services.remove(&key);
        self.log.record(key, Some(existing), None);
        self.bump(Table::Services);
        Ok(())
    }

    /// Registers a check. Service-level checks must reference a service
    /// registered on the same node; the service name is filled in from it.
    pub fn ensure_check(&mut self, mut check: HealthCheck) -> Result<(), StateError> {
        if !self.tables.nodes.contains_key(&check.node) {
            return Err(StateError::MissingNode);
        }
        if !check.is_node_check() {
            let service = self
                .tables
                .services
                .get(&(check.node.clone(), check.service_id.clone()))
                .ok_or(StateError::MissingService)?;
            check.service_name = service.service_name.clone();
        }

        let key = (check.node.clone(), check.check_id.clone());
        let existing = self.tables.checks.get(&key).cloned();
        let Some(row) = stamp(existing.as_ref(), check, self.index) else {
            return Ok(());
        };

        self.tables.checks.insert(key.clone(), Arc::clone(&row));
        self.log.record(key, existing, Some(row));
        self.bump(Table::Checks);
        Ok(())
    }

    pub fn delete_check(&mut self, node: &str, check_id: &str) -> Result<(), StateError> {
        let key = (node.to_string(), check_id.to_string());
        let Some(existing) = self.tables.checks.remove(&key) else {
            return Ok(());
        };

        self.log.record(key, Some(existing), None);
        self.bump(Table::Checks);
        Ok(())
    }

    /// Replaces the whole CA root set if the table is still at index `cidx`.
    /// Returns `Ok(false)` when the check-and-set lost.
    pub fn ca_root_set_cas(&mut self, cidx: u64, roots: Vec<CaRoot>) -> Result<bool, StateError> {
        let active = roots.iter().filter(|r| r.active).count();
        if active != 1 {
            return Err(StateError::ActiveCaRootCount(active));
        }
        if self.tables.table_index(Table::CaRoots) != cidx {
            return Ok(false);
        }
        if roots.iter().any(|r| r.id.is_empty()) {
            return Err(StateError::MissingCaRootId);
        }

        let previous = std::mem::take(&mut self.tables.ca_roots);
        for (id, root) in &previous {
            self.log.record((id.clone(), String::new()), Some(Arc::clone(root)), None);
        }

        for mut root in roots {
            let create = previous.get(&root.id).map_or(self.index, |r| r.create_index);
            root.set_indexes(create, self.index);
            let root = Arc::new(root);
            let key = (root.id.clone(), String::new());
            self.tables.ca_roots.insert(root.id.clone(), Arc::clone(&root));
            self.log
                .record(key, previous.get(&root.id).cloned(), Some(root));
        }

        self.bump(Table::CaRoots);
        Ok(true)
    }

    /// Derives events from the recorded changes, then makes the changes
    /// visible and publishes the events. If derivation fails nothing is
    /// applied or published.
    pub fn commit(self) -> Result<(), StateError> {
        let changes = self.changes();
        if changes.changes.is_empty() {
            return Ok(());
        }

        let events = process_db_changes(&self, &changes).map_err(|err| {
            tracing::error!(index = self.index, error = %err, "event derivation failed, aborting commit");
            err
        })?;

        let WriteTxn {
            store,
            _guard,
            index,
            tables,
            ..
        } = self;

        *store.tables.write().unwrap_or_else(PoisonError::into_inner) = Arc::new(tables);
        tracing::debug!(index, events = events.len(), "committed state changes");
        store.publisher.publish(events);
        Ok(())
    }
}

impl ReadTxn for WriteTxn<'_> {
    fn node(&self, name: &str) -> Result<Option<Arc<Node>>, StateError> {
        self.tables.node(name)
    }

    fn services_by_node(&self, node: &str) -> Result<Vec<Arc<ServiceNode>>, StateError> {
        self.tables.services_by_node(node)
    }

    fn service(&self, node: &str, service_id: &str) -> Result<Option<Arc<ServiceNode>>, StateError> {
        self.tables.service(node, service_id)
    }

    fn checks_by_node(&self, node: &str) -> Result<Vec<Arc<HealthCheck>>, StateError> {
        self.tables.checks_by_node(node)
    }

    fn services_by_name(&self, name: &str, connect: bool) -> Result<Vec<Arc<ServiceNode>>, StateError> {
        self.tables.services_by_name(name, connect)
    }

    fn ca_roots(&self) -> Result<Vec<Arc<CaRoot>>, StateError> {
        self.tables.ca_roots()
    }

    fn table_index(&self, table: Table) -> u64 {
        self.tables.table_index(table)
    }
}
