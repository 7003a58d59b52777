use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use super::structs::{CheckServiceNode, EnterpriseMeta, HealthCheck, Node, ServiceKind, ServiceNode};
use super::{Change, ChangeType, Changes, ReadDb, ReadTxn, RowChange, StateError, Table};
use crate::stream::{Event, Op, Payload, ServiceHealthPayload, SnapshotAppender, SnapshotFunc, SubscribeRequest, Topic};

/// Identifies a service instance that needs its health event regenerated.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
struct NodeServiceTuple {
    node: String,
    service_id: String,
    enterprise_meta: EnterpriseMeta,
}

impl NodeServiceTuple {
    fn new(node: &str, service_id: &str, enterprise_meta: &EnterpriseMeta) -> Self {
        Self {
            node: node.to_string(),
            service_id: service_id.to_string(),
            enterprise_meta: enterprise_meta.clone(),
        }
    }
}

/// Nodes and service instances touched by a change set.
#[derive(Default)]
struct DirtySet<'a> {
    nodes: BTreeMap<String, ChangeType>,
    services: BTreeMap<NodeServiceTuple, Option<&'a RowChange<ServiceNode>>>,
}

impl<'a> DirtySet<'a> {
    /// A real node change replaces an indirect mark; an indirect mark never
    /// replaces anything.
    fn mark_node(&mut self, node: &str, change_type: ChangeType) {
        let entry = self.nodes.entry(node.to_string()).or_insert(ChangeType::Indirect);
        if *entry == ChangeType::Indirect {
            *entry = change_type;
        }
    }

    /// The first recorded service row change for a tuple is kept.
    fn mark_service(&mut self, tuple: NodeServiceTuple, change: Option<&'a RowChange<ServiceNode>>) {
        let entry = self.services.entry(tuple).or_insert(None);
        if entry.is_none() {
            *entry = change;
        }
    }

    fn mark_check(&mut self, change: &RowChange<HealthCheck>) {
        match (&change.before, &change.after) {
            (Some(before), Some(after)) => {
                // Moving between node and service scope changes the checks of
                // every service on the node.
                if before.is_node_check() || after.is_node_check() {
                    self.mark_node(&after.node, ChangeType::Indirect);
                    return;
                }
                self.mark_service(
                    NodeServiceTuple::new(&after.node, &after.service_id, &after.enterprise_meta),
                    None,
                );
                // The old service lost a check.
                if before.service_id != after.service_id {
                    self.mark_service(
                        NodeServiceTuple::new(&before.node, &before.service_id, &before.enterprise_meta),
                        None,
                    );
                }
            }
            _ => {
                let Some(check) = change.object() else { return };
                if check.is_node_check() {
                    self.mark_node(&check.node, ChangeType::Indirect);
                } else {
                    self.mark_service(
                        NodeServiceTuple::new(&check.node, &check.service_id, &check.enterprise_meta),
                        None,
                    );
                }
            }
        }
    }
}

/// Derives service health (and connect) events for one committed change set.
pub fn service_health_events_from_changes(tx: &dyn ReadTxn, changes: &Changes) -> Result<Vec<Event>, StateError> {
    let mut dirty = DirtySet::default();

    for change in &changes.changes {
        match change {
            Change::Node(c) => {
                if let Some(node) = c.object() {
                    dirty.mark_node(&node.node, c.change_type());
                }
            }
            Change::Service(c) => {
                if let Some(sn) = c.object() {
                    dirty.mark_service(NodeServiceTuple::new(&sn.node, &sn.service_id, &sn.enterprise_meta), Some(c));
                }
            }
            Change::Check(c) => dirty.mark_check(c),
            Change::CaRoot(_) => {}
        }
    }

    let mut events = Vec::new();

    for (node, change_type) in &dirty.nodes {
        // A deleted node's services produce their own deregistrations.
        if *change_type == ChangeType::Delete {
            continue;
        }
        events.extend(service_health_events_for_node(tx, changes.index, node)?);
    }

    for (tuple, change) in &dirty.services {
        if let Some(change) = change {
            match (&change.before, &change.after) {
                (Some(before), None) => {
                    events.push(deregister_event(changes.index, before));
                    continue;
                }
                (Some(before), Some(after)) => {
                    if before.service_name != after.service_name {
                        events.push(deregister_event(changes.index, before));
                    }
                    if before.service_kind == ServiceKind::ConnectProxy
                        && before.service_proxy.destination_service_name
                            != after.service_proxy.destination_service_name
                    {
                        // Only the old destination's connect subscribers need
                        // to forget this proxy.
                        let dereg = deregister_event(changes.index, before);
                        events.extend(service_health_to_connect_events(std::slice::from_ref(&dereg)));
                    }
                }
                _ => {}
            }
        }

        if dirty.nodes.contains_key(&tuple.node) {
            continue;
        }
        events.push(service_health_event_for_service(tx, changes.index, tuple)?);
    }

    let connect_events = service_health_to_connect_events(&events);
    events.extend(connect_events);

    Ok(events)
}

/// Copies events for connect proxies and connect-native services onto the
/// connect topic. Proxy events are keyed by their destination service.
fn service_health_to_connect_events(events: &[Event]) -> Vec<Event> {
    events
        .iter()
        .filter(|event| event.topic == Topic::ServiceHealth)
        .filter_map(|event| {
            let csn = event.payload.check_service_node()?;
            let key = csn.service.connect_name()?.to_string();
            Some(Event {
                topic: Topic::ServiceHealthConnect,
                key,
                ..event.clone()
            })
        })
        .collect()
}

/// The node row plus its checks, split into node-level and per-service.
struct NodeChecks {
    node: Arc<Node>,
    node_checks: Vec<Arc<HealthCheck>>,
    service_checks: HashMap<String, Vec<Arc<HealthCheck>>>,
}

impl NodeChecks {
    fn load(tx: &dyn ReadTxn, node: &str) -> Result<Self, StateError> {
        let node = tx.node(node)?.ok_or(StateError::MissingNode)?;

        let mut node_checks = Vec::new();
        let mut service_checks: HashMap<String, Vec<Arc<HealthCheck>>> = HashMap::new();
        for check in tx.checks_by_node(&node.node)? {
            if check.is_node_check() {
                node_checks.push(check);
            } else {
                service_checks.entry(check.service_id.clone()).or_default().push(check);
            }
        }

        Ok(Self {
            node,
            node_checks,
            service_checks,
        })
    }

    fn for_service(&self, service_id: &str) -> Vec<HealthCheck> {
        self.node_checks
            .iter()
            .chain(self.service_checks.get(service_id).into_iter().flatten())
            .map(|check| HealthCheck::clone(check))
            .collect()
    }

    fn check_service_node(&self, sn: &ServiceNode) -> CheckServiceNode {
        CheckServiceNode {
            node: Node::clone(&self.node),
            service: sn.to_node_service(),
            checks: self.for_service(&sn.service_id),
        }
    }
}

fn service_health_events_for_node(tx: &dyn ReadTxn, index: u64, node: &str) -> Result<Vec<Event>, StateError> {
    let services = tx.services_by_node(node)?;
    let checks = NodeChecks::load(tx, node)?;

    Ok(services
        .iter()
        .map(|sn| register_event(index, checks.check_service_node(sn)))
        .collect())
}

fn service_health_event_for_service(
    tx: &dyn ReadTxn,
    index: u64,
    tuple: &NodeServiceTuple,
) -> Result<Event, StateError> {
    let checks = NodeChecks::load(tx, &tuple.node)?;
    let sn = tx
        .service(&tuple.node, &tuple.service_id)?
        .ok_or(StateError::MissingService)?;

    Ok(register_event(index, checks.check_service_node(&sn)))
}

fn register_event(index: u64, csn: CheckServiceNode) -> Event {
    Event {
        topic: Topic::ServiceHealth,
        key: csn.service.service.clone(),
        index,
        payload: Payload::ServiceHealth(ServiceHealthPayload {
            op: Op::Create,
            value: csn,
        }),
    }
}

/// Only the node name is known for a deregistration; the node row may
/// already be gone.
fn deregister_event(index: u64, sn: &ServiceNode) -> Event {
    let csn = CheckServiceNode {
        node: Node {
            node: sn.node.clone(),
            ..Default::default()
        },
        service: sn.to_node_service(),
        checks: Vec::new(),
    };

    Event {
        topic: Topic::ServiceHealth,
        key: sn.service_name.clone(),
        index,
        payload: Payload::ServiceHealth(ServiceHealthPayload {
            op: Op::Delete,
            value: csn,
        }),
    }
}

/// Current health of every instance of `service`, with the index the read
/// reflects. With `connect`, the proxies for `service` and its
/// connect-native instances.
pub(crate) fn check_service_nodes(
    tx: &dyn ReadTxn,
    service: &str,
    connect: bool,
) -> Result<(u64, Vec<CheckServiceNode>), StateError> {
    let index = [Table::Nodes, Table::Services, Table::Checks]
        .into_iter()
        .map(|table| tx.table_index(table))
        .max()
        .unwrap_or(0);

    let mut by_node: HashMap<String, NodeChecks> = HashMap::new();
    let mut results = Vec::new();
    for sn in tx.services_by_name(service, connect)? {
        if !by_node.contains_key(&sn.node) {
            by_node.insert(sn.node.clone(), NodeChecks::load(tx, &sn.node)?);
        }
        if let Some(checks) = by_node.get(&sn.node) {
            results.push(checks.check_service_node(&sn));
        }
    }

    Ok((index, results))
}

/// Snapshot handler for the service health topics. Connect snapshots are
/// keyed by the requested service, matching the live connect events.
pub fn service_health_snapshot<D: ReadDb + 'static>(db: D, topic: Topic) -> SnapshotFunc {
    let connect = topic == Topic::ServiceHealthConnect;

    Arc::new(move |req: &SubscribeRequest, buf: &mut dyn SnapshotAppender| {
        let tx = db.read_txn()?;
        let (index, nodes) = check_service_nodes(&tx, &req.key, connect)?;

        for csn in nodes {
            let key = if connect {
                csn.service.connect_name().unwrap_or(csn.service.service.as_str()).to_string()
            } else {
                csn.service.service.clone()
            };
            buf.append(vec![Event {
                topic,
                key,
                index,
                payload: Payload::ServiceHealth(ServiceHealthPayload {
                    op: Op::Create,
                    value: csn,
                }),
            }]);
        }

        Ok(index)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::structs::{HealthStatus, NodeService};
    use crate::state::MemStore;
    use crate::stream::EventPublisher;

    fn keys(events: &[Event]) -> Vec<(Topic, &str, Op)> {
        events
            .iter()
            .map(|e| {
                let op = match &e.payload {
                    Payload::ServiceHealth(p) => p.op,
                    other => panic!("unexpected payload {other:?}"),
                };
                (e.topic, e.key.as_str(), op)
            })
            .collect()
    }

    fn seeded() -> Arc<MemStore> {
        let store = MemStore::new(EventPublisher::default());
        let mut tx = store.write_txn(1);
        tx.ensure_node(Node::new("n1", "10.0.0.1")).unwrap();
        tx.ensure_service("n1", &NodeService::new("web1", "web", 80)).unwrap();
        tx.ensure_service("n1", &NodeService::new("db1", "db", 5432)).unwrap();
        tx.ensure_check(HealthCheck::node_check("n1", "serf", HealthStatus::Passing)).unwrap();
        tx.ensure_check(HealthCheck::service_check("n1", "web-check", "web1", HealthStatus::Passing))
            .unwrap();
        tx.commit().unwrap();
        store
    }

    #[test]
    fn test_indirect_mark_never_downgrades_node_change() {
        let mut dirty = DirtySet::default();
        dirty.mark_node("n1", ChangeType::Update);
        dirty.mark_node("n1", ChangeType::Indirect);
        dirty.mark_node("n2", ChangeType::Indirect);
        dirty.mark_node("n2", ChangeType::Delete);

        assert_eq!(dirty.nodes["n1"], ChangeType::Update);
        assert_eq!(dirty.nodes["n2"], ChangeType::Delete);
    }

    #[test]
    fn test_check_moving_to_node_scope_regenerates_node() {
        let store = seeded();
        let mut tx = store.write_txn(2);
        tx.ensure_check(HealthCheck::node_check("n1", "web-check", HealthStatus::Critical))
            .unwrap();

        let events = service_health_events_from_changes(&tx, &tx.changes()).unwrap();
        let mut got = keys(&events);
        got.sort();
        assert_eq!(
            got,
            vec![
                (Topic::ServiceHealth, "db", Op::Create),
                (Topic::ServiceHealth, "web", Op::Create),
            ]
        );
        // Node-level checks now apply to both services.
        for event in &events {
            let csn = event.payload.check_service_node().unwrap();
            assert_eq!(csn.checks.len(), 2);
        }
    }

    #[test]
    fn test_check_relinked_to_other_service_updates_both() {
        let store = seeded();
        let mut tx = store.write_txn(2);
        tx.ensure_check(HealthCheck::service_check("n1", "web-check", "db1", HealthStatus::Passing))
            .unwrap();

        let events = service_health_events_from_changes(&tx, &tx.changes()).unwrap();
        let mut got = keys(&events);
        got.sort();
        assert_eq!(
            got,
            vec![
                (Topic::ServiceHealth, "db", Op::Create),
                (Topic::ServiceHealth, "web", Op::Create),
            ]
        );
        let web = events.iter().find(|e| e.key == "web").unwrap();
        assert_eq!(web.payload.check_service_node().unwrap().checks.len(), 1);
    }

    #[test]
    fn test_snapshot_lists_current_instances() {
        let store = seeded();
        let snapshot = service_health_snapshot(Arc::clone(&store), Topic::ServiceHealth);

        let mut buf: Vec<Event> = Vec::new();
        let index = snapshot(&SubscribeRequest::new(Topic::ServiceHealth, "web"), &mut buf).unwrap();

        assert_eq!(index, 1);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf[0].key, "web");
        assert_eq!(buf[0].index, 1);
        let csn = buf[0].payload.check_service_node().unwrap();
        assert_eq!(csn.node.address, "10.0.0.1");
        assert_eq!(csn.checks.len(), 2);
    }

    #[test]
    fn test_connect_snapshot_keys_by_destination() {
        let store = seeded();
        let mut tx = store.write_txn(2);
        tx.ensure_service("n1", &NodeService::connect_proxy("web-proxy", "web-sidecar-proxy", "web"))
            .unwrap();
        tx.commit().unwrap();

        let snapshot = service_health_snapshot(Arc::clone(&store), Topic::ServiceHealthConnect);
        let mut buf: Vec<Event> = Vec::new();
        let index = snapshot(&SubscribeRequest::new(Topic::ServiceHealthConnect, "web"), &mut buf).unwrap();

        assert_eq!(index, 2);
        assert_eq!(buf.len(), 1);
        assert_eq!(buf[0].topic, Topic::ServiceHealthConnect);
        assert_eq!(buf[0].key, "web");
        assert_eq!(buf[0].payload.check_service_node().unwrap().service.id, "web-proxy");
    }
}
