use std::sync::Arc;

use anyhow::Result;

use mesh_acl::state::structs::{
    CaRoot, HealthCheck, HealthStatus, Node, NodeService, ServiceConnect, ServiceNode,
};
use mesh_acl::state::{
    process_db_changes, service_health_events_from_changes, Change, Changes, MemStore, ReadTxn, RowChange,
    StateError, Table,
};
use mesh_acl::stream::{Event, EventPublisher, Op, Payload, Topic};

fn summary(events: &[Event]) -> Vec<(Topic, String, Op)> {
    let mut out: Vec<_> = events
        .iter()
        .map(|e| match &e.payload {
            Payload::ServiceHealth(p) => (e.topic, e.key.clone(), p.op),
            other => panic!("unexpected payload {other:?}"),
        })
        .collect();
    out.sort();
    out
}

fn health(topic: Topic, key: &str, op: Op) -> (Topic, String, Op) {
    (topic, key.to_string(), op)
}

/// n1 runs web1 (web) and db1 (db), with a node check and a web check.
fn seeded() -> Result<Arc<MemStore>> {
    let store = MemStore::new(EventPublisher::default());
    let mut tx = store.write_txn(1);
    tx.ensure_node(Node::new("n1", "10.0.0.1"))?;
    tx.ensure_service("n1", &NodeService::new("web1", "web", 80))?;
    tx.ensure_service("n1", &NodeService::new("db1", "db", 5432))?;
    tx.ensure_check(HealthCheck::node_check("n1", "serf", HealthStatus::Passing))?;
    tx.ensure_check(HealthCheck::service_check("n1", "web-check", "web1", HealthStatus::Passing))?;
    tx.commit()?;
    Ok(store)
}

#[test]
fn check_status_update_emits_one_registration() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    tx.ensure_check(HealthCheck::service_check("n1", "web-check", "web1", HealthStatus::Critical))?;

    let events = service_health_events_from_changes(&tx, &tx.changes())?;
    assert_eq!(summary(&events), vec![health(Topic::ServiceHealth, "web", Op::Create)]);
    assert_eq!(events[0].index, 2);

    let csn = events[0].payload.check_service_node().expect("service health payload");
    assert_eq!(csn.service.id, "web1");
    let statuses: Vec<_> = csn.checks.iter().map(|c| (c.check_id.as_str(), c.status)).collect();
    assert_eq!(
        statuses,
        vec![("serf", HealthStatus::Passing), ("web-check", HealthStatus::Critical)]
    );
    Ok(())
}

#[test]
fn service_rename_deregisters_old_name() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    tx.ensure_service("n1", &NodeService::new("web1", "frontend", 80))?;

    let events = service_health_events_from_changes(&tx, &tx.changes())?;
    assert_eq!(
        summary(&events),
        vec![
            health(Topic::ServiceHealth, "frontend", Op::Create),
            health(Topic::ServiceHealth, "web", Op::Delete),
        ]
    );

    let dereg = events.iter().find(|e| e.key == "web").expect("deregistration");
    let csn = dereg.payload.check_service_node().expect("service health payload");
    assert_eq!(csn.node.node, "n1");
    assert!(csn.node.address.is_empty());
    assert!(csn.checks.is_empty());
    Ok(())
}

#[test]
fn node_change_regenerates_every_service_on_it() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    tx.ensure_node(Node::new("n1", "10.0.0.2"))?;

    let events = service_health_events_from_changes(&tx, &tx.changes())?;
    assert_eq!(
        summary(&events),
        vec![
            health(Topic::ServiceHealth, "db", Op::Create),
            health(Topic::ServiceHealth, "web", Op::Create),
        ]
    );
    for event in &events {
        let csn = event.payload.check_service_node().expect("service health payload");
        assert_eq!(csn.node.address, "10.0.0.2");
    }
    Ok(())
}

#[test]
fn check_and_node_change_in_one_batch_emit_once_per_service() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    tx.ensure_check(HealthCheck::service_check("n1", "web-check", "web1", HealthStatus::Warning))?;
    tx.ensure_node(Node::new("n1", "10.0.0.3"))?;

    let events = service_health_events_from_changes(&tx, &tx.changes())?;
    assert_eq!(
        summary(&events),
        vec![
            health(Topic::ServiceHealth, "db", Op::Create),
            health(Topic::ServiceHealth, "web", Op::Create),
        ]
    );
    Ok(())
}

#[test]
fn check_node_and_rename_in_one_batch_emit_once_per_service() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    tx.ensure_check(HealthCheck::service_check("n1", "web-check", "web1", HealthStatus::Critical))?;
    tx.ensure_node(Node::new("n1", "10.0.0.3"))?;
    tx.ensure_service("n1", &NodeService::new("web1", "frontend", 80))?;

    let events = service_health_events_from_changes(&tx, &tx.changes())?;
    assert_eq!(
        summary(&events),
        vec![
            health(Topic::ServiceHealth, "db", Op::Create),
            health(Topic::ServiceHealth, "frontend", Op::Create),
            health(Topic::ServiceHealth, "web", Op::Delete),
        ]
    );

    let frontend = events.iter().find(|e| e.key == "frontend").expect("registration");
    let csn = frontend.payload.check_service_node().expect("service health payload");
    assert_eq!(csn.node.address, "10.0.0.3");
    Ok(())
}

#[test]
fn unchanged_write_emits_nothing() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    tx.ensure_node(Node::new("n1", "10.0.0.1"))?;
    tx.ensure_service("n1", &NodeService::new("web1", "web", 80))?;

    let changes = tx.changes();
    assert!(changes.changes.is_empty());
    assert!(service_health_events_from_changes(&tx, &changes)?.is_empty());
    Ok(())
}

#[test]
fn deleting_service_deregisters_it() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    tx.delete_service("n1", "web1")?;

    let events = service_health_events_from_changes(&tx, &tx.changes())?;
    assert_eq!(summary(&events), vec![health(Topic::ServiceHealth, "web", Op::Delete)]);
    assert!(tx.checks_by_node("n1")?.iter().all(|c| c.check_id != "web-check"));
    Ok(())
}

#[test]
fn deleting_node_deregisters_all_of_its_services() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    tx.delete_node("n1")?;

    let events = service_health_events_from_changes(&tx, &tx.changes())?;
    assert_eq!(
        summary(&events),
        vec![
            health(Topic::ServiceHealth, "db", Op::Delete),
            health(Topic::ServiceHealth, "web", Op::Delete),
        ]
    );
    Ok(())
}

#[test]
fn proxy_registration_is_copied_to_connect_topic() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    tx.ensure_service("n1", &NodeService::connect_proxy("web-proxy", "web-sidecar-proxy", "web"))?;

    let events = service_health_events_from_changes(&tx, &tx.changes())?;
    assert_eq!(
        summary(&events),
        vec![
            health(Topic::ServiceHealth, "web-sidecar-proxy", Op::Create),
            health(Topic::ServiceHealthConnect, "web", Op::Create),
        ]
    );
    Ok(())
}

#[test]
fn proxy_destination_change_moves_connect_registration() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    tx.ensure_service("n1", &NodeService::connect_proxy("web-proxy", "web-sidecar-proxy", "web"))?;
    tx.commit()?;

    let mut tx = store.write_txn(3);
    tx.ensure_service("n1", &NodeService::connect_proxy("web-proxy", "web-sidecar-proxy", "db"))?;

    let events = service_health_events_from_changes(&tx, &tx.changes())?;
    assert_eq!(
        summary(&events),
        vec![
            health(Topic::ServiceHealth, "web-sidecar-proxy", Op::Create),
            health(Topic::ServiceHealthConnect, "db", Op::Create),
            health(Topic::ServiceHealthConnect, "web", Op::Delete),
        ]
    );
    Ok(())
}

#[test]
fn connect_native_service_is_keyed_by_its_own_name() -> Result<()> {
    let store = seeded()?;
    let mut tx = store.write_txn(2);
    let native = NodeService {
        connect: ServiceConnect { native: true },
        ..NodeService::new("api1", "api", 8080)
    };
    tx.ensure_service("n1", &native)?;

    let events = service_health_events_from_changes(&tx, &tx.changes())?;
    assert_eq!(
        summary(&events),
        vec![
            health(Topic::ServiceHealth, "api", Op::Create),
            health(Topic::ServiceHealthConnect, "api", Op::Create),
        ]
    );
    Ok(())
}

/// A read view with no rows at all, used to feed inconsistent change sets.
struct EmptyView;

impl ReadTxn for EmptyView {
    fn node(&self, _: &str) -> Result<Option<Arc<Node>>, StateError> {
        Ok(None)
    }
    fn services_by_node(&self, _: &str) -> Result<Vec<Arc<ServiceNode>>, StateError> {
        Ok(Vec::new())
    }
    fn service(&self, _: &str, _: &str) -> Result<Option<Arc<ServiceNode>>, StateError> {
        Ok(None)
    }
    fn checks_by_node(&self, _: &str) -> Result<Vec<Arc<HealthCheck>>, StateError> {
        Ok(Vec::new())
    }
    fn services_by_name(&self, _: &str, _: bool) -> Result<Vec<Arc<ServiceNode>>, StateError> {
        Ok(Vec::new())
    }
    fn ca_roots(&self) -> Result<Vec<Arc<CaRoot>>, StateError> {
        Ok(Vec::new())
    }
    fn table_index(&self, _: Table) -> u64 {
        0
    }
}

#[test]
fn service_change_without_node_row_fails_the_pass() {
    let sn = NodeService::new("web1", "web", 80).to_service_node("ghost");
    let changes = Changes {
        index: 7,
        changes: vec![Change::Service(RowChange {
            before: None,
            after: Some(Arc::new(sn)),
        })],
    };

    assert_eq!(
        service_health_events_from_changes(&EmptyView, &changes).err(),
        Some(StateError::MissingNode)
    );
    assert_eq!(process_db_changes(&EmptyView, &changes).err(), Some(StateError::MissingNode));
}

#[test]
fn check_change_without_service_row_fails_the_pass() {
    struct NodeOnly;
    impl ReadTxn for NodeOnly {
        fn node(&self, name: &str) -> Result<Option<Arc<Node>>, StateError> {
            Ok(Some(Arc::new(Node::new(name, "10.0.0.9"))))
        }
        fn services_by_node(&self, node: &str) -> Result<Vec<Arc<ServiceNode>>, StateError> {
            EmptyView.services_by_node(node)
        }
        fn service(&self, node: &str, id: &str) -> Result<Option<Arc<ServiceNode>>, StateError> {
            EmptyView.service(node, id)
        }
        fn checks_by_node(&self, node: &str) -> Result<Vec<Arc<HealthCheck>>, StateError> {
            EmptyView.checks_by_node(node)
        }
        fn services_by_name(&self, name: &str, connect: bool) -> Result<Vec<Arc<ServiceNode>>, StateError> {
            EmptyView.services_by_name(name, connect)
        }
        fn ca_roots(&self) -> Result<Vec<Arc<CaRoot>>, StateError> {
            EmptyView.ca_roots()
        }
        fn table_index(&self, table: Table) -> u64 {
            EmptyView.table_index(table)
        }
    }

    let check = HealthCheck::service_check("n1", "web-check", "web1", HealthStatus::Passing);
    let changes = Changes {
        index: 7,
        changes: vec![Change::Check(RowChange {
            before: None,
            after: Some(Arc::new(check)),
        })],
    };

    assert_eq!(
        service_health_events_from_changes(&NodeOnly, &changes).err(),
        Some(StateError::MissingService)
    );
}

#[test]
fn ensure_rejects_rows_without_parents() -> Result<()> {
    let store = MemStore::new(EventPublisher::default());
    let mut tx = store.write_txn(1);

    assert_eq!(
        tx.ensure_service("n1", &NodeService::new("web1", "web", 80)).err(),
        Some(StateError::MissingNode)
    );
    tx.ensure_node(Node::new("n1", "10.0.0.1"))?;
    assert_eq!(
        tx.ensure_check(HealthCheck::service_check("n1", "c", "web1", HealthStatus::Passing)).err(),
        Some(StateError::MissingService)
    );
    Ok(())
}
