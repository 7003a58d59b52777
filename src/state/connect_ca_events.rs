use std::sync::Arc;

use super::structs::CaRoot;
use super::{Change, Changes, ReadDb, ReadTxn, StateError, Table};
use crate::stream::{CaRootsPayload, Event, Payload, SnapshotAppender, SnapshotFunc, SubscribeRequest, Topic};

fn ca_roots_event(tx: &dyn ReadTxn, index: u64) -> Result<Event, StateError> {
    let roots = tx.ca_roots()?.iter().map(|root| CaRoot::clone(root)).collect();

    Ok(Event {
        topic: Topic::CaRoots,
        key: String::new(),
        index,
        payload: Payload::CaRoots(CaRootsPayload { roots }),
    })
}

/// One event with the full root list whenever the CA roots table changed.
pub fn ca_roots_change_events(tx: &dyn ReadTxn, changes: &Changes) -> Result<Vec<Event>, StateError> {
    let roots_changed = changes
        .changes
        .iter()
        .any(|change| matches!(change, Change::CaRoot(_)));
    if !roots_changed {
        return Ok(Vec::new());
    }

    Ok(vec![ca_roots_event(tx, changes.index)?])
}

/// Snapshot handler for the CA roots topic. Always appends exactly one
/// event, with an empty list if no roots were ever set.
pub fn ca_roots_snapshot<D: ReadDb + 'static>(db: D) -> SnapshotFunc {
    Arc::new(move |_: &SubscribeRequest, buf: &mut dyn SnapshotAppender| {
        let tx = db.read_txn()?;
        let index = tx.table_index(Table::CaRoots);
        buf.append(vec![ca_roots_event(&tx, index)?]);
        Ok(index)
    })
}
