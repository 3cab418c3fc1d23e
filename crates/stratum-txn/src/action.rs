//! Row actions and the per-session action log.
//!
//! Every row mutation appends to its session's ordered log; the log is
//! the commit/rollback unit. Under MVCC an action also serves as one
//! version in its row's chain, linked newest-first through `next`.
//!
//! An update is decomposed into a delete and an insert. A row inserted
//! and then deleted by the same transaction collapses into a single
//! `InsertDelete` action carrying both timestamps, so a savepoint
//! rollback can undo just the delete half.

use std::sync::Arc;

use parking_lot::RwLock;

use stratum_catalog::name::NameRef;
use stratum_common::error::StratumResult;
use stratum_common::types::{RowActionKind, RowId, SessionId, Timestamp};
use stratum_store::row::Row;
use stratum_store::store::RowStore;

/// A shared, chain-linkable row action.
pub type ActionRef = Arc<RwLock<RowAction>>;

/// One logged row mutation.
pub struct RowAction {
    /// Action kind; `None` once logically erased.
    pub kind: RowActionKind,
    /// The owning session.
    pub session: SessionId,
    /// The mutated table.
    pub table: NameRef,
    /// The store holding the row.
    pub store: Arc<dyn RowStore>,
    /// Row id or file position.
    pub row_id: RowId,
    /// The uncommitted row image, while memory-resident.
    pub memory_row: Option<Row>,
    /// Timestamp of the insert (or of the delete, for a bare delete).
    pub action_timestamp: Timestamp,
    /// Timestamp of the delete half; zero until deleted.
    pub delete_timestamp: Timestamp,
    /// Commit timestamp; zero until committed.
    pub commit_timestamp: Timestamp,
    /// Changed-column mask for updates decomposed into delete+insert.
    pub changed_columns: Vec<usize>,
    /// The next (older) version in the row's chain.
    pub next: Option<ActionRef>,
}

impl RowAction {
    /// A fresh insert action.
    #[must_use]
    pub fn insert(
        session: SessionId,
        table: NameRef,
        store: Arc<dyn RowStore>,
        row: Row,
        timestamp: Timestamp,
        changed_columns: Vec<usize>,
    ) -> ActionRef {
        Arc::new(RwLock::new(Self {
            kind: RowActionKind::Insert,
            session,
            table,
            store,
            row_id: row.id(),
            memory_row: Some(row),
            action_timestamp: timestamp,
            delete_timestamp: Timestamp::ZERO,
            commit_timestamp: Timestamp::ZERO,
            changed_columns,
            next: None,
        }))
    }

    /// A fresh delete action.
    #[must_use]
    pub fn delete(
        session: SessionId,
        table: NameRef,
        store: Arc<dyn RowStore>,
        row: Row,
        timestamp: Timestamp,
        changed_columns: Vec<usize>,
    ) -> ActionRef {
        Arc::new(RwLock::new(Self {
            kind: RowActionKind::Delete,
            session,
            table,
            store,
            row_id: row.id(),
            memory_row: Some(row),
            action_timestamp: timestamp,
            delete_timestamp: timestamp,
            commit_timestamp: Timestamp::ZERO,
            changed_columns,
            next: None,
        }))
    }

    /// Returns true while the action is uncommitted.
    #[inline]
    #[must_use]
    pub fn is_uncommitted(&self) -> bool {
        self.commit_timestamp.is_zero() && self.kind.is_live()
    }

    /// The row image, from the action or the store.
    pub fn row(&self) -> StratumResult<Option<Row>> {
        match &self.memory_row {
            Some(row) => Ok(Some(row.clone())),
            None => self.store.get(self.row_id, false),
        }
    }

    /// Logically erases the action; commit and rollback skip it.
    pub fn set_as_noop(&mut self) {
        self.kind = RowActionKind::None;
        self.memory_row = None;
        self.next = None;
    }
}

/// A per-session ordered sequence of row actions.
#[derive(Default)]
pub struct RowActionLog {
    actions: Vec<ActionRef>,
}

impl RowActionLog {
    /// Creates an empty log.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an action.
    pub fn append(&mut self, action: ActionRef) {
        self.actions.push(action);
    }

    /// The action at `index`.
    #[must_use]
    pub fn get(&self, index: usize) -> Option<&ActionRef> {
        self.actions.get(index)
    }

    /// Number of logged actions.
    #[must_use]
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    /// Returns true for the empty log.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Drops every action at or past `index`; used by savepoint
    /// rollback.
    pub fn truncate(&mut self, index: usize) {
        self.actions.truncate(index);
    }

    /// Drops every action.
    pub fn clear(&mut self) {
        self.actions.clear();
    }

    /// Iterates in append order.
    pub fn iter(&self) -> impl DoubleEndedIterator<Item = &ActionRef> {
        self.actions.iter()
    }

    /// The most recent action for a row of a table, if logged.
    #[must_use]
    pub fn find_row_action(&self, table: &NameRef, row_id: RowId) -> Option<&ActionRef> {
        self.actions.iter().rev().find(|action| {
            let action = action.read();
            action.row_id == row_id && &action.table == table && action.kind.is_live()
        })
    }
}

/// A named savepoint: an index into the row-action log plus the
/// timestamp current when it was declared.
#[derive(Debug, Clone)]
pub struct Savepoint {
    /// The savepoint's name.
    pub name: String,
    /// Log length at declaration.
    pub index: usize,
    /// Timestamp at declaration.
    pub timestamp: Timestamp,
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_catalog::name::{NameRegistry, ObjectKind};
    use stratum_common::types::Value;
    use stratum_store::cache::DataCache;
    use stratum_store::store::{HybridRowStore, StoreDef};

    fn fixture() -> (NameRef, Arc<dyn RowStore>) {
        let registry = NameRegistry::new();
        let table = registry.new_name("T1", ObjectKind::Table);
        let store: Arc<dyn RowStore> = Arc::new(HybridRowStore::new(
            StoreDef::keyed(1, vec![0], true),
            100,
            Arc::new(DataCache::new()),
            false,
        ));
        (table, store)
    }

    fn insert_action(table: &NameRef, store: &Arc<dyn RowStore>, key: i64, ts: u64) -> ActionRef {
        let row = store.add(vec![Value::Integer(key)], true).unwrap();
        store.index_row(&row).unwrap();
        RowAction::insert(
            SessionId::new(1),
            table.clone(),
            store.clone(),
            row,
            Timestamp::new(ts),
            Vec::new(),
        )
    }

    #[test]
    fn test_log_append_and_truncate() {
        let (table, store) = fixture();
        let mut log = RowActionLog::new();

        for i in 0..5 {
            log.append(insert_action(&table, &store, i, 10 + i as u64));
        }
        assert_eq!(log.len(), 5);

        log.truncate(2);
        assert_eq!(log.len(), 2);
        assert_eq!(
            log.get(1).unwrap().read().action_timestamp,
            Timestamp::new(11)
        );
    }

    #[test]
    fn test_find_row_action_prefers_latest() {
        let (table, store) = fixture();
        let mut log = RowActionLog::new();

        let first = insert_action(&table, &store, 1, 10);
        let row_id = first.read().row_id;
        log.append(first);

        let second = insert_action(&table, &store, 2, 11);
        log.append(second.clone());

        let found = log.find_row_action(&table, row_id).unwrap();
        assert_eq!(found.read().action_timestamp, Timestamp::new(10));
    }

    #[test]
    fn test_noop_actions_are_skipped() {
        let (table, store) = fixture();
        let mut log = RowActionLog::new();

        let action = insert_action(&table, &store, 1, 10);
        let row_id = action.read().row_id;
        log.append(action.clone());

        action.write().set_as_noop();
        assert!(log.find_row_action(&table, row_id).is_none());
    }

    #[test]
    fn test_uncommitted_flag() {
        let (table, store) = fixture();
        let action = insert_action(&table, &store, 1, 10);
        assert!(action.read().is_uncommitted());

        action.write().commit_timestamp = Timestamp::new(12);
        assert!(!action.read().is_uncommitted());
    }
}
