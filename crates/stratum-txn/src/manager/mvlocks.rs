//! Two-phase locking with multi-version reads.
//!
//! Writers follow the same lock discipline as the LOCKS mode, so
//! write-write conflicts cannot arise. Read-only transactions take no
//! read locks at all: they observe the state as of their transaction
//! timestamp through the version chains, and a row's prior version stays
//! visible until every transaction that could still see it has ended.

use std::sync::Arc;

use stratum_catalog::name::NameRef;
use stratum_common::error::StratumResult;
use stratum_common::types::{RowActionKind, RowId, Timestamp, TxMode, Value};
use stratum_store::row::Row;
use stratum_store::store::RowStore;

use crate::action::RowAction;
use crate::manager::mvcc::{is_visible, VersionMap};
use crate::manager::{TransactionManager, TxCommon};
use crate::session::Session;
use crate::statement::Statement;

/// The MV2PL transaction manager.
pub struct MultiVersion2pl {
    common: TxCommon,
    versions: Arc<VersionMap>,
}

impl MultiVersion2pl {
    /// Creates an MV2PL manager over shared state.
    #[must_use]
    pub fn new(common: TxCommon) -> Self {
        Self {
            common,
            versions: Arc::new(VersionMap::new()),
        }
    }

    /// The version-chain map; shared with tests.
    #[must_use]
    pub fn versions(&self) -> &Arc<VersionMap> {
        &self.versions
    }

    fn touched_rows(session: &Arc<Session>, start: usize) -> Vec<(NameRef, RowId)> {
        session
            .action_snapshot()
            .iter()
            .skip(start)
            .map(|action_ref| {
                let action = action_ref.read();
                (action.table.clone(), action.row_id)
            })
            .collect()
    }

    fn cleanup_chains(&self, touched: &[(NameRef, RowId)], oldest: Timestamp) {
        for (table, row_id) in touched {
            self.versions.cleanup(table, *row_id, oldest);
        }
    }
}

impl TransactionManager for MultiVersion2pl {
    fn mode(&self) -> TxMode {
        TxMode::MvLocks
    }

    fn common(&self) -> &TxCommon {
        &self.common
    }

    fn begin_action(&self, session: &Arc<Session>, stmt: &Arc<dyn Statement>) {
        let mut state = self.common.state();

        if session.is_abort_transaction() {
            return;
        }

        if !stmt.is_catalog_change()
            && state
                .locks
                .holds_locks(session.id(), stmt.read_set(), stmt.write_set())
        {
            return;
        }

        if self
            .common
            .set_waited_sessions(&mut state, session, stmt.as_ref())
        {
            if session.temp_set_is_empty() {
                self.common.lock_tables(&mut state, session, stmt.as_ref());
            } else {
                self.common.set_waiting_session(session);
            }
        }
    }

    fn begin_action_resume(&self, session: &Arc<Session>) {
        let mut state = self.common.state();

        if session.is_transaction() {
            session.set_action_timestamp(self.common.next_timestamp());
        } else {
            self.common.begin_transaction_in(&mut state, session);
        }

        session.set_action_start_timestamp(session.action_timestamp());
    }

    fn add_insert_action(
        &self,
        session: &Arc<Session>,
        table: &NameRef,
        store: &Arc<dyn RowStore>,
        data: Vec<Value>,
    ) -> StratumResult<Row> {
        let row = store.add(data, true)?;
        if let Err(e) = store.index_row(&row) {
            store.remove(&row);
            return Err(e);
        }

        let timestamp = self.common.next_timestamp();
        let action = RowAction::insert(
            session.id(),
            table.clone(),
            store.clone(),
            row.clone(),
            timestamp,
            Vec::new(),
        );
        self.versions.link_head(table, row.id(), action.clone());
        session.append_action(action);
        Ok(row)
    }

    fn add_delete_action(
        &self,
        session: &Arc<Session>,
        table: &NameRef,
        store: &Arc<dyn RowStore>,
        row: &Row,
        changed_columns: &[usize],
    ) -> StratumResult<()> {
        let timestamp = self.common.next_timestamp();

        // a row inserted by this transaction collapses to INSERT_DELETE
        if let Some(own) = session.find_own_row_action(table, row.id()) {
            let mut action = own.write();
            if action.kind == RowActionKind::Insert && action.is_uncommitted() {
                action.kind = RowActionKind::InsertDelete;
                action.delete_timestamp = timestamp;
                return Ok(());
            }
        }

        // the write lock rules out foreign writers; the delete is
        // deferred so snapshot readers keep seeing the prior version
        let action = RowAction::delete(
            session.id(),
            table.clone(),
            store.clone(),
            row.clone(),
            timestamp,
            changed_columns.to_vec(),
        );
        self.versions.link_head(table, row.id(), action.clone());
        session.append_action(action);
        Ok(())
    }

    fn complete_actions(&self, session: &Arc<Session>) {
        if let Some(stmt) = session.current_statement() {
            self.common.end_action_tpl(session, stmt.as_ref());
        }
    }

    fn rollback_action(&self, session: &Arc<Session>) {
        let start = session.action_index();
        let touched = Self::touched_rows(session, start);
        self.common
            .rollback_actions(session, start, session.action_start_timestamp(), true);
        self.cleanup_chains(&touched, self.common.first_live_transaction_timestamp());
    }

    fn commit(&self, session: &Arc<Session>) -> StratumResult<()> {
        let mut state = self.common.state();

        let commit_ts = self.common.next_timestamp();
        session.set_action_timestamp(commit_ts);

        let actions = session.action_snapshot();
        for action_ref in &actions {
            let (kind, store, row) = {
                let mut action = action_ref.write();
                action.commit_timestamp = commit_ts;
                let row = action.row().ok().flatten();
                (action.kind, action.store.clone(), row)
            };

            // a deferred delete leaves the indexes now
            if matches!(kind, RowActionKind::Delete | RowActionKind::InsertDelete) {
                if let Some(row) = &row {
                    store.delete(row);
                }
            }
        }

        self.common.persist_commit(session);
        self.common.end_transaction_in(&mut state, session);

        let oldest = state
            .live_transaction_timestamps
            .front()
            .copied()
            .unwrap_or(Timestamp::MAX);
        for action_ref in &actions {
            let (table, row_id) = {
                let action = action_ref.read();
                (action.table.clone(), action.row_id)
            };
            self.versions.cleanup(&table, row_id, oldest);
        }

        self.common.end_transaction_tpl(&mut state, session);
        Ok(())
    }

    fn rollback(&self, session: &Arc<Session>) {
        let mut state = self.common.state();

        let touched = Self::touched_rows(session, 0);
        self.common
            .rollback_actions(session, 0, Timestamp::ZERO, true);
        self.common.end_transaction_in(&mut state, session);

        let oldest = state
            .live_transaction_timestamps
            .front()
            .copied()
            .unwrap_or(Timestamp::MAX);
        self.cleanup_chains(&touched, oldest);

        self.common.end_transaction_tpl(&mut state, session);
    }

    fn rollback_partial(&self, session: &Arc<Session>, start: usize, timestamp: Timestamp) {
        let touched = Self::touched_rows(session, start);
        self.common
            .rollback_actions(session, start, timestamp, true);
        self.cleanup_chains(&touched, self.common.first_live_transaction_timestamp());
    }

    fn is_row_visible(&self, session: &Arc<Session>, table: &NameRef, row_id: RowId) -> bool {
        is_visible(&self.versions, session, table, row_id, TxMode::MvLocks)
    }
}
