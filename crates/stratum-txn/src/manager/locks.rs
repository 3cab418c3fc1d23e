//! Strict two-phase locking.
//!
//! Reads take shared table locks, writes take exclusive ones, and locks
//! are held until transaction end - except that the READ COMMITTED
//! isolation family releases a statement's read locks at statement end.
//! Deadlocks are prevented up front: a lock request that would close a
//! cycle in the waits-on graph aborts the requesting transaction instead
//! of queueing it.

use std::sync::Arc;

use stratum_catalog::name::NameRef;
use stratum_common::error::StratumResult;
use stratum_common::types::{RowActionKind, RowId, Timestamp, TxMode, Value};
use stratum_store::row::Row;
use stratum_store::store::RowStore;

use crate::action::RowAction;
use crate::manager::{TransactionManager, TxCommon};
use crate::session::Session;
use crate::statement::Statement;

/// The 2PL transaction manager.
pub struct TwoPhaseLocking {
    common: TxCommon,
}

impl TwoPhaseLocking {
    /// Creates a 2PL manager over shared state.
    #[must_use]
    pub fn new(common: TxCommon) -> Self {
        Self { common }
    }
}

impl TransactionManager for TwoPhaseLocking {
    fn mode(&self) -> TxMode {
        TxMode::Locks
    }

    fn common(&self) -> &TxCommon {
        &self.common
    }

    fn begin_action(&self, session: &Arc<Session>, stmt: &Arc<dyn Statement>) {
        let mut state = self.common.state();

        if session.is_abort_transaction() {
            return;
        }

        // a session already holding everything it needs skips the
        // waited-set computation
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
        // under locks a delete leaves the indexes immediately
        store.delete(row);

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

        let action = RowAction::delete(
            session.id(),
            table.clone(),
            store.clone(),
            row.clone(),
            timestamp,
            changed_columns.to_vec(),
        );
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
        self.common
            .rollback_actions(session, start, session.action_start_timestamp(), false);
    }

    fn commit(&self, session: &Arc<Session>) -> StratumResult<()> {
        let mut state = self.common.state();

        session.set_action_timestamp(self.common.next_timestamp());
        self.common.persist_commit(session);

        self.common.end_transaction_in(&mut state, session);
        self.common.end_transaction_tpl(&mut state, session);
        Ok(())
    }

    fn rollback(&self, session: &Arc<Session>) {
        let mut state = self.common.state();

        self.common
            .rollback_actions(session, 0, Timestamp::ZERO, false);
        self.common.end_transaction_in(&mut state, session);
        self.common.end_transaction_tpl(&mut state, session);
    }

    fn rollback_partial(&self, session: &Arc<Session>, start: usize, timestamp: Timestamp) {
        self.common.rollback_actions(session, start, timestamp, false);
    }

    fn is_row_visible(&self, _session: &Arc<Session>, _table: &NameRef, _row_id: RowId) -> bool {
        // lock ownership guarantees every indexed row is current
        true
    }
}
