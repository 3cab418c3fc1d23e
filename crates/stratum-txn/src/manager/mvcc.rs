//! Multi-version concurrency control.
//!
//! No data locks. Each uncommitted write sits at the head of its row's
//! version chain; readers walk the chain and take the newest version
//! whose commit timestamp their isolation admits. Write-write conflicts
//! against an uncommitted writer either park the session behind the
//! holder or abort it, per configuration; a conflict against a version
//! committed after the transaction began is detected at commit and
//! surfaced as `SERIALIZATION_FAILURE`. A single catalog-write session
//! serialises DDL, gating every other session while it runs.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::Mutex;
use tracing::debug;

use stratum_catalog::name::NameRef;
use stratum_common::error::{StratumError, StratumResult};
use stratum_common::types::{IsolationLevel, RowActionKind, RowId, Timestamp, TxMode, Value};
use stratum_store::row::Row;
use stratum_store::store::RowStore;

use crate::action::{ActionRef, RowAction};
use crate::manager::{check_deadlock, TransactionManager, TxCommon};
use crate::session::Session;
use crate::statement::Statement;

/// Per-row version chains, keyed by `(table identity, row id)`.
#[derive(Default)]
pub struct VersionMap {
    chains: DashMap<(u64, u64), ActionRef>,
}

impl VersionMap {
    /// Creates an empty map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn key(table: &NameRef, row_id: RowId) -> (u64, u64) {
        (table.id(), row_id.as_u64())
    }

    /// The chain head for a row, if tracked.
    #[must_use]
    pub fn head(&self, table: &NameRef, row_id: RowId) -> Option<ActionRef> {
        self.chains
            .get(&Self::key(table, row_id))
            .map(|entry| entry.clone())
    }

    /// Links an action as the new chain head.
    pub fn link_head(&self, table: &NameRef, row_id: RowId, action: ActionRef) {
        let key = Self::key(table, row_id);
        if let Some(old) = self.chains.insert(key, action.clone()) {
            action.write().next = Some(old);
        }
    }

    /// Number of tracked rows.
    #[must_use]
    pub fn chain_count(&self) -> usize {
        self.chains.len()
    }

    /// Drops erased actions from a chain and merges it away entirely
    /// once every version is committed below the oldest live
    /// transaction timestamp.
    pub fn cleanup(&self, table: &NameRef, row_id: RowId, oldest_live: Timestamp) {
        let key = Self::key(table, row_id);

        let Some(head) = self.chains.get(&key).map(|entry| entry.clone()) else {
            return;
        };

        // drop leading no-ops
        let mut new_head = Some(head);
        while let Some(action_ref) = new_head.clone() {
            let action = action_ref.read();
            if action.kind.is_live() {
                break;
            }
            new_head = action.next.clone();
        }

        let Some(new_head) = new_head else {
            self.chains.remove(&key);
            return;
        };

        // fully merged chains are forgotten
        let mut merged = true;
        let mut current = Some(new_head.clone());
        while let Some(action_ref) = current {
            let action = action_ref.read();
            if action.kind.is_live()
                && (action.commit_timestamp.is_zero() || action.commit_timestamp >= oldest_live)
            {
                merged = false;
            }
            current = action.next.clone();
        }

        if merged {
            self.chains.remove(&key);
        } else {
            self.chains.insert(key, new_head);
        }
    }
}

/// Walks a row's version chain and decides visibility for a reader.
///
/// Own writes always apply. A committed action applies when the reader's
/// isolation admits its commit timestamp: always under READ COMMITTED,
/// only within the snapshot under REPEATABLE READ and SERIALIZABLE (and
/// for read-only multi-version transactions). A row whose creation is
/// skipped as too new is invisible; a row whose deletion is skipped is
/// still visible.
#[must_use]
pub fn is_visible(
    versions: &VersionMap,
    session: &Arc<Session>,
    table: &NameRef,
    row_id: RowId,
    mode: TxMode,
) -> bool {
    let Some(head) = versions.head(table, row_id) else {
        return true;
    };

    let snapshot_read = matches!(
        session.isolation(),
        IsolationLevel::RepeatableRead | IsolationLevel::Serializable
    ) || (mode == TxMode::MvLocks && session.is_read_only());

    let mut skipped_creation = false;
    let mut current = Some(head);

    while let Some(action_ref) = current {
        let action = action_ref.read();
        let next = action.next.clone();

        if action.kind.is_live() {
            if action.session == session.id() {
                return action.kind == RowActionKind::Insert;
            }

            if !action.commit_timestamp.is_zero() {
                let within = !snapshot_read
                    || action.commit_timestamp <= session.transaction_timestamp();
                if within {
                    return action.kind == RowActionKind::Insert;
                }
            }

            skipped_creation = matches!(
                action.kind,
                RowActionKind::Insert | RowActionKind::InsertDelete
            );
        }

        drop(action);
        current = next;
    }

    !skipped_creation
}

/// The MVCC transaction manager.
pub struct Mvcc {
    common: TxCommon,
    versions: Arc<VersionMap>,
    catalog_write_session: Mutex<Option<Arc<Session>>>,
    locked_mode: AtomicBool,
}

impl Mvcc {
    /// Creates an MVCC manager over shared state.
    #[must_use]
    pub fn new(common: TxCommon) -> Self {
        Self {
            common,
            versions: Arc::new(VersionMap::new()),
            catalog_write_session: Mutex::new(None),
            locked_mode: AtomicBool::new(false),
        }
    }

    /// The version-chain map; shared with tests.
    #[must_use]
    pub fn versions(&self) -> &Arc<VersionMap> {
        &self.versions
    }

    /// Wakes every session parked behind this one.
    fn release_waiters(&self, session: &Arc<Session>) {
        for waiter in session.take_waiting_sessions() {
            let waited = waiter.take_waited_sessions();
            let remaining: Vec<Arc<Session>> = waited
                .into_iter()
                .filter(|s| s.id() != session.id())
                .collect();
            waiter.set_waited_sessions(remaining);
            waiter.latch.count_down();
        }
    }

    /// Ends a catalog-write reservation held by this session.
    fn release_catalog_lock(&self, session: &Arc<Session>) {
        let mut catalog = self.catalog_write_session.lock();
        if catalog.as_ref().is_some_and(|s| s.id() == session.id()) {
            *catalog = None;
            self.locked_mode.store(false, Ordering::SeqCst);
        }
    }

    /// Commit-time validation: a delete over a version committed after
    /// this transaction began is a lost update.
    fn prepare_commit(&self, session: &Arc<Session>) -> bool {
        for action_ref in session.action_snapshot() {
            let action = action_ref.read();
            if !matches!(
                action.kind,
                RowActionKind::Delete | RowActionKind::InsertDelete
            ) {
                continue;
            }

            let mut current = action.next.clone();
            while let Some(older_ref) = current {
                let older = older_ref.read();
                if older.kind.is_live()
                    && older.session != session.id()
                    && !older.commit_timestamp.is_zero()
                    && older.commit_timestamp > session.transaction_timestamp()
                {
                    return false;
                }
                current = older.next.clone();
            }
        }
        true
    }

    /// The `(table, row)` pairs touched at or past `start`, captured
    /// before the log is truncated.
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

impl TransactionManager for Mvcc {
    fn mode(&self) -> TxMode {
        TxMode::Mvcc
    }

    fn common(&self) -> &TxCommon {
        &self.common
    }

    fn begin_action(&self, session: &Arc<Session>, stmt: &Arc<dyn Statement>) {
        let mut state = self.common.state();

        if session.is_abort_transaction() {
            return;
        }

        if stmt.is_catalog_change() {
            let mut catalog = self.catalog_write_session.lock();
            let holder = catalog.clone();
            match holder {
                Some(holder) if holder.id() != session.id() => {
                    // queue behind the current catalog writer
                    drop(catalog);
                    session.set_temp_set(vec![holder]);
                    self.common.set_waiting_session(session);
                }
                _ => {
                    *catalog = Some(session.clone());
                    self.locked_mode.store(true, Ordering::SeqCst);
                    drop(catalog);

                    // DDL waits out every other transacting session
                    if self
                        .common
                        .set_waited_sessions(&mut state, session, stmt.as_ref())
                        && !session.temp_set_is_empty()
                    {
                        self.common.set_waiting_session(session);
                    }
                }
            }
            return;
        }

        if self.locked_mode.load(Ordering::SeqCst) {
            let holder = self.catalog_write_session.lock().clone();
            if let Some(holder) = holder {
                if holder.id() != session.id() {
                    session.set_temp_set(vec![holder]);
                    self.common.set_waiting_session(session);
                }
            }
        }

        // data operations take no locks
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
        // the state lock serialises conflict checks against commits
        let _state = self.common.state();
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

        // write-write conflict against an uncommitted foreign writer
        let foreign_holder = self.versions.head(table, row.id()).and_then(|head| {
            let action = head.read();
            if action.kind.is_live()
                && action.session != session.id()
                && action.commit_timestamp.is_zero()
            {
                self.common.sessions().get(action.session)
            } else {
                None
            }
        });

        if let Some(holder) = foreign_holder {
            let can_wait = session.isolation().holds_read_locks()
                && !self.common.config().tx_conflict_rollback;

            if can_wait && check_deadlock(session, std::slice::from_ref(&holder)) {
                debug!(
                    session = %session.id(),
                    holder = %holder.id(),
                    "write conflict, waiting for holder"
                );
                session.set_redo_action(true);
                session.set_temp_set(vec![holder]);
                self.common.set_waiting_session(session);
                return Err(StratumError::StatementAborted {
                    session_id: session.id(),
                });
            }

            session.set_abort_transaction(true);
            return Err(StratumError::SerializationFailure {
                session_id: session.id(),
            });
        }

        // deletes are deferred: the row stays indexed until commit
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

    fn complete_actions(&self, _session: &Arc<Session>) {
        // no statement-end lock release under MVCC
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

        if !self.prepare_commit(session) {
            debug!(session = %session.id(), "commit validation failed");
            return Err(StratumError::SerializationFailure {
                session_id: session.id(),
            });
        }

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

        // wake conflict and catalog waiters before the lock drops so a
        // late waiter cannot enqueue behind a finished transaction
        self.release_catalog_lock(session);
        self.release_waiters(session);
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

        self.release_catalog_lock(session);
        self.release_waiters(session);
    }

    fn rollback_partial(&self, session: &Arc<Session>, start: usize, timestamp: Timestamp) {
        let touched = Self::touched_rows(session, start);
        self.common
            .rollback_actions(session, start, timestamp, true);
        self.cleanup_chains(&touched, self.common.first_live_transaction_timestamp());
    }

    fn is_row_visible(&self, session: &Arc<Session>, table: &NameRef, row_id: RowId) -> bool {
        is_visible(&self.versions, session, table, row_id, TxMode::Mvcc)
    }
}
