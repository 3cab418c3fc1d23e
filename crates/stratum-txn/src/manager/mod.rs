//! Transaction managers.
//!
//! One manager is active per database, in one of three modes:
//!
//! - [`locks::TwoPhaseLocking`] - strict 2PL with table-level locks
//! - [`mvlocks::MultiVersion2pl`] - 2PL for writers, multi-version reads
//!   for read-only transactions
//! - [`mvcc::Mvcc`] - no data locks, per-row version chains, write-write
//!   conflict detection
//!
//! All three share [`TxCommon`]: the global change timestamp, the live
//! transaction deque, the transaction count and the lock table, guarded
//! by a single mutex. Sessions never block while holding it; the only
//! suspension point is a session parking on its own latch inside the
//! begin-action loop.

pub mod locks;
pub mod mvcc;
pub mod mvlocks;

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::{Mutex, MutexGuard};
use tracing::{debug, warn};

use stratum_catalog::name::NameRef;
use stratum_common::config::DatabaseConfig;
use stratum_common::error::StratumResult;
use stratum_common::types::{RowActionKind, RowId, SessionId, Timestamp, TxMode, Value};
use stratum_store::row::Row;
use stratum_store::store::RowStore;

use crate::action::ActionRef;
use crate::lock::LockTable;
use crate::session::{Session, SessionManager};
use crate::statement::Statement;

/// The durability escape hatch: commit markers and statement events are
/// handed to the logger; failures are warned about, never fatal.
pub trait CommitLog: Send + Sync {
    /// Appends a commit marker for the session.
    fn write_commit_statement(&self, session: SessionId) -> StratumResult<()>;

    /// Appends a sequence-advance record.
    fn write_sequence_statement(&self, session: SessionId, sequence: &NameRef) -> StratumResult<()>;

    /// Records a statement event at the given level.
    fn log_statement_event(&self, session: SessionId, detail: &str);

    /// Whether enough has accumulated to warrant a checkpoint.
    fn needs_checkpoint_reset(&self) -> bool {
        false
    }
}

/// A logger that drops everything; the default for embedded use.
#[derive(Debug, Default)]
pub struct NoopCommitLog;

impl CommitLog for NoopCommitLog {
    fn write_commit_statement(&self, _session: SessionId) -> StratumResult<()> {
        Ok(())
    }

    fn write_sequence_statement(
        &self,
        _session: SessionId,
        _sequence: &NameRef,
    ) -> StratumResult<()> {
        Ok(())
    }

    fn log_statement_event(&self, _session: SessionId, _detail: &str) {}
}

/// LOB reference counting hook, adjusted during the commit pipeline for
/// rows of LOB-bearing tables.
pub trait LobUsage: Send + Sync {
    /// Adjusts the reference count of the LOBs in a row.
    fn adjust_usage(&self, table: &NameRef, row: &Row, delta: i64);

    /// Whether the table carries LOB columns at all.
    fn table_has_lobs(&self, table: &NameRef) -> bool {
        false
    }
}

/// A LOB hook that tracks nothing.
#[derive(Debug, Default)]
pub struct NoopLobUsage;

impl LobUsage for NoopLobUsage {
    fn adjust_usage(&self, _table: &NameRef, _row: &Row, _delta: i64) {}
}

/// Session-reset modes for cancel, timeout and close-from-elsewhere.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResetMode {
    /// Close the target's open result sets.
    Results,
    /// Clear the target's statement-local tables.
    Tables,
    /// Reset everything back to connection defaults.
    ResetAll,
    /// Force an abort and rollback of the target's transaction.
    Rollback,
    /// Abort only the statement matching the given start timestamp.
    Statement,
    /// Roll back and close the target session.
    Close,
}

/// State shared by every manager mode, guarded by one mutex.
pub struct TxState {
    /// Non-decreasing deque of every open transaction's timestamp.
    pub live_transaction_timestamps: VecDeque<Timestamp>,
    /// The 2PL lock table.
    pub locks: LockTable,
}

/// Shared manager state: timestamps, live transactions, lock table.
pub struct TxCommon {
    mode: TxMode,
    config: DatabaseConfig,
    sessions: Arc<SessionManager>,
    commit_log: Arc<dyn CommitLog>,
    lob_usage: Arc<dyn LobUsage>,
    /// The catalog's own lockable name; DDL write-locks it, and
    /// read-only multi-version transactions wait on it alone.
    catalog_name: NameRef,
    global_change_timestamp: AtomicU64,
    transaction_count: AtomicU64,
    state: Mutex<TxState>,
    has_expired: AtomicBool,
}

impl TxCommon {
    /// Creates shared state for a manager in `mode`.
    #[must_use]
    pub fn new(
        mode: TxMode,
        config: DatabaseConfig,
        sessions: Arc<SessionManager>,
        commit_log: Arc<dyn CommitLog>,
        lob_usage: Arc<dyn LobUsage>,
        catalog_name: NameRef,
    ) -> Self {
        Self {
            mode,
            config,
            sessions,
            commit_log,
            lob_usage,
            catalog_name,
            global_change_timestamp: AtomicU64::new(1),
            transaction_count: AtomicU64::new(0),
            state: Mutex::new(TxState {
                live_transaction_timestamps: VecDeque::new(),
                locks: LockTable::new(),
            }),
            has_expired: AtomicBool::new(false),
        }
    }

    /// The catalog's lockable name.
    #[must_use]
    pub fn catalog_name(&self) -> &NameRef {
        &self.catalog_name
    }

    /// The manager's mode.
    #[must_use]
    pub fn mode(&self) -> TxMode {
        self.mode
    }

    /// The database configuration.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The session manager.
    #[must_use]
    pub fn sessions(&self) -> &Arc<SessionManager> {
        &self.sessions
    }

    /// The commit-log collaborator.
    #[must_use]
    pub fn commit_log(&self) -> &Arc<dyn CommitLog> {
        &self.commit_log
    }

    /// The LOB-usage collaborator.
    #[must_use]
    pub fn lob_usage(&self) -> &Arc<dyn LobUsage> {
        &self.lob_usage
    }

    /// The current global change timestamp, unincremented.
    #[must_use]
    pub fn current_timestamp(&self) -> Timestamp {
        Timestamp::new(self.global_change_timestamp.load(Ordering::SeqCst))
    }

    /// Issues the next global change timestamp.
    #[must_use]
    pub fn next_timestamp(&self) -> Timestamp {
        Timestamp::new(self.global_change_timestamp.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// Seeds the timestamp counter; used when a new manager inherits the
    /// old one's state on a mode switch.
    pub fn inherit_timestamp(&self, value: Timestamp) {
        self.global_change_timestamp
            .store(value.as_u64(), Ordering::SeqCst);
    }

    /// Seeds the live deque and transaction count on a mode switch.
    pub fn inherit_live_transactions(&self, live: Vec<Timestamp>) {
        let mut state = self.state();
        self.transaction_count
            .store(live.len() as u64, Ordering::SeqCst);
        state.live_transaction_timestamps = live.into_iter().collect();
    }

    /// Number of open transactions.
    #[must_use]
    pub fn transaction_count(&self) -> u64 {
        self.transaction_count.load(Ordering::SeqCst)
    }

    /// Locks the shared state.
    pub fn state(&self) -> MutexGuard<'_, TxState> {
        self.state.lock()
    }

    /// Marks this manager as replaced by a mode switch.
    pub fn expire(&self) {
        self.has_expired.store(true, Ordering::SeqCst);
    }

    /// Returns true once the manager has been replaced.
    #[must_use]
    pub fn has_expired(&self) -> bool {
        self.has_expired.load(Ordering::SeqCst)
    }

    /// The timestamps of every live transaction, oldest first.
    #[must_use]
    pub fn live_transaction_timestamps(&self) -> Vec<Timestamp> {
        self.state().live_transaction_timestamps.iter().copied().collect()
    }

    /// The oldest live transaction timestamp, or `Timestamp::MAX` with
    /// no transaction open.
    #[must_use]
    pub fn first_live_transaction_timestamp(&self) -> Timestamp {
        self.state()
            .live_transaction_timestamps
            .front()
            .copied()
            .unwrap_or(Timestamp::MAX)
    }

    /// Starts the session's transaction if none is open. Called with the
    /// state already locked.
    pub fn begin_transaction_in(&self, state: &mut TxState, session: &Arc<Session>) {
        if session.is_transaction() {
            return;
        }

        let ts = self.next_timestamp();
        session.set_transaction_timestamp(ts);
        session.set_action_timestamp(ts);
        session.set_action_start_timestamp(ts);
        session.set_in_transaction(true);

        state.live_transaction_timestamps.push_back(ts);
        self.transaction_count.fetch_add(1, Ordering::SeqCst);

        debug!(session = %session.id(), timestamp = %ts, "transaction started");
    }

    /// Ends the session's transaction: drops its timestamp from the live
    /// deque and resets the flags. Called with the state already locked.
    pub fn end_transaction_in(&self, state: &mut TxState, session: &Arc<Session>) {
        if !session.is_transaction() {
            return;
        }

        let ts = session.transaction_timestamp();
        if let Some(index) = state
            .live_transaction_timestamps
            .iter()
            .position(|live| *live == ts)
        {
            state.live_transaction_timestamps.remove(index);
        }

        self.transaction_count.fetch_sub(1, Ordering::SeqCst);
        session.set_in_transaction(false);
    }

    /// Computes the waited set for a statement into `session.temp_set`.
    ///
    /// Returns true when the session may proceed (locking now or after
    /// the waited set empties). Returns false on a would-be deadlock
    /// cycle, with `abort_transaction` already set.
    pub fn set_waited_sessions(
        &self,
        state: &mut TxState,
        session: &Arc<Session>,
        stmt: &dyn Statement,
    ) -> bool {
        session.clear_temp_set();

        if session.is_abort_transaction() {
            return false;
        }

        let mut waited: Vec<Arc<Session>> = Vec::new();

        if stmt.is_catalog_change() {
            for other in self.sessions.all_sessions() {
                if other.id() != session.id() && other.is_transaction() {
                    push_unique(&mut waited, other);
                }
            }
        }

        for name in stmt.write_set() {
            if let Some(holder) = state.locks.write_holder(name) {
                if holder != session.id() {
                    if let Some(other) = self.sessions.get(holder) {
                        push_unique(&mut waited, other);
                    }
                }
            }
            for reader in state.locks.readers_of(name) {
                if reader != session.id() {
                    if let Some(other) = self.sessions.get(reader) {
                        push_unique(&mut waited, other);
                    }
                }
            }
        }

        // read-only multi-version transactions see a snapshot; instead
        // of per-table read waits they wait only on a catalog writer
        let catalog_reads = [self.catalog_name.clone()];
        let read_names: &[NameRef] =
            if self.mode == TxMode::MvLocks && session.is_read_only() {
                if stmt.read_set().is_empty() {
                    &[]
                } else {
                    &catalog_reads
                }
            } else {
                stmt.read_set()
            };

        for name in read_names {
            if let Some(holder) = state.locks.write_holder(name) {
                if holder != session.id() {
                    if let Some(other) = self.sessions.get(holder) {
                        push_unique(&mut waited, other);
                    }
                }
            }
        }

        if waited.is_empty() {
            return true;
        }

        if check_deadlock(session, &waited) {
            session.set_temp_set(waited);
            return true;
        }

        session.clear_temp_set();
        session.set_aborted_by_deadlock();
        session.set_abort_transaction(true);
        debug!(session = %session.id(), "deadlock avoided, transaction aborted");
        false
    }

    /// Commits the computed reservations into the lock maps. Called with
    /// the state already locked.
    pub fn lock_tables(&self, state: &mut TxState, session: &Arc<Session>, stmt: &dyn Statement) {
        if session.is_abort_transaction() {
            return;
        }

        for name in stmt.write_set() {
            state.locks.lock_write(name.clone(), session.id());
        }

        if stmt.is_catalog_change() {
            state
                .locks
                .lock_write(self.catalog_name.clone(), session.id());
        }

        let skip_reads = self.mode == TxMode::MvLocks && session.is_read_only();
        if !skip_reads {
            for name in stmt.read_set() {
                state.locks.lock_read(name.clone(), session.id());
            }
        }
    }

    /// Enqueues the session behind each member of its temp set and arms
    /// its latch.
    pub fn set_waiting_session(&self, session: &Arc<Session>) {
        let waited = session.take_temp_set();
        let count = waited.len() as u64;

        for other in &waited {
            other.add_waiting(session.clone());
        }
        session.set_waited_sessions(waited);
        session.latch.set_count(count);
    }

    /// After an unlock: re-runs the waited-set computation for every
    /// waiter and grants locks to those now clear.
    pub fn reset_locks(&self, state: &mut TxState, session: &Arc<Session>) {
        let waiting = session.waiting_snapshot();

        for current in &waiting {
            current.set_temp_unlocked(false);

            if current.latch.count() == 1 {
                let Some(stmt) = current.current_statement() else {
                    continue;
                };
                if self.set_waited_sessions(state, current, stmt.as_ref())
                    && current.temp_set_is_empty()
                {
                    self.lock_tables(state, current, stmt.as_ref());
                    current.set_temp_unlocked(true);
                }
            }
        }

        for current in &waiting {
            if current.is_temp_unlocked() || current.is_abort_transaction() {
                continue;
            }
            // this can introduce additional waits for the session
            if let Some(stmt) = current.current_statement() {
                self.set_waited_sessions(state, current, stmt.as_ref());
            }
        }
    }

    /// Re-arms every waiter's latch from its recomputed temp set, then
    /// clears this session's waiter list and its own latch.
    pub fn reset_latches(&self, session: &Arc<Session>) {
        let waiting = session.waiting_snapshot();
        for current in &waiting {
            self.set_waiting_session(current);
        }

        session.clear_waiting_sessions();
        session.latch.set_count(0);
    }

    /// Mid-transaction variant used after a partial read-lock release:
    /// the session keeps running, so its own latch is left alone.
    pub fn reset_latches_mid_transaction(&self, session: &Arc<Session>) {
        let waiting = session.take_waiting_sessions();
        for current in &waiting {
            self.set_waiting_session(current);
        }
    }

    /// Statement-end handling for the READ COMMITTED isolation family:
    /// releases the statement's read locks and wakes waiters that can
    /// now make progress.
    pub fn end_action_tpl(&self, session: &Arc<Session>, stmt: &dyn Statement) {
        if session.isolation().holds_read_locks() {
            return;
        }

        if session.depth() > 0 {
            return;
        }

        let read_locks = stmt.read_set();
        if read_locks.is_empty() {
            return;
        }

        let mut state = self.state();
        state.locks.unlock_reads(session.id(), read_locks);

        if session.waiting_count() == 0 {
            return;
        }

        // if a write lock doubled as the read lock, nothing was freed
        let can_unlock = read_locks
            .iter()
            .any(|name| state.locks.write_holder(name) != Some(session.id()));
        if !can_unlock {
            return;
        }

        let mut worth_waking = false;
        for current in session.waiting_snapshot() {
            if current.is_abort_transaction() {
                worth_waking = true;
                break;
            }
            match current.current_statement() {
                None => {
                    worth_waking = true;
                    break;
                }
                Some(stmt) => {
                    if stmt
                        .write_set()
                        .iter()
                        .any(|name| read_locks.contains(name))
                    {
                        worth_waking = true;
                        break;
                    }
                }
            }
        }

        if !worth_waking {
            return;
        }

        self.reset_locks(&mut state, session);
        self.reset_latches_mid_transaction(session);
    }

    /// Transaction-end handling for the locking modes: unlock, then wake
    /// and re-arm every waiter.
    pub fn end_transaction_tpl(&self, state: &mut TxState, session: &Arc<Session>) {
        state.locks.unlock_all(session.id());

        if session.waiting_count() == 0 {
            return;
        }

        self.reset_locks(state, session);
        self.reset_latches(session);
    }

    /// Applies each logged action's persistent effect and appends the
    /// commit marker. Store failures are warned about and skipped; the
    /// in-memory state is authoritative.
    pub fn persist_commit(&self, session: &Arc<Session>) {
        let actions = session.action_snapshot();
        let mut write_commit = false;

        for action_ref in &actions {
            let (kind, store, row) = {
                let action = action_ref.read();
                if !action.kind.is_live() {
                    continue;
                }
                let row = match action.row() {
                    Ok(Some(row)) => row,
                    Ok(None) => continue,
                    Err(e) => {
                        warn!(session = %session.id(), error = %e, "data commit failed");
                        continue;
                    }
                };
                (action.kind, action.store.clone(), row)
            };

            write_commit = true;

            if let Err(e) = store.commit_row(&row, kind, self.mode) {
                warn!(session = %session.id(), error = %e, "data commit failed");
            }

            if self.lob_usage.table_has_lobs(&action_ref.read().table) {
                let delta = match kind {
                    RowActionKind::Insert => 1,
                    RowActionKind::Delete => -1,
                    _ => 0,
                };
                if delta != 0 {
                    self.lob_usage
                        .adjust_usage(&action_ref.read().table, &row, delta);
                }
            }

            if self.mode == TxMode::Locks {
                action_ref.write().set_as_noop();
            }
        }

        if write_commit {
            if let Err(e) = self.commit_log.write_commit_statement(session.id()) {
                warn!(session = %session.id(), error = %e, "data commit logging failed");
            }
        }
    }

    /// Reverses logged actions from `start` in strictly reverse order,
    /// then truncates the log. `deferred_deletes` is set under MVCC,
    /// where a delete touches no index until commit.
    pub fn rollback_actions(
        &self,
        session: &Arc<Session>,
        start: usize,
        timestamp: Timestamp,
        deferred_deletes: bool,
    ) {
        let actions = session.action_snapshot();

        for action_ref in actions.iter().skip(start).rev() {
            rollback_one(action_ref, timestamp, deferred_deletes, self.mode);
        }

        // a collapsed insert+delete can sit before the truncation point
        // when only its delete half postdates the savepoint
        for action_ref in actions.iter().take(start) {
            let needs_demotion = {
                let action = action_ref.read();
                action.kind == RowActionKind::InsertDelete
                    && !action.delete_timestamp.is_zero()
                    && action.delete_timestamp >= timestamp
            };
            if needs_demotion {
                demote_insert_delete(action_ref, deferred_deletes, self.mode);
            }
        }

        session.truncate_actions(start);
    }

    /// Cancel / timeout / close-from-another-session entry point.
    pub fn reset_session(
        &self,
        caller: SessionId,
        target: &Arc<Session>,
        statement_timestamp: Timestamp,
        mode: ResetMode,
    ) {
        // the state lock serialises resets against begin/commit paths
        let _state = self.state();

        match mode {
            ResetMode::Results => {
                if caller == target.id() && !target.is_in_mid_transaction() {
                    target.close_result_sets();
                }
            }
            ResetMode::Tables => {
                if caller == target.id() && !target.is_in_mid_transaction() {
                    target.clear_statement_tables();
                }
            }
            ResetMode::ResetAll => {
                if caller == target.id() && !target.is_in_mid_transaction() {
                    target.reset_to_defaults();
                }
            }
            ResetMode::Rollback => {
                if caller != target.id() && target.is_in_mid_transaction() {
                    prepare_reset(target);
                    target.set_abort_transaction(true);
                    if target.latch.count() > 0 {
                        target.latch.set_count(0);
                    }
                }
            }
            ResetMode::Statement => {
                if statement_timestamp != target.statement_start_timestamp() {
                    return;
                }
                // a first statement can be parked before its transaction
                // exists; an armed statement counts as in progress
                if target.is_in_mid_transaction() || target.current_statement().is_some() {
                    prepare_reset(target);

                    // interrupting a parked wait escalates to a
                    // transaction abort when configured
                    if self.config.tx_interrupt_rollback && target.latch.count() > 0 {
                        target.set_abort_transaction(true);
                    } else {
                        target.set_abort_action(true);
                    }

                    if target.latch.count() > 0 {
                        target.latch.set_count(0);
                    }
                }
            }
            ResetMode::Close => {
                if caller != target.id() && !target.is_in_mid_transaction() {
                    target.mark_for_close();
                }
            }
        }
    }
}

/// Detaches a waiting session from everyone it waits on.
fn prepare_reset(session: &Arc<Session>) {
    let waited = session.take_waited_sessions();
    for current in &waited {
        current.remove_waiting(session.id());
    }
}

fn push_unique(set: &mut Vec<Arc<Session>>, session: Arc<Session>) {
    if !set.iter().any(|s| s.id() == session.id()) {
        set.push(session);
    }
}

/// Depth-first cycle check: false when any session in `new_waits`
/// transitively waits on `session` already.
#[must_use]
pub fn check_deadlock(session: &Arc<Session>, new_waits: &[Arc<Session>]) -> bool {
    for current in session.waiting_snapshot() {
        if new_waits.iter().any(|w| w.id() == current.id()) {
            return false;
        }
        if !check_deadlock(&current, new_waits) {
            return false;
        }
    }
    true
}

fn rollback_one(
    action_ref: &ActionRef,
    timestamp: Timestamp,
    deferred_deletes: bool,
    mode: TxMode,
) {
    let (kind, action_ts, store, row) = {
        let action = action_ref.read();
        if !action.kind.is_live() {
            return;
        }
        let Ok(Some(row)) = action.row() else {
            action_ref.write().set_as_noop();
            return;
        };
        (
            action.kind,
            action.action_timestamp,
            action.store.clone(),
            row,
        )
    };

    match kind {
        RowActionKind::Insert => {
            if action_ts >= timestamp {
                let _ = store.rollback_row(&row, RowActionKind::Insert, mode);
                action_ref.write().set_as_noop();
            }
        }
        RowActionKind::Delete => {
            if action_ts >= timestamp {
                if !deferred_deletes {
                    let _ = store.rollback_row(&row, RowActionKind::Delete, mode);
                }
                action_ref.write().set_as_noop();
            }
        }
        RowActionKind::InsertDelete => {
            if action_ts >= timestamp {
                // both halves postdate the boundary: drop the row
                if deferred_deletes {
                    store.delete(&row);
                }
                let _ = store.rollback_row(&row, RowActionKind::InsertDelete, mode);
                action_ref.write().set_as_noop();
            } else {
                demote_insert_delete(action_ref, deferred_deletes, mode);
            }
        }
        RowActionKind::DeleteFinal | RowActionKind::None => {}
    }
}

/// Undoes only the delete half of a collapsed insert+delete: the action
/// reverts to a plain insert and the row returns to its indexes.
fn demote_insert_delete(action_ref: &ActionRef, deferred_deletes: bool, mode: TxMode) {
    let (store, row) = {
        let mut action = action_ref.write();
        action.kind = RowActionKind::Insert;
        action.delete_timestamp = Timestamp::ZERO;
        let Ok(Some(row)) = action.row() else {
            return;
        };
        (action.store.clone(), row)
    };

    if !deferred_deletes {
        let _ = store.rollback_row(&row, RowActionKind::Delete, mode);
    }
}

/// The transaction manager interface shared by the three modes.
pub trait TransactionManager: Send + Sync {
    /// The manager's mode.
    fn mode(&self) -> TxMode;

    /// The shared state.
    fn common(&self) -> &TxCommon;

    /// Reserves whatever the statement needs, or arms the session's
    /// latch behind the holders, or flags an abort. Never blocks.
    fn begin_action(&self, session: &Arc<Session>, stmt: &Arc<dyn Statement>);

    /// Assigns the action timestamp once the session is clear to run;
    /// the first action also starts the transaction.
    fn begin_action_resume(&self, session: &Arc<Session>);

    /// Creates, stores and logs an inserted row.
    fn add_insert_action(
        &self,
        session: &Arc<Session>,
        table: &NameRef,
        store: &Arc<dyn RowStore>,
        data: Vec<Value>,
    ) -> StratumResult<Row>;

    /// Logs a row deletion.
    fn add_delete_action(
        &self,
        session: &Arc<Session>,
        table: &NameRef,
        store: &Arc<dyn RowStore>,
        row: &Row,
        changed_columns: &[usize],
    ) -> StratumResult<()>;

    /// Statement completed successfully: per-mode lock release and
    /// waiter wakeups.
    fn complete_actions(&self, session: &Arc<Session>);

    /// Statement failed: reverses the statement's own actions only.
    fn rollback_action(&self, session: &Arc<Session>);

    /// Runs the commit pipeline. On a validation failure the caller
    /// rolls back and surfaces `SERIALIZATION_FAILURE`.
    fn commit(&self, session: &Arc<Session>) -> StratumResult<()>;

    /// Reverses the whole transaction.
    fn rollback(&self, session: &Arc<Session>);

    /// Reverses actions from a savepoint index onward.
    fn rollback_partial(&self, session: &Arc<Session>, start: usize, timestamp: Timestamp);

    /// Visibility of a row version for a reading session.
    fn is_row_visible(&self, session: &Arc<Session>, table: &NameRef, row_id: RowId) -> bool;
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Weak;

    use stratum_catalog::name::{NameRegistry, ObjectKind};
    use stratum_common::types::IsolationLevel;

    use crate::statement::{FnStatement, StatementResult};

    fn common() -> (TxCommon, Arc<SessionManager>, Arc<NameRegistry>) {
        let registry = Arc::new(NameRegistry::new());
        let sessions = Arc::new(SessionManager::new());
        let catalog = registry.new_name("STRATUM", ObjectKind::Schema);
        let common = TxCommon::new(
            TxMode::Locks,
            DatabaseConfig::for_testing(),
            sessions.clone(),
            Arc::new(NoopCommitLog),
            Arc::new(NoopLobUsage),
            catalog,
        );
        (common, sessions, registry)
    }

    fn session(sessions: &Arc<SessionManager>) -> Arc<Session> {
        sessions.new_session(
            Weak::new(),
            "SA".to_string(),
            true,
            false,
            "UTC".to_string(),
            IsolationLevel::ReadCommitted,
        )
    }

    fn table(registry: &Arc<NameRegistry>, local: &str) -> NameRef {
        let owner = registry.new_name("SA", ObjectKind::Grantee);
        let schema = registry.new_schema_name("PUBLIC", owner);
        registry.new_object_name(local, ObjectKind::Table, schema)
    }

    fn write_stmt(name: &NameRef) -> Arc<dyn Statement> {
        Arc::new(FnStatement::new(Vec::new(), vec![name.clone()], |_| {
            Ok(StatementResult::UpdateCount(0))
        }))
    }

    #[test]
    fn test_timestamps_strictly_increase() {
        let (common, _, _) = common();
        let a = common.next_timestamp();
        let b = common.next_timestamp();
        assert!(a < b);
        assert_eq!(common.current_timestamp(), b);
    }

    #[test]
    fn test_transaction_bookkeeping() {
        let (common, sessions, _) = common();
        let s1 = session(&sessions);
        let s2 = session(&sessions);

        {
            let mut state = common.state();
            common.begin_transaction_in(&mut state, &s1);
            common.begin_transaction_in(&mut state, &s2);
        }

        assert_eq!(common.transaction_count(), 2);
        let live = common.live_transaction_timestamps();
        assert_eq!(live.len(), 2);
        assert!(live[0] < live[1]);
        assert_eq!(
            common.first_live_transaction_timestamp(),
            s1.transaction_timestamp()
        );

        // beginning twice is a no-op
        {
            let mut state = common.state();
            common.begin_transaction_in(&mut state, &s1);
            common.end_transaction_in(&mut state, &s1);
            common.end_transaction_in(&mut state, &s2);
        }
        assert_eq!(common.transaction_count(), 0);
        assert!(common.live_transaction_timestamps().is_empty());
    }

    #[test]
    fn test_waited_set_and_deadlock_refusal() {
        let (common, sessions, registry) = common();
        let s1 = session(&sessions);
        let s2 = session(&sessions);
        let t1 = table(&registry, "T1");
        let stmt = write_stmt(&t1);

        {
            let mut state = common.state();
            state.locks.lock_write(t1.clone(), s1.id());

            assert!(common.set_waited_sessions(&mut state, &s2, stmt.as_ref()));
            assert!(!s2.temp_set_is_empty());
            common.set_waiting_session(&s2);
            assert_eq!(s2.latch.count(), 1);

            // s1 asking to wait on s2 would close the cycle
            let t2 = table(&registry, "T2");
            state.locks.lock_write(t2.clone(), s2.id());
            let cross = write_stmt(&t2);
            assert!(!common.set_waited_sessions(&mut state, &s1, cross.as_ref()));
            assert!(s1.is_abort_transaction());
        }
    }

    #[test]
    fn test_mode_switch_inheritance() {
        let (old, sessions, registry) = common();
        let s1 = session(&sessions);
        {
            let mut state = old.state();
            old.begin_transaction_in(&mut state, &s1);
        }

        let catalog = registry.new_name("STRATUM", ObjectKind::Schema);
        let fresh = TxCommon::new(
            TxMode::Mvcc,
            DatabaseConfig::for_testing(),
            sessions,
            Arc::new(NoopCommitLog),
            Arc::new(NoopLobUsage),
            catalog,
        );
        fresh.inherit_timestamp(old.current_timestamp());
        fresh.inherit_live_transactions(old.live_transaction_timestamps());
        old.expire();

        assert!(old.has_expired());
        assert_eq!(fresh.current_timestamp(), old.current_timestamp());
        assert_eq!(fresh.transaction_count(), 1);
        assert_eq!(
            fresh.first_live_transaction_timestamp(),
            s1.transaction_timestamp()
        );
    }
}
