//! Sessions.
//!
//! A session is one client's connection state: identity, isolation,
//! autocommit, the row-action log, savepoints, the wait-graph fields and
//! the latch it parks on. Each session executes on a single thread at a
//! time; the only place it blocks on another session is the latch wait
//! inside [`Session::execute`].
//!
//! # State transitions
//!
//! ```text
//! Closed ◀── close() ─── Idle ── begin ──▶ InTransaction
//!                          ▲                    │
//!                          │              beginAction finds
//!                     commit/rollback      a waited set
//!                          │                    ▼
//!                     Aborting ◀── cycle ── Waiting (latch > 0)
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;

use parking_lot::{Mutex, RwLock};
use rand::Rng;
use tracing::debug;

use stratum_catalog::name::NameRef;
use stratum_common::error::{StratumError, StratumResult};
use stratum_common::types::{IsolationLevel, RowId, SessionId, Timestamp, Value};
use stratum_store::cache::DataCache;
use stratum_store::row::Row;
use stratum_store::store::{HybridRowStore, RowStore, StoreDef};

use crate::action::{ActionRef, RowActionLog, Savepoint};
use crate::database::Database;
use crate::latch::CountDownLatch;
use crate::statement::{Statement, StatementResult};

/// Per-statement and per-transaction context.
pub struct SessionContext {
    /// Autocommit flag.
    pub autocommit: bool,
    /// Read-only flag for the current transaction.
    pub read_only: bool,
    /// Reentrance depth; routines and triggers increment it.
    pub depth: u32,
    /// The row-action log.
    pub actions: RowActionLog,
    /// Savepoint stack, oldest first.
    pub savepoints: Vec<Savepoint>,
    /// Log length at the start of the in-flight statement.
    pub action_index: usize,
    /// The in-flight statement.
    pub current_statement: Option<Arc<dyn Statement>>,
}

struct SessionSettings {
    isolation: IsolationLevel,
    isolation_default: IsolationLevel,
    read_only_default: bool,
    max_rows: usize,
}

/// One client session.
pub struct Session {
    id: SessionId,
    random_id: u32,
    user: String,
    zone: String,
    database: Weak<Database>,

    /// The latch this session parks on while its waited set is
    /// non-empty.
    pub latch: CountDownLatch,

    closed: AtomicBool,
    abort_action: AtomicBool,
    abort_transaction: AtomicBool,
    redo_action: AtomicBool,
    temp_unlocked: AtomicBool,
    aborted_by_deadlock: AtomicBool,
    in_transaction: AtomicBool,

    transaction_timestamp: AtomicU64,
    action_timestamp: AtomicU64,
    action_start_timestamp: AtomicU64,
    statement_start_timestamp: AtomicU64,

    // wait-graph fields; mutated only under the manager's state lock
    waited_sessions: Mutex<Vec<Arc<Session>>>,
    waiting_sessions: Mutex<Vec<Arc<Session>>>,
    temp_set: Mutex<Vec<Arc<Session>>>,

    context: Mutex<SessionContext>,
    settings: Mutex<SessionSettings>,

    // statement-local stores and the lazily created data cache
    session_stores: Mutex<Vec<Arc<HybridRowStore>>>,
    data_cache: Mutex<Option<Arc<DataCache>>>,

    current_timeout_ms: AtomicI64,
}

impl Session {
    fn new(
        database: Weak<Database>,
        id: SessionId,
        user: String,
        autocommit: bool,
        read_only: bool,
        zone: String,
        isolation_default: IsolationLevel,
    ) -> Arc<Self> {
        Arc::new(Self {
            id,
            random_id: rand::thread_rng().gen(),
            user,
            zone,
            database,
            latch: CountDownLatch::new(),
            closed: AtomicBool::new(false),
            abort_action: AtomicBool::new(false),
            abort_transaction: AtomicBool::new(false),
            redo_action: AtomicBool::new(false),
            temp_unlocked: AtomicBool::new(false),
            aborted_by_deadlock: AtomicBool::new(false),
            in_transaction: AtomicBool::new(false),
            transaction_timestamp: AtomicU64::new(0),
            action_timestamp: AtomicU64::new(0),
            action_start_timestamp: AtomicU64::new(0),
            statement_start_timestamp: AtomicU64::new(0),
            waited_sessions: Mutex::new(Vec::new()),
            waiting_sessions: Mutex::new(Vec::new()),
            temp_set: Mutex::new(Vec::new()),
            context: Mutex::new(SessionContext {
                autocommit,
                read_only,
                depth: 0,
                actions: RowActionLog::new(),
                savepoints: Vec::new(),
                action_index: 0,
                current_statement: None,
            }),
            settings: Mutex::new(SessionSettings {
                isolation: isolation_default.normalized(),
                isolation_default: isolation_default.normalized(),
                read_only_default: read_only,
                max_rows: 0,
            }),
            session_stores: Mutex::new(Vec::new()),
            data_cache: Mutex::new(None),
            current_timeout_ms: AtomicI64::new(0),
        })
    }

    // ------------------------------------------------------------------
    // identity and flags
    // ------------------------------------------------------------------

    /// The session id.
    #[must_use]
    pub fn id(&self) -> SessionId {
        self.id
    }

    /// The random id authenticating cancel requests.
    #[must_use]
    pub fn random_id(&self) -> u32 {
        self.random_id
    }

    /// The session user's grantee name.
    #[must_use]
    pub fn user(&self) -> &str {
        &self.user
    }

    /// The session's time zone id.
    #[must_use]
    pub fn zone(&self) -> &str {
        &self.zone
    }

    /// Returns true once the session is closed.
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Returns true while a transaction is open.
    #[must_use]
    pub fn is_transaction(&self) -> bool {
        self.in_transaction.load(Ordering::SeqCst)
    }

    /// Alias used by the reset machinery.
    #[must_use]
    pub fn is_in_mid_transaction(&self) -> bool {
        self.is_transaction()
    }

    pub(crate) fn set_in_transaction(&self, value: bool) {
        self.in_transaction.store(value, Ordering::SeqCst);
    }

    /// The abort-transaction flag.
    #[must_use]
    pub fn is_abort_transaction(&self) -> bool {
        self.abort_transaction.load(Ordering::SeqCst)
    }

    pub(crate) fn set_abort_transaction(&self, value: bool) {
        self.abort_transaction.store(value, Ordering::SeqCst);
    }

    pub(crate) fn is_abort_action(&self) -> bool {
        self.abort_action.load(Ordering::SeqCst)
    }

    pub(crate) fn set_abort_action(&self, value: bool) {
        self.abort_action.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_redo_action(&self, value: bool) {
        self.redo_action.store(value, Ordering::SeqCst);
    }

    fn take_redo_action(&self) -> bool {
        self.redo_action.swap(false, Ordering::SeqCst)
    }

    pub(crate) fn is_temp_unlocked(&self) -> bool {
        self.temp_unlocked.load(Ordering::SeqCst)
    }

    pub(crate) fn set_temp_unlocked(&self, value: bool) {
        self.temp_unlocked.store(value, Ordering::SeqCst);
    }

    pub(crate) fn set_aborted_by_deadlock(&self) {
        self.aborted_by_deadlock.store(true, Ordering::SeqCst);
    }

    fn take_aborted_by_deadlock(&self) -> bool {
        self.aborted_by_deadlock.swap(false, Ordering::SeqCst)
    }

    // ------------------------------------------------------------------
    // timestamps
    // ------------------------------------------------------------------

    /// The open transaction's timestamp.
    #[must_use]
    pub fn transaction_timestamp(&self) -> Timestamp {
        Timestamp::new(self.transaction_timestamp.load(Ordering::SeqCst))
    }

    pub(crate) fn set_transaction_timestamp(&self, ts: Timestamp) {
        self.transaction_timestamp.store(ts.as_u64(), Ordering::SeqCst);
    }

    /// The current action timestamp.
    #[must_use]
    pub fn action_timestamp(&self) -> Timestamp {
        Timestamp::new(self.action_timestamp.load(Ordering::SeqCst))
    }

    pub(crate) fn set_action_timestamp(&self, ts: Timestamp) {
        self.action_timestamp.store(ts.as_u64(), Ordering::SeqCst);
    }

    /// Timestamp of the start of the in-flight statement's action.
    #[must_use]
    pub fn action_start_timestamp(&self) -> Timestamp {
        Timestamp::new(self.action_start_timestamp.load(Ordering::SeqCst))
    }

    pub(crate) fn set_action_start_timestamp(&self, ts: Timestamp) {
        self.action_start_timestamp
            .store(ts.as_u64(), Ordering::SeqCst);
    }

    /// Timestamp identifying the in-flight statement for cancel.
    #[must_use]
    pub fn statement_start_timestamp(&self) -> Timestamp {
        Timestamp::new(self.statement_start_timestamp.load(Ordering::SeqCst))
    }

    fn set_statement_start_timestamp(&self, ts: Timestamp) {
        self.statement_start_timestamp
            .store(ts.as_u64(), Ordering::SeqCst);
    }

    // ------------------------------------------------------------------
    // wait graph
    // ------------------------------------------------------------------

    pub(crate) fn clear_temp_set(&self) {
        self.temp_set.lock().clear();
    }

    pub(crate) fn set_temp_set(&self, set: Vec<Arc<Session>>) {
        *self.temp_set.lock() = set;
    }

    pub(crate) fn take_temp_set(&self) -> Vec<Arc<Session>> {
        std::mem::take(&mut *self.temp_set.lock())
    }

    pub(crate) fn temp_set_is_empty(&self) -> bool {
        self.temp_set.lock().is_empty()
    }

    pub(crate) fn add_waiting(&self, session: Arc<Session>) {
        let mut waiting = self.waiting_sessions.lock();
        if !waiting.iter().any(|s| s.id() == session.id()) {
            waiting.push(session);
        }
    }

    pub(crate) fn remove_waiting(&self, id: SessionId) {
        self.waiting_sessions.lock().retain(|s| s.id() != id);
    }

    pub(crate) fn waiting_snapshot(&self) -> Vec<Arc<Session>> {
        self.waiting_sessions.lock().clone()
    }

    pub(crate) fn waiting_count(&self) -> usize {
        self.waiting_sessions.lock().len()
    }

    pub(crate) fn clear_waiting_sessions(&self) {
        self.waiting_sessions.lock().clear();
    }

    pub(crate) fn take_waiting_sessions(&self) -> Vec<Arc<Session>> {
        std::mem::take(&mut *self.waiting_sessions.lock())
    }

    pub(crate) fn set_waited_sessions(&self, set: Vec<Arc<Session>>) {
        *self.waited_sessions.lock() = set;
    }

    pub(crate) fn take_waited_sessions(&self) -> Vec<Arc<Session>> {
        std::mem::take(&mut *self.waited_sessions.lock())
    }

    // ------------------------------------------------------------------
    // context and settings
    // ------------------------------------------------------------------

    /// Runs a closure under the context lock.
    pub(crate) fn with_context<R>(&self, f: impl FnOnce(&mut SessionContext) -> R) -> R {
        f(&mut self.context.lock())
    }

    /// The in-flight statement, if any.
    #[must_use]
    pub fn current_statement(&self) -> Option<Arc<dyn Statement>> {
        self.context.lock().current_statement.clone()
    }

    /// The reentrance depth.
    #[must_use]
    pub fn depth(&self) -> u32 {
        self.context.lock().depth
    }

    /// Enters a routine or trigger body.
    pub fn push_depth(&self) {
        self.context.lock().depth += 1;
    }

    /// Leaves a routine or trigger body.
    pub fn pop_depth(&self) {
        let mut ctx = self.context.lock();
        ctx.depth = ctx.depth.saturating_sub(1);
    }

    /// The session's isolation level.
    #[must_use]
    pub fn isolation(&self) -> IsolationLevel {
        self.settings.lock().isolation
    }

    /// Sets the isolation level for subsequent transactions. READ
    /// UNCOMMITTED is rewritten to READ COMMITTED. Fails mid-transaction.
    pub fn set_isolation(&self, level: IsolationLevel) -> StratumResult<()> {
        if self.is_transaction() {
            return Err(StratumError::InvalidTransactionState {
                message: "cannot set isolation level in a transaction".to_string(),
            });
        }
        self.settings.lock().isolation = level.normalized();
        Ok(())
    }

    /// Sets the default isolation level applied after each transaction.
    pub fn set_isolation_default(&self, level: IsolationLevel) {
        let mut settings = self.settings.lock();
        settings.isolation_default = level.normalized();
        if !self.is_transaction() {
            settings.isolation = settings.isolation_default;
        }
    }

    /// The read-only flag.
    #[must_use]
    pub fn is_read_only(&self) -> bool {
        self.context.lock().read_only
    }

    /// Sets the read-only flag for the next transaction. Fails
    /// mid-transaction.
    pub fn set_read_only(&self, read_only: bool) -> StratumResult<()> {
        if self.is_transaction() {
            return Err(StratumError::InvalidTransactionState {
                message: "cannot set read-only in a transaction".to_string(),
            });
        }
        self.context.lock().read_only = read_only;
        Ok(())
    }

    /// The autocommit flag.
    #[must_use]
    pub fn is_autocommit(&self) -> bool {
        self.context.lock().autocommit
    }

    /// Switches autocommit; a change commits the open transaction first.
    /// A no-op while routines are on the stack or the session is closed.
    pub fn set_autocommit(self: &Arc<Self>, autocommit: bool) -> StratumResult<()> {
        if self.is_closed() || self.depth() > 0 {
            return Ok(());
        }

        let changed = { self.context.lock().autocommit != autocommit };
        if changed {
            self.commit()?;
            self.context.lock().autocommit = autocommit;
        }
        Ok(())
    }

    /// The session's row cap for results.
    #[must_use]
    pub fn max_rows(&self) -> usize {
        self.settings.lock().max_rows
    }

    /// Sets the session's row cap for results.
    pub fn set_max_rows(&self, max_rows: usize) {
        self.settings.lock().max_rows = max_rows;
    }

    // ------------------------------------------------------------------
    // row-action log
    // ------------------------------------------------------------------

    pub(crate) fn append_action(&self, action: ActionRef) {
        self.context.lock().actions.append(action);
    }

    pub(crate) fn action_snapshot(&self) -> Vec<ActionRef> {
        self.context.lock().actions.iter().cloned().collect()
    }

    pub(crate) fn action_count(&self) -> usize {
        self.context.lock().actions.len()
    }

    pub(crate) fn action_index(&self) -> usize {
        self.context.lock().action_index
    }

    pub(crate) fn truncate_actions(&self, index: usize) {
        self.context.lock().actions.truncate(index);
    }

    pub(crate) fn find_own_row_action(&self, table: &NameRef, row_id: RowId) -> Option<ActionRef> {
        self.context
            .lock()
            .actions
            .find_row_action(table, row_id)
            .cloned()
    }

    // ------------------------------------------------------------------
    // database plumbing
    // ------------------------------------------------------------------

    fn db(&self) -> StratumResult<Arc<Database>> {
        self.database
            .upgrade()
            .ok_or(StratumError::ConnectionFailure { session_id: self.id })
    }

    /// The data cache backing this session's statement-local stores,
    /// created on first use.
    pub fn session_data_cache(&self) -> Arc<DataCache> {
        let mut cache = self.data_cache.lock();
        cache.get_or_insert_with(|| Arc::new(DataCache::new())).clone()
    }

    /// Creates a statement-local hybrid store over this session's cache.
    pub fn temp_store(&self, def: StoreDef) -> StratumResult<Arc<HybridRowStore>> {
        let db = self.db()?;
        let store = Arc::new(HybridRowStore::new(
            def,
            db.config().result_memory_row_count,
            self.session_data_cache(),
            true,
        ));
        self.session_stores.lock().push(store.clone());
        Ok(store)
    }

    pub(crate) fn close_result_sets(&self) {
        // results are one-shot values; nothing is held open
    }

    pub(crate) fn clear_statement_tables(&self) {
        let stores = std::mem::take(&mut *self.session_stores.lock());
        for store in stores {
            store.release();
        }
    }

    pub(crate) fn reset_to_defaults(&self) {
        self.clear_statement_tables();
        let mut settings = self.settings.lock();
        settings.isolation = settings.isolation_default;
        settings.max_rows = 0;
        let read_only_default = settings.read_only_default;
        drop(settings);

        let mut ctx = self.context.lock();
        ctx.autocommit = true;
        ctx.read_only = read_only_default;
    }

    pub(crate) fn mark_for_close(&self) {
        self.clear_statement_tables();
        self.closed.store(true, Ordering::SeqCst);
        if let Ok(db) = self.db() {
            db.session_manager().remove(self.id);
        }
    }

    // ------------------------------------------------------------------
    // statement execution
    // ------------------------------------------------------------------

    /// Executes a compiled statement: the begin-action / latch-wait /
    /// redo loop, statement-level rollback on error, and the autocommit
    /// epilogue.
    pub fn execute(
        self: &Arc<Self>,
        stmt: &Arc<dyn Statement>,
        timeout: Option<Duration>,
    ) -> StratumResult<StatementResult> {
        if self.is_closed() {
            return Err(StratumError::SessionClosed { session_id: self.id });
        }

        if self.is_abort_transaction() {
            return self.handle_abort_transaction();
        }

        if self.depth() > 0 && stmt.is_autocommit_statement() {
            return Err(StratumError::InvalidTransactionState {
                message: "DDL is not allowed inside a routine".to_string(),
            });
        }

        if stmt.is_autocommit_statement() {
            self.commit()?;
        }

        let db = self.db()?;
        let manager = db.tx_manager();

        self.set_statement_start_timestamp(manager.common().current_timestamp());

        if !stmt.is_transaction_statement() {
            self.set_action_timestamp(manager.common().next_timestamp());
            let result = stmt.execute(self);
            self.set_abort_action(false);
            return result;
        }

        self.start_timeout(timeout);

        let result = loop {
            self.with_context(|ctx| {
                ctx.action_index = ctx.actions.len();
                ctx.current_statement = Some(stmt.clone());
            });

            manager.begin_action(self, stmt);

            if self.take_redo_action() {
                continue;
            }

            if self.is_abort_transaction() {
                self.end_timeout();
                return self.handle_abort_transaction();
            }

            self.latch.wait_zero();

            if self.is_abort_action() {
                let err = Err(StratumError::StatementAborted { session_id: self.id });
                self.end_action(&err);
                break err;
            }

            if self.is_abort_transaction() {
                self.end_timeout();
                return self.handle_abort_transaction();
            }

            manager.begin_action_resume(self);

            let result = stmt.execute(self);
            self.end_action(&result);

            if self.is_abort_transaction() {
                break result;
            }

            if self.take_redo_action() {
                self.latch.wait_zero();
                continue;
            }

            break result;
        };

        self.end_timeout();

        if self.is_abort_transaction() {
            return self.handle_abort_transaction();
        }

        let (autocommit, depth) = {
            let ctx = self.context.lock();
            (ctx.autocommit, ctx.depth)
        };

        if depth == 0 && (autocommit || stmt.is_autocommit_statement()) {
            match &result {
                Err(_) => self.rollback_no_check()?,
                Ok(_) => self.commit()?,
            }
        }

        self.with_context(|ctx| ctx.current_statement = None);
        result
    }

    /// Statement epilogue: clears the abort-action flag, then asks the
    /// manager to keep or reverse the statement's work.
    fn end_action(self: &Arc<Self>, result: &StratumResult<StatementResult>) {
        self.set_abort_action(false);

        let Ok(db) = self.db() else {
            return;
        };
        let manager = db.tx_manager();

        match result {
            Ok(_) => manager.complete_actions(self),
            Err(_) => manager.rollback_action(self),
        }
    }

    fn handle_abort_transaction(self: &Arc<Self>) -> StratumResult<StatementResult> {
        let deadlock = self.take_aborted_by_deadlock();
        self.rollback_no_check()?;

        if deadlock {
            Err(StratumError::StatementAborted { session_id: self.id })
        } else {
            Err(StratumError::SerializationFailure { session_id: self.id })
        }
    }

    // ------------------------------------------------------------------
    // transaction boundary
    // ------------------------------------------------------------------

    /// Explicit transaction start.
    pub fn start_transaction(self: &Arc<Self>) -> StratumResult<()> {
        let db = self.db()?;
        let manager = db.tx_manager();
        let mut state = manager.common().state();
        manager.common().begin_transaction_in(&mut state, self);
        Ok(())
    }

    /// Commits the open transaction. A validation failure rolls back
    /// and surfaces `SERIALIZATION_FAILURE`.
    pub fn commit(self: &Arc<Self>) -> StratumResult<()> {
        if self.is_closed() || self.depth() > 0 {
            return Ok(());
        }

        if self.is_transaction() {
            let db = self.db()?;
            let manager = db.tx_manager();
            if let Err(e) = manager.commit(self) {
                self.rollback_no_check()?;
                return Err(e);
            }

            if db.commit_log().needs_checkpoint_reset() {
                debug!(session = %self.id, "commit log requests a checkpoint");
            }
        }

        self.end_transaction();
        Ok(())
    }

    /// Rolls back the open transaction. A no-op at depth.
    pub fn rollback(self: &Arc<Self>) -> StratumResult<()> {
        if self.depth() > 0 {
            return Ok(());
        }
        self.rollback_no_check()
    }

    pub(crate) fn rollback_no_check(self: &Arc<Self>) -> StratumResult<()> {
        if self.is_closed() {
            return Ok(());
        }

        if self.is_transaction() {
            let db = self.db()?;
            db.tx_manager().rollback(self);
        }

        self.end_transaction();
        Ok(())
    }

    fn end_transaction(&self) {
        self.set_abort_action(false);
        self.set_abort_transaction(false);

        let (read_only_default, isolation_default) = {
            let settings = self.settings.lock();
            (settings.read_only_default, settings.isolation_default)
        };

        let mut ctx = self.context.lock();
        ctx.savepoints.clear();
        ctx.actions.clear();
        ctx.current_statement = None;
        ctx.read_only = read_only_default;
        drop(ctx);

        self.settings.lock().isolation = isolation_default;
    }

    // ------------------------------------------------------------------
    // savepoints
    // ------------------------------------------------------------------

    /// Declares a savepoint, replacing any earlier one of the same name.
    pub fn savepoint(self: &Arc<Self>, name: &str) -> StratumResult<()> {
        let db = self.db()?;
        let timestamp = db.tx_manager().common().next_timestamp();

        let mut ctx = self.context.lock();
        ctx.savepoints.retain(|sp| sp.name != name);
        let index = ctx.actions.len();
        ctx.savepoints.push(Savepoint {
            name: name.to_string(),
            index,
            timestamp,
        });
        Ok(())
    }

    /// Rolls back to a savepoint, keeping it declared.
    pub fn rollback_to_savepoint(self: &Arc<Self>, name: &str) -> StratumResult<()> {
        let savepoint = {
            let ctx = self.context.lock();
            ctx.savepoints.iter().find(|sp| sp.name == name).cloned()
        }
        .ok_or_else(|| StratumError::InvalidArgument {
            message: format!("savepoint {name} is not declared"),
        })?;

        let db = self.db()?;
        db.tx_manager()
            .rollback_partial(self, savepoint.index, savepoint.timestamp);

        let mut ctx = self.context.lock();
        if let Some(pos) = ctx.savepoints.iter().position(|sp| sp.name == name) {
            ctx.savepoints.truncate(pos + 1);
        }
        Ok(())
    }

    /// Releases a savepoint and every later one.
    pub fn release_savepoint(&self, name: &str) -> StratumResult<()> {
        let mut ctx = self.context.lock();
        let pos = ctx
            .savepoints
            .iter()
            .position(|sp| sp.name == name)
            .ok_or_else(|| StratumError::InvalidArgument {
                message: format!("savepoint {name} is not declared"),
            })?;
        ctx.savepoints.truncate(pos);
        Ok(())
    }

    // ------------------------------------------------------------------
    // row operations
    // ------------------------------------------------------------------

    /// Inserts a row. The abort flags are consulted after the action is
    /// logged, so an aborting insert still reaches the log and its row
    /// is removed on rollback.
    pub fn insert_row(
        self: &Arc<Self>,
        table: &NameRef,
        store: &Arc<dyn RowStore>,
        data: Vec<Value>,
    ) -> StratumResult<Row> {
        let db = self.db()?;
        let row = db.tx_manager().add_insert_action(self, table, store, data)?;

        if self.is_abort_transaction() {
            return Err(StratumError::SerializationFailure { session_id: self.id });
        }
        if self.is_abort_action() {
            return Err(StratumError::StatementAborted { session_id: self.id });
        }
        Ok(row)
    }

    /// Deletes a row.
    pub fn delete_row(
        self: &Arc<Self>,
        table: &NameRef,
        store: &Arc<dyn RowStore>,
        row: &Row,
        changed_columns: &[usize],
    ) -> StratumResult<()> {
        if self.is_abort_transaction() {
            return Err(StratumError::SerializationFailure { session_id: self.id });
        }
        if self.is_abort_action() {
            return Err(StratumError::StatementAborted { session_id: self.id });
        }

        let db = self.db()?;
        db.tx_manager()
            .add_delete_action(self, table, store, row, changed_columns)
    }

    /// An update decomposed into a delete and an insert carrying the
    /// changed-column mask.
    pub fn update_row(
        self: &Arc<Self>,
        table: &NameRef,
        store: &Arc<dyn RowStore>,
        row: &Row,
        new_data: Vec<Value>,
        changed_columns: &[usize],
    ) -> StratumResult<Row> {
        self.delete_row(table, store, row, changed_columns)?;
        let db = self.db()?;
        let new_row = db
            .tx_manager()
            .add_insert_action(self, table, store, new_data)?;

        if self.is_abort_transaction() {
            return Err(StratumError::SerializationFailure { session_id: self.id });
        }
        Ok(new_row)
    }

    /// Scans a table, filtered to the versions this session may observe.
    pub fn read_table(
        self: &Arc<Self>,
        table: &NameRef,
        store: &Arc<dyn RowStore>,
    ) -> StratumResult<Vec<Row>> {
        let db = self.db()?;
        let manager = db.tx_manager();

        Ok(store
            .scan()
            .into_iter()
            .filter(|row| manager.is_row_visible(self, table, row.id()))
            .collect())
    }

    // ------------------------------------------------------------------
    // timeout and close
    // ------------------------------------------------------------------

    fn start_timeout(&self, timeout: Option<Duration>) {
        let ms = timeout.map_or(0, |d| d.as_millis() as i64);
        self.current_timeout_ms.store(ms, Ordering::SeqCst);
    }

    fn end_timeout(&self) {
        self.current_timeout_ms.store(0, Ordering::SeqCst);
    }

    /// Remaining statement-timeout budget in milliseconds; zero when no
    /// timeout is armed.
    #[must_use]
    pub fn current_timeout_ms(&self) -> i64 {
        self.current_timeout_ms.load(Ordering::SeqCst)
    }

    pub(crate) fn reduce_timeout(&self, by_ms: i64) -> bool {
        let remaining = self.current_timeout_ms.load(Ordering::SeqCst);
        if remaining <= 0 {
            return false;
        }
        let next = remaining - by_ms;
        self.current_timeout_ms.store(next.max(0), Ordering::SeqCst);
        next <= 0
    }

    /// Closes the session: rolls back, releases its stores and removes
    /// it from the session manager. Idempotent.
    pub fn close(self: &Arc<Self>) {
        if self.is_closed() {
            return;
        }

        if let Err(e) = self.rollback_no_check() {
            debug!(session = %self.id, error = %e, "rollback during close failed");
        }

        self.clear_statement_tables();
        *self.data_cache.lock() = None;
        self.closed.store(true, Ordering::SeqCst);

        if let Some(db) = self.database.upgrade() {
            db.session_manager().remove(self.id);
        }
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("id", &self.id)
            .field("user", &self.user)
            .field("in_transaction", &self.is_transaction())
            .field("closed", &self.is_closed())
            .finish()
    }
}

/// Owns every open session.
pub struct SessionManager {
    sessions: RwLock<HashMap<SessionId, Arc<Session>>>,
    next_id: AtomicU64,
}

impl SessionManager {
    /// Creates an empty manager.
    #[must_use]
    pub fn new() -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            next_id: AtomicU64::new(1),
        }
    }

    /// Opens and registers a session.
    pub fn new_session(
        &self,
        database: Weak<Database>,
        user: String,
        autocommit: bool,
        read_only: bool,
        zone: String,
        isolation_default: IsolationLevel,
    ) -> Arc<Session> {
        let id = SessionId::new(self.next_id.fetch_add(1, Ordering::SeqCst));
        let session = Session::new(
            database,
            id,
            user,
            autocommit,
            read_only,
            zone,
            isolation_default,
        );
        self.sessions.write().insert(id, session.clone());
        session
    }

    /// Looks up a session by id.
    #[must_use]
    pub fn get(&self, id: SessionId) -> Option<Arc<Session>> {
        self.sessions.read().get(&id).cloned()
    }

    /// Looks up a session by its cancel-authentication random id.
    #[must_use]
    pub fn by_random_id(&self, random_id: u32) -> Option<Arc<Session>> {
        self.sessions
            .read()
            .values()
            .find(|session| session.random_id() == random_id)
            .cloned()
    }

    /// Every open session.
    #[must_use]
    pub fn all_sessions(&self) -> Vec<Arc<Session>> {
        self.sessions.read().values().cloned().collect()
    }

    /// Number of open sessions.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.sessions.read().len()
    }

    /// Drops a session from the registry.
    pub fn remove(&self, id: SessionId) {
        self.sessions.write().remove(&id);
    }
}

impl Default for SessionManager {
    fn default() -> Self {
        Self::new()
    }
}
