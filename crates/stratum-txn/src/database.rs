//! The database facade.
//!
//! All global mutable state - the name registry, schema catalog, grantee
//! manager, the active transaction manager and the session registry - is
//! confined to one `Database` value handed to every session at
//! construction, so tests instantiate isolated databases freely.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};
use std::thread::JoinHandle;
use std::time::Duration;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::debug;

use stratum_catalog::manager::SchemaManager;
use stratum_catalog::name::{NameRef, NameRegistry, ObjectKind};
use stratum_catalog::object::{SchemaObject, Table};
use stratum_common::config::DatabaseConfig;
use stratum_common::error::{StratumError, StratumResult};
use stratum_common::types::{SessionId, Timestamp, TxMode};
use stratum_rights::manager::{GranteeManager, DBA_ROLE};
use stratum_store::cache::DataCache;
use stratum_store::store::{HybridRowStore, RowStore, StoreDef};

use crate::action::ActionRef;
use crate::manager::locks::TwoPhaseLocking;
use crate::manager::mvcc::Mvcc;
use crate::manager::mvlocks::MultiVersion2pl;
use crate::manager::{
    CommitLog, LobUsage, NoopCommitLog, NoopLobUsage, ResetMode, TransactionManager, TxCommon,
};
use crate::session::{Session, SessionManager};

/// An embedded database instance.
pub struct Database {
    config: DatabaseConfig,
    registry: Arc<NameRegistry>,
    schema_manager: SchemaManager,
    grantee_manager: GranteeManager,
    session_manager: Arc<SessionManager>,
    tx_manager: RwLock<Arc<dyn TransactionManager>>,
    commit_log: Arc<dyn CommitLog>,
    lob_usage: Arc<dyn LobUsage>,
    data_cache: Arc<DataCache>,
    stores: DashMap<u64, Arc<dyn RowStore>>,
    timeout_stop: Arc<AtomicBool>,
    timeout_thread: Mutex<Option<JoinHandle<()>>>,
}

impl Database {
    /// Opens a database with the default collaborators.
    pub fn open(config: DatabaseConfig) -> StratumResult<Arc<Self>> {
        Self::open_with(
            config,
            Arc::new(NoopCommitLog),
            Arc::new(NoopLobUsage),
        )
    }

    /// Opens a database with explicit logger and LOB collaborators.
    pub fn open_with(
        config: DatabaseConfig,
        commit_log: Arc<dyn CommitLog>,
        lob_usage: Arc<dyn LobUsage>,
    ) -> StratumResult<Arc<Self>> {
        config
            .validate()
            .map_err(|message| StratumError::InvalidArgument { message })?;

        let registry = Arc::new(NameRegistry::new());
        let grantee_manager = GranteeManager::new(registry.clone());
        let dba = grantee_manager.name_of(DBA_ROLE)?;
        let schema_manager = SchemaManager::new(registry.clone(), &config.default_schema, dba);

        let session_manager = Arc::new(SessionManager::new());
        let catalog_name = registry.new_name("STRATUM", ObjectKind::Schema);
        let tx_manager = make_manager(
            config.tx_mode,
            config.clone(),
            session_manager.clone(),
            commit_log.clone(),
            lob_usage.clone(),
            catalog_name,
        );

        let db = Arc::new(Self {
            config: config.clone(),
            registry,
            schema_manager,
            grantee_manager,
            session_manager,
            tx_manager: RwLock::new(tx_manager),
            commit_log,
            lob_usage,
            data_cache: Arc::new(DataCache::new()),
            stores: DashMap::new(),
            timeout_stop: Arc::new(AtomicBool::new(false)),
            timeout_thread: Mutex::new(None),
        });

        let weak = Arc::downgrade(&db);
        let stop = db.timeout_stop.clone();
        let tick = config.timeout_tick;
        let handle = std::thread::Builder::new()
            .name("stratum-timeout".to_string())
            .spawn(move || timeout_loop(&weak, &stop, tick))
            .map_err(|e| StratumError::internal(format!("timeout runner failed: {e}")))?;
        *db.timeout_thread.lock() = Some(handle);

        Ok(db)
    }

    /// The configuration.
    #[must_use]
    pub fn config(&self) -> &DatabaseConfig {
        &self.config
    }

    /// The shared name registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<NameRegistry> {
        &self.registry
    }

    /// The schema catalog.
    #[must_use]
    pub fn schema_manager(&self) -> &SchemaManager {
        &self.schema_manager
    }

    /// The grantee manager.
    #[must_use]
    pub fn grantee_manager(&self) -> &GranteeManager {
        &self.grantee_manager
    }

    /// The session registry.
    #[must_use]
    pub fn session_manager(&self) -> &Arc<SessionManager> {
        &self.session_manager
    }

    /// The commit-log collaborator.
    #[must_use]
    pub fn commit_log(&self) -> &Arc<dyn CommitLog> {
        &self.commit_log
    }

    /// The active transaction manager.
    #[must_use]
    pub fn tx_manager(&self) -> Arc<dyn TransactionManager> {
        self.tx_manager.read().clone()
    }

    /// Opens a session for an existing, non-role grantee in the UTC
    /// zone.
    pub fn connect(
        self: &Arc<Self>,
        user: &str,
        autocommit: bool,
        read_only: bool,
    ) -> StratumResult<Arc<Session>> {
        self.connect_with_zone(user, autocommit, read_only, "UTC")
    }

    /// Opens a session for an existing, non-role grantee.
    pub fn connect_with_zone(
        self: &Arc<Self>,
        user: &str,
        autocommit: bool,
        read_only: bool,
        zone: &str,
    ) -> StratumResult<Arc<Session>> {
        if self.grantee_manager.is_role(user)? {
            return Err(StratumError::InvalidArgument {
                message: format!("{user} is a role, not a user"),
            });
        }

        Ok(self.session_manager.new_session(
            Arc::downgrade(self),
            user.to_string(),
            autocommit,
            read_only,
            zone.to_string(),
            self.config.default_isolation,
        ))
    }

    /// Switches the concurrency control mode.
    ///
    /// Permitted only while at most one transaction is live; the new
    /// manager inherits the timestamp counter and the live deque, and
    /// the old manager is marked expired.
    pub fn set_transaction_control(
        &self,
        session: &Arc<Session>,
        mode: TxMode,
    ) -> StratumResult<()> {
        let mut slot = self.tx_manager.write();
        let current = slot.clone();

        if current.mode() == mode {
            return Ok(());
        }

        let live = current.common().live_transaction_timestamps();
        if live.len() > 1 {
            return Err(StratumError::ModeSwitchRefused { target: mode });
        }

        let replacement = make_manager(
            mode,
            self.config.clone(),
            self.session_manager.clone(),
            self.commit_log.clone(),
            self.lob_usage.clone(),
            current.common().catalog_name().clone(),
        );
        replacement
            .common()
            .inherit_timestamp(current.common().current_timestamp());
        replacement.common().inherit_live_transactions(live);

        // sessions queued behind the switching session recompute their
        // waits against the new manager from scratch
        for waiter in session.waiting_snapshot() {
            waiter.take_waited_sessions();
        }

        current.common().expire();
        *slot = replacement;

        debug!(mode = %mode, "transaction control switched");
        Ok(())
    }

    // ------------------------------------------------------------------
    // DDL surface
    // ------------------------------------------------------------------

    /// Creates a schema owned by the calling user. Requires admin.
    pub fn create_schema(
        &self,
        session: &Arc<Session>,
        local: &str,
    ) -> StratumResult<NameRef> {
        if !self.grantee_manager.is_admin(session.user())? {
            return Err(StratumError::NotAuthorized {
                name: local.to_string(),
            });
        }

        let owner = self.grantee_manager.name_of(session.user())?;
        self.schema_manager.create_schema(local, owner)
    }

    /// Drops a schema; removed objects lose their stores and rights.
    pub fn drop_schema(
        &self,
        session: &Arc<Session>,
        local: &str,
        cascade: bool,
    ) -> StratumResult<Vec<NameRef>> {
        let schema = self.schema_manager.schema_name(local)?;
        if !self
            .grantee_manager
            .has_schema_update_or_grant_rights(session.user(), &schema)?
        {
            return Err(StratumError::NotAuthorized {
                name: local.to_string(),
            });
        }

        let dropped = self.schema_manager.drop_schema(local, cascade)?;
        self.forget_objects(&dropped);
        Ok(dropped)
    }

    /// Creates a table in a schema keyed on `key_columns`, and wires up
    /// its row store. The primary index orders rows without enforcing
    /// uniqueness; under the multi-version modes a replaced row's prior
    /// version stays indexed until its deletion commits.
    pub fn create_table(
        &self,
        session: &Arc<Session>,
        schema_local: &str,
        local: &str,
        column_names: &[&str],
        key_columns: &[usize],
    ) -> StratumResult<NameRef> {
        let schema = self.schema_manager.schema_name(schema_local)?;
        if !self
            .grantee_manager
            .has_schema_update_or_grant_rights(session.user(), &schema)?
        {
            return Err(StratumError::NotAuthorized {
                name: local.to_string(),
            });
        }

        let name = self
            .registry
            .new_object_name(local, ObjectKind::Table, schema);
        let columns = column_names
            .iter()
            .map(|column| {
                self.registry
                    .new_child_name(column, ObjectKind::Column, name.clone())
            })
            .collect();

        self.schema_manager
            .add_schema_object(SchemaObject::Table(Table::new(name.clone(), columns)))?;

        let store: Arc<dyn RowStore> = Arc::new(HybridRowStore::new(
            StoreDef::keyed(column_names.len(), key_columns.to_vec(), false),
            self.config.result_memory_row_count,
            self.data_cache.clone(),
            true,
        ));
        self.stores.insert(name.id(), store);

        Ok(name)
    }

    /// Drops a table; dependents fall with it under cascade.
    pub fn drop_table(
        &self,
        session: &Arc<Session>,
        name: &NameRef,
        cascade: bool,
    ) -> StratumResult<Vec<NameRef>> {
        let schema = name
            .schema
            .clone()
            .ok_or_else(|| StratumError::internal("table without a schema"))?;
        if !self
            .grantee_manager
            .has_schema_update_or_grant_rights(session.user(), &schema)?
        {
            return Err(StratumError::NotAuthorized {
                name: name.qualified(),
            });
        }

        let dropped = self.schema_manager.drop_table(name, cascade)?;
        self.forget_objects(&dropped);
        Ok(dropped)
    }

    fn forget_objects(&self, dropped: &[NameRef]) {
        for name in dropped {
            self.grantee_manager.remove_db_object(name);
            self.stores.remove(&name.id());
        }
    }

    /// Advances a sequence for a session, appending the sequence record
    /// to the commit log. A logging failure is warned about; the value
    /// stands regardless.
    pub fn next_sequence_value(
        &self,
        session: &Arc<Session>,
        name: &NameRef,
    ) -> StratumResult<i64> {
        let value = self.schema_manager.advance_sequence(name)?;

        if let Err(e) = self.commit_log.write_sequence_statement(session.id(), name) {
            tracing::warn!(session = %session.id(), error = %e, "sequence logging failed");
        }

        Ok(value)
    }

    /// The row store injected for a table.
    pub fn table_store(&self, name: &NameRef) -> StratumResult<Arc<dyn RowStore>> {
        self.stores
            .get(&name.id())
            .map(|entry| entry.clone())
            .ok_or_else(|| StratumError::ObjectNotFound {
                name: name.qualified(),
            })
    }

    // ------------------------------------------------------------------
    // cancel and shutdown
    // ------------------------------------------------------------------

    /// Cancels the statement a session is running, authenticated by the
    /// session's random id and matched by the statement-start timestamp
    /// the caller observed. A statement that already moved on is left
    /// alone.
    pub fn cancel_statement(&self, random_id: u32, statement_timestamp: Timestamp) -> bool {
        let Some(target) = self.session_manager.by_random_id(random_id) else {
            return false;
        };

        let manager = self.tx_manager();
        manager.common().reset_session(
            SessionId::INVALID,
            &target,
            statement_timestamp,
            ResetMode::Statement,
        );
        true
    }

    /// Every session's row actions merged into one sequence ordered by
    /// action timestamp; a debugging view over the global log.
    #[must_use]
    pub fn global_row_action_list(&self) -> Vec<ActionRef> {
        let mut actions: Vec<ActionRef> = self
            .session_manager
            .all_sessions()
            .iter()
            .flat_map(|session| session.action_snapshot())
            .collect();
        actions.sort_by_key(|action| action.read().action_timestamp);
        actions
    }

    /// Stops the timeout runner and closes every session.
    pub fn shutdown(&self) {
        self.timeout_stop.store(true, Ordering::SeqCst);
        if let Some(handle) = self.timeout_thread.lock().take() {
            let _ = handle.join();
        }

        for session in self.session_manager.all_sessions() {
            session.close();
        }
    }
}

impl Drop for Database {
    fn drop(&mut self) {
        self.timeout_stop.store(true, Ordering::SeqCst);
    }
}

fn make_manager(
    mode: TxMode,
    config: DatabaseConfig,
    sessions: Arc<SessionManager>,
    commit_log: Arc<dyn CommitLog>,
    lob_usage: Arc<dyn LobUsage>,
    catalog_name: NameRef,
) -> Arc<dyn TransactionManager> {
    let common = TxCommon::new(mode, config, sessions, commit_log, lob_usage, catalog_name);
    match mode {
        TxMode::Locks => Arc::new(TwoPhaseLocking::new(common)),
        TxMode::MvLocks => Arc::new(MultiVersion2pl::new(common)),
        TxMode::Mvcc => Arc::new(Mvcc::new(common)),
    }
}

fn timeout_loop(database: &Weak<Database>, stop: &AtomicBool, tick: Duration) {
    let tick_ms = tick.as_millis() as i64;

    while !stop.load(Ordering::SeqCst) {
        std::thread::sleep(tick);

        let Some(db) = database.upgrade() else {
            break;
        };

        let manager = db.tx_manager();
        for session in db.session_manager().all_sessions() {
            if session.reduce_timeout(tick_ms) {
                debug!(session = %session.id(), "statement timeout expired");
                manager.common().reset_session(
                    SessionId::INVALID,
                    &session,
                    session.statement_start_timestamp(),
                    ResetMode::Statement,
                );
            }
        }
    }
}

/// A session reset applied from another session, by mode.
pub fn reset_session(
    database: &Database,
    caller: SessionId,
    target: &Arc<Session>,
    statement_timestamp: Timestamp,
    mode: ResetMode,
) {
    database
        .tx_manager()
        .common()
        .reset_session(caller, target, statement_timestamp, mode);
}
