//! Multi-session transaction scenarios across the three concurrency
//! modes.

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use stratum_catalog::name::NameRef;
use stratum_common::config::DatabaseConfig;
use stratum_common::error::ErrorCode;
use stratum_common::types::{IsolationLevel, Timestamp, TxMode, Value};
use stratum_rights::manager::DBA_ROLE;
use stratum_store::store::RowStore;
use stratum_txn::database::Database;
use stratum_txn::session::Session;
use stratum_txn::statement::{FnStatement, Statement, StatementResult};

fn open_db(mode: TxMode) -> Arc<Database> {
    let config = DatabaseConfig {
        tx_mode: mode,
        ..DatabaseConfig::for_testing()
    };
    let db = Database::open(config).unwrap();
    db.grantee_manager().add_user("SA").unwrap();
    db.grantee_manager().grant_role("SA", DBA_ROLE).unwrap();
    db
}

fn make_table(db: &Arc<Database>, local: &str) -> (NameRef, Arc<dyn RowStore>) {
    let admin = db.connect("SA", true, false).unwrap();
    let schema = db.config().default_schema.clone();
    let name = db
        .create_table(&admin, &schema, local, &["K", "V"], &[0])
        .unwrap();
    let store = db.table_store(&name).unwrap();
    admin.close();
    (name, store)
}

fn insert_stmt(
    table: &NameRef,
    store: &Arc<dyn RowStore>,
    rows: Vec<(i64, i64)>,
) -> Arc<dyn Statement> {
    let table_ref = table.clone();
    let store_ref = store.clone();
    Arc::new(FnStatement::new(
        Vec::new(),
        vec![table.clone()],
        move |session: &Arc<Session>| {
            let mut count = 0;
            for (k, v) in &rows {
                session.insert_row(
                    &table_ref,
                    &store_ref,
                    vec![Value::Integer(*k), Value::Integer(*v)],
                )?;
                count += 1;
            }
            Ok(StatementResult::UpdateCount(count))
        },
    ))
}

fn read_stmt(table: &NameRef, store: &Arc<dyn RowStore>) -> Arc<dyn Statement> {
    let table_ref = table.clone();
    let store_ref = store.clone();
    Arc::new(FnStatement::new(
        vec![table.clone()],
        Vec::new(),
        move |session: &Arc<Session>| {
            let rows = session.read_table(&table_ref, &store_ref)?;
            Ok(StatementResult::Rows(
                rows.iter().map(|row| row.data().to_vec()).collect(),
            ))
        },
    ))
}

fn update_stmt(
    table: &NameRef,
    store: &Arc<dyn RowStore>,
    key: i64,
    new_value: i64,
) -> Arc<dyn Statement> {
    let table_ref = table.clone();
    let store_ref = store.clone();
    Arc::new(FnStatement::new(
        vec![table.clone()],
        vec![table.clone()],
        move |session: &Arc<Session>| {
            let rows = session.read_table(&table_ref, &store_ref)?;
            let mut count = 0;
            for row in rows {
                if row.data()[0] == Value::Integer(key) {
                    session.update_row(
                        &table_ref,
                        &store_ref,
                        &row,
                        vec![Value::Integer(key), Value::Integer(new_value)],
                        &[1],
                    )?;
                    count += 1;
                }
            }
            Ok(StatementResult::UpdateCount(count))
        },
    ))
}

fn delete_stmt(table: &NameRef, store: &Arc<dyn RowStore>, key: i64) -> Arc<dyn Statement> {
    let table_ref = table.clone();
    let store_ref = store.clone();
    Arc::new(FnStatement::new(
        vec![table.clone()],
        vec![table.clone()],
        move |session: &Arc<Session>| {
            let rows = session.read_table(&table_ref, &store_ref)?;
            let mut count = 0;
            for row in rows {
                if row.data()[0] == Value::Integer(key) {
                    session.delete_row(&table_ref, &store_ref, &row, &[])?;
                    count += 1;
                }
            }
            Ok(StatementResult::UpdateCount(count))
        },
    ))
}

fn keys_and_values(result: &StatementResult) -> Vec<(i64, i64)> {
    match result {
        StatementResult::Rows(rows) => rows
            .iter()
            .map(|row| match (&row[0], &row[1]) {
                (Value::Integer(k), Value::Integer(v)) => (*k, *v),
                other => panic!("unexpected row {other:?}"),
            })
            .collect(),
        StatementResult::UpdateCount(n) => panic!("expected rows, got update count {n}"),
    }
}

fn wait_until(deadline: Duration, mut check: impl FnMut() -> bool) -> bool {
    let start = Instant::now();
    while start.elapsed() < deadline {
        if check() {
            return true;
        }
        thread::sleep(Duration::from_millis(5));
    }
    false
}

// ----------------------------------------------------------------------
// S1 - lost update under MVCC
// ----------------------------------------------------------------------

#[test]
fn lost_update_fails_at_commit_under_mvcc() {
    let db = open_db(TxMode::Mvcc);
    let (table, store) = make_table(&db, "T1");

    let seeder = db.connect("SA", true, false).unwrap();
    seeder
        .execute(&insert_stmt(&table, &store, vec![(1, 5)]), None)
        .unwrap();
    seeder.close();

    let a = db.connect("SA", false, false).unwrap();
    let b = db.connect("SA", false, false).unwrap();

    // both transactions observe the seed row
    let seen_a = a.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&seen_a), vec![(1, 5)]);
    let seen_b = b.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&seen_b), vec![(1, 5)]);

    // A updates and commits first
    a.execute(&update_stmt(&table, &store, 1, 7), None).unwrap();
    a.commit().unwrap();

    // B's conflicting update is doomed at commit
    b.execute(&update_stmt(&table, &store, 1, 8), None).unwrap();
    let err = b.commit().unwrap_err();
    assert_eq!(err.code(), ErrorCode::SerializationFailure);

    // the committed value is A's
    let check = db.connect("SA", true, false).unwrap();
    let rows = check.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&rows), vec![(1, 7)]);

    db.shutdown();
}

// ----------------------------------------------------------------------
// S2 - 2PL deadlock avoidance
// ----------------------------------------------------------------------

#[test]
fn deadlock_cycle_aborts_later_session() {
    let db = open_db(TxMode::Locks);
    let (t1, s1) = make_table(&db, "T1");
    let (t2, s2) = make_table(&db, "T2");

    let a = db.connect("SA", false, false).unwrap();
    let b = db.connect("SA", false, false).unwrap();

    a.execute(&insert_stmt(&t1, &s1, vec![(1, 1)]), None).unwrap();
    b.execute(&insert_stmt(&t2, &s2, vec![(2, 2)]), None).unwrap();

    // A asks for T2 and parks behind B
    let a_clone = a.clone();
    let stmt = insert_stmt(&t2, &s2, vec![(3, 3)]);
    let parked = thread::spawn(move || a_clone.execute(&stmt, None));

    assert!(wait_until(Duration::from_secs(5), || a.latch.count() > 0));

    // B asking for T1 would close the cycle; B is aborted instead
    let err = b
        .execute(&insert_stmt(&t1, &s1, vec![(4, 4)]), None)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StatementAborted);
    assert!(!b.is_transaction());

    // A proceeds once B's locks are gone
    parked.join().unwrap().unwrap();
    a.commit().unwrap();

    let check = db.connect("SA", true, false).unwrap();
    let rows = check.execute(&read_stmt(&t2, &s2), None).unwrap();
    assert_eq!(keys_and_values(&rows), vec![(3, 3)]);

    db.shutdown();
}

// ----------------------------------------------------------------------
// S3 - savepoint partial rollback
// ----------------------------------------------------------------------

#[test]
fn savepoint_rolls_back_later_work_only() {
    for mode in [TxMode::Locks, TxMode::MvLocks, TxMode::Mvcc] {
        let db = open_db(mode);
        let (table, store) = make_table(&db, "T1");

        let session = db.connect("SA", false, false).unwrap();
        session
            .execute(&insert_stmt(&table, &store, vec![(1, 1), (2, 2), (3, 3)]), None)
            .unwrap();
        session.savepoint("SP").unwrap();
        session
            .execute(&insert_stmt(&table, &store, vec![(4, 4), (5, 5)]), None)
            .unwrap();

        session.rollback_to_savepoint("SP").unwrap();
        session.commit().unwrap();

        let check = db.connect("SA", true, false).unwrap();
        let rows = check.execute(&read_stmt(&table, &store), None).unwrap();
        assert_eq!(
            keys_and_values(&rows),
            vec![(1, 1), (2, 2), (3, 3)],
            "mode {mode}"
        );

        db.shutdown();
    }
}

#[test]
fn savepoint_with_no_intervening_work_changes_nothing() {
    let db = open_db(TxMode::Locks);
    let (table, store) = make_table(&db, "T1");

    let session = db.connect("SA", false, false).unwrap();
    session
        .execute(&insert_stmt(&table, &store, vec![(1, 1)]), None)
        .unwrap();
    session.savepoint("SP").unwrap();
    session.rollback_to_savepoint("SP").unwrap();
    session.commit().unwrap();

    let check = db.connect("SA", true, false).unwrap();
    let rows = check.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&rows), vec![(1, 1)]);

    db.shutdown();
}

#[test]
fn savepoint_demotes_collapsed_insert_delete() {
    let db = open_db(TxMode::Locks);
    let (table, store) = make_table(&db, "T1");

    let session = db.connect("SA", false, false).unwrap();
    session
        .execute(&insert_stmt(&table, &store, vec![(1, 1)]), None)
        .unwrap();
    session.savepoint("SP").unwrap();

    // deleting the row this transaction inserted collapses the action
    session
        .execute(&delete_stmt(&table, &store, 1), None)
        .unwrap();

    // rolling back past the delete restores the insert half
    session.rollback_to_savepoint("SP").unwrap();
    session.commit().unwrap();

    let check = db.connect("SA", true, false).unwrap();
    let rows = check.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&rows), vec![(1, 1)]);

    db.shutdown();
}

#[test]
fn release_savepoint_drops_it_and_later_ones() {
    let db = open_db(TxMode::Locks);
    let (table, store) = make_table(&db, "T1");

    let session = db.connect("SA", false, false).unwrap();
    session
        .execute(&insert_stmt(&table, &store, vec![(1, 1)]), None)
        .unwrap();
    session.savepoint("A").unwrap();
    session.savepoint("B").unwrap();

    session.release_savepoint("A").unwrap();
    assert!(session.rollback_to_savepoint("A").is_err());
    assert!(session.rollback_to_savepoint("B").is_err());

    session.rollback().unwrap();
    db.shutdown();
}

// ----------------------------------------------------------------------
// S4 - hybrid promotion through the full stack
// ----------------------------------------------------------------------

#[test]
fn table_store_promotes_and_keeps_key_order() {
    let db = open_db(TxMode::Locks);
    let (table, store) = make_table(&db, "T1");
    let threshold = db.config().result_memory_row_count;

    let session = db.connect("SA", true, false).unwrap();
    // insert out of key order, one past the threshold
    for i in (0..=threshold as i64).rev() {
        session
            .execute(&insert_stmt(&table, &store, vec![(i, i * 10)]), None)
            .unwrap();
    }

    assert!(store.is_cached());
    assert_eq!(store.row_count(), threshold + 1);

    let rows = session.execute(&read_stmt(&table, &store), None).unwrap();
    let keys: Vec<i64> = keys_and_values(&rows).iter().map(|(k, _)| *k).collect();
    assert_eq!(keys, (0..=threshold as i64).collect::<Vec<_>>());

    db.shutdown();
}

// ----------------------------------------------------------------------
// MVCC visibility
// ----------------------------------------------------------------------

#[test]
fn repeatable_read_keeps_its_snapshot() {
    let db = open_db(TxMode::Mvcc);
    let (table, store) = make_table(&db, "T1");

    let seeder = db.connect("SA", true, false).unwrap();
    seeder
        .execute(&insert_stmt(&table, &store, vec![(1, 1)]), None)
        .unwrap();

    let reader = db.connect("SA", false, false).unwrap();
    reader.set_isolation(IsolationLevel::RepeatableRead).unwrap();
    let first = reader.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&first), vec![(1, 1)]);

    // a commit after the snapshot stays invisible
    seeder
        .execute(&insert_stmt(&table, &store, vec![(2, 2)]), None)
        .unwrap();

    let again = reader.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&again), vec![(1, 1)]);
    reader.commit().unwrap();

    // a fresh transaction sees both
    let fresh = reader.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&fresh), vec![(1, 1), (2, 2)]);

    db.shutdown();
}

#[test]
fn uncommitted_writes_stay_invisible_to_others() {
    let db = open_db(TxMode::Mvcc);
    let (table, store) = make_table(&db, "T1");

    let writer = db.connect("SA", false, false).unwrap();
    writer
        .execute(&insert_stmt(&table, &store, vec![(1, 1)]), None)
        .unwrap();

    // the writer sees its own uncommitted row
    let own = writer.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&own), vec![(1, 1)]);

    // nobody else does
    let other = db.connect("SA", true, false).unwrap();
    let seen = other.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&seen), vec![]);

    writer.commit().unwrap();
    let seen = other.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&seen), vec![(1, 1)]);

    db.shutdown();
}

#[test]
fn mvlocks_read_only_session_reads_without_locking() {
    let db = open_db(TxMode::MvLocks);
    let (table, store) = make_table(&db, "T1");

    let seeder = db.connect("SA", true, false).unwrap();
    seeder
        .execute(&insert_stmt(&table, &store, vec![(1, 1)]), None)
        .unwrap();

    let writer = db.connect("SA", false, false).unwrap();
    writer
        .execute(&update_stmt(&table, &store, 1, 9), None)
        .unwrap();

    // a read-only session neither blocks nor sees the uncommitted change
    let reader = db.connect("SA", false, true).unwrap();
    let seen = reader.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&seen), vec![(1, 1)]);
    reader.commit().unwrap();

    writer.commit().unwrap();

    let check = db.connect("SA", true, false).unwrap();
    let seen = check.execute(&read_stmt(&table, &store), None).unwrap();
    assert_eq!(keys_and_values(&seen), vec![(1, 9)]);

    db.shutdown();
}

// ----------------------------------------------------------------------
// rollback and invariants
// ----------------------------------------------------------------------

#[test]
fn rollback_restores_pre_transaction_state() {
    for mode in [TxMode::Locks, TxMode::MvLocks, TxMode::Mvcc] {
        let db = open_db(mode);
        let (table, store) = make_table(&db, "T1");

        let seeder = db.connect("SA", true, false).unwrap();
        seeder
            .execute(&insert_stmt(&table, &store, vec![(1, 1)]), None)
            .unwrap();

        let session = db.connect("SA", false, false).unwrap();
        session
            .execute(&insert_stmt(&table, &store, vec![(2, 2), (3, 3)]), None)
            .unwrap();
        session
            .execute(&delete_stmt(&table, &store, 1), None)
            .unwrap();
        session.rollback().unwrap();

        let rows = seeder.execute(&read_stmt(&table, &store), None).unwrap();
        assert_eq!(keys_and_values(&rows), vec![(1, 1)], "mode {mode}");

        db.shutdown();
    }
}

#[test]
fn transaction_count_tracks_open_transactions() {
    let db = open_db(TxMode::Locks);
    let (t1, s1) = make_table(&db, "T1");
    let (t2, s2) = make_table(&db, "T2");
    let manager = db.tx_manager();

    let a = db.connect("SA", false, false).unwrap();
    let b = db.connect("SA", false, false).unwrap();
    assert_eq!(manager.common().transaction_count(), 0);

    a.execute(&insert_stmt(&t1, &s1, vec![(1, 1)]), None).unwrap();
    b.execute(&read_stmt(&t2, &s2), None).unwrap();
    assert_eq!(manager.common().transaction_count(), 2);

    let open: u64 = db
        .session_manager()
        .all_sessions()
        .iter()
        .filter(|s| s.is_transaction())
        .count() as u64;
    assert_eq!(manager.common().transaction_count(), open);

    // the live deque is strictly monotonic and matches the sessions
    let live = manager.common().live_transaction_timestamps();
    assert!(live.windows(2).all(|w| w[0] < w[1]));
    assert!(live.contains(&a.transaction_timestamp()));
    assert!(live.contains(&b.transaction_timestamp()));

    a.commit().unwrap();
    b.rollback().unwrap();
    assert_eq!(manager.common().transaction_count(), 0);
    assert!(manager.common().live_transaction_timestamps().is_empty());

    db.shutdown();
}

#[test]
fn global_action_log_is_strictly_increasing() {
    let db = open_db(TxMode::Mvcc);
    let (table, store) = make_table(&db, "T1");

    let a = db.connect("SA", false, false).unwrap();
    let b = db.connect("SA", false, false).unwrap();
    a.execute(&insert_stmt(&table, &store, vec![(1, 1), (2, 2)]), None)
        .unwrap();
    b.execute(&insert_stmt(&table, &store, vec![(3, 3)]), None)
        .unwrap();
    a.execute(&insert_stmt(&table, &store, vec![(4, 4)]), None)
        .unwrap();

    let merged = db.global_row_action_list();
    let timestamps: Vec<Timestamp> = merged
        .iter()
        .map(|action| action.read().action_timestamp)
        .collect();
    assert_eq!(timestamps.len(), 4);
    assert!(timestamps.windows(2).all(|w| w[0] < w[1]));

    a.rollback().unwrap();
    b.rollback().unwrap();
    db.shutdown();
}

// ----------------------------------------------------------------------
// mode switching
// ----------------------------------------------------------------------

#[test]
fn mode_switch_refused_with_two_live_transactions() {
    let db = open_db(TxMode::Locks);
    let (t1, s1) = make_table(&db, "T1");
    let (t2, s2) = make_table(&db, "T2");

    let a = db.connect("SA", false, false).unwrap();
    let b = db.connect("SA", false, false).unwrap();
    a.execute(&insert_stmt(&t1, &s1, vec![(1, 1)]), None).unwrap();
    b.execute(&insert_stmt(&t2, &s2, vec![(2, 2)]), None).unwrap();

    let err = db.set_transaction_control(&a, TxMode::Mvcc).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidTransactionState);

    b.commit().unwrap();
    db.set_transaction_control(&a, TxMode::Mvcc).unwrap();
    assert_eq!(db.tx_manager().mode(), TxMode::Mvcc);

    // the new manager inherits the live transaction
    assert!(db
        .tx_manager()
        .common()
        .live_transaction_timestamps()
        .contains(&a.transaction_timestamp()));

    a.commit().unwrap();
    db.shutdown();
}

#[test]
fn mode_switch_to_same_mode_is_a_noop() {
    let db = open_db(TxMode::Mvcc);
    let session = db.connect("SA", false, false).unwrap();
    let before = Arc::as_ptr(&db.tx_manager()) as *const ();
    db.set_transaction_control(&session, TxMode::Mvcc).unwrap();
    let after = Arc::as_ptr(&db.tx_manager()) as *const ();
    assert_eq!(before, after);
    db.shutdown();
}

// ----------------------------------------------------------------------
// session attributes, cancel, timeout
// ----------------------------------------------------------------------

#[test]
fn isolation_setter_is_idempotent_and_fails_mid_transaction() {
    let db = open_db(TxMode::Locks);
    let (table, store) = make_table(&db, "T1");
    let session = db.connect("SA", false, false).unwrap();

    session.set_isolation(IsolationLevel::Serializable).unwrap();
    session.set_isolation(IsolationLevel::Serializable).unwrap();
    assert_eq!(session.isolation(), IsolationLevel::Serializable);

    // READ UNCOMMITTED is rewritten at SET time
    session
        .set_isolation(IsolationLevel::ReadUncommitted)
        .unwrap();
    assert_eq!(session.isolation(), IsolationLevel::ReadCommitted);

    session
        .execute(&insert_stmt(&table, &store, vec![(1, 1)]), None)
        .unwrap();
    let err = session
        .set_isolation(IsolationLevel::Serializable)
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidTransactionState);

    session.rollback().unwrap();
    db.shutdown();
}

#[test]
fn cancel_after_statement_completion_is_a_noop() {
    let db = open_db(TxMode::Locks);
    let (table, store) = make_table(&db, "T1");
    let session = db.connect("SA", true, false).unwrap();

    session
        .execute(&insert_stmt(&table, &store, vec![(1, 1)]), None)
        .unwrap();
    let stale_ts = session.statement_start_timestamp();

    // random id matches but the statement has completed
    assert!(db.cancel_statement(session.random_id(), stale_ts));
    // an unknown random id is rejected outright
    assert!(!db.cancel_statement(session.random_id().wrapping_add(1), stale_ts));

    // the session is unharmed
    session
        .execute(&insert_stmt(&table, &store, vec![(2, 2)]), None)
        .unwrap();

    db.shutdown();
}

#[test]
fn statement_timeout_aborts_only_the_statement() {
    let db = open_db(TxMode::Locks);
    let (t1, s1) = make_table(&db, "T1");
    let (t2, s2) = make_table(&db, "T2");

    let holder = db.connect("SA", false, false).unwrap();
    holder
        .execute(&insert_stmt(&t1, &s1, vec![(1, 1)]), None)
        .unwrap();

    let blocked = db.connect("SA", false, false).unwrap();
    blocked
        .execute(&insert_stmt(&t2, &s2, vec![(2, 2)]), None)
        .unwrap();

    // the statement parks behind the holder's lock and times out
    let blocked_clone = blocked.clone();
    let stmt = insert_stmt(&t1, &s1, vec![(3, 3)]);
    let waiter = thread::spawn(move || {
        blocked_clone.execute(&stmt, Some(Duration::from_millis(100)))
    });

    let err = waiter.join().unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::StatementAborted);

    // only the statement died; the transaction and its prior work live
    assert!(blocked.is_transaction());
    blocked.commit().unwrap();

    holder.commit().unwrap();

    let check = db.connect("SA", true, false).unwrap();
    let rows = check.execute(&read_stmt(&t2, &s2), None).unwrap();
    assert_eq!(keys_and_values(&rows), vec![(2, 2)]);

    db.shutdown();
}

#[test]
fn reset_all_restores_connection_defaults() {
    let db = open_db(TxMode::Locks);
    let session = db.connect("SA", false, false).unwrap();

    session.set_max_rows(50);
    session.set_isolation(IsolationLevel::Serializable).unwrap();

    // reset-all only applies to the session itself, outside a transaction
    db.tx_manager().common().reset_session(
        session.id(),
        &session,
        Timestamp::ZERO,
        stratum_txn::manager::ResetMode::ResetAll,
    );

    assert_eq!(session.max_rows(), 0);
    assert_eq!(session.isolation(), IsolationLevel::ReadCommitted);
    assert!(session.is_autocommit());

    // a reset requested by another session is ignored
    session.set_max_rows(25);
    db.tx_manager().common().reset_session(
        stratum_common::types::SessionId::INVALID,
        &session,
        Timestamp::ZERO,
        stratum_txn::manager::ResetMode::ResetAll,
    );
    assert_eq!(session.max_rows(), 25);

    db.shutdown();
}

#[test]
fn reset_rollback_aborts_a_waiting_session() {
    let db = open_db(TxMode::Locks);
    let (t1, s1) = make_table(&db, "T1");
    let (t2, s2) = make_table(&db, "T2");

    let holder = db.connect("SA", false, false).unwrap();
    holder
        .execute(&insert_stmt(&t1, &s1, vec![(1, 1)]), None)
        .unwrap();

    let victim = db.connect("SA", false, false).unwrap();
    victim
        .execute(&insert_stmt(&t2, &s2, vec![(2, 2)]), None)
        .unwrap();

    // the victim parks behind the holder's lock
    let victim_clone = victim.clone();
    let stmt = insert_stmt(&t1, &s1, vec![(3, 3)]);
    let parked = thread::spawn(move || victim_clone.execute(&stmt, None));
    assert!(wait_until(Duration::from_secs(5), || victim.latch.count() > 0));

    // another session forces the whole transaction back
    db.tx_manager().common().reset_session(
        holder.id(),
        &victim,
        Timestamp::ZERO,
        stratum_txn::manager::ResetMode::Rollback,
    );

    let err = parked.join().unwrap().unwrap_err();
    assert_eq!(err.code(), ErrorCode::SerializationFailure);
    assert!(!victim.is_transaction());

    holder.commit().unwrap();

    // the victim's earlier insert was rolled back with the transaction
    let check = db.connect("SA", true, false).unwrap();
    let rows = check.execute(&read_stmt(&t2, &s2), None).unwrap();
    assert_eq!(keys_and_values(&rows), vec![]);

    db.shutdown();
}
