//! DDL and rights scenarios through the database facade.

use std::sync::Arc;

use stratum_catalog::name::ObjectKind;
use stratum_catalog::object::{SchemaObject, View};
use stratum_common::config::DatabaseConfig;
use stratum_common::error::ErrorCode;
use stratum_rights::manager::{DBA_ROLE, SYSTEM_AUTHORIZATION};
use stratum_rights::right::{Privileges, Right};
use stratum_txn::database::Database;

fn open_db() -> Arc<Database> {
    let db = Database::open(DatabaseConfig::for_testing()).unwrap();
    db.grantee_manager().add_user("SA").unwrap();
    db.grantee_manager().grant_role("SA", DBA_ROLE).unwrap();
    db
}

#[test]
fn cascading_schema_drop_takes_cross_schema_views() {
    let db = open_db();
    let admin = db.connect("SA", true, false).unwrap();

    db.create_schema(&admin, "S").unwrap();
    db.create_schema(&admin, "S2").unwrap();

    let t1 = db.create_table(&admin, "S", "T1", &["K"], &[0]).unwrap();

    // V1 in S over T1, V2 in S2 over V1
    let s_name = db.schema_manager().schema_name("S").unwrap();
    let v1 = db
        .registry()
        .new_object_name("V1", ObjectKind::View, s_name);
    db.schema_manager()
        .add_schema_object(SchemaObject::View(View::new(v1.clone(), vec![t1.clone()])))
        .unwrap();

    let s2_name = db.schema_manager().schema_name("S2").unwrap();
    let v2 = db
        .registry()
        .new_object_name("V2", ObjectKind::View, s2_name);
    db.schema_manager()
        .add_schema_object(SchemaObject::View(View::new(v2.clone(), vec![v1.clone()])))
        .unwrap();

    // without cascade the schema is not empty
    let err = db.drop_schema(&admin, "S", false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::SchemaNotEmpty);

    let dropped = db.drop_schema(&admin, "S", true).unwrap();
    assert!(dropped.contains(&v2));
    assert!(dropped.contains(&v1));
    assert!(dropped.contains(&t1));

    // the table's store is gone with it
    assert!(db.table_store(&t1).is_err());
    assert!(db
        .schema_manager()
        .object_name("S2", "V2", ObjectKind::View)
        .is_err());

    db.shutdown();
}

#[test]
fn unprivileged_user_cannot_touch_the_catalog() {
    let db = open_db();
    let admin = db.connect("SA", true, false).unwrap();
    let table = db
        .create_table(&admin, "PUBLIC", "T1", &["K"], &[0])
        .unwrap();

    db.grantee_manager().add_user("GUEST").unwrap();
    let guest = db.connect("GUEST", true, false).unwrap();

    let err = db
        .create_table(&guest, "PUBLIC", "T2", &["K"], &[0])
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAuthorized);

    let err = db.drop_table(&guest, &table, false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAuthorized);

    let err = db.create_schema(&guest, "MINE").unwrap_err();
    assert_eq!(err.code(), ErrorCode::NotAuthorized);

    db.shutdown();
}

#[test]
fn granted_rights_are_stripped_when_the_table_drops() {
    let db = open_db();
    let admin = db.connect("SA", true, false).unwrap();
    let table = db
        .create_table(&admin, "PUBLIC", "T1", &["K"], &[0])
        .unwrap();

    db.grantee_manager().add_user("GUEST").unwrap();
    db.grantee_manager()
        .grant(
            "GUEST",
            &table,
            &Right::with_privileges(Privileges::SELECT),
            SYSTEM_AUTHORIZATION,
            false,
            db.schema_manager(),
        )
        .unwrap();
    assert!(db
        .grantee_manager()
        .is_accessible("GUEST", &table, Some(Privileges::SELECT))
        .unwrap());

    db.drop_table(&admin, &table, false).unwrap();
    assert!(!db
        .grantee_manager()
        .is_accessible("GUEST", &table, None)
        .unwrap());

    db.shutdown();
}

#[test]
fn sequences_advance_and_survive_lookup() {
    let db = open_db();
    let admin = db.connect("SA", true, false).unwrap();

    let schema = db.schema_manager().default_schema_name();
    let name = db
        .registry()
        .new_object_name("SEQ1", ObjectKind::Sequence, schema);
    db.schema_manager()
        .add_schema_object(SchemaObject::Sequence(
            stratum_catalog::object::Sequence::new(name.clone(), 100, 5),
        ))
        .unwrap();

    assert_eq!(db.next_sequence_value(&admin, &name).unwrap(), 100);
    assert_eq!(db.next_sequence_value(&admin, &name).unwrap(), 105);

    let resolved = db
        .schema_manager()
        .object_name("PUBLIC", "SEQ1", ObjectKind::Sequence)
        .unwrap();
    assert_eq!(resolved, name);

    db.shutdown();
}

#[test]
fn connect_rejects_roles_and_unknown_users() {
    let db = open_db();

    let err = db.connect(DBA_ROLE, true, false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::InvalidArgument);

    let err = db.connect("NOBODY", true, false).unwrap_err();
    assert_eq!(err.code(), ErrorCode::GranteeNotFound);

    db.shutdown();
}

#[test]
fn dropping_the_default_schema_reinstalls_an_empty_one() {
    let db = open_db();
    let admin = db.connect("SA", true, false).unwrap();
    db.create_table(&admin, "PUBLIC", "T1", &["K"], &[0])
        .unwrap();

    db.drop_schema(&admin, "PUBLIC", true).unwrap();

    // a fresh empty default with the same name exists
    let schema = db.schema_manager().schema_name("PUBLIC").unwrap();
    assert_eq!(schema.local(), "PUBLIC");
    assert!(db
        .schema_manager()
        .object_name("PUBLIC", "T1", ObjectKind::Table)
        .is_err());

    // and it is usable
    db.create_table(&admin, "PUBLIC", "T2", &["K"], &[0])
        .unwrap();

    db.shutdown();
}
