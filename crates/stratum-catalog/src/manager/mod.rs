//! The schema catalog.
//!
//! All DDL runs under one read/write lock: readers and writers never
//! interleave mutations, and a failed operation leaves no partial state
//! behind. Cascading drops walk the reference graph's transitive closure
//! and remove child-named objects before their parents.
//!
//! The catalog never calls into the rights layer. Drop operations return
//! the full list of removed names so the caller can strip grantee rights
//! for each.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use stratum_common::error::{StratumError, StratumResult};
use stratum_common::types::Timestamp;

use crate::name::{NameRef, NameRegistry, ObjectKind};
use crate::object::SchemaObject;
use crate::reference::ReferenceGraph;
use crate::schema::Schema;

/// Reserved name of the system schema.
pub const SYSTEM_SCHEMA: &str = "SYSTEM_SCHEMA";

/// Reserved name of the information schema.
pub const INFORMATION_SCHEMA: &str = "INFORMATION_SCHEMA";

struct CatalogState {
    schemas: BTreeMap<String, Schema>,
    graph: ReferenceGraph,
    default_schema: NameRef,
}

/// Schema/object CRUD with reference integrity.
pub struct SchemaManager {
    registry: Arc<NameRegistry>,
    state: RwLock<CatalogState>,
    /// Bumped by every DDL mutation; compiled statements compare against
    /// it to detect staleness.
    change_timestamp: AtomicU64,
}

impl SchemaManager {
    /// Creates a catalog with an empty default schema owned by
    /// `default_owner`.
    #[must_use]
    pub fn new(registry: Arc<NameRegistry>, default_schema: &str, default_owner: NameRef) -> Self {
        let name = registry.new_schema_name(default_schema, default_owner);
        let mut schemas = BTreeMap::new();
        schemas.insert(default_schema.to_string(), Schema::new(name.clone()));

        Self {
            registry,
            state: RwLock::new(CatalogState {
                schemas,
                graph: ReferenceGraph::new(),
                default_schema: name,
            }),
            change_timestamp: AtomicU64::new(1),
        }
    }

    /// The shared name registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<NameRegistry> {
        &self.registry
    }

    /// Timestamp of the last DDL mutation.
    #[must_use]
    pub fn schema_change_timestamp(&self) -> Timestamp {
        Timestamp::new(self.change_timestamp.load(Ordering::SeqCst))
    }

    fn bump(&self) -> Timestamp {
        Timestamp::new(self.change_timestamp.fetch_add(1, Ordering::SeqCst) + 1)
    }

    /// The current default schema name.
    #[must_use]
    pub fn default_schema_name(&self) -> NameRef {
        self.state.read().default_schema.clone()
    }

    /// Returns true for reserved system schema names.
    #[must_use]
    pub fn is_system_schema(local: &str) -> bool {
        local == SYSTEM_SCHEMA || local == INFORMATION_SCHEMA
    }

    /// Creates a schema. Fails on system names and duplicates.
    pub fn create_schema(&self, local: &str, owner: NameRef) -> StratumResult<NameRef> {
        if Self::is_system_schema(local) {
            return Err(StratumError::SchemaNotModifiable {
                name: local.to_string(),
            });
        }

        let mut state = self.state.write();

        if state.schemas.contains_key(local) {
            return Err(StratumError::ObjectExists {
                name: local.to_string(),
            });
        }

        let name = self.registry.new_schema_name(local, owner);
        state.schemas.insert(local.to_string(), Schema::new(name.clone()));
        drop(state);

        self.bump();
        debug!(schema = local, "created schema");
        Ok(name)
    }

    /// Resolves a schema name.
    pub fn schema_name(&self, local: &str) -> StratumResult<NameRef> {
        self.state
            .read()
            .schemas
            .get(local)
            .map(|schema| schema.name.clone())
            .ok_or_else(|| StratumError::ObjectNotFound {
                name: local.to_string(),
            })
    }

    /// Drops a schema, cascading through external referrers when asked.
    ///
    /// Returns every name removed, the schema's own included, so the
    /// caller can revoke rights on each. If the dropped schema was the
    /// default, a fresh empty default with the same name and owner is
    /// installed.
    pub fn drop_schema(&self, local: &str, cascade: bool) -> StratumResult<Vec<NameRef>> {
        if Self::is_system_schema(local) {
            return Err(StratumError::SchemaNotModifiable {
                name: local.to_string(),
            });
        }

        let mut state = self.state.write();

        let schema = state
            .schemas
            .get(local)
            .ok_or_else(|| StratumError::ObjectNotFound {
                name: local.to_string(),
            })?;
        let schema_name = schema.name.clone();

        if !cascade && !schema.is_empty() {
            return Err(StratumError::SchemaNotEmpty {
                name: local.to_string(),
            });
        }

        let mut external = Vec::new();
        state
            .graph
            .cascading_referrers_in_schema(&schema_name, &mut external);

        let mut dropped = Vec::new();
        remove_objects(&mut state, &external, &mut dropped);

        let own: Vec<NameRef> = state
            .schemas
            .get(local)
            .map(Schema::all_object_names)
            .unwrap_or_default();
        remove_objects(&mut state, &own, &mut dropped);

        state.schemas.remove(local);
        dropped.push(schema_name.clone());

        if state.default_schema == schema_name {
            let owner = schema_name.owner.clone().ok_or_else(|| {
                StratumError::internal("default schema has no owner")
            })?;
            let fresh = self.registry.new_schema_name(local, owner);
            state
                .schemas
                .insert(local.to_string(), Schema::new(fresh.clone()));
            state.default_schema = fresh;
        }

        drop(state);
        self.bump();
        debug!(schema = local, cascade, "dropped schema");
        Ok(dropped)
    }

    /// Inserts an object into its schema and records its reference edges.
    pub fn add_schema_object(&self, object: SchemaObject) -> StratumResult<()> {
        let name = object.name().clone();
        let schema_name = name
            .schema
            .clone()
            .ok_or_else(|| StratumError::internal("schema object without a schema"))?;

        let mut state = self.state.write();
        let CatalogState { schemas, graph, .. } = &mut *state;

        let schema = schemas
            .get_mut(&schema_name.local())
            .ok_or_else(|| StratumError::ObjectNotFound {
                name: schema_name.local(),
            })?;

        if schema.find(&name.local(), name.kind).is_some() {
            return Err(StratumError::ObjectExists {
                name: name.qualified(),
            });
        }

        // table children register with their parent
        if let Some(parent) = &name.parent {
            match schema.find_mut(&parent.local(), parent.kind) {
                Some(SchemaObject::Table(table)) => table.dependents.push(name.clone()),
                _ => {
                    return Err(StratumError::ObjectNotFound {
                        name: parent.qualified(),
                    })
                }
            }
        }

        graph.add_references(&object);
        schema.add(object)?;

        drop(state);
        self.bump();
        Ok(())
    }

    /// Resolves an object name within a schema, following synonyms.
    pub fn object_name(
        &self,
        schema_local: &str,
        local: &str,
        kind: ObjectKind,
    ) -> StratumResult<NameRef> {
        let state = self.state.read();
        let schema = state
            .schemas
            .get(schema_local)
            .ok_or_else(|| StratumError::ObjectNotFound {
                name: schema_local.to_string(),
            })?;

        if let Some(object) = schema.find(local, kind) {
            return Ok(object.name().clone());
        }

        if let Some(SchemaObject::Reference(synonym)) = schema.find(local, ObjectKind::Reference) {
            if synonym.target.kind == kind {
                return Ok(synonym.target.clone());
            }
        }

        Err(StratumError::ObjectNotFound {
            name: format!("{}.{}", schema_local, local),
        })
    }

    /// Names of every object of `kind` in a schema; used by schema-wide
    /// grant and revoke.
    pub fn object_names(&self, schema_local: &str, kind: ObjectKind) -> Vec<NameRef> {
        let state = self.state.read();
        state
            .schemas
            .get(schema_local)
            .map(|schema| {
                schema
                    .objects_of(kind)
                    .map(|object| object.name().clone())
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Runs `f` against an object, read-locked.
    pub fn with_object<R>(
        &self,
        name: &NameRef,
        f: impl FnOnce(&SchemaObject) -> R,
    ) -> StratumResult<R> {
        let state = self.state.read();
        let object = lookup(&state, name).ok_or_else(|| StratumError::ObjectNotFound {
            name: name.qualified(),
        })?;
        Ok(f(object))
    }

    /// Direct referrers of a name.
    #[must_use]
    pub fn referrers_of(&self, name: &NameRef) -> Vec<NameRef> {
        self.state.read().graph.referrers_of(name)
    }

    /// Transitive referrer closure of a name.
    #[must_use]
    pub fn cascading_referrers_of(&self, name: &NameRef) -> Vec<NameRef> {
        let state = self.state.read();
        let mut set = Vec::new();
        state.graph.cascading_referrers_of(name, &mut set);
        set
    }

    /// Removes an object, cascading through referrers when asked.
    /// Returns the removed names.
    pub fn remove_schema_object(
        &self,
        name: &NameRef,
        cascade: bool,
    ) -> StratumResult<Vec<NameRef>> {
        let mut state = self.state.write();

        let mut object_set = Vec::new();

        match name.kind {
            ObjectKind::Routine => {
                // reference edges key on the specific name
                if let Some(SchemaObject::Routine(routine)) = lookup(&state, name) {
                    let specific = routine.specific_name.clone();
                    state
                        .graph
                        .cascading_referrers_of(&specific, &mut object_set);
                }
            }
            ObjectKind::Domain => {
                for referrer in state.graph.referrers_of(name) {
                    if referrer.kind != ObjectKind::Column {
                        return Err(StratumError::ObjectReferenced {
                            name: name.qualified(),
                            referrer: referrer.qualified(),
                        });
                    }
                }
            }
            _ => {
                state.graph.cascading_referrers_of(name, &mut object_set);
            }
        }

        let mut dropped = Vec::new();

        if object_set.is_empty() {
            remove_object_unchecked(&mut state, name, &mut dropped);
        } else {
            if !cascade {
                return Err(StratumError::ObjectReferenced {
                    name: name.qualified(),
                    referrer: object_set[0].qualified(),
                });
            }

            object_set.push(name.clone());
            remove_objects(&mut state, &object_set, &mut dropped);
        }

        drop(state);
        self.bump();
        Ok(dropped)
    }

    /// Drops a table, refusing without cascade while exported foreign
    /// keys or external referrers exist. Returns the removed names.
    pub fn drop_table(&self, name: &NameRef, cascade: bool) -> StratumResult<Vec<NameRef>> {
        let mut state = self.state.write();

        let mut external = Vec::new();
        state.graph.cascading_referrers_of(name, &mut external);

        if !cascade {
            // exported foreign keys first: a constraint owned by another
            // table that references this one
            for referrer in &external {
                if referrer.kind == ObjectKind::Constraint
                    && referrer.parent.as_ref() != Some(name)
                {
                    return Err(StratumError::ObjectReferenced {
                        name: name.qualified(),
                        referrer: referrer.qualified(),
                    });
                }
            }

            for referrer in &external {
                if referrer.parent.as_ref() != Some(name) {
                    return Err(StratumError::ObjectReferenced {
                        name: name.qualified(),
                        referrer: referrer.qualified(),
                    });
                }
            }
        }

        let affected = affected_tables(&external, name);

        let mut dropped = Vec::new();
        remove_objects(&mut state, &external, &mut dropped);
        remove_object_unchecked(&mut state, name, &mut dropped);

        drop(state);
        let timestamp = self.bump();
        for table in affected {
            self.recompile_referrers(&table, timestamp);
        }

        debug!(table = %name, cascade, "dropped table");
        Ok(dropped)
    }

    /// Renames an object in place. Fails while the object is referenced
    /// by anything other than its own children, except for constraints,
    /// which may be renamed freely.
    pub fn rename_schema_object(&self, name: &NameRef, new_local: &str) -> StratumResult<()> {
        self.check_object_is_referenced(name)?;

        let mut state = self.state.write();
        let schema_name = name
            .schema
            .clone()
            .ok_or_else(|| StratumError::internal("rename of a schema-less name"))?;
        let schema = state
            .schemas
            .get_mut(&schema_name.local())
            .ok_or_else(|| StratumError::ObjectNotFound {
                name: schema_name.local(),
            })?;

        schema.rename(name, new_local)?;
        drop(state);
        self.bump();
        Ok(())
    }

    /// Fails with `OBJECT_REFERENCED` while `name` has referrers other
    /// than its own children. Constraint names are exempt; their
    /// compiled form carries no embedded spelling.
    pub fn check_object_is_referenced(&self, name: &NameRef) -> StratumResult<()> {
        if name.kind == ObjectKind::Constraint {
            return Ok(());
        }

        let state = self.state.read();
        for referrer in state.graph.referrers_of(name) {
            if referrer.parent.as_ref() != Some(name) {
                return Err(StratumError::ObjectReferenced {
                    name: name.qualified(),
                    referrer: referrer.qualified(),
                });
            }
        }
        Ok(())
    }

    /// Advances a sequence and returns the value before the step.
    pub fn advance_sequence(&self, name: &NameRef) -> StratumResult<i64> {
        let mut state = self.state.write();
        match lookup_mut(&mut state, name) {
            Some(SchemaObject::Sequence(sequence)) => Ok(sequence.next_value()),
            _ => Err(StratumError::ObjectNotFound {
                name: name.qualified(),
            }),
        }
    }

    /// After ALTER TABLE: asks each dependent view, constraint, routine
    /// and trigger to recompile against the new definition.
    pub fn recompile_dependent_objects(&self, table: &NameRef) {
        let timestamp = self.bump();
        self.recompile_referrers(table, timestamp);
    }

    fn recompile_referrers(&self, table: &NameRef, timestamp: Timestamp) {
        let kinds = [
            ObjectKind::View,
            ObjectKind::Constraint,
            ObjectKind::Routine,
            ObjectKind::SpecificRoutine,
            ObjectKind::Trigger,
        ];

        let referrers = {
            let state = self.state.read();
            state.graph.referrers_of_kind(table, &kinds)
        };

        let mut state = self.state.write();
        for name in referrers {
            if let Some(object) = lookup_mut(&mut state, &name) {
                object.recompile(timestamp);
            }
        }
    }
}

fn lookup<'a>(state: &'a CatalogState, name: &NameRef) -> Option<&'a SchemaObject> {
    let schema_local = name.schema.as_ref()?.local();
    state.schemas.get(&schema_local)?.find(&name.local(), name.kind)
}

fn lookup_mut<'a>(state: &'a mut CatalogState, name: &NameRef) -> Option<&'a mut SchemaObject> {
    let schema_local = name.schema.as_ref()?.local();
    state
        .schemas
        .get_mut(&schema_local)?
        .find_mut(&name.local(), name.kind)
}

/// Tables owning a constraint in `names`, excluding `dropping`; these
/// must recompile after the drop.
fn affected_tables(names: &[NameRef], dropping: &NameRef) -> Vec<NameRef> {
    let mut tables = Vec::new();
    for name in names {
        if name.kind != ObjectKind::Constraint {
            continue;
        }
        if let Some(parent) = &name.parent {
            if parent != dropping && !tables.contains(parent) {
                tables.push(parent.clone());
            }
        }
    }
    tables
}

/// Removes a set of objects: child-named objects first, parent-less last.
fn remove_objects(state: &mut CatalogState, names: &[NameRef], dropped: &mut Vec<NameRef>) {
    for name in names.iter().filter(|n| n.parent.is_some()) {
        remove_object_unchecked(state, name, dropped);
    }

    for name in names.iter().filter(|n| n.parent.is_none()) {
        remove_object_unchecked(state, name, dropped);
    }
}

/// Removes one object and its table children, cleaning every edge it
/// contributed. A name already removed is skipped.
fn remove_object_unchecked(state: &mut CatalogState, name: &NameRef, dropped: &mut Vec<NameRef>) {
    let Some(schema_name) = name.schema.clone() else {
        return;
    };

    let CatalogState { schemas, graph, .. } = &mut *state;
    let Some(schema) = schemas.get_mut(&schema_name.local()) else {
        return;
    };

    let Some(object) = schema.remove(&name.local(), name.kind) else {
        return;
    };

    if let SchemaObject::Table(table) = &object {
        for child in &table.dependents {
            if let Some(child_object) = schema.remove(&child.local(), child.kind) {
                graph.remove_references(&child_object);
                graph.remove_referent(child);
                dropped.push(child.clone());
            }
        }
    }

    if let Some(parent) = &name.parent {
        if let Some(SchemaObject::Table(table)) = schema.find_mut(&parent.local(), parent.kind) {
            table.dependents.retain(|d| d != name);
        }
    }

    graph.remove_references(&object);
    graph.remove_referent(object.reference_name());
    graph.remove_referent(name);
    dropped.push(name.clone());
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::object::{Constraint, ConstraintKind, Table, View};

    struct Fixture {
        manager: SchemaManager,
        owner: NameRef,
    }

    impl Fixture {
        fn new() -> Self {
            let registry = Arc::new(NameRegistry::new());
            let owner = registry.new_name("SA", ObjectKind::Grantee);
            let manager = SchemaManager::new(registry, "PUBLIC", owner.clone());
            Self { manager, owner }
        }

        fn add_table(&self, schema: &str, local: &str) -> NameRef {
            let schema_name = self.manager.schema_name(schema).unwrap();
            let name =
                self.manager
                    .registry()
                    .new_object_name(local, ObjectKind::Table, schema_name);
            self.manager
                .add_schema_object(SchemaObject::Table(Table::new(name.clone(), Vec::new())))
                .unwrap();
            name
        }

        fn add_view(&self, schema: &str, local: &str, over: &[&NameRef]) -> NameRef {
            let schema_name = self.manager.schema_name(schema).unwrap();
            let name =
                self.manager
                    .registry()
                    .new_object_name(local, ObjectKind::View, schema_name);
            let refs = over.iter().map(|&n| n.clone()).collect();
            self.manager
                .add_schema_object(SchemaObject::View(View::new(name.clone(), refs)))
                .unwrap();
            name
        }
    }

    #[test]
    fn test_create_and_drop_empty_schema() {
        let fx = Fixture::new();
        fx.manager.create_schema("S1", fx.owner.clone()).unwrap();
        let dropped = fx.manager.drop_schema("S1", false).unwrap();
        assert_eq!(dropped.len(), 1);
        assert!(fx.manager.schema_name("S1").is_err());
    }

    #[test]
    fn test_system_schema_protected() {
        let fx = Fixture::new();
        let err = fx
            .manager
            .create_schema(SYSTEM_SCHEMA, fx.owner.clone())
            .unwrap_err();
        assert!(matches!(err, StratumError::SchemaNotModifiable { .. }));
    }

    #[test]
    fn test_drop_non_empty_schema_requires_cascade() {
        let fx = Fixture::new();
        fx.manager.create_schema("S1", fx.owner.clone()).unwrap();
        fx.add_table("S1", "T1");

        let err = fx.manager.drop_schema("S1", false).unwrap_err();
        assert!(matches!(err, StratumError::SchemaNotEmpty { .. }));

        let dropped = fx.manager.drop_schema("S1", true).unwrap();
        // table + schema
        assert_eq!(dropped.len(), 2);
    }

    #[test]
    fn test_drop_default_schema_reinstalls_empty_default() {
        let fx = Fixture::new();
        fx.add_table("PUBLIC", "T1");

        let before = fx.manager.default_schema_name();
        fx.manager.drop_schema("PUBLIC", true).unwrap();
        let after = fx.manager.default_schema_name();

        assert_ne!(before, after);
        assert_eq!(after.local(), "PUBLIC");
        assert!(fx.manager.schema_name("PUBLIC").is_ok());
    }

    #[test]
    fn test_remove_referenced_object_requires_cascade() {
        let fx = Fixture::new();
        let t1 = fx.add_table("PUBLIC", "T1");
        let v1 = fx.add_view("PUBLIC", "V1", &[&t1]);

        let err = fx.manager.remove_schema_object(&t1, false).unwrap_err();
        assert!(matches!(err, StratumError::ObjectReferenced { .. }));

        let dropped = fx.manager.remove_schema_object(&t1, true).unwrap();
        assert!(dropped.contains(&t1));
        assert!(dropped.contains(&v1));
        assert!(fx.manager.object_name("PUBLIC", "V1", ObjectKind::View).is_err());
    }

    #[test]
    fn test_cascading_drop_across_schemas() {
        let fx = Fixture::new();
        fx.manager.create_schema("S", fx.owner.clone()).unwrap();
        fx.manager.create_schema("S2", fx.owner.clone()).unwrap();

        let t1 = fx.add_table("S", "T1");
        let v1 = fx.add_view("S", "V1", &[&t1]);
        let v2 = fx.add_view("S2", "V2", &[&v1]);

        let dropped = fx.manager.drop_schema("S", true).unwrap();
        assert!(dropped.contains(&v2));
        assert!(dropped.contains(&v1));
        assert!(dropped.contains(&t1));
        assert!(fx
            .manager
            .object_name("S2", "V2", ObjectKind::View)
            .is_err());
    }

    #[test]
    fn test_rename_refused_while_referenced() {
        let fx = Fixture::new();
        let t1 = fx.add_table("PUBLIC", "T1");
        let _v1 = fx.add_view("PUBLIC", "V1", &[&t1]);

        let err = fx.manager.rename_schema_object(&t1, "T2").unwrap_err();
        assert!(matches!(err, StratumError::ObjectReferenced { .. }));
    }

    #[test]
    fn test_rename_in_place() {
        let fx = Fixture::new();
        let t1 = fx.add_table("PUBLIC", "T1");
        fx.manager.rename_schema_object(&t1, "T2").unwrap();

        assert_eq!(t1.local(), "T2");
        assert!(fx
            .manager
            .object_name("PUBLIC", "T2", ObjectKind::Table)
            .is_ok());
        assert!(fx
            .manager
            .object_name("PUBLIC", "T1", ObjectKind::Table)
            .is_err());
    }

    #[test]
    fn test_drop_table_with_exported_key() {
        let fx = Fixture::new();
        let main = fx.add_table("PUBLIC", "MAIN");
        let referring = fx.add_table("PUBLIC", "REFERRING");

        let fk_name = fx.manager.registry().new_child_name(
            "FK1",
            ObjectKind::Constraint,
            referring.clone(),
        );
        fx.manager
            .add_schema_object(SchemaObject::Constraint(Constraint {
                name: fk_name.clone(),
                kind: ConstraintKind::ForeignKey {
                    main_table: main.clone(),
                },
                references: vec![main.clone()],
                compile_timestamp: Timestamp::ZERO,
            }))
            .unwrap();

        let err = fx.manager.drop_table(&main, false).unwrap_err();
        assert!(matches!(err, StratumError::ObjectReferenced { .. }));

        let dropped = fx.manager.drop_table(&main, true).unwrap();
        assert!(dropped.contains(&fk_name));
        assert!(dropped.contains(&main));
        // the referring table itself survives
        assert!(fx
            .manager
            .object_name("PUBLIC", "REFERRING", ObjectKind::Table)
            .is_ok());
    }

    #[test]
    fn test_change_timestamp_moves_on_ddl() {
        let fx = Fixture::new();
        let before = fx.manager.schema_change_timestamp();
        fx.add_table("PUBLIC", "T1");
        assert!(fx.manager.schema_change_timestamp() > before);
    }
}
