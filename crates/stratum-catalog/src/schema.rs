//! The schema container.

use std::collections::BTreeMap;

use stratum_common::error::{StratumError, StratumResult};

use crate::name::{NameRef, ObjectKind};
use crate::object::SchemaObject;

/// A named container of database objects, one ordered map per object
/// family. Owned by a grantee.
#[derive(Debug)]
pub struct Schema {
    /// The schema's interned name; its `owner` field names the grantee.
    pub name: NameRef,
    tables: BTreeMap<String, SchemaObject>,
    sequences: BTreeMap<String, SchemaObject>,
    routines: BTreeMap<String, SchemaObject>,
    types: BTreeMap<String, SchemaObject>,
    charsets: BTreeMap<String, SchemaObject>,
    collations: BTreeMap<String, SchemaObject>,
    synonyms: BTreeMap<String, SchemaObject>,
    indexes: BTreeMap<String, SchemaObject>,
    constraints: BTreeMap<String, SchemaObject>,
    triggers: BTreeMap<String, SchemaObject>,
}

impl Schema {
    /// Creates an empty schema.
    #[must_use]
    pub fn new(name: NameRef) -> Self {
        Self {
            name,
            tables: BTreeMap::new(),
            sequences: BTreeMap::new(),
            routines: BTreeMap::new(),
            types: BTreeMap::new(),
            charsets: BTreeMap::new(),
            collations: BTreeMap::new(),
            synonyms: BTreeMap::new(),
            indexes: BTreeMap::new(),
            constraints: BTreeMap::new(),
            triggers: BTreeMap::new(),
        }
    }

    /// The grantee owning this schema.
    #[must_use]
    pub fn owner(&self) -> Option<&NameRef> {
        self.name.owner.as_ref()
    }

    fn set_for(&self, kind: ObjectKind) -> &BTreeMap<String, SchemaObject> {
        match kind {
            ObjectKind::Table | ObjectKind::View => &self.tables,
            ObjectKind::Sequence => &self.sequences,
            ObjectKind::Routine | ObjectKind::SpecificRoutine => &self.routines,
            // user-defined types and domains share a namespace
            ObjectKind::Type | ObjectKind::Domain => &self.types,
            ObjectKind::Charset => &self.charsets,
            ObjectKind::Collation => &self.collations,
            ObjectKind::Reference => &self.synonyms,
            ObjectKind::Index => &self.indexes,
            ObjectKind::Constraint => &self.constraints,
            ObjectKind::Trigger => &self.triggers,
            ObjectKind::Schema | ObjectKind::Column | ObjectKind::Grantee => {
                unreachable!("kind {kind} is not stored in schema sets")
            }
        }
    }

    fn set_for_mut(&mut self, kind: ObjectKind) -> &mut BTreeMap<String, SchemaObject> {
        match kind {
            ObjectKind::Table | ObjectKind::View => &mut self.tables,
            ObjectKind::Sequence => &mut self.sequences,
            ObjectKind::Routine | ObjectKind::SpecificRoutine => &mut self.routines,
            ObjectKind::Type | ObjectKind::Domain => &mut self.types,
            ObjectKind::Charset => &mut self.charsets,
            ObjectKind::Collation => &mut self.collations,
            ObjectKind::Reference => &mut self.synonyms,
            ObjectKind::Index => &mut self.indexes,
            ObjectKind::Constraint => &mut self.constraints,
            ObjectKind::Trigger => &mut self.triggers,
            ObjectKind::Schema | ObjectKind::Column | ObjectKind::Grantee => {
                unreachable!("kind {kind} is not stored in schema sets")
            }
        }
    }

    /// True when no object of any family remains. Table children
    /// (indexes, constraints, triggers) never keep a schema alive on
    /// their own.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.is_empty()
            && self.sequences.is_empty()
            && self.routines.is_empty()
            && self.types.is_empty()
            && self.charsets.is_empty()
            && self.collations.is_empty()
            && self.synonyms.is_empty()
    }

    /// Inserts an object, failing on a name collision within its family.
    pub fn add(&mut self, object: SchemaObject) -> StratumResult<()> {
        let local = object.name().local();
        let set = self.set_for_mut(object.kind());

        if set.contains_key(&local) {
            return Err(StratumError::ObjectExists {
                name: object.name().qualified(),
            });
        }

        set.insert(local, object);
        Ok(())
    }

    /// Looks up an object by simple name and kind.
    #[must_use]
    pub fn find(&self, local: &str, kind: ObjectKind) -> Option<&SchemaObject> {
        self.set_for(kind)
            .get(local)
            .filter(|object| kind_matches(object.kind(), kind))
    }

    /// Mutable lookup by simple name and kind.
    pub fn find_mut(&mut self, local: &str, kind: ObjectKind) -> Option<&mut SchemaObject> {
        self.set_for_mut(kind)
            .get_mut(local)
            .filter(|object| kind_matches(object.kind(), kind))
    }

    /// Removes an object by simple name and kind.
    pub fn remove(&mut self, local: &str, kind: ObjectKind) -> Option<SchemaObject> {
        if self.find(local, kind).is_none() {
            return None;
        }
        self.set_for_mut(kind).remove(local)
    }

    /// Renames an object within this schema. The interned name keeps its
    /// identity; only the spelling changes.
    pub fn rename(&mut self, name: &NameRef, new_local: &str) -> StratumResult<()> {
        let set = self.set_for_mut(name.kind);

        if set.contains_key(new_local) {
            return Err(StratumError::ObjectExists {
                name: new_local.to_string(),
            });
        }

        let object = set
            .remove(&name.local())
            .ok_or(StratumError::ObjectNotFound {
                name: name.qualified(),
            })?;
        name.rename_to(new_local);
        set.insert(new_local.to_string(), object);
        Ok(())
    }

    /// Iterates the objects of one family.
    pub fn objects_of(&self, kind: ObjectKind) -> impl Iterator<Item = &SchemaObject> {
        self.set_for(kind)
            .values()
            .filter(move |object| kind_matches(object.kind(), kind))
    }

    /// Names of every object across all families, children included.
    #[must_use]
    pub fn all_object_names(&self) -> Vec<NameRef> {
        [
            &self.tables,
            &self.sequences,
            &self.routines,
            &self.types,
            &self.charsets,
            &self.collations,
            &self.synonyms,
            &self.indexes,
            &self.constraints,
            &self.triggers,
        ]
        .into_iter()
        .flat_map(|set| set.values().map(|object| object.name().clone()))
        .collect()
    }
}

/// A lookup kind matches the stored kind when equal, or when both fall in
/// a shared namespace (tables/views, types/domains, routine names).
fn kind_matches(stored: ObjectKind, wanted: ObjectKind) -> bool {
    if stored == wanted {
        return true;
    }
    matches!(
        (stored, wanted),
        (ObjectKind::Table, ObjectKind::View)
            | (ObjectKind::View, ObjectKind::Table)
            | (ObjectKind::Type, ObjectKind::Domain)
            | (ObjectKind::Domain, ObjectKind::Type)
            | (ObjectKind::Routine, ObjectKind::SpecificRoutine)
            | (ObjectKind::SpecificRoutine, ObjectKind::Routine)
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::name::NameRegistry;
    use crate::object::{Table, TypeObject};

    fn fixture() -> (NameRegistry, Schema) {
        let registry = NameRegistry::new();
        let owner = registry.new_name("SA", ObjectKind::Grantee);
        let schema_name = registry.new_schema_name("PUBLIC", owner);
        let schema = Schema::new(schema_name);
        (registry, schema)
    }

    #[test]
    fn test_add_find_remove() {
        let (registry, mut schema) = fixture();
        let name = registry.new_object_name("T1", ObjectKind::Table, schema.name.clone());
        schema
            .add(SchemaObject::Table(Table::new(name, Vec::new())))
            .unwrap();

        assert!(schema.find("T1", ObjectKind::Table).is_some());
        assert!(!schema.is_empty());

        schema.remove("T1", ObjectKind::Table);
        assert!(schema.is_empty());
    }

    #[test]
    fn test_duplicate_rejected() {
        let (registry, mut schema) = fixture();
        let a = registry.new_object_name("T1", ObjectKind::Table, schema.name.clone());
        let b = registry.new_object_name("T1", ObjectKind::Table, schema.name.clone());
        schema
            .add(SchemaObject::Table(Table::new(a, Vec::new())))
            .unwrap();
        let err = schema
            .add(SchemaObject::Table(Table::new(b, Vec::new())))
            .unwrap_err();
        assert!(matches!(err, StratumError::ObjectExists { .. }));
    }

    #[test]
    fn test_type_lookup_resolves_domains() {
        let (registry, mut schema) = fixture();
        let name = registry.new_object_name("D1", ObjectKind::Domain, schema.name.clone());
        schema
            .add(SchemaObject::Type(TypeObject::new(name, "VARCHAR(10)")))
            .unwrap();

        assert!(schema.find("D1", ObjectKind::Type).is_some());
        assert!(schema.find("D1", ObjectKind::Domain).is_some());
    }

    #[test]
    fn test_rename_in_place() {
        let (registry, mut schema) = fixture();
        let name = registry.new_object_name("T1", ObjectKind::Table, schema.name.clone());
        schema
            .add(SchemaObject::Table(Table::new(name.clone(), Vec::new())))
            .unwrap();

        schema.rename(&name, "T2").unwrap();

        assert!(schema.find("T1", ObjectKind::Table).is_none());
        assert!(schema.find("T2", ObjectKind::Table).is_some());
        assert_eq!(name.local(), "T2");
    }
}
