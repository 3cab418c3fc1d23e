//! Interned object names.
//!
//! A [`Name`] is issued once by the [`NameRegistry`] and keeps its identity
//! for life. Equality and hashing go through a process-unique 64-bit id, so
//! two names with the same spelling in different schemas - or the same
//! spelling after a drop and re-create - are distinct objects. Renames
//! change the spelling in place; every holder of the name sees the new
//! spelling without re-resolution. The registry does not enforce uniqueness
//! of spellings; the schema object sets do.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;

/// The kind tag carried by every name.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ObjectKind {
    /// A schema.
    Schema,
    /// A base table.
    Table,
    /// A view.
    View,
    /// A table column.
    Column,
    /// An index.
    Index,
    /// A table constraint.
    Constraint,
    /// A number sequence.
    Sequence,
    /// A routine (procedure or function).
    Routine,
    /// The specific name of one routine body.
    SpecificRoutine,
    /// A trigger.
    Trigger,
    /// A user-defined type.
    Type,
    /// A domain.
    Domain,
    /// A character set.
    Charset,
    /// A collation.
    Collation,
    /// A user or role.
    Grantee,
    /// A synonym.
    Reference,
}

impl ObjectKind {
    /// Returns true for kinds that live directly in a schema's object
    /// sets (as opposed to children of a table or grantees).
    #[must_use]
    pub const fn is_schema_level(self) -> bool {
        matches!(
            self,
            ObjectKind::Table
                | ObjectKind::View
                | ObjectKind::Sequence
                | ObjectKind::Routine
                | ObjectKind::SpecificRoutine
                | ObjectKind::Type
                | ObjectKind::Domain
                | ObjectKind::Charset
                | ObjectKind::Collation
                | ObjectKind::Reference
        )
    }

    /// Returns true for kinds whose compiled form embeds the names it
    /// references in statement text.
    #[must_use]
    pub const fn embeds_names(self) -> bool {
        matches!(
            self,
            ObjectKind::View
                | ObjectKind::Routine
                | ObjectKind::SpecificRoutine
                | ObjectKind::Trigger
        )
    }
}

impl fmt::Display for ObjectKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjectKind::Schema => "SCHEMA",
            ObjectKind::Table => "TABLE",
            ObjectKind::View => "VIEW",
            ObjectKind::Column => "COLUMN",
            ObjectKind::Index => "INDEX",
            ObjectKind::Constraint => "CONSTRAINT",
            ObjectKind::Sequence => "SEQUENCE",
            ObjectKind::Routine => "ROUTINE",
            ObjectKind::SpecificRoutine => "SPECIFIC ROUTINE",
            ObjectKind::Trigger => "TRIGGER",
            ObjectKind::Type => "TYPE",
            ObjectKind::Domain => "DOMAIN",
            ObjectKind::Charset => "CHARACTER SET",
            ObjectKind::Collation => "COLLATION",
            ObjectKind::Grantee => "GRANTEE",
            ObjectKind::Reference => "SYNONYM",
        };
        write!(f, "{}", s)
    }
}

/// A shared, interned name.
pub type NameRef = Arc<Name>;

#[derive(Debug)]
struct NameText {
    name: String,
    statement_name: String,
}

/// An interned object identity.
///
/// Holds the textual name, its statement-quoted form, the kind tag, the
/// owning schema name (absent for schemas and grantees), the parent name
/// (for columns, indexes, constraints and triggers) and, for schema names,
/// the owning grantee's name.
#[derive(Debug)]
pub struct Name {
    id: u64,
    /// Kind tag.
    pub kind: ObjectKind,
    /// Owning schema name, when the object lives in a schema.
    pub schema: Option<NameRef>,
    /// Parent object name, for table children.
    pub parent: Option<NameRef>,
    /// Owning grantee's name; set on schema and grantee names.
    pub owner: Option<NameRef>,
    text: RwLock<NameText>,
}

impl Name {
    /// Returns the interned identity of this name.
    #[inline]
    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }

    /// The object's simple name.
    #[must_use]
    pub fn local(&self) -> String {
        self.text.read().name.clone()
    }

    /// The name as it appears in statement text, quoted when needed.
    #[must_use]
    pub fn statement_name(&self) -> String {
        self.text.read().statement_name.clone()
    }

    /// Returns the schema-qualified statement form, e.g. `PUBLIC.T1`.
    #[must_use]
    pub fn qualified(&self) -> String {
        match &self.schema {
            Some(schema) => format!("{}.{}", schema.statement_name(), self.statement_name()),
            None => self.statement_name(),
        }
    }

    /// Re-spells the name in place; identity is unchanged.
    pub fn rename_to(&self, local: &str) {
        let mut text = self.text.write();
        text.name = local.to_string();
        text.statement_name = statement_form(local);
    }
}

impl PartialEq for Name {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
    }
}

impl Eq for Name {}

impl Hash for Name {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.qualified())
    }
}

/// Issues unique immutable names.
#[derive(Debug)]
pub struct NameRegistry {
    next_id: AtomicU64,
}

impl NameRegistry {
    /// Creates a new registry.
    #[must_use]
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> u64 {
        self.next_id.fetch_add(1, Ordering::SeqCst)
    }

    fn build(
        &self,
        local: &str,
        kind: ObjectKind,
        schema: Option<NameRef>,
        parent: Option<NameRef>,
        owner: Option<NameRef>,
    ) -> NameRef {
        Arc::new(Name {
            id: self.next_id(),
            kind,
            schema,
            parent,
            owner,
            text: RwLock::new(NameText {
                name: local.to_string(),
                statement_name: statement_form(local),
            }),
        })
    }

    /// Issues a schema-less name (schemas themselves, grantees).
    #[must_use]
    pub fn new_name(&self, local: &str, kind: ObjectKind) -> NameRef {
        self.build(local, kind, None, None, None)
    }

    /// Issues a schema name owned by a grantee.
    #[must_use]
    pub fn new_schema_name(&self, local: &str, owner: NameRef) -> NameRef {
        self.build(local, ObjectKind::Schema, None, None, Some(owner))
    }

    /// Issues a schema-level object name.
    #[must_use]
    pub fn new_object_name(&self, local: &str, kind: ObjectKind, schema: NameRef) -> NameRef {
        self.build(local, kind, Some(schema), None, None)
    }

    /// Issues a child name (column, index, constraint, trigger) under a
    /// parent object; the schema is inherited from the parent.
    #[must_use]
    pub fn new_child_name(&self, local: &str, kind: ObjectKind, parent: NameRef) -> NameRef {
        self.build(local, kind, parent.schema.clone(), Some(parent), None)
    }
}

impl Default for NameRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// A regular identifier needs no quoting: an ASCII uppercase letter
/// followed by uppercase letters, digits or underscores.
fn is_regular_identifier(s: &str) -> bool {
    let mut chars = s.chars();
    match chars.next() {
        Some(c) if c.is_ascii_uppercase() => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_uppercase() || c.is_ascii_digit() || c == '_')
}

fn statement_form(local: &str) -> String {
    if is_regular_identifier(local) {
        local.to_string()
    } else {
        format!("\"{}\"", local.replace('"', "\"\""))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_not_spelling() {
        let registry = NameRegistry::new();
        let a = registry.new_name("T1", ObjectKind::Table);
        let b = registry.new_name("T1", ObjectKind::Table);
        assert_ne!(a, b);
        assert_eq!(a, a.clone());
    }

    #[test]
    fn test_statement_form_quoting() {
        let registry = NameRegistry::new();
        let plain = registry.new_name("CUSTOMERS", ObjectKind::Table);
        assert_eq!(plain.statement_name(), "CUSTOMERS");

        let mixed = registry.new_name("Customers", ObjectKind::Table);
        assert_eq!(mixed.statement_name(), "\"Customers\"");

        let quote = registry.new_name("A\"B", ObjectKind::Table);
        assert_eq!(quote.statement_name(), "\"A\"\"B\"");
    }

    #[test]
    fn test_qualified_name() {
        let registry = NameRegistry::new();
        let owner = registry.new_name("SA", ObjectKind::Grantee);
        let schema = registry.new_schema_name("PUBLIC", owner);
        let table = registry.new_object_name("T1", ObjectKind::Table, schema.clone());
        assert_eq!(table.qualified(), "PUBLIC.T1");
        assert_eq!(schema.qualified(), "PUBLIC");
    }

    #[test]
    fn test_child_inherits_schema() {
        let registry = NameRegistry::new();
        let owner = registry.new_name("SA", ObjectKind::Grantee);
        let schema = registry.new_schema_name("S", owner);
        let table = registry.new_object_name("T", ObjectKind::Table, schema.clone());
        let column = registry.new_child_name("C", ObjectKind::Column, table.clone());
        assert_eq!(column.schema.as_ref().unwrap(), &schema);
        assert_eq!(column.parent.as_ref().unwrap(), &table);
    }

    #[test]
    fn test_rename_preserves_identity() {
        let registry = NameRegistry::new();
        let name = registry.new_name("T1", ObjectKind::Table);
        let held = name.clone();

        name.rename_to("T2");
        assert_eq!(held.local(), "T2");
        assert_eq!(held, name);
    }
}
