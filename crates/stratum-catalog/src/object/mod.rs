//! Schema object variants.
//!
//! Every database object the catalog owns is one variant of
//! [`SchemaObject`], with a uniform surface for its name, kind, references
//! and recompilation. Objects do not hold owning references to one another;
//! they name their dependencies and the catalog answers by name.

use stratum_common::types::Timestamp;

use crate::name::{NameRef, ObjectKind};

/// A base table.
#[derive(Debug, Clone)]
pub struct Table {
    /// The table's interned name.
    pub name: NameRef,
    /// Column names, in position order.
    pub columns: Vec<NameRef>,
    /// Names this table depends on (foreign-key main tables, domains).
    pub references: Vec<NameRef>,
    /// Names of per-table dependents: constraints, indexes, triggers.
    pub dependents: Vec<NameRef>,
}

impl Table {
    /// Creates a table with the given columns.
    #[must_use]
    pub fn new(name: NameRef, columns: Vec<NameRef>) -> Self {
        Self {
            name,
            columns,
            references: Vec::new(),
            dependents: Vec::new(),
        }
    }

    /// Index of a column by simple name.
    #[must_use]
    pub fn find_column(&self, local: &str) -> Option<usize> {
        self.columns.iter().position(|c| c.local() == local)
    }
}

/// A view over other tables or views.
#[derive(Debug, Clone)]
pub struct View {
    /// The view's interned name.
    pub name: NameRef,
    /// Names the view's compiled form embeds.
    pub references: Vec<NameRef>,
    /// Timestamp of the last (re)compilation.
    pub compile_timestamp: Timestamp,
}

impl View {
    /// Creates a view referencing the given names.
    #[must_use]
    pub fn new(name: NameRef, references: Vec<NameRef>) -> Self {
        Self {
            name,
            references,
            compile_timestamp: Timestamp::ZERO,
        }
    }
}

/// A number sequence.
#[derive(Debug, Clone)]
pub struct Sequence {
    /// The sequence's interned name.
    pub name: NameRef,
    /// Current value.
    pub current: i64,
    /// Increment applied by each `next_value`.
    pub increment: i64,
}

impl Sequence {
    /// Creates a sequence starting at `start`.
    #[must_use]
    pub fn new(name: NameRef, start: i64, increment: i64) -> Self {
        Self {
            name,
            current: start,
            increment,
        }
    }

    /// Advances and returns the next value.
    pub fn next_value(&mut self) -> i64 {
        let value = self.current;
        self.current = self.current.wrapping_add(self.increment);
        value
    }
}

/// A routine (procedure or function) with its specific name.
#[derive(Debug, Clone)]
pub struct Routine {
    /// The routine's callable name.
    pub name: NameRef,
    /// The specific name of this body; reference edges key on it.
    pub specific_name: NameRef,
    /// Names the routine's compiled body embeds.
    pub references: Vec<NameRef>,
    /// Timestamp of the last (re)compilation.
    pub compile_timestamp: Timestamp,
}

impl Routine {
    /// Creates a routine.
    #[must_use]
    pub fn new(name: NameRef, specific_name: NameRef, references: Vec<NameRef>) -> Self {
        Self {
            name,
            specific_name,
            references,
            compile_timestamp: Timestamp::ZERO,
        }
    }
}

/// A user-defined type or domain.
#[derive(Debug, Clone)]
pub struct TypeObject {
    /// The type's interned name.
    pub name: NameRef,
    /// Base type spelling, e.g. `VARCHAR(20)`.
    pub base: String,
    /// Names the definition depends on (collation, base domain).
    pub references: Vec<NameRef>,
}

impl TypeObject {
    /// Creates a type over a base spelling.
    #[must_use]
    pub fn new(name: NameRef, base: impl Into<String>) -> Self {
        Self {
            name,
            base: base.into(),
            references: Vec::new(),
        }
    }
}

/// A character set.
#[derive(Debug, Clone)]
pub struct Charset {
    /// The charset's interned name.
    pub name: NameRef,
    /// The charset it is defined from, if any.
    pub base: Option<NameRef>,
}

/// A collation.
#[derive(Debug, Clone)]
pub struct Collation {
    /// The collation's interned name.
    pub name: NameRef,
    /// Language key used for lookup.
    pub language: String,
}

impl Collation {
    /// Creates a collation keyed directly on `language`.
    #[must_use]
    pub fn new(name: NameRef, language: impl Into<String>) -> Self {
        Self {
            name,
            language: language.into(),
        }
    }

    /// Creates a collation from a locale. The registry key is the
    /// locale's display language, e.g. `"English"` rather than `"en"`.
    #[must_use]
    pub fn from_locale(name: NameRef, display_language: &str) -> Self {
        Self {
            name,
            language: display_language.to_string(),
        }
    }
}

/// A trigger on a table.
#[derive(Debug, Clone)]
pub struct Trigger {
    /// The trigger's interned name.
    pub name: NameRef,
    /// The table the trigger fires on.
    pub table: NameRef,
    /// Names the trigger body embeds.
    pub references: Vec<NameRef>,
    /// Timestamp of the last (re)compilation.
    pub compile_timestamp: Timestamp,
}

/// An index on a table.
#[derive(Debug, Clone)]
pub struct IndexObject {
    /// The index's interned name.
    pub name: NameRef,
    /// The indexed table.
    pub table: NameRef,
    /// Column positions forming the key.
    pub columns: Vec<usize>,
    /// Whether the index enforces uniqueness.
    pub unique: bool,
}

/// The kind of a table constraint.
#[derive(Debug, Clone)]
pub enum ConstraintKind {
    /// Primary key over the listed columns.
    PrimaryKey,
    /// Unique constraint.
    Unique,
    /// Foreign key whose main (referenced) table is named.
    ForeignKey {
        /// The referenced table.
        main_table: NameRef,
    },
    /// Check constraint.
    Check,
}

/// A table constraint.
#[derive(Debug, Clone)]
pub struct Constraint {
    /// The constraint's interned name; its parent is the owning table.
    pub name: NameRef,
    /// Constraint kind.
    pub kind: ConstraintKind,
    /// Names the constraint depends on.
    pub references: Vec<NameRef>,
    /// Timestamp of the last (re)compilation.
    pub compile_timestamp: Timestamp,
}

impl Constraint {
    /// For foreign keys, the main table name.
    #[must_use]
    pub fn main_table(&self) -> Option<&NameRef> {
        match &self.kind {
            ConstraintKind::ForeignKey { main_table } => Some(main_table),
            _ => None,
        }
    }
}

/// A synonym resolving to another object.
#[derive(Debug, Clone)]
pub struct Synonym {
    /// The synonym's interned name.
    pub name: NameRef,
    /// The name it resolves to.
    pub target: NameRef,
}

/// A database object owned by the catalog.
#[derive(Debug, Clone)]
pub enum SchemaObject {
    /// A base table.
    Table(Table),
    /// A view.
    View(View),
    /// A number sequence.
    Sequence(Sequence),
    /// A routine.
    Routine(Routine),
    /// A user-defined type or domain.
    Type(TypeObject),
    /// A character set.
    Charset(Charset),
    /// A collation.
    Collation(Collation),
    /// A trigger.
    Trigger(Trigger),
    /// An index.
    Index(IndexObject),
    /// A constraint.
    Constraint(Constraint),
    /// A synonym.
    Reference(Synonym),
}

impl SchemaObject {
    /// The object's interned name.
    #[must_use]
    pub fn name(&self) -> &NameRef {
        match self {
            SchemaObject::Table(o) => &o.name,
            SchemaObject::View(o) => &o.name,
            SchemaObject::Sequence(o) => &o.name,
            SchemaObject::Routine(o) => &o.name,
            SchemaObject::Type(o) => &o.name,
            SchemaObject::Charset(o) => &o.name,
            SchemaObject::Collation(o) => &o.name,
            SchemaObject::Trigger(o) => &o.name,
            SchemaObject::Index(o) => &o.name,
            SchemaObject::Constraint(o) => &o.name,
            SchemaObject::Reference(o) => &o.name,
        }
    }

    /// The name reference edges key on: the specific name for routines,
    /// the object name otherwise.
    #[must_use]
    pub fn reference_name(&self) -> &NameRef {
        match self {
            SchemaObject::Routine(o) => &o.specific_name,
            other => other.name(),
        }
    }

    /// The object's kind tag.
    #[must_use]
    pub fn kind(&self) -> ObjectKind {
        self.name().kind
    }

    /// The names this object depends on.
    #[must_use]
    pub fn references(&self) -> &[NameRef] {
        match self {
            SchemaObject::Table(o) => &o.references,
            SchemaObject::View(o) => &o.references,
            SchemaObject::Routine(o) => &o.references,
            SchemaObject::Type(o) => &o.references,
            SchemaObject::Trigger(o) => &o.references,
            SchemaObject::Constraint(o) => &o.references,
            SchemaObject::Charset(o) => {
                o.base.as_ref().map(std::slice::from_ref).unwrap_or(&[])
            }
            SchemaObject::Reference(o) => std::slice::from_ref(&o.target),
            SchemaObject::Sequence(_) | SchemaObject::Collation(_) | SchemaObject::Index(_) => &[],
        }
    }

    /// Re-resolves the object's compiled form; a no-op for kinds without
    /// one.
    pub fn recompile(&mut self, timestamp: Timestamp) {
        match self {
            SchemaObject::View(o) => o.compile_timestamp = timestamp,
            SchemaObject::Routine(o) => o.compile_timestamp = timestamp,
            SchemaObject::Trigger(o) => o.compile_timestamp = timestamp,
            SchemaObject::Constraint(o) => o.compile_timestamp = timestamp,
            _ => {}
        }
    }

    /// Returns true for kinds whose compiled form embeds names and
    /// therefore blocks renames of what they reference.
    #[must_use]
    pub fn embeds_names(&self) -> bool {
        self.kind().embeds_names()
    }
}
