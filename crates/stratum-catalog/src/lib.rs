//! # stratum-catalog
//!
//! Name registry, reference graph and schema catalog for StratumDB.
//!
//! The catalog presents a consistent picture of schemas and their objects
//! to executing statements:
//!
//! - **Names**: interned, immutable object identities. Two names compare
//!   by identity, never by string.
//! - **Objects**: a tagged [`object::SchemaObject`] variant per object
//!   kind, each answering `references()` with the names it depends on.
//! - **Reference graph**: a multimap `referent -> {referrers}` kept in
//!   lock-step with object addition and removal; cascading drops walk its
//!   transitive closure.
//! - **Schema manager**: all DDL behind one read/write lock, so readers
//!   and writers never interleave mutations.
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                    SchemaManager                     │
//! │      ┌──────────────┐        ┌──────────────────┐    │
//! │      │ Schema maps  │        │  ReferenceGraph  │    │
//! │      │ (per kind)   │        │ referent→refs    │    │
//! │      └──────┬───────┘        └────────┬─────────┘    │
//! │             │                         │              │
//! │             ▼                         ▼              │
//! │      ┌──────────────┐        ┌──────────────────┐    │
//! │      │ SchemaObject │        │   NameRegistry   │    │
//! │      │   variants   │        │  (interned ids)  │    │
//! │      └──────────────┘        └──────────────────┘    │
//! └──────────────────────────────────────────────────────┘
//! ```

#![warn(missing_docs)]
#![warn(clippy::all)]
#![allow(clippy::module_name_repetitions)]

pub mod manager;
pub mod name;
pub mod object;
pub mod reference;
pub mod schema;

pub use manager::SchemaManager;
pub use name::{Name, NameRef, NameRegistry, ObjectKind};
pub use object::{
    Charset, Collation, Constraint, ConstraintKind, IndexObject, Routine, SchemaObject, Sequence,
    Synonym, Table, Trigger, TypeObject, View,
};
pub use reference::ReferenceGraph;
pub use schema::Schema;
