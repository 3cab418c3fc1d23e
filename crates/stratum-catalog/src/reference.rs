//! The reference graph.
//!
//! A multimap from referent name to the names of the objects that depend
//! on it. The graph is owned by the schema manager and mutated only under
//! its exclusive lock; the methods here take `&mut self` / `&self` and do
//! no locking of their own.

use std::collections::HashMap;

use crate::name::{NameRef, ObjectKind};
use crate::object::SchemaObject;

/// `referent -> {referrers}`, insertion-ordered per referent.
#[derive(Debug, Default)]
pub struct ReferenceGraph {
    map: HashMap<NameRef, Vec<NameRef>>,
}

impl ReferenceGraph {
    /// Creates an empty graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an edge `(referent -> referrer)` unless already present.
    fn put(&mut self, referent: NameRef, referrer: NameRef) {
        let entry = self.map.entry(referent).or_default();
        if !entry.contains(&referrer) {
            entry.push(referrer);
        }
    }

    /// Records every outgoing reference of `object`.
    pub fn add_references(&mut self, object: &SchemaObject) {
        let from = object.reference_name().clone();
        for referent in object.references() {
            self.put(referent.clone(), from.clone());
        }
    }

    /// Removes the edges added by [`Self::add_references`].
    pub fn remove_references(&mut self, object: &SchemaObject) {
        let from = object.reference_name();
        for referent in object.references() {
            if let Some(entry) = self.map.get_mut(referent) {
                entry.retain(|name| name != from);
                if entry.is_empty() {
                    self.map.remove(referent);
                }
            }
        }
    }

    /// Drops every edge pointing at `referent`.
    pub fn remove_referent(&mut self, referent: &NameRef) {
        self.map.remove(referent);
    }

    /// Returns true while any object still references `name`.
    #[must_use]
    pub fn is_referenced(&self, name: &NameRef) -> bool {
        self.map.get(name).is_some_and(|refs| !refs.is_empty())
    }

    /// The direct referrers of `name`, in insertion order.
    #[must_use]
    pub fn referrers_of(&self, name: &NameRef) -> Vec<NameRef> {
        self.map.get(name).cloned().unwrap_or_default()
    }

    /// Accumulates the transitive referrer closure of `name` into `set`,
    /// terminating when no new referrer is added.
    pub fn cascading_referrers_of(&self, name: &NameRef, set: &mut Vec<NameRef>) {
        let mut fresh = Vec::new();
        for referrer in self.referrers_of(name) {
            if !set.contains(&referrer) {
                set.push(referrer.clone());
                fresh.push(referrer);
            }
        }
        for referrer in fresh {
            self.cascading_referrers_of(&referrer, set);
        }
    }

    /// Accumulates the transitive referrers of every referent living in
    /// `schema` into `set`, skipping referrers inside that same schema.
    pub fn cascading_referrers_in_schema(&self, schema: &NameRef, set: &mut Vec<NameRef>) {
        let referents: Vec<NameRef> = self
            .map
            .keys()
            .filter(|name| name.schema.as_ref() == Some(schema))
            .cloned()
            .collect();

        for referent in referents {
            self.cascading_referrers_of(&referent, set);
        }

        set.retain(|name| name.schema.as_ref() != Some(schema));
    }

    /// Number of edges in the graph.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.map.values().map(Vec::len).sum()
    }

    /// Returns true if `name` may be dropped: no incoming edges, or every
    /// incoming edge comes from a child of the object itself.
    #[must_use]
    pub fn only_child_referrers(&self, name: &NameRef) -> bool {
        self.referrers_of(name)
            .iter()
            .all(|referrer| referrer.parent.as_ref() == Some(name))
    }

    /// Referrers of `name` whose kind is one of `kinds`.
    #[must_use]
    pub fn referrers_of_kind(&self, name: &NameRef, kinds: &[ObjectKind]) -> Vec<NameRef> {
        self.referrers_of(name)
            .into_iter()
            .filter(|referrer| kinds.contains(&referrer.kind))
            .collect()
    }
}
