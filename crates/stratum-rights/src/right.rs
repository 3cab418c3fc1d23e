//! Privileges and rights.

use std::collections::HashSet;
use std::fmt;

use stratum_catalog::name::NameRef;

/// A bitset of SQL privileges.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct Privileges(u8);

impl Privileges {
    /// No privileges.
    pub const NONE: Self = Self(0);
    /// SELECT.
    pub const SELECT: Self = Self(1);
    /// INSERT.
    pub const INSERT: Self = Self(1 << 1);
    /// UPDATE.
    pub const UPDATE: Self = Self(1 << 2);
    /// DELETE.
    pub const DELETE: Self = Self(1 << 3);
    /// REFERENCES.
    pub const REFERENCES: Self = Self(1 << 4);
    /// TRIGGER.
    pub const TRIGGER: Self = Self(1 << 5);
    /// USAGE (sequences, types, collations).
    pub const USAGE: Self = Self(1 << 6);
    /// EXECUTE (routines).
    pub const EXECUTE: Self = Self(1 << 7);
    /// Every privilege.
    pub const ALL: Self = Self(u8::MAX);

    /// Union of two sets.
    #[inline]
    #[must_use]
    pub const fn union(self, other: Self) -> Self {
        Self(self.0 | other.0)
    }

    /// Difference of two sets.
    #[inline]
    #[must_use]
    pub const fn subtract(self, other: Self) -> Self {
        Self(self.0 & !other.0)
    }

    /// Intersection of two sets.
    #[inline]
    #[must_use]
    pub const fn intersect(self, other: Self) -> Self {
        Self(self.0 & other.0)
    }

    /// Returns true when every bit of `other` is present.
    #[inline]
    #[must_use]
    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns true for the empty set.
    #[inline]
    #[must_use]
    pub const fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl fmt::Debug for Privileges {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        for (bit, name) in [
            (Privileges::SELECT, "SELECT"),
            (Privileges::INSERT, "INSERT"),
            (Privileges::UPDATE, "UPDATE"),
            (Privileges::DELETE, "DELETE"),
            (Privileges::REFERENCES, "REFERENCES"),
            (Privileges::TRIGGER, "TRIGGER"),
            (Privileges::USAGE, "USAGE"),
            (Privileges::EXECUTE, "EXECUTE"),
        ] {
            if self.contains(bit) {
                names.push(name);
            }
        }
        write!(f, "Privileges({})", names.join("|"))
    }
}

/// A column scope for one privilege: `None` means every column.
type ColumnScope = Option<HashSet<NameRef>>;

fn scope_union(a: &ColumnScope, b: &ColumnScope) -> ColumnScope {
    match (a, b) {
        (None, _) | (_, None) => None,
        (Some(x), Some(y)) => Some(x.union(y).cloned().collect()),
    }
}

fn scope_covers(scope: &ColumnScope, columns: &[NameRef]) -> bool {
    match scope {
        None => true,
        Some(set) => columns.iter().all(|c| set.contains(c)),
    }
}

fn scope_contains(outer: &ColumnScope, inner: &ColumnScope) -> bool {
    match (outer, inner) {
        (None, _) => true,
        (Some(_), None) => false,
        (Some(o), Some(i)) => i.is_subset(o),
    }
}

/// Access rights over one database object.
///
/// Carries the privilege bitset, per-privilege column scopes for the
/// column-scoped subset, the grantor and grantee identities, and the
/// optional WITH GRANT OPTION projection as a nested right.
#[derive(Debug, Clone, Default)]
pub struct Right {
    privileges: Privileges,
    select_columns: ColumnScope,
    insert_columns: ColumnScope,
    update_columns: ColumnScope,
    references_columns: ColumnScope,
    trigger_columns: ColumnScope,
    /// The grantee holding this right.
    pub grantee: Option<NameRef>,
    /// The grantor that conferred it.
    pub grantor: Option<NameRef>,
    /// The grantable-rights sub-right (WITH GRANT OPTION projection).
    pub grantable: Option<Box<Right>>,
    is_full: bool,
}

impl Right {
    /// The full right: every privilege on every column, grantable.
    #[must_use]
    pub fn full() -> Self {
        Self {
            privileges: Privileges::ALL,
            is_full: true,
            ..Self::default()
        }
    }

    /// A right carrying the given privileges on every column.
    #[must_use]
    pub fn with_privileges(privileges: Privileges) -> Self {
        Self {
            privileges,
            ..Self::default()
        }
    }

    /// Restricts one column-scoped privilege to a column set.
    #[must_use]
    pub fn with_columns(mut self, privilege: Privileges, columns: HashSet<NameRef>) -> Self {
        let scope = Some(columns);
        if privilege.contains(Privileges::SELECT) {
            self.select_columns = scope.clone();
        }
        if privilege.contains(Privileges::INSERT) {
            self.insert_columns = scope.clone();
        }
        if privilege.contains(Privileges::UPDATE) {
            self.update_columns = scope.clone();
        }
        if privilege.contains(Privileges::REFERENCES) {
            self.references_columns = scope.clone();
        }
        if privilege.contains(Privileges::TRIGGER) {
            self.trigger_columns = scope;
        }
        self
    }

    /// The privilege bitset.
    #[inline]
    #[must_use]
    pub const fn privileges(&self) -> Privileges {
        self.privileges
    }

    /// Returns true for the full right.
    #[inline]
    #[must_use]
    pub const fn is_full(&self) -> bool {
        self.is_full
    }

    /// Returns true when no privilege remains.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        !self.is_full && self.privileges.is_empty()
    }

    /// A detached copy carrying the same privileges and scopes.
    #[must_use]
    pub fn duplicate(&self) -> Self {
        self.clone()
    }

    /// Unions another right's privileges and column scopes into this one.
    /// The grant-option sub-right is managed separately.
    pub fn add(&mut self, other: &Right) {
        if other.is_full {
            *self = Right {
                grantee: self.grantee.clone(),
                grantor: self.grantor.clone(),
                grantable: self.grantable.take(),
                ..Right::full()
            };
            return;
        }

        self.select_columns = merge_scope(
            self.privileges.contains(Privileges::SELECT),
            &self.select_columns,
            other.privileges.contains(Privileges::SELECT),
            &other.select_columns,
        );
        self.insert_columns = merge_scope(
            self.privileges.contains(Privileges::INSERT),
            &self.insert_columns,
            other.privileges.contains(Privileges::INSERT),
            &other.insert_columns,
        );
        self.update_columns = merge_scope(
            self.privileges.contains(Privileges::UPDATE),
            &self.update_columns,
            other.privileges.contains(Privileges::UPDATE),
            &other.update_columns,
        );
        self.references_columns = merge_scope(
            self.privileges.contains(Privileges::REFERENCES),
            &self.references_columns,
            other.privileges.contains(Privileges::REFERENCES),
            &other.references_columns,
        );
        self.trigger_columns = merge_scope(
            self.privileges.contains(Privileges::TRIGGER),
            &self.trigger_columns,
            other.privileges.contains(Privileges::TRIGGER),
            &other.trigger_columns,
        );

        self.privileges = self.privileges.union(other.privileges);
    }

    /// Subtracts another right's privileges. A privilege revoked with a
    /// full column scope disappears; revoking a column subset of an
    /// all-column privilege leaves it in place.
    pub fn remove(&mut self, other: &Right) {
        if other.is_full {
            self.privileges = Privileges::NONE;
            self.is_full = false;
            self.clear_scopes();
            return;
        }

        let full_scope_bits = [
            (Privileges::SELECT, other.select_columns.is_none()),
            (Privileges::INSERT, other.insert_columns.is_none()),
            (Privileges::UPDATE, other.update_columns.is_none()),
            (Privileges::REFERENCES, other.references_columns.is_none()),
            (Privileges::TRIGGER, other.trigger_columns.is_none()),
            (Privileges::DELETE, true),
            (Privileges::USAGE, true),
            (Privileges::EXECUTE, true),
        ];

        for (bit, full_scope) in full_scope_bits {
            if other.privileges.contains(bit) && full_scope {
                self.privileges = self.privileges.subtract(bit);
            }
        }

        self.is_full = false;
        subtract_scope(&mut self.select_columns, &other.select_columns);
        subtract_scope(&mut self.insert_columns, &other.insert_columns);
        subtract_scope(&mut self.update_columns, &other.update_columns);
        subtract_scope(&mut self.references_columns, &other.references_columns);
        subtract_scope(&mut self.trigger_columns, &other.trigger_columns);
    }

    fn clear_scopes(&mut self) {
        self.select_columns = None;
        self.insert_columns = None;
        self.update_columns = None;
        self.references_columns = None;
        self.trigger_columns = None;
    }

    /// Superset test: every privilege of `other`, over at least its
    /// column scopes.
    #[must_use]
    pub fn contains(&self, other: &Right) -> bool {
        if self.is_full {
            return true;
        }
        if other.is_full {
            return false;
        }
        if !self.privileges.contains(other.privileges) {
            return false;
        }

        scope_contains(&self.select_columns, &other.select_columns)
            && scope_contains(&self.insert_columns, &other.insert_columns)
            && scope_contains(&self.update_columns, &other.update_columns)
            && scope_contains(&self.references_columns, &other.references_columns)
            && scope_contains(&self.trigger_columns, &other.trigger_columns)
    }

    /// Single-privilege access test, column-blind.
    #[must_use]
    pub fn can_access(&self, action: Privileges) -> bool {
        self.is_full || self.privileges.contains(action)
    }

    /// SELECT over the given columns.
    #[must_use]
    pub fn can_select(&self, columns: &[NameRef]) -> bool {
        self.can_access(Privileges::SELECT) && scope_covers(&self.select_columns, columns)
    }

    /// INSERT over the given columns.
    #[must_use]
    pub fn can_insert(&self, columns: &[NameRef]) -> bool {
        self.can_access(Privileges::INSERT) && scope_covers(&self.insert_columns, columns)
    }

    /// UPDATE over the given columns.
    #[must_use]
    pub fn can_update(&self, columns: &[NameRef]) -> bool {
        self.can_access(Privileges::UPDATE) && scope_covers(&self.update_columns, columns)
    }

    /// DELETE (never column-scoped).
    #[must_use]
    pub fn can_delete(&self) -> bool {
        self.can_access(Privileges::DELETE)
    }

    /// REFERENCES over the given columns.
    #[must_use]
    pub fn can_reference(&self, columns: &[NameRef]) -> bool {
        self.can_access(Privileges::REFERENCES) && scope_covers(&self.references_columns, columns)
    }

    /// TRIGGER over the given columns; the column test runs against the
    /// REFERENCES scope.
    #[must_use]
    pub fn can_trigger(&self, columns: &[NameRef]) -> bool {
        self.can_access(Privileges::TRIGGER) && scope_covers(&self.references_columns, columns)
    }

    /// Merges another right's grant-option projection into this one's.
    pub fn merge_grantable(&mut self, other: &Right) {
        if let Some(add) = &other.grantable {
            match &mut self.grantable {
                Some(existing) => existing.add(add),
                None => self.grantable = Some(Box::new(add.duplicate())),
            }
        }
    }

    /// The grantable projection, or the empty right.
    #[must_use]
    pub fn grantable_rights(&self) -> Right {
        if self.is_full {
            return Right::full();
        }
        self.grantable
            .as_ref()
            .map(|g| g.duplicate())
            .unwrap_or_default()
    }
}

/// Union of two scopes, honoring whether each side holds the privilege at
/// all: a side without the privilege contributes nothing.
fn merge_scope(
    self_has: bool,
    self_scope: &ColumnScope,
    other_has: bool,
    other_scope: &ColumnScope,
) -> ColumnScope {
    match (self_has, other_has) {
        (true, true) => scope_union(self_scope, other_scope),
        (true, false) => self_scope.clone(),
        (false, true) => other_scope.clone(),
        (false, false) => None,
    }
}

fn subtract_scope(scope: &mut ColumnScope, removed: &ColumnScope) {
    if let (Some(set), Some(gone)) = (scope.as_mut(), removed.as_ref()) {
        set.retain(|c| !gone.contains(c));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_catalog::name::{NameRegistry, ObjectKind};

    fn columns(registry: &NameRegistry, names: &[&str]) -> Vec<NameRef> {
        names
            .iter()
            .map(|n| registry.new_name(n, ObjectKind::Column))
            .collect()
    }

    #[test]
    fn test_privilege_bitset() {
        let p = Privileges::SELECT.union(Privileges::INSERT);
        assert!(p.contains(Privileges::SELECT));
        assert!(!p.contains(Privileges::DELETE));
        assert!(p.subtract(Privileges::SELECT).contains(Privileges::INSERT));
        assert!(Privileges::ALL.contains(p));
    }

    #[test]
    fn test_full_right_contains_everything() {
        let full = Right::full();
        let partial = Right::with_privileges(Privileges::SELECT);
        assert!(full.contains(&partial));
        assert!(!partial.contains(&full));
        assert!(full.can_delete());
    }

    #[test]
    fn test_add_then_remove_is_identity() {
        let mut right = Right::with_privileges(Privileges::SELECT);
        let added = Right::with_privileges(Privileges::INSERT);

        right.add(&added);
        assert!(right.can_access(Privileges::INSERT));

        right.remove(&added);
        assert!(!right.can_access(Privileges::INSERT));
        assert!(right.can_access(Privileges::SELECT));
    }

    #[test]
    fn test_column_scoped_select() {
        let registry = NameRegistry::new();
        let cols = columns(&registry, &["A", "B"]);
        let scope: std::collections::HashSet<_> = cols.iter().cloned().collect();

        let right =
            Right::with_privileges(Privileges::SELECT).with_columns(Privileges::SELECT, scope);

        assert!(right.can_select(&cols));
        let other = columns(&registry, &["C"]);
        assert!(!right.can_select(&other));
    }

    #[test]
    fn test_column_union_widens_scope() {
        let registry = NameRegistry::new();
        let a = columns(&registry, &["A"]);
        let b = columns(&registry, &["B"]);

        let mut right = Right::with_privileges(Privileges::SELECT)
            .with_columns(Privileges::SELECT, a.iter().cloned().collect());
        let wider = Right::with_privileges(Privileges::SELECT)
            .with_columns(Privileges::SELECT, b.iter().cloned().collect());

        right.add(&wider);
        assert!(right.can_select(&a));
        assert!(right.can_select(&b));
    }

    #[test]
    fn test_trigger_check_uses_references_scope() {
        let registry = NameRegistry::new();
        let cols = columns(&registry, &["A"]);

        let right = Right::with_privileges(Privileges::TRIGGER.union(Privileges::REFERENCES))
            .with_columns(Privileges::REFERENCES, cols.iter().cloned().collect());

        assert!(right.can_trigger(&cols));
        let other = columns(&registry, &["B"]);
        assert!(!right.can_trigger(&other));
    }

    #[test]
    fn test_grantable_projection() {
        let mut right = Right::with_privileges(Privileges::SELECT);
        assert!(right.grantable_rights().is_empty());

        let mut granted = Right::with_privileges(Privileges::SELECT);
        granted.grantable = Some(Box::new(Right::with_privileges(Privileges::SELECT)));
        right.merge_grantable(&granted);

        assert!(right
            .grantable_rights()
            .can_access(Privileges::SELECT));
    }
}
