//! The grantee record.
//!
//! A grantee is a user or a role. Either way it carries a direct-rights
//! multimap (one right per grantor per object), an ordered set of direct
//! roles, a mirror of the rights it has granted to others, and the derived
//! full-rights map. The behavioral differences between users, roles,
//! PUBLIC and `_SYSTEM` are driven by flags during the effective-rights
//! recomputation, not by separate types.

use std::collections::HashMap;

use stratum_catalog::name::NameRef;
use stratum_common::error::{StratumError, StratumResult};

use crate::right::{Privileges, Right};

/// A user or role with its rights state.
#[derive(Debug)]
pub struct Grantee {
    name: NameRef,
    is_role: bool,
    is_public: bool,
    is_system: bool,
    admin_direct: bool,
    admin: bool,
    /// `object name -> rights`, one entry per grantor.
    direct_rights: HashMap<NameRef, Vec<Right>>,
    /// Mirror of rights this grantee conferred, as grantor.
    granted_rights: HashMap<NameRef, Vec<Right>>,
    /// Derived map: direct rights plus everything inherited through
    /// roles (and PUBLIC for ordinary grantees).
    full_rights: HashMap<NameRef, Right>,
    /// Direct roles, in grant order.
    roles: Vec<NameRef>,
    owner_rights: Right,
}

impl Grantee {
    /// Creates a grantee.
    #[must_use]
    pub fn new(name: NameRef, is_role: bool, is_public: bool, is_system: bool) -> Self {
        let mut owner_rights = Right::full();
        owner_rights.grantee = Some(name.clone());

        Self {
            name,
            is_role,
            is_public,
            is_system,
            admin_direct: false,
            admin: false,
            direct_rights: HashMap::new(),
            granted_rights: HashMap::new(),
            full_rights: HashMap::new(),
            roles: Vec::new(),
            owner_rights,
        }
    }

    /// The grantee's interned name.
    #[must_use]
    pub fn name(&self) -> &NameRef {
        &self.name
    }

    /// Returns true for roles.
    #[must_use]
    pub const fn is_role(&self) -> bool {
        self.is_role
    }

    /// Returns true for the PUBLIC role.
    #[must_use]
    pub const fn is_public(&self) -> bool {
        self.is_public
    }

    /// Returns true for the `_SYSTEM` authorization.
    #[must_use]
    pub const fn is_system(&self) -> bool {
        self.is_system
    }

    /// Administrator by any means.
    #[must_use]
    pub const fn is_admin(&self) -> bool {
        self.admin
    }

    /// Administrator directly, not via a role.
    #[must_use]
    pub const fn is_admin_direct(&self) -> bool {
        self.admin_direct
    }

    /// Grants direct admin; effective admin follows immediately.
    pub fn set_admin_direct(&mut self) {
        self.admin_direct = true;
        self.admin = true;
    }

    /// The owner right used as the grantable source for owned schemas.
    #[must_use]
    pub fn owner_rights(&self) -> &Right {
        &self.owner_rights
    }

    /// Direct roles in grant order.
    #[must_use]
    pub fn direct_roles(&self) -> &[NameRef] {
        &self.roles
    }

    /// Returns true when `role` is held directly.
    #[must_use]
    pub fn has_role_direct(&self, role: &NameRef) -> bool {
        self.roles.contains(role)
    }

    /// Adds a direct role.
    pub fn grant_role(&mut self, role: NameRef) {
        if !self.roles.contains(&role) {
            self.roles.push(role);
        }
    }

    /// Removes a direct role; revoking a role held only transitively
    /// fails.
    pub fn revoke_role(&mut self, role: &NameRef) -> StratumResult<()> {
        if !self.has_role_direct(role) {
            return Err(StratumError::RoleNotGranted {
                name: role.local(),
            });
        }
        self.roles.retain(|r| r != role);
        Ok(())
    }

    /// The direct right conferred by `grantor` on `name`, if any.
    pub fn direct_right_mut(&mut self, name: &NameRef, grantor: &NameRef) -> Option<&mut Right> {
        self.direct_rights
            .get_mut(name)?
            .iter_mut()
            .find(|right| right.grantor.as_ref() == Some(grantor))
    }

    /// Inserts a new direct-right entry.
    pub fn insert_direct_right(&mut self, name: NameRef, right: Right) {
        self.direct_rights.entry(name).or_default().push(right);
    }

    /// Removes the direct-right entry conferred by `grantor`, returning
    /// it.
    pub fn take_direct_right(&mut self, name: &NameRef, grantor: &NameRef) -> Option<Right> {
        let rights = self.direct_rights.get_mut(name)?;
        let index = rights
            .iter()
            .position(|right| right.grantor.as_ref() == Some(grantor))?;
        let right = rights.remove(index);
        if rights.is_empty() {
            self.direct_rights.remove(name);
        }
        Some(right)
    }

    /// Records a conferred right in the grantor-side mirror.
    pub fn record_granted(&mut self, name: NameRef, right: Right) {
        self.granted_rights.entry(name).or_default().push(right);
    }

    /// Drops the mirror entry for `grantee` on `name`.
    pub fn forget_granted(&mut self, name: &NameRef, grantee: &NameRef) {
        if let Some(rights) = self.granted_rights.get_mut(name) {
            rights.retain(|right| right.grantee.as_ref() != Some(grantee));
            if rights.is_empty() {
                self.granted_rights.remove(name);
            }
        }
    }

    /// Rights this grantee has conferred on `name`.
    #[must_use]
    pub fn granted_on(&self, name: &NameRef) -> Vec<Right> {
        self.granted_rights.get(name).cloned().unwrap_or_default()
    }

    /// The derived full-rights map.
    #[must_use]
    pub fn full_rights_map(&self) -> &HashMap<NameRef, Right> {
        &self.full_rights
    }

    /// The effective right on `name`, if any.
    #[must_use]
    pub fn full_right_on(&self, name: &NameRef) -> Option<&Right> {
        self.full_rights.get(name)
    }

    /// Forgets a dropped database object in every map.
    pub fn remove_db_object(&mut self, name: &NameRef) {
        self.direct_rights.remove(name);
        self.granted_rights.remove(name);
        self.full_rights.remove(name);
    }

    /// Clears all privileges, roles and the admin flag; used when the
    /// grantee is dropped.
    pub fn clear_privileges(&mut self) {
        self.roles.clear();
        self.direct_rights.clear();
        self.granted_rights.clear();
        self.full_rights.clear();
        self.admin = false;
    }

    /// Extends an existing direct right on `table` with a newly added
    /// column. Returns true when a right was present.
    pub fn update_rights_for_new_column(&mut self, table: &NameRef, column: &NameRef) -> bool {
        let Some(rights) = self.direct_rights.get_mut(table) else {
            return false;
        };

        for right in rights.iter_mut() {
            let widened = Right::with_privileges(right.privileges())
                .with_columns(right.privileges(), std::iter::once(column.clone()).collect());
            right.add(&widened);
        }
        true
    }

    /// Rebuilds the full-rights map from this grantee's direct rights,
    /// the supplied role maps (with each role's admin flag) and, for
    /// ordinary grantees, PUBLIC's map. The admin flag is reseeded from
    /// the direct flag then OR-ed with each role's.
    pub fn rebuild_full_rights(
        &mut self,
        role_maps: &[(HashMap<NameRef, Right>, bool)],
        public_map: Option<&HashMap<NameRef, Right>>,
    ) {
        self.full_rights.clear();
        self.admin = self.admin_direct;

        for (map, role_admin) in role_maps {
            self.add_map_to_full(map);
            self.admin |= role_admin;
        }

        let direct: Vec<(NameRef, Vec<Right>)> = self
            .direct_rights
            .iter()
            .map(|(name, rights)| (name.clone(), rights.clone()))
            .collect();
        for (name, rights) in direct {
            for right in rights {
                self.add_right_to_full(name.clone(), &right);
            }
        }

        if !self.is_role && !self.is_public && !self.is_system {
            if let Some(map) = public_map {
                self.add_map_to_full(map);
            }
        }
    }

    fn add_map_to_full(&mut self, map: &HashMap<NameRef, Right>) {
        for (name, right) in map {
            self.add_right_to_full(name.clone(), right);
        }
    }

    fn add_right_to_full(&mut self, name: NameRef, add: &Right) {
        match self.full_rights.get_mut(&name) {
            Some(existing) => {
                existing.add(add);
                existing.merge_grantable(add);
            }
            None => {
                let mut fresh = add.duplicate();
                fresh.grantee = Some(self.name.clone());
                self.full_rights.insert(name, fresh);
            }
        }
    }

    /// Column-blind effective access test against the full map only;
    /// the manager layers the admin, ownership and PUBLIC shortcuts on
    /// top.
    #[must_use]
    pub fn has_right(&self, name: &NameRef, action: Privileges) -> bool {
        self.full_rights
            .get(name)
            .is_some_and(|right| right.can_access(action))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use stratum_catalog::name::{NameRegistry, ObjectKind};

    fn grantee(registry: &NameRegistry, local: &str, is_role: bool) -> Grantee {
        let name = registry.new_name(local, ObjectKind::Grantee);
        Grantee::new(name, is_role, false, false)
    }

    #[test]
    fn test_role_grant_revoke() {
        let registry = NameRegistry::new();
        let mut user = grantee(&registry, "U1", false);
        let role = registry.new_name("R1", ObjectKind::Grantee);

        user.grant_role(role.clone());
        assert!(user.has_role_direct(&role));

        user.revoke_role(&role).unwrap();
        assert!(!user.has_role_direct(&role));

        let err = user.revoke_role(&role).unwrap_err();
        assert!(matches!(err, StratumError::RoleNotGranted { .. }));
    }

    #[test]
    fn test_direct_right_merge_by_grantor() {
        let registry = NameRegistry::new();
        let mut user = grantee(&registry, "U1", false);
        let grantor = registry.new_name("SA", ObjectKind::Grantee);
        let object = registry.new_name("T1", ObjectKind::Table);

        let mut right = Right::with_privileges(Privileges::SELECT);
        right.grantor = Some(grantor.clone());
        user.insert_direct_right(object.clone(), right);

        let entry = user.direct_right_mut(&object, &grantor).unwrap();
        entry.add(&Right::with_privileges(Privileges::INSERT));

        let taken = user.take_direct_right(&object, &grantor).unwrap();
        assert!(taken.can_access(Privileges::SELECT));
        assert!(taken.can_access(Privileges::INSERT));
        assert!(user.take_direct_right(&object, &grantor).is_none());
    }

    #[test]
    fn test_rebuild_merges_roles_and_public() {
        let registry = NameRegistry::new();
        let object = registry.new_name("T1", ObjectKind::Table);

        let mut role_map = HashMap::new();
        role_map.insert(object.clone(), Right::with_privileges(Privileges::INSERT));

        let mut public_map = HashMap::new();
        public_map.insert(object.clone(), Right::with_privileges(Privileges::SELECT));

        let mut user = grantee(&registry, "U1", false);
        user.rebuild_full_rights(&[(role_map, false)], Some(&public_map));

        assert!(user.has_right(&object, Privileges::SELECT));
        assert!(user.has_right(&object, Privileges::INSERT));
        assert!(!user.has_right(&object, Privileges::DELETE));
    }

    #[test]
    fn test_rebuild_reseeds_admin() {
        let registry = NameRegistry::new();
        let mut user = grantee(&registry, "U1", false);

        user.rebuild_full_rights(&[(HashMap::new(), true)], None);
        assert!(user.is_admin());

        user.rebuild_full_rights(&[], None);
        assert!(!user.is_admin());
    }

    #[test]
    fn test_public_not_merged_into_roles() {
        let registry = NameRegistry::new();
        let object = registry.new_name("T1", ObjectKind::Table);

        let mut public_map = HashMap::new();
        public_map.insert(object.clone(), Right::with_privileges(Privileges::SELECT));

        let mut role = grantee(&registry, "R1", true);
        role.rebuild_full_rights(&[], Some(&public_map));
        assert!(!role.has_right(&object, Privileges::SELECT));
    }

    #[test]
    fn test_new_column_widens_existing_right() {
        let registry = NameRegistry::new();
        let mut user = grantee(&registry, "U1", false);
        let grantor = registry.new_name("SA", ObjectKind::Grantee);
        let table = registry.new_name("T1", ObjectKind::Table);
        let a = registry.new_name("A", ObjectKind::Column);
        let b = registry.new_name("B", ObjectKind::Column);

        let mut right = Right::with_privileges(Privileges::SELECT)
            .with_columns(Privileges::SELECT, std::iter::once(a.clone()).collect());
        right.grantor = Some(grantor.clone());
        user.insert_direct_right(table.clone(), right);

        assert!(user.update_rights_for_new_column(&table, &b));
        let entry = user.direct_right_mut(&table, &grantor).unwrap();
        assert!(entry.can_select(&[a, b]));
    }
}
