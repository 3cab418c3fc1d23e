//! The grantee manager.
//!
//! Owns every user and role, and runs the role-update protocol: after any
//! change to a role's direct rights or to role membership, roles are
//! recomputed to a fixed point, then every user. All references elsewhere
//! are by interned name; dropping a grantee removes it from every role
//! list before freeing.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::debug;

use stratum_catalog::manager::SchemaManager;
use stratum_catalog::name::{NameRef, NameRegistry, ObjectKind};
use stratum_common::error::{StratumError, StratumResult};

use crate::grantee::Grantee;
use crate::right::{Privileges, Right};

/// Name of the system authorization.
pub const SYSTEM_AUTHORIZATION: &str = "_SYSTEM";

/// Name of the PUBLIC role.
pub const PUBLIC_ROLE: &str = "PUBLIC";

/// Name of the database administrator role.
pub const DBA_ROLE: &str = "DBA";

struct GranteeState {
    grantees: HashMap<String, Grantee>,
    /// Role names in registration order; the fixed-point recomputation
    /// iterates them.
    roles: Vec<String>,
}

/// Role graph, effective rights, grant and revoke.
pub struct GranteeManager {
    registry: Arc<NameRegistry>,
    state: RwLock<GranteeState>,
}

impl GranteeManager {
    /// Creates a manager with the `_SYSTEM` authorization and the PUBLIC
    /// and DBA roles in place.
    #[must_use]
    pub fn new(registry: Arc<NameRegistry>) -> Self {
        let mut grantees = HashMap::new();
        let mut roles = Vec::new();

        let system_name = registry.new_name(SYSTEM_AUTHORIZATION, ObjectKind::Grantee);
        let mut system = Grantee::new(system_name, false, false, true);
        system.set_admin_direct();
        grantees.insert(SYSTEM_AUTHORIZATION.to_string(), system);

        let public_name = registry.new_name(PUBLIC_ROLE, ObjectKind::Grantee);
        grantees.insert(
            PUBLIC_ROLE.to_string(),
            Grantee::new(public_name, true, true, false),
        );
        roles.push(PUBLIC_ROLE.to_string());

        let dba_name = registry.new_name(DBA_ROLE, ObjectKind::Grantee);
        let mut dba = Grantee::new(dba_name, true, false, false);
        dba.set_admin_direct();
        grantees.insert(DBA_ROLE.to_string(), dba);
        roles.push(DBA_ROLE.to_string());

        Self {
            registry,
            state: RwLock::new(GranteeState { grantees, roles }),
        }
    }

    /// The shared name registry.
    #[must_use]
    pub fn registry(&self) -> &Arc<NameRegistry> {
        &self.registry
    }

    /// Resolves a grantee's interned name.
    pub fn name_of(&self, local: &str) -> StratumResult<NameRef> {
        let state = self.state.read();
        state
            .grantees
            .get(local)
            .map(|grantee| grantee.name().clone())
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: local.to_string(),
            })
    }

    /// Returns true when the grantee holds admin by any means.
    pub fn is_admin(&self, local: &str) -> StratumResult<bool> {
        let state = self.state.read();
        state
            .grantees
            .get(local)
            .map(Grantee::is_admin)
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: local.to_string(),
            })
    }

    /// Returns true when the grantee is a role.
    pub fn is_role(&self, local: &str) -> StratumResult<bool> {
        let state = self.state.read();
        state
            .grantees
            .get(local)
            .map(Grantee::is_role)
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: local.to_string(),
            })
    }

    /// Creates a user.
    pub fn add_user(&self, local: &str) -> StratumResult<NameRef> {
        self.add_grantee(local, false)
    }

    /// Creates a role.
    pub fn add_role(&self, local: &str) -> StratumResult<NameRef> {
        self.add_grantee(local, true)
    }

    fn add_grantee(&self, local: &str, is_role: bool) -> StratumResult<NameRef> {
        let mut state = self.state.write();

        if state.grantees.contains_key(local) {
            return Err(StratumError::GranteeExists {
                name: local.to_string(),
            });
        }

        let name = self.registry.new_name(local, ObjectKind::Grantee);
        state
            .grantees
            .insert(local.to_string(), Grantee::new(name.clone(), is_role, false, false));
        if is_role {
            state.roles.push(local.to_string());
        }

        debug!(grantee = local, is_role, "created grantee");
        Ok(name)
    }

    /// Drops a grantee: clears its privileges, removes it from every
    /// role list, recomputes, then frees it.
    pub fn drop_grantee(&self, local: &str) -> StratumResult<()> {
        if local == SYSTEM_AUTHORIZATION || local == PUBLIC_ROLE || local == DBA_ROLE {
            return Err(StratumError::NotSupported {
                operation: format!("drop of built-in grantee {local}"),
            });
        }

        let mut state = self.state.write();

        let dropped_name = state
            .grantees
            .get(local)
            .map(|grantee| grantee.name().clone())
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: local.to_string(),
            })?;

        if let Some(grantee) = state.grantees.get_mut(local) {
            grantee.clear_privileges();
        }

        for grantee in state.grantees.values_mut() {
            if grantee.has_role_direct(&dropped_name) {
                let _ = grantee.revoke_role(&dropped_name);
            }
        }

        recompute_all(&mut state);
        state.grantees.remove(local);
        state.roles.retain(|r| r != local);
        Ok(())
    }

    /// Grants a role to a grantee. Circular role grants are refused.
    pub fn grant_role(&self, grantee_local: &str, role_local: &str) -> StratumResult<()> {
        let mut state = self.state.write();

        let role_name = {
            let role = state
                .grantees
                .get(role_local)
                .ok_or_else(|| StratumError::GranteeNotFound {
                    name: role_local.to_string(),
                })?;
            if !role.is_role() {
                return Err(StratumError::InvalidArgument {
                    message: format!("{role_local} is not a role"),
                });
            }
            role.name().clone()
        };

        let grantee_name = state
            .grantees
            .get(grantee_local)
            .map(|g| g.name().clone())
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: grantee_local.to_string(),
            })?;

        if grantee_name == role_name || has_role(&state, role_local, &grantee_name) {
            return Err(StratumError::InvalidArgument {
                message: format!("granting {role_local} to {grantee_local} creates a cycle"),
            });
        }

        if let Some(grantee) = state.grantees.get_mut(grantee_local) {
            grantee.grant_role(role_name);
        }

        recompute_all(&mut state);
        Ok(())
    }

    /// Revokes a directly held role. Revoking a role held only
    /// transitively fails with `ROLE_NOT_GRANTED`.
    pub fn revoke_role(&self, grantee_local: &str, role_local: &str) -> StratumResult<()> {
        let mut state = self.state.write();

        let role_name = state
            .grantees
            .get(role_local)
            .map(|role| role.name().clone())
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: role_local.to_string(),
            })?;

        let grantee = state
            .grantees
            .get_mut(grantee_local)
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: grantee_local.to_string(),
            })?;
        grantee.revoke_role(&role_name)?;

        recompute_all(&mut state);
        Ok(())
    }

    /// Grants rights on an object.
    ///
    /// A grant on a schema name expands to that schema's tables,
    /// sequences and routines. A "full" incoming right is replaced by
    /// whatever the grantor can actually pass on; anything else must be
    /// covered by the grantor's grantable set.
    pub fn grant(
        &self,
        grantee_local: &str,
        name: &NameRef,
        right: &Right,
        grantor_local: &str,
        with_grant_option: bool,
        catalog: &SchemaManager,
    ) -> StratumResult<()> {
        if name.kind == ObjectKind::Schema {
            return self.apply_to_schema_objects(
                grantee_local,
                name,
                right,
                grantor_local,
                with_grant_option,
                catalog,
            );
        }

        let mut state = self.state.write();
        self.grant_locked(
            &mut state,
            grantee_local,
            name,
            right,
            grantor_local,
            with_grant_option,
        )
    }

    fn grant_locked(
        &self,
        state: &mut GranteeState,
        grantee_local: &str,
        name: &NameRef,
        right: &Right,
        grantor_local: &str,
        with_grant_option: bool,
    ) -> StratumResult<()> {
        let grantor_name = state
            .grantees
            .get(grantor_local)
            .map(|g| g.name().clone())
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: grantor_local.to_string(),
            })?;

        if !state.grantees.contains_key(grantee_local) {
            return Err(StratumError::GranteeNotFound {
                name: grantee_local.to_string(),
            });
        }

        let grantable = all_grantable_rights(state, grantor_local, name);
        let granted = if right.is_full() {
            if grantable.is_empty() {
                return Ok(());
            }
            grantable.duplicate()
        } else {
            if !grantable.contains(right) {
                return Err(StratumError::GrantInvalid {
                    name: name.qualified(),
                });
            }
            right.duplicate()
        };

        let grantee_name = state.grantees[grantee_local].name().clone();
        let recorded = {
            let Some(grantee) = state.grantees.get_mut(grantee_local) else {
                return Err(StratumError::GranteeNotFound {
                    name: grantee_local.to_string(),
                });
            };

            let mut entry = grantee
                .take_direct_right(name, &grantor_name)
                .unwrap_or_else(|| {
                    let mut fresh = granted.duplicate();
                    fresh.grantor = Some(grantor_name.clone());
                    fresh.grantee = Some(grantee_name.clone());
                    fresh
                });

            entry.add(&granted);
            if with_grant_option {
                match &mut entry.grantable {
                    Some(sub) => sub.add(&granted),
                    None => entry.grantable = Some(Box::new(granted.duplicate())),
                }
            }

            let recorded = entry.duplicate();
            grantee.insert_direct_right(name.clone(), entry);
            recorded
        };

        let grantor_is_system = state
            .grantees
            .get(grantor_local)
            .is_some_and(Grantee::is_system);
        if !grantor_is_system {
            if let Some(grantor) = state.grantees.get_mut(grantor_local) {
                grantor.forget_granted(name, &grantee_name);
                grantor.record_granted(name.clone(), recorded);
            }
        }

        recompute_all(state);
        Ok(())
    }

    /// Revokes rights on an object.
    ///
    /// With `grant_option_only`, only the WITH GRANT OPTION projection is
    /// subtracted. A full revoke drops the entry; a partial revoke that
    /// empties the entry drops it too.
    pub fn revoke(
        &self,
        grantee_local: &str,
        name: &NameRef,
        right: &Right,
        grantor_local: &str,
        grant_option_only: bool,
        catalog: &SchemaManager,
    ) -> StratumResult<()> {
        if name.kind == ObjectKind::Schema {
            // schema-wide revoke takes the same per-object expansion as
            // grant, applying the grant path to each child object
            return self.apply_to_schema_objects(
                grantee_local,
                name,
                right,
                grantor_local,
                grant_option_only,
                catalog,
            );
        }

        let mut state = self.state.write();

        let grantor_name = state
            .grantees
            .get(grantor_local)
            .map(|g| g.name().clone())
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: grantor_local.to_string(),
            })?;

        let grantee_name = state
            .grantees
            .get(grantee_local)
            .map(|g| g.name().clone())
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: grantee_local.to_string(),
            })?;

        let Some(grantee) = state.grantees.get_mut(grantee_local) else {
            return Err(StratumError::GranteeNotFound {
                name: grantee_local.to_string(),
            });
        };

        let Some(mut existing) = grantee.take_direct_right(name, &grantor_name) else {
            return Ok(());
        };

        if let Some(sub) = &mut existing.grantable {
            sub.remove(right);
            if sub.is_empty() {
                existing.grantable = None;
            }
        }

        if grant_option_only {
            grantee.insert_direct_right(name.clone(), existing);
            recompute_all(&mut state);
            return Ok(());
        }

        let drop_entry = if right.is_full() {
            true
        } else {
            existing.remove(right);
            existing.is_empty()
        };

        if drop_entry {
            if let Some(grantor) = state.grantees.get_mut(grantor_local) {
                grantor.forget_granted(name, &grantee_name);
            }
        } else {
            grantee.insert_direct_right(name.clone(), existing);
        }

        recompute_all(&mut state);
        Ok(())
    }

    /// Expands a schema-wide grant or revoke over the schema's tables,
    /// sequences and routines.
    fn apply_to_schema_objects(
        &self,
        grantee_local: &str,
        schema: &NameRef,
        right: &Right,
        grantor_local: &str,
        with_grant_option: bool,
        catalog: &SchemaManager,
    ) -> StratumResult<()> {
        let schema_local = schema.local();
        let mut children = Vec::new();
        for kind in [ObjectKind::Table, ObjectKind::Sequence, ObjectKind::Routine] {
            children.extend(catalog.object_names(&schema_local, kind));
        }

        let mut state = self.state.write();
        for child in children {
            self.grant_locked(
                &mut state,
                grantee_local,
                &child,
                right,
                grantor_local,
                with_grant_option,
            )?;
        }
        Ok(())
    }

    /// Forgets a dropped database object across every grantee.
    pub fn remove_db_object(&self, name: &NameRef) {
        let mut state = self.state.write();
        for grantee in state.grantees.values_mut() {
            grantee.remove_db_object(name);
        }
    }

    /// Widens existing direct rights on `table` with a newly added
    /// column, then recomputes.
    pub fn update_rights_for_new_column(&self, table: &NameRef, column: &NameRef) {
        let mut state = self.state.write();
        let mut touched = false;
        for grantee in state.grantees.values_mut() {
            touched |= grantee.update_rights_for_new_column(table, column);
        }
        if touched {
            recompute_all(&mut state);
        }
    }

    /// Access test: admin shortcut, schema-owner shortcut, then the full
    /// map with PUBLIC fallback.
    pub fn is_accessible(
        &self,
        grantee_local: &str,
        name: &NameRef,
        action: Option<Privileges>,
    ) -> StratumResult<bool> {
        let state = self.state.read();
        let grantee = state
            .grantees
            .get(grantee_local)
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: grantee_local.to_string(),
            })?;

        if fully_accessible_by_role(&state, grantee_local, name) {
            return Ok(true);
        }

        let allowed = |g: &Grantee| match action {
            Some(privilege) => g
                .full_right_on(name)
                .is_some_and(|right| right.can_access(privilege)),
            None => g.full_right_on(name).is_some_and(|right| !right.is_empty()),
        };

        if allowed(grantee) {
            return Ok(true);
        }

        if !grantee.is_public() {
            if let Some(public) = state.grantees.get(PUBLIC_ROLE) {
                return Ok(allowed(public));
            }
        }

        Ok(false)
    }

    /// Column-level access check; fails with `NOT_AUTHORIZED`.
    pub fn check_access(
        &self,
        grantee_local: &str,
        name: &NameRef,
        action: Privileges,
        columns: &[NameRef],
    ) -> StratumResult<()> {
        let state = self.state.read();
        let grantee = state
            .grantees
            .get(grantee_local)
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: grantee_local.to_string(),
            })?;

        if fully_accessible_by_role(&state, grantee_local, name) {
            return Ok(());
        }

        let check = |right: &Right| {
            if action.contains(Privileges::SELECT) {
                right.can_select(columns)
            } else if action.contains(Privileges::INSERT) {
                right.can_insert(columns)
            } else if action.contains(Privileges::UPDATE) {
                right.can_update(columns)
            } else if action.contains(Privileges::DELETE) {
                right.can_delete()
            } else if action.contains(Privileges::REFERENCES) {
                right.can_reference(columns)
            } else if action.contains(Privileges::TRIGGER) {
                right.can_trigger(columns)
            } else {
                right.can_access(action)
            }
        };

        if grantee.full_right_on(name).is_some_and(check) {
            return Ok(());
        }

        Err(StratumError::NotAuthorized {
            name: name.qualified(),
        })
    }

    /// Returns true when the grantee may update objects in the schema or
    /// grant rights on them: admin, schema owner, or member of the
    /// owning role.
    pub fn has_schema_update_or_grant_rights(
        &self,
        grantee_local: &str,
        schema: &NameRef,
    ) -> StratumResult<bool> {
        let state = self.state.read();
        let grantee = state
            .grantees
            .get(grantee_local)
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: grantee_local.to_string(),
            })?;

        if grantee.is_admin() {
            return Ok(true);
        }

        let Some(owner) = schema.owner.as_ref() else {
            return Ok(false);
        };

        Ok(grantee.name() == owner || has_role(&state, grantee_local, owner))
    }

    /// Grantees visible to `grantee_local`: everyone for admins, self
    /// plus transitive roles otherwise.
    pub fn visible_grantees(&self, grantee_local: &str) -> StratumResult<Vec<NameRef>> {
        let state = self.state.read();
        let grantee = state
            .grantees
            .get(grantee_local)
            .ok_or_else(|| StratumError::GranteeNotFound {
                name: grantee_local.to_string(),
            })?;

        if grantee.is_admin() {
            let mut all: Vec<NameRef> =
                state.grantees.values().map(|g| g.name().clone()).collect();
            all.sort_by_key(|name| name.local());
            return Ok(all);
        }

        let mut visible = vec![grantee.name().clone()];
        visible.extend(all_roles(&state, grantee_local));
        Ok(visible)
    }

    /// The effective right of a grantee on an object, if any.
    pub fn full_right_on(&self, grantee_local: &str, name: &NameRef) -> Option<Right> {
        let state = self.state.read();
        state
            .grantees
            .get(grantee_local)?
            .full_right_on(name)
            .map(Right::duplicate)
    }

    /// Returns true when `grantee_local` holds `role` directly or
    /// transitively.
    pub fn holds_role(&self, grantee_local: &str, role: &NameRef) -> bool {
        let state = self.state.read();
        has_role(&state, grantee_local, role)
    }
}

/// Transitive roles of a grantee, in discovery order.
fn all_roles(state: &GranteeState, local: &str) -> Vec<NameRef> {
    let mut found = Vec::new();
    let mut pending: Vec<NameRef> = state
        .grantees
        .get(local)
        .map(|g| g.direct_roles().to_vec())
        .unwrap_or_default();

    while let Some(role) = pending.pop() {
        if found.contains(&role) {
            continue;
        }
        if let Some(nested) = state.grantees.get(&role.local()) {
            pending.extend(nested.direct_roles().iter().cloned());
        }
        found.push(role);
    }

    found
}

fn has_role(state: &GranteeState, local: &str, role: &NameRef) -> bool {
    all_roles(state, local).contains(role)
}

/// Admin, object-owner or owner-role membership grants full access.
fn fully_accessible_by_role(state: &GranteeState, local: &str, name: &NameRef) -> bool {
    let Some(grantee) = state.grantees.get(local) else {
        return false;
    };

    if grantee.is_admin() {
        return true;
    }

    let owner = match name.kind {
        ObjectKind::Schema => name.owner.as_ref(),
        _ => name.schema.as_ref().and_then(|schema| schema.owner.as_ref()),
    };

    let Some(owner) = owner else {
        return false;
    };

    grantee.name() == owner || has_role(state, local, owner)
}

/// The rights `grantor` can pass on for `name`.
fn all_grantable_rights(state: &GranteeState, grantor_local: &str, name: &NameRef) -> Right {
    if fully_accessible_by_role(state, grantor_local, name) {
        return Right::full();
    }

    state
        .grantees
        .get(grantor_local)
        .and_then(|grantor| grantor.full_right_on(name))
        .map(Right::grantable_rights)
        .unwrap_or_default()
}

/// The role-update protocol: roles recomputed to a fixed point in
/// registration order, then every user.
fn recompute_all(state: &mut GranteeState) {
    let passes = state.roles.len().max(1);
    for _ in 0..passes {
        let roles = state.roles.clone();
        for role in roles {
            recompute_one(state, &role);
        }
    }

    let users: Vec<String> = state
        .grantees
        .iter()
        .filter(|(_, grantee)| !grantee.is_role())
        .map(|(local, _)| local.clone())
        .collect();
    for user in users {
        recompute_one(state, &user);
    }
}

fn recompute_one(state: &mut GranteeState, local: &str) {
    let Some(grantee) = state.grantees.get(local) else {
        return;
    };

    let role_maps: Vec<(HashMap<NameRef, Right>, bool)> = grantee
        .direct_roles()
        .iter()
        .filter_map(|role| {
            state
                .grantees
                .get(&role.local())
                .map(|r| (r.full_rights_map().clone(), r.is_admin()))
        })
        .collect();

    let public_map = if !grantee.is_role() && !grantee.is_public() && !grantee.is_system() {
        state
            .grantees
            .get(PUBLIC_ROLE)
            .map(|public| public.full_rights_map().clone())
    } else {
        None
    };

    if let Some(grantee) = state.grantees.get_mut(local) {
        grantee.rebuild_full_rights(&role_maps, public_map.as_ref());
    }
}
