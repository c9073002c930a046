// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Group-to-role resolution.
//!
//! Maps the caller's external group ids onto one effective role through the
//! admin-managed mapping table. The matched role with the lowest `level`
//! wins (lower level = higher authority); roles tied on level resolve to
//! the lowest role id, so resolution never depends on row-return order.
//!
//! Resolution is a pure function of the current group set. The stored role
//! on the user is only updated when it differs from the freshly resolved
//! value, and authorization for the current request always uses the fresh
//! value regardless of whether a write occurred.

use crate::store::{LocalUser, RoleMappingRepository, RoleRecord, UserRepository};

use super::error::AuthError;

/// Compute the effective role for a group set. No match is `None`, not an
/// error: the caller stays authenticated without role-gated access.
pub fn resolve_role(
    mappings: &dyn RoleMappingRepository,
    groups: &[String],
) -> Result<Option<RoleRecord>, AuthError> {
    if groups.is_empty() {
        return Ok(None);
    }

    let mut roles = mappings.roles_for_groups(groups)?;
    roles.sort_by_key(|role| (role.level, role.id));
    Ok(roles.into_iter().next())
}

/// Store the resolved role on the user, writing only on actual difference.
pub fn persist_resolved_role(
    users: &dyn UserRepository,
    user: &LocalUser,
    resolved: Option<&RoleRecord>,
) -> Result<(), AuthError> {
    let resolved_id = resolved.map(|role| role.id);
    if user.role_id != resolved_id {
        users.persist_role(user.id, resolved_id)?;
    }
    Ok(())
}
