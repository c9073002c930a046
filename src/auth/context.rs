// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Request-scoped authentication context.

use chrono::{DateTime, Utc};
use serde_json::{Map, Value};

use crate::store::{LocalUser, RoleRecord};

/// The resolved identity attached to an authenticated request.
///
/// Transient and request-scoped; never persisted. Resource handlers consume
/// it through the `Auth`/`OptionalAuth` extractors for their authorization
/// checks.
#[derive(Debug, Clone)]
pub struct AuthContext {
    /// The provisioned local user.
    pub user: LocalUser,
    /// Freshly resolved effective role; `None` means authenticated but
    /// unauthorized for role-gated actions.
    pub role: Option<RoleRecord>,
    /// The verified claim set.
    pub claims: Map<String, Value>,
    /// Token expiry instant.
    pub expires_at: DateTime<Utc>,
}

impl AuthContext {
    /// Name of the effective role, if any.
    pub fn role_name(&self) -> Option<&str> {
        self.role.as_ref().map(|role| role.name.as_str())
    }

    /// Whether the effective role is at least as authoritative as
    /// `max_level` (lower level = higher authority).
    pub fn has_authority(&self, max_level: i64) -> bool {
        self.role
            .as_ref()
            .is_some_and(|role| role.level <= max_level)
    }
}
