// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User provisioning.
//!
//! Finds or creates the local user for a verified identity. Lookup order:
//!
//! 1. Exact match on the external subject id: load the user and apply
//!    changed profile attributes (a write happens only on actual
//!    difference).
//! 2. No identity link, but a local user matches the principal name:
//!    attach a new identity to it (account linking). A duplicate user is
//!    never created for a known principal.
//! 3. Otherwise create the user and its identity link atomically.
//!
//! Simultaneous first logins for the same subject can both reach step 3;
//! the store reports the uniqueness violation and the loser re-reads the
//! winner's record instead of failing.

use crate::store::{LocalUser, StoreError, UserRepository};

use super::claims::ClaimsProfile;
use super::error::AuthError;

/// Return the persisted local user for the given identity profile.
pub fn provision(
    users: &dyn UserRepository,
    profile: &ClaimsProfile,
) -> Result<LocalUser, AuthError> {
    let attrs = profile.user_profile();

    if let Some(user) = users.find_by_subject(&profile.subject_id)? {
        return Ok(users.update_profile(user.id, &attrs)?.unwrap_or(user));
    }

    if let Some(user) = users.find_by_principal(&profile.username)? {
        return match users.link_identity(&profile.subject_id, user.id) {
            Ok(()) => Ok(user),
            Err(StoreError::DuplicateSubject(_)) => reread(users, profile),
            Err(e) => Err(e.into()),
        };
    }

    match users.create_with_identity(&profile.subject_id, &attrs) {
        Ok(user) => Ok(user),
        Err(StoreError::DuplicateSubject(_)) => reread(users, profile),
        Err(StoreError::DuplicatePrincipal(_)) => {
            // The principal appeared between lookup and create; link to it.
            let user = users
                .find_by_principal(&profile.username)?
                .ok_or_else(|| {
                    AuthError::Provisioning(format!(
                        "principal {} vanished during login race",
                        profile.username
                    ))
                })?;
            match users.link_identity(&profile.subject_id, user.id) {
                Ok(()) => Ok(user),
                Err(StoreError::DuplicateSubject(_)) => reread(users, profile),
                Err(e) => Err(e.into()),
            }
        }
        Err(e) => Err(e.into()),
    }
}

/// Another request created the identity first; its record wins.
fn reread(users: &dyn UserRepository, profile: &ClaimsProfile) -> Result<LocalUser, AuthError> {
    users.find_by_subject(&profile.subject_id)?.ok_or_else(|| {
        AuthError::Provisioning(format!(
            "identity for subject {} vanished during login race",
            profile.subject_id
        ))
    })
}
