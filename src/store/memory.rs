// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! In-memory identity store for tests and local development.
//!
//! Implements the same repository traits as the redb-backed store. A write
//! counter is exposed so tests can assert that repeated provisioning of
//! unchanged claims performs zero additional writes.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use super::{
    ExternalIdentity, GroupRoleMapping, LocalUser, RoleMappingRepository, RoleRecord, StoreError,
    StoreResult, UserProfile, UserRepository,
};

#[derive(Default)]
struct Inner {
    users: HashMap<Uuid, LocalUser>,
    identities: HashMap<String, ExternalIdentity>,
    roles: HashMap<i64, RoleRecord>,
    mappings: HashMap<String, i64>,
    writes: usize,
}

/// Mutex-guarded in-memory store.
///
/// The single lock makes every repository operation atomic, mirroring the
/// transactional behavior of the redb store.
#[derive(Default)]
pub struct InMemoryIdentityStore {
    inner: Mutex<Inner>,
}

impl InMemoryIdentityStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a role. Admin/seed path only.
    pub fn upsert_role(&self, role: RoleRecord) {
        let mut inner = self.inner.lock().unwrap();
        inner.roles.insert(role.id, role);
    }

    /// Insert or replace a group-to-role mapping. Admin/seed path only.
    pub fn upsert_mapping(&self, mapping: GroupRoleMapping) {
        let mut inner = self.inner.lock().unwrap();
        inner
            .mappings
            .insert(mapping.external_group_id, mapping.role_id);
    }

    /// Number of mutating operations performed so far.
    pub fn write_count(&self) -> usize {
        self.inner.lock().unwrap().writes
    }
}

impl UserRepository for InMemoryIdentityStore {
    fn find_by_subject(&self, subject_id: &str) -> StoreResult<Option<LocalUser>> {
        let inner = self.inner.lock().unwrap();
        let Some(identity) = inner.identities.get(subject_id) else {
            return Ok(None);
        };
        match inner.users.get(&identity.local_user_id) {
            Some(user) => Ok(Some(user.clone())),
            None => Err(StoreError::NotFound(format!(
                "user {} for subject {subject_id}",
                identity.local_user_id
            ))),
        }
    }

    fn find_by_principal(&self, username: &str) -> StoreResult<Option<LocalUser>> {
        let inner = self.inner.lock().unwrap();
        Ok(inner
            .users
            .values()
            .find(|user| user.username == username)
            .cloned())
    }

    fn create_with_identity(
        &self,
        subject_id: &str,
        profile: &UserProfile,
    ) -> StoreResult<LocalUser> {
        let mut inner = self.inner.lock().unwrap();
        if inner.identities.contains_key(subject_id) {
            return Err(StoreError::DuplicateSubject(subject_id.to_string()));
        }
        if inner.users.values().any(|u| u.username == profile.username) {
            return Err(StoreError::DuplicatePrincipal(profile.username.clone()));
        }

        let now = Utc::now();
        let user = LocalUser {
            id: Uuid::new_v4(),
            username: profile.username.clone(),
            email: profile.email.clone(),
            given_name: profile.given_name.clone(),
            family_name: profile.family_name.clone(),
            is_active: true,
            is_staff: false,
            is_superuser: false,
            role_id: None,
            created_at: now,
            updated_at: now,
        };
        inner.identities.insert(
            subject_id.to_string(),
            ExternalIdentity {
                external_subject_id: subject_id.to_string(),
                local_user_id: user.id,
                created_at: now,
            },
        );
        inner.users.insert(user.id, user.clone());
        inner.writes += 1;
        Ok(user)
    }

    fn link_identity(&self, subject_id: &str, user_id: Uuid) -> StoreResult<()> {
        let mut inner = self.inner.lock().unwrap();
        if !inner.users.contains_key(&user_id) {
            return Err(StoreError::NotFound(format!("user {user_id}")));
        }
        if inner.identities.contains_key(subject_id) {
            return Err(StoreError::DuplicateSubject(subject_id.to_string()));
        }
        inner.identities.insert(
            subject_id.to_string(),
            ExternalIdentity {
                external_subject_id: subject_id.to_string(),
                local_user_id: user_id,
                created_at: Utc::now(),
            },
        );
        inner.writes += 1;
        Ok(())
    }

    fn update_profile(
        &self,
        user_id: Uuid,
        profile: &UserProfile,
    ) -> StoreResult<Option<LocalUser>> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .get(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;

        if !profile.differs_from(user) {
            return Ok(None);
        }

        let user = inner.users.get_mut(&user_id).unwrap();
        user.username = profile.username.clone();
        user.email = profile.email.clone();
        user.given_name = profile.given_name.clone();
        user.family_name = profile.family_name.clone();
        user.updated_at = Utc::now();
        let updated = user.clone();
        inner.writes += 1;
        Ok(Some(updated))
    }

    fn persist_role(&self, user_id: Uuid, role_id: Option<i64>) -> StoreResult<bool> {
        let mut inner = self.inner.lock().unwrap();
        let user = inner
            .users
            .get(&user_id)
            .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;

        if user.role_id == role_id {
            return Ok(false);
        }

        let user = inner.users.get_mut(&user_id).unwrap();
        user.role_id = role_id;
        user.updated_at = Utc::now();
        inner.writes += 1;
        Ok(true)
    }
}

impl RoleMappingRepository for InMemoryIdentityStore {
    fn roles_for_groups(&self, group_ids: &[String]) -> StoreResult<Vec<RoleRecord>> {
        let inner = self.inner.lock().unwrap();
        let mut role_ids: Vec<i64> = group_ids
            .iter()
            .filter_map(|group_id| inner.mappings.get(group_id).copied())
            .collect();
        role_ids.sort_unstable();
        role_ids.dedup();

        Ok(role_ids
            .into_iter()
            .filter_map(|role_id| inner.roles.get(&role_id).cloned())
            .collect())
    }
}
