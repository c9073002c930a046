// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Embedded identity database backed by redb (pure Rust, ACID).
//!
//! ## Table Layout
//!
//! - `users`: user_id → serialized LocalUser
//! - `users_by_username`: username → user_id
//! - `external_identities`: subject_id → serialized ExternalIdentity
//! - `roles`: role_id → serialized RoleRecord
//! - `group_role_mappings`: external_group_id → role_id
//!
//! User creation and identity linking happen inside a single write
//! transaction, so a failure partway through rolls back entirely and can
//! never leave a user without its identity link. redb serializes writers,
//! which makes the existence check inside `create_with_identity` race-free.

use std::collections::BTreeSet;
use std::path::Path;

use chrono::Utc;
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use uuid::Uuid;

use super::{
    ExternalIdentity, GroupRoleMapping, LocalUser, RoleMappingRepository, RoleRecord, StoreError,
    StoreResult, UserProfile, UserRepository,
};

// =============================================================================
// Table Definitions
// =============================================================================

/// Primary table: user_id (UUID string) → serialized LocalUser (JSON bytes).
const USERS: TableDefinition<&str, &[u8]> = TableDefinition::new("users");

/// Index: username → user_id.
const USERS_BY_USERNAME: TableDefinition<&str, &str> = TableDefinition::new("users_by_username");

/// Identity links: external subject id → serialized ExternalIdentity.
const EXTERNAL_IDENTITIES: TableDefinition<&str, &[u8]> =
    TableDefinition::new("external_identities");

/// Role catalogue: role_id → serialized RoleRecord.
const ROLES: TableDefinition<i64, &[u8]> = TableDefinition::new("roles");

/// Admin-managed mapping: external group id → role_id.
const GROUP_ROLE_MAPPINGS: TableDefinition<&str, i64> =
    TableDefinition::new("group_role_mappings");

impl From<redb::DatabaseError> for StoreError {
    fn from(e: redb::DatabaseError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::TransactionError> for StoreError {
    fn from(e: redb::TransactionError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::TableError> for StoreError {
    fn from(e: redb::TableError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::StorageError> for StoreError {
    fn from(e: redb::StorageError) -> Self {
        StoreError::Database(e.to_string())
    }
}

impl From<redb::CommitError> for StoreError {
    fn from(e: redb::CommitError) -> Self {
        StoreError::Database(e.to_string())
    }
}

// =============================================================================
// IdentityDatabase
// =============================================================================

/// Embedded ACID identity database.
pub struct IdentityDatabase {
    db: Database,
}

impl IdentityDatabase {
    /// Open (or create) the database at the given path.
    pub fn open(path: &Path) -> StoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let db = Database::create(path)?;

        // Pre-create all tables so later read transactions don't fail
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(USERS)?;
            let _ = write_txn.open_table(USERS_BY_USERNAME)?;
            let _ = write_txn.open_table(EXTERNAL_IDENTITIES)?;
            let _ = write_txn.open_table(ROLES)?;
            let _ = write_txn.open_table(GROUP_ROLE_MAPPINGS)?;
        }
        write_txn.commit()?;

        Ok(Self { db })
    }

    // =========================================================================
    // Administrative operations (role catalogue and mapping table)
    // =========================================================================

    /// Insert or replace a role. Admin/seed path only.
    pub fn upsert_role(&self, role: &RoleRecord) -> StoreResult<()> {
        let json = serde_json::to_vec(role)?;
        let write_txn = self.db.begin_write()?;
        {
            let mut table = write_txn.open_table(ROLES)?;
            table.insert(role.id, json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    /// Insert or replace a group-to-role mapping. Admin/seed path only.
    pub fn upsert_mapping(&self, mapping: &GroupRoleMapping) -> StoreResult<()> {
        let write_txn = self.db.begin_write()?;
        {
            let roles = write_txn.open_table(ROLES)?;
            if roles.get(mapping.role_id)?.is_none() {
                return Err(StoreError::NotFound(format!("role {}", mapping.role_id)));
            }
            let mut table = write_txn.open_table(GROUP_ROLE_MAPPINGS)?;
            table.insert(mapping.external_group_id.as_str(), mapping.role_id)?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn load_user(
        table: &impl ReadableTable<&'static str, &'static [u8]>,
        user_id: &str,
    ) -> StoreResult<Option<LocalUser>> {
        match table.get(user_id)? {
            Some(bytes) => Ok(Some(serde_json::from_slice(bytes.value())?)),
            None => Ok(None),
        }
    }
}

impl UserRepository for IdentityDatabase {
    fn find_by_subject(&self, subject_id: &str) -> StoreResult<Option<LocalUser>> {
        let read_txn = self.db.begin_read()?;
        let identities = read_txn.open_table(EXTERNAL_IDENTITIES)?;
        let Some(bytes) = identities.get(subject_id)? else {
            return Ok(None);
        };
        let identity: ExternalIdentity = serde_json::from_slice(bytes.value())?;

        let users = read_txn.open_table(USERS)?;
        let user = Self::load_user(&users, &identity.local_user_id.to_string())?;
        match user {
            Some(user) => Ok(Some(user)),
            None => Err(StoreError::NotFound(format!(
                "user {} for subject {subject_id}",
                identity.local_user_id
            ))),
        }
    }

    fn find_by_principal(&self, username: &str) -> StoreResult<Option<LocalUser>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(USERS_BY_USERNAME)?;
        let Some(user_id) = index.get(username)? else {
            return Ok(None);
        };
        let users = read_txn.open_table(USERS)?;
        Self::load_user(&users, user_id.value())
    }

    fn create_with_identity(
        &self,
        subject_id: &str,
        profile: &UserProfile,
    ) -> StoreResult<LocalUser> {
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
        let identity = ExternalIdentity {
            external_subject_id: subject_id.to_string(),
            local_user_id: user.id,
            created_at: now,
        };

        let user_json = serde_json::to_vec(&user)?;
        let identity_json = serde_json::to_vec(&identity)?;
        let user_id = user.id.to_string();

        let write_txn = self.db.begin_write()?;
        {
            let mut identities = write_txn.open_table(EXTERNAL_IDENTITIES)?;
            if identities.get(subject_id)?.is_some() {
                return Err(StoreError::DuplicateSubject(subject_id.to_string()));
            }
            let mut index = write_txn.open_table(USERS_BY_USERNAME)?;
            if index.get(profile.username.as_str())?.is_some() {
                return Err(StoreError::DuplicatePrincipal(profile.username.clone()));
            }
            let mut users = write_txn.open_table(USERS)?;
            users.insert(user_id.as_str(), user_json.as_slice())?;
            index.insert(profile.username.as_str(), user_id.as_str())?;
            identities.insert(subject_id, identity_json.as_slice())?;
        }
        write_txn.commit()?;

        Ok(user)
    }

    fn link_identity(&self, subject_id: &str, user_id: Uuid) -> StoreResult<()> {
        let identity = ExternalIdentity {
            external_subject_id: subject_id.to_string(),
            local_user_id: user_id,
            created_at: Utc::now(),
        };
        let json = serde_json::to_vec(&identity)?;

        let write_txn = self.db.begin_write()?;
        {
            let users = write_txn.open_table(USERS)?;
            if users.get(user_id.to_string().as_str())?.is_none() {
                return Err(StoreError::NotFound(format!("user {user_id}")));
            }
            let mut identities = write_txn.open_table(EXTERNAL_IDENTITIES)?;
            if identities.get(subject_id)?.is_some() {
                return Err(StoreError::DuplicateSubject(subject_id.to_string()));
            }
            identities.insert(subject_id, json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(())
    }

    fn update_profile(
        &self,
        user_id: Uuid,
        profile: &UserProfile,
    ) -> StoreResult<Option<LocalUser>> {
        let user_key = user_id.to_string();
        let write_txn = self.db.begin_write()?;
        let updated = {
            let mut users = write_txn.open_table(USERS)?;
            let mut user = Self::load_user(&users, &user_key)?
                .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;

            if !profile.differs_from(&user) {
                return Ok(None);
            }

            let old_username = user.username.clone();
            user.username = profile.username.clone();
            user.email = profile.email.clone();
            user.given_name = profile.given_name.clone();
            user.family_name = profile.family_name.clone();
            user.updated_at = Utc::now();

            let json = serde_json::to_vec(&user)?;
            users.insert(user_key.as_str(), json.as_slice())?;

            if old_username != user.username {
                let mut index = write_txn.open_table(USERS_BY_USERNAME)?;
                index.remove(old_username.as_str())?;
                index.insert(user.username.as_str(), user_key.as_str())?;
            }
            user
        };
        write_txn.commit()?;
        Ok(Some(updated))
    }

    fn persist_role(&self, user_id: Uuid, role_id: Option<i64>) -> StoreResult<bool> {
        let user_key = user_id.to_string();
        let write_txn = self.db.begin_write()?;
        {
            let mut users = write_txn.open_table(USERS)?;
            let mut user = Self::load_user(&users, &user_key)?
                .ok_or_else(|| StoreError::NotFound(format!("user {user_id}")))?;

            if user.role_id == role_id {
                return Ok(false);
            }

            user.role_id = role_id;
            user.updated_at = Utc::now();
            let json = serde_json::to_vec(&user)?;
            users.insert(user_key.as_str(), json.as_slice())?;
        }
        write_txn.commit()?;
        Ok(true)
    }
}

impl RoleMappingRepository for IdentityDatabase {
    fn roles_for_groups(&self, group_ids: &[String]) -> StoreResult<Vec<RoleRecord>> {
        let read_txn = self.db.begin_read()?;
        let mappings = read_txn.open_table(GROUP_ROLE_MAPPINGS)?;

        let mut role_ids = BTreeSet::new();
        for group_id in group_ids {
            if let Some(role_id) = mappings.get(group_id.as_str())? {
                role_ids.insert(role_id.value());
            }
        }

        let roles_table = read_txn.open_table(ROLES)?;
        let mut roles = Vec::with_capacity(role_ids.len());
        for role_id in role_ids {
            if let Some(bytes) = roles_table.get(role_id)? {
                roles.push(serde_json::from_slice(bytes.value())?);
            }
        }
        Ok(roles)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn open_db() -> (IdentityDatabase, TempDir) {
        let dir = TempDir::new().expect("Failed to create temp dir");
        let db = IdentityDatabase::open(&dir.path().join("identity.redb")).unwrap();
        (db, dir)
    }

    fn profile(username: &str) -> UserProfile {
        UserProfile {
            username: username.to_string(),
            email: format!("{username}@example.org"),
            given_name: "Jane".to_string(),
            family_name: "Doe".to_string(),
        }
    }

    #[test]
    fn create_then_find_by_subject() {
        let (db, _dir) = open_db();
        let created = db.create_with_identity("subj-1", &profile("jdoe")).unwrap();

        let found = db.find_by_subject("subj-1").unwrap().unwrap();
        assert_eq!(found.id, created.id);
        assert_eq!(found.username, "jdoe");
        assert!(found.is_active);
        assert!(found.role_id.is_none());
    }

    #[test]
    fn duplicate_subject_is_reported() {
        let (db, _dir) = open_db();
        db.create_with_identity("subj-1", &profile("jdoe")).unwrap();

        let err = db
            .create_with_identity("subj-1", &profile("other"))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicateSubject(_)));
    }

    #[test]
    fn duplicate_principal_is_reported() {
        let (db, _dir) = open_db();
        db.create_with_identity("subj-1", &profile("jdoe")).unwrap();

        let err = db
            .create_with_identity("subj-2", &profile("jdoe"))
            .unwrap_err();
        assert!(matches!(err, StoreError::DuplicatePrincipal(_)));
    }

    #[test]
    fn link_identity_attaches_to_existing_user() {
        let (db, _dir) = open_db();
        let user = db.create_with_identity("subj-1", &profile("jdoe")).unwrap();

        db.link_identity("subj-2", user.id).unwrap();
        let found = db.find_by_subject("subj-2").unwrap().unwrap();
        assert_eq!(found.id, user.id);
    }

    #[test]
    fn update_profile_writes_only_on_difference() {
        let (db, _dir) = open_db();
        let user = db.create_with_identity("subj-1", &profile("jdoe")).unwrap();

        // Identical profile: no write
        assert!(db.update_profile(user.id, &profile("jdoe")).unwrap().is_none());

        // Changed email: write, index follows username
        let mut changed = profile("jdoe");
        changed.email = "renamed@example.org".to_string();
        let updated = db.update_profile(user.id, &changed).unwrap().unwrap();
        assert_eq!(updated.email, "renamed@example.org");
    }

    #[test]
    fn update_profile_moves_username_index() {
        let (db, _dir) = open_db();
        let user = db.create_with_identity("subj-1", &profile("jdoe")).unwrap();

        db.update_profile(user.id, &profile("jane.doe")).unwrap();
        assert!(db.find_by_principal("jdoe").unwrap().is_none());
        assert_eq!(
            db.find_by_principal("jane.doe").unwrap().unwrap().id,
            user.id
        );
    }

    #[test]
    fn persist_role_is_idempotent() {
        let (db, _dir) = open_db();
        let user = db.create_with_identity("subj-1", &profile("jdoe")).unwrap();

        assert!(db.persist_role(user.id, Some(2)).unwrap());
        assert!(!db.persist_role(user.id, Some(2)).unwrap());
        assert!(db.persist_role(user.id, None).unwrap());
    }

    #[test]
    fn roles_for_groups_dedupes_and_resolves() {
        let (db, _dir) = open_db();
        db.upsert_role(&RoleRecord {
            id: 1,
            name: "administrator".to_string(),
            description: "Full access".to_string(),
            level: 0,
        })
        .unwrap();
        db.upsert_role(&RoleRecord {
            id: 2,
            name: "case-worker".to_string(),
            description: "Case management".to_string(),
            level: 5,
        })
        .unwrap();
        db.upsert_mapping(&GroupRoleMapping {
            external_group_id: "grp-admins".to_string(),
            role_id: 1,
        })
        .unwrap();
        db.upsert_mapping(&GroupRoleMapping {
            external_group_id: "grp-admins-2".to_string(),
            role_id: 1,
        })
        .unwrap();
        db.upsert_mapping(&GroupRoleMapping {
            external_group_id: "grp-workers".to_string(),
            role_id: 2,
        })
        .unwrap();

        let roles = db
            .roles_for_groups(&[
                "grp-admins".to_string(),
                "grp-admins-2".to_string(),
                "grp-unknown".to_string(),
            ])
            .unwrap();
        assert_eq!(roles.len(), 1);
        assert_eq!(roles[0].id, 1);

        let both = db
            .roles_for_groups(&["grp-admins".to_string(), "grp-workers".to_string()])
            .unwrap();
        assert_eq!(both.len(), 2);
    }

    #[test]
    fn mapping_requires_existing_role() {
        let (db, _dir) = open_db();
        let err = db
            .upsert_mapping(&GroupRoleMapping {
                external_group_id: "grp-x".to_string(),
                role_id: 99,
            })
            .unwrap_err();
        assert!(matches!(err, StoreError::NotFound(_)));
    }
}
