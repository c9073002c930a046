// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Identity Store
//!
//! Persistent records for the authentication subsystem and the repository
//! traits the request pipeline consumes.
//!
//! ## Records
//!
//! - [`LocalUser`] — the local account a request resolves to
//! - [`ExternalIdentity`] — immutable link from an identity-provider subject
//!   id to a [`LocalUser`]; created once, never reassigned
//! - [`RoleRecord`] — an access-control role with a unique precedence `level`
//!   (lower = higher authority)
//! - [`GroupRoleMapping`] — admin-managed mapping from an external group id
//!   to a role; never written during request handling
//!
//! ## Repositories
//!
//! [`UserRepository`] and [`RoleMappingRepository`] are the seams between the
//! auth pipeline and storage. The production implementation is
//! [`redb_store::IdentityDatabase`]; [`memory::InMemoryIdentityStore`] backs
//! tests and local development.

pub mod memory;
pub mod redb_store;

pub use memory::InMemoryIdentityStore;
pub use redb_store::IdentityDatabase;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Store error type.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// An `ExternalIdentity` for this subject id already exists.
    /// During concurrent first logins this means another request won the
    /// creation race; callers re-read instead of failing.
    #[error("identity already exists for subject: {0}")]
    DuplicateSubject(String),

    /// A `LocalUser` with this username already exists.
    #[error("user already exists for principal: {0}")]
    DuplicatePrincipal(String),

    /// Referenced record does not exist.
    #[error("not found: {0}")]
    NotFound(String),

    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// Record (de)serialization failure.
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// A local user account.
///
/// Created on first successful login, or matched to a pre-existing record by
/// principal name. `role_id` is the persisted effective role; authorization
/// for the current request always uses the freshly resolved role, so this
/// field is only a cache for administrative views.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LocalUser {
    /// Local primary key.
    pub id: Uuid,
    /// Principal name from the identity provider.
    pub username: String,
    /// Email address.
    pub email: String,
    /// Given name.
    pub given_name: String,
    /// Family name.
    pub family_name: String,
    /// Whether the account may authenticate.
    pub is_active: bool,
    /// Staff flag (grants access to internal tooling).
    pub is_staff: bool,
    /// Superuser flag.
    pub is_superuser: bool,
    /// Persisted effective role, if any.
    pub role_id: Option<i64>,
    /// When the account was created.
    pub created_at: DateTime<Utc>,
    /// When the account was last modified.
    pub updated_at: DateTime<Utc>,
}

/// Link from an identity-provider subject id to a local user.
///
/// The subject id is globally unique and immutable: it is the only field
/// ever used as the provisioning key, because principal names and emails can
/// change for the same person over time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExternalIdentity {
    /// Immutable subject id issued by the identity provider.
    pub external_subject_id: String,
    /// The local user this identity belongs to.
    pub local_user_id: Uuid,
    /// When the link was created.
    pub created_at: DateTime<Utc>,
}

/// An access-control role.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Role primary key.
    pub id: i64,
    /// Role name (e.g. `administrator`, `case-worker`).
    pub name: String,
    /// Human-readable description.
    pub description: String,
    /// Precedence level; lower values denote higher authority. Unique.
    pub level: i64,
}

/// Admin-managed mapping from an external group id to a role.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRoleMapping {
    /// Group id as issued by the identity provider.
    pub external_group_id: String,
    /// The role this group grants.
    pub role_id: i64,
}

/// Profile attributes applied to a `LocalUser` at provisioning time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserProfile {
    pub username: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
}

impl UserProfile {
    /// Whether applying this profile to `user` would change anything.
    pub fn differs_from(&self, user: &LocalUser) -> bool {
        self.username != user.username
            || self.email != user.email
            || self.given_name != user.given_name
            || self.family_name != user.family_name
    }
}

/// User-record store consumed by the provisioning stage.
pub trait UserRepository: Send + Sync {
    /// Look up the user linked to an external subject id.
    fn find_by_subject(&self, subject_id: &str) -> StoreResult<Option<LocalUser>>;

    /// Look up a user by principal name (for account linking).
    fn find_by_principal(&self, username: &str) -> StoreResult<Option<LocalUser>>;

    /// Create a new user and its external identity atomically.
    ///
    /// Returns [`StoreError::DuplicateSubject`] if an identity for
    /// `subject_id` already exists, and [`StoreError::DuplicatePrincipal`]
    /// if the username is already taken; both signal a lost race that the
    /// caller resolves by re-reading.
    fn create_with_identity(
        &self,
        subject_id: &str,
        profile: &UserProfile,
    ) -> StoreResult<LocalUser>;

    /// Attach a new external identity to an existing user.
    fn link_identity(&self, subject_id: &str, user_id: Uuid) -> StoreResult<()>;

    /// Apply profile attributes idempotently.
    ///
    /// Returns `Some(updated)` when a write occurred, `None` when the stored
    /// record already matched.
    fn update_profile(&self, user_id: Uuid, profile: &UserProfile)
        -> StoreResult<Option<LocalUser>>;

    /// Persist the resolved role, writing only on actual difference.
    ///
    /// Returns whether a write occurred.
    fn persist_role(&self, user_id: Uuid, role_id: Option<i64>) -> StoreResult<bool>;
}

/// Role-mapping store consumed by the role resolver.
pub trait RoleMappingRepository: Send + Sync {
    /// Fetch the roles granted by any of the given external group ids.
    ///
    /// Each matched role appears once even when several groups map to it.
    fn roles_for_groups(&self, group_ids: &[String]) -> StoreResult<Vec<RoleRecord>>;
}
