// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Authentication Module
//!
//! Bearer-token authentication and authorization for the case-management
//! API. This service is a relying party: tokens are issued by an external
//! identity provider and only verified here.
//!
//! ## Auth Flow
//!
//! 1. Client sends `Authorization: Bearer <JWT>`
//! 2. The auth gate middleware:
//!    - Resolves the signing key from the cached provider JWKS
//!    - Verifies signature, expiry, audience, and issuer
//!    - Extracts subject id, principal name, and group ids
//!    - Finds or creates the local user keyed by the immutable subject id
//!    - Resolves the effective role from the group-to-role mapping table
//! 3. The resulting `AuthContext` rides on the request for handlers to
//!    consume via the `Auth`/`OptionalAuth` extractors
//!
//! ## Security
//!
//! - Signature verification uses an explicit algorithm allow-list
//! - The JWKS cache refreshes at most once per key miss (single-flight)
//! - Failed authentication returns a generic body; details are only logged
//! - The development bypass refuses to activate in production
//!
//! Interactive admin paths use a separate session-based protocol and are
//! routed outside this gate; the split is deliberate.

pub mod claims;
pub mod context;
pub mod error;
pub mod extractor;
pub mod gate;
pub mod jwks;
pub mod membership;
pub mod provisioning;
pub mod roles;
pub mod validator;

#[cfg(test)]
pub mod test_support;

pub use claims::{ClaimRules, ClaimsProfile};
pub use context::AuthContext;
pub use error::AuthError;
pub use extractor::{Auth, OptionalAuth};
pub use gate::auth_gate;
pub use jwks::KeyCache;
pub use validator::TokenValidator;
