// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Bearer token validation.
//!
//! Confirms a bearer string is well-formed, correctly signed, unexpired,
//! and issued for this deployment:
//!
//! 1. Parse the unverified header to read `kid` and algorithm
//! 2. Resolve the verification key through the key cache
//! 3. Verify the signature against an explicit algorithm allow-list
//! 4. Verify `exp`/`nbf` with a bounded clock-skew leeway
//! 5. Verify `aud` and `iss` for exact equality with the configured values
//!
//! No retries beyond the key cache's single forced refresh on a `kid` miss.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use jsonwebtoken::{decode, decode_header, Algorithm, Validation};
use serde_json::{Map, Value};

use super::error::AuthError;
use super::jwks::{KeyCache, KeyCacheError};

/// Default clock-skew leeway (5 minutes).
pub const DEFAULT_CLOCK_SKEW_LEEWAY: u64 = 300;

/// A token that passed every verification step.
#[derive(Debug, Clone)]
pub struct VerifiedToken {
    /// The verified claim set.
    pub claims: Map<String, Value>,
    /// Token expiry instant, from the `exp` claim.
    pub expires_at: DateTime<Utc>,
}

/// Token validator bound to one deployment's issuer and audience.
pub struct TokenValidator {
    keys: Arc<KeyCache>,
    expected_audience: String,
    expected_issuer: String,
    /// Explicit algorithm allow-list; anything else is rejected, including
    /// a header that names no listed algorithm at all.
    allowed_algorithms: Vec<Algorithm>,
    leeway_seconds: u64,
}

impl TokenValidator {
    pub fn new(
        keys: Arc<KeyCache>,
        expected_audience: impl Into<String>,
        expected_issuer: impl Into<String>,
        allowed_algorithms: Vec<Algorithm>,
        leeway_seconds: u64,
    ) -> Self {
        Self {
            keys,
            expected_audience: expected_audience.into(),
            expected_issuer: expected_issuer.into(),
            allowed_algorithms,
            leeway_seconds,
        }
    }

    /// Verify a bearer token and return its claim set.
    pub async fn validate(&self, token: &str) -> Result<VerifiedToken, AuthError> {
        let header = decode_header(token).map_err(|_| AuthError::TokenMalformed)?;

        if !self.allowed_algorithms.contains(&header.alg) {
            tracing::warn!(algorithm = ?header.alg, "token algorithm not on the allow-list");
            return Err(AuthError::InvalidSignature);
        }

        let kid = header.kid.as_deref().ok_or(AuthError::TokenMalformed)?;
        let cached = self.keys.get_key(kid).await.map_err(|e| match e {
            KeyCacheError::UnknownKey(_) => AuthError::InvalidSignature,
            KeyCacheError::Retrieval(msg) => AuthError::KeyRetrieval(msg),
        })?;

        // A key that declares its own algorithm must agree with the header.
        if let Some(declared) = cached.algorithm {
            if declared != header.alg {
                return Err(AuthError::InvalidSignature);
            }
        }

        let mut validation = Validation::new(header.alg);
        validation.leeway = self.leeway_seconds;
        validation.validate_nbf = true;
        validation.set_audience(&[&self.expected_audience]);
        validation.set_issuer(&[&self.expected_issuer]);

        let token_data = decode::<Map<String, Value>>(token, &cached.key, &validation)
            .map_err(|e| match e.kind() {
                jsonwebtoken::errors::ErrorKind::ExpiredSignature => AuthError::TokenExpired,
                // nbf violations share the temporal-validity kind
                jsonwebtoken::errors::ErrorKind::ImmatureSignature => AuthError::TokenExpired,
                jsonwebtoken::errors::ErrorKind::InvalidSignature => AuthError::InvalidSignature,
                jsonwebtoken::errors::ErrorKind::InvalidAlgorithm => AuthError::InvalidSignature,
                jsonwebtoken::errors::ErrorKind::InvalidIssuer => AuthError::InvalidIssuer,
                jsonwebtoken::errors::ErrorKind::InvalidAudience => AuthError::InvalidAudience,
                _ => AuthError::TokenMalformed,
            })?;

        let claims = token_data.claims;
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_i64)
            .and_then(|exp| DateTime::from_timestamp(exp, 0))
            .ok_or(AuthError::TokenMalformed)?;

        Ok(VerifiedToken { claims, expires_at })
    }
}
