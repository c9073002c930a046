// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Authentication errors.
//!
//! Authentication failures map to a generic 401 body that never echoes
//! internal error text; the specific kind and cause are logged server-side.
//! Provisioning failures are system faults and map to 500, since retry and
//! not client correction is the remedy.

use axum::{
    http::{header::WWW_AUTHENTICATE, HeaderValue, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;

use crate::store::StoreError;

/// Authentication error type.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// Token has expired (or is not yet valid) beyond the configured leeway.
    #[error("token has expired")]
    TokenExpired,
    /// Token signature is invalid, the signing key is unknown, or the
    /// algorithm is not on the allow-list.
    #[error("token signature is invalid")]
    InvalidSignature,
    /// Token audience does not match the configured audience.
    #[error("token audience is invalid")]
    InvalidAudience,
    /// Token issuer does not match the configured issuer.
    #[error("token issuer is invalid")]
    InvalidIssuer,
    /// Token is not a well-formed JWT.
    #[error("token is malformed")]
    TokenMalformed,
    /// A claim the pipeline cannot proceed without is absent.
    #[error("missing required claim: {0}")]
    MissingRequiredClaim(String),
    /// The signing-key set could not be retrieved from the provider.
    #[error("failed to retrieve signing keys: {0}")]
    KeyRetrieval(String),
    /// User provisioning or role persistence failed. System fault.
    #[error("provisioning failed: {0}")]
    Provisioning(String),
}

#[derive(Serialize)]
struct AuthErrorBody {
    detail: String,
}

impl AuthError {
    /// Stable code for server-side logs.
    pub fn error_code(&self) -> &'static str {
        match self {
            AuthError::TokenExpired => "token_expired",
            AuthError::InvalidSignature => "invalid_signature",
            AuthError::InvalidAudience => "invalid_audience",
            AuthError::InvalidIssuer => "invalid_issuer",
            AuthError::TokenMalformed => "token_malformed",
            AuthError::MissingRequiredClaim(_) => "missing_required_claim",
            AuthError::KeyRetrieval(_) => "key_retrieval_error",
            AuthError::Provisioning(_) => "provisioning_error",
        }
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            AuthError::TokenExpired
            | AuthError::InvalidSignature
            | AuthError::InvalidAudience
            | AuthError::InvalidIssuer
            | AuthError::TokenMalformed
            | AuthError::MissingRequiredClaim(_)
            | AuthError::KeyRetrieval(_) => StatusCode::UNAUTHORIZED,
            AuthError::Provisioning(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl From<StoreError> for AuthError {
    fn from(e: StoreError) -> Self {
        AuthError::Provisioning(e.to_string())
    }
}

impl IntoResponse for AuthError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        match status {
            StatusCode::INTERNAL_SERVER_ERROR => {
                tracing::error!(error_code = self.error_code(), error = %self, "authentication pipeline fault");
            }
            _ => {
                tracing::warn!(error_code = self.error_code(), error = %self, "authentication failed");
            }
        }

        // The client body stays generic; details live in the logs above.
        let detail = if status == StatusCode::UNAUTHORIZED {
            "Invalid authentication credentials"
        } else {
            "Internal server error"
        };
        let mut response = (
            status,
            Json(AuthErrorBody {
                detail: detail.to_string(),
            }),
        )
            .into_response();

        // Challenge hint so well-behaved clients refresh expired tokens silently.
        if matches!(self, AuthError::TokenExpired) {
            response.headers_mut().insert(
                WWW_AUTHENTICATE,
                HeaderValue::from_static(
                    r#"Bearer error="invalid_token", error_description="The access token expired""#,
                ),
            );
        }

        response
    }
}
