// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Axum extractors for the authentication context.
//!
//! The auth gate middleware attaches an [`AuthContext`] to requests that
//! presented a valid bearer token. Handlers opt into requiring it:
//!
//! ```rust,ignore
//! async fn my_handler(Auth(ctx): Auth) -> impl IntoResponse {
//!     // ctx.user, ctx.role
//! }
//! ```
//!
//! Anonymous callers (no bearer header, or a malformed one) only become a
//! 401 when they reach a handler using [`Auth`]; handlers using
//! [`OptionalAuth`] serve them without a context.

use axum::{
    extract::FromRequestParts,
    http::{request::Parts, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;

use super::context::AuthContext;

/// Extractor that requires an authenticated caller.
pub struct Auth(pub AuthContext);

/// Rejection for anonymous callers reaching an auth-required handler.
#[derive(Debug)]
pub struct Unauthenticated;

impl IntoResponse for Unauthenticated {
    fn into_response(self) -> Response {
        (
            StatusCode::UNAUTHORIZED,
            Json(json!({"detail": "Authentication required"})),
        )
            .into_response()
    }
}

impl<S: Send + Sync> FromRequestParts<S> for Auth {
    type Rejection = Unauthenticated;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        parts
            .extensions
            .get::<AuthContext>()
            .cloned()
            .map(Auth)
            .ok_or(Unauthenticated)
    }
}

/// Extractor that serves anonymous callers with `None` instead of rejecting.
pub struct OptionalAuth(pub Option<AuthContext>);

impl<S: Send + Sync> FromRequestParts<S> for OptionalAuth {
    type Rejection = std::convert::Infallible;

    async fn from_request_parts(parts: &mut Parts, _state: &S) -> Result<Self, Self::Rejection> {
        Ok(OptionalAuth(parts.extensions.get::<AuthContext>().cloned()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::LocalUser;
    use axum::http::Request;
    use chrono::Utc;
    use serde_json::Map;
    use uuid::Uuid;

    fn sample_context() -> AuthContext {
        AuthContext {
            user: LocalUser {
                id: Uuid::new_v4(),
                username: "jdoe".to_string(),
                email: "jdoe@example.org".to_string(),
                given_name: String::new(),
                family_name: String::new(),
                is_active: true,
                is_staff: false,
                is_superuser: false,
                role_id: None,
                created_at: Utc::now(),
                updated_at: Utc::now(),
            },
            role: None,
            claims: Map::new(),
            expires_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn auth_rejects_without_context() {
        let mut parts = Request::builder()
            .uri("/test")
            .body(())
            .unwrap()
            .into_parts()
            .0;

        let result = Auth::from_request_parts(&mut parts, &()).await;
        assert!(matches!(result, Err(Unauthenticated)));
    }

    #[tokio::test]
    async fn auth_returns_attached_context() {
        let mut parts = Request::builder()
            .uri("/test")
            .body(())
            .unwrap()
            .into_parts()
            .0;
        let ctx = sample_context();
        parts.extensions.insert(ctx.clone());

        let Auth(extracted) = Auth::from_request_parts(&mut parts, &()).await.unwrap();
        assert_eq!(extracted.user.id, ctx.user.id);
    }

    #[tokio::test]
    async fn optional_auth_returns_none_for_anonymous() {
        let mut parts = Request::builder()
            .uri("/test")
            .body(())
            .unwrap()
            .into_parts()
            .0;

        let OptionalAuth(ctx) = OptionalAuth::from_request_parts(&mut parts, &())
            .await
            .unwrap();
        assert!(ctx.is_none());
    }
}
