// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Per-request authentication gate.
//!
//! Axum middleware orchestrating the pipeline: validate the bearer token
//! (through the key cache), extract claims, provision the local user,
//! resolve the effective role, and attach the [`AuthContext`] to the
//! request.
//!
//! ## State machine
//!
//! - No `Authorization` header, or one that is not a bearer credential:
//!   the request proceeds anonymously. Only handlers that require auth
//!   turn an anonymous caller into a 401.
//! - Bearer token present: the full pipeline runs; any validation failure
//!   short-circuits with a 401 and a generic body.
//!
//! ## Development bypass
//!
//! When enabled (see [`BypassSettings::resolve`](crate::config::BypassSettings::resolve);
//! it refuses to activate in production), requests whose path matches a
//! configured prefix skip the pipeline and receive a fixed development
//! identity. Interactive admin paths use session authentication and are
//! routed outside this gate entirely.

use axum::{
    extract::{Request, State},
    http::{header::AUTHORIZATION, HeaderMap},
    middleware::Next,
    response::{IntoResponse, Response},
};
use chrono::{Duration as ChronoDuration, Utc};
use serde_json::Map;
use uuid::Uuid;

use crate::state::AppState;
use crate::store::{LocalUser, RoleRecord};

use super::claims::extract_profile;
use super::context::AuthContext;
use super::error::AuthError;
use super::provisioning::provision;
use super::roles::{persist_resolved_role, resolve_role};

/// Authentication gate middleware. Apply to the programmatic API subtree.
pub async fn auth_gate(
    State(state): State<AppState>,
    mut request: Request,
    next: Next,
) -> Response {
    if state.settings.auth.bypass.matches(request.uri().path()) {
        tracing::debug!(path = request.uri().path(), "development bypass identity injected");
        request.extensions_mut().insert(development_context());
        return next.run(request).await;
    }

    // Absent or malformed header: anonymous, not rejected.
    let token = bearer_token(request.headers()).map(str::to_string);
    let Some(token) = token else {
        return next.run(request).await;
    };

    match authenticate(&state, &token).await {
        Ok(context) => {
            request.extensions_mut().insert(context);
            next.run(request).await
        }
        Err(error) => error.into_response(),
    }
}

/// Run the full authentication pipeline for a bearer token.
pub async fn authenticate(state: &AppState, token: &str) -> Result<AuthContext, AuthError> {
    let verified = state.validator.validate(token).await?;

    let profile = extract_profile(
        &verified.claims,
        &state.settings.auth.claim_rules,
        state.membership.as_deref(),
    )
    .await?;

    let user = provision(state.users.as_ref(), &profile)?;
    let role = resolve_role(state.role_mappings.as_ref(), &profile.groups)?;
    persist_resolved_role(state.users.as_ref(), &user, role.as_ref())?;

    tracing::debug!(
        user_id = %user.id,
        role = role.as_ref().map(|r| r.name.as_str()).unwrap_or("none"),
        "request authenticated"
    );

    Ok(AuthContext {
        user,
        role,
        claims: verified.claims,
        expires_at: verified.expires_at,
    })
}

/// Pull the bearer token out of the `Authorization` header.
///
/// Returns `None` for an absent header, a non-UTF-8 value, a non-bearer
/// scheme, or an empty credential; all of those mean "anonymous".
fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let token = headers
        .get(AUTHORIZATION)?
        .to_str()
        .ok()?
        .strip_prefix("Bearer ")?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token)
    }
}

/// The fixed identity injected on bypassed paths.
fn development_context() -> AuthContext {
    let now = Utc::now();
    AuthContext {
        user: LocalUser {
            id: Uuid::nil(),
            username: "dev".to_string(),
            email: "dev@localhost".to_string(),
            given_name: "Development".to_string(),
            family_name: "User".to_string(),
            is_active: true,
            is_staff: true,
            is_superuser: true,
            role_id: Some(0),
            created_at: now,
            updated_at: now,
        },
        role: Some(RoleRecord {
            id: 0,
            name: "administrator".to_string(),
            description: "Development bypass role".to_string(),
            level: 0,
        }),
        claims: Map::new(),
        expires_at: now + ChronoDuration::hours(12),
    }
}
