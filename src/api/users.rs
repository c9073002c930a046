// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! User endpoints.

use axum::Json;
use chrono::{DateTime, Utc};
use serde::Serialize;
use utoipa::ToSchema;
use uuid::Uuid;

use crate::auth::{Auth, AuthContext};

/// Response for GET /v1/users/me
#[derive(Debug, Serialize, ToSchema)]
pub struct UserMeResponse {
    /// Local user id
    pub user_id: Uuid,
    /// Principal name
    pub username: String,
    /// Email address
    pub email: String,
    /// Effective role name, if any role-granting group matched
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    /// Effective role level (lower = higher authority)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role_level: Option<i64>,
    /// Token expiry instant
    pub token_expires_at: DateTime<Utc>,
}

impl From<AuthContext> for UserMeResponse {
    fn from(ctx: AuthContext) -> Self {
        Self {
            user_id: ctx.user.id,
            username: ctx.user.username,
            email: ctx.user.email,
            role: ctx.role.as_ref().map(|role| role.name.clone()),
            role_level: ctx.role.as_ref().map(|role| role.level),
            token_expires_at: ctx.expires_at,
        }
    }
}

/// Get the current authenticated user's identity and effective role.
#[utoipa::path(
    get,
    path = "/v1/users/me",
    tag = "Users",
    security(("bearer" = [])),
    responses(
        (status = 200, description = "Resolved identity", body = UserMeResponse),
        (status = 401, description = "Unauthorized - invalid or missing token"),
    )
)]
pub async fn get_current_user(Auth(ctx): Auth) -> Json<UserMeResponse> {
    Json(ctx.into())
}
