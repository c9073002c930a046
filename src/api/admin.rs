// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Interactive admin surface.
//!
//! These paths authenticate with the deployment's session protocol, not
//! bearer tokens, and are mounted outside the auth gate. Only the
//! attachment point lives here; the session layer itself ships with the
//! interactive frontend deployment.

use axum::Json;
use serde::Serialize;
use utoipa::ToSchema;

/// Response for GET /admin/status
#[derive(Debug, Serialize, ToSchema)]
pub struct AdminStatus {
    /// Service name
    pub service: &'static str,
    /// Authentication protocol for this subtree
    pub auth: &'static str,
}

/// Status of the interactive admin surface.
#[utoipa::path(
    get,
    path = "/admin/status",
    tag = "Admin",
    responses(
        (status = 200, description = "Admin surface status", body = AdminStatus),
    )
)]
pub async fn status() -> Json<AdminStatus> {
    Json(AdminStatus {
        service: "casework-server",
        auth: "session",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn status_names_the_session_protocol() {
        let response = status().await;
        assert_eq!(response.0.auth, "session");
    }
}
