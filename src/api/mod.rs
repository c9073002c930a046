// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use axum::{routing::get, Router};
use tower_http::{
    cors::CorsLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    trace::TraceLayer,
};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::auth::auth_gate;
use crate::state::AppState;

pub mod admin;
pub mod health;
pub mod users;

/// Build the service router.
///
/// The bearer auth gate covers the programmatic `/v1` API only. The
/// `/admin` subtree is the attachment point for the session-authenticated
/// interactive surface and deliberately sits outside the gate.
pub fn router(state: AppState) -> Router {
    let v1_routes = Router::new()
        .route("/users/me", get(users::get_current_user))
        .layer(axum::middleware::from_fn_with_state(
            state.clone(),
            auth_gate,
        ))
        .with_state(state.clone());

    let admin_routes = Router::new().route("/status", get(admin::status));

    Router::new()
        .nest("/v1", v1_routes)
        .nest("/admin", admin_routes)
        .route("/healthz", get(health::healthz))
        .merge(SwaggerUi::new("/docs").url("/api-doc/openapi.json", ApiDoc::openapi()))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(TraceLayer::new_for_http())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .layer(CorsLayer::permissive())
}

#[derive(OpenApi)]
#[openapi(
    paths(
        health::healthz,
        users::get_current_user,
        admin::status,
    ),
    components(schemas(health::HealthResponse, users::UserMeResponse, admin::AdminStatus)),
    tags(
        (name = "Health", description = "Liveness probes"),
        (name = "Users", description = "Authenticated identity"),
        (name = "Admin", description = "Session-authenticated interactive surface")
    )
)]
struct ApiDoc;
