// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::env;
use std::net::SocketAddr;
use std::sync::Arc;

use serde::Deserialize;
use tracing_subscriber::EnvFilter;

use casework_server::api::router;
use casework_server::config::Settings;
use casework_server::state::AppState;
use casework_server::store::{GroupRoleMapping, IdentityDatabase, RoleRecord};

/// Roles and mappings loaded into the database at startup when
/// `SEED_ROLE_MAPPINGS` points at a JSON file.
#[derive(Deserialize)]
struct SeedFile {
    roles: Vec<RoleRecord>,
    mappings: Vec<GroupRoleMapping>,
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,tower_http=debug"));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if env::var("LOG_FORMAT").as_deref() == Ok("json") {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn seed_role_mappings(db: &IdentityDatabase, path: &str) {
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) => {
            tracing::error!(path, error = %e, "Failed to read role-mapping seed file");
            return;
        }
    };
    let seed: SeedFile = match serde_json::from_str(&contents) {
        Ok(seed) => seed,
        Err(e) => {
            tracing::error!(path, error = %e, "Failed to parse role-mapping seed file");
            return;
        }
    };
    for role in &seed.roles {
        if let Err(e) = db.upsert_role(role) {
            tracing::error!(role = role.name.as_str(), error = %e, "Failed to seed role");
        }
    }
    for mapping in &seed.mappings {
        if let Err(e) = db.upsert_mapping(mapping) {
            tracing::error!(
                group = mapping.external_group_id.as_str(),
                error = %e,
                "Failed to seed group-role mapping"
            );
        }
    }
    tracing::info!(
        roles = seed.roles.len(),
        mappings = seed.mappings.len(),
        "Role mappings seeded"
    );
}

#[tokio::main]
async fn main() {
    init_tracing();

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Configuration error: {e}");
            std::process::exit(1);
        }
    };

    let db = Arc::new(
        IdentityDatabase::open(&settings.data_dir.join("identity.redb"))
            .expect("Failed to open identity database"),
    );

    if let Ok(path) = env::var("SEED_ROLE_MAPPINGS") {
        seed_role_mappings(&db, &path);
    }

    let host = settings.host.clone();
    let port = settings.port;
    let state = AppState::new(
        settings,
        Arc::clone(&db) as Arc<dyn casework_server::store::UserRepository>,
        db as Arc<dyn casework_server::store::RoleMappingRepository>,
    );

    // Eager warm-up; a failure degrades to lazy refresh on the first token.
    state.key_cache.warm().await;

    let app = router(state);

    let addr: SocketAddr = format!("{host}:{port}")
        .parse()
        .expect("Failed to parse bind address");
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .expect("Failed to bind server address");

    tracing::info!(%addr, "Casework server listening (docs at /docs)");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .expect("HTTP server failed");
}

async fn shutdown_signal() {
    tokio::signal::ctrl_c()
        .await
        .expect("Failed to install shutdown signal handler");
    tracing::info!("Shutdown signal received");
}
