// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Shared test fixtures for the auth pipeline.
//!
//! Runs a real JWKS endpoint on a loopback port so key-cache and validator
//! tests exercise the actual fetch path, and signs HS256 tokens with an
//! `oct` JWK so no RSA key material is needed in the tree.

use std::future::IntoFuture;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use axum::{extract::State, routing::get, Json, Router};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use jsonwebtoken::{encode, Algorithm, EncodingKey, Header};
use serde_json::{json, Value};

/// Shared HMAC secret for test tokens and the matching JWKS entries.
pub const TEST_SECRET: &[u8] = b"a-string-secret-at-least-256-bits-long";

/// JWKS document carrying `test-key-1`.
pub fn test_jwks_json() -> Value {
    json!({ "keys": [oct_jwk("test-key-1")] })
}

/// JWKS document carrying `test-key-1` and `test-key-2`.
pub fn rotated_jwks_json() -> Value {
    json!({ "keys": [oct_jwk("test-key-1"), oct_jwk("test-key-2")] })
}

fn oct_jwk(kid: &str) -> Value {
    json!({
        "kty": "oct",
        "kid": kid,
        "alg": "HS256",
        "k": URL_SAFE_NO_PAD.encode(TEST_SECRET),
    })
}

/// How the test JWKS endpoint answers successive requests.
pub enum JwksResponder {
    /// Same document on every request.
    Fixed(Value),
    /// `test-key-1` only on the first request, the rotated set afterwards.
    Rotating,
}

impl JwksResponder {
    pub fn fixed(document: Value) -> Self {
        JwksResponder::Fixed(document)
    }

    pub fn rotating() -> Self {
        JwksResponder::Rotating
    }

    fn respond(&self, hit: usize) -> Value {
        match self {
            JwksResponder::Fixed(document) => document.clone(),
            JwksResponder::Rotating => {
                if hit <= 1 {
                    test_jwks_json()
                } else {
                    rotated_jwks_json()
                }
            }
        }
    }
}

/// Handle to a running loopback JWKS endpoint.
pub struct TestJwksServer {
    pub url: String,
    pub hits: Arc<AtomicUsize>,
}

#[derive(Clone)]
struct ServerState {
    responder: Arc<JwksResponder>,
    hits: Arc<AtomicUsize>,
}

async fn serve_jwks(State(state): State<ServerState>) -> Json<Value> {
    let hit = state.hits.fetch_add(1, Ordering::SeqCst) + 1;
    Json(state.responder.respond(hit))
}

/// Bind a JWKS endpoint on an ephemeral loopback port.
pub async fn run_jwks_server(responder: JwksResponder) -> TestJwksServer {
    let hits = Arc::new(AtomicUsize::new(0));
    let state = ServerState {
        responder: Arc::new(responder),
        hits: Arc::clone(&hits),
    };
    let app = Router::new()
        .route("/jwks.json", get(serve_jwks))
        .with_state(state);

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind test JWKS listener");
    let addr = listener.local_addr().unwrap();
    tokio::spawn(axum::serve(listener, app).into_future());

    TestJwksServer {
        url: format!("http://{addr}/jwks.json"),
        hits,
    }
}

/// Sign an HS256 token with the shared test secret.
pub fn sign_token(kid: &str, claims: &Value) -> String {
    sign_token_with_alg(kid, claims, Algorithm::HS256)
}

/// Sign a token with an explicit algorithm (for allow-list tests).
pub fn sign_token_with_alg(kid: &str, claims: &Value, alg: Algorithm) -> String {
    let mut header = Header::new(alg);
    header.kid = Some(kid.to_string());
    encode(&header, claims, &EncodingKey::from_secret(TEST_SECRET))
        .expect("Failed to sign test token")
}

/// Claims builder with sane defaults for the configured test deployment.
pub fn base_claims(subject: &str, exp: i64) -> Value {
    json!({
        "sub": subject,
        "iss": "https://id.example.org",
        "aud": "casework-api",
        "exp": exp,
        "iat": exp - 3600,
        "preferred_username": "jdoe",
        "email": "jdoe@example.org",
        "given_name": "Jane",
        "family_name": "Doe",
    })
}
