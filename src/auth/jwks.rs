// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! JWKS (JSON Web Key Set) fetching and caching.
//!
//! ## Cache Behavior
//!
//! - Keys are cached by `kid` with a configurable TTL (default 1 hour).
//! - On a `kid` miss, exactly one upstream refresh runs before the key is
//!   declared unknown; this tolerates provider key rotation without
//!   refetching on every request.
//! - Concurrent misses collapse into a single in-flight refresh: callers
//!   queue on the refresh gate, and a refresh that completed while a caller
//!   was waiting counts as that caller's forced refresh.
//! - `warm()` at startup logs a warning on failure and lets the process
//!   start; the cache degrades to a lazy refresh on the first real request.

use std::collections::HashMap;
use std::time::{Duration, Instant};

use jsonwebtoken::jwk::{AlgorithmParameters, Jwk, JwkSet, KeyAlgorithm};
use jsonwebtoken::{Algorithm, DecodingKey};
use tokio::sync::{Mutex, RwLock};

/// Default key cache TTL (1 hour).
pub const DEFAULT_KEY_CACHE_TTL: Duration = Duration::from_secs(3600);

/// Timeout for JWKS HTTP fetches.
const JWKS_FETCH_TIMEOUT: Duration = Duration::from_secs(10);

/// Key cache errors. Mapped onto the auth taxonomy by the token validator.
#[derive(Debug, thiserror::Error)]
pub enum KeyCacheError {
    /// The `kid` is absent from the key set even after a refresh.
    #[error("no key with kid {0} in the provider key set")]
    UnknownKey(String),

    /// The key set could not be fetched or parsed.
    #[error("key set retrieval failed: {0}")]
    Retrieval(String),
}

/// A verification key resolved from the provider's key set.
#[derive(Clone, Debug)]
pub struct CachedKey {
    pub key: DecodingKey,
    /// Algorithm declared on the JWK, when present.
    pub algorithm: Option<Algorithm>,
}

struct CacheEntry {
    keys_by_kid: HashMap<String, CachedKey>,
    fetched_at: Instant,
}

/// JWKS key cache with single-flight refresh.
///
/// The only shared mutable cross-request state in the auth pipeline. Owned
/// by the composition root and handed to the token validator.
pub struct KeyCache {
    jwks_uri: String,
    ttl: Duration,
    client: reqwest::Client,
    cache: RwLock<Option<CacheEntry>>,
    /// Serializes refreshes so concurrent misses trigger one upstream fetch.
    refresh_gate: Mutex<()>,
}

impl KeyCache {
    pub fn new(jwks_uri: impl Into<String>, ttl: Duration) -> Self {
        Self {
            jwks_uri: jwks_uri.into(),
            ttl,
            client: reqwest::Client::builder()
                .timeout(JWKS_FETCH_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
            cache: RwLock::new(None),
            refresh_gate: Mutex::new(()),
        }
    }

    /// Eagerly populate the cache at startup.
    ///
    /// A failure degrades to lazy refresh on the first request instead of
    /// blocking process start. Returns whether the fetch succeeded.
    pub async fn warm(&self) -> bool {
        match self.fetch_key_set().await {
            Ok(keys) => {
                let kid_count = keys.len();
                *self.cache.write().await = Some(CacheEntry {
                    keys_by_kid: keys,
                    fetched_at: Instant::now(),
                });
                tracing::info!(jwks_uri = %self.jwks_uri, kid_count, "JWKS cache warmed");
                true
            }
            Err(e) => {
                tracing::warn!(
                    jwks_uri = %self.jwks_uri,
                    error = %e,
                    "JWKS warm-up failed, will refresh on first token"
                );
                false
            }
        }
    }

    /// Resolve a verification key for the given key id.
    ///
    /// On a miss (cold cache, expired TTL, or unknown `kid`) exactly one
    /// upstream refresh runs before [`KeyCacheError::UnknownKey`] is
    /// returned.
    pub async fn get_key(&self, kid: &str) -> Result<CachedKey, KeyCacheError> {
        let started = Instant::now();

        if let Some(key) = self.lookup_fresh(kid).await {
            return Ok(key);
        }

        let _guard = self.refresh_gate.lock().await;

        // A refresh that finished while we queued on the gate is the one
        // forced refresh this miss is entitled to.
        {
            let cache = self.cache.read().await;
            if let Some(entry) = &*cache {
                if entry.fetched_at >= started {
                    return entry
                        .keys_by_kid
                        .get(kid)
                        .cloned()
                        .ok_or_else(|| KeyCacheError::UnknownKey(kid.to_string()));
                }
                if entry.fetched_at.elapsed() < self.ttl {
                    if let Some(key) = entry.keys_by_kid.get(kid) {
                        return Ok(key.clone());
                    }
                }
            }
        }

        let keys = self.fetch_key_set().await?;
        let result = keys.get(kid).cloned();
        *self.cache.write().await = Some(CacheEntry {
            keys_by_kid: keys,
            fetched_at: Instant::now(),
        });

        result.ok_or_else(|| KeyCacheError::UnknownKey(kid.to_string()))
    }

    /// Whether a fresh key set is currently cached.
    pub async fn is_cached(&self) -> bool {
        let cache = self.cache.read().await;
        match &*cache {
            Some(entry) => entry.fetched_at.elapsed() < self.ttl,
            None => false,
        }
    }

    async fn lookup_fresh(&self, kid: &str) -> Option<CachedKey> {
        let cache = self.cache.read().await;
        let entry = cache.as_ref()?;
        if entry.fetched_at.elapsed() >= self.ttl {
            return None;
        }
        entry.keys_by_kid.get(kid).cloned()
    }

    async fn fetch_key_set(&self) -> Result<HashMap<String, CachedKey>, KeyCacheError> {
        let response = self
            .client
            .get(&self.jwks_uri)
            .send()
            .await
            .map_err(|e| KeyCacheError::Retrieval(e.to_string()))?;

        if !response.status().is_success() {
            return Err(KeyCacheError::Retrieval(format!(
                "HTTP {} from JWKS endpoint",
                response.status()
            )));
        }

        let jwks: JwkSet = response
            .json()
            .await
            .map_err(|e| KeyCacheError::Retrieval(e.to_string()))?;

        Ok(build_key_map(&jwks))
    }
}

/// Index a key set by `kid`, skipping keys without one (they cannot be
/// matched to a token header) and keys the decoder rejects.
fn build_key_map(jwks: &JwkSet) -> HashMap<String, CachedKey> {
    let mut keys_by_kid = HashMap::new();
    for jwk in &jwks.keys {
        let Some(kid) = &jwk.common.key_id else {
            continue;
        };
        match DecodingKey::from_jwk(jwk) {
            Ok(key) => {
                keys_by_kid.insert(
                    kid.clone(),
                    CachedKey {
                        key,
                        algorithm: declared_algorithm(jwk),
                    },
                );
            }
            Err(e) => {
                tracing::debug!(kid = kid.as_str(), error = %e, "Skipping JWK (cannot create DecodingKey)");
            }
        }
    }
    keys_by_kid
}

/// Map the JWK's declared algorithm onto the validation algorithm set.
fn declared_algorithm(jwk: &Jwk) -> Option<Algorithm> {
    let alg = jwk.common.key_algorithm?;
    match alg {
        KeyAlgorithm::RS256 => Some(Algorithm::RS256),
        KeyAlgorithm::RS384 => Some(Algorithm::RS384),
        KeyAlgorithm::RS512 => Some(Algorithm::RS512),
        KeyAlgorithm::PS256 => Some(Algorithm::PS256),
        KeyAlgorithm::PS384 => Some(Algorithm::PS384),
        KeyAlgorithm::PS512 => Some(Algorithm::PS512),
        KeyAlgorithm::ES256 => Some(Algorithm::ES256),
        KeyAlgorithm::ES384 => Some(Algorithm::ES384),
        KeyAlgorithm::HS256 => Some(Algorithm::HS256),
        KeyAlgorithm::HS384 => Some(Algorithm::HS384),
        KeyAlgorithm::HS512 => Some(Algorithm::HS512),
        KeyAlgorithm::EdDSA => Some(Algorithm::EdDSA),
        _ => match &jwk.algorithm {
            AlgorithmParameters::RSA(_) => Some(Algorithm::RS256),
            AlgorithmParameters::EllipticCurve(_) => Some(Algorithm::ES256),
            _ => None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::auth::test_support::{run_jwks_server, test_jwks_json, JwksResponder};
    use std::sync::atomic::Ordering;
    use std::sync::Arc;

    #[tokio::test]
    async fn cache_initially_empty() {
        let cache = KeyCache::new("http://127.0.0.1:1/jwks.json", DEFAULT_KEY_CACHE_TTL);
        assert!(!cache.is_cached().await);
    }

    #[tokio::test]
    async fn warm_failure_does_not_block() {
        // Nothing listens on this port; warm must degrade, not fail.
        let cache = KeyCache::new("http://127.0.0.1:1/jwks.json", DEFAULT_KEY_CACHE_TTL);
        assert!(!cache.warm().await);
        assert!(!cache.is_cached().await);
    }

    #[tokio::test]
    async fn warm_populates_cache() {
        let server = run_jwks_server(JwksResponder::fixed(test_jwks_json())).await;
        let cache = KeyCache::new(server.url.clone(), DEFAULT_KEY_CACHE_TTL);

        assert!(cache.warm().await);
        assert!(cache.is_cached().await);
        assert!(cache.get_key("test-key-1").await.is_ok());
        // warm + no further refresh
        assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn unknown_kid_triggers_exactly_one_refresh() {
        let server = run_jwks_server(JwksResponder::fixed(test_jwks_json())).await;
        let cache = KeyCache::new(server.url.clone(), DEFAULT_KEY_CACHE_TTL);
        cache.warm().await;
        let after_warm = server.hits.load(Ordering::SeqCst);

        let err = cache.get_key("rotated-away").await.unwrap_err();
        assert!(matches!(err, KeyCacheError::UnknownKey(_)));
        assert_eq!(server.hits.load(Ordering::SeqCst), after_warm + 1);
    }

    #[tokio::test]
    async fn key_rotation_is_picked_up_on_miss() {
        // First response carries only key 1; subsequent responses add key 2.
        let server = run_jwks_server(JwksResponder::rotating()).await;
        let cache = KeyCache::new(server.url.clone(), DEFAULT_KEY_CACHE_TTL);
        cache.warm().await;

        assert!(cache.get_key("test-key-1").await.is_ok());
        // Unknown on the cached set, present after the forced refresh.
        assert!(cache.get_key("test-key-2").await.is_ok());
        assert_eq!(server.hits.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn concurrent_misses_collapse_into_one_fetch() {
        let server = run_jwks_server(JwksResponder::fixed(test_jwks_json())).await;
        let cache = Arc::new(KeyCache::new(server.url.clone(), DEFAULT_KEY_CACHE_TTL));

        let tasks: Vec<_> = (0..8)
            .map(|_| {
                let cache = Arc::clone(&cache);
                tokio::spawn(async move { cache.get_key("test-key-1").await })
            })
            .collect();
        for task in tasks {
            assert!(task.await.unwrap().is_ok());
        }
        assert_eq!(server.hits.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn fetch_failure_is_a_retrieval_error() {
        let cache = KeyCache::new("http://127.0.0.1:1/jwks.json", DEFAULT_KEY_CACHE_TTL);
        let err = cache.get_key("any").await.unwrap_err();
        assert!(matches!(err, KeyCacheError::Retrieval(_)));
    }

    #[test]
    fn key_map_skips_keys_without_kid() {
        let jwks: JwkSet = serde_json::from_str(
            r#"{"keys": [{"kty": "oct", "alg": "HS256", "k": "c2VjcmV0LXNlY3JldC1zZWNyZXQtc2VjcmV0"}]}"#,
        )
        .unwrap();
        assert!(build_key_map(&jwks).is_empty());
    }
}
