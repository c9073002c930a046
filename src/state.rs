// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

use std::sync::Arc;

use crate::auth::jwks::KeyCache;
use crate::auth::membership::MembershipClient;
use crate::auth::validator::TokenValidator;
use crate::config::Settings;
use crate::store::{RoleMappingRepository, UserRepository};

/// Shared application state.
///
/// The composition root constructs one of these; the key cache inside is
/// the only mutable state shared across requests.
#[derive(Clone)]
pub struct AppState {
    pub settings: Arc<Settings>,
    pub key_cache: Arc<KeyCache>,
    pub validator: Arc<TokenValidator>,
    pub users: Arc<dyn UserRepository>,
    pub role_mappings: Arc<dyn RoleMappingRepository>,
    pub membership: Option<Arc<MembershipClient>>,
}

impl AppState {
    pub fn new(
        settings: Settings,
        users: Arc<dyn UserRepository>,
        role_mappings: Arc<dyn RoleMappingRepository>,
    ) -> Self {
        let key_cache = Arc::new(KeyCache::new(
            settings.auth.jwks_uri.clone(),
            settings.auth.key_cache_ttl,
        ));
        let validator = Arc::new(TokenValidator::new(
            Arc::clone(&key_cache),
            settings.auth.expected_audience.clone(),
            settings.auth.expected_issuer.clone(),
            settings.auth.signing_algorithms.clone(),
            settings.auth.clock_skew_leeway_seconds,
        ));
        let membership = settings
            .auth
            .group_lookup_url
            .as_ref()
            .map(|url| Arc::new(MembershipClient::new(url.clone())));

        Self {
            settings: Arc::new(settings),
            key_cache,
            validator,
            users,
            role_mappings,
            membership,
        }
    }
}
