// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Claims extraction.
//!
//! Derives a stable subject id, a principal name/email, and a group set
//! from verified claims. Claim names vary per identity provider, so every
//! lookup runs over an ordered, configurable rule list (first match wins);
//! pointing this service at a different provider is a configuration change,
//! not a code change.
//!
//! The subject id is the only field ever used as the provisioning key:
//! principal names and emails can change for the same person over time, the
//! subject id cannot.

use serde_json::{Map, Value};

use super::error::AuthError;
use super::membership::MembershipClient;
use crate::store::UserProfile;

/// Ordered claim-extraction rules.
#[derive(Debug, Clone)]
pub struct ClaimRules {
    /// Claim carrying the immutable subject id.
    pub subject: String,
    /// Principal-name claims, tried in order before falling back to email.
    pub principal: Vec<String>,
    /// Email claim (also the final principal-name fallback).
    pub email: String,
    /// Given-name claim.
    pub given_name: String,
    /// Family-name claim.
    pub family_name: String,
    /// Group-list claims, tried in order; first non-empty wins.
    pub groups: Vec<String>,
    /// Claim carrying a delegated token for the membership API lookup.
    pub delegated_token: Option<String>,
}

impl Default for ClaimRules {
    fn default() -> Self {
        Self {
            subject: "sub".to_string(),
            principal: vec!["preferred_username".to_string(), "upn".to_string()],
            email: "email".to_string(),
            given_name: "given_name".to_string(),
            family_name: "family_name".to_string(),
            groups: vec!["groups".to_string(), "roles".to_string()],
            delegated_token: None,
        }
    }
}

/// Identity attributes extracted from a verified claim set.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClaimsProfile {
    /// Immutable subject id; the provisioning key.
    pub subject_id: String,
    /// Principal name used as the local username.
    pub username: String,
    pub email: String,
    pub given_name: String,
    pub family_name: String,
    /// External group ids. Empty means "authenticated, unauthorized for
    /// role-gated actions" and is not an error.
    pub groups: Vec<String>,
}

impl ClaimsProfile {
    /// Profile attributes as applied to the local user record.
    pub fn user_profile(&self) -> UserProfile {
        UserProfile {
            username: self.username.clone(),
            email: self.email.clone(),
            given_name: self.given_name.clone(),
            family_name: self.family_name.clone(),
        }
    }
}

/// Extract the identity profile from a verified claim set.
///
/// `membership` is the optional secondary group source, consulted only when
/// no group claim matched and the claims carry a delegated token.
pub async fn extract_profile(
    claims: &Map<String, Value>,
    rules: &ClaimRules,
    membership: Option<&MembershipClient>,
) -> Result<ClaimsProfile, AuthError> {
    let subject_id = string_claim(claims, &rules.subject)
        .ok_or_else(|| AuthError::MissingRequiredClaim(rules.subject.clone()))?
        .to_string();

    let username = rules
        .principal
        .iter()
        .chain(std::iter::once(&rules.email))
        .find_map(|name| string_claim(claims, name))
        .ok_or_else(|| AuthError::MissingRequiredClaim("principal name".to_string()))?
        .to_string();

    let email = string_claim(claims, &rules.email).unwrap_or_default().to_string();
    let given_name = string_claim(claims, &rules.given_name)
        .unwrap_or_default()
        .to_string();
    let family_name = string_claim(claims, &rules.family_name)
        .unwrap_or_default()
        .to_string();

    let groups = resolve_groups(claims, rules, membership).await;

    Ok(ClaimsProfile {
        subject_id,
        username,
        email,
        given_name,
        family_name,
        groups,
    })
}

/// Resolve the caller's group set. First non-empty source wins:
/// configured group claims in order, then the membership API when enabled,
/// then the empty set.
async fn resolve_groups(
    claims: &Map<String, Value>,
    rules: &ClaimRules,
    membership: Option<&MembershipClient>,
) -> Vec<String> {
    for name in &rules.groups {
        if let Some(groups) = list_claim(claims, name) {
            return groups;
        }
    }

    if let (Some(client), Some(token_claim)) = (membership, &rules.delegated_token) {
        if let Some(delegated_token) = string_claim(claims, token_claim) {
            match client.groups_for(delegated_token).await {
                Ok(groups) => return groups,
                Err(e) => {
                    // Recovered here: the caller stays authenticated with no
                    // role-granting groups.
                    tracing::warn!(error = %e, "group lookup failed, continuing with empty group set");
                }
            }
        }
    }

    Vec::new()
}

fn string_claim<'a>(claims: &'a Map<String, Value>, name: &str) -> Option<&'a str> {
    claims
        .get(name)
        .and_then(Value::as_str)
        .filter(|s| !s.is_empty())
}

fn list_claim(claims: &Map<String, Value>, name: &str) -> Option<Vec<String>> {
    let items = claims.get(name)?.as_array()?;
    let groups: Vec<String> = items
        .iter()
        .filter_map(Value::as_str)
        .map(str::to_string)
        .collect();
    if groups.is_empty() {
        None
    } else {
        Some(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::{routing::get, Json, Router};
    use serde_json::json;
    use std::future::IntoFuture;

    fn claims(value: Value) -> Map<String, Value> {
        value.as_object().unwrap().clone()
    }

    #[tokio::test]
    async fn extracts_full_profile() {
        let claims = claims(json!({
            "sub": "subj-1",
            "preferred_username": "jdoe",
            "email": "jdoe@example.org",
            "given_name": "Jane",
            "family_name": "Doe",
            "groups": ["grp-a", "grp-b"],
        }));

        let profile = extract_profile(&claims, &ClaimRules::default(), None)
            .await
            .unwrap();
        assert_eq!(profile.subject_id, "subj-1");
        assert_eq!(profile.username, "jdoe");
        assert_eq!(profile.email, "jdoe@example.org");
        assert_eq!(profile.groups, vec!["grp-a", "grp-b"]);
    }

    #[tokio::test]
    async fn missing_subject_is_an_error() {
        let claims = claims(json!({"preferred_username": "jdoe"}));
        let err = extract_profile(&claims, &ClaimRules::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingRequiredClaim(ref c) if c == "sub"));
    }

    #[tokio::test]
    async fn principal_falls_back_in_order() {
        // No preferred_username: upn wins
        let upn = claims(json!({"sub": "s", "upn": "jdoe@corp", "email": "j@example.org"}));
        let profile = extract_profile(&upn, &ClaimRules::default(), None)
            .await
            .unwrap();
        assert_eq!(profile.username, "jdoe@corp");

        // Neither principal claim: email wins
        let email_only = claims(json!({"sub": "s", "email": "j@example.org"}));
        let profile = extract_profile(&email_only, &ClaimRules::default(), None)
            .await
            .unwrap();
        assert_eq!(profile.username, "j@example.org");
    }

    #[tokio::test]
    async fn no_principal_source_is_an_error() {
        let claims = claims(json!({"sub": "s"}));
        let err = extract_profile(&claims, &ClaimRules::default(), None)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::MissingRequiredClaim(_)));
    }

    #[tokio::test]
    async fn alternate_group_claim_is_used_when_primary_absent() {
        let claims = claims(json!({
            "sub": "s",
            "email": "j@example.org",
            "roles": ["grp-x"],
        }));
        let profile = extract_profile(&claims, &ClaimRules::default(), None)
            .await
            .unwrap();
        assert_eq!(profile.groups, vec!["grp-x"]);
    }

    #[tokio::test]
    async fn empty_group_list_falls_through() {
        let claims = claims(json!({
            "sub": "s",
            "email": "j@example.org",
            "groups": [],
            "roles": ["grp-y"],
        }));
        let profile = extract_profile(&claims, &ClaimRules::default(), None)
            .await
            .unwrap();
        assert_eq!(profile.groups, vec!["grp-y"]);
    }

    #[tokio::test]
    async fn no_group_source_yields_empty_set() {
        let claims = claims(json!({"sub": "s", "email": "j@example.org"}));
        let profile = extract_profile(&claims, &ClaimRules::default(), None)
            .await
            .unwrap();
        assert!(profile.groups.is_empty());
    }

    #[tokio::test]
    async fn membership_lookup_is_the_last_source() {
        let app = Router::new().route(
            "/memberships",
            get(|| async { Json(json!({"groups": ["grp-remote"]})) }),
        );
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(axum::serve(listener, app).into_future());

        let client = MembershipClient::new(format!("http://{addr}/memberships"));
        let rules = ClaimRules {
            delegated_token: Some("mapi_token".to_string()),
            ..ClaimRules::default()
        };
        let claims = claims(json!({
            "sub": "s",
            "email": "j@example.org",
            "mapi_token": "delegated",
        }));

        let profile = extract_profile(&claims, &rules, Some(&client)).await.unwrap();
        assert_eq!(profile.groups, vec!["grp-remote"]);
    }

    #[tokio::test]
    async fn failed_membership_lookup_degrades_to_empty() {
        let client = MembershipClient::new("http://127.0.0.1:1/memberships");
        let rules = ClaimRules {
            delegated_token: Some("mapi_token".to_string()),
            ..ClaimRules::default()
        };
        let claims = claims(json!({
            "sub": "s",
            "email": "j@example.org",
            "mapi_token": "delegated",
        }));

        let profile = extract_profile(&claims, &rules, Some(&client)).await.unwrap();
        assert!(profile.groups.is_empty());
    }
}
