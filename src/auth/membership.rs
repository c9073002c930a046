// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! Optional group-membership lookup against the identity provider.
//!
//! Used as the last group source when tokens carry no group claim. The
//! caller authenticates to the membership API with a delegated token found
//! in the verified claims. Failures here are recovered by the claims
//! extractor (degrade to an empty group set), never surfaced to the caller.

use std::time::Duration;

use serde::Deserialize;

/// Timeout for membership API calls.
const GROUP_LOOKUP_TIMEOUT: Duration = Duration::from_secs(5);

/// Group lookup failure. Recovered locally by the claims extractor.
#[derive(Debug, thiserror::Error)]
#[error("group membership lookup failed: {0}")]
pub struct GroupLookupError(pub String);

#[derive(Deserialize)]
struct GroupsResponse {
    groups: Vec<String>,
}

/// Client for the identity provider's membership API.
pub struct MembershipClient {
    lookup_url: String,
    client: reqwest::Client,
}

impl MembershipClient {
    pub fn new(lookup_url: impl Into<String>) -> Self {
        Self {
            lookup_url: lookup_url.into(),
            client: reqwest::Client::builder()
                .timeout(GROUP_LOOKUP_TIMEOUT)
                .build()
                .expect("Failed to create HTTP client"),
        }
    }

    /// Fetch the caller's group ids using their delegated token.
    pub async fn groups_for(&self, delegated_token: &str) -> Result<Vec<String>, GroupLookupError> {
        let response = self
            .client
            .get(&self.lookup_url)
            .bearer_auth(delegated_token)
            .send()
            .await
            .map_err(|e| GroupLookupError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(GroupLookupError(format!(
                "HTTP {} from membership endpoint",
                response.status()
            )));
        }

        let body: GroupsResponse = response
            .json()
            .await
            .map_err(|e| GroupLookupError(e.to_string()))?;

        Ok(body.groups)
    }
}
