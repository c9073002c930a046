// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Configuration is loaded from the environment once at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HOST` | Server bind address | `0.0.0.0` |
//! | `PORT` | Server bind port | `8080` |
//! | `DATA_DIR` | Root directory for the identity database | `/data` |
//! | `APP_ENV` | Deployment environment marker | `production` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,tower_http=debug` |
//! | `JWKS_URI` | Identity provider JWKS endpoint | Required |
//! | `EXPECTED_AUDIENCE` | Expected token `aud` claim | Required |
//! | `EXPECTED_ISSUER` | Expected token `iss` claim | Required |
//! | `SIGNING_ALGORITHMS` | Comma-separated algorithm allow-list | `RS256` |
//! | `CLOCK_SKEW_LEEWAY_SECONDS` | Leeway for `exp`/`nbf` checks | `300` |
//! | `KEY_CACHE_TTL_SECONDS` | JWKS cache TTL | `3600` |
//! | `BYPASS_MODE` | Development bypass (refused when `APP_ENV=production`) | `false` |
//! | `BYPASS_PATH_PREFIXES` | Comma-separated path prefixes the bypass covers | empty |
//! | `SUBJECT_CLAIM` | Claim carrying the subject id | `sub` |
//! | `PRINCIPAL_CLAIMS` | Comma-separated principal-name claims, in order | `preferred_username,upn` |
//! | `EMAIL_CLAIM` | Email claim (final principal fallback) | `email` |
//! | `GROUP_CLAIMS` | Comma-separated group-list claims, in order | `groups,roles` |
//! | `GROUP_LOOKUP_URL` | Membership API endpoint (enables the lookup) | unset |
//! | `DELEGATED_TOKEN_CLAIM` | Claim carrying the membership API token | unset |
//! | `SEED_ROLE_MAPPINGS` | JSON file of roles/mappings loaded at startup | unset |

use std::env;
use std::path::PathBuf;
use std::time::Duration;

use jsonwebtoken::Algorithm;

use crate::auth::claims::ClaimRules;
use crate::auth::validator::DEFAULT_CLOCK_SKEW_LEEWAY;

/// Configuration error type.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("missing required environment variable: {0}")]
    Missing(&'static str),

    #[error("invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

/// Full service settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: String,
    pub port: u16,
    pub data_dir: PathBuf,
    pub auth: AuthSettings,
}

/// Settings for the authentication subsystem.
#[derive(Debug, Clone)]
pub struct AuthSettings {
    /// JWKS endpoint of the identity provider.
    pub jwks_uri: String,
    /// Expected token audience; compared for exact equality.
    pub expected_audience: String,
    /// Expected token issuer; compared for exact equality.
    pub expected_issuer: String,
    /// Explicit algorithm allow-list.
    pub signing_algorithms: Vec<Algorithm>,
    /// Leeway applied to `exp`/`nbf` checks, in seconds.
    pub clock_skew_leeway_seconds: u64,
    /// JWKS cache TTL.
    pub key_cache_ttl: Duration,
    /// Claim-extraction rules.
    pub claim_rules: ClaimRules,
    /// Membership API endpoint; enables the secondary group lookup.
    pub group_lookup_url: Option<String>,
    /// Development bypass policy.
    pub bypass: BypassSettings,
}

/// Development bypass policy.
///
/// Disabled by default and fail-closed: `resolve` refuses to enable the
/// bypass when the deployment carries the production marker, regardless of
/// what `BYPASS_MODE` says.
#[derive(Debug, Clone, Default)]
pub struct BypassSettings {
    pub enabled: bool,
    pub path_prefixes: Vec<String>,
}

impl BypassSettings {
    pub fn resolve(requested: bool, app_env: &str, path_prefixes: Vec<String>) -> Self {
        if requested && app_env.eq_ignore_ascii_case("production") {
            tracing::warn!("BYPASS_MODE requested in a production environment, refusing to enable");
            return Self {
                enabled: false,
                path_prefixes,
            };
        }
        if requested {
            tracing::warn!(
                prefixes = ?path_prefixes,
                "development bypass enabled, token verification is skipped on matching paths"
            );
        }
        Self {
            enabled: requested,
            path_prefixes,
        }
    }

    /// Whether the bypass covers this request path.
    pub fn matches(&self, path: &str) -> bool {
        self.enabled
            && self
                .path_prefixes
                .iter()
                .any(|prefix| path.starts_with(prefix.as_str()))
    }
}

impl Settings {
    /// Load settings from the environment.
    pub fn from_env() -> Result<Self, ConfigError> {
        let host = env_or("HOST", "0.0.0.0");
        let port = parse_var("PORT", "8080", |s| s.parse::<u16>().map_err(|e| e.to_string()))?;
        let data_dir = PathBuf::from(env_or("DATA_DIR", "/data"));
        let app_env = env_or("APP_ENV", "production");

        let jwks_uri = require("JWKS_URI")?;
        url::Url::parse(&jwks_uri).map_err(|e| ConfigError::Invalid {
            name: "JWKS_URI",
            reason: e.to_string(),
        })?;

        let auth = AuthSettings {
            jwks_uri,
            expected_audience: require("EXPECTED_AUDIENCE")?,
            expected_issuer: require("EXPECTED_ISSUER")?,
            signing_algorithms: parse_algorithms(&env_or("SIGNING_ALGORITHMS", "RS256"))?,
            clock_skew_leeway_seconds: parse_var(
                "CLOCK_SKEW_LEEWAY_SECONDS",
                &DEFAULT_CLOCK_SKEW_LEEWAY.to_string(),
                |s| s.parse::<u64>().map_err(|e| e.to_string()),
            )?,
            key_cache_ttl: Duration::from_secs(parse_var("KEY_CACHE_TTL_SECONDS", "3600", |s| {
                s.parse::<u64>().map_err(|e| e.to_string())
            })?),
            claim_rules: claim_rules_from_env(),
            group_lookup_url: env::var("GROUP_LOOKUP_URL").ok().filter(|s| !s.is_empty()),
            bypass: BypassSettings::resolve(
                parse_var("BYPASS_MODE", "false", |s| {
                    s.parse::<bool>().map_err(|e| e.to_string())
                })?,
                &app_env,
                comma_list(&env_or("BYPASS_PATH_PREFIXES", "")),
            ),
        };

        Ok(Self {
            host,
            port,
            data_dir,
            auth,
        })
    }
}

fn claim_rules_from_env() -> ClaimRules {
    let defaults = ClaimRules::default();
    ClaimRules {
        subject: env_or("SUBJECT_CLAIM", &defaults.subject),
        principal: env::var("PRINCIPAL_CLAIMS")
            .ok()
            .map(|s| comma_list(&s))
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.principal),
        email: env_or("EMAIL_CLAIM", &defaults.email),
        given_name: defaults.given_name,
        family_name: defaults.family_name,
        groups: env::var("GROUP_CLAIMS")
            .ok()
            .map(|s| comma_list(&s))
            .filter(|v| !v.is_empty())
            .unwrap_or(defaults.groups),
        delegated_token: env::var("DELEGATED_TOKEN_CLAIM")
            .ok()
            .filter(|s| !s.is_empty()),
    }
}

/// Parse a comma-separated algorithm allow-list.
///
/// Unknown names are rejected outright, which is also what keeps `none`
/// impossible to configure.
pub fn parse_algorithms(value: &str) -> Result<Vec<Algorithm>, ConfigError> {
    let mut algorithms = Vec::new();
    for name in comma_list(value) {
        let algorithm = name.parse::<Algorithm>().map_err(|_| ConfigError::Invalid {
            name: "SIGNING_ALGORITHMS",
            reason: format!("unknown algorithm: {name}"),
        })?;
        algorithms.push(algorithm);
    }
    if algorithms.is_empty() {
        return Err(ConfigError::Invalid {
            name: "SIGNING_ALGORITHMS",
            reason: "allow-list must not be empty".to_string(),
        });
    }
    Ok(algorithms)
}

fn comma_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

fn env_or(name: &str, default: &str) -> String {
    env::var(name).unwrap_or_else(|_| default.to_string())
}

fn require(name: &'static str) -> Result<String, ConfigError> {
    env::var(name).map_err(|_| ConfigError::Missing(name))
}

fn parse_var<T>(
    name: &'static str,
    default: &str,
    parse: impl Fn(&str) -> Result<T, String>,
) -> Result<T, ConfigError> {
    let raw = env_or(name, default);
    parse(&raw).map_err(|reason| ConfigError::Invalid { name, reason })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_algorithm_lists() {
        assert_eq!(parse_algorithms("RS256").unwrap(), vec![Algorithm::RS256]);
        assert_eq!(
            parse_algorithms("RS256, ES256").unwrap(),
            vec![Algorithm::RS256, Algorithm::ES256]
        );
    }

    #[test]
    fn rejects_unknown_and_empty_algorithms() {
        assert!(parse_algorithms("none").is_err());
        assert!(parse_algorithms("RS256,none").is_err());
        assert!(parse_algorithms("").is_err());
    }

    #[test]
    fn bypass_refuses_production() {
        let bypass = BypassSettings::resolve(true, "production", vec!["/v1/".to_string()]);
        assert!(!bypass.enabled);
        assert!(!bypass.matches("/v1/users/me"));
    }

    #[test]
    fn bypass_enables_outside_production() {
        let bypass = BypassSettings::resolve(true, "development", vec!["/v1/".to_string()]);
        assert!(bypass.enabled);
        assert!(bypass.matches("/v1/users/me"));
        assert!(!bypass.matches("/admin/status"));
    }

    #[test]
    fn bypass_is_off_by_default() {
        let bypass = BypassSettings::default();
        assert!(!bypass.matches("/v1/users/me"));
    }

    #[test]
    fn comma_lists_trim_and_drop_empties() {
        assert_eq!(
            comma_list(" /v1/ , /internal/ ,"),
            vec!["/v1/".to_string(), "/internal/".to_string()]
        );
        assert!(comma_list("").is_empty());
    }
}
