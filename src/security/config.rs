//! Guard configuration built once at startup and passed into every check.

use crate::security::rate_limit::RateLimitQuota;
use anyhow::{Context, Result, anyhow};
use std::time::Duration;
use url::Url;

const DEFAULT_CSRF_COOKIE_NAME: &str = "tapgate_csrf";
const DEFAULT_CSRF_HEADER_NAME: &str = "x-csrf-token";
const DEFAULT_LOGIN_LIMIT: u64 = 10;
const DEFAULT_LOGIN_WINDOW_SECONDS: u64 = 60;
const DEFAULT_REGISTER_LIMIT: u64 = 10;
const DEFAULT_REGISTER_WINDOW_SECONDS: u64 = 300;

#[derive(Clone, Debug)]
pub struct GuardConfig {
    app_origins: Vec<String>,
    production: bool,
    csrf_cookie_name: String,
    csrf_header_name: String,
    login_quota: RateLimitQuota,
    register_quota: RateLimitQuota,
}

impl GuardConfig {
    /// Create a new guard configuration.
    ///
    /// Origins are normalized to `scheme://host[:port]` and deduplicated. An
    /// empty list is allowed here; the origin guard fails closed on it in
    /// production at request time, so a misconfigured deployment is loud
    /// instead of silently permissive.
    ///
    /// # Errors
    /// Returns error if any configured origin cannot be parsed.
    pub fn new(app_origins: Vec<String>, production: bool) -> Result<Self> {
        let app_origins = normalize_origins(app_origins)?;
        Ok(Self {
            app_origins,
            production,
            csrf_cookie_name: DEFAULT_CSRF_COOKIE_NAME.to_string(),
            csrf_header_name: DEFAULT_CSRF_HEADER_NAME.to_string(),
            login_quota: RateLimitQuota::new(
                "passkey-login",
                DEFAULT_LOGIN_LIMIT,
                Duration::from_secs(DEFAULT_LOGIN_WINDOW_SECONDS),
            ),
            register_quota: RateLimitQuota::new(
                "passkey-register",
                DEFAULT_REGISTER_LIMIT,
                Duration::from_secs(DEFAULT_REGISTER_WINDOW_SECONDS),
            ),
        })
    }

    #[must_use]
    pub fn with_csrf_cookie_name(mut self, name: String) -> Self {
        self.csrf_cookie_name = name;
        self
    }

    #[must_use]
    pub fn with_csrf_header_name(mut self, name: String) -> Self {
        self.csrf_header_name = name.to_lowercase();
        self
    }

    #[must_use]
    pub fn with_login_quota(mut self, quota: RateLimitQuota) -> Self {
        self.login_quota = quota;
        self
    }

    #[must_use]
    pub fn with_register_quota(mut self, quota: RateLimitQuota) -> Self {
        self.register_quota = quota;
        self
    }

    #[must_use]
    pub fn app_origins(&self) -> &[String] {
        &self.app_origins
    }

    #[must_use]
    pub fn production(&self) -> bool {
        self.production
    }

    #[must_use]
    pub fn csrf_cookie_name(&self) -> &str {
        &self.csrf_cookie_name
    }

    #[must_use]
    pub fn csrf_header_name(&self) -> &str {
        &self.csrf_header_name
    }

    #[must_use]
    pub fn login_quota(&self) -> &RateLimitQuota {
        &self.login_quota
    }

    #[must_use]
    pub fn register_quota(&self) -> &RateLimitQuota {
        &self.register_quota
    }
}

fn normalize_origins(origins: Vec<String>) -> Result<Vec<String>> {
    let mut normalized = Vec::new();
    for origin in origins {
        let origin = normalize_origin(&origin)?;
        if !normalized.contains(&origin) {
            normalized.push(origin);
        }
    }
    Ok(normalized)
}

/// Normalize an origin to `scheme://host[:port]` with no trailing slash.
pub(crate) fn normalize_origin(origin: &str) -> Result<String> {
    let parsed = Url::parse(origin).with_context(|| format!("Invalid origin URL: {origin}"))?;
    let host = parsed
        .host_str()
        .ok_or_else(|| anyhow!("Origin must include a host: {origin}"))?;
    let port = parsed
        .port()
        .map_or_else(String::new, |port| format!(":{port}"));
    Ok(format!("{}://{}{}", parsed.scheme(), host, port))
}
