//! Client for the TapMap identity backend.
//!
//! The identity backend owns accounts and opaque bearer sessions; tapgate
//! only consumes it. One capability interface, one implementation chosen at
//! startup from configuration — capabilities are never probed per call.
//!
//! Endpoints used:
//! - `GET /v1/accounts?email=` resolves accounts for a login email (an email
//!   may map to more than one account).
//! - `POST /v1/sessions` mints a session for a verified user id.
//! - `POST /v1/sessions/introspect` resolves a presented bearer token.
//! - `GET /health` backs the dependency section of our own `/health`.

use anyhow::{Context, Result, anyhow};
use chrono::{DateTime, Utc};
use reqwest::{Client, StatusCode};
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::warn;
use url::Url;
use uuid::Uuid;

const DEFAULT_TIMEOUT_SECONDS: u64 = 5;

#[derive(Clone)]
pub struct IdentityConfig {
    base_url: String,
    service_token: SecretString,
    timeout: Duration,
}

impl IdentityConfig {
    /// Create a new identity backend configuration.
    ///
    /// # Errors
    /// Returns error if the base URL is not a valid http(s) URL.
    pub fn new(base_url: &str, service_token: SecretString) -> Result<Self> {
        let parsed = Url::parse(base_url).context("Invalid identity backend URL")?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(anyhow!("Identity backend URL must be http(s): {base_url}"));
        }
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            service_token,
            timeout: Duration::from_secs(DEFAULT_TIMEOUT_SECONDS),
        })
    }

    #[must_use]
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    #[must_use]
    pub fn base_url(&self) -> &str {
        &self.base_url
    }
}

impl std::fmt::Debug for IdentityConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IdentityConfig")
            .field("base_url", &self.base_url)
            .field("service_token", &"***")
            .field("timeout", &self.timeout)
            .finish()
    }
}

/// An account owning zero or more passkeys.
#[derive(Clone, Debug, Deserialize)]
pub struct AccountRecord {
    pub user_id: Uuid,
    pub email: String,
    pub display_name: Option<String>,
}

/// A freshly minted opaque bearer session.
#[derive(Clone, Debug, Serialize, Deserialize, utoipa::ToSchema)]
pub struct SessionGrant {
    pub token: String,
    pub expires_at: DateTime<Utc>,
}

/// The identity a presented bearer token resolves to.
#[derive(Clone, Debug, Deserialize)]
pub struct SessionIdentity {
    pub user_id: Uuid,
    pub email: String,
}

#[derive(Debug, Deserialize)]
struct IntrospectResponse {
    active: bool,
    user_id: Option<Uuid>,
    email: Option<String>,
}

#[derive(Debug, Serialize)]
struct MintSessionRequest<'a> {
    user_id: &'a Uuid,
}

#[derive(Debug, Serialize)]
struct IntrospectRequest<'a> {
    token: &'a str,
}

pub struct IdentityClient {
    http: Client,
    config: IdentityConfig,
}

impl IdentityClient {
    /// Build the HTTP client for the identity backend.
    ///
    /// # Errors
    /// Returns error if the underlying client cannot be constructed.
    pub fn new(config: IdentityConfig) -> Result<Self> {
        let http = Client::builder()
            .use_rustls_tls()
            .user_agent(crate::APP_USER_AGENT)
            .timeout(config.timeout)
            .build()
            .context("Failed to build identity backend HTTP client")?;
        Ok(Self { http, config })
    }

    fn endpoint(&self, path: &str) -> String {
        format!("{}{path}", self.config.base_url)
    }

    /// Resolve all accounts registered under an email.
    ///
    /// # Errors
    /// Returns error if the backend is unreachable or answers with an error.
    pub async fn find_accounts_by_email(&self, email: &str) -> Result<Vec<AccountRecord>> {
        let response = self
            .http
            .get(self.endpoint("/v1/accounts"))
            .bearer_auth(self.config.service_token.expose_secret())
            .query(&[("email", email)])
            .send()
            .await
            .context("identity backend account lookup failed")?;

        if response.status() == StatusCode::NOT_FOUND {
            return Ok(Vec::new());
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "identity backend account lookup failed: {}",
                response.status()
            ));
        }
        response
            .json::<Vec<AccountRecord>>()
            .await
            .context("invalid account lookup response")
    }

    /// Mint an opaque bearer session for a verified user.
    ///
    /// Failure here means login did not complete even though the ceremony
    /// verified; callers must report the ceremony as failed.
    ///
    /// # Errors
    /// Returns error if the backend is unreachable or answers with an error.
    pub async fn mint_session(&self, user_id: Uuid) -> Result<SessionGrant> {
        let response = self
            .http
            .post(self.endpoint("/v1/sessions"))
            .bearer_auth(self.config.service_token.expose_secret())
            .json(&MintSessionRequest { user_id: &user_id })
            .send()
            .await
            .context("identity backend session mint failed")?;

        if !response.status().is_success() {
            return Err(anyhow!(
                "identity backend session mint failed: {}",
                response.status()
            ));
        }
        response
            .json::<SessionGrant>()
            .await
            .context("invalid session mint response")
    }

    /// Resolve a presented bearer token; `Ok(None)` means the token is
    /// unknown, expired, or revoked.
    ///
    /// # Errors
    /// Returns error only on transport or protocol failures, so callers can
    /// distinguish "no session" from "backend down".
    pub async fn introspect_session(&self, token: &str) -> Result<Option<SessionIdentity>> {
        let response = self
            .http
            .post(self.endpoint("/v1/sessions/introspect"))
            .bearer_auth(self.config.service_token.expose_secret())
            .json(&IntrospectRequest { token })
            .send()
            .await
            .context("identity backend introspection failed")?;

        if matches!(
            response.status(),
            StatusCode::UNAUTHORIZED | StatusCode::NOT_FOUND
        ) {
            return Ok(None);
        }
        if !response.status().is_success() {
            return Err(anyhow!(
                "identity backend introspection failed: {}",
                response.status()
            ));
        }

        let body = response
            .json::<IntrospectResponse>()
            .await
            .context("invalid introspection response")?;
        if !body.active {
            return Ok(None);
        }
        match (body.user_id, body.email) {
            (Some(user_id), Some(email)) => Ok(Some(SessionIdentity { user_id, email })),
            _ => {
                warn!("identity backend returned an active session without identity fields");
                Ok(None)
            }
        }
    }

    /// Reachability probe for `/health`.
    pub async fn healthy(&self) -> bool {
        match self.http.get(self.endpoint("/health")).send().await {
            Ok(response) => response.status().is_success(),
            Err(err) => {
                warn!("identity backend health probe failed: {err}");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> Result<IdentityConfig> {
        IdentityConfig::new(
            "https://id.tapmap.internal/",
            SecretString::from("service-token".to_string()),
        )
    }

    #[test]
    fn base_url_trailing_slash_is_trimmed() -> Result<()> {
        let config = config()?;
        assert_eq!(config.base_url(), "https://id.tapmap.internal");
        Ok(())
    }

    #[test]
    fn non_http_scheme_is_rejected() {
        let token = || SecretString::from("t".to_string());
        assert!(IdentityConfig::new("ftp://id.tapmap.internal", token()).is_err());
        assert!(IdentityConfig::new("not a url", token()).is_err());
    }

    #[test]
    fn debug_redacts_service_token() -> Result<()> {
        let config = config()?;
        let rendered = format!("{config:?}");
        assert!(rendered.contains("***"));
        assert!(!rendered.contains("service-token"));
        Ok(())
    }

    #[test]
    fn endpoints_join_cleanly() -> Result<()> {
        let client = IdentityClient::new(config()?)?;
        assert_eq!(
            client.endpoint("/v1/sessions"),
            "https://id.tapmap.internal/v1/sessions"
        );
        Ok(())
    }
}
