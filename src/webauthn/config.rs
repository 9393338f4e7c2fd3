//! Passkey relying-party configuration.

use crate::security::normalize_origin;
use anyhow::{Result, anyhow};
use std::time::Duration;

const DEFAULT_RP_NAME: &str = "TapMap";
const DEFAULT_CHALLENGE_TTL_SECONDS: u64 = 300;

#[derive(Clone, Debug)]
pub struct PasskeyConfig {
    rp_id: String,
    rp_name: String,
    allowed_origins: Vec<String>,
    challenge_ttl: Duration,
}

impl PasskeyConfig {
    /// Create a new passkey configuration.
    ///
    /// # Errors
    /// Returns error if the RP id is empty or any origin is invalid.
    pub fn new(rp_id: String, allowed_origins: Vec<String>) -> Result<Self> {
        if rp_id.trim().is_empty() {
            return Err(anyhow!("Passkey RP ID must not be empty"));
        }
        let allowed_origins = normalize_origins(allowed_origins)?;
        if allowed_origins.is_empty() {
            return Err(anyhow!("Passkey allowed origins must not be empty"));
        }

        Ok(Self {
            rp_id,
            rp_name: DEFAULT_RP_NAME.to_string(),
            allowed_origins,
            challenge_ttl: Duration::from_secs(DEFAULT_CHALLENGE_TTL_SECONDS),
        })
    }

    #[must_use]
    pub fn with_rp_name(mut self, rp_name: String) -> Self {
        self.rp_name = rp_name;
        self
    }

    #[must_use]
    pub fn with_challenge_ttl(mut self, ttl: Duration) -> Self {
        self.challenge_ttl = ttl;
        self
    }

    #[must_use]
    pub fn rp_id(&self) -> &str {
        &self.rp_id
    }

    #[must_use]
    pub fn rp_name(&self) -> &str {
        &self.rp_name
    }

    #[must_use]
    pub fn allowed_origins(&self) -> &[String] {
        &self.allowed_origins
    }

    #[must_use]
    pub fn challenge_ttl(&self) -> Duration {
        self.challenge_ttl
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

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_empty_rp_id_and_origins() {
        assert!(PasskeyConfig::new(String::new(), vec!["https://tapmap.dev".to_string()]).is_err());
        assert!(PasskeyConfig::new("tapmap.dev".to_string(), Vec::new()).is_err());
    }

    #[test]
    fn origins_normalize_and_defaults_apply() -> Result<()> {
        let config = PasskeyConfig::new(
            "tapmap.dev".to_string(),
            vec!["https://app.tapmap.dev/".to_string()],
        )?;
        assert_eq!(config.allowed_origins(), ["https://app.tapmap.dev"]);
        assert_eq!(config.rp_name(), "TapMap");
        assert_eq!(config.challenge_ttl(), Duration::from_secs(300));
        Ok(())
    }

    #[test]
    fn builder_overrides_apply() -> Result<()> {
        let config = PasskeyConfig::new(
            "tapmap.dev".to_string(),
            vec!["https://app.tapmap.dev".to_string()],
        )?
        .with_rp_name("TapMap Staging".to_string())
        .with_challenge_ttl(Duration::from_secs(120));
        assert_eq!(config.rp_name(), "TapMap Staging");
        assert_eq!(config.challenge_ttl(), Duration::from_secs(120));
        Ok(())
    }
}
