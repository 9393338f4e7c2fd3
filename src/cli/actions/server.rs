use crate::{
    api,
    cli::commands::{identity, passkey, security},
    identity::IdentityConfig,
    security::{GuardConfig, rate_limit::RateLimitQuota},
    webauthn::PasskeyConfig,
};
use anyhow::{Context, Result};
use std::time::Duration;
use tracing::{info, warn};

#[derive(Debug)]
pub struct Args {
    pub port: u16,
    pub dsn: String,
    pub identity: identity::Options,
    pub passkey: passkey::Options,
    pub security: security::Options,
}

/// Execute the server action.
///
/// # Errors
/// Returns an error if configuration is invalid or the server fails to start.
pub async fn execute(args: Args) -> Result<()> {
    if args.security.app_origins.is_empty() {
        // Ceremonies need at least one origin; PasskeyConfig rejects the
        // empty list below. Flag it here so the failure names the flag.
        warn!("no --app-origin configured");
    }

    let guard = GuardConfig::new(args.security.app_origins.clone(), args.security.production)
        .context("Invalid application origins")?
        .with_csrf_cookie_name(args.security.csrf_cookie_name)
        .with_csrf_header_name(args.security.csrf_header_name)
        .with_login_quota(RateLimitQuota::new(
            "passkey-login",
            args.security.login_rate_limit,
            Duration::from_secs(args.security.login_rate_window_seconds),
        ))
        .with_register_quota(RateLimitQuota::new(
            "passkey-register",
            args.security.register_rate_limit,
            Duration::from_secs(args.security.register_rate_window_seconds),
        ));

    let passkey = PasskeyConfig::new(args.passkey.rp_id, args.security.app_origins)
        .context("Invalid passkey configuration")?
        .with_rp_name(args.passkey.rp_name)
        .with_challenge_ttl(Duration::from_secs(args.passkey.challenge_ttl_seconds));

    let identity = IdentityConfig::new(&args.identity.url, args.identity.token)
        .context("Invalid identity backend configuration")?
        .with_timeout(Duration::from_secs(args.identity.timeout_seconds));

    info!(
        rp_id = %passkey.rp_id(),
        production = args.security.production,
        "starting tapgate"
    );

    api::serve(args.port, args.dsn, guard, passkey, identity).await
}
