use anyhow::{Context, Result};
use clap::{Arg, Command};
use secrecy::SecretString;

pub const ARG_IDENTITY_URL: &str = "identity-url";
pub const ARG_IDENTITY_TOKEN: &str = "identity-token";
pub const ARG_IDENTITY_TIMEOUT_SECONDS: &str = "identity-timeout-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_IDENTITY_URL)
                .long(ARG_IDENTITY_URL)
                .help("Base URL of the identity backend")
                .env("TAPGATE_IDENTITY_URL")
                .required(true),
        )
        .arg(
            Arg::new(ARG_IDENTITY_TOKEN)
                .long(ARG_IDENTITY_TOKEN)
                .help("Service token for identity backend calls")
                .env("TAPGATE_IDENTITY_TOKEN")
                .required(true),
        )
        .arg(
            Arg::new(ARG_IDENTITY_TIMEOUT_SECONDS)
                .long(ARG_IDENTITY_TIMEOUT_SECONDS)
                .help("Timeout for identity backend calls in seconds")
                .env("TAPGATE_IDENTITY_TIMEOUT_SECONDS")
                .default_value("5")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub url: String,
    pub token: SecretString,
    pub timeout_seconds: u64,
}

impl Options {
    /// Extract identity backend options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let url = matches
            .get_one::<String>(ARG_IDENTITY_URL)
            .cloned()
            .context("missing required argument: --identity-url")?;
        let token = matches
            .get_one::<String>(ARG_IDENTITY_TOKEN)
            .cloned()
            .context("missing required argument: --identity-token")?;
        let timeout_seconds = matches
            .get_one::<u64>(ARG_IDENTITY_TIMEOUT_SECONDS)
            .copied()
            .unwrap_or(5);

        Ok(Self {
            url,
            token: SecretString::from(token),
            timeout_seconds,
        })
    }
}
