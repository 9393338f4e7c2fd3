use anyhow::{Context, Result};
use clap::{Arg, Command};

pub const ARG_RP_ID: &str = "rp-id";
pub const ARG_RP_NAME: &str = "rp-name";
pub const ARG_CHALLENGE_TTL_SECONDS: &str = "challenge-ttl-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_RP_ID)
                .long(ARG_RP_ID)
                .help("WebAuthn relying-party id (the domain credentials bind to)")
                .env("TAPGATE_RP_ID")
                .required(true),
        )
        .arg(
            Arg::new(ARG_RP_NAME)
                .long(ARG_RP_NAME)
                .help("Human-readable relying-party name shown by authenticators")
                .env("TAPGATE_RP_NAME")
                .default_value("TapMap"),
        )
        .arg(
            Arg::new(ARG_CHALLENGE_TTL_SECONDS)
                .long(ARG_CHALLENGE_TTL_SECONDS)
                .help("Ceremony challenge TTL in seconds")
                .env("TAPGATE_CHALLENGE_TTL_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub rp_id: String,
    pub rp_name: String,
    pub challenge_ttl_seconds: u64,
}

impl Options {
    /// Extract passkey options from parsed matches.
    ///
    /// # Errors
    /// Returns an error if a required argument is missing.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let rp_id = matches
            .get_one::<String>(ARG_RP_ID)
            .cloned()
            .context("missing required argument: --rp-id")?;

        Ok(Self {
            rp_id,
            rp_name: matches
                .get_one::<String>(ARG_RP_NAME)
                .cloned()
                .unwrap_or_else(|| "TapMap".to_string()),
            challenge_ttl_seconds: matches
                .get_one::<u64>(ARG_CHALLENGE_TTL_SECONDS)
                .copied()
                .unwrap_or(300),
        })
    }
}
