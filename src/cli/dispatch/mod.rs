//! Command-line argument dispatch and server initialization.
//!
//! This module parses validated CLI arguments and maps them to the
//! appropriate action, such as starting the API server with its full
//! configuration state.

use crate::cli::actions::{Action, server::Args};
use crate::cli::commands::{identity, passkey, security};
use anyhow::{Context, Result};

/// Map validated CLI matches to a server action.
///
/// # Errors
/// Returns an error if required arguments are missing or inconsistent.
pub fn handler(matches: &clap::ArgMatches) -> Result<Action> {
    let port = matches.get_one::<u16>("port").copied().unwrap_or(8080);
    let dsn = matches
        .get_one::<String>("dsn")
        .cloned()
        .context("missing required argument: --dsn")?;

    let identity_opts = identity::Options::parse(matches)?;
    let passkey_opts = passkey::Options::parse(matches)?;
    let security_opts = security::Options::parse(matches)?;

    Ok(Action::Server(Args {
        port,
        dsn,
        identity: identity_opts,
        passkey: passkey_opts,
        security: security_opts,
    }))
}
