use anyhow::Result;
use clap::{Arg, ArgAction, Command};

pub const ARG_APP_ORIGIN: &str = "app-origin";
pub const ARG_PRODUCTION: &str = "production";
pub const ARG_CSRF_COOKIE_NAME: &str = "csrf-cookie-name";
pub const ARG_CSRF_HEADER_NAME: &str = "csrf-header-name";
pub const ARG_LOGIN_RATE_LIMIT: &str = "login-rate-limit";
pub const ARG_LOGIN_RATE_WINDOW_SECONDS: &str = "login-rate-window-seconds";
pub const ARG_REGISTER_RATE_LIMIT: &str = "register-rate-limit";
pub const ARG_REGISTER_RATE_WINDOW_SECONDS: &str = "register-rate-window-seconds";

#[must_use]
pub fn with_args(command: Command) -> Command {
    command
        .arg(
            Arg::new(ARG_APP_ORIGIN)
                .long(ARG_APP_ORIGIN)
                .help("Allowed application origin (repeatable, comma-delimited in env)")
                .env("TAPGATE_APP_ORIGINS")
                .action(ArgAction::Append)
                .value_delimiter(','),
        )
        .arg(
            Arg::new(ARG_PRODUCTION)
                .long(ARG_PRODUCTION)
                .help("Production mode: HSTS on, origin guard fails closed, secure cookies")
                .env("TAPGATE_PRODUCTION")
                .action(ArgAction::SetTrue),
        )
        .arg(
            Arg::new(ARG_CSRF_COOKIE_NAME)
                .long(ARG_CSRF_COOKIE_NAME)
                .help("Cookie carrying the double-submit CSRF token")
                .env("TAPGATE_CSRF_COOKIE_NAME")
                .default_value("tapgate_csrf"),
        )
        .arg(
            Arg::new(ARG_CSRF_HEADER_NAME)
                .long(ARG_CSRF_HEADER_NAME)
                .help("Header carrying the double-submit CSRF token")
                .env("TAPGATE_CSRF_HEADER_NAME")
                .default_value("x-csrf-token"),
        )
        .arg(
            Arg::new(ARG_LOGIN_RATE_LIMIT)
                .long(ARG_LOGIN_RATE_LIMIT)
                .help("Login attempts allowed per window")
                .env("TAPGATE_LOGIN_RATE_LIMIT")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_LOGIN_RATE_WINDOW_SECONDS)
                .long(ARG_LOGIN_RATE_WINDOW_SECONDS)
                .help("Login rate-limit window in seconds")
                .env("TAPGATE_LOGIN_RATE_WINDOW_SECONDS")
                .default_value("60")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REGISTER_RATE_LIMIT)
                .long(ARG_REGISTER_RATE_LIMIT)
                .help("Registration attempts allowed per window")
                .env("TAPGATE_REGISTER_RATE_LIMIT")
                .default_value("10")
                .value_parser(clap::value_parser!(u64)),
        )
        .arg(
            Arg::new(ARG_REGISTER_RATE_WINDOW_SECONDS)
                .long(ARG_REGISTER_RATE_WINDOW_SECONDS)
                .help("Registration rate-limit window in seconds")
                .env("TAPGATE_REGISTER_RATE_WINDOW_SECONDS")
                .default_value("300")
                .value_parser(clap::value_parser!(u64)),
        )
}

#[derive(Debug)]
pub struct Options {
    pub app_origins: Vec<String>,
    pub production: bool,
    pub csrf_cookie_name: String,
    pub csrf_header_name: String,
    pub login_rate_limit: u64,
    pub login_rate_window_seconds: u64,
    pub register_rate_limit: u64,
    pub register_rate_window_seconds: u64,
}

impl Options {
    /// Extract security options from parsed matches.
    ///
    /// # Errors
    /// Currently infallible; kept fallible for parity with other option
    /// modules.
    pub fn parse(matches: &clap::ArgMatches) -> Result<Self> {
        let app_origins = matches
            .get_many::<String>(ARG_APP_ORIGIN)
            .map(|values| values.cloned().collect())
            .unwrap_or_default();

        Ok(Self {
            app_origins,
            production: matches.get_flag(ARG_PRODUCTION),
            csrf_cookie_name: matches
                .get_one::<String>(ARG_CSRF_COOKIE_NAME)
                .cloned()
                .unwrap_or_else(|| "tapgate_csrf".to_string()),
            csrf_header_name: matches
                .get_one::<String>(ARG_CSRF_HEADER_NAME)
                .cloned()
                .unwrap_or_else(|| "x-csrf-token".to_string()),
            login_rate_limit: matches
                .get_one::<u64>(ARG_LOGIN_RATE_LIMIT)
                .copied()
                .unwrap_or(10),
            login_rate_window_seconds: matches
                .get_one::<u64>(ARG_LOGIN_RATE_WINDOW_SECONDS)
                .copied()
                .unwrap_or(60),
            register_rate_limit: matches
                .get_one::<u64>(ARG_REGISTER_RATE_LIMIT)
                .copied()
                .unwrap_or(10),
            register_rate_window_seconds: matches
                .get_one::<u64>(ARG_REGISTER_RATE_WINDOW_SECONDS)
                .copied()
                .unwrap_or(300),
        })
    }
}
