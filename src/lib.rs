//! # Tapgate (TapMap authentication core)
//!
//! `tapgate` is the trust boundary of the TapMap platform. It serves the
//! passkey (`WebAuthn`) registration and login ceremonies and wraps them in
//! generic request-security middleware.
//!
//! ## Request security
//!
//! Every response carries a fixed hardening header set, applied before any
//! other check so even rejected requests get it. Unsafe requests must present
//! an allow-listed `Origin` and a matching double-submit CSRF token pair
//! (cookie + header, compared in constant time). Abuse-prone endpoints are
//! rate limited with per-purpose fixed windows keyed by client IP or email.
//!
//! ## Ceremonies
//!
//! - **Registration** is session-authenticated: the server issues a
//!   challenge bound to the user, the browser signs it, and the verified
//!   credential is upserted by its globally unique credential id.
//! - **Authentication** is anonymous: the caller supplies an email, the
//!   server fans one challenge out to every account owning a passkey for it,
//!   and a verified assertion (with a strictly increasing signature counter)
//!   is exchanged for an opaque bearer session minted by the identity
//!   backend.
//!
//! Challenges are single-use rows with a short TTL; at most one is live per
//! (user, ceremony type) and consumption is a compare-and-delete, so
//! concurrent finishes cannot both win.

pub mod api;
pub mod cli;
pub mod identity;
pub mod security;
pub mod webauthn;

#[allow(clippy::doc_markdown, clippy::needless_raw_string_hashes)]
pub mod built_info {
    include!(concat!(env!("OUT_DIR"), "/built.rs"));
}

pub const GIT_COMMIT_HASH: &str = match built_info::GIT_COMMIT_HASH {
    Some(hash) => hash,
    None => "unknown",
};

pub const APP_USER_AGENT: &str = concat!(env!("CARGO_PKG_NAME"), "/", env!("CARGO_PKG_VERSION"),);
