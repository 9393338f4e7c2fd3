//! API handlers and shared utilities for tapgate.
//!
//! This module organizes the route handlers and provides the helpers they
//! share: bearer-session resolution against the identity backend, request-id
//! extraction, rate-limit enforcement, and WebAuthn payload parsing.

pub mod credentials;
pub mod health;
pub mod passkey_login;
pub mod passkeys;
pub mod root;

use crate::identity::IdentityClient;
use crate::security::rate_limit::{RateLimitQuota, RateLimiter, rate_limit_headers};
use crate::webauthn::PasskeyService;
use anyhow::Result;
use axum::{
    body::Bytes,
    http::{HeaderMap, StatusCode, header::AUTHORIZATION},
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use regex::Regex;
use serde::de::DeserializeOwned;
use tracing::error;
use uuid::Uuid;

pub(crate) const MAX_WEBAUTHN_JSON_BYTES: usize = 32 * 1024;

pub(crate) type HandlerError = Box<axum::response::Response>;

/// Authenticated user context resolved from a bearer session.
#[derive(Clone, Debug)]
pub struct Principal {
    pub user_id: Uuid,
    pub email: String,
}

/// Resolve the bearer session into a principal, or reject with 401.
///
/// Backend failures become 500: an unreachable identity backend must fail
/// closed, not let requests through unauthenticated.
pub(crate) async fn require_session(
    headers: &HeaderMap,
    identity: &IdentityClient,
) -> Result<Principal, HandlerError> {
    let Some(token) = extract_bearer_token(headers) else {
        return Err(Box::new(StatusCode::UNAUTHORIZED.into_response()));
    };
    match identity.introspect_session(&token).await {
        Ok(Some(session)) => Ok(Principal {
            user_id: session.user_id,
            email: session.email,
        }),
        Ok(None) => Err(Box::new(StatusCode::UNAUTHORIZED.into_response())),
        Err(err) => {
            error!("session introspection failed: {err}");
            Err(Box::new(StatusCode::INTERNAL_SERVER_ERROR.into_response()))
        }
    }
}

pub(crate) fn extract_bearer_token(headers: &HeaderMap) -> Option<String> {
    let value = headers.get(AUTHORIZATION)?.to_str().ok()?;
    let trimmed = value.trim();
    let token = trimmed
        .strip_prefix("Bearer ")
        .or_else(|| trimmed.strip_prefix("bearer "))?
        .trim();
    if token.is_empty() {
        None
    } else {
        Some(token.to_string())
    }
}

/// Count the request against a quota; a rejected request becomes a 429 with
/// `Retry-After`, an allowed one hands back the `X-RateLimit-*` headers for
/// the handler to attach to its response.
pub(crate) fn enforce_rate_limit(
    limiter: &dyn RateLimiter,
    quota: &RateLimitQuota,
    identifier: &str,
) -> Result<HeaderMap, HandlerError> {
    let verdict = limiter.enforce(quota, identifier);
    let headers = rate_limit_headers(&verdict);
    if verdict.allowed {
        Ok(headers)
    } else {
        Err(Box::new(
            (
                StatusCode::TOO_MANY_REQUESTS,
                headers,
                "Rate limited".to_string(),
            )
                .into_response(),
        ))
    }
}

/// Normalize an email for lookups.
pub(crate) fn normalize_email(email: &str) -> String {
    email.trim().to_lowercase()
}

/// Basic email format check on already-normalized input.
pub(crate) fn valid_email(email_normalized: &str) -> bool {
    Regex::new(r"^[^@\s]+@[^@\s]+\.[^@\s]+$").is_ok_and(|regex| regex.is_match(email_normalized))
}

/// Parse a capped WebAuthn JSON body.
pub(crate) fn parse_webauthn_body<T: DeserializeOwned>(body: &Bytes) -> Result<T, HandlerError> {
    if body.len() > MAX_WEBAUTHN_JSON_BYTES {
        return Err(Box::new(StatusCode::PAYLOAD_TOO_LARGE.into_response()));
    }
    serde_json::from_slice(body).map_err(|_| {
        Box::new((StatusCode::BAD_REQUEST, "Invalid WebAuthn payload").into_response())
    })
}

/// Decode a base64url credential id from a path segment.
pub(crate) fn decode_credential_id(credential_id_b64: &str) -> Result<Vec<u8>, HandlerError> {
    URL_SAFE_NO_PAD
        .decode(credential_id_b64.as_bytes())
        .map_err(|_| {
            Box::new((StatusCode::BAD_REQUEST, "Invalid credential id").into_response())
        })
}

/// Resolve and allow-list the request Origin for ceremony calls.
pub(crate) fn extract_origin(
    headers: &HeaderMap,
    passkey_service: &PasskeyService,
) -> Result<String, HandlerError> {
    let origin = headers
        .get(axum::http::header::ORIGIN)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .ok_or_else(|| {
            Box::new((StatusCode::BAD_REQUEST, "Missing Origin header").into_response())
        })?;

    passkey_service
        .match_origin(origin)
        .ok_or_else(|| Box::new((StatusCode::BAD_REQUEST, "Origin not allowed").into_response()))
}

pub(crate) fn request_id(headers: &HeaderMap) -> String {
    headers
        .get("x-request-id")
        .and_then(|value| value.to_str().ok())
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::http::HeaderValue;

    #[test]
    fn normalize_email_trims_and_lowercases() {
        assert_eq!(normalize_email(" Clerk@Example.COM "), "clerk@example.com");
    }

    #[test]
    fn valid_email_accepts_basic_format() {
        assert!(valid_email("a@example.com"));
        assert!(valid_email("name.surname@example.co"));
    }

    #[test]
    fn valid_email_rejects_missing_parts() {
        assert!(!valid_email("not-an-email"));
        assert!(!valid_email("missing-at.example.com"));
        assert!(!valid_email("missing-domain@"));
    }

    #[test]
    fn extract_bearer_token_handles_case_and_whitespace() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer  tok123 "));
        assert_eq!(extract_bearer_token(&headers), Some("tok123".to_string()));

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("bearer tok123"));
        assert_eq!(extract_bearer_token(&headers), Some("tok123".to_string()));
    }

    #[test]
    fn extract_bearer_token_rejects_other_schemes_and_empty() {
        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Basic dXNlcg=="));
        assert_eq!(extract_bearer_token(&headers), None);

        let mut headers = HeaderMap::new();
        headers.insert(AUTHORIZATION, HeaderValue::from_static("Bearer "));
        assert_eq!(extract_bearer_token(&headers), None);

        assert_eq!(extract_bearer_token(&HeaderMap::new()), None);
    }

    #[test]
    fn decode_credential_id_round_trips() {
        let id = vec![1u8, 2, 3, 4, 255];
        let encoded = URL_SAFE_NO_PAD.encode(&id);
        let decoded = decode_credential_id(&encoded).ok();
        assert_eq!(decoded, Some(id));
        assert!(decode_credential_id("not/base64url!").is_err());
    }

    #[test]
    fn oversized_webauthn_body_is_rejected() {
        let body = Bytes::from(vec![b'a'; MAX_WEBAUTHN_JSON_BYTES + 1]);
        assert!(parse_webauthn_body::<serde_json::Value>(&body).is_err());
    }

    #[test]
    fn request_id_defaults_to_unknown() {
        assert_eq!(request_id(&HeaderMap::new()), "unknown");
        let mut headers = HeaderMap::new();
        headers.insert("x-request-id", HeaderValue::from_static("01H"));
        assert_eq!(request_id(&headers), "01H");
    }
}
