//! Double-submit CSRF protection.
//!
//! A cross-site page can force a browser to send our cookies, but it cannot
//! read them to mirror the token into a custom header. Unsafe requests must
//! therefore carry the same token in both channels. `Sec-Fetch-Site` is
//! checked first where the browser supplies it.

use crate::security::{GuardConfig, is_safe_method, origin::Denied};
use anyhow::{Context, Result};
use axum::{
    http::{
        HeaderMap, HeaderValue, Method, StatusCode,
        header::{COOKIE, SET_COOKIE},
    },
    response::Response,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use rand::{RngCore, rngs::OsRng};
use subtle::ConstantTimeEq;
use tracing::warn;

/// Lifetime of an issued CSRF cookie; rotation happens on expiry.
const CSRF_COOKIE_MAX_AGE_SECONDS: u64 = 12 * 60 * 60;

/// Enforce double-submit CSRF on unsafe methods.
///
/// Safe methods always pass regardless of token state. For unsafe methods:
/// a cross-site `Sec-Fetch-Site` rejects immediately, then the cookie and
/// header tokens must both be present and byte-equal.
///
/// # Errors
/// Returns 403 with a generic body on any absence, mismatch, or parse
/// failure.
pub fn ensure_csrf_protection(
    headers: &HeaderMap,
    method: &Method,
    config: &GuardConfig,
) -> Result<(), Denied> {
    if is_safe_method(method) {
        return Ok(());
    }

    if let Some(site) = headers
        .get("sec-fetch-site")
        .and_then(|value| value.to_str().ok())
    {
        if !matches!(site, "same-origin" | "same-site" | "none") {
            return Err((StatusCode::FORBIDDEN, "Cross-site request rejected"));
        }
    }

    let cookie_token = cookie_value(headers, config.csrf_cookie_name());
    let header_token = headers
        .get(config.csrf_header_name())
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    match (cookie_token, header_token) {
        (Some(cookie), Some(header)) if tokens_match(&cookie, header) => Ok(()),
        _ => Err((StatusCode::FORBIDDEN, "CSRF token mismatch")),
    }
}

/// Constant-time token comparison.
///
/// Length is compared first: it is public information (the attacker chose the
/// header token), and the constant-time primitive requires equal-length
/// inputs for the byte comparison.
#[must_use]
pub fn tokens_match(cookie: &str, header: &str) -> bool {
    if cookie.is_empty() || header.is_empty() {
        return false;
    }
    if cookie.len() != header.len() {
        return false;
    }
    cookie.as_bytes().ct_eq(header.as_bytes()).into()
}

/// Issue a CSRF cookie on safe responses that do not carry one yet.
///
/// The cookie is intentionally not `HttpOnly`: the dashboard must read it to
/// mirror the value into the CSRF header.
pub fn refresh_csrf_cookie(
    request_headers: &HeaderMap,
    method: &Method,
    config: &GuardConfig,
    response: &mut Response,
) {
    if !is_safe_method(method) {
        return;
    }
    if cookie_value(request_headers, config.csrf_cookie_name()).is_some() {
        return;
    }

    match generate_csrf_token().and_then(|token| build_csrf_cookie(config, &token)) {
        Ok(cookie) => {
            response.headers_mut().append(SET_COOKIE, cookie);
        }
        Err(err) => {
            warn!("failed to issue CSRF cookie: {err}");
        }
    }
}

/// Create a fresh CSRF token (32 random bytes, base64url).
pub(crate) fn generate_csrf_token() -> Result<String> {
    let mut bytes = [0u8; 32];
    OsRng
        .try_fill_bytes(&mut bytes)
        .context("failed to generate CSRF token")?;
    Ok(URL_SAFE_NO_PAD.encode(bytes))
}

fn build_csrf_cookie(config: &GuardConfig, token: &str) -> Result<HeaderValue> {
    let mut cookie = format!(
        "{}={token}; Path=/; SameSite=Lax; Max-Age={CSRF_COOKIE_MAX_AGE_SECONDS}",
        config.csrf_cookie_name()
    );
    if config.production() {
        cookie.push_str("; Secure");
    }
    HeaderValue::from_str(&cookie).context("failed to build CSRF cookie header")
}

/// Read a named cookie from the `Cookie` header.
pub(crate) fn cookie_value(headers: &HeaderMap, name: &str) -> Option<String> {
    let header = headers.get(COOKIE)?;
    let value = header.to_str().ok()?;
    for pair in value.split(';') {
        let trimmed = pair.trim();
        let mut parts = trimmed.splitn(2, '=');
        let key = parts.next()?.trim();
        let val = parts.next()?.trim();
        if key == name && !val.is_empty() {
            return Some(val.to_string());
        }
    }
    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::response::IntoResponse;

    fn config() -> Result<GuardConfig> {
        GuardConfig::new(vec!["https://app.tapmap.dev".to_string()], false)
    }

    fn request_headers(cookie: Option<&str>, header: Option<&str>) -> Result<HeaderMap> {
        let mut headers = HeaderMap::new();
        if let Some(token) = cookie {
            headers.insert(COOKIE, HeaderValue::from_str(&format!("tapgate_csrf={token}"))?);
        }
        if let Some(token) = header {
            headers.insert("x-csrf-token", HeaderValue::from_str(token)?);
        }
        Ok(headers)
    }

    #[test]
    fn tokens_match_requires_equal_bytes() {
        assert!(tokens_match("abcdef", "abcdef"));
        assert!(!tokens_match("abcdef", "abcdeg"));
    }

    #[test]
    fn tokens_match_rejects_empty_or_length_mismatch() {
        assert!(!tokens_match("", ""));
        assert!(!tokens_match("abc", ""));
        assert!(!tokens_match("", "abc"));
        assert!(!tokens_match("abc", "abcd"));
    }

    #[test]
    fn safe_methods_bypass() -> Result<()> {
        let config = config()?;
        let headers = HeaderMap::new();
        assert!(ensure_csrf_protection(&headers, &Method::GET, &config).is_ok());
        assert!(ensure_csrf_protection(&headers, &Method::HEAD, &config).is_ok());
        assert!(ensure_csrf_protection(&headers, &Method::OPTIONS, &config).is_ok());
        Ok(())
    }

    #[test]
    fn unsafe_method_requires_both_tokens() -> Result<()> {
        let config = config()?;

        let headers = request_headers(None, None)?;
        assert!(ensure_csrf_protection(&headers, &Method::POST, &config).is_err());

        let headers = request_headers(Some("token"), None)?;
        assert!(ensure_csrf_protection(&headers, &Method::POST, &config).is_err());

        let headers = request_headers(None, Some("token"))?;
        assert!(ensure_csrf_protection(&headers, &Method::POST, &config).is_err());

        let headers = request_headers(Some("token"), Some("token"))?;
        assert!(ensure_csrf_protection(&headers, &Method::POST, &config).is_ok());
        Ok(())
    }

    #[test]
    fn mismatched_tokens_are_rejected() -> Result<()> {
        let config = config()?;
        let headers = request_headers(Some("token-a"), Some("token-b"))?;
        assert_eq!(
            ensure_csrf_protection(&headers, &Method::POST, &config),
            Err((StatusCode::FORBIDDEN, "CSRF token mismatch"))
        );
        Ok(())
    }

    #[test]
    fn cross_site_fetch_metadata_rejects() -> Result<()> {
        let config = config()?;
        let mut headers = request_headers(Some("token"), Some("token"))?;
        headers.insert("sec-fetch-site", HeaderValue::from_static("cross-site"));
        assert_eq!(
            ensure_csrf_protection(&headers, &Method::POST, &config),
            Err((StatusCode::FORBIDDEN, "Cross-site request rejected"))
        );
        Ok(())
    }

    #[test]
    fn same_site_fetch_metadata_passes() -> Result<()> {
        let config = config()?;
        for site in ["same-origin", "same-site", "none"] {
            let mut headers = request_headers(Some("token"), Some("token"))?;
            headers.insert("sec-fetch-site", HeaderValue::from_str(site)?);
            assert!(ensure_csrf_protection(&headers, &Method::POST, &config).is_ok());
        }
        Ok(())
    }

    #[test]
    fn generated_token_is_32_bytes_base64url() -> Result<()> {
        let token = generate_csrf_token()?;
        let decoded = URL_SAFE_NO_PAD.decode(token.as_bytes())?;
        assert_eq!(decoded.len(), 32);
        Ok(())
    }

    #[test]
    fn cookie_value_parses_multi_cookie_header() {
        let mut headers = HeaderMap::new();
        headers.insert(
            COOKIE,
            HeaderValue::from_static("theme=dark; tapgate_csrf=tok123; other=1"),
        );
        assert_eq!(cookie_value(&headers, "tapgate_csrf"), Some("tok123".to_string()));
        assert_eq!(cookie_value(&headers, "missing"), None);
    }

    #[test]
    fn refresh_issues_cookie_only_when_missing_on_safe_requests() -> Result<()> {
        let config = config()?;

        let mut response = StatusCode::OK.into_response();
        refresh_csrf_cookie(&HeaderMap::new(), &Method::GET, &config, &mut response);
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("tapgate_csrf="));
        assert!(cookie.contains("SameSite=Lax"));
        assert!(!cookie.contains("Secure"));

        let mut response = StatusCode::OK.into_response();
        let headers = request_headers(Some("existing"), None)?;
        refresh_csrf_cookie(&headers, &Method::GET, &config, &mut response);
        assert!(response.headers().get(SET_COOKIE).is_none());

        let mut response = StatusCode::OK.into_response();
        refresh_csrf_cookie(&HeaderMap::new(), &Method::POST, &config, &mut response);
        assert!(response.headers().get(SET_COOKIE).is_none());
        Ok(())
    }

    #[test]
    fn production_cookie_is_secure() -> Result<()> {
        let config = GuardConfig::new(vec!["https://app.tapmap.dev".to_string()], true)?;
        let mut response = StatusCode::OK.into_response();
        refresh_csrf_cookie(&HeaderMap::new(), &Method::GET, &config, &mut response);
        let cookie = response
            .headers()
            .get(SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.contains("; Secure"));
        Ok(())
    }
}
