//! Origin allow-listing for browser-initiated requests.

use crate::security::{GuardConfig, config::normalize_origin};
use axum::http::{HeaderMap, StatusCode, header::ORIGIN};
use tracing::error;

/// Rejection produced by a guard; converts into a plain response.
pub type Denied = (StatusCode, &'static str);

/// Validate the request `Origin` against the configured allow-set.
///
/// The allow-set is the configured application origins plus the request's own
/// host-derived origin, so the service accepts first-party traffic even when
/// it is reached through an alias the operator did not list. Rules:
/// 1. No `Origin` header: allowed iff `allow_no_origin`.
/// 2. Empty configured allow-set: in production this is a misconfiguration
///    and fails closed with 500; outside production it allows.
/// 3. Otherwise the origin must match a configured origin, or
///    `https://<host>` (plus `http://<host>` outside production).
///
/// # Errors
/// Returns the rejection status and a generic body on failure.
pub fn ensure_allowed_origin(
    headers: &HeaderMap,
    config: &GuardConfig,
    allow_no_origin: bool,
) -> Result<(), Denied> {
    let Some(origin) = header_value(headers, ORIGIN.as_str()) else {
        if allow_no_origin {
            return Ok(());
        }
        return Err((StatusCode::FORBIDDEN, "Origin not allowed"));
    };

    if config.app_origins().is_empty() {
        if config.production() {
            // A permissive fallback here would silently disable the guard.
            error!("origin allow-set is empty in production");
            return Err((StatusCode::INTERNAL_SERVER_ERROR, "Server misconfigured"));
        }
        return Ok(());
    }

    let Ok(origin) = normalize_origin(&origin) else {
        return Err((StatusCode::FORBIDDEN, "Origin not allowed"));
    };

    if config.app_origins().iter().any(|allowed| *allowed == origin) {
        return Ok(());
    }

    if let Some(host) = request_host(headers) {
        if origin == format!("https://{host}") {
            return Ok(());
        }
        if !config.production() && origin == format!("http://{host}") {
            return Ok(());
        }
    }

    Err((StatusCode::FORBIDDEN, "Origin not allowed"))
}

/// Host the client addressed, preferring the first `X-Forwarded-Host` hop.
pub(crate) fn request_host(headers: &HeaderMap) -> Option<String> {
    let forwarded = headers
        .get("x-forwarded-host")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(host) = forwarded {
        return Some(host.to_string());
    }
    header_value(headers, "host")
}

fn header_value(headers: &HeaderMap, name: &str) -> Option<String> {
    headers
        .get(name)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty())
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::http::HeaderValue;

    fn config(origins: &[&str], production: bool) -> Result<GuardConfig> {
        GuardConfig::new(origins.iter().map(ToString::to_string).collect(), production)
    }

    fn headers(origin: Option<&'static str>, host: Option<&'static str>) -> HeaderMap {
        let mut headers = HeaderMap::new();
        if let Some(origin) = origin {
            headers.insert(ORIGIN, HeaderValue::from_static(origin));
        }
        if let Some(host) = host {
            headers.insert("host", HeaderValue::from_static(host));
        }
        headers
    }

    #[test]
    fn allow_listed_origin_is_accepted() -> Result<()> {
        let config = config(&["https://app.example.com"], true)?;
        let headers = headers(Some("https://app.example.com"), None);
        assert!(ensure_allowed_origin(&headers, &config, false).is_ok());
        Ok(())
    }

    #[test]
    fn foreign_origin_is_rejected() -> Result<()> {
        let config = config(&["https://app.example.com"], true)?;
        let headers = headers(Some("https://evil.example.com"), None);
        assert_eq!(
            ensure_allowed_origin(&headers, &config, false),
            Err((StatusCode::FORBIDDEN, "Origin not allowed"))
        );
        Ok(())
    }

    #[test]
    fn missing_origin_honors_flag() -> Result<()> {
        let config = config(&["https://app.example.com"], true)?;
        let headers = HeaderMap::new();
        assert!(ensure_allowed_origin(&headers, &config, true).is_ok());
        assert_eq!(
            ensure_allowed_origin(&headers, &config, false),
            Err((StatusCode::FORBIDDEN, "Origin not allowed"))
        );
        Ok(())
    }

    #[test]
    fn empty_allow_set_fails_closed_in_production() -> Result<()> {
        let headers = headers(Some("https://app.example.com"), None);

        let production = config(&[], true)?;
        assert_eq!(
            ensure_allowed_origin(&headers, &production, false),
            Err((StatusCode::INTERNAL_SERVER_ERROR, "Server misconfigured"))
        );

        let development = config(&[], false)?;
        assert!(ensure_allowed_origin(&headers, &development, false).is_ok());
        Ok(())
    }

    #[test]
    fn host_derived_origin_is_accepted() -> Result<()> {
        let config = config(&["https://app.example.com"], true)?;
        let headers = headers(Some("https://alias.example.com"), Some("alias.example.com"));
        assert!(ensure_allowed_origin(&headers, &config, false).is_ok());
        Ok(())
    }

    #[test]
    fn plain_http_host_origin_needs_non_production() -> Result<()> {
        let headers = headers(Some("http://localhost:3000"), Some("localhost:3000"));

        let production = config(&["https://app.example.com"], true)?;
        assert!(ensure_allowed_origin(&headers, &production, false).is_err());

        let development = config(&["https://app.example.com"], false)?;
        assert!(ensure_allowed_origin(&headers, &development, false).is_ok());
        Ok(())
    }

    #[test]
    fn forwarded_host_first_hop_wins() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-host",
            HeaderValue::from_static("edge.example.com, inner.example.com"),
        );
        headers.insert("host", HeaderValue::from_static("ignored.example.com"));
        assert_eq!(request_host(&headers), Some("edge.example.com".to_string()));
    }

    #[test]
    fn trailing_slash_origin_normalizes() -> Result<()> {
        let config = config(&["https://app.example.com"], true)?;
        let headers = headers(Some("https://app.example.com/"), None);
        assert!(ensure_allowed_origin(&headers, &config, false).is_ok());
        Ok(())
    }
}
