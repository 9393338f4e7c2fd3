//! Request-security middleware: header hardening, origin allow-listing,
//! double-submit CSRF validation, and fixed-window rate limiting.
//!
//! Flow Overview:
//! 1) `headers::apply` is the outermost layer; every response (including
//!    rejections produced further in) carries the hardening set.
//! 2) `guard_requests` runs the origin guard, then the CSRF guard for unsafe
//!    verbs, before the request reaches a handler.
//! 3) Rate limits are enforced per endpoint inside handlers, where the
//!    purpose prefix and identifier are known.
//!
//! Security boundaries:
//! - Guards are pure functions of (headers, method, config); configuration is
//!   built once at startup and passed in explicitly.
//! - A claimed `Origin` is never trusted beyond comparison against
//!   operator-configured strings or the request's own transport-level host.

use axum::{
    extract::{Request, State},
    http::{HeaderMap, Method},
    middleware::Next,
    response::{IntoResponse, Response},
};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::warn;

pub mod csrf;
pub mod headers;
pub mod origin;
pub mod rate_limit;

pub use config::GuardConfig;
pub(crate) use config::normalize_origin;

mod config;

/// True for methods that cannot change server state.
#[must_use]
pub fn is_safe_method(method: &Method) -> bool {
    matches!(*method, Method::GET | Method::HEAD | Method::OPTIONS)
}

/// Derive the rate-limit identifier for a request.
///
/// Prefers the first `X-Forwarded-For` hop (the address the edge proxy saw),
/// falling back to the peer address of the connection.
#[must_use]
pub fn client_identifier(headers: &HeaderMap, peer: Option<SocketAddr>) -> String {
    let forwarded = headers
        .get("x-forwarded-for")
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.split(',').next())
        .map(str::trim)
        .filter(|value| !value.is_empty());
    if let Some(ip) = forwarded {
        return ip.to_string();
    }
    peer.map_or_else(|| "unknown".to_string(), |addr| addr.ip().to_string())
}

/// Origin + CSRF gate applied to every routed request.
///
/// Safe methods may arrive without an `Origin` header (same-origin GETs often
/// do); unsafe methods must pass both guards. Safe responses that carry no
/// CSRF cookie yet are issued a fresh one so the dashboard can double-submit.
pub async fn guard_requests(
    State(config): State<Arc<GuardConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let method = request.method().clone();
    let request_headers = request.headers().clone();

    if let Err(denied) = origin::ensure_allowed_origin(&request_headers, &config, is_safe_method(&method)) {
        warn!(method = %method, "request rejected by origin guard");
        return denied.into_response();
    }

    if let Err(denied) = csrf::ensure_csrf_protection(&request_headers, &method, &config) {
        warn!(method = %method, "request rejected by CSRF guard");
        return denied.into_response();
    }

    let mut response = next.run(request).await;
    csrf::refresh_csrf_cookie(&request_headers, &method, &config, &mut response);
    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::{
        Router,
        body::Body,
        http::{HeaderValue, StatusCode, header},
        middleware,
        routing::{get, post},
    };
    use tower::ServiceExt;

    /// The stack as `api::serve` wires it: headers outermost, guards inside.
    fn guarded_app(production: bool) -> Result<Router> {
        let config = Arc::new(GuardConfig::new(
            vec!["https://app.tapmap.dev".to_string()],
            production,
        )?);
        Ok(Router::new()
            .route("/ping", get(|| async { "pong" }))
            .route("/act", post(|| async { "acted" }))
            .layer(middleware::from_fn_with_state(config.clone(), guard_requests))
            .layer(middleware::from_fn_with_state(config, headers::apply)))
    }

    #[tokio::test]
    async fn rejected_requests_still_carry_hardening_headers() -> Result<()> {
        let response = guarded_app(false)?
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/act")
                    .header("origin", "https://evil.example.com")
                    .body(Body::empty())?,
            )
            .await?;

        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        assert_eq!(
            response
                .headers()
                .get(header::X_CONTENT_TYPE_OPTIONS)
                .map(HeaderValue::as_bytes),
            Some(b"nosniff".as_slice())
        );
        Ok(())
    }

    #[tokio::test]
    async fn unsafe_request_without_csrf_tokens_is_rejected() -> Result<()> {
        let response = guarded_app(false)?
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/act")
                    .header("origin", "https://app.tapmap.dev")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::FORBIDDEN);
        Ok(())
    }

    #[tokio::test]
    async fn unsafe_request_with_matching_tokens_passes() -> Result<()> {
        let response = guarded_app(false)?
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/act")
                    .header("origin", "https://app.tapmap.dev")
                    .header("cookie", "tapgate_csrf=tok123")
                    .header("x-csrf-token", "tok123")
                    .body(Body::empty())?,
            )
            .await?;
        assert_eq!(response.status(), StatusCode::OK);
        Ok(())
    }

    #[tokio::test]
    async fn safe_request_gets_a_csrf_cookie_issued() -> Result<()> {
        let response = guarded_app(false)?
            .oneshot(Request::builder().uri("/ping").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let cookie = response
            .headers()
            .get(header::SET_COOKIE)
            .and_then(|value| value.to_str().ok())
            .unwrap_or_default();
        assert!(cookie.starts_with("tapgate_csrf="));
        Ok(())
    }

    #[test]
    fn safe_methods_are_safe() {
        assert!(is_safe_method(&Method::GET));
        assert!(is_safe_method(&Method::HEAD));
        assert!(is_safe_method(&Method::OPTIONS));
        assert!(!is_safe_method(&Method::POST));
        assert!(!is_safe_method(&Method::PATCH));
        assert!(!is_safe_method(&Method::DELETE));
    }

    #[test]
    fn client_identifier_prefers_forwarded_hop() {
        let mut headers = HeaderMap::new();
        headers.insert(
            "x-forwarded-for",
            HeaderValue::from_static("1.2.3.4, 5.6.7.8"),
        );
        let peer = "9.9.9.9:443".parse().ok();
        assert_eq!(client_identifier(&headers, peer), "1.2.3.4");
    }

    #[test]
    fn client_identifier_falls_back_to_peer() {
        let headers = HeaderMap::new();
        let peer = "9.9.9.9:443".parse().ok();
        assert_eq!(client_identifier(&headers, peer), "9.9.9.9");
    }

    #[test]
    fn client_identifier_without_peer_is_unknown() {
        let headers = HeaderMap::new();
        assert_eq!(client_identifier(&headers, None), "unknown");
    }
}
