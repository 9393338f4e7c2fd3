//! Response header hardening applied to every response.
//!
//! This is the outermost middleware layer: rejections produced by the origin
//! or CSRF guards, rate limiting, or handler errors all pass through it, so
//! no response leaves without the hardening set.

use crate::security::GuardConfig;
use axum::{
    extract::{Request, State},
    http::{HeaderValue, header},
    middleware::Next,
    response::Response,
};
use std::sync::Arc;

const PERMISSIONS_POLICY: &str = "camera=(), microphone=(), geolocation=()";
const HSTS: &str = "max-age=31536000; includeSubDomains";

/// Attach the fixed hardening header set to the response.
///
/// HSTS is only meaningful behind TLS and is emitted in production only; the
/// rest of the set is unconditional. Auth responses are never cacheable.
pub async fn apply(
    State(config): State<Arc<GuardConfig>>,
    request: Request,
    next: Next,
) -> Response {
    let mut response = next.run(request).await;
    let headers = response.headers_mut();

    headers.insert(
        header::X_CONTENT_TYPE_OPTIONS,
        HeaderValue::from_static("nosniff"),
    );
    headers.insert(header::X_FRAME_OPTIONS, HeaderValue::from_static("DENY"));
    headers.insert(
        header::REFERRER_POLICY,
        HeaderValue::from_static("no-referrer"),
    );
    headers.insert(
        header::HeaderName::from_static("permissions-policy"),
        HeaderValue::from_static(PERMISSIONS_POLICY),
    );
    headers.insert(header::CACHE_CONTROL, HeaderValue::from_static("no-store"));
    headers.insert(header::PRAGMA, HeaderValue::from_static("no-cache"));

    if config.production() {
        headers.insert(
            header::STRICT_TRANSPORT_SECURITY,
            HeaderValue::from_static(HSTS),
        );
    }

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use anyhow::Result;
    use axum::{Router, body::Body, http::StatusCode, middleware, routing::get};
    use tower::ServiceExt;

    fn app(production: bool) -> Result<Router> {
        let config = Arc::new(GuardConfig::new(
            vec!["https://app.tapmap.dev".to_string()],
            production,
        )?);
        Ok(Router::new()
            .route("/", get(|| async { "ok" }))
            .layer(middleware::from_fn_with_state(config, apply)))
    }

    #[tokio::test]
    async fn hardening_set_is_attached() -> Result<()> {
        let response = app(false)?
            .oneshot(Request::builder().uri("/").body(Body::empty())?)
            .await?;

        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers.get(header::X_CONTENT_TYPE_OPTIONS).map(HeaderValue::as_bytes),
            Some(b"nosniff".as_slice())
        );
        assert_eq!(
            headers.get(header::X_FRAME_OPTIONS).map(HeaderValue::as_bytes),
            Some(b"DENY".as_slice())
        );
        assert_eq!(
            headers.get(header::REFERRER_POLICY).map(HeaderValue::as_bytes),
            Some(b"no-referrer".as_slice())
        );
        assert_eq!(
            headers.get(header::CACHE_CONTROL).map(HeaderValue::as_bytes),
            Some(b"no-store".as_slice())
        );
        assert!(headers.get("permissions-policy").is_some());
        assert!(headers.get(header::PRAGMA).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn hsts_only_in_production() -> Result<()> {
        let response = app(false)?
            .oneshot(Request::builder().uri("/").body(Body::empty())?)
            .await?;
        assert!(response.headers().get(header::STRICT_TRANSPORT_SECURITY).is_none());

        let response = app(true)?
            .oneshot(Request::builder().uri("/").body(Body::empty())?)
            .await?;
        assert!(response.headers().get(header::STRICT_TRANSPORT_SECURITY).is_some());
        Ok(())
    }

    #[tokio::test]
    async fn missing_route_responses_are_hardened() -> Result<()> {
        let response = app(false)?
            .oneshot(Request::builder().uri("/missing").body(Body::empty())?)
            .await?;
        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        assert!(response.headers().get(header::X_CONTENT_TYPE_OPTIONS).is_some());
        Ok(())
    }
}
