use crate::{
    identity::{IdentityClient, IdentityConfig},
    security::{
        self, GuardConfig,
        rate_limit::{FixedWindowLimiter, RateLimiter},
    },
    webauthn::{PasskeyConfig, PasskeyService},
};
use anyhow::{Context, Result, anyhow};
use axum::{
    Extension,
    body::Body,
    extract::MatchedPath,
    http::{
        HeaderName, HeaderValue, Method, Request,
        header::{AUTHORIZATION, CONTENT_TYPE},
    },
    middleware,
    routing::get,
};
use sqlx::postgres::PgPoolOptions;
use std::{net::SocketAddr, sync::Arc, time::Duration};
use tokio::net::TcpListener;
use tower::ServiceBuilder;
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    request_id::PropagateRequestIdLayer,
    set_header::SetRequestHeaderLayer,
    trace::TraceLayer,
};
use tracing::{Span, info, info_span};
use ulid::Ulid;
use utoipa_axum::router::OpenApiRouter;
// Keep these internal to the crate while allowing CLI/server wiring to reference them.
pub(crate) mod handlers;
// OpenAPI router wiring and route registration live in openapi.rs.
mod openapi;

pub use openapi::openapi;

/// Build the API router with all documented routes registered.
#[must_use]
pub fn router() -> OpenApiRouter {
    openapi::api_router()
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn serve(
    port: u16,
    dsn: String,
    guard: GuardConfig,
    passkey: PasskeyConfig,
    identity: IdentityConfig,
) -> Result<()> {
    // Connect to database
    let pool = PgPoolOptions::new()
        .min_connections(1)
        .max_connections(5)
        .max_lifetime(Duration::from_secs(60 * 2))
        .test_before_acquire(true)
        .connect(&dsn)
        .await
        .context("Failed to connect to database")?;

    let guard = Arc::new(guard);
    let identity = Arc::new(IdentityClient::new(identity)?);
    let passkey_service = Arc::new(PasskeyService::new(passkey, pool.clone())?);
    let limiter: Arc<dyn RateLimiter> = Arc::new(FixedWindowLimiter::new());

    let cors = cors_layer(&guard)?;

    // Build the router from OpenAPI-wired routes, then extend it with non-doc
    // routes like `/`. The spec stays in openapi.rs.
    let (router, _openapi) = router().split_for_parts();
    let app = router
        .route("/", get(handlers::root::root))
        .layer(
            ServiceBuilder::new()
                // Outermost: every response leaves with the hardening set.
                .layer(middleware::from_fn_with_state(
                    guard.clone(),
                    security::headers::apply,
                ))
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(cors)
                .layer(middleware::from_fn_with_state(
                    guard.clone(),
                    security::guard_requests,
                ))
                .layer(Extension(guard.clone()))
                .layer(Extension(limiter))
                .layer(Extension(identity))
                .layer(Extension(passkey_service))
                .layer(Extension(pool.clone())),
        )
        .layer(Extension(pool));

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(err) = tokio::signal::ctrl_c().await {
            tracing::error!("failed to install ctrl-c handler: {err}");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(err) => tracing::error!("failed to install SIGTERM handler: {err}"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => {},
        () = terminate => {},
    }

    info!("Gracefully shutdown");
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}

/// CORS for the dashboard: exact configured origins, credentials allowed so
/// the CSRF cookie flows, and the CSRF header whitelisted for double-submit.
fn cors_layer(guard: &GuardConfig) -> Result<CorsLayer> {
    let mut origins = Vec::with_capacity(guard.app_origins().len());
    for origin in guard.app_origins() {
        origins.push(
            HeaderValue::from_str(origin)
                .map_err(|_| anyhow!("Invalid CORS origin: {origin}"))?,
        );
    }

    let csrf_header = HeaderName::from_bytes(guard.csrf_header_name().as_bytes())
        .map_err(|_| anyhow!("Invalid CSRF header name: {}", guard.csrf_header_name()))?;

    Ok(CorsLayer::new()
        .allow_headers([CONTENT_TYPE, AUTHORIZATION, csrf_header])
        .allow_methods([Method::GET, Method::POST, Method::PATCH, Method::DELETE])
        .allow_origin(AllowOrigin::list(origins))
        .allow_credentials(true))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cors_layer_accepts_configured_origins() -> Result<()> {
        let guard = GuardConfig::new(vec!["https://app.tapmap.dev".to_string()], true)?;
        assert!(cors_layer(&guard).is_ok());
        Ok(())
    }

    #[test]
    fn cors_layer_rejects_invalid_header_name() -> Result<()> {
        let guard = GuardConfig::new(vec!["https://app.tapmap.dev".to_string()], true)?
            .with_csrf_header_name("bad header\n".to_string());
        assert!(cors_layer(&guard).is_err());
        Ok(())
    }
}
