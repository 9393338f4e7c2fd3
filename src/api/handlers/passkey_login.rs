//! Passkey login endpoints.
//!
//! Flow Overview:
//! 1) `login_start` resolves the email to accounts, collects every passkey
//!    they own, and fans one authentication challenge out to each account.
//! 2) The browser signs the challenge out of band.
//! 3) `login_finish` verifies the assertion, enforces the monotonic
//!    signature counter, and exchanges the verified identity for a session
//!    minted by the identity backend.
//!
//! Security boundaries:
//! - Both endpoints are anonymous and rate limited by client IP and email.
//! - Responses never distinguish an unknown email from an account without
//!   passkeys; enumeration gets one generic answer.
//! - Signature mismatches and counter regressions share one client-facing
//!   message.

use crate::api::handlers::{
    enforce_rate_limit, normalize_email, parse_webauthn_body, request_id, valid_email,
};
use crate::api::handlers::extract_origin;
use crate::identity::IdentityClient;
use crate::security::{GuardConfig, client_identifier, rate_limit::RateLimiter};
use crate::webauthn::{AuthenticationCeremonyError, PasskeyService};
use axum::{
    Json,
    body::Bytes,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use uuid::Uuid;
use webauthn_rs::prelude::PublicKeyCredential;

/// One answer for every "this email cannot log in" case.
const LOGIN_UNAVAILABLE: &str = "Passkey login unavailable";
const LOGIN_FAILED: &str = "Login verification failed";

#[derive(Debug, Deserialize, ToSchema)]
pub struct LoginStartRequest {
    pub email: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginStartResponse {
    /// Ceremony options for `navigator.credentials.get`.
    pub options: serde_json::Value,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct LoginFinishRequest {
    pub email: String,
    pub response: serde_json::Value,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginFinishResponse {
    pub verified: bool,
    pub session: crate::identity::SessionGrant,
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkeys/login/start",
    request_body = LoginStartRequest,
    responses(
        (status = 200, description = "Login challenge issued", body = LoginStartResponse),
        (status = 400, description = "No usable passkeys for this email"),
        (status = 429, description = "Rate limited")
    ),
    tag = "auth"
)]
/// Start passkey login by issuing an authentication challenge.
pub async fn login_start(
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    identity: Extension<Arc<IdentityClient>>,
    guard: Extension<Arc<GuardConfig>>,
    limiter: Extension<Arc<dyn RateLimiter>>,
    passkey_service: Extension<Arc<PasskeyService>>,
    payload: Option<Json<LoginStartRequest>>,
) -> impl IntoResponse {
    let request_id = request_id(&headers);
    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };

    let email = normalize_email(&request.email);
    if !valid_email(&email) {
        return (StatusCode::BAD_REQUEST, "Invalid email".to_string()).into_response();
    }

    let identifier = client_identifier(&headers, Some(peer));
    let rate_headers = match enforce_rate_limit(limiter.as_ref(), guard.login_quota(), &identifier)
        .and_then(|ip_headers| {
            enforce_rate_limit(limiter.as_ref(), guard.login_quota(), &email)
                .map(|_| ip_headers)
        }) {
        Ok(rate_headers) => rate_headers,
        Err(response) => {
            warn!(request_id = %request_id, "passkey login start rate limited");
            return *response;
        }
    };

    let origin = match extract_origin(&headers, &passkey_service) {
        Ok(origin) => origin,
        Err(response) => return *response,
    };

    let accounts = match identity.find_accounts_by_email(&email).await {
        Ok(accounts) => accounts,
        Err(err) => {
            error!(request_id = %request_id, "account lookup failed: {err}");
            return (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string())
                .into_response();
        }
    };

    // Unknown email and passkey-less account take the same path below:
    // auth_begin reports NoCredentialsFound for an empty id set too.
    let user_ids: Vec<Uuid> = accounts.iter().map(|account| account.user_id).collect();

    match passkey_service.auth_begin(&user_ids, &origin).await {
        Ok(options) => {
            info!(request_id = %request_id, "passkey login challenge issued");
            (
                StatusCode::OK,
                rate_headers,
                Json(LoginStartResponse {
                    options: serde_json::to_value(options).unwrap_or_default(),
                }),
            )
                .into_response()
        }
        Err(AuthenticationCeremonyError::NoCredentialsFound) => {
            info!(request_id = %request_id, "passkey login start with no usable credentials");
            (StatusCode::BAD_REQUEST, LOGIN_UNAVAILABLE.to_string()).into_response()
        }
        Err(err) => {
            error!(request_id = %request_id, "failed to start passkey login: {err:?}");
            (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string()).into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkeys/login/finish",
    request_body = LoginFinishRequest,
    responses(
        (status = 200, description = "Login verified, session issued", body = LoginFinishResponse),
        (status = 400, description = "Verification failed or challenge missing"),
        (status = 429, description = "Rate limited"),
        (status = 500, description = "Session could not be issued")
    ),
    tag = "auth"
)]
/// Finish passkey login: verify the assertion and mint a session.
pub async fn login_finish(
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    identity: Extension<Arc<IdentityClient>>,
    guard: Extension<Arc<GuardConfig>>,
    limiter: Extension<Arc<dyn RateLimiter>>,
    passkey_service: Extension<Arc<PasskeyService>>,
    body: Bytes,
) -> impl IntoResponse {
    let request_id = request_id(&headers);
    let request: LoginFinishRequest = match parse_webauthn_body(&body) {
        Ok(request) => request,
        Err(response) => return *response,
    };

    let email = normalize_email(&request.email);
    let identifier = client_identifier(&headers, Some(peer));
    let rate_headers = match enforce_rate_limit(limiter.as_ref(), guard.login_quota(), &identifier)
        .and_then(|ip_headers| {
            enforce_rate_limit(limiter.as_ref(), guard.login_quota(), &email)
                .map(|_| ip_headers)
        }) {
        Ok(rate_headers) => rate_headers,
        Err(response) => {
            warn!(request_id = %request_id, "passkey login finish rate limited");
            return *response;
        }
    };

    let origin = match extract_origin(&headers, &passkey_service) {
        Ok(origin) => origin,
        Err(response) => return *response,
    };

    let assertion: PublicKeyCredential = match serde_json::from_value(request.response) {
        Ok(assertion) => assertion,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "Invalid WebAuthn payload".to_string())
                .into_response();
        }
    };

    let (user_id, _credential) = match passkey_service.auth_finish(&origin, assertion).await {
        Ok(result) => result,
        Err(err) => return authentication_error_response(&request_id, &err),
    };

    info!(
        user_id = %user_id,
        request_id = %request_id,
        "passkey login verified"
    );

    // Verification succeeded, but the login is only complete once the
    // identity backend mints the session; failure here is a failed login.
    match identity.mint_session(user_id).await {
        Ok(session) => (
            StatusCode::OK,
            rate_headers,
            Json(LoginFinishResponse {
                verified: true,
                session,
            }),
        )
            .into_response(),
        Err(err) => {
            error!(
                user_id = %user_id,
                request_id = %request_id,
                "session issuance failed after verified login: {err}"
            );
            (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string()).into_response()
        }
    }
}

/// Map ceremony failures onto client responses.
///
/// Signature mismatch and counter regression are deliberately
/// indistinguishable from outside; the variant is only logged.
fn authentication_error_response(
    request_id: &str,
    err: &AuthenticationCeremonyError,
) -> axum::response::Response {
    warn!(request_id = %request_id, "passkey login failed: {err:?}");
    match err {
        AuthenticationCeremonyError::ChallengeNotFound
        | AuthenticationCeremonyError::ChallengeExpired => (
            StatusCode::BAD_REQUEST,
            "Login challenge missing or expired".to_string(),
        )
            .into_response(),
        AuthenticationCeremonyError::OriginNotAllowed => {
            (StatusCode::FORBIDDEN, "Origin not allowed".to_string()).into_response()
        }
        AuthenticationCeremonyError::NoCredentialsFound
        | AuthenticationCeremonyError::CredentialNotFound => {
            (StatusCode::BAD_REQUEST, LOGIN_UNAVAILABLE.to_string()).into_response()
        }
        AuthenticationCeremonyError::CounterRegression
        | AuthenticationCeremonyError::Verification(_) => {
            (StatusCode::BAD_REQUEST, LOGIN_FAILED.to_string()).into_response()
        }
        AuthenticationCeremonyError::Store(_) => {
            (StatusCode::INTERNAL_SERVER_ERROR, "Login failed".to_string()).into_response()
        }
    }
}
