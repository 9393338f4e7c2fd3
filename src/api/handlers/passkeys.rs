//! Passkey registration endpoints for authenticated users.
//!
//! Flow Overview:
//! 1) `register_start` issues creation options bound to the session user and
//!    persists the single live registration challenge.
//! 2) The browser signs the challenge out of band.
//! 3) `register_finish` consumes the challenge, verifies the attestation,
//!    and upserts the credential.
//!
//! Security boundaries:
//! - Both endpoints require a valid bearer session.
//! - Challenges are single-use; a newer start supersedes an older one.
//! - Responses never include the stored public key, only a summary.

use crate::api::handlers::{
    Principal, enforce_rate_limit, extract_origin, parse_webauthn_body, request_id,
    require_session,
};
use crate::identity::IdentityClient;
use crate::security::{GuardConfig, client_identifier, rate_limit::RateLimiter};
use crate::webauthn::{PasskeyCredential, PasskeyService, RegistrationCeremonyError};
use axum::{
    Json,
    body::Bytes,
    extract::{ConnectInfo, Extension},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use std::net::SocketAddr;
use std::sync::Arc;
use tracing::{error, info, warn};
use utoipa::ToSchema;
use webauthn_rs::prelude::RegisterPublicKeyCredential;

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterStartResponse {
    /// Ceremony options for `navigator.credentials.create`.
    pub options: serde_json::Value,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RegisterFinishRequest {
    pub response: serde_json::Value,
    pub friendly_name: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct RegisterFinishResponse {
    pub verified: bool,
    pub credential: CredentialSummary,
}

/// Client-safe view of a stored credential. Never carries the public key.
#[derive(Debug, Serialize, ToSchema)]
pub struct CredentialSummary {
    pub id: String,
    pub friendly_name: Option<String>,
    pub device_type: String,
    pub backed_up: bool,
    pub created_at: String,
    pub last_used_at: Option<String>,
}

impl CredentialSummary {
    pub(crate) fn from_credential(credential: &PasskeyCredential) -> Self {
        Self {
            id: URL_SAFE_NO_PAD.encode(&credential.credential_id),
            friendly_name: credential.label.clone(),
            device_type: credential.device_type.clone(),
            backed_up: credential.backed_up,
            created_at: credential.created_at.to_rfc3339(),
            last_used_at: credential.last_used_at.map(|ts| ts.to_rfc3339()),
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkeys/register/start",
    responses(
        (status = 200, description = "Registration options issued", body = RegisterStartResponse),
        (status = 401, description = "Unauthorized"),
        (status = 429, description = "Rate limited"),
        (status = 500, description = "Registration could not be started")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
/// Issue passkey creation options for the session user.
pub async fn register_start(
    headers: HeaderMap,
    ConnectInfo(peer): ConnectInfo<SocketAddr>,
    identity: Extension<Arc<IdentityClient>>,
    guard: Extension<Arc<GuardConfig>>,
    limiter: Extension<Arc<dyn RateLimiter>>,
    passkey_service: Extension<Arc<PasskeyService>>,
) -> impl IntoResponse {
    let request_id = request_id(&headers);
    let principal = match require_session(&headers, &identity).await {
        Ok(principal) => principal,
        Err(response) => return *response,
    };

    let identifier = client_identifier(&headers, Some(peer));
    let rate_headers =
        match enforce_rate_limit(limiter.as_ref(), guard.register_quota(), &identifier) {
            Ok(rate_headers) => rate_headers,
            Err(response) => {
                warn!(
                    user_id = %principal.user_id,
                    request_id = %request_id,
                    "passkey registration start rate limited"
                );
                return *response;
            }
        };

    let origin = match extract_origin(&headers, &passkey_service) {
        Ok(origin) => origin,
        Err(response) => return *response,
    };

    info!(
        user_id = %principal.user_id,
        request_id = %request_id,
        "passkey registration start requested"
    );

    let display_name = principal.email.clone();
    match passkey_service
        .register_begin(principal.user_id, &principal.email, &display_name, &origin)
        .await
    {
        Ok(options) => (
            StatusCode::OK,
            rate_headers,
            Json(RegisterStartResponse {
                options: serde_json::to_value(options).unwrap_or_default(),
            }),
        )
            .into_response(),
        Err(err) => {
            error!(
                user_id = %principal.user_id,
                request_id = %request_id,
                "failed to start passkey registration: {err}"
            );
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "Registration failed".to_string(),
            )
                .into_response()
        }
    }
}

#[utoipa::path(
    post,
    path = "/v1/auth/passkeys/register/finish",
    request_body = RegisterFinishRequest,
    responses(
        (status = 200, description = "Passkey registered", body = RegisterFinishResponse),
        (status = 400, description = "Verification failed or challenge missing"),
        (status = 401, description = "Unauthorized"),
        (status = 413, description = "Payload too large")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
/// Verify the attestation response and persist the credential.
pub async fn register_finish(
    headers: HeaderMap,
    identity: Extension<Arc<IdentityClient>>,
    passkey_service: Extension<Arc<PasskeyService>>,
    body: Bytes,
) -> impl IntoResponse {
    let request_id = request_id(&headers);
    let principal = match require_session(&headers, &identity).await {
        Ok(principal) => principal,
        Err(response) => return *response,
    };

    let request: RegisterFinishRequest = match parse_webauthn_body(&body) {
        Ok(request) => request,
        Err(response) => return *response,
    };

    let origin = match extract_origin(&headers, &passkey_service) {
        Ok(origin) => origin,
        Err(response) => return *response,
    };

    let attestation: RegisterPublicKeyCredential = match serde_json::from_value(request.response) {
        Ok(attestation) => attestation,
        Err(_) => {
            return (StatusCode::BAD_REQUEST, "Invalid WebAuthn payload".to_string())
                .into_response();
        }
    };

    let label = request
        .friendly_name
        .as_deref()
        .map(str::trim)
        .filter(|name| !name.is_empty());

    match passkey_service
        .register_finish(principal.user_id, &origin, label, attestation)
        .await
    {
        Ok(credential) => {
            info!(
                user_id = %principal.user_id,
                request_id = %request_id,
                "passkey registration succeeded"
            );
            (
                StatusCode::OK,
                Json(RegisterFinishResponse {
                    verified: true,
                    credential: CredentialSummary::from_credential(&credential),
                }),
            )
                .into_response()
        }
        Err(err) => registration_error_response(&principal, &request_id, &err),
    }
}

/// Map ceremony errors onto client responses.
///
/// The distinction between variants is logged but never surfaced: clients
/// get enough to restart the ceremony and nothing more.
fn registration_error_response(
    principal: &Principal,
    request_id: &str,
    err: &RegistrationCeremonyError,
) -> axum::response::Response {
    warn!(
        user_id = %principal.user_id,
        request_id = %request_id,
        "passkey registration failed: {err:?}"
    );
    match err {
        RegistrationCeremonyError::ChallengeNotFound
        | RegistrationCeremonyError::ChallengeExpired => (
            StatusCode::BAD_REQUEST,
            "Registration challenge missing or expired".to_string(),
        )
            .into_response(),
        RegistrationCeremonyError::OriginNotAllowed => {
            (StatusCode::FORBIDDEN, "Origin not allowed".to_string()).into_response()
        }
        RegistrationCeremonyError::CredentialOwnerConflict
        | RegistrationCeremonyError::Verification(_) => (
            StatusCode::BAD_REQUEST,
            "Registration verification failed".to_string(),
        )
            .into_response(),
        RegistrationCeremonyError::Store(_) => (
            StatusCode::INTERNAL_SERVER_ERROR,
            "Registration failed".to_string(),
        )
            .into_response(),
    }
}
