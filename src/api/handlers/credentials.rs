//! Credential self-service for authenticated users: list, rename, delete.

use crate::api::handlers::{
    decode_credential_id, passkeys::CredentialSummary, request_id, require_session,
};
use crate::identity::IdentityClient;
use crate::webauthn::CredentialRepo;
use axum::{
    Json,
    extract::{Extension, Path},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Arc;
use tracing::{error, info};
use utoipa::ToSchema;

#[derive(Debug, Serialize, ToSchema)]
pub struct CredentialListResponse {
    pub credentials: Vec<CredentialSummary>,
}

#[derive(Debug, Deserialize, ToSchema)]
#[serde(deny_unknown_fields)]
pub struct RenameCredentialRequest {
    pub friendly_name: String,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct SuccessResponse {
    pub success: bool,
}

#[utoipa::path(
    get,
    path = "/v1/auth/passkeys",
    responses(
        (status = 200, description = "Registered passkeys", body = CredentialListResponse),
        (status = 401, description = "Unauthorized")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
/// List the session user's passkeys.
pub async fn list_credentials(
    headers: HeaderMap,
    pool: Extension<PgPool>,
    identity: Extension<Arc<IdentityClient>>,
) -> impl IntoResponse {
    let principal = match require_session(&headers, &identity).await {
        Ok(principal) => principal,
        Err(response) => return *response,
    };

    match CredentialRepo::list_for_user(&pool, principal.user_id).await {
        Ok(rows) => {
            let credentials = rows
                .iter()
                .map(CredentialSummary::from_credential)
                .collect::<Vec<_>>();
            (StatusCode::OK, Json(CredentialListResponse { credentials })).into_response()
        }
        Err(err) => {
            error!(
                user_id = %principal.user_id,
                request_id = %request_id(&headers),
                "passkey list failed: {err}"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    patch,
    path = "/v1/auth/passkeys/{credential_id}",
    params(("credential_id" = String, Path, description = "Base64url credential id")),
    request_body = RenameCredentialRequest,
    responses(
        (status = 200, description = "Passkey renamed", body = SuccessResponse),
        (status = 400, description = "Invalid credential id or name"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
/// Rename a passkey owned by the session user.
pub async fn rename_credential(
    Path(credential_id_b64): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    identity: Extension<Arc<IdentityClient>>,
    payload: Option<Json<RenameCredentialRequest>>,
) -> impl IntoResponse {
    let principal = match require_session(&headers, &identity).await {
        Ok(principal) => principal,
        Err(response) => return *response,
    };

    let Some(Json(request)) = payload else {
        return (StatusCode::BAD_REQUEST, "Missing payload".to_string()).into_response();
    };
    let friendly_name = request.friendly_name.trim();
    if friendly_name.is_empty() {
        return (StatusCode::BAD_REQUEST, "Name must not be empty".to_string()).into_response();
    }

    let credential_id = match decode_credential_id(&credential_id_b64) {
        Ok(credential_id) => credential_id,
        Err(response) => return *response,
    };

    match CredentialRepo::rename(&pool, principal.user_id, &credential_id, friendly_name).await {
        Ok(true) => {
            info!(
                user_id = %principal.user_id,
                request_id = %request_id(&headers),
                "passkey renamed"
            );
            (StatusCode::OK, Json(SuccessResponse { success: true })).into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(
                user_id = %principal.user_id,
                request_id = %request_id(&headers),
                "passkey rename failed: {err}"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[utoipa::path(
    delete,
    path = "/v1/auth/passkeys/{credential_id}",
    params(("credential_id" = String, Path, description = "Base64url credential id")),
    responses(
        (status = 200, description = "Passkey deleted", body = SuccessResponse),
        (status = 400, description = "Invalid credential id"),
        (status = 401, description = "Unauthorized"),
        (status = 404, description = "Not found")
    ),
    security(("bearer" = [])),
    tag = "auth"
)]
/// Delete a passkey owned by the session user.
pub async fn delete_credential(
    Path(credential_id_b64): Path<String>,
    headers: HeaderMap,
    pool: Extension<PgPool>,
    identity: Extension<Arc<IdentityClient>>,
) -> impl IntoResponse {
    let principal = match require_session(&headers, &identity).await {
        Ok(principal) => principal,
        Err(response) => return *response,
    };

    let credential_id = match decode_credential_id(&credential_id_b64) {
        Ok(credential_id) => credential_id,
        Err(response) => return *response,
    };

    match CredentialRepo::delete(&pool, principal.user_id, &credential_id).await {
        Ok(true) => {
            info!(
                user_id = %principal.user_id,
                request_id = %request_id(&headers),
                "passkey deleted"
            );
            (StatusCode::OK, Json(SuccessResponse { success: true })).into_response()
        }
        Ok(false) => StatusCode::NOT_FOUND.into_response(),
        Err(err) => {
            error!(
                user_id = %principal.user_id,
                request_id = %request_id(&headers),
                "passkey delete failed: {err}"
            );
            StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}
