//! Passkey ceremony orchestrator.
//!
//! Flow Overview:
//! 1) Start issues ceremony options through the verification primitive and
//!    persists the challenge + in-progress state as a single-use row.
//! 2) The browser signs out of band.
//! 3) Finish consumes the row (compare-and-delete), checks expiry and that
//!    the client is answering the live challenge, then verifies the
//!    cryptographic response.
//! 4) Registration upserts the credential; authentication enforces the
//!    monotonic signature counter before persisting the new one.
//!
//! Security boundaries:
//! - Challenges are single-use and superseded by a newer Start for the same
//!   (user, ceremony type); concurrent finishes cannot both win.
//! - A non-increasing signature counter is treated as a cloned or replayed
//!   authenticator and hard-fails verification.
//! - A credential id colliding with another user's registration is rejected,
//!   never re-homed.

use crate::webauthn::{
    config::PasskeyConfig,
    models::{CeremonyType, PasskeyCredential},
    repo::{ChallengeRepo, CredentialRepo},
};
use anyhow::{Context, Result, anyhow};
use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use chrono::Utc;
use serde::Deserialize;
use sqlx::PgPool;
use std::collections::HashMap;
use uuid::Uuid;
use webauthn_rs::prelude::*;

const SINGLE_DEVICE: &str = "single_device";
const MULTI_DEVICE: &str = "multi_device";

#[derive(Debug)]
pub enum RegistrationCeremonyError {
    ChallengeNotFound,
    ChallengeExpired,
    OriginNotAllowed,
    CredentialOwnerConflict,
    Verification(WebauthnError),
    Store(anyhow::Error),
}

#[derive(Debug)]
pub enum AuthenticationCeremonyError {
    NoCredentialsFound,
    CredentialNotFound,
    ChallengeNotFound,
    ChallengeExpired,
    OriginNotAllowed,
    CounterRegression,
    Verification(WebauthnError),
    Store(anyhow::Error),
}

pub struct PasskeyService {
    config: PasskeyConfig,
    webauthn_by_origin: HashMap<String, Webauthn>,
    pool: PgPool,
}

impl PasskeyService {
    /// Create a new passkey service.
    ///
    /// # Errors
    /// Returns error if the `WebAuthn` builder fails for a configured origin.
    pub fn new(config: PasskeyConfig, pool: PgPool) -> Result<Self> {
        let mut webauthn_by_origin = HashMap::new();

        for origin in config.allowed_origins() {
            let rp_origin_url =
                Url::parse(origin).with_context(|| format!("Invalid passkey origin: {origin}"))?;
            let webauthn = WebauthnBuilder::new(config.rp_id(), &rp_origin_url)?
                .rp_name(config.rp_name())
                .build()?;
            webauthn_by_origin.insert(origin.clone(), webauthn);
        }

        Ok(Self {
            config,
            webauthn_by_origin,
            pool,
        })
    }

    #[must_use]
    pub fn config(&self) -> &PasskeyConfig {
        &self.config
    }

    /// Match a request `Origin` against the configured ceremony origins.
    #[must_use]
    pub fn match_origin(&self, origin: &str) -> Option<String> {
        let normalized = crate::security::normalize_origin(origin).ok()?;
        if self.webauthn_by_origin.contains_key(&normalized) {
            Some(normalized)
        } else {
            None
        }
    }

    fn webauthn_for_origin(&self, origin: &str) -> Result<&Webauthn> {
        self.webauthn_by_origin
            .get(origin)
            .ok_or_else(|| anyhow!("Passkey origin not allowed: {origin}"))
    }

    fn ttl_seconds(&self) -> i64 {
        i64::try_from(self.config.challenge_ttl().as_secs()).unwrap_or(i64::MAX)
    }

    /// Begin registration: build ceremony options excluding the user's
    /// existing credentials and persist the challenge, superseding any prior
    /// live registration challenge for this user.
    ///
    /// # Errors
    /// Returns error if the store or the `WebAuthn` primitive fails.
    pub async fn register_begin(
        &self,
        user_id: Uuid,
        user_name: &str,
        user_display_name: &str,
        origin: &str,
    ) -> Result<CreationChallengeResponse> {
        let webauthn = self.webauthn_for_origin(origin)?;

        let existing = CredentialRepo::list_for_user(&self.pool, user_id).await?;
        let exclude_credentials: Vec<CredentialID> = existing
            .into_iter()
            .map(|credential| credential.credential_id.into())
            .collect();

        let (challenge, registration) = webauthn.start_passkey_registration(
            user_id,
            user_name,
            user_display_name,
            Some(exclude_credentials),
        )?;

        let challenge_value = encode_challenge(&challenge.public_key.challenge);
        let state = serde_json::to_vec(&registration)
            .context("Failed to serialize registration state")?;
        ChallengeRepo::begin(
            &self.pool,
            user_id,
            CeremonyType::Registration,
            &challenge_value,
            &state,
            self.ttl_seconds(),
        )
        .await?;

        Ok(challenge)
    }

    /// Finish registration: consume the live challenge, verify the
    /// attestation response, and upsert the credential.
    ///
    /// # Errors
    /// Returns a ceremony error describing which precondition failed; all
    /// variants map to one generic client-facing message.
    pub async fn register_finish(
        &self,
        user_id: Uuid,
        origin: &str,
        label: Option<&str>,
        response: RegisterPublicKeyCredential,
    ) -> Result<PasskeyCredential, RegistrationCeremonyError> {
        let webauthn = self
            .webauthn_for_origin(origin)
            .map_err(|_| RegistrationCeremonyError::OriginNotAllowed)?;

        let row = ChallengeRepo::consume(&self.pool, user_id, CeremonyType::Registration)
            .await
            .map_err(RegistrationCeremonyError::Store)?
            .ok_or(RegistrationCeremonyError::ChallengeNotFound)?;

        if row.expired(Utc::now()) {
            return Err(RegistrationCeremonyError::ChallengeExpired);
        }

        // The client echoes the challenge it signed over; answering a
        // superseded challenge means the ceremony it belongs to is gone.
        let echoed = echoed_challenge(response.response.client_data_json.as_ref());
        if echoed.as_deref() != Some(row.challenge.as_str()) {
            return Err(RegistrationCeremonyError::ChallengeNotFound);
        }

        let state: PasskeyRegistration = serde_json::from_slice(&row.state)
            .map_err(|err| RegistrationCeremonyError::Store(err.into()))?;
        let passkey = webauthn
            .finish_passkey_registration(&response, &state)
            .map_err(RegistrationCeremonyError::Verification)?;

        let passkey_data = serde_json::to_vec(&passkey)
            .map_err(|err| RegistrationCeremonyError::Store(err.into()))?;
        let stored = CredentialRepo::upsert_registration(
            &self.pool,
            user_id,
            passkey.cred_id().as_slice(),
            &passkey_data,
            label,
            SINGLE_DEVICE,
        )
        .await
        .map_err(RegistrationCeremonyError::Store)?;

        stored.ok_or(RegistrationCeremonyError::CredentialOwnerConflict)
    }

    /// Begin authentication for every account resolved from the caller's
    /// email: one challenge over the combined allow-list, fanned out as a
    /// row per owning user.
    ///
    /// # Errors
    /// Returns `NoCredentialsFound` when none of the accounts own a passkey.
    pub async fn auth_begin(
        &self,
        user_ids: &[Uuid],
        origin: &str,
    ) -> Result<RequestChallengeResponse, AuthenticationCeremonyError> {
        let webauthn = self
            .webauthn_for_origin(origin)
            .map_err(|_| AuthenticationCeremonyError::OriginNotAllowed)?;

        let rows = CredentialRepo::list_for_users(&self.pool, user_ids)
            .await
            .map_err(AuthenticationCeremonyError::Store)?;
        if rows.is_empty() {
            return Err(AuthenticationCeremonyError::NoCredentialsFound);
        }

        let mut owners: Vec<Uuid> = Vec::new();
        let mut passkeys: Vec<Passkey> = Vec::with_capacity(rows.len());
        for row in &rows {
            if !owners.contains(&row.user_id) {
                owners.push(row.user_id);
            }
            let passkey = serde_json::from_slice(&row.passkey_data)
                .map_err(|err| AuthenticationCeremonyError::Store(err.into()))?;
            passkeys.push(passkey);
        }

        let (challenge, authentication) = webauthn
            .start_passkey_authentication(&passkeys)
            .map_err(AuthenticationCeremonyError::Verification)?;

        let challenge_value = encode_challenge(&challenge.public_key.challenge);
        let state = serde_json::to_vec(&authentication)
            .map_err(|err| AuthenticationCeremonyError::Store(err.into()))?;
        ChallengeRepo::begin_many(
            &self.pool,
            &owners,
            CeremonyType::Authentication,
            &challenge_value,
            &state,
            self.ttl_seconds(),
        )
        .await
        .map_err(AuthenticationCeremonyError::Store)?;

        Ok(challenge)
    }

    /// Finish authentication: the assertion names one credential; consume
    /// its owner's live challenge, verify the signature, and enforce the
    /// monotonic counter before persisting.
    ///
    /// # Errors
    /// Returns a ceremony error; counter regressions and signature failures
    /// surface to clients as the same generic verification failure.
    pub async fn auth_finish(
        &self,
        origin: &str,
        response: PublicKeyCredential,
    ) -> Result<(Uuid, PasskeyCredential), AuthenticationCeremonyError> {
        let webauthn = self
            .webauthn_for_origin(origin)
            .map_err(|_| AuthenticationCeremonyError::OriginNotAllowed)?;

        let raw_id: &[u8] = response.raw_id.as_ref();
        let credential_id = raw_id.to_vec();
        let credential = CredentialRepo::get(&self.pool, &credential_id)
            .await
            .map_err(AuthenticationCeremonyError::Store)?
            .ok_or(AuthenticationCeremonyError::CredentialNotFound)?;

        let row = ChallengeRepo::consume(&self.pool, credential.user_id, CeremonyType::Authentication)
            .await
            .map_err(AuthenticationCeremonyError::Store)?
            .ok_or(AuthenticationCeremonyError::ChallengeNotFound)?;

        if row.expired(Utc::now()) {
            return Err(AuthenticationCeremonyError::ChallengeExpired);
        }

        let echoed = echoed_challenge(response.response.client_data_json.as_ref());
        if echoed.as_deref() != Some(row.challenge.as_str()) {
            return Err(AuthenticationCeremonyError::ChallengeNotFound);
        }

        let state: PasskeyAuthentication = serde_json::from_slice(&row.state)
            .map_err(|err| AuthenticationCeremonyError::Store(err.into()))?;
        let auth_result = webauthn
            .finish_passkey_authentication(&response, &state)
            .map_err(AuthenticationCeremonyError::Verification)?;

        let new_counter = i64::from(auth_result.counter());
        if !counter_accepts(credential.sign_count, new_counter) {
            return Err(AuthenticationCeremonyError::CounterRegression);
        }

        let mut passkey: Passkey = serde_json::from_slice(&credential.passkey_data)
            .map_err(|err| AuthenticationCeremonyError::Store(err.into()))?;
        passkey.update_credential(&auth_result);
        let passkey_data = serde_json::to_vec(&passkey)
            .map_err(|err| AuthenticationCeremonyError::Store(err.into()))?;

        let device_type = if auth_result.backup_eligible() {
            MULTI_DEVICE
        } else {
            SINGLE_DEVICE
        };
        CredentialRepo::record_authentication(
            &self.pool,
            &credential_id,
            new_counter,
            &passkey_data,
            device_type,
            auth_result.backup_state(),
        )
        .await
        .map_err(AuthenticationCeremonyError::Store)?;

        let updated = PasskeyCredential {
            sign_count: new_counter,
            device_type: device_type.to_string(),
            backed_up: auth_result.backup_state(),
            last_used_at: Some(Utc::now()),
            ..credential
        };
        Ok((updated.user_id, updated))
    }
}

/// Base64url encoding of the random challenge value the client signs over,
/// matching the encoding the browser echoes back in `clientDataJSON`.
fn encode_challenge(challenge: &Base64UrlSafeData) -> String {
    let bytes: &[u8] = challenge.as_ref();
    URL_SAFE_NO_PAD.encode(bytes)
}

/// Signature counter acceptance: strictly increasing, except that
/// authenticators which never implement a counter report zero forever.
/// Anything else non-increasing indicates a cloned or replayed authenticator.
#[must_use]
pub(crate) fn counter_accepts(stored: i64, reported: i64) -> bool {
    if stored == 0 && reported == 0 {
        return true;
    }
    reported > stored
}

#[derive(Deserialize)]
struct ClientData {
    challenge: String,
}

/// Pull the challenge the client actually signed over out of the (plain
/// JSON) `clientDataJSON` payload.
fn echoed_challenge(client_data_json: &[u8]) -> Option<String> {
    serde_json::from_slice::<ClientData>(client_data_json)
        .ok()
        .map(|data| data.challenge)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counter_must_strictly_increase() {
        assert!(counter_accepts(5, 6));
        assert!(counter_accepts(0, 1));
        assert!(!counter_accepts(5, 5));
        assert!(!counter_accepts(5, 4));
        assert!(!counter_accepts(1, 0));
    }

    #[test]
    fn counterless_authenticators_stay_at_zero() {
        assert!(counter_accepts(0, 0));
    }

    #[test]
    fn echoed_challenge_reads_client_data() {
        let payload = serde_json::json!({
            "type": "webauthn.get",
            "challenge": "dGVzdC1jaGFsbGVuZ2U",
            "origin": "https://app.tapmap.dev",
        });
        let bytes = serde_json::to_vec(&payload).expect("serialize client data");
        assert_eq!(
            echoed_challenge(&bytes),
            Some("dGVzdC1jaGFsbGVuZ2U".to_string())
        );
    }

    #[test]
    fn echoed_challenge_rejects_garbage() {
        assert_eq!(echoed_challenge(b"not json"), None);
        assert_eq!(echoed_challenge(br#"{"no_challenge":true}"#), None);
    }
}
