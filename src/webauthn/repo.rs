use crate::webauthn::models::{CeremonyChallenge, CeremonyType, PasskeyCredential};
use anyhow::{Context, Result};
use sqlx::PgPool;
use uuid::Uuid;

pub struct CredentialRepo;

impl CredentialRepo {
    /// Lists all passkeys for a user, newest first.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn list_for_user(pool: &PgPool, user_id: Uuid) -> Result<Vec<PasskeyCredential>> {
        sqlx::query_as::<_, PasskeyCredential>(
            "SELECT * FROM passkey_credentials WHERE user_id = $1 ORDER BY created_at DESC",
        )
        .bind(user_id)
        .fetch_all(pool)
        .await
        .context("Failed to list passkey credentials")
    }

    /// Lists passkeys across a set of users (login allow-list fan-in).
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn list_for_users(
        pool: &PgPool,
        user_ids: &[Uuid],
    ) -> Result<Vec<PasskeyCredential>> {
        sqlx::query_as::<_, PasskeyCredential>(
            "SELECT * FROM passkey_credentials WHERE user_id = ANY($1) ORDER BY created_at DESC",
        )
        .bind(user_ids)
        .fetch_all(pool)
        .await
        .context("Failed to list passkey credentials for users")
    }

    /// Gets a single passkey by its globally unique credential id.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn get(pool: &PgPool, credential_id: &[u8]) -> Result<Option<PasskeyCredential>> {
        sqlx::query_as::<_, PasskeyCredential>(
            "SELECT * FROM passkey_credentials WHERE credential_id = $1",
        )
        .bind(credential_id)
        .fetch_optional(pool)
        .await
        .context("Failed to fetch passkey credential")
    }

    /// Upserts a verified registration, keyed by credential id.
    ///
    /// Re-registration by the same owner overwrites the row (idempotent, one
    /// row per credential id). A credential id already owned by a different
    /// user is left untouched and `None` is returned; the conflicting write
    /// loses rather than re-homing someone else's credential.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn upsert_registration(
        pool: &PgPool,
        user_id: Uuid,
        credential_id: &[u8],
        passkey_data: &[u8],
        label: Option<&str>,
        device_type: &str,
    ) -> Result<Option<PasskeyCredential>> {
        sqlx::query_as::<_, PasskeyCredential>(
            r"
            INSERT INTO passkey_credentials
                (credential_id, user_id, label, passkey_data, sign_count, device_type, backed_up)
            VALUES ($1, $2, $3, $4, 0, $5, FALSE)
            ON CONFLICT (credential_id) DO UPDATE
                SET label = EXCLUDED.label,
                    passkey_data = EXCLUDED.passkey_data,
                    sign_count = EXCLUDED.sign_count
                WHERE passkey_credentials.user_id = EXCLUDED.user_id
            RETURNING *
            ",
        )
        .bind(credential_id)
        .bind(user_id)
        .bind(label)
        .bind(passkey_data)
        .bind(device_type)
        .fetch_optional(pool)
        .await
        .context("Failed to upsert passkey credential")
    }

    /// Persists the outcome of a verified authentication: the new signature
    /// counter, the refreshed credential blob, backup metadata, and
    /// `last_used_at`.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn record_authentication(
        pool: &PgPool,
        credential_id: &[u8],
        sign_count: i64,
        passkey_data: &[u8],
        device_type: &str,
        backed_up: bool,
    ) -> Result<()> {
        sqlx::query(
            r"
            UPDATE passkey_credentials
            SET sign_count = $1,
                passkey_data = $2,
                device_type = $3,
                backed_up = $4,
                last_used_at = NOW()
            WHERE credential_id = $5
            ",
        )
        .bind(sign_count)
        .bind(passkey_data)
        .bind(device_type)
        .bind(backed_up)
        .bind(credential_id)
        .execute(pool)
        .await
        .context("Failed to record passkey authentication")?;

        Ok(())
    }

    /// Renames a passkey owned by the user.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn rename(
        pool: &PgPool,
        user_id: Uuid,
        credential_id: &[u8],
        label: &str,
    ) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE passkey_credentials SET label = $1 WHERE user_id = $2 AND credential_id = $3",
        )
        .bind(label)
        .bind(user_id)
        .bind(credential_id)
        .execute(pool)
        .await
        .context("Failed to rename passkey credential")?;
        Ok(result.rows_affected() > 0)
    }

    /// Deletes a passkey owned by the user.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn delete(pool: &PgPool, user_id: Uuid, credential_id: &[u8]) -> Result<bool> {
        let result = sqlx::query(
            "DELETE FROM passkey_credentials WHERE user_id = $1 AND credential_id = $2",
        )
        .bind(user_id)
        .bind(credential_id)
        .execute(pool)
        .await
        .context("Failed to delete passkey credential")?;
        Ok(result.rows_affected() > 0)
    }
}

pub struct ChallengeRepo;

impl ChallengeRepo {
    /// Stores a fresh challenge for (user, ceremony), superseding any live
    /// one. The primary key keeps at most one row per pair, so two
    /// concurrent starts leave exactly one winner.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn begin(
        pool: &PgPool,
        user_id: Uuid,
        ceremony: CeremonyType,
        challenge: &str,
        state: &[u8],
        ttl_seconds: i64,
    ) -> Result<()> {
        sqlx::query(upsert_challenge_sql())
            .bind(user_id)
            .bind(ceremony.as_str())
            .bind(challenge)
            .bind(state)
            .bind(ttl_seconds)
            .execute(pool)
            .await
            .context("Failed to store ceremony challenge")?;

        Ok(())
    }

    /// Fans one challenge out to several users in a single transaction
    /// (login by email may resolve to more than one account).
    ///
    /// # Errors
    /// Returns error if the transaction fails.
    pub async fn begin_many(
        pool: &PgPool,
        user_ids: &[Uuid],
        ceremony: CeremonyType,
        challenge: &str,
        state: &[u8],
        ttl_seconds: i64,
    ) -> Result<()> {
        let mut tx = pool.begin().await.context("begin challenge transaction")?;
        for user_id in user_ids {
            sqlx::query(upsert_challenge_sql())
                .bind(user_id)
                .bind(ceremony.as_str())
                .bind(challenge)
                .bind(state)
                .bind(ttl_seconds)
                .execute(&mut *tx)
                .await
                .context("Failed to store fanned-out challenge")?;
        }
        tx.commit().await.context("commit challenge transaction")?;

        Ok(())
    }

    /// Consumes the live challenge for (user, ceremony).
    ///
    /// `DELETE ... RETURNING` is the compare-and-delete: of two concurrent
    /// finishes, only one gets the row back.
    ///
    /// # Errors
    /// Returns error if the database query fails.
    pub async fn consume(
        pool: &PgPool,
        user_id: Uuid,
        ceremony: CeremonyType,
    ) -> Result<Option<CeremonyChallenge>> {
        sqlx::query_as::<_, CeremonyChallenge>(
            r"
            DELETE FROM passkey_challenges
            WHERE user_id = $1 AND ceremony = $2
            RETURNING user_id, ceremony, challenge, state, expires_at
            ",
        )
        .bind(user_id)
        .bind(ceremony.as_str())
        .fetch_optional(pool)
        .await
        .context("Failed to consume ceremony challenge")
    }
}

const fn upsert_challenge_sql() -> &'static str {
    r"
    INSERT INTO passkey_challenges (user_id, ceremony, challenge, state, expires_at)
    VALUES ($1, $2, $3, $4, NOW() + ($5 * INTERVAL '1 second'))
    ON CONFLICT (user_id, ceremony) DO UPDATE
        SET challenge = EXCLUDED.challenge,
            state = EXCLUDED.state,
            expires_at = EXCLUDED.expires_at,
            created_at = NOW()
    "
}
