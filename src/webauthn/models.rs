use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::{FromRow, Row, postgres::PgRow};
use uuid::Uuid;

/// Ceremony a challenge belongs to; a user has at most one live challenge of
/// each kind.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CeremonyType {
    Registration,
    Authentication,
}

impl CeremonyType {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Registration => "registration",
            Self::Authentication => "authentication",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "registration" => Some(Self::Registration),
            "authentication" => Some(Self::Authentication),
            _ => None,
        }
    }
}

/// A stored passkey: the verified credential blob plus the metadata the
/// dashboard lists. `passkey_data` holds the serialized credential (COSE
/// public key included) and is never returned to clients.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PasskeyCredential {
    pub credential_id: Vec<u8>,
    pub user_id: Uuid,
    pub label: Option<String>,
    pub passkey_data: Vec<u8>,
    pub sign_count: i64,
    pub device_type: String,
    pub backed_up: bool,
    pub created_at: DateTime<Utc>,
    pub last_used_at: Option<DateTime<Utc>>,
}

impl<'r> FromRow<'r, PgRow> for PasskeyCredential {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            credential_id: row.try_get("credential_id")?,
            user_id: row.try_get("user_id")?,
            label: row.try_get("label")?,
            passkey_data: row.try_get("passkey_data")?,
            sign_count: row.try_get("sign_count")?,
            device_type: row.try_get("device_type")?,
            backed_up: row.try_get("backed_up")?,
            created_at: row.try_get("created_at")?,
            last_used_at: row.try_get("last_used_at")?,
        })
    }
}

/// A live ceremony challenge row. `challenge` is the base64url random value
/// the client signs over; `state` is the serialized in-progress ceremony the
/// verifier needs to check the response.
#[derive(Debug, Clone)]
pub struct CeremonyChallenge {
    pub user_id: Uuid,
    pub ceremony: CeremonyType,
    pub challenge: String,
    pub state: Vec<u8>,
    pub expires_at: DateTime<Utc>,
}

impl CeremonyChallenge {
    #[must_use]
    pub fn expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

impl<'r> FromRow<'r, PgRow> for CeremonyChallenge {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        let ceremony: String = row.try_get("ceremony")?;
        let ceremony = CeremonyType::parse(&ceremony).ok_or_else(|| sqlx::Error::Decode(
            format!("unknown ceremony type: {ceremony}").into(),
        ))?;
        Ok(Self {
            user_id: row.try_get("user_id")?,
            ceremony,
            challenge: row.try_get("challenge")?,
            state: row.try_get("state")?,
            expires_at: row.try_get("expires_at")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn ceremony_type_round_trips() {
        for ceremony in [CeremonyType::Registration, CeremonyType::Authentication] {
            assert_eq!(CeremonyType::parse(ceremony.as_str()), Some(ceremony));
        }
        assert_eq!(CeremonyType::parse("mfa"), None);
    }

    #[test]
    fn challenge_expiry_is_inclusive() {
        let now = Utc::now();
        let challenge = CeremonyChallenge {
            user_id: Uuid::new_v4(),
            ceremony: CeremonyType::Registration,
            challenge: "abc".to_string(),
            state: Vec::new(),
            expires_at: now,
        };
        assert!(challenge.expired(now));
        assert!(challenge.expired(now + Duration::seconds(1)));
        assert!(!challenge.expired(now - Duration::seconds(1)));
    }
}
