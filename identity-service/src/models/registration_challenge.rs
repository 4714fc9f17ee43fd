//! Commander claim challenges.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::services::error::IdentityError;
use crate::utils::codec::u32_from_i64_checked;

/// Lifecycle of a claim challenge. `Pending` is the only non-terminal state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChallengeStatus {
    Pending,
    Consumed,
    Expired,
}

impl ChallengeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Consumed => "consumed",
            Self::Expired => "expired",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl std::fmt::Display for ChallengeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl std::str::FromStr for ChallengeStatus {
    type Err = IdentityError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(Self::Pending),
            "consumed" => Ok(Self::Consumed),
            "expired" => Ok(Self::Expired),
            other => Err(IdentityError::Internal(anyhow::anyhow!(
                "unknown registration challenge status: {}",
                other
            ))),
        }
    }
}

#[derive(Debug, Clone, FromRow)]
pub struct RegistrationChallengeRow {
    pub id: Uuid,
    pub commander_id: i64,
    pub pin: String,
    pub password_hash: String,
    pub password_algo: String,
    pub status: String,
    pub expires_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegistrationChallenge {
    pub id: Uuid,
    pub commander_id: u32,
    #[serde(skip_serializing)]
    pub pin: String,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub password_algo: String,
    pub status: ChallengeStatus,
    pub expires_utc: DateTime<Utc>,
    pub consumed_utc: Option<DateTime<Utc>>,
    pub created_utc: DateTime<Utc>,
}

impl RegistrationChallenge {
    /// Deadline reached; `now == expires_utc` counts as expired.
    pub fn is_past_deadline(&self, now: DateTime<Utc>) -> bool {
        self.expires_utc <= now
    }
}

impl TryFrom<RegistrationChallengeRow> for RegistrationChallenge {
    type Error = IdentityError;

    fn try_from(row: RegistrationChallengeRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            commander_id: u32_from_i64_checked(row.commander_id)?,
            pin: row.pin,
            password_hash: row.password_hash,
            password_algo: row.password_algo,
            status: row.status.parse()?,
            expires_utc: row.expires_utc,
            consumed_utc: row.consumed_utc,
            created_utc: row.created_utc,
        })
    }
}

/// Input for issuing a challenge.
#[derive(Debug, Clone)]
pub struct NewRegistrationChallenge {
    pub commander_id: u32,
    pub pin: String,
    pub password_hash: String,
    pub password_algo: String,
    pub expires_utc: DateTime<Utc>,
}

/// Which challenge a redemption targets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChallengeSelector {
    /// A specific challenge; the supplied PIN must match it.
    Id(Uuid),
    /// The challenge carrying the supplied PIN, which must belong to this commander.
    Commander(u32),
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn row(status: &str) -> RegistrationChallengeRow {
        let now = Utc::now();
        RegistrationChallengeRow {
            id: Uuid::new_v4(),
            commander_id: 1001,
            pin: "123456".to_string(),
            password_hash: "hash".to_string(),
            password_algo: "argon2id".to_string(),
            status: status.to_string(),
            expires_utc: now + Duration::minutes(5),
            consumed_utc: None,
            created_utc: now,
        }
    }

    #[test]
    fn test_status_round_trip() {
        for status in [
            ChallengeStatus::Pending,
            ChallengeStatus::Consumed,
            ChallengeStatus::Expired,
        ] {
            assert_eq!(status.as_str().parse::<ChallengeStatus>().unwrap(), status);
        }
        assert!("claimed".parse::<ChallengeStatus>().is_err());
        assert!(!ChallengeStatus::Pending.is_terminal());
        assert!(ChallengeStatus::Expired.is_terminal());
    }

    #[test]
    fn test_deadline_is_inclusive() {
        let challenge = RegistrationChallenge::try_from(row("pending")).unwrap();
        assert!(!challenge.is_past_deadline(challenge.expires_utc - Duration::seconds(1)));
        assert!(challenge.is_past_deadline(challenge.expires_utc));
    }

    #[test]
    fn test_row_with_bad_commander_rejected() {
        let mut r = row("pending");
        r.commander_id = 1 << 40;
        assert!(matches!(
            RegistrationChallenge::try_from(r),
            Err(IdentityError::OutOfRange(_))
        ));
    }

    #[test]
    fn test_pin_not_serialized() {
        let challenge = RegistrationChallenge::try_from(row("pending")).unwrap();
        let json = serde_json::to_value(&challenge).unwrap();
        assert!(json.get("pin").is_none());
        assert!(json.get("password_hash").is_none());
        assert_eq!(json["status"], "pending");
    }
}
