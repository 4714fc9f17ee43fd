//! Player-facing registration flow on top of the challenge store.

use chrono::{DateTime, Duration, Utc};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::config::{PasswordPolicy, RegistrationConfig};
use crate::models::{Account, ChallengeSelector, NewRegistrationChallenge, RegistrationChallenge};
use crate::services::database::Database;
use crate::services::error::IdentityError;
use crate::utils::password::{check_password_policy, hash_password, Password, PASSWORD_ALGO_ARGON2ID};
use crate::utils::pin::{display_pin, generate_pin, normalize_pin};

/// A freshly issued challenge together with the PIN to relay to the player.
#[derive(Debug, Clone)]
pub struct IssuedChallenge {
    pub challenge: RegistrationChallenge,
    /// PIN in the form shown to players, e.g. `B-012345`.
    pub display_pin: String,
}

#[derive(Clone)]
pub struct RegistrationService {
    db: Database,
    config: RegistrationConfig,
    password_policy: PasswordPolicy,
}

impl RegistrationService {
    pub fn new(db: Database, config: RegistrationConfig, password_policy: PasswordPolicy) -> Self {
        Self {
            db,
            config,
            password_policy,
        }
    }

    /// Stage a password for `commander_id` and issue a claim PIN.
    ///
    /// PIN collisions are retried with a fresh PIN up to the configured number
    /// of attempts.
    #[instrument(skip(self, password))]
    pub async fn begin(
        &self,
        commander_id: u32,
        password: &Password,
        now: DateTime<Utc>,
    ) -> Result<IssuedChallenge, IdentityError> {
        check_password_policy(password, &self.password_policy)?;
        let password_hash = hash_password(password)?;
        let expires_utc = pin_expiry(now, self.config.pin_ttl_seconds)?;

        for attempt in 1..=self.config.pin_attempts {
            let input = NewRegistrationChallenge {
                commander_id,
                pin: generate_pin(),
                password_hash: password_hash.clone(),
                password_algo: PASSWORD_ALGO_ARGON2ID.to_string(),
                expires_utc,
            };

            match self.db.issue_registration_challenge(&input, now).await {
                Ok(challenge) => {
                    return Ok(IssuedChallenge {
                        display_pin: display_pin(&challenge.pin),
                        challenge,
                    });
                }
                Err(IdentityError::PinExists) => {
                    warn!(attempt = attempt, "Registration PIN collided, retrying");
                }
                Err(e) => return Err(e),
            }
        }

        Err(IdentityError::Internal(anyhow::anyhow!(
            "failed to generate unique registration pin after {} attempts",
            self.config.pin_attempts
        )))
    }

    /// Redeem a specific challenge with the PIN as typed by the player.
    #[instrument(skip(self, raw_pin))]
    pub async fn claim(
        &self,
        challenge_id: Uuid,
        raw_pin: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, IdentityError> {
        let pin = normalize_pin(raw_pin).ok_or(IdentityError::ChallengePinMismatch)?;
        let account = self
            .db
            .consume_registration_challenge(ChallengeSelector::Id(challenge_id), &pin, now)
            .await?;
        info!(account_id = %account.id, "Commander claimed");
        Ok(account)
    }

    /// Redeem whichever challenge carries this PIN for `commander_id`.
    #[instrument(skip(self, raw_pin))]
    pub async fn claim_for_commander(
        &self,
        commander_id: u32,
        raw_pin: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, IdentityError> {
        let pin = normalize_pin(raw_pin).ok_or(IdentityError::ChallengeNotFound)?;
        self.db
            .consume_registration_challenge(ChallengeSelector::Commander(commander_id), &pin, now)
            .await
    }

    pub async fn status(
        &self,
        challenge_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RegistrationChallenge, IdentityError> {
        self.db.registration_challenge_status(challenge_id, now).await
    }
}

/// Deadline for a PIN issued at `now`; an out-of-range TTL is an error, never
/// a wrapped or panicking timestamp.
fn pin_expiry(now: DateTime<Utc>, ttl_seconds: i64) -> Result<DateTime<Utc>, IdentityError> {
    Duration::try_seconds(ttl_seconds)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            IdentityError::Internal(anyhow::anyhow!(
                "registration pin ttl out of range: {}",
                ttl_seconds
            ))
        })
}
