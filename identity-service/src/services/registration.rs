//! Commander claim challenges.
//!
//! A challenge is issued for a commander id with a staged password hash and a
//! short PIN. Redeeming it creates the account and links the player role.
//! `pending` moves to `consumed` on success or to `expired` on supersession
//! or timeout; both are terminal.

use chrono::{DateTime, Utc};
use sqlx::{Postgres, Transaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::authz::ROLE_PLAYER;
use crate::models::{
    Account, ChallengeSelector, ChallengeStatus, NewAccount, NewRegistrationChallenge,
    RegistrationChallenge, RegistrationChallengeRow,
};
use crate::services::accounts::{commander_has_account, insert_account};
use crate::services::authorization::link_role;
use crate::services::database::{db_error, ensure_affected, Database};
use crate::services::error::IdentityError;
use crate::services::metrics::{DB_QUERY_DURATION, REGISTRATION_CLAIMS_TOTAL};
use crate::utils::codec::u32_to_i64;

impl Database {
    /// Issue a pending challenge for `commander_id`, expiring any challenge
    /// still pending for it.
    #[instrument(skip(self, input), fields(commander_id = input.commander_id))]
    pub async fn issue_registration_challenge(
        &self,
        input: &NewRegistrationChallenge,
        now: DateTime<Utc>,
    ) -> Result<RegistrationChallenge, IdentityError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["issue_registration_challenge"])
            .start_timer();

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        if commander_has_account(&mut *tx, input.commander_id).await? {
            return Err(IdentityError::AccountExists);
        }

        let superseded = sqlx::query(
            r#"
            UPDATE user_registration_challenges
            SET status = 'expired'
            WHERE commander_id = $1 AND status = 'pending'
            "#,
        )
        .bind(u32_to_i64(input.commander_id))
        .execute(&mut *tx)
        .await
        .map_err(db_error)?
        .rows_affected();

        // Overdue holders of this PIN give it up before the unique check.
        let released = sqlx::query(
            r#"
            UPDATE user_registration_challenges
            SET status = 'expired'
            WHERE pin = $1 AND status = 'pending' AND expires_utc <= $2
            "#,
        )
        .bind(&input.pin)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?
        .rows_affected();

        let pin_in_use: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM user_registration_challenges
                WHERE pin = $1 AND status = 'pending' AND expires_utc > $2
            )
            "#,
        )
        .bind(&input.pin)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(db_error)?;

        if pin_in_use {
            return Err(IdentityError::PinExists);
        }

        let row = sqlx::query_as::<_, RegistrationChallengeRow>(
            r#"
            INSERT INTO user_registration_challenges (id, commander_id, pin, password_hash,
                                                      password_algo, status, expires_utc,
                                                      created_utc)
            VALUES ($1, $2, $3, $4, $5, 'pending', $6, $7)
            RETURNING id, commander_id, pin, password_hash, password_algo, status, expires_utc,
                      consumed_utc, created_utc
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(u32_to_i64(input.commander_id))
        .bind(&input.pin)
        .bind(&input.password_hash)
        .bind(&input.password_algo)
        .bind(input.expires_utc)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| match db_error(e) {
            // A concurrent issue won the pending slot for this PIN or commander.
            IdentityError::UniqueViolation(source) => pending_slot_conflict(&source),
            other => other,
        })?;

        tx.commit().await.map_err(db_error)?;
        timer.observe_duration();

        let challenge = RegistrationChallenge::try_from(row)?;
        info!(
            challenge_id = %challenge.id,
            superseded = superseded,
            released = released,
            expires_utc = %challenge.expires_utc,
            "Registration challenge issued"
        );
        Ok(challenge)
    }

    /// Redeem a challenge and create the commander's account.
    ///
    /// The challenge row is locked for the whole transaction, so of two
    /// concurrent redemptions one commits and the other then sees the
    /// challenge as consumed. A challenge found past its deadline is marked
    /// expired (and that is committed) before failing with `ChallengeExpired`.
    #[instrument(skip(self, pin), fields(selector = ?selector))]
    pub async fn consume_registration_challenge(
        &self,
        selector: ChallengeSelector,
        pin: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, IdentityError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["consume_registration_challenge"])
            .start_timer();

        let result = self.consume_locked(selector, pin, now).await;

        timer.observe_duration();
        let outcome = match &result {
            Ok(_) => "consumed",
            Err(e) => e.kind(),
        };
        REGISTRATION_CLAIMS_TOTAL.with_label_values(&[outcome]).inc();

        result
    }

    async fn consume_locked(
        &self,
        selector: ChallengeSelector,
        pin: &str,
        now: DateTime<Utc>,
    ) -> Result<Account, IdentityError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let challenge = lock_challenge(&mut tx, selector, pin).await?;

        match challenge.status {
            ChallengeStatus::Consumed => return Err(IdentityError::ChallengeConsumed),
            ChallengeStatus::Expired => return Err(IdentityError::ChallengeExpired),
            ChallengeStatus::Pending => {}
        }

        if challenge.is_past_deadline(now) {
            sqlx::query("UPDATE user_registration_challenges SET status = 'expired' WHERE id = $1")
                .bind(challenge.id)
                .execute(&mut *tx)
                .await
                .map_err(db_error)?;
            tx.commit().await.map_err(db_error)?;

            warn!(challenge_id = %challenge.id, "Registration challenge redeemed after deadline");
            return Err(IdentityError::ChallengeExpired);
        }

        if challenge.pin != pin {
            return Err(IdentityError::ChallengePinMismatch);
        }

        if commander_has_account(&mut *tx, challenge.commander_id).await? {
            return Err(IdentityError::AccountExists);
        }

        let account = insert_account(
            &mut *tx,
            &NewAccount {
                commander_id: Some(challenge.commander_id),
                password_hash: challenge.password_hash.clone(),
                password_algo: challenge.password_algo.clone(),
                ..NewAccount::default()
            },
            now,
        )
        .await
        .map_err(|e| match e {
            IdentityError::UniqueViolation(_) => IdentityError::AccountExists,
            other => other,
        })?;

        let player_role: Uuid = sqlx::query_scalar("SELECT id FROM roles WHERE name = $1")
            .bind(ROLE_PLAYER)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?
            .ok_or(IdentityError::NotFound)?;
        link_role(&mut tx, account.id, player_role).await?;

        sqlx::query(
            r#"
            UPDATE user_registration_challenges
            SET status = 'consumed', consumed_utc = $2
            WHERE id = $1
            "#,
        )
        .bind(challenge.id)
        .bind(now)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        tx.commit().await.map_err(db_error)?;

        info!(
            challenge_id = %challenge.id,
            account_id = %account.id,
            commander_id = challenge.commander_id,
            "Registration challenge consumed"
        );
        Ok(account)
    }

    #[instrument(skip(self))]
    pub async fn get_registration_challenge(
        &self,
        id: Uuid,
    ) -> Result<RegistrationChallenge, IdentityError> {
        sqlx::query_as::<_, RegistrationChallengeRow>(
            r#"
            SELECT id, commander_id, pin, password_hash, password_algo, status, expires_utc,
                   consumed_utc, created_utc
            FROM user_registration_challenges
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or(IdentityError::NotFound)?
        .try_into()
    }

    /// Set a challenge's status. An existing consumed-at stamp is never
    /// cleared, and moving to `consumed` stamps it if missing.
    #[instrument(skip(self))]
    pub async fn update_registration_challenge_status(
        &self,
        id: Uuid,
        status: ChallengeStatus,
        now: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        let result = sqlx::query(
            r#"
            UPDATE user_registration_challenges
            SET status = $2,
                consumed_utc = CASE
                    WHEN $2 = 'consumed' THEN COALESCE(consumed_utc, $3)
                    ELSE consumed_utc
                END
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(status.as_str())
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        ensure_affected(result.rows_affected())
    }

    /// Current state of a challenge, expiring it first if its deadline passed.
    #[instrument(skip(self))]
    pub async fn registration_challenge_status(
        &self,
        id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<RegistrationChallenge, IdentityError> {
        let expired = sqlx::query(
            r#"
            UPDATE user_registration_challenges
            SET status = 'expired'
            WHERE id = $1 AND status = 'pending' AND expires_utc <= $2
            "#,
        )
        .bind(id)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        if expired.rows_affected() > 0 {
            info!(challenge_id = %id, "Registration challenge expired");
        }

        self.get_registration_challenge(id).await
    }
}

const PENDING_PIN_INDEX: &str = "idx_registration_challenges_pending_pin";

fn pending_slot_conflict(source: &sqlx::Error) -> IdentityError {
    let constraint = match source {
        sqlx::Error::Database(db_err) => db_err.constraint(),
        _ => None,
    };
    if constraint == Some(PENDING_PIN_INDEX) {
        IdentityError::PinExists
    } else {
        IdentityError::ChallengeExists
    }
}

/// Find and lock the targeted challenge row.
async fn lock_challenge(
    tx: &mut Transaction<'_, Postgres>,
    selector: ChallengeSelector,
    pin: &str,
) -> Result<RegistrationChallenge, IdentityError> {
    let row = match selector {
        ChallengeSelector::Id(id) => sqlx::query_as::<_, RegistrationChallengeRow>(
            r#"
            SELECT id, commander_id, pin, password_hash, password_algo, status, expires_utc,
                   consumed_utc, created_utc
            FROM user_registration_challenges
            WHERE id = $1
            FOR UPDATE
            "#,
        )
        .bind(id)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?,
        ChallengeSelector::Commander(commander_id) => {
            let row = sqlx::query_as::<_, RegistrationChallengeRow>(
                r#"
                SELECT id, commander_id, pin, password_hash, password_algo, status, expires_utc,
                       consumed_utc, created_utc
                FROM user_registration_challenges
                WHERE pin = $1 AND commander_id = $2
                ORDER BY (status = 'pending') DESC, created_utc DESC, id
                LIMIT 1
                FOR UPDATE
                "#,
            )
            .bind(pin)
            .bind(u32_to_i64(commander_id))
            .fetch_optional(&mut **tx)
            .await
            .map_err(db_error)?;

            if row.is_none() {
                let pending_elsewhere: bool = sqlx::query_scalar(
                    r#"
                    SELECT EXISTS (
                        SELECT 1 FROM user_registration_challenges
                        WHERE pin = $1 AND status = 'pending'
                    )
                    "#,
                )
                .bind(pin)
                .fetch_one(&mut **tx)
                .await
                .map_err(db_error)?;

                if pending_elsewhere {
                    return Err(IdentityError::ChallengeMismatch);
                }
            }
            row
        }
    };

    row.ok_or(IdentityError::ChallengeNotFound)?.try_into()
}
