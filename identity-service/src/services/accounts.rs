//! Account operations of the identity store.

use chrono::{DateTime, Utc};
use sqlx::PgExecutor;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::authz::ROLE_ADMIN;
use crate::models::{normalize_username, Account, AccountRow, NewAccount};
use crate::services::database::{db_error, ensure_affected, Database};
use crate::services::error::IdentityError;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::utils::codec::u32_to_i64;

impl Database {
    // -------------------------------------------------------------------------
    // Lookups
    // -------------------------------------------------------------------------

    /// Get an account by ID.
    #[instrument(skip(self), fields(account_id = %id))]
    pub async fn get_account_by_id(&self, id: Uuid) -> Result<Account, IdentityError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["get_account_by_id"])
            .start_timer();

        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, username, username_normalized, commander_id, password_hash, password_algo,
                   password_updated_utc, is_admin, disabled_utc, last_login_utc,
                   web_authn_user_handle, created_utc, updated_utc
            FROM accounts
            WHERE id = $1
            "#,
        )
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        timer.observe_duration();

        row.ok_or(IdentityError::NotFound)?.try_into()
    }

    /// Get an account by username; the input is normalized before lookup.
    #[instrument(skip(self))]
    pub async fn get_account_by_username(&self, username: &str) -> Result<Account, IdentityError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, username, username_normalized, commander_id, password_hash, password_algo,
                   password_updated_utc, is_admin, disabled_utc, last_login_utc,
                   web_authn_user_handle, created_utc, updated_utc
            FROM accounts
            WHERE username_normalized = $1
            "#,
        )
        .bind(normalize_username(username))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.ok_or(IdentityError::NotFound)?.try_into()
    }

    #[instrument(skip(self, handle))]
    pub async fn get_account_by_webauthn_handle(
        &self,
        handle: &[u8],
    ) -> Result<Account, IdentityError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, username, username_normalized, commander_id, password_hash, password_algo,
                   password_updated_utc, is_admin, disabled_utc, last_login_utc,
                   web_authn_user_handle, created_utc, updated_utc
            FROM accounts
            WHERE web_authn_user_handle = $1
            "#,
        )
        .bind(handle)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.ok_or(IdentityError::NotFound)?.try_into()
    }

    #[instrument(skip(self))]
    pub async fn get_account_by_commander_id(
        &self,
        commander_id: u32,
    ) -> Result<Account, IdentityError> {
        let row = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT id, username, username_normalized, commander_id, password_hash, password_algo,
                   password_updated_utc, is_admin, disabled_utc, last_login_utc,
                   web_authn_user_handle, created_utc, updated_utc
            FROM accounts
            WHERE commander_id = $1
            "#,
        )
        .bind(u32_to_i64(commander_id))
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?;

        row.ok_or(IdentityError::NotFound)?.try_into()
    }

    /// Whether a normalized username is already held by another account.
    #[instrument(skip(self))]
    pub async fn username_taken(
        &self,
        username: &str,
        exclude: Option<Uuid>,
    ) -> Result<bool, IdentityError> {
        let taken: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM accounts
                WHERE username_normalized = $1 AND ($2::uuid IS NULL OR id <> $2)
            )
            "#,
        )
        .bind(normalize_username(username))
        .bind(exclude)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(taken)
    }

    // -------------------------------------------------------------------------
    // Creation and keyed updates
    // -------------------------------------------------------------------------

    /// Create a new account. Duplicate username, commander id or WebAuthn
    /// handle surfaces as [`IdentityError::UniqueViolation`].
    #[instrument(skip(self, input), fields(commander_id = ?input.commander_id, is_admin = input.is_admin))]
    pub async fn create_account(&self, input: &NewAccount) -> Result<Account, IdentityError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["create_account"])
            .start_timer();

        let account = insert_account(&self.pool, input, Utc::now()).await?;

        timer.observe_duration();
        info!(account_id = %account.id, "Account created");
        Ok(account)
    }

    #[instrument(skip(self), fields(account_id = %id))]
    pub async fn update_username(&self, id: Uuid, username: &str) -> Result<(), IdentityError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET username = $2, username_normalized = $3, updated_utc = NOW()
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(username.trim())
        .bind(normalize_username(username))
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        ensure_affected(result.rows_affected())
    }

    /// Disable (`Some`) or re-enable (`None`) an account.
    #[instrument(skip(self), fields(account_id = %id))]
    pub async fn update_disabled_at(
        &self,
        id: Uuid,
        disabled_utc: Option<DateTime<Utc>>,
    ) -> Result<(), IdentityError> {
        let result = sqlx::query(
            "UPDATE accounts SET disabled_utc = $2, updated_utc = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(disabled_utc)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        ensure_affected(result.rows_affected())?;
        info!(disabled = disabled_utc.is_some(), "Account enablement changed");
        Ok(())
    }

    #[instrument(skip(self, password_hash), fields(account_id = %id))]
    pub async fn update_password(
        &self,
        id: Uuid,
        password_hash: &str,
        password_algo: &str,
        now: DateTime<Utc>,
    ) -> Result<(), IdentityError> {
        let result = sqlx::query(
            r#"
            UPDATE accounts
            SET password_hash = $2, password_algo = $3, password_updated_utc = $4, updated_utc = $4
            WHERE id = $1
            "#,
        )
        .bind(id)
        .bind(password_hash)
        .bind(password_algo)
        .bind(now)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        ensure_affected(result.rows_affected())
    }

    #[instrument(skip(self), fields(account_id = %id))]
    pub async fn touch_last_login(&self, id: Uuid, now: DateTime<Utc>) -> Result<(), IdentityError> {
        let result = sqlx::query("UPDATE accounts SET last_login_utc = $2 WHERE id = $1")
            .bind(id)
            .bind(now)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        ensure_affected(result.rows_affected())
    }

    #[instrument(skip(self, handle), fields(account_id = %id))]
    pub async fn update_webauthn_user_handle(
        &self,
        id: Uuid,
        handle: &[u8],
    ) -> Result<(), IdentityError> {
        let result = sqlx::query(
            "UPDATE accounts SET web_authn_user_handle = $2, updated_utc = NOW() WHERE id = $1",
        )
        .bind(id)
        .bind(handle)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        ensure_affected(result.rows_affected())
    }

    /// Delete an account; memberships, overrides and credentials cascade.
    #[instrument(skip(self), fields(account_id = %id))]
    pub async fn delete_account(&self, id: Uuid) -> Result<(), IdentityError> {
        let result = sqlx::query("DELETE FROM accounts WHERE id = $1")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        ensure_affected(result.rows_affected())?;
        info!("Account deleted");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Admin accounts
    // -------------------------------------------------------------------------

    /// Enabled accounts that are admins by flag or by role.
    #[instrument(skip(self))]
    pub async fn count_admin_accounts(&self) -> Result<i64, IdentityError> {
        let count: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM accounts a
            WHERE a.disabled_utc IS NULL
              AND (a.is_admin OR EXISTS (
                    SELECT 1 FROM account_roles ar
                    JOIN roles r ON r.id = ar.role_id
                    WHERE ar.account_id = a.id AND r.name = $1))
            "#,
        )
        .bind(ROLE_ADMIN)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(count)
    }

    /// One page of admin accounts (admin flag or admin role, disabled ones
    /// included), newest first, plus the total for paging.
    #[instrument(skip(self))]
    pub async fn list_admin_accounts(
        &self,
        offset: i64,
        limit: i64,
    ) -> Result<(Vec<Account>, i64), IdentityError> {
        let total: i64 = sqlx::query_scalar(
            r#"
            SELECT COUNT(*)
            FROM accounts a
            WHERE a.is_admin OR EXISTS (
                    SELECT 1 FROM account_roles ar
                    JOIN roles r ON r.id = ar.role_id
                    WHERE ar.account_id = a.id AND r.name = $1)
            "#,
        )
        .bind(ROLE_ADMIN)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let rows = sqlx::query_as::<_, AccountRow>(
            r#"
            SELECT a.id, a.username, a.username_normalized, a.commander_id, a.password_hash,
                   a.password_algo, a.password_updated_utc, a.is_admin, a.disabled_utc,
                   a.last_login_utc, a.web_authn_user_handle, a.created_utc, a.updated_utc
            FROM accounts a
            WHERE a.is_admin OR EXISTS (
                    SELECT 1 FROM account_roles ar
                    JOIN roles r ON r.id = ar.role_id
                    WHERE ar.account_id = a.id AND r.name = $1)
            ORDER BY a.created_utc DESC, a.id
            OFFSET $2 LIMIT $3
            "#,
        )
        .bind(ROLE_ADMIN)
        .bind(offset.max(0))
        .bind(limit.max(0))
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let accounts = rows
            .into_iter()
            .map(Account::try_from)
            .collect::<Result<Vec<_>, _>>()?;
        Ok((accounts, total))
    }
}

pub(crate) async fn insert_account<'e, E>(
    executor: E,
    input: &NewAccount,
    now: DateTime<Utc>,
) -> Result<Account, IdentityError>
where
    E: PgExecutor<'e>,
{
    let row = sqlx::query_as::<_, AccountRow>(
        r#"
        INSERT INTO accounts (id, username, username_normalized, commander_id, password_hash,
                              password_algo, password_updated_utc, is_admin,
                              web_authn_user_handle, created_utc, updated_utc)
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $7, $7)
        RETURNING id, username, username_normalized, commander_id, password_hash, password_algo,
                  password_updated_utc, is_admin, disabled_utc, last_login_utc,
                  web_authn_user_handle, created_utc, updated_utc
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(input.username.as_deref())
    .bind(input.username.as_deref().map(normalize_username))
    .bind(input.commander_id.map(u32_to_i64))
    .bind(&input.password_hash)
    .bind(&input.password_algo)
    .bind(now)
    .bind(input.is_admin)
    .bind(input.web_authn_user_handle.as_deref())
    .fetch_one(executor)
    .await
    .map_err(db_error)?;

    Account::try_from(row)
}

pub(crate) async fn commander_has_account<'e, E>(
    executor: E,
    commander_id: u32,
) -> Result<bool, IdentityError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM accounts WHERE commander_id = $1)")
        .bind(u32_to_i64(commander_id))
        .fetch_one(executor)
        .await
        .map_err(db_error)
}
