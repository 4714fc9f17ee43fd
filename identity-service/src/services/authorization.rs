//! Role memberships, permission overrides and effective permissions.

use std::collections::BTreeSet;

use sqlx::{PgExecutor, Postgres, Transaction};
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::authz::{resolve_effective_permissions, Capability, EffectivePermissions, ROLE_ADMIN};
use crate::models::{AccountOverride, AccountOverrideRow};
use crate::services::database::{db_error, Database};
use crate::services::error::IdentityError;
use crate::services::metrics::{AUTHZ_RESOLUTIONS_TOTAL, DB_QUERY_DURATION, ERRORS_TOTAL};

#[derive(sqlx::FromRow)]
struct GrantRow {
    key: String,
    #[sqlx(flatten)]
    capability: Capability,
}

impl Database {
    // -------------------------------------------------------------------------
    // Reads
    // -------------------------------------------------------------------------

    /// Role names held by an account, sorted.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn list_account_role_names(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<String>, IdentityError> {
        account_role_names(&self.pool, account_id).await
    }

    /// Overrides of an account, sorted by permission key. Rows with a stored
    /// mode other than `allow` or `deny` are skipped and have no effect.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn list_account_overrides(
        &self,
        account_id: Uuid,
    ) -> Result<Vec<AccountOverride>, IdentityError> {
        let rows = sqlx::query_as::<_, AccountOverrideRow>(
            r#"
            SELECT p.key, o.mode, o.can_read_self, o.can_read_any, o.can_write_self, o.can_write_any
            FROM account_permission_overrides o
            JOIN permissions p ON p.id = o.permission_id
            WHERE o.account_id = $1
            ORDER BY p.key
            "#,
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(rows
            .into_iter()
            .filter_map(|row| match AccountOverride::try_from(row) {
                Ok(ov) => Some(ov),
                Err(bad) => {
                    warn!(key = %bad.key, mode = %bad.mode, "Ignoring override with unknown stored mode");
                    ERRORS_TOTAL.with_label_values(&["unknown_override_mode"]).inc();
                    None
                }
            })
            .collect())
    }

    /// Enabled accounts other than `exclude` holding `role_name`.
    #[instrument(skip(self))]
    pub async fn count_enabled_accounts_with_role(
        &self,
        role_name: &str,
        exclude: Option<Uuid>,
    ) -> Result<i64, IdentityError> {
        count_enabled_with_role(&self.pool, role_name, exclude).await
    }

    /// What an account may do, computed fresh from its roles and overrides.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn load_effective_permissions(
        &self,
        account_id: Uuid,
    ) -> Result<EffectivePermissions, IdentityError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["load_effective_permissions"])
            .start_timer();

        let role_ids: Vec<Uuid> =
            sqlx::query_scalar("SELECT role_id FROM account_roles WHERE account_id = $1")
                .bind(account_id)
                .fetch_all(&self.pool)
                .await
                .map_err(db_error)?;

        if role_ids.is_empty() {
            timer.observe_duration();
            AUTHZ_RESOLUTIONS_TOTAL.with_label_values(&["empty"]).inc();
            return Ok(EffectivePermissions::default());
        }

        let grants = sqlx::query_as::<_, GrantRow>(
            r#"
            SELECT p.key, rp.can_read_self, rp.can_read_any, rp.can_write_self, rp.can_write_any
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = ANY($1)
            "#,
        )
        .bind(&role_ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let overrides = self.list_account_overrides(account_id).await?;

        let result = resolve_effective_permissions(
            true,
            grants.into_iter().map(|g| (g.key, g.capability)),
            overrides,
        );

        timer.observe_duration();
        AUTHZ_RESOLUTIONS_TOTAL.with_label_values(&["granted"]).inc();

        Ok(result)
    }

    // -------------------------------------------------------------------------
    // Mutations
    // -------------------------------------------------------------------------

    /// Add a role to an account; a no-op if already held.
    #[instrument(skip(self), fields(account_id = %account_id))]
    pub async fn assign_role(&self, account_id: Uuid, role_name: &str) -> Result<(), IdentityError> {
        let mut tx = self.pool.begin().await.map_err(db_error)?;
        let role_id = role_id_by_name(&mut *tx, role_name).await?;
        link_role(&mut tx, account_id, role_id).await?;
        tx.commit().await.map_err(db_error)?;
        Ok(())
    }

    /// Make `names` the exact role set of an account.
    ///
    /// Names are trimmed and deduplicated; blank names are dropped. Removing
    /// the admin role is refused with [`IdentityError::LastRole`] when no other
    /// enabled account holds it.
    #[instrument(skip(self, names), fields(account_id = %account_id))]
    pub async fn replace_account_roles(
        &self,
        account_id: Uuid,
        names: &[String],
    ) -> Result<(), IdentityError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_account_roles"])
            .start_timer();

        let requested: BTreeSet<&str> = names
            .iter()
            .map(|n| n.trim())
            .filter(|n| !n.is_empty())
            .collect();

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let current = account_role_names(&mut *tx, account_id).await?;
        if current.iter().any(|n| n == ROLE_ADMIN) && !requested.contains(ROLE_ADMIN) {
            ensure_not_last_holder(&mut tx, ROLE_ADMIN, account_id).await?;
        }

        let mut role_ids = Vec::with_capacity(requested.len());
        for name in &requested {
            role_ids.push(role_id_by_name(&mut *tx, name).await?);
        }

        sqlx::query("DELETE FROM account_roles WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        for role_id in role_ids {
            link_role(&mut tx, account_id, role_id).await?;
        }

        tx.commit().await.map_err(db_error)?;
        timer.observe_duration();

        info!(roles = ?requested, "Account roles replaced");
        Ok(())
    }

    /// Make `overrides` the exact override set of an account.
    ///
    /// Keys are trimmed, blank keys dropped, and the first entry wins when a
    /// key repeats. Unknown permission keys fail with `NotFound` and nothing
    /// is applied.
    #[instrument(skip(self, overrides), fields(account_id = %account_id, entries = overrides.len()))]
    pub async fn replace_account_overrides(
        &self,
        account_id: Uuid,
        overrides: &[AccountOverride],
    ) -> Result<(), IdentityError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_account_overrides"])
            .start_timer();

        let mut seen = BTreeSet::new();
        let entries: Vec<(&str, &AccountOverride)> = overrides
            .iter()
            .map(|o| (o.key.trim(), o))
            .filter(|(key, _)| !key.is_empty() && seen.insert(*key))
            .collect();

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let mut resolved = Vec::with_capacity(entries.len());
        for (key, ov) in entries {
            let permission_id: Uuid =
                sqlx::query_scalar("SELECT id FROM permissions WHERE key = $1")
                    .bind(key)
                    .fetch_optional(&mut *tx)
                    .await
                    .map_err(db_error)?
                    .ok_or_else(|| {
                        warn!(key = %key, "Override references unknown permission");
                        IdentityError::NotFound
                    })?;
            resolved.push((permission_id, ov));
        }

        sqlx::query("DELETE FROM account_permission_overrides WHERE account_id = $1")
            .bind(account_id)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

        for (permission_id, ov) in resolved {
            sqlx::query(
                r#"
                INSERT INTO account_permission_overrides (account_id, permission_id, mode,
                                                          can_read_self, can_read_any,
                                                          can_write_self, can_write_any)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                "#,
            )
            .bind(account_id)
            .bind(permission_id)
            .bind(ov.mode.as_str())
            .bind(ov.capability.read_self)
            .bind(ov.capability.read_any)
            .bind(ov.capability.write_self)
            .bind(ov.capability.write_any)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        timer.observe_duration();

        info!("Account overrides replaced");
        Ok(())
    }
}

async fn account_role_names<'e, E>(executor: E, account_id: Uuid) -> Result<Vec<String>, IdentityError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar(
        r#"
        SELECT r.name
        FROM account_roles ar
        JOIN roles r ON r.id = ar.role_id
        WHERE ar.account_id = $1
        ORDER BY r.name
        "#,
    )
    .bind(account_id)
    .fetch_all(executor)
    .await
    .map_err(db_error)
}

async fn count_enabled_with_role<'e, E>(
    executor: E,
    role_name: &str,
    exclude: Option<Uuid>,
) -> Result<i64, IdentityError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar(
        r#"
        SELECT COUNT(*)
        FROM account_roles ar
        JOIN roles r ON r.id = ar.role_id
        JOIN accounts a ON a.id = ar.account_id
        WHERE r.name = $1
          AND a.disabled_utc IS NULL
          AND ($2::uuid IS NULL OR a.id <> $2)
        "#,
    )
    .bind(role_name)
    .bind(exclude)
    .fetch_one(executor)
    .await
    .map_err(db_error)
}

async fn role_id_by_name<'e, E>(executor: E, name: &str) -> Result<Uuid, IdentityError>
where
    E: PgExecutor<'e>,
{
    sqlx::query_scalar("SELECT id FROM roles WHERE name = $1")
        .bind(name)
        .fetch_optional(executor)
        .await
        .map_err(db_error)?
        .ok_or(IdentityError::NotFound)
}

pub(crate) async fn link_role(
    tx: &mut Transaction<'_, Postgres>,
    account_id: Uuid,
    role_id: Uuid,
) -> Result<(), IdentityError> {
    sqlx::query(
        r#"
        INSERT INTO account_roles (account_id, role_id)
        VALUES ($1, $2)
        ON CONFLICT (account_id, role_id) DO NOTHING
        "#,
    )
    .bind(account_id)
    .bind(role_id)
    .execute(&mut **tx)
    .await
    .map_err(db_error)?;
    Ok(())
}

/// Refuse to strip `role_name` from `account_id` if it is the last enabled
/// holder. The role row stays locked until the transaction ends so two
/// concurrent demotions cannot both pass the count.
async fn ensure_not_last_holder(
    tx: &mut Transaction<'_, Postgres>,
    role_name: &str,
    account_id: Uuid,
) -> Result<(), IdentityError> {
    sqlx::query("SELECT id FROM roles WHERE name = $1 FOR UPDATE")
        .bind(role_name)
        .fetch_optional(&mut **tx)
        .await
        .map_err(db_error)?;

    let others = count_enabled_with_role(&mut **tx, role_name, Some(account_id)).await?;
    if others == 0 {
        warn!(role = %role_name, "Refusing to remove the last holder of role");
        return Err(IdentityError::LastRole(role_name.to_string()));
    }
    Ok(())
}
