//! Role and permission catalog, default bootstrap and role policy editing.

use std::collections::HashMap;

use serde::Serialize;
use tracing::{info, instrument, warn};
use uuid::Uuid;

use crate::authz::{Capability, ROLE_ADMIN, ROLE_PLAYER};
use crate::models::{Permission, Role, RolePolicyEntry};
use crate::services::database::{db_error, Database};
use crate::services::error::IdentityError;
use crate::services::metrics::DB_QUERY_DURATION;

/// Built-in roles and the description each one is reconciled to.
const DEFAULT_ROLES: [(&str, &str); 2] = [
    (ROLE_ADMIN, "Full access"),
    (ROLE_PLAYER, "Default player role"),
];

/// What a bootstrap run changed. All zero once the catalog has converged.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct BootstrapReport {
    pub permissions_created: u64,
    pub roles_created: u64,
    pub roles_updated: u64,
    pub admin_grants_written: u64,
}

impl BootstrapReport {
    pub fn is_noop(&self) -> bool {
        *self == Self::default()
    }
}

impl Database {
    #[instrument(skip(self))]
    pub async fn list_roles(&self) -> Result<Vec<Role>, IdentityError> {
        sqlx::query_as::<_, Role>(
            r#"
            SELECT id, name, description, updated_by, created_utc, updated_utc
            FROM roles
            ORDER BY name
            "#,
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    #[instrument(skip(self))]
    pub async fn list_permissions(&self) -> Result<Vec<Permission>, IdentityError> {
        sqlx::query_as::<_, Permission>(
            "SELECT id, key, description, created_utc FROM permissions ORDER BY key",
        )
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)
    }

    #[instrument(skip(self))]
    pub async fn get_role_by_name(&self, name: &str) -> Result<Role, IdentityError> {
        sqlx::query_as::<_, Role>(
            r#"
            SELECT id, name, description, updated_by, created_utc, updated_utc
            FROM roles
            WHERE name = $1
            "#,
        )
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(db_error)?
        .ok_or(IdentityError::NotFound)
    }

    /// Reconcile the catalog with the permission registry.
    ///
    /// Missing permissions are created with the registry description (existing
    /// descriptions are left alone), the built-in roles are created or have
    /// their description reset, and the admin role gets every facet of every
    /// known permission. Rows already in the desired state are not touched.
    #[instrument(skip(self))]
    pub async fn ensure_defaults(&self) -> Result<BootstrapReport, IdentityError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["ensure_defaults"])
            .start_timer();

        let known = self.registry.known_permissions();
        let mut report = BootstrapReport::default();

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        for (key, description) in &known {
            let result = sqlx::query(
                r#"
                INSERT INTO permissions (id, key, description)
                VALUES ($1, $2, $3)
                ON CONFLICT (key) DO NOTHING
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(key)
            .bind(description)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;

            report.permissions_created += result.rows_affected();
        }

        for (name, description) in DEFAULT_ROLES {
            // xmax is zero only for freshly inserted tuples.
            let inserted: Option<bool> = sqlx::query_scalar(
                r#"
                INSERT INTO roles (id, name, description)
                VALUES ($1, $2, $3)
                ON CONFLICT (name) DO UPDATE
                SET description = EXCLUDED.description, updated_utc = NOW()
                WHERE roles.description IS DISTINCT FROM EXCLUDED.description
                RETURNING (xmax = 0)
                "#,
            )
            .bind(Uuid::new_v4())
            .bind(name)
            .bind(description)
            .fetch_optional(&mut *tx)
            .await
            .map_err(db_error)?;

            match inserted {
                Some(true) => report.roles_created += 1,
                Some(false) => report.roles_updated += 1,
                None => {}
            }
        }

        let keys: Vec<String> = known.keys().cloned().collect();
        let granted = sqlx::query(
            r#"
            INSERT INTO role_permissions (role_id, permission_id, can_read_self, can_read_any,
                                          can_write_self, can_write_any)
            SELECT r.id, p.id, TRUE, TRUE, TRUE, TRUE
            FROM roles r
            CROSS JOIN permissions p
            WHERE r.name = $1 AND p.key = ANY($2)
            ON CONFLICT (role_id, permission_id) DO UPDATE
            SET can_read_self = TRUE, can_read_any = TRUE, can_write_self = TRUE,
                can_write_any = TRUE, updated_utc = NOW()
            WHERE NOT (role_permissions.can_read_self AND role_permissions.can_read_any
                       AND role_permissions.can_write_self AND role_permissions.can_write_any)
            "#,
        )
        .bind(ROLE_ADMIN)
        .bind(&keys)
        .execute(&mut *tx)
        .await
        .map_err(db_error)?;

        report.admin_grants_written = granted.rows_affected();

        tx.commit().await.map_err(db_error)?;
        timer.observe_duration();

        if report.is_noop() {
            info!("Authorization defaults already in place");
        } else {
            info!(
                permissions_created = report.permissions_created,
                roles_created = report.roles_created,
                roles_updated = report.roles_updated,
                admin_grants_written = report.admin_grants_written,
                "Authorization defaults ensured"
            );
        }

        Ok(report)
    }

    /// Capability of a role for every known permission, sorted by key. Keys
    /// the role has no row for come back all-false.
    #[instrument(skip(self))]
    pub async fn load_role_policy(
        &self,
        role_name: &str,
    ) -> Result<Vec<RolePolicyEntry>, IdentityError> {
        let role = self.get_role_by_name(role_name).await?;

        let rows = sqlx::query_as::<_, RolePolicyEntry>(
            r#"
            SELECT p.key, rp.can_read_self, rp.can_read_any, rp.can_write_self, rp.can_write_any
            FROM role_permissions rp
            JOIN permissions p ON p.id = rp.permission_id
            WHERE rp.role_id = $1
            "#,
        )
        .bind(role.id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        let mut granted: HashMap<String, Capability> =
            rows.into_iter().map(|e| (e.key, e.capability)).collect();

        Ok(self
            .registry
            .known_permissions()
            .into_keys()
            .map(|key| {
                let capability = granted.remove(&key).unwrap_or_default();
                RolePolicyEntry { key, capability }
            })
            .collect())
    }

    /// Replace a role's policy. Every known permission is written; keys
    /// missing from `capabilities` become all-false.
    #[instrument(skip(self, capabilities), fields(entries = capabilities.len()))]
    pub async fn replace_role_policy(
        &self,
        role_name: &str,
        capabilities: &HashMap<String, Capability>,
        updated_by: Option<&str>,
    ) -> Result<(), IdentityError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["replace_role_policy"])
            .start_timer();

        let known = self.registry.known_permissions();
        for key in capabilities.keys().filter(|k| !known.contains_key(*k)) {
            warn!(key = %key, "Ignoring capability for unknown permission");
        }

        let mut tx = self.pool.begin().await.map_err(db_error)?;

        let role_id: Uuid = sqlx::query_scalar(
            r#"
            UPDATE roles SET updated_by = $2, updated_utc = NOW()
            WHERE name = $1
            RETURNING id
            "#,
        )
        .bind(role_name)
        .bind(updated_by)
        .fetch_optional(&mut *tx)
        .await
        .map_err(db_error)?
        .ok_or(IdentityError::NotFound)?;

        for key in known.keys() {
            let permission_id: Uuid = sqlx::query_scalar("SELECT id FROM permissions WHERE key = $1")
                .bind(key)
                .fetch_optional(&mut *tx)
                .await
                .map_err(db_error)?
                .ok_or(IdentityError::NotFound)?;

            let cap = capabilities.get(key).copied().unwrap_or_default();
            sqlx::query(
                r#"
                INSERT INTO role_permissions (role_id, permission_id, can_read_self, can_read_any,
                                              can_write_self, can_write_any)
                VALUES ($1, $2, $3, $4, $5, $6)
                ON CONFLICT (role_id, permission_id) DO UPDATE
                SET can_read_self = EXCLUDED.can_read_self,
                    can_read_any = EXCLUDED.can_read_any,
                    can_write_self = EXCLUDED.can_write_self,
                    can_write_any = EXCLUDED.can_write_any,
                    updated_utc = NOW()
                "#,
            )
            .bind(role_id)
            .bind(permission_id)
            .bind(cap.read_self)
            .bind(cap.read_any)
            .bind(cap.write_self)
            .bind(cap.write_any)
            .execute(&mut *tx)
            .await
            .map_err(db_error)?;
        }

        tx.commit().await.map_err(db_error)?;
        timer.observe_duration();

        info!(role = %role_name, updated_by = ?updated_by, "Role policy replaced");
        Ok(())
    }
}
