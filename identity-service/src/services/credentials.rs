//! WebAuthn credential operations of the identity store.

use tracing::{info, instrument};
use uuid::Uuid;

use crate::models::{
    CredentialUsage, NewWebAuthnCredential, WebAuthnCredential, WebAuthnCredentialRow,
};
use crate::services::database::{db_error, ensure_affected, Database};
use crate::services::error::IdentityError;
use crate::services::metrics::DB_QUERY_DURATION;
use crate::utils::codec::{encode_resident_key, u32_to_i64};

impl Database {
    /// Credentials registered to an account, oldest first.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn list_credentials(
        &self,
        user_id: Uuid,
    ) -> Result<Vec<WebAuthnCredential>, IdentityError> {
        let timer = DB_QUERY_DURATION
            .with_label_values(&["list_credentials"])
            .start_timer();

        let rows = sqlx::query_as::<_, WebAuthnCredentialRow>(
            r#"
            SELECT id, user_id, credential_id, public_key, sign_count, transports, aaguid,
                   attestation_fmt, resident_key, backup_eligible, backup_state, created_utc,
                   last_used_utc, label, rp_id
            FROM web_authn_credentials
            WHERE user_id = $1
            ORDER BY created_utc, id
            "#,
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_error)?;

        timer.observe_duration();

        rows.into_iter().map(WebAuthnCredential::try_from).collect()
    }

    /// Register a credential. A reused credential id is a uniqueness violation.
    #[instrument(skip(self, input), fields(user_id = %input.user_id))]
    pub async fn create_credential(
        &self,
        input: &NewWebAuthnCredential,
    ) -> Result<WebAuthnCredential, IdentityError> {
        let transports = serde_json::to_value(&input.transports)
            .map_err(|e| IdentityError::Internal(anyhow::anyhow!("encode transports: {}", e)))?;

        let row = sqlx::query_as::<_, WebAuthnCredentialRow>(
            r#"
            INSERT INTO web_authn_credentials (id, user_id, credential_id, public_key, sign_count,
                                               transports, aaguid, attestation_fmt, resident_key,
                                               backup_eligible, backup_state, label, rp_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            RETURNING id, user_id, credential_id, public_key, sign_count, transports, aaguid,
                      attestation_fmt, resident_key, backup_eligible, backup_state, created_utc,
                      last_used_utc, label, rp_id
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(input.user_id)
        .bind(&input.credential_id)
        .bind(&input.public_key)
        .bind(u32_to_i64(input.sign_count))
        .bind(transports)
        .bind(&input.aaguid)
        .bind(&input.attestation_fmt)
        .bind(encode_resident_key(input.resident_key))
        .bind(input.backup_eligible)
        .bind(input.backup_state)
        .bind(input.label.as_deref())
        .bind(&input.rp_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        let credential = WebAuthnCredential::try_from(row)?;
        info!(credential = %credential.id, "WebAuthn credential registered");
        Ok(credential)
    }

    /// Remove one credential of an account. Returns whether it existed.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn delete_credential(
        &self,
        user_id: Uuid,
        credential_id: &str,
    ) -> Result<bool, IdentityError> {
        let result = sqlx::query(
            "DELETE FROM web_authn_credentials WHERE user_id = $1 AND credential_id = $2",
        )
        .bind(user_id)
        .bind(credential_id)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(result.rows_affected() > 0)
    }

    /// Remove every credential of an account, returning how many were removed.
    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn delete_credentials_for_user(&self, user_id: Uuid) -> Result<u64, IdentityError> {
        let result = sqlx::query("DELETE FROM web_authn_credentials WHERE user_id = $1")
            .bind(user_id)
            .execute(&self.pool)
            .await
            .map_err(db_error)?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self))]
    pub async fn credential_exists(&self, credential_id: &str) -> Result<bool, IdentityError> {
        let exists: bool = sqlx::query_scalar(
            "SELECT EXISTS (SELECT 1 FROM web_authn_credentials WHERE credential_id = $1)",
        )
        .bind(credential_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(exists)
    }

    #[instrument(skip(self), fields(user_id = %user_id))]
    pub async fn credential_exists_for_user(
        &self,
        user_id: Uuid,
        credential_id: &str,
    ) -> Result<bool, IdentityError> {
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM web_authn_credentials WHERE user_id = $1 AND credential_id = $2
            )
            "#,
        )
        .bind(user_id)
        .bind(credential_id)
        .fetch_one(&self.pool)
        .await
        .map_err(db_error)?;

        Ok(exists)
    }

    /// Record a successful assertion.
    #[instrument(skip(self, usage), fields(sign_count = usage.sign_count))]
    pub async fn update_credential_usage(
        &self,
        credential_id: &str,
        usage: &CredentialUsage,
    ) -> Result<(), IdentityError> {
        let result = sqlx::query(
            r#"
            UPDATE web_authn_credentials
            SET sign_count = $2, last_used_utc = $3, backup_eligible = $4, backup_state = $5
            WHERE credential_id = $1
            "#,
        )
        .bind(credential_id)
        .bind(u32_to_i64(usage.sign_count))
        .bind(usage.last_used_utc)
        .bind(usage.backup_eligible)
        .bind(usage.backup_state)
        .execute(&self.pool)
        .await
        .map_err(db_error)?;

        ensure_affected(result.rows_affected())
    }
}
