//! WebAuthn public-key credential model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::services::error::IdentityError;
use crate::utils::codec::{decode_resident_key, u32_from_i64_checked};

/// Credential row as stored.
#[derive(Debug, Clone, FromRow)]
pub struct WebAuthnCredentialRow {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credential_id: String,
    pub public_key: Vec<u8>,
    pub sign_count: i64,
    pub transports: Option<serde_json::Value>,
    pub aaguid: String,
    pub attestation_fmt: String,
    pub resident_key: Option<String>,
    pub backup_eligible: Option<bool>,
    pub backup_state: Option<bool>,
    pub created_utc: DateTime<Utc>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub label: Option<String>,
    pub rp_id: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WebAuthnCredential {
    pub id: Uuid,
    pub user_id: Uuid,
    pub credential_id: String,
    pub public_key: Vec<u8>,
    pub sign_count: u32,
    pub transports: Vec<String>,
    pub aaguid: String,
    pub attestation_fmt: String,
    pub resident_key: bool,
    pub backup_eligible: Option<bool>,
    pub backup_state: Option<bool>,
    pub created_utc: DateTime<Utc>,
    pub last_used_utc: Option<DateTime<Utc>>,
    pub label: Option<String>,
    pub rp_id: String,
}

impl TryFrom<WebAuthnCredentialRow> for WebAuthnCredential {
    type Error = IdentityError;

    fn try_from(row: WebAuthnCredentialRow) -> Result<Self, Self::Error> {
        let transports = match row.transports {
            None | Some(serde_json::Value::Null) => Vec::new(),
            Some(value) => serde_json::from_value(value).map_err(|e| {
                IdentityError::Internal(anyhow::anyhow!(
                    "invalid transports for credential {}: {}",
                    row.credential_id,
                    e
                ))
            })?,
        };

        Ok(Self {
            id: row.id,
            user_id: row.user_id,
            sign_count: u32_from_i64_checked(row.sign_count)?,
            resident_key: decode_resident_key(row.resident_key.as_deref()),
            credential_id: row.credential_id,
            public_key: row.public_key,
            transports,
            aaguid: row.aaguid,
            attestation_fmt: row.attestation_fmt,
            backup_eligible: row.backup_eligible,
            backup_state: row.backup_state,
            created_utc: row.created_utc,
            last_used_utc: row.last_used_utc,
            label: row.label,
            rp_id: row.rp_id,
        })
    }
}

/// Input for registering a credential.
#[derive(Debug, Clone, Default)]
pub struct NewWebAuthnCredential {
    pub user_id: Uuid,
    pub credential_id: String,
    pub public_key: Vec<u8>,
    pub sign_count: u32,
    pub transports: Vec<String>,
    pub aaguid: String,
    pub attestation_fmt: String,
    pub resident_key: bool,
    pub backup_eligible: Option<bool>,
    pub backup_state: Option<bool>,
    pub label: Option<String>,
    pub rp_id: String,
}

/// Authenticator state reported after a successful assertion.
#[derive(Debug, Clone)]
pub struct CredentialUsage {
    pub sign_count: u32,
    pub last_used_utc: DateTime<Utc>,
    pub backup_eligible: Option<bool>,
    pub backup_state: Option<bool>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> WebAuthnCredentialRow {
        WebAuthnCredentialRow {
            id: Uuid::new_v4(),
            user_id: Uuid::new_v4(),
            credential_id: "cred-1".to_string(),
            public_key: vec![1, 2, 3],
            sign_count: 0,
            transports: None,
            aaguid: String::new(),
            attestation_fmt: "none".to_string(),
            resident_key: Some(String::new()),
            backup_eligible: None,
            backup_state: None,
            created_utc: Utc::now(),
            last_used_utc: None,
            label: None,
            rp_id: "example.org".to_string(),
        }
    }

    #[test]
    fn test_missing_transports_decode_empty() {
        let cred = WebAuthnCredential::try_from(row()).unwrap();
        assert!(cred.transports.is_empty());
        assert!(!cred.resident_key);

        let mut r = row();
        r.transports = Some(serde_json::Value::Null);
        assert!(WebAuthnCredential::try_from(r).unwrap().transports.is_empty());
    }

    #[test]
    fn test_transports_keep_order() {
        let mut r = row();
        r.transports = Some(serde_json::json!(["usb", "nfc", "internal"]));
        let cred = WebAuthnCredential::try_from(r).unwrap();
        assert_eq!(cred.transports, vec!["usb", "nfc", "internal"]);
    }

    #[test]
    fn test_negative_sign_count_rejected() {
        let mut r = row();
        r.sign_count = -1;
        assert!(matches!(
            WebAuthnCredential::try_from(r),
            Err(IdentityError::OutOfRange(-1))
        ));
    }

    #[test]
    fn test_resident_key_text_decodes() {
        let mut r = row();
        r.resident_key = Some("required".to_string());
        assert!(WebAuthnCredential::try_from(r).unwrap().resident_key);
    }
}
