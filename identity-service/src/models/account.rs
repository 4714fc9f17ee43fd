//! Login account model.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::services::error::IdentityError;
use crate::utils::codec::opt_u32_from_i64_checked;

/// Account row as stored; `commander_id` is still in its BIGINT form.
#[derive(Debug, Clone, FromRow)]
pub struct AccountRow {
    pub id: Uuid,
    pub username: Option<String>,
    pub username_normalized: Option<String>,
    pub commander_id: Option<i64>,
    pub password_hash: String,
    pub password_algo: String,
    pub password_updated_utc: DateTime<Utc>,
    pub is_admin: bool,
    pub disabled_utc: Option<DateTime<Utc>>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub web_authn_user_handle: Option<Vec<u8>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Login account. Staff accounts carry a username, player accounts a
/// commander id; either, both or neither may be set.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Account {
    pub id: Uuid,
    pub username: Option<String>,
    pub username_normalized: Option<String>,
    pub commander_id: Option<u32>,
    #[serde(skip_serializing)]
    pub password_hash: String,
    pub password_algo: String,
    pub password_updated_utc: DateTime<Utc>,
    pub is_admin: bool,
    pub disabled_utc: Option<DateTime<Utc>>,
    pub last_login_utc: Option<DateTime<Utc>>,
    pub web_authn_user_handle: Option<Vec<u8>>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

impl Account {
    pub fn is_disabled(&self) -> bool {
        self.disabled_utc.is_some()
    }
}

impl TryFrom<AccountRow> for Account {
    type Error = IdentityError;

    fn try_from(row: AccountRow) -> Result<Self, Self::Error> {
        Ok(Self {
            id: row.id,
            username: row.username,
            username_normalized: row.username_normalized,
            commander_id: opt_u32_from_i64_checked(row.commander_id)?,
            password_hash: row.password_hash,
            password_algo: row.password_algo,
            password_updated_utc: row.password_updated_utc,
            is_admin: row.is_admin,
            disabled_utc: row.disabled_utc,
            last_login_utc: row.last_login_utc,
            web_authn_user_handle: row.web_authn_user_handle,
            created_utc: row.created_utc,
            updated_utc: row.updated_utc,
        })
    }
}

/// Input for creating an account.
#[derive(Debug, Clone, Default)]
pub struct NewAccount {
    pub username: Option<String>,
    pub commander_id: Option<u32>,
    pub password_hash: String,
    pub password_algo: String,
    pub is_admin: bool,
    pub web_authn_user_handle: Option<Vec<u8>>,
}

/// Canonical form used for username uniqueness and lookups.
pub fn normalize_username(username: &str) -> String {
    username.trim().to_lowercase()
}
