//! Role and permission catalog models.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;
use uuid::Uuid;

use crate::authz::Capability;

/// Named policy bucket such as `admin` or `player`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Role {
    pub id: Uuid,
    pub name: String,
    pub description: String,
    pub updated_by: Option<String>,
    pub created_utc: DateTime<Utc>,
    pub updated_utc: DateTime<Utc>,
}

/// Permission key in the global catalog.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, FromRow)]
pub struct Permission {
    pub id: Uuid,
    pub key: String,
    pub description: String,
    pub created_utc: DateTime<Utc>,
}

/// Capability a role holds for one permission key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct RolePolicyEntry {
    pub key: String,
    #[sqlx(flatten)]
    pub capability: Capability,
}
