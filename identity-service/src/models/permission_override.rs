//! Per-account permission overrides.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::authz::Capability;

/// How an override combines with role-derived capability.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OverrideMode {
    Allow,
    Deny,
}

impl OverrideMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Allow => "allow",
            Self::Deny => "deny",
        }
    }

    /// Parse a submitted mode. Anything other than `deny` (case-insensitive,
    /// trimmed) is treated as `allow`. Only for caller input on the write
    /// path; stored rows go through [`OverrideMode::from_stored`].
    pub fn parse_lenient(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "deny" => Self::Deny,
            "allow" => Self::Allow,
            _ => {
                tracing::warn!(mode = %value, "Unrecognized override mode, treating as allow");
                Self::Allow
            }
        }
    }

    /// Strict parse of a stored mode. `None` for anything that is not
    /// exactly `allow` or `deny`.
    pub fn from_stored(value: &str) -> Option<Self> {
        match value {
            "allow" => Some(Self::Allow),
            "deny" => Some(Self::Deny),
            _ => None,
        }
    }
}

impl std::fmt::Display for OverrideMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Override row joined with its permission key.
#[derive(Debug, Clone, FromRow)]
pub struct AccountOverrideRow {
    pub key: String,
    pub mode: String,
    #[sqlx(flatten)]
    pub capability: Capability,
}

/// An account-specific exception for one permission key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AccountOverride {
    pub key: String,
    pub mode: OverrideMode,
    pub capability: Capability,
}

impl AccountOverride {
    pub fn allow(key: impl Into<String>, capability: Capability) -> Self {
        Self {
            key: key.into(),
            mode: OverrideMode::Allow,
            capability,
        }
    }

    pub fn deny(key: impl Into<String>, capability: Capability) -> Self {
        Self {
            key: key.into(),
            mode: OverrideMode::Deny,
            capability,
        }
    }
}

/// A stored row whose mode is neither `allow` nor `deny`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnknownOverrideMode {
    pub key: String,
    pub mode: String,
}

impl TryFrom<AccountOverrideRow> for AccountOverride {
    type Error = UnknownOverrideMode;

    fn try_from(row: AccountOverrideRow) -> Result<Self, Self::Error> {
        match OverrideMode::from_stored(&row.mode) {
            Some(mode) => Ok(Self {
                key: row.key,
                mode,
                capability: row.capability,
            }),
            None => Err(UnknownOverrideMode {
                key: row.key,
                mode: row.mode,
            }),
        }
    }
}
