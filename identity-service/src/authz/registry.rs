//! Permission keys known to the running binary.

use std::collections::BTreeMap;

pub const ROLE_ADMIN: &str = "admin";
pub const ROLE_PLAYER: &str = "player";

/// Source of truth for which permission keys exist. The catalog tables are
/// reconciled against it; it is never written back.
pub trait PermissionRegistry: Send + Sync {
    /// Permission key to human description.
    fn known_permissions(&self) -> BTreeMap<String, String>;
}

/// Registry backed by a fixed list.
#[derive(Debug, Clone, Default)]
pub struct StaticPermissionRegistry {
    permissions: BTreeMap<String, String>,
}

impl StaticPermissionRegistry {
    pub fn new<I, K, D>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, D)>,
        K: Into<String>,
        D: Into<String>,
    {
        Self {
            permissions: entries
                .into_iter()
                .map(|(k, d)| (k.into(), d.into()))
                .collect(),
        }
    }
}

impl PermissionRegistry for StaticPermissionRegistry {
    fn known_permissions(&self) -> BTreeMap<String, String> {
        self.permissions.clone()
    }
}

/// Permission keys the game server enforces.
pub fn builtin_registry() -> StaticPermissionRegistry {
    StaticPermissionRegistry::new([
        ("players", "Player records and moderation"),
        ("server", "Server configuration and maintenance"),
        ("me.items", "Own inventory items"),
        ("me.resources", "Own resources"),
        ("me.ships", "Own ships"),
        ("me.skins", "Own skins"),
    ])
}
