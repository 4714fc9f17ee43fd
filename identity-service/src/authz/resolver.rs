//! Effective permission computation.
//!
//! Role grants are unioned first; account overrides are applied on top, with
//! `deny` masks clearing facets regardless of what any role or `allow`
//! override contributed.

use std::collections::HashMap;

use serde::Serialize;

use super::capability::{Capability, Operation};
use crate::models::{AccountOverride, OverrideMode};

/// Capabilities an account ends up with, keyed by permission key. Keys not
/// present are all-false.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EffectivePermissions(HashMap<String, Capability>);

impl EffectivePermissions {
    pub fn capability(&self, key: &str) -> Capability {
        self.0.get(key).copied().unwrap_or_default()
    }

    pub fn allows(&self, key: &str, op: Operation) -> bool {
        self.capability(key).allows(op)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &Capability)> {
        self.0.iter()
    }

    pub fn into_inner(self) -> HashMap<String, Capability> {
        self.0
    }
}

/// Merge role grants and overrides.
///
/// `grants` holds one `(key, capability)` per role-permission row across every
/// role the account has; `has_roles` is false when the account holds no role
/// at all, in which case nothing is granted and overrides are not consulted.
pub fn resolve_effective_permissions<G, O>(
    has_roles: bool,
    grants: G,
    overrides: O,
) -> EffectivePermissions
where
    G: IntoIterator<Item = (String, Capability)>,
    O: IntoIterator<Item = AccountOverride>,
{
    if !has_roles {
        return EffectivePermissions::default();
    }

    let mut result: HashMap<String, Capability> = HashMap::new();
    for (key, capability) in grants {
        let entry = result.entry(key).or_default();
        *entry = entry.union(capability);
    }

    for ov in overrides {
        let entry = result.entry(ov.key).or_default();
        *entry = match ov.mode {
            OverrideMode::Allow => entry.union(ov.capability),
            OverrideMode::Deny => entry.deny(ov.capability),
        };
    }

    EffectivePermissions(result)
}
