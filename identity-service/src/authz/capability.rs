//! Four-facet capability masks and their merge laws.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Action a caller wants to perform against a permission key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Operation {
    ReadSelf,
    ReadAny,
    WriteSelf,
    WriteAny,
}

impl Operation {
    pub const ALL: [Operation; 4] = [
        Operation::ReadSelf,
        Operation::ReadAny,
        Operation::WriteSelf,
        Operation::WriteAny,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ReadSelf => "read_self",
            Self::ReadAny => "read_any",
            Self::WriteSelf => "write_self",
            Self::WriteAny => "write_any",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Permitted actions for one permission key. Decodes straight from the
/// `can_*` columns of the policy and override tables.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize, FromRow)]
pub struct Capability {
    #[sqlx(rename = "can_read_self")]
    pub read_self: bool,
    #[sqlx(rename = "can_read_any")]
    pub read_any: bool,
    #[sqlx(rename = "can_write_self")]
    pub write_self: bool,
    #[sqlx(rename = "can_write_any")]
    pub write_any: bool,
}

impl Capability {
    pub const fn none() -> Self {
        Self {
            read_self: false,
            read_any: false,
            write_self: false,
            write_any: false,
        }
    }

    pub const fn full() -> Self {
        Self {
            read_self: true,
            read_any: true,
            write_self: true,
            write_any: true,
        }
    }

    pub fn is_empty(&self) -> bool {
        *self == Self::none()
    }

    /// Facet-wise OR. Only ever adds capability.
    pub fn union(self, other: Capability) -> Capability {
        Capability {
            read_self: self.read_self || other.read_self,
            read_any: self.read_any || other.read_any,
            write_self: self.write_self || other.write_self,
            write_any: self.write_any || other.write_any,
        }
    }

    /// Clear every facet set in `mask`, leave the rest untouched.
    pub fn deny(self, mask: Capability) -> Capability {
        Capability {
            read_self: self.read_self && !mask.read_self,
            read_any: self.read_any && !mask.read_any,
            write_self: self.write_self && !mask.write_self,
            write_any: self.write_any && !mask.write_any,
        }
    }

    pub fn allows(&self, op: Operation) -> bool {
        match op {
            Operation::ReadSelf => self.read_self,
            Operation::ReadAny => self.read_any,
            Operation::WriteSelf => self.write_self,
            Operation::WriteAny => self.write_any,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_union_adds_only() {
        let a = Capability {
            read_self: true,
            ..Capability::none()
        };
        let b = Capability {
            write_any: true,
            ..Capability::none()
        };
        let merged = a.union(b);
        assert!(merged.read_self && merged.write_any);
        assert!(!merged.read_any && !merged.write_self);
    }

    #[test]
    fn test_deny_clears_masked_facets() {
        let mask = Capability {
            read_any: true,
            write_any: true,
            ..Capability::none()
        };
        let result = Capability::full().deny(mask);
        assert!(result.allows(Operation::ReadSelf));
        assert!(result.allows(Operation::WriteSelf));
        assert!(!result.allows(Operation::ReadAny));
        assert!(!result.allows(Operation::WriteAny));
    }

    #[test]
    fn test_empty() {
        assert!(Capability::default().is_empty());
        assert!(!Capability::full().is_empty());
        assert!(Capability::full().deny(Capability::full()).is_empty());
    }
}
