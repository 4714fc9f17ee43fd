pub mod capability;
pub mod registry;
pub mod resolver;

pub use capability::{Capability, Operation};
pub use registry::{builtin_registry, PermissionRegistry, StaticPermissionRegistry, ROLE_ADMIN, ROLE_PLAYER};
pub use resolver::{resolve_effective_permissions, EffectivePermissions};
