//! identity-service: account identity, role-based authorization with
//! per-account overrides, and the commander claim protocol.

pub mod authz;
pub mod config;
pub mod db;
pub mod models;
pub mod services;
pub mod utils;

pub use authz::{
    Capability, EffectivePermissions, Operation, PermissionRegistry, StaticPermissionRegistry,
    ROLE_ADMIN, ROLE_PLAYER,
};
pub use services::{Database, IdentityError, RegistrationService};
