pub mod accounts;
pub mod authorization;
pub mod credentials;
pub mod database;
pub mod error;
pub mod metrics;
pub mod policy;
pub mod registration;
pub mod registration_service;

pub use database::Database;
pub use error::IdentityError;
pub use policy::BootstrapReport;
pub use registration_service::{IssuedChallenge, RegistrationService};
