//! service-core: error taxonomy, common settings and tracing setup shared by
//! the service binaries in this workspace.
pub mod config;
pub mod error;
pub mod observability;

pub use error::{AppError, ErrorResponse};
