//! Database handle shared by every identity operation.

use std::sync::Arc;

use sqlx::postgres::PgPool;
use tracing::{error, instrument};

use crate::authz::PermissionRegistry;
use crate::services::error::IdentityError;
use crate::services::metrics::ERRORS_TOTAL;

/// Connection pool plus the permission registry the catalog is reconciled
/// against. Cheap to clone.
#[derive(Clone)]
pub struct Database {
    pub(crate) pool: PgPool,
    pub(crate) registry: Arc<dyn PermissionRegistry>,
}

impl Database {
    pub fn new(pool: PgPool, registry: Arc<dyn PermissionRegistry>) -> Self {
        Self { pool, registry }
    }

    /// Get a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub fn registry(&self) -> &dyn PermissionRegistry {
        self.registry.as_ref()
    }

    /// Check database health.
    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), IdentityError> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(db_error)?;
        Ok(())
    }
}

/// Convert a driver error, counting anything that is not a plain miss.
pub(crate) fn db_error(err: sqlx::Error) -> IdentityError {
    let err = IdentityError::from(err);
    match err {
        IdentityError::NotFound | IdentityError::UniqueViolation(_) => {}
        ref other => {
            error!(error = %other, "Database operation failed");
            ERRORS_TOTAL.with_label_values(&[other.kind()]).inc();
        }
    }
    err
}

/// Zero affected rows on a keyed update means the key does not exist.
pub(crate) fn ensure_affected(rows_affected: u64) -> Result<(), IdentityError> {
    if rows_affected == 0 {
        Err(IdentityError::NotFound)
    } else {
        Ok(())
    }
}
