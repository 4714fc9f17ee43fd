use std::sync::Arc;

use identity_service::{
    authz::builtin_registry,
    config::IdentityConfig,
    db::{create_pool, run_migrations},
    Database,
};
use service_core::error::AppError;
use service_core::observability::logging::{init_tracing, shutdown_tracing};

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Load configuration - fail fast if invalid
    let config = IdentityConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    identity_service::services::metrics::init_metrics();

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Bootstrapping identity store"
    );

    let result = bootstrap(&config).await;
    if let Err(ref e) = result {
        tracing::error!(error = %e, "Identity bootstrap failed");
    }

    shutdown_tracing();
    result
}

/// Bring the schema and the authorization catalog up to date.
async fn bootstrap(config: &IdentityConfig) -> Result<(), AppError> {
    let pool = create_pool(&config.database)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Failed to connect: {}", e)))?;

    run_migrations(&pool)
        .await
        .map_err(|e| AppError::DatabaseError(anyhow::anyhow!("Migration failed: {}", e)))?;

    let db = Database::new(pool, Arc::new(builtin_registry()));
    db.health_check().await?;

    let report = db.ensure_defaults().await?;
    let admins = db.count_admin_accounts().await?;
    if admins == 0 {
        tracing::warn!("No enabled admin account exists");
    }

    tracing::info!(
        permissions_created = report.permissions_created,
        roles_created = report.roles_created,
        admin_accounts = admins,
        "Identity store ready"
    );

    Ok(())
}
