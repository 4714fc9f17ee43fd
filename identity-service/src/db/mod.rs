//! Postgres pool construction and schema migrations.

use std::time::Duration;

use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::{info, instrument};

use crate::config::{is_valid_schema_name, DatabaseConfig};

const ACQUIRE_TIMEOUT: Duration = Duration::from_secs(30);
const IDLE_TIMEOUT: Duration = Duration::from_secs(600);
const MAX_LIFETIME: Duration = Duration::from_secs(1800);

/// Open the pool. When a schema is configured every connection gets it as its
/// `search_path`, so migrations and queries land there.
#[instrument(skip(config), fields(schema = ?config.schema))]
pub async fn create_pool(config: &DatabaseConfig) -> Result<PgPool, sqlx::Error> {
    info!(
        max_connections = config.max_connections,
        min_connections = config.min_connections,
        "Connecting to PostgreSQL"
    );

    let mut options = PgPoolOptions::new()
        .max_connections(config.max_connections)
        .min_connections(config.min_connections)
        .acquire_timeout(ACQUIRE_TIMEOUT)
        .idle_timeout(IDLE_TIMEOUT)
        .max_lifetime(MAX_LIFETIME);

    if let Some(schema) = &config.schema {
        if !is_valid_schema_name(schema) {
            return Err(sqlx::Error::Configuration(
                format!("invalid schema name: {}", schema).into(),
            ));
        }
        let statement = format!("SET search_path TO {}", schema);
        options = options.after_connect(move |conn, _meta| {
            let statement = statement.clone();
            Box::pin(async move {
                sqlx::query(&statement).execute(&mut *conn).await?;
                Ok(())
            })
        });
    }

    let pool = options.connect(&config.url).await?;
    info!("PostgreSQL connection pool established");
    Ok(pool)
}

/// Apply the embedded identity schema migrations.
pub async fn run_migrations(pool: &PgPool) -> Result<(), sqlx::migrate::MigrateError> {
    info!("Running identity schema migrations");
    sqlx::migrate!("./migrations").run(pool).await?;
    info!("Identity schema is current");
    Ok(())
}
