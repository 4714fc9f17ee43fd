//! Common test utilities for identity-service integration tests.
//!
//! Every test gets its own schema so tests can run in parallel against one
//! database.

#![allow(dead_code)]

use std::sync::{Arc, Once};

use identity_service::config::DatabaseConfig;
use identity_service::db::{create_pool, run_migrations};
use identity_service::models::{Account, NewAccount};
use identity_service::{Database, StaticPermissionRegistry};
use sqlx::postgres::PgPool;
use uuid::Uuid;

static INIT: Once = Once::new();

pub const TEST_PERMISSIONS: [(&str, &str); 3] = [
    ("mail", "Mailbox"),
    ("players", "Player records"),
    ("server", "Server maintenance"),
];

/// Initialize tracing for tests (only once).
pub fn init_tracing() {
    INIT.call_once(|| {
        tracing_subscriber::fmt()
            .with_env_filter("info,identity_service=debug,sqlx=warn")
            .with_test_writer()
            .try_init()
            .ok();
    });
}

pub struct TestContext {
    pub db: Database,
    admin_pool: PgPool,
    schema: String,
}

impl TestContext {
    /// Drop the schema created for this test.
    pub async fn teardown(self) {
        self.db.pool().close().await;
        sqlx::query(&format!("DROP SCHEMA IF EXISTS {} CASCADE", self.schema))
            .execute(&self.admin_pool)
            .await
            .ok();
        self.admin_pool.close().await;
    }
}

/// Fresh schema with migrations applied and defaults ensured.
pub async fn setup() -> TestContext {
    init_tracing();

    let database_url = std::env::var("TEST_DATABASE_URL")
        .expect("TEST_DATABASE_URL must be set to run database tests");

    let schema = format!("identity_test_{}", Uuid::new_v4().simple());

    let admin_pool = create_pool(&DatabaseConfig {
        url: database_url.clone(),
        max_connections: 1,
        min_connections: 0,
        schema: None,
    })
    .await
    .expect("Failed to connect to test database");

    sqlx::query(&format!("CREATE SCHEMA {}", schema))
        .execute(&admin_pool)
        .await
        .expect("Failed to create test schema");

    let pool = create_pool(&DatabaseConfig {
        url: database_url,
        max_connections: 8,
        min_connections: 0,
        schema: Some(schema.clone()),
    })
    .await
    .expect("Failed to connect test pool");

    run_migrations(&pool).await.expect("Failed to run migrations");

    let db = Database::new(pool, Arc::new(StaticPermissionRegistry::new(TEST_PERMISSIONS)));
    db.ensure_defaults()
        .await
        .expect("Failed to ensure defaults");

    TestContext {
        db,
        admin_pool,
        schema,
    }
}

/// Staff account with a username.
pub async fn create_staff(db: &Database, username: &str) -> Account {
    db.create_account(&NewAccount {
        username: Some(username.to_string()),
        password_hash: "$argon2id$test".to_string(),
        password_algo: "argon2id".to_string(),
        ..NewAccount::default()
    })
    .await
    .expect("Failed to create staff account")
}

/// Staff account holding the admin role.
pub async fn create_admin(db: &Database, username: &str) -> Account {
    let account = create_staff(db, username).await;
    db.assign_role(account.id, identity_service::ROLE_ADMIN)
        .await
        .expect("Failed to assign admin role");
    account
}
