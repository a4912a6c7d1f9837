//! Test utilities for database integration tests
//!
//! Provides an in-memory SQLite database with the full schema applied,
//! reusable across all mailroom crates for integration testing.

use crate::DbConnection;
use mailroom_migrations::Migrator;
use sea_orm::*;
use sea_orm_migration::MigratorTrait;
use std::sync::Arc;

/// Test database backed by in-memory SQLite
///
/// Each instance is a fully isolated database. The connection pool is
/// pinned to a single connection because every in-memory SQLite
/// connection sees its own database.
pub struct TestDatabase {
    pub db: Arc<DbConnection>,
    pub database_url: String,
}

impl TestDatabase {
    /// Create a new empty test database (no schema)
    pub async fn new() -> anyhow::Result<Self> {
        let database_url = "sqlite::memory:".to_owned();

        let mut opt = ConnectOptions::new(database_url.clone());
        opt.max_connections(1).min_connections(1).sqlx_logging(false);

        let db = Database::connect(opt)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to connect to test database: {}", e))?;

        let test_db = TestDatabase {
            db: Arc::new(db),
            database_url,
        };

        test_db
            .test_connection()
            .await
            .map_err(|e| anyhow::anyhow!("Initial connection test failed: {}", e))?;

        Ok(test_db)
    }

    /// Create a test database with all migrations applied
    pub async fn with_migrations() -> anyhow::Result<Self> {
        let test_db = Self::new().await?;

        Migrator::up(&*test_db.db, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run migrations: {}", e))?;

        Ok(test_db)
    }

    /// Create a test database and run migrations with a custom Migrator
    pub async fn with_custom_migrations<M>() -> anyhow::Result<Self>
    where
        M: MigratorTrait,
    {
        let test_db = Self::new().await?;

        M::up(&*test_db.db, None)
            .await
            .map_err(|e| anyhow::anyhow!("Failed to run custom migrations: {}", e))?;

        Ok(test_db)
    }

    /// Execute raw SQL for testing
    pub async fn execute_sql(&self, sql: &str) -> anyhow::Result<ExecResult> {
        let statement = Statement::from_string(DatabaseBackend::Sqlite, sql.to_owned());
        let result = self
            .db
            .execute(statement)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result)
    }

    /// Query raw SQL and return results
    pub async fn query_sql(&self, sql: &str) -> anyhow::Result<Vec<QueryResult>> {
        let statement = Statement::from_string(DatabaseBackend::Sqlite, sql.to_owned());
        let result = self
            .db
            .query_all(statement)
            .await
            .map_err(anyhow::Error::from)?;
        Ok(result)
    }

    /// Delete all rows from the domain tables, preserving schema
    pub async fn cleanup_all_tables(&self) -> anyhow::Result<()> {
        for table in ["emails", "api_keys"] {
            let sql = format!("DELETE FROM {}", table);
            self.execute_sql(&sql).await.ok(); // Ignore missing tables
        }
        Ok(())
    }

    /// Test database connectivity
    pub async fn test_connection(&self) -> anyhow::Result<()> {
        let statement = Statement::from_string(DatabaseBackend::Sqlite, "SELECT 1".to_owned());
        let result = self.db.query_one(statement).await?;

        if result.is_none() {
            return Err(anyhow::anyhow!("Connection test failed"));
        }

        Ok(())
    }

    /// Get the database connection
    pub fn connection(&self) -> &DbConnection {
        &self.db
    }

    /// Get the database connection as Arc
    pub fn connection_arc(&self) -> Arc<DbConnection> {
        Arc::clone(&self.db)
    }
}

/// Helper to wait for a condition with timeout
pub async fn wait_for<F, Fut>(
    condition: F,
    timeout_secs: u64,
    check_interval_ms: u64,
) -> anyhow::Result<()>
where
    F: Fn() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    let start = std::time::Instant::now();
    let timeout = std::time::Duration::from_secs(timeout_secs);
    let interval = std::time::Duration::from_millis(check_interval_ms);

    while start.elapsed() < timeout {
        if condition().await {
            return Ok(());
        }
        tokio::time::sleep(interval).await;
    }

    Err(anyhow::anyhow!("Timeout waiting for condition"))
}
