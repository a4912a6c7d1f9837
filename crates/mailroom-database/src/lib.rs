//! Database connection and query utilities

pub use sea_orm;
mod connection;

pub use connection::{establish_connection, DbConnection};

// Export test utilities for use by other crates in their tests
pub mod test_utils;

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::ConnectionTrait;

    #[tokio::test]
    async fn test_establish_connection_with_migrations() -> anyhow::Result<()> {
        let path = std::env::temp_dir().join(format!("mailroom-test-{}.db", uuid::Uuid::new_v4()));
        let database_url = format!("sqlite://{}?mode=rwc", path.display());

        let db = establish_connection(&database_url).await?;

        let statement = sea_orm::Statement::from_string(
            sea_orm::DatabaseBackend::Sqlite,
            "SELECT 1".to_owned(),
        );

        let query_result = db.query_one(statement).await?;
        assert!(query_result.is_some());

        std::fs::remove_file(&path).ok();

        Ok(())
    }
}
