pub use sea_orm_migration::prelude::*;

mod m20250101_000001_create_api_keys;
mod m20250101_000002_create_emails;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_api_keys::Migration),
            Box::new(m20250101_000002_create_emails::Migration),
        ]
    }
}
