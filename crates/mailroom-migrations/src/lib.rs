//! Database migrations for the Mailroom service

pub use sea_orm_migration::prelude::*;

mod migration;

pub use migration::Migrator;
