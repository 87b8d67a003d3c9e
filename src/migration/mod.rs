//! SeaORM database migrations.

pub use sea_orm_migration::prelude::*;

mod m20260310_000001_create_devices;
mod m20260310_000002_create_jobs;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20260310_000001_create_devices::Migration),
            Box::new(m20260310_000002_create_jobs::Migration),
        ]
    }
}
