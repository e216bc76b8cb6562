pub use sea_orm_migration::prelude::*;

use sea_orm::ConnectionTrait;

mod m20240101_000001_create_profiles;
mod m20240101_000002_create_items;
mod m20240101_000003_create_messages;
mod m20240101_000004_create_images_bucket;

pub mod rls;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20240101_000001_create_profiles::Migration),
            Box::new(m20240101_000002_create_items::Migration),
            Box::new(m20240101_000003_create_messages::Migration),
            Box::new(m20240101_000004_create_images_bucket::Migration),
        ]
    }
}

/// Runs raw SQL statements in order.
pub(crate) async fn exec_all<I, S>(manager: &SchemaManager<'_>, statements: I) -> Result<(), DbErr>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    let db = manager.get_connection();
    for sql in statements {
        db.execute_unprepared(sql.as_ref()).await?;
    }
    Ok(())
}
