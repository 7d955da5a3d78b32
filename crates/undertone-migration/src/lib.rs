pub use sea_orm_migration::prelude::*;

mod m20250101_000001_create_users;
mod m20250101_000002_create_artists;
mod m20250101_000003_create_albums;
mod m20250101_000004_create_album_recommendations;

pub struct Migrator;

#[async_trait::async_trait]
impl MigratorTrait for Migrator {
    fn migrations() -> Vec<Box<dyn MigrationTrait>> {
        vec![
            Box::new(m20250101_000001_create_users::Migration),
            Box::new(m20250101_000002_create_artists::Migration),
            Box::new(m20250101_000003_create_albums::Migration),
            Box::new(m20250101_000004_create_album_recommendations::Migration),
        ]
    }
}
