use sea_orm_migration::prelude::*;

use super::m20250101_000002_create_artists::Artists;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(Albums::Table)
                    .if_not_exists()
                    .col(ColumnDef::new(Albums::Id).uuid().not_null().primary_key())
                    .col(
                        ColumnDef::new(Albums::CatalogId)
                            .string_len(64)
                            .not_null()
                            .unique_key(),
                    )
                    .col(ColumnDef::new(Albums::Title).string_len(255).not_null())
                    .col(ColumnDef::new(Albums::ArtistId).uuid().not_null())
                    .col(ColumnDef::new(Albums::ReleaseDate).date().null())
                    .col(
                        ColumnDef::new(Albums::TotalTracks)
                            .integer()
                            .not_null()
                            .default(0),
                    )
                    .col(
                        ColumnDef::new(Albums::Popularity)
                            .small_integer()
                            .not_null()
                            .default(0),
                    )
                    .col(ColumnDef::new(Albums::ImageUrl).string_len(512).null())
                    .col(
                        ColumnDef::new(Albums::AlbumType)
                            .string_len(32)
                            .not_null()
                            .default("album"),
                    )
                    .col(
                        ColumnDef::new(Albums::LastUpdated)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .col(
                        ColumnDef::new(Albums::CreatedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_albums_artist_id")
                            .from(Albums::Table, Albums::ArtistId)
                            .to(Artists::Table, Artists::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_albums_artist_id")
                    .table(Albums::Table)
                    .col(Albums::ArtistId)
                    .to_owned(),
            )
            .await?;

        manager
            .create_index(
                Index::create()
                    .name("idx_albums_release_date")
                    .table(Albums::Table)
                    .col(Albums::ReleaseDate)
                    .to_owned(),
            )
            .await?;

        Ok(())
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(Table::drop().table(Albums::Table).to_owned())
            .await
    }
}

#[derive(DeriveIden)]
pub enum Albums {
    Table,
    Id,
    CatalogId,
    Title,
    ArtistId,
    ReleaseDate,
    TotalTracks,
    Popularity,
    ImageUrl,
    AlbumType,
    LastUpdated,
    CreatedAt,
}
