use sea_orm_migration::prelude::*;

use super::m20250101_000001_create_users::Users;
use super::m20250101_000003_create_albums::Albums;

#[derive(DeriveMigrationName)]
pub struct Migration;

#[async_trait::async_trait]
impl MigrationTrait for Migration {
    async fn up(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .create_table(
                Table::create()
                    .table(AlbumRecommendations::Table)
                    .if_not_exists()
                    .col(
                        ColumnDef::new(AlbumRecommendations::UserId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AlbumRecommendations::AlbumId)
                            .uuid()
                            .not_null(),
                    )
                    .col(
                        ColumnDef::new(AlbumRecommendations::Score)
                            .float()
                            .not_null()
                            .default(1.0),
                    )
                    .col(
                        ColumnDef::new(AlbumRecommendations::RecommendedAt)
                            .timestamp_with_time_zone()
                            .not_null()
                            .default(Expr::current_timestamp()),
                    )
                    .primary_key(
                        Index::create()
                            .col(AlbumRecommendations::UserId)
                            .col(AlbumRecommendations::AlbumId),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_album_recommendations_user_id")
                            .from(AlbumRecommendations::Table, AlbumRecommendations::UserId)
                            .to(Users::Table, Users::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .foreign_key(
                        ForeignKey::create()
                            .name("fk_album_recommendations_album_id")
                            .from(AlbumRecommendations::Table, AlbumRecommendations::AlbumId)
                            .to(Albums::Table, Albums::Id)
                            .on_delete(ForeignKeyAction::Cascade),
                    )
                    .to_owned(),
            )
            .await
    }

    async fn down(&self, manager: &SchemaManager) -> Result<(), DbErr> {
        manager
            .drop_table(
                Table::drop()
                    .table(AlbumRecommendations::Table)
                    .to_owned(),
            )
            .await
    }
}

#[derive(DeriveIden)]
pub enum AlbumRecommendations {
    Table,
    UserId,
    AlbumId,
    Score,
    RecommendedAt,
}
