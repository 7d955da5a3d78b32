use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "albums")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// External catalog identifier — upsert key.
    #[sea_orm(unique)]
    pub catalog_id: String,
    pub title: String,
    pub artist_id: Uuid,
    pub release_date: Option<Date>,
    pub total_tracks: i32,
    pub popularity: i16,
    pub image_url: Option<String>,
    /// Release group: "album", "single" or "compilation".
    pub album_type: String,
    /// Touched on every collector run that sees this album.
    pub last_updated: DateTimeWithTimeZone,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(
        belongs_to = "super::artist::Entity",
        from = "Column::ArtistId",
        to = "super::artist::Column::Id"
    )]
    Artist,
    #[sea_orm(has_many = "super::album_recommendation::Entity")]
    AlbumRecommendation,
}

impl Related<super::artist::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Artist.def()
    }
}

impl Related<super::album_recommendation::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::AlbumRecommendation.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}
