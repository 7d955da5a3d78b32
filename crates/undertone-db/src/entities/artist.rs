use sea_orm::entity::prelude::*;
use sea_orm::FromJsonQueryResult;
use serde::{Deserialize, Serialize};

/// Genre tags stored as a JSONB string array.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize, FromJsonQueryResult)]
pub struct GenreTags(pub Vec<String>);

impl GenreTags {
    /// Tags are stored lowercased and trimmed so JSONB membership tests
    /// against a lowercased filter value are exact.
    pub fn normalized(tags: Vec<String>) -> Self {
        Self(
            tags.into_iter()
                .map(|t| t.trim().to_lowercase())
                .filter(|t| !t.is_empty())
                .collect(),
        )
    }
}

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "artists")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: Uuid,
    /// External catalog identifier — upsert key.
    #[sea_orm(unique)]
    pub catalog_id: String,
    pub name: String,
    /// Tracked locally; the catalog does not expose this directly, so it
    /// starts at 0 and is refreshed out of band.
    pub monthly_listeners: i64,
    #[sea_orm(column_type = "JsonBinary")]
    pub genres: GenreTags,
    pub image_url: Option<String>,
    /// Catalog-provided popularity score, 0–100.
    pub popularity: i16,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {
    #[sea_orm(has_many = "super::album::Entity")]
    Album,
}

impl Related<super::album::Entity> for Entity {
    fn to() -> RelationDef {
        Relation::Album.def()
    }
}

impl ActiveModelBehavior for ActiveModel {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_genre_tags_normalized_lowercases_and_trims() {
        let tags = GenreTags::normalized(vec![
            "Hip-Hop".into(),
            "  Electronic ".into(),
            "ambient".into(),
        ]);
        assert_eq!(tags.0, vec!["hip-hop", "electronic", "ambient"]);
    }

    #[test]
    fn test_genre_tags_normalized_drops_blank_entries() {
        let tags = GenreTags::normalized(vec!["folk".into(), "   ".into(), String::new()]);
        assert_eq!(tags.0, vec!["folk"]);
    }

    #[test]
    fn test_genre_tags_serializes_as_array() {
        let tags = GenreTags(vec!["folk".into()]);
        let json = serde_json::to_value(&tags).unwrap();
        assert_eq!(json, serde_json::json!(["folk"]));
    }
}
