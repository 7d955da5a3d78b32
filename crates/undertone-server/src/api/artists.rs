use axum::{
    extract::{Path, Query, State},
    Json,
};
use sea_orm::{ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, QueryOrder};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

use super::{internal_error, not_found, ApiError, PaginatedResponse, PaginationParams};
use undertone_db::entities::{album, artist};
use undertone_db::AppState;

#[derive(Debug, Serialize)]
pub struct ArtistResponse {
    pub id: Uuid,
    pub catalog_id: String,
    pub name: String,
    pub monthly_listeners: i64,
    pub genres: Vec<String>,
    pub image_url: Option<String>,
    pub popularity: i16,
}

impl ArtistResponse {
    pub fn from_model(a: artist::Model) -> Self {
        Self {
            id: a.id,
            catalog_id: a.catalog_id,
            name: a.name,
            monthly_listeners: a.monthly_listeners,
            genres: a.genres.0,
            image_url: a.image_url,
            popularity: a.popularity,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct ArtistDetailResponse {
    #[serde(flatten)]
    pub artist: ArtistResponse,
    pub albums: Vec<super::albums::AlbumResponse>,
}

/// GET /api/artists
pub async fn list_artists(
    State(state): State<Arc<AppState>>,
    Query(params): Query<PaginationParams>,
) -> Result<Json<PaginatedResponse<ArtistResponse>>, ApiError> {
    let page = params.page.unwrap_or(1).max(1);
    let per_page = params.per_page.unwrap_or(20).min(100);

    let paginator = artist::Entity::find()
        .order_by_asc(artist::Column::Name)
        .paginate(&state.db, per_page);

    let total = paginator
        .num_items()
        .await
        .map_err(|e| internal_error("db error", e))?;

    let artists = paginator
        .fetch_page(page - 1)
        .await
        .map_err(|e| internal_error("db error", e))?;

    Ok(Json(PaginatedResponse {
        data: artists.into_iter().map(ArtistResponse::from_model).collect(),
        total,
        page,
        per_page,
        total_pages: total.div_ceil(per_page),
    }))
}

/// GET /api/artists/:id — internal UUID or external catalog ID
pub async fn get_artist(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
) -> Result<Json<ArtistDetailResponse>, ApiError> {
    let found = match Uuid::parse_str(&id) {
        Ok(uuid) => artist::Entity::find_by_id(uuid)
            .one(&state.db)
            .await
            .map_err(|e| internal_error("db error", e))?,
        Err(_) => None,
    };

    let artist_model = match found {
        Some(a) => a,
        None => artist::Entity::find()
            .filter(artist::Column::CatalogId.eq(&id))
            .one(&state.db)
            .await
            .map_err(|e| internal_error("db error", e))?
            .ok_or_else(|| not_found("Artist not found"))?,
    };

    let albums = album::Entity::find()
        .filter(album::Column::ArtistId.eq(artist_model.id))
        .order_by_desc(album::Column::ReleaseDate)
        .all(&state.db)
        .await
        .map_err(|e| internal_error("db error", e))?;

    Ok(Json(ArtistDetailResponse {
        artist: ArtistResponse::from_model(artist_model),
        albums: albums
            .into_iter()
            .map(super::albums::AlbumResponse::from_model)
            .collect(),
    }))
}
