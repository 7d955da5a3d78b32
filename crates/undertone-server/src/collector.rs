//! Catalog collector: seeds and refreshes the local album pool from the
//! upstream catalog, genre by genre. Runs as a one-shot pass (`sync` CLI
//! argument or the admin endpoint) or on an in-process schedule.

use axum::{extract::State, http::StatusCode, Json};
use chrono::{NaiveDate, Utc};
use sea_orm::sea_query::OnConflict;
use sea_orm::{DatabaseConnection, EntityTrait, Insert, Set};
use serde::Serialize;
use serde_json::json;
use std::sync::Arc;
use uuid::Uuid;

use undertone_catalog::{AlbumSummary, CatalogAlbum, CatalogArtist};
use undertone_db::entities::artist::GenreTags;
use undertone_db::entities::{album, artist};
use undertone_db::AppState;

/// Genres the collector trawls for under-the-radar artists.
const GENRES: [&str; 9] = [
    "indie",
    "alternative",
    "electronic",
    "hip-hop",
    "rock",
    "pop",
    "ambient",
    "folk",
    "jazz",
];

/// Artists above this popularity are mainstream enough to skip entirely.
const POPULARITY_SKIP_THRESHOLD: i16 = 50;

const SEARCH_PAGE_SIZE: u32 = 50;
const ALBUM_PAGE_SIZE: u32 = 50;

const DEFAULT_INTERVAL_SECS: u64 = 86_400;

#[derive(Debug, Default, Serialize)]
pub struct SyncReport {
    pub genres_searched: usize,
    pub artists_seen: usize,
    pub artists_skipped: usize,
    pub artists_upserted: usize,
    pub albums_upserted: usize,
}

/// One full collection pass over every genre. Upstream or database
/// failures abort the pass so a scheduler or operator sees them.
pub async fn run_sync(state: &AppState) -> Result<SyncReport, String> {
    let mut report = SyncReport::default();

    for genre in GENRES {
        tracing::info!(genre, "collecting artists");

        let artists = state
            .catalog
            .search_artists(&format!("genre:\"{genre}\""), SEARCH_PAGE_SIZE)
            .await
            .map_err(|e| format!("artist search for {genre} failed: {e}"))?;

        for found in artists {
            report.artists_seen += 1;

            if found.popularity > POPULARITY_SKIP_THRESHOLD {
                report.artists_skipped += 1;
                continue;
            }

            let artist_row = upsert_artist(&state.db, &found)
                .await
                .map_err(|e| format!("upserting artist {} failed: {e}", found.id))?;
            report.artists_upserted += 1;

            let albums = state
                .catalog
                .get_artist_albums(&found.id, ALBUM_PAGE_SIZE)
                .await
                .map_err(|e| format!("album listing for {} failed: {e}", found.id))?;

            for summary in albums {
                // The listing is already filtered to include_groups=album,
                // but the catalog has been known to slip singles through.
                if !is_full_album(&summary) {
                    continue;
                }

                let detail = state
                    .catalog
                    .get_album(&summary.id)
                    .await
                    .map_err(|e| format!("album fetch for {} failed: {e}", summary.id))?;

                upsert_album(&state.db, &detail, artist_row.id)
                    .await
                    .map_err(|e| format!("upserting album {} failed: {e}", detail.id))?;
                report.albums_upserted += 1;
            }
        }

        report.genres_searched += 1;
    }

    Ok(report)
}

/// The album listing is requested with include_groups=album; this guard
/// drops anything else the catalog returns anyway.
pub(crate) fn is_full_album(summary: &AlbumSummary) -> bool {
    summary.album_type == "album"
}

/// Insert-or-refresh statement for an artist, keyed on its catalog ID.
/// Listener counts start at zero and are deliberately left out of the
/// conflict update set; the catalog does not expose them, so refreshing
/// would erase curation. Genre tags are normalized so filter matching
/// stays exact.
fn artist_insert(found: &CatalogArtist) -> Insert<artist::ActiveModel> {
    let row = artist::ActiveModel {
        id: Set(Uuid::new_v4()),
        catalog_id: Set(found.id.clone()),
        name: Set(found.name.clone()),
        monthly_listeners: Set(0),
        genres: Set(GenreTags::normalized(found.genres.clone())),
        image_url: Set(found.images.first().map(|i| i.url.clone())),
        popularity: Set(found.popularity),
        created_at: Set(Utc::now().fixed_offset()),
    };

    artist::Entity::insert(row).on_conflict(
        OnConflict::column(artist::Column::CatalogId)
            .update_columns([
                artist::Column::Name,
                artist::Column::Genres,
                artist::Column::ImageUrl,
                artist::Column::Popularity,
            ])
            .to_owned(),
    )
}

pub(crate) async fn upsert_artist(
    db: &DatabaseConnection,
    found: &CatalogArtist,
) -> Result<artist::Model, sea_orm::DbErr> {
    artist_insert(found).exec_with_returning(db).await
}

/// Insert-or-refresh statement for an album, keyed on its catalog ID.
fn album_insert(detail: &CatalogAlbum, artist_id: Uuid) -> Insert<album::ActiveModel> {
    let now = Utc::now().fixed_offset();
    let row = album::ActiveModel {
        id: Set(Uuid::new_v4()),
        catalog_id: Set(detail.id.clone()),
        title: Set(detail.name.clone()),
        artist_id: Set(artist_id),
        release_date: Set(parse_release_date(detail.release_date.as_deref())),
        total_tracks: Set(detail.total_tracks),
        popularity: Set(detail.popularity),
        image_url: Set(detail.images.first().map(|i| i.url.clone())),
        album_type: Set(detail.album_type.clone()),
        last_updated: Set(now),
        created_at: Set(now),
    };

    album::Entity::insert(row).on_conflict(
        OnConflict::column(album::Column::CatalogId)
            .update_columns([
                album::Column::Title,
                album::Column::ReleaseDate,
                album::Column::TotalTracks,
                album::Column::Popularity,
                album::Column::ImageUrl,
                album::Column::AlbumType,
                album::Column::LastUpdated,
            ])
            .to_owned(),
    )
}

pub(crate) async fn upsert_album(
    db: &DatabaseConnection,
    detail: &CatalogAlbum,
    artist_id: Uuid,
) -> Result<album::Model, sea_orm::DbErr> {
    album_insert(detail, artist_id).exec_with_returning(db).await
}

/// The catalog reports release dates at day, month, or year precision.
/// Partial dates snap to the first day of the period.
pub(crate) fn parse_release_date(raw: Option<&str>) -> Option<NaiveDate> {
    let raw = raw?.trim();
    if let Ok(date) = NaiveDate::parse_from_str(raw, "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(date) = NaiveDate::parse_from_str(&format!("{raw}-01"), "%Y-%m-%d") {
        return Some(date);
    }
    if let Ok(year) = raw.parse::<i32>() {
        return NaiveDate::from_ymd_opt(year, 1, 1);
    }
    None
}

/// Background scheduler: one pass per interval, errors logged and the
/// loop kept alive.
pub fn spawn(state: Arc<AppState>) {
    let interval_secs = std::env::var("COLLECTOR_INTERVAL_SECS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
        .unwrap_or(DEFAULT_INTERVAL_SECS);

    tokio::spawn(async move {
        tracing::info!(interval_secs, "collector scheduler started");
        loop {
            match run_sync(&state).await {
                Ok(report) => tracing::info!(
                    "scheduled sync complete: {} artists, {} albums upserted",
                    report.artists_upserted,
                    report.albums_upserted
                ),
                Err(e) => tracing::error!("scheduled sync failed: {e}"),
            }
            tokio::time::sleep(std::time::Duration::from_secs(interval_secs)).await;
        }
    });
}

/// POST /api/admin/sync — run a collection pass inline and report it.
pub async fn trigger_sync(
    State(state): State<Arc<AppState>>,
) -> Result<Json<SyncReport>, (StatusCode, Json<serde_json::Value>)> {
    match run_sync(&state).await {
        Ok(report) => Ok(Json(report)),
        Err(e) => {
            tracing::error!("manual sync failed: {e}");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "error": "Sync failed" })),
            ))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sea_orm::{DbBackend, QueryTrait};
    use serde_json::json;
    use undertone_catalog::{CatalogClient, CatalogConfig, ImageRef};
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn catalog_artist() -> CatalogArtist {
        CatalogArtist {
            id: "cat-artist-9".into(),
            name: "Night Lichen".into(),
            genres: vec!["Ambient".into(), "drone".into()],
            images: vec![ImageRef {
                url: "https://img.example/a.jpg".into(),
            }],
            popularity: 22,
        }
    }

    fn catalog_album() -> CatalogAlbum {
        CatalogAlbum {
            id: "cat-album-9".into(),
            name: "Mosswork".into(),
            artists: vec![],
            release_date: Some("2022-03-04".into()),
            total_tracks: 7,
            popularity: 18,
            images: vec![],
            album_type: "album".into(),
            genres: vec![],
            tracks: None,
        }
    }

    #[test]
    fn test_artist_insert_conflicts_on_catalog_id() {
        let sql = artist_insert(&catalog_artist())
            .build(DbBackend::Postgres)
            .to_string();
        assert!(
            sql.contains(r#"ON CONFLICT ("catalog_id") DO UPDATE"#),
            "unexpected conflict target: {sql}"
        );
        for col in ["name", "genres", "image_url", "popularity"] {
            assert!(
                sql.contains(&format!(r#""{col}" = "excluded"."{col}""#)),
                "{col} not refreshed on conflict: {sql}"
            );
        }
        // listener counts survive a re-sync untouched
        assert!(!sql.contains(r#""monthly_listeners" = "excluded""#));
    }

    #[test]
    fn test_artist_insert_normalizes_genres() {
        let sql = artist_insert(&catalog_artist())
            .build(DbBackend::Postgres)
            .to_string();
        assert!(sql.contains("ambient"), "genres not lowercased: {sql}");
        assert!(!sql.contains("Ambient"), "raw-cased tag stored: {sql}");
    }

    #[test]
    fn test_album_insert_conflicts_on_catalog_id() {
        let sql = album_insert(&catalog_album(), Uuid::new_v4())
            .build(DbBackend::Postgres)
            .to_string();
        assert!(
            sql.contains(r#"ON CONFLICT ("catalog_id") DO UPDATE"#),
            "unexpected conflict target: {sql}"
        );
        for col in [
            "title",
            "release_date",
            "total_tracks",
            "popularity",
            "image_url",
            "album_type",
            "last_updated",
        ] {
            assert!(
                sql.contains(&format!(r#""{col}" = "excluded"."{col}""#)),
                "{col} not refreshed on conflict: {sql}"
            );
        }
        // creation timestamp is insert-only
        assert!(!sql.contains(r#""created_at" = "excluded""#));
    }

    #[test]
    fn test_is_full_album() {
        let mut summary = AlbumSummary {
            id: "s1".into(),
            name: "Single".into(),
            album_type: "album".into(),
        };
        assert!(is_full_album(&summary));
        summary.album_type = "single".into();
        assert!(!is_full_album(&summary));
        summary.album_type = "compilation".into();
        assert!(!is_full_album(&summary));
    }

    #[tokio::test]
    async fn test_run_sync_skips_popular_artists() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/api/token"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "access_token": "tok",
                "expires_in": 3600,
            })))
            .mount(&server)
            .await;

        // Every genre search returns the same mainstream artist, so the
        // pass touches neither the album endpoints nor the database.
        Mock::given(method("GET"))
            .and(path("/search"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "artists": {
                    "items": [{ "id": "big1", "name": "Big Star", "popularity": 80 }]
                }
            })))
            .mount(&server)
            .await;

        let state = AppState {
            db: sea_orm::DatabaseConnection::Disconnected,
            jwt_secret: "collector-test-secret".into(),
            catalog: Arc::new(CatalogClient::new(CatalogConfig {
                client_id: "id".into(),
                client_secret: "secret".into(),
                api_base_url: server.uri(),
                token_url: format!("{}/api/token", server.uri()),
            })),
        };

        let report = run_sync(&state).await.unwrap();
        assert_eq!(report.genres_searched, GENRES.len());
        assert_eq!(report.artists_seen, GENRES.len());
        assert_eq!(report.artists_skipped, GENRES.len());
        assert_eq!(report.artists_upserted, 0);
        assert_eq!(report.albums_upserted, 0);
    }

    #[test]
    fn test_parse_release_date_full() {
        assert_eq!(
            parse_release_date(Some("2023-09-22")),
            NaiveDate::from_ymd_opt(2023, 9, 22)
        );
    }

    #[test]
    fn test_parse_release_date_month_precision() {
        assert_eq!(
            parse_release_date(Some("2021-05")),
            NaiveDate::from_ymd_opt(2021, 5, 1)
        );
    }

    #[test]
    fn test_parse_release_date_year_precision() {
        assert_eq!(
            parse_release_date(Some("1998")),
            NaiveDate::from_ymd_opt(1998, 1, 1)
        );
    }

    #[test]
    fn test_parse_release_date_garbage() {
        assert_eq!(parse_release_date(Some("not-a-date")), None);
        assert_eq!(parse_release_date(Some("")), None);
        assert_eq!(parse_release_date(None), None);
    }

    #[test]
    fn test_genre_list_is_lowercase() {
        for g in GENRES {
            assert_eq!(g, g.to_lowercase());
        }
    }
}
