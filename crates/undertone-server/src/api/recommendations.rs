use axum::{
    extract::{Query, State},
    Extension, Json,
};
use chrono::Utc;
use rand::seq::SliceRandom;
use sea_orm::sea_query::{Expr, OnConflict};
use sea_orm::{
    ColumnTrait, DatabaseConnection, EntityTrait, QueryFilter, QueryOrder, QuerySelect, Set,
};
use serde::Deserialize;
use std::sync::Arc;
use uuid::Uuid;

use super::albums::AlbumResponse;
use super::{internal_error, ApiError};
use crate::auth::middleware::AuthUser;
use undertone_db::entities::{album, album_recommendation, artist};
use undertone_db::AppState;

/// Artists at or above this many monthly listeners are considered
/// mainstream and never recommended.
pub const UNDERRATED_LISTENER_CEILING: i64 = 150_000;

/// Default result count when the client does not ask for one.
const DEFAULT_LIMIT: u64 = 24;

/// Front-end dropdown sentinels that mean "no filter".
const GENRE_SENTINEL: &str = "All Genres";
const YEAR_SENTINEL: &str = "Release Year";

#[derive(Debug, Deserialize)]
pub struct RecommendationParams {
    pub genre: Option<String>,
    pub year: Option<String>,
    pub limit: Option<u64>,
    /// Presence (any value) requests a shuffled selection.
    pub seed: Option<String>,
}

/// Normalized filter derived from the raw query string. Sentinel values
/// and unparseable years collapse to None.
#[derive(Debug, PartialEq, Eq)]
pub struct RecommendationFilter {
    pub genre: Option<String>,
    pub year: Option<i32>,
    pub limit: u64,
    pub shuffle: bool,
}

impl RecommendationFilter {
    pub fn from_params(params: &RecommendationParams) -> Self {
        let genre = params
            .genre
            .as_deref()
            .map(str::trim)
            .filter(|g| !g.is_empty() && *g != GENRE_SENTINEL)
            .map(str::to_lowercase);

        let year = params
            .year
            .as_deref()
            .map(str::trim)
            .filter(|y| !y.is_empty() && *y != YEAR_SENTINEL)
            .and_then(|y| y.parse::<i32>().ok())
            .filter(|y| (1000..=9999).contains(y));

        Self {
            genre,
            year,
            limit: params.limit.unwrap_or(DEFAULT_LIMIT).clamp(1, 100),
            shuffle: params.seed.is_some(),
        }
    }
}

/// Over-fetch so a shuffled page is drawn from a wider candidate pool.
pub(crate) fn fetch_size(limit: u64) -> u64 {
    (limit * 3).min(100)
}

/// Take `limit` rows, optionally shuffling the candidate pool first.
/// Shuffling only kicks in when there is a surplus to draw from; at or
/// under the limit the popularity ordering is returned as-is.
fn select_page<T>(mut rows: Vec<T>, limit: usize, shuffle: bool) -> Vec<T> {
    if shuffle && rows.len() > limit {
        rows.shuffle(&mut rand::rng());
    }
    rows.truncate(limit);
    rows
}

/// GET /api/recommendations
///
/// Surfaces albums whose artists sit under the listener ceiling, filtered
/// by genre and release year, most popular first. A `seed` parameter
/// shuffles the page. When the caller is authenticated each served album
/// is recorded, best-effort, as a recommendation event.
pub async fn get_recommendations(
    State(state): State<Arc<AppState>>,
    user: Option<Extension<AuthUser>>,
    Query(params): Query<RecommendationParams>,
) -> Result<Json<Vec<AlbumResponse>>, ApiError> {
    let filter = RecommendationFilter::from_params(&params);

    let mut query = album::Entity::find()
        .find_also_related(artist::Entity)
        .filter(artist::Column::MonthlyListeners.lt(UNDERRATED_LISTENER_CEILING));

    if let Some(genre) = &filter.genre {
        // JSONB containment against the artist's genre tags
        query = query.filter(Expr::cust_with_values(
            r#""artists"."genres" @> $1::jsonb"#,
            [serde_json::json!([genre]).to_string()],
        ));
    }

    if let Some(year) = filter.year {
        if let (Some(start), Some(end)) = (
            chrono::NaiveDate::from_ymd_opt(year, 1, 1),
            chrono::NaiveDate::from_ymd_opt(year, 12, 31),
        ) {
            query = query.filter(album::Column::ReleaseDate.between(start, end));
        }
    }

    let candidates = query
        .order_by_desc(album::Column::Popularity)
        .limit(fetch_size(filter.limit))
        .all(&state.db)
        .await
        .map_err(|e| internal_error("db error", e))?;

    let page = select_page(candidates, filter.limit as usize, filter.shuffle);

    if let Some(Extension(AuthUser(claims))) = &user {
        let album_ids: Vec<Uuid> = page.iter().map(|(a, _)| a.id).collect();
        record_recommendations(&state.db, claims.sub, &album_ids).await;
    }

    Ok(Json(
        page.into_iter()
            .map(|(album, artist)| match artist {
                Some(artist) => AlbumResponse::with_artist(album, artist),
                None => AlbumResponse::from_model(album),
            })
            .collect(),
    ))
}

/// Insert statement for a served batch; the composite (user, album) key
/// makes re-recommending the same album an in-place refresh.
fn recommendation_insert(
    user_id: Uuid,
    album_ids: &[Uuid],
) -> sea_orm::Insert<album_recommendation::ActiveModel> {
    let now = Utc::now().fixed_offset();
    let rows: Vec<album_recommendation::ActiveModel> = album_ids
        .iter()
        .map(|album_id| album_recommendation::ActiveModel {
            user_id: Set(user_id),
            album_id: Set(*album_id),
            score: Set(1.0),
            recommended_at: Set(now),
        })
        .collect();

    album_recommendation::Entity::insert_many(rows).on_conflict(
        OnConflict::columns([
            album_recommendation::Column::UserId,
            album_recommendation::Column::AlbumId,
        ])
        .update_columns([
            album_recommendation::Column::Score,
            album_recommendation::Column::RecommendedAt,
        ])
        .to_owned(),
    )
}

/// Best-effort: a failed write must never break the recommendation
/// response, so errors are logged and swallowed.
async fn record_recommendations(db: &DatabaseConnection, user_id: Uuid, album_ids: &[Uuid]) {
    if album_ids.is_empty() {
        return;
    }

    if let Err(e) = recommendation_insert(user_id, album_ids)
        .exec_without_returning(db)
        .await
    {
        tracing::warn!(%user_id, "failed to record recommendations: {e}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(
        genre: Option<&str>,
        year: Option<&str>,
        limit: Option<u64>,
        seed: Option<&str>,
    ) -> RecommendationParams {
        RecommendationParams {
            genre: genre.map(String::from),
            year: year.map(String::from),
            limit,
            seed: seed.map(String::from),
        }
    }

    #[test]
    fn test_filter_defaults() {
        let f = RecommendationFilter::from_params(&params(None, None, None, None));
        assert_eq!(f.genre, None);
        assert_eq!(f.year, None);
        assert_eq!(f.limit, 24);
        assert!(!f.shuffle);
    }

    #[test]
    fn test_filter_sentinels_collapse_to_none() {
        let f = RecommendationFilter::from_params(&params(
            Some("All Genres"),
            Some("Release Year"),
            None,
            None,
        ));
        assert_eq!(f.genre, None);
        assert_eq!(f.year, None);
    }

    #[test]
    fn test_filter_normalizes_genre_case() {
        let f = RecommendationFilter::from_params(&params(Some("  Hip-Hop "), None, None, None));
        assert_eq!(f.genre.as_deref(), Some("hip-hop"));
    }

    #[test]
    fn test_filter_rejects_bad_years() {
        for bad in ["next year", "202", "99999", ""] {
            let f = RecommendationFilter::from_params(&params(None, Some(bad), None, None));
            assert_eq!(f.year, None, "year {bad:?} should be dropped");
        }
        let f = RecommendationFilter::from_params(&params(None, Some("2019"), None, None));
        assert_eq!(f.year, Some(2019));
    }

    #[test]
    fn test_filter_clamps_limit() {
        assert_eq!(
            RecommendationFilter::from_params(&params(None, None, Some(0), None)).limit,
            1
        );
        assert_eq!(
            RecommendationFilter::from_params(&params(None, None, Some(500), None)).limit,
            100
        );
    }

    #[test]
    fn test_seed_presence_enables_shuffle() {
        assert!(RecommendationFilter::from_params(&params(None, None, None, Some("xyz"))).shuffle);
        assert!(!RecommendationFilter::from_params(&params(None, None, None, None)).shuffle);
    }

    #[test]
    fn test_fetch_size_overfetches_and_caps() {
        assert_eq!(fetch_size(24), 72);
        assert_eq!(fetch_size(10), 30);
        assert_eq!(fetch_size(40), 100);
        assert_eq!(fetch_size(100), 100);
    }

    #[test]
    fn test_select_page_prefix_without_shuffle() {
        let rows: Vec<u32> = (0..30).collect();
        assert_eq!(select_page(rows, 5, false), vec![0, 1, 2, 3, 4]);
    }

    #[test]
    fn test_select_page_shuffle_is_a_permutation_subset() {
        let rows: Vec<u32> = (0..30).collect();
        let page = select_page(rows.clone(), 10, true);
        assert_eq!(page.len(), 10);
        let mut seen = std::collections::HashSet::new();
        for v in &page {
            assert!(rows.contains(v));
            assert!(seen.insert(*v), "duplicate {v} in shuffled page");
        }
    }

    #[test]
    fn test_select_page_no_surplus_keeps_query_order() {
        // At or under the limit there is nothing to draw from, so even a
        // seeded request gets the popularity ordering back unchanged.
        let rows: Vec<u32> = vec![7, 8];
        assert_eq!(select_page(rows.clone(), 10, false), vec![7, 8]);
        assert_eq!(select_page(rows, 10, true), vec![7, 8]);
        assert_eq!(select_page(vec![1, 2, 3], 3, true), vec![1, 2, 3]);
    }

    #[test]
    fn test_recommendation_insert_upserts_on_user_album_pair() {
        use sea_orm::{DbBackend, QueryTrait};

        let user = Uuid::new_v4();
        let albums = [Uuid::new_v4(), Uuid::new_v4()];
        let sql = recommendation_insert(user, &albums)
            .build(DbBackend::Postgres)
            .to_string();

        assert!(
            sql.contains(r#"ON CONFLICT ("user_id", "album_id") DO UPDATE"#),
            "unexpected conflict target: {sql}"
        );
        assert!(sql.contains(r#""score" = "excluded"."score""#));
        assert!(sql.contains(r#""recommended_at" = "excluded"."recommended_at""#));
    }
}
