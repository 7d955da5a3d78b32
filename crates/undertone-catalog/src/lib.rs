//! HTTP client for the external music catalog API.
//!
//! Wraps the catalog's REST endpoints: client-credentials token exchange,
//! artist search, album listing and full album/artist detail lookups.
//! Plain request/response — no retries, no backoff.

use serde::Deserialize;
use std::time::{Duration, Instant};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::debug;

/// Default catalog API base URL.
const DEFAULT_API_BASE_URL: &str = "https://api.spotify.com/v1";

/// Default token endpoint for the client-credentials grant.
const DEFAULT_TOKEN_URL: &str = "https://accounts.spotify.com/api/token";

/// Tokens are treated as expired this long before their real deadline,
/// so an in-flight request never carries a token about to lapse.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(30);

#[derive(Error, Debug)]
pub enum CatalogError {
    #[error("catalog client credentials are not configured")]
    MissingCredentials,

    #[error("token endpoint rejected credentials: HTTP {0}")]
    Auth(reqwest::StatusCode),

    #[error("catalog returned HTTP {0}")]
    Upstream(reqwest::StatusCode),

    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),
}

// ── Catalog record types ────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct ImageRef {
    pub url: String,
}

/// Artist record as returned by both search and detail endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogArtist {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub genres: Vec<String>,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    #[serde(default)]
    pub popularity: i16,
}

/// Album summary from an artist's album listing.
#[derive(Debug, Clone, Deserialize)]
pub struct AlbumSummary {
    pub id: String,
    pub name: String,
    pub album_type: String,
}

/// Lightweight artist reference embedded in album records.
#[derive(Debug, Clone, Deserialize)]
pub struct ArtistRef {
    pub id: String,
    pub name: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackItem {
    pub id: String,
    pub name: String,
    pub duration_ms: i64,
    pub track_number: i32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct TrackPage {
    #[serde(default)]
    pub items: Vec<TrackItem>,
}

/// Full album record from the detail endpoint, including the track list.
#[derive(Debug, Clone, Deserialize)]
pub struct CatalogAlbum {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub artists: Vec<ArtistRef>,
    pub release_date: Option<String>,
    #[serde(default)]
    pub total_tracks: i32,
    #[serde(default)]
    pub popularity: i16,
    #[serde(default)]
    pub images: Vec<ImageRef>,
    pub album_type: String,
    #[serde(default)]
    pub genres: Vec<String>,
    pub tracks: Option<TrackPage>,
}

// ── Internal API response wrappers ──────────────────────────────────

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

#[derive(Deserialize)]
struct ArtistSearchResponse {
    artists: ArtistSearchPage,
}

#[derive(Deserialize)]
struct ArtistSearchPage {
    #[serde(default)]
    items: Vec<CatalogArtist>,
}

#[derive(Deserialize)]
struct AlbumListResponse {
    #[serde(default)]
    items: Vec<AlbumSummary>,
}

// ── Configuration ───────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct CatalogConfig {
    pub client_id: String,
    pub client_secret: String,
    pub api_base_url: String,
    pub token_url: String,
}

impl CatalogConfig {
    pub fn from_env() -> Self {
        Self {
            client_id: std::env::var("CATALOG_CLIENT_ID").unwrap_or_default(),
            client_secret: std::env::var("CATALOG_CLIENT_SECRET").unwrap_or_default(),
            api_base_url: std::env::var("CATALOG_API_BASE_URL")
                .unwrap_or_else(|_| DEFAULT_API_BASE_URL.to_string()),
            token_url: std::env::var("CATALOG_TOKEN_URL")
                .unwrap_or_else(|_| DEFAULT_TOKEN_URL.to_string()),
        }
    }
}

/// Bearer token with an explicit expiry deadline.
struct BearerToken {
    value: String,
    expires_at: Instant,
}

impl BearerToken {
    fn is_expired(&self) -> bool {
        Instant::now() + TOKEN_REFRESH_MARGIN >= self.expires_at
    }
}

/// Catalog API client.
///
/// The bearer token is acquired lazily on first use and re-acquired when
/// it nears expiry, so long collector runs survive token rollover.
pub struct CatalogClient {
    http: reqwest::Client,
    config: CatalogConfig,
    token: Mutex<Option<BearerToken>>,
}

impl CatalogClient {
    pub fn new(config: CatalogConfig) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .expect("failed to build HTTP client");
        Self {
            http,
            config,
            token: Mutex::new(None),
        }
    }

    pub fn from_env() -> Self {
        Self::new(CatalogConfig::from_env())
    }

    /// Exchange client credentials for a bearer token.
    async fn fetch_token(&self) -> Result<BearerToken, CatalogError> {
        if self.config.client_id.is_empty() || self.config.client_secret.is_empty() {
            return Err(CatalogError::MissingCredentials);
        }

        let resp = self
            .http
            .post(&self.config.token_url)
            .basic_auth(&self.config.client_id, Some(&self.config.client_secret))
            .form(&[("grant_type", "client_credentials")])
            .send()
            .await?;

        if !resp.status().is_success() {
            return Err(CatalogError::Auth(resp.status()));
        }

        let body: TokenResponse = resp.json().await?;
        debug!(expires_in = body.expires_in, "acquired catalog token");
        Ok(BearerToken {
            value: body.access_token,
            expires_at: Instant::now() + Duration::from_secs(body.expires_in),
        })
    }

    /// Current bearer token, re-acquiring it if missing or near expiry.
    async fn bearer(&self) -> Result<String, CatalogError> {
        let mut guard = self.token.lock().await;
        if let Some(token) = guard.as_ref() {
            if !token.is_expired() {
                return Ok(token.value.clone());
            }
        }
        let fresh = self.fetch_token().await?;
        let value = fresh.value.clone();
        *guard = Some(fresh);
        Ok(value)
    }

    async fn get_json<T: serde::de::DeserializeOwned>(
        &self,
        path_and_query: &str,
    ) -> Result<T, CatalogError> {
        let token = self.bearer().await?;
        let url = format!("{}{}", self.config.api_base_url, path_and_query);

        let resp = self.http.get(&url).bearer_auth(token).send().await?;
        if !resp.status().is_success() {
            return Err(CatalogError::Upstream(resp.status()));
        }
        Ok(resp.json().await?)
    }

    /// Search artists matching a free-text or genre-scoped query.
    /// Single page, up to `limit` results.
    pub async fn search_artists(
        &self,
        query: &str,
        limit: u32,
    ) -> Result<Vec<CatalogArtist>, CatalogError> {
        let path = format!(
            "/search?q={}&type=artist&limit={limit}",
            urlencoding::encode(query)
        );
        let body: ArtistSearchResponse = self.get_json(&path).await?;
        Ok(body.artists.items)
    }

    /// Full artist record including genre and image metadata.
    pub async fn get_artist(&self, artist_id: &str) -> Result<CatalogArtist, CatalogError> {
        self.get_json(&format!("/artists/{artist_id}")).await
    }

    /// An artist's releases, filtered server-side to the "album" group.
    pub async fn get_artist_albums(
        &self,
        artist_id: &str,
        limit: u32,
    ) -> Result<Vec<AlbumSummary>, CatalogError> {
        let path = format!("/artists/{artist_id}/albums?include_groups=album&limit={limit}");
        let body: AlbumListResponse = self.get_json(&path).await?;
        Ok(body.items)
    }

    /// Full album record including the nested track list.
    pub async fn get_album(&self, album_id: &str) -> Result<CatalogAlbum, CatalogError> {
        self.get_json(&format!("/albums/{album_id}")).await
    }
}
