use axum::{
    http::HeaderValue,
    middleware as axum_middleware,
    routing::{get, post},
    Json, Router,
};
use sea_orm_migration::MigratorTrait;
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tower_governor::{governor::GovernorConfigBuilder, GovernorLayer};
use tower_http::{
    cors::{AllowOrigin, CorsLayer},
    set_header::SetResponseHeaderLayer,
    trace::TraceLayer,
};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use undertone_db::AppState;

mod api;
mod auth;
mod collector;

#[derive(Serialize)]
struct ApiStatus {
    status: &'static str,
    version: &'static str,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();

    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    // Database connection
    let db_config = undertone_db::DatabaseConfig::from_env();
    tracing::info!("connecting to database...");
    let db = undertone_db::connect(&db_config)
        .await
        .expect("failed to connect to database");

    // Run migrations
    tracing::info!("running database migrations...");
    undertone_migration::Migrator::up(&db, None)
        .await
        .expect("failed to run migrations");
    tracing::info!("migrations complete");

    let jwt_secret = std::env::var("JWT_SECRET")
        .unwrap_or_else(|_| "dev-secret-change-me-in-production".to_string());

    // SECURITY: warn if JWT secret is the default fallback
    if jwt_secret == "dev-secret-change-me-in-production" {
        tracing::error!(
            "JWT_SECRET is set to a known default value! \
             Set JWT_SECRET to a strong random string (≥32 chars) in production."
        );
        if std::env::var("UNDERTONE_ENV").unwrap_or_default() == "production" {
            panic!("Refusing to start: JWT_SECRET must be set to a secure value in production.");
        }
    }

    let state = Arc::new(AppState {
        db,
        jwt_secret,
        catalog: Arc::new(undertone_catalog::CatalogClient::from_env()),
    });

    // `undertone-server sync` runs one collector pass and exits. Used by
    // cron-style scheduling outside the server process.
    if std::env::args().nth(1).as_deref() == Some("sync") {
        match collector::run_sync(&state).await {
            Ok(report) => {
                tracing::info!(
                    "sync complete: {} genres, {} artists upserted, {} albums upserted",
                    report.genres_searched,
                    report.artists_upserted,
                    report.albums_upserted
                );
            }
            Err(e) => {
                tracing::error!("sync failed: {e}");
                std::process::exit(1);
            }
        }
        return;
    }

    // Spawn the in-process collector scheduler when enabled
    if std::env::var("COLLECTOR_ENABLED")
        .unwrap_or_default()
        .eq_ignore_ascii_case("true")
    {
        collector::spawn(state.clone());
    }

    // Rate limiter for auth endpoints: 10 requests per 60 seconds per IP
    let auth_governor_conf = Arc::new(
        GovernorConfigBuilder::default()
            .per_second(6)
            .burst_size(10)
            .finish()
            .expect("failed to build rate limiter config"),
    );

    // Auth routes (public, rate-limited)
    let auth_public = Router::new()
        .route("/register", post(auth::routes::register))
        .route("/login", post(auth::routes::login))
        .route("/refresh", post(auth::routes::refresh))
        .layer(GovernorLayer::new(auth_governor_conf));

    // Auth routes (protected)
    let auth_protected = Router::new().route("/me", get(auth::routes::me)).layer(
        axum_middleware::from_fn_with_state(state.clone(), auth::middleware::require_auth),
    );

    // Public API routes — identity is optional but attached when present,
    // so the recommendation endpoint can log per-user results
    let public_api = Router::new()
        .route(
            "/recommendations",
            get(api::recommendations::get_recommendations),
        )
        .route("/albums", get(api::albums::list_albums))
        .route("/albums/{id}", get(api::albums::get_album))
        .route("/artists", get(api::artists::list_artists))
        .route("/artists/{id}", get(api::artists::get_artist))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::attach_user,
        ));

    // Admin routes (manual sync trigger)
    let admin_api = Router::new()
        .route("/sync", post(collector::trigger_sync))
        .layer(axum_middleware::from_fn_with_state(
            state.clone(),
            auth::middleware::require_admin,
        ));

    let api_routes = Router::new()
        .nest("/auth", auth_public.merge(auth_protected))
        .merge(public_api)
        .nest("/admin", admin_api);

    // CORS configuration — restrict to configured origins
    let cors = {
        let allowed_origins_str = std::env::var("CORS_ORIGINS").unwrap_or_default();
        if allowed_origins_str.is_empty() {
            tracing::warn!(
                "CORS_ORIGINS not set — defaulting to http://localhost:3000 for dev. \
                 Set CORS_ORIGINS for production."
            );
            CorsLayer::new()
                .allow_origin(AllowOrigin::exact(HeaderValue::from_static(
                    "http://localhost:3000",
                )))
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(tower_http::cors::Any)
        } else {
            let origins: Vec<HeaderValue> = allowed_origins_str
                .split(',')
                .filter_map(|s| HeaderValue::from_str(s.trim()).ok())
                .collect();
            tracing::info!("CORS allowed origins: {:?}", origins);
            CorsLayer::new()
                .allow_origin(origins)
                .allow_methods([
                    axum::http::Method::GET,
                    axum::http::Method::POST,
                    axum::http::Method::PUT,
                    axum::http::Method::DELETE,
                    axum::http::Method::OPTIONS,
                ])
                .allow_headers(tower_http::cors::Any)
        }
    };

    let app = Router::new()
        .route("/healthz", get(healthz))
        .nest("/api", api_routes)
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        // Security headers
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_CONTENT_TYPE_OPTIONS,
            HeaderValue::from_static("nosniff"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::X_FRAME_OPTIONS,
            HeaderValue::from_static("DENY"),
        ))
        .layer(SetResponseHeaderLayer::overriding(
            axum::http::header::HeaderName::from_static("referrer-policy"),
            HeaderValue::from_static("strict-origin-when-cross-origin"),
        ))
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], 8080));
    tracing::info!(%addr, "server started");

    axum::serve(
        tokio::net::TcpListener::bind(addr).await.unwrap(),
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await
    .unwrap();
}

async fn healthz() -> Json<ApiStatus> {
    Json(ApiStatus {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
