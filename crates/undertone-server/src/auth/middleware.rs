use axum::{
    extract::{Request, State},
    http::StatusCode,
    middleware::Next,
    response::{IntoResponse, Response},
    Json,
};
use sea_orm::EntityTrait;
use serde_json::json;
use std::sync::Arc;

use super::jwt::{validate_token, Claims, TokenType};
use undertone_db::AppState;

/// Extension type to access authenticated user claims in handlers
#[derive(Clone, Debug)]
pub struct AuthUser(pub Claims);

fn bearer_token(request: &Request) -> Option<&str> {
    request
        .headers()
        .get("Authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|header| header.strip_prefix("Bearer "))
}

/// Middleware: require valid access token
pub async fn require_auth(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&request) {
        Some(t) => t,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Missing or invalid Authorization header" })),
            )
                .into_response();
        }
    };

    match validate_token(token, &state.jwt_secret) {
        Ok(claims) if claims.token_type == TokenType::Access => {
            request.extensions_mut().insert(AuthUser(claims));
            next.run(request).await
        }
        Ok(_) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid token type, access token required" })),
        )
            .into_response(),
        Err(_) => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid or expired token" })),
        )
            .into_response(),
    }
}

/// Middleware: require admin role
pub async fn require_admin(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    let token = match bearer_token(&request) {
        Some(t) => t,
        None => {
            return (
                StatusCode::UNAUTHORIZED,
                Json(json!({ "error": "Missing or invalid Authorization header" })),
            )
                .into_response();
        }
    };

    match validate_token(token, &state.jwt_secret) {
        Ok(claims) if claims.token_type == TokenType::Access && claims.role == "admin" => {
            // SECURITY: verify admin role from DB, not just JWT
            let user_id = claims.sub;
            let db = state.db.clone();
            let is_admin = tokio::spawn(async move {
                undertone_db::entities::user::Entity::find_by_id(user_id)
                    .one(&db)
                    .await
                    .ok()
                    .flatten()
                    .map(|u| u.role == undertone_db::entities::user::UserRole::Admin)
                    .unwrap_or(false)
            })
            .await
            .unwrap_or(false);

            if !is_admin {
                return (
                    StatusCode::FORBIDDEN,
                    Json(json!({ "error": "Admin access required" })),
                )
                    .into_response();
            }

            request.extensions_mut().insert(AuthUser(claims));
            next.run(request).await
        }
        Ok(claims) if claims.role != "admin" => (
            StatusCode::FORBIDDEN,
            Json(json!({ "error": "Admin access required" })),
        )
            .into_response(),
        _ => (
            StatusCode::UNAUTHORIZED,
            Json(json!({ "error": "Invalid or expired token" })),
        )
            .into_response(),
    }
}

/// Middleware: attach the caller identity when a valid access token is
/// present, otherwise pass the request through anonymously. This is how
/// the recommendation endpoint learns "current caller or none".
pub async fn attach_user(
    State(state): State<Arc<AppState>>,
    mut request: Request,
    next: Next,
) -> Response {
    if let Some(token) = bearer_token(&request) {
        if let Ok(claims) = validate_token(token, &state.jwt_secret) {
            if claims.token_type == TokenType::Access {
                request.extensions_mut().insert(AuthUser(claims));
            }
        }
    }
    next.run(request).await
}
