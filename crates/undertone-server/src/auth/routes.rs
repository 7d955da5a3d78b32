use axum::{extract::State, http::StatusCode, Json};
use sea_orm::{ActiveModelTrait, ColumnTrait, EntityTrait, PaginatorTrait, QueryFilter, Set};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use uuid::Uuid;

use super::jwt::{generate_token_pair, validate_token, TokenPair, TokenType};
use super::middleware::AuthUser;
use super::password::{hash_password, verify_password};
use undertone_db::entities::user;
use undertone_db::AppState;

// ─── Request/Response DTOs ──────────────────────────────────────────

#[derive(Debug, Deserialize)]
pub struct RegisterRequest {
    pub username: String,
    pub email: String,
    pub password: String,
    pub display_name: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Deserialize)]
pub struct RefreshRequest {
    pub refresh_token: String,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: Uuid,
    pub username: String,
    pub email: String,
    pub display_name: Option<String>,
    pub avatar_url: Option<String>,
    pub role: String,
}

#[derive(Debug, Serialize)]
pub struct AuthResponse {
    pub user: UserResponse,
    pub tokens: TokenPair,
}

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
}

type AuthError = (StatusCode, Json<ErrorResponse>);

fn bad_request(msg: &str) -> AuthError {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: msg.to_string(),
        }),
    )
}

fn internal_error<E: std::fmt::Display>(context: &str, e: E) -> AuthError {
    tracing::error!("{context}: {e}");
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: "Internal server error".to_string(),
        }),
    )
}

// ─── Input validation ───────────────────────────────────────────────

fn validate_registration(body: &RegisterRequest) -> Result<(), &'static str> {
    if body.username.len() < 3 || body.username.len() > 64 {
        return Err("Username must be between 3 and 64 characters");
    }
    if body.username.contains('@') || body.username.contains('/') || body.username.contains(' ') {
        return Err("Username cannot contain @, / or spaces");
    }
    if body.password.len() < 8 {
        return Err("Password must be at least 8 characters");
    }
    if !body.email.contains('@')
        || body.email.starts_with('@')
        || body.email.ends_with('@')
        || !body
            .email
            .split('@')
            .nth(1)
            .is_some_and(|d| d.contains('.'))
        || body.email.len() > 254
    {
        return Err("Invalid email address");
    }
    Ok(())
}

// ─── Handlers ───────────────────────────────────────────────────────

/// POST /api/auth/register
pub async fn register(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RegisterRequest>,
) -> Result<(StatusCode, Json<AuthResponse>), AuthError> {
    validate_registration(&body).map_err(bad_request)?;

    let existing = user::Entity::find()
        .filter(
            user::Column::Username
                .eq(&body.username)
                .or(user::Column::Email.eq(&body.email)),
        )
        .one(&state.db)
        .await
        .map_err(|e| internal_error("db error", e))?;

    if existing.is_some() {
        return Err((
            StatusCode::CONFLICT,
            Json(ErrorResponse {
                error: "Username or email already taken".to_string(),
            }),
        ));
    }

    let password_hash =
        hash_password(&body.password).map_err(|e| internal_error("hash error", e))?;

    let now = chrono::Utc::now().fixed_offset();

    // First registered user becomes admin
    let user_count: u64 = user::Entity::find().count(&state.db).await.unwrap_or(0);
    let role = if user_count == 0 {
        user::UserRole::Admin
    } else {
        user::UserRole::User
    };

    let new_user = user::ActiveModel {
        id: Set(Uuid::new_v4()),
        username: Set(body.username.clone()),
        email: Set(body.email.clone()),
        password_hash: Set(password_hash),
        display_name: Set(body.display_name.clone()),
        avatar_url: Set(None),
        role: Set(role),
        created_at: Set(now),
        updated_at: Set(now),
    };

    let created = new_user
        .insert(&state.db)
        .await
        .map_err(|e| internal_error("insert error", e))?;

    let tokens = generate_token_pair(
        created.id,
        &created.username,
        created.role.as_str(),
        &state.jwt_secret,
    )
    .map_err(|e| internal_error("token error", e))?;

    Ok((
        StatusCode::CREATED,
        Json(AuthResponse {
            user: UserResponse {
                id: created.id,
                username: created.username,
                email: created.email,
                display_name: created.display_name,
                avatar_url: created.avatar_url,
                role: created.role.to_string(),
            },
            tokens,
        }),
    ))
}

/// POST /api/auth/login
pub async fn login(
    State(state): State<Arc<AppState>>,
    Json(body): Json<LoginRequest>,
) -> Result<Json<AuthResponse>, AuthError> {
    let found = user::Entity::find()
        .filter(user::Column::Username.eq(&body.username))
        .one(&state.db)
        .await
        .map_err(|e| internal_error("db error", e))?;

    let user = found.ok_or_else(|| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid credentials".to_string(),
            }),
        )
    })?;

    let valid = verify_password(&body.password, &user.password_hash)
        .map_err(|e| internal_error("verify error", e))?;

    if !valid {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid credentials".to_string(),
            }),
        ));
    }

    let tokens = generate_token_pair(
        user.id,
        &user.username,
        user.role.as_str(),
        &state.jwt_secret,
    )
    .map_err(|e| internal_error("token error", e))?;

    Ok(Json(AuthResponse {
        user: UserResponse {
            id: user.id,
            username: user.username,
            email: user.email,
            display_name: user.display_name,
            avatar_url: user.avatar_url,
            role: user.role.to_string(),
        },
        tokens,
    }))
}

/// POST /api/auth/refresh
pub async fn refresh(
    State(state): State<Arc<AppState>>,
    Json(body): Json<RefreshRequest>,
) -> Result<Json<TokenPair>, AuthError> {
    let claims = validate_token(&body.refresh_token, &state.jwt_secret).map_err(|_| {
        (
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid or expired refresh token".to_string(),
            }),
        )
    })?;

    if claims.token_type != TokenType::Refresh {
        return Err((
            StatusCode::UNAUTHORIZED,
            Json(ErrorResponse {
                error: "Invalid token type".to_string(),
            }),
        ));
    }

    // Verify user still exists
    let user = user::Entity::find_by_id(claims.sub)
        .one(&state.db)
        .await
        .map_err(|e| internal_error("db error", e))?
        .ok_or_else(|| {
            (
                StatusCode::UNAUTHORIZED,
                Json(ErrorResponse {
                    error: "User no longer exists".to_string(),
                }),
            )
        })?;

    let tokens = generate_token_pair(
        user.id,
        &user.username,
        user.role.as_str(),
        &state.jwt_secret,
    )
    .map_err(|e| internal_error("token error", e))?;

    Ok(Json(tokens))
}

/// GET /api/auth/me (requires auth)
pub async fn me(
    State(state): State<Arc<AppState>>,
    axum::Extension(auth_user): axum::Extension<AuthUser>,
) -> Result<Json<UserResponse>, AuthError> {
    let user = user::Entity::find_by_id(auth_user.0.sub)
        .one(&state.db)
        .await
        .map_err(|e| internal_error("db error", e))?
        .ok_or_else(|| {
            (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error: "User not found".to_string(),
                }),
            )
        })?;

    Ok(Json(UserResponse {
        id: user.id,
        username: user.username,
        email: user.email,
        display_name: user.display_name,
        avatar_url: user.avatar_url,
        role: user.role.to_string(),
    }))
}
