use std::sync::Arc;

use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use chrono::{Duration, Utc};
use serde::{Deserialize, Serialize};

use super::storage_error;
use crate::api::auth::{bearer_token, CurrentUser};
use crate::api::response::{ApiError, AppJson, JSend};
use crate::auth::{generate_token, perms, token_digest, verify_password};
use crate::storage::models::{SessionRecord, UserRecord};
use crate::AppState;

const BAD_CREDENTIALS: &str = "Please enter a correct username and password";

// ============================================================================
// Types
// ============================================================================

#[derive(Debug, Deserialize)]
pub struct LoginRequest {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Serialize)]
pub struct LoginResponse {
    pub token: String,
    pub expires_at: String,
    pub user: UserResponse,
}

#[derive(Debug, Serialize)]
pub struct UserResponse {
    pub id: u64,
    pub username: String,
    pub is_active: bool,
    pub is_staff: bool,
    pub is_superuser: bool,
    /// Effective permissions: every known codename for superusers
    pub permissions: Vec<String>,
    pub date_joined: String,
    pub last_login: Option<String>,
}

// ============================================================================
// Handlers
// ============================================================================

pub async fn login(
    State(state): State<Arc<AppState>>,
    AppJson(req): AppJson<LoginRequest>,
) -> Result<Json<JSend<LoginResponse>>, ApiError> {
    let user = state
        .db
        .get_user_by_username(req.username.trim())
        .map_err(storage_error)?
        .ok_or_else(|| ApiError::unauthenticated(BAD_CREDENTIALS))?;

    // PBKDF2 blocks for the whole iteration count
    let encoded = user.password_hash.clone();
    let password = req.password;
    let verified = tokio::task::spawn_blocking(move || verify_password(&password, &encoded))
        .await
        .map_err(|e| ApiError::internal(format!("Password check failed: {e}")))?;

    match verified {
        Ok(true) if user.is_active => {}
        Ok(_) => return Err(ApiError::unauthenticated(BAD_CREDENTIALS)),
        Err(e) => {
            tracing::error!(user_id = user.id, error = %e, "Stored password hash is unusable");
            return Err(ApiError::unauthenticated(BAD_CREDENTIALS));
        }
    }

    let token = generate_token().map_err(|e| ApiError::internal(e.to_string()))?;
    let now = Utc::now();
    let ttl = state.config.auth.session_ttl_seconds;
    let expires_at = Duration::try_seconds(ttl)
        .and_then(|ttl| now.checked_add_signed(ttl))
        .ok_or_else(|| {
            tracing::error!(session_ttl_seconds = ttl, "Session lifetime is out of range");
            ApiError::internal("Session lifetime is out of range")
        })?;
    let session = SessionRecord {
        user_id: user.id,
        created_at: now,
        expires_at,
    };
    state
        .db
        .put_session(&token_digest(&token), &session)
        .map_err(storage_error)?;
    state.db.record_login(user.id, now).map_err(storage_error)?;

    tracing::debug!(user_id = user.id, "User logged in");

    let user = UserRecord {
        last_login: Some(now),
        ..user
    };
    Ok(JSend::success(LoginResponse {
        token,
        expires_at: session.expires_at.to_rfc3339(),
        user: user_to_response(&user),
    }))
}

pub async fn logout(
    State(state): State<Arc<AppState>>,
    user: CurrentUser,
    headers: HeaderMap,
) -> Result<Json<JSend<()>>, ApiError> {
    if let Some(token) = bearer_token(&headers) {
        state
            .db
            .delete_session(&token_digest(token))
            .map_err(storage_error)?;
    }

    tracing::debug!(user_id = user.id(), "User logged out");
    Ok(JSend::success(()))
}

pub async fn me(user: CurrentUser) -> Json<JSend<UserResponse>> {
    JSend::success(user_to_response(&user.0))
}

// ============================================================================
// Helpers
// ============================================================================

pub(super) fn user_to_response(user: &UserRecord) -> UserResponse {
    let permissions = if user.is_superuser {
        perms::ALL.iter().map(|p| p.to_string()).collect()
    } else {
        user.permissions.iter().cloned().collect()
    };

    UserResponse {
        id: user.id,
        username: user.username.clone(),
        is_active: user.is_active,
        is_staff: user.is_staff,
        is_superuser: user.is_superuser,
        permissions,
        date_joined: user.date_joined.to_rfc3339(),
        last_login: user.last_login.map(|t| t.to_rfc3339()),
    }
}
