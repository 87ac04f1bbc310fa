//! Request authentication: bearer tokens resolved to users.

use std::sync::Arc;

use axum::extract::FromRequestParts;
use axum::http::request::Parts;
use axum::http::{header, HeaderMap};
use chrono::Utc;

use crate::api::handlers::storage_error;
use crate::api::response::ApiError;
use crate::auth::token_digest;
use crate::storage::models::UserRecord;
use crate::AppState;

/// The authenticated, active user making the request.
#[derive(Debug, Clone)]
pub struct CurrentUser(pub UserRecord);

impl CurrentUser {
    pub fn id(&self) -> u64 {
        self.0.id
    }

    /// Fail with 403 unless the user holds `perm`.
    pub fn require(&self, perm: &str) -> Result<(), ApiError> {
        if self.0.has_perm(perm) {
            Ok(())
        } else {
            Err(ApiError::forbidden(format!(
                "You do not have permission '{perm}'"
            )))
        }
    }

    pub fn require_superuser(&self) -> Result<(), ApiError> {
        if self.0.is_superuser {
            Ok(())
        } else {
            Err(ApiError::forbidden("Superuser status required"))
        }
    }
}

/// Extract the token from `Authorization: Bearer <token>`.
pub fn bearer_token(headers: &HeaderMap) -> Option<&str> {
    let value = headers.get(header::AUTHORIZATION)?.to_str().ok()?;
    let (scheme, token) = value.split_once(' ')?;
    let token = token.trim();
    (scheme.eq_ignore_ascii_case("bearer") && !token.is_empty()).then_some(token)
}

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for CurrentUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        let token = bearer_token(&parts.headers).ok_or_else(|| {
            ApiError::unauthenticated("Authentication credentials were not provided")
        })?;
        let digest = token_digest(token);

        let session = state
            .db
            .get_session(&digest)
            .map_err(storage_error)?
            .ok_or_else(|| ApiError::unauthenticated("Invalid or expired token"))?;

        if session.is_expired(Utc::now()) {
            if let Err(e) = state.db.delete_session(&digest) {
                tracing::warn!(error = %e, "Failed to remove expired session");
            }
            return Err(ApiError::unauthenticated("Invalid or expired token"));
        }

        let user = state
            .db
            .get_user(session.user_id)
            .map_err(storage_error)?
            .filter(|u| u.is_active)
            .ok_or_else(|| ApiError::unauthenticated("Invalid or expired token"))?;

        Ok(CurrentUser(user))
    }
}

/// An authenticated user allowed into the admin API.
#[derive(Debug, Clone)]
pub struct StaffUser(pub CurrentUser);

#[axum::async_trait]
impl FromRequestParts<Arc<AppState>> for StaffUser {
    type Rejection = ApiError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &Arc<AppState>,
    ) -> Result<Self, ApiError> {
        let user = CurrentUser::from_request_parts(parts, state).await?;
        if !user.0.is_staff {
            return Err(ApiError::forbidden("Staff status required"));
        }
        Ok(StaffUser(user))
    }
}
