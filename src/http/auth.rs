use axum::extract::FromRequestParts;
use axum::http::header;
use axum::http::request::Parts;
use uuid::Uuid;

use crate::app::auth::AuthSession;
use crate::http::AppError;
use crate::AppState;

#[derive(Debug, Clone, Copy)]
pub struct AuthUser {
    pub user_id: i64,
    pub session_id: Uuid,
}

impl From<AuthUser> for AuthSession {
    fn from(user: AuthUser) -> Self {
        Self {
            user_id: user.user_id,
            session_id: user.session_id,
        }
    }
}

#[axum::async_trait]
impl FromRequestParts<AppState> for AuthUser {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let auth_header = parts
            .headers
            .get(header::AUTHORIZATION)
            .and_then(|value| value.to_str().ok())
            .ok_or_else(|| AppError::unauthorized("Unauthenticated."))?;

        let token = auth_header
            .strip_prefix("Bearer ")
            .ok_or_else(|| AppError::unauthorized("Unauthenticated."))?;

        let session = state
            .auth_service()
            .authenticate(token.trim())
            .await
            .map_err(|err| AppError::from_service(err, "failed to authenticate"))?;

        Ok(AuthUser {
            user_id: session.user_id,
            session_id: session.session_id,
        })
    }
}
