//! Session-cookie authentication gate.
//!
//! Protected handlers take `AuthSession` as an extractor: the session
//! cookie is resolved against the session store, and a missing, unknown
//! or expired session id rejects the request before the handler runs.

use axum::{async_trait, extract::FromRequestParts, http::request::Parts};
use axum_extra::extract::cookie::CookieJar;

use crate::error::AppError;
use crate::services::SessionData;
use crate::AppState;

/// Authenticated session principal for the current request.
pub struct AuthSession {
    pub session_id: String,
    pub data: SessionData,
}

#[async_trait]
impl FromRequestParts<AppState> for AuthSession {
    type Rejection = AppError;

    async fn from_request_parts(
        parts: &mut Parts,
        state: &AppState,
    ) -> Result<Self, Self::Rejection> {
        let jar = CookieJar::from_headers(&parts.headers);

        let session_id = jar
            .get(&state.config.session.cookie_name)
            .map(|c| c.value().to_string())
            .ok_or(AppError::Unauthorized("Authentication required"))?;

        let data = state
            .sessions
            .store()
            .load_session(&session_id)
            .await?
            .ok_or(AppError::Unauthorized("Authentication required"))?;

        Ok(AuthSession { session_id, data })
    }
}
