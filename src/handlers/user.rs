use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};

use crate::{error::AppError, middleware::AuthSession, AppState};

/// Current user's profile
#[utoipa::path(
    get,
    path = "/users/me",
    responses(
        (status = 200, description = "Current user", body = UserResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "User"
)]
pub async fn get_me(
    State(state): State<AppState>,
    session: AuthSession,
) -> Result<impl IntoResponse, AppError> {
    let user = state.auth.get_user(session.data.user_id).await?;
    Ok((StatusCode::OK, Json(user.sanitized())))
}
