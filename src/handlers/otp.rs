use axum::{extract::State, http::StatusCode, response::IntoResponse, Json};
use axum_extra::extract::cookie::CookieJar;

use super::session_cookie;
use crate::{
    dtos::{
        auth::{SendOtpRequest, VerifyOtpRequest, VerifyOtpResponse},
        MessageResponse,
    },
    error::AppError,
    utils::ValidatedJson,
    AppState,
};

/// Request a fresh email verification code
#[utoipa::path(
    post,
    path = "/auth/otp/send",
    request_body = SendOtpRequest,
    responses(
        (status = 200, description = "Verification code queued", body = MessageResponse),
        (status = 400, description = "Email already verified", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Verification"
)]
pub async fn send_otp(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<SendOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    state.otp.request_otp(&req.email).await?;
    Ok((
        StatusCode::OK,
        Json(MessageResponse::new("Verification code sent")),
    ))
}

/// Submit a verification code
#[utoipa::path(
    post,
    path = "/auth/otp/verify",
    request_body = VerifyOtpRequest,
    responses(
        (status = 200, description = "Email verified, session established", body = VerifyOtpResponse),
        (status = 400, description = "Invalid, expired or missing code", body = ErrorResponse),
        (status = 404, description = "User not found", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Verification"
)]
pub async fn verify_otp(
    State(state): State<AppState>,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<VerifyOtpRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state.otp.verify_otp(&req.email, &req.otp).await?;

    // Verification authenticates the user, so the same session-id
    // regeneration rules as login apply.
    let previous = jar
        .get(&state.config.session.cookie_name)
        .map(|c| c.value().to_string());
    let session_id = state
        .sessions
        .establish(user.user_id, user.role(), previous.as_deref())
        .await?;

    let jar = jar.add(session_cookie(&state, session_id));

    Ok((
        StatusCode::OK,
        jar,
        Json(VerifyOtpResponse {
            user: user.sanitized(),
            message: "Email verified successfully".to_string(),
        }),
    ))
}
