use axum::{
    extract::{ConnectInfo, State},
    http::{header, HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use axum_extra::extract::cookie::CookieJar;
use std::net::SocketAddr;

use super::{refresh_cookie, removal_cookie, session_cookie, REFRESH_COOKIE};
use crate::{
    dtos::{
        auth::{LoginRequest, LoginResponse, RegisterRequest, RegisterResponse},
        MessageResponse,
    },
    error::AppError,
    middleware::AuthSession,
    models::DeviceMeta,
    utils::ValidatedJson,
    AppState,
};

fn device_meta(addr: &SocketAddr, headers: &HeaderMap, req: &LoginRequest) -> DeviceMeta {
    DeviceMeta {
        ip_address: Some(addr.ip().to_string()),
        user_agent: headers
            .get(header::USER_AGENT)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string),
        device_name: req.device_name.clone(),
        device_type: req.device_type.clone(),
    }
}

/// Register a new account
#[utoipa::path(
    post,
    path = "/auth/register",
    request_body = RegisterRequest,
    responses(
        (status = 201, description = "Account created, verification email queued", body = RegisterResponse),
        (status = 409, description = "Email already exists", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn register(
    State(state): State<AppState>,
    ValidatedJson(req): ValidatedJson<RegisterRequest>,
) -> Result<impl IntoResponse, AppError> {
    let user = state
        .auth
        .register(&req.email, &req.password, &req.username, req.role)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(RegisterResponse {
            user: user.sanitized(),
            message: "Registration successful. Check your email for a verification code."
                .to_string(),
        }),
    ))
}

/// Login with email and password
#[utoipa::path(
    post,
    path = "/auth/login",
    request_body = LoginRequest,
    responses(
        (status = 200, description = "Login successful", body = LoginResponse),
        (status = 401, description = "Invalid credentials", body = ErrorResponse),
        (status = 403, description = "Email not verified", body = ErrorResponse),
        (status = 422, description = "Validation error", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn login(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    headers: HeaderMap,
    jar: CookieJar,
    ValidatedJson(req): ValidatedJson<LoginRequest>,
) -> Result<impl IntoResponse, AppError> {
    let device = device_meta(&addr, &headers, &req);
    let (user, tokens) = state.auth.login(&req.email, &req.password, device).await?;

    // Regenerate the session id: any cookie that predates authentication
    // must not survive it.
    let previous = jar
        .get(&state.config.session.cookie_name)
        .map(|c| c.value().to_string());
    let session_id = state
        .sessions
        .establish(user.user_id, user.role(), previous.as_deref())
        .await?;

    let jar = jar
        .add(session_cookie(&state, session_id))
        .add(refresh_cookie(&state, tokens.refresh_token));

    Ok((
        StatusCode::OK,
        jar,
        Json(LoginResponse {
            user: user.sanitized(),
            tokens: tokens.access,
        }),
    ))
}

/// Exchange the refresh cookie for a new access token
#[utoipa::path(
    post,
    path = "/auth/refresh",
    responses(
        (status = 200, description = "Token refreshed", body = TokenResponse),
        (status = 401, description = "Invalid or expired token", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn refresh(
    State(state): State<AppState>,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    let refresh_token = jar
        .get(REFRESH_COOKIE)
        .map(|c| c.value().to_string())
        .ok_or(AppError::Unauthorized("Missing refresh token"))?;

    let tokens = state.auth.refresh(&refresh_token).await?;
    Ok((StatusCode::OK, Json(tokens)))
}

/// Logout the current session
#[utoipa::path(
    post,
    path = "/auth/logout",
    responses(
        (status = 200, description = "Logged out", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn logout(
    State(state): State<AppState>,
    session: AuthSession,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    state
        .sessions
        .clear(session.data.user_id, &session.session_id)
        .await?;

    if let Some(cookie) = jar.get(REFRESH_COOKIE) {
        state.auth.revoke_refresh_token(cookie.value()).await?;
    }

    let jar = jar
        .add(removal_cookie(state.config.session.cookie_name.clone(), "/"))
        .add(removal_cookie(REFRESH_COOKIE.to_string(), "/auth"));

    Ok((
        StatusCode::OK,
        jar,
        Json(MessageResponse::new("Logged out successfully")),
    ))
}

/// Logout every session and device for the current user
#[utoipa::path(
    post,
    path = "/auth/logout-all",
    responses(
        (status = 200, description = "All sessions cleared", body = MessageResponse),
        (status = 401, description = "Not authenticated", body = ErrorResponse),
        (status = 500, description = "Internal server error", body = ErrorResponse)
    ),
    tag = "Authentication"
)]
pub async fn logout_all(
    State(state): State<AppState>,
    session: AuthSession,
    jar: CookieJar,
) -> Result<impl IntoResponse, AppError> {
    state.sessions.clear_all(session.data.user_id).await?;
    state
        .auth
        .revoke_all_refresh_tokens(session.data.user_id)
        .await?;

    let jar = jar
        .add(removal_cookie(state.config.session.cookie_name.clone(), "/"))
        .add(removal_cookie(REFRESH_COOKIE.to_string(), "/auth"));

    Ok((
        StatusCode::OK,
        jar,
        Json(MessageResponse::new("Logged out from all devices")),
    ))
}
