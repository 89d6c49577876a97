pub mod config;
pub mod dtos;
pub mod error;
pub mod handlers;
pub mod middleware;
pub mod models;
pub mod observability;
pub mod queue;
pub mod services;
pub mod store;
pub mod utils;

use axum::{
    extract::State,
    http::{header, HeaderValue, Method, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use std::sync::Arc;
use tower_http::{cors::CorsLayer, trace::TraceLayer};
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::config::{AuthConfig, Environment};
use crate::error::AppError;
use crate::services::{AuthService, OtpService, SessionManager};
use crate::store::UserStore;

#[derive(OpenApi)]
#[openapi(
    paths(
        health_check,
        handlers::auth::register,
        handlers::auth::login,
        handlers::auth::refresh,
        handlers::auth::logout,
        handlers::auth::logout_all,
        handlers::otp::send_otp,
        handlers::otp::verify_otp,
        handlers::user::get_me,
    ),
    components(
        schemas(
            dtos::ErrorResponse,
            dtos::MessageResponse,
            dtos::auth::RegisterRequest,
            dtos::auth::RegisterResponse,
            dtos::auth::SendOtpRequest,
            dtos::auth::VerifyOtpRequest,
            dtos::auth::VerifyOtpResponse,
            dtos::auth::LoginRequest,
            dtos::auth::LoginResponse,
            services::TokenResponse,
            models::Role,
            models::UserResponse,
        )
    ),
    tags(
        (name = "Authentication", description = "Registration, login and token lifecycle"),
        (name = "Verification", description = "Email verification codes"),
        (name = "User", description = "User profile"),
        (name = "Observability", description = "Service health")
    )
)]
pub struct ApiDoc;

#[derive(Clone)]
pub struct AppState {
    pub config: AuthConfig,
    pub store: Arc<dyn UserStore>,
    pub sessions: SessionManager,
    pub auth: Arc<AuthService>,
    pub otp: Arc<OtpService>,
}

/// Service health
#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy"),
        (status = 503, description = "A backing store is unavailable")
    ),
    tag = "Observability"
)]
pub async fn health_check(State(state): State<AppState>) -> Result<impl IntoResponse, AppError> {
    state.store.health_check().await?;
    state.sessions.store().health_check().await?;
    Ok((
        StatusCode::OK,
        Json(serde_json::json!({ "status": "healthy" })),
    ))
}

pub fn build_router(state: AppState) -> Result<Router, AppError> {
    let origins = state
        .config
        .security
        .allowed_origins
        .iter()
        .map(|origin| {
            origin
                .parse::<HeaderValue>()
                .map_err(|e| AppError::Config(anyhow::anyhow!("Invalid CORS origin {origin}: {e}")))
        })
        .collect::<Result<Vec<_>, _>>()?;

    let cors = CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
        .allow_headers([header::CONTENT_TYPE])
        .allow_credentials(true);

    let mut router = Router::new()
        .route("/health", get(health_check))
        .route("/auth/register", post(handlers::auth::register))
        .route("/auth/login", post(handlers::auth::login))
        .route("/auth/refresh", post(handlers::auth::refresh))
        .route("/auth/logout", post(handlers::auth::logout))
        .route("/auth/logout-all", post(handlers::auth::logout_all))
        .route("/auth/otp/send", post(handlers::otp::send_otp))
        .route("/auth/otp/verify", post(handlers::otp::verify_otp))
        .route("/users/me", get(handlers::user::get_me));

    // API docs stay off in production.
    if state.config.environment == Environment::Dev {
        router = router
            .merge(SwaggerUi::new("/docs").url("/api-docs/openapi.json", ApiDoc::openapi()));
    }

    Ok(router
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state))
}
