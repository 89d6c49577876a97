//! Router-level tests over the in-memory backends: cookies, the session
//! gate and request validation, driven straight through the tower service
//! without a listener.

use axum::body::{to_bytes, Body};
use axum::extract::connect_info::ConnectInfo;
use axum::http::{header, Request, StatusCode};
use axum::response::Response;
use axum::Router;
use std::net::SocketAddr;
use std::sync::Arc;
use tower::ServiceExt;

use auth_service::config::{
    AuthConfig, DatabaseConfig, EmailWorkerConfig, Environment, JwtConfig, OtpConfig, RedisConfig,
    SecurityConfig, SessionConfig, SmtpConfig,
};
use auth_service::queue::{EmailQueue, MemoryEmailQueue};
use auth_service::services::{
    AuthService, JwtService, MemorySessions, OtpService, SessionManager, SessionStore,
};
use auth_service::store::{MemoryStore, UserStore};
use auth_service::{build_router, AppState};

fn test_config() -> AuthConfig {
    AuthConfig {
        environment: Environment::Dev,
        service_name: "auth-service".to_string(),
        service_version: "test".to_string(),
        log_level: "info".to_string(),
        port: 8080,
        otlp_endpoint: None,
        database: DatabaseConfig {
            url: "postgres://unused".to_string(),
            max_connections: 1,
        },
        redis: RedisConfig {
            url: "redis://unused".to_string(),
        },
        jwt: JwtConfig {
            access_secret: "router-access-secret".to_string(),
            refresh_secret: "router-refresh-secret".to_string(),
            access_token_expiry_minutes: 15,
            refresh_token_expiry_days: 7,
        },
        session: SessionConfig {
            cookie_name: "session_id".to_string(),
            ttl_days: 7,
        },
        otp: OtpConfig { expiry_minutes: 10 },
        smtp: SmtpConfig {
            host: "localhost".to_string(),
            port: 587,
            user: String::new(),
            password: String::new(),
            from_address: "noreply@example.com".to_string(),
        },
        email_worker: EmailWorkerConfig {
            concurrency: 1,
            max_attempts: 5,
            backoff_base_secs: 0,
        },
        security: SecurityConfig {
            allowed_origins: vec!["http://localhost:3000".to_string()],
        },
    }
}

struct Harness {
    router: Router,
    queue: Arc<MemoryEmailQueue>,
}

fn harness() -> Harness {
    let config = test_config();
    let store: Arc<dyn UserStore> = Arc::new(MemoryStore::new());
    let queue = Arc::new(MemoryEmailQueue::new());
    let sessions = SessionManager::new(
        Arc::new(MemorySessions::new()) as Arc<dyn SessionStore>,
        config.session.ttl_days,
    );

    let jwt = Arc::new(JwtService::new(&config.jwt));
    let otp = Arc::new(OtpService::new(
        Arc::clone(&store),
        Arc::clone(&queue) as Arc<dyn EmailQueue>,
        config.otp.expiry_minutes,
    ));
    let auth = Arc::new(AuthService::new(Arc::clone(&store), jwt, Arc::clone(&otp)));

    let state = AppState {
        config,
        store,
        sessions,
        auth,
        otp,
    };

    Harness {
        router: build_router(state).unwrap(),
        queue,
    }
}

async fn post_json(
    router: &Router,
    uri: &str,
    body: &str,
    cookie: Option<&str>,
) -> Response {
    let mut builder = Request::builder()
        .method("POST")
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let mut req = builder.body(Body::from(body.to_string())).unwrap();
    req.extensions_mut()
        .insert(ConnectInfo(SocketAddr::from(([127, 0, 0, 1], 40000))));
    router.clone().oneshot(req).await.unwrap()
}

async fn get(router: &Router, uri: &str, cookie: Option<&str>) -> Response {
    let mut builder = Request::builder().method("GET").uri(uri);
    if let Some(cookie) = cookie {
        builder = builder.header(header::COOKIE, cookie);
    }
    let req = builder.body(Body::empty()).unwrap();
    router.clone().oneshot(req).await.unwrap()
}

fn set_cookie_value(resp: &Response, name: &str) -> Option<String> {
    let prefix = format!("{name}=");
    resp.headers()
        .get_all(header::SET_COOKIE)
        .iter()
        .filter_map(|v| v.to_str().ok())
        .find_map(|s| {
            s.strip_prefix(prefix.as_str())
                .map(|rest| rest.split(';').next().unwrap_or("").to_string())
        })
}

async fn json_body(resp: Response) -> serde_json::Value {
    let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn register_verify_login_logout_over_http() {
    let h = harness();

    // Register: 201, no session yet.
    let resp = post_json(
        &h.router,
        "/auth/register",
        r#"{"email":"jane@example.com","password":"a-strong-password","username":"jane"}"#,
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::CREATED);
    assert!(set_cookie_value(&resp, "session_id").is_none());

    // The gate refuses a cookie-less request.
    let resp = get(&h.router, "/users/me", None).await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Verify with the code from the queued job; a session cookie appears.
    let otp = h.queue.last_queued().unwrap().otp;
    let resp = post_json(
        &h.router,
        "/auth/otp/verify",
        &format!(r#"{{"email":"jane@example.com","otp":"{otp}"}}"#),
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let verify_sid = set_cookie_value(&resp, "session_id").unwrap();

    let resp = get(
        &h.router,
        "/users/me",
        Some(&format!("session_id={verify_sid}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert_eq!(body["email"], "jane@example.com");
    assert_eq!(body["is_verified"], true);

    // Login regenerates the session id and sets the refresh cookie.
    let resp = post_json(
        &h.router,
        "/auth/login",
        r#"{"email":"jane@example.com","password":"a-strong-password"}"#,
        Some(&format!("session_id={verify_sid}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let login_sid = set_cookie_value(&resp, "session_id").unwrap();
    let refresh = set_cookie_value(&resp, "refresh_token").unwrap();
    assert_ne!(login_sid, verify_sid);

    // The pre-login session id no longer passes the gate.
    let resp = get(
        &h.router,
        "/users/me",
        Some(&format!("session_id={verify_sid}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    // Refresh cookie mints a new access token.
    let resp = post_json(
        &h.router,
        "/auth/refresh",
        "{}",
        Some(&format!("refresh_token={refresh}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);
    let body = json_body(resp).await;
    assert!(body["access_token"].as_str().is_some_and(|t| !t.is_empty()));

    // Logout kills the session and revokes the refresh token.
    let resp = post_json(
        &h.router,
        "/auth/logout",
        "{}",
        Some(&format!("session_id={login_sid}; refresh_token={refresh}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::OK);

    let resp = get(
        &h.router,
        "/users/me",
        Some(&format!("session_id={login_sid}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);

    let resp = post_json(
        &h.router,
        "/auth/refresh",
        "{}",
        Some(&format!("refresh_token={refresh}")),
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn malformed_and_invalid_bodies_are_rejected() {
    let h = harness();

    // Unparseable JSON: 400 with the standard error shape.
    let resp = post_json(&h.router, "/auth/register", "{not json", None).await;
    assert_eq!(resp.status(), StatusCode::BAD_REQUEST);
    let body = json_body(resp).await;
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));

    // Parseable but failing validation rules: 422.
    let resp = post_json(
        &h.router,
        "/auth/register",
        r#"{"email":"not-an-email","password":"short","username":"jane"}"#,
        None,
    )
    .await;
    assert_eq!(resp.status(), StatusCode::UNPROCESSABLE_ENTITY);
    let body = json_body(resp).await;
    assert!(body["error"].as_str().is_some_and(|e| !e.is_empty()));
}

#[tokio::test]
async fn login_error_does_not_reveal_account_existence() {
    let h = harness();

    post_json(
        &h.router,
        "/auth/register",
        r#"{"email":"jane@example.com","password":"a-strong-password","username":"jane"}"#,
        None,
    )
    .await;
    let otp = h.queue.last_queued().unwrap().otp;
    post_json(
        &h.router,
        "/auth/otp/verify",
        &format!(r#"{{"email":"jane@example.com","otp":"{otp}"}}"#),
        None,
    )
    .await;

    let unknown = post_json(
        &h.router,
        "/auth/login",
        r#"{"email":"nobody@example.com","password":"whatever-pass"}"#,
        None,
    )
    .await;
    let wrong = post_json(
        &h.router,
        "/auth/login",
        r#"{"email":"jane@example.com","password":"wrong-password"}"#,
        None,
    )
    .await;

    assert_eq!(unknown.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(wrong.status(), StatusCode::UNAUTHORIZED);
    assert_eq!(json_body(unknown).await, json_body(wrong).await);
}
