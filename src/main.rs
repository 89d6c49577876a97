use auth_service::{
    build_router,
    config::AuthConfig,
    error::AppError,
    observability::init_tracing,
    queue::{worker::EmailWorkerPool, EmailQueue, RedisEmailQueue},
    services::{
        AuthService, EmailProvider, JwtService, OtpService, RedisSessions, SessionManager,
        SmtpEmailService,
    },
    store::{PostgresStore, UserStore},
    AppState,
};
use sqlx::postgres::PgPoolOptions;
use std::net::SocketAddr;
use std::sync::Arc;
use tokio::signal;

#[tokio::main]
async fn main() -> Result<(), AppError> {
    // Fail fast on bad configuration.
    let config = AuthConfig::from_env()?;

    init_tracing(
        &config.service_name,
        &config.log_level,
        config.otlp_endpoint.as_deref(),
    );

    tracing::info!(
        service = %config.service_name,
        version = %config.service_version,
        environment = ?config.environment,
        "Starting authentication service"
    );

    let pool = PgPoolOptions::new()
        .max_connections(config.database.max_connections)
        .connect(&config.database.url)
        .await?;
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .map_err(|e| AppError::Database(anyhow::anyhow!("Migration failed: {e}")))?;
    tracing::info!("Database initialized");

    let store: Arc<dyn UserStore> = Arc::new(PostgresStore::new(pool));

    let session_store = Arc::new(RedisSessions::new(&config.redis).await?);
    let sessions = SessionManager::new(session_store, config.session.ttl_days);

    let queue: Arc<dyn EmailQueue> = Arc::new(RedisEmailQueue::new(&config.redis).await?);
    let mailer: Arc<dyn EmailProvider> = Arc::new(SmtpEmailService::new(&config.smtp)?);

    let jwt = Arc::new(JwtService::new(&config.jwt));
    let otp = Arc::new(OtpService::new(
        Arc::clone(&store),
        Arc::clone(&queue),
        config.otp.expiry_minutes,
    ));
    let auth = Arc::new(AuthService::new(
        Arc::clone(&store),
        jwt,
        Arc::clone(&otp),
    ));

    let worker_pool = Arc::new(EmailWorkerPool::new(
        queue,
        mailer,
        config.email_worker.clone(),
    ));
    let shutdown = worker_pool.shutdown_token();
    let worker_handles = worker_pool.start().await?;

    let state = AppState {
        config: config.clone(),
        store,
        sessions,
        auth,
        otp,
    };
    let app = build_router(state)?;

    let addr = SocketAddr::from(([0, 0, 0, 0], config.port));
    let listener = tokio::net::TcpListener::bind(addr).await?;
    tracing::info!(%addr, "Listening");

    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown_signal())
    .await?;

    // Stop the workers after the listener drains; leased jobs are recovered
    // on the next start.
    tracing::info!("Shutting down email workers");
    shutdown.cancel();
    for handle in worker_handles {
        if let Err(e) = handle.await {
            tracing::warn!(error = %e, "Email worker exited abnormally");
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::error!(error = %e, "Failed to install Ctrl+C handler");
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => tracing::error!(error = %e, "Failed to install SIGTERM handler"),
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
}
