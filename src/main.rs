use rust_crm_api::config::Config;
use rust_crm_api::db::Database;
use rust_crm_api::email::LogMailer;
use rust_crm_api::handlers::AppState;
use rust_crm_api::pg_store::PgStore;
use rust_crm_api::routes;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Main entry point for the application.
///
/// This function initializes the application, including:
/// - Logging and tracing.
/// - Configuration loading.
/// - Database connection and migrations.
/// - HTTP routes and middleware (CORS, rate limiting, body limit).
///
/// It then starts the Axum server.
///
/// # Returns
///
/// * `anyhow::Result<()>` - Ok if the server runs successfully, or an error if initialization fails.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "rust_crm_api=debug,tower_http=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load configuration
    let config = Config::from_env()?;

    // Initialize database connection pool
    let db = Database::new(&config.database_url, config.db_max_connections).await?;
    tracing::info!("Database connection pool established");

    let store = Arc::new(PgStore::new(db.pool.clone()));
    let mailer = Arc::new(LogMailer::new(
        config.smtp_from_email.clone(),
        config.smtp_from_name.clone(),
    ));
    tracing::info!(
        "Mail transport: log only (sender {} <{}>)",
        config.smtp_from_name,
        config.smtp_from_email
    );

    // Build application state
    let app_state = Arc::new(AppState::new(store, Some(db), config.clone(), mailer));
    let app = routes::router(app_state)?;

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    // Peer addresses feed the per-IP rate limiter
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .await?;

    Ok(())
}
