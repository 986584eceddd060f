// Main entry point for the relay server

use std::sync::Arc;

use anyhow::{Context, Result};
use openai_client::OpenAIClient;
use relay_core::domains::auth::JwtService;
use relay_core::domains::billing::PgQuotaService;
use relay_core::domains::chat::PgChatRepository;
use relay_core::domains::messenger::PgMessengerRepository;
use relay_core::generation::OpenAIGenerationSource;
use relay_core::kernel::ServerDeps;
use relay_core::realtime::Hub;
use relay_core::{server::build_app, Config};
use sqlx::postgres::PgPoolOptions;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,relay_core=debug,sqlx=warn".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!("Starting relay server");

    // Load configuration
    let config = Config::from_env().context("Failed to load configuration")?;
    tracing::info!("Configuration loaded");

    // Connect to database
    tracing::info!("Connecting to database...");
    let pool = PgPoolOptions::new()
        .max_connections(10)
        .connect(&config.database_url)
        .await
        .context("Failed to connect to database")?;
    tracing::info!("Database connected");

    // Run migrations
    tracing::info!("Running database migrations...");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run migrations")?;
    tracing::info!("Migrations complete");

    // Upstream model
    let mut openai = OpenAIClient::new(config.openai_api_key.clone());
    if let Some(base_url) = &config.openai_base_url {
        openai = openai.with_base_url(base_url.clone());
    }

    let hub = Hub::spawn(config.connection_queue_capacity);
    let deps = ServerDeps::new(
        hub,
        Arc::new(PgChatRepository::new(pool.clone())),
        Arc::new(PgMessengerRepository::new(pool.clone())),
        Arc::new(PgQuotaService::new(pool.clone())),
        Arc::new(OpenAIGenerationSource::new(openai)),
        Arc::new(JwtService::new(&config.jwt_secret, config.jwt_issuer.clone())),
        config.default_model.clone(),
    )
    .with_generation_timeout(config.generation_timeout);

    // Build application
    let app = build_app(pool, Arc::new(deps), config.allowed_origins.clone());

    // Start server
    let addr = format!("0.0.0.0:{}", config.port);
    tracing::info!("Starting server on {}", addr);
    tracing::info!("WebSocket: ws://localhost:{}/ws", config.port);
    tracing::info!("Health check: http://localhost:{}/health", config.port);

    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .context("Failed to bind to address")?;

    axum::serve(listener, app)
        .await
        .context("Server error")?;

    Ok(())
}
