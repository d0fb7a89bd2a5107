use anyhow::{Context, Result};
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use stocktake::config::AppConfig;
use stocktake::repositories::{PgCountRepository, PgMappingConfigRepository};
use stocktake::services::erp::ConnectionRegistry;
use stocktake::services::query::SqlDialect;
use stocktake::{create_app, AppState};

#[tokio::main]
async fn main() -> Result<()> {
    // INFO by default; RUST_LOG overrides for debugging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "stocktake=info,tower_http=info,sqlx=warn".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::from_env()?;
    let database = config
        .database
        .as_ref()
        .context("Database configuration is required to run the server")?;

    let pool = PgPoolOptions::new()
        .max_connections(20)
        .connect(&database.connection_string())
        .await
        .context("Failed to connect to the stocktake database")?;

    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .context("Failed to run database migrations")?;
    tracing::info!("Database migrations applied");

    let registry = ConnectionRegistry::new();
    match &config.erp.default_connection {
        Some(settings) if settings.dialect == SqlDialect::Postgres => {
            registry.register_postgres(settings.id, settings.url.clone());
            tracing::info!("Registered default ERP connection {}", settings.id);
        }
        Some(settings) => {
            tracing::warn!(
                "No built-in driver for {} ERP connection {}; register a connector for it",
                settings.dialect,
                settings.id
            );
        }
        None => tracing::info!("No default ERP connection configured"),
    }

    let state = AppState::new(
        config.clone(),
        Arc::new(PgCountRepository::new(pool.clone())),
        Arc::new(PgMappingConfigRepository::new(pool)),
        Arc::new(registry),
    );
    let app = create_app(state);

    let addr = config.server_address();
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("Failed to bind {}", addr))?;

    tracing::info!("Starting stocktake server on http://{}", addr);
    axum::serve(listener, app).await?;

    Ok(())
}
