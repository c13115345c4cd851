// API server clippy configuration
#![cfg_attr(test, allow(clippy::expect_used))]
#![cfg_attr(test, allow(clippy::unwrap_used))]

//! Quickshop Billing API Server
//!
//! Public surface of the billing engine: checkout initiation, the signed
//! payment-gateway callback, and invoice listing for the admin panel.

mod error;
mod routes;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use quickshop_billing::BillingService;
use quickshop_shared::{create_migration_pool, create_pool, run_migrations};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::{routes::create_router, state::AppState};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load .env file if present
    dotenvy::dotenv().ok();

    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,quickshop_api=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    tracing::info!(
        "Starting Quickshop Billing API v{}",
        env!("CARGO_PKG_VERSION")
    );

    let database_url = std::env::var("DATABASE_URL")
        .map_err(|_| anyhow::anyhow!("DATABASE_URL must be set"))?;

    tracing::info!("Connecting to database...");
    let pool = create_pool(&database_url).await?;
    tracing::info!("Database connection established");

    // Migrations run over a direct connection (PgBouncer doesn't support the
    // prepared statements the migrator uses)
    let migration_url =
        std::env::var("DATABASE_DIRECT_URL").unwrap_or_else(|_| database_url.clone());
    let migration_pool = create_migration_pool(&migration_url).await?;
    run_migrations(&migration_pool).await?;
    migration_pool.close().await;
    tracing::info!("Database migrations complete");

    let billing = Arc::new(BillingService::from_env(pool.clone())?);
    let state = AppState::new(pool, billing);

    let app = create_router(state);

    let addr: SocketAddr = std::env::var("BIND_ADDRESS")
        .unwrap_or_else(|_| "0.0.0.0:8080".to_string())
        .parse()?;
    tracing::info!("Starting server on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(listener, app).await?;

    Ok(())
}
