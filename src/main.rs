//! Topup Service - Main Application Entry Point
//!
//! REST API backend for a game-topup store: customers browse products, apply
//! vouchers and create payment transactions; admins manage the catalog,
//! vouchers and the transaction lifecycle.
//!
//! # Architecture
//!
//! - **Web Framework**: Axum (async HTTP server)
//! - **Database**: PostgreSQL with sqlx (async queries, row locks)
//! - **Authentication**: API key with SHA-256 hashing, customer/admin roles
//! - **Format**: JSON requests/responses
//!
//! # Startup Flow
//!
//! 1. Load configuration from environment variables
//! 2. Create database connection pool
//! 3. Run database migrations
//! 4. Build payment gateway and messaging clients
//! 5. Start the expiry sweep
//! 6. Start server on configured port

use std::time::Duration;

use tracing_subscriber::EnvFilter;

use topup_service::{config, db, routes, services::state_machine, state::AppState};

/// Transactions failed per sweep tick.
const SWEEP_BATCH: i64 = 200;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize logging with tracing subscriber. Reads RUST_LOG environment variable (defaults to "info" level)
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = config::Config::from_env()?;
    tracing::info!("Configuration loaded");

    let pool = db::create_pool(&config.database_url, config.database_max_connections).await?;
    tracing::info!("Database pool created");

    db::run_migrations(&pool).await?;
    tracing::info!("Database migrations complete");

    let addr = format!("0.0.0.0:{}", config.server_port);
    let sweep_interval = config.expiry_sweep_interval_secs;

    let state = AppState::from_config(pool, config)?;

    if sweep_interval > 0 {
        spawn_expiry_sweep(state.clone(), Duration::from_secs(sweep_interval));
    } else {
        tracing::info!("Expiry sweep disabled");
    }

    let app = routes::router(state);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    tracing::info!("Server listening on {}", addr);

    axum::serve(listener, app).await?;

    Ok(())
}

/// Periodically fail transactions whose payment window has passed.
fn spawn_expiry_sweep(state: AppState, period: Duration) {
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(period);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;

            let result = state_machine::expire_overdue(
                &state.pool,
                state.config.lock_policy(),
                chrono::Utc::now(),
                SWEEP_BATCH,
            )
            .await;

            if let Err(e) = result {
                tracing::error!(error = %e, "expiry sweep failed");
            }
        }
    });

    tracing::info!(period_secs = period.as_secs(), "Expiry sweep started");
}
