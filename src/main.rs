//! # Wallet Backend Entry Point
//!
//! Wires the service together:
//!
//! 1. Structured logging (tracing)
//! 2. Configuration from environment
//! 3. Storage backend (PostgreSQL, or in-memory for local development)
//! 4. Services and per-wallet lock registry
//! 5. Background loops: balance auditor, stale-session sweep
//! 6. HTTP server
//!
//! ## Quick Start
//!
//! 1. Set up PostgreSQL and create the database
//! 2. Copy `.env.example` to `.env` and configure
//! 3. Start the server: `cargo run` (migrations run automatically)

use std::sync::Arc;
use std::time::Duration;

use actix_web::{middleware, web, App, HttpServer};
use tracing::info;
use tracing_subscriber::EnvFilter;

use celf_wallet_backend::config::{AppConfig, StorageMode};
use celf_wallet_backend::db::Database;
use celf_wallet_backend::services::{
    BalanceAuditor, MiningService, RewardService, StaticTaskCatalog, WalletLocks, WalletService,
};
use celf_wallet_backend::store::{LedgerStore, MemStore, PgStore};
use celf_wallet_backend::{api, AppState};

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    // =========================================
    // STEP 1: Initialize Logging
    // =========================================
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    info!("🚀 Starting CELF Wallet Ledger Backend");

    // =========================================
    // STEP 2: Load Configuration
    // =========================================
    dotenvy::dotenv().ok(); // It's okay if .env doesn't exist

    let config = AppConfig::from_env().expect("Failed to load configuration");

    info!("📋 Configuration loaded");
    info!("   Storage: {:?}", config.storage_mode);
    info!(
        "   Mining: base {} µCELF/h, max {} µCELF/h, ceiling {}h",
        config.base_mining_rate, config.max_mining_rate, config.max_session_hours
    );

    // =========================================
    // STEP 3: Initialize Storage
    // =========================================
    let store: Arc<dyn LedgerStore> = match config.storage_mode {
        StorageMode::Postgres => {
            let db = Database::connect(&config.database_url)
                .await
                .expect("Failed to connect to database");
            info!("🗄️  Database connected");

            db.run_migrations()
                .await
                .expect("Failed to run migrations");
            info!("📦 Database migrations complete");

            Arc::new(PgStore::new(db))
        }
        StorageMode::Memory => {
            info!("🗄️  Using in-memory store (state is not persisted!)");
            Arc::new(MemStore::new())
        }
    };

    // =========================================
    // STEP 4: Initialize Services
    // =========================================
    let locks = WalletLocks::new(
        config.lock_attempts,
        Duration::from_millis(config.lock_wait_ms),
    );
    let catalog = Arc::new(StaticTaskCatalog::new(config.task_reward));

    let wallets = WalletService::new(store.clone(), locks.clone(), config.clone());
    let mining = MiningService::new(store.clone(), locks.clone(), config.clone());
    let rewards = RewardService::new(store.clone(), locks.clone(), catalog, config.clone());
    let auditor = BalanceAuditor::new(store.clone(), locks.clone(), config.clone());

    info!("🔧 Services initialized");

    // =========================================
    // STEP 5: Start Background Services
    // =========================================
    let sweep = mining.clone();
    tokio::spawn(async move {
        sweep.start_sweep_loop().await;
    });
    info!("⛏️  Stale-session sweep started");

    let reconciler = auditor.clone();
    tokio::spawn(async move {
        reconciler.start_reconciliation_loop().await;
    });
    info!("📊 Balance auditor started");

    // =========================================
    // STEP 6: Create Application State
    // =========================================
    let app_state = Arc::new(AppState {
        wallets,
        mining,
        rewards,
        auditor,
        store,
        config: config.clone(),
    });

    // =========================================
    // STEP 7: Start HTTP Server
    // =========================================
    let server_host = config.server_host.clone();
    let server_port = config.server_port;

    info!("🌐 Starting HTTP server on {}:{}", server_host, server_port);

    HttpServer::new(move || {
        App::new()
            // Attach shared application state
            .app_data(web::Data::new(app_state.clone()))
            // Add logging middleware
            .wrap(middleware::Logger::default())
            // Configure API routes
            .configure(api::configure_routes)
    })
    .bind(format!("{}:{}", server_host, server_port))?
    .run()
    .await
}
