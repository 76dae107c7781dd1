//! # CELF Wallet Ledger Backend
//!
//! Backend service for the CELF token product: the wallet ledger and
//! mining accrual engine. It guarantees that every balance is explainable
//! as a sum of discrete, auditable ledger transactions, and that
//! concurrent operations on one wallet (double-tapped claims, racing
//! transfers, repeated exchanges) can neither create nor destroy value.
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌────────────────────────────────────────────────────────────────┐
//! │                        BACKEND SERVICE                          │
//! │                                                                 │
//! │  ┌─────────────┐            ┌─────────────────────────────┐    │
//! │  │  REST API   │            │     Background Services      │    │
//! │  │  (Actix)    │            │  • Balance Auditor           │    │
//! │  │             │            │  • Stale-Session Sweep       │    │
//! │  └─────────────┘            └─────────────────────────────┘    │
//! │         │                                 │                     │
//! │  ┌──────┴─────────────────────────────────┴────────────────┐   │
//! │  │                     SERVICE LAYER                        │   │
//! │  │  WalletService   MiningService   RewardService           │   │
//! │  │            (all serialized by WalletLocks)               │   │
//! │  └──────────────────────────┬───────────────────────────────┘   │
//! │                             │                                   │
//! │                       LedgerStore                               │
//! │                      ┌──────┴──────┐                            │
//! │                 PostgreSQL      In-memory                       │
//! │                (production)    (dev, tests)                     │
//! └────────────────────────────────────────────────────────────────┘
//! ```
//!
//! This is not a blockchain: "mining" is a server-computed, time-based
//! accrual, and the transaction ledger is an ordinary append-only table.

pub mod api;
pub mod config;
pub mod db;
pub mod ledger;
pub mod models;
pub mod services;
pub mod store;
pub mod utils;

use std::sync::Arc;

use config::AppConfig;
use services::{BalanceAuditor, MiningService, RewardService, WalletService};
use store::LedgerStore;

/// Application state shared across all handlers.
///
/// All services clone cheaply (they share the store and lock registry
/// through `Arc`s), so one instance serves every worker.
pub struct AppState {
    /// Wallet lifecycle, transfers, exchanges, history.
    pub wallets: WalletService,

    /// Mining sessions and accrual.
    pub mining: MiningService,

    /// Referral and task reward claims.
    pub rewards: RewardService,

    /// Reconciliation and network stats.
    pub auditor: BalanceAuditor,

    /// Storage backend (health checks).
    pub store: Arc<dyn LedgerStore>,

    /// Application configuration.
    pub config: AppConfig,
}
