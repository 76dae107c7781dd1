//! # Balance Auditor Service
//!
//! The BalanceAuditor verifies the fundamental reconciliation invariant:
//! a wallet's cached buckets must equal the signed sums of its completed
//! ledger rows, and the cached total must equal the sum of its buckets.
//!
//! ## Reconciliation Flow
//!
//! ```text
//! Every N seconds (and on demand per wallet):
//! 1. Take the wallet's lock for a stable view
//!               ↓
//! 2. Read cached buckets + recompute sums from the ledger
//!               ↓
//! 3. Compare
//!               ↓
//! 4. If different:
//!    a. Log at error level (this indicates a bug)
//!    b. Write a reconciliation log row for review
//!    c. Correct the cache only if auto-fix is configured on
//! ```
//!
//! A mismatch is an integrity finding, never a request-time failure: the
//! auditor surfaces it asynchronously and never silently repairs it.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use tokio::time::interval;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::ReconciliationLog;
use crate::ledger::LedgerError;
use crate::store::{LedgerCommit, LedgerStore, NetworkTotals, WalletUpdate};
use crate::utils;

use super::{commit_error, WalletLocks};

/// Wallets fetched per sweep batch.
const AUDIT_BATCH: i64 = 100;

/// Result of reconciling one wallet.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    /// The audited wallet.
    pub user_id: String,

    /// Whether cache and ledger agree.
    pub ok: bool,

    /// Cached `(sendable, non_sendable, pending)`.
    pub cached: (i64, i64, i64),

    /// Recomputed `(sendable, non_sendable, pending)`.
    pub computed: (i64, i64, i64),

    /// Total difference (computed - cached).
    pub difference: i64,

    /// Whether the cache was corrected in place.
    pub auto_fixed: bool,
}

/// Ledger/cache reconciliation and network stats.
#[derive(Clone)]
pub struct BalanceAuditor {
    /// Ledger storage.
    store: Arc<dyn LedgerStore>,

    /// Per-wallet serialization.
    locks: WalletLocks,

    /// Application configuration.
    config: AppConfig,
}

impl BalanceAuditor {
    /// Create a new BalanceAuditor.
    pub fn new(store: Arc<dyn LedgerStore>, locks: WalletLocks, config: AppConfig) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    /// Reconcile a single wallet.
    ///
    /// Takes the wallet's lock so the cached buckets and the ledger sums
    /// come from one consistent instant.
    pub async fn reconcile_wallet(&self, user_id: &str) -> Result<ReconcileReport, LedgerError> {
        let _guard = self.locks.acquire(user_id).await?;

        let wallet = self
            .store
            .get_wallet(user_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))?;

        let sums = self.store.ledger_sums(user_id).await?;

        let cached = (
            wallet.sendable_balance,
            wallet.non_sendable_balance,
            wallet.pending_balance,
        );
        let computed = (sums.sendable, sums.non_sendable, sums.pending);
        let ok = cached == computed && wallet.buckets_consistent();

        if ok {
            debug!("Wallet {} reconciles: {:?}", user_id, cached);
            return Ok(ReconcileReport {
                user_id: user_id.to_string(),
                ok: true,
                cached,
                computed,
                difference: 0,
                auto_fixed: false,
            });
        }

        let difference = sums.total() - wallet.total_balance;
        error!(
            "Balance mismatch for {}: cached {:?} (total {}), ledger {:?} (total {}), diff {}",
            user_id,
            cached,
            wallet.total_balance,
            computed,
            sums.total(),
            difference
        );

        let mut auto_fixed = false;
        if self.config.reconcile_auto_fix {
            // Correct the cache to what the ledger proves, and say so.
            let update = WalletUpdate {
                user_id: user_id.to_string(),
                expected_version: wallet.version,
                sendable_balance: sums.sendable,
                non_sendable_balance: sums.non_sendable,
                pending_balance: sums.pending,
                total_balance: sums.total(),
                last_activity: wallet.last_activity,
            };
            let commit = LedgerCommit {
                transactions: vec![],
                wallet_updates: vec![update],
                idempotency: None,
            };
            match self.store.commit(commit).await {
                Ok(()) => {
                    auto_fixed = true;
                    warn!(
                        "Wallet {} cache corrected to ledger sums: {} -> {}",
                        user_id,
                        utils::format_celf(wallet.total_balance),
                        utils::format_celf(sums.total())
                    );
                }
                Err(e) => {
                    error!("Auto-fix for {} failed: {}", user_id, commit_error(e));
                }
            }
        }

        let log = ReconciliationLog {
            id: Uuid::new_v4(),
            user_id: Some(user_id.to_string()),
            cached_sendable: cached.0,
            cached_non_sendable: cached.1,
            cached_pending: cached.2,
            computed_sendable: computed.0,
            computed_non_sendable: computed.1,
            computed_pending: computed.2,
            difference,
            auto_fixed,
            notes: Some(if wallet.buckets_consistent() {
                "cache disagrees with ledger sums".to_string()
            } else {
                "cached total disagrees with its own buckets".to_string()
            }),
            created_at: Utc::now(),
        };
        self.store.insert_reconciliation_log(&log).await?;

        Ok(ReconcileReport {
            user_id: user_id.to_string(),
            ok: false,
            cached,
            computed,
            difference,
            auto_fixed,
        })
    }

    /// Reconcile every wallet, in batches.
    ///
    /// Returns `(checked, mismatches)`.
    pub async fn reconcile_all(&self) -> (usize, usize) {
        let mut offset = 0;
        let mut checked = 0;
        let mut mismatches = 0;

        loop {
            let wallets = match self.store.list_wallets(AUDIT_BATCH, offset).await {
                Ok(wallets) => wallets,
                Err(e) => {
                    error!("Audit sweep failed to list wallets: {}", e);
                    break;
                }
            };
            if wallets.is_empty() {
                break;
            }

            let reports = join_all(
                wallets
                    .iter()
                    .map(|wallet| self.reconcile_wallet(&wallet.user_id)),
            )
            .await;

            for report in reports {
                match report {
                    Ok(report) => {
                        checked += 1;
                        if !report.ok {
                            mismatches += 1;
                        }
                    }
                    Err(e) => warn!("Wallet reconciliation skipped: {}", e),
                }
            }

            offset += AUDIT_BATCH;
        }

        info!(
            "Reconciliation sweep complete: checked {} wallet(s), {} mismatch(es)",
            checked, mismatches
        );
        (checked, mismatches)
    }

    /// Run the sweep on the configured interval. Spawn as a background
    /// task from `main`.
    pub async fn start_reconciliation_loop(&self) {
        info!(
            "Starting balance reconciliation loop (interval: {}s, auto-fix: {})",
            self.config.reconciliation_interval, self.config.reconcile_auto_fix
        );

        let mut ticker = interval(Duration::from_secs(self.config.reconciliation_interval));
        loop {
            ticker.tick().await;
            self.reconcile_all().await;

            // Periodic circulation stats, for the operators' logs.
            if let Ok(totals) = self.store.network_totals().await {
                info!(
                    "Circulation: {} total ({} sendable, {} locked) across {} wallet(s)",
                    utils::format_celf(totals.total()),
                    utils::format_celf(totals.total_sendable),
                    utils::format_celf(totals.total_non_sendable),
                    totals.wallet_count
                );
            }
        }
    }

    /// Aggregate circulation stats.
    pub async fn network_stats(&self) -> Result<NetworkTotals, LedgerError> {
        Ok(self.store.network_totals().await?)
    }
}
