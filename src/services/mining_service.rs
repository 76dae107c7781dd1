//! # Mining Service
//!
//! Time-based accrual: a user opens a mining session, the server records
//! `started_at` and the clamped rate, and on stop the server computes the
//! earnings from its own clock. Client-reported durations are never
//! consulted; the mobile countdown is a display derived from the
//! server-authoritative `started_at`/`rate` pair this service exposes.
//!
//! ## State Machine
//!
//! ```text
//!          start_mining              stop_mining / sweep
//!   Idle ───────────────► Mining ─────────────────────► Idle
//!          (one open                (accrual credited
//!        session per user)           to non-sendable)
//! ```
//!
//! ## Stale Sessions
//!
//! A session left open past the configured ceiling (crashed client,
//! lost device) is paid at most `rate * max_session_hours`; the periodic
//! sweep closes such sessions with the cap applied and the anomaly is
//! logged rather than silently paid in full.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::interval;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::AppConfig;
use crate::db::{MiningSessionRecord, TransactionRecord};
use crate::ledger::{BalanceDeltas, LedgerError, TxKind};
use crate::store::{LedgerCommit, LedgerStore, SessionStart, StoreError, WalletUpdate};
use crate::utils;

use super::{commit_error, completed_transaction, find_replay, idempotency_for, WalletLocks};

/// Batch size for the stale-session sweep.
const SWEEP_BATCH: i64 = 100;

/// Tokens accrued for an elapsed interval at a given rate.
///
/// `rate` is micro-CELF per hour; the computation widens to i128 so a
/// pathological rate × interval cannot overflow before the division.
fn accrued_micro(rate_per_hour: i64, elapsed_secs: i64) -> i64 {
    if rate_per_hour <= 0 || elapsed_secs <= 0 {
        return 0;
    }
    ((rate_per_hour as i128 * elapsed_secs as i128) / 3600) as i64
}

/// Result of stopping a mining session.
#[derive(Debug, Clone)]
pub struct MiningStopOutcome {
    /// Tokens credited (micro-CELF). Zero for an immediately-stopped
    /// session, in which case no ledger row is written.
    pub tokens_earned: i64,

    /// Whether the elapsed-time ceiling was applied.
    pub capped: bool,

    /// The `mining` ledger row, when anything was credited.
    pub transaction: Option<TransactionRecord>,

    /// True when an idempotency key matched an earlier stop.
    pub replayed: bool,
}

/// Server-authoritative view of an open session, for display.
#[derive(Debug, Clone)]
pub struct MiningStatus {
    /// The open session.
    pub session: MiningSessionRecord,

    /// What the session would pay if stopped now (ceiling applied).
    pub current_estimate: i64,

    /// Whether the estimate is already at the ceiling.
    pub at_ceiling: bool,
}

/// Mining session lifecycle and accrual calculator.
#[derive(Clone)]
pub struct MiningService {
    /// Ledger storage.
    store: Arc<dyn LedgerStore>,

    /// Per-wallet serialization.
    locks: WalletLocks,

    /// Application configuration.
    config: AppConfig,
}

impl MiningService {
    /// Create a new MiningService.
    pub fn new(store: Arc<dyn LedgerStore>, locks: WalletLocks, config: AppConfig) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    /// The session ceiling in seconds.
    fn cap_secs(&self) -> i64 {
        self.config.max_session_hours * 3600
    }

    /// Clamp a requested rate into `(0, max_mining_rate]`.
    fn clamp_rate(&self, requested: Option<i64>) -> Result<i64, LedgerError> {
        let rate = requested.unwrap_or(self.config.base_mining_rate);
        if rate <= 0 {
            return Err(LedgerError::InvalidAmount(rate));
        }
        if rate > self.config.max_mining_rate {
            warn!(
                "Requested mining rate {} clamped to {}",
                rate, self.config.max_mining_rate
            );
            return Ok(self.config.max_mining_rate);
        }
        Ok(rate)
    }

    // ==========================================
    // SESSION LIFECYCLE
    // ==========================================

    /// Open a mining session for the user.
    ///
    /// Fails with `AlreadyMining` if one is open. The at-most-one-open
    /// invariant is enforced by the store inside the insert itself, so
    /// two racing starts cannot both succeed.
    pub async fn start_mining(
        &self,
        user_id: &str,
        requested_rate: Option<i64>,
    ) -> Result<MiningSessionRecord, LedgerError> {
        let rate = self.clamp_rate(requested_rate)?;

        let _guard = self.locks.acquire(user_id).await?;

        let wallet = self
            .store
            .get_wallet(user_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))?;
        if wallet.is_locked {
            return Err(LedgerError::WalletLocked(user_id.to_string()));
        }

        let session = MiningSessionRecord {
            id: Uuid::new_v4(),
            user_id: user_id.to_string(),
            started_at: Utc::now(),
            completed_at: None,
            mining_rate: rate,
            tokens_earned: 0,
            capped: false,
        };

        match self.store.open_session(&session).await? {
            SessionStart::Started => {
                info!(
                    "Mining session {} opened for {} at {}/h",
                    session.id,
                    user_id,
                    utils::format_celf(rate)
                );
                Ok(session)
            }
            SessionStart::AlreadyOpen => Err(LedgerError::AlreadyMining),
        }
    }

    /// Stop the user's open session and credit the accrual.
    ///
    /// Elapsed time comes from the server clock, capped at the session
    /// ceiling. The credit lands in the non-sendable bucket: earned
    /// tokens must be exchanged before they can be sent.
    pub async fn stop_mining(
        &self,
        user_id: &str,
        idem_key: Option<&str>,
    ) -> Result<MiningStopOutcome, LedgerError> {
        let _guard = self.locks.acquire(user_id).await?;

        if let Some(original) = find_replay(&self.store, user_id, idem_key).await? {
            return Ok(MiningStopOutcome {
                tokens_earned: original.amount,
                capped: false,
                transaction: Some(original),
                replayed: true,
            });
        }

        let session = self
            .store
            .open_session_for(user_id)
            .await?
            .ok_or(LedgerError::NoActiveSession)?;

        let now = Utc::now();
        self.close_with_accrual(&session, now, idem_key).await
    }

    /// Close a session at `now`, computing and committing the accrual.
    ///
    /// Caller must hold the user's wallet lock.
    async fn close_with_accrual(
        &self,
        session: &MiningSessionRecord,
        now: DateTime<Utc>,
        idem_key: Option<&str>,
    ) -> Result<MiningStopOutcome, LedgerError> {
        let elapsed_secs = (now - session.started_at).num_seconds().max(0);
        let capped = elapsed_secs > self.cap_secs();
        let effective_secs = elapsed_secs.min(self.cap_secs());
        let earned = accrued_micro(session.mining_rate, effective_secs);

        if capped {
            warn!(
                "Mining session {} for {} ran {}s, past the {}h ceiling; paying capped accrual",
                session.id, session.user_id, elapsed_secs, self.config.max_session_hours
            );
        }

        if earned == 0 {
            // Too short to accrue anything: close the session without a
            // ledger row (amounts must be positive).
            self.store
                .close_session(session.id, 0, capped, now, LedgerCommit::default())
                .await
                .map_err(|e| match e {
                    StoreError::NotFound(_) => LedgerError::NoActiveSession,
                    other => commit_error(other),
                })?;
            debug!("Session {} closed with no accrual", session.id);
            return Ok(MiningStopOutcome {
                tokens_earned: 0,
                capped,
                transaction: None,
                replayed: false,
            });
        }

        let wallet = self
            .store
            .get_wallet(&session.user_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(session.user_id.clone()))?;
        if wallet.is_locked {
            // The session stays open; it can be stopped after an unlock
            // and the ceiling bounds what it will ever pay.
            return Err(LedgerError::WalletLocked(session.user_id.clone()));
        }

        let deltas = BalanceDeltas::credit_non_sendable(earned);
        let buckets = deltas.apply_to(&wallet)?;

        let tx = completed_transaction(
            TxKind::Mining,
            &wallet,
            earned,
            0,
            deltas,
            None,
            Some(session.id.to_string()),
            None,
            now,
        );

        let commit = LedgerCommit {
            transactions: vec![tx.clone()],
            wallet_updates: vec![WalletUpdate::from_applied(&wallet, buckets, now)],
            idempotency: idempotency_for(&session.user_id, idem_key, "stop_mining", tx.id, now),
        };

        self.store
            .close_session(session.id, earned, capped, now, commit)
            .await
            .map_err(|e| match e {
                StoreError::NotFound(_) => LedgerError::NoActiveSession,
                other => commit_error(other),
            })?;

        info!(
            "Mining session {} closed for {}: {} earned{}",
            session.id,
            session.user_id,
            utils::format_celf(earned),
            if capped { " (capped)" } else { "" }
        );

        Ok(MiningStopOutcome {
            tokens_earned: earned,
            capped,
            transaction: Some(tx),
            replayed: false,
        })
    }

    /// Server-authoritative status of the user's open session, if any.
    pub async fn mining_status(
        &self,
        user_id: &str,
    ) -> Result<Option<MiningStatus>, LedgerError> {
        let session = match self.store.open_session_for(user_id).await? {
            Some(session) => session,
            None => return Ok(None),
        };

        let elapsed_secs = (Utc::now() - session.started_at).num_seconds().max(0);
        let at_ceiling = elapsed_secs >= self.cap_secs();
        let effective_secs = elapsed_secs.min(self.cap_secs());
        let current_estimate = accrued_micro(session.mining_rate, effective_secs);

        Ok(Some(MiningStatus {
            session,
            current_estimate,
            at_ceiling,
        }))
    }

    // ==========================================
    // STALE SESSION SWEEP
    // ==========================================

    /// Close sessions that outlived the ceiling. Returns how many closed.
    pub async fn sweep_stale_sessions(&self) -> usize {
        let cutoff = Utc::now() - chrono::Duration::seconds(self.cap_secs());
        let mut closed = 0;

        let stale = match self.store.stale_open_sessions(cutoff, SWEEP_BATCH).await {
            Ok(stale) => stale,
            Err(e) => {
                warn!("Stale session scan failed: {}", e);
                return 0;
            }
        };

        for session in stale {
            let guard = match self.locks.acquire(&session.user_id).await {
                Ok(guard) => guard,
                Err(_) => continue, // busy wallet; next sweep gets it
            };

            // Re-check under the lock: the user may have stopped it.
            match self.store.open_session_for(&session.user_id).await {
                Ok(Some(open)) if open.id == session.id => {
                    match self.close_with_accrual(&open, Utc::now(), None).await {
                        Ok(outcome) => {
                            closed += 1;
                            info!(
                                "Swept stale session {} for {}: {} credited",
                                open.id,
                                open.user_id,
                                utils::format_celf(outcome.tokens_earned)
                            );
                        }
                        Err(e) => warn!("Failed to sweep session {}: {}", open.id, e),
                    }
                }
                Ok(_) => {}
                Err(e) => warn!("Sweep recheck failed for {}: {}", session.user_id, e),
            }

            drop(guard);
        }

        closed
    }

    /// Run the sweep on the configured interval. Spawn as a background
    /// task from `main`.
    pub async fn start_sweep_loop(&self) {
        info!(
            "Starting stale-session sweep (interval: {}s, ceiling: {}h)",
            self.config.session_sweep_interval, self.config.max_session_hours
        );

        let mut ticker = interval(Duration::from_secs(self.config.session_sweep_interval));
        loop {
            ticker.tick().await;
            let closed = self.sweep_stale_sessions().await;
            if closed > 0 {
                info!("Stale-session sweep closed {} session(s)", closed);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accrual_is_rate_times_hours() {
        // 1 CELF/h for 2 hours = 2 CELF.
        assert_eq!(accrued_micro(1_000_000, 7200), 2_000_000);
        // 2.5 CELF/h for 30 minutes = 1.25 CELF.
        assert_eq!(accrued_micro(2_500_000, 1800), 1_250_000);
    }

    #[test]
    fn test_accrual_rounds_down() {
        // 1 micro-CELF/h for 1 second accrues nothing.
        assert_eq!(accrued_micro(1, 1), 0);
        // 3599 seconds at 1 CELF/h is just under 1 CELF.
        assert_eq!(accrued_micro(1_000_000, 3599), 999_722);
    }

    #[test]
    fn test_accrual_ignores_nonpositive_inputs() {
        assert_eq!(accrued_micro(0, 3600), 0);
        assert_eq!(accrued_micro(-5, 3600), 0);
        assert_eq!(accrued_micro(1_000_000, -10), 0);
    }

    #[test]
    fn test_accrual_survives_huge_intervals() {
        // 30 days at max rate stays well inside i64 thanks to i128 math.
        let thirty_days = 30 * 24 * 3600;
        let earned = accrued_micro(10_000_000, thirty_days);
        assert_eq!(earned, 10_000_000 * 24 * 30);
    }
}
