//! # In-Memory Store
//!
//! [`LedgerStore`] backend over in-process maps, guarded by a single
//! async mutex. Used for local development (`STORAGE_MODE=memory`) and as
//! the substrate for the integration tests, where it gives the same
//! atomicity guarantees as the SQL backend: every trait method mutates
//! state under one mutex acquisition, so a commit is all-or-nothing and a
//! guard check shares its atomic scope with the payout it protects.

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::db::{
    referral_status, IdempotencyRecord, MiningSessionRecord, ReconciliationLog, ReferralRecord,
    TaskClaimRecord, TransactionRecord, WalletRecord,
};

use super::{
    ClaimOutcome, LedgerCommit, LedgerStore, LedgerSums, NetworkTotals, SessionStart, StoreError,
};

/// Everything the store knows, in one place so a single lock covers it.
#[derive(Default)]
struct MemState {
    /// Wallets by user id.
    wallets: HashMap<String, WalletRecord>,
    /// user id by receive address.
    addresses: HashMap<String, String>,
    /// The ledger, in append order.
    transactions: Vec<TransactionRecord>,
    /// Mining sessions by id.
    sessions: HashMap<Uuid, MiningSessionRecord>,
    /// Referrals by (referrer, referee).
    referrals: HashMap<(String, String), ReferralRecord>,
    /// Task claims by (user, task).
    task_claims: HashMap<(String, String), TaskClaimRecord>,
    /// Reconciliation audit trail.
    reconciliation_logs: Vec<ReconciliationLog>,
    /// Idempotency keys by (user, key).
    idempotency: HashMap<(String, String), IdempotencyRecord>,
}

impl MemState {
    /// Apply a commit, or leave the state untouched.
    ///
    /// Wallet updates are validated first (version check against the
    /// caller's read) so nothing is applied when any part would fail.
    fn apply_commit(&mut self, commit: &LedgerCommit) -> Result<(), StoreError> {
        for update in &commit.wallet_updates {
            let wallet = self
                .wallets
                .get(&update.user_id)
                .ok_or_else(|| StoreError::NotFound(format!("wallet {}", update.user_id)))?;
            if wallet.version != update.expected_version {
                return Err(StoreError::VersionConflict(update.user_id.clone()));
            }
        }

        for update in &commit.wallet_updates {
            // Presence checked above; the map is unchanged in between.
            if let Some(wallet) = self.wallets.get_mut(&update.user_id) {
                wallet.sendable_balance = update.sendable_balance;
                wallet.non_sendable_balance = update.non_sendable_balance;
                wallet.pending_balance = update.pending_balance;
                wallet.total_balance = update.total_balance;
                wallet.version += 1;
                wallet.last_activity = update.last_activity;
                wallet.updated_at = update.last_activity;
            }
        }

        self.transactions.extend(commit.transactions.iter().cloned());

        if let Some(idem) = &commit.idempotency {
            self.idempotency
                .entry((idem.user_id.clone(), idem.idem_key.clone()))
                .or_insert_with(|| idem.clone());
        }

        Ok(())
    }
}

/// In-memory ledger store.
#[derive(Clone, Default)]
pub struct MemStore {
    state: std::sync::Arc<Mutex<MemState>>,
}

impl MemStore {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for MemStore {
    async fn ping(&self) -> Result<(), StoreError> {
        Ok(())
    }

    // ==========================================
    // WALLETS
    // ==========================================

    async fn insert_wallet(&self, wallet: &WalletRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if state.wallets.contains_key(&wallet.user_id) {
            return Err(StoreError::Duplicate(format!(
                "wallet for user {}",
                wallet.user_id
            )));
        }
        state
            .addresses
            .insert(wallet.current_address.clone(), wallet.user_id.clone());
        state.wallets.insert(wallet.user_id.clone(), wallet.clone());
        Ok(())
    }

    async fn get_wallet(&self, user_id: &str) -> Result<Option<WalletRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.wallets.get(user_id).cloned())
    }

    async fn get_wallet_by_address(
        &self,
        address: &str,
    ) -> Result<Option<WalletRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .addresses
            .get(address)
            .and_then(|user_id| state.wallets.get(user_id))
            .cloned())
    }

    async fn list_wallets(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut wallets: Vec<WalletRecord> = state.wallets.values().cloned().collect();
        wallets.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(wallets
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn set_wallet_locked(&self, user_id: &str, locked: bool) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let wallet = state
            .wallets
            .get_mut(user_id)
            .ok_or_else(|| StoreError::NotFound(format!("wallet {}", user_id)))?;
        wallet.is_locked = locked;
        wallet.updated_at = Utc::now();
        Ok(())
    }

    // ==========================================
    // LEDGER COMMITS
    // ==========================================

    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.apply_commit(&commit)
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<TransactionRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.transactions.iter().find(|t| t.id == id).cloned())
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<TransactionRecord> = state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(rows
            .into_iter()
            .skip(offset.max(0) as usize)
            .take(limit.max(0) as usize)
            .collect())
    }

    async fn count_transactions(&self, user_id: &str) -> Result<i64, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id)
            .count() as i64)
    }

    async fn ledger_sums(&self, user_id: &str) -> Result<LedgerSums, StoreError> {
        let state = self.state.lock().await;
        let mut sums = LedgerSums::default();
        for tx in state
            .transactions
            .iter()
            .filter(|t| t.user_id == user_id && t.status == "completed")
        {
            sums.sendable += tx.sendable_delta;
            sums.non_sendable += tx.non_sendable_delta;
            sums.pending += tx.pending_delta;
        }
        Ok(sums)
    }

    // ==========================================
    // MINING SESSIONS
    // ==========================================

    async fn open_session(
        &self,
        session: &MiningSessionRecord,
    ) -> Result<SessionStart, StoreError> {
        let mut state = self.state.lock().await;
        let open_exists = state
            .sessions
            .values()
            .any(|s| s.user_id == session.user_id && s.completed_at.is_none());
        if open_exists {
            return Ok(SessionStart::AlreadyOpen);
        }
        state.sessions.insert(session.id, session.clone());
        Ok(SessionStart::Started)
    }

    async fn open_session_for(
        &self,
        user_id: &str,
    ) -> Result<Option<MiningSessionRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .sessions
            .values()
            .find(|s| s.user_id == user_id && s.completed_at.is_none())
            .cloned())
    }

    async fn stale_open_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MiningSessionRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut stale: Vec<MiningSessionRecord> = state
            .sessions
            .values()
            .filter(|s| s.completed_at.is_none() && s.started_at < cutoff)
            .cloned()
            .collect();
        stale.sort_by(|a, b| a.started_at.cmp(&b.started_at));
        stale.truncate(limit.max(0) as usize);
        Ok(stale)
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        tokens_earned: i64,
        capped: bool,
        completed_at: DateTime<Utc>,
        commit: LedgerCommit,
    ) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;

        let open = state
            .sessions
            .get(&session_id)
            .map(|s| s.completed_at.is_none())
            .unwrap_or(false);
        if !open {
            return Err(StoreError::NotFound(format!(
                "open mining session {}",
                session_id
            )));
        }

        // Validate the commit before touching the session row.
        state.apply_commit(&commit)?;

        if let Some(session) = state.sessions.get_mut(&session_id) {
            session.completed_at = Some(completed_at);
            session.tokens_earned = tokens_earned;
            session.capped = capped;
        }
        Ok(())
    }

    // ==========================================
    // REFERRALS
    // ==========================================

    async fn insert_referral(&self, referral: &ReferralRecord) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let key = (referral.referrer_id.clone(), referral.referee_id.clone());
        if state.referrals.contains_key(&key) {
            return Err(StoreError::Duplicate(format!(
                "referral {} -> {}",
                referral.referrer_id, referral.referee_id
            )));
        }
        state.referrals.insert(key, referral.clone());
        Ok(())
    }

    async fn get_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
    ) -> Result<Option<ReferralRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .referrals
            .get(&(referrer_id.to_string(), referee_id.to_string()))
            .cloned())
    }

    async fn complete_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let referral = state
            .referrals
            .get_mut(&(referrer_id.to_string(), referee_id.to_string()));
        match referral {
            Some(r) if r.status == referral_status::PENDING => {
                r.status = referral_status::COMPLETED.to_string();
                r.completed_at = Some(at);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn reward_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
        at: DateTime<Utc>,
        commit: LedgerCommit,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let key = (referrer_id.to_string(), referee_id.to_string());

        match state.referrals.get(&key).map(|r| r.status.clone()) {
            Some(status) if status == referral_status::COMPLETED => {}
            Some(status) if status == referral_status::REWARDED => {
                return Ok(ClaimOutcome::AlreadyClaimed);
            }
            Some(status) => {
                return Err(StoreError::NotFound(format!(
                    "completed referral {} -> {} (status: {})",
                    referrer_id, referee_id, status
                )));
            }
            None => {
                return Err(StoreError::NotFound(format!(
                    "referral {} -> {}",
                    referrer_id, referee_id
                )));
            }
        }

        state.apply_commit(&commit)?;

        if let Some(r) = state.referrals.get_mut(&key) {
            r.status = referral_status::REWARDED.to_string();
            r.rewarded_at = Some(at);
        }
        Ok(ClaimOutcome::Created)
    }

    // ==========================================
    // TASK CLAIMS
    // ==========================================

    async fn insert_task_claim(
        &self,
        claim: &TaskClaimRecord,
        commit: LedgerCommit,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut state = self.state.lock().await;
        let key = (claim.user_id.clone(), claim.task_id.clone());

        if state.task_claims.contains_key(&key) {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        state.apply_commit(&commit)?;
        state.task_claims.insert(key, claim.clone());
        Ok(ClaimOutcome::Created)
    }

    // ==========================================
    // AUDIT
    // ==========================================

    async fn insert_reconciliation_log(&self, log: &ReconciliationLog) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        state.reconciliation_logs.push(log.clone());
        Ok(())
    }

    async fn get_idempotency(
        &self,
        user_id: &str,
        idem_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .idempotency
            .get(&(user_id.to_string(), idem_key.to_string()))
            .cloned())
    }

    async fn network_totals(&self) -> Result<NetworkTotals, StoreError> {
        let state = self.state.lock().await;
        let mut totals = NetworkTotals::default();
        for wallet in state.wallets.values() {
            totals.total_sendable += wallet.sendable_balance;
            totals.total_non_sendable += wallet.non_sendable_balance;
            totals.total_pending += wallet.pending_balance;
            totals.wallet_count += 1;
        }
        Ok(totals)
    }
}
