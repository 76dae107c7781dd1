//! # PostgreSQL Store
//!
//! Production [`LedgerStore`] backend. Reads run on pooled clients; every
//! [`LedgerCommit`] runs inside one SQL transaction so the ledger rows,
//! the versioned wallet updates and the idempotency record land together
//! or not at all. Guard-plus-payout methods (`close_session`,
//! `reward_referral`, `insert_task_claim`) execute the guard statement
//! inside the same transaction as the commit: if the guard touches zero
//! rows, the transaction is dropped and nothing is paid.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};
use uuid::Uuid;

use crate::db::{
    queries, Database, IdempotencyRecord, MiningSessionRecord, ReconciliationLog, ReferralRecord,
    TaskClaimRecord, TransactionRecord, WalletRecord,
};

use super::{
    ClaimOutcome, LedgerCommit, LedgerStore, LedgerSums, NetworkTotals, SessionStart, StoreError,
};

/// PostgreSQL-backed ledger store.
#[derive(Clone)]
pub struct PgStore {
    /// Database pool wrapper.
    db: Database,
}

impl PgStore {
    /// Wrap an already-connected [`Database`].
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    /// Check out a pooled connection.
    async fn conn(&self) -> Result<deadpool_postgres::Object, StoreError> {
        self.db
            .pool()
            .get()
            .await
            .map_err(|e| StoreError::Database(e.to_string()))
    }
}

/// Apply a [`LedgerCommit`] on an open SQL transaction.
///
/// A zero-row wallet update means the expected version lost a race; the
/// whole transaction is abandoned.
async fn apply_commit(
    tx: &tokio_postgres::Transaction<'_>,
    commit: &LedgerCommit,
) -> Result<(), StoreError> {
    for update in &commit.wallet_updates {
        let rows = queries::wallet_apply_update(
            tx,
            &update.user_id,
            update.expected_version,
            update.sendable_balance,
            update.non_sendable_balance,
            update.pending_balance,
            update.total_balance,
            update.last_activity,
        )
        .await?;

        if rows == 0 {
            warn!(
                "Wallet {} moved past version {} during commit; aborting",
                update.user_id, update.expected_version
            );
            return Err(StoreError::VersionConflict(update.user_id.clone()));
        }
    }

    for record in &commit.transactions {
        queries::transaction_insert(tx, record).await?;
    }

    if let Some(idem) = &commit.idempotency {
        queries::idempotency_insert(tx, idem).await?;
    }

    Ok(())
}

#[async_trait]
impl LedgerStore for PgStore {
    async fn ping(&self) -> Result<(), StoreError> {
        let client = self.conn().await?;
        client.query("SELECT 1", &[]).await?;
        Ok(())
    }

    // ==========================================
    // WALLETS
    // ==========================================

    async fn insert_wallet(&self, wallet: &WalletRecord) -> Result<(), StoreError> {
        let client = self.conn().await?;
        if queries::wallet_insert(&**client, wallet).await? {
            Ok(())
        } else {
            Err(StoreError::Duplicate(format!(
                "wallet for user {}",
                wallet.user_id
            )))
        }
    }

    async fn get_wallet(&self, user_id: &str) -> Result<Option<WalletRecord>, StoreError> {
        let client = self.conn().await?;
        Ok(queries::wallet_get(&**client, user_id).await?)
    }

    async fn get_wallet_by_address(
        &self,
        address: &str,
    ) -> Result<Option<WalletRecord>, StoreError> {
        let client = self.conn().await?;
        Ok(queries::wallet_get_by_address(&**client, address).await?)
    }

    async fn list_wallets(
        &self,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<WalletRecord>, StoreError> {
        let client = self.conn().await?;
        Ok(queries::wallet_list(&**client, limit, offset).await?)
    }

    async fn set_wallet_locked(&self, user_id: &str, locked: bool) -> Result<(), StoreError> {
        let client = self.conn().await?;
        let rows = queries::wallet_set_locked(&**client, user_id, locked).await?;
        if rows == 0 {
            return Err(StoreError::NotFound(format!("wallet {}", user_id)));
        }
        Ok(())
    }

    // ==========================================
    // LEDGER COMMITS
    // ==========================================

    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError> {
        let mut client = self.conn().await?;
        let tx = client.transaction().await?;

        apply_commit(&*tx, &commit).await?;

        tx.commit().await?;
        debug!(
            "Committed {} ledger row(s) across {} wallet(s)",
            commit.transactions.len(),
            commit.wallet_updates.len()
        );
        Ok(())
    }

    async fn get_transaction(&self, id: Uuid) -> Result<Option<TransactionRecord>, StoreError> {
        let client = self.conn().await?;
        Ok(queries::transaction_get(&**client, id).await?)
    }

    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, StoreError> {
        let client = self.conn().await?;
        Ok(queries::transaction_list(&**client, user_id, limit, offset).await?)
    }

    async fn count_transactions(&self, user_id: &str) -> Result<i64, StoreError> {
        let client = self.conn().await?;
        Ok(queries::transaction_count(&**client, user_id).await?)
    }

    async fn ledger_sums(&self, user_id: &str) -> Result<LedgerSums, StoreError> {
        let client = self.conn().await?;
        let (sendable, non_sendable, pending) =
            queries::transaction_ledger_sums(&**client, user_id).await?;
        Ok(LedgerSums {
            sendable,
            non_sendable,
            pending,
        })
    }

    // ==========================================
    // MINING SESSIONS
    // ==========================================

    async fn open_session(
        &self,
        session: &MiningSessionRecord,
    ) -> Result<SessionStart, StoreError> {
        let client = self.conn().await?;
        if queries::session_insert(&**client, session).await? {
            Ok(SessionStart::Started)
        } else {
            Ok(SessionStart::AlreadyOpen)
        }
    }

    async fn open_session_for(
        &self,
        user_id: &str,
    ) -> Result<Option<MiningSessionRecord>, StoreError> {
        let client = self.conn().await?;
        Ok(queries::session_get_open(&**client, user_id).await?)
    }

    async fn stale_open_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MiningSessionRecord>, StoreError> {
        let client = self.conn().await?;
        Ok(queries::session_list_stale(&**client, cutoff, limit).await?)
    }

    async fn close_session(
        &self,
        session_id: Uuid,
        tokens_earned: i64,
        capped: bool,
        completed_at: DateTime<Utc>,
        commit: LedgerCommit,
    ) -> Result<(), StoreError> {
        let mut client = self.conn().await?;
        let tx = client.transaction().await?;

        let rows =
            queries::session_close(&*tx, session_id, tokens_earned, capped, completed_at).await?;
        if rows == 0 {
            // Already closed by a concurrent stop or the sweep.
            return Err(StoreError::NotFound(format!(
                "open mining session {}",
                session_id
            )));
        }

        apply_commit(&*tx, &commit).await?;
        tx.commit().await?;
        Ok(())
    }

    // ==========================================
    // REFERRALS
    // ==========================================

    async fn insert_referral(&self, referral: &ReferralRecord) -> Result<(), StoreError> {
        let client = self.conn().await?;
        if queries::referral_insert(&**client, referral).await? {
            Ok(())
        } else {
            Err(StoreError::Duplicate(format!(
                "referral {} -> {}",
                referral.referrer_id, referral.referee_id
            )))
        }
    }

    async fn get_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
    ) -> Result<Option<ReferralRecord>, StoreError> {
        let client = self.conn().await?;
        Ok(queries::referral_get(&**client, referrer_id, referee_id).await?)
    }

    async fn complete_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let client = self.conn().await?;
        let rows = queries::referral_complete(&**client, referrer_id, referee_id, at).await?;
        Ok(rows == 1)
    }

    async fn reward_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
        at: DateTime<Utc>,
        commit: LedgerCommit,
    ) -> Result<ClaimOutcome, StoreError> {
        let mut client = self.conn().await?;
        let tx = client.transaction().await?;

        let rows = queries::referral_mark_rewarded(&*tx, referrer_id, referee_id, at).await?;
        if rows == 0 {
            // The flip found nothing in `completed`: distinguish a replay
            // from a state the caller should not have reached.
            let referral = queries::referral_get(&*tx, referrer_id, referee_id).await?;
            return match referral {
                Some(r) if r.status == crate::db::referral_status::REWARDED => {
                    Ok(ClaimOutcome::AlreadyClaimed)
                }
                Some(r) => Err(StoreError::NotFound(format!(
                    "completed referral {} -> {} (status: {})",
                    referrer_id, referee_id, r.status
                ))),
                None => Err(StoreError::NotFound(format!(
                    "referral {} -> {}",
                    referrer_id, referee_id
                ))),
            };
        }

        apply_commit(&*tx, &commit).await?;
        tx.commit().await?;
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
        let mut client = self.conn().await?;
        let tx = client.transaction().await?;

        if !queries::task_claim_insert(&*tx, claim).await? {
            return Ok(ClaimOutcome::AlreadyClaimed);
        }

        apply_commit(&*tx, &commit).await?;
        tx.commit().await?;
        Ok(ClaimOutcome::Created)
    }

    // ==========================================
    // AUDIT
    // ==========================================

    async fn insert_reconciliation_log(&self, log: &ReconciliationLog) -> Result<(), StoreError> {
        let client = self.conn().await?;
        Ok(queries::reconciliation_insert(&**client, log).await?)
    }

    async fn get_idempotency(
        &self,
        user_id: &str,
        idem_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError> {
        let client = self.conn().await?;
        Ok(queries::idempotency_get(&**client, user_id, idem_key).await?)
    }

    async fn network_totals(&self) -> Result<NetworkTotals, StoreError> {
        let client = self.conn().await?;
        let (total_sendable, total_non_sendable, total_pending, wallet_count) =
            queries::network_totals(&**client).await?;
        Ok(NetworkTotals {
            total_sendable,
            total_non_sendable,
            total_pending,
            wallet_count,
        })
    }
}
