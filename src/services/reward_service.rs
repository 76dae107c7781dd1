//! # Reward Service
//!
//! Referral and task bonuses. Both claim paths share the same contract
//! shape: the uniqueness guard (referral status flip, task claim row) is
//! checked by the store *inside* the same atomic operation that writes
//! the reward transaction, never as a separate pre-check, which would be
//! racy under a double-tapped claim button or a retried request.
//!
//! A claim that finds the guard already fired is not an error: it comes
//! back as [`ClaimResult::AlreadyClaimed`] and credits nothing.
//!
//! Bonus credits land in the non-sendable bucket, mirroring mining:
//! earned tokens must be exchanged before they can be sent.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::{referral_status, ReferralRecord, TaskClaimRecord, TransactionRecord};
use crate::ledger::{BalanceDeltas, LedgerError, TxKind};
use crate::store::{ClaimOutcome, LedgerCommit, LedgerStore, StoreError, WalletUpdate};
use crate::utils;

use super::{
    commit_error, completed_transaction, find_replay, idempotency_for, TaskCatalog, WalletLocks,
};

/// Outcome of a reward claim.
#[derive(Debug, Clone)]
pub enum ClaimResult {
    /// The reward was paid (or the idempotency key replayed the
    /// original payment).
    Claimed {
        /// The reward ledger row.
        transaction: TransactionRecord,
        /// True when an idempotency key matched an earlier claim.
        replayed: bool,
    },
    /// The reward for this pair was already paid; nothing was credited.
    AlreadyClaimed,
}

/// Referral and task reward processor.
#[derive(Clone)]
pub struct RewardService {
    /// Ledger storage.
    store: Arc<dyn LedgerStore>,

    /// Per-wallet serialization.
    locks: WalletLocks,

    /// Task eligibility collaborator.
    catalog: Arc<dyn TaskCatalog>,

    /// Application configuration.
    config: AppConfig,
}

impl RewardService {
    /// Create a new RewardService.
    pub fn new(
        store: Arc<dyn LedgerStore>,
        locks: WalletLocks,
        catalog: Arc<dyn TaskCatalog>,
        config: AppConfig,
    ) -> Self {
        Self {
            store,
            locks,
            catalog,
            config,
        }
    }

    // ==========================================
    // REFERRAL LIFECYCLE
    // ==========================================

    /// Record a pending referral (called at referee registration).
    ///
    /// Idempotent: an existing pair is returned as-is.
    pub async fn record_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
    ) -> Result<ReferralRecord, LedgerError> {
        if referrer_id.trim().is_empty() || referee_id.trim().is_empty() {
            return Err(LedgerError::InvalidUserId(format!(
                "{}/{}",
                referrer_id, referee_id
            )));
        }
        if referrer_id == referee_id {
            return Err(LedgerError::NotEligible(
                "a user cannot refer themselves".to_string(),
            ));
        }
        if self.store.get_wallet(referrer_id).await?.is_none() {
            return Err(LedgerError::WalletNotFound(referrer_id.to_string()));
        }

        let referral = ReferralRecord {
            referrer_id: referrer_id.to_string(),
            referee_id: referee_id.to_string(),
            status: referral_status::PENDING.to_string(),
            reward_amount: self.config.referral_reward,
            created_at: Utc::now(),
            completed_at: None,
            rewarded_at: None,
        };

        match self.store.insert_referral(&referral).await {
            Ok(()) => {
                info!("Referral recorded: {} -> {}", referrer_id, referee_id);
                Ok(referral)
            }
            Err(StoreError::Duplicate(_)) => {
                // Already recorded; hand back the existing row.
                self.store
                    .get_referral(referrer_id, referee_id)
                    .await?
                    .ok_or_else(|| {
                        LedgerError::Store(StoreError::NotFound(format!(
                            "referral {} -> {}",
                            referrer_id, referee_id
                        )))
                    })
            }
            Err(other) => Err(other.into()),
        }
    }

    /// Mark a referral completed (called when the referee qualifies).
    ///
    /// Idempotent: completing an already-completed or rewarded pair is a
    /// no-op success.
    pub async fn complete_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
    ) -> Result<ReferralRecord, LedgerError> {
        let moved = self
            .store
            .complete_referral(referrer_id, referee_id, Utc::now())
            .await?;

        let referral = self
            .store
            .get_referral(referrer_id, referee_id)
            .await?
            .ok_or_else(|| {
                LedgerError::NotEligible(format!(
                    "no referral recorded for {} -> {}",
                    referrer_id, referee_id
                ))
            })?;

        if moved {
            info!("Referral completed: {} -> {}", referrer_id, referee_id);
        }
        Ok(referral)
    }

    /// Pay the referral bonus to the referrer, at most once per pair.
    pub async fn claim_referral_reward(
        &self,
        referrer_id: &str,
        referee_id: &str,
        idem_key: Option<&str>,
    ) -> Result<ClaimResult, LedgerError> {
        let _guard = self.locks.acquire(referrer_id).await?;

        if let Some(original) = find_replay(&self.store, referrer_id, idem_key).await? {
            return Ok(ClaimResult::Claimed {
                transaction: original,
                replayed: true,
            });
        }

        // Read for eligibility messaging; the authoritative check is the
        // status flip inside the store commit below.
        let referral = self
            .store
            .get_referral(referrer_id, referee_id)
            .await?
            .ok_or_else(|| {
                LedgerError::NotEligible(format!(
                    "no referral recorded for {} -> {}",
                    referrer_id, referee_id
                ))
            })?;

        match referral.status.as_str() {
            referral_status::COMPLETED => {}
            referral_status::REWARDED => return Ok(ClaimResult::AlreadyClaimed),
            _ => {
                return Err(LedgerError::NotEligible(format!(
                    "referral {} -> {} has not completed",
                    referrer_id, referee_id
                )))
            }
        }

        let wallet = self
            .store
            .get_wallet(referrer_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(referrer_id.to_string()))?;
        if wallet.is_locked {
            return Err(LedgerError::WalletLocked(referrer_id.to_string()));
        }

        let deltas = BalanceDeltas::credit_non_sendable(referral.reward_amount);
        let buckets = deltas.apply_to(&wallet)?;

        let now = Utc::now();
        let tx = completed_transaction(
            TxKind::Referral,
            &wallet,
            referral.reward_amount,
            0,
            deltas,
            Some(referee_id.to_string()),
            Some(format!("referral:{}", referee_id)),
            None,
            now,
        );

        let commit = LedgerCommit {
            transactions: vec![tx.clone()],
            wallet_updates: vec![WalletUpdate::from_applied(&wallet, buckets, now)],
            idempotency: idempotency_for(referrer_id, idem_key, "claim_referral", tx.id, now),
        };

        match self
            .store
            .reward_referral(referrer_id, referee_id, now, commit)
            .await
        {
            Ok(ClaimOutcome::Created) => {
                info!(
                    "Referral reward paid to {}: {} (referee {})",
                    referrer_id,
                    utils::format_celf(referral.reward_amount),
                    referee_id
                );
                Ok(ClaimResult::Claimed {
                    transaction: tx,
                    replayed: false,
                })
            }
            Ok(ClaimOutcome::AlreadyClaimed) => Ok(ClaimResult::AlreadyClaimed),
            Err(StoreError::NotFound(what)) => {
                // The pair changed state between the read and the flip.
                warn!("Referral claim lost a state race: {}", what);
                Err(LedgerError::NotEligible(what))
            }
            Err(other) => Err(commit_error(other)),
        }
    }

    // ==========================================
    // TASK REWARDS
    // ==========================================

    /// Pay a task completion bonus, at most once per `(user, task)`.
    ///
    /// Eligibility (the task exists and is completed) comes from the
    /// task catalog collaborator; the ledger only guarantees the payout
    /// happens once.
    pub async fn claim_task_reward(
        &self,
        user_id: &str,
        task_id: &str,
        idem_key: Option<&str>,
    ) -> Result<ClaimResult, LedgerError> {
        let reward = self
            .catalog
            .completed_task_reward(user_id, task_id)
            .await?
            .ok_or_else(|| {
                LedgerError::NotEligible(format!("task {} is not completed or unknown", task_id))
            })?;

        let _guard = self.locks.acquire(user_id).await?;

        if let Some(original) = find_replay(&self.store, user_id, idem_key).await? {
            return Ok(ClaimResult::Claimed {
                transaction: original,
                replayed: true,
            });
        }

        let wallet = self
            .store
            .get_wallet(user_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))?;
        if wallet.is_locked {
            return Err(LedgerError::WalletLocked(user_id.to_string()));
        }

        let deltas = BalanceDeltas::credit_non_sendable(reward);
        let buckets = deltas.apply_to(&wallet)?;

        let now = Utc::now();
        let tx = completed_transaction(
            TxKind::TaskReward,
            &wallet,
            reward,
            0,
            deltas,
            None,
            Some(format!("task:{}", task_id)),
            None,
            now,
        );

        let claim = TaskClaimRecord {
            user_id: user_id.to_string(),
            task_id: task_id.to_string(),
            reward_amount: reward,
            transaction_id: tx.id,
            claimed_at: now,
        };

        let commit = LedgerCommit {
            transactions: vec![tx.clone()],
            wallet_updates: vec![WalletUpdate::from_applied(&wallet, buckets, now)],
            idempotency: idempotency_for(user_id, idem_key, "claim_task", tx.id, now),
        };

        match self.store.insert_task_claim(&claim, commit).await {
            Ok(ClaimOutcome::Created) => {
                info!(
                    "Task reward paid to {}: {} (task {})",
                    user_id,
                    utils::format_celf(reward),
                    task_id
                );
                Ok(ClaimResult::Claimed {
                    transaction: tx,
                    replayed: false,
                })
            }
            Ok(ClaimOutcome::AlreadyClaimed) => Ok(ClaimResult::AlreadyClaimed),
            Err(other) => Err(commit_error(other)),
        }
    }
}
