//! # Wallet Service
//!
//! The WalletService owns the wallet lifecycle and the two peer-visible
//! balance operations: transfers and exchanges.
//!
//! ## Flow Example: Transfer
//!
//! ```text
//! 1. Validate amount, resolve destination address → wallet
//!                ↓
//! 2. Acquire both wallet locks (fixed global order)
//!                ↓
//! 3. Idempotency check (replay → original transaction)
//!                ↓
//! 4. Read both wallets fresh, validate freeze flags + funds
//!                ↓
//! 5. Build `send` + `receive` rows and both bucket updates
//!                ↓
//! 6. One atomic store commit: both rows or neither
//! ```
//!
//! The check-then-debit sequence runs entirely under the sender's lock,
//! so two racing transfers cannot both pass the balance check against a
//! stale read.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::AppConfig;
use crate::db::{ReferralRecord, TransactionRecord, WalletRecord};
use crate::ledger::{validate_amount, BalanceDeltas, LedgerError, TxKind};
use crate::store::{LedgerCommit, LedgerStore, StoreError, WalletUpdate};
use crate::utils;

use super::{
    commit_error, completed_transaction, find_replay, idempotency_for, CommittedOp, WalletLocks,
};

/// Upper bound on a caller-supplied user id.
const MAX_USER_ID_LEN: usize = 128;

/// Default and maximum page sizes for transaction history.
const DEFAULT_PAGE_SIZE: i64 = 20;
const MAX_PAGE_SIZE: i64 = 100;

/// Wallet lifecycle and transfer/exchange processor.
#[derive(Clone)]
pub struct WalletService {
    /// Ledger storage.
    store: Arc<dyn LedgerStore>,

    /// Per-wallet serialization.
    locks: WalletLocks,

    /// Application configuration.
    config: AppConfig,
}

impl WalletService {
    /// Create a new WalletService.
    pub fn new(store: Arc<dyn LedgerStore>, locks: WalletLocks, config: AppConfig) -> Self {
        Self {
            store,
            locks,
            config,
        }
    }

    /// Validate a caller-supplied user id.
    fn check_user_id(user_id: &str) -> Result<(), LedgerError> {
        if user_id.trim().is_empty() || user_id.len() > MAX_USER_ID_LEN {
            return Err(LedgerError::InvalidUserId(user_id.to_string()));
        }
        Ok(())
    }

    // ==========================================
    // WALLET LIFECYCLE
    // ==========================================

    /// Create the wallet for a newly registered user.
    ///
    /// Optionally records a pending referral naming the referrer; the
    /// referral pays out later, after the referee qualifies and the
    /// referrer claims it.
    pub async fn create_wallet(
        &self,
        user_id: &str,
        referrer_id: Option<&str>,
    ) -> Result<WalletRecord, LedgerError> {
        Self::check_user_id(user_id)?;

        let now = Utc::now();
        let wallet = WalletRecord {
            user_id: user_id.to_string(),
            sendable_balance: 0,
            non_sendable_balance: 0,
            pending_balance: 0,
            total_balance: 0,
            current_address: utils::new_address(),
            is_locked: false,
            version: 0,
            last_activity: now,
            created_at: now,
            updated_at: now,
        };

        match self.store.insert_wallet(&wallet).await {
            Ok(()) => {}
            Err(StoreError::Duplicate(_)) => {
                return Err(LedgerError::WalletExists(user_id.to_string()))
            }
            Err(other) => return Err(other.into()),
        }

        info!("Wallet created for user {}", user_id);

        // Record the referral, if any. Registration succeeds either way.
        if let Some(referrer) = referrer_id.filter(|r| !r.trim().is_empty()) {
            if referrer == user_id {
                warn!("User {} tried to refer themselves; ignoring", user_id);
            } else if self.store.get_wallet(referrer).await?.is_none() {
                warn!(
                    "Referrer {} has no wallet; skipping referral for {}",
                    referrer, user_id
                );
            } else {
                let referral = ReferralRecord {
                    referrer_id: referrer.to_string(),
                    referee_id: user_id.to_string(),
                    status: crate::db::referral_status::PENDING.to_string(),
                    reward_amount: self.config.referral_reward,
                    created_at: now,
                    completed_at: None,
                    rewarded_at: None,
                };
                match self.store.insert_referral(&referral).await {
                    Ok(()) => info!("Referral recorded: {} -> {}", referrer, user_id),
                    Err(StoreError::Duplicate(_)) => {}
                    Err(other) => return Err(other.into()),
                }
            }
        }

        Ok(wallet)
    }

    /// Current balance snapshot for a user.
    pub async fn get_balance(&self, user_id: &str) -> Result<WalletRecord, LedgerError> {
        self.store
            .get_wallet(user_id)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(user_id.to_string()))
    }

    /// Set or clear the admin freeze flag on a wallet.
    pub async fn set_wallet_locked(
        &self,
        user_id: &str,
        locked: bool,
    ) -> Result<(), LedgerError> {
        match self.store.set_wallet_locked(user_id, locked).await {
            Ok(()) => {
                info!(
                    "Wallet {} {}",
                    user_id,
                    if locked { "frozen" } else { "unfrozen" }
                );
                Ok(())
            }
            Err(StoreError::NotFound(_)) => Err(LedgerError::WalletNotFound(user_id.to_string())),
            Err(other) => Err(other.into()),
        }
    }

    // ==========================================
    // DESTINATION RESOLUTION
    // ==========================================

    /// Resolve a transfer destination (a receive address or a bare user
    /// id) to the owning wallet.
    async fn resolve_destination(&self, destination: &str) -> Result<WalletRecord, LedgerError> {
        if destination.starts_with(utils::ADDRESS_PREFIX) {
            utils::validate_address(destination)
                .map_err(|_| LedgerError::MalformedAddress(destination.to_string()))?;
            return self
                .store
                .get_wallet_by_address(destination)
                .await?
                .ok_or_else(|| LedgerError::WalletNotFound(destination.to_string()));
        }

        Self::check_user_id(destination)?;
        self.store
            .get_wallet(destination)
            .await?
            .ok_or_else(|| LedgerError::WalletNotFound(destination.to_string()))
    }

    // ==========================================
    // TRANSFERS
    // ==========================================

    /// Send CELF to another user.
    ///
    /// Appends exactly two ledger rows, the sender's `send` debit and
    /// the recipient's `receive` credit, in one atomic commit. The flat
    /// configured fee is debited from the sender on top of `amount`.
    pub async fn transfer(
        &self,
        from_user_id: &str,
        destination: &str,
        amount: i64,
        memo: Option<String>,
        idem_key: Option<&str>,
    ) -> Result<CommittedOp, LedgerError> {
        Self::check_user_id(from_user_id)?;
        validate_amount(amount)?;

        let to_user_id = self.resolve_destination(destination).await?.user_id;
        if to_user_id == from_user_id {
            return Err(LedgerError::SelfTransfer);
        }

        // Both locks, fixed global order; held until the commit returns.
        let _guards = self.locks.acquire_pair(from_user_id, &to_user_id).await?;

        if let Some(original) = find_replay(&self.store, from_user_id, idem_key).await? {
            info!(
                "Transfer replayed for {} (idempotency key hit): {}",
                from_user_id, original.id
            );
            return Ok(CommittedOp {
                transaction: original,
                replayed: true,
            });
        }

        // Fresh reads under the locks.
        let from_wallet = self.get_balance(from_user_id).await?;
        let to_wallet = self.get_balance(&to_user_id).await?;

        if from_wallet.is_locked {
            return Err(LedgerError::WalletLocked(from_user_id.to_string()));
        }
        if to_wallet.is_locked {
            return Err(LedgerError::WalletLocked(to_user_id.clone()));
        }

        let fee = self.config.transfer_fee;
        let debit_total = amount
            .checked_add(fee)
            .ok_or(LedgerError::InvalidAmount(amount))?;

        let debit = BalanceDeltas::debit_sendable(debit_total);
        let credit = BalanceDeltas::credit_sendable(amount);
        let from_buckets = debit.apply_to(&from_wallet)?;
        let to_buckets = credit.apply_to(&to_wallet)?;

        let now = Utc::now();
        let send_tx = completed_transaction(
            TxKind::Send,
            &from_wallet,
            amount,
            fee,
            debit,
            Some(to_user_id.clone()),
            None,
            memo.clone(),
            now,
        );
        let receive_tx = completed_transaction(
            TxKind::Receive,
            &to_wallet,
            amount,
            0,
            credit,
            Some(from_user_id.to_string()),
            Some(send_tx.id.to_string()),
            memo,
            now,
        );

        let commit = LedgerCommit {
            transactions: vec![send_tx.clone(), receive_tx],
            wallet_updates: vec![
                WalletUpdate::from_applied(&from_wallet, from_buckets, now),
                WalletUpdate::from_applied(&to_wallet, to_buckets, now),
            ],
            idempotency: idempotency_for(from_user_id, idem_key, "transfer", send_tx.id, now),
        };

        self.store.commit(commit).await.map_err(commit_error)?;

        info!(
            "Transfer committed: {} -> {} {}",
            from_user_id,
            to_user_id,
            utils::format_celf(amount)
        );

        Ok(CommittedOp {
            transaction: send_tx,
            replayed: false,
        })
    }

    // ==========================================
    // EXCHANGE
    // ==========================================

    /// Convert earned (non-sendable) balance into sendable balance.
    ///
    /// One-directional. A single `exchange` ledger row carries both
    /// bucket deltas, so there is never an observable instant where the
    /// tokens sit in neither bucket.
    pub async fn exchange(
        &self,
        user_id: &str,
        amount: i64,
        idem_key: Option<&str>,
    ) -> Result<CommittedOp, LedgerError> {
        Self::check_user_id(user_id)?;
        validate_amount(amount)?;

        let _guard = self.locks.acquire(user_id).await?;

        if let Some(original) = find_replay(&self.store, user_id, idem_key).await? {
            return Ok(CommittedOp {
                transaction: original,
                replayed: true,
            });
        }

        let wallet = self.get_balance(user_id).await?;
        if wallet.is_locked {
            return Err(LedgerError::WalletLocked(user_id.to_string()));
        }

        let deltas = BalanceDeltas::exchange(amount);
        let buckets = deltas.apply_to(&wallet)?;

        let now = Utc::now();
        let tx = completed_transaction(
            TxKind::Exchange,
            &wallet,
            amount,
            0,
            deltas,
            None,
            None,
            None,
            now,
        );

        let commit = LedgerCommit {
            transactions: vec![tx.clone()],
            wallet_updates: vec![WalletUpdate::from_applied(&wallet, buckets, now)],
            idempotency: idempotency_for(user_id, idem_key, "exchange", tx.id, now),
        };

        self.store.commit(commit).await.map_err(commit_error)?;

        info!(
            "Exchange committed for {}: {} unlocked",
            user_id,
            utils::format_celf(amount)
        );

        Ok(CommittedOp {
            transaction: tx,
            replayed: false,
        })
    }

    // ==========================================
    // TRANSACTION HISTORY
    // ==========================================

    /// Page through a user's transactions, newest first.
    ///
    /// Returns the page plus the total row count for pagination.
    pub async fn list_transactions(
        &self,
        user_id: &str,
        page: i64,
        page_size: i64,
    ) -> Result<(Vec<TransactionRecord>, i64), LedgerError> {
        // Ensure the wallet exists so an unknown user is a 404, not an
        // empty page.
        self.get_balance(user_id).await?;

        let page = page.max(1);
        let page_size = if page_size <= 0 {
            DEFAULT_PAGE_SIZE
        } else {
            page_size.min(MAX_PAGE_SIZE)
        };
        let offset = (page - 1) * page_size;

        let rows = self
            .store
            .list_transactions(user_id, page_size, offset)
            .await?;
        let total = self.store.count_transactions(user_id).await?;

        Ok((rows, total))
    }
}
