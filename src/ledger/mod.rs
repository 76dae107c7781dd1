//! # Ledger Domain Module
//!
//! The canonical vocabulary of the wallet ledger: token units, transaction
//! kinds, balance buckets, checked bucket arithmetic and the error
//! taxonomy every operation speaks.
//!
//! ## The Core Rule
//!
//! A wallet balance is never edited directly. Every mutation is expressed
//! as a [`BalanceDeltas`], a signed movement across the three buckets,
//! validated here against the current wallet state, then committed by the
//! storage layer together with the ledger row that explains it. The cached
//! buckets are therefore always the sum of the completed ledger rows.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::db::WalletRecord;
use crate::store::StoreError;

/// Micro-CELF per CELF. All amounts in the system are i64 micro-CELF.
pub const UNITS_PER_CELF: i64 = 1_000_000;

/// Transaction kinds recorded in the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxKind {
    /// Mining accrual credited at session close
    Mining,
    /// Outgoing peer-to-peer transfer (debit)
    Send,
    /// Incoming peer-to-peer transfer (credit)
    Receive,
    /// Referral bonus
    Referral,
    /// Task completion bonus
    TaskReward,
    /// Non-sendable → sendable conversion
    Exchange,
    /// Administrative bonus credit
    Bonus,
}

impl TxKind {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxKind::Mining => "mining",
            TxKind::Send => "send",
            TxKind::Receive => "receive",
            TxKind::Referral => "referral",
            TxKind::TaskReward => "task_reward",
            TxKind::Exchange => "exchange",
            TxKind::Bonus => "bonus",
        }
    }
}

impl fmt::Display for TxKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Transaction lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TxStatus {
    /// Recorded but not finalized
    Pending,
    /// Finalized; the row is immutable and counted by the projector
    Completed,
    /// Rejected; kept for audit, never counted
    Failed,
}

impl TxStatus {
    /// Storage representation.
    pub fn as_str(&self) -> &'static str {
        match self {
            TxStatus::Pending => "pending",
            TxStatus::Completed => "completed",
            TxStatus::Failed => "failed",
        }
    }
}

/// The three balance buckets of a wallet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Bucket {
    /// Transferable tokens
    Sendable,
    /// Earned-but-locked tokens
    NonSendable,
    /// Escrowed tokens
    Pending,
}

impl fmt::Display for Bucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Bucket::Sendable => "sendable",
            Bucket::NonSendable => "non-sendable",
            Bucket::Pending => "pending",
        };
        f.write_str(name)
    }
}

/// A signed movement across the balance buckets of one wallet.
///
/// Construction helpers cover the shapes the processors emit; arbitrary
/// deltas can be built directly for administrative corrections.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BalanceDeltas {
    /// Signed change to the sendable bucket.
    pub sendable: i64,
    /// Signed change to the non-sendable bucket.
    pub non_sendable: i64,
    /// Signed change to the pending bucket.
    pub pending: i64,
}

impl BalanceDeltas {
    /// A credit to the sendable bucket (incoming transfer).
    pub fn credit_sendable(amount: i64) -> Self {
        Self {
            sendable: amount,
            ..Default::default()
        }
    }

    /// A debit from the sendable bucket (outgoing transfer, fee included).
    pub fn debit_sendable(amount: i64) -> Self {
        Self {
            sendable: -amount,
            ..Default::default()
        }
    }

    /// A credit to the non-sendable bucket (mining, referral, task bonus).
    pub fn credit_non_sendable(amount: i64) -> Self {
        Self {
            non_sendable: amount,
            ..Default::default()
        }
    }

    /// The exchange shape: non-sendable down, sendable up, in one step.
    pub fn exchange(amount: i64) -> Self {
        Self {
            sendable: amount,
            non_sendable: -amount,
            pending: 0,
        }
    }

    /// Net change to the wallet total.
    pub fn total(&self) -> i64 {
        self.sendable + self.non_sendable + self.pending
    }

    /// Apply the deltas to a wallet's buckets, checking that no bucket
    /// goes negative and nothing overflows.
    ///
    /// Returns the new `(sendable, non_sendable, pending)` triple.
    /// Does NOT check the admin freeze flag; callers validate that
    /// before building a commit.
    pub fn apply_to(&self, wallet: &WalletRecord) -> Result<(i64, i64, i64), LedgerError> {
        let sendable = checked_bucket(
            Bucket::Sendable,
            wallet.sendable_balance,
            self.sendable,
        )?;
        let non_sendable = checked_bucket(
            Bucket::NonSendable,
            wallet.non_sendable_balance,
            self.non_sendable,
        )?;
        let pending = checked_bucket(
            Bucket::Pending,
            wallet.pending_balance,
            self.pending,
        )?;
        Ok((sendable, non_sendable, pending))
    }
}

/// Apply one signed delta to one bucket, rejecting underflow and overflow.
fn checked_bucket(bucket: Bucket, current: i64, delta: i64) -> Result<i64, LedgerError> {
    let next = current
        .checked_add(delta)
        .ok_or(LedgerError::InvalidAmount(delta))?;
    if next < 0 {
        return Err(LedgerError::InsufficientFunds {
            bucket,
            available: current,
            requested: -delta,
        });
    }
    Ok(next)
}

/// Validate a caller-supplied amount: positive and finite by construction.
pub fn validate_amount(amount: i64) -> Result<(), LedgerError> {
    if amount <= 0 {
        return Err(LedgerError::InvalidAmount(amount));
    }
    Ok(())
}

/// The error taxonomy for every ledger operation.
///
/// Grouped by recovery semantics:
/// - validation errors: rejected before any mutation, caller fixes input
/// - state conflicts: business-rule rejections, surfaced verbatim
/// - `TryAgain`: transient contention after bounded internal retries
/// - `Store`: storage failure (nothing was applied)
#[derive(Error, Debug)]
pub enum LedgerError {
    /// Amount is zero, negative, or out of range.
    #[error("Invalid amount: {0}")]
    InvalidAmount(i64),

    /// The user id is empty or unusable.
    #[error("Invalid user id: {0}")]
    InvalidUserId(String),

    /// Sender and receiver resolve to the same wallet.
    #[error("Cannot transfer to your own wallet")]
    SelfTransfer,

    /// The destination address is not a valid receive address.
    #[error("Malformed address: {0}")]
    MalformedAddress(String),

    /// No wallet exists for the user.
    #[error("Wallet not found for user: {0}")]
    WalletNotFound(String),

    /// A wallet already exists for the user.
    #[error("Wallet already exists for user: {0}")]
    WalletExists(String),

    /// The wallet is frozen by an administrator.
    #[error("Wallet is locked: {0}")]
    WalletLocked(String),

    /// The debited bucket cannot cover the request.
    #[error("Insufficient {bucket} balance: available {available}, requested {requested}")]
    InsufficientFunds {
        bucket: Bucket,
        available: i64,
        requested: i64,
    },

    /// An open mining session already exists.
    #[error("A mining session is already open")]
    AlreadyMining,

    /// Stop requested with no open session.
    #[error("No active mining session")]
    NoActiveSession,

    /// The reward for this (user, rewardable) pair was already paid.
    #[error("Reward already claimed")]
    AlreadyClaimed,

    /// The claim is not (yet) payable: unknown task, unqualified referral.
    #[error("Not eligible: {0}")]
    NotEligible(String),

    /// Per-wallet serialization could not be obtained in time.
    #[error("Operation contended, try again")]
    TryAgain,

    /// Storage-layer failure; the operation was not applied.
    #[error("Storage error: {0}")]
    Store(#[from] StoreError),
}

impl LedgerError {
    /// Stable machine-readable code for the API envelope.
    pub fn code(&self) -> &'static str {
        match self {
            LedgerError::InvalidAmount(_) => "INVALID_AMOUNT",
            LedgerError::InvalidUserId(_) => "INVALID_USER_ID",
            LedgerError::SelfTransfer => "SELF_TRANSFER",
            LedgerError::MalformedAddress(_) => "MALFORMED_ADDRESS",
            LedgerError::WalletNotFound(_) => "WALLET_NOT_FOUND",
            LedgerError::WalletExists(_) => "WALLET_EXISTS",
            LedgerError::WalletLocked(_) => "WALLET_LOCKED",
            LedgerError::InsufficientFunds { .. } => "INSUFFICIENT_FUNDS",
            LedgerError::AlreadyMining => "ALREADY_MINING",
            LedgerError::NoActiveSession => "NO_ACTIVE_SESSION",
            LedgerError::AlreadyClaimed => "ALREADY_CLAIMED",
            LedgerError::NotEligible(_) => "NOT_ELIGIBLE",
            LedgerError::TryAgain => "TRY_AGAIN",
            LedgerError::Store(_) => "STORAGE_ERROR",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn wallet(sendable: i64, non_sendable: i64, pending: i64) -> WalletRecord {
        WalletRecord {
            user_id: "u1".to_string(),
            sendable_balance: sendable,
            non_sendable_balance: non_sendable,
            pending_balance: pending,
            total_balance: sendable + non_sendable + pending,
            current_address: "celfAAAA".to_string(),
            is_locked: false,
            version: 0,
            last_activity: Utc::now(),
            created_at: Utc::now(),
            updated_at: Utc::now(),
        }
    }

    #[test]
    fn test_debit_within_balance() {
        let w = wallet(10_000_000, 0, 0);
        let (s, n, p) = BalanceDeltas::debit_sendable(4_000_000)
            .apply_to(&w)
            .unwrap();
        assert_eq!((s, n, p), (6_000_000, 0, 0));
    }

    #[test]
    fn test_debit_exceeding_balance_is_rejected() {
        let w = wallet(1_000_000, 0, 0);
        let err = BalanceDeltas::debit_sendable(2_000_000)
            .apply_to(&w)
            .unwrap_err();
        match err {
            LedgerError::InsufficientFunds {
                bucket,
                available,
                requested,
            } => {
                assert_eq!(bucket, Bucket::Sendable);
                assert_eq!(available, 1_000_000);
                assert_eq!(requested, 2_000_000);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn test_exchange_moves_between_buckets_only() {
        let w = wallet(0, 10_000_000, 0);
        let deltas = BalanceDeltas::exchange(10_000_000);
        assert_eq!(deltas.total(), 0);
        let (s, n, p) = deltas.apply_to(&w).unwrap();
        assert_eq!((s, n, p), (10_000_000, 0, 0));
    }

    #[test]
    fn test_exchange_rejected_when_non_sendable_short() {
        let w = wallet(5_000_000, 1_000_000, 0);
        let err = BalanceDeltas::exchange(2_000_000).apply_to(&w).unwrap_err();
        assert!(matches!(
            err,
            LedgerError::InsufficientFunds {
                bucket: Bucket::NonSendable,
                ..
            }
        ));
    }

    #[test]
    fn test_overflow_is_rejected() {
        let w = wallet(i64::MAX - 1, 0, 0);
        let err = BalanceDeltas::credit_sendable(10).apply_to(&w).unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    #[test]
    fn test_validate_amount() {
        assert!(validate_amount(1).is_ok());
        assert!(validate_amount(0).is_err());
        assert!(validate_amount(-5).is_err());
    }

    #[test]
    fn test_error_codes_are_stable() {
        assert_eq!(LedgerError::SelfTransfer.code(), "SELF_TRANSFER");
        assert_eq!(LedgerError::AlreadyMining.code(), "ALREADY_MINING");
        assert_eq!(LedgerError::TryAgain.code(), "TRY_AGAIN");
    }
}
