//! # Database Models
//!
//! This module defines the canonical record structs for the ledger. Each
//! struct maps to one table row; both storage backends (PostgreSQL and the
//! in-memory store) speak these types, so there is a single domain schema
//! and any external representation is a translation concern at the edges.
//!
//! ## Table Overview
//!
//! | Table | Description |
//! |-------|-------------|
//! | `wallets` | Cached balance buckets per user |
//! | `transactions` | Append-only ledger (source of truth) |
//! | `mining_sessions` | Accrual windows, at most one open per user |
//! | `referrals` | Referrer/referee pairs and their reward state |
//! | `task_claims` | One row per paid (user, task) reward |
//! | `reconciliation_logs` | Audit trail for balance checks |
//! | `idempotency_keys` | Request replay detection |
//!
//! ## Note on Types
//!
//! All amounts are `i64` in micro-CELF (1 CELF = 1,000,000 units).
//! PostgreSQL has no unsigned integers; balances are kept non-negative by
//! the ledger rules, while per-transaction bucket *deltas* are signed.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A wallet record: one per user, created at registration.
///
/// The bucket fields are a cache over the transaction ledger. Every
/// mutation bumps `version`; the storage layer refuses a stale write,
/// which backstops the per-wallet locks.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletRecord {
    /// Owning user id (primary key, supplied by the identity collaborator).
    pub user_id: String,

    /// Tokens eligible for peer-to-peer transfer.
    pub sendable_balance: i64,

    /// Earned-but-locked tokens (mining, referral, task rewards).
    /// Must be exchanged before they can be sent.
    pub non_sendable_balance: i64,

    /// Escrowed credits. No current processor moves funds here,
    /// but the bucket participates in the total invariant.
    pub pending_balance: i64,

    /// Cached total. Invariant:
    /// `total = sendable + non_sendable + pending`.
    pub total_balance: i64,

    /// Opaque receive address for incoming transfers.
    pub current_address: String,

    /// Admin freeze flag. A locked wallet rejects every balance mutation.
    pub is_locked: bool,

    /// Monotonic version, bumped on every balance mutation.
    pub version: i64,

    /// Last balance-affecting activity.
    pub last_activity: DateTime<Utc>,

    /// When the wallet was created.
    pub created_at: DateTime<Utc>,

    /// When this record was last updated.
    pub updated_at: DateTime<Utc>,
}

impl WalletRecord {
    /// Whether the cached buckets satisfy the total invariant.
    pub fn buckets_consistent(&self) -> bool {
        self.total_balance
            == self.sendable_balance + self.non_sendable_balance + self.pending_balance
    }
}

/// A ledger transaction row. Immutable once `completed`.
///
/// `amount` is always positive; the signed `*_delta` fields record the
/// bucket movement actually applied to this wallet, so summing the deltas
/// of all completed rows reproduces the wallet's cached buckets exactly
/// (the reconciliation invariant).
///
/// A peer-to-peer transfer appends two rows committed as one unit: a
/// `send` row on the sender (negative sendable delta, fee included) and a
/// `receive` row on the recipient. An `exchange` is a single row carrying
/// both bucket deltas, so no intermediate state is ever observable.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// Unique transaction ID (UUID v4).
    pub id: Uuid,

    /// The wallet this row touches.
    pub user_id: String,

    /// Transaction kind, stored as text
    /// (`mining`, `send`, `receive`, `referral`, `task_reward`,
    /// `exchange`, `bonus`).
    pub kind: String,

    /// For transfers: the other user. NULL otherwise.
    pub counterparty: Option<String>,

    /// Amount involved (positive, micro-CELF).
    pub amount: i64,

    /// Fee charged on top of `amount` (only on `send` rows).
    pub fee: i64,

    /// `pending`, `completed` or `failed`.
    pub status: String,

    /// Provenance for idempotency: session id, `referrer:referee`
    /// pair, task id.
    pub source_ref: Option<String>,

    /// Optional caller-supplied note.
    pub memo: Option<String>,

    /// Signed sendable-bucket delta applied by this row.
    pub sendable_delta: i64,

    /// Signed non-sendable-bucket delta applied by this row.
    pub non_sendable_delta: i64,

    /// Signed pending-bucket delta applied by this row.
    pub pending_delta: i64,

    /// Wallet total before this row.
    pub balance_before: i64,

    /// Wallet total after this row.
    pub balance_after: i64,

    /// When the transaction was initiated.
    pub created_at: DateTime<Utc>,

    /// When the transaction reached a terminal status.
    pub processed_at: Option<DateTime<Utc>>,
}

impl TransactionRecord {
    /// The signed change to the wallet's total implied by the deltas.
    pub fn total_delta(&self) -> i64 {
        self.sendable_delta + self.non_sendable_delta + self.pending_delta
    }
}

/// One mining accrual window.
///
/// Created when the user starts mining; closed when stopped or swept
/// after the session ceiling. The unique partial index on
/// `(user_id) WHERE completed_at IS NULL` enforces at most one open
/// session per user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MiningSessionRecord {
    /// Unique session ID.
    pub id: Uuid,

    /// The mining user.
    pub user_id: String,

    /// Server-side start instant. Clients never report elapsed time.
    pub started_at: DateTime<Utc>,

    /// Set when the session closes.
    pub completed_at: Option<DateTime<Utc>>,

    /// Accrual rate in micro-CELF per hour, clamped server-side.
    pub mining_rate: i64,

    /// Tokens credited at close (micro-CELF).
    pub tokens_earned: i64,

    /// Whether the elapsed-time ceiling was applied at close.
    pub capped: bool,
}

/// Referral lifecycle states.
pub mod referral_status {
    pub const PENDING: &str = "pending";
    pub const COMPLETED: &str = "completed";
    pub const REWARDED: &str = "rewarded";
}

/// Links a referrer to a referee.
///
/// `status` walks `pending → completed → rewarded`; the `rewarded`
/// transition happens atomically with the reward transaction, so a pair
/// is paid at most once.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReferralRecord {
    /// The referring user (receives the bonus).
    pub referrer_id: String,

    /// The referred user.
    pub referee_id: String,

    /// `pending`, `completed` or `rewarded`.
    pub status: String,

    /// Bonus paid to the referrer on claim (micro-CELF).
    pub reward_amount: i64,

    /// When the referral was recorded.
    pub created_at: DateTime<Utc>,

    /// When the referee qualified.
    pub completed_at: Option<DateTime<Utc>>,

    /// When the bonus was paid.
    pub rewarded_at: Option<DateTime<Utc>>,
}

/// One paid task reward. Existence of the `(user_id, task_id)` row is
/// the at-most-once guarantee.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskClaimRecord {
    /// The claiming user.
    pub user_id: String,

    /// The completed task (validated by the task catalog collaborator).
    pub task_id: String,

    /// Bonus paid (micro-CELF).
    pub reward_amount: i64,

    /// The `task_reward` ledger transaction that paid it.
    pub transaction_id: Uuid,

    /// When the reward was claimed.
    pub claimed_at: DateTime<Utc>,
}

/// Reconciliation log entry.
///
/// Records the results of comparing a wallet's cached buckets against the
/// sums recomputed from the transaction ledger. A non-zero difference is
/// an integrity finding: it indicates a bug, not a user condition, and is
/// flagged for review rather than silently corrected.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReconciliationLog {
    /// Unique log ID.
    pub id: Uuid,

    /// The wallet being reconciled (NULL for system-wide).
    pub user_id: Option<String>,

    /// Cached sendable balance at check time.
    pub cached_sendable: i64,

    /// Cached non-sendable balance at check time.
    pub cached_non_sendable: i64,

    /// Cached pending balance at check time.
    pub cached_pending: i64,

    /// Sendable balance recomputed from the ledger.
    pub computed_sendable: i64,

    /// Non-sendable balance recomputed from the ledger.
    pub computed_non_sendable: i64,

    /// Pending balance recomputed from the ledger.
    pub computed_pending: i64,

    /// Total difference (computed - cached).
    pub difference: i64,

    /// Whether the cache was corrected in place.
    pub auto_fixed: bool,

    /// Notes about the reconciliation.
    pub notes: Option<String>,

    /// When reconciliation was performed.
    pub created_at: DateTime<Utc>,
}

/// A recorded idempotency key.
///
/// A retried request carrying the same `(user_id, idem_key)` pair is
/// answered with the original transaction instead of re-executing.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    /// The acting user.
    pub user_id: String,

    /// Client-supplied key identifying the logical operation.
    pub idem_key: String,

    /// Which operation the key was recorded for
    /// (`transfer`, `exchange`, `claim_referral`, `claim_task`, ...).
    pub operation: String,

    /// The transaction produced by the original execution.
    pub transaction_id: Uuid,

    /// When the key was recorded.
    pub created_at: DateTime<Utc>,
}
