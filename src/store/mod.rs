//! # Storage Layer
//!
//! This module defines the [`LedgerStore`] trait, the seam between the
//! ledger services and durable state, plus the commit types the services
//! hand to it.
//!
//! Two backends implement the trait:
//!
//! | Backend | Use |
//! |---------|-----|
//! | [`PgStore`] | PostgreSQL (production) |
//! | [`MemStore`] | In-process maps (local dev, integration tests) |
//!
//! ## Atomicity Contract
//!
//! A [`LedgerCommit`] is all-or-nothing: every transaction row, wallet
//! update and idempotency record in it becomes visible together or not at
//! all. `PgStore` runs the commit inside one SQL transaction; `MemStore`
//! applies it under one mutex. Operations that pair a uniqueness check
//! with a payout (claims, session close) are single trait methods so the
//! check and the write share the same atomic scope; a separate pre-check
//! would be racy.
//!
//! Wallet updates carry the version the caller read; a mismatched version
//! rejects the whole commit. Under the per-wallet locks this should never
//! fire: it is the optimistic backstop, not the primary serialization.

pub mod mem;
pub mod pg;

pub use mem::MemStore;
pub use pg::PgStore;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::db::{
    DatabaseError, IdempotencyRecord, MiningSessionRecord, ReconciliationLog, ReferralRecord,
    TaskClaimRecord, TransactionRecord, WalletRecord,
};

/// Storage-layer errors.
#[derive(Error, Debug)]
pub enum StoreError {
    /// Underlying database failure.
    #[error("database error: {0}")]
    Database(String),

    /// The referenced record does not exist.
    #[error("record not found: {0}")]
    NotFound(String),

    /// A uniqueness constraint rejected the write.
    #[error("duplicate record: {0}")]
    Duplicate(String),

    /// A versioned wallet update lost the race.
    #[error("version conflict for wallet {0}")]
    VersionConflict(String),
}

impl From<DatabaseError> for StoreError {
    fn from(err: DatabaseError) -> Self {
        match err {
            DatabaseError::NotFound(what) => StoreError::NotFound(what),
            other => StoreError::Database(other.to_string()),
        }
    }
}

impl From<tokio_postgres::Error> for StoreError {
    fn from(err: tokio_postgres::Error) -> Self {
        StoreError::Database(err.to_string())
    }
}

/// New absolute bucket values for one wallet, tagged with the version the
/// caller read. The store bumps the version on apply and rejects the
/// commit if the stored version moved.
#[derive(Debug, Clone)]
pub struct WalletUpdate {
    /// The wallet to update.
    pub user_id: String,

    /// Version observed when the operation read the wallet.
    pub expected_version: i64,

    /// New sendable balance.
    pub sendable_balance: i64,

    /// New non-sendable balance.
    pub non_sendable_balance: i64,

    /// New pending balance.
    pub pending_balance: i64,

    /// New cached total.
    pub total_balance: i64,

    /// Activity timestamp to record.
    pub last_activity: DateTime<Utc>,
}

impl WalletUpdate {
    /// Build an update from a wallet and the checked bucket triple
    /// produced by [`crate::ledger::BalanceDeltas::apply_to`].
    pub fn from_applied(
        wallet: &WalletRecord,
        buckets: (i64, i64, i64),
        at: DateTime<Utc>,
    ) -> Self {
        let (sendable, non_sendable, pending) = buckets;
        Self {
            user_id: wallet.user_id.clone(),
            expected_version: wallet.version,
            sendable_balance: sendable,
            non_sendable_balance: non_sendable,
            pending_balance: pending,
            total_balance: sendable + non_sendable + pending,
            last_activity: at,
        }
    }
}

/// An atomic unit of ledger work: transaction rows plus the wallet
/// updates they explain, and optionally the idempotency key that guards
/// the operation against client retries.
#[derive(Debug, Clone, Default)]
pub struct LedgerCommit {
    /// Ledger rows to append (already in their terminal status).
    pub transactions: Vec<TransactionRecord>,

    /// Versioned wallet bucket updates.
    pub wallet_updates: Vec<WalletUpdate>,

    /// Idempotency record to store alongside, if the request carried a key.
    pub idempotency: Option<IdempotencyRecord>,
}

/// Outcome of opening a mining session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionStart {
    /// The session row was created.
    Started,
    /// An open session already exists for the user.
    AlreadyOpen,
}

/// Outcome of a uniqueness-guarded reward write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClaimOutcome {
    /// The claim row and its reward transaction were committed.
    Created,
    /// The uniqueness guard fired; nothing was written.
    AlreadyClaimed,
}

/// Recomputed bucket sums for one wallet, derived from the completed
/// rows of the transaction ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct LedgerSums {
    /// Sum of sendable deltas.
    pub sendable: i64,
    /// Sum of non-sendable deltas.
    pub non_sendable: i64,
    /// Sum of pending deltas.
    pub pending: i64,
}

impl LedgerSums {
    /// Total implied by the summed deltas.
    pub fn total(&self) -> i64 {
        self.sendable + self.non_sendable + self.pending
    }
}

/// Aggregate circulation stats across all wallets.
#[derive(Debug, Clone, Copy, Default)]
pub struct NetworkTotals {
    /// Sum of sendable balances.
    pub total_sendable: i64,
    /// Sum of non-sendable balances.
    pub total_non_sendable: i64,
    /// Sum of pending balances.
    pub total_pending: i64,
    /// Number of wallets.
    pub wallet_count: i64,
}

impl NetworkTotals {
    /// Total circulating supply.
    pub fn total(&self) -> i64 {
        self.total_sendable + self.total_non_sendable + self.total_pending
    }
}

/// The storage seam for the wallet ledger.
///
/// Methods that combine a guard with a payout (`close_session`,
/// `reward_referral`, `insert_task_claim`) are atomic as a whole:
/// the guard check and the commit either both happen or neither does.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Cheap connectivity probe for health checks.
    async fn ping(&self) -> Result<(), StoreError>;

    // ==========================================
    // WALLETS
    // ==========================================

    /// Insert a new wallet. `Duplicate` if the user already has one.
    async fn insert_wallet(&self, wallet: &WalletRecord) -> Result<(), StoreError>;

    /// Fetch a wallet by owner.
    async fn get_wallet(&self, user_id: &str) -> Result<Option<WalletRecord>, StoreError>;

    /// Fetch a wallet by its receive address.
    async fn get_wallet_by_address(
        &self,
        address: &str,
    ) -> Result<Option<WalletRecord>, StoreError>;

    /// Page through all wallets (auditor sweep).
    async fn list_wallets(&self, limit: i64, offset: i64)
        -> Result<Vec<WalletRecord>, StoreError>;

    /// Set or clear the admin freeze flag.
    async fn set_wallet_locked(&self, user_id: &str, locked: bool) -> Result<(), StoreError>;

    // ==========================================
    // LEDGER COMMITS
    // ==========================================

    /// Apply a [`LedgerCommit`] atomically.
    async fn commit(&self, commit: LedgerCommit) -> Result<(), StoreError>;

    /// Fetch a single transaction by id.
    async fn get_transaction(&self, id: Uuid) -> Result<Option<TransactionRecord>, StoreError>;

    /// Page through a wallet's transactions, newest first.
    async fn list_transactions(
        &self,
        user_id: &str,
        limit: i64,
        offset: i64,
    ) -> Result<Vec<TransactionRecord>, StoreError>;

    /// Total number of transactions for a wallet.
    async fn count_transactions(&self, user_id: &str) -> Result<i64, StoreError>;

    /// Recompute bucket sums from the completed ledger rows.
    async fn ledger_sums(&self, user_id: &str) -> Result<LedgerSums, StoreError>;

    // ==========================================
    // MINING SESSIONS
    // ==========================================

    /// Open a session; `AlreadyOpen` if the user has one open.
    async fn open_session(&self, session: &MiningSessionRecord)
        -> Result<SessionStart, StoreError>;

    /// The user's open session, if any.
    async fn open_session_for(
        &self,
        user_id: &str,
    ) -> Result<Option<MiningSessionRecord>, StoreError>;

    /// Open sessions started before `cutoff` (stale-session sweep).
    async fn stale_open_sessions(
        &self,
        cutoff: DateTime<Utc>,
        limit: i64,
    ) -> Result<Vec<MiningSessionRecord>, StoreError>;

    /// Close a session and apply its accrual commit atomically.
    /// `NotFound` if the session is missing or already closed.
    async fn close_session(
        &self,
        session_id: Uuid,
        tokens_earned: i64,
        capped: bool,
        completed_at: DateTime<Utc>,
        commit: LedgerCommit,
    ) -> Result<(), StoreError>;

    // ==========================================
    // REFERRALS
    // ==========================================

    /// Record a pending referral. `Duplicate` on an existing pair.
    async fn insert_referral(&self, referral: &ReferralRecord) -> Result<(), StoreError>;

    /// Fetch a referral pair.
    async fn get_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
    ) -> Result<Option<ReferralRecord>, StoreError>;

    /// Transition `pending → completed`. Returns whether the row moved.
    async fn complete_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
        at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Transition `completed → rewarded` and apply the reward commit,
    /// atomically. `AlreadyClaimed` if the pair is already rewarded.
    async fn reward_referral(
        &self,
        referrer_id: &str,
        referee_id: &str,
        at: DateTime<Utc>,
        commit: LedgerCommit,
    ) -> Result<ClaimOutcome, StoreError>;

    // ==========================================
    // TASK CLAIMS
    // ==========================================

    /// Insert the `(user, task)` claim row and apply the reward commit,
    /// atomically. `AlreadyClaimed` if the row exists.
    async fn insert_task_claim(
        &self,
        claim: &TaskClaimRecord,
        commit: LedgerCommit,
    ) -> Result<ClaimOutcome, StoreError>;

    // ==========================================
    // AUDIT
    // ==========================================

    /// Record a reconciliation result.
    async fn insert_reconciliation_log(&self, log: &ReconciliationLog) -> Result<(), StoreError>;

    /// Look up a recorded idempotency key.
    async fn get_idempotency(
        &self,
        user_id: &str,
        idem_key: &str,
    ) -> Result<Option<IdempotencyRecord>, StoreError>;

    /// Aggregate circulation stats.
    async fn network_totals(&self) -> Result<NetworkTotals, StoreError>;
}
