//! # Services Module
//!
//! This module contains the core business logic services for the wallet
//! ledger backend. Each service handles a specific domain.
//!
//! ## Services Overview
//!
//! | Service | Responsibility |
//! |---------|---------------|
//! | `WalletService` | Registration, balances, transfers, exchanges |
//! | `MiningService` | Accrual sessions, stale-session sweep |
//! | `RewardService` | Referral and task reward claims |
//! | `BalanceAuditor` | Ledger reconciliation, network stats |
//! | `WalletLocks` | Per-wallet serialization, bounded acquisition |
//!
//! ## Service Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────────┐
//! │                       SERVICES LAYER                          │
//! │                                                               │
//! │   WalletService    MiningService    RewardService             │
//! │   • transfer()     • start/stop     • claim_referral()        │
//! │   • exchange()     • status         • claim_task()            │
//! │   • balances       • sweep loop     • referral lifecycle      │
//! │         │               │                │                    │
//! │         └───────┬───────┴───────┬────────┘                    │
//! │                 ▼               ▼                             │
//! │           WalletLocks      BalanceAuditor                     │
//! │        (serialization)    (reconcile loop)                    │
//! │                 │               │                             │
//! │                 └───────┬───────┘                             │
//! │                         ▼                                     │
//! │                    LedgerStore                                │
//! │              (atomic ledger commits)                          │
//! └──────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every balance-mutating path follows the same discipline: acquire the
//! wallet lock(s), check the idempotency key, read fresh wallet state,
//! validate, then hand the storage layer one atomic [`LedgerCommit`].

pub mod balance_auditor;
pub mod catalog;
pub mod mining_service;
pub mod reward_service;
pub mod wallet_locks;
pub mod wallet_service;

pub use balance_auditor::{BalanceAuditor, ReconcileReport};
pub use catalog::{StaticTaskCatalog, TaskCatalog};
pub use mining_service::{MiningService, MiningStatus, MiningStopOutcome};
pub use reward_service::{ClaimResult, RewardService};
pub use wallet_locks::{WalletGuard, WalletLocks};
pub use wallet_service::WalletService;

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::db::{IdempotencyRecord, TransactionRecord, WalletRecord};
use crate::ledger::{BalanceDeltas, LedgerError, TxKind, TxStatus};
use crate::store::{LedgerStore, StoreError};

/// A committed balance-mutating operation: the ledger row that carries it
/// and whether the response is a replay of an earlier request.
#[derive(Debug, Clone)]
pub struct CommittedOp {
    /// The primary ledger row of the operation (the `send` row for a
    /// transfer, the single row otherwise).
    pub transaction: TransactionRecord,

    /// True when an idempotency key matched and the original result was
    /// returned without re-executing.
    pub replayed: bool,
}

/// Build a completed ledger row for a wallet and the deltas applied to it.
pub(crate) fn completed_transaction(
    kind: TxKind,
    wallet: &WalletRecord,
    amount: i64,
    fee: i64,
    deltas: BalanceDeltas,
    counterparty: Option<String>,
    source_ref: Option<String>,
    memo: Option<String>,
    at: DateTime<Utc>,
) -> TransactionRecord {
    TransactionRecord {
        id: Uuid::new_v4(),
        user_id: wallet.user_id.clone(),
        kind: kind.as_str().to_string(),
        counterparty,
        amount,
        fee,
        status: TxStatus::Completed.as_str().to_string(),
        source_ref,
        memo,
        sendable_delta: deltas.sendable,
        non_sendable_delta: deltas.non_sendable,
        pending_delta: deltas.pending,
        balance_before: wallet.total_balance,
        balance_after: wallet.total_balance + deltas.total(),
        created_at: at,
        processed_at: Some(at),
    }
}

/// Map a failed commit to the caller-facing error: a version conflict is
/// transient contention (the optimistic backstop fired), everything else
/// is a storage failure.
pub(crate) fn commit_error(err: StoreError) -> LedgerError {
    match err {
        StoreError::VersionConflict(_) => LedgerError::TryAgain,
        other => LedgerError::Store(other),
    }
}

/// Look up an idempotency key (under the caller's wallet lock) and fetch
/// the original transaction it recorded.
pub(crate) async fn find_replay(
    store: &Arc<dyn LedgerStore>,
    user_id: &str,
    idem_key: Option<&str>,
) -> Result<Option<TransactionRecord>, LedgerError> {
    let key = match idem_key {
        Some(k) if !k.is_empty() => k,
        _ => return Ok(None),
    };

    let record = match store.get_idempotency(user_id, key).await? {
        Some(record) => record,
        None => return Ok(None),
    };

    let transaction = store
        .get_transaction(record.transaction_id)
        .await?
        .ok_or_else(|| {
            LedgerError::Store(StoreError::NotFound(format!(
                "transaction {} recorded for idempotency key",
                record.transaction_id
            )))
        })?;

    Ok(Some(transaction))
}

/// Build the idempotency record for a fresh execution, if a key was sent.
pub(crate) fn idempotency_for(
    user_id: &str,
    idem_key: Option<&str>,
    operation: &str,
    transaction_id: Uuid,
    at: DateTime<Utc>,
) -> Option<IdempotencyRecord> {
    idem_key
        .filter(|k| !k.is_empty())
        .map(|key| IdempotencyRecord {
            user_id: user_id.to_string(),
            idem_key: key.to_string(),
            operation: operation.to_string(),
            transaction_id,
            created_at: at,
        })
}
