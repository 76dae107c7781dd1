//! # Database Queries
//!
//! This module contains all the SQL for the ledger tables. Each function
//! performs one database operation.
//!
//! ## Query Organization
//!
//! Queries are grouped by the table they operate on:
//! - `wallet_*` - Wallet table operations
//! - `transaction_*` - Transaction ledger operations
//! - `session_*` - Mining session operations
//! - `referral_*` / `task_claim_*` - Reward bookkeeping
//! - `reconciliation_*` / `idempotency_*` - Audit and replay guard
//!
//! ## Client Genericity
//!
//! Every function takes `&impl GenericClient`, so the same query runs on
//! a pooled client for simple reads and inside an interactive transaction
//! when the storage layer needs several writes to land atomically.

use chrono::{DateTime, Utc};
use tokio_postgres::{GenericClient, Row};
use tracing::debug;
use uuid::Uuid;

use super::models::*;

// ============================================
// ROW MAPPING HELPERS
// ============================================

/// Convert a database row to a WalletRecord.
fn row_to_wallet(row: &Row) -> WalletRecord {
    WalletRecord {
        user_id: row.get("user_id"),
        sendable_balance: row.get("sendable_balance"),
        non_sendable_balance: row.get("non_sendable_balance"),
        pending_balance: row.get("pending_balance"),
        total_balance: row.get("total_balance"),
        current_address: row.get("current_address"),
        is_locked: row.get("is_locked"),
        version: row.get("version"),
        last_activity: row.get("last_activity"),
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
    }
}

/// Convert a database row to a TransactionRecord.
fn row_to_transaction(row: &Row) -> TransactionRecord {
    TransactionRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        kind: row.get("kind"),
        counterparty: row.get("counterparty"),
        amount: row.get("amount"),
        fee: row.get("fee"),
        status: row.get("status"),
        source_ref: row.get("source_ref"),
        memo: row.get("memo"),
        sendable_delta: row.get("sendable_delta"),
        non_sendable_delta: row.get("non_sendable_delta"),
        pending_delta: row.get("pending_delta"),
        balance_before: row.get("balance_before"),
        balance_after: row.get("balance_after"),
        created_at: row.get("created_at"),
        processed_at: row.get("processed_at"),
    }
}

/// Convert a database row to a MiningSessionRecord.
fn row_to_session(row: &Row) -> MiningSessionRecord {
    MiningSessionRecord {
        id: row.get("id"),
        user_id: row.get("user_id"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        mining_rate: row.get("mining_rate"),
        tokens_earned: row.get("tokens_earned"),
        capped: row.get("capped"),
    }
}

/// Convert a database row to a ReferralRecord.
fn row_to_referral(row: &Row) -> ReferralRecord {
    ReferralRecord {
        referrer_id: row.get("referrer_id"),
        referee_id: row.get("referee_id"),
        status: row.get("status"),
        reward_amount: row.get("reward_amount"),
        created_at: row.get("created_at"),
        completed_at: row.get("completed_at"),
        rewarded_at: row.get("rewarded_at"),
    }
}

const WALLET_COLUMNS: &str = "user_id, sendable_balance, non_sendable_balance, pending_balance, \
     total_balance, current_address, is_locked, version, last_activity, created_at, updated_at";

const TRANSACTION_COLUMNS: &str = "id, user_id, kind, counterparty, amount, fee, status, \
     source_ref, memo, sendable_delta, non_sendable_delta, pending_delta, \
     balance_before, balance_after, created_at, processed_at";

// ============================================
// WALLET QUERIES
// ============================================

/// Insert a new wallet row. Returns `false` if the user already has one.
pub async fn wallet_insert(
    client: &impl GenericClient,
    wallet: &WalletRecord,
) -> Result<bool, tokio_postgres::Error> {
    debug!("Inserting wallet for user: {}", wallet.user_id);

    let rows = client
        .execute(
            r#"
        INSERT INTO wallets (
            user_id, sendable_balance, non_sendable_balance, pending_balance,
            total_balance, current_address, is_locked, version,
            last_activity, created_at, updated_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
        ON CONFLICT (user_id) DO NOTHING
        "#,
            &[
                &wallet.user_id,
                &wallet.sendable_balance,
                &wallet.non_sendable_balance,
                &wallet.pending_balance,
                &wallet.total_balance,
                &wallet.current_address,
                &wallet.is_locked,
                &wallet.version,
                &wallet.last_activity,
                &wallet.created_at,
                &wallet.updated_at,
            ],
        )
        .await?;

    Ok(rows == 1)
}

/// Get a wallet by owner.
pub async fn wallet_get(
    client: &impl GenericClient,
    user_id: &str,
) -> Result<Option<WalletRecord>, tokio_postgres::Error> {
    let rows = client
        .query(
            format!("SELECT {} FROM wallets WHERE user_id = $1", WALLET_COLUMNS).as_str(),
            &[&user_id],
        )
        .await?;

    Ok(rows.first().map(row_to_wallet))
}

/// Get a wallet by its receive address.
pub async fn wallet_get_by_address(
    client: &impl GenericClient,
    address: &str,
) -> Result<Option<WalletRecord>, tokio_postgres::Error> {
    let rows = client
        .query(
            format!(
                "SELECT {} FROM wallets WHERE current_address = $1",
                WALLET_COLUMNS
            )
            .as_str(),
            &[&address],
        )
        .await?;

    Ok(rows.first().map(row_to_wallet))
}

/// Page through all wallets, oldest first (stable order for sweeps).
pub async fn wallet_list(
    client: &impl GenericClient,
    limit: i64,
    offset: i64,
) -> Result<Vec<WalletRecord>, tokio_postgres::Error> {
    let rows = client
        .query(
            format!(
                "SELECT {} FROM wallets ORDER BY created_at ASC LIMIT $1 OFFSET $2",
                WALLET_COLUMNS
            )
            .as_str(),
            &[&limit, &offset],
        )
        .await?;

    Ok(rows.iter().map(row_to_wallet).collect())
}

/// Set or clear the admin freeze flag.
pub async fn wallet_set_locked(
    client: &impl GenericClient,
    user_id: &str,
    locked: bool,
) -> Result<u64, tokio_postgres::Error> {
    client
        .execute(
            "UPDATE wallets SET is_locked = $2, updated_at = NOW() WHERE user_id = $1",
            &[&user_id, &locked],
        )
        .await
}

/// Apply a versioned balance update. Returns the number of rows touched:
/// 0 means the expected version lost a race and the caller must abort.
pub async fn wallet_apply_update(
    client: &impl GenericClient,
    user_id: &str,
    expected_version: i64,
    sendable: i64,
    non_sendable: i64,
    pending: i64,
    total: i64,
    last_activity: DateTime<Utc>,
) -> Result<u64, tokio_postgres::Error> {
    client
        .execute(
            r#"
        UPDATE wallets
        SET
            sendable_balance = $3,
            non_sendable_balance = $4,
            pending_balance = $5,
            total_balance = $6,
            version = version + 1,
            last_activity = $7,
            updated_at = NOW()
        WHERE user_id = $1 AND version = $2
        "#,
            &[
                &user_id,
                &expected_version,
                &sendable,
                &non_sendable,
                &pending,
                &total,
                &last_activity,
            ],
        )
        .await
}

// ============================================
// TRANSACTION QUERIES
// ============================================

/// Append a ledger row.
pub async fn transaction_insert(
    client: &impl GenericClient,
    tx: &TransactionRecord,
) -> Result<(), tokio_postgres::Error> {
    debug!("Appending {} transaction for {}", tx.kind, tx.user_id);

    client
        .execute(
            r#"
        INSERT INTO transactions (
            id, user_id, kind, counterparty, amount, fee, status,
            source_ref, memo, sendable_delta, non_sendable_delta,
            pending_delta, balance_before, balance_after,
            created_at, processed_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16)
        "#,
            &[
                &tx.id,
                &tx.user_id,
                &tx.kind,
                &tx.counterparty,
                &tx.amount,
                &tx.fee,
                &tx.status,
                &tx.source_ref,
                &tx.memo,
                &tx.sendable_delta,
                &tx.non_sendable_delta,
                &tx.pending_delta,
                &tx.balance_before,
                &tx.balance_after,
                &tx.created_at,
                &tx.processed_at,
            ],
        )
        .await?;

    Ok(())
}

/// Fetch a transaction by id.
pub async fn transaction_get(
    client: &impl GenericClient,
    id: Uuid,
) -> Result<Option<TransactionRecord>, tokio_postgres::Error> {
    let rows = client
        .query(
            format!("SELECT {} FROM transactions WHERE id = $1", TRANSACTION_COLUMNS).as_str(),
            &[&id],
        )
        .await?;

    Ok(rows.first().map(row_to_transaction))
}

/// Page through a wallet's transactions, newest first.
pub async fn transaction_list(
    client: &impl GenericClient,
    user_id: &str,
    limit: i64,
    offset: i64,
) -> Result<Vec<TransactionRecord>, tokio_postgres::Error> {
    let rows = client
        .query(
            format!(
                r#"
        SELECT {}
        FROM transactions
        WHERE user_id = $1
        ORDER BY created_at DESC
        LIMIT $2 OFFSET $3
        "#,
                TRANSACTION_COLUMNS
            )
            .as_str(),
            &[&user_id, &limit, &offset],
        )
        .await?;

    Ok(rows.iter().map(row_to_transaction).collect())
}

/// Total transaction count for a wallet.
pub async fn transaction_count(
    client: &impl GenericClient,
    user_id: &str,
) -> Result<i64, tokio_postgres::Error> {
    let row = client
        .query_one(
            "SELECT COUNT(*) AS count FROM transactions WHERE user_id = $1",
            &[&user_id],
        )
        .await?;

    Ok(row.get("count"))
}

/// Recompute bucket sums from the completed ledger rows of one wallet.
pub async fn transaction_ledger_sums(
    client: &impl GenericClient,
    user_id: &str,
) -> Result<(i64, i64, i64), tokio_postgres::Error> {
    let row = client
        .query_one(
            r#"
        SELECT
            COALESCE(SUM(sendable_delta), 0)::BIGINT AS sendable,
            COALESCE(SUM(non_sendable_delta), 0)::BIGINT AS non_sendable,
            COALESCE(SUM(pending_delta), 0)::BIGINT AS pending
        FROM transactions
        WHERE user_id = $1 AND status = 'completed'
        "#,
            &[&user_id],
        )
        .await?;

    Ok((
        row.get("sendable"),
        row.get("non_sendable"),
        row.get("pending"),
    ))
}

// ============================================
// MINING SESSION QUERIES
// ============================================

/// Open a session. Returns `false` when the partial unique index on open
/// sessions rejected the insert (a session is already open).
pub async fn session_insert(
    client: &impl GenericClient,
    session: &MiningSessionRecord,
) -> Result<bool, tokio_postgres::Error> {
    let rows = client
        .execute(
            r#"
        INSERT INTO mining_sessions (
            id, user_id, started_at, completed_at, mining_rate, tokens_earned, capped
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (user_id) WHERE completed_at IS NULL DO NOTHING
        "#,
            &[
                &session.id,
                &session.user_id,
                &session.started_at,
                &session.completed_at,
                &session.mining_rate,
                &session.tokens_earned,
                &session.capped,
            ],
        )
        .await?;

    Ok(rows == 1)
}

/// The user's open session, if any.
pub async fn session_get_open(
    client: &impl GenericClient,
    user_id: &str,
) -> Result<Option<MiningSessionRecord>, tokio_postgres::Error> {
    let rows = client
        .query(
            r#"
        SELECT id, user_id, started_at, completed_at, mining_rate, tokens_earned, capped
        FROM mining_sessions
        WHERE user_id = $1 AND completed_at IS NULL
        "#,
            &[&user_id],
        )
        .await?;

    Ok(rows.first().map(row_to_session))
}

/// Open sessions started before the cutoff (stale-session sweep).
pub async fn session_list_stale(
    client: &impl GenericClient,
    cutoff: DateTime<Utc>,
    limit: i64,
) -> Result<Vec<MiningSessionRecord>, tokio_postgres::Error> {
    let rows = client
        .query(
            r#"
        SELECT id, user_id, started_at, completed_at, mining_rate, tokens_earned, capped
        FROM mining_sessions
        WHERE completed_at IS NULL AND started_at < $1
        ORDER BY started_at ASC
        LIMIT $2
        "#,
            &[&cutoff, &limit],
        )
        .await?;

    Ok(rows.iter().map(row_to_session).collect())
}

/// Close a session. Returns 0 rows if it was already closed (lost race).
pub async fn session_close(
    client: &impl GenericClient,
    session_id: Uuid,
    tokens_earned: i64,
    capped: bool,
    completed_at: DateTime<Utc>,
) -> Result<u64, tokio_postgres::Error> {
    client
        .execute(
            r#"
        UPDATE mining_sessions
        SET completed_at = $2, tokens_earned = $3, capped = $4
        WHERE id = $1 AND completed_at IS NULL
        "#,
            &[&session_id, &completed_at, &tokens_earned, &capped],
        )
        .await
}

// ============================================
// REFERRAL QUERIES
// ============================================

/// Record a pending referral. Returns `false` if the pair exists.
pub async fn referral_insert(
    client: &impl GenericClient,
    referral: &ReferralRecord,
) -> Result<bool, tokio_postgres::Error> {
    let rows = client
        .execute(
            r#"
        INSERT INTO referrals (
            referrer_id, referee_id, status, reward_amount,
            created_at, completed_at, rewarded_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7)
        ON CONFLICT (referrer_id, referee_id) DO NOTHING
        "#,
            &[
                &referral.referrer_id,
                &referral.referee_id,
                &referral.status,
                &referral.reward_amount,
                &referral.created_at,
                &referral.completed_at,
                &referral.rewarded_at,
            ],
        )
        .await?;

    Ok(rows == 1)
}

/// Fetch a referral pair.
pub async fn referral_get(
    client: &impl GenericClient,
    referrer_id: &str,
    referee_id: &str,
) -> Result<Option<ReferralRecord>, tokio_postgres::Error> {
    let rows = client
        .query(
            r#"
        SELECT referrer_id, referee_id, status, reward_amount,
               created_at, completed_at, rewarded_at
        FROM referrals
        WHERE referrer_id = $1 AND referee_id = $2
        "#,
            &[&referrer_id, &referee_id],
        )
        .await?;

    Ok(rows.first().map(row_to_referral))
}

/// Transition `pending → completed`. Returns rows touched (0 or 1).
pub async fn referral_complete(
    client: &impl GenericClient,
    referrer_id: &str,
    referee_id: &str,
    at: DateTime<Utc>,
) -> Result<u64, tokio_postgres::Error> {
    client
        .execute(
            r#"
        UPDATE referrals
        SET status = 'completed', completed_at = $3
        WHERE referrer_id = $1 AND referee_id = $2 AND status = 'pending'
        "#,
            &[&referrer_id, &referee_id, &at],
        )
        .await
}

/// Transition `completed → rewarded`. Returns rows touched (0 or 1);
/// 0 means the pair was already rewarded (or not eligible) and the
/// surrounding transaction must not pay out.
pub async fn referral_mark_rewarded(
    client: &impl GenericClient,
    referrer_id: &str,
    referee_id: &str,
    at: DateTime<Utc>,
) -> Result<u64, tokio_postgres::Error> {
    client
        .execute(
            r#"
        UPDATE referrals
        SET status = 'rewarded', rewarded_at = $3
        WHERE referrer_id = $1 AND referee_id = $2 AND status = 'completed'
        "#,
            &[&referrer_id, &referee_id, &at],
        )
        .await
}

// ============================================
// TASK CLAIM QUERIES
// ============================================

/// Insert a task claim. Returns `false` when the `(user, task)` row
/// already exists; this is the at-most-once guard.
pub async fn task_claim_insert(
    client: &impl GenericClient,
    claim: &TaskClaimRecord,
) -> Result<bool, tokio_postgres::Error> {
    let rows = client
        .execute(
            r#"
        INSERT INTO task_claims (
            user_id, task_id, reward_amount, transaction_id, claimed_at
        )
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, task_id) DO NOTHING
        "#,
            &[
                &claim.user_id,
                &claim.task_id,
                &claim.reward_amount,
                &claim.transaction_id,
                &claim.claimed_at,
            ],
        )
        .await?;

    Ok(rows == 1)
}

// ============================================
// RECONCILIATION QUERIES
// ============================================

/// Log a reconciliation event.
pub async fn reconciliation_insert(
    client: &impl GenericClient,
    log: &ReconciliationLog,
) -> Result<(), tokio_postgres::Error> {
    client
        .execute(
            r#"
        INSERT INTO reconciliation_logs (
            id, user_id, cached_sendable, cached_non_sendable, cached_pending,
            computed_sendable, computed_non_sendable, computed_pending,
            difference, auto_fixed, notes, created_at
        )
        VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12)
        "#,
            &[
                &log.id,
                &log.user_id,
                &log.cached_sendable,
                &log.cached_non_sendable,
                &log.cached_pending,
                &log.computed_sendable,
                &log.computed_non_sendable,
                &log.computed_pending,
                &log.difference,
                &log.auto_fixed,
                &log.notes,
                &log.created_at,
            ],
        )
        .await?;

    Ok(())
}

// ============================================
// IDEMPOTENCY QUERIES
// ============================================

/// Record an idempotency key.
pub async fn idempotency_insert(
    client: &impl GenericClient,
    record: &IdempotencyRecord,
) -> Result<(), tokio_postgres::Error> {
    client
        .execute(
            r#"
        INSERT INTO idempotency_keys (
            user_id, idem_key, operation, transaction_id, created_at
        )
        VALUES ($1, $2, $3, $4, $5)
        ON CONFLICT (user_id, idem_key) DO NOTHING
        "#,
            &[
                &record.user_id,
                &record.idem_key,
                &record.operation,
                &record.transaction_id,
                &record.created_at,
            ],
        )
        .await?;

    Ok(())
}

/// Look up an idempotency key.
pub async fn idempotency_get(
    client: &impl GenericClient,
    user_id: &str,
    idem_key: &str,
) -> Result<Option<IdempotencyRecord>, tokio_postgres::Error> {
    let rows = client
        .query(
            r#"
        SELECT user_id, idem_key, operation, transaction_id, created_at
        FROM idempotency_keys
        WHERE user_id = $1 AND idem_key = $2
        "#,
            &[&user_id, &idem_key],
        )
        .await?;

    Ok(rows.first().map(|row| IdempotencyRecord {
        user_id: row.get("user_id"),
        idem_key: row.get("idem_key"),
        operation: row.get("operation"),
        transaction_id: row.get("transaction_id"),
        created_at: row.get("created_at"),
    }))
}

// ============================================
// NETWORK STATS QUERIES
// ============================================

/// Aggregate circulation stats across all wallets.
///
/// Returns `(total_sendable, total_non_sendable, total_pending, wallet_count)`.
pub async fn network_totals(
    client: &impl GenericClient,
) -> Result<(i64, i64, i64, i64), tokio_postgres::Error> {
    let row = client
        .query_one(
            r#"
        SELECT
            COALESCE(SUM(sendable_balance), 0)::BIGINT AS total_sendable,
            COALESCE(SUM(non_sendable_balance), 0)::BIGINT AS total_non_sendable,
            COALESCE(SUM(pending_balance), 0)::BIGINT AS total_pending,
            COUNT(*) AS wallet_count
        FROM wallets
        "#,
            &[],
        )
        .await?;

    Ok((
        row.get("total_sendable"),
        row.get("total_non_sendable"),
        row.get("total_pending"),
        row.get("wallet_count"),
    ))
}
