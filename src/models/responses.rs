//! # API Response Models
//!
//! Structures for outgoing API response bodies.
//! All responses are wrapped in a standard format.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db::{MiningSessionRecord, ReferralRecord, TransactionRecord, WalletRecord};
use crate::services::ReconcileReport;
use crate::store::NetworkTotals;
use crate::utils::format_celf;

/// Standard API response wrapper.
///
/// All API responses follow this format:
///
/// ## Success Response
///
/// ```json
/// {
///     "success": true,
///     "data": { ... },
///     "error": null
/// }
/// ```
///
/// ## Error Response
///
/// ```json
/// {
///     "success": false,
///     "data": null,
///     "error": {
///         "code": "INSUFFICIENT_FUNDS",
///         "message": "Insufficient sendable balance: available 0, requested 1000000"
///     }
/// }
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiResponse<T> {
    /// Whether the request was successful.
    pub success: bool,

    /// Response data (null on error).
    pub data: Option<T>,

    /// Error information (null on success).
    pub error: Option<ApiError>,
}

impl<T> ApiResponse<T> {
    /// Create a successful response with data.
    pub fn success(data: T) -> Self {
        Self {
            success: true,
            data: Some(data),
            error: None,
        }
    }

    /// Create an error response.
    pub fn error(code: &str, message: &str) -> Self {
        Self {
            success: false,
            data: None,
            error: Some(ApiError {
                code: code.to_string(),
                message: message.to_string(),
            }),
        }
    }
}

/// API error information.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ApiError {
    /// Error code (e.g., "INSUFFICIENT_FUNDS").
    pub code: String,

    /// Human-readable error message.
    pub message: String,
}

/// Wallet balance snapshot.
///
/// Returned by `GET /wallet/balance/{user}` and embedded in every
/// mutating response so clients always see the post-operation state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BalanceResponse {
    /// Wallet owner.
    pub user_id: String,

    /// Transferable balance (micro-CELF).
    pub sendable_balance: i64,

    /// Earned-but-locked balance (micro-CELF).
    pub non_sendable_balance: i64,

    /// Escrowed balance (micro-CELF).
    pub pending_balance: i64,

    /// Total balance (micro-CELF).
    pub total_balance: i64,

    /// Receive address for incoming transfers.
    pub current_address: String,

    /// Admin freeze flag.
    pub is_locked: bool,

    /// Human-readable total (e.g., "12.500000 CELF").
    pub formatted_total: String,

    /// Human-readable sendable balance.
    pub formatted_sendable: String,

    /// Last balance-affecting activity.
    pub last_activity: DateTime<Utc>,

    /// When the wallet was created.
    pub created_at: DateTime<Utc>,
}

impl From<WalletRecord> for BalanceResponse {
    fn from(wallet: WalletRecord) -> Self {
        Self {
            formatted_total: format_celf(wallet.total_balance),
            formatted_sendable: format_celf(wallet.sendable_balance),
            user_id: wallet.user_id,
            sendable_balance: wallet.sendable_balance,
            non_sendable_balance: wallet.non_sendable_balance,
            pending_balance: wallet.pending_balance,
            total_balance: wallet.total_balance,
            current_address: wallet.current_address,
            is_locked: wallet.is_locked,
            last_activity: wallet.last_activity,
            created_at: wallet.created_at,
        }
    }
}

/// One ledger transaction.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionResponse {
    /// Transaction id.
    pub id: Uuid,

    /// The wallet the row touches.
    pub user_id: String,

    /// Transaction kind.
    pub kind: String,

    /// Other party, for transfers.
    pub counterparty: Option<String>,

    /// Amount (positive, micro-CELF).
    pub amount: i64,

    /// Fee charged (micro-CELF).
    pub fee: i64,

    /// Human-readable amount.
    pub formatted_amount: String,

    /// Lifecycle status.
    pub status: String,

    /// Optional caller note.
    pub memo: Option<String>,

    /// Wallet total before the row.
    pub balance_before: i64,

    /// Wallet total after the row.
    pub balance_after: i64,

    /// When the transaction was initiated.
    pub created_at: DateTime<Utc>,
}

impl From<TransactionRecord> for TransactionResponse {
    fn from(tx: TransactionRecord) -> Self {
        Self {
            formatted_amount: format_celf(tx.amount),
            id: tx.id,
            user_id: tx.user_id,
            kind: tx.kind,
            counterparty: tx.counterparty,
            amount: tx.amount,
            fee: tx.fee,
            status: tx.status,
            memo: tx.memo,
            balance_before: tx.balance_before,
            balance_after: tx.balance_after,
            created_at: tx.created_at,
        }
    }
}

/// A page of transaction history.
///
/// Returned by `GET /wallet/transactions/{user}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionListResponse {
    /// The page, newest first.
    pub transactions: Vec<TransactionResponse>,

    /// 1-based page number.
    pub page: i64,

    /// Rows per page.
    pub page_size: i64,

    /// Total rows for the wallet.
    pub total: i64,
}

/// A committed balance mutation plus the post-operation balance.
///
/// Returned by transfer and exchange.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitResponse {
    /// The primary ledger row.
    pub transaction_id: Uuid,

    /// Row status (always `completed` on success).
    pub status: String,

    /// True when an idempotency key replayed an earlier execution.
    pub replayed: bool,

    /// Post-operation balance snapshot.
    pub balance: BalanceResponse,
}

/// An open mining session.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionResponse {
    /// Session id.
    pub session_id: Uuid,

    /// The mining user.
    pub user_id: String,

    /// Server-side start instant; the client countdown derives from
    /// this, never the other way around.
    pub started_at: DateTime<Utc>,

    /// Accrual rate (micro-CELF/hour).
    pub mining_rate: i64,

    /// Human-readable rate.
    pub formatted_rate: String,
}

impl From<MiningSessionRecord> for SessionResponse {
    fn from(session: MiningSessionRecord) -> Self {
        Self {
            formatted_rate: format!("{}/h", format_celf(session.mining_rate)),
            session_id: session.id,
            user_id: session.user_id,
            started_at: session.started_at,
            mining_rate: session.mining_rate,
        }
    }
}

/// Result of stopping a mining session.
///
/// Returned by `POST /mining/stop`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMiningResponse {
    /// Tokens credited (micro-CELF).
    pub tokens_earned: i64,

    /// Human-readable earnings.
    pub formatted_earned: String,

    /// Whether the session ceiling was applied.
    pub capped: bool,

    /// The `mining` ledger row, when anything was credited.
    pub transaction_id: Option<Uuid>,

    /// True when an idempotency key replayed an earlier stop.
    pub replayed: bool,

    /// Post-operation balance snapshot.
    pub balance: BalanceResponse,
}

/// Server-authoritative mining status.
///
/// Returned by `GET /mining/status/{user}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MiningStatusResponse {
    /// Whether a session is open.
    pub active: bool,

    /// The open session, if any.
    pub session: Option<SessionResponse>,

    /// What the session would pay if stopped now (micro-CELF).
    pub current_estimate: i64,

    /// Whether the estimate is already at the session ceiling.
    pub at_ceiling: bool,
}

/// A referral pair and its lifecycle state.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralResponse {
    /// The referring user.
    pub referrer_id: String,

    /// The referred user.
    pub referee_id: String,

    /// `pending`, `completed` or `rewarded`.
    pub status: String,

    /// Bonus amount (micro-CELF).
    pub reward_amount: i64,

    /// When the referral was recorded.
    pub created_at: DateTime<Utc>,
}

impl From<ReferralRecord> for ReferralResponse {
    fn from(referral: ReferralRecord) -> Self {
        Self {
            referrer_id: referral.referrer_id,
            referee_id: referral.referee_id,
            status: referral.status,
            reward_amount: referral.reward_amount,
            created_at: referral.created_at,
        }
    }
}

/// Result of a reward claim.
///
/// `status` is `claimed` or `already_claimed`. A repeated claim is a
/// tagged outcome, not an error and not a second credit.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimResponse {
    /// `claimed` or `already_claimed`.
    pub status: String,

    /// The reward ledger row, when this call (or the replayed original)
    /// paid it.
    pub transaction_id: Option<Uuid>,

    /// True when an idempotency key replayed an earlier claim.
    pub replayed: bool,

    /// Post-operation balance snapshot.
    pub balance: BalanceResponse,
}

/// One side of a reconciliation comparison.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BucketsDto {
    /// Sendable bucket (micro-CELF).
    pub sendable: i64,
    /// Non-sendable bucket (micro-CELF).
    pub non_sendable: i64,
    /// Pending bucket (micro-CELF).
    pub pending: i64,
}

/// Result of reconciling one wallet.
///
/// Returned by `POST /admin/reconcile/{user}`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReconcileResponse {
    /// The audited wallet.
    pub user_id: String,

    /// Whether cache and ledger agree.
    pub ok: bool,

    /// Cached buckets.
    pub cached: BucketsDto,

    /// Buckets recomputed from the ledger.
    pub computed: BucketsDto,

    /// Total difference (computed - cached).
    pub difference: i64,

    /// Whether the cache was corrected in place.
    pub auto_fixed: bool,
}

impl From<ReconcileReport> for ReconcileResponse {
    fn from(report: ReconcileReport) -> Self {
        Self {
            user_id: report.user_id,
            ok: report.ok,
            cached: BucketsDto {
                sendable: report.cached.0,
                non_sendable: report.cached.1,
                pending: report.cached.2,
            },
            computed: BucketsDto {
                sendable: report.computed.0,
                non_sendable: report.computed.1,
                pending: report.computed.2,
            },
            difference: report.difference,
            auto_fixed: report.auto_fixed,
        }
    }
}

/// Aggregate circulation stats.
///
/// Returned by `GET /network/stats`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NetworkStatsResponse {
    /// Total circulating supply (micro-CELF).
    pub total_supply: i64,

    /// Sum of sendable balances.
    pub total_sendable: i64,

    /// Sum of non-sendable balances.
    pub total_non_sendable: i64,

    /// Sum of pending balances.
    pub total_pending: i64,

    /// Number of wallets.
    pub wallet_count: i64,

    /// Human-readable supply.
    pub formatted_supply: String,
}

impl From<NetworkTotals> for NetworkStatsResponse {
    fn from(totals: NetworkTotals) -> Self {
        Self {
            total_supply: totals.total(),
            formatted_supply: format_celf(totals.total()),
            total_sendable: totals.total_sendable,
            total_non_sendable: totals.total_non_sendable,
            total_pending: totals.total_pending,
            wallet_count: totals.wallet_count,
        }
    }
}

/// Health check result.
///
/// Returned by `GET /health`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HealthResponse {
    /// `healthy` or `unhealthy`.
    pub status: String,

    /// Whether the storage backend answered the probe.
    pub storage: bool,

    /// Service version.
    pub version: String,

    /// When the check ran.
    pub timestamp: DateTime<Utc>,
}
