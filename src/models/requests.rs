//! # API Request Models
//!
//! Structures for incoming API request bodies. The authenticated user id
//! arrives in the body for service-to-service calls; the identity
//! collaborator in front of this API is responsible for having verified
//! it.

use serde::{Deserialize, Serialize};

/// Create the wallet for a newly registered user.
///
/// `POST /wallet/create`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateWalletRequest {
    /// The new user.
    pub user_id: String,

    /// Referring user, when the registration carried a referral code.
    #[serde(default)]
    pub referrer_id: Option<String>,
}

/// Send CELF to another user.
///
/// `POST /wallet/transfer`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRequest {
    /// The sending user.
    pub from_user_id: String,

    /// Receive address (`celf…`) or bare user id of the recipient.
    pub destination: String,

    /// Amount in micro-CELF (1 CELF = 1,000,000).
    pub amount: i64,

    /// Optional note carried on both ledger rows.
    #[serde(default)]
    pub memo: Option<String>,
}

/// Convert non-sendable balance into sendable balance.
///
/// `POST /wallet/exchange`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeRequest {
    /// The exchanging user.
    pub user_id: String,

    /// Amount in micro-CELF.
    pub amount: i64,
}

/// Open a mining session.
///
/// `POST /mining/start`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StartMiningRequest {
    /// The mining user.
    pub user_id: String,

    /// Requested rate in micro-CELF/hour. Clamped server-side; omitted
    /// means the configured base rate.
    #[serde(default)]
    pub rate: Option<i64>,
}

/// Close the open mining session.
///
/// `POST /mining/stop`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StopMiningRequest {
    /// The mining user.
    pub user_id: String,
}

/// A referral pair, used to record, complete and claim referrals.
///
/// `POST /referrals`, `POST /referrals/complete`,
/// `POST /rewards/referral/claim`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReferralRequest {
    /// The referring user.
    pub referrer_id: String,

    /// The referred user.
    pub referee_id: String,
}

/// Claim a completed task's reward.
///
/// `POST /rewards/task/claim`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimTaskRequest {
    /// The claiming user.
    pub user_id: String,

    /// The completed task.
    pub task_id: String,
}

/// Freeze or unfreeze a wallet.
///
/// `POST /admin/wallet/{user}/lock`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SetWalletLockRequest {
    /// True to freeze, false to unfreeze.
    pub locked: bool,
}

/// Pagination query for transaction history.
///
/// `GET /wallet/transactions/{user}?page=1&pageSize=20`
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransactionQuery {
    /// 1-based page number. Default 1.
    #[serde(default)]
    pub page: Option<i64>,

    /// Rows per page. Default 20, max 100.
    #[serde(default)]
    pub page_size: Option<i64>,
}
