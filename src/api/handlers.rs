//! # API Request Handlers
//!
//! This module contains the handler functions for each API endpoint.
//! Each handler:
//! 1. Extracts request data (and the optional `Idempotency-Key` header)
//! 2. Calls the appropriate service
//! 3. Wraps the result in the standard envelope
//!
//! ## Error Handling
//!
//! Ledger errors map to stable codes and HTTP statuses:
//!
//! | Class | Status | Codes |
//! |-------|--------|-------|
//! | Validation | 400 | `INVALID_AMOUNT`, `INVALID_USER_ID`, `SELF_TRANSFER`, `MALFORMED_ADDRESS` |
//! | Not found | 404 | `WALLET_NOT_FOUND` |
//! | State conflict | 409 | `INSUFFICIENT_FUNDS`, `WALLET_LOCKED`, `ALREADY_MINING`, `NO_ACTIVE_SESSION`, `ALREADY_CLAIMED`, `NOT_ELIGIBLE`, `WALLET_EXISTS` |
//! | Contention | 503 | `TRY_AGAIN` |
//! | Storage | 500 | `STORAGE_ERROR` |

use std::sync::Arc;

use actix_web::http::StatusCode;
use actix_web::{web, HttpRequest, HttpResponse};
use chrono::Utc;
use serde_json::json;
use tracing::{error, info};

use crate::ledger::LedgerError;
use crate::models::{
    ApiResponse, BalanceResponse, ClaimResponse, ClaimTaskRequest, CommitResponse,
    CreateWalletRequest, ExchangeRequest, HealthResponse, MiningStatusResponse,
    NetworkStatsResponse, ReconcileResponse, ReferralRequest, ReferralResponse, SessionResponse,
    SetWalletLockRequest, StartMiningRequest, StopMiningRequest, StopMiningResponse,
    TransactionListResponse, TransactionQuery, TransferRequest,
};
use crate::services::ClaimResult;
use crate::AppState;

/// Map a ledger error to its HTTP response.
fn error_response(err: &LedgerError) -> HttpResponse {
    let status = match err {
        LedgerError::InvalidAmount(_)
        | LedgerError::InvalidUserId(_)
        | LedgerError::SelfTransfer
        | LedgerError::MalformedAddress(_) => StatusCode::BAD_REQUEST,
        LedgerError::WalletNotFound(_) => StatusCode::NOT_FOUND,
        LedgerError::WalletExists(_)
        | LedgerError::WalletLocked(_)
        | LedgerError::InsufficientFunds { .. }
        | LedgerError::AlreadyMining
        | LedgerError::NoActiveSession
        | LedgerError::AlreadyClaimed
        | LedgerError::NotEligible(_) => StatusCode::CONFLICT,
        LedgerError::TryAgain => StatusCode::SERVICE_UNAVAILABLE,
        LedgerError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };

    if status == StatusCode::INTERNAL_SERVER_ERROR {
        error!("Storage failure surfaced to API: {}", err);
    }

    HttpResponse::build(status).json(ApiResponse::<()>::error(err.code(), &err.to_string()))
}

/// The optional `Idempotency-Key` request header.
fn idem_key(req: &HttpRequest) -> Option<String> {
    req.headers()
        .get("Idempotency-Key")
        .and_then(|value| value.to_str().ok())
        .map(|value| value.to_string())
}

/// API information endpoint (root).
///
/// ## Endpoint
///
/// `GET /`
pub async fn api_info() -> HttpResponse {
    let info = json!({
        "name": "CELF Wallet Ledger API",
        "version": env!("CARGO_PKG_VERSION"),
        "description": "Wallet ledger and mining accrual engine",
        "endpoints": {
            "wallet": ["/wallet/create", "/wallet/balance/{user}", "/wallet/transfer",
                       "/wallet/exchange", "/wallet/transactions/{user}"],
            "mining": ["/mining/start", "/mining/stop", "/mining/status/{user}"],
            "rewards": ["/rewards/referral/claim", "/rewards/task/claim"],
            "referrals": ["/referrals", "/referrals/complete"],
            "admin": ["/admin/reconcile/{user}", "/admin/wallet/{user}/lock"],
            "misc": ["/health", "/network/stats"]
        }
    });

    HttpResponse::Ok().json(ApiResponse::success(info))
}

/// Health check endpoint.
///
/// ## Endpoint
///
/// `GET /health`
pub async fn health_check(state: web::Data<Arc<AppState>>) -> HttpResponse {
    let storage_healthy = state.store.ping().await.is_ok();

    let response = HealthResponse {
        status: if storage_healthy {
            "healthy"
        } else {
            "unhealthy"
        }
        .to_string(),
        storage: storage_healthy,
        version: env!("CARGO_PKG_VERSION").to_string(),
        timestamp: Utc::now(),
    };

    let status_code = if storage_healthy {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    HttpResponse::build(status_code).json(ApiResponse::success(response))
}

// ==========================================
// WALLET HANDLERS
// ==========================================

/// Create the wallet for a newly registered user.
///
/// ## Endpoint
///
/// `POST /wallet/create`
///
/// ```json
/// { "userId": "user-123", "referrerId": "user-007" }
/// ```
pub async fn create_wallet(
    state: web::Data<Arc<AppState>>,
    body: web::Json<CreateWalletRequest>,
) -> HttpResponse {
    info!("Create wallet request for: {}", body.user_id);

    match state
        .wallets
        .create_wallet(&body.user_id, body.referrer_id.as_deref())
        .await
    {
        Ok(wallet) => HttpResponse::Ok().json(ApiResponse::success(BalanceResponse::from(wallet))),
        Err(e) => error_response(&e),
    }
}

/// Get a wallet's balance snapshot.
///
/// ## Endpoint
///
/// `GET /wallet/balance/{user}`
pub async fn get_balance(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    let user_id = path.into_inner();

    match state.wallets.get_balance(&user_id).await {
        Ok(wallet) => HttpResponse::Ok().json(ApiResponse::success(BalanceResponse::from(wallet))),
        Err(e) => error_response(&e),
    }
}

/// Send CELF to another user.
///
/// ## Endpoint
///
/// `POST /wallet/transfer`
///
/// ```json
/// {
///     "fromUserId": "user-123",
///     "destination": "celfb3Jf2kD0aQx9TmV1nYwQzg",
///     "amount": 2500000,
///     "memo": "lunch"
/// }
/// ```
///
/// Amounts are micro-CELF: 2500000 = 2.5 CELF. Retries should resend the
/// same `Idempotency-Key` header to avoid double-sending.
pub async fn transfer(
    state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<TransferRequest>,
) -> HttpResponse {
    let key = idem_key(&req);

    let result = state
        .wallets
        .transfer(
            &body.from_user_id,
            &body.destination,
            body.amount,
            body.memo.clone(),
            key.as_deref(),
        )
        .await;

    match result {
        Ok(op) => {
            let balance = match state.wallets.get_balance(&body.from_user_id).await {
                Ok(wallet) => BalanceResponse::from(wallet),
                Err(e) => return error_response(&e),
            };
            HttpResponse::Ok().json(ApiResponse::success(CommitResponse {
                transaction_id: op.transaction.id,
                status: op.transaction.status.clone(),
                replayed: op.replayed,
                balance,
            }))
        }
        Err(e) => error_response(&e),
    }
}

/// Convert earned balance into sendable balance.
///
/// ## Endpoint
///
/// `POST /wallet/exchange`
///
/// ```json
/// { "userId": "user-123", "amount": 10000000 }
/// ```
pub async fn exchange(
    state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<ExchangeRequest>,
) -> HttpResponse {
    let key = idem_key(&req);

    let result = state
        .wallets
        .exchange(&body.user_id, body.amount, key.as_deref())
        .await;

    match result {
        Ok(op) => {
            let balance = match state.wallets.get_balance(&body.user_id).await {
                Ok(wallet) => BalanceResponse::from(wallet),
                Err(e) => return error_response(&e),
            };
            HttpResponse::Ok().json(ApiResponse::success(CommitResponse {
                transaction_id: op.transaction.id,
                status: op.transaction.status.clone(),
                replayed: op.replayed,
                balance,
            }))
        }
        Err(e) => error_response(&e),
    }
}

/// Get transaction history for a wallet.
///
/// ## Endpoint
///
/// `GET /wallet/transactions/{user}?page=1&pageSize=20`
pub async fn get_transactions(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    query: web::Query<TransactionQuery>,
) -> HttpResponse {
    let user_id = path.into_inner();
    let page = query.page.unwrap_or(1).max(1);
    let page_size = query.page_size.unwrap_or(20);

    match state
        .wallets
        .list_transactions(&user_id, page, page_size)
        .await
    {
        Ok((transactions, total)) => {
            HttpResponse::Ok().json(ApiResponse::success(TransactionListResponse {
                transactions: transactions.into_iter().map(Into::into).collect(),
                page,
                page_size: page_size.clamp(1, 100),
                total,
            }))
        }
        Err(e) => error_response(&e),
    }
}

// ==========================================
// MINING HANDLERS
// ==========================================

/// Open a mining session.
///
/// ## Endpoint
///
/// `POST /mining/start`
///
/// ```json
/// { "userId": "user-123", "rate": 1000000 }
/// ```
pub async fn start_mining(
    state: web::Data<Arc<AppState>>,
    body: web::Json<StartMiningRequest>,
) -> HttpResponse {
    match state.mining.start_mining(&body.user_id, body.rate).await {
        Ok(session) => {
            HttpResponse::Ok().json(ApiResponse::success(SessionResponse::from(session)))
        }
        Err(e) => error_response(&e),
    }
}

/// Close the open mining session and credit the accrual.
///
/// ## Endpoint
///
/// `POST /mining/stop`
///
/// ```json
/// { "userId": "user-123" }
/// ```
pub async fn stop_mining(
    state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<StopMiningRequest>,
) -> HttpResponse {
    let key = idem_key(&req);

    let result = state
        .mining
        .stop_mining(&body.user_id, key.as_deref())
        .await;

    match result {
        Ok(outcome) => {
            let balance = match state.wallets.get_balance(&body.user_id).await {
                Ok(wallet) => BalanceResponse::from(wallet),
                Err(e) => return error_response(&e),
            };
            HttpResponse::Ok().json(ApiResponse::success(StopMiningResponse {
                tokens_earned: outcome.tokens_earned,
                formatted_earned: crate::utils::format_celf(outcome.tokens_earned),
                capped: outcome.capped,
                transaction_id: outcome.transaction.as_ref().map(|tx| tx.id),
                replayed: outcome.replayed,
                balance,
            }))
        }
        Err(e) => error_response(&e),
    }
}

/// Server-authoritative view of the user's open session.
///
/// The mobile countdown is a pure display over `startedAt` and
/// `miningRate` from this endpoint; the server never accepts a
/// client-computed duration.
///
/// ## Endpoint
///
/// `GET /mining/status/{user}`
pub async fn mining_status(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
) -> HttpResponse {
    let user_id = path.into_inner();

    match state.mining.mining_status(&user_id).await {
        Ok(Some(status)) => HttpResponse::Ok().json(ApiResponse::success(MiningStatusResponse {
            active: true,
            session: Some(SessionResponse::from(status.session)),
            current_estimate: status.current_estimate,
            at_ceiling: status.at_ceiling,
        })),
        Ok(None) => HttpResponse::Ok().json(ApiResponse::success(MiningStatusResponse {
            active: false,
            session: None,
            current_estimate: 0,
            at_ceiling: false,
        })),
        Err(e) => error_response(&e),
    }
}

// ==========================================
// REFERRAL HANDLERS
// ==========================================

/// Record a pending referral (called at referee registration).
///
/// ## Endpoint
///
/// `POST /referrals`
pub async fn record_referral(
    state: web::Data<Arc<AppState>>,
    body: web::Json<ReferralRequest>,
) -> HttpResponse {
    match state
        .rewards
        .record_referral(&body.referrer_id, &body.referee_id)
        .await
    {
        Ok(referral) => {
            HttpResponse::Ok().json(ApiResponse::success(ReferralResponse::from(referral)))
        }
        Err(e) => error_response(&e),
    }
}

/// Mark a referral completed (the referee qualified).
///
/// ## Endpoint
///
/// `POST /referrals/complete`
pub async fn complete_referral(
    state: web::Data<Arc<AppState>>,
    body: web::Json<ReferralRequest>,
) -> HttpResponse {
    match state
        .rewards
        .complete_referral(&body.referrer_id, &body.referee_id)
        .await
    {
        Ok(referral) => {
            HttpResponse::Ok().json(ApiResponse::success(ReferralResponse::from(referral)))
        }
        Err(e) => error_response(&e),
    }
}

/// Build the claim response, fetching the claimant's fresh balance.
async fn claim_response(
    state: &AppState,
    claimant: &str,
    result: ClaimResult,
) -> HttpResponse {
    let balance = match state.wallets.get_balance(claimant).await {
        Ok(wallet) => BalanceResponse::from(wallet),
        Err(e) => return error_response(&e),
    };

    let response = match result {
        ClaimResult::Claimed {
            transaction,
            replayed,
        } => ClaimResponse {
            status: "claimed".to_string(),
            transaction_id: Some(transaction.id),
            replayed,
            balance,
        },
        ClaimResult::AlreadyClaimed => ClaimResponse {
            status: "already_claimed".to_string(),
            transaction_id: None,
            replayed: false,
            balance,
        },
    };

    HttpResponse::Ok().json(ApiResponse::success(response))
}

/// Pay a referral bonus to the referrer, at most once per pair.
///
/// ## Endpoint
///
/// `POST /rewards/referral/claim`
pub async fn claim_referral_reward(
    state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<ReferralRequest>,
) -> HttpResponse {
    let key = idem_key(&req);

    match state
        .rewards
        .claim_referral_reward(&body.referrer_id, &body.referee_id, key.as_deref())
        .await
    {
        Ok(result) => claim_response(&state, &body.referrer_id, result).await,
        Err(e) => error_response(&e),
    }
}

/// Pay a task completion bonus, at most once per `(user, task)`.
///
/// ## Endpoint
///
/// `POST /rewards/task/claim`
pub async fn claim_task_reward(
    state: web::Data<Arc<AppState>>,
    req: HttpRequest,
    body: web::Json<ClaimTaskRequest>,
) -> HttpResponse {
    let key = idem_key(&req);

    match state
        .rewards
        .claim_task_reward(&body.user_id, &body.task_id, key.as_deref())
        .await
    {
        Ok(result) => claim_response(&state, &body.user_id, result).await,
        Err(e) => error_response(&e),
    }
}

// ==========================================
// ADMIN HANDLERS
// ==========================================

/// Audit one wallet against its ledger.
///
/// ## Endpoint
///
/// `POST /admin/reconcile/{user}`
pub async fn reconcile(state: web::Data<Arc<AppState>>, path: web::Path<String>) -> HttpResponse {
    let user_id = path.into_inner();

    match state.auditor.reconcile_wallet(&user_id).await {
        Ok(report) => {
            HttpResponse::Ok().json(ApiResponse::success(ReconcileResponse::from(report)))
        }
        Err(e) => error_response(&e),
    }
}

/// Freeze or unfreeze a wallet.
///
/// ## Endpoint
///
/// `POST /admin/wallet/{user}/lock`
///
/// ```json
/// { "locked": true }
/// ```
pub async fn set_wallet_lock(
    state: web::Data<Arc<AppState>>,
    path: web::Path<String>,
    body: web::Json<SetWalletLockRequest>,
) -> HttpResponse {
    let user_id = path.into_inner();

    match state.wallets.set_wallet_locked(&user_id, body.locked).await {
        Ok(()) => match state.wallets.get_balance(&user_id).await {
            Ok(wallet) => {
                HttpResponse::Ok().json(ApiResponse::success(BalanceResponse::from(wallet)))
            }
            Err(e) => error_response(&e),
        },
        Err(e) => error_response(&e),
    }
}

// ==========================================
// NETWORK STATS
// ==========================================

/// Aggregate circulation stats.
///
/// ## Endpoint
///
/// `GET /network/stats`
pub async fn network_stats(state: web::Data<Arc<AppState>>) -> HttpResponse {
    match state.auditor.network_stats().await {
        Ok(totals) => {
            HttpResponse::Ok().json(ApiResponse::success(NetworkStatsResponse::from(totals)))
        }
        Err(e) => error_response(&e),
    }
}
