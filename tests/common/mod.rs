//! Shared harness for the integration suites: services wired over the
//! in-memory store, plus ledger-consistent balance seeding.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use celf_wallet_backend::config::AppConfig;
use celf_wallet_backend::db::{MiningSessionRecord, TransactionRecord, WalletRecord};
use celf_wallet_backend::services::{
    BalanceAuditor, MiningService, RewardService, StaticTaskCatalog, WalletLocks, WalletService,
};
use celf_wallet_backend::store::{LedgerCommit, LedgerStore, MemStore, WalletUpdate};

/// Everything a test needs, wired over one MemStore.
pub struct Harness {
    pub store: Arc<dyn LedgerStore>,
    pub wallets: WalletService,
    pub mining: MiningService,
    pub rewards: RewardService,
    pub auditor: BalanceAuditor,
    pub config: AppConfig,
}

/// Build a harness with the default test configuration.
pub fn harness() -> Harness {
    harness_with(AppConfig::for_tests())
}

/// Build a harness with a customized configuration.
pub fn harness_with(config: AppConfig) -> Harness {
    let store: Arc<dyn LedgerStore> = Arc::new(MemStore::new());
    let locks = WalletLocks::new(
        config.lock_attempts,
        std::time::Duration::from_millis(config.lock_wait_ms),
    );
    let catalog = Arc::new(StaticTaskCatalog::new(config.task_reward));

    Harness {
        wallets: WalletService::new(store.clone(), locks.clone(), config.clone()),
        mining: MiningService::new(store.clone(), locks.clone(), config.clone()),
        rewards: RewardService::new(store.clone(), locks.clone(), catalog, config.clone()),
        auditor: BalanceAuditor::new(store.clone(), locks.clone(), config.clone()),
        store,
        config,
    }
}

/// Create a wallet and seed its buckets through proper ledger commits, so
/// the reconciliation invariant holds from the start.
pub async fn funded_wallet(
    h: &Harness,
    user_id: &str,
    sendable: i64,
    non_sendable: i64,
) -> WalletRecord {
    h.wallets.create_wallet(user_id, None).await.unwrap();
    seed_balance(h, user_id, sendable, non_sendable).await;
    h.store.get_wallet(user_id).await.unwrap().unwrap()
}

/// Credit buckets via `bonus` ledger rows (ledger stays explanatory).
pub async fn seed_balance(h: &Harness, user_id: &str, sendable: i64, non_sendable: i64) {
    if sendable <= 0 && non_sendable <= 0 {
        return;
    }

    let wallet = h.store.get_wallet(user_id).await.unwrap().unwrap();
    let now = Utc::now();
    let mut transactions = Vec::new();
    let mut running_total = wallet.total_balance;

    if sendable > 0 {
        transactions.push(bonus_tx(user_id, sendable, sendable, 0, running_total, now));
        running_total += sendable;
    }
    if non_sendable > 0 {
        transactions.push(bonus_tx(
            user_id,
            non_sendable,
            0,
            non_sendable,
            running_total,
            now,
        ));
        running_total += non_sendable;
    }

    let commit = LedgerCommit {
        transactions,
        wallet_updates: vec![WalletUpdate {
            user_id: user_id.to_string(),
            expected_version: wallet.version,
            sendable_balance: wallet.sendable_balance + sendable.max(0),
            non_sendable_balance: wallet.non_sendable_balance + non_sendable.max(0),
            pending_balance: wallet.pending_balance,
            total_balance: running_total,
            last_activity: now,
        }],
        idempotency: None,
    };

    h.store.commit(commit).await.unwrap();
}

fn bonus_tx(
    user_id: &str,
    amount: i64,
    sendable_delta: i64,
    non_sendable_delta: i64,
    balance_before: i64,
    at: DateTime<Utc>,
) -> TransactionRecord {
    TransactionRecord {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        kind: "bonus".to_string(),
        counterparty: None,
        amount,
        fee: 0,
        status: "completed".to_string(),
        source_ref: Some("test-seed".to_string()),
        memo: None,
        sendable_delta,
        non_sendable_delta,
        pending_delta: 0,
        balance_before,
        balance_after: balance_before + amount,
        created_at: at,
        processed_at: Some(at),
    }
}

/// Open a mining session directly in the store with a back-dated start,
/// simulating elapsed time without sleeping.
pub async fn backdated_session(
    h: &Harness,
    user_id: &str,
    rate: i64,
    started_secs_ago: i64,
) -> MiningSessionRecord {
    let session = MiningSessionRecord {
        id: Uuid::new_v4(),
        user_id: user_id.to_string(),
        started_at: Utc::now() - chrono::Duration::seconds(started_secs_ago),
        completed_at: None,
        mining_rate: rate,
        tokens_earned: 0,
        capped: false,
    };
    h.store.open_session(&session).await.unwrap();
    session
}

/// Assert the wallet's cached buckets match the ledger and itself.
pub async fn assert_reconciles(h: &Harness, user_id: &str) {
    let report = h.auditor.reconcile_wallet(user_id).await.unwrap();
    assert!(
        report.ok,
        "wallet {} fails reconciliation: cached {:?}, computed {:?}",
        user_id, report.cached, report.computed
    );
}
