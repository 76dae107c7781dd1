//! Concurrency properties: double-spend prevention, double-claim
//! prevention, session races. Services are cloned into racing tokio
//! tasks over one shared in-memory store; the per-wallet lock registry
//! is the component under test.

mod common;

use celf_wallet_backend::ledger::{LedgerError, UNITS_PER_CELF};
use celf_wallet_backend::services::ClaimResult;
use futures::future::join_all;

use common::*;

const CELF: i64 = UNITS_PER_CELF;

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_full_balance_transfers_spend_once() {
    let h = harness();
    funded_wallet(&h, "spender", 5 * CELF, 0).await;
    funded_wallet(&h, "sink", 0, 0).await;

    // N racing transfers, each for the whole balance.
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let wallets = h.wallets.clone();
            tokio::spawn(async move {
                wallets.transfer("spender", "sink", 5 * CELF, None, None).await
            })
        })
        .collect();

    let mut successes = 0;
    let mut shortfalls = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(_) => successes += 1,
            Err(LedgerError::InsufficientFunds { .. }) => shortfalls += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    // Exactly one winner, never two.
    assert_eq!(successes, 1);
    assert_eq!(shortfalls, 7);

    let spender = h.wallets.get_balance("spender").await.unwrap();
    let sink = h.wallets.get_balance("sink").await.unwrap();
    assert_eq!(spender.sendable_balance, 0);
    assert_eq!(sink.sendable_balance, 5 * CELF);

    assert_reconciles(&h, "spender").await;
    assert_reconciles(&h, "sink").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_task_claims_credit_once() {
    let h = harness();
    funded_wallet(&h, "worker", 0, 0).await;

    // A double-tapped claim button: same (user, task), no idempotency key.
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let rewards = h.rewards.clone();
            tokio::spawn(async move {
                rewards.claim_task_reward("worker", "daily-checkin", None).await
            })
        })
        .collect();

    let mut claimed = 0;
    let mut already = 0;
    for result in join_all(tasks).await {
        match result.unwrap().unwrap() {
            ClaimResult::Claimed { .. } => claimed += 1,
            ClaimResult::AlreadyClaimed => already += 1,
        }
    }

    assert_eq!(claimed, 1);
    assert_eq!(already, 7);

    let worker = h.wallets.get_balance("worker").await.unwrap();
    assert_eq!(worker.non_sendable_balance, h.config.task_reward);

    let (txs, _) = h.wallets.list_transactions("worker", 1, 50).await.unwrap();
    assert_eq!(txs.iter().filter(|t| t.kind == "task_reward").count(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_retries_with_one_key_credit_once() {
    let h = harness();
    funded_wallet(&h, "worker", 0, 0).await;

    // A retry storm: identical requests carrying the same key.
    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let rewards = h.rewards.clone();
            tokio::spawn(async move {
                rewards
                    .claim_task_reward("worker", "t1", Some("storm-key"))
                    .await
            })
        })
        .collect();

    let mut transaction_ids = Vec::new();
    for result in join_all(tasks).await {
        if let ClaimResult::Claimed { transaction, .. } = result.unwrap().unwrap() {
            transaction_ids.push(transaction.id);
        }
    }

    // Every response points at the same single payment.
    assert!(!transaction_ids.is_empty());
    assert!(transaction_ids.iter().all(|id| *id == transaction_ids[0]));

    let worker = h.wallets.get_balance("worker").await.unwrap();
    assert_eq!(worker.non_sendable_balance, h.config.task_reward);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_referral_claims_credit_once() {
    let h = harness();
    funded_wallet(&h, "referrer", 0, 0).await;
    h.wallets
        .create_wallet("referee", Some("referrer"))
        .await
        .unwrap();
    h.rewards
        .complete_referral("referrer", "referee")
        .await
        .unwrap();

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let rewards = h.rewards.clone();
            tokio::spawn(async move {
                rewards
                    .claim_referral_reward("referrer", "referee", None)
                    .await
            })
        })
        .collect();

    let mut claimed = 0;
    for result in join_all(tasks).await {
        if let ClaimResult::Claimed { .. } = result.unwrap().unwrap() {
            claimed += 1;
        }
    }
    assert_eq!(claimed, 1);

    let referrer = h.wallets.get_balance("referrer").await.unwrap();
    assert_eq!(referrer.non_sendable_balance, h.config.referral_reward);
    assert_reconciles(&h, "referrer").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_session_starts_open_one_session() {
    let h = harness();
    funded_wallet(&h, "miner", 0, 0).await;

    let tasks: Vec<_> = (0..8)
        .map(|_| {
            let mining = h.mining.clone();
            tokio::spawn(async move { mining.start_mining("miner", None).await })
        })
        .collect();

    let mut started = 0;
    let mut already = 0;
    for result in join_all(tasks).await {
        match result.unwrap() {
            Ok(_) => started += 1,
            Err(LedgerError::AlreadyMining) => already += 1,
            Err(other) => panic!("unexpected error: {other}"),
        }
    }

    assert_eq!(started, 1);
    assert_eq!(already, 7);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_exchanges_convert_once() {
    let h = harness();
    funded_wallet(&h, "user", 0, 10 * CELF).await;

    let tasks: Vec<_> = (0..4)
        .map(|_| {
            let wallets = h.wallets.clone();
            tokio::spawn(async move { wallets.exchange("user", 10 * CELF, None).await })
        })
        .collect();

    let mut successes = 0;
    for result in join_all(tasks).await {
        if result.unwrap().is_ok() {
            successes += 1;
        }
    }
    assert_eq!(successes, 1);

    let user = h.wallets.get_balance("user").await.unwrap();
    assert_eq!(user.sendable_balance, 10 * CELF);
    assert_eq!(user.non_sendable_balance, 0);
    assert_eq!(user.total_balance, 10 * CELF);
    assert_reconciles(&h, "user").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn opposing_transfers_make_progress_and_conserve_supply() {
    let h = harness();
    funded_wallet(&h, "a", 50 * CELF, 0).await;
    funded_wallet(&h, "b", 50 * CELF, 0).await;

    // a→b and b→a race in both directions; ordered locking must let
    // every one of them finish.
    let mut tasks = Vec::new();
    for i in 0..20 {
        let wallets = h.wallets.clone();
        let (from, to) = if i % 2 == 0 { ("a", "b") } else { ("b", "a") };
        tasks.push(tokio::spawn(async move {
            wallets.transfer(from, to, CELF, None, None).await
        }));
    }

    for result in join_all(tasks).await {
        result.unwrap().unwrap();
    }

    // 10 each way: both end where they started, supply unchanged.
    let a = h.wallets.get_balance("a").await.unwrap();
    let b = h.wallets.get_balance("b").await.unwrap();
    assert_eq!(a.sendable_balance, 50 * CELF);
    assert_eq!(b.sendable_balance, 50 * CELF);

    let totals = h.auditor.network_stats().await.unwrap();
    assert_eq!(totals.total(), 100 * CELF);

    assert_reconciles(&h, "a").await;
    assert_reconciles(&h, "b").await;
}

#[tokio::test(flavor = "multi_thread", worker_threads = 8)]
async fn concurrent_mixed_storm_reconciles_clean() {
    let h = harness();
    funded_wallet(&h, "u1", 30 * CELF, 10 * CELF).await;
    funded_wallet(&h, "u2", 30 * CELF, 10 * CELF).await;
    funded_wallet(&h, "u3", 30 * CELF, 10 * CELF).await;

    let mut tasks = Vec::new();
    for i in 0..30 {
        match i % 5 {
            0 => {
                let wallets = h.wallets.clone();
                tasks.push(tokio::spawn(async move {
                    let _ = wallets.transfer("u1", "u2", CELF, None, None).await;
                }));
            }
            1 => {
                let wallets = h.wallets.clone();
                tasks.push(tokio::spawn(async move {
                    let _ = wallets.transfer("u2", "u3", CELF, None, None).await;
                }));
            }
            2 => {
                let wallets = h.wallets.clone();
                tasks.push(tokio::spawn(async move {
                    let _ = wallets.exchange("u3", CELF, None).await;
                }));
            }
            3 => {
                let rewards = h.rewards.clone();
                let task_id = format!("task-{}", i);
                tasks.push(tokio::spawn(async move {
                    let _ = rewards.claim_task_reward("u1", &task_id, None).await;
                }));
            }
            _ => {
                let wallets = h.wallets.clone();
                tasks.push(tokio::spawn(async move {
                    let _ = wallets.transfer("u3", "u1", CELF, None, None).await;
                }));
            }
        }
    }

    join_all(tasks).await;

    // Whatever interleaving happened, every wallet must still be
    // explainable by its ledger.
    let (checked, mismatches) = h.auditor.reconcile_all().await;
    assert_eq!(checked, 3);
    assert_eq!(mismatches, 0);

    for user in ["u1", "u2", "u3"] {
        let wallet = h.wallets.get_balance(user).await.unwrap();
        assert!(wallet.buckets_consistent());
        assert!(wallet.sendable_balance >= 0);
        assert!(wallet.non_sendable_balance >= 0);
    }
}
