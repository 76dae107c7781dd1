//! Ledger behavior: bucket invariants, transfer/exchange semantics,
//! mining accrual, reward claims, idempotency. All suites run the real
//! services over the in-memory store.

mod common;

use celf_wallet_backend::db::referral_status;
use celf_wallet_backend::ledger::{Bucket, LedgerError, UNITS_PER_CELF};
use celf_wallet_backend::services::ClaimResult;

use common::*;

const CELF: i64 = UNITS_PER_CELF;

// ==========================================
// TRANSFERS
// ==========================================

#[tokio::test]
async fn transfer_moves_sendable_between_wallets() {
    let h = harness();
    funded_wallet(&h, "alice", 10 * CELF, 0).await;
    funded_wallet(&h, "bob", 0, 0).await;

    let op = h
        .wallets
        .transfer("alice", "bob", 4 * CELF, Some("lunch".to_string()), None)
        .await
        .unwrap();
    assert!(!op.replayed);
    assert_eq!(op.transaction.kind, "send");
    assert_eq!(op.transaction.amount, 4 * CELF);

    let alice = h.wallets.get_balance("alice").await.unwrap();
    let bob = h.wallets.get_balance("bob").await.unwrap();
    assert_eq!(alice.sendable_balance, 6 * CELF);
    assert_eq!(bob.sendable_balance, 4 * CELF);

    // Exactly two ledger rows, committed together.
    let (alice_txs, _) = h.wallets.list_transactions("alice", 1, 50).await.unwrap();
    let (bob_txs, _) = h.wallets.list_transactions("bob", 1, 50).await.unwrap();
    assert!(alice_txs.iter().any(|t| t.kind == "send"));
    assert!(bob_txs.iter().any(|t| t.kind == "receive"));

    assert_reconciles(&h, "alice").await;
    assert_reconciles(&h, "bob").await;
}

#[tokio::test]
async fn transfer_by_receive_address_resolves_recipient() {
    let h = harness();
    funded_wallet(&h, "alice", 5 * CELF, 0).await;
    let bob = funded_wallet(&h, "bob", 0, 0).await;

    h.wallets
        .transfer("alice", &bob.current_address, 2 * CELF, None, None)
        .await
        .unwrap();

    let bob = h.wallets.get_balance("bob").await.unwrap();
    assert_eq!(bob.sendable_balance, 2 * CELF);
}

#[tokio::test]
async fn self_transfer_always_rejected() {
    let h = harness();
    let alice = funded_wallet(&h, "alice", 10 * CELF, 0).await;

    // By user id.
    let err = h
        .wallets
        .transfer("alice", "alice", CELF, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::SelfTransfer));

    // By own receive address: same wallet, same rejection.
    let err = h
        .wallets
        .transfer("alice", &alice.current_address, CELF, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::SelfTransfer));

    // Balance untouched either way.
    let after = h.wallets.get_balance("alice").await.unwrap();
    assert_eq!(after.sendable_balance, 10 * CELF);
}

#[tokio::test]
async fn transfer_rejects_insufficient_and_invalid_amounts() {
    let h = harness();
    funded_wallet(&h, "alice", CELF, 0).await;
    funded_wallet(&h, "bob", 0, 0).await;

    let err = h
        .wallets
        .transfer("alice", "bob", 2 * CELF, None, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            bucket: Bucket::Sendable,
            ..
        }
    ));

    for bad in [0, -5] {
        let err = h
            .wallets
            .transfer("alice", "bob", bad, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, LedgerError::InvalidAmount(_)));
    }

    // Nothing moved, nothing recorded.
    let (bob_txs, total) = h.wallets.list_transactions("bob", 1, 50).await.unwrap();
    assert!(bob_txs.is_empty());
    assert_eq!(total, 0);
}

#[tokio::test]
async fn transfer_rejects_malformed_and_unknown_destinations() {
    let h = harness();
    funded_wallet(&h, "alice", CELF, 0).await;

    // Starts with the address prefix but is not a valid address.
    let err = h
        .wallets
        .transfer("alice", "celf!!!!!!!!!!!!!!!!!!!!!!", CELF, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::MalformedAddress(_)));

    // Well-formed user id with no wallet.
    let err = h
        .wallets
        .transfer("alice", "nobody", CELF, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::WalletNotFound(_)));
}

#[tokio::test]
async fn transfer_fee_is_debited_and_ledger_still_reconciles() {
    let mut config = celf_wallet_backend::config::AppConfig::for_tests();
    config.transfer_fee = CELF / 10; // 0.1 CELF
    let h = harness_with(config);

    funded_wallet(&h, "alice", 10 * CELF, 0).await;
    funded_wallet(&h, "bob", 0, 0).await;

    let op = h
        .wallets
        .transfer("alice", "bob", 2 * CELF, None, None)
        .await
        .unwrap();
    assert_eq!(op.transaction.fee, CELF / 10);

    let alice = h.wallets.get_balance("alice").await.unwrap();
    let bob = h.wallets.get_balance("bob").await.unwrap();
    // Sender pays amount + fee; the fee is burned, not credited anywhere.
    assert_eq!(alice.sendable_balance, 10 * CELF - 2 * CELF - CELF / 10);
    assert_eq!(bob.sendable_balance, 2 * CELF);

    assert_reconciles(&h, "alice").await;
    assert_reconciles(&h, "bob").await;
}

// ==========================================
// EXCHANGE
// ==========================================

#[tokio::test]
async fn exchange_moves_exact_amount_between_buckets() {
    let h = harness();
    funded_wallet(&h, "alice", 0, 10 * CELF).await;

    h.wallets.exchange("alice", 10 * CELF, None).await.unwrap();

    let alice = h.wallets.get_balance("alice").await.unwrap();
    assert_eq!(alice.sendable_balance, 10 * CELF);
    assert_eq!(alice.non_sendable_balance, 0);
    // The total never moved: exchange converts, it does not mint.
    assert_eq!(alice.total_balance, 10 * CELF);

    assert_reconciles(&h, "alice").await;
}

#[tokio::test]
async fn failed_exchange_touches_nothing() {
    let h = harness();
    funded_wallet(&h, "alice", 3 * CELF, CELF).await;

    let err = h
        .wallets
        .exchange("alice", 2 * CELF, None)
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        LedgerError::InsufficientFunds {
            bucket: Bucket::NonSendable,
            ..
        }
    ));

    let alice = h.wallets.get_balance("alice").await.unwrap();
    assert_eq!(alice.sendable_balance, 3 * CELF);
    assert_eq!(alice.non_sendable_balance, CELF);
    assert_reconciles(&h, "alice").await;
}

#[tokio::test]
async fn exchange_then_transfer_scenario() {
    // The product's core unlock path: everything earned, nothing
    // sendable, exchange it all, then send it on.
    let h = harness();
    funded_wallet(&h, "user", 0, 10 * CELF).await;
    funded_wallet(&h, "recipient", 0, 0).await;

    h.wallets.exchange("user", 10 * CELF, None).await.unwrap();
    let user = h.wallets.get_balance("user").await.unwrap();
    assert_eq!(
        (user.sendable_balance, user.non_sendable_balance),
        (10 * CELF, 0)
    );

    h.wallets
        .transfer("user", "recipient", 10 * CELF, None, None)
        .await
        .unwrap();

    let user = h.wallets.get_balance("user").await.unwrap();
    let recipient = h.wallets.get_balance("recipient").await.unwrap();
    assert_eq!(user.sendable_balance, 0);
    assert_eq!(recipient.sendable_balance, 10 * CELF);

    assert_reconciles(&h, "user").await;
    assert_reconciles(&h, "recipient").await;
}

// ==========================================
// MINING
// ==========================================

#[tokio::test]
async fn two_hour_session_pays_two_celf_into_non_sendable() {
    let h = harness();
    funded_wallet(&h, "miner", 0, 0).await;

    // Session opened two hours ago at 1 CELF/h.
    backdated_session(&h, "miner", CELF, 2 * 3600).await;

    let outcome = h.mining.stop_mining("miner", None).await.unwrap();
    assert_eq!(outcome.tokens_earned, 2 * CELF);
    assert!(!outcome.capped);

    let miner = h.wallets.get_balance("miner").await.unwrap();
    // Mining lands in the earned bucket, never directly in sendable.
    assert_eq!(miner.non_sendable_balance, 2 * CELF);
    assert_eq!(miner.sendable_balance, 0);

    assert_reconciles(&h, "miner").await;
}

#[tokio::test]
async fn month_old_session_pays_at_most_the_ceiling() {
    let h = harness();
    funded_wallet(&h, "miner", 0, 0).await;

    // 30 days elapsed; the ceiling is 24 hours.
    backdated_session(&h, "miner", CELF, 30 * 24 * 3600).await;

    let outcome = h.mining.stop_mining("miner", None).await.unwrap();
    assert!(outcome.capped);
    assert_eq!(outcome.tokens_earned, 24 * CELF);

    let miner = h.wallets.get_balance("miner").await.unwrap();
    assert_eq!(miner.non_sendable_balance, 24 * CELF);
    assert_reconciles(&h, "miner").await;
}

#[tokio::test]
async fn session_lifecycle_guards() {
    let h = harness();
    funded_wallet(&h, "miner", 0, 0).await;

    let session = h.mining.start_mining("miner", None).await.unwrap();
    assert_eq!(session.mining_rate, h.config.base_mining_rate);

    // Second start while open.
    let err = h.mining.start_mining("miner", None).await.unwrap_err();
    assert!(matches!(err, LedgerError::AlreadyMining));

    // Immediate stop accrues nothing and writes no ledger row.
    let outcome = h.mining.stop_mining("miner", None).await.unwrap();
    assert_eq!(outcome.tokens_earned, 0);
    assert!(outcome.transaction.is_none());

    // Stop again with nothing open.
    let err = h.mining.stop_mining("miner", None).await.unwrap_err();
    assert!(matches!(err, LedgerError::NoActiveSession));

    let (txs, _) = h.wallets.list_transactions("miner", 1, 50).await.unwrap();
    assert!(txs.iter().all(|t| t.kind != "mining"));
}

#[tokio::test]
async fn requested_rate_is_clamped_to_the_maximum() {
    let h = harness();
    funded_wallet(&h, "miner", 0, 0).await;

    let session = h
        .mining
        .start_mining("miner", Some(h.config.max_mining_rate * 50))
        .await
        .unwrap();
    assert_eq!(session.mining_rate, h.config.max_mining_rate);

    let err = h.mining.start_mining("miner2", Some(0)).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidAmount(_)));
}

#[tokio::test]
async fn mining_status_reports_server_authoritative_state() {
    let h = harness();
    funded_wallet(&h, "miner", 0, 0).await;

    assert!(h.mining.mining_status("miner").await.unwrap().is_none());

    backdated_session(&h, "miner", CELF, 3600).await;
    let status = h.mining.mining_status("miner").await.unwrap().unwrap();
    // One hour in: the estimate sits at ~1 CELF and below the ceiling.
    assert!(status.current_estimate >= CELF - 1000 && status.current_estimate <= CELF + 1000);
    assert!(!status.at_ceiling);
}

#[tokio::test]
async fn sweep_closes_stale_sessions_with_the_cap() {
    let h = harness();
    funded_wallet(&h, "miner", 0, 0).await;

    // Open well past the ceiling; a fresh session elsewhere stays.
    backdated_session(&h, "miner", CELF, 48 * 3600).await;
    funded_wallet(&h, "fresh", 0, 0).await;
    h.mining.start_mining("fresh", None).await.unwrap();

    let closed = h.mining.sweep_stale_sessions().await;
    assert_eq!(closed, 1);

    let miner = h.wallets.get_balance("miner").await.unwrap();
    assert_eq!(miner.non_sendable_balance, 24 * CELF);
    assert!(h.mining.mining_status("miner").await.unwrap().is_none());
    // The fresh session is untouched.
    assert!(h.mining.mining_status("fresh").await.unwrap().is_some());

    assert_reconciles(&h, "miner").await;
}

// ==========================================
// REWARD CLAIMS
// ==========================================

#[tokio::test]
async fn referral_lifecycle_pays_exactly_once() {
    let h = harness();
    funded_wallet(&h, "referrer", 0, 0).await;

    // Referee registers with a referral code.
    h.wallets
        .create_wallet("referee", Some("referrer"))
        .await
        .unwrap();

    let referral = h
        .store
        .get_referral("referrer", "referee")
        .await
        .unwrap()
        .unwrap();
    assert_eq!(referral.status, referral_status::PENDING);

    // Claiming before the referee qualifies is not payable.
    let err = h
        .rewards
        .claim_referral_reward("referrer", "referee", None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotEligible(_)));

    // Referee qualifies; the claim pays the configured bonus.
    h.rewards
        .complete_referral("referrer", "referee")
        .await
        .unwrap();
    let result = h
        .rewards
        .claim_referral_reward("referrer", "referee", None)
        .await
        .unwrap();
    assert!(matches!(result, ClaimResult::Claimed { .. }));

    let referrer = h.wallets.get_balance("referrer").await.unwrap();
    assert_eq!(referrer.non_sendable_balance, h.config.referral_reward);

    // Second claim: tagged outcome, no second credit.
    let result = h
        .rewards
        .claim_referral_reward("referrer", "referee", None)
        .await
        .unwrap();
    assert!(matches!(result, ClaimResult::AlreadyClaimed));

    let referrer = h.wallets.get_balance("referrer").await.unwrap();
    assert_eq!(referrer.non_sendable_balance, h.config.referral_reward);
    assert_reconciles(&h, "referrer").await;
}

#[tokio::test]
async fn task_reward_pays_exactly_once() {
    let h = harness();
    funded_wallet(&h, "worker", 0, 0).await;

    let result = h
        .rewards
        .claim_task_reward("worker", "daily-checkin", None)
        .await
        .unwrap();
    let first_tx = match result {
        ClaimResult::Claimed { transaction, .. } => transaction,
        other => panic!("expected Claimed, got {:?}", other),
    };
    assert_eq!(first_tx.kind, "task_reward");

    // The same pair again: no second credit, no second row.
    let result = h
        .rewards
        .claim_task_reward("worker", "daily-checkin", None)
        .await
        .unwrap();
    assert!(matches!(result, ClaimResult::AlreadyClaimed));

    let worker = h.wallets.get_balance("worker").await.unwrap();
    assert_eq!(worker.non_sendable_balance, h.config.task_reward);

    let (txs, _) = h.wallets.list_transactions("worker", 1, 50).await.unwrap();
    assert_eq!(txs.iter().filter(|t| t.kind == "task_reward").count(), 1);

    // A different task is a different claim.
    let result = h
        .rewards
        .claim_task_reward("worker", "profile-complete", None)
        .await
        .unwrap();
    assert!(matches!(result, ClaimResult::Claimed { .. }));
    assert_reconciles(&h, "worker").await;
}

// ==========================================
// IDEMPOTENCY
// ==========================================

#[tokio::test]
async fn retried_transfer_with_same_key_returns_original() {
    let h = harness();
    funded_wallet(&h, "alice", 10 * CELF, 0).await;
    funded_wallet(&h, "bob", 0, 0).await;

    let first = h
        .wallets
        .transfer("alice", "bob", 3 * CELF, None, Some("retry-1"))
        .await
        .unwrap();
    assert!(!first.replayed);

    // The client timed out and resends the exact request.
    let second = h
        .wallets
        .transfer("alice", "bob", 3 * CELF, None, Some("retry-1"))
        .await
        .unwrap();
    assert!(second.replayed);
    assert_eq!(second.transaction.id, first.transaction.id);

    // Only one debit happened.
    let alice = h.wallets.get_balance("alice").await.unwrap();
    assert_eq!(alice.sendable_balance, 7 * CELF);

    // A different key is a new operation.
    let third = h
        .wallets
        .transfer("alice", "bob", 3 * CELF, None, Some("retry-2"))
        .await
        .unwrap();
    assert!(!third.replayed);
}

#[tokio::test]
async fn retried_task_claim_with_same_key_replays() {
    let h = harness();
    funded_wallet(&h, "worker", 0, 0).await;

    let first = h
        .rewards
        .claim_task_reward("worker", "t1", Some("claim-1"))
        .await
        .unwrap();
    let first_tx = match first {
        ClaimResult::Claimed { transaction, .. } => transaction,
        other => panic!("expected Claimed, got {:?}", other),
    };

    let second = h
        .rewards
        .claim_task_reward("worker", "t1", Some("claim-1"))
        .await
        .unwrap();
    match second {
        ClaimResult::Claimed {
            transaction,
            replayed,
        } => {
            assert!(replayed);
            assert_eq!(transaction.id, first_tx.id);
        }
        other => panic!("expected replayed Claimed, got {:?}", other),
    }

    let worker = h.wallets.get_balance("worker").await.unwrap();
    assert_eq!(worker.non_sendable_balance, h.config.task_reward);
}

// ==========================================
// ADMIN FREEZE
// ==========================================

#[tokio::test]
async fn frozen_wallet_rejects_every_mutation() {
    let h = harness();
    funded_wallet(&h, "alice", 10 * CELF, 10 * CELF).await;
    funded_wallet(&h, "bob", 0, 0).await;

    h.wallets.set_wallet_locked("alice", true).await.unwrap();

    let err = h
        .wallets
        .transfer("alice", "bob", CELF, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::WalletLocked(_)));

    let err = h.wallets.exchange("alice", CELF, None).await.unwrap_err();
    assert!(matches!(err, LedgerError::WalletLocked(_)));

    let err = h.mining.start_mining("alice", None).await.unwrap_err();
    assert!(matches!(err, LedgerError::WalletLocked(_)));

    // A frozen recipient blocks incoming transfers too.
    funded_wallet(&h, "carol", 5 * CELF, 0).await;
    let err = h
        .wallets
        .transfer("carol", "alice", CELF, None, None)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::WalletLocked(_)));

    // Unfreeze restores service.
    h.wallets.set_wallet_locked("alice", false).await.unwrap();
    h.wallets
        .transfer("alice", "bob", CELF, None, None)
        .await
        .unwrap();
}

// ==========================================
// RECONCILIATION
// ==========================================

#[tokio::test]
async fn mixed_operations_preserve_the_invariants() {
    let h = harness();
    funded_wallet(&h, "a", 20 * CELF, 5 * CELF).await;
    funded_wallet(&h, "b", 0, 0).await;
    funded_wallet(&h, "c", CELF, 0).await;

    h.wallets.transfer("a", "b", 7 * CELF, None, None).await.unwrap();
    h.wallets.exchange("a", 5 * CELF, None).await.unwrap();
    h.wallets.transfer("b", "c", 2 * CELF, None, None).await.unwrap();
    backdated_session(&h, "c", CELF, 3 * 3600).await;
    h.mining.stop_mining("c", None).await.unwrap();
    h.rewards
        .claim_task_reward("b", "starter", None)
        .await
        .unwrap();

    for user in ["a", "b", "c"] {
        let wallet = h.wallets.get_balance(user).await.unwrap();
        assert!(wallet.buckets_consistent(), "{} buckets inconsistent", user);
        assert_reconciles(&h, user).await;
    }

    // Transfers conserve supply; mining and rewards mint into it.
    let totals = h.auditor.network_stats().await.unwrap();
    let minted = 3 * CELF + h.config.task_reward; // 3h mining + one task
    let seeded = (20 + 5 + 1) * CELF;
    assert_eq!(totals.total(), seeded + minted);

    let (checked, mismatches) = h.auditor.reconcile_all().await;
    assert_eq!(checked, 3);
    assert_eq!(mismatches, 0);
}

#[tokio::test]
async fn reconcile_flags_a_corrupted_cache() {
    let h = harness();
    funded_wallet(&h, "victim", 5 * CELF, 0).await;

    // Corrupt the cache behind the ledger's back: an unexplained credit.
    let wallet = h.store.get_wallet("victim").await.unwrap().unwrap();
    let commit = celf_wallet_backend::store::LedgerCommit {
        transactions: vec![],
        wallet_updates: vec![celf_wallet_backend::store::WalletUpdate {
            user_id: "victim".to_string(),
            expected_version: wallet.version,
            sendable_balance: wallet.sendable_balance + CELF,
            non_sendable_balance: wallet.non_sendable_balance,
            pending_balance: wallet.pending_balance,
            total_balance: wallet.total_balance + CELF,
            last_activity: wallet.last_activity,
        }],
        idempotency: None,
    };
    h.store.commit(commit).await.unwrap();

    let report = h.auditor.reconcile_wallet("victim").await.unwrap();
    assert!(!report.ok);
    assert_eq!(report.difference, -CELF); // ledger proves less than cached
    assert!(!report.auto_fixed); // flagged, not silently repaired
}

#[tokio::test]
async fn reconcile_auto_fix_corrects_and_logs_when_enabled() {
    let mut config = celf_wallet_backend::config::AppConfig::for_tests();
    config.reconcile_auto_fix = true;
    let h = harness_with(config);
    funded_wallet(&h, "victim", 5 * CELF, 0).await;

    let wallet = h.store.get_wallet("victim").await.unwrap().unwrap();
    let commit = celf_wallet_backend::store::LedgerCommit {
        transactions: vec![],
        wallet_updates: vec![celf_wallet_backend::store::WalletUpdate {
            user_id: "victim".to_string(),
            expected_version: wallet.version,
            sendable_balance: wallet.sendable_balance + CELF,
            non_sendable_balance: wallet.non_sendable_balance,
            pending_balance: wallet.pending_balance,
            total_balance: wallet.total_balance + CELF,
            last_activity: wallet.last_activity,
        }],
        idempotency: None,
    };
    h.store.commit(commit).await.unwrap();

    let report = h.auditor.reconcile_wallet("victim").await.unwrap();
    assert!(!report.ok);
    assert!(report.auto_fixed);

    // The cache now matches the ledger again.
    assert_reconciles(&h, "victim").await;
    let fixed = h.wallets.get_balance("victim").await.unwrap();
    assert_eq!(fixed.sendable_balance, 5 * CELF);
}

#[tokio::test]
async fn wallet_creation_conflicts_and_unknown_users() {
    let h = harness();
    h.wallets.create_wallet("alice", None).await.unwrap();

    let err = h.wallets.create_wallet("alice", None).await.unwrap_err();
    assert!(matches!(err, LedgerError::WalletExists(_)));

    let err = h.wallets.get_balance("ghost").await.unwrap_err();
    assert!(matches!(err, LedgerError::WalletNotFound(_)));

    let err = h.wallets.create_wallet("  ", None).await.unwrap_err();
    assert!(matches!(err, LedgerError::InvalidUserId(_)));
}

#[tokio::test]
async fn transaction_history_pages_newest_first() {
    let h = harness();
    funded_wallet(&h, "alice", 100 * CELF, 0).await;
    funded_wallet(&h, "bob", 0, 0).await;

    for _ in 0..5 {
        h.wallets
            .transfer("alice", "bob", CELF, None, None)
            .await
            .unwrap();
    }

    let (page1, total) = h.wallets.list_transactions("alice", 1, 3).await.unwrap();
    // 5 sends + the seed bonus row.
    assert_eq!(total, 6);
    assert_eq!(page1.len(), 3);
    assert!(page1.windows(2).all(|w| w[0].created_at >= w[1].created_at));

    let (page2, _) = h.wallets.list_transactions("alice", 2, 3).await.unwrap();
    assert_eq!(page2.len(), 3);
    assert!(page1.iter().all(|a| page2.iter().all(|b| a.id != b.id)));
}
