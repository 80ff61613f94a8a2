//! Balance mutation invariants against the in-process ledger store:
//! - Atomicity: a failure at any step leaves balance, ledger and audit untouched
//! - Conservation: final balance == sum of deltas == latest balance_after
//! - Serialization: concurrent adjustments on one client lose no update
//! - Audit completeness: one audit entry and one ledger entry per commit

use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use wallet_engine::config::{LedgerBackend, LedgerConfig};
use wallet_engine::memory_store::{FailPoint, MemoryLedgerStore};
use wallet_engine::models::{AdjustBalanceRequest, BalanceAdjustDetails, TransactionType};
use wallet_engine::services::WalletService;
use wallet_engine::{AdjustBalanceCommand, BalanceMutator, ErrorKind, LedgerStore, LedgerTx};

const ADMIN: i64 = 1;

fn ledger_config() -> LedgerConfig {
    LedgerConfig {
        backend: LedgerBackend::Memory,
        max_adjustment: dec!(1000000),
        list_clients_limit: 200,
        list_transactions_limit: 100,
    }
}

fn command(client_id: i64, amount: Decimal, reason: &str) -> AdjustBalanceCommand {
    AdjustBalanceCommand {
        client_id,
        amount,
        reason: reason.to_string(),
    }
}

async fn setup() -> (MemoryLedgerStore, BalanceMutator, i64) {
    let store = MemoryLedgerStore::new(Duration::from_secs(5));
    let client = store.open_client(100, None).await.unwrap();
    let mutator = BalanceMutator::new(Arc::new(store.clone()));
    (store, mutator, client.id)
}

#[tokio::test]
async fn test_deposit_then_withdrawal_scenario() {
    let (store, mutator, client_id) = setup().await;

    let first = mutator
        .adjust_balance(&command(client_id, dec!(100.00), "initial deposit"), ADMIN)
        .await
        .unwrap();
    assert_eq!(first.client_id, client_id);
    assert_eq!(first.old_balance, dec!(0.00));
    assert_eq!(first.new_balance, dec!(100.00));

    let second = mutator
        .adjust_balance(&command(client_id, dec!(-30.00), "withdrawal fee"), ADMIN)
        .await
        .unwrap();
    assert_eq!(second.old_balance, dec!(100.00));
    assert_eq!(second.new_balance, dec!(70.00));

    let history = store.list_transactions(client_id, 10).await.unwrap();
    assert_eq!(history.len(), 2);

    // Newest first
    assert_eq!(history[0].kind, TransactionType::Withdrawal);
    assert_eq!(history[0].amount, dec!(30.00));
    assert_eq!(history[0].pnl, Decimal::ZERO);
    assert_eq!(history[0].balance_after, dec!(70.00));
    assert_eq!(history[1].kind, TransactionType::Deposit);
    assert_eq!(history[1].amount, dec!(100.00));
    assert_eq!(history[1].balance_after, dec!(100.00));

    let client = store.get_client(client_id).await.unwrap().unwrap();
    assert_eq!(client.balance, dec!(70.00));
}

#[tokio::test]
async fn test_audit_entry_records_actor_and_balances() {
    let (store, mutator, client_id) = setup().await;

    mutator
        .adjust_balance(&command(client_id, dec!(12.50), "promo credit"), 77)
        .await
        .unwrap();

    let entries = store.list_audit_entries(client_id, 10).await.unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].user_id, 77);
    assert_eq!(entries[0].action, "balance_adjust");

    let details: BalanceAdjustDetails = serde_json::from_value(entries[0].details.clone()).unwrap();
    assert_eq!(details.client_id, client_id);
    assert_eq!(details.amount, dec!(12.50));
    assert_eq!(details.old_balance, dec!(0.00));
    assert_eq!(details.new_balance, dec!(12.50));
    assert_eq!(details.reason, "promo credit");
}

#[tokio::test]
async fn test_unknown_client_is_not_found_and_writes_nothing() {
    let (store, mutator, _) = setup().await;

    let err = mutator
        .adjust_balance(&command(99999, dec!(10.00), "initial deposit"), ADMIN)
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::NotFound);
    assert_eq!(store.audit_count(), 0);
    assert_eq!(store.transaction_count(99999), 0);
}

#[tokio::test]
async fn test_short_reason_rejected_before_store_is_touched() {
    let (store, _, client_id) = setup().await;
    let service = WalletService::new(Arc::new(store.clone()), &ledger_config());

    // Any store access would fail, so success of validation alone is observable.
    store.fail_at(Some(FailPoint::Begin));

    let err = service
        .adjust_balance(
            &client_id.to_string(),
            AdjustBalanceRequest {
                amount: Some(json!(10)),
                reason: Some(json!("ok")),
            },
            ADMIN,
        )
        .await
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::InvalidInput);
    assert_eq!(store.audit_count(), 0);
    assert_eq!(store.transaction_count(client_id), 0);
}

#[tokio::test]
async fn test_failure_at_every_step_rolls_back() {
    let points = [
        FailPoint::Begin,
        FailPoint::LockRow,
        FailPoint::UpdateBalance,
        FailPoint::AppendAudit,
        FailPoint::AppendTransaction,
        FailPoint::Commit,
    ];

    for point in points {
        let (store, mutator, client_id) = setup().await;
        mutator
            .adjust_balance(&command(client_id, dec!(40.00), "seed balance"), ADMIN)
            .await
            .unwrap();

        store.fail_at(Some(point));
        let err = mutator
            .adjust_balance(&command(client_id, dec!(-15.00), "fee charge"), ADMIN)
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Internal, "fail point {:?}", point);

        let client = store.get_client(client_id).await.unwrap().unwrap();
        assert_eq!(client.balance, dec!(40.00), "fail point {:?}", point);
        assert_eq!(store.transaction_count(client_id), 1, "fail point {:?}", point);
        assert_eq!(store.audit_count(), 1, "fail point {:?}", point);

        // The row lock was released on the failure path.
        store.fail_at(None);
        let after = mutator
            .adjust_balance(&command(client_id, dec!(-15.00), "fee charge"), ADMIN)
            .await
            .unwrap();
        assert_eq!(after.old_balance, dec!(40.00));
        assert_eq!(after.new_balance, dec!(25.00));
    }
}

#[tokio::test]
async fn test_balance_beyond_storage_range_rolls_back() {
    let (store, mutator, client_id) = setup().await;

    mutator
        .adjust_balance(&command(client_id, dec!(9999999999999.99), "ceiling fill"), ADMIN)
        .await
        .unwrap();

    let err = mutator
        .adjust_balance(&command(client_id, dec!(0.01), "one cent over"), ADMIN)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);

    let client = store.get_client(client_id).await.unwrap().unwrap();
    assert_eq!(client.balance, dec!(9999999999999.99));
    assert_eq!(store.transaction_count(client_id), 1);
    assert_eq!(store.audit_count(), 1);

    // Same bound on the negative side
    let err = mutator
        .adjust_balance(&command(client_id, dec!(-20000000000000.00), "overdraw"), ADMIN)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::InvalidInput);
}

#[tokio::test]
async fn test_lock_timeout_is_transient() {
    let store = MemoryLedgerStore::new(Duration::from_millis(20));
    let client = store.open_client(100, None).await.unwrap();
    let mutator = BalanceMutator::new(Arc::new(store.clone()));

    let mut holder = store.begin().await.unwrap();
    holder.lock_client_balance(client.id).await.unwrap();

    let err = mutator
        .adjust_balance(&command(client.id, dec!(5.00), "bonus credit"), ADMIN)
        .await
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Transient);

    holder.rollback().await.unwrap();
    assert_eq!(store.transaction_count(client.id), 0);
}

#[tokio::test]
async fn test_lock_on_one_client_does_not_block_another() {
    let store = MemoryLedgerStore::new(Duration::from_millis(20));
    let locked = store.open_client(100, None).await.unwrap();
    let free = store.open_client(200, None).await.unwrap();
    let mutator = BalanceMutator::new(Arc::new(store.clone()));

    let mut holder = store.begin().await.unwrap();
    holder.lock_client_balance(locked.id).await.unwrap();

    let result = mutator
        .adjust_balance(&command(free.id, dec!(5.00), "bonus credit"), ADMIN)
        .await
        .unwrap();
    assert_eq!(result.new_balance, dec!(5.00));

    holder.rollback().await.unwrap();
}

#[tokio::test]
async fn test_concurrent_pair_serializes() {
    let (store, mutator, client_id) = setup().await;
    mutator
        .adjust_balance(&command(client_id, dec!(70.00), "opening balance"), ADMIN)
        .await
        .unwrap();

    let mutator = Arc::new(mutator);
    let a = {
        let mutator = mutator.clone();
        tokio::spawn(async move {
            mutator
                .adjust_balance(&command(client_id, dec!(50.00), "win payout"), ADMIN)
                .await
        })
    };
    let b = {
        let mutator = mutator.clone();
        tokio::spawn(async move {
            mutator
                .adjust_balance(&command(client_id, dec!(-20.00), "fee charge"), ADMIN)
                .await
        })
    };

    let a = a.await.unwrap().unwrap();
    let b = b.await.unwrap().unwrap();

    let client = store.get_client(client_id).await.unwrap().unwrap();
    assert_eq!(client.balance, dec!(100.00));

    // Whichever ran second observed the first one's committed balance.
    if a.old_balance == dec!(70.00) {
        assert_eq!(b.old_balance, a.new_balance);
    } else {
        assert_eq!(a.old_balance, b.new_balance);
    }

    let history = store.list_transactions(client_id, 10).await.unwrap();
    assert_eq!(history.len(), 3);
    assert_eq!(history[0].balance_after, dec!(100.00));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_stress_loses_no_updates() {
    let (store, mutator, client_id) = setup().await;
    let other = store.open_client(200, None).await.unwrap();
    let mutator = Arc::new(mutator);

    let mut handles = Vec::new();
    let mut expected = Decimal::ZERO;
    let mut expected_other = Decimal::ZERO;

    for i in 1..=64i64 {
        let delta = if i % 3 == 0 {
            Decimal::new(-i * 7, 2)
        } else {
            Decimal::new(i * 11, 2)
        };
        let target = if i % 4 == 0 { other.id } else { client_id };
        if target == client_id {
            expected += delta;
        } else {
            expected_other += delta;
        }

        let mutator = mutator.clone();
        handles.push(tokio::spawn(async move {
            mutator
                .adjust_balance(&command(target, delta, "stress adjust"), ADMIN)
                .await
        }));
    }

    for handle in handles {
        handle.await.unwrap().unwrap();
    }

    let client = store.get_client(client_id).await.unwrap().unwrap();
    assert_eq!(client.balance, expected);
    let latest = store.list_transactions(client_id, 1).await.unwrap();
    assert_eq!(latest[0].balance_after, expected);

    let other = store.get_client(other.id).await.unwrap().unwrap();
    assert_eq!(other.balance, expected_other);

    assert_eq!(store.transaction_count(client_id) + store.transaction_count(other.id), 64);
    assert_eq!(store.audit_count(), 64);
}

#[tokio::test]
async fn test_read_after_write_sees_new_balance() {
    let (store, mutator, client_id) = setup().await;
    let service = WalletService::new(Arc::new(store.clone()), &ledger_config());

    let result = mutator
        .adjust_balance(&command(client_id, dec!(9.99), "bonus credit"), ADMIN)
        .await
        .unwrap();

    let dashboard = service.dashboard(100).await.unwrap();
    assert_eq!(dashboard.balance, result.new_balance);

    let listing = service.list_clients().await.unwrap();
    assert_eq!(listing[0].balance, dec!(9.99));
}

fn delta_strategy() -> impl Strategy<Value = Decimal> {
    (-500_000i64..500_000i64)
        .prop_filter("non-zero", |cents| *cents != 0)
        .prop_map(|cents| Decimal::new(cents, 2))
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(32))]

    #[test]
    fn prop_balance_is_sum_of_deltas(deltas in prop::collection::vec(delta_strategy(), 1..25)) {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .unwrap();

        runtime.block_on(async {
            let (store, mutator, client_id) = setup().await;

            for delta in &deltas {
                mutator
                    .adjust_balance(&command(client_id, *delta, "property run"), ADMIN)
                    .await
                    .unwrap();
            }

            let expected: Decimal = deltas.iter().copied().sum();
            let client = store.get_client(client_id).await.unwrap().unwrap();
            prop_assert_eq!(client.balance, expected);

            let history = store.list_transactions(client_id, 100).await.unwrap();
            prop_assert_eq!(history.len(), deltas.len());
            prop_assert_eq!(history[0].balance_after, expected);

            // Replaying the ledger oldest-first reconstructs every snapshot.
            let mut running = Decimal::ZERO;
            for (tx, delta) in history.iter().rev().zip(deltas.iter()) {
                running += *delta;
                let signed = match tx.kind {
                    TransactionType::Deposit => tx.amount,
                    _ => -tx.amount,
                };
                prop_assert_eq!(signed, *delta);
                prop_assert_eq!(tx.balance_after, running);
            }

            prop_assert_eq!(store.audit_count(), deltas.len());
            Ok(())
        })?;
    }
}
