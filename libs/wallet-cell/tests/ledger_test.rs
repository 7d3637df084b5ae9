use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use assert_matches::assert_matches;
use async_trait::async_trait;
use futures::future::join_all;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;
use uuid::Uuid;

use shared_utils::notification::NotificationEvent;
use shared_utils::test_utils::{RecordingNotifier, TestConfig};
use wallet_cell::models::*;
use wallet_cell::services::{InMemoryLedgerStore, Ledger, LedgerStore};

fn ledger() -> Ledger {
    Ledger::new(Arc::new(InMemoryLedgerStore::new()), &TestConfig::default().to_app_config())
}

async fn fund(ledger: &Ledger, patient: Uuid, amount: Decimal) {
    let deposit = ledger.deposit(patient, amount, "vnpay").await.unwrap();
    ledger.settle_deposit(&deposit.reference, Some("VNP1")).await.unwrap();
}

#[tokio::test]
async fn test_deposit_band_is_enforced_before_creation() {
    let ledger = ledger();
    let patient = Uuid::new_v4();

    assert_matches!(ledger.deposit(patient, dec!(9999), "vnpay").await, Err(LedgerError::InvalidAmount(_)));
    assert_matches!(ledger.deposit(patient, dec!(50000001), "vnpay").await, Err(LedgerError::InvalidAmount(_)));
    assert!(ledger.transactions(patient, 0, 10).await.unwrap().is_empty());

    let low = ledger.deposit(patient, dec!(10000), "vnpay").await.unwrap();
    let high = ledger.deposit(patient, dec!(50000000), "vnpay").await.unwrap();
    assert_eq!(low.status, TransactionStatus::Pending);
    assert_eq!(high.status, TransactionStatus::Pending);
    assert!(low.reference.starts_with("TOPUP"));

    // Pending deposits do not move money
    assert_eq!(ledger.account(patient).await.unwrap().balance, dec!(0));
}

#[tokio::test]
async fn test_settle_deposit_credits_once() {
    let ledger = ledger();
    let patient = Uuid::new_v4();
    let deposit = ledger.deposit(patient, dec!(150000), "vnpay").await.unwrap();

    let first = ledger.settle_deposit(&deposit.reference, Some("VNP14000001")).await.unwrap();
    let second = ledger.settle_deposit(&deposit.reference, Some("VNP14000002")).await.unwrap();

    assert_eq!(first.status, TransactionStatus::Completed);
    assert_eq!(first.points_delta, 1500);
    assert_eq!(second, first);

    let account = ledger.account(patient).await.unwrap();
    assert_eq!(account.balance, dec!(150000));
    assert_eq!(account.loyalty_points, 1500);
    assert_eq!(account.tier, LoyaltyTier::Silver);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_duplicate_callbacks_settle_once_under_concurrency() {
    let ledger = Arc::new(ledger());
    let patient = Uuid::new_v4();
    let deposit = ledger.deposit(patient, dec!(100000), "vnpay").await.unwrap();

    let attempts = (0..8).map(|_| {
        let ledger = Arc::clone(&ledger);
        let reference = deposit.reference.clone();
        tokio::spawn(async move { ledger.settle_deposit(&reference, None).await })
    });
    for result in join_all(attempts).await {
        assert_eq!(result.unwrap().unwrap().status, TransactionStatus::Completed);
    }

    let account = ledger.account(patient).await.unwrap();
    assert_eq!(account.balance, dec!(100000));
    assert_eq!(account.loyalty_points, 1000);
}

#[tokio::test]
async fn test_fail_deposit_never_downgrades_completed() {
    let ledger = ledger();
    let patient = Uuid::new_v4();
    let deposit = ledger.deposit(patient, dec!(20000), "vnpay").await.unwrap();
    ledger.settle_deposit(&deposit.reference, None).await.unwrap();

    let after = ledger.fail_deposit(&deposit.reference, "ResponseCode=24").await.unwrap();
    assert_eq!(after.status, TransactionStatus::Completed);
    assert_eq!(after.failure_reason, None);
    assert_eq!(ledger.account(patient).await.unwrap().balance, dec!(20000));
}

#[tokio::test]
async fn test_fail_then_late_success_credits() {
    let ledger = ledger();
    let patient = Uuid::new_v4();
    let deposit = ledger.deposit(patient, dec!(20000), "vnpay").await.unwrap();

    let failed = ledger.fail_deposit(&deposit.reference, "ResponseCode=11").await.unwrap();
    assert_eq!(failed.status, TransactionStatus::Failed);
    assert_eq!(failed.failure_reason.as_deref(), Some("ResponseCode=11"));

    let settled = ledger.settle_deposit(&deposit.reference, Some("VNP9")).await.unwrap();
    assert_eq!(settled.status, TransactionStatus::Completed);
    assert_eq!(ledger.account(patient).await.unwrap().balance, dec!(20000));
}

#[tokio::test]
async fn test_unknown_reference_is_not_found() {
    let ledger = ledger();
    assert_matches!(
        ledger.settle_deposit("TOPUP00000000000000000000000000000000", None).await,
        Err(LedgerError::TransactionNotFound(_))
    );
    assert_matches!(ledger.fail_deposit("nope", "x").await, Err(LedgerError::TransactionNotFound(_)));
}

#[tokio::test]
async fn test_settle_rejects_non_deposit_reference() {
    let ledger = ledger();
    let patient = Uuid::new_v4();
    let booking = Uuid::new_v4();
    fund(&ledger, patient, dec!(100000)).await;
    let payment = ledger.pay_immediate(patient, booking, dec!(50000), "Booking").await.unwrap();

    assert_matches!(
        ledger.settle_deposit(&payment.reference, None).await,
        Err(LedgerError::NotADeposit(_))
    );
}

#[tokio::test]
async fn test_pay_immediate_insufficient_funds_leaves_account_untouched() {
    let ledger = ledger();
    let patient = Uuid::new_v4();
    fund(&ledger, patient, dec!(100000)).await;

    let result = ledger.pay_immediate(patient, Uuid::new_v4(), dec!(200000), "Booking").await;
    assert_matches!(result, Err(LedgerError::InsufficientFunds { required, available }) => {
        assert_eq!(required, dec!(200000));
        assert_eq!(available, dec!(100000));
    });

    let account = ledger.account(patient).await.unwrap();
    assert_eq!(account.balance, dec!(100000));
    assert_eq!(account.loyalty_points, 1000);
}

#[tokio::test]
async fn test_payment_and_refund_mirror_each_other() {
    let ledger = ledger();
    let patient = Uuid::new_v4();
    let booking = Uuid::new_v4();
    fund(&ledger, patient, dec!(500000)).await;
    let before = ledger.account(patient).await.unwrap();

    let payment = ledger.pay_immediate(patient, booking, dec!(200000), "Booking").await.unwrap();
    assert_eq!(payment.transaction_type, TransactionType::Payment);
    assert_eq!(payment.status, TransactionStatus::Completed);
    assert_eq!(payment.points_delta, 2000);

    let paid = ledger.account(patient).await.unwrap();
    assert_eq!(paid.balance, dec!(300000));
    assert_eq!(paid.loyalty_points, before.loyalty_points + 2000);

    let refund = ledger.refund(patient, booking, dec!(200000), "Cancelled").await.unwrap();
    assert_eq!(refund.transaction_type, TransactionType::Refund);
    assert_eq!(refund.points_delta, -2000);

    let after = ledger.account(patient).await.unwrap();
    assert_eq!(after.balance, before.balance);
    assert_eq!(after.loyalty_points, before.loyalty_points);
    assert_eq!(after.tier, before.tier);
}

#[tokio::test]
async fn test_payment_and_refund_are_idempotent_per_booking() {
    let ledger = ledger();
    let patient = Uuid::new_v4();
    let booking = Uuid::new_v4();
    fund(&ledger, patient, dec!(500000)).await;

    let first = ledger.pay_immediate(patient, booking, dec!(100000), "Booking").await.unwrap();
    let again = ledger.pay_immediate(patient, booking, dec!(100000), "Booking").await.unwrap();
    assert_eq!(first, again);
    assert_eq!(ledger.account(patient).await.unwrap().balance, dec!(400000));

    let refund = ledger.refund(patient, booking, dec!(100000), "Cancelled").await.unwrap();
    let refund_again = ledger.refund(patient, booking, dec!(100000), "Cancelled").await.unwrap();
    assert_eq!(refund, refund_again);
    assert_eq!(ledger.account(patient).await.unwrap().balance, dec!(500000));
}

#[tokio::test]
async fn test_refund_points_clamp_at_zero() {
    let store = Arc::new(InMemoryLedgerStore::new());
    let ledger = Ledger::new(store.clone(), &TestConfig::default().to_app_config());
    let patient = Uuid::new_v4();

    // A refund with no prior points on the account
    let refund = ledger.refund(patient, Uuid::new_v4(), dec!(50000), "Goodwill").await.unwrap();
    assert_eq!(refund.points_delta, -500);

    let account = ledger.account(patient).await.unwrap();
    assert_eq!(account.balance, dec!(50000));
    assert_eq!(account.loyalty_points, 0);
    assert_eq!(account.tier, LoyaltyTier::Bronze);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_payments_never_overdraw() {
    let ledger = Arc::new(ledger());
    let patient = Uuid::new_v4();
    fund(&ledger, patient, dec!(300000)).await;

    let attempts = (0..5).map(|_| {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { ledger.pay_immediate(patient, Uuid::new_v4(), dec!(200000), "Booking").await })
    });
    let results: Vec<_> = join_all(attempts).await.into_iter().map(|r| r.unwrap()).collect();

    let paid = results.iter().filter(|r| r.is_ok()).count();
    assert_eq!(paid, 1);
    for failure in results.iter().filter_map(|r| r.as_ref().err()) {
        assert_matches!(failure, LedgerError::InsufficientFunds { .. } | LedgerError::Contention(_));
    }

    let account = ledger.account(patient).await.unwrap();
    assert_eq!(account.balance, dec!(100000));
    assert!(account.balance >= Decimal::ZERO);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_payment_and_settlement_do_not_lose_updates() {
    let ledger = Arc::new(ledger());
    let patient = Uuid::new_v4();
    fund(&ledger, patient, dec!(300000)).await;
    let top_up = ledger.deposit(patient, dec!(100000), "vnpay").await.unwrap();

    let pay = {
        let ledger = Arc::clone(&ledger);
        tokio::spawn(async move { ledger.pay_immediate(patient, Uuid::new_v4(), dec!(200000), "Booking").await })
    };
    let settle = {
        let ledger = Arc::clone(&ledger);
        let reference = top_up.reference.clone();
        tokio::spawn(async move { ledger.settle_deposit(&reference, None).await })
    };

    pay.await.unwrap().unwrap();
    settle.await.unwrap().unwrap();

    let account = ledger.account(patient).await.unwrap();
    assert_eq!(account.balance, dec!(200000));
    assert_eq!(account.loyalty_points, 3000 + 1000 + 2000);
}

/// Loses the first `failures` commits to a simulated concurrent writer.
struct ContendedStore {
    inner: InMemoryLedgerStore,
    failures: AtomicU32,
}

#[async_trait]
impl LedgerStore for ContendedStore {
    async fn load_account(&self, patient_id: Uuid) -> Result<LedgerAccount, LedgerError> {
        self.inner.load_account(patient_id).await
    }

    async fn find_transaction(&self, reference: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
        self.inner.find_transaction(reference).await
    }

    async fn insert_transaction(&self, transaction: &LedgerTransaction) -> Result<LedgerTransaction, LedgerError> {
        self.inner.insert_transaction(transaction).await
    }

    async fn update_transaction(
        &self,
        transaction: &LedgerTransaction,
        from: TransactionStatus,
    ) -> Result<LedgerTransaction, LedgerError> {
        self.inner.update_transaction(transaction, from).await
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<LedgerTransaction, LedgerError> {
        let remaining = self.failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.failures.store(remaining - 1, Ordering::SeqCst);
            return Err(LedgerError::Contention(commit.account.patient_id));
        }
        self.inner.commit(commit).await
    }

    async fn list_transactions(
        &self,
        patient_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        self.inner.list_transactions(patient_id, limit, offset).await
    }
}

#[tokio::test]
async fn test_lost_race_is_recomputed_and_retried() {
    let store = Arc::new(ContendedStore { inner: InMemoryLedgerStore::new(), failures: AtomicU32::new(2) });
    let ledger = Ledger::new(store.clone(), &TestConfig::default().to_app_config());
    let patient = Uuid::new_v4();

    let deposit = ledger.deposit(patient, dec!(40000), "vnpay").await.unwrap();
    let settled = ledger.settle_deposit(&deposit.reference, None).await.unwrap();

    assert_eq!(settled.status, TransactionStatus::Completed);
    assert_eq!(ledger.account(patient).await.unwrap().balance, dec!(40000));
}

#[tokio::test]
async fn test_persistent_contention_is_reported() {
    let store = Arc::new(ContendedStore { inner: InMemoryLedgerStore::new(), failures: AtomicU32::new(100) });
    let ledger = Ledger::new(store.clone(), &TestConfig::default().to_app_config());
    let patient = Uuid::new_v4();

    let deposit = ledger.deposit(patient, dec!(40000), "vnpay").await.unwrap();
    assert_matches!(
        ledger.settle_deposit(&deposit.reference, None).await,
        Err(LedgerError::Contention(id)) if id == patient
    );
    assert_eq!(ledger.account(patient).await.unwrap().balance, dec!(0));
}

#[tokio::test]
async fn test_settlement_and_refund_notify() {
    let notifier = RecordingNotifier::default();
    let ledger = ledger().with_notifier(Arc::new(notifier.clone()));
    let patient = Uuid::new_v4();

    fund(&ledger, patient, dec!(100000)).await;
    let booking = Uuid::new_v4();
    ledger.pay_immediate(patient, booking, dec!(50000), "Booking").await.unwrap();
    ledger.refund(patient, booking, dec!(50000), "Cancelled").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;
    let events: Vec<NotificationEvent> = notifier.events().into_iter().map(|(_, e)| e).collect();
    assert_eq!(events.len(), 2);
    assert!(events.contains(&NotificationEvent::DepositSettled));
    assert!(events.contains(&NotificationEvent::RefundIssued));
}
