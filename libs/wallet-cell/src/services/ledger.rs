use std::sync::Arc;

use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use payment_gateway_cell::CorrelationRef;
use shared_config::AppConfig;
use shared_utils::clock::{Clock, SystemClock};
use shared_utils::notification::{dispatch, LogNotifier, NotificationEvent, Notifier};

use crate::models::{
    payment_reference, refund_reference, LedgerAccount, LedgerCommit, LedgerError,
    LedgerTransaction, LoyaltyTier, TransactionStatus, TransactionType, TransactionWrite,
};
use crate::services::store::LedgerStore;

/// How many times a write is recomputed after losing an optimistic race.
const MAX_COMMIT_ATTEMPTS: u32 = 5;

const POINTS_DIVISOR: Decimal = Decimal::ONE_HUNDRED;

/// Loyalty points earned (or reversed) for an amount: one per 100.
pub fn points_for(amount: Decimal) -> i64 {
    (amount / POINTS_DIVISOR).floor().to_i64().unwrap_or(0).max(0)
}

pub fn tier_for(points: i64) -> LoyaltyTier {
    LoyaltyTier::from_points(points)
}

/// Wallet balance, loyalty points and the transaction log.
///
/// Every balance change is computed from a freshly read account and
/// committed against that account's version. Losing the race means
/// re-reading and recomputing, never replaying the old write.
pub struct Ledger {
    store: Arc<dyn LedgerStore>,
    clock: Arc<dyn Clock>,
    notifier: Arc<dyn Notifier>,
    min_deposit: Decimal,
    max_deposit: Decimal,
}

impl Ledger {
    pub fn new(store: Arc<dyn LedgerStore>, config: &AppConfig) -> Self {
        Self {
            store,
            clock: Arc::new(SystemClock),
            notifier: Arc::new(LogNotifier),
            min_deposit: config.wallet_min_deposit,
            max_deposit: config.wallet_max_deposit,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    // ==============================================================================
    // DEPOSITS
    // ==============================================================================

    /// Opens a Pending deposit. The balance is untouched until settlement.
    pub async fn deposit(
        &self,
        patient_id: Uuid,
        amount: Decimal,
        method: &str,
    ) -> Result<LedgerTransaction, LedgerError> {
        if amount < self.min_deposit || amount > self.max_deposit {
            warn!("Rejected deposit of {} for {}: outside [{}, {}]", amount, patient_id, self.min_deposit, self.max_deposit);
            return Err(LedgerError::InvalidAmount(format!(
                "Deposit must be between {} and {}",
                self.min_deposit, self.max_deposit
            )));
        }

        let id = Uuid::new_v4();
        let transaction = LedgerTransaction {
            id,
            reference: CorrelationRef::deposit(id).encode(),
            patient_id,
            transaction_type: TransactionType::Deposit,
            amount,
            status: TransactionStatus::Pending,
            appointment_id: None,
            points_delta: 0,
            description: Some(format!("Wallet top-up via {}", method)),
            payment_method: Some(method.to_string()),
            external_ref: None,
            failure_reason: None,
            created_at: self.clock.now(),
            completed_at: None,
        };

        let created = self.store.insert_transaction(&transaction).await?;
        info!("Created pending deposit {} for {} ({})", created.reference, patient_id, amount);
        Ok(created)
    }

    /// Credits a deposit exactly once. Settling an already Completed deposit
    /// returns it unchanged.
    pub async fn settle_deposit(
        &self,
        reference: &str,
        external_ref: Option<&str>,
    ) -> Result<LedgerTransaction, LedgerError> {
        for attempt in 0..MAX_COMMIT_ATTEMPTS {
            let transaction = self.require_transaction(reference).await?;
            if transaction.transaction_type != TransactionType::Deposit {
                return Err(LedgerError::NotADeposit(reference.to_string()));
            }
            if transaction.status == TransactionStatus::Completed {
                info!("Deposit {} already completed, nothing to do", reference);
                return Ok(transaction);
            }

            let account = self.store.load_account(transaction.patient_id).await?;
            let points = points_for(transaction.amount);
            let updated = credited(&account, transaction.amount, points);

            let from = transaction.status;
            let completed = LedgerTransaction {
                status: TransactionStatus::Completed,
                points_delta: points,
                external_ref: external_ref.map(str::to_string).or(transaction.external_ref.clone()),
                completed_at: Some(self.clock.now()),
                ..transaction
            };

            let commit = LedgerCommit {
                account: self.stamped(updated.clone()),
                expected_version: account.version,
                transaction: completed,
                write: TransactionWrite::Transition { from },
            };

            match self.store.commit(commit).await {
                Ok(settled) => {
                    info!(
                        "Settled deposit {}: balance {} -> {}, points +{}",
                        reference, account.balance, updated.balance, points
                    );
                    self.notify(settled.patient_id, NotificationEvent::DepositSettled, &settled);
                    return Ok(settled);
                }
                Err(LedgerError::Contention(_)) | Err(LedgerError::StaleTransaction(_)) => {
                    debug!("Settlement of {} lost a race (attempt {}), re-reading", reference, attempt + 1);
                }
                Err(e) => return Err(e),
            }
        }

        Err(self.contention_for(reference).await)
    }

    /// Marks a deposit Failed. A Completed deposit is never downgraded and
    /// an already Failed one is returned as is.
    pub async fn fail_deposit(&self, reference: &str, reason: &str) -> Result<LedgerTransaction, LedgerError> {
        for _ in 0..MAX_COMMIT_ATTEMPTS {
            let transaction = self.require_transaction(reference).await?;
            if transaction.transaction_type != TransactionType::Deposit {
                return Err(LedgerError::NotADeposit(reference.to_string()));
            }
            match transaction.status {
                TransactionStatus::Completed => {
                    warn!("Ignoring failure for completed deposit {}", reference);
                    return Ok(transaction);
                }
                TransactionStatus::Failed | TransactionStatus::Cancelled => {
                    debug!("Deposit {} already {:?}", reference, transaction.status);
                    return Ok(transaction);
                }
                TransactionStatus::Pending => {}
            }

            let failed = LedgerTransaction {
                status: TransactionStatus::Failed,
                failure_reason: Some(reason.to_string()),
                ..transaction
            };

            match self.store.update_transaction(&failed, TransactionStatus::Pending).await {
                Ok(updated) => {
                    info!("Deposit {} marked failed: {}", reference, reason);
                    return Ok(updated);
                }
                Err(LedgerError::StaleTransaction(_)) => {
                    debug!("Deposit {} changed while failing it, re-reading", reference);
                }
                Err(e) => return Err(e),
            }
        }

        Err(self.contention_for(reference).await)
    }

    // ==============================================================================
    // BOOKING PAYMENTS
    // ==============================================================================

    /// Debits the wallet for a booking, recorded Completed immediately.
    /// Idempotent per booking: paying twice returns the first payment.
    pub async fn pay_immediate(
        &self,
        patient_id: Uuid,
        appointment_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<LedgerTransaction, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!("Payment amount {} must be positive", amount)));
        }
        let reference = payment_reference(appointment_id);

        for attempt in 0..MAX_COMMIT_ATTEMPTS {
            if let Some(existing) = self.store.find_transaction(&reference).await? {
                info!("Booking {} already paid by {}", appointment_id, existing.reference);
                return Ok(existing);
            }

            let account = self.store.load_account(patient_id).await?;
            if account.balance < amount {
                warn!("Insufficient balance for {}: required {}, available {}", patient_id, amount, account.balance);
                return Err(LedgerError::InsufficientFunds { required: amount, available: account.balance });
            }

            let points = points_for(amount);
            let mut updated = account.clone();
            updated.balance -= amount;
            updated.loyalty_points += points;
            updated.tier = tier_for(updated.loyalty_points);

            let now = self.clock.now();
            let transaction = LedgerTransaction {
                id: Uuid::new_v4(),
                reference: reference.clone(),
                patient_id,
                transaction_type: TransactionType::Payment,
                amount,
                status: TransactionStatus::Completed,
                appointment_id: Some(appointment_id),
                points_delta: points,
                description: Some(description.to_string()),
                payment_method: Some("wallet".to_string()),
                external_ref: None,
                failure_reason: None,
                created_at: now,
                completed_at: Some(now),
            };

            let commit = LedgerCommit {
                account: self.stamped(updated.clone()),
                expected_version: account.version,
                transaction,
                write: TransactionWrite::Insert,
            };

            match self.store.commit(commit).await {
                Ok(paid) => {
                    info!(
                        "Wallet payment {} for booking {}: balance {} -> {}, points +{}",
                        paid.reference, appointment_id, account.balance, updated.balance, points
                    );
                    return Ok(paid);
                }
                Err(LedgerError::Contention(_)) | Err(LedgerError::DuplicateReference(_)) => {
                    debug!("Payment for booking {} lost a race (attempt {}), re-reading", appointment_id, attempt + 1);
                }
                Err(e) => return Err(e),
            }
        }

        Err(LedgerError::Contention(patient_id))
    }

    /// Credits a booking payment back and reverses the points it earned,
    /// clamped at zero. Idempotent per booking.
    pub async fn refund(
        &self,
        patient_id: Uuid,
        appointment_id: Uuid,
        amount: Decimal,
        description: &str,
    ) -> Result<LedgerTransaction, LedgerError> {
        if amount <= Decimal::ZERO {
            return Err(LedgerError::InvalidAmount(format!("Refund amount {} must be positive", amount)));
        }
        let reference = refund_reference(appointment_id);

        for attempt in 0..MAX_COMMIT_ATTEMPTS {
            if let Some(existing) = self.store.find_transaction(&reference).await? {
                info!("Booking {} already refunded by {}", appointment_id, existing.reference);
                return Ok(existing);
            }

            let account = self.store.load_account(patient_id).await?;
            let points = points_for(amount);
            let mut updated = account.clone();
            updated.balance += amount;
            updated.loyalty_points = (updated.loyalty_points - points).max(0);
            updated.tier = tier_for(updated.loyalty_points);

            let now = self.clock.now();
            let transaction = LedgerTransaction {
                id: Uuid::new_v4(),
                reference: reference.clone(),
                patient_id,
                transaction_type: TransactionType::Refund,
                amount,
                status: TransactionStatus::Completed,
                appointment_id: Some(appointment_id),
                points_delta: -points,
                description: Some(description.to_string()),
                payment_method: Some("wallet".to_string()),
                external_ref: None,
                failure_reason: None,
                created_at: now,
                completed_at: Some(now),
            };

            let commit = LedgerCommit {
                account: self.stamped(updated.clone()),
                expected_version: account.version,
                transaction,
                write: TransactionWrite::Insert,
            };

            match self.store.commit(commit).await {
                Ok(refunded) => {
                    info!(
                        "Refund {} for booking {}: balance {} -> {}, points -{}",
                        refunded.reference, appointment_id, account.balance, updated.balance, points
                    );
                    self.notify(patient_id, NotificationEvent::RefundIssued, &refunded);
                    return Ok(refunded);
                }
                Err(LedgerError::Contention(_)) | Err(LedgerError::DuplicateReference(_)) => {
                    debug!("Refund for booking {} lost a race (attempt {}), re-reading", appointment_id, attempt + 1);
                }
                Err(e) => return Err(e),
            }
        }

        Err(LedgerError::Contention(patient_id))
    }

    // ==============================================================================
    // READS
    // ==============================================================================

    pub async fn account(&self, patient_id: Uuid) -> Result<LedgerAccount, LedgerError> {
        self.store.load_account(patient_id).await
    }

    pub async fn transaction(&self, reference: &str) -> Result<LedgerTransaction, LedgerError> {
        self.require_transaction(reference).await
    }

    pub async fn transactions(
        &self,
        patient_id: Uuid,
        page: usize,
        size: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let size = size.clamp(1, 100);
        self.store.list_transactions(patient_id, size, page.saturating_mul(size)).await
    }

    async fn require_transaction(&self, reference: &str) -> Result<LedgerTransaction, LedgerError> {
        self.store
            .find_transaction(reference)
            .await?
            .ok_or_else(|| LedgerError::TransactionNotFound(reference.to_string()))
    }

    async fn contention_for(&self, reference: &str) -> LedgerError {
        match self.store.find_transaction(reference).await {
            Ok(Some(transaction)) => LedgerError::Contention(transaction.patient_id),
            Ok(None) => LedgerError::TransactionNotFound(reference.to_string()),
            Err(e) => e,
        }
    }

    fn stamped(&self, account: LedgerAccount) -> LedgerAccount {
        LedgerAccount { updated_at: Some(self.clock.now()), ..account }
    }

    fn notify(&self, patient_id: Uuid, event: NotificationEvent, transaction: &LedgerTransaction) {
        dispatch(
            self.notifier.clone(),
            patient_id,
            event,
            json!({
                "reference": transaction.reference,
                "amount": transaction.amount,
                "points_delta": transaction.points_delta,
            }),
        );
    }
}

fn credited(account: &LedgerAccount, amount: Decimal, points: i64) -> LedgerAccount {
    let mut updated = account.clone();
    updated.balance += amount;
    updated.loyalty_points += points;
    updated.tier = tier_for(updated.loyalty_points);
    updated
}
