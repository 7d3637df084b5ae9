use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ==============================================================================
// LEDGER TYPES
// ==============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionType {
    Deposit,
    Payment,
    Refund,
    Reward,
    Withdrawal,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionStatus {
    Pending,
    Completed,
    Failed,
    Cancelled,
}

impl TransactionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionStatus::Pending => "pending",
            TransactionStatus::Completed => "completed",
            TransactionStatus::Failed => "failed",
            TransactionStatus::Cancelled => "cancelled",
        }
    }
}

/// Loyalty level, ordered from lowest to highest.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LoyaltyTier {
    #[default]
    Bronze,
    Silver,
    Gold,
    Platinum,
}

impl LoyaltyTier {
    pub const SILVER_THRESHOLD: i64 = 1_000;
    pub const GOLD_THRESHOLD: i64 = 5_000;
    pub const PLATINUM_THRESHOLD: i64 = 10_000;

    pub fn from_points(points: i64) -> Self {
        match points {
            p if p >= Self::PLATINUM_THRESHOLD => LoyaltyTier::Platinum,
            p if p >= Self::GOLD_THRESHOLD => LoyaltyTier::Gold,
            p if p >= Self::SILVER_THRESHOLD => LoyaltyTier::Silver,
            _ => LoyaltyTier::Bronze,
        }
    }
}

/// Per-patient wallet state. Only the ledger writes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerAccount {
    pub patient_id: Uuid,
    pub balance: Decimal,
    pub loyalty_points: i64,
    pub tier: LoyaltyTier,
    /// Optimistic concurrency token; 0 means the row does not exist yet.
    pub version: i64,
    pub updated_at: Option<DateTime<Utc>>,
}

impl LedgerAccount {
    pub fn empty(patient_id: Uuid) -> Self {
        Self {
            patient_id,
            balance: Decimal::ZERO,
            loyalty_points: 0,
            tier: LoyaltyTier::Bronze,
            version: 0,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    pub id: Uuid,
    /// Unique per transaction; doubles as the idempotency key.
    pub reference: String,
    pub patient_id: Uuid,
    pub transaction_type: TransactionType,
    /// Always non-negative, direction comes from `transaction_type`.
    pub amount: Decimal,
    pub status: TransactionStatus,
    pub appointment_id: Option<Uuid>,
    pub points_delta: i64,
    pub description: Option<String>,
    pub payment_method: Option<String>,
    pub external_ref: Option<String>,
    pub failure_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

/// How a commit writes its transaction row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionWrite {
    /// New row; the reference must not exist yet.
    Insert,
    /// Existing row, only if it is still in `from`.
    Transition { from: TransactionStatus },
}

/// One all-or-nothing ledger write: the new account state, guarded by the
/// version it was computed from, plus the transaction that caused it.
#[derive(Debug, Clone)]
pub struct LedgerCommit {
    pub account: LedgerAccount,
    pub expected_version: i64,
    pub transaction: LedgerTransaction,
    pub write: TransactionWrite,
}

pub fn payment_reference(appointment_id: Uuid) -> String {
    format!("PAY_APT{}", appointment_id.simple())
}

pub fn refund_reference(appointment_id: Uuid) -> String {
    format!("REFUND_APT{}", appointment_id.simple())
}

// ==============================================================================
// REQUEST / RESPONSE TYPES
// ==============================================================================

#[derive(Debug, Deserialize)]
pub struct TopUpRequest {
    pub amount: Decimal,
    pub payment_method: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct TopUpResponse {
    pub reference: String,
    pub amount: Decimal,
    pub payment_url: String,
}

#[derive(Debug, Deserialize)]
pub struct TransactionPageQuery {
    pub page: Option<usize>,
    pub size: Option<usize>,
}

#[derive(Debug, Serialize)]
pub struct WalletSummary {
    pub patient_id: Uuid,
    pub balance: Decimal,
    pub loyalty_points: i64,
    pub tier: LoyaltyTier,
}

impl From<LedgerAccount> for WalletSummary {
    fn from(account: LedgerAccount) -> Self {
        Self {
            patient_id: account.patient_id,
            balance: account.balance,
            loyalty_points: account.loyalty_points,
            tier: account.tier,
        }
    }
}

// ==============================================================================
// ERRORS
// ==============================================================================

#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum LedgerError {
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    #[error("Insufficient wallet balance. Required: {required}, available: {available}")]
    InsufficientFunds { required: Decimal, available: Decimal },

    #[error("Transaction not found: {0}")]
    TransactionNotFound(String),

    #[error("Transaction {0} is not a deposit")]
    NotADeposit(String),

    #[error("Transaction reference already exists: {0}")]
    DuplicateReference(String),

    #[error("Transaction {0} changed status concurrently")]
    StaleTransaction(String),

    #[error("Account {0} is being updated concurrently, try again")]
    Contention(Uuid),

    #[error("Ledger storage error: {0}")]
    Storage(String),
}
