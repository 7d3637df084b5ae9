use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Method;
use rust_decimal::Decimal;
use serde_json::{json, Value};
use tokio::sync::Mutex;
use tracing::{debug, warn};
use uuid::Uuid;

use shared_database::{DbError, SupabaseClient};

use crate::models::{
    LedgerAccount, LedgerCommit, LedgerError, LedgerTransaction, TransactionStatus, TransactionWrite,
};

/// Persistence for ledger accounts and transactions.
///
/// `commit` is the only way an account changes. Implementations apply the
/// account update and the transaction write together or not at all.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// The account, or a zeroed one at version 0 if it has never been written.
    async fn load_account(&self, patient_id: Uuid) -> Result<LedgerAccount, LedgerError>;

    async fn find_transaction(&self, reference: &str) -> Result<Option<LedgerTransaction>, LedgerError>;

    /// Records a transaction with no effect on the account.
    async fn insert_transaction(&self, transaction: &LedgerTransaction) -> Result<LedgerTransaction, LedgerError>;

    /// Rewrites a transaction with no effect on the account, only if it is still in `from`.
    async fn update_transaction(
        &self,
        transaction: &LedgerTransaction,
        from: TransactionStatus,
    ) -> Result<LedgerTransaction, LedgerError>;

    async fn commit(&self, commit: LedgerCommit) -> Result<LedgerTransaction, LedgerError>;

    /// Newest first.
    async fn list_transactions(
        &self,
        patient_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError>;
}

// ==============================================================================
// IN-MEMORY STORE
// ==============================================================================

#[derive(Default)]
struct LedgerTables {
    accounts: HashMap<Uuid, LedgerAccount>,
    transactions: HashMap<String, LedgerTransaction>,
}

/// Single-lock store; every method is atomic with respect to the others.
#[derive(Default)]
pub struct InMemoryLedgerStore {
    tables: Mutex<LedgerTables>,
}

impl InMemoryLedgerStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn load_account(&self, patient_id: Uuid) -> Result<LedgerAccount, LedgerError> {
        let tables = self.tables.lock().await;
        Ok(tables
            .accounts
            .get(&patient_id)
            .cloned()
            .unwrap_or_else(|| LedgerAccount::empty(patient_id)))
    }

    async fn find_transaction(&self, reference: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
        let tables = self.tables.lock().await;
        Ok(tables.transactions.get(reference).cloned())
    }

    async fn insert_transaction(&self, transaction: &LedgerTransaction) -> Result<LedgerTransaction, LedgerError> {
        let mut tables = self.tables.lock().await;
        if tables.transactions.contains_key(&transaction.reference) {
            return Err(LedgerError::DuplicateReference(transaction.reference.clone()));
        }
        tables
            .transactions
            .insert(transaction.reference.clone(), transaction.clone());
        Ok(transaction.clone())
    }

    async fn update_transaction(
        &self,
        transaction: &LedgerTransaction,
        from: TransactionStatus,
    ) -> Result<LedgerTransaction, LedgerError> {
        let mut tables = self.tables.lock().await;
        match tables.transactions.get_mut(&transaction.reference) {
            Some(existing) if existing.status == from => {
                *existing = transaction.clone();
                Ok(transaction.clone())
            }
            Some(_) => Err(LedgerError::StaleTransaction(transaction.reference.clone())),
            None => Err(LedgerError::TransactionNotFound(transaction.reference.clone())),
        }
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<LedgerTransaction, LedgerError> {
        let mut tables = self.tables.lock().await;
        let patient_id = commit.account.patient_id;

        let current_version = tables.accounts.get(&patient_id).map(|a| a.version).unwrap_or(0);
        if current_version != commit.expected_version {
            return Err(LedgerError::Contention(patient_id));
        }

        if commit.account.balance < Decimal::ZERO || commit.account.loyalty_points < 0 {
            return Err(LedgerError::Storage(format!(
                "account {} would violate its non-negative constraints",
                patient_id
            )));
        }

        let reference = commit.transaction.reference.clone();
        match (commit.write, tables.transactions.get(&reference)) {
            (TransactionWrite::Insert, Some(_)) => {
                return Err(LedgerError::DuplicateReference(reference));
            }
            (TransactionWrite::Transition { .. }, None) => {
                return Err(LedgerError::TransactionNotFound(reference));
            }
            (TransactionWrite::Transition { from }, Some(existing)) if existing.status != from => {
                return Err(LedgerError::StaleTransaction(reference));
            }
            _ => {}
        }

        let mut account = commit.account;
        account.version = current_version + 1;
        tables.accounts.insert(patient_id, account);
        tables.transactions.insert(reference, commit.transaction.clone());

        Ok(commit.transaction)
    }

    async fn list_transactions(
        &self,
        patient_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let tables = self.tables.lock().await;
        let mut transactions: Vec<LedgerTransaction> = tables
            .transactions
            .values()
            .filter(|t| t.patient_id == patient_id)
            .cloned()
            .collect();
        transactions.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(transactions.into_iter().skip(offset).take(limit).collect())
    }
}

// ==============================================================================
// SUPABASE STORE
// ==============================================================================

/// PostgREST-backed store. Account writes go through the `ledger_commit`
/// database function so the version check and both row writes share one
/// database transaction.
pub struct SupabaseLedgerStore {
    client: Arc<SupabaseClient>,
}

impl SupabaseLedgerStore {
    pub fn new(client: Arc<SupabaseClient>) -> Self {
        Self { client }
    }

    fn map_db_error(err: DbError, reference: &str, patient_id: Option<Uuid>) -> LedgerError {
        if err.is_conflict() {
            if err.pg_code().as_deref() == Some("23505") {
                return LedgerError::DuplicateReference(reference.to_string());
            }
            match err.pg_message().as_deref() {
                Some("version_conflict") => {
                    if let Some(patient_id) = patient_id {
                        return LedgerError::Contention(patient_id);
                    }
                }
                Some("stale_transaction") => {
                    return LedgerError::StaleTransaction(reference.to_string());
                }
                _ => {}
            }
        }
        LedgerError::Storage(err.to_string())
    }

    fn single(rows: Vec<LedgerTransaction>, reference: &str) -> Result<LedgerTransaction, LedgerError> {
        rows.into_iter()
            .next()
            .ok_or_else(|| LedgerError::StaleTransaction(reference.to_string()))
    }
}

const RETURN_REPRESENTATION: (&str, &str) = ("Prefer", "return=representation");

#[async_trait]
impl LedgerStore for SupabaseLedgerStore {
    async fn load_account(&self, patient_id: Uuid) -> Result<LedgerAccount, LedgerError> {
        let path = format!("/rest/v1/ledger_accounts?patient_id=eq.{}", patient_id);
        let rows: Vec<LedgerAccount> = self
            .client
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        debug!("Loaded ledger account for {} ({} rows)", patient_id, rows.len());
        Ok(rows
            .into_iter()
            .next()
            .unwrap_or_else(|| LedgerAccount::empty(patient_id)))
    }

    async fn find_transaction(&self, reference: &str) -> Result<Option<LedgerTransaction>, LedgerError> {
        let path = format!(
            "/rest/v1/wallet_transactions?reference=eq.{}",
            urlencoding::encode(reference)
        );
        let rows: Vec<LedgerTransaction> = self
            .client
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        Ok(rows.into_iter().next())
    }

    async fn insert_transaction(&self, transaction: &LedgerTransaction) -> Result<LedgerTransaction, LedgerError> {
        let body = serde_json::to_value(transaction).map_err(|e| LedgerError::Storage(e.to_string()))?;
        let rows: Vec<LedgerTransaction> = self
            .client
            .request_with_headers(
                Method::POST,
                "/rest/v1/wallet_transactions",
                None,
                Some(body),
                &[RETURN_REPRESENTATION],
            )
            .await
            .map_err(|e| Self::map_db_error(e, &transaction.reference, None))?;

        Self::single(rows, &transaction.reference)
    }

    async fn update_transaction(
        &self,
        transaction: &LedgerTransaction,
        from: TransactionStatus,
    ) -> Result<LedgerTransaction, LedgerError> {
        let path = format!(
            "/rest/v1/wallet_transactions?reference=eq.{}&status=eq.{}",
            urlencoding::encode(&transaction.reference),
            from.as_str()
        );
        let body = json!({
            "status": transaction.status,
            "points_delta": transaction.points_delta,
            "external_ref": transaction.external_ref,
            "failure_reason": transaction.failure_reason,
            "completed_at": transaction.completed_at,
        });

        let rows: Vec<LedgerTransaction> = self
            .client
            .request_with_headers(Method::PATCH, &path, None, Some(body), &[RETURN_REPRESENTATION])
            .await
            .map_err(|e| Self::map_db_error(e, &transaction.reference, None))?;

        // An empty result means the status filter no longer matched.
        Self::single(rows, &transaction.reference)
    }

    async fn commit(&self, commit: LedgerCommit) -> Result<LedgerTransaction, LedgerError> {
        let reference = commit.transaction.reference.clone();
        let patient_id = commit.account.patient_id;

        let (write, from_status) = match commit.write {
            TransactionWrite::Insert => ("insert", Value::Null),
            TransactionWrite::Transition { from } => ("transition", json!(from.as_str())),
        };
        let transaction = serde_json::to_value(&commit.transaction)
            .map_err(|e| LedgerError::Storage(e.to_string()))?;

        let args = json!({
            "p_patient_id": patient_id,
            "p_expected_version": commit.expected_version,
            "p_balance": commit.account.balance,
            "p_loyalty_points": commit.account.loyalty_points,
            "p_tier": commit.account.tier,
            "p_transaction": transaction,
            "p_write": write,
            "p_from_status": from_status,
        });

        let result: Value = self
            .client
            .rpc("ledger_commit", args)
            .await
            .map_err(|e| Self::map_db_error(e, &reference, Some(patient_id)))?;

        serde_json::from_value(result).map_err(|e| {
            warn!("ledger_commit returned an unexpected row for {}: {}", reference, e);
            LedgerError::Storage(e.to_string())
        })
    }

    async fn list_transactions(
        &self,
        patient_id: Uuid,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<LedgerTransaction>, LedgerError> {
        let path = format!(
            "/rest/v1/wallet_transactions?patient_id=eq.{}&order=created_at.desc&limit={}&offset={}",
            patient_id, limit, offset
        );
        self.client
            .request(Method::GET, &path, None, None)
            .await
            .map_err(|e| LedgerError::Storage(e.to_string()))
    }
}
