use std::sync::Arc;

use assert_matches::assert_matches;
use chrono::Utc;
use rust_decimal_macros::dec;
use serde_json::json;
use uuid::Uuid;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

use shared_database::SupabaseClient;
use shared_utils::test_utils::{MockSupabaseResponses, TestConfig};
use wallet_cell::models::*;
use wallet_cell::services::{LedgerStore, SupabaseLedgerStore};

fn store(server: &MockServer) -> SupabaseLedgerStore {
    let config = TestConfig::with_supabase_url(server.uri()).to_app_config();
    SupabaseLedgerStore::new(Arc::new(SupabaseClient::new(&config)))
}

fn pending_deposit(patient_id: Uuid) -> LedgerTransaction {
    LedgerTransaction {
        id: Uuid::new_v4(),
        reference: format!("TOPUP{}", Uuid::new_v4().simple()),
        patient_id,
        transaction_type: TransactionType::Deposit,
        amount: dec!(100000),
        status: TransactionStatus::Pending,
        appointment_id: None,
        points_delta: 0,
        description: None,
        payment_method: Some("vnpay".to_string()),
        external_ref: None,
        failure_reason: None,
        created_at: Utc::now(),
        completed_at: None,
    }
}

#[tokio::test]
async fn test_missing_account_row_loads_as_empty() {
    let server = MockServer::start().await;
    let patient = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/ledger_accounts"))
        .and(query_param("patient_id", format!("eq.{}", patient)))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    let account = store(&server).load_account(patient).await.unwrap();
    assert_eq!(account.version, 0);
    assert_eq!(account.balance, dec!(0));
}

#[tokio::test]
async fn test_existing_account_row_is_decoded() {
    let server = MockServer::start().await;
    let patient = Uuid::new_v4();
    Mock::given(method("GET"))
        .and(path("/rest/v1/ledger_accounts"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([
            MockSupabaseResponses::ledger_account_response(&patient.to_string(), 500000, 2000, 3)
        ])))
        .mount(&server)
        .await;

    let account = store(&server).load_account(patient).await.unwrap();
    assert_eq!(account.balance, dec!(500000));
    assert_eq!(account.loyalty_points, 2000);
    assert_eq!(account.tier, LoyaltyTier::Bronze);
    assert_eq!(account.version, 3);
}

#[tokio::test]
async fn test_duplicate_reference_is_reported() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/wallet_transactions"))
        .respond_with(ResponseTemplate::new(409).set_body_json(MockSupabaseResponses::error_response(
            "duplicate key value violates unique constraint \"wallet_transactions_reference_key\"",
            "23505",
        )))
        .mount(&server)
        .await;

    let deposit = pending_deposit(Uuid::new_v4());
    assert_matches!(
        store(&server).insert_transaction(&deposit).await,
        Err(LedgerError::DuplicateReference(ref r)) if *r == deposit.reference
    );
}

#[tokio::test]
async fn test_commit_version_conflict_is_contention() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/rest/v1/rpc/ledger_commit"))
        .respond_with(
            ResponseTemplate::new(409)
                .set_body_json(MockSupabaseResponses::error_response("version_conflict", "P0001")),
        )
        .expect(1)
        .mount(&server)
        .await;

    let patient = Uuid::new_v4();
    let commit = LedgerCommit {
        account: LedgerAccount::empty(patient),
        expected_version: 0,
        transaction: pending_deposit(patient),
        write: TransactionWrite::Insert,
    };

    assert_matches!(store(&server).commit(commit).await, Err(LedgerError::Contention(id)) if id == patient);
}

#[tokio::test]
async fn test_update_on_moved_status_is_stale() {
    let server = MockServer::start().await;
    let mut deposit = pending_deposit(Uuid::new_v4());
    Mock::given(method("PATCH"))
        .and(path("/rest/v1/wallet_transactions"))
        .and(query_param("reference", format!("eq.{}", deposit.reference)))
        .and(query_param("status", "eq.pending"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([])))
        .expect(1)
        .mount(&server)
        .await;

    deposit.status = TransactionStatus::Failed;
    deposit.failure_reason = Some("Payment failed: ResponseCode=24".to_string());

    assert_matches!(
        store(&server).update_transaction(&deposit, TransactionStatus::Pending).await,
        Err(LedgerError::StaleTransaction(_))
    );
}
