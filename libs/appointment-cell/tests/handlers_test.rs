use std::sync::Arc;

use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use rust_decimal_macros::dec;
use serde_json::{json, Value};
use tower::ServiceExt;
use uuid::Uuid;

use appointment_cell::services::{BookingCoordinator, InMemoryBookingStore, InMemoryProviderDirectory};
use appointment_cell::{appointment_routes, AppointmentState};
use payment_gateway_cell::VnPayGateway;
use shared_utils::test_utils::{JwtTestUtils, TestConfig, TestUser};
use wallet_cell::services::{InMemoryLedgerStore, Ledger};

struct TestApp {
    router: Router,
    config: TestConfig,
    doctor: Uuid,
}

async fn setup() -> TestApp {
    let test_config = TestConfig::default();
    let config = test_config.to_arc();
    let ledger = Arc::new(Ledger::new(Arc::new(InMemoryLedgerStore::new()), &config));
    let providers = Arc::new(InMemoryProviderDirectory::new());
    let doctor = Uuid::new_v4();
    providers.upsert(doctor, true, dec!(200000)).await;

    let coordinator = BookingCoordinator::new(
        Arc::new(InMemoryBookingStore::new()),
        providers,
        ledger,
        Arc::new(VnPayGateway::new(&config)),
        &config,
    );

    let router = appointment_routes(AppointmentState { config, coordinator: Arc::new(coordinator) });
    TestApp { router, config: test_config, doctor }
}

fn token_for(app: &TestApp, user: &TestUser) -> String {
    JwtTestUtils::create_test_token(user, &app.config.jwt_secret, Some(1))
}

fn booking_body(doctor: Uuid, method: &str) -> Value {
    json!({
        "doctor_id": doctor,
        "appointment_date": "2099-03-15",
        "appointment_time": "09:30:00",
        "payment_method": method,
        "notes": "Follow-up visit"
    })
}

async fn send(app: &TestApp, method: &str, uri: &str, token: Option<&str>, body: Option<Value>) -> (StatusCode, Value) {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header(header::AUTHORIZATION, format!("Bearer {}", token));
    }
    let request = match body {
        Some(body) => builder
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    };

    let response = app.router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let json = if bytes.is_empty() { Value::Null } else { serde_json::from_slice(&bytes).unwrap() };
    (status, json)
}

#[tokio::test]
async fn test_booking_requires_authentication() {
    let app = setup().await;
    let (status, _) = send(&app, "POST", "/", None, Some(booking_body(app.doctor, "cash"))).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_create_and_fetch_booking() {
    let app = setup().await;
    let patient = TestUser::patient("patient@example.com");
    let token = token_for(&app, &patient);

    let (status, json) = send(&app, "POST", "/", Some(&token), Some(booking_body(app.doctor, "cash"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["success"], true);
    assert_eq!(json["appointment"]["status"], "requested");
    assert_eq!(json["appointment"]["payment_status"], "unsettled");
    assert_eq!(json["appointment"]["patient_id"], patient.id);
    assert!(json["payment_url"].is_null());

    let id = json["appointment"]["id"].as_str().unwrap().to_string();
    let (status, json) = send(&app, "GET", &format!("/{}", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["appointment"]["id"], id);

    let stranger = TestUser::patient("stranger@example.com");
    let (status, _) = send(&app, "GET", &format!("/{}", id), Some(&token_for(&app, &stranger)), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
}

#[tokio::test]
async fn test_double_booking_is_a_conflict() {
    let app = setup().await;
    let first = TestUser::patient("first@example.com");
    let second = TestUser::patient("second@example.com");

    let (status, _) = send(&app, "POST", "/", Some(&token_for(&app, &first)), Some(booking_body(app.doctor, "cash"))).await;
    assert_eq!(status, StatusCode::OK);

    let (status, json) =
        send(&app, "POST", "/", Some(&token_for(&app, &second)), Some(booking_body(app.doctor, "cash"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("already taken"));

    let uri = format!("/slots/check?doctor_id={}&date=2099-03-15&time=09:30:00", app.doctor);
    let (status, json) = send(&app, "GET", &uri, Some(&token_for(&app, &second)), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["available"], false);
}

#[tokio::test]
async fn test_available_slots_for_a_day() {
    let app = setup().await;
    let patient = TestUser::patient("slots@example.com");
    let token = token_for(&app, &patient);
    let uri = format!("/slots?doctor_id={}&date=2099-03-15", app.doctor);

    let (status, json) = send(&app, "GET", &uri, Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let slots = json["available_slots"].as_array().unwrap();
    assert_eq!(slots.len(), 17);
    assert_eq!(slots[0], "08:00");
    assert_eq!(slots[16], "17:00");

    let (_, created) = send(&app, "POST", "/", Some(&token), Some(booking_body(app.doctor, "cash"))).await;
    let (_, json) = send(&app, "GET", &uri, Some(&token), None).await;
    let slots = json["available_slots"].as_array().unwrap();
    assert_eq!(slots.len(), 16);
    assert!(!slots.contains(&json!("09:30")));

    let id = created["appointment"]["id"].as_str().unwrap();
    let (status, _) = send(&app, "POST", &format!("/{}/cancel", id), Some(&token), None).await;
    assert_eq!(status, StatusCode::OK);
    let (_, json) = send(&app, "GET", &uri, Some(&token), None).await;
    assert!(json["available_slots"].as_array().unwrap().contains(&json!("09:30")));
}

#[tokio::test]
async fn test_wallet_booking_without_balance_is_a_conflict() {
    let app = setup().await;
    let patient = TestUser::patient("patient@example.com");

    let (status, json) =
        send(&app, "POST", "/", Some(&token_for(&app, &patient)), Some(booking_body(app.doctor, "wallet"))).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("Insufficient"));
}

#[tokio::test]
async fn test_gateway_booking_returns_payment_url() {
    let app = setup().await;
    let patient = TestUser::patient("patient@example.com");

    let (status, json) =
        send(&app, "POST", "/", Some(&token_for(&app, &patient)), Some(booking_body(app.doctor, "vnpay"))).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["appointment"]["payment_status"], "awaiting_gateway");
    assert!(json["payment_url"].as_str().unwrap().starts_with("https://sandbox.vnpayment.vn/"));
}

#[tokio::test]
async fn test_unknown_doctor_is_not_found() {
    let app = setup().await;
    let patient = TestUser::patient("patient@example.com");

    let (status, _) =
        send(&app, "POST", "/", Some(&token_for(&app, &patient)), Some(booking_body(Uuid::new_v4(), "cash"))).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_confirm_cancel_flow() {
    let app = setup().await;
    let patient = TestUser::patient("patient@example.com");
    let doctor = TestUser::with_id(app.doctor, "doctor");
    let patient_token = token_for(&app, &patient);
    let doctor_token = token_for(&app, &doctor);

    let (_, json) = send(&app, "POST", "/", Some(&patient_token), Some(booking_body(app.doctor, "cash"))).await;
    let id = json["appointment"]["id"].as_str().unwrap().to_string();

    // Patients cannot confirm their own bookings
    let (status, _) = send(&app, "POST", &format!("/{}/confirm", id), Some(&patient_token), None).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, json) = send(&app, "POST", &format!("/{}/confirm", id), Some(&doctor_token), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["appointment"]["status"], "confirmed");

    let (_, json) = send(&app, "GET", "/", Some(&doctor_token), None).await;
    assert_eq!(json["appointments"].as_array().unwrap().len(), 1);

    let (status, json) = send(
        &app,
        "POST",
        &format!("/{}/cancel", id),
        Some(&patient_token),
        Some(json!({"reason": "travelling"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["appointment"]["status"], "cancelled");

    let (status, json) = send(&app, "POST", &format!("/{}/cancel", id), Some(&patient_token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert!(json["error"].as_str().unwrap().contains("already cancelled"));

    let (status, _) = send(&app, "POST", &format!("/{}/complete", id), Some(&doctor_token), None).await;
    assert_eq!(status, StatusCode::CONFLICT);
}
