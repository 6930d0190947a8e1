//! Black-box tests of the HTTP adapter.
//!
//! Drives the full router (auth, rate limiting, handlers) over an in-memory
//! SQLite ledger and a scripted card processor.
//!
//! This test requires the `sqlite` feature flag.

#![cfg(feature = "sqlite")]

use async_trait::async_trait;
use axum::{
    Router,
    body::Body,
    http::{Method, Request, StatusCode},
};
use http_body_util::BodyExt;
use jsonwebtoken::{Algorithm, EncodingKey, Header, encode};
use serde_json::{Value, json};
use tower::ServiceExt;

use settlement_hex::{
    SettlementOrchestrator,
    inbound::{Claims, HttpServer, JwtVerifier},
};
use settlement_repo::Repo;
use settlement_types::{
    AccountNumber, ChargeOutcome, GatewayError, Instrument, Money, PaymentGateway, Period,
};

const SECRET: &str = "test-secret";
const ACCOUNT: &str = "1234567890";
const DECLINED_CARD: &str = "4000000000000002";
const UNREACHABLE_CARD: &str = "4000000000000119";

/// Approves every card except `DECLINED_CARD` and `UNREACHABLE_CARD`.
struct StubProcessor;

#[async_trait]
impl PaymentGateway for StubProcessor {
    async fn charge(
        &self,
        _amount: Money,
        instrument: &Instrument,
    ) -> Result<ChargeOutcome, GatewayError> {
        match instrument.card_number() {
            DECLINED_CARD => Ok(ChargeOutcome::Declined {
                reason: "Payment failed".into(),
            }),
            UNREACHABLE_CARD => Err(GatewayError::Transport(
                "error sending request for url (http://10.9.8.7:8001/api/v1/payments): connection reset"
                    .into(),
            )),
            _ => Ok(ChargeOutcome::Approved {
                reference: "ch_test".into(),
            }),
        }
    }
}

fn token(subject: &str, roles: &[&str]) -> String {
    let claims = Claims {
        sub: subject.into(),
        exp: (chrono::Utc::now().timestamp() + 3600) as u64,
        roles: roles.iter().map(|r| r.to_string()).collect(),
        iss: None,
    };
    encode(
        &Header::new(Algorithm::HS256),
        &claims,
        &EncodingKey::from_secret(SECRET.as_bytes()),
    )
    .unwrap()
}

/// Creates an app with one account owned by `user-1` and one 1500.00 bill for 2024-03.
async fn create_app(requests_per_minute: u32) -> Router {
    let repo = Repo::new("sqlite::memory:").await.unwrap();
    let account = AccountNumber::parse(ACCOUNT).unwrap();
    repo.register_account(&account, "user-1").await.unwrap();
    repo.issue_bill(
        &account,
        &Period::parse("2024-03").unwrap(),
        Money::new(150000).unwrap(),
    )
    .await
    .unwrap();

    let orchestrator = SettlementOrchestrator::new(repo.clone(), repo, StubProcessor);
    HttpServer::with_rate_limit(
        orchestrator,
        JwtVerifier::new(SECRET, None),
        requests_per_minute,
    )
    .router()
}

fn settle_body(amount: f64, card_number: &str) -> Value {
    json!({
        "account_number": ACCOUNT,
        "period": "2024-03",
        "amount": amount,
        "card_number": card_number,
        "card_holder": "IVAN PETROV",
        "card_expiration_date": "2027-12-31",
        "card_cvv": "123",
        "inn_receiver": "770123456789"
    })
}

fn request(method: Method, uri: &str, token: Option<&str>, body: Option<Value>) -> Request<Body> {
    let mut builder = Request::builder().method(method).uri(uri);
    if let Some(token) = token {
        builder = builder.header("Authorization", format!("Bearer {}", token));
    }
    match body {
        Some(body) => builder
            .header("Content-Type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

async fn send(app: &Router, req: Request<Body>) -> (StatusCode, Value) {
    let response = app.clone().oneshot(req).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}

#[tokio::test]
async fn test_health_is_public() {
    let app = create_app(100).await;

    let (status, body) = send(&app, request(Method::GET, "/health", None, None)).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "healthy");
}

#[tokio::test]
async fn test_openapi_document_is_public() {
    let app = create_app(100).await;

    let (status, body) = send(
        &app,
        request(Method::GET, "/api-docs/openapi.json", None, None),
    )
    .await;

    assert_eq!(status, StatusCode::OK);
    assert!(body["paths"]["/api/payments"].is_object());
}

#[tokio::test]
async fn test_missing_or_forged_token_is_rejected() {
    let app = create_app(100).await;
    let uri = format!("/api/accounts/{}/bills", ACCOUNT);

    let (status, body) = send(&app, request(Method::GET, &uri, None, None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["kind"], "Unauthorized");

    let forged = encode(
        &Header::new(Algorithm::HS256),
        &Claims {
            sub: "user-1".into(),
            exp: (chrono::Utc::now().timestamp() + 3600) as u64,
            roles: vec![],
            iss: None,
        },
        &EncodingKey::from_secret(b"wrong-secret"),
    )
    .unwrap();
    let (status, _) = send(&app, request(Method::GET, &uri, Some(&forged), None)).await;
    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn test_settle_then_resubmit() {
    let app = create_app(100).await;
    let user = token("user-1", &[]);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/payments",
            Some(&user),
            Some(settle_body(1500.00, "4111111111111111")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
    assert_eq!(body["status"], "completed");
    assert_eq!(body["amount"], 1500.0);
    assert_eq!(body["bills"].as_array().unwrap().len(), 1);
    let payment_id = body["payment_id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            &format!("/api/accounts/{}/bills?period=2024-03", ACCOUNT),
            Some(&user),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["bills"][0]["status"], "paid");
    assert_eq!(body["unpaid_amount"], 0.0);

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            &format!("/api/payments/{}", payment_id),
            Some(&user),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["gateway_reference"], "ch_test");

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/payments",
            Some(&user),
            Some(settle_body(1500.00, "4111111111111111")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "NoUnpaidBills");
    assert_eq!(body["code"], 404);
}

#[tokio::test]
async fn test_settle_error_kinds() {
    let app = create_app(100).await;
    let user = token("user-1", &[]);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/payments",
            Some(&user),
            Some(settle_body(1400.00, "4111111111111111")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "AmountMismatch");

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/payments",
            Some(&user),
            Some(settle_body(1500.00, "4111")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "ValidationError");

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/payments",
            Some(&user),
            Some(settle_body(1500.00, DECLINED_CARD)),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::PAYMENT_REQUIRED);
    assert_eq!(body["kind"], "PaymentDeclined");
    let declined_id = body["payment_id"].as_str().unwrap().to_string();

    let (_, body) = send(
        &app,
        request(
            Method::GET,
            &format!("/api/payments/{}", declined_id),
            Some(&user),
            None,
        ),
    )
    .await;
    assert_eq!(body["status"], "failed");
    assert_eq!(body["failure_reason"], "Payment failed");

    // The decline released the bill for a new attempt.
    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/payments",
            Some(&user),
            Some(settle_body(1500.00, "5555555555554444")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_unreadable_settle_body_is_validation_error() {
    let app = create_app(100).await;
    let user = token("user-1", &[]);

    let mut sub_cent = settle_body(1500.00, "4111111111111111");
    sub_cent["amount"] = json!(1500.005);
    let mut missing_card = settle_body(1500.00, "4111111111111111");
    missing_card.as_object_mut().unwrap().remove("card_number");
    let mut string_amount = settle_body(1500.00, "4111111111111111");
    string_amount["amount"] = json!("fifteen hundred");

    for body in [sub_cent, missing_card, string_amount] {
        let (status, body) = send(
            &app,
            request(Method::POST, "/api/payments", Some(&user), Some(body)),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["kind"], "ValidationError");
        assert_eq!(body["code"], 400);
        assert!(!body["error"].as_str().unwrap().is_empty());
    }

    let not_json = Request::builder()
        .method(Method::POST)
        .uri("/api/payments")
        .header("Authorization", format!("Bearer {}", user))
        .header("Content-Type", "application/json")
        .body(Body::from("{amount: 1500"))
        .unwrap();
    let (status, body) = send(&app, not_json).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["kind"], "ValidationError");

    // Nothing was reserved; the bill is still payable.
    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/payments",
            Some(&user),
            Some(settle_body(1500.00, "4111111111111111")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::CREATED);
}

#[tokio::test]
async fn test_gateway_failure_details_stay_internal() {
    let app = create_app(100).await;
    let user = token("user-1", &[]);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/payments",
            Some(&user),
            Some(settle_body(1500.00, UNREACHABLE_CARD)),
        ),
    )
    .await;

    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["kind"], "GatewayUnavailable");
    assert_eq!(body["error"], "Payment service unavailable, please retry");
    assert!(body["payment_id"].is_string());
    let rendered = body.to_string();
    assert!(!rendered.contains("10.9.8.7"));
    assert!(!rendered.contains("connection reset"));
}

#[tokio::test]
async fn test_foreign_account_is_not_found() {
    let app = create_app(100).await;
    let stranger = token("user-2", &[]);

    let (status, body) = send(
        &app,
        request(
            Method::POST,
            "/api/payments",
            Some(&stranger),
            Some(settle_body(1500.00, "4111111111111111")),
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["kind"], "AccountNotFound");

    let (status, _) = send(
        &app,
        request(
            Method::GET,
            &format!("/api/accounts/{}/payments", ACCOUNT),
            Some(&stranger),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn test_reconciliation_requires_operator() {
    let app = create_app(100).await;

    let (status, body) = send(
        &app,
        request(
            Method::GET,
            "/api/reconciliation/payments",
            Some(&token("user-1", &[])),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["kind"], "Forbidden");

    let operator = token("ops", &["operator"]);
    let (status, body) = send(
        &app,
        request(Method::GET, "/api/reconciliation/payments", Some(&operator), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!([]));

    let (status, body) = send(
        &app,
        request(Method::POST, "/api/reconciliation/sweep", Some(&operator), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["flagged"], json!([]));

    let (status, _) = send(
        &app,
        request(
            Method::POST,
            "/api/reconciliation/payments/not-a-uuid/commit",
            Some(&operator),
            None,
        ),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_rate_limiting_returns_429_when_exceeded() {
    // Only 3 requests allowed per minute per caller
    let app = create_app(3).await;
    let user = token("user-1", &[]);
    let uri = format!("/api/accounts/{}/payments", ACCOUNT);

    for i in 1..=3 {
        let (status, _) = send(&app, request(Method::GET, &uri, Some(&user), None)).await;
        assert_ne!(
            status,
            StatusCode::TOO_MANY_REQUESTS,
            "Request {} should not be rate limited (quota not yet exceeded)",
            i
        );
    }

    let (status, body) = send(&app, request(Method::GET, &uri, Some(&user), None)).await;
    assert_eq!(status, StatusCode::TOO_MANY_REQUESTS);
    assert_eq!(body["kind"], "RateLimited");

    // Quotas are per caller.
    let (status, _) = send(
        &app,
        request(Method::GET, &uri, Some(&token("ops", &["operator"])), None),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn test_health_bypasses_rate_limiting() {
    let app = create_app(1).await;

    for _ in 0..5 {
        let (status, _) = send(&app, request(Method::GET, "/health", None, None)).await;
        assert_eq!(status, StatusCode::OK);
    }
}
