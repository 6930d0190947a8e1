//! # Gateway Mock
//!
//! A stand-in card processor speaking the same wire format as the real one.
//! Validates requests, optionally verifies the `X-Signature` HMAC, and
//! approves a configurable share of charges at random.

use std::sync::Arc;

use axum::{
    Json, Router,
    body::Bytes,
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
};
use rand::Rng;
use tower_http::trace::TraceLayer;

use settlement_types::security::verify_signature;
use settlement_types::{ChargeRequest, ChargeResponse, ChargeStatus, Instrument};

pub use settlement_types::security::SIGNATURE_HEADER;

pub const DEFAULT_APPROVAL_RATE: f64 = 0.95;

/// Behaviour of the mock processor.
#[derive(Debug, Clone)]
pub struct MockConfig {
    /// Probability in `[0, 1]` that a valid charge is approved.
    pub approval_rate: f64,
    /// When set, requests must carry a valid `X-Signature`.
    pub secret: Option<String>,
}

impl Default for MockConfig {
    fn default() -> Self {
        Self {
            approval_rate: DEFAULT_APPROVAL_RATE,
            secret: None,
        }
    }
}

impl MockConfig {
    pub fn new(approval_rate: f64, secret: Option<String>) -> Self {
        let approval_rate = if approval_rate.is_nan() {
            DEFAULT_APPROVAL_RATE
        } else {
            approval_rate.clamp(0.0, 1.0)
        };
        Self {
            approval_rate,
            secret,
        }
    }
}

/// Builds the processor router.
pub fn router(config: MockConfig) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/api/v1/payments", post(charge))
        .layer(TraceLayer::new_for_http())
        .with_state(Arc::new(config))
}

async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

fn rejection(status: StatusCode, message: impl Into<String>) -> Response {
    (
        status,
        Json(serde_json::json!({
            "status": "failed",
            "message": message.into()
        })),
    )
        .into_response()
}

async fn charge(State(config): State<Arc<MockConfig>>, headers: HeaderMap, body: Bytes) -> Response {
    if let Some(secret) = &config.secret {
        let signature = headers
            .get(SIGNATURE_HEADER)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default();
        if !verify_signature(&body, signature, secret) {
            tracing::warn!("Rejected charge with missing or invalid signature");
            return rejection(StatusCode::UNAUTHORIZED, "Invalid signature");
        }
    }

    let req: ChargeRequest = match serde_json::from_slice(&body) {
        Ok(req) => req,
        Err(e) => return rejection(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    };
    if req.amount.is_zero() {
        return rejection(StatusCode::UNPROCESSABLE_ENTITY, "Amount must be positive");
    }
    let instrument = match Instrument::new(
        req.card_number,
        req.card_holder,
        req.card_expiration_date,
        req.card_cvv,
        req.inn_receiver,
    ) {
        Ok(instrument) => instrument,
        Err(e) => return rejection(StatusCode::UNPROCESSABLE_ENTITY, e.to_string()),
    };

    let id = uuid::Uuid::new_v4().to_string();
    tracing::info!(
        charge_id = %id,
        amount = %req.amount,
        card_last4 = %instrument.last4(),
        "Processing mock charge"
    );

    let approved = rand::rng().random_bool(config.approval_rate);
    let response = if approved {
        tracing::info!(charge_id = %id, "Mock charge successful");
        ChargeResponse {
            id,
            status: ChargeStatus::Success,
            message: Some("Payment successful".into()),
        }
    } else {
        tracing::warn!(charge_id = %id, "Mock charge failed (simulated decline)");
        ChargeResponse {
            id,
            status: ChargeStatus::Failed,
            message: Some("Payment failed".into()),
        }
    };

    (StatusCode::OK, Json(response)).into_response()
}
