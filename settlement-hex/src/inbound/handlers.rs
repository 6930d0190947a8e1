//! HTTP request handlers.

use std::sync::Arc;

use axum::{
    Extension, Json,
    extract::{Path, Query, State, rejection::JsonRejection},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::Deserialize;

use settlement_types::{
    AccountNumber, AppError, BillLedger, ErrorResponse, PaymentGateway, PaymentId, PaymentLedger,
    Period, ResolveRequest, SettleRequest, SettlementError, SweepResponse,
};

use crate::SettlementOrchestrator;
use crate::caller::Caller;

/// Application state shared across handlers.
pub struct AppState<B: BillLedger, P: PaymentLedger, G: PaymentGateway> {
    pub orchestrator: SettlementOrchestrator<B, P, G>,
}

/// Wrapper to implement IntoResponse for the service errors (orphan rule workaround).
pub enum ApiError {
    App(AppError),
    Settlement(SettlementError),
}

impl From<AppError> for ApiError {
    fn from(err: AppError) -> Self {
        ApiError::App(err)
    }
}

impl From<SettlementError> for ApiError {
    fn from(err: SettlementError) -> Self {
        ApiError::Settlement(err)
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::App(AppError::BadRequest(rejection.body_text()))
    }
}

const UNAVAILABLE_DETAIL: &str = "Payment service unavailable, please retry";
const INTERNAL_DETAIL: &str = "Internal server error";

fn settlement_status(err: &SettlementError) -> StatusCode {
    match err {
        SettlementError::Validation(_) | SettlementError::AmountMismatch { .. } => {
            StatusCode::BAD_REQUEST
        }
        SettlementError::AccountNotFound(_) | SettlementError::NoUnpaidBills { .. } => {
            StatusCode::NOT_FOUND
        }
        SettlementError::BillsAlreadyClaimed(_) => StatusCode::CONFLICT,
        SettlementError::PaymentDeclined { .. } => StatusCode::PAYMENT_REQUIRED,
        SettlementError::GatewayUnavailable { .. } => StatusCode::SERVICE_UNAVAILABLE,
        SettlementError::SettlementInconsistent { .. } | SettlementError::Internal(_) => {
            StatusCode::INTERNAL_SERVER_ERROR
        }
    }
}

fn app_status(err: &AppError) -> (StatusCode, &'static str) {
    match err {
        AppError::BadRequest(_) => (StatusCode::BAD_REQUEST, "ValidationError"),
        AppError::NotFound(_) => (StatusCode::NOT_FOUND, "NotFound"),
        AppError::Unauthorized(_) => (StatusCode::UNAUTHORIZED, "Unauthorized"),
        AppError::Forbidden(_) => (StatusCode::FORBIDDEN, "Forbidden"),
        AppError::Conflict(_) => (StatusCode::CONFLICT, "Conflict"),
        AppError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "Internal"),
    }
}

/// Detail shown to callers. Transport and storage failures are logged, never echoed.
fn settlement_detail(err: &SettlementError) -> String {
    match err {
        SettlementError::GatewayUnavailable { .. } => UNAVAILABLE_DETAIL.to_string(),
        SettlementError::SettlementInconsistent { payment_id, .. } => format!(
            "Payment {} was charged but could not be applied to bills; an operator has been alerted",
            payment_id
        ),
        SettlementError::Internal(_) => INTERNAL_DETAIL.to_string(),
        other => other.to_string(),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, body) = match self {
            ApiError::Settlement(err) => {
                let status = settlement_status(&err);
                if status.is_server_error() {
                    tracing::error!(
                        kind = err.kind(),
                        payment_id = ?err.payment_id(),
                        error = %err,
                        "Settlement request failed"
                    );
                }
                let body = ErrorResponse {
                    error: settlement_detail(&err),
                    kind: err.kind().to_string(),
                    code: status.as_u16(),
                    payment_id: err.payment_id(),
                };
                (status, body)
            }
            ApiError::App(err) => {
                let (status, kind) = app_status(&err);
                let error = match err {
                    AppError::Internal(msg) => {
                        tracing::error!(error = %msg, "Request failed");
                        INTERNAL_DETAIL.to_string()
                    }
                    AppError::BadRequest(msg)
                    | AppError::NotFound(msg)
                    | AppError::Unauthorized(msg)
                    | AppError::Forbidden(msg)
                    | AppError::Conflict(msg) => msg,
                };
                let body = ErrorResponse {
                    error,
                    kind: kind.to_string(),
                    code: status.as_u16(),
                    payment_id: None,
                };
                (status, body)
            }
        };

        (status, Json(body)).into_response()
    }
}

fn parse_account(raw: &str) -> Result<AccountNumber, ApiError> {
    AccountNumber::parse(raw).map_err(|e| AppError::from(e).into())
}

fn parse_payment_id(raw: &str) -> Result<PaymentId, ApiError> {
    raw.parse()
        .map_err(|_| AppError::BadRequest("Invalid payment ID".into()).into())
}

fn require_operator(caller: &Caller) -> Result<(), ApiError> {
    if caller.is_operator() {
        Ok(())
    } else {
        Err(AppError::Forbidden("Operator role required".into()).into())
    }
}

/// Health check endpoint.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "healthy" }))
}

/// Settle all unpaid bills of an account for one period.
#[tracing::instrument(
    skip(state, caller, payload),
    fields(caller = %caller.subject, account = tracing::field::Empty, period = tracing::field::Empty)
)]
pub async fn settle<B: BillLedger, P: PaymentLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<B, P, G>>>,
    Extension(caller): Extension<Caller>,
    payload: Result<Json<SettleRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    let Json(req) = payload?;
    let span = tracing::Span::current();
    span.record("account", req.account_number.as_str());
    span.record("period", req.period.as_str());

    let settlement = state.orchestrator.settle_for(&caller, req).await?;
    Ok((StatusCode::CREATED, Json(settlement)))
}

/// Get one payment.
#[tracing::instrument(skip(state, caller), fields(caller = %caller.subject, payment_id = %id))]
pub async fn get_payment<B: BillLedger, P: PaymentLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<B, P, G>>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let id = parse_payment_id(&id)?;
    let payment = state.orchestrator.get_payment(&caller, id).await?;
    Ok(Json(payment))
}

#[derive(Debug, Deserialize)]
pub struct BillsQuery {
    pub period: Option<String>,
}

/// List bills of an account, optionally for one period.
#[tracing::instrument(skip(state, caller), fields(caller = %caller.subject, account = %account))]
pub async fn list_bills<B: BillLedger, P: PaymentLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<B, P, G>>>,
    Extension(caller): Extension<Caller>,
    Path(account): Path<String>,
    Query(query): Query<BillsQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let account = parse_account(&account)?;
    let period = query
        .period
        .as_deref()
        .map(Period::parse)
        .transpose()
        .map_err(AppError::from)?;

    let summary = state
        .orchestrator
        .account_bills(&caller, &account, period.as_ref())
        .await?;
    Ok(Json(summary))
}

/// List payment attempts of an account.
#[tracing::instrument(skip(state, caller), fields(caller = %caller.subject, account = %account))]
pub async fn list_payments<B: BillLedger, P: PaymentLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<B, P, G>>>,
    Extension(caller): Extension<Caller>,
    Path(account): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let account = parse_account(&account)?;
    let payments = state.orchestrator.account_payments(&caller, &account).await?;
    Ok(Json(payments))
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciliation (operator only)
// ─────────────────────────────────────────────────────────────────────────────

/// List payments awaiting reconciliation.
#[tracing::instrument(skip(state, caller), fields(caller = %caller.subject))]
pub async fn list_flagged<B: BillLedger, P: PaymentLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<B, P, G>>>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let payments = state.orchestrator.list_flagged().await?;
    Ok(Json(payments))
}

/// Run the stale-pending sweep now.
#[tracing::instrument(skip(state, caller), fields(caller = %caller.subject))]
pub async fn sweep<B: BillLedger, P: PaymentLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<B, P, G>>>,
    Extension(caller): Extension<Caller>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let flagged = state.orchestrator.sweep_stale().await?;
    Ok(Json(SweepResponse { flagged }))
}

/// Apply a flagged completed payment to its bills.
#[tracing::instrument(skip(state, caller), fields(caller = %caller.subject, payment_id = %id))]
pub async fn commit_flagged<B: BillLedger, P: PaymentLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<B, P, G>>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let id = parse_payment_id(&id)?;
    let payment = state.orchestrator.commit_flagged(id).await?;
    Ok(Json(payment))
}

/// Resolve a stale pending payment.
#[tracing::instrument(skip(state, caller, payload), fields(caller = %caller.subject, payment_id = %id))]
pub async fn resolve_stale<B: BillLedger, P: PaymentLedger, G: PaymentGateway>(
    State(state): State<Arc<AppState<B, P, G>>>,
    Extension(caller): Extension<Caller>,
    Path(id): Path<String>,
    payload: Result<Json<ResolveRequest>, JsonRejection>,
) -> Result<impl IntoResponse, ApiError> {
    require_operator(&caller)?;
    let Json(req) = payload?;
    let id = parse_payment_id(&id)?;
    let payment = state.orchestrator.resolve_stale(id, req).await?;
    Ok(Json(payment))
}

#[cfg(test)]
mod tests {
    use super::*;
    use settlement_types::{Money, Period};

    #[test]
    fn test_settlement_status_mapping() {
        let account = AccountNumber::parse("1234567890").unwrap();
        let period = Period::parse("2024-03").unwrap();
        let id = PaymentId::new();

        let cases = [
            (SettlementError::Validation("x".into()), 400),
            (SettlementError::AccountNotFound(account.clone()), 404),
            (SettlementError::NoUnpaidBills { account, period }, 404),
            (
                SettlementError::AmountMismatch {
                    claimed: Money::new(1).unwrap(),
                    expected: Money::new(3).unwrap(),
                },
                400,
            ),
            (SettlementError::BillsAlreadyClaimed("x".into()), 409),
            (
                SettlementError::PaymentDeclined {
                    payment_id: id,
                    reason: "no".into(),
                },
                402,
            ),
            (
                SettlementError::GatewayUnavailable {
                    payment_id: id,
                    detail: "down".into(),
                },
                503,
            ),
            (
                SettlementError::SettlementInconsistent {
                    payment_id: id,
                    bill_ids: vec![],
                    amount: Money::zero(),
                    detail: "x".into(),
                },
                500,
            ),
        ];

        for (err, code) in cases {
            assert_eq!(settlement_status(&err).as_u16(), code, "{}", err.kind());
        }
    }

    #[test]
    fn test_transport_details_are_not_echoed() {
        let id = PaymentId::new();
        let err = SettlementError::GatewayUnavailable {
            payment_id: id,
            detail: "Gateway transport error: error sending request for url (http://10.9.8.7:8001/api/v1/payments)".into(),
        };
        let detail = settlement_detail(&err);
        assert_eq!(detail, UNAVAILABLE_DETAIL);
        assert!(!detail.contains("10.9.8.7"));

        let err = SettlementError::Internal("Database error: no such table: bills".into());
        assert_eq!(settlement_detail(&err), INTERNAL_DETAIL);

        let err = SettlementError::SettlementInconsistent {
            payment_id: id,
            bill_ids: vec![],
            amount: Money::zero(),
            detail: "marking bills paid failed: Database error: disk I/O error".into(),
        };
        let detail = settlement_detail(&err);
        assert!(detail.contains(&id.to_string()));
        assert!(!detail.contains("disk I/O"));

        let err = SettlementError::PaymentDeclined {
            payment_id: id,
            reason: "Insufficient funds".into(),
        };
        assert_eq!(settlement_detail(&err), "Payment declined: Insufficient funds");
    }

    #[test]
    fn test_require_operator() {
        assert!(require_operator(&Caller::new("op", vec!["operator".into()])).is_ok());
        assert!(matches!(
            require_operator(&Caller::new("user", vec![])),
            Err(ApiError::App(AppError::Forbidden(_)))
        ));
    }
}
