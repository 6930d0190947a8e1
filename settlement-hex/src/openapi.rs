//! OpenAPI specification and documentation.

#![allow(dead_code)] // Path functions are only used by utoipa for documentation generation

use settlement_types::domain::{
    AccountNumber, Bill, BillId, BillStatus, Money, PaymentId, PaymentStatus, Period,
};
use settlement_types::dto::{
    BillSummaryResponse, CoveredBill, ErrorResponse, PaymentResponse, ResolveOutcome,
    ResolveRequest, SettleRequest, SettlementResponse, SweepResponse,
};
use utoipa::{
    Modify, OpenApi,
    openapi::security::{Http, HttpAuthScheme, SecurityScheme},
};

/// Health check endpoint
#[utoipa::path(
    get,
    path = "/health",
    tag = "health",
    responses(
        (status = 200, description = "Service is healthy", body = inline(serde_json::Value), example = json!({"status": "healthy"}))
    )
)]
async fn health() {}

/// Settle all unpaid bills of an account for one period
///
/// Reserves the bills, charges the card once and marks the bills paid.
/// A resubmission after success answers `NoUnpaidBills`.
#[utoipa::path(
    post,
    path = "/api/payments",
    tag = "payments",
    request_body = SettleRequest,
    security(("bearer_auth" = [])),
    responses(
        (status = 201, description = "Bills settled", body = SettlementResponse),
        (status = 400, description = "ValidationError or AmountMismatch", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse),
        (status = 402, description = "PaymentDeclined", body = ErrorResponse),
        (status = 404, description = "AccountNotFound or NoUnpaidBills", body = ErrorResponse),
        (status = 409, description = "BillsAlreadyClaimed", body = ErrorResponse),
        (status = 500, description = "SettlementInconsistent: charged but not applied", body = ErrorResponse),
        (status = 503, description = "GatewayUnavailable", body = ErrorResponse)
    )
)]
async fn settle() {}

/// Get a payment attempt
#[utoipa::path(
    get,
    path = "/api/payments/{id}",
    tag = "payments",
    security(("bearer_auth" = [])),
    params(
        ("id" = PaymentId, Path, description = "Payment ID (UUID)")
    ),
    responses(
        (status = 200, description = "Payment details", body = PaymentResponse),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    )
)]
async fn get_payment() {}

/// List bills of an account with totals
#[utoipa::path(
    get,
    path = "/api/accounts/{account}/bills",
    tag = "accounts",
    security(("bearer_auth" = [])),
    params(
        ("account" = AccountNumber, Path, description = "Ten-digit account number"),
        ("period" = Option<Period>, Query, description = "Restrict to one period (YYYY-MM)")
    ),
    responses(
        (status = 200, description = "Bills and totals", body = BillSummaryResponse),
        (status = 404, description = "Account not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    )
)]
async fn list_bills() {}

/// List payment attempts of an account, newest first
#[utoipa::path(
    get,
    path = "/api/accounts/{account}/payments",
    tag = "accounts",
    security(("bearer_auth" = [])),
    params(
        ("account" = AccountNumber, Path, description = "Ten-digit account number")
    ),
    responses(
        (status = 200, description = "Payment history", body = Vec<PaymentResponse>),
        (status = 404, description = "Account not found", body = ErrorResponse),
        (status = 401, description = "Unauthorized", body = ErrorResponse)
    )
)]
async fn list_payments() {}

/// List payments awaiting operator reconciliation
#[utoipa::path(
    get,
    path = "/api/reconciliation/payments",
    tag = "reconciliation",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Flagged payments", body = Vec<PaymentResponse>),
        (status = 403, description = "Operator role required", body = ErrorResponse)
    )
)]
async fn list_flagged() {}

/// Flag stale pending payments now
#[utoipa::path(
    post,
    path = "/api/reconciliation/sweep",
    tag = "reconciliation",
    security(("bearer_auth" = [])),
    responses(
        (status = 200, description = "Newly flagged payments", body = SweepResponse),
        (status = 403, description = "Operator role required", body = ErrorResponse)
    )
)]
async fn sweep() {}

/// Apply a flagged completed payment to its bills
#[utoipa::path(
    post,
    path = "/api/reconciliation/payments/{id}/commit",
    tag = "reconciliation",
    security(("bearer_auth" = [])),
    params(
        ("id" = PaymentId, Path, description = "Payment ID (UUID)")
    ),
    responses(
        (status = 200, description = "Bills marked paid and flag cleared", body = PaymentResponse),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 409, description = "Payment is not a flagged completed payment", body = ErrorResponse),
        (status = 403, description = "Operator role required", body = ErrorResponse)
    )
)]
async fn commit_flagged() {}

/// Resolve a stale pending payment
#[utoipa::path(
    post,
    path = "/api/reconciliation/payments/{id}/resolve",
    tag = "reconciliation",
    security(("bearer_auth" = [])),
    request_body = ResolveRequest,
    params(
        ("id" = PaymentId, Path, description = "Payment ID (UUID)")
    ),
    responses(
        (status = 200, description = "Payment resolved", body = PaymentResponse),
        (status = 404, description = "Payment not found", body = ErrorResponse),
        (status = 409, description = "Payment not pending or not stale yet", body = ErrorResponse),
        (status = 403, description = "Operator role required", body = ErrorResponse)
    )
)]
async fn resolve_stale() {}

/// OpenAPI documentation for the Settlement API.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "Bill Settlement Service API",
        version = "1.0.0",
        description = "Settles a period's unpaid utility bills with a single card charge.\n\n## Authentication\n\nAll endpoints except `/health` require a bearer JWT signed with the service secret:\n\n```\nAuthorization: Bearer <token>\n```\n\nReconciliation endpoints require the `operator` role.",
        license(name = "MIT"),
    ),
    paths(
        health,
        settle,
        get_payment,
        list_bills,
        list_payments,
        list_flagged,
        sweep,
        commit_flagged,
        resolve_stale,
    ),
    components(
        schemas(
            SettleRequest,
            SettlementResponse,
            CoveredBill,
            PaymentResponse,
            BillSummaryResponse,
            ResolveRequest,
            ResolveOutcome,
            SweepResponse,
            ErrorResponse,
            Bill,
            BillId,
            BillStatus,
            Money,
            Period,
            AccountNumber,
            PaymentId,
            PaymentStatus,
        )
    ),

    modifiers(&SecurityAddon),
    tags(
        (name = "health", description = "Health check endpoints"),
        (name = "payments", description = "Bill settlement"),
        (name = "accounts", description = "Bills and payment history of an account"),
        (name = "reconciliation", description = "Operator recovery of stale and inconsistent payments"),
    )
)]
pub struct ApiDoc;

/// Security scheme modifier for Bearer token authentication.
struct SecurityAddon;

impl Modify for SecurityAddon {
    fn modify(&self, openapi: &mut utoipa::openapi::OpenApi) {
        if let Some(components) = openapi.components.as_mut() {
            components.add_security_scheme(
                "bearer_auth",
                SecurityScheme::Http(Http::new(HttpAuthScheme::Bearer)),
            );
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_document_lists_every_route() {
        let doc = ApiDoc::openapi();
        let paths: Vec<_> = doc.paths.paths.keys().cloned().collect();

        for expected in [
            "/health",
            "/api/payments",
            "/api/payments/{id}",
            "/api/accounts/{account}/bills",
            "/api/accounts/{account}/payments",
            "/api/reconciliation/payments",
            "/api/reconciliation/sweep",
            "/api/reconciliation/payments/{id}/commit",
            "/api/reconciliation/payments/{id}/resolve",
        ] {
            assert!(paths.iter().any(|p| p == expected), "missing {}", expected);
        }
    }
}
