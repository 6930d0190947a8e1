//! Error types for the settlement service.

use std::time::Duration;

use crate::domain::{AccountNumber, BillId, Money, PaymentId, PaymentStatus, Period};

/// Domain-level errors (business logic violations).
#[derive(Debug, thiserror::Error)]
pub enum DomainError {
    #[error("Amount cannot be negative")]
    NegativeAmount,

    #[error("Amount overflow")]
    AmountOverflow,

    #[error("Invalid payment transition: {from} -> {to}")]
    InvalidTransition {
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Validation error: {0}")]
    ValidationError(String),
}

/// Repository-level errors (data access failures).
#[derive(Debug, thiserror::Error)]
pub enum RepoError {
    #[error(transparent)]
    Domain(#[from] DomainError),

    #[error("Database error: {0}")]
    Database(String),

    #[error("Transaction error: {0}")]
    Transaction(String),

    #[error("Entity not found")]
    NotFound,

    #[error("Conflict: {0}")]
    Conflict(String),
}

/// Transport-level gateway failures. A decline is not an error; see `ChargeOutcome`.
#[derive(Debug, Clone, thiserror::Error)]
pub enum GatewayError {
    /// The request never reached the processor (connection refused, DNS).
    #[error("Gateway unreachable: {0}")]
    Connect(String),

    /// The request may have reached the processor; its outcome is unknown.
    #[error("Gateway transport error: {0}")]
    Transport(String),

    #[error("Gateway timed out after {0:?}")]
    Timeout(Duration),

    /// The processor refused the request itself (signature, routing) without
    /// evaluating the card. Points at a configuration problem.
    #[error("Gateway refused the request with HTTP {0}")]
    Refused(u16),

    /// The processor answered with something we could not interpret.
    #[error("Gateway protocol error: {0}")]
    Protocol(String),
}

/// Outcome taxonomy of a settlement request.
///
/// Every variant maps to a stable `kind()` string returned to callers.
#[derive(Debug, thiserror::Error)]
pub enum SettlementError {
    #[error("{0}")]
    Validation(String),

    #[error("Account not found: {0}")]
    AccountNotFound(AccountNumber),

    #[error("No unpaid bills found for account {account} in period {period}")]
    NoUnpaidBills {
        account: AccountNumber,
        period: Period,
    },

    #[error("Payment amount {claimed} must match total bill amount {expected}")]
    AmountMismatch { claimed: Money, expected: Money },

    #[error("Bills are already covered by another payment: {0}")]
    BillsAlreadyClaimed(String),

    #[error("Payment service unavailable: {detail}")]
    GatewayUnavailable { payment_id: PaymentId, detail: String },

    #[error("Payment declined: {reason}")]
    PaymentDeclined { payment_id: PaymentId, reason: String },

    #[error("Payment {payment_id} was charged but could not be applied to bills: {detail}")]
    SettlementInconsistent {
        payment_id: PaymentId,
        bill_ids: Vec<BillId>,
        amount: Money,
        detail: String,
    },

    #[error("Internal error: {0}")]
    Internal(String),
}

impl SettlementError {
    /// Stable machine-readable error kind.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Validation(_) => "ValidationError",
            Self::AccountNotFound(_) => "AccountNotFound",
            Self::NoUnpaidBills { .. } => "NoUnpaidBills",
            Self::AmountMismatch { .. } => "AmountMismatch",
            Self::BillsAlreadyClaimed(_) => "BillsAlreadyClaimed",
            Self::GatewayUnavailable { .. } => "GatewayUnavailable",
            Self::PaymentDeclined { .. } => "PaymentDeclined",
            Self::SettlementInconsistent { .. } => "SettlementInconsistent",
            Self::Internal(_) => "Internal",
        }
    }

    /// The payment attempt this error belongs to, if one was reserved.
    pub fn payment_id(&self) -> Option<PaymentId> {
        match self {
            Self::GatewayUnavailable { payment_id, .. }
            | Self::PaymentDeclined { payment_id, .. }
            | Self::SettlementInconsistent { payment_id, .. } => Some(*payment_id),
            _ => None,
        }
    }
}

impl From<DomainError> for SettlementError {
    fn from(err: DomainError) -> Self {
        match err {
            DomainError::ValidationError(msg) => SettlementError::Validation(msg),
            DomainError::NegativeAmount => SettlementError::Validation(err.to_string()),
            e => SettlementError::Internal(e.to_string()),
        }
    }
}

/// Application-level errors (for HTTP responses).
///
/// Maps cleanly to HTTP status codes.
#[derive(Debug, thiserror::Error)]
pub enum AppError {
    #[error("Bad request: {0}")]
    BadRequest(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<RepoError> for AppError {
    fn from(err: RepoError) -> Self {
        match err {
            RepoError::Domain(DomainError::ValidationError(msg)) => AppError::BadRequest(msg),
            RepoError::Domain(e @ DomainError::InvalidTransition { .. }) => {
                AppError::Conflict(e.to_string())
            }
            RepoError::Domain(e) => AppError::BadRequest(e.to_string()),
            RepoError::NotFound => AppError::NotFound("Resource not found".into()),
            RepoError::Database(e) => AppError::Internal(e),
            RepoError::Transaction(e) => AppError::Internal(e),
            RepoError::Conflict(e) => AppError::Conflict(e),
        }
    }
}

impl From<DomainError> for AppError {
    fn from(err: DomainError) -> Self {
        AppError::from(RepoError::Domain(err))
    }
}
