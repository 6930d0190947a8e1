//! Data Transfer Objects (DTOs) for requests and responses.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use crate::domain::instrument::mask_card;
use crate::domain::{
    AccountNumber, Bill, BillId, Instrument, Money, Payment, PaymentId, PaymentStatus, Period,
};
use crate::error::DomainError;

// ─────────────────────────────────────────────────────────────────────────────
// Settlement DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Request to settle all unpaid bills of an account for one period.
///
/// Card fields are forwarded to the gateway and never stored.
#[derive(Clone, Serialize, Deserialize, ToSchema)]
pub struct SettleRequest {
    /// Ten-digit account number
    #[schema(example = "1234567890")]
    pub account_number: String,
    /// Billing period in YYYY-MM format
    #[schema(example = "2024-03")]
    pub period: String,
    /// Claimed total in currency units (at most two decimal places); must match the unpaid bills
    #[schema(example = 1500.00)]
    pub amount: Money,
    #[schema(example = "4111111111111111")]
    pub card_number: String,
    #[schema(example = "IVAN PETROV")]
    pub card_holder: String,
    /// Card expiration date in YYYY-MM-DD format
    #[schema(example = "2027-12-31")]
    pub card_expiration_date: String,
    #[schema(example = "123")]
    pub card_cvv: String,
    /// Receiver tax id (INN), 12 digits
    #[schema(example = "770123456789")]
    pub inn_receiver: String,
}

impl SettleRequest {
    /// Validates the request into domain values.
    pub fn into_parts(self) -> Result<(AccountNumber, Period, Money, Instrument), DomainError> {
        let account = AccountNumber::parse(&self.account_number)?;
        let period = Period::parse(&self.period)?;
        if self.amount.is_zero() {
            return Err(DomainError::ValidationError(
                "Amount must be positive".into(),
            ));
        }
        let amount = self.amount;
        let instrument = Instrument::new(
            self.card_number,
            self.card_holder,
            self.card_expiration_date,
            self.card_cvv,
            self.inn_receiver,
        )?;
        Ok((account, period, amount, instrument))
    }
}

impl std::fmt::Debug for SettleRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SettleRequest")
            .field("account_number", &self.account_number)
            .field("period", &self.period)
            .field("amount", &self.amount)
            .field("card_number", &mask_card(&self.card_number))
            .field("card_holder", &self.card_holder)
            .field("card_expiration_date", &self.card_expiration_date)
            .field("card_cvv", &"***")
            .field("inn_receiver", &self.inn_receiver)
            .finish()
    }
}

/// A bill covered by a settlement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct CoveredBill {
    pub id: BillId,
    pub amount: Money,
}

/// Result of a successful settlement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SettlementResponse {
    pub payment_id: PaymentId,
    pub status: PaymentStatus,
    pub account_number: AccountNumber,
    pub period: Period,
    /// Charged amount in currency units
    pub amount: Money,
    /// Bills the payment was applied to, in ledger order
    pub bills: Vec<CoveredBill>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Read-side DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// A recorded payment attempt.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct PaymentResponse {
    pub id: PaymentId,
    pub account_number: AccountNumber,
    pub period: Period,
    pub amount: Money,
    pub status: PaymentStatus,
    pub bill_ids: Vec<BillId>,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub failure_reason: Option<String>,
    /// Present while the payment awaits operator reconciliation
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reconciliation_note: Option<String>,
}

impl From<Payment> for PaymentResponse {
    fn from(p: Payment) -> Self {
        Self {
            id: p.id,
            account_number: p.account_number,
            period: p.period,
            amount: p.amount,
            status: p.status,
            bill_ids: p.bill_ids,
            created_at: p.created_at,
            completed_at: p.completed_at,
            gateway_reference: p.gateway_reference,
            failure_reason: p.failure_reason,
            reconciliation_note: p.reconciliation_note,
        }
    }
}

/// Bills of an account with totals.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct BillSummaryResponse {
    pub account_number: AccountNumber,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub period: Option<Period>,
    /// Sum of all listed bills
    pub total_amount: Money,
    /// Sum of the still-pending bills
    pub unpaid_amount: Money,
    pub bills: Vec<Bill>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Reconciliation DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// What the operator established about a stale pending payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ResolveOutcome {
    /// The processor confirms the card was charged.
    Charged,
    /// The processor confirms no charge took place.
    NotCharged,
}

/// Operator resolution of a stale pending payment.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ResolveRequest {
    pub outcome: ResolveOutcome,
    /// Processor charge id, when known
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gateway_reference: Option<String>,
}

/// Result of a reconciliation sweep.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct SweepResponse {
    /// Payments newly flagged by this sweep
    pub flagged: Vec<PaymentId>,
}

/// Error body returned by every failing endpoint.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ErrorResponse {
    /// Human-readable detail
    pub error: String,
    /// Stable error kind
    #[schema(example = "NoUnpaidBills")]
    pub kind: String,
    /// HTTP status code
    pub code: u16,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<PaymentId>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Gateway wire DTOs
// ─────────────────────────────────────────────────────────────────────────────

/// Charge request sent to the card processor.
#[derive(Clone, Serialize, Deserialize)]
pub struct ChargeRequest {
    /// Amount in currency units
    pub amount: Money,
    pub card_number: String,
    pub card_holder: String,
    pub card_expiration_date: String,
    pub card_cvv: String,
    pub inn_receiver: String,
}

impl ChargeRequest {
    pub fn new(amount: Money, instrument: &Instrument) -> Self {
        Self {
            amount,
            card_number: instrument.card_number().to_string(),
            card_holder: instrument.card_holder().to_string(),
            card_expiration_date: instrument.card_expiration_date().to_string(),
            card_cvv: instrument.card_cvv().to_string(),
            inn_receiver: instrument.inn_receiver().to_string(),
        }
    }
}

impl std::fmt::Debug for ChargeRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChargeRequest")
            .field("amount", &self.amount)
            .field("card_number", &mask_card(&self.card_number))
            .field("card_cvv", &"***")
            .finish_non_exhaustive()
    }
}

/// Status token returned by the card processor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChargeStatus {
    Success,
    Failed,
}

/// Charge response from the card processor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChargeResponse {
    pub id: String,
    pub status: ChargeStatus,
    #[serde(default)]
    pub message: Option<String>,
}
