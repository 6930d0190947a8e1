//! Payment domain model: one settlement attempt and its outcome.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::{AccountNumber, BillId, Money, Period};
use crate::error::DomainError;

/// Unique identifier for a Payment.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, ToSchema)]
#[serde(transparent)]
pub struct PaymentId(Uuid);

impl PaymentId {
    /// Creates a new random PaymentId.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a PaymentId from an existing UUID.
    pub fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the underlying UUID.
    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }

    /// Returns the UUID value.
    pub fn into_uuid(self) -> Uuid {
        self.0
    }
}

impl Default for PaymentId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for PaymentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for PaymentId {
    type Err = uuid::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(Self(Uuid::parse_str(s)?))
    }
}

/// Lifecycle state of a payment attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        !matches!(self, PaymentStatus::Pending)
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for PaymentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(PaymentStatus::Pending),
            "completed" => Ok(PaymentStatus::Completed),
            "failed" => Ok(PaymentStatus::Failed),
            other => Err(format!("Unknown payment status: {}", other)),
        }
    }
}

/// A recorded settlement attempt.
///
/// Created `pending` before the gateway is called, then moved exactly once
/// to `completed` or `failed`. The covered bill set is fixed at creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub account_number: AccountNumber,
    pub period: Period,
    /// Claimed amount charged to the instrument
    pub amount: Money,
    pub status: PaymentStatus,
    /// Bills covered by this attempt, in ledger order
    pub bill_ids: Vec<BillId>,
    pub created_at: DateTime<Utc>,
    /// Set iff `status == Completed`
    pub completed_at: Option<DateTime<Utc>>,
    /// Processor's charge identifier
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    /// Set while the payment awaits operator reconciliation
    pub reconciliation_note: Option<String>,
}

impl Payment {
    /// Creates the pending reservation for a set of bills.
    pub fn reserve(
        account_number: AccountNumber,
        period: Period,
        amount: Money,
        bill_ids: Vec<BillId>,
    ) -> Result<Self, DomainError> {
        if bill_ids.is_empty() {
            return Err(DomainError::ValidationError(
                "A payment must cover at least one bill".into(),
            ));
        }

        Ok(Self {
            id: PaymentId::new(),
            account_number,
            period,
            amount,
            status: PaymentStatus::Pending,
            bill_ids,
            created_at: Utc::now(),
            completed_at: None,
            gateway_reference: None,
            failure_reason: None,
            reconciliation_note: None,
        })
    }

    /// Moves a pending payment to `completed`.
    pub fn complete(
        &mut self,
        at: DateTime<Utc>,
        gateway_reference: Option<String>,
    ) -> Result<(), DomainError> {
        self.ensure_pending(PaymentStatus::Completed)?;
        self.status = PaymentStatus::Completed;
        self.completed_at = Some(at);
        self.gateway_reference = gateway_reference;
        Ok(())
    }

    /// Moves a pending payment to `failed`.
    pub fn fail(&mut self, reason: impl Into<String>) -> Result<(), DomainError> {
        self.ensure_pending(PaymentStatus::Failed)?;
        self.status = PaymentStatus::Failed;
        self.failure_reason = Some(reason.into());
        Ok(())
    }

    pub fn needs_reconciliation(&self) -> bool {
        self.reconciliation_note.is_some()
    }

    fn ensure_pending(&self, to: PaymentStatus) -> Result<(), DomainError> {
        if self.status != PaymentStatus::Pending {
            return Err(DomainError::InvalidTransition {
                from: self.status,
                to,
            });
        }
        Ok(())
    }
}
