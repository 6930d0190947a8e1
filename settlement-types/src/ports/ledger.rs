//! Ledger port traits.
//!
//! The bill ledger belongs to the billing domain; the payment ledger is the
//! settlement saga's own durable record. Neither calls the other: only the
//! orchestrator sees both.

use chrono::{DateTime, Utc};

use crate::domain::{AccountNumber, AlertKind, Bill, BillId, Payment, PaymentId, Period};
use crate::error::RepoError;

/// Billing ledger: bills and the accounts they are filed under.
#[async_trait::async_trait]
pub trait BillLedger: Send + Sync + 'static {
    /// Returns the identity-provider subject owning the account, if the account exists.
    async fn account_owner(&self, account: &AccountNumber) -> Result<Option<String>, RepoError>;

    /// Lists `pending` bills of an account for one period, ordered by bill id.
    async fn list_unpaid(
        &self,
        account: &AccountNumber,
        period: &Period,
    ) -> Result<Vec<Bill>, RepoError>;

    /// Lists all bills of an account, optionally restricted to one period.
    async fn list_bills(
        &self,
        account: &AccountNumber,
        period: Option<&Period>,
    ) -> Result<Vec<Bill>, RepoError>;

    /// Fetches bills by id, ordered by bill id. Unknown ids are skipped.
    async fn get_bills(&self, ids: &[BillId]) -> Result<Vec<Bill>, RepoError>;

    /// Marks every listed bill `paid`.
    ///
    /// All-or-nothing: if any bill is unknown or no longer `pending`, nothing
    /// changes and `RepoError::Conflict` is returned.
    async fn mark_paid(&self, ids: &[BillId]) -> Result<(), RepoError>;
}

/// Durable record of settlement attempts.
///
/// Every bill referenced by a `pending` or `completed` payment is claimed by
/// it; a bill can be claimed by at most one payment at a time.
#[async_trait::async_trait]
pub trait PaymentLedger: Send + Sync + 'static {
    /// Persists a `pending` payment and claims its bills atomically.
    ///
    /// Fails with `RepoError::Conflict` if any bill is already claimed.
    async fn reserve(&self, payment: &Payment) -> Result<(), RepoError>;

    /// Moves a `pending` payment to `completed`. Claims stay held.
    async fn complete(
        &self,
        id: PaymentId,
        completed_at: DateTime<Utc>,
        gateway_reference: Option<&str>,
    ) -> Result<(), RepoError>;

    /// Moves a `pending` payment to `failed` and releases its claims.
    async fn fail(&self, id: PaymentId, reason: &str) -> Result<(), RepoError>;

    /// Gets a payment by ID.
    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, RepoError>;

    /// Lists payments of an account, newest first.
    async fn list_payments_for_account(
        &self,
        account: &AccountNumber,
    ) -> Result<Vec<Payment>, RepoError>;

    /// Lists `pending` payments created before `cutoff`, oldest first.
    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>, RepoError>;

    /// Lists payments awaiting operator reconciliation, oldest first.
    async fn list_flagged(&self) -> Result<Vec<Payment>, RepoError>;

    /// Flags a payment for operator reconciliation and queues an alert.
    async fn flag_for_reconciliation(
        &self,
        id: PaymentId,
        kind: AlertKind,
        note: &str,
        payload: serde_json::Value,
    ) -> Result<(), RepoError>;

    /// Clears the reconciliation flag once an operator has resolved the payment.
    async fn clear_reconciliation_flag(&self, id: PaymentId) -> Result<(), RepoError>;
}
