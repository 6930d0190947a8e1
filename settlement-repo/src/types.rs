//! Database row structs shared by the SQLite and PostgreSQL adapters.
//!
//! Both backends decode `Uuid` and `DateTime<Utc>` natively, so rows carry
//! domain-friendly primitives and only enums need parsing.

use chrono::{DateTime, Utc};
use sqlx::FromRow;
use uuid::Uuid;

use settlement_types::{
    AccountNumber, AlertKind, AlertStatus, Bill, BillId, BillStatus, Money, Payment, PaymentId,
    PaymentStatus, Period, RepoError, SettlementAlert,
};

// ─────────────────────────────────────────────────────────────────────────────
// Database row structs (derive FromRow for automatic mapping)
// ─────────────────────────────────────────────────────────────────────────────

/// Account owner lookup row.
#[derive(FromRow)]
pub struct DbOwner {
    pub owner_subject: String,
}

/// Bill row from database.
#[derive(FromRow)]
pub struct DbBill {
    pub id: i64,
    pub account_number: String,
    pub period: String,
    pub amount: i64,
    pub status: String,
    pub paid_at: Option<DateTime<Utc>>,
}

/// Payment row from database. Bill ids live in `payment_bills`.
#[derive(FromRow)]
pub struct DbPayment {
    pub id: Uuid,
    pub account_number: String,
    pub period: String,
    pub amount: i64,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub gateway_reference: Option<String>,
    pub failure_reason: Option<String>,
    pub reconciliation_note: Option<String>,
}

/// Payment-to-bill link row.
#[derive(FromRow)]
pub struct DbPaymentBill {
    pub payment_id: Uuid,
    pub bill_id: i64,
}

/// Status-only row, used to explain a conditional update that matched nothing.
#[derive(FromRow)]
pub struct DbPaymentStatus {
    pub status: String,
}

/// Settlement alert row from the outbox.
#[derive(FromRow)]
pub struct DbAlert {
    pub id: Uuid,
    pub kind: String,
    pub payment_id: Uuid,
    pub payload: serde_json::Value,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

// ─────────────────────────────────────────────────────────────────────────────
// Parsing helpers
// ─────────────────────────────────────────────────────────────────────────────

fn corrupt(what: &str, value: impl std::fmt::Display) -> RepoError {
    RepoError::Database(format!("Corrupt {} in ledger: {}", what, value))
}

pub fn parse_bill_status(s: &str) -> Result<BillStatus, RepoError> {
    s.parse().map_err(|e: String| RepoError::Database(e))
}

pub fn parse_payment_status(s: &str) -> Result<PaymentStatus, RepoError> {
    s.parse().map_err(|e: String| RepoError::Database(e))
}

pub fn parse_alert_status(s: &str) -> AlertStatus {
    match s {
        "DELIVERED" => AlertStatus::Delivered,
        "FAILED" => AlertStatus::Failed,
        _ => AlertStatus::Pending,
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Domain conversion
// ─────────────────────────────────────────────────────────────────────────────

impl DbBill {
    /// Convert database row to domain Bill.
    pub fn into_domain(self) -> Result<Bill, RepoError> {
        Ok(Bill {
            id: BillId::new(self.id),
            account_number: AccountNumber::parse(&self.account_number)
                .map_err(|_| corrupt("account number", &self.account_number))?,
            period: Period::parse(&self.period).map_err(|_| corrupt("period", &self.period))?,
            amount: Money::new(self.amount)?,
            status: parse_bill_status(&self.status)?,
            paid_at: self.paid_at,
        })
    }
}

impl DbPayment {
    /// Convert database row to domain Payment, given its bill ids in reservation order.
    pub fn into_domain(self, bill_ids: Vec<BillId>) -> Result<Payment, RepoError> {
        Ok(Payment {
            id: PaymentId::from_uuid(self.id),
            account_number: AccountNumber::parse(&self.account_number)
                .map_err(|_| corrupt("account number", &self.account_number))?,
            period: Period::parse(&self.period).map_err(|_| corrupt("period", &self.period))?,
            amount: Money::new(self.amount)?,
            status: parse_payment_status(&self.status)?,
            bill_ids,
            created_at: self.created_at,
            completed_at: self.completed_at,
            gateway_reference: self.gateway_reference,
            failure_reason: self.failure_reason,
            reconciliation_note: self.reconciliation_note,
        })
    }
}

impl DbAlert {
    pub fn into_domain(self) -> Result<SettlementAlert, RepoError> {
        let kind: AlertKind = self.kind.parse().map_err(|e: String| RepoError::Database(e))?;

        Ok(SettlementAlert {
            id: self.id,
            kind,
            payment_id: PaymentId::from_uuid(self.payment_id),
            payload: self.payload,
            status: parse_alert_status(&self.status),
            created_at: self.created_at,
            delivered_at: self.delivered_at,
            attempts: self.attempts,
            last_error: self.last_error,
        })
    }
}

/// Groups link rows into per-payment bill lists, preserving row order.
pub fn group_bill_ids(links: Vec<DbPaymentBill>) -> std::collections::HashMap<Uuid, Vec<BillId>> {
    let mut grouped: std::collections::HashMap<Uuid, Vec<BillId>> =
        std::collections::HashMap::new();
    for link in links {
        grouped
            .entry(link.payment_id)
            .or_default()
            .push(BillId::new(link.bill_id));
    }
    grouped
}

/// Attaches bill ids to payment rows.
pub fn hydrate_payments(
    rows: Vec<DbPayment>,
    links: Vec<DbPaymentBill>,
) -> Result<Vec<Payment>, RepoError> {
    let mut grouped = group_bill_ids(links);
    rows.into_iter()
        .map(|row| {
            let bill_ids = grouped.remove(&row.id).unwrap_or_default();
            row.into_domain(bill_ids)
        })
        .collect()
}
