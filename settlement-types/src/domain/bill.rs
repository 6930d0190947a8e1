//! Bill domain model (owned by the billing ledger).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

use super::{AccountNumber, Money, Period};

/// Identifier of a bill in the billing ledger.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, ToSchema,
)]
#[serde(transparent)]
pub struct BillId(i64);

impl BillId {
    pub fn new(id: i64) -> Self {
        Self(id)
    }

    pub fn value(&self) -> i64 {
        self.0
    }
}

impl std::fmt::Display for BillId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Payment state of a bill.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "lowercase")]
pub enum BillStatus {
    Pending,
    Paid,
}

impl BillStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            BillStatus::Pending => "pending",
            BillStatus::Paid => "paid",
        }
    }
}

impl std::fmt::Display for BillStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for BillStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(BillStatus::Pending),
            "paid" => Ok(BillStatus::Paid),
            other => Err(format!("Unknown bill status: {}", other)),
        }
    }
}

/// A billable charge for one account and period.
///
/// Amounts are never changed once issued; the only mutation is
/// `pending -> paid`, performed by the billing ledger.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct Bill {
    pub id: BillId,
    pub account_number: AccountNumber,
    pub period: Period,
    pub amount: Money,
    pub status: BillStatus,
    /// Set when the bill transitioned to `paid`
    pub paid_at: Option<DateTime<Utc>>,
}

impl Bill {
    pub fn is_pending(&self) -> bool {
        self.status == BillStatus::Pending
    }
}
