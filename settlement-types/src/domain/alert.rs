use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

use super::PaymentId;

/// Why a payment was escalated to an operator.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum AlertKind {
    /// The card was charged but the commit step did not finish.
    SettlementInconsistent,
    /// A reservation outlived the stale threshold without reaching a terminal state.
    StalePending,
}

impl AlertKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SettlementInconsistent => "settlement_inconsistent",
            Self::StalePending => "stale_pending",
        }
    }
}

impl std::str::FromStr for AlertKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "settlement_inconsistent" => Ok(Self::SettlementInconsistent),
            "stale_pending" => Ok(Self::StalePending),
            other => Err(format!("Unknown alert kind: {}", other)),
        }
    }
}

/// Delivery state of an alert in the outbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum AlertStatus {
    #[default]
    Pending,
    Delivered,
    Failed,
}

impl AsRef<str> for AlertStatus {
    fn as_ref(&self) -> &str {
        match self {
            Self::Pending => "PENDING",
            Self::Delivered => "DELIVERED",
            Self::Failed => "FAILED",
        }
    }
}

impl std::fmt::Display for AlertStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_ref())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SettlementAlert {
    pub id: Uuid,
    pub kind: AlertKind,
    pub payment_id: PaymentId,
    pub payload: serde_json::Value,
    pub status: AlertStatus,
    pub created_at: DateTime<Utc>,
    pub delivered_at: Option<DateTime<Utc>>,
    pub attempts: i32,
    pub last_error: Option<String>,
}

impl SettlementAlert {
    pub fn new(kind: AlertKind, payment_id: PaymentId, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind,
            payment_id,
            payload,
            status: AlertStatus::Pending,
            created_at: Utc::now(),
            delivered_at: None,
            attempts: 0,
            last_error: None,
        }
    }
}
