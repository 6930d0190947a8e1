//! Card processor port.
//!
//! Implementations can be HTTP clients, mock processors, test fakes, etc.

use crate::domain::{Instrument, Money};
use crate::error::GatewayError;

/// Answer from a processor that was reached and responded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChargeOutcome {
    /// The card was charged. `reference` is the processor's charge id.
    Approved { reference: String },
    /// The processor refused the charge.
    Declined { reason: String },
}

/// Port trait for card-processing gateways.
///
/// A single call with no shared state. Implementations must not retry:
/// after a lost response nobody can tell whether the card was charged, so
/// any retry policy belongs to the caller.
#[async_trait::async_trait]
pub trait PaymentGateway: Send + Sync + 'static {
    async fn charge(
        &self,
        amount: Money,
        instrument: &Instrument,
    ) -> Result<ChargeOutcome, GatewayError>;
}
