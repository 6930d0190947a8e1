//! Port traits (interfaces for adapters).
//!
//! These are the contracts that adapters must implement.
//! The orchestrator depends on these traits, not concrete implementations.

mod gateway;
mod ledger;

pub use gateway::{ChargeOutcome, PaymentGateway};
pub use ledger::{BillLedger, PaymentLedger};
