//! # Settlement Hex
//!
//! Application service layer and adapters for the settlement service.
//!
//! ## Architecture
//!
//! - `service` - Settlement orchestrator (the reserve, charge, commit saga)
//! - `outbound/` - Card processor client and its timeout/retry guard
//! - `inbound/` - HTTP adapter (Axum server)
//! - `recovery` - Background sweeper for stale pending payments
//!
//! The orchestrator is generic over `B: BillLedger`, `P: PaymentLedger` and
//! `G: PaymentGateway`, allowing different adapters to be injected.

pub mod caller;
pub mod inbound;
mod locks;
pub mod openapi;
pub mod outbound;
pub mod recovery;
pub mod service;


pub use caller::{Caller, OPERATOR_ROLE};
pub use recovery::ReconciliationSweeper;
pub use service::{DEFAULT_STALE_AFTER, SettlementOrchestrator};
