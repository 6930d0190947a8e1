//! # Settlement Types
//!
//! Domain types and port traits for the bill settlement service.
//! This crate has ZERO external IO dependencies - only data structures,
//! business rules, and trait definitions.
//!
//! ## Architecture
//!
//! This crate represents the **innermost core** of the hexagonal architecture:
//! - `domain/` - Pure domain types (Money, Bill, Payment, Instrument)
//! - `ports/` - Trait definitions that adapters must implement
//! - `dto/` - Data Transfer Objects for API and gateway boundaries
//! - `error/` - Domain, repository, gateway and settlement error types
//! - `security/` - HMAC-SHA256 signing of wire payloads

pub mod domain;
pub mod dto;
pub mod error;
pub mod ports;
pub mod security;

// Re-export commonly used types
pub use domain::{
    AMOUNT_TOLERANCE, AccountNumber, AlertKind, AlertStatus, Bill, BillId, BillStatus, Instrument,
    Money, Payment, PaymentId, PaymentStatus, Period, SettlementAlert,
};
pub use dto::*;
pub use error::{AppError, DomainError, GatewayError, RepoError, SettlementError};
pub use ports::{BillLedger, ChargeOutcome, PaymentGateway, PaymentLedger};
