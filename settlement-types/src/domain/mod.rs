//! Domain models for the settlement service.

pub mod account;
pub mod alert;
pub mod bill;
pub mod instrument;
pub mod money;
pub mod payment;
pub mod period;

pub use account::AccountNumber;
pub use alert::{AlertKind, AlertStatus, SettlementAlert};
pub use bill::{Bill, BillId, BillStatus};
pub use instrument::Instrument;
pub use money::{AMOUNT_TOLERANCE, Money};
pub use payment::{Payment, PaymentId, PaymentStatus};
pub use period::Period;
