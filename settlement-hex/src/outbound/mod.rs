//! Outbound adapters: the card processor client and its timeout guard.

mod gateway;
mod guard;

pub use gateway::HttpGateway;
pub use guard::GuardedGateway;
