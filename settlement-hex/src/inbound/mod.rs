//! HTTP Inbound Adapter
//!
//! Axum-based HTTP server that drives the settlement orchestrator.

pub mod auth;
pub mod handlers;
mod rate_limit;
mod server;

pub use auth::{Claims, JwtVerifier};
pub use rate_limit::RateLimiterState;
pub use server::HttpServer;
