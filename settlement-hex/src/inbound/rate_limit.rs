//! Per-caller request throttling backed by Governor token buckets.

use std::{num::NonZeroU32, sync::Arc};

use axum::{
    Json,
    body::Body,
    extract::State,
    http::{Request, StatusCode},
    middleware::Next,
    response::{IntoResponse, Response},
};
use dashmap::DashMap;
use governor::{
    Quota, RateLimiter,
    clock::DefaultClock,
    state::{InMemoryState, NotKeyed},
};
use serde_json::json;

use crate::caller::Caller;

type Bucket = RateLimiter<NotKeyed, InMemoryState, DefaultClock>;

const ANONYMOUS: &str = "anonymous";

pub struct RateLimiterState {
    buckets: DashMap<String, Arc<Bucket>>,
    quota: Quota,
}

impl Default for RateLimiterState {
    fn default() -> Self {
        Self::per_minute(100)
    }
}

impl RateLimiterState {
    /// Allows `requests` per minute per caller, with the full amount available as burst.
    pub fn per_minute(requests: u32) -> Self {
        let requests = NonZeroU32::new(requests).unwrap_or(NonZeroU32::MIN);
        Self {
            buckets: DashMap::new(),
            quota: Quota::per_minute(requests),
        }
    }

    /// Returns `true` if `key` still has budget.
    pub fn check(&self, key: &str) -> bool {
        let bucket = self
            .buckets
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(RateLimiter::direct(self.quota)))
            .clone();

        bucket.check().is_ok()
    }

    pub fn tracked_keys(&self) -> usize {
        self.buckets.len()
    }
}

/// Rejects callers that exhausted their quota with `429`.
///
/// Keys on the [`Caller`] the auth middleware stored, so it must run after it.
pub async fn rate_limit_middleware(
    State(limiter): State<Arc<RateLimiterState>>,
    request: Request<Body>,
    next: Next,
) -> Response {
    if request.uri().path() == "/health" {
        return next.run(request).await;
    }

    let key = request
        .extensions()
        .get::<Caller>()
        .map(|c| c.subject.clone())
        .unwrap_or_else(|| ANONYMOUS.to_string());

    if !limiter.check(&key) {
        tracing::warn!(caller = %key, "Rate limit exceeded");
        return (
            StatusCode::TOO_MANY_REQUESTS,
            Json(json!({
                "error": "Rate limit exceeded. Please try again later.",
                "kind": "RateLimited",
                "code": 429
            })),
        )
            .into_response();
    }

    next.run(request).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quota_is_enforced_per_key() {
        let limiter = RateLimiterState::per_minute(2);

        assert!(limiter.check("alice"));
        assert!(limiter.check("alice"));
        assert!(!limiter.check("alice"));

        assert!(limiter.check("bob"));
        assert_eq!(limiter.tracked_keys(), 2);
    }

    #[test]
    fn test_zero_quota_still_allows_one() {
        let limiter = RateLimiterState::per_minute(0);

        assert!(limiter.check("alice"));
        assert!(!limiter.check("alice"));
    }
}
