//! Timeout and retry policy around any `PaymentGateway`.

use std::time::Duration;

use async_trait::async_trait;
use settlement_types::{ChargeOutcome, GatewayError, Instrument, Money, PaymentGateway};

const DEFAULT_RETRY_BACKOFF: Duration = Duration::from_millis(200);

/// Bounds every charge attempt with a timeout and retries only failures that
/// provably never reached the processor (`GatewayError::Connect`).
pub struct GuardedGateway<G> {
    inner: G,
    timeout: Duration,
    connect_retries: u32,
    retry_backoff: Duration,
}

impl<G: PaymentGateway> GuardedGateway<G> {
    pub fn new(inner: G, timeout: Duration) -> Self {
        Self {
            inner,
            timeout,
            connect_retries: 0,
            retry_backoff: DEFAULT_RETRY_BACKOFF,
        }
    }

    pub fn with_connect_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.connect_retries = retries;
        self.retry_backoff = backoff;
        self
    }

    /// Longest time a single `charge` call can take.
    pub fn worst_case(&self) -> Duration {
        let attempts = self.connect_retries + 1;
        self.timeout * attempts + self.retry_backoff * self.connect_retries
    }
}

#[async_trait]
impl<G: PaymentGateway> PaymentGateway for GuardedGateway<G> {
    async fn charge(
        &self,
        amount: Money,
        instrument: &Instrument,
    ) -> Result<ChargeOutcome, GatewayError> {
        let mut attempt = 0;
        loop {
            match tokio::time::timeout(self.timeout, self.inner.charge(amount, instrument)).await {
                Err(_) => return Err(GatewayError::Timeout(self.timeout)),
                Ok(Err(GatewayError::Connect(reason))) if attempt < self.connect_retries => {
                    attempt += 1;
                    tracing::warn!(attempt, reason = %reason, "Gateway unreachable, retrying");
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Ok(result) => return result,
            }
        }
    }
}
