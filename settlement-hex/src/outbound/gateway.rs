//! HTTP client for the card processor.

use async_trait::async_trait;
use reqwest::{Client, StatusCode, header::CONTENT_TYPE};

use settlement_repo::security::{SIGNATURE_HEADER, sign_payload};
use settlement_types::{
    ChargeOutcome, ChargeRequest, ChargeResponse, ChargeStatus, GatewayError, Instrument, Money,
    PaymentGateway,
};

const CHARGE_PATH: &str = "/api/v1/payments";
const DEFAULT_DECLINE: &str = "Payment declined";

/// Card processor reached over HTTP.
///
/// Performs exactly one request per charge; timeouts and retries belong to
/// [`GuardedGateway`](super::GuardedGateway).
pub struct HttpGateway {
    endpoint: String,
    secret: Option<String>,
    http: Client,
}

impl HttpGateway {
    pub fn new(base_url: impl Into<String>) -> Self {
        let base_url = base_url.into();
        Self {
            endpoint: format!("{}{}", base_url.trim_end_matches('/'), CHARGE_PATH),
            secret: None,
            http: Client::new(),
        }
    }

    /// Signs every request body with HMAC-SHA256 under `secret`.
    pub fn with_secret(mut self, secret: impl Into<String>) -> Self {
        self.secret = Some(secret.into());
        self
    }

    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn classify(err: reqwest::Error) -> GatewayError {
    if err.is_connect() {
        GatewayError::Connect(err.to_string())
    } else {
        GatewayError::Transport(err.to_string())
    }
}

/// Pulls a human-readable reason out of a processor error body.
fn rejection_reason(body: &str) -> String {
    serde_json::from_str::<serde_json::Value>(body)
        .ok()
        .and_then(|v| {
            ["message", "detail", "error"]
                .iter()
                .find_map(|k| v.get(*k).and_then(|m| m.as_str()).map(String::from))
        })
        .filter(|m| !m.is_empty())
        .unwrap_or_else(|| DEFAULT_DECLINE.to_string())
}

#[async_trait]
impl PaymentGateway for HttpGateway {
    #[tracing::instrument(skip(self, instrument), fields(amount = %amount, card_last4 = %instrument.last4()))]
    async fn charge(
        &self,
        amount: Money,
        instrument: &Instrument,
    ) -> Result<ChargeOutcome, GatewayError> {
        let body = serde_json::to_vec(&ChargeRequest::new(amount, instrument))
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        let mut req = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            req = req.header(SIGNATURE_HEADER, sign_payload(&body, secret));
        }

        let resp = req.body(body).send().await.map_err(classify)?;
        let status = resp.status();

        if status.is_server_error() {
            return Err(GatewayError::Transport(format!(
                "processor returned HTTP {}",
                status.as_u16()
            )));
        }

        if matches!(
            status,
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN | StatusCode::NOT_FOUND
        ) {
            tracing::error!(
                status = status.as_u16(),
                endpoint = %self.endpoint,
                "Processor refused the request; check GATEWAY_URL and GATEWAY_SECRET"
            );
            return Err(GatewayError::Refused(status.as_u16()));
        }

        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNPROCESSABLE_ENTITY {
            let body = resp.text().await.unwrap_or_default();
            let reason = rejection_reason(&body);
            tracing::debug!(status = status.as_u16(), reason = %reason, "Processor rejected charge");
            return Ok(ChargeOutcome::Declined { reason });
        }

        if !status.is_success() {
            return Err(GatewayError::Protocol(format!(
                "unexpected HTTP {}",
                status.as_u16()
            )));
        }

        let parsed: ChargeResponse = resp
            .json()
            .await
            .map_err(|e| GatewayError::Protocol(e.to_string()))?;

        Ok(match parsed.status {
            ChargeStatus::Success => ChargeOutcome::Approved {
                reference: parsed.id,
            },
            ChargeStatus::Failed => ChargeOutcome::Declined {
                reason: parsed
                    .message
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| DEFAULT_DECLINE.to_string()),
            },
        })
    }
}
