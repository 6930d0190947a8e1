//! # Settlement Client SDK
//!
//! A typed Rust client for the Settlement API.

use settlement_types::{
    BillSummaryResponse, ErrorResponse, PaymentId, PaymentResponse, ResolveOutcome,
    ResolveRequest, SettleRequest, SettlementResponse, SweepResponse,
};
use reqwest::{Client, RequestBuilder};
use serde::de::DeserializeOwned;

/// Error type for client operations.
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("API error: {status} {kind} - {message}")]
    Api {
        status: u16,
        kind: String,
        message: String,
        payment_id: Option<PaymentId>,
    },

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl ClientError {
    /// Stable error kind reported by the API, if this is an API error.
    pub fn kind(&self) -> Option<&str> {
        match self {
            ClientError::Api { kind, .. } => Some(kind),
            _ => None,
        }
    }
}

/// Settlement API client.
pub struct SettlementClient {
    base_url: String,
    token: Option<String>,
    http: Client,
}

impl SettlementClient {
    /// Creates a new client.
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            base_url: base_url.into().trim_end_matches('/').to_string(),
            token: None,
            http: Client::new(),
        }
    }

    /// Sets the bearer token for authentication.
    pub fn with_token(mut self, token: impl Into<String>) -> Self {
        self.token = Some(token.into());
        self
    }

    /// Checks if the API is healthy.
    pub async fn health(&self) -> Result<bool, ClientError> {
        let resp = self
            .http
            .get(format!("{}/health", self.base_url))
            .send()
            .await?;
        Ok(resp.status().is_success())
    }

    /// Settles all unpaid bills of an account for one period.
    pub async fn settle(&self, req: &SettleRequest) -> Result<SettlementResponse, ClientError> {
        self.post("/api/payments", req).await
    }

    /// Gets a payment attempt by ID.
    pub async fn get_payment(&self, id: PaymentId) -> Result<PaymentResponse, ClientError> {
        self.get(&format!("/api/payments/{}", id)).await
    }

    /// Lists bills of an account, optionally for one period.
    pub async fn account_bills(
        &self,
        account: &str,
        period: Option<&str>,
    ) -> Result<BillSummaryResponse, ClientError> {
        let path = match period {
            Some(period) => format!("/api/accounts/{}/bills?period={}", account, period),
            None => format!("/api/accounts/{}/bills", account),
        };
        self.get(&path).await
    }

    /// Lists payment attempts of an account, newest first.
    pub async fn account_payments(&self, account: &str) -> Result<Vec<PaymentResponse>, ClientError> {
        self.get(&format!("/api/accounts/{}/payments", account)).await
    }

    /// Lists payments awaiting reconciliation (operator only).
    pub async fn list_flagged(&self) -> Result<Vec<PaymentResponse>, ClientError> {
        self.get("/api/reconciliation/payments").await
    }

    /// Flags stale pending payments now (operator only).
    pub async fn sweep(&self) -> Result<SweepResponse, ClientError> {
        self.post("/api/reconciliation/sweep", &serde_json::json!({}))
            .await
    }

    /// Applies a flagged completed payment to its bills (operator only).
    pub async fn commit_flagged(&self, id: PaymentId) -> Result<PaymentResponse, ClientError> {
        self.post(
            &format!("/api/reconciliation/payments/{}/commit", id),
            &serde_json::json!({}),
        )
        .await
    }

    /// Resolves a stale pending payment (operator only).
    pub async fn resolve_stale(
        &self,
        id: PaymentId,
        outcome: ResolveOutcome,
        gateway_reference: Option<String>,
    ) -> Result<PaymentResponse, ClientError> {
        let req = ResolveRequest {
            outcome,
            gateway_reference,
        };
        self.post(&format!("/api/reconciliation/payments/{}/resolve", id), &req)
            .await
    }

    fn authorize(&self, req: RequestBuilder) -> RequestBuilder {
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ClientError> {
        let req = self.authorize(self.http.get(format!("{}{}", self.base_url, path)));
        let resp = req.send().await?;
        self.handle_response(resp).await
    }

    async fn post<T: DeserializeOwned, B: serde::Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<T, ClientError> {
        let req = self.authorize(
            self.http
                .post(format!("{}{}", self.base_url, path))
                .json(body),
        );
        let resp = req.send().await?;
        self.handle_response(resp).await
    }

    async fn handle_response<T: DeserializeOwned>(
        &self,
        resp: reqwest::Response,
    ) -> Result<T, ClientError> {
        let status = resp.status();
        if status.is_success() {
            let body = resp.text().await?;
            Ok(serde_json::from_str(&body)?)
        } else {
            let body = resp.text().await.unwrap_or_default();
            Err(api_error(status.as_u16(), body))
        }
    }
}

fn api_error(status: u16, body: String) -> ClientError {
    match serde_json::from_str::<ErrorResponse>(&body) {
        Ok(err) => ClientError::Api {
            status,
            kind: err.kind,
            message: err.error,
            payment_id: err.payment_id,
        },
        Err(_) => ClientError::Api {
            status,
            kind: "Unknown".into(),
            message: body,
            payment_id: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_client_creation() {
        let client = SettlementClient::new("http://localhost:3000");
        assert_eq!(client.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_client_with_trailing_slash() {
        let client = SettlementClient::new("http://localhost:3000/");
        assert_eq!(client.base_url, "http://localhost:3000");
    }

    #[test]
    fn test_client_with_token() {
        let client = SettlementClient::new("http://localhost:3000").with_token("jwt");
        assert_eq!(client.token, Some("jwt".to_string()));
    }

    #[test]
    fn test_api_error_parses_error_body() {
        let err = api_error(
            404,
            r#"{"error":"No unpaid bills","kind":"NoUnpaidBills","code":404}"#.into(),
        );
        assert_eq!(err.kind(), Some("NoUnpaidBills"));
        assert!(err.to_string().contains("No unpaid bills"));

        let err = api_error(502, "<html>bad gateway</html>".into());
        assert_eq!(err.kind(), Some("Unknown"));
    }
}
