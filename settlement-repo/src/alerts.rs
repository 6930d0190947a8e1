//! Outbox delivery of reconciliation alerts to an operator webhook.

use crate::Repo;
use crate::security::{SIGNATURE_HEADER, sign_payload};
use settlement_types::{AlertStatus, SettlementAlert};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, info, instrument, warn};

/// Delivery attempts before an alert is left in `FAILED` for good.
pub const MAX_ALERT_ATTEMPTS: i32 = 5;

const BATCH_SIZE: i64 = 10;

pub struct AlertWorker {
    repo: Repo,
    client: reqwest::Client,
    target_url: String,
    secret: Option<String>,
    poll_interval: Duration,
}

impl AlertWorker {
    pub fn new(repo: Repo, target_url: String, secret: Option<String>) -> Self {
        Self {
            repo,
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .unwrap_or_default(),
            target_url,
            secret,
            poll_interval: Duration::from_secs(1),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    #[instrument(skip(self), fields(target = %self.target_url))]
    pub async fn run(self) {
        info!("Starting alert worker");
        loop {
            if let Err(e) = self.deliver_pending().await {
                error!("Failed to fetch settlement alerts: {}", e);
            }
            sleep(self.poll_interval).await;
        }
    }

    /// Attempts delivery of one batch of pending alerts. Returns how many were delivered.
    pub async fn deliver_pending(&self) -> Result<usize, settlement_types::RepoError> {
        let alerts = self
            .repo
            .get_pending_alerts(BATCH_SIZE, MAX_ALERT_ATTEMPTS)
            .await?;

        if !alerts.is_empty() {
            info!("Processing {} pending settlement alerts", alerts.len());
        }

        let mut delivered = 0;
        for alert in alerts {
            if self.deliver(alert).await {
                delivered += 1;
            }
        }
        Ok(delivered)
    }

    #[instrument(skip(self, alert), fields(alert_id = %alert.id, payment_id = %alert.payment_id, kind = alert.kind.as_str()))]
    async fn deliver(&self, alert: SettlementAlert) -> bool {
        let body = serde_json::json!({
            "id": alert.id,
            "kind": alert.kind,
            "payment_id": alert.payment_id,
            "created_at": alert.created_at,
            "details": alert.payload,
        })
        .to_string();

        let mut request = self
            .client
            .post(&self.target_url)
            .header(reqwest::header::CONTENT_TYPE, "application/json");
        if let Some(secret) = &self.secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(body.as_bytes(), secret));
        }

        let (status, last_error) = match request.body(body).send().await {
            Ok(resp) if resp.status().is_success() => (AlertStatus::Delivered, None),
            Ok(resp) => (AlertStatus::Failed, Some(format!("HTTP {}", resp.status()))),
            Err(e) => (AlertStatus::Failed, Some(e.to_string())),
        };

        if let Some(reason) = &last_error {
            warn!(attempt = alert.attempts + 1, "Alert delivery failed: {}", reason);
        }
        let delivered = status == AlertStatus::Delivered;

        if let Err(e) = self
            .repo
            .update_alert_status(alert.id, status, last_error)
            .await
        {
            error!("Failed to update alert status: {}", e);
        }
        delivered
    }
}
