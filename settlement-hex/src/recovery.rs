//! Background sweeper that flags payments stuck in `pending`.

use std::time::Duration;

use settlement_types::{BillLedger, PaymentGateway, PaymentLedger};
use tracing::{error, info, instrument};

use crate::SettlementOrchestrator;

pub struct ReconciliationSweeper<B: BillLedger, P: PaymentLedger, G: PaymentGateway> {
    orchestrator: SettlementOrchestrator<B, P, G>,
    interval: Duration,
}

impl<B: BillLedger, P: PaymentLedger, G: PaymentGateway> ReconciliationSweeper<B, P, G> {
    pub fn new(orchestrator: SettlementOrchestrator<B, P, G>, interval: Duration) -> Self {
        Self {
            orchestrator,
            interval,
        }
    }

    #[instrument(skip(self), fields(interval_secs = self.interval.as_secs()))]
    pub async fn run(self) {
        info!(
            stale_after_secs = self.orchestrator.stale_after().as_secs(),
            "Starting reconciliation sweeper"
        );

        let mut ticker = tokio::time::interval(self.interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            ticker.tick().await;
            if let Err(e) = self.orchestrator.sweep_stale().await {
                error!("Reconciliation sweep failed: {}", e);
            }
        }
    }
}
