//! Settlement Orchestrator
//!
//! Runs the reserve -> charge -> commit saga across the bill ledger, the
//! payment ledger and the card gateway. Only this module sees all three.
//! Contains NO infrastructure logic - pure business orchestration.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing::{Instrument as _, error, info, warn};

use settlement_types::{
    AMOUNT_TOLERANCE, AccountNumber, AlertKind, AppError, Bill, BillLedger, BillSummaryResponse,
    ChargeOutcome, CoveredBill, Instrument, Money, Payment, PaymentGateway, PaymentId,
    PaymentLedger, PaymentResponse, PaymentStatus, Period, RepoError, ResolveOutcome,
    ResolveRequest, SettleRequest, SettlementError, SettlementResponse,
};

use crate::caller::Caller;
use crate::locks::AccountLocks;

/// Pending payments younger than this are never considered stale.
pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(300);

/// Application service for bill settlement.
///
/// Generic over the two ledgers and the gateway - adapters are injected at
/// construction. Cloning is cheap and clones share locks and adapters.
pub struct SettlementOrchestrator<B: BillLedger, P: PaymentLedger, G: PaymentGateway> {
    inner: Arc<Inner<B, P, G>>,
}

impl<B: BillLedger, P: PaymentLedger, G: PaymentGateway> Clone for SettlementOrchestrator<B, P, G> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct Inner<B, P, G> {
    bills: B,
    payments: P,
    gateway: G,
    locks: AccountLocks,
    stale_after: Duration,
}

fn internal(err: RepoError) -> SettlementError {
    SettlementError::Internal(err.to_string())
}

impl<B: BillLedger, P: PaymentLedger, G: PaymentGateway> SettlementOrchestrator<B, P, G> {
    /// Creates a new orchestrator over the given adapters.
    pub fn new(bills: B, payments: P, gateway: G) -> Self {
        Self::with_stale_after(bills, payments, gateway, DEFAULT_STALE_AFTER)
    }

    /// Creates a new orchestrator with a custom stale-pending threshold.
    pub fn with_stale_after(bills: B, payments: P, gateway: G, stale_after: Duration) -> Self {
        Self {
            inner: Arc::new(Inner {
                bills,
                payments,
                gateway,
                locks: AccountLocks::new(),
                stale_after,
            }),
        }
    }

    pub fn bills(&self) -> &B {
        &self.inner.bills
    }

    pub fn payments(&self) -> &P {
        &self.inner.payments
    }

    pub fn stale_after(&self) -> Duration {
        self.inner.stale_after
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Settlement
    // ─────────────────────────────────────────────────────────────────────────────

    /// Validates an inbound request, checks the caller owns the account, then settles.
    pub async fn settle_for(
        &self,
        caller: &Caller,
        req: SettleRequest,
    ) -> Result<SettlementResponse, SettlementError> {
        let (account, period, claimed, instrument) = req.into_parts()?;

        let owner = self
            .inner
            .bills
            .account_owner(&account)
            .await
            .map_err(internal)?;
        if owner.as_deref() != Some(caller.subject.as_str()) {
            return Err(SettlementError::AccountNotFound(account));
        }

        self.settle(account, period, claimed, instrument).await
    }

    /// Settles every unpaid bill of `account` for `period`, charging `claimed`.
    ///
    /// The saga runs on its own task: dropping the returned future does not
    /// abort a reservation, charge or commit already under way.
    pub async fn settle(
        &self,
        account: AccountNumber,
        period: Period,
        claimed: Money,
        instrument: Instrument,
    ) -> Result<SettlementResponse, SettlementError> {
        let inner = Arc::clone(&self.inner);
        let task = tokio::spawn(
            async move {
                let _guard = inner.locks.acquire(&account).await;
                inner.run_saga(account, period, claimed, instrument).await
            }
            .in_current_span(),
        );

        task.await
            .map_err(|e| SettlementError::Internal(format!("settlement task failed: {}", e)))?
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Read side
    // ─────────────────────────────────────────────────────────────────────────────

    /// Fails with `NotFound` unless the account exists and the caller may read it.
    async fn ensure_access(&self, caller: &Caller, account: &AccountNumber) -> Result<(), AppError> {
        let owner = self.inner.bills.account_owner(account).await?;
        match owner {
            Some(owner) if owner == caller.subject || caller.is_operator() => Ok(()),
            _ => Err(AppError::NotFound("Account not found".into())),
        }
    }

    /// Lists bills of an account with totals, optionally for one period.
    pub async fn account_bills(
        &self,
        caller: &Caller,
        account: &AccountNumber,
        period: Option<&Period>,
    ) -> Result<BillSummaryResponse, AppError> {
        self.ensure_access(caller, account).await?;

        let bills = self.inner.bills.list_bills(account, period).await?;
        let total_amount = Money::sum(bills.iter().map(|b| b.amount))?;
        let unpaid_amount = Money::sum(bills.iter().filter(|b| b.is_pending()).map(|b| b.amount))?;

        Ok(BillSummaryResponse {
            account_number: account.clone(),
            period: period.cloned(),
            total_amount,
            unpaid_amount,
            bills,
        })
    }

    /// Lists payment attempts of an account, newest first.
    pub async fn account_payments(
        &self,
        caller: &Caller,
        account: &AccountNumber,
    ) -> Result<Vec<PaymentResponse>, AppError> {
        self.ensure_access(caller, account).await?;

        let payments = self.inner.payments.list_payments_for_account(account).await?;
        Ok(payments.into_iter().map(PaymentResponse::from).collect())
    }

    /// Gets one payment. Callers only see payments of accounts they own.
    pub async fn get_payment(
        &self,
        caller: &Caller,
        id: PaymentId,
    ) -> Result<PaymentResponse, AppError> {
        let payment = self.load_payment(id).await?;

        if !caller.is_operator() {
            let owner = self
                .inner
                .bills
                .account_owner(&payment.account_number)
                .await?;
            if owner.as_deref() != Some(caller.subject.as_str()) {
                return Err(AppError::NotFound(format!("Payment {}", id)));
            }
        }

        Ok(payment.into())
    }

    async fn load_payment(&self, id: PaymentId) -> Result<Payment, AppError> {
        self.inner
            .payments
            .get_payment(id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Payment {}", id)))
    }

    // ─────────────────────────────────────────────────────────────────────────────
    // Reconciliation
    // ─────────────────────────────────────────────────────────────────────────────

    /// Lists payments awaiting operator attention.
    pub async fn list_flagged(&self) -> Result<Vec<PaymentResponse>, AppError> {
        let payments = self.inner.payments.list_flagged().await?;
        Ok(payments.into_iter().map(PaymentResponse::from).collect())
    }

    /// Flags every pending payment older than the stale threshold.
    ///
    /// Stale payments are never transitioned here: the card may have been
    /// charged, and only an operator can establish that.
    pub async fn sweep_stale(&self) -> Result<Vec<PaymentId>, AppError> {
        let stale_after = chrono::Duration::from_std(self.inner.stale_after)
            .map_err(|e| AppError::Internal(e.to_string()))?;
        let cutoff = Utc::now() - stale_after;

        let pending = self.inner.payments.list_pending_before(cutoff).await?;
        let mut flagged = Vec::new();

        for payment in pending.into_iter().filter(|p| !p.needs_reconciliation()) {
            warn!(
                target: "settlement::alert",
                payment_id = %payment.id,
                account = %payment.account_number,
                bill_ids = ?payment.bill_ids,
                amount = %payment.amount,
                created_at = %payment.created_at,
                "Payment stuck in pending; charge outcome unknown"
            );

            let note = format!(
                "pending for more than {}s; charge outcome unknown",
                self.inner.stale_after.as_secs()
            );
            self.inner
                .payments
                .flag_for_reconciliation(
                    payment.id,
                    AlertKind::StalePending,
                    &note,
                    alert_payload(&payment, None, &note),
                )
                .await?;
            flagged.push(payment.id);
        }

        if !flagged.is_empty() {
            info!(count = flagged.len(), "Flagged stale pending payments");
        }
        Ok(flagged)
    }

    /// Re-applies a flagged completed payment to its bills. Never charges.
    pub async fn commit_flagged(&self, id: PaymentId) -> Result<PaymentResponse, AppError> {
        let payment = self.load_payment(id).await?;
        let _guard = self.inner.locks.acquire(&payment.account_number).await;
        let payment = self.load_payment(id).await?;

        if payment.status != PaymentStatus::Completed || !payment.needs_reconciliation() {
            return Err(AppError::Conflict(format!(
                "Payment {} is not a flagged completed payment",
                id
            )));
        }

        let bills = self.inner.bills.get_bills(&payment.bill_ids).await?;
        if bills.len() != payment.bill_ids.len() {
            return Err(AppError::Conflict(format!(
                "Payment {} covers bills missing from the ledger",
                id
            )));
        }
        let still_pending: Vec<_> = bills.iter().filter(|b| b.is_pending()).map(|b| b.id).collect();

        self.inner.bills.mark_paid(&still_pending).await?;
        self.inner.payments.clear_reconciliation_flag(id).await?;

        info!(payment_id = %id, bills = still_pending.len(), "Operator committed flagged payment");
        Ok(self.load_payment(id).await?.into())
    }

    /// Resolves a stale pending payment once the processor's outcome is known.
    pub async fn resolve_stale(
        &self,
        id: PaymentId,
        req: ResolveRequest,
    ) -> Result<PaymentResponse, AppError> {
        let payment = self.load_payment(id).await?;
        let _guard = self.inner.locks.acquire(&payment.account_number).await;
        let payment = self.load_payment(id).await?;

        if payment.status != PaymentStatus::Pending {
            return Err(AppError::Conflict(format!(
                "Payment {} is already {}",
                id, payment.status
            )));
        }
        let age = (Utc::now() - payment.created_at).to_std().unwrap_or_default();
        if age < self.inner.stale_after {
            return Err(AppError::Conflict(format!(
                "Payment {} is not stale yet; it may still be in flight",
                id
            )));
        }

        match req.outcome {
            ResolveOutcome::Charged => {
                self.inner
                    .payments
                    .complete(id, Utc::now(), req.gateway_reference.as_deref())
                    .await?;

                if let Err(e) = self.inner.bills.mark_paid(&payment.bill_ids).await {
                    let detail = format!("bills could not be marked paid: {}", e);
                    self.inner
                        .payments
                        .flag_for_reconciliation(
                            id,
                            AlertKind::SettlementInconsistent,
                            &detail,
                            alert_payload(&payment, req.gateway_reference.as_deref(), &detail),
                        )
                        .await?;
                    return Err(AppError::Conflict(format!(
                        "Payment {} completed but {}; commit it once resolved",
                        id, detail
                    )));
                }
            }
            ResolveOutcome::NotCharged => {
                self.inner
                    .payments
                    .fail(id, "resolved by operator: not charged")
                    .await?;
            }
        }

        if payment.needs_reconciliation() {
            self.inner.payments.clear_reconciliation_flag(id).await?;
        }

        info!(payment_id = %id, outcome = ?req.outcome, "Operator resolved stale payment");
        Ok(self.load_payment(id).await?.into())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Saga steps
// ─────────────────────────────────────────────────────────────────────────────

impl<B: BillLedger, P: PaymentLedger, G: PaymentGateway> Inner<B, P, G> {
    #[tracing::instrument(
        name = "settle",
        skip(self, instrument),
        fields(account = %account, period = %period, claimed = %claimed, payment_id = tracing::field::Empty)
    )]
    async fn run_saga(
        &self,
        account: AccountNumber,
        period: Period,
        claimed: Money,
        instrument: Instrument,
    ) -> Result<SettlementResponse, SettlementError> {
        // 1. Resolve bills
        let bills = self
            .bills
            .list_unpaid(&account, &period)
            .await
            .map_err(internal)?;
        if bills.is_empty() {
            return Err(SettlementError::NoUnpaidBills { account, period });
        }

        // 2. Amount reconciliation
        let expected = Money::sum(bills.iter().map(|b| b.amount))?;
        if !claimed.within(&expected, AMOUNT_TOLERANCE) {
            return Err(SettlementError::AmountMismatch { claimed, expected });
        }

        // 3. Reserve
        let bill_ids = bills.iter().map(|b| b.id).collect();
        let mut payment = Payment::reserve(account, period, claimed, bill_ids)?;
        tracing::Span::current().record("payment_id", tracing::field::display(payment.id));

        self.payments.reserve(&payment).await.map_err(|e| match e {
            RepoError::Conflict(detail) => SettlementError::BillsAlreadyClaimed(detail),
            other => internal(other),
        })?;
        info!(bills = payment.bill_ids.len(), "Reserved payment");

        // 4. Charge
        let reference = match self.gateway.charge(claimed, &instrument).await {
            Ok(ChargeOutcome::Approved { reference }) => reference,
            Ok(ChargeOutcome::Declined { reason }) => {
                info!(reason = %reason, "Gateway declined charge");
                self.fail_reserved(payment.id, &reason).await;
                return Err(SettlementError::PaymentDeclined {
                    payment_id: payment.id,
                    reason,
                });
            }
            Err(e) => {
                error!(payment_id = %payment.id, error = %e, "Gateway unavailable");
                let detail = e.to_string();
                self.fail_reserved(payment.id, &detail).await;
                return Err(SettlementError::GatewayUnavailable {
                    payment_id: payment.id,
                    detail,
                });
            }
        };

        // 5. Commit: payment first, then bills
        let completed_at = Utc::now();
        if let Err(e) = self
            .payments
            .complete(payment.id, completed_at, Some(&reference))
            .await
        {
            return Err(self
                .escalate(&payment, &reference, format!("payment completion failed: {}", e))
                .await);
        }
        payment.complete(completed_at, Some(reference.clone()))?;

        if let Err(e) = self.bills.mark_paid(&payment.bill_ids).await {
            return Err(self
                .escalate(&payment, &reference, format!("marking bills paid failed: {}", e))
                .await);
        }

        info!(reference = %reference, "Settlement completed");
        Ok(settlement_response(payment, &bills))
    }

    /// Fails a reserved payment after a charge that did not go through.
    async fn fail_reserved(&self, id: PaymentId, reason: &str) {
        if let Err(e) = self.payments.fail(id, reason).await {
            // The payment stays pending and its claims held; the sweeper flags it.
            error!(payment_id = %id, error = %e, "Could not mark payment failed");
        }
    }

    /// Records a charge that could not be applied and raises an operator alert.
    async fn escalate(&self, payment: &Payment, reference: &str, detail: String) -> SettlementError {
        error!(
            target: "settlement::alert",
            payment_id = %payment.id,
            account = %payment.account_number,
            bill_ids = ?payment.bill_ids,
            amount = %payment.amount,
            gateway_reference = %reference,
            detail = %detail,
            "Card charged but settlement could not be committed"
        );

        if let Err(e) = self
            .payments
            .flag_for_reconciliation(
                payment.id,
                AlertKind::SettlementInconsistent,
                &detail,
                alert_payload(payment, Some(reference), &detail),
            )
            .await
        {
            error!(
                target: "settlement::alert",
                payment_id = %payment.id,
                error = %e,
                "Could not flag payment for reconciliation"
            );
        }

        SettlementError::SettlementInconsistent {
            payment_id: payment.id,
            bill_ids: payment.bill_ids.clone(),
            amount: payment.amount,
            detail,
        }
    }
}

fn alert_payload(payment: &Payment, reference: Option<&str>, detail: &str) -> serde_json::Value {
    serde_json::json!({
        "account_number": payment.account_number,
        "period": payment.period,
        "amount": payment.amount,
        "bill_ids": payment.bill_ids,
        "status": payment.status,
        "gateway_reference": reference,
        "detail": detail,
    })
}

fn settlement_response(payment: Payment, bills: &[Bill]) -> SettlementResponse {
    SettlementResponse {
        payment_id: payment.id,
        status: payment.status,
        account_number: payment.account_number,
        period: payment.period,
        amount: payment.amount,
        bills: bills
            .iter()
            .map(|b| CoveredBill {
                id: b.id,
                amount: b.amount,
            })
            .collect(),
        created_at: payment.created_at,
        completed_at: payment.completed_at,
    }
}
