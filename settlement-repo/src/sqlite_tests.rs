//! SQLite ledger integration tests.

#[cfg(test)]
mod tests {
    use chrono::{Duration, Utc};
    use settlement_types::{
        AccountNumber, AlertKind, AlertStatus, BillId, BillLedger, BillStatus, DomainError, Money,
        Payment, PaymentLedger, PaymentStatus, Period, RepoError,
    };

    use crate::SqliteRepo;

    async fn setup_repo() -> SqliteRepo {
        SqliteRepo::new("sqlite::memory:").await.unwrap()
    }

    fn account() -> AccountNumber {
        AccountNumber::parse("1234567890").unwrap()
    }

    fn period() -> Period {
        Period::parse("2024-03").unwrap()
    }

    fn money(amount: i64) -> Money {
        Money::new(amount).unwrap()
    }

    /// Registers the default account with two pending bills (1000 + 500) in 2024-03.
    async fn seeded_repo() -> (SqliteRepo, Vec<BillId>) {
        let repo = setup_repo().await;
        repo.register_account(&account(), "user-1").await.unwrap();
        let a = repo.issue_bill(&account(), &period(), money(100000)).await.unwrap();
        let b = repo.issue_bill(&account(), &period(), money(50000)).await.unwrap();
        (repo, vec![a.id, b.id])
    }

    fn reservation(bill_ids: Vec<BillId>, amount: i64) -> Payment {
        Payment::reserve(account(), period(), money(amount), bill_ids).unwrap()
    }

    #[tokio::test]
    async fn test_account_owner() {
        let (repo, _) = seeded_repo().await;

        assert_eq!(
            repo.account_owner(&account()).await.unwrap().as_deref(),
            Some("user-1")
        );
        let unknown = AccountNumber::parse("0000000000").unwrap();
        assert!(repo.account_owner(&unknown).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_register_account_twice_conflicts() {
        let (repo, _) = seeded_repo().await;

        let result = repo.register_account(&account(), "user-2").await;

        assert!(matches!(result, Err(RepoError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_list_unpaid_filters_period_and_status() {
        let (repo, ids) = seeded_repo().await;
        let other = Period::parse("2024-04").unwrap();
        repo.issue_bill(&account(), &other, money(7000)).await.unwrap();
        repo.mark_paid(&ids[..1]).await.unwrap();

        let unpaid = repo.list_unpaid(&account(), &period()).await.unwrap();

        assert_eq!(unpaid.len(), 1);
        assert_eq!(unpaid[0].id, ids[1]);
        assert_eq!(unpaid[0].amount.amount(), 50000);
        assert_eq!(unpaid[0].status, BillStatus::Pending);
    }

    #[tokio::test]
    async fn test_list_bills_with_and_without_period() {
        let (repo, _) = seeded_repo().await;
        let other = Period::parse("2024-04").unwrap();
        repo.issue_bill(&account(), &other, money(7000)).await.unwrap();

        assert_eq!(repo.list_bills(&account(), None).await.unwrap().len(), 3);
        let april = repo.list_bills(&account(), Some(&other)).await.unwrap();
        assert_eq!(april.len(), 1);
        assert_eq!(april[0].period, other);
    }

    #[tokio::test]
    async fn test_get_bills_skips_unknown_ids() {
        let (repo, ids) = seeded_repo().await;

        let bills = repo
            .get_bills(&[ids[1], BillId::new(9999), ids[0]])
            .await
            .unwrap();

        assert_eq!(bills.iter().map(|b| b.id).collect::<Vec<_>>(), ids);
        assert!(repo.get_bills(&[]).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_mark_paid_sets_paid_at() {
        let (repo, ids) = seeded_repo().await;

        repo.mark_paid(&ids).await.unwrap();

        let bills = repo.get_bills(&ids).await.unwrap();
        assert!(bills.iter().all(|b| b.status == BillStatus::Paid));
        assert!(bills.iter().all(|b| b.paid_at.is_some()));
    }

    #[tokio::test]
    async fn test_mark_paid_is_all_or_nothing() {
        let (repo, ids) = seeded_repo().await;
        repo.mark_paid(&ids[..1]).await.unwrap();

        let result = repo.mark_paid(&ids).await;

        assert!(matches!(result, Err(RepoError::Conflict(_))));
        let second = repo.get_bills(&ids[1..]).await.unwrap();
        assert_eq!(second[0].status, BillStatus::Pending);
    }

    #[tokio::test]
    async fn test_reserve_and_get_payment() {
        let (repo, ids) = seeded_repo().await;
        let payment = reservation(ids.clone(), 150000);

        repo.reserve(&payment).await.unwrap();

        let stored = repo.get_payment(payment.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Pending);
        assert_eq!(stored.bill_ids, ids);
        assert_eq!(stored.amount.amount(), 150000);
        assert!(stored.completed_at.is_none());
    }

    #[tokio::test]
    async fn test_overlapping_reservation_conflicts_without_partial_write() {
        let (repo, ids) = seeded_repo().await;
        let first = reservation(ids.clone(), 150000);
        repo.reserve(&first).await.unwrap();

        let second = reservation(vec![ids[1]], 50000);
        let result = repo.reserve(&second).await;

        assert!(matches!(result, Err(RepoError::Conflict(_))));
        assert!(repo.get_payment(second.id).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_fail_releases_claims() {
        let (repo, ids) = seeded_repo().await;
        let first = reservation(ids.clone(), 150000);
        repo.reserve(&first).await.unwrap();

        repo.fail(first.id, "Payment failed").await.unwrap();

        let stored = repo.get_payment(first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Failed);
        assert_eq!(stored.failure_reason.as_deref(), Some("Payment failed"));

        let retry = reservation(ids, 150000);
        repo.reserve(&retry).await.unwrap();
    }

    #[tokio::test]
    async fn test_completed_payment_keeps_claims() {
        let (repo, ids) = seeded_repo().await;
        let first = reservation(ids.clone(), 150000);
        repo.reserve(&first).await.unwrap();

        repo.complete(first.id, Utc::now(), Some("ch_1")).await.unwrap();

        let stored = repo.get_payment(first.id).await.unwrap().unwrap();
        assert_eq!(stored.status, PaymentStatus::Completed);
        assert_eq!(stored.gateway_reference.as_deref(), Some("ch_1"));
        assert!(stored.completed_at.is_some());

        let retry = reservation(ids, 150000);
        assert!(matches!(
            repo.reserve(&retry).await,
            Err(RepoError::Conflict(_))
        ));
    }

    #[tokio::test]
    async fn test_terminal_payment_cannot_transition() {
        let (repo, ids) = seeded_repo().await;
        let payment = reservation(ids, 150000);
        repo.reserve(&payment).await.unwrap();
        repo.complete(payment.id, Utc::now(), None).await.unwrap();

        let result = repo.fail(payment.id, "late").await;

        assert!(matches!(
            result,
            Err(RepoError::Domain(DomainError::InvalidTransition {
                from: PaymentStatus::Completed,
                to: PaymentStatus::Failed,
            }))
        ));
    }

    #[tokio::test]
    async fn test_transition_of_unknown_payment_is_not_found() {
        let repo = setup_repo().await;

        let result = repo
            .complete(settlement_types::PaymentId::new(), Utc::now(), None)
            .await;

        assert!(matches!(result, Err(RepoError::NotFound)));
    }

    #[tokio::test]
    async fn test_list_payments_for_account_newest_first() {
        let (repo, ids) = seeded_repo().await;
        let mut older = reservation(vec![ids[0]], 100000);
        older.created_at = Utc::now() - Duration::minutes(5);
        repo.reserve(&older).await.unwrap();
        let newer = reservation(vec![ids[1]], 50000);
        repo.reserve(&newer).await.unwrap();

        let payments = repo.list_payments_for_account(&account()).await.unwrap();

        assert_eq!(
            payments.iter().map(|p| p.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );
        assert_eq!(payments[1].bill_ids, vec![ids[0]]);
    }

    #[tokio::test]
    async fn test_list_pending_before_cutoff() {
        let (repo, ids) = seeded_repo().await;
        let mut stale = reservation(vec![ids[0]], 100000);
        stale.created_at = Utc::now() - Duration::minutes(10);
        repo.reserve(&stale).await.unwrap();
        let fresh = reservation(vec![ids[1]], 50000);
        repo.reserve(&fresh).await.unwrap();

        let pending = repo
            .list_pending_before(Utc::now() - Duration::minutes(5))
            .await
            .unwrap();

        assert_eq!(pending.len(), 1);
        assert_eq!(pending[0].id, stale.id);
    }

    #[tokio::test]
    async fn test_flag_queues_alert_and_clear_removes_flag() {
        let (repo, ids) = seeded_repo().await;
        let payment = reservation(ids, 150000);
        repo.reserve(&payment).await.unwrap();

        repo.flag_for_reconciliation(
            payment.id,
            AlertKind::StalePending,
            "pending past threshold",
            serde_json::json!({ "amount": 150000 }),
        )
        .await
        .unwrap();

        let flagged = repo.list_flagged().await.unwrap();
        assert_eq!(flagged.len(), 1);
        assert_eq!(
            flagged[0].reconciliation_note.as_deref(),
            Some("pending past threshold")
        );

        let alerts = repo.get_pending_alerts(10, 5).await.unwrap();
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].kind, AlertKind::StalePending);
        assert_eq!(alerts[0].payment_id, payment.id);
        assert_eq!(alerts[0].payload["amount"], 150000);

        repo.clear_reconciliation_flag(payment.id).await.unwrap();
        assert!(repo.list_flagged().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_flag_unknown_payment_is_not_found() {
        let repo = setup_repo().await;

        let result = repo
            .flag_for_reconciliation(
                settlement_types::PaymentId::new(),
                AlertKind::SettlementInconsistent,
                "x",
                serde_json::Value::Null,
            )
            .await;

        assert!(matches!(result, Err(RepoError::NotFound)));
        assert!(repo.get_pending_alerts(10, 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_alert_status_updates() {
        let (repo, ids) = seeded_repo().await;
        let payment = reservation(ids, 150000);
        repo.reserve(&payment).await.unwrap();
        repo.flag_for_reconciliation(
            payment.id,
            AlertKind::SettlementInconsistent,
            "commit failed",
            serde_json::json!({}),
        )
        .await
        .unwrap();
        let alert = repo.get_pending_alerts(10, 5).await.unwrap().remove(0);

        repo.update_alert_status(alert.id, AlertStatus::Failed, Some("HTTP 500".into()))
            .await
            .unwrap();
        let retry = repo.get_pending_alerts(10, 5).await.unwrap();
        assert_eq!(retry[0].attempts, 1);
        assert_eq!(retry[0].last_error.as_deref(), Some("HTTP 500"));
        assert!(repo.get_pending_alerts(10, 1).await.unwrap().is_empty());

        repo.update_alert_status(alert.id, AlertStatus::Delivered, None)
            .await
            .unwrap();
        assert!(repo.get_pending_alerts(10, 5).await.unwrap().is_empty());
    }
}
