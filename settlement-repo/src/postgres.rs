//! PostgreSQL ledger adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use uuid::Uuid;

use settlement_types::{
    AccountNumber, AlertKind, AlertStatus, Bill, BillId, BillLedger, DomainError, Money, Payment,
    PaymentId, PaymentLedger, PaymentStatus, Period, RepoError, SettlementAlert,
};

use crate::types::{
    DbAlert, DbBill, DbOwner, DbPayment, DbPaymentBill, DbPaymentStatus, hydrate_payments,
    parse_payment_status,
};

const BILL_COLUMNS: &str = "id, account_number, period, amount, status, paid_at";
const PAYMENT_COLUMNS: &str = "id, account_number, period, amount, status, created_at, \
     completed_at, gateway_reference, failure_reason, reconciliation_note";

fn db_err(e: sqlx::Error) -> RepoError {
    RepoError::Database(e.to_string())
}

fn tx_err(e: sqlx::Error) -> RepoError {
    RepoError::Transaction(e.to_string())
}

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

// ─────────────────────────────────────────────────────────────────────────────
// PostgreSQL Repository
// ─────────────────────────────────────────────────────────────────────────────

/// PostgreSQL ledger with claim-index enforced exclusivity.
#[derive(Clone)]
pub struct PostgresRepo {
    pool: PgPool,
}

/// Executes SQL statements from a migration file, splitting by semicolons.
async fn execute_migration(pool: &PgPool, sql: &str, name: &str) -> Result<(), anyhow::Error> {
    for statement in sql.split(';') {
        let stmt = statement.trim();
        if !stmt.is_empty() {
            sqlx::query(stmt)
                .execute(pool)
                .await
                .map_err(|e| anyhow::anyhow!("Migration {} failed: {}", name, e))?;
        }
    }
    Ok(())
}

/// Runs all database migrations.
async fn run_migrations(pool: &PgPool) -> Result<(), anyhow::Error> {
    execute_migration(
        pool,
        include_str!("../migrations/0001_create_ledgers_pg.sql"),
        "0001",
    )
    .await?;

    execute_migration(
        pool,
        include_str!("../migrations/0002_create_settlement_alerts_pg.sql"),
        "0002",
    )
    .await?;

    Ok(())
}

impl PostgresRepo {
    /// Creates a new PostgreSQL repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        run_migrations(&pool).await?;
        Ok(Self { pool })
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Registers an account and the identity-provider subject that owns it.
    pub async fn register_account(
        &self,
        account: &AccountNumber,
        owner_subject: &str,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"INSERT INTO accounts (account_number, owner_subject, created_at) VALUES ($1, $2, $3)"#,
        )
        .bind(account.as_str())
        .bind(owner_subject)
        .bind(Utc::now())
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) if is_unique_violation(&e) => Err(RepoError::Conflict(format!(
                "Account {} already exists",
                account
            ))),
            Err(e) => Err(db_err(e)),
        }
    }

    /// Files a new pending bill against an account.
    pub async fn issue_bill(
        &self,
        account: &AccountNumber,
        period: &Period,
        amount: Money,
    ) -> Result<Bill, RepoError> {
        let row: DbBill = sqlx::query_as(&format!(
            "INSERT INTO bills (account_number, period, amount, status, created_at) \
             VALUES ($1, $2, $3, 'pending', $4) RETURNING {}",
            BILL_COLUMNS
        ))
        .bind(account.as_str())
        .bind(period.as_str())
        .bind(amount.amount())
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(db_err)?;

        row.into_domain()
    }

    async fn load_payments(&self, rows: Vec<DbPayment>) -> Result<Vec<Payment>, RepoError> {
        if rows.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let links: Vec<DbPaymentBill> = sqlx::query_as(
            r#"SELECT payment_id, bill_id FROM payment_bills
               WHERE payment_id = ANY($1) ORDER BY payment_id, position"#,
        )
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        hydrate_payments(rows, links)
    }

    /// Explains why a conditional `pending -> to` update touched no row.
    async fn transition_error(&self, id: PaymentId, to: PaymentStatus) -> RepoError {
        let row: Result<Option<DbPaymentStatus>, _> =
            sqlx::query_as(r#"SELECT status FROM payments WHERE id = $1"#)
                .bind(id.into_uuid())
                .fetch_optional(&self.pool)
                .await;

        match row {
            Ok(None) => RepoError::NotFound,
            Ok(Some(row)) => match parse_payment_status(&row.status) {
                Ok(from) => RepoError::Domain(DomainError::InvalidTransition { from, to }),
                Err(e) => e,
            },
            Err(e) => db_err(e),
        }
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Bill ledger
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl BillLedger for PostgresRepo {
    async fn account_owner(&self, account: &AccountNumber) -> Result<Option<String>, RepoError> {
        let row: Option<DbOwner> =
            sqlx::query_as(r#"SELECT owner_subject FROM accounts WHERE account_number = $1"#)
                .bind(account.as_str())
                .fetch_optional(&self.pool)
                .await
                .map_err(db_err)?;

        Ok(row.map(|r| r.owner_subject))
    }

    async fn list_unpaid(
        &self,
        account: &AccountNumber,
        period: &Period,
    ) -> Result<Vec<Bill>, RepoError> {
        let rows: Vec<DbBill> = sqlx::query_as(&format!(
            "SELECT {} FROM bills \
             WHERE account_number = $1 AND period = $2 AND status = 'pending' ORDER BY id",
            BILL_COLUMNS
        ))
        .bind(account.as_str())
        .bind(period.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbBill::into_domain).collect()
    }

    async fn list_bills(
        &self,
        account: &AccountNumber,
        period: Option<&Period>,
    ) -> Result<Vec<Bill>, RepoError> {
        let rows: Vec<DbBill> = sqlx::query_as(&format!(
            "SELECT {} FROM bills \
             WHERE account_number = $1 AND ($2::text IS NULL OR period = $2) \
             ORDER BY period, id",
            BILL_COLUMNS
        ))
        .bind(account.as_str())
        .bind(period.map(Period::as_str))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbBill::into_domain).collect()
    }

    async fn get_bills(&self, ids: &[BillId]) -> Result<Vec<Bill>, RepoError> {
        let ids: Vec<i64> = ids.iter().map(BillId::value).collect();

        let rows: Vec<DbBill> = sqlx::query_as(&format!(
            "SELECT {} FROM bills WHERE id = ANY($1) ORDER BY id",
            BILL_COLUMNS
        ))
        .bind(&ids)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbBill::into_domain).collect()
    }

    async fn mark_paid(&self, ids: &[BillId]) -> Result<(), RepoError> {
        let mut unique: Vec<i64> = ids.iter().map(BillId::value).collect();
        unique.sort_unstable();
        unique.dedup();
        if unique.is_empty() {
            return Ok(());
        }

        let mut db_tx = self.pool.begin().await.map_err(tx_err)?;

        let result = sqlx::query(
            r#"UPDATE bills SET status = 'paid', paid_at = $1
               WHERE status = 'pending' AND id = ANY($2)"#,
        )
        .bind(Utc::now())
        .bind(&unique)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        // Dropping the transaction rolls back the partial update.
        if result.rows_affected() != unique.len() as u64 {
            return Err(RepoError::Conflict(format!(
                "only {} of {} bills were still pending",
                result.rows_affected(),
                unique.len()
            )));
        }

        db_tx.commit().await.map_err(tx_err)?;
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Payment ledger
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl PaymentLedger for PostgresRepo {
    async fn reserve(&self, payment: &Payment) -> Result<(), RepoError> {
        let id = payment.id.into_uuid();
        let bill_ids: Vec<i64> = payment.bill_ids.iter().map(BillId::value).collect();
        let mut db_tx = self.pool.begin().await.map_err(tx_err)?;

        sqlx::query(
            r#"INSERT INTO payments (id, account_number, period, amount, status, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(id)
        .bind(payment.account_number.as_str())
        .bind(payment.period.as_str())
        .bind(payment.amount.amount())
        .bind(payment.status.as_str())
        .bind(payment.created_at)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        sqlx::query(
            r#"INSERT INTO payment_bills (payment_id, bill_id, position)
               SELECT $1, bill_id, (ord - 1)::int
               FROM UNNEST($2::bigint[]) WITH ORDINALITY AS t(bill_id, ord)"#,
        )
        .bind(id)
        .bind(&bill_ids)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        let claimed = sqlx::query(
            r#"INSERT INTO bill_claims (bill_id, payment_id)
               SELECT bill_id, $1 FROM UNNEST($2::bigint[]) AS t(bill_id)"#,
        )
        .bind(id)
        .bind(&bill_ids)
        .execute(&mut *db_tx)
        .await;

        match claimed {
            Ok(_) => {}
            Err(e) if is_unique_violation(&e) => {
                return Err(RepoError::Conflict(
                    "one or more bills are claimed by another payment".into(),
                ));
            }
            Err(e) => return Err(db_err(e)),
        }

        db_tx.commit().await.map_err(tx_err)?;
        Ok(())
    }

    async fn complete(
        &self,
        id: PaymentId,
        completed_at: DateTime<Utc>,
        gateway_reference: Option<&str>,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"UPDATE payments SET status = 'completed', completed_at = $1, gateway_reference = $2
               WHERE id = $3 AND status = 'pending'"#,
        )
        .bind(completed_at)
        .bind(gateway_reference)
        .bind(id.into_uuid())
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(self.transition_error(id, PaymentStatus::Completed).await);
        }
        Ok(())
    }

    async fn fail(&self, id: PaymentId, reason: &str) -> Result<(), RepoError> {
        let mut db_tx = self.pool.begin().await.map_err(tx_err)?;

        let result = sqlx::query(
            r#"UPDATE payments SET status = 'failed', failure_reason = $1
               WHERE id = $2 AND status = 'pending'"#,
        )
        .bind(reason)
        .bind(id.into_uuid())
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        if result.rows_affected() == 0 {
            db_tx.rollback().await.map_err(tx_err)?;
            return Err(self.transition_error(id, PaymentStatus::Failed).await);
        }

        sqlx::query(r#"DELETE FROM bill_claims WHERE payment_id = $1"#)
            .bind(id.into_uuid())
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;

        db_tx.commit().await.map_err(tx_err)?;
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, RepoError> {
        let row: Option<DbPayment> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE id = $1",
            PAYMENT_COLUMNS
        ))
        .bind(id.into_uuid())
        .fetch_optional(&self.pool)
        .await
        .map_err(db_err)?;

        match row {
            Some(row) => Ok(self.load_payments(vec![row]).await?.pop()),
            None => Ok(None),
        }
    }

    async fn list_payments_for_account(
        &self,
        account: &AccountNumber,
    ) -> Result<Vec<Payment>, RepoError> {
        let rows: Vec<DbPayment> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE account_number = $1 ORDER BY created_at DESC",
            PAYMENT_COLUMNS
        ))
        .bind(account.as_str())
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        self.load_payments(rows).await
    }

    async fn list_pending_before(&self, cutoff: DateTime<Utc>) -> Result<Vec<Payment>, RepoError> {
        let rows: Vec<DbPayment> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE status = 'pending' AND created_at < $1 \
             ORDER BY created_at ASC",
            PAYMENT_COLUMNS
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        self.load_payments(rows).await
    }

    async fn list_flagged(&self) -> Result<Vec<Payment>, RepoError> {
        let rows: Vec<DbPayment> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE reconciliation_note IS NOT NULL \
             ORDER BY created_at ASC",
            PAYMENT_COLUMNS
        ))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        self.load_payments(rows).await
    }

    async fn flag_for_reconciliation(
        &self,
        id: PaymentId,
        kind: AlertKind,
        note: &str,
        payload: serde_json::Value,
    ) -> Result<(), RepoError> {
        let alert = SettlementAlert::new(kind, id, payload);
        let mut db_tx = self.pool.begin().await.map_err(tx_err)?;

        let result = sqlx::query(r#"UPDATE payments SET reconciliation_note = $1 WHERE id = $2"#)
            .bind(note)
            .bind(id.into_uuid())
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }

        sqlx::query(
            r#"INSERT INTO settlement_alerts (id, kind, payment_id, payload, status, created_at)
               VALUES ($1, $2, $3, $4, $5, $6)"#,
        )
        .bind(alert.id)
        .bind(alert.kind.as_str())
        .bind(id.into_uuid())
        .bind(&alert.payload)
        .bind(alert.status.as_ref())
        .bind(alert.created_at)
        .execute(&mut *db_tx)
        .await
        .map_err(db_err)?;

        db_tx.commit().await.map_err(tx_err)?;
        Ok(())
    }

    async fn clear_reconciliation_flag(&self, id: PaymentId) -> Result<(), RepoError> {
        let result =
            sqlx::query(r#"UPDATE payments SET reconciliation_note = NULL WHERE id = $1"#)
                .bind(id.into_uuid())
                .execute(&self.pool)
                .await
                .map_err(db_err)?;

        if result.rows_affected() == 0 {
            return Err(RepoError::NotFound);
        }
        Ok(())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Alert outbox
// ─────────────────────────────────────────────────────────────────────────────

impl PostgresRepo {
    /// Returns undelivered alerts that still have attempts left, oldest first.
    pub async fn get_pending_alerts(
        &self,
        limit: i64,
        max_attempts: i32,
    ) -> Result<Vec<SettlementAlert>, RepoError> {
        let rows: Vec<DbAlert> = sqlx::query_as(
            r#"
            SELECT id, kind, payment_id, payload, status, created_at, delivered_at, attempts, last_error
            FROM settlement_alerts
            WHERE status IN ('PENDING', 'FAILED') AND attempts < $1
            ORDER BY created_at ASC
            LIMIT $2
            "#,
        )
        .bind(max_attempts)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;

        rows.into_iter().map(DbAlert::into_domain).collect()
    }

    pub async fn update_alert_status(
        &self,
        id: Uuid,
        status: AlertStatus,
        last_error: Option<String>,
    ) -> Result<(), RepoError> {
        let delivered_at = (status == AlertStatus::Delivered).then(Utc::now);

        sqlx::query(
            r#"
            UPDATE settlement_alerts
            SET status = $1, delivered_at = $2, last_error = $3, attempts = attempts + 1
            WHERE id = $4
            "#,
        )
        .bind(status.as_ref())
        .bind(delivered_at)
        .bind(last_error)
        .bind(id)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;

        Ok(())
    }
}
