//! SQLite ledger adapter.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions};
use sqlx::{QueryBuilder, Sqlite, SqlitePool};
use std::str::FromStr;
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

// ─────────────────────────────────────────────────────────────────────────────
// SQLite Repository
// ─────────────────────────────────────────────────────────────────────────────

/// SQLite ledger implementation.
///
/// SQLite serialises writers, so claim conflicts surface as unique
/// violations on `bill_claims` just as they do on Postgres.
#[derive(Clone)]
pub struct SqliteRepo {
    pool: SqlitePool,
}

impl SqliteRepo {
    /// Creates a new SQLite repository with automatic migration.
    pub async fn new(database_url: &str) -> anyhow::Result<Self> {
        let in_memory = database_url.contains(":memory:");

        if let Some(path) = database_url.strip_prefix("sqlite://") {
            let path = path.split('?').next().unwrap_or(path);
            if !in_memory {
                if let Some(parent) = std::path::Path::new(path).parent() {
                    if !parent.as_os_str().is_empty() {
                        tokio::fs::create_dir_all(parent).await?;
                    }
                }
            }
        }

        let options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);

        // Every connection to `:memory:` is a separate database.
        let pool = if in_memory {
            SqlitePoolOptions::new()
                .max_connections(1)
                .idle_timeout(None)
                .max_lifetime(None)
                .connect_with(options)
                .await?
        } else {
            SqlitePoolOptions::new().connect_with(options).await?
        };

        let repo = Self { pool };
        repo.create_schema().await?;
        Ok(repo)
    }

    /// Returns a reference to the connection pool.
    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    /// Creates the database schema.
    pub async fn create_schema(&self) -> Result<(), RepoError> {
        sqlx::query(include_str!("../migrations/0001_create_ledgers.sql"))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        sqlx::query(include_str!("../migrations/0002_create_settlement_alerts.sql"))
            .execute(&self.pool)
            .await
            .map_err(db_err)?;

        Ok(())
    }

    /// Registers an account and the identity-provider subject that owns it.
    pub async fn register_account(
        &self,
        account: &AccountNumber,
        owner_subject: &str,
    ) -> Result<(), RepoError> {
        let result = sqlx::query(
            r#"INSERT INTO accounts (account_number, owner_subject, created_at) VALUES (?, ?, ?)"#,
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
             VALUES (?, ?, ?, 'pending', ?) RETURNING {}",
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

    async fn load_links(&self, ids: &[Uuid]) -> Result<Vec<DbPaymentBill>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("SELECT payment_id, bill_id FROM payment_bills WHERE payment_id IN (");
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(*id);
        }
        sep.push_unseparated(") ORDER BY payment_id, position");

        qb.build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)
    }

    async fn load_payments(&self, rows: Vec<DbPayment>) -> Result<Vec<Payment>, RepoError> {
        let ids: Vec<Uuid> = rows.iter().map(|r| r.id).collect();
        let links = self.load_links(&ids).await?;
        hydrate_payments(rows, links)
    }

    /// Explains why a conditional `pending -> to` update touched no row.
    async fn transition_error(&self, id: PaymentId, to: PaymentStatus) -> RepoError {
        let row: Result<Option<DbPaymentStatus>, _> =
            sqlx::query_as(r#"SELECT status FROM payments WHERE id = ?"#)
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

fn is_unique_violation(e: &sqlx::Error) -> bool {
    e.as_database_error()
        .map(|d| d.is_unique_violation())
        .unwrap_or(false)
}

// ─────────────────────────────────────────────────────────────────────────────
// Bill ledger
// ─────────────────────────────────────────────────────────────────────────────

#[async_trait]
impl BillLedger for SqliteRepo {
    async fn account_owner(&self, account: &AccountNumber) -> Result<Option<String>, RepoError> {
        let row: Option<DbOwner> =
            sqlx::query_as(r#"SELECT owner_subject FROM accounts WHERE account_number = ?"#)
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
             WHERE account_number = ? AND period = ? AND status = 'pending' ORDER BY id",
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
        let mut qb: QueryBuilder<Sqlite> = QueryBuilder::new(format!(
            "SELECT {} FROM bills WHERE account_number = ",
            BILL_COLUMNS
        ));
        qb.push_bind(account.as_str());
        if let Some(period) = period {
            qb.push(" AND period = ").push_bind(period.as_str());
        }
        qb.push(" ORDER BY period, id");

        let rows: Vec<DbBill> = qb
            .build_query_as()
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;

        rows.into_iter().map(DbBill::into_domain).collect()
    }

    async fn get_bills(&self, ids: &[BillId]) -> Result<Vec<Bill>, RepoError> {
        if ids.is_empty() {
            return Ok(Vec::new());
        }

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new(format!("SELECT {} FROM bills WHERE id IN (", BILL_COLUMNS));
        let mut sep = qb.separated(", ");
        for id in ids {
            sep.push_bind(id.value());
        }
        sep.push_unseparated(") ORDER BY id");

        let rows: Vec<DbBill> = qb
            .build_query_as()
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

        let mut qb: QueryBuilder<Sqlite> =
            QueryBuilder::new("UPDATE bills SET status = 'paid', paid_at = ");
        qb.push_bind(Utc::now());
        qb.push(" WHERE status = 'pending' AND id IN (");
        let mut sep = qb.separated(", ");
        for id in &unique {
            sep.push_bind(*id);
        }
        sep.push_unseparated(")");

        let result = qb.build().execute(&mut *db_tx).await.map_err(db_err)?;

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
impl PaymentLedger for SqliteRepo {
    async fn reserve(&self, payment: &Payment) -> Result<(), RepoError> {
        let id = payment.id.into_uuid();
        let mut db_tx = self.pool.begin().await.map_err(tx_err)?;

        sqlx::query(
            r#"INSERT INTO payments (id, account_number, period, amount, status, created_at)
               VALUES (?, ?, ?, ?, ?, ?)"#,
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

        for (position, bill_id) in payment.bill_ids.iter().enumerate() {
            sqlx::query(
                r#"INSERT INTO payment_bills (payment_id, bill_id, position) VALUES (?, ?, ?)"#,
            )
            .bind(id)
            .bind(bill_id.value())
            .bind(position as i64)
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;

            let claimed = sqlx::query(r#"INSERT INTO bill_claims (bill_id, payment_id) VALUES (?, ?)"#)
                .bind(bill_id.value())
                .bind(id)
                .execute(&mut *db_tx)
                .await;

            match claimed {
                Ok(_) => {}
                Err(e) if is_unique_violation(&e) => {
                    return Err(RepoError::Conflict(format!(
                        "bill {} is claimed by another payment",
                        bill_id
                    )));
                }
                Err(e) => return Err(db_err(e)),
            }
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
            r#"UPDATE payments SET status = 'completed', completed_at = ?, gateway_reference = ?
               WHERE id = ? AND status = 'pending'"#,
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
            r#"UPDATE payments SET status = 'failed', failure_reason = ?
               WHERE id = ? AND status = 'pending'"#,
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

        sqlx::query(r#"DELETE FROM bill_claims WHERE payment_id = ?"#)
            .bind(id.into_uuid())
            .execute(&mut *db_tx)
            .await
            .map_err(db_err)?;

        db_tx.commit().await.map_err(tx_err)?;
        Ok(())
    }

    async fn get_payment(&self, id: PaymentId) -> Result<Option<Payment>, RepoError> {
        let row: Option<DbPayment> = sqlx::query_as(&format!(
            "SELECT {} FROM payments WHERE id = ?",
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
            "SELECT {} FROM payments WHERE account_number = ? ORDER BY created_at DESC",
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
            "SELECT {} FROM payments WHERE status = 'pending' AND created_at < ? \
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

        let result = sqlx::query(r#"UPDATE payments SET reconciliation_note = ? WHERE id = ?"#)
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
               VALUES (?, ?, ?, ?, ?, ?)"#,
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
        let result = sqlx::query(r#"UPDATE payments SET reconciliation_note = NULL WHERE id = ?"#)
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

impl SqliteRepo {
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
            WHERE status IN ('PENDING', 'FAILED') AND attempts < ?
            ORDER BY created_at ASC
            LIMIT ?
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
            SET status = ?, delivered_at = ?, last_error = ?, attempts = attempts + 1
            WHERE id = ?
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
