//! sqlx/Postgres store. Schema lives in `migrations/`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::types::Json;
use sqlx::PgPool;
use uuid::Uuid;

use super::{Approval, CatalogStore, OrderStore, PlanStore, StoreError, StoreResult};
use crate::models::{Connection, Order, OrderStatus, PackageLayout, Plan, PlanEntry, PlanWrite};

/// Select list for [`OrderRow`], with `status` read from `status_expr`.
fn order_columns(status_expr: &str) -> String {
    format!(
        "id, account_id, username, plan_id, connection_id, package, is_renewal, old_username, \
         {status_expr} AS status, final_username, auto_approved, price, receipt_path, \
         renewal_eligible_at, created_at, approved_at, rejected_at"
    )
}

#[derive(sqlx::FromRow)]
struct OrderRow {
    id: Uuid,
    account_id: Uuid,
    username: String,
    plan_id: String,
    connection_id: String,
    package: Option<String>,
    is_renewal: bool,
    old_username: Option<String>,
    status: String,
    final_username: Option<String>,
    auto_approved: bool,
    price: i64,
    receipt_path: Option<String>,
    renewal_eligible_at: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    approved_at: Option<DateTime<Utc>>,
    rejected_at: Option<DateTime<Utc>>,
}

impl TryFrom<OrderRow> for Order {
    type Error = StoreError;

    fn try_from(row: OrderRow) -> Result<Self, Self::Error> {
        let status = row
            .status
            .parse::<OrderStatus>()
            .map_err(|e| StoreError::Corrupt(format!("order {}: {e}", row.id)))?;
        Ok(Order {
            id: row.id,
            account_id: row.account_id,
            username: row.username,
            plan_id: row.plan_id,
            connection_id: row.connection_id,
            package: row.package,
            is_renewal: row.is_renewal,
            old_username: row.old_username,
            status,
            final_username: row.final_username,
            auto_approved: row.auto_approved,
            price: row.price,
            receipt_path: row.receipt_path,
            renewal_eligible_at: row.renewal_eligible_at,
            created_at: row.created_at,
            approved_at: row.approved_at,
            rejected_at: row.rejected_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct ConnectionRow {
    id: String,
    name: String,
    layout: Json<PackageLayout>,
    auto_approve: bool,
}

#[derive(sqlx::FromRow)]
struct PlanRow {
    id: String,
    name: String,
    traffic_gb: i64,
    price: i64,
}

#[derive(sqlx::FromRow)]
struct PlanEntryRow {
    username: String,
    link: String,
    plan_id: String,
    connection_id: String,
    package: Option<String>,
    activated_at: DateTime<Utc>,
    order_id: Uuid,
}

impl From<PlanEntryRow> for PlanEntry {
    fn from(row: PlanEntryRow) -> Self {
        Self {
            username: row.username,
            link: row.link,
            plan_id: row.plan_id,
            connection_id: row.connection_id,
            package: row.package,
            activated_at: row.activated_at,
            order_id: row.order_id,
        }
    }
}

fn into_orders(rows: Vec<OrderRow>) -> StoreResult<Vec<Order>> {
    rows.into_iter().map(Order::try_from).collect()
}

fn status_names(statuses: &[OrderStatus]) -> Vec<String> {
    statuses.iter().map(|s| s.as_str().to_string()).collect()
}

#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl OrderStore for PgStore {
    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        sqlx::query(
            r#"
            INSERT INTO orders (id, account_id, username, plan_id, connection_id, package,
                is_renewal, old_username, status, final_username, auto_approved, price,
                receipt_path, renewal_eligible_at, created_at, approved_at, rejected_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            "#,
        )
        .bind(order.id)
        .bind(order.account_id)
        .bind(&order.username)
        .bind(&order.plan_id)
        .bind(&order.connection_id)
        .bind(&order.package)
        .bind(order.is_renewal)
        .bind(&order.old_username)
        .bind(order.status.as_str())
        .bind(&order.final_username)
        .bind(order.auto_approved)
        .bind(order.price)
        .bind(&order.receipt_path)
        .bind(order.renewal_eligible_at)
        .bind(order.created_at)
        .bind(order.approved_at)
        .bind(order.rejected_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        let row: Option<OrderRow> =
            sqlx::query_as(&format!("SELECT {} FROM orders WHERE id = $1", order_columns("status")))
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        row.map(Order::try_from).transpose()
    }

    async fn claim_order(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        // SET expressions see the pre-update row, so claimed_from captures the
        // status being left (or keeps the original one when taking over a stale claim).
        // RETURNING reports claimed_from as the status so callers see the prior state.
        let sql = format!(
            r#"
            UPDATE orders SET
                claimed_from = CASE WHEN status = 'processing' THEN claimed_from ELSE status END,
                status = 'processing',
                claimed_at = $3
            WHERE id = $1
              AND (status = ANY($2)
                   OR (status = 'processing' AND claimed_at < $4 AND claimed_from = ANY($2)))
            RETURNING {}
            "#,
            order_columns("claimed_from")
        );
        let row: Option<OrderRow> = sqlx::query_as(&sql)
            .bind(id)
            .bind(status_names(from))
            .bind(now)
            .bind(stale_before)
            .fetch_optional(&self.pool)
            .await?;
        row.map(Order::try_from).transpose()
    }

    async fn release_claim(&self, id: Uuid) -> StoreResult<()> {
        sqlx::query(
            "UPDATE orders SET status = claimed_from, claimed_from = NULL, claimed_at = NULL
             WHERE id = $1 AND status = 'processing' AND claimed_from IS NOT NULL",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_approval(&self, id: Uuid, approval: &Approval) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = $2, final_username = $3, auto_approved = $4,
                approved_at = $5, claimed_from = NULL, claimed_at = NULL
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(approval.status.as_str())
        .bind(&approval.final_username)
        .bind(approval.auto_approved)
        .bind(approval.approved_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn complete_rejection(&self, id: Uuid, rejected_at: DateTime<Utc>) -> StoreResult<bool> {
        let result = sqlx::query(
            "UPDATE orders SET status = 'rejected', final_username = NULL, receipt_path = NULL,
                rejected_at = $2, claimed_from = NULL, claimed_at = NULL
             WHERE id = $1 AND status = 'processing'",
        )
        .bind(id)
        .bind(rejected_at)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn confirm_order(&self, id: Uuid) -> StoreResult<bool> {
        let result =
            sqlx::query("UPDATE orders SET status = 'approved' WHERE id = $1 AND status = 'unconfirmed'")
                .bind(id)
                .execute(&self.pool)
                .await?;
        Ok(result.rows_affected() == 1)
    }

    async fn pending_orders_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders
             WHERE status = 'pending' AND created_at <= $1
             ORDER BY created_at",
            order_columns("status")
        ))
        .bind(cutoff)
        .fetch_all(&self.pool)
        .await?;
        into_orders(rows)
    }

    async fn due_renewals(&self, now: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        let rows: Vec<OrderRow> = sqlx::query_as(&format!(
            "SELECT {} FROM orders
             WHERE status = 'queued_for_renewal' AND renewal_eligible_at <= $1
             ORDER BY created_at",
            order_columns("status")
        ))
        .bind(now)
        .fetch_all(&self.pool)
        .await?;
        into_orders(rows)
    }
}

#[async_trait]
impl CatalogStore for PgStore {
    async fn get_connection(&self, id: &str) -> StoreResult<Option<Connection>> {
        let row: Option<ConnectionRow> =
            sqlx::query_as("SELECT id, name, layout, auto_approve FROM connections WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|row| Connection {
            id: row.id,
            name: row.name,
            layout: row.layout.0,
            auto_approve: row.auto_approve,
        }))
    }

    async fn get_plan(&self, id: &str) -> StoreResult<Option<Plan>> {
        let row: Option<PlanRow> =
            sqlx::query_as("SELECT id, name, traffic_gb, price FROM plans WHERE id = $1")
                .bind(id)
                .fetch_optional(&self.pool)
                .await?;
        Ok(row.map(|row| Plan {
            id: row.id,
            name: row.name,
            traffic_gb: row.traffic_gb,
            price: row.price,
        }))
    }
}

#[async_trait]
impl PlanStore for PgStore {
    async fn account_plans(&self, account_id: Uuid) -> StoreResult<Vec<PlanEntry>> {
        let rows: Vec<PlanEntryRow> = sqlx::query_as(
            "SELECT username, link, plan_id, connection_id, package, activated_at, order_id
             FROM account_plans WHERE account_id = $1 ORDER BY position",
        )
        .bind(account_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(PlanEntry::from).collect())
    }

    async fn record_plan_entry(&self, account_id: Uuid, entry: &PlanEntry) -> StoreResult<PlanWrite> {
        let mut tx = self.pool.begin().await?;

        // Serializes writers per account until commit; MAX(position) + 1 below
        // is only safe under it.
        sqlx::query("SELECT pg_advisory_xact_lock(hashtextextended($1::text, 0))")
            .bind(account_id)
            .execute(&mut *tx)
            .await?;

        let refreshed = sqlx::query(
            "UPDATE account_plans SET link = $3, plan_id = $4, connection_id = $5, package = $6,
                activated_at = $7, order_id = $8
             WHERE account_id = $1 AND lower(username) = lower($2)",
        )
        .bind(account_id)
        .bind(&entry.username)
        .bind(&entry.link)
        .bind(&entry.plan_id)
        .bind(&entry.connection_id)
        .bind(&entry.package)
        .bind(entry.activated_at)
        .bind(entry.order_id)
        .execute(&mut *tx)
        .await?;

        if refreshed.rows_affected() > 0 {
            tx.commit().await?;
            return Ok(PlanWrite::Refreshed);
        }

        sqlx::query(
            "INSERT INTO account_plans (account_id, position, username, link, plan_id,
                connection_id, package, activated_at, order_id)
             SELECT $1, COALESCE(MAX(position) + 1, 0), $2, $3, $4, $5, $6, $7, $8
             FROM account_plans WHERE account_id = $1",
        )
        .bind(account_id)
        .bind(&entry.username)
        .bind(&entry.link)
        .bind(&entry.plan_id)
        .bind(&entry.connection_id)
        .bind(&entry.package)
        .bind(entry.activated_at)
        .bind(entry.order_id)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(PlanWrite::Appended)
    }

    async fn remove_plan_entry(&self, account_id: Uuid, order_id: Uuid) -> StoreResult<bool> {
        let result = sqlx::query("DELETE FROM account_plans WHERE account_id = $1 AND order_id = $2")
            .bind(account_id)
            .bind(order_id)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }
}
