//! Persistence seams for orders, provisioning configuration and account plan lists.
//!
//! Order state changes are conditional: every transition names the state it
//! expects to leave, and a caller whose expectation no longer holds gets
//! `None`/`false` back instead of overwriting someone else's work.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::models::{Connection, Order, OrderStatus, Plan, PlanEntry, PlanWrite};

pub use memory::MemoryStore;
pub use postgres::PgStore;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error(transparent)]
    Database(#[from] sqlx::Error),

    #[error("corrupt record: {0}")]
    Corrupt(String),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Final state written when an approval completes.
#[derive(Debug, Clone)]
pub struct Approval {
    pub final_username: String,
    pub status: OrderStatus,
    pub auto_approved: bool,
    pub approved_at: DateTime<Utc>,
}

#[async_trait]
pub trait OrderStore: Send + Sync {
    async fn insert_order(&self, order: &Order) -> StoreResult<()>;

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>>;

    /// Move the order into `processing` if its status is one of `from`, or if
    /// it holds a claim taken before `stale_before` that started from one of
    /// `from`. Returns the order as it was before the claim, or `None` if
    /// another caller owns it or its status does not qualify.
    async fn claim_order(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<Order>>;

    /// Give up a claim, restoring the status it was taken from.
    async fn release_claim(&self, id: Uuid) -> StoreResult<()>;

    /// Finish a claimed approval. `false` if the claim was lost meanwhile.
    async fn complete_approval(&self, id: Uuid, approval: &Approval) -> StoreResult<bool>;

    /// Finish a claimed rejection, clearing the final username and receipt.
    async fn complete_rejection(&self, id: Uuid, rejected_at: DateTime<Utc>) -> StoreResult<bool>;

    /// `unconfirmed -> approved`. `false` if the order was not unconfirmed.
    async fn confirm_order(&self, id: Uuid) -> StoreResult<bool>;

    async fn pending_orders_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Order>>;

    async fn due_renewals(&self, now: DateTime<Utc>) -> StoreResult<Vec<Order>>;
}

#[async_trait]
pub trait CatalogStore: Send + Sync {
    async fn get_connection(&self, id: &str) -> StoreResult<Option<Connection>>;

    async fn get_plan(&self, id: &str) -> StoreResult<Option<Plan>>;
}

#[async_trait]
pub trait PlanStore: Send + Sync {
    /// The account's plan list in insertion order.
    async fn account_plans(&self, account_id: Uuid) -> StoreResult<Vec<PlanEntry>>;

    /// Refresh the entry with the same username (case-insensitive) in place,
    /// or append a new one.
    async fn record_plan_entry(&self, account_id: Uuid, entry: &PlanEntry) -> StoreResult<PlanWrite>;

    /// Drop the entry last written by `order_id`, if any.
    async fn remove_plan_entry(&self, account_id: Uuid, order_id: Uuid) -> StoreResult<bool>;
}

/// Everything the fulfillment service needs from storage.
pub trait Store: OrderStore + CatalogStore + PlanStore {}

impl<T: OrderStore + CatalogStore + PlanStore> Store for T {}
