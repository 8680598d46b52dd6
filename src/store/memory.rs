//! Mutex-guarded in-memory store with the same transition semantics as Postgres.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Approval, CatalogStore, OrderStore, PlanStore, StoreResult};
use crate::models::{Connection, Order, OrderStatus, Plan, PlanEntry, PlanWrite};

struct Claim {
    from: OrderStatus,
    at: DateTime<Utc>,
}

struct StoredOrder {
    order: Order,
    claim: Option<Claim>,
}

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, StoredOrder>,
    connections: HashMap<String, Connection>,
    plans: HashMap<String, Plan>,
    account_plans: HashMap<Uuid, Vec<PlanEntry>>,
}

#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<State>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().expect("store lock poisoned")
    }

    pub fn put_connection(&self, connection: Connection) {
        self.state()
            .connections
            .insert(connection.id.clone(), connection);
    }

    pub fn put_plan(&self, plan: Plan) {
        self.state().plans.insert(plan.id.clone(), plan);
    }

    /// Seed an account's plan list directly.
    pub fn put_account_plans(&self, account_id: Uuid, entries: Vec<PlanEntry>) {
        self.state().account_plans.insert(account_id, entries);
    }
}

#[async_trait]
impl OrderStore for MemoryStore {
    async fn insert_order(&self, order: &Order) -> StoreResult<()> {
        self.state().orders.insert(
            order.id,
            StoredOrder {
                order: order.clone(),
                claim: None,
            },
        );
        Ok(())
    }

    async fn get_order(&self, id: Uuid) -> StoreResult<Option<Order>> {
        Ok(self.state().orders.get(&id).map(|stored| stored.order.clone()))
    }

    async fn claim_order(
        &self,
        id: Uuid,
        from: &[OrderStatus],
        now: DateTime<Utc>,
        stale_before: DateTime<Utc>,
    ) -> StoreResult<Option<Order>> {
        let mut state = self.state();
        let Some(stored) = state.orders.get_mut(&id) else {
            return Ok(None);
        };

        let prior = match (&stored.claim, stored.order.status) {
            (Some(claim), OrderStatus::Processing) => {
                if claim.at >= stale_before || !from.contains(&claim.from) {
                    return Ok(None);
                }
                claim.from
            }
            (_, status) if from.contains(&status) => status,
            _ => return Ok(None),
        };

        let mut snapshot = stored.order.clone();
        snapshot.status = prior;
        stored.order.status = OrderStatus::Processing;
        stored.claim = Some(Claim { from: prior, at: now });
        Ok(Some(snapshot))
    }

    async fn release_claim(&self, id: Uuid) -> StoreResult<()> {
        let mut state = self.state();
        if let Some(stored) = state.orders.get_mut(&id) {
            if stored.order.status == OrderStatus::Processing {
                if let Some(claim) = stored.claim.take() {
                    stored.order.status = claim.from;
                }
            }
        }
        Ok(())
    }

    async fn complete_approval(&self, id: Uuid, approval: &Approval) -> StoreResult<bool> {
        let mut state = self.state();
        let Some(stored) = state.orders.get_mut(&id) else {
            return Ok(false);
        };
        if stored.order.status != OrderStatus::Processing {
            return Ok(false);
        }
        stored.claim = None;
        stored.order.status = approval.status;
        stored.order.final_username = Some(approval.final_username.clone());
        stored.order.auto_approved = approval.auto_approved;
        stored.order.approved_at = Some(approval.approved_at);
        Ok(true)
    }

    async fn complete_rejection(&self, id: Uuid, rejected_at: DateTime<Utc>) -> StoreResult<bool> {
        let mut state = self.state();
        let Some(stored) = state.orders.get_mut(&id) else {
            return Ok(false);
        };
        if stored.order.status != OrderStatus::Processing {
            return Ok(false);
        }
        stored.claim = None;
        stored.order.status = OrderStatus::Rejected;
        stored.order.final_username = None;
        stored.order.receipt_path = None;
        stored.order.rejected_at = Some(rejected_at);
        Ok(true)
    }

    async fn confirm_order(&self, id: Uuid) -> StoreResult<bool> {
        let mut state = self.state();
        match state.orders.get_mut(&id) {
            Some(stored) if stored.order.status == OrderStatus::Unconfirmed => {
                stored.order.status = OrderStatus::Approved;
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn pending_orders_created_before(&self, cutoff: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        let state = self.state();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .map(|stored| &stored.order)
            .filter(|o| o.status == OrderStatus::Pending && o.created_at <= cutoff)
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }

    async fn due_renewals(&self, now: DateTime<Utc>) -> StoreResult<Vec<Order>> {
        let state = self.state();
        let mut orders: Vec<Order> = state
            .orders
            .values()
            .map(|stored| &stored.order)
            .filter(|o| {
                o.status == OrderStatus::QueuedForRenewal
                    && o.renewal_eligible_at.is_some_and(|at| at <= now)
            })
            .cloned()
            .collect();
        orders.sort_by_key(|o| o.created_at);
        Ok(orders)
    }
}

#[async_trait]
impl CatalogStore for MemoryStore {
    async fn get_connection(&self, id: &str) -> StoreResult<Option<Connection>> {
        Ok(self.state().connections.get(id).cloned())
    }

    async fn get_plan(&self, id: &str) -> StoreResult<Option<Plan>> {
        Ok(self.state().plans.get(id).cloned())
    }
}

#[async_trait]
impl PlanStore for MemoryStore {
    async fn account_plans(&self, account_id: Uuid) -> StoreResult<Vec<PlanEntry>> {
        Ok(self
            .state()
            .account_plans
            .get(&account_id)
            .cloned()
            .unwrap_or_default())
    }

    async fn record_plan_entry(&self, account_id: Uuid, entry: &PlanEntry) -> StoreResult<PlanWrite> {
        let mut state = self.state();
        let entries = state.account_plans.entry(account_id).or_default();
        if let Some(existing) = entries
            .iter_mut()
            .find(|e| e.username.eq_ignore_ascii_case(&entry.username))
        {
            existing.link = entry.link.clone();
            existing.plan_id = entry.plan_id.clone();
            existing.connection_id = entry.connection_id.clone();
            existing.package = entry.package.clone();
            existing.activated_at = entry.activated_at;
            existing.order_id = entry.order_id;
            return Ok(PlanWrite::Refreshed);
        }
        entries.push(entry.clone());
        Ok(PlanWrite::Appended)
    }

    async fn remove_plan_entry(&self, account_id: Uuid, order_id: Uuid) -> StoreResult<bool> {
        let mut state = self.state();
        let Some(entries) = state.account_plans.get_mut(&account_id) else {
            return Ok(false);
        };
        let before = entries.len();
        entries.retain(|e| e.order_id != order_id);
        Ok(entries.len() != before)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[tokio::test]
    async fn only_one_claim_wins() {
        let store = MemoryStore::new();
        let order = Order::new_pending(Uuid::new_v4(), "alice", "p", "c");
        store.insert_order(&order).await.unwrap();
        let now = Utc::now();
        let stale = now - Duration::minutes(15);

        let first = store
            .claim_order(order.id, &[OrderStatus::Pending], now, stale)
            .await
            .unwrap();
        let second = store
            .claim_order(order.id, &[OrderStatus::Pending], now, stale)
            .await
            .unwrap();

        assert_eq!(first.unwrap().status, OrderStatus::Pending);
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn release_restores_prior_status_and_stale_claims_are_reclaimable() {
        let store = MemoryStore::new();
        let order = Order::new_pending(Uuid::new_v4(), "alice", "p", "c");
        store.insert_order(&order).await.unwrap();
        let then = Utc::now() - Duration::hours(1);

        store
            .claim_order(order.id, &[OrderStatus::Pending], then, then - Duration::minutes(15))
            .await
            .unwrap()
            .unwrap();

        // Abandoned an hour ago: a new caller may take it over.
        let now = Utc::now();
        let reclaimed = store
            .claim_order(order.id, &[OrderStatus::Pending], now, now - Duration::minutes(15))
            .await
            .unwrap();
        assert_eq!(reclaimed.unwrap().status, OrderStatus::Pending);

        store.release_claim(order.id).await.unwrap();
        let order = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(order.status, OrderStatus::Pending);
    }

    #[tokio::test]
    async fn plan_entries_refresh_by_username_and_keep_position() {
        let store = MemoryStore::new();
        let account = Uuid::new_v4();
        let entry = |name: &str, link: &str| PlanEntry {
            username: name.to_string(),
            link: link.to_string(),
            plan_id: "p".into(),
            connection_id: "c".into(),
            package: None,
            activated_at: Utc::now(),
            order_id: Uuid::new_v4(),
        };

        assert_eq!(store.record_plan_entry(account, &entry("a", "1")).await.unwrap(), PlanWrite::Appended);
        assert_eq!(store.record_plan_entry(account, &entry("b", "2")).await.unwrap(), PlanWrite::Appended);
        let renewed = entry("B", "3");
        assert_eq!(store.record_plan_entry(account, &renewed).await.unwrap(), PlanWrite::Refreshed);

        let plans = store.account_plans(account).await.unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].username, "b");
        assert_eq!(plans[1].link, "3");
        assert_eq!(plans[1].order_id, renewed.order_id);

        assert!(store.remove_plan_entry(account, renewed.order_id).await.unwrap());
        assert_eq!(store.account_plans(account).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn refreshed_entry_takes_the_new_plan_and_package() {
        let store = MemoryStore::new();
        let account = Uuid::new_v4();
        let original = PlanEntry {
            username: "DE-bob".into(),
            link: "old".into(),
            plan_id: "100GB".into(),
            connection_id: "DUO".into(),
            package: Some("de".into()),
            activated_at: Utc::now() - Duration::days(29),
            order_id: Uuid::new_v4(),
        };
        store.record_plan_entry(account, &original).await.unwrap();

        let upgraded = PlanEntry {
            link: "new".into(),
            plan_id: "UNLIMITED".into(),
            connection_id: "DUO-PLUS".into(),
            package: Some("de-fast".into()),
            activated_at: Utc::now(),
            order_id: Uuid::new_v4(),
            ..original.clone()
        };
        assert_eq!(store.record_plan_entry(account, &upgraded).await.unwrap(), PlanWrite::Refreshed);

        let plans = store.account_plans(account).await.unwrap();
        assert_eq!(plans, vec![upgraded]);
    }
}
