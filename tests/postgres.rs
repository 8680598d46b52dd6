//! # Postgres Store Tests
//!
//! Exercise `PgStore` against a real database: the conditional claim
//! `UPDATE` and the per-account plan-list writes. Every test works on fresh
//! random ids, so a shared development database is fine.
//!
//! ## Running Tests
//!
//! ```bash
//! DATABASE_URL=postgres://localhost/vpn_fulfillment_test \
//!     cargo test --test postgres -- --ignored
//! ```

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chrono::{Duration, Utc};
    use uuid::Uuid;

    use vpn_fulfillment::db;
    use vpn_fulfillment::models::{Order, OrderStatus, PlanEntry, PlanWrite};
    use vpn_fulfillment::store::{OrderStore, PgStore, PlanStore};

    async fn store() -> PgStore {
        let url = std::env::var("DATABASE_URL").expect("DATABASE_URL must be set");
        PgStore::new(db::connect(&url).await.expect("connect and migrate"))
    }

    fn entry(username: &str) -> PlanEntry {
        PlanEntry {
            username: username.to_string(),
            link: format!("vless://{username}"),
            plan_id: "100GB".into(),
            connection_id: "X".into(),
            package: None,
            activated_at: Utc::now(),
            order_id: Uuid::new_v4(),
        }
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn claim_reports_prior_status_and_release_restores_it() {
        let store = store().await;
        let mut order = Order::new_pending(Uuid::new_v4(), "alice", "100GB", "X");
        order.status = OrderStatus::QueuedForRenewal;
        store.insert_order(&order).await.unwrap();
        let now = Utc::now();
        let stale = now - Duration::minutes(15);
        let from = [OrderStatus::Pending, OrderStatus::QueuedForRenewal];

        let claimed = store.claim_order(order.id, &from, now, stale).await.unwrap();
        assert_eq!(claimed.unwrap().status, OrderStatus::QueuedForRenewal);
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Processing);

        assert!(store.claim_order(order.id, &from, now, stale).await.unwrap().is_none());

        store.release_claim(order.id).await.unwrap();
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::QueuedForRenewal);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn stale_claim_is_taken_over_with_original_status() {
        let store = store().await;
        let order = Order::new_pending(Uuid::new_v4(), "bob", "100GB", "X");
        store.insert_order(&order).await.unwrap();
        let then = Utc::now() - Duration::hours(1);

        store
            .claim_order(order.id, &[OrderStatus::Pending], then, then - Duration::minutes(15))
            .await
            .unwrap()
            .unwrap();

        let now = Utc::now();
        let stale = now - Duration::minutes(15);
        assert!(store
            .claim_order(order.id, &[OrderStatus::Approved], now, stale)
            .await
            .unwrap()
            .is_none());

        let taken = store
            .claim_order(order.id, &[OrderStatus::Pending], now, stale)
            .await
            .unwrap();
        assert_eq!(taken.unwrap().status, OrderStatus::Pending);

        // The fresh claim is not stale any more.
        assert!(store
            .claim_order(order.id, &[OrderStatus::Pending], now, stale)
            .await
            .unwrap()
            .is_none());

        store.release_claim(order.id).await.unwrap();
        let stored = store.get_order(order.id).await.unwrap().unwrap();
        assert_eq!(stored.status, OrderStatus::Pending);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn concurrent_plan_appends_for_one_account_all_land() {
        let store = Arc::new(store().await);
        let account = Uuid::new_v4();

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let store = store.clone();
                tokio::spawn(async move {
                    store
                        .record_plan_entry(account, &entry(&format!("user-{i}")))
                        .await
                })
            })
            .collect();
        for task in tasks {
            assert_eq!(task.await.unwrap().unwrap(), PlanWrite::Appended);
        }

        let plans = store.account_plans(account).await.unwrap();
        assert_eq!(plans.len(), 8);
    }

    #[tokio::test]
    #[ignore = "needs DATABASE_URL"]
    async fn refresh_replaces_plan_fields_in_place() {
        let store = store().await;
        let account = Uuid::new_v4();
        store.record_plan_entry(account, &entry("amy")).await.unwrap();
        store.record_plan_entry(account, &entry("DE-bob")).await.unwrap();

        let upgraded = PlanEntry {
            plan_id: "UNLIMITED".into(),
            connection_id: "DUO".into(),
            package: Some("de".into()),
            ..entry("de-BOB")
        };
        assert_eq!(
            store.record_plan_entry(account, &upgraded).await.unwrap(),
            PlanWrite::Refreshed
        );

        let plans = store.account_plans(account).await.unwrap();
        assert_eq!(plans.len(), 2);
        assert_eq!(plans[1].username, "DE-bob");
        assert_eq!(plans[1].plan_id, "UNLIMITED");
        assert_eq!(plans[1].connection_id, "DUO");
        assert_eq!(plans[1].package.as_deref(), Some("de"));
        assert_eq!(plans[1].order_id, upgraded.order_id);
    }
}
