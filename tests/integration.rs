//! # Integration Tests
//!
//! Drive the Axum router in-process with `tower::ServiceExt::oneshot`. The
//! service is backed by `MemoryStore` and `InMemoryPanel`, so no database or
//! panel needs to be running.
//!
//! ## Running Tests
//!
//! ```bash
//! cargo test --test integration
//! ```

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use axum::Router;
    use chrono::Utc;
    use http_body_util::BodyExt;
    use serde_json::Value;
    use tower::ServiceExt;
    use uuid::Uuid;

    use vpn_fulfillment::create_app;
    use vpn_fulfillment::fulfillment::{FulfillmentPolicy, OrderFulfillmentService};
    use vpn_fulfillment::models::{Connection, Order, Package, PackageLayout, Plan};
    use vpn_fulfillment::notify::LogNotifier;
    use vpn_fulfillment::panel::{InMemoryPanel, PanelSessionManager, ProvisioningGateway};
    use vpn_fulfillment::store::{MemoryStore, OrderStore};

    struct TestApp {
        app: Router,
        store: Arc<MemoryStore>,
        panel: Arc<InMemoryPanel>,
    }

    fn test_app() -> TestApp {
        let store = Arc::new(MemoryStore::new());
        store.put_connection(Connection {
            id: "X".into(),
            name: "Reality".into(),
            layout: PackageLayout::Single {
                package: Package {
                    name: "default".into(),
                    inbound_id: 1,
                    link_template: "vless://{uuid}@x.example.net:443?security=reality#X-{name}".into(),
                    flow: Some("xtls-rprx-vision".into()),
                },
            },
            auto_approve: true,
        });
        store.put_plan(Plan {
            id: "100GB".into(),
            name: "100 GB".into(),
            traffic_gb: 100,
            price: 500,
        });

        let panel = Arc::new(InMemoryPanel::new());
        panel.add_inbound(1, "reality");
        let sessions = Arc::new(PanelSessionManager::new(
            panel.clone(),
            panel.credentials(),
            Duration::from_secs(3600),
        ));
        let gateway = Arc::new(ProvisioningGateway::new(panel.clone(), sessions));
        let policy = FulfillmentPolicy {
            receipts_dir: std::env::temp_dir(),
            ..FulfillmentPolicy::default()
        };
        let service = Arc::new(OrderFulfillmentService::new(
            store.clone(),
            gateway,
            Arc::new(LogNotifier),
            policy,
        ));

        TestApp {
            app: create_app(service),
            store,
            panel,
        }
    }

    async fn pending_order(store: &MemoryStore, account: Uuid, username: &str) -> Order {
        let order = Order::new_pending(account, username, "100GB", "X");
        store.insert_order(&order).await.expect("insert order");
        order
    }

    async fn send(app: &Router, method: &str, uri: &str) -> (StatusCode, Value) {
        let response = app
            .clone()
            .oneshot(
                Request::builder()
                    .method(method)
                    .uri(uri)
                    .body(Body::empty())
                    .expect("build request"),
            )
            .await
            .expect("router is infallible");
        let status = response.status();
        let bytes = response
            .into_body()
            .collect()
            .await
            .expect("read body")
            .to_bytes();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    #[tokio::test]
    async fn test_health() {
        let t = test_app();
        let (status, body) = send(&t.app, "GET", "/health").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_approve_then_fetch_order() {
        let t = test_app();
        let order = pending_order(&t.store, Uuid::new_v4(), "carol").await;

        let (status, body) = send(&t.app, "POST", &format!("/orders/{}/approve", order.id)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert_eq!(body["data"]["success"], true);
        assert_eq!(body["data"]["no_op"], false);
        assert_eq!(body["data"]["username"], "carol");

        let (status, body) = send(&t.app, "GET", &format!("/orders/{}", order.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["status"], "approved");
        assert_eq!(body["data"]["final_username"], "carol");

        let (status, body) = send(&t.app, "POST", &format!("/orders/{}/approve", order.id)).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["no_op"], true);
        assert_eq!(t.panel.create_count(), 1);
    }

    #[tokio::test]
    async fn test_unknown_order_is_404() {
        let t = test_app();
        let id = Uuid::new_v4();

        let (status, _) = send(&t.app, "GET", &format!("/orders/{id}")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, body) = send(&t.app, "POST", &format!("/orders/{id}/approve")).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["data"]["success"], false);
    }

    #[tokio::test]
    async fn test_panel_outage_is_bad_gateway_and_order_stays_pending() {
        let t = test_app();
        let order = pending_order(&t.store, Uuid::new_v4(), "dora").await;
        t.panel.set_offline(true);

        let (status, body) = send(&t.app, "POST", &format!("/orders/{}/approve", order.id)).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["data"]["success"], false);

        let (_, body) = send(&t.app, "GET", &format!("/orders/{}", order.id)).await;
        assert_eq!(body["data"]["status"], "pending");
    }

    #[tokio::test]
    async fn test_reject_reverses_approval() {
        let t = test_app();
        let account = Uuid::new_v4();
        let order = pending_order(&t.store, account, "dave").await;
        send(&t.app, "POST", &format!("/orders/{}/approve", order.id)).await;
        assert!(t.panel.client("dave").is_some());

        let (status, body) = send(&t.app, "POST", &format!("/orders/{}/reject", order.id)).await;
        assert_eq!(status, StatusCode::OK, "{body}");
        assert!(t.panel.client("dave").is_none());

        let (_, body) = send(&t.app, "GET", &format!("/orders/{}", order.id)).await;
        assert_eq!(body["data"]["status"], "rejected");

        let (status, body) = send(&t.app, "POST", &format!("/orders/{}/approve", order.id)).await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["data"]["success"], false);
    }

    #[tokio::test]
    async fn test_auto_approval_sweep_endpoint() {
        let t = test_app();
        let mut order = Order::new_pending(Uuid::new_v4(), "erin", "100GB", "X");
        order.created_at = Utc::now() - chrono::Duration::minutes(30);
        t.store.insert_order(&order).await.expect("insert order");

        let (status, body) = send(&t.app, "POST", "/sweeps/auto-approval").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["examined"], 1);
        assert_eq!(body["data"]["approved"], 1);

        let (_, body) = send(&t.app, "GET", &format!("/orders/{}", order.id)).await;
        assert_eq!(body["data"]["status"], "unconfirmed");
        assert_eq!(body["data"]["auto_approved"], true);

        let (status, body) = send(&t.app, "POST", "/sweeps/renewals").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["data"]["examined"], 0);
    }

    #[tokio::test]
    async fn test_account_plans_include_usage() {
        let t = test_app();
        let account = Uuid::new_v4();
        let order = pending_order(&t.store, account, "fern").await;
        send(&t.app, "POST", &format!("/orders/{}/approve", order.id)).await;
        t.panel.set_usage("fern", 5, 7);

        let (status, body) = send(&t.app, "GET", &format!("/accounts/{account}/plans")).await;
        assert_eq!(status, StatusCode::OK);
        let plans = body["data"].as_array().expect("plan array");
        assert_eq!(plans.len(), 1);
        assert_eq!(plans[0]["username"], "fern");
        assert_eq!(plans[0]["on_panel"], true);
        assert_eq!(plans[0]["up_bytes"], 5);
        assert_eq!(plans[0]["down_bytes"], 7);
        assert_eq!(plans[0]["quota_bytes"], 100_i64 << 30);
    }
}
