//! Outbound notifications about order decisions.
//!
//! Delivery (email etc.) happens elsewhere; this crate only fires the trigger.
//! Callers log and ignore failures.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::json;
use tracing::info;

use crate::models::Order;

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn order_approved(&self, order: &Order, username: &str, link: &str) -> anyhow::Result<()>;

    async fn order_rejected(&self, order: &Order) -> anyhow::Result<()>;
}

/// Writes a tracing event per notification.
pub struct LogNotifier;

#[async_trait]
impl Notifier for LogNotifier {
    async fn order_approved(&self, order: &Order, username: &str, _link: &str) -> anyhow::Result<()> {
        info!(order_id = %order.id, account_id = %order.account_id, username, "Order approved notification");
        Ok(())
    }

    async fn order_rejected(&self, order: &Order) -> anyhow::Result<()> {
        info!(order_id = %order.id, account_id = %order.account_id, "Order rejected notification");
        Ok(())
    }
}

/// POSTs a JSON event to a webhook owned by the mailer.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: impl Into<String>, timeout: Duration) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            client,
            url: url.into(),
        })
    }

    async fn send(&self, payload: serde_json::Value) -> anyhow::Result<()> {
        let response = self.client.post(&self.url).json(&payload).send().await?;
        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            anyhow::bail!("Notification webhook returned {}: {}", status, body);
        }
        Ok(())
    }
}

#[async_trait]
impl Notifier for WebhookNotifier {
    async fn order_approved(&self, order: &Order, username: &str, link: &str) -> anyhow::Result<()> {
        self.send(json!({
            "event": "order_approved",
            "order_id": order.id,
            "account_id": order.account_id,
            "username": username,
            "link": link,
            "plan_id": order.plan_id,
            "is_renewal": order.is_renewal,
        }))
        .await
    }

    async fn order_rejected(&self, order: &Order) -> anyhow::Result<()> {
        self.send(json!({
            "event": "order_rejected",
            "order_id": order.id,
            "account_id": order.account_id,
            "username": order.username,
        }))
        .await
    }
}
