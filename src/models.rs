//! Domain models for the fulfillment service.
//!
//! Orders and plan-list entries are owned by this service; panel clients are
//! not (see [`crate::panel`]). Connections and plans are static provisioning
//! configuration maintained by operators.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Orders
// ============================================================================

/// Lifecycle status of an order.
///
/// `Processing` is a transient claim held while an approve or reject is in
/// flight; it is never a resting state for a healthy order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    QueuedForRenewal,
    Processing,
    Unconfirmed,
    Approved,
    Rejected,
}

impl OrderStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::QueuedForRenewal => "queued_for_renewal",
            OrderStatus::Processing => "processing",
            OrderStatus::Unconfirmed => "unconfirmed",
            OrderStatus::Approved => "approved",
            OrderStatus::Rejected => "rejected",
        }
    }

    /// Statuses in which the order owns a live panel client.
    pub fn is_provisioned(&self) -> bool {
        matches!(self, OrderStatus::Approved | OrderStatus::Unconfirmed)
    }
}

impl fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OrderStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(OrderStatus::Pending),
            "queued_for_renewal" => Ok(OrderStatus::QueuedForRenewal),
            "processing" => Ok(OrderStatus::Processing),
            "unconfirmed" => Ok(OrderStatus::Unconfirmed),
            "approved" => Ok(OrderStatus::Approved),
            "rejected" => Ok(OrderStatus::Rejected),
            other => Err(format!("unknown order status '{other}'")),
        }
    }
}

/// One provisioning request, created by checkout in `pending` state.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: Uuid,
    pub account_id: Uuid,
    /// Username requested at checkout.
    pub username: String,
    pub plan_id: String,
    pub connection_id: String,
    pub package: Option<String>,
    pub is_renewal: bool,
    /// Client to renew or replace, when it differs from `username`.
    pub old_username: Option<String>,
    pub status: OrderStatus,
    /// Username actually provisioned. Present iff status is approved/unconfirmed.
    pub final_username: Option<String>,
    pub auto_approved: bool,
    /// Price snapshot in minor currency units.
    pub price: i64,
    /// Stored proof-of-payment upload, if any.
    pub receipt_path: Option<String>,
    /// Earliest time a queued renewal may be promoted.
    pub renewal_eligible_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
    pub rejected_at: Option<DateTime<Utc>>,
}

impl Order {
    /// A fresh pending order, as checkout would create it.
    pub fn new_pending(
        account_id: Uuid,
        username: impl Into<String>,
        plan_id: impl Into<String>,
        connection_id: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            account_id,
            username: username.into(),
            plan_id: plan_id.into(),
            connection_id: connection_id.into(),
            package: None,
            is_renewal: false,
            old_username: None,
            status: OrderStatus::Pending,
            final_username: None,
            auto_approved: false,
            price: 0,
            receipt_path: None,
            renewal_eligible_at: None,
            created_at: Utc::now(),
            approved_at: None,
            rejected_at: None,
        }
    }

    /// The panel username a renewal targets.
    pub fn renewal_target(&self) -> &str {
        self.old_username
            .as_deref()
            .filter(|name| !name.trim().is_empty())
            .unwrap_or(&self.username)
    }
}

// ============================================================================
// Provisioning configuration
// ============================================================================

/// A panel collection plus the link template clients in it are handed out with.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    /// Panel inbound id new clients are created in.
    pub inbound_id: i64,
    pub link_template: String,
    /// Flow assigned to new clients (e.g. `xtls-rprx-vision`), if the inbound needs one.
    #[serde(default)]
    pub flow: Option<String>,
}

/// How a connection maps orders to packages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PackageLayout {
    Single { package: Package },
    Choice { packages: Vec<Package> },
}

/// A sellable connection type.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Connection {
    pub id: String,
    pub name: String,
    pub layout: PackageLayout,
    /// Operator switch for the auto-approval sweep.
    pub auto_approve: bool,
}

impl Connection {
    pub fn requires_package_choice(&self) -> bool {
        matches!(self.layout, PackageLayout::Choice { .. })
    }
}

/// A traffic plan. `traffic_gb == 0` means unlimited.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Plan {
    pub id: String,
    pub name: String,
    pub traffic_gb: i64,
    pub price: i64,
}

impl Plan {
    pub fn quota_bytes(&self) -> i64 {
        self.traffic_gb.max(0).saturating_mul(1 << 30)
    }
}

// ============================================================================
// Account plan list
// ============================================================================

/// Account-side cached summary of one provisioned client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlanEntry {
    pub username: String,
    pub link: String,
    pub plan_id: String,
    pub connection_id: String,
    pub package: Option<String>,
    pub activated_at: DateTime<Utc>,
    pub order_id: Uuid,
}

/// What happened to the plan list when an entry was recorded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlanWrite {
    Appended,
    Refreshed,
}

/// A plan-list entry joined with the live panel record, if one exists.
#[derive(Debug, Clone, Serialize)]
pub struct PlanUsage {
    #[serde(flatten)]
    pub entry: PlanEntry,
    pub on_panel: bool,
    pub enabled: Option<bool>,
    pub quota_bytes: Option<i64>,
    pub expiry_time: Option<i64>,
    pub up_bytes: Option<i64>,
    pub down_bytes: Option<i64>,
}

// ============================================================================
// Response Models
// ============================================================================

/// Generic API response wrapper.
#[derive(Debug, Serialize)]
pub struct ApiResponse<T: Serialize> {
    pub data: T,
    pub message: String,
}

/// Public view of an order.
#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: Uuid,
    pub username: String,
    pub status: OrderStatus,
    pub final_username: Option<String>,
    pub auto_approved: bool,
    pub created_at: DateTime<Utc>,
    pub approved_at: Option<DateTime<Utc>>,
}

impl From<Order> for OrderResponse {
    fn from(order: Order) -> Self {
        Self {
            id: order.id,
            username: order.username,
            status: order.status,
            final_username: order.final_username,
            auto_approved: order.auto_approved,
            created_at: order.created_at,
            approved_at: order.approved_at,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_text() {
        for status in [
            OrderStatus::Pending,
            OrderStatus::QueuedForRenewal,
            OrderStatus::Processing,
            OrderStatus::Unconfirmed,
            OrderStatus::Approved,
            OrderStatus::Rejected,
        ] {
            assert_eq!(status.as_str().parse::<OrderStatus>().unwrap(), status);
        }
        assert!("reopened".parse::<OrderStatus>().is_err());
    }

    #[test]
    fn quota_is_gibibytes_and_zero_is_unlimited() {
        let plan = Plan { id: "100GB".into(), name: "100 GB".into(), traffic_gb: 100, price: 0 };
        assert_eq!(plan.quota_bytes(), 100 * 1_073_741_824);

        let unlimited = Plan { traffic_gb: 0, ..plan };
        assert_eq!(unlimited.quota_bytes(), 0);
    }

    #[test]
    fn renewal_target_prefers_old_username() {
        let mut order = Order::new_pending(Uuid::new_v4(), "bob", "p", "c");
        assert_eq!(order.renewal_target(), "bob");
        order.old_username = Some("bob-2".into());
        assert_eq!(order.renewal_target(), "bob-2");
        order.old_username = Some("  ".into());
        assert_eq!(order.renewal_target(), "bob");
    }

    #[test]
    fn package_layout_serializes_tagged() {
        let layout = PackageLayout::Single {
            package: Package {
                name: "default".into(),
                inbound_id: 3,
                link_template: "vless://{uuid}@h:443#{name}".into(),
                flow: None,
            },
        };
        let value = serde_json::to_value(&layout).unwrap();
        assert_eq!(value["kind"], "single");
        assert_eq!(value["package"]["inbound_id"], 3);
    }
}
