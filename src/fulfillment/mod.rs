//! # Order fulfillment
//!
//! Drives an order from `pending` (or `queued_for_renewal`) to a terminal
//! state and keeps the panel and the account's plan list in step with it.
//!
//! ## Approve
//!
//! 1. Load the order; already-approved orders are a successful no-op and a
//!    human approving an `unconfirmed` order simply confirms it.
//! 2. Claim the order (conditional move to `processing`). Losing the claim
//!    means someone else is handling it: successful no-op.
//! 3. Load connection and plan, locate the renewal target, resolve the package.
//! 4. Renew the existing client in place, or create a new one under the
//!    first free `name`, `name-1`, `name-2`, ...
//! 5. Record the plan-list entry, complete the order, notify.
//!
//! Any failure before completion releases the claim, leaving the order in the
//! state it was found in.
//!
//! ## Reject
//!
//! Claim the order, delete its panel client if it had been provisioned
//! (best effort), mark it rejected, drop its plan-list entry, purge its
//! receipt and notify. Only the status change itself can fail the rejection.

pub mod package;

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::error::{FulfillmentError, FulfillmentResult};
use crate::link;
use crate::models::{Order, OrderStatus, Package, PlanEntry, PlanUsage, PlanWrite};
use crate::notify::Notifier;
use crate::panel::{ClientInfo, PanelClient, PanelError, ProvisioningGateway};
use crate::store::{Approval, CatalogStore, OrderStore, PlanStore, Store};

pub use package::{deduce_renewal_package, resolve_package};

/// Tunables for fulfillment and the sweeps.
#[derive(Debug, Clone)]
pub struct FulfillmentPolicy {
    /// How long a provisioned or renewed client stays valid.
    pub validity: Duration,
    /// Minimum order age before the auto-approval sweep picks it up.
    pub auto_approve_grace: Duration,
    /// Auto-approved orders wait in `unconfirmed` for a human when set.
    pub confirm_auto_approvals: bool,
    /// Age after which an abandoned `processing` claim may be taken over.
    pub claim_stale_after: Duration,
    pub receipts_dir: PathBuf,
}

impl Default for FulfillmentPolicy {
    fn default() -> Self {
        Self {
            validity: Duration::days(30),
            auto_approve_grace: Duration::minutes(10),
            confirm_auto_approvals: true,
            claim_stale_after: Duration::minutes(15),
            receipts_dir: PathBuf::from("uploads/receipts"),
        }
    }
}

/// What set an approval in motion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalTrigger {
    Manual,
    AutoApproval,
    RenewalQueue,
}

/// Result of an approve/reject as reported to the admin layer.
#[derive(Debug, Clone, Serialize)]
pub struct FulfillmentOutcome {
    pub success: bool,
    pub message: String,
    pub username: Option<String>,
    /// True when nothing changed because the work was already done or in progress.
    pub no_op: bool,
}

impl FulfillmentOutcome {
    fn done(message: impl Into<String>, username: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            username,
            no_op: false,
        }
    }

    fn no_op(message: impl Into<String>, username: Option<String>) -> Self {
        Self {
            success: true,
            message: message.into(),
            username,
            no_op: true,
        }
    }

    pub(crate) fn failed(err: &FulfillmentError) -> Self {
        Self {
            success: false,
            message: err.to_string(),
            username: None,
            no_op: false,
        }
    }
}

pub struct OrderFulfillmentService {
    pub(crate) store: Arc<dyn Store>,
    pub(crate) gateway: Arc<ProvisioningGateway>,
    pub(crate) notifier: Arc<dyn Notifier>,
    pub(crate) policy: FulfillmentPolicy,
}

impl OrderFulfillmentService {
    pub fn new(
        store: Arc<dyn Store>,
        gateway: Arc<ProvisioningGateway>,
        notifier: Arc<dyn Notifier>,
        policy: FulfillmentPolicy,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
            policy,
        }
    }

    pub fn policy(&self) -> &FulfillmentPolicy {
        &self.policy
    }

    pub async fn get_order(&self, order_id: Uuid) -> FulfillmentResult<Order> {
        self.store
            .get_order(order_id)
            .await?
            .ok_or_else(|| FulfillmentError::NotFound(format!("order {order_id}")))
    }

    /// Approve an order. Errors are folded into an unsuccessful outcome.
    pub async fn approve_order(&self, order_id: Uuid, auto_approved: bool) -> FulfillmentOutcome {
        let trigger = if auto_approved {
            ApprovalTrigger::AutoApproval
        } else {
            ApprovalTrigger::Manual
        };
        match self.try_approve(order_id, trigger).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(order_id = %order_id, "Approval failed: {}", e);
                FulfillmentOutcome::failed(&e)
            }
        }
    }

    /// Reject an order. Errors are folded into an unsuccessful outcome.
    pub async fn reject_order(&self, order_id: Uuid) -> FulfillmentOutcome {
        match self.try_reject(order_id).await {
            Ok(outcome) => outcome,
            Err(e) => {
                warn!(order_id = %order_id, "Rejection failed: {}", e);
                FulfillmentOutcome::failed(&e)
            }
        }
    }

    pub async fn try_approve(
        &self,
        order_id: Uuid,
        trigger: ApprovalTrigger,
    ) -> FulfillmentResult<FulfillmentOutcome> {
        let order = self.get_order(order_id).await?;

        match order.status {
            OrderStatus::Approved => {
                return Ok(FulfillmentOutcome::no_op(
                    "Order is already approved",
                    order.final_username,
                ));
            }
            OrderStatus::Unconfirmed if trigger == ApprovalTrigger::Manual => {
                return self.confirm(order).await;
            }
            OrderStatus::Unconfirmed => {
                return Ok(FulfillmentOutcome::no_op(
                    "Order is already auto-approved",
                    order.final_username,
                ));
            }
            OrderStatus::Rejected => {
                return Err(FulfillmentError::InvalidTransition {
                    order_id,
                    status: order.status,
                });
            }
            OrderStatus::Pending | OrderStatus::QueuedForRenewal | OrderStatus::Processing => {}
        }

        let now = Utc::now();
        let Some(order) = self
            .store
            .claim_order(
                order_id,
                &[OrderStatus::Pending, OrderStatus::QueuedForRenewal],
                now,
                now - self.policy.claim_stale_after,
            )
            .await?
        else {
            debug!(order_id = %order_id, "Order claimed elsewhere, skipping approval");
            return Ok(FulfillmentOutcome::no_op("Order is already being processed", None));
        };

        match self.provision(&order, trigger, now).await {
            Ok(outcome) => Ok(outcome),
            Err(e) => {
                if let Err(release_err) = self.store.release_claim(order.id).await {
                    error!(order_id = %order.id, "Failed to release claim after error: {}", release_err);
                }
                Err(e)
            }
        }
    }

    async fn confirm(&self, order: Order) -> FulfillmentResult<FulfillmentOutcome> {
        if self.store.confirm_order(order.id).await? {
            info!(order_id = %order.id, "Auto-approval confirmed");
            return Ok(FulfillmentOutcome::done(
                "Auto-approval confirmed",
                order.final_username,
            ));
        }
        let current = self.get_order(order.id).await?;
        Ok(FulfillmentOutcome::no_op(
            format!("Order is {}", current.status),
            current.final_username,
        ))
    }

    /// Steps 3-8 of the approval, on a claimed order.
    async fn provision(
        &self,
        order: &Order,
        trigger: ApprovalTrigger,
        now: DateTime<Utc>,
    ) -> FulfillmentResult<FulfillmentOutcome> {
        if order.username.trim().is_empty() {
            return Err(FulfillmentError::Configuration(format!(
                "order {} has no username",
                order.id
            )));
        }

        let connection = self
            .store
            .get_connection(&order.connection_id)
            .await?
            .ok_or_else(|| {
                FulfillmentError::Configuration(format!(
                    "connection '{}' does not exist",
                    order.connection_id
                ))
            })?;
        let plan = self.store.get_plan(&order.plan_id).await?.ok_or_else(|| {
            FulfillmentError::Configuration(format!("plan '{}' does not exist", order.plan_id))
        })?;

        let existing = if order.is_renewal {
            self.gateway.find_client(order.renewal_target()).await?
        } else {
            None
        };
        let package = resolve_package(&connection, order, existing.as_ref())?;

        let quota = plan.quota_bytes();
        let expiry = (now + self.policy.validity).timestamp_millis();

        let (client, renewed) = match existing {
            Some(info) => (self.renew_existing(info, quota, expiry).await?, true),
            None => {
                if order.is_renewal {
                    warn!(
                        order_id = %order.id,
                        target = order.renewal_target(),
                        "Renewal target missing on panel, provisioning a new client"
                    );
                }
                (self.create_fresh(order, package, quota, expiry).await?, false)
            }
        };

        let link = link::render(&package.link_template, &client).unwrap_or_else(|| {
            warn!(order_id = %order.id, package = %package.name, "Link template did not render");
            String::new()
        });

        let entry = PlanEntry {
            username: client.email.clone(),
            link: link.clone(),
            plan_id: order.plan_id.clone(),
            connection_id: order.connection_id.clone(),
            package: connection
                .requires_package_choice()
                .then(|| package.name.clone()),
            activated_at: now,
            order_id: order.id,
        };
        let write = self
            .store
            .record_plan_entry(order.account_id, &entry)
            .await
            .inspect_err(|e| {
                error!(
                    order_id = %order.id,
                    username = %client.email,
                    "Client provisioned but plan list update failed: {}", e
                );
            })?;
        debug!(order_id = %order.id, ?write, "Plan list updated");

        let status = if trigger == ApprovalTrigger::AutoApproval && self.policy.confirm_auto_approvals {
            OrderStatus::Unconfirmed
        } else {
            OrderStatus::Approved
        };
        let approval = Approval {
            final_username: client.email.clone(),
            status,
            auto_approved: trigger == ApprovalTrigger::AutoApproval,
            approved_at: now,
        };
        if !self.store.complete_approval(order.id, &approval).await? {
            warn!(order_id = %order.id, "Claim was taken over before completion");
        }

        info!(
            order_id = %order.id,
            username = %client.email,
            status = %status,
            renewed,
            ?trigger,
            "Order fulfilled"
        );

        if let Err(e) = self.notifier.order_approved(order, &client.email, &link).await {
            warn!(order_id = %order.id, "Approval notification failed: {}", e);
        }

        let message = match (renewed, write, status) {
            (true, _, _) => "Renewal applied",
            (false, PlanWrite::Refreshed, _) => "Client re-provisioned",
            (false, PlanWrite::Appended, OrderStatus::Unconfirmed) => {
                "Order auto-approved, awaiting confirmation"
            }
            (false, PlanWrite::Appended, _) => "Order approved",
        };
        Ok(FulfillmentOutcome::done(message, Some(client.email)))
    }

    /// Extend an existing client in place. Id and username never change.
    async fn renew_existing(
        &self,
        info: ClientInfo,
        quota: i64,
        expiry: i64,
    ) -> FulfillmentResult<PanelClient> {
        let mut client = info.client;
        client.total_bytes = quota;
        client.expiry_time = expiry;
        client.enable = true;
        self.gateway.update_client(info.inbound_id, &client).await?;
        self.gateway.reset_traffic(info.inbound_id, &client.email).await?;
        Ok(client)
    }

    async fn create_fresh(
        &self,
        order: &Order,
        package: &Package,
        quota: i64,
        expiry: i64,
    ) -> FulfillmentResult<PanelClient> {
        let taken = self.gateway.snapshot().await?;
        let username = next_free_username(order.username.trim(), &taken);
        if !username.eq_ignore_ascii_case(order.username.trim()) {
            info!(order_id = %order.id, requested = %order.username, assigned = %username, "Username taken, using suffixed name");
        }

        let client = PanelClient {
            id: Uuid::new_v4().to_string(),
            email: username,
            total_bytes: quota,
            expiry_time: expiry,
            enable: true,
            flow: package.flow.clone().unwrap_or_default(),
            sub_id: Uuid::new_v4().to_string().replace('-', "")[..16].to_string(),
            extra: Default::default(),
        };
        self.gateway.create_client(package.inbound_id, &client).await?;
        Ok(client)
    }

    pub async fn try_reject(&self, order_id: Uuid) -> FulfillmentResult<FulfillmentOutcome> {
        let order = self.get_order(order_id).await?;
        if order.status == OrderStatus::Rejected {
            return Ok(FulfillmentOutcome::no_op("Order is already rejected", None));
        }

        let now = Utc::now();
        let Some(order) = self
            .store
            .claim_order(
                order_id,
                &[
                    OrderStatus::Pending,
                    OrderStatus::QueuedForRenewal,
                    OrderStatus::Unconfirmed,
                    OrderStatus::Approved,
                ],
                now,
                now - self.policy.claim_stale_after,
            )
            .await?
        else {
            debug!(order_id = %order_id, "Order claimed elsewhere, skipping rejection");
            return Ok(FulfillmentOutcome::no_op("Order is already being processed", None));
        };

        let reversal = order.status.is_provisioned();
        if reversal {
            if let Some(username) = order.final_username.as_deref() {
                self.remove_panel_client(&order, username).await;
            }
        }

        match self.store.complete_rejection(order.id, now).await {
            Ok(true) => {}
            Ok(false) => warn!(order_id = %order.id, "Claim was taken over before rejection completed"),
            Err(e) => {
                if let Err(release_err) = self.store.release_claim(order.id).await {
                    error!(order_id = %order.id, "Failed to release claim after error: {}", release_err);
                }
                return Err(e.into());
            }
        }
        info!(order_id = %order.id, prior = %order.status, "Order rejected");

        if reversal {
            if let Err(e) = self.store.remove_plan_entry(order.account_id, order.id).await {
                warn!(order_id = %order.id, "Failed to remove plan list entry: {}", e);
            }
        }
        self.purge_receipt(&order).await;

        if let Err(e) = self.notifier.order_rejected(&order).await {
            warn!(order_id = %order.id, "Rejection notification failed: {}", e);
        }

        Ok(FulfillmentOutcome::done("Order rejected", None))
    }

    /// Best-effort delete of a reversed order's client. Absent counts as done.
    async fn remove_panel_client(&self, order: &Order, username: &str) {
        let info = match self.gateway.find_client(username).await {
            Ok(Some(info)) => info,
            Ok(None) => {
                info!(order_id = %order.id, username, "Panel client already absent");
                return;
            }
            Err(e) => {
                error!(order_id = %order.id, username, "Could not look up panel client for deletion, clean up manually: {}", e);
                return;
            }
        };
        match self
            .gateway
            .delete_client(info.inbound_id, &info.client.id)
            .await
        {
            Ok(()) | Err(PanelError::NotFound(_)) => {}
            Err(e) => {
                error!(order_id = %order.id, username, "Failed to delete panel client, clean up manually: {}", e);
            }
        }
    }

    async fn purge_receipt(&self, order: &Order) {
        let Some(stored) = order.receipt_path.as_deref() else {
            return;
        };
        // Only the file name is trusted; the directory comes from configuration.
        let Some(file_name) = Path::new(stored).file_name() else {
            warn!(order_id = %order.id, path = stored, "Receipt path has no file name");
            return;
        };
        let path = self.policy.receipts_dir.join(file_name);
        match tokio::fs::remove_file(&path).await {
            Ok(()) => debug!(order_id = %order.id, path = %path.display(), "Receipt purged"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(order_id = %order.id, path = %path.display(), "Failed to purge receipt: {}", e),
        }
    }

    /// The account's plan list joined with live panel state.
    pub async fn account_usage(&self, account_id: Uuid) -> FulfillmentResult<Vec<PlanUsage>> {
        let entries = self.store.account_plans(account_id).await?;
        if entries.is_empty() {
            return Ok(Vec::new());
        }
        let snapshot = self.gateway.snapshot().await?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                let live = snapshot.get(&entry.username.to_lowercase());
                PlanUsage {
                    on_panel: live.is_some(),
                    enabled: live.map(|i| i.client.enable),
                    quota_bytes: live.map(|i| i.client.total_bytes),
                    expiry_time: live.map(|i| i.client.expiry_time),
                    up_bytes: live.and_then(|i| i.usage).map(|u| u.up),
                    down_bytes: live.and_then(|i| i.usage).map(|u| u.down),
                    entry,
                }
            })
            .collect())
    }
}

/// `base` if free, else the first free `base-N` for N = 1, 2, ...
fn next_free_username(base: &str, taken: &HashMap<String, ClientInfo>) -> String {
    let is_taken = |name: &str| taken.contains_key(&name.to_lowercase());
    if !is_taken(base) {
        return base.to_string();
    }
    (1u64..)
        .map(|n| format!("{base}-{n}"))
        .find(|candidate| !is_taken(candidate))
        .unwrap_or_else(|| format!("{base}-{}", Uuid::new_v4().simple()))
}
