//! Periodic sweeps: auto-approval of aged pending orders and promotion of
//! queued renewals whose eligibility window has opened.
//!
//! Both sweeps go through the same approve path as a human would, so the
//! claim taken there keeps them safe against concurrent admin actions.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::FulfillmentResult;
use crate::fulfillment::{ApprovalTrigger, OrderFulfillmentService};
use crate::models::Order;
use crate::store::{CatalogStore, OrderStore};

/// Counts from one sweep.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SweepReport {
    pub examined: usize,
    pub approved: usize,
    pub skipped: usize,
    pub failed: usize,
}

impl OrderFulfillmentService {
    /// Auto-approve pending orders older than the grace window on
    /// connections whose operator enabled auto-approval.
    pub async fn run_auto_approval_sweep(&self) -> FulfillmentResult<SweepReport> {
        let cutoff = Utc::now() - self.policy.auto_approve_grace;
        let orders = self.store.pending_orders_created_before(cutoff).await?;

        let mut report = SweepReport::default();
        let mut enabled: HashMap<String, bool> = HashMap::new();

        for order in orders {
            report.examined += 1;

            let auto_approve = match enabled.get(&order.connection_id) {
                Some(flag) => *flag,
                None => {
                    let flag = match self.store.get_connection(&order.connection_id).await? {
                        Some(connection) => connection.auto_approve,
                        None => {
                            warn!(
                                order_id = %order.id,
                                connection_id = %order.connection_id,
                                "Pending order references an unknown connection"
                            );
                            false
                        }
                    };
                    enabled.insert(order.connection_id.clone(), flag);
                    flag
                }
            };
            if !auto_approve {
                report.skipped += 1;
                continue;
            }

            self.sweep_one(&order, ApprovalTrigger::AutoApproval, &mut report).await;
        }

        log_report("auto-approval", &report);
        Ok(report)
    }

    /// Approve queued renewals whose eligibility time has passed.
    pub async fn run_renewal_sweep(&self) -> FulfillmentResult<SweepReport> {
        let orders = self.store.due_renewals(Utc::now()).await?;

        let mut report = SweepReport::default();
        for order in orders {
            report.examined += 1;
            self.sweep_one(&order, ApprovalTrigger::RenewalQueue, &mut report).await;
        }

        log_report("renewal", &report);
        Ok(report)
    }

    async fn sweep_one(&self, order: &Order, trigger: ApprovalTrigger, report: &mut SweepReport) {
        match self.try_approve(order.id, trigger).await {
            Ok(outcome) if outcome.no_op => {
                debug!(order_id = %order.id, "{}", outcome.message);
                report.skipped += 1;
            }
            Ok(_) => report.approved += 1,
            Err(e) => {
                warn!(order_id = %order.id, ?trigger, "Sweep could not approve order: {}", e);
                report.failed += 1;
            }
        }
    }
}

fn log_report(sweep: &'static str, report: &SweepReport) {
    if report.examined == 0 {
        debug!(sweep, "Nothing to do");
        return;
    }
    info!(
        sweep,
        examined = report.examined,
        approved = report.approved,
        skipped = report.skipped,
        failed = report.failed,
        "Sweep finished"
    );
}

/// Run both sweeps on independent timers until the runtime shuts down.
pub fn spawn_sweeps(service: Arc<OrderFulfillmentService>, every: Duration) -> Vec<JoinHandle<()>> {
    let auto = {
        let service = service.clone();
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(every);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if let Err(e) = service.run_auto_approval_sweep().await {
                    error!("Auto-approval sweep failed: {}", e);
                }
            }
        })
    };

    let renewals = tokio::spawn(async move {
        let mut interval = tokio::time::interval(every);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        loop {
            interval.tick().await;
            if let Err(e) = service.run_renewal_sweep().await {
                error!("Renewal sweep failed: {}", e);
            }
        }
    });

    info!(interval_secs = every.as_secs(), "Sweeps scheduled");
    vec![auto, renewals]
}
