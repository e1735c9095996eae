//! Purchase workflow: open a processor order, then capture it for credits.
//!
//! A capture claim on the order admits one processor call at a time.
//! Credits are granted only on a completed capture.

use std::sync::Arc;

use chrono::Duration;
use inkpost_ledger::{LedgerError, OrderStatus, PurchaseApplied, PurchaseOrder, PurchaseSettlement};
use inkpost_types::{AccountId, OrderId, PlanId, Scope, TenantId};
use tokio::time::timeout;
use tracing::{info, warn};

use crate::collaborators::{PaymentProcessor, PlanCatalog};
use crate::config::BillingConfig;
use crate::error::{BillingError, BillingResult};
use crate::store::LedgerStore;

const PROCESSOR: &str = "payment processor";

/// An order opened with the processor and waiting for the buyer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CreatedOrder {
    pub order: PurchaseOrder,
    /// Handle the client uses to approve the payment.
    pub handle: String,
}

/// Credit purchases through an external payment processor.
///
/// Credits are granted only after the processor reports a completed
/// capture. An unanswered capture leaves the order `Created` so that a
/// later capture can settle it.
pub struct PurchaseWorkflow {
    ledger: Arc<dyn LedgerStore>,
    processor: Arc<dyn PaymentProcessor>,
    catalog: Arc<dyn PlanCatalog>,
    config: BillingConfig,
}

impl PurchaseWorkflow {
    pub fn new(
        ledger: Arc<dyn LedgerStore>,
        processor: Arc<dyn PaymentProcessor>,
        catalog: Arc<dyn PlanCatalog>,
        config: BillingConfig,
    ) -> Self {
        Self {
            ledger,
            processor,
            catalog,
            config,
        }
    }

    pub async fn create_order(
        &self,
        tenant: &TenantId,
        account: AccountId,
        plan_id: &PlanId,
    ) -> BillingResult<CreatedOrder> {
        let plan = self
            .catalog
            .plan(tenant, plan_id)
            .ok_or_else(|| BillingError::PlanNotFound(plan_id.clone()))?;
        if !plan.is_payable() {
            return Err(BillingError::PlanNotPayable(plan_id.clone()));
        }

        let order = PurchaseOrder::new(
            tenant.clone(),
            account,
            plan.id.clone(),
            plan.price.clone(),
            plan.credits,
        );
        self.ledger.register_order(&order)?;

        let description = format!("{} ({} credits)", plan.name, plan.credits);
        let handle = match timeout(
            self.config.capture_timeout(),
            self.processor.create_order(&plan.price, &description),
        )
        .await
        {
            Ok(Ok(handle)) => handle,
            Ok(Err(err)) => {
                self.abandon(order.id, &err.to_string());
                return Err(err);
            }
            Err(_) => {
                let reason = format!(
                    "no order handle after {}s",
                    self.config.capture_timeout_secs
                );
                self.abandon(order.id, &reason);
                return Err(BillingError::external(PROCESSOR, reason));
            }
        };

        let order = self.ledger.attach_processor_handle(order.id, &handle)?;
        info!(
            order = %order.id,
            account = %account,
            plan = %plan.id,
            price = %plan.price,
            "purchase order created"
        );
        Ok(CreatedOrder { order, handle })
    }

    /// Confirm payment and grant the order's credits.
    pub async fn capture_order(
        &self,
        tenant: &TenantId,
        account: AccountId,
        order_id: OrderId,
    ) -> BillingResult<PurchaseApplied> {
        let order = self
            .ledger
            .order(&Scope::tenant(tenant.clone()), order_id)?
            .filter(|o| o.account == account)
            .ok_or(BillingError::OrderNotFound(order_id))?;
        match order.status {
            OrderStatus::Created => {}
            OrderStatus::Completed => return Err(BillingError::AlreadyCompleted(order_id)),
            OrderStatus::Failed => return Err(BillingError::OrderFailed(order_id)),
        }
        let handle = order.processor_handle.clone().ok_or_else(|| {
            BillingError::InsufficientPrecondition(format!(
                "order {order_id} has no processor handle"
            ))
        })?;

        // Only the claim holder calls the processor.
        self.ledger
            .claim_capture(order_id, self.capture_lease())
            .map_err(order_error)?;

        let capture = match timeout(
            self.config.capture_timeout(),
            self.processor.capture_order(&handle),
        )
        .await
        {
            Ok(Ok(capture)) => capture,
            Ok(Err(err)) => {
                warn!(order = %order_id, error = %err, "capture call failed, order left open");
                self.release(order_id);
                return Err(BillingError::CaptureOutcomeUnknown {
                    order: order_id,
                    reason: err.to_string(),
                });
            }
            Err(_) => {
                warn!(order = %order_id, "capture timed out, order left open");
                self.release(order_id);
                return Err(BillingError::CaptureOutcomeUnknown {
                    order: order_id,
                    reason: format!("no answer after {}s", self.config.capture_timeout_secs),
                });
            }
        };

        if !capture.status.is_completed() {
            let status = capture.status.to_string();
            self.ledger
                .fail_order(order_id, &status)
                .map_err(order_error)?;
            warn!(order = %order_id, account = %account, status = %status, "payment not completed");
            return Err(BillingError::PaymentDeclined {
                order: order_id,
                status,
            });
        }

        if let Some(captured) = &capture.captured {
            if *captured != order.price {
                warn!(
                    order = %order_id,
                    expected = %order.price,
                    captured = %captured,
                    "captured amount differs from plan price"
                );
            }
        }

        let settlement = PurchaseSettlement {
            order: order_id,
            capture_id: capture.capture_id.unwrap_or_else(|| handle.clone()),
            captured: capture.captured,
            payer: capture.payer,
        };
        let applied = self
            .ledger
            .apply_purchase(tenant, account, order.credits_to_grant, &settlement)
            .map_err(order_error)?;
        info!(
            order = %order_id,
            account = %account,
            credits = applied.entry.amount,
            "purchase captured"
        );
        Ok(applied)
    }

    /// Twice the capture timeout. A claim older than this belongs to a
    /// capture that never released it.
    fn capture_lease(&self) -> Duration {
        i64::try_from(self.config.capture_timeout_secs.saturating_mul(2))
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    fn release(&self, order: OrderId) {
        if let Err(err) = self.ledger.release_capture(order) {
            warn!(order = %order, error = %err, "could not release capture claim");
        }
    }

    /// Mark an order failed after the processor refused to open it.
    fn abandon(&self, order: OrderId, reason: &str) {
        warn!(order = %order, reason, "processor order creation failed");
        if let Err(err) = self.ledger.fail_order(order, reason) {
            warn!(order = %order, error = %err, "could not mark order failed");
        }
    }
}

/// Order state conflicts keep their own billing variants.
fn order_error(err: LedgerError) -> BillingError {
    match err {
        LedgerError::AlreadyCompleted(id) => BillingError::AlreadyCompleted(id),
        LedgerError::CaptureInProgress(id) => BillingError::CaptureInProgress(id),
        LedgerError::OrderNotFound(id) => BillingError::OrderNotFound(id),
        other => BillingError::Ledger(other),
    }
}
