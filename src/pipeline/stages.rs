//! The stages one order runs through, in order:
//!
//! 1. validate: customer, items and total must make sense
//! 2. inventory check: reserve every item under the inventory lock
//! 3. payment: five steps, the charge itself under the payment lock
//! 4. notification: one delivery per channel, fanned out on the notification pool
//! 5. inventory update: commit the reservation on the fulfillment pool
//!
//! Cancellation is checked between stages and at every simulated delay. A failed order is
//! compensated by [`OrderRun::abandon`] and settled as `Cancelled`.

use super::coordinator::Shared;
use super::{PipelineError, Stage};
use crate::model::{OrderCreate, OrderId, OrderStatus, Transition};
use crate::order_actor::OrderError;
use futures::future::join_all;
use pipeline_framework::{CancelSource, CancelToken};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, instrument, warn};

const PAYMENT_STEPS: [&str; 5] = [
    "verify customer",
    "check balance",
    "charge",
    "update account",
    "issue receipt",
];
const CHARGE_STEP: usize = 2;

/// An order that made it all the way to `Shipped`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct OrderOutcome {
    pub id: OrderId,
    pub status: OrderStatus,
    #[serde(with = "pipeline_framework::duration_ms")]
    pub elapsed: Duration,
    /// Channels that confirmed delivery.
    pub notifications_sent: usize,
}

/// One order's trip through the pipeline.
#[derive(Clone)]
pub(super) struct OrderRun {
    shared: Arc<Shared>,
    id: OrderId,
    customer: String,
    items: Vec<String>,
    total: f64,
    cancel: CancelToken,
}

impl OrderRun {
    pub(super) fn new(
        shared: Arc<Shared>,
        id: OrderId,
        params: OrderCreate,
        cancel: CancelToken,
    ) -> Self {
        Self {
            shared,
            id,
            customer: params.customer,
            items: params.items,
            total: params.total,
            cancel,
        }
    }

    #[instrument(name = "order", skip_all, fields(order_id = %self.id))]
    pub(super) async fn execute(self) -> Result<OrderOutcome, PipelineError> {
        let started = Instant::now();
        match self.run_stages(started).await {
            Ok(outcome) => {
                info!(elapsed_ms = outcome.elapsed.as_millis() as u64, "Order shipped");
                Ok(outcome)
            }
            Err(err) => {
                warn!(kind = err.kind(), error = %err, "Order failed");
                self.abandon(&err).await;
                Err(err)
            }
        }
    }

    async fn run_stages(&self, started: Instant) -> Result<OrderOutcome, PipelineError> {
        self.boundary(Stage::Validate)?;
        self.validate().await?;

        self.boundary(Stage::InventoryCheck)?;
        self.check_inventory().await?;

        self.boundary(Stage::Payment)?;
        self.collect_payment().await?;

        self.boundary(Stage::Notification)?;
        let notifications_sent = self.notify_customer().await?;

        self.boundary(Stage::InventoryUpdate)?;
        let shipped = self.update_inventory().await?;

        Ok(OrderOutcome {
            id: self.id,
            status: shipped.order.status,
            elapsed: started.elapsed(),
            notifications_sent,
        })
    }

    async fn validate(&self) -> Result<(), PipelineError> {
        let stage = Stage::Validate;
        self.shared
            .orders
            .advance(self.id, OrderStatus::Processing)
            .await?;
        self.progress(stage, "validating order");
        self.pause(stage, self.shared.settings.validate_delay).await?;

        if self.customer.trim().is_empty() {
            return Err(self.failure(stage, "customer name is empty"));
        }
        if self.items.is_empty() {
            return Err(self.failure(stage, "order has no items"));
        }
        if !self.total.is_finite() || self.total <= 0.0 {
            return Err(self.failure(stage, format!("invalid total {}", self.total)));
        }
        self.progress(stage, "order validated");
        Ok(())
    }

    async fn check_inventory(&self) -> Result<(), PipelineError> {
        let stage = Stage::InventoryCheck;
        let scope = self
            .shared
            .locks
            .scope(self.id, stage, self.cancel.clone());
        let mut ledger = scope.inventory().await?;
        self.progress(stage, "checking inventory");
        self.pause(stage, self.shared.settings.inventory_hold).await?;
        ledger
            .reserve(self.id, &self.items)
            .map_err(|e| self.failure(stage, e))?;
        ledger.unlock();

        self.progress(stage, format!("{} item(s) reserved", self.items.len()));
        Ok(())
    }

    async fn collect_payment(&self) -> Result<(), PipelineError> {
        let stage = Stage::Payment;
        let steps = PAYMENT_STEPS.len();
        for (index, step) in PAYMENT_STEPS.iter().enumerate() {
            if index == CHARGE_STEP {
                self.charge().await?;
            } else {
                self.pause(stage, self.shared.settings.payment_step_delay)
                    .await?;
            }
            let percent = (index + 1) * 100 / steps;
            self.progress(
                stage,
                format!("step {}/{steps}: {step} ({percent}%)", index + 1),
            );
        }

        self.shared.orders.advance(self.id, OrderStatus::Paid).await?;
        self.progress(stage, format!("paid {:.2}", self.total));
        Ok(())
    }

    async fn charge(&self) -> Result<(), PipelineError> {
        let stage = Stage::Payment;
        let scope = self
            .shared
            .locks
            .scope(self.id, stage, self.cancel.clone());
        let mut gateway = scope.payment().await?;
        self.pause(stage, self.shared.settings.payment_hold).await?;
        gateway
            .charge(self.id, self.total)
            .map_err(|e| self.failure(stage, e))
    }

    /// Deliver on every channel in parallel. Channels that fail are logged and counted, but
    /// only a fan-out that outlives its join timeout fails the order. On timeout the
    /// remaining deliveries are cancelled and counted as failed.
    async fn notify_customer(&self) -> Result<usize, PipelineError> {
        let stage = Stage::Notification;
        let settings = &self.shared.settings;
        let fan_out = CancelSource::child_of(&self.cancel);

        let mut pending = Vec::with_capacity(settings.channels.len());
        for channel in &settings.channels {
            let mut run = self.clone();
            run.cancel = fan_out.token();
            let name = channel.clone();
            let submitted = self
                .shared
                .notification_pool
                .submit(async move { run.deliver(&name).await })
                .await;
            match submitted {
                Ok(handle) => pending.push((channel.as_str(), handle)),
                Err(e) => self.channel_failed(channel, &e),
            }
        }

        let (channels, mut handles): (Vec<_>, Vec<_>) = pending.into_iter().unzip();
        let waited = settings.notification_join_timeout;
        let deadline = tokio::time::Instant::now() + waited;
        let joined = join_all(
            handles
                .iter_mut()
                .map(|handle| tokio::time::timeout_at(deadline, handle)),
        )
        .await;
        let mut outcomes: Vec<_> = joined.into_iter().map(Result::ok).collect();

        let timed_out = outcomes.iter().any(Option::is_none);
        if timed_out {
            warn!(
                order_id = %self.id,
                waited_ms = waited.as_millis() as u64,
                "Notification join timed out"
            );
            fan_out.cancel();
            // Cancelled deliveries stop at their next wait; give them one more window.
            let settle = tokio::time::Instant::now() + waited;
            for (outcome, handle) in outcomes.iter_mut().zip(handles.iter_mut()) {
                if outcome.is_none() {
                    *outcome = tokio::time::timeout_at(settle, handle).await.ok();
                }
            }
        }

        let mut sent = 0;
        for (channel, outcome) in channels.into_iter().zip(outcomes) {
            match outcome {
                Some(Ok(Ok(()))) => sent += 1,
                Some(Ok(Err(e))) => self.channel_failed(channel, &e),
                Some(Err(e)) => self.channel_failed(channel, &e),
                None => self.channel_failed(channel, &"abandoned after the join timeout"),
            }
        }
        if timed_out {
            return Err(PipelineError::ResourceTimeout {
                resource: format!("notifications for {}", self.id),
                waited,
            });
        }
        self.boundary(stage)?;

        self.progress(
            stage,
            format!("{sent}/{} channel(s) delivered", settings.channels.len()),
        );
        Ok(sent)
    }

    async fn deliver(&self, channel: &str) -> Result<(), PipelineError> {
        let stage = Stage::Notification;
        self.progress(stage, format!("connecting to {channel}"));
        self.pause(stage, self.shared.settings.notification_delay)
            .await?;

        let scope = self
            .shared
            .locks
            .scope(self.id, stage, self.cancel.clone());
        let mut outbox = scope.notification().await?;
        outbox
            .deliver(self.id, channel, &self.customer)
            .map_err(|e| self.failure(stage, e))?;
        outbox.unlock();

        self.shared.stats.increment_notifications_sent();
        self.progress(stage, format!("{channel} sent to {}", self.customer));
        Ok(())
    }

    fn channel_failed(&self, channel: &str, error: &dyn Display) {
        warn!(order_id = %self.id, %channel, %error, "Notification not delivered");
        self.shared.stats.increment_notifications_failed();
    }

    async fn update_inventory(&self) -> Result<Transition, PipelineError> {
        let stage = Stage::InventoryUpdate;
        let run = self.clone();
        let handle = self
            .shared
            .fulfillment_pool
            .submit(async move { run.commit_items().await })
            .await
            .map_err(|e| PipelineError::from_pool(e, self.id, Some(stage)))?;
        handle
            .await
            .map_err(|e| PipelineError::from_pool(e, self.id, Some(stage)))??;
        self.boundary(stage)?;

        let shipped = self
            .shared
            .orders
            .advance(self.id, OrderStatus::Shipped)
            .await?;
        self.progress(stage, "order shipped");
        Ok(shipped)
    }

    async fn commit_items(&self) -> Result<(), PipelineError> {
        let stage = Stage::InventoryUpdate;
        for item in &self.items {
            self.pause(stage, self.shared.settings.item_update_delay)
                .await?;
            let scope = self
                .shared
                .locks
                .scope(self.id, stage, self.cancel.clone());
            let mut ledger = scope.inventory().await?;
            if !ledger.commit(self.id, item) {
                return Err(self.failure(stage, format!("no reservation for {item}")));
            }
            ledger.unlock();
            self.progress(stage, format!("{item} committed"));
        }
        Ok(())
    }

    /// Give back what the order still holds, then settle it as `Cancelled`.
    pub(super) async fn abandon(&self, cause: &PipelineError) {
        match compensate(&self.shared, self.id, cause.to_string()).await {
            Ok(_) => {}
            Err(OrderError::InvalidTransition { from, .. }) => {
                debug!(order_id = %self.id, %from, "Order already settled");
            }
            Err(e) => error!(order_id = %self.id, error = %e, "Order not cancelled"),
        }
        self.progress(Stage::Compensation, format!("cancelled: {cause}"));
    }

    fn boundary(&self, stage: Stage) -> Result<(), PipelineError> {
        self.cancel.check().map_err(|_| self.interrupted(stage))
    }

    async fn pause(&self, stage: Stage, duration: Duration) -> Result<(), PipelineError> {
        self.cancel
            .sleep(duration)
            .await
            .map_err(|_| self.interrupted(stage))
    }

    fn interrupted(&self, stage: Stage) -> PipelineError {
        PipelineError::InterruptedWork {
            order: self.id,
            stage: Some(stage),
        }
    }

    fn failure(&self, stage: Stage, reason: impl ToString) -> PipelineError {
        PipelineError::StageFailure {
            order: self.id,
            stage,
            reason: reason.to_string(),
        }
    }

    fn progress(&self, stage: Stage, message: impl Into<String>) {
        let message = message.into();
        debug!(order_id = %self.id, %stage, %message);
        self.shared.events.progress(self.id, stage, message);
    }
}

/// Release the reservation of `id`, refund its charge and settle it as `Cancelled`.
///
/// Inventory and payment are taken in the fixed domain order. The waits are not
/// cancellable, so this also runs for orders whose own token has fired.
pub(super) async fn compensate(
    shared: &Shared,
    id: OrderId,
    cause: String,
) -> Result<Transition, OrderError> {
    let scope = shared
        .locks
        .scope(id, Stage::Compensation, CancelToken::never());

    let ledger = scope.inventory().await;
    let gateway = scope.payment().await;
    match ledger {
        Ok(mut ledger) => {
            let released = ledger.release(id);
            if released > 0 {
                debug!(order_id = %id, released, "Reservation released");
            }
        }
        Err(e) => warn!(order_id = %id, error = %e, "Reservation not released"),
    }
    match gateway {
        Ok(mut gateway) => {
            if let Some(amount) = gateway.refund(id) {
                info!(order_id = %id, amount, "Payment refunded");
            }
        }
        Err(e) => warn!(order_id = %id, error = %e, "Payment not refunded"),
    }

    shared.orders.cancel(id, cause).await
}
