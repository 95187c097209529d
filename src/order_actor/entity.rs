//! [`ActorEntity`] implementation for [`Order`].
//!
//! Transitions are applied inside the registry actor, so the statistics they feed are
//! updated in the same step as the status itself and no reader sees one without the other.

use super::OrderError;
use crate::model::{Observer, Order, OrderAction, OrderCreate, OrderId, OrderStatus, Transition};
use crate::pipeline::{EventSink, PipelineEvent};
use crate::stats::StatisticsAggregator;
use async_trait::async_trait;
use pipeline_framework::ActorEntity;
use std::sync::Arc;
use tracing::info;

/// Shared services the registry updates as orders change.
#[derive(Clone)]
pub struct OrderContext {
    pub stats: Arc<StatisticsAggregator>,
    pub events: EventSink,
}

#[async_trait]
impl ActorEntity for Order {
    type Id = OrderId;
    type Create = OrderCreate;
    type Update = ();
    type Action = OrderAction;
    type ActionResult = Transition;
    type Context = OrderContext;
    type Observer = Observer;
    type Error = OrderError;

    fn from_create_params(id: OrderId, params: OrderCreate) -> Result<Self, Self::Error> {
        Ok(Order::new(id, params))
    }

    async fn on_create(&mut self, ctx: &Self::Context) -> Result<(), Self::Error> {
        ctx.stats.increment_orders_submitted();
        Ok(())
    }

    /// Orders are only changed through actions.
    async fn on_update(&mut self, _update: (), _ctx: &Self::Context) -> Result<(), Self::Error> {
        Ok(())
    }

    async fn handle_action(
        &mut self,
        action: OrderAction,
        ctx: &Self::Context,
    ) -> Result<Transition, Self::Error> {
        let transition = match action {
            OrderAction::Advance(OrderStatus::Cancelled) => {
                self.cancel("cancelled".to_string())?
            }
            OrderAction::Advance(next) => self.transition(next)?,
            OrderAction::Cancel { cause } => self.cancel(cause)?,
        };
        self.record(&transition, ctx);
        Ok(transition)
    }

    fn on_observe(&mut self, observer: Observer) {
        self.mark_observed(observer);
    }

    fn is_expired(&self) -> bool {
        self.observed_by_all()
    }
}

impl Order {
    fn cancel(&mut self, cause: String) -> Result<Transition, OrderError> {
        let mut transition = self.transition(OrderStatus::Cancelled)?;
        self.cancel_cause = Some(cause.clone());
        transition.order.cancel_cause = Some(cause);
        Ok(transition)
    }

    fn record(&self, transition: &Transition, ctx: &OrderContext) {
        let to = self.status;
        match to {
            OrderStatus::Paid => ctx.stats.increment_payments_processed(),
            OrderStatus::Shipped => {
                ctx.stats.increment_orders_processed();
                if let Some(elapsed) = self.processing_time() {
                    ctx.stats.add_processing_time(elapsed);
                }
            }
            // A shipped order that is cancelled afterwards stays counted as completed.
            OrderStatus::Cancelled if transition.settled_now => {
                ctx.stats.increment_orders_cancelled()
            }
            _ => {}
        }

        ctx.events.emit(PipelineEvent::StatusChanged {
            order: self.id,
            from: transition.from,
            to,
        });
        if transition.settled_now {
            let elapsed = self.processing_time().unwrap_or_default();
            info!(
                order_id = %self.id,
                status = %to,
                elapsed_ms = elapsed.as_millis() as u64,
                "Order settled"
            );
            ctx.events.emit(PipelineEvent::OrderSettled {
                order: self.id,
                status: to,
                elapsed,
                cause: self.cancel_cause.clone(),
            });
        }
    }
}
