//! A customer order moving through the fulfillment pipeline.
//!
//! # Registry
//! [`Order`] implements the [`ActorEntity`](pipeline_framework::ActorEntity) trait,
//! allowing it to be owned by a [`ResourceActor`](pipeline_framework::ResourceActor).
//! Status changes go through [`OrderAction`]s so that every transition is checked and
//! applied in one place.

use crate::order_actor::OrderError;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt::Display;
use std::time::Duration;

/// Type-safe identifier for Orders.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderId(pub u32);

impl From<u32> for OrderId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

impl Display for OrderId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "order_{}", self.0)
    }
}

/// Order state machine: `Pending → Processing → Paid → Shipped → Delivered`, with
/// `Cancelled` reachable from any state that is not final.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum OrderStatus {
    Pending,
    Processing,
    Paid,
    Shipped,
    Delivered,
    Cancelled,
}

impl OrderStatus {
    pub const ALL: [OrderStatus; 6] = [
        OrderStatus::Pending,
        OrderStatus::Processing,
        OrderStatus::Paid,
        OrderStatus::Shipped,
        OrderStatus::Delivered,
        OrderStatus::Cancelled,
    ];

    pub fn can_advance_to(self, next: OrderStatus) -> bool {
        use OrderStatus::*;
        match next {
            Cancelled => !self.is_final(),
            _ => matches!(
                (self, next),
                (Pending, Processing) | (Processing, Paid) | (Paid, Shipped) | (Shipped, Delivered)
            ),
        }
    }

    /// No transition leaves this status.
    pub fn is_final(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }

    /// The pipeline has nothing left to do for the order.
    pub fn is_settled(self) -> bool {
        matches!(
            self,
            OrderStatus::Shipped | OrderStatus::Delivered | OrderStatus::Cancelled
        )
    }

    /// Somewhere between validation and shipping.
    pub fn is_active(self) -> bool {
        matches!(self, OrderStatus::Processing | OrderStatus::Paid)
    }

    pub fn label(self) -> &'static str {
        match self {
            OrderStatus::Pending => "Pending",
            OrderStatus::Processing => "Processing",
            OrderStatus::Paid => "Paid",
            OrderStatus::Shipped => "Shipped",
            OrderStatus::Delivered => "Delivered",
            OrderStatus::Cancelled => "Cancelled",
        }
    }
}

impl Display for OrderStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Periodic readers of the registry. An order is dropped from the registry once every
/// observer has seen it in a final status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Observer {
    Reporter,
    Monitor,
}

#[derive(Debug, Clone, Serialize)]
pub struct Order {
    pub id: OrderId,
    pub customer: String,
    pub items: Vec<String>,
    pub total: f64,
    pub status: OrderStatus,
    /// Every status the order has held, oldest first.
    pub history: Vec<OrderStatus>,
    pub created_at: DateTime<Utc>,
    /// Set once, by the first settling transition.
    pub completed_at: Option<DateTime<Utc>>,
    pub cancel_cause: Option<String>,
    #[serde(skip)]
    seen_by_reporter: bool,
    #[serde(skip)]
    seen_by_monitor: bool,
}

/// Payload for creating a new order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderCreate {
    pub customer: String,
    pub items: Vec<String>,
    pub total: f64,
}

impl OrderCreate {
    pub fn new(customer: impl Into<String>, items: &[&str], total: f64) -> Self {
        Self {
            customer: customer.into(),
            items: items.iter().map(|item| item.to_string()).collect(),
            total,
        }
    }
}

/// Status changes requested of the registry.
#[derive(Debug, Clone)]
pub enum OrderAction {
    Advance(OrderStatus),
    Cancel { cause: String },
}

/// What a successful transition did.
#[derive(Debug, Clone)]
pub struct Transition {
    pub from: OrderStatus,
    /// The order as it is after the transition.
    pub order: Order,
    /// This transition was the one that settled the order.
    pub settled_now: bool,
}

impl Order {
    pub fn new(id: OrderId, params: OrderCreate) -> Self {
        Self {
            id,
            customer: params.customer,
            items: params.items,
            total: params.total,
            status: OrderStatus::Pending,
            history: vec![OrderStatus::Pending],
            created_at: Utc::now(),
            completed_at: None,
            cancel_cause: None,
            seen_by_reporter: false,
            seen_by_monitor: false,
        }
    }

    /// Move to `next`, stamping the completion time if this settles the order.
    pub fn transition(&mut self, next: OrderStatus) -> Result<Transition, OrderError> {
        let from = self.status;
        if !from.can_advance_to(next) {
            return Err(OrderError::InvalidTransition {
                id: self.id.to_string(),
                from,
                to: next,
            });
        }

        self.status = next;
        self.history.push(next);
        let settled_now = !from.is_settled() && next.is_settled();
        if next.is_settled() && self.completed_at.is_none() {
            // Clock adjustments must not put completion before creation.
            self.completed_at = Some(Utc::now().max(self.created_at));
        }

        Ok(Transition {
            from,
            order: self.clone(),
            settled_now,
        })
    }

    /// Time from creation to settlement.
    pub fn processing_time(&self) -> Option<Duration> {
        let completed = self.completed_at?;
        (completed - self.created_at).to_std().ok()
    }

    /// Record that `observer` has seen the order. Only a final order counts as seen, so a
    /// shipped order stays until it is delivered or cancelled.
    pub fn mark_observed(&mut self, observer: Observer) {
        if !self.status.is_final() {
            return;
        }
        match observer {
            Observer::Reporter => self.seen_by_reporter = true,
            Observer::Monitor => self.seen_by_monitor = true,
        }
    }

    pub fn observed_by_all(&self) -> bool {
        self.seen_by_reporter && self.seen_by_monitor
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn order() -> Order {
        Order::new(OrderId(1), OrderCreate::new("Ada", &["keyboard"], 120.0))
    }

    #[test]
    fn forward_path_is_the_only_path() {
        use OrderStatus::*;
        assert!(Pending.can_advance_to(Processing));
        assert!(Paid.can_advance_to(Shipped));
        assert!(Shipped.can_advance_to(Delivered));
        assert!(!Pending.can_advance_to(Paid));
        assert!(!Shipped.can_advance_to(Paid));
        assert!(!Processing.can_advance_to(Pending));
    }

    #[test]
    fn cancellation_is_reachable_until_final() {
        for status in OrderStatus::ALL {
            assert_eq!(
                status.can_advance_to(OrderStatus::Cancelled),
                !status.is_final(),
                "{status}"
            );
        }
    }

    #[test]
    fn completion_is_stamped_once() {
        let mut order = order();
        order.transition(OrderStatus::Processing).unwrap();
        assert!(order.completed_at.is_none());
        order.transition(OrderStatus::Paid).unwrap();

        let shipped = order.transition(OrderStatus::Shipped).unwrap();
        assert!(shipped.settled_now);
        let stamped = order.completed_at.unwrap();
        assert!(stamped >= order.created_at);

        let delivered = order.transition(OrderStatus::Delivered).unwrap();
        assert!(!delivered.settled_now);
        assert_eq!(order.completed_at, Some(stamped));
        assert_eq!(
            order.history,
            vec![
                OrderStatus::Pending,
                OrderStatus::Processing,
                OrderStatus::Paid,
                OrderStatus::Shipped,
                OrderStatus::Delivered
            ]
        );
    }

    #[test]
    fn rejected_transition_leaves_order_untouched() {
        let mut order = order();
        let err = order.transition(OrderStatus::Shipped).unwrap_err();
        assert_eq!(
            err,
            OrderError::InvalidTransition {
                id: "order_1".into(),
                from: OrderStatus::Pending,
                to: OrderStatus::Shipped,
            }
        );
        assert_eq!(order.status, OrderStatus::Pending);
        assert_eq!(order.history.len(), 1);
    }

    #[test]
    fn only_final_orders_are_observed() {
        let mut order = order();
        order.mark_observed(Observer::Reporter);
        order.mark_observed(Observer::Monitor);
        assert!(!order.observed_by_all());

        for status in [OrderStatus::Processing, OrderStatus::Paid, OrderStatus::Shipped] {
            order.transition(status).unwrap();
        }
        order.mark_observed(Observer::Reporter);
        order.mark_observed(Observer::Monitor);
        assert!(!order.observed_by_all());

        order.transition(OrderStatus::Delivered).unwrap();
        order.mark_observed(Observer::Reporter);
        assert!(!order.observed_by_all());
        order.mark_observed(Observer::Monitor);
        assert!(order.observed_by_all());
    }
}
