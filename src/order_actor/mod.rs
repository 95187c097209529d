//! # Order Registry
//!
//! The registry is a [`ResourceActor<Order>`] that owns every order for its processing
//! lifetime. Coordinator, reporter and monitor all go through an [`OrderClient`], so each
//! status change is a single message and readers always see whole orders.
//!
//! ## Structure
//!
//! - [`entity`] - [`ActorEntity`](pipeline_framework::ActorEntity) implementation for
//!   [`Order`], including the statistics side effects of each transition
//! - [`error`] - [`OrderError`]
//! - [`new()`] - creates the actor and its client
//!
//! ## Usage
//!
//! ```rust
//! use order_pipeline::model::{OrderCreate, OrderStatus};
//! use order_pipeline::order_actor::{self, OrderContext};
//! use order_pipeline::pipeline::EventSink;
//! use order_pipeline::stats::StatisticsAggregator;
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let (actor, orders) = order_actor::new(32);
//!     let stats = Arc::new(StatisticsAggregator::new());
//!     tokio::spawn(actor.run(OrderContext { stats: stats.clone(), events: EventSink::new(16) }));
//!
//!     let id = orders.create_order(OrderCreate::new("Ada", &["lamp"], 40.0)).await?;
//!     orders.advance(id, OrderStatus::Processing).await?;
//!     assert_eq!(orders.get_order(id).await?.status, OrderStatus::Processing);
//!     assert_eq!(stats.snapshot().orders_submitted, 1);
//!     Ok(())
//! }
//! ```

pub mod entity;
pub mod error;

pub use entity::OrderContext;
pub use error::*;

use crate::clients::OrderClient;
use crate::model::Order;
use pipeline_framework::ResourceActor;

/// Creates a new Order registry actor and its client.
pub fn new(buffer_size: usize) -> (ResourceActor<Order>, OrderClient) {
    let (actor, generic_client) = ResourceActor::new(buffer_size);
    (actor, OrderClient::new(generic_client))
}
