//! # Order Pipeline
//!
//! > **A concurrent order-fulfillment pipeline built on resource-oriented actors.**
//!
//! Orders pass through a fixed sequence of stages (validation, inventory check, payment,
//! notification fan-out, inventory update). Each stage contends for shared resources, and
//! the work runs on bounded worker pools with backpressure, while a reporter and a monitor
//! watch the system from the side.
//!
//! ## 🏗️ Design
//!
//! ### One owner per piece of state
//! - **Orders** live in a registry actor ([`order_actor`]). Every status change is a message,
//!   so concurrent readers never see a half-updated order.
//! - **Shared resources** (inventory ledger, payment gateway, notification outbox) live
//!   behind one async mutex each in the [`locks::ResourceLockManager`]. Domains are always
//!   acquired in the order `Inventory → Payment → Notification`.
//! - **Counters** are atomics in [`stats::StatisticsAggregator`]; reads never block writers.
//!
//! ### Bounded concurrency
//! The [`pipeline::PipelineCoordinator`] runs each order as one task on the order pool and
//! fans out notifications and inventory updates to two more pools. A full pool applies its
//! [`OverflowPolicy`](pipeline_framework::OverflowPolicy): run on the caller, reject with
//! [`pipeline::PipelineError::QueueSaturation`], or discard the oldest queued task.
//!
//! ### Cooperative cancellation
//! Orders observe a cancellation token between stages and during every wait. A failed or
//! cancelled order releases its reservation, is refunded, and settles as `Cancelled` with
//! the cause recorded. Failures never affect other orders.
//!
//! ## 🗺️ Module Tour
//!
//! - [`model`] - `Order`, `OrderStatus` and the transition rules
//! - [`order_actor`] / [`clients`] - the order registry and its typed client
//! - [`resources`] / [`locks`] - the shared resources and their lock discipline
//! - [`pipeline`] - coordinator, stages, events and the error taxonomy
//! - [`stats`], [`reporter`], [`monitor`] - counters, periodic reports, sampling
//! - [`config`] - serde configuration with defaults for every field
//! - [`lifecycle`] - [`OrderSystem`](lifecycle::OrderSystem), which wires it all together
//!
//! ## 🚀 Quick Start
//!
//! ```bash
//! # Run the demo with info logs
//! RUST_LOG=info cargo run
//!
//! # Use a config file
//! ORDER_PIPELINE_CONFIG=pipeline.json cargo run
//! ```

pub mod clients;
pub mod config;
pub mod lifecycle;
pub mod locks;
pub mod model;
pub mod monitor;
pub mod order_actor;
pub mod pipeline;
pub mod reporter;
pub mod resources;
pub mod stats;
