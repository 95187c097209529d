//! # Lifecycle
//!
//! [`OrderSystem`] wires the registry, the coordinator, the reporter and the monitor
//! together, and owns the shutdown sequence.

pub mod order_system;

pub use order_system::{OrderSystem, ShutdownReport};
