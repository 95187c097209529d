//! # Order Pipeline
//!
//! Carries each order from `Pending` to `Shipped`, or settles it as `Cancelled`.
//!
//! ## Modules
//!
//! - [`coordinator`] - Admission, cancellation and pool shutdown
//! - [`stages`] - The per-order stage sequence and its compensation
//! - [`events`] - Progress events on a broadcast channel
//! - [`error`] - [`Stage`] and the [`PipelineError`] taxonomy

pub mod coordinator;
pub mod error;
pub mod events;
pub mod stages;

pub use coordinator::{OrderHandle, PipelineCoordinator};
pub use error::{PipelineError, Stage};
pub use events::{EventSink, PipelineEvent};
pub use stages::OrderOutcome;
