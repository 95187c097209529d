//! Error types for the Order registry.

use crate::model::OrderStatus;
use pipeline_framework::FrameworkError;
use thiserror::Error;

/// Errors that can occur during order registry operations.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum OrderError {
    /// The requested order was not found (never created, or already archived).
    #[error("Order not found: {0}")]
    NotFound(String),

    /// The state machine does not allow this status change.
    #[error("Order {id} cannot move from {from} to {to}")]
    InvalidTransition {
        id: String,
        from: OrderStatus,
        to: OrderStatus,
    },

    /// An error occurred while communicating with the registry actor.
    #[error("Actor communication error: {0}")]
    ActorCommunicationError(String),
}

impl From<FrameworkError> for OrderError {
    fn from(e: FrameworkError) -> Self {
        match e {
            FrameworkError::NotFound(id) => OrderError::NotFound(id),
            other => other
                .into_entity_error::<OrderError>()
                .unwrap_or_else(|e| OrderError::ActorCommunicationError(e.to_string())),
        }
    }
}
