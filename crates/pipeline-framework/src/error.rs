//! # Framework Errors
//!
//! Error types shared by the registry actor and the worker pool. Domain crates
//! wrap these in their own error enums at the client boundary.

/// Errors raised by the registry actor plumbing.
#[derive(Debug, thiserror::Error)]
pub enum FrameworkError {
    #[error("Actor closed")]
    ActorClosed,
    #[error("Actor dropped response channel")]
    ActorDropped,
    #[error("Item not found: {0}")]
    NotFound(String),
    #[error("Entity error: {0}")]
    EntityError(Box<dyn std::error::Error + Send + Sync>),
}

impl FrameworkError {
    /// Recovers the entity's own error type, if this error carries one.
    pub fn into_entity_error<E>(self) -> Result<E, Self>
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        match self {
            FrameworkError::EntityError(inner) => match inner.downcast::<E>() {
                Ok(err) => Ok(*err),
                Err(other) => Err(FrameworkError::EntityError(other)),
            },
            other => Err(other),
        }
    }
}

/// Errors raised by [`WorkerPool`](crate::pool::WorkerPool) submissions and task handles.
#[derive(Debug, Clone, thiserror::Error, PartialEq, Eq)]
pub enum PoolError {
    /// The queue is full, all workers are busy and the policy is reject-with-error.
    #[error("Pool '{pool}' is saturated")]
    QueueSaturation { pool: String },

    /// The task was evicted, drained at shutdown or forcibly aborted.
    #[error("Task cancelled before completion")]
    Cancelled,

    /// The pool no longer accepts work.
    #[error("Pool '{pool}' is shut down")]
    ShutDown { pool: String },

    /// The task panicked while running.
    #[error("Task panicked: {0}")]
    Panicked(String),

    #[error("Invalid pool configuration: {0}")]
    InvalidConfig(String),
}
