//! Error types for the pipeline coordinator.

use crate::model::OrderId;
use crate::order_actor::OrderError;
use pipeline_framework::PoolError;
use serde::Serialize;
use std::fmt::Display;
use std::time::Duration;
use thiserror::Error;

/// The ordered steps of order processing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum Stage {
    Validate,
    InventoryCheck,
    Payment,
    Notification,
    InventoryUpdate,
    /// Rolling back a failed order. Not a pipeline step; labels the locks it takes.
    Compensation,
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Stage::Validate => "validate",
            Stage::InventoryCheck => "inventory check",
            Stage::Payment => "payment",
            Stage::Notification => "notification",
            Stage::InventoryUpdate => "inventory update",
            Stage::Compensation => "compensation",
        })
    }
}

fn during(stage: &Option<Stage>) -> String {
    stage.map(|s| format!(" during {s}")).unwrap_or_default()
}

/// Why an order did not reach `Shipped`.
#[derive(Debug, Clone, Error, PartialEq)]
pub enum PipelineError {
    /// Cooperative cancellation was observed. The stage is unknown when the order task was
    /// dropped by its pool before it could notice.
    #[error("{order} interrupted{}", during(.stage))]
    InterruptedWork { order: OrderId, stage: Option<Stage> },

    /// A bounded wait (lock, join, drain) ran past its deadline.
    #[error("gave up on {resource} after {waited:?}")]
    ResourceTimeout { resource: String, waited: Duration },

    /// A pool refused the work under the reject-with-error policy.
    #[error("pool '{pool}' is saturated")]
    QueueSaturation { pool: String },

    /// Any other stage-local failure, such as a declined payment.
    #[error("{order} failed during {stage}: {reason}")]
    StageFailure {
        order: OrderId,
        stage: Stage,
        reason: String,
    },

    #[error("pipeline is shutting down")]
    ShuttingDown,

    #[error(transparent)]
    Registry(#[from] OrderError),
}

impl PipelineError {
    pub(crate) fn from_pool(e: PoolError, order: OrderId, stage: Option<Stage>) -> Self {
        match e {
            PoolError::QueueSaturation { pool } => PipelineError::QueueSaturation { pool },
            PoolError::Cancelled => PipelineError::InterruptedWork { order, stage },
            PoolError::ShutDown { .. } => PipelineError::ShuttingDown,
            PoolError::Panicked(reason) | PoolError::InvalidConfig(reason) => {
                PipelineError::StageFailure {
                    order,
                    stage: stage.unwrap_or(Stage::Validate),
                    reason,
                }
            }
        }
    }

    /// Short name of the failure kind, for logs and tallies.
    pub fn kind(&self) -> &'static str {
        match self {
            PipelineError::InterruptedWork { .. } => "interrupted",
            PipelineError::ResourceTimeout { .. } => "resource-timeout",
            PipelineError::QueueSaturation { .. } => "queue-saturation",
            PipelineError::StageFailure { .. } => "stage-failure",
            PipelineError::ShuttingDown => "shutting-down",
            PipelineError::Registry(_) => "registry",
        }
    }
}
