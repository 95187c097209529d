//! # Pipeline Events
//!
//! Progress is published as discrete [`PipelineEvent`]s on a broadcast channel. The core
//! never depends on whether anyone renders them; with no subscriber, events are dropped.

use super::Stage;
use crate::model::{OrderId, OrderStatus};
use crate::monitor::Sample;
use crate::reporter::Report;
use serde::Serialize;
use std::fmt::Display;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::trace;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum PipelineEvent {
    Progress {
        order: OrderId,
        stage: Stage,
        message: String,
    },
    StatusChanged {
        order: OrderId,
        from: OrderStatus,
        to: OrderStatus,
    },
    OrderSettled {
        order: OrderId,
        status: OrderStatus,
        #[serde(with = "pipeline_framework::duration_ms")]
        elapsed: Duration,
        cause: Option<String>,
    },
    Report(Report),
    Sample(Sample),
}

impl PipelineEvent {
    /// The order the event is about, if any.
    pub fn order(&self) -> Option<OrderId> {
        match self {
            PipelineEvent::Progress { order, .. }
            | PipelineEvent::StatusChanged { order, .. }
            | PipelineEvent::OrderSettled { order, .. } => Some(*order),
            PipelineEvent::Report(_) | PipelineEvent::Sample(_) => None,
        }
    }
}

impl Display for PipelineEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PipelineEvent::Progress {
                order,
                stage,
                message,
            } => write!(f, "[{order}] {stage}: {message}"),
            PipelineEvent::StatusChanged { order, from, to } => {
                write!(f, "[{order}] {from} -> {to}")
            }
            PipelineEvent::OrderSettled {
                order,
                status,
                elapsed,
                cause,
            } => {
                write!(f, "[{order}] settled as {status} after {}ms", elapsed.as_millis())?;
                if let Some(cause) = cause {
                    write!(f, " ({cause})")?;
                }
                Ok(())
            }
            PipelineEvent::Report(report) => Display::fmt(report, f),
            PipelineEvent::Sample(sample) => Display::fmt(sample, f),
        }
    }
}

/// Publishing side of the event channel. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    sender: broadcast::Sender<PipelineEvent>,
}

impl EventSink {
    /// Slow subscribers lag once `capacity` events are buffered.
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn emit(&self, event: PipelineEvent) {
        if let Err(broadcast::error::SendError(event)) = self.sender.send(event) {
            trace!(%event, "No subscribers");
        }
    }

    pub fn progress(&self, order: OrderId, stage: Stage, message: impl Into<String>) {
        self.emit(PipelineEvent::Progress {
            order,
            stage,
            message: message.into(),
        });
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.sender.subscribe()
    }
}
