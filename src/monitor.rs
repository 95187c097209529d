//! # System Monitor
//!
//! Samples the order registry at a fixed interval for a bounded number of samples. A
//! sample's sequence number is derived from the time elapsed since the monitor started, so
//! a tick lost to scheduler delay, or a failed scan, shows up as a gap rather than an error.

use crate::clients::OrderClient;
use crate::model::{Observer, Order, OrderStatus};
use crate::order_actor::OrderError;
use crate::pipeline::{EventSink, PipelineEvent};
use crate::stats::StatisticsAggregator;
use chrono::{DateTime, Utc};
use pipeline_framework::{ActorClient, CancelSource, CancelToken};
use serde::Serialize;
use std::fmt::Display;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Sample {
    pub sequence: u64,
    pub at: DateTime<Utc>,
    /// `Processing` or `Paid`.
    pub active: usize,
    pub pending: usize,
    /// Shipped, delivered or cancelled, and still in the registry.
    pub settled: usize,
    pub shipped: usize,
    pub cancelled: usize,
    /// Orders completed since startup, evicted ones included.
    pub completed_total: u64,
}

impl Sample {
    pub fn compile(sequence: u64, orders: &[Order], completed_total: u64) -> Self {
        let count = |pred: fn(OrderStatus) -> bool| {
            orders.iter().filter(|o| pred(o.status)).count()
        };
        Self {
            sequence,
            at: Utc::now(),
            active: count(OrderStatus::is_active),
            pending: count(|s| s == OrderStatus::Pending),
            settled: count(OrderStatus::is_settled),
            shipped: count(|s| matches!(s, OrderStatus::Shipped | OrderStatus::Delivered)),
            cancelled: count(|s| s == OrderStatus::Cancelled),
            completed_total,
        }
    }
}

impl Display for Sample {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "[monitor #{}] active: {}, pending: {}, shipped: {}, cancelled: {}, \
             completed total: {}",
            self.sequence,
            self.active,
            self.pending,
            self.shipped,
            self.cancelled,
            self.completed_total
        )
    }
}

/// Starts sampling loops. Cheap to clone.
#[derive(Clone)]
pub struct SystemMonitor {
    orders: OrderClient,
    stats: Arc<StatisticsAggregator>,
    events: EventSink,
    root: Arc<CancelSource>,
}

impl SystemMonitor {
    pub fn new(orders: OrderClient, stats: Arc<StatisticsAggregator>, events: EventSink) -> Self {
        Self {
            orders,
            stats,
            events,
            root: Arc::new(CancelSource::new()),
        }
    }

    /// Take up to `samples` samples, one per `interval`, the first one interval from now.
    pub fn start(&self, interval: Duration, samples: u64) -> MonitorHandle {
        let interval = interval.max(Duration::from_millis(1));
        let stop = CancelSource::child_of(&self.root.token());
        let task = tokio::spawn(self.clone().run(interval, samples, stop.token()));
        info!(interval_ms = interval.as_millis() as u64, samples, "Monitoring started");
        MonitorHandle { task, stop }
    }

    /// Stop every sampling loop started so far and any started later.
    pub fn stop_all(&self) {
        self.root.cancel();
    }

    async fn sample(&self, sequence: u64) -> Result<Sample, OrderError> {
        let orders = self.orders.scan(Some(Observer::Monitor)).await?;
        Ok(Sample::compile(
            sequence,
            &orders,
            self.stats.snapshot().orders_completed,
        ))
    }

    async fn run(self, interval: Duration, count: u64, stop: CancelToken) -> Vec<Sample> {
        let started = Instant::now();
        let mut ticks = tokio::time::interval_at(started + interval, interval);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut samples = Vec::new();
        let mut last = 0;
        while last < count {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticks.tick() => {}
            }
            let elapsed = (started.elapsed().as_nanos() / interval.as_nanos()) as u64;
            let sequence = elapsed.max(last + 1);
            if sequence > count {
                break;
            }
            if sequence > last + 1 {
                debug!(missed = sequence - last - 1, "Monitor fell behind");
            }
            last = sequence;

            match self.sample(sequence).await {
                Ok(sample) => {
                    self.events.emit(PipelineEvent::Sample(sample.clone()));
                    samples.push(sample);
                }
                Err(e) => warn!(sequence, error = %e, "Sample skipped"),
            }
        }
        info!(taken = samples.len(), "Monitoring finished");
        samples
    }
}

/// Resolves to the samples taken once the loop ends.
pub struct MonitorHandle {
    task: JoinHandle<Vec<Sample>>,
    stop: CancelSource,
}

impl MonitorHandle {
    /// End the loop early. Samples taken so far are still returned.
    pub fn stop(&self) {
        self.stop.cancel();
    }
}

impl Future for MonitorHandle {
    type Output = Vec<Sample>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        Pin::new(&mut self.task).poll(cx).map(|joined| {
            joined.unwrap_or_else(|e| {
                error!(error = %e, "Monitor task failed");
                Vec::new()
            })
        })
    }
}
