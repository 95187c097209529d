//! # Scheduled Reporter
//!
//! A background task that, once per interval, reads the statistics and the order registry
//! and publishes a [`Report`] as a [`PipelineEvent::Report`].
//!
//! Reading the registry goes through a scan as [`Observer::Reporter`], which is half of
//! what lets the registry evict delivered and cancelled orders.

use crate::clients::OrderClient;
use crate::model::{Observer, Order};
use crate::order_actor::OrderError;
use crate::pipeline::{EventSink, PipelineEvent};
use crate::stats::{StatisticsAggregator, StatsSnapshot};
use chrono::{DateTime, Utc};
use pipeline_framework::{ActorClient, CancelSource, CancelToken};
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ScheduleError {
    #[error("reporting is already running")]
    AlreadyRunning,

    #[error("reporting is not running")]
    NotRunning,

    #[error("report interval must be positive")]
    InvalidInterval,
}

/// One periodic performance report.
#[derive(Debug, Clone, Serialize)]
pub struct Report {
    pub sequence: u64,
    pub at: DateTime<Utc>,
    pub stats: StatsSnapshot,
    /// Orders in `Processing` or `Paid`.
    pub active_orders: usize,
    /// Orders the registry still holds, settled ones included.
    pub tracked_orders: usize,
}

impl Report {
    pub fn compile(sequence: u64, stats: StatsSnapshot, orders: &[Order]) -> Self {
        Self {
            sequence,
            at: Utc::now(),
            stats,
            active_orders: orders.iter().filter(|o| o.status.is_active()).count(),
            tracked_orders: orders.len(),
        }
    }
}

impl Display for Report {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let stats = &self.stats;
        writeln!(
            f,
            "=== Performance report #{} ({}) ===",
            self.sequence,
            self.at.format("%H:%M:%S%.3f")
        )?;
        writeln!(
            f,
            "orders: {} submitted, {} completed, {} cancelled, {} active, {} tracked",
            stats.orders_submitted,
            stats.orders_completed,
            stats.orders_cancelled,
            self.active_orders,
            self.tracked_orders
        )?;
        writeln!(
            f,
            "payments: {}, notifications: {} sent, {} failed",
            stats.payments_completed, stats.notifications_sent, stats.notifications_failed
        )?;
        write!(
            f,
            "uptime: {:.1}s since {}, throughput: {:.2} orders/s",
            stats.uptime.as_secs_f64(),
            stats.started_at.format("%H:%M:%S"),
            stats.throughput_per_sec()
        )?;
        if let Some(average) = stats.average_processing_time() {
            write!(f, ", avg processing: {}ms", average.as_millis())?;
        }
        Ok(())
    }
}

#[derive(Clone)]
struct ReportSource {
    orders: OrderClient,
    stats: Arc<StatisticsAggregator>,
    events: EventSink,
    emitted: Arc<AtomicU64>,
}

impl ReportSource {
    async fn report(&self) -> Result<Report, OrderError> {
        let orders = self.orders.scan(Some(Observer::Reporter)).await?;
        let sequence = self.emitted.fetch_add(1, Ordering::SeqCst) + 1;
        Ok(Report::compile(sequence, self.stats.snapshot(), &orders))
    }

    async fn run(self, period: Duration, stop: CancelToken) {
        let mut ticks = tokio::time::interval_at(Instant::now() + period, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);
        loop {
            tokio::select! {
                biased;
                _ = stop.cancelled() => break,
                _ = ticks.tick() => {}
            }
            match self.report().await {
                Ok(report) => {
                    info!(
                        sequence = report.sequence,
                        active = report.active_orders,
                        "{}",
                        report.stats
                    );
                    self.events.emit(PipelineEvent::Report(report));
                }
                Err(e) => warn!(error = %e, "Report skipped"),
            }
        }
    }
}

struct Running {
    stop: CancelSource,
    task: JoinHandle<()>,
}

pub struct ScheduledReporter {
    source: ReportSource,
    running: Mutex<Option<Running>>,
}

impl ScheduledReporter {
    pub fn new(orders: OrderClient, stats: Arc<StatisticsAggregator>, events: EventSink) -> Self {
        Self {
            source: ReportSource {
                orders,
                stats,
                events,
                emitted: Arc::new(AtomicU64::new(0)),
            },
            running: Mutex::new(None),
        }
    }

    /// Start reporting every `interval`, first report one interval from now.
    pub fn start(&self, interval: Duration) -> Result<(), ScheduleError> {
        if interval.is_zero() {
            return Err(ScheduleError::InvalidInterval);
        }
        let mut running = self.running.lock().unwrap_or_else(|p| p.into_inner());
        if running.as_ref().is_some_and(|r| !r.task.is_finished()) {
            return Err(ScheduleError::AlreadyRunning);
        }

        let stop = CancelSource::new();
        let task = tokio::spawn(self.source.clone().run(interval, stop.token()));
        *running = Some(Running { stop, task });
        info!(interval_ms = interval.as_millis() as u64, "Reporting started");
        Ok(())
    }

    /// Stop reporting. A report already being compiled is finished first; none is emitted
    /// after this returns.
    pub async fn stop(&self) -> Result<(), ScheduleError> {
        let running = self
            .running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .take()
            .ok_or(ScheduleError::NotRunning)?;
        running.stop.cancel();
        if let Err(e) = running.task.await {
            error!(error = %e, "Reporter task failed");
        }
        info!(emitted = self.reports_emitted(), "Reporting stopped");
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.running
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .as_ref()
            .is_some_and(|r| !r.task.is_finished())
    }

    pub fn reports_emitted(&self) -> u64 {
        self.source.emitted.load(Ordering::SeqCst)
    }

    /// Compile a report right away, outside the schedule.
    pub async fn report_now(&self) -> Result<Report, OrderError> {
        self.source.report().await
    }
}
