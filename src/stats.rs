//! # Statistics Aggregator
//!
//! Lock-free counters shared by the registry, the pipeline stages and the reporters.
//!
//! Every counter is an independent atomic, so a [`StatsSnapshot`] is a read of each field
//! at slightly different instants rather than one linearizable cut. Increments are never
//! lost: the final value always equals the number of increments made.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

#[derive(Debug)]
pub struct StatisticsAggregator {
    started: Instant,
    started_at: DateTime<Utc>,
    orders_submitted: AtomicU64,
    orders_processed: AtomicU64,
    orders_cancelled: AtomicU64,
    payments_processed: AtomicU64,
    notifications_sent: AtomicU64,
    notifications_failed: AtomicU64,
    processing_time_us: AtomicU64,
}

impl Default for StatisticsAggregator {
    fn default() -> Self {
        Self::new()
    }
}

impl StatisticsAggregator {
    pub fn new() -> Self {
        Self {
            started: Instant::now(),
            started_at: Utc::now(),
            orders_submitted: AtomicU64::new(0),
            orders_processed: AtomicU64::new(0),
            orders_cancelled: AtomicU64::new(0),
            payments_processed: AtomicU64::new(0),
            notifications_sent: AtomicU64::new(0),
            notifications_failed: AtomicU64::new(0),
            processing_time_us: AtomicU64::new(0),
        }
    }

    pub fn increment_orders_submitted(&self) {
        self.orders_submitted.fetch_add(1, Ordering::Relaxed);
    }

    /// An order reached `Shipped`.
    pub fn increment_orders_processed(&self) {
        self.orders_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_orders_cancelled(&self) {
        self.orders_cancelled.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_payments_processed(&self) {
        self.payments_processed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_notifications_sent(&self) {
        self.notifications_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn increment_notifications_failed(&self) {
        self.notifications_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn add_processing_time(&self, elapsed: Duration) {
        let micros = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX);
        self.processing_time_us.fetch_add(micros, Ordering::Relaxed);
    }

    pub fn snapshot(&self) -> StatsSnapshot {
        StatsSnapshot {
            orders_submitted: self.orders_submitted.load(Ordering::Relaxed),
            orders_completed: self.orders_processed.load(Ordering::Relaxed),
            orders_cancelled: self.orders_cancelled.load(Ordering::Relaxed),
            payments_completed: self.payments_processed.load(Ordering::Relaxed),
            notifications_sent: self.notifications_sent.load(Ordering::Relaxed),
            notifications_failed: self.notifications_failed.load(Ordering::Relaxed),
            processing_time: Duration::from_micros(self.processing_time_us.load(Ordering::Relaxed)),
            started_at: self.started_at,
            uptime: self.started.elapsed(),
        }
    }
}

/// Point-in-time read of the aggregated counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct StatsSnapshot {
    pub orders_submitted: u64,
    pub orders_completed: u64,
    pub orders_cancelled: u64,
    pub payments_completed: u64,
    pub notifications_sent: u64,
    pub notifications_failed: u64,
    /// Sum of creation-to-shipping time over completed orders.
    #[serde(with = "pipeline_framework::duration_ms")]
    pub processing_time: Duration,
    /// When the aggregator was created.
    pub started_at: DateTime<Utc>,
    #[serde(with = "pipeline_framework::duration_ms")]
    pub uptime: Duration,
}

impl StatsSnapshot {
    pub fn average_processing_time(&self) -> Option<Duration> {
        let completed = u32::try_from(self.orders_completed).ok()?;
        self.processing_time.checked_div(completed)
    }

    /// Completed orders per second of uptime.
    pub fn throughput_per_sec(&self) -> f64 {
        let secs = self.uptime.as_secs_f64();
        if secs > 0.0 {
            self.orders_completed as f64 / secs
        } else {
            0.0
        }
    }

    /// Orders neither completed nor cancelled yet.
    pub fn in_flight(&self) -> u64 {
        self.orders_submitted
            .saturating_sub(self.orders_completed + self.orders_cancelled)
    }
}

impl Display for StatsSnapshot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} submitted, {} completed, {} cancelled, {} payments, \
             {} notifications sent ({} failed)",
            self.orders_submitted,
            self.orders_completed,
            self.orders_cancelled,
            self.payments_completed,
            self.notifications_sent,
            self.notifications_failed
        )?;
        if let Some(average) = self.average_processing_time() {
            write!(f, ", avg {}ms per order", average.as_millis())?;
        }
        Ok(())
    }
}
