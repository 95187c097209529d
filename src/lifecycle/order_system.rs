use crate::clients::OrderClient;
use crate::config::{ConfigError, PipelineConfig};
use crate::locks::{LockAudit, ResourceLockManager};
use crate::model::{Order, OrderCreate, OrderId, Transition};
use crate::monitor::{MonitorHandle, SystemMonitor};
use crate::order_actor::{self, OrderContext, OrderError};
use crate::pipeline::{EventSink, OrderHandle, PipelineCoordinator, PipelineError, PipelineEvent};
use crate::reporter::{ScheduleError, ScheduledReporter};
use crate::resources::{InventoryLedger, NotificationOutbox, PaymentGateway};
use crate::stats::{StatisticsAggregator, StatsSnapshot};
use pipeline_framework::{PoolShutdownReport, PoolStatus};
use serde::Serialize;
use std::fmt::Display;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

const REGISTRY_STOP_TIMEOUT: Duration = Duration::from_secs(2);

/// The running order-fulfillment system.
///
/// `OrderSystem` is responsible for:
/// - **Wiring**: the registry actor, the shared resources behind the lock manager, the
///   three worker pools, the reporter and the monitor
/// - **Submission**: [`submit_order`](Self::submit_order) hands orders to the coordinator
/// - **Shutdown**: [`shutdown`](Self::shutdown) settles every order and stops every task
///
/// # Example
///
/// ```no_run
/// use order_pipeline::config::PipelineConfig;
/// use order_pipeline::lifecycle::OrderSystem;
/// use order_pipeline::model::OrderCreate;
/// use std::time::Duration;
///
/// # async fn demo() -> Result<(), Box<dyn std::error::Error>> {
/// let system = OrderSystem::new(PipelineConfig::default())?;
/// system.start_reporting(Duration::from_secs(1))?;
///
/// let handle = system
///     .submit_order(OrderCreate::new("Ada", &["laptop", "mouse"], 1299.0))
///     .await?;
/// let outcome = handle.await?;
/// println!("{} is {}", outcome.id, outcome.status);
///
/// let report = system.shutdown(Duration::from_secs(5)).await;
/// assert_eq!(report.completed + report.cancelled, report.submitted);
/// # Ok(())
/// # }
/// ```
pub struct OrderSystem {
    config: PipelineConfig,
    orders: OrderClient,
    coordinator: PipelineCoordinator,
    reporter: ScheduledReporter,
    monitor: SystemMonitor,
    stats: Arc<StatisticsAggregator>,
    events: EventSink,
    registry: JoinHandle<()>,
}

/// What [`OrderSystem::shutdown`] found and did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ShutdownReport {
    pub submitted: u64,
    pub completed: u64,
    pub cancelled: u64,
    /// Orders settled by the final sweep because their task never finished.
    pub forced: u64,
    pub pools: Vec<PoolShutdownReport>,
}

impl Display for ShutdownReport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} submitted, {} completed, {} cancelled ({} at shutdown)",
            self.submitted, self.completed, self.cancelled, self.forced
        )?;
        for pool in &self.pools {
            write!(
                f,
                "\n  pool '{}': {} tasks, {} completed, {} cancelled, {} forced",
                pool.pool, pool.submitted, pool.completed, pool.cancelled, pool.forced
            )?;
        }
        Ok(())
    }
}

impl OrderSystem {
    /// Validates `config`, then starts the registry and the pools.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(config: PipelineConfig) -> Result<Self, ConfigError> {
        config.validate()?;
        let stats = Arc::new(StatisticsAggregator::new());
        let events = EventSink::new(config.event_capacity);

        let resources = &config.resources;
        let locks = ResourceLockManager::new(
            InventoryLedger::from_settings(resources),
            PaymentGateway::new(resources),
            NotificationOutbox::new(resources),
            config.lock_wait_timeout,
            LockAudit::new(config.lock_audit),
        );

        let (actor, orders) = order_actor::new(config.registry_buffer);
        let coordinator =
            PipelineCoordinator::new(&config, orders.clone(), locks, stats.clone(), events.clone())
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        let registry = tokio::spawn(actor.run(OrderContext {
            stats: stats.clone(),
            events: events.clone(),
        }));

        info!(
            order_workers = config.order_pool.max,
            notification_workers = config.notification_pool.max,
            fulfillment_workers = config.fulfillment_pool.max,
            "Order system started"
        );
        Ok(Self {
            reporter: ScheduledReporter::new(orders.clone(), stats.clone(), events.clone()),
            monitor: SystemMonitor::new(orders.clone(), stats.clone(), events.clone()),
            config,
            orders,
            coordinator,
            stats,
            events,
            registry,
        })
    }

    pub async fn submit_order(&self, params: OrderCreate) -> Result<OrderHandle, PipelineError> {
        self.coordinator.submit(params).await
    }

    pub fn start_reporting(&self, interval: Duration) -> Result<(), ScheduleError> {
        self.reporter.start(interval)
    }

    pub async fn stop_reporting(&self) -> Result<(), ScheduleError> {
        self.reporter.stop().await
    }

    pub fn reports_emitted(&self) -> u64 {
        self.reporter.reports_emitted()
    }

    pub fn start_monitoring(&self, interval: Duration, samples: u64) -> MonitorHandle {
        self.monitor.start(interval, samples)
    }

    pub fn stats(&self) -> StatsSnapshot {
        self.stats.snapshot()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<PipelineEvent> {
        self.events.subscribe()
    }

    pub async fn get_order(&self, id: OrderId) -> Result<Order, OrderError> {
        self.orders.get_order(id).await
    }

    pub async fn confirm_delivery(&self, id: OrderId) -> Result<Transition, OrderError> {
        self.orders.confirm_delivery(id).await
    }

    pub fn pool_status(&self) -> Vec<PoolStatus> {
        self.coordinator.pool_status()
    }

    pub fn lock_audit(&self) -> &LockAudit {
        self.coordinator.locks().audit()
    }

    /// The shared resources, reachable only through their locks.
    pub fn locks(&self) -> &ResourceLockManager {
        self.coordinator.locks()
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Gracefully shuts down the whole system.
    ///
    /// 1. Stops accepting orders, stops the reporter and every monitor
    /// 2. Waits up to `grace` for in-flight orders, then cancels the rest cooperatively
    /// 3. Shuts the pools down, aborting whatever outlives the configured cancel window
    /// 4. Settles every order still unsettled as `Cancelled`
    /// 5. Closes the registry
    ///
    /// Every submitted order is either completed or cancelled in the returned report.
    pub async fn shutdown(self, grace: Duration) -> ShutdownReport {
        info!(grace_ms = grace.as_millis() as u64, "Shutting down order system");
        self.coordinator.close();
        match self.reporter.stop().await {
            Ok(()) | Err(ScheduleError::NotRunning) => {}
            Err(e) => warn!(error = %e, "Reporter did not stop cleanly"),
        }
        self.monitor.stop_all();

        if !self.coordinator.drain(grace).await {
            warn!("Grace period expired with orders in flight");
            self.coordinator.cancel_all();
        }
        let pools = self.coordinator.shutdown_pools(self.config.cancel_window).await;
        let forced = self.coordinator.sweep_unsettled("shutdown").await;

        let snapshot = self.stats.snapshot();
        let report = ShutdownReport {
            submitted: snapshot.orders_submitted,
            completed: snapshot.orders_completed,
            cancelled: snapshot.orders_cancelled,
            forced,
            pools,
        };

        // The registry exits once every client is gone.
        let Self {
            orders,
            coordinator,
            reporter,
            monitor,
            mut registry,
            ..
        } = self;
        drop((orders, coordinator, reporter, monitor));
        match tokio::time::timeout(REGISTRY_STOP_TIMEOUT, &mut registry).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => error!(error = %e, "Registry task failed"),
            Err(_) => {
                warn!("Registry still has clients; aborting it");
                registry.abort();
            }
        }

        info!(%report, "Order system shut down");
        report
    }
}
