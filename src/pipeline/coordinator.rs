//! # Pipeline Coordinator
//!
//! Accepts orders, registers them, and hands each one to the order pool as a single task
//! that walks the stages. Notification deliveries and inventory updates run on their own
//! pools, so a slow channel never occupies an order worker's slot.
//!
//! Every order gets a child of the coordinator's root [`CancelSource`]. Cancelling the
//! [`OrderHandle`] stops that order; [`PipelineCoordinator::cancel_all`] stops them all.

use super::stages::{compensate, OrderRun};
use super::{EventSink, OrderOutcome, PipelineError};
use crate::clients::OrderClient;
use crate::config::{PipelineConfig, StageSettings};
use crate::locks::ResourceLockManager;
use crate::model::{OrderCreate, OrderId};
use crate::stats::StatisticsAggregator;
use pipeline_framework::{
    ActorClient, CancelSource, PoolError, PoolShutdownReport, PoolStatus, TaskHandle, WorkerPool,
};
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;
use tracing::{error, info, instrument, warn};

/// Everything a running order needs.
pub(super) struct Shared {
    pub(super) settings: StageSettings,
    pub(super) orders: OrderClient,
    pub(super) locks: ResourceLockManager,
    pub(super) notification_pool: WorkerPool,
    pub(super) fulfillment_pool: WorkerPool,
    pub(super) stats: Arc<StatisticsAggregator>,
    pub(super) events: EventSink,
}

struct CoordinatorInner {
    shared: Arc<Shared>,
    order_pool: WorkerPool,
    root: CancelSource,
    accepting: AtomicBool,
}

/// Cheap to clone; clones share the pools and the cancellation root.
#[derive(Clone)]
pub struct PipelineCoordinator {
    inner: Arc<CoordinatorInner>,
}

impl PipelineCoordinator {
    pub fn new(
        config: &PipelineConfig,
        orders: OrderClient,
        locks: ResourceLockManager,
        stats: Arc<StatisticsAggregator>,
        events: EventSink,
    ) -> Result<Self, PoolError> {
        let shared = Shared {
            settings: config.stages.clone(),
            orders,
            locks,
            notification_pool: WorkerPool::new(config.notification_pool.clone())?,
            fulfillment_pool: WorkerPool::new(config.fulfillment_pool.clone())?,
            stats,
            events,
        };
        Ok(Self {
            inner: Arc::new(CoordinatorInner {
                shared: Arc::new(shared),
                order_pool: WorkerPool::new(config.order_pool.clone())?,
                root: CancelSource::new(),
                accepting: AtomicBool::new(true),
            }),
        })
    }

    /// Register an order and queue it for processing.
    ///
    /// Under the order pool's overflow policy this may run the whole order before returning
    /// ([`RunOnCaller`](pipeline_framework::OverflowPolicy::RunOnCaller)) or fail with
    /// [`PipelineError::QueueSaturation`]. A rejected order is still registered, and is
    /// settled as `Cancelled` before the error is returned.
    #[instrument(skip_all, fields(customer = %params.customer))]
    pub async fn submit(&self, params: OrderCreate) -> Result<OrderHandle, PipelineError> {
        let inner = &self.inner;
        if !inner.accepting.load(Ordering::SeqCst) {
            return Err(PipelineError::ShuttingDown);
        }

        let id = inner.shared.orders.create_order(params.clone()).await?;
        info!(order_id = %id, items = params.items.len(), total = params.total, "Order accepted");

        let cancel = CancelSource::child_of(&inner.root.token());
        let run = OrderRun::new(Arc::clone(&inner.shared), id, params, cancel.token());
        let fallback = run.clone();
        match inner.order_pool.submit(run.execute()).await {
            Ok(task) => Ok(OrderHandle { id, task, cancel }),
            Err(e) => {
                let err = PipelineError::from_pool(e, id, None);
                warn!(order_id = %id, error = %err, "Order not admitted");
                fallback.abandon(&err).await;
                Err(err)
            }
        }
    }

    /// Refuse further submissions.
    pub fn close(&self) {
        self.inner.accepting.store(false, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.inner.accepting.load(Ordering::SeqCst)
    }

    /// Wait up to `grace` for every admitted order to finish. Returns whether they did.
    pub async fn drain(&self, grace: Duration) -> bool {
        tokio::time::timeout(grace, self.inner.order_pool.wait_idle())
            .await
            .is_ok()
    }

    /// Raise the cancellation flag of every order, admitted or not yet started.
    pub fn cancel_all(&self) {
        warn!("Cancelling all orders");
        self.inner.root.cancel();
    }

    /// Shut the pools down, order pool first. Each gets `grace` before it aborts its tasks.
    pub async fn shutdown_pools(&self, grace: Duration) -> Vec<PoolShutdownReport> {
        let inner = &self.inner;
        let orders = inner.order_pool.shutdown(grace).await;
        let notifications = inner.shared.notification_pool.shutdown(grace).await;
        let fulfillment = inner.shared.fulfillment_pool.shutdown(grace).await;
        vec![orders, notifications, fulfillment]
    }

    /// Compensate and cancel every order the registry still holds unsettled, such as those
    /// whose task was aborted by a pool shutdown. Returns how many were swept.
    pub async fn sweep_unsettled(&self, cause: &str) -> u64 {
        let shared = &self.inner.shared;
        let orders = match shared.orders.scan(None).await {
            Ok(orders) => orders,
            Err(e) => {
                error!(error = %e, "Could not scan for unsettled orders");
                return 0;
            }
        };

        let mut swept = 0;
        for order in orders.iter().filter(|o| !o.status.is_settled()) {
            match compensate(shared, order.id, cause.to_string()).await {
                Ok(_) => swept += 1,
                Err(e) => warn!(order_id = %order.id, error = %e, "Order not swept"),
            }
        }
        if swept > 0 {
            warn!(swept, "Unsettled orders cancelled");
        }
        swept
    }

    pub fn pool_status(&self) -> Vec<PoolStatus> {
        let inner = &self.inner;
        vec![
            inner.order_pool.status(),
            inner.shared.notification_pool.status(),
            inner.shared.fulfillment_pool.status(),
        ]
    }

    pub fn locks(&self) -> &ResourceLockManager {
        &self.inner.shared.locks
    }
}

/// Awaits the outcome of one submitted order.
pub struct OrderHandle {
    id: OrderId,
    task: TaskHandle<Result<OrderOutcome, PipelineError>>,
    cancel: CancelSource,
}

impl OrderHandle {
    pub fn id(&self) -> OrderId {
        self.id
    }

    /// Ask the order to stop at its next cancellation point. It is still compensated and
    /// settled as `Cancelled`; awaiting the handle reports the interruption.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }
}

impl Future for OrderHandle {
    type Output = Result<OrderOutcome, PipelineError>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let id = self.id;
        Pin::new(&mut self.task)
            .poll(cx)
            .map(|outcome| outcome.unwrap_or_else(|e| Err(PipelineError::from_pool(e, id, None))))
    }
}
