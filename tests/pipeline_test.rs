mod common;

use common::{fast_config, seeded_totals, slow_config};
use futures::future::join_all;
use order_pipeline::lifecycle::OrderSystem;
use order_pipeline::locks::LockDomain;
use order_pipeline::model::{OrderCreate, OrderStatus};
use order_pipeline::pipeline::{PipelineError, PipelineEvent, Stage};
use pipeline_framework::{CancelToken, OverflowPolicy};
use pretty_assertions::assert_eq;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;

#[tokio::test]
async fn every_order_ships_or_is_cancelled() {
    let system = OrderSystem::new(fast_config()).unwrap();

    let mut handles = Vec::new();
    for (i, total) in seeded_totals(10, 7).into_iter().enumerate() {
        let params = OrderCreate::new(format!("customer {i}"), &["phone", "case"], total);
        handles.push(system.submit_order(params).await.unwrap());
    }
    let ids: Vec<_> = handles.iter().map(|h| h.id()).collect();
    let results = join_all(handles).await;

    let mut shipped = 0;
    for (id, result) in ids.into_iter().zip(results) {
        let order = system.get_order(id).await.unwrap();
        match result {
            Ok(outcome) => {
                shipped += 1;
                assert_eq!(outcome.status, OrderStatus::Shipped);
                assert_eq!(outcome.notifications_sent, 3);
                assert_eq!(order.status, OrderStatus::Shipped);
            }
            Err(e) => {
                // Only the decline limit can stop an order here.
                assert!(order.total > 9000.0, "{e}");
                assert!(matches!(e, PipelineError::StageFailure { stage: Stage::Payment, .. }));
                assert_eq!(order.status, OrderStatus::Cancelled);
                assert!(order.cancel_cause.is_some());
            }
        }
    }

    let stats = system.stats();
    assert_eq!(stats.orders_submitted, 10);
    assert_eq!(stats.orders_completed, shipped);
    assert_eq!(stats.orders_completed + stats.orders_cancelled, 10);
    assert_eq!(stats.payments_completed, shipped);
    assert_eq!(stats.notifications_sent, shipped * 3);

    let report = system.shutdown(Duration::from_secs(1)).await;
    assert_eq!(report.forced, 0);
    assert_eq!(report.completed + report.cancelled, report.submitted);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn locks_stay_exclusive_and_ordered_under_load() {
    let mut config = fast_config();
    config.resources.payment_decline_above = None;
    config.resources.default_stock = 500;
    config.lock_wait_timeout = Duration::from_secs(10);
    let system = OrderSystem::new(config).unwrap();

    let mut handles = Vec::new();
    for i in 0..50 {
        let params = OrderCreate::new(format!("customer {i}"), &["widget", "gadget"], 25.0);
        handles.push(system.submit_order(params).await.unwrap());
    }
    for result in join_all(handles).await {
        assert_eq!(result.unwrap().status, OrderStatus::Shipped);
    }

    let audit = system.lock_audit();
    assert!(audit.is_recording());
    assert_eq!(audit.violations(), vec![]);
    for domain in LockDomain::ALL {
        assert_eq!(audit.peak_holders(domain), 1, "{domain}");
        assert_eq!(audit.current_holders(domain), 0, "{domain}");
    }
    // One inventory check, two commits, one charge and three deliveries per order.
    assert_eq!(audit.records().len(), 50 * 7);
    assert_eq!(system.stats().orders_completed, 50);

    system.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn invalid_orders_fail_validation() {
    let system = OrderSystem::new(fast_config()).unwrap();

    let cases = [
        OrderCreate::new("   ", &["lamp"], 10.0),
        OrderCreate::new("Ada", &[], 10.0),
        OrderCreate::new("Ada", &["lamp"], -5.0),
        OrderCreate::new("Ada", &["lamp"], f64::NAN),
    ];
    for params in cases {
        let handle = system.submit_order(params).await.unwrap();
        let id = handle.id();
        let err = handle.await.unwrap_err();
        let failed_validation = matches!(
            &err,
            PipelineError::StageFailure { order, stage: Stage::Validate, .. } if *order == id
        );
        assert!(failed_validation, "{err}");
        let order = system.get_order(id).await.unwrap();
        assert_eq!(order.status, OrderStatus::Cancelled);
        assert_eq!(order.cancel_cause, Some(err.to_string()));
    }
    assert_eq!(system.stats().orders_cancelled, 4);
    assert_eq!(system.stats().payments_completed, 0);
}

#[tokio::test]
async fn declined_payment_returns_the_reservation() {
    let mut config = fast_config();
    config.resources.payment_decline_above = Some(100.0);
    config.resources.stock.insert("lamp".to_string(), 1);
    let system = OrderSystem::new(config).unwrap();

    let declined = system
        .submit_order(OrderCreate::new("Ada", &["lamp"], 500.0))
        .await
        .unwrap()
        .await
        .unwrap_err();
    assert!(
        matches!(declined, PipelineError::StageFailure { stage: Stage::Payment, .. }),
        "{declined}"
    );

    // The only lamp went back to stock, so the next order can have it.
    let outcome = system
        .submit_order(OrderCreate::new("Grace", &["lamp"], 50.0))
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(outcome.status, OrderStatus::Shipped);

    let sold_out = system
        .submit_order(OrderCreate::new("Linus", &["lamp"], 50.0))
        .await
        .unwrap()
        .await
        .unwrap_err();
    assert!(
        matches!(sold_out, PipelineError::StageFailure { stage: Stage::InventoryCheck, .. }),
        "{sold_out}"
    );
    assert_eq!(system.stats().payments_completed, 1);
}

#[tokio::test]
async fn cancelled_handle_interrupts_the_order() {
    let system = OrderSystem::new(slow_config()).unwrap();

    let handle = system
        .submit_order(OrderCreate::new("Ada", &["lamp"], 40.0))
        .await
        .unwrap();
    let id = handle.id();
    tokio::time::sleep(Duration::from_millis(20)).await;
    handle.cancel();

    let err = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("cancellation is observed during the validation delay");
    assert_eq!(
        err.unwrap_err(),
        PipelineError::InterruptedWork {
            order: id,
            stage: Some(Stage::Validate)
        }
    );
    let order = system.get_order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(
        order.history,
        vec![OrderStatus::Pending, OrderStatus::Processing, OrderStatus::Cancelled]
    );
}

#[tokio::test]
async fn saturated_order_pool_rejects_the_submitter() {
    let mut config = slow_config();
    config.order_pool = config
        .order_pool
        .with_bounds(1, 1)
        .with_queue_capacity(1)
        .with_overflow(OverflowPolicy::RejectWithError);
    let system = OrderSystem::new(config).unwrap();

    let running = system
        .submit_order(OrderCreate::new("Ada", &["lamp"], 40.0))
        .await
        .unwrap();
    let queued = system
        .submit_order(OrderCreate::new("Grace", &["desk"], 40.0))
        .await
        .unwrap();
    let err = system
        .submit_order(OrderCreate::new("Linus", &["chair"], 40.0))
        .await
        .err()
        .expect("third order does not fit");
    assert_eq!(err, PipelineError::QueueSaturation { pool: "orders".into() });
    assert_eq!(system.stats().orders_cancelled, 1);

    let orders = system.pool_status().remove(0);
    assert_eq!((orders.rejected, orders.queued), (1, 1));

    running.cancel();
    queued.cancel();
    let report = system.shutdown(Duration::from_secs(2)).await;
    assert_eq!(report.submitted, 3);
    assert_eq!(report.cancelled, 3);
    assert_eq!(report.completed, 0);
}

#[tokio::test]
async fn shutdown_accounts_for_every_order() {
    let mut config = slow_config();
    config.cancel_window = Duration::from_millis(200);
    let system = OrderSystem::new(config).unwrap();

    let mut handles = Vec::new();
    for i in 0..12 {
        let params = OrderCreate::new(format!("customer {i}"), &["lamp"], 40.0);
        handles.push(system.submit_order(params).await.unwrap());
    }

    let report = system.shutdown(Duration::from_millis(50)).await;
    assert_eq!(report.submitted, 12);
    assert_eq!(report.completed + report.cancelled, report.submitted);
    assert_eq!(report.pools.len(), 3);
    assert_eq!(report.pools[0].pool, "orders");

    for result in join_all(handles).await {
        let err = result.unwrap_err();
        assert_eq!(err.kind(), "interrupted", "{err}");
    }
}

#[tokio::test]
async fn event_stream_closes_after_shutdown() {
    let system = OrderSystem::new(fast_config()).unwrap();
    let mut events = system.subscribe();

    system
        .submit_order(OrderCreate::new("Ada", &["lamp"], 40.0))
        .await
        .unwrap()
        .await
        .unwrap();
    system.shutdown(Duration::from_secs(1)).await;

    let mut settled = 0;
    loop {
        match events.recv().await {
            Ok(PipelineEvent::OrderSettled { status, .. }) => {
                assert_eq!(status, OrderStatus::Shipped);
                settled += 1;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {}
            Err(RecvError::Closed) => break,
        }
    }
    assert_eq!(settled, 1);
}

#[tokio::test]
async fn unavailable_channels_do_not_stop_the_order() {
    let mut config = fast_config();
    config.resources.notification_failure_rate = 0.5;
    let channels = config.stages.channels.len();
    let system = OrderSystem::new(config).unwrap();

    let mut handles = Vec::new();
    for i in 0..8 {
        let params = OrderCreate::new(format!("customer {i}"), &["lamp"], 40.0);
        handles.push(system.submit_order(params).await.unwrap());
    }
    let outcomes: Vec<_> = join_all(handles)
        .await
        .into_iter()
        .map(|result| result.unwrap())
        .collect();

    assert!(outcomes.iter().all(|o| o.status == OrderStatus::Shipped));
    assert!(outcomes.iter().any(|o| o.notifications_sent < channels));

    let stats = system.stats();
    let sent: usize = outcomes.iter().map(|o| o.notifications_sent).sum();
    assert_eq!(stats.notifications_sent, sent as u64);
    assert_eq!(
        stats.notifications_sent + stats.notifications_failed,
        (outcomes.len() * channels) as u64
    );

    let scope = system.locks().scope(outcomes[0].id, Stage::Notification, CancelToken::never());
    let outbox = scope.notification().await.unwrap();
    assert_eq!(outbox.len(), sent);
}

#[tokio::test]
async fn notification_timeout_cancels_and_compensates() {
    let mut config = fast_config();
    config.stages.notification_delay = Duration::from_secs(1);
    config.stages.notification_join_timeout = Duration::from_millis(20);
    config.resources.stock.insert("lamp".to_string(), 1);
    let channels = config.stages.channels.len() as u64;
    let system = OrderSystem::new(config).unwrap();

    let handle = system
        .submit_order(OrderCreate::new("Ada", &["lamp"], 40.0))
        .await
        .unwrap();
    let id = handle.id();
    let err = tokio::time::timeout(Duration::from_secs(2), handle)
        .await
        .expect("the join timeout bounds the notification stage")
        .unwrap_err();
    assert!(matches!(err, PipelineError::ResourceTimeout { .. }), "{err}");

    let order = system.get_order(id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
    assert_eq!(order.cancel_cause, Some(err.to_string()));

    // The abandoned deliveries were stopped, not left to finish later.
    tokio::time::sleep(Duration::from_millis(50)).await;
    let stats = system.stats();
    assert_eq!(stats.notifications_sent, 0);
    assert_eq!(stats.notifications_failed, channels);

    let scope = system.locks().scope(id, Stage::Compensation, CancelToken::never());
    let ledger = scope.inventory().await.unwrap();
    let gateway = scope.payment().await.unwrap();
    let outbox = scope.notification().await.unwrap();
    assert_eq!(ledger.available("lamp"), 1);
    assert_eq!(ledger.reserved_for(id), 0);
    assert_eq!(gateway.charged(id), None);
    assert_eq!(gateway.total_refunded(), 40.0);
    assert!(outbox.is_empty());
}
