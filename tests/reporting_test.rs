mod common;

use common::fast_config;
use futures::future::join_all;
use order_pipeline::lifecycle::OrderSystem;
use order_pipeline::model::{OrderCreate, OrderStatus};
use order_pipeline::pipeline::PipelineEvent;
use order_pipeline::reporter::ScheduleError;
use std::time::Duration;

#[tokio::test]
async fn reporter_runs_until_stopped() {
    let system = OrderSystem::new(fast_config()).unwrap();
    let mut events = system.subscribe();

    system.start_reporting(Duration::from_millis(100)).unwrap();
    assert_eq!(
        system.start_reporting(Duration::from_millis(100)),
        Err(ScheduleError::AlreadyRunning)
    );
    tokio::time::sleep(Duration::from_millis(350)).await;
    system.stop_reporting().await.unwrap();

    let emitted = system.reports_emitted();
    assert!((2..=4).contains(&emitted), "emitted {emitted}");

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(system.reports_emitted(), emitted);

    let mut received = 0;
    while let Ok(event) = events.try_recv() {
        if let PipelineEvent::Report(report) = event {
            received += 1;
            assert_eq!(report.sequence, received);
        }
    }
    assert_eq!(received, emitted);
    assert_eq!(system.stop_reporting().await, Err(ScheduleError::NotRunning));
}

#[tokio::test]
async fn monitor_samples_are_bounded_and_ordered() {
    let system = OrderSystem::new(fast_config()).unwrap();

    let monitor = system.start_monitoring(Duration::from_millis(20), 5);
    let handles = join_all((0..4).map(|i| {
        system.submit_order(OrderCreate::new(format!("customer {i}"), &["lamp"], 40.0))
    }))
    .await;
    let samples = monitor.await;

    assert!(!samples.is_empty());
    assert!(samples.len() <= 5);
    assert!(samples.windows(2).all(|w| w[0].sequence < w[1].sequence));
    assert!(samples.iter().all(|s| s.sequence >= 1 && s.sequence <= 5));
    for sample in &samples {
        assert!(sample.active + sample.pending + sample.settled <= 4);
    }

    for handle in handles {
        handle.unwrap().await.unwrap();
    }
    system.shutdown(Duration::from_secs(1)).await;
}

#[tokio::test]
async fn shipped_orders_stay_deliverable_while_observed() {
    let system = OrderSystem::new(fast_config()).unwrap();
    system.start_reporting(Duration::from_millis(10)).unwrap();

    let outcome = system
        .submit_order(OrderCreate::new("Ada", &["lamp"], 40.0))
        .await
        .unwrap()
        .await
        .unwrap();
    assert_eq!(outcome.status, OrderStatus::Shipped);

    // Both observers scan the shipped order several times.
    let samples = system.start_monitoring(Duration::from_millis(10), 3).await;
    assert!(samples.iter().any(|s| s.shipped == 1));
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(system.get_order(outcome.id).await.is_ok());

    let delivered = system.confirm_delivery(outcome.id).await.unwrap();
    assert_eq!(delivered.order.status, OrderStatus::Delivered);

    // Once delivered, one more pass by each observer drops it.
    let samples = system.start_monitoring(Duration::from_millis(200), 1).await;
    assert_eq!(samples.len(), 1);
    tokio::time::sleep(Duration::from_millis(50)).await;
    system.stop_reporting().await.unwrap();

    assert!(system.get_order(outcome.id).await.is_err());
    assert_eq!(system.stats().orders_completed, 1);
}
