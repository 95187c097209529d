//! # Order Pipeline Demo
//!
//! Drives the [`OrderSystem`] the way a front-end would: it submits ten orders, renders
//! the event stream, and prints the statistics before shutting down.
//!
//! ```bash
//! RUST_LOG=info cargo run
//! ```

use futures::future::join_all;
use order_pipeline::config::PipelineConfig;
use order_pipeline::lifecycle::OrderSystem;
use order_pipeline::model::{OrderCreate, OrderStatus};
use order_pipeline::pipeline::PipelineEvent;
use pipeline_framework::tracing::setup_tracing;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tracing::{info, warn, Instrument};

const CUSTOMERS: [&str; 10] = [
    "Zhang San", "Li Si", "Wang Wu", "Zhao Liu", "Qian Qi", "Sun Ba", "Zhou Jiu", "Wu Shi",
    "Zheng Shiyi", "Wang Shier",
];

const PRODUCTS: [[&str; 2]; 10] = [
    ["iPhone 15", "AirPods Pro"],
    ["MacBook Pro", "iPad Air"],
    ["Xiaomi 13", "Xiaomi Buds"],
    ["Huawei P60", "Huawei Watch"],
    ["Switch console", "Zelda"],
    ["PS5 console", "FIFA 24"],
    ["Dell laptop", "Dell monitor"],
    ["Lenovo desktop", "Mechanical keyboard"],
    ["Sony camera", "Sony lens"],
    ["Apple Watch", "iPad Pro"],
];

fn sample_orders(count: usize) -> Vec<OrderCreate> {
    let mut rng = fastrand::Rng::with_seed(7);
    (0..count)
        .map(|i| {
            let total = 1000.0 + rng.f64() * 9000.0;
            OrderCreate::new(
                CUSTOMERS[i % CUSTOMERS.len()],
                &PRODUCTS[i % PRODUCTS.len()],
                (total * 100.0).round() / 100.0,
            )
        })
        .collect()
}

#[tokio::main]
async fn main() -> Result<(), String> {
    setup_tracing();

    let config = PipelineConfig::from_env().map_err(|e| e.to_string())?;
    info!("Starting order pipeline");
    let system = OrderSystem::new(config).map_err(|e| e.to_string())?;

    // Render events the way a front-end would.
    let mut events = system.subscribe();
    let printer = tokio::spawn(async move {
        loop {
            match events.recv().await {
                Ok(PipelineEvent::Progress { .. }) => {}
                Ok(event) => println!("{event}"),
                Err(RecvError::Lagged(missed)) => warn!(missed, "Event printer fell behind"),
                Err(RecvError::Closed) => break,
            }
        }
    });

    system
        .start_reporting(Duration::from_secs(1))
        .map_err(|e| e.to_string())?;
    let monitor = system.start_monitoring(Duration::from_millis(500), 10);

    let submissions = async {
        let mut handles = Vec::new();
        for params in sample_orders(10) {
            match system.submit_order(params).await {
                Ok(handle) => handles.push(handle),
                Err(e) => warn!(kind = e.kind(), error = %e, "Order rejected"),
            }
        }
        handles
    }
    .instrument(tracing::info_span!("submission"))
    .await;

    let outcomes = join_all(
        submissions
            .into_iter()
            .map(|handle| async move { (handle.id(), handle.await) }),
    )
    .await;
    let mut tally: BTreeMap<String, usize> = BTreeMap::new();
    let mut first_shipped = None;
    for (id, outcome) in outcomes {
        match outcome {
            Ok(outcome) => {
                first_shipped.get_or_insert(outcome.id);
                *tally.entry(outcome.status.to_string()).or_default() += 1;
            }
            Err(e) => {
                info!(order_id = %id, kind = e.kind(), "Order did not ship");
                *tally.entry(e.kind().to_string()).or_default() += 1;
            }
        }
    }

    if let Some(id) = first_shipped {
        match system.confirm_delivery(id).await {
            Ok(delivered) => {
                info!(order_id = %id, status = %delivered.order.status, "Delivery confirmed")
            }
            Err(e) => warn!(order_id = %id, error = %e, "Delivery not confirmed"),
        }
    }

    let samples = monitor.await;
    system.stop_reporting().await.map_err(|e| e.to_string())?;

    println!("\n📊 Order statistics");
    for (status, count) in &tally {
        println!("  {status}: {count}");
    }
    println!("  {}", system.stats());
    println!(
        "  {} reports, {} monitor samples",
        system.reports_emitted(),
        samples.len()
    );
    for pool in system.pool_status() {
        println!(
            "  pool '{}': {} submitted, {} completed, {} ran on caller, {} rejected",
            pool.name, pool.submitted, pool.completed, pool.caller_runs, pool.rejected
        );
    }

    let report = system.shutdown(Duration::from_secs(5)).await;
    println!("\n🏁 {report}");
    if tokio::time::timeout(Duration::from_secs(1), printer).await.is_err() {
        warn!("Event printer did not finish");
    }
    info!(
        shipped = tally.get(&OrderStatus::Shipped.to_string()).copied().unwrap_or(0),
        "Demo finished"
    );
    Ok(())
}
