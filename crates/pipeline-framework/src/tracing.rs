//! # Observability & Tracing
//!
//! [`setup_tracing`] installs the process-wide subscriber used by the pipeline binaries.
//!
//! - **Filtering** comes from `RUST_LOG` (`info`, `debug`, `order_pipeline=debug`, ...).
//! - **Compact format** with the module path hidden; records carry structured fields such
//!   as `order_id`, `stage` and `pool` instead.
//!
//! ```bash
//! RUST_LOG=info cargo run      # lifecycle, settled orders, reports
//! RUST_LOG=debug cargo run     # every stage, lock and pool decision
//! ```
//!
//! With `RUST_LOG=info` a run reads like:
//!
//! ```text
//! INFO Registry started entity_type="Order"
//! INFO submit: Order accepted order_id=order_3 items=2 total=4211.37
//! INFO Order settled order_id=order_3 status=Shipped elapsed_ms=412
//! INFO 10 submitted, 7 completed, ... sequence=2 active=2
//! WARN Notification not delivered order_id=order_9 channel=sms error=sms channel unavailable
//! ```

/// Installs the global compact subscriber. Panics if one is already installed.
pub fn setup_tracing() {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .init();
}

/// Like [`setup_tracing`], but silently keeps an already-installed subscriber.
/// Handy in tests, where several cases race to initialise logging.
pub fn try_setup_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_target(false)
        .compact()
        .with_test_writer()
        .try_init();
}
