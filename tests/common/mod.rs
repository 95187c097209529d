#![allow(dead_code)]

use order_pipeline::config::{PipelineConfig, StageSettings};
use std::time::Duration;

/// Short delays, no random channel outages, lock auditing on.
pub fn fast_config() -> PipelineConfig {
    pipeline_framework::tracing::try_setup_tracing();
    let ms = Duration::from_millis;
    let mut config = PipelineConfig::default();
    config.stages = StageSettings {
        validate_delay: ms(2),
        inventory_hold: ms(2),
        payment_step_delay: ms(1),
        payment_hold: ms(2),
        notification_delay: ms(1),
        item_update_delay: ms(1),
        ..StageSettings::default()
    };
    config.resources.seed = Some(11);
    config.resources.notification_failure_rate = 0.0;
    config.lock_audit = true;
    config
}

/// Every stage waits long enough for a test to act while the order is in flight.
pub fn slow_config() -> PipelineConfig {
    let mut config = fast_config();
    config.stages.validate_delay = Duration::from_secs(5);
    config
}

/// Order totals spread over 1000..10000, reproducible.
pub fn seeded_totals(count: usize, seed: u64) -> Vec<f64> {
    let mut rng = fastrand::Rng::with_seed(seed);
    (0..count).map(|_| 1000.0 + rng.f64() * 9000.0).collect()
}
