//! # Configuration
//!
//! [`PipelineConfig`] is plain serde data with a default for every field, so a config file
//! only names what it changes. Durations are integer milliseconds.
//!
//! ```json
//! {
//!   "order_pool": { "name": "orders", "core": 2, "max": 4, "queue_capacity": 8,
//!                   "overflow": "reject-with-error" },
//!   "stages": { "payment_hold": 10, "channels": ["email", "sms"] },
//!   "resources": { "seed": 7, "payment_decline_above": 5000.0 },
//!   "lock_audit": true
//! }
//! ```
//!
//! [`PipelineConfig::from_env`] reads the file named by `ORDER_PIPELINE_CONFIG`, or falls
//! back to the defaults when the variable is unset.

use pipeline_framework::PoolConfig;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

pub const CONFIG_ENV: &str = "ORDER_PIPELINE_CONFIG";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed configuration: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid configuration: {0}")]
    Invalid(String),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Request buffer of the order registry.
    pub registry_buffer: usize,
    /// Events buffered per subscriber before it starts lagging.
    pub event_capacity: usize,
    /// Runs one task per submitted order.
    pub order_pool: PoolConfig,
    /// Runs the per-channel notification deliveries.
    pub notification_pool: PoolConfig,
    /// Runs the inventory updates.
    pub fulfillment_pool: PoolConfig,
    pub stages: StageSettings,
    pub resources: ResourceSettings,
    #[serde(with = "pipeline_framework::duration_ms")]
    pub lock_wait_timeout: Duration,
    /// Record every lock acquisition for order auditing.
    pub lock_audit: bool,
    /// How long shutdown lets cancelled orders wind down before aborting them.
    #[serde(with = "pipeline_framework::duration_ms")]
    pub cancel_window: Duration,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            registry_buffer: 64,
            event_capacity: 1024,
            order_pool: PoolConfig::new("orders")
                .with_bounds(4, 8)
                .with_queue_capacity(64)
                .with_idle_timeout(Duration::from_secs(30)),
            notification_pool: PoolConfig::new("notifications")
                .with_bounds(3, 6)
                .with_queue_capacity(32)
                .with_idle_timeout(Duration::from_secs(30)),
            fulfillment_pool: PoolConfig::new("fulfillment")
                .with_bounds(2, 4)
                .with_queue_capacity(100)
                .with_idle_timeout(Duration::from_secs(60)),
            stages: StageSettings::default(),
            resources: ResourceSettings::default(),
            lock_wait_timeout: Duration::from_secs(2),
            lock_audit: false,
            cancel_window: Duration::from_millis(500),
        }
    }
}

/// Simulated work per stage.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StageSettings {
    #[serde(with = "pipeline_framework::duration_ms")]
    pub validate_delay: Duration,
    /// Time spent inside the inventory lock during the inventory check.
    #[serde(with = "pipeline_framework::duration_ms")]
    pub inventory_hold: Duration,
    /// Each payment step outside the lock.
    #[serde(with = "pipeline_framework::duration_ms")]
    pub payment_step_delay: Duration,
    /// The charge step, inside the payment lock.
    #[serde(with = "pipeline_framework::duration_ms")]
    pub payment_hold: Duration,
    /// Connecting to a channel before the outbox is locked.
    #[serde(with = "pipeline_framework::duration_ms")]
    pub notification_delay: Duration,
    #[serde(with = "pipeline_framework::duration_ms")]
    pub item_update_delay: Duration,
    /// Upper bound on waiting for all channels of one order.
    #[serde(with = "pipeline_framework::duration_ms")]
    pub notification_join_timeout: Duration,
    pub channels: Vec<String>,
}

impl Default for StageSettings {
    fn default() -> Self {
        Self {
            validate_delay: Duration::from_millis(50),
            inventory_hold: Duration::from_millis(30),
            payment_step_delay: Duration::from_millis(20),
            payment_hold: Duration::from_millis(40),
            notification_delay: Duration::from_millis(25),
            item_update_delay: Duration::from_millis(20),
            notification_join_timeout: Duration::from_secs(2),
            channels: vec!["email".into(), "push".into(), "sms".into()],
        }
    }
}

impl StageSettings {
    /// No simulated delays at all.
    pub fn instant() -> Self {
        Self {
            validate_delay: Duration::ZERO,
            inventory_hold: Duration::ZERO,
            payment_step_delay: Duration::ZERO,
            payment_hold: Duration::ZERO,
            notification_delay: Duration::ZERO,
            item_update_delay: Duration::ZERO,
            ..Self::default()
        }
    }
}

/// Behaviour of the simulated shared resources.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResourceSettings {
    /// Units of every item not listed in `stock`.
    pub default_stock: u32,
    /// Starting units of specific items.
    pub stock: BTreeMap<String, u32>,
    /// Charges above this amount are declined.
    pub payment_decline_above: Option<f64>,
    /// Probability that an otherwise valid charge is declined.
    pub payment_failure_rate: f64,
    /// Probability that a channel is unavailable for one delivery.
    pub notification_failure_rate: f64,
    /// Seed for the simulated failures. Unseeded runs differ every time.
    pub seed: Option<u64>,
}

impl Default for ResourceSettings {
    fn default() -> Self {
        Self {
            default_stock: 50,
            stock: BTreeMap::new(),
            payment_decline_above: Some(9_000.0),
            payment_failure_rate: 0.0,
            notification_failure_rate: 0.05,
            seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn from_json(json: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&json)
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        match std::env::var_os(CONFIG_ENV) {
            Some(path) => Self::load(path),
            None => Ok(Self::default()),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        for pool in [&self.order_pool, &self.notification_pool, &self.fulfillment_pool] {
            pool.validate()
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
        }
        if self.stages.channels.is_empty() {
            return Err(ConfigError::Invalid("no notification channels".into()));
        }
        if self.lock_wait_timeout.is_zero() {
            return Err(ConfigError::Invalid("lock_wait_timeout must be positive".into()));
        }
        let rates = [
            ("payment_failure_rate", self.resources.payment_failure_rate),
            ("notification_failure_rate", self.resources.notification_failure_rate),
        ];
        for (name, rate) in rates {
            if !(0.0..=1.0).contains(&rate) {
                return Err(ConfigError::Invalid(format!(
                    "{name} must be within 0..=1, got {rate}"
                )));
            }
        }
        if let Some(limit) = self.resources.payment_decline_above {
            if !limit.is_finite() || limit <= 0.0 {
                return Err(ConfigError::Invalid(format!(
                    "payment_decline_above must be positive, got {limit}"
                )));
            }
        }
        Ok(())
    }
}
