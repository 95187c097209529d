//! # Shared Resources
//!
//! The three resources the stages contend for. None of them synchronises itself: each one
//! lives behind its [`LockDomain`](crate::locks::LockDomain) in the
//! [`ResourceLockManager`](crate::locks::ResourceLockManager) and is only reachable through
//! a held guard.

use crate::config::ResourceSettings;
use crate::model::OrderId;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use thiserror::Error;

#[derive(Debug, Clone, Error, PartialEq)]
pub enum ResourceError {
    #[error("{item} is out of stock")]
    OutOfStock { item: String },

    #[error("payment of {amount:.2} declined: {reason}")]
    PaymentDeclined { amount: f64, reason: String },

    #[error("{channel} channel unavailable")]
    ChannelUnavailable { channel: String },
}

fn rng(seed: Option<u64>) -> fastrand::Rng {
    match seed {
        Some(seed) => fastrand::Rng::with_seed(seed),
        None => fastrand::Rng::new(),
    }
}

/// Stock per item, with per-order reservations held between the inventory check and the
/// inventory update.
#[derive(Debug)]
pub struct InventoryLedger {
    default_stock: u32,
    stock: HashMap<String, u32>,
    reservations: HashMap<OrderId, Vec<String>>,
}

impl InventoryLedger {
    /// Items never stocked explicitly start with `default_stock` units.
    pub fn new(default_stock: u32) -> Self {
        Self {
            default_stock,
            stock: HashMap::new(),
            reservations: HashMap::new(),
        }
    }

    pub fn from_settings(settings: &ResourceSettings) -> Self {
        let mut ledger = Self::new(settings.default_stock);
        for (item, units) in &settings.stock {
            ledger.set_stock(item.clone(), *units);
        }
        ledger
    }

    pub fn set_stock(&mut self, item: impl Into<String>, units: u32) {
        self.stock.insert(item.into(), units);
    }

    pub fn available(&self, item: &str) -> u32 {
        self.stock.get(item).copied().unwrap_or(self.default_stock)
    }

    /// Reserve one unit of every item, or nothing at all.
    pub fn reserve(&mut self, order: OrderId, items: &[String]) -> Result<(), ResourceError> {
        let mut wanted: HashMap<&str, u32> = HashMap::new();
        for item in items {
            *wanted.entry(item.as_str()).or_default() += 1;
        }
        if let Some((item, _)) = wanted
            .iter()
            .find(|(item, units)| self.available(item) < **units)
        {
            return Err(ResourceError::OutOfStock {
                item: item.to_string(),
            });
        }

        for (item, units) in wanted {
            let left = self.available(item) - units;
            self.stock.insert(item.to_string(), left);
        }
        self.reservations
            .entry(order)
            .or_default()
            .extend(items.iter().cloned());
        Ok(())
    }

    /// Turn one reserved unit of `item` into a shipped one.
    pub fn commit(&mut self, order: OrderId, item: &str) -> bool {
        let Some(reserved) = self.reservations.get_mut(&order) else {
            return false;
        };
        let Some(position) = reserved.iter().position(|r| r == item) else {
            return false;
        };
        reserved.swap_remove(position);
        if reserved.is_empty() {
            self.reservations.remove(&order);
        }
        true
    }

    /// Return every uncommitted unit of `order` to stock. Returns how many came back.
    pub fn release(&mut self, order: OrderId) -> usize {
        let Some(reserved) = self.reservations.remove(&order) else {
            return 0;
        };
        for item in &reserved {
            let restored = self.available(item) + 1;
            self.stock.insert(item.clone(), restored);
        }
        reserved.len()
    }

    pub fn reserved_for(&self, order: OrderId) -> usize {
        self.reservations.get(&order).map_or(0, Vec::len)
    }
}

/// Simulated card processor. Declines charges above a limit, or at random.
#[derive(Debug)]
pub struct PaymentGateway {
    rng: fastrand::Rng,
    decline_above: Option<f64>,
    failure_rate: f64,
    charges: HashMap<OrderId, f64>,
    refunded: f64,
}

impl PaymentGateway {
    pub fn new(settings: &ResourceSettings) -> Self {
        Self {
            rng: rng(settings.seed),
            decline_above: settings.payment_decline_above,
            failure_rate: settings.payment_failure_rate,
            charges: HashMap::new(),
            refunded: 0.0,
        }
    }

    pub fn charge(&mut self, order: OrderId, amount: f64) -> Result<(), ResourceError> {
        if let Some(limit) = self.decline_above.filter(|limit| amount > *limit) {
            return Err(ResourceError::PaymentDeclined {
                amount,
                reason: format!("above the {limit:.2} limit"),
            });
        }
        if self.rng.f64() < self.failure_rate {
            return Err(ResourceError::PaymentDeclined {
                amount,
                reason: "issuer unavailable".to_string(),
            });
        }
        self.charges.insert(order, amount);
        Ok(())
    }

    /// Refund whatever was charged for `order`.
    pub fn refund(&mut self, order: OrderId) -> Option<f64> {
        let amount = self.charges.remove(&order)?;
        self.refunded += amount;
        Some(amount)
    }

    pub fn charged(&self, order: OrderId) -> Option<f64> {
        self.charges.get(&order).copied()
    }

    pub fn total_refunded(&self) -> f64 {
        self.refunded
    }
}

/// One notification that went out.
#[derive(Debug, Clone, PartialEq)]
pub struct Delivery {
    pub order: OrderId,
    pub channel: String,
    pub recipient: String,
    pub at: DateTime<Utc>,
}

/// Record of sent notifications, with simulated channel outages.
#[derive(Debug)]
pub struct NotificationOutbox {
    rng: fastrand::Rng,
    failure_rate: f64,
    deliveries: Vec<Delivery>,
}

impl NotificationOutbox {
    pub fn new(settings: &ResourceSettings) -> Self {
        Self {
            // Offset so the outbox does not replay the gateway's sequence.
            rng: rng(settings.seed.map(|seed| seed.wrapping_add(1))),
            failure_rate: settings.notification_failure_rate,
            deliveries: Vec::new(),
        }
    }

    pub fn deliver(
        &mut self,
        order: OrderId,
        channel: &str,
        recipient: &str,
    ) -> Result<(), ResourceError> {
        if self.rng.f64() < self.failure_rate {
            return Err(ResourceError::ChannelUnavailable {
                channel: channel.to_string(),
            });
        }
        self.deliveries.push(Delivery {
            order,
            channel: channel.to_string(),
            recipient: recipient.to_string(),
            at: Utc::now(),
        });
        Ok(())
    }

    pub fn deliveries_for(&self, order: OrderId) -> impl Iterator<Item = &Delivery> {
        self.deliveries.iter().filter(move |d| d.order == order)
    }

    pub fn len(&self) -> usize {
        self.deliveries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.deliveries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(names: &[&str]) -> Vec<String> {
        names.iter().map(|n| n.to_string()).collect()
    }

    #[test]
    fn reservation_is_all_or_nothing() {
        let mut ledger = InventoryLedger::new(5);
        ledger.set_stock("camera", 1);

        let err = ledger
            .reserve(OrderId(1), &items(&["lens", "camera", "camera"]))
            .unwrap_err();
        assert_eq!(err, ResourceError::OutOfStock { item: "camera".into() });
        assert_eq!(ledger.available("lens"), 5);
        assert_eq!(ledger.available("camera"), 1);
        assert_eq!(ledger.reserved_for(OrderId(1)), 0);
    }

    #[test]
    fn release_returns_only_uncommitted_units() {
        let mut ledger = InventoryLedger::new(3);
        ledger
            .reserve(OrderId(7), &items(&["phone", "earbuds"]))
            .unwrap();
        assert_eq!(ledger.available("phone"), 2);

        assert!(ledger.commit(OrderId(7), "phone"));
        assert!(!ledger.commit(OrderId(7), "phone"));
        assert_eq!(ledger.release(OrderId(7)), 1);
        assert_eq!(ledger.available("phone"), 2);
        assert_eq!(ledger.available("earbuds"), 3);
        assert_eq!(ledger.release(OrderId(7)), 0);
    }

    #[test]
    fn gateway_declines_above_limit_and_refunds_charges() {
        let settings = ResourceSettings {
            payment_decline_above: Some(500.0),
            payment_failure_rate: 0.0,
            ..ResourceSettings::default()
        };
        let mut gateway = PaymentGateway::new(&settings);

        assert!(matches!(
            gateway.charge(OrderId(1), 900.0),
            Err(ResourceError::PaymentDeclined { .. })
        ));
        gateway.charge(OrderId(2), 120.0).unwrap();
        assert_eq!(gateway.charged(OrderId(2)), Some(120.0));
        assert_eq!(gateway.refund(OrderId(2)), Some(120.0));
        assert_eq!(gateway.refund(OrderId(2)), None);
        assert_eq!(gateway.total_refunded(), 120.0);
    }

    #[test]
    fn seeded_outbox_is_reproducible() {
        let settings = ResourceSettings {
            notification_failure_rate: 0.5,
            seed: Some(42),
            ..ResourceSettings::default()
        };
        let run = || {
            let mut outbox = NotificationOutbox::new(&settings);
            (0..20)
                .map(|i| outbox.deliver(OrderId(i), "sms", "Ada").is_ok())
                .collect::<Vec<_>>()
        };
        assert_eq!(run(), run());
    }
}
