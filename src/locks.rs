//! # Resource Lock Manager
//!
//! One async mutex per [`LockDomain`], each guarding the resource of that domain. Stages
//! acquire through a [`LockScope`], which remembers what the current execution already
//! holds; the returned [`DomainGuard`] releases on every exit path, cancellation included.
//!
//! Domains must be acquired in the fixed order `Inventory → Payment → Notification`. The
//! manager does not refuse out-of-order acquisitions. It records them in the [`LockAudit`]
//! so tests can assert that no caller ever broke the order. Taking a domain the scope
//! already holds is refused, since the wait could only end in a timeout.

use crate::model::OrderId;
use crate::pipeline::{PipelineError, Stage};
use crate::resources::{InventoryLedger, NotificationOutbox, PaymentGateway};
use pipeline_framework::CancelToken;
use serde::Serialize;
use std::fmt::Display;
use std::ops::{Deref, DerefMut};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex as StdMutex, MutexGuard as StdMutexGuard};
use std::time::Duration;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, warn};

/// Lock acquisition ordering to prevent deadlocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum LockDomain {
    Inventory = 0,
    Payment = 1,
    Notification = 2,
}

impl LockDomain {
    pub const ALL: [LockDomain; 3] = [
        LockDomain::Inventory,
        LockDomain::Payment,
        LockDomain::Notification,
    ];
}

impl Display for LockDomain {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            LockDomain::Inventory => "inventory",
            LockDomain::Payment => "payment",
            LockDomain::Notification => "notification",
        })
    }
}

fn lock_std<T>(mutex: &StdMutex<T>) -> StdMutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

/// One acquisition, with what the acquiring execution already held.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LockRecord {
    pub order: OrderId,
    pub stage: Stage,
    pub domain: LockDomain,
    pub held_before: Vec<LockDomain>,
}

impl LockRecord {
    /// Acquired while already holding this domain or a later one.
    pub fn is_violation(&self) -> bool {
        self.held_before.iter().any(|held| *held >= self.domain)
    }
}

/// Holder counts per domain, plus the acquisition log when recording is enabled.
#[derive(Debug, Default)]
pub struct LockAudit {
    recording: bool,
    records: StdMutex<Vec<LockRecord>>,
    holders: [AtomicUsize; 3],
    peaks: [AtomicUsize; 3],
}

impl LockAudit {
    pub fn new(recording: bool) -> Self {
        Self {
            recording,
            ..Self::default()
        }
    }

    fn acquired(&self, record: LockRecord) {
        let slot = record.domain as usize;
        let holders = self.holders[slot].fetch_add(1, Ordering::SeqCst) + 1;
        self.peaks[slot].fetch_max(holders, Ordering::SeqCst);
        if self.recording {
            lock_std(&self.records).push(record);
        }
    }

    fn released(&self, domain: LockDomain) {
        self.holders[domain as usize].fetch_sub(1, Ordering::SeqCst);
    }

    pub fn is_recording(&self) -> bool {
        self.recording
    }

    pub fn records(&self) -> Vec<LockRecord> {
        lock_std(&self.records).clone()
    }

    pub fn violations(&self) -> Vec<LockRecord> {
        lock_std(&self.records)
            .iter()
            .filter(|record| record.is_violation())
            .cloned()
            .collect()
    }

    /// Most executions that ever held `domain` at the same time.
    pub fn peak_holders(&self, domain: LockDomain) -> usize {
        self.peaks[domain as usize].load(Ordering::SeqCst)
    }

    pub fn current_holders(&self, domain: LockDomain) -> usize {
        self.holders[domain as usize].load(Ordering::SeqCst)
    }
}

/// Owns the shared resources, one mutex per domain. Cheap to clone.
#[derive(Clone)]
pub struct ResourceLockManager {
    inventory: Arc<Mutex<InventoryLedger>>,
    payment: Arc<Mutex<PaymentGateway>>,
    notification: Arc<Mutex<NotificationOutbox>>,
    wait_timeout: Duration,
    audit: Arc<LockAudit>,
}

impl ResourceLockManager {
    pub fn new(
        inventory: InventoryLedger,
        payment: PaymentGateway,
        notification: NotificationOutbox,
        wait_timeout: Duration,
        audit: LockAudit,
    ) -> Self {
        Self {
            inventory: Arc::new(Mutex::new(inventory)),
            payment: Arc::new(Mutex::new(payment)),
            notification: Arc::new(Mutex::new(notification)),
            wait_timeout,
            audit: Arc::new(audit),
        }
    }

    /// Start a new acquisition context for one stage execution of `order`.
    pub fn scope(&self, order: OrderId, stage: Stage, cancel: CancelToken) -> LockScope {
        LockScope {
            manager: self.clone(),
            order,
            stage,
            cancel,
            held: Arc::new(StdMutex::new(Vec::new())),
        }
    }

    pub fn audit(&self) -> &LockAudit {
        &self.audit
    }
}

/// Acquisition context of a single execution. Guards taken through the same scope know
/// about each other, which is what lets the audit see nested acquisitions.
pub struct LockScope {
    manager: ResourceLockManager,
    order: OrderId,
    stage: Stage,
    cancel: CancelToken,
    held: Arc<StdMutex<Vec<LockDomain>>>,
}

impl LockScope {
    pub async fn inventory(&self) -> Result<DomainGuard<InventoryLedger>, PipelineError> {
        let mutex = Arc::clone(&self.manager.inventory);
        self.acquire(LockDomain::Inventory, mutex).await
    }

    pub async fn payment(&self) -> Result<DomainGuard<PaymentGateway>, PipelineError> {
        let mutex = Arc::clone(&self.manager.payment);
        self.acquire(LockDomain::Payment, mutex).await
    }

    pub async fn notification(&self) -> Result<DomainGuard<NotificationOutbox>, PipelineError> {
        let mutex = Arc::clone(&self.manager.notification);
        self.acquire(LockDomain::Notification, mutex).await
    }

    /// Domains this scope currently holds, in acquisition order.
    pub fn held(&self) -> Vec<LockDomain> {
        lock_std(&self.held).clone()
    }

    async fn acquire<T>(
        &self,
        domain: LockDomain,
        mutex: Arc<Mutex<T>>,
    ) -> Result<DomainGuard<T>, PipelineError> {
        let interrupted = || PipelineError::InterruptedWork {
            order: self.order,
            stage: Some(self.stage),
        };
        self.cancel.check().map_err(|_| interrupted())?;

        let held_before = self.held();
        if held_before.contains(&domain) {
            // Waiting here would wait on this scope's own guard.
            return Err(PipelineError::StageFailure {
                order: self.order,
                stage: self.stage,
                reason: format!("{domain} lock is already held by this scope"),
            });
        }
        if held_before.iter().any(|held| *held > domain) {
            warn!(
                order_id = %self.order,
                stage = %self.stage,
                %domain,
                ?held_before,
                "Lock acquired out of order"
            );
        }

        let waited = self.manager.wait_timeout;
        let guard = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return Err(interrupted()),
            acquired = tokio::time::timeout(waited, mutex.lock_owned()) => {
                acquired.map_err(|_| PipelineError::ResourceTimeout {
                    resource: domain.to_string(),
                    waited,
                })?
            }
        };

        self.manager.audit.acquired(LockRecord {
            order: self.order,
            stage: self.stage,
            domain,
            held_before,
        });
        lock_std(&self.held).push(domain);
        debug!(order_id = %self.order, stage = %self.stage, %domain, "Lock acquired");

        Ok(DomainGuard {
            guard,
            domain,
            order: self.order,
            held: Arc::clone(&self.held),
            audit: Arc::clone(&self.manager.audit),
        })
    }
}

/// Exclusive access to the resource of one domain. Dropping it releases the lock.
pub struct DomainGuard<T> {
    guard: OwnedMutexGuard<T>,
    domain: LockDomain,
    order: OrderId,
    held: Arc<StdMutex<Vec<LockDomain>>>,
    audit: Arc<LockAudit>,
}

impl<T> DomainGuard<T> {
    pub fn domain(&self) -> LockDomain {
        self.domain
    }

    /// Release before the end of the enclosing block.
    pub fn unlock(self) {
        drop(self);
    }
}

impl<T> Deref for DomainGuard<T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.guard
    }
}

impl<T> DerefMut for DomainGuard<T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.guard
    }
}

impl<T> Drop for DomainGuard<T> {
    fn drop(&mut self) {
        let mut held = lock_std(&self.held);
        if let Some(position) = held.iter().rposition(|d| *d == self.domain) {
            held.remove(position);
        }
        drop(held);
        self.audit.released(self.domain);
        debug!(order_id = %self.order, domain = %self.domain, "Lock released");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ResourceSettings;
    use futures::future::join_all;
    use pipeline_framework::CancelSource;

    fn manager(wait_timeout: Duration) -> ResourceLockManager {
        let settings = ResourceSettings::default();
        ResourceLockManager::new(
            InventoryLedger::new(1_000),
            PaymentGateway::new(&settings),
            NotificationOutbox::new(&settings),
            wait_timeout,
            LockAudit::new(true),
        )
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn each_domain_has_one_holder_under_contention() {
        let locks = manager(Duration::from_secs(5));

        let tasks = (1..=50).map(|n| {
            let locks = locks.clone();
            tokio::spawn(async move {
                let scope = locks.scope(OrderId(n), Stage::Compensation, CancelToken::never());
                let inventory = scope.inventory().await.unwrap();
                let payment = scope.payment().await.unwrap();
                tokio::time::sleep(Duration::from_millis(1)).await;
                drop(inventory);
                drop(payment);
                let _outbox = scope.notification().await.unwrap();
            })
        });
        for joined in join_all(tasks).await {
            joined.unwrap();
        }

        let audit = locks.audit();
        assert_eq!(audit.records().len(), 150);
        assert!(audit.violations().is_empty());
        for domain in LockDomain::ALL {
            assert_eq!(audit.peak_holders(domain), 1, "{domain}");
            assert_eq!(audit.current_holders(domain), 0, "{domain}");
        }
    }

    #[tokio::test]
    async fn out_of_order_acquisition_is_audited() {
        let locks = manager(Duration::from_secs(1));
        let scope = locks.scope(OrderId(1), Stage::Payment, CancelToken::never());

        let payment = scope.payment().await.unwrap();
        let inventory = scope.inventory().await.unwrap();
        assert_eq!(scope.held(), vec![LockDomain::Payment, LockDomain::Inventory]);
        inventory.unlock();
        payment.unlock();
        assert!(scope.held().is_empty());

        let violations = locks.audit().violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].domain, LockDomain::Inventory);
        assert_eq!(violations[0].held_before, vec![LockDomain::Payment]);
    }

    #[tokio::test]
    async fn reacquiring_a_held_domain_is_refused() {
        let locks = manager(Duration::from_secs(30));
        let scope = locks.scope(OrderId(1), Stage::InventoryUpdate, CancelToken::never());

        let ledger = scope.inventory().await.unwrap();
        let err = tokio::time::timeout(Duration::from_secs(1), scope.inventory())
            .await
            .expect("refused without waiting")
            .err();
        let refused = matches!(
            &err,
            Some(PipelineError::StageFailure { stage: Stage::InventoryUpdate, .. })
        );
        assert!(refused, "{err:?}");
        assert_eq!(scope.held(), vec![LockDomain::Inventory]);

        ledger.unlock();
        assert!(scope.inventory().await.is_ok());
        assert!(locks.audit().violations().is_empty());
    }

    #[tokio::test]
    async fn contended_wait_times_out() {
        let locks = manager(Duration::from_millis(20));
        let holder = locks.scope(OrderId(1), Stage::InventoryCheck, CancelToken::never());
        let _held = holder.inventory().await.unwrap();

        let waiter = locks.scope(OrderId(2), Stage::InventoryCheck, CancelToken::never());
        let err = waiter.inventory().await.err().unwrap();
        assert_eq!(
            err,
            PipelineError::ResourceTimeout {
                resource: "inventory".into(),
                waited: Duration::from_millis(20),
            }
        );
    }

    #[tokio::test]
    async fn cancellation_interrupts_the_wait() {
        let locks = manager(Duration::from_secs(30));
        let holder = locks.scope(OrderId(1), Stage::Payment, CancelToken::never());
        let _held = holder.payment().await.unwrap();

        let source = CancelSource::new();
        let waiter = locks.scope(OrderId(2), Stage::Payment, source.token());
        let cancel = async {
            tokio::time::sleep(Duration::from_millis(10)).await;
            source.cancel();
        };
        let (result, ()) = tokio::join!(waiter.payment(), cancel);
        assert_eq!(
            result.err(),
            Some(PipelineError::InterruptedWork {
                order: OrderId(2),
                stage: Some(Stage::Payment),
            })
        );
        assert_eq!(locks.audit().current_holders(LockDomain::Payment), 1);
    }
}
