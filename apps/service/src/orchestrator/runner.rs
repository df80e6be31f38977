use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};
use tokio::sync::{Mutex, OwnedMutexGuard};
use tracing::{debug, error, info};

use super::reconciler::{Reconciled, StateReconciler};
use crate::error::StorageError;
use crate::models::{Service, ServiceId};
use crate::monitoring::ProbeExecutor;
use crate::monitoring::types::{ProbeResult, ProbeStatus};

/// One async mutex per service identity.
///
/// Held across probe and reconciliation so a timer firing and an on-demand
/// check never overlap for the same service.
#[derive(Default)]
pub struct IdentityGates {
    gates: StdMutex<HashMap<ServiceId, Arc<Mutex<()>>>>,
}

impl IdentityGates {
    fn gate(&self, id: &ServiceId) -> Arc<Mutex<()>> {
        let mut gates = self.gates.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        // Drop gates nobody holds or waits on
        gates.retain(|_, gate| Arc::strong_count(gate) > 1);
        gates.entry(id.clone()).or_default().clone()
    }

    pub async fn acquire(&self, id: &ServiceId) -> OwnedMutexGuard<()> {
        self.gate(id).lock_owned().await
    }

    /// Take the gate only if no other cycle holds it
    pub fn try_acquire(&self, id: &ServiceId) -> Option<OwnedMutexGuard<()>> {
        self.gate(id).try_lock_owned().ok()
    }
}

/// Outcome of one completed probe-and-reconcile cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CycleOutcome {
    pub status: ProbeStatus,
    pub reconciled: Reconciled,
}

/// Runs probe-and-reconcile cycles for every trigger path
pub struct CheckRunner {
    executor: ProbeExecutor,
    reconciler: Arc<StateReconciler>,
    gates: IdentityGates,
}

impl CheckRunner {
    pub fn new(executor: ProbeExecutor, reconciler: Arc<StateReconciler>) -> Self {
        Self { executor, reconciler, gates: IdentityGates::default() }
    }

    pub fn reconciler(&self) -> &Arc<StateReconciler> {
        &self.reconciler
    }

    /// Mark a service `checking` and return its current record
    pub async fn dispatch(&self, id: &ServiceId) -> Result<Option<Service>, StorageError> {
        let marked = self.reconciler.mark_checking(std::slice::from_ref(id)).await?;
        Ok(marked.into_iter().next())
    }

    /// Probe under the identity gate without reconciling
    pub async fn probe(&self, service: &Service) -> ProbeResult {
        let _gate = self.gates.acquire(&service.id).await;
        self.executor.probe(service).await
    }

    /// Probe and reconcile under the identity gate
    pub async fn complete(&self, service: &Service) -> Result<CycleOutcome, StorageError> {
        let _gate = self.gates.acquire(&service.id).await;
        self.probe_and_apply(service).await
    }

    async fn probe_and_apply(&self, service: &Service) -> Result<CycleOutcome, StorageError> {
        let result = self.executor.probe(service).await;
        let reconciled = self.reconciler.apply_result(&service.id, &result).await?;
        Ok(CycleOutcome { status: result.status, reconciled })
    }

    /// Full cycle for one identity: dispatch, probe, reconcile.
    ///
    /// Returns `None` when the service no longer exists.
    pub async fn run_cycle(&self, id: &ServiceId) -> Result<Option<CycleOutcome>, StorageError> {
        let Some(service) = self.dispatch(id).await? else {
            debug!(service = %id, "Skipping check: service not found");
            return Ok(None);
        };
        self.complete(&service).await.map(Some)
    }

    /// Timer firing for one identity.
    ///
    /// Skipped without touching the record while another cycle for the same
    /// service is running, so a probe slower than its interval never queues
    /// further firings behind it.
    pub async fn run_scheduled(&self, id: &ServiceId) -> Result<Option<CycleOutcome>, StorageError> {
        let Some(_gate) = self.gates.try_acquire(id) else {
            debug!(service = %id, "Skipping scheduled check: previous check still running");
            return Ok(None);
        };
        let Some(service) = self.dispatch(id).await? else {
            debug!(service = %id, "Skipping check: service not found");
            return Ok(None);
        };
        self.probe_and_apply(&service).await.map(Some)
    }

    /// Daily aggregate: every known service, one after another
    pub async fn run_daily(&self) {
        let services = self.reconciler.list().await;
        info!("Running daily check of {} services", services.len());

        let (mut up, mut down) = (0usize, 0usize);
        for service in &services {
            match self.run_cycle(&service.id).await {
                Ok(Some(CycleOutcome { status: ProbeStatus::Up, .. })) => up += 1,
                Ok(Some(CycleOutcome { status: ProbeStatus::Down, .. })) => down += 1,
                Ok(None) => {}
                Err(e) => error!(service = %service.id, "Daily check failed: {}", e),
            }
        }

        info!("Daily check completed: {} up, {} down", up, down);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::ServiceStatus;
    use crate::storage::memory::MemoryStore;
    use crate::test_support::{StubServer, unused_local_url};
    use std::time::Duration;

    fn runner(store: Arc<MemoryStore>) -> CheckRunner {
        let executor = ProbeExecutor::new(5, "uptime-service-test").unwrap();
        CheckRunner::new(executor, Arc::new(StateReconciler::new(store)))
    }

    #[tokio::test]
    async fn test_gate_serializes_same_identity() {
        let gates = Arc::new(IdentityGates::default());
        let id = ServiceId::Int(1);

        let held = gates.acquire(&id).await;
        let waiter = {
            let gates = gates.clone();
            let id = id.clone();
            tokio::spawn(async move {
                let _guard = gates.acquire(&id).await;
            })
        };

        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        // A different identity is not blocked
        let _other = tokio::time::timeout(Duration::from_millis(100), gates.acquire(&ServiceId::Int(2)))
            .await
            .unwrap();

        drop(held);
        tokio::time::timeout(Duration::from_secs(1), waiter).await.unwrap().unwrap();
    }

    #[tokio::test]
    async fn test_run_cycle_reconciles() {
        let server = StubServer::start(200).await;
        let store = Arc::new(MemoryStore::with_services(vec![Service::new(1, "a", server.url("/"))]));

        let outcome = runner(store.clone()).run_cycle(&ServiceId::Int(1)).await.unwrap().unwrap();
        assert_eq!(outcome.status, ProbeStatus::Up);
        assert_eq!(outcome.reconciled, Reconciled::Applied);
        let service = store.get(&ServiceId::Int(1)).await.unwrap();
        assert_eq!(service.status, ServiceStatus::Up);
        assert!(service.last_checked.is_some());
    }

    #[tokio::test]
    async fn test_scheduled_run_skips_while_gate_is_held() {
        let server = StubServer::start(200).await;
        let store = Arc::new(MemoryStore::with_services(vec![Service::new(1, "a", server.url("/"))]));
        let runner = runner(store.clone());
        let id = ServiceId::Int(1);

        let held = runner.gates.acquire(&id).await;
        assert_eq!(runner.run_scheduled(&id).await.unwrap(), None);
        assert!(server.requests().await.is_empty());
        assert_eq!(store.write_count(), 0);
        assert_eq!(store.get(&id).await.unwrap().status, ServiceStatus::Unknown);

        drop(held);
        let outcome = runner.run_scheduled(&id).await.unwrap().unwrap();
        assert_eq!(outcome.status, ProbeStatus::Up);
        assert_eq!(server.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_run_cycle_for_missing_service_is_skipped() {
        let store = Arc::new(MemoryStore::default());
        let outcome = runner(store.clone()).run_cycle(&ServiceId::Int(4)).await.unwrap();
        assert_eq!(outcome, None);
        assert_eq!(store.write_count(), 0);
    }

    #[tokio::test]
    async fn test_daily_run_checks_every_service() {
        let up = StubServer::start(200).await;
        let store = Arc::new(MemoryStore::with_services(vec![
            Service::new(1, "up", up.url("/")),
            Service::new(2, "down", unused_local_url().await),
        ]));

        runner(store.clone()).run_daily().await;

        assert_eq!(store.get(&ServiceId::Int(1)).await.unwrap().status, ServiceStatus::Up);
        let down = store.get(&ServiceId::Int(2)).await.unwrap();
        assert_eq!(down.status, ServiceStatus::Down);
        assert!(down.error.is_some());
    }
}
