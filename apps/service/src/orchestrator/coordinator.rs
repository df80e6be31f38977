use std::collections::HashSet;
use std::future::Future;
use std::sync::{Arc, Mutex as StdMutex};

use futures::future::join_all;
use serde::Serialize;
use tokio::task::JoinSet;
use tracing::{debug, error, info};

use super::runner::CheckRunner;
use crate::error::MonitorError;
use crate::models::{Service, ServiceId, ServiceStatus};
use crate::monitoring::types::ProbeResult;

/// Immediate answer to an on-demand check of one service
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CheckAccepted {
    pub id: ServiceId,
    pub status: ServiceStatus,
}

/// Immediate answer to an on-demand check of every service
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BulkCheckAccepted {
    pub status: ServiceStatus,
    pub total_services: usize,
}

type InFlight = Arc<StdMutex<HashSet<ServiceId>>>;

/// Identities owned by one coordinator cycle, released when dropped
struct InFlightClaim {
    in_flight: InFlight,
    ids: Vec<ServiceId>,
}

impl InFlightClaim {
    /// Claim every id not already owned by another cycle
    fn acquire(in_flight: &InFlight, candidates: impl IntoIterator<Item = ServiceId>) -> Self {
        let mut owned = in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        let ids = candidates.into_iter().filter(|id| owned.insert(id.clone())).collect();
        Self { in_flight: in_flight.clone(), ids }
    }

    fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

impl Drop for InFlightClaim {
    fn drop(&mut self) {
        let mut owned = self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        for id in &self.ids {
            owned.remove(id);
        }
    }
}

/// Runs on-demand checks in the background.
///
/// Both operations answer as soon as the affected records are marked
/// `checking`; the probes and the reconciliation happen in spawned tasks. A
/// check that panics is still reconciled to `down`.
pub struct BackgroundCoordinator {
    runner: Arc<CheckRunner>,
    in_flight: InFlight,
    tasks: StdMutex<JoinSet<()>>,
}

impl BackgroundCoordinator {
    pub fn new(runner: Arc<CheckRunner>) -> Self {
        Self { runner, in_flight: InFlight::default(), tasks: StdMutex::new(JoinSet::new()) }
    }

    /// Mark one service `checking` and probe it in the background
    pub async fn check_one(&self, id: &ServiceId) -> Result<CheckAccepted, MonitorError> {
        let claim = InFlightClaim::acquire(&self.in_flight, [id.clone()]);

        if claim.is_empty() {
            // Coalesce with the cycle already running for this identity
            return match self.runner.reconciler().find(id).await? {
                Some(_) => {
                    debug!(service = %id, "Check already in progress");
                    Ok(CheckAccepted { id: id.clone(), status: ServiceStatus::Checking })
                }
                None => Err(MonitorError::NotFound(id.clone())),
            };
        }

        let Some(service) = self.runner.dispatch(id).await? else {
            return Err(MonitorError::NotFound(id.clone()));
        };
        info!(service = %id, "Checking service {} in background", service.label());

        let runner = self.runner.clone();
        self.spawn(async move {
            let _claim = claim;
            let id = service.id.clone();

            let cycle = {
                let runner = runner.clone();
                tokio::spawn(async move { runner.complete(&service).await })
            };

            match cycle.await {
                Ok(Ok(_)) => {}
                Ok(Err(e)) => error!(service = %id, "Failed to record check result: {}", e),
                Err(e) => {
                    error!(service = %id, "Background check aborted: {}", e);
                    let result = ProbeResult::failure(format!("Check aborted: {e}"));
                    if let Err(e) = runner.reconciler().apply_result(&id, &result).await {
                        error!(service = %id, "Failed to record aborted check: {}", e);
                    }
                }
            }
        });

        Ok(CheckAccepted { id: id.clone(), status: ServiceStatus::Checking })
    }

    /// Mark every service `checking`, probe them concurrently, then record all
    /// outcomes with a single write
    pub async fn check_all(&self) -> Result<BulkCheckAccepted, MonitorError> {
        let reconciler = self.runner.reconciler();
        let ids: Vec<ServiceId> = reconciler.load().await?.into_iter().map(|s| s.id).collect();
        let total_services = ids.len();

        // Identities still in a check-one cycle are already `checking` and
        // finish through that cycle
        let claim = InFlightClaim::acquire(&self.in_flight, ids);
        let batch: Vec<Service> = reconciler.mark_checking(&claim.ids).await?;
        if batch.len() < total_services {
            debug!("Skipping {} services with a check in progress", total_services - batch.len());
        }
        info!("Checking {} services in background", batch.len());

        let runner = self.runner.clone();
        self.spawn(async move {
            let _claim = claim;
            let ids: Vec<ServiceId> = batch.iter().map(|s| s.id.clone()).collect();

            let probes = batch.into_iter().map(|service| {
                let runner = runner.clone();
                tokio::spawn(async move { runner.probe(&service).await })
            });
            let outcomes = join_all(probes).await;

            let results: Vec<(ServiceId, ProbeResult)> = ids
                .into_iter()
                .zip(outcomes)
                .map(|(id, outcome)| {
                    let result = outcome.unwrap_or_else(|e| {
                        error!(service = %id, "Background check aborted: {}", e);
                        ProbeResult::failure(format!("Check aborted: {e}"))
                    });
                    (id, result)
                })
                .collect();

            let up = results.iter().filter(|(_, result)| result.is_up()).count();
            match runner.reconciler().apply_results(&results).await {
                Ok(applied) => info!(
                    "Bulk check completed: {} up, {} down, {} recorded",
                    up,
                    results.len() - up,
                    applied
                ),
                Err(e) => error!("Failed to record bulk check results: {}", e),
            }
        });

        Ok(BulkCheckAccepted { status: ServiceStatus::Checking, total_services })
    }

    /// Wait until every background check spawned so far has finished
    pub async fn wait_idle(&self) {
        loop {
            let mut tasks = std::mem::take(&mut *self.lock_tasks());
            if tasks.is_empty() {
                break;
            }
            while let Some(joined) = tasks.join_next().await {
                if let Err(e) = joined {
                    error!("Background task failed: {}", e);
                }
            }
        }
    }

    /// Number of ids owned by running coordinator cycles
    pub fn in_flight(&self) -> usize {
        self.in_flight.lock().unwrap_or_else(|poisoned| poisoned.into_inner()).len()
    }

    fn spawn(&self, task: impl Future<Output = ()> + Send + 'static) {
        let mut tasks = self.lock_tasks();
        while tasks.try_join_next().is_some() {}
        tasks.spawn(task);
    }

    fn lock_tasks(&self) -> std::sync::MutexGuard<'_, JoinSet<()>> {
        self.tasks.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::monitoring::ProbeExecutor;
    use crate::monitoring::checker::{CheckResponse, Checker};
    use crate::orchestrator::reconciler::StateReconciler;
    use crate::storage::memory::MemoryStore;
    use crate::test_support::{StubServer, unused_local_url};
    use async_trait::async_trait;
    use chrono::Utc;
    use std::time::{Duration, Instant};

    struct PanickingChecker;

    #[async_trait]
    impl Checker for PanickingChecker {
        async fn check(&self, _service: &Service) -> anyhow::Result<CheckResponse> {
            panic!("checker exploded")
        }
    }

    fn coordinator_with(store: Arc<MemoryStore>, executor: ProbeExecutor) -> BackgroundCoordinator {
        let reconciler = Arc::new(StateReconciler::new(store));
        BackgroundCoordinator::new(Arc::new(CheckRunner::new(executor, reconciler)))
    }

    fn coordinator(store: Arc<MemoryStore>) -> BackgroundCoordinator {
        coordinator_with(store, ProbeExecutor::new(5, "uptime-service-test").unwrap())
    }

    #[tokio::test]
    async fn test_check_one_unknown_service() {
        let coordinator = coordinator(Arc::new(MemoryStore::default()));
        let result = coordinator.check_one(&ServiceId::Int(42)).await;
        assert!(matches!(result, Err(MonitorError::NotFound(ServiceId::Int(42)))));
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_check_one_answers_before_probe_completes() {
        let server = StubServer::start_with_delay(200, Duration::from_millis(300)).await;
        let id = ServiceId::Int(1);
        let store = Arc::new(MemoryStore::with_services(vec![Service::new(1, "slow", server.url("/"))]));
        let coordinator = coordinator(store.clone());

        let accepted = coordinator.check_one(&id).await.unwrap();
        assert_eq!(accepted, CheckAccepted { id: id.clone(), status: ServiceStatus::Checking });
        assert_eq!(store.get(&id).await.unwrap().status, ServiceStatus::Checking);

        coordinator.wait_idle().await;
        let service = store.get(&id).await.unwrap();
        assert_eq!(service.status, ServiceStatus::Up);
        assert_eq!(service.status_code, Some(200));
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_check_one_coalesces_in_flight_identity() {
        let server = StubServer::start_with_delay(200, Duration::from_millis(300)).await;
        let id = ServiceId::Int(1);
        let store = Arc::new(MemoryStore::with_services(vec![Service::new(1, "slow", server.url("/"))]));
        let coordinator = coordinator(store);

        coordinator.check_one(&id).await.unwrap();
        let second = coordinator.check_one(&id).await.unwrap();
        assert_eq!(second.status, ServiceStatus::Checking);

        coordinator.wait_idle().await;
        assert_eq!(server.requests().await.len(), 1);
    }

    #[tokio::test]
    async fn test_panicking_check_still_reconciles_down() {
        let id = ServiceId::Int(1);
        let store = Arc::new(MemoryStore::with_services(vec![Service::new(1, "a", "http://a.test")]));
        let coordinator =
            coordinator_with(store.clone(), ProbeExecutor::with_checker(Arc::new(PanickingChecker)));

        coordinator.check_one(&id).await.unwrap();
        coordinator.wait_idle().await;

        let service = store.get(&id).await.unwrap();
        assert_eq!(service.status, ServiceStatus::Down);
        assert!(service.error.unwrap().contains("Check aborted"));
        assert!(service.last_checked.is_some());
        assert_eq!(coordinator.in_flight(), 0);
    }

    #[tokio::test]
    async fn test_deleted_mid_flight_is_not_resurrected() {
        let server = StubServer::start_with_delay(200, Duration::from_millis(300)).await;
        let id = ServiceId::Int(2);
        let store = Arc::new(MemoryStore::with_services(vec![
            Service::new(1, "keep", server.url("/keep")),
            Service::new(2, "drop", server.url("/drop")),
        ]));
        let coordinator = coordinator(store.clone());

        coordinator.check_one(&id).await.unwrap();
        store.remove(&id).await;
        coordinator.wait_idle().await;

        assert!(store.get(&id).await.is_none());
        assert_eq!(store.len().await, 1);
    }

    #[tokio::test]
    async fn test_check_all_marks_then_records_in_one_write() {
        let server = StubServer::start_with_delay(200, Duration::from_millis(200)).await;
        let broken = StubServer::start(500).await;
        let store = Arc::new(MemoryStore::with_services(vec![
            Service::new(1, "a", server.url("/a")),
            Service::new(2, "b", broken.url("/b")),
            Service::new(3, "c", unused_local_url().await),
        ]));
        let coordinator = coordinator(store.clone());
        let batch_start = Utc::now();

        let accepted = coordinator.check_all().await.unwrap();
        assert_eq!(accepted, BulkCheckAccepted { status: ServiceStatus::Checking, total_services: 3 });
        for id in 1..=3 {
            assert_eq!(store.get(&ServiceId::Int(id)).await.unwrap().status, ServiceStatus::Checking);
        }
        assert_eq!(store.write_count(), 1);

        coordinator.wait_idle().await;
        assert_eq!(store.write_count(), 2);

        let mut statuses = Vec::new();
        for id in 1..=3 {
            let service = store.get(&ServiceId::Int(id)).await.unwrap();
            assert!(service.last_checked.unwrap() >= batch_start);
            statuses.push(service.status);
        }
        assert_eq!(statuses, vec![ServiceStatus::Up, ServiceStatus::Down, ServiceStatus::Down]);
    }

    #[tokio::test]
    async fn test_check_all_probes_concurrently() {
        let server = StubServer::start_with_delay(200, Duration::from_millis(400)).await;
        let services = (1..=4).map(|id| Service::new(id, format!("s{id}"), server.url("/"))).collect();
        let coordinator = coordinator(Arc::new(MemoryStore::with_services(services)));

        let started = Instant::now();
        coordinator.check_all().await.unwrap();
        coordinator.wait_idle().await;
        assert!(started.elapsed() < Duration::from_millis(1_200));
        assert_eq!(server.requests().await.len(), 4);
    }

    #[tokio::test]
    async fn test_check_all_survives_panicking_probes() {
        let store = Arc::new(MemoryStore::with_services(vec![
            Service::new(1, "a", "http://a.test"),
            Service::new(2, "b", "http://b.test"),
        ]));
        let coordinator =
            coordinator_with(store.clone(), ProbeExecutor::with_checker(Arc::new(PanickingChecker)));

        coordinator.check_all().await.unwrap();
        coordinator.wait_idle().await;

        for id in 1..=2 {
            assert_eq!(store.get(&ServiceId::Int(id)).await.unwrap().status, ServiceStatus::Down);
        }
    }

    #[tokio::test]
    async fn test_check_all_on_empty_set() {
        let store = Arc::new(MemoryStore::default());
        let coordinator = coordinator(store.clone());

        let accepted = coordinator.check_all().await.unwrap();
        assert_eq!(accepted.total_services, 0);
        coordinator.wait_idle().await;
        assert_eq!(store.write_count(), 0);
    }
}
