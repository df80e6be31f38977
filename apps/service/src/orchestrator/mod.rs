/// Orchestrator module - coordinates all components
///
/// The orchestrator owns the process lifecycle:
/// - Rebuilds every service job (and the daily job) from storage on startup
/// - Re-reads storage periodically so external edits take effect
/// - Exposes the management operations used by the CLI
///
/// Probe outcomes only ever reach storage through the `reconciler`, which is
/// the single writer of the record set.
pub mod coordinator;
pub mod reconciler;
pub mod runner;


pub use coordinator::{BackgroundCoordinator, BulkCheckAccepted, CheckAccepted};
pub use reconciler::StateReconciler;
pub use runner::CheckRunner;

use anyhow::Result;
use serde_json::Value;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::{self, Config};
use crate::error::MonitorError;
use crate::models::{AuthConfig, FileConfig, ProbeMethod, RawInterval, Service, ServiceId, ServiceStatus};
use crate::monitoring::{JobRegistry, ProbeExecutor, SyncReport, TimeOfDay, Trigger};
use crate::storage::{JsonFileStore, ServiceStore};
use crate::validation::validate_service;

/// Fields of a service created through the management interface
#[derive(Debug, Clone, Default)]
pub struct NewService {
    pub name: String,
    pub url: String,
    pub method: ProbeMethod,
    pub interval: Option<RawInterval>,
    pub auth: Option<AuthConfig>,
    pub body: Option<Value>,
    pub file_config: Option<FileConfig>,
}

/// Fields to change on an existing service; `None` keeps the current value
#[derive(Debug, Clone, Default)]
pub struct ServiceUpdate {
    pub name: Option<String>,
    pub url: Option<String>,
    pub method: Option<ProbeMethod>,
    pub interval: Option<RawInterval>,
    pub auth: Option<AuthConfig>,
    pub body: Option<Value>,
    pub file_config: Option<FileConfig>,
}

impl ServiceUpdate {
    fn apply(self, service: &mut Service) {
        if let Some(name) = self.name {
            service.name = name;
        }
        if let Some(url) = self.url {
            service.url = url;
        }
        if let Some(method) = self.method {
            service.method = method;
        }
        if let Some(interval) = self.interval {
            service.interval = interval;
        }
        if let Some(auth) = self.auth {
            service.auth = Some(auth);
        }
        if let Some(body) = self.body {
            service.body = Some(body);
        }
        if let Some(file_config) = self.file_config {
            service.file_config = Some(file_config);
        }
    }
}

/// Main orchestrator for the uptime monitor
pub struct Orchestrator {
    schedule: config::Schedule,
    runner: Arc<CheckRunner>,
    registry: Mutex<JobRegistry>,
    coordinator: BackgroundCoordinator,
}

impl Orchestrator {
    /// Build an orchestrator over the JSON record set named in the config
    pub fn new(config: &Config) -> Result<Self> {
        let store = JsonFileStore::new(&config.storage.services_file);
        let executor = ProbeExecutor::new(config.probe.timeout_seconds, &config.probe.user_agent)?;
        info!("Using record set {}", store.path().display());
        Ok(Self::with_store(Arc::new(store), executor, config.schedule.clone()))
    }

    pub fn with_store(
        store: Arc<dyn ServiceStore>,
        executor: ProbeExecutor,
        schedule: config::Schedule,
    ) -> Self {
        let reconciler = Arc::new(StateReconciler::new(store));
        let runner = Arc::new(CheckRunner::new(executor, reconciler));

        Self {
            schedule,
            registry: Mutex::new(JobRegistry::new(runner.clone())),
            coordinator: BackgroundCoordinator::new(runner.clone()),
            runner,
        }
    }

    fn reconciler(&self) -> &StateReconciler {
        self.runner.reconciler()
    }

    /// Rebuild every job from the current record set; returns the number of
    /// scheduled services
    pub async fn init(&self) -> Result<usize, MonitorError> {
        let services = self.reconciler().list().await;
        let mut registry = self.registry.lock().await;

        registry.sync(&services);
        if self.schedule.daily_check_enabled {
            registry.schedule_daily_check(Some(self.schedule.daily_check.as_str()))?;
        } else {
            registry.cancel_daily_check();
        }

        info!("Monitoring {} services", registry.len());
        Ok(registry.len())
    }

    /// Bring the job registry in line with the record set
    pub async fn resync(&self) -> SyncReport {
        match self.reconciler().load().await {
            Ok(services) => self.registry.lock().await.sync(&services),
            Err(e) => {
                // Keep the current jobs rather than cancelling everything
                warn!("Failed to reload services: {}", e);
                SyncReport::default()
            }
        }
    }

    /// Run until Ctrl-C, re-reading the record set periodically
    pub async fn run(&self) -> Result<()> {
        info!("Starting uptime monitor...");
        self.init().await?;

        let sync_interval = Duration::from_secs(self.schedule.sync_interval_seconds.max(1));
        let mut last_sync = Instant::now();

        loop {
            tokio::select! {
                signal = tokio::signal::ctrl_c() => {
                    if let Err(e) = signal {
                        warn!("Failed to listen for shutdown signal: {}", e);
                    }
                    info!("Shutting down uptime monitor...");
                    break;
                }

                _ = tokio::time::sleep_until(last_sync + sync_interval) => {
                    debug!("Checking for new or updated services...");
                    let report = self.resync().await;
                    if !report.is_empty() {
                        info!(
                            "Services reloaded: {} scheduled, {} rescheduled, {} cancelled",
                            report.scheduled,
                            report.rescheduled,
                            report.cancelled
                        );
                    }
                    last_sync = Instant::now();
                }
            }
        }

        self.registry.lock().await.cancel_all();
        self.coordinator.wait_idle().await;
        Ok(())
    }

    pub async fn list_services(&self) -> Vec<Service> {
        self.reconciler().list().await
    }

    pub async fn find_service(&self, id: &ServiceId) -> Result<Option<Service>, MonitorError> {
        Ok(self.reconciler().find(id).await?)
    }

    pub async fn schedule(&self, service: &Service) -> Trigger {
        self.registry.lock().await.schedule(service)
    }

    pub async fn reschedule(&self, service: &Service) -> Trigger {
        self.registry.lock().await.reschedule(service)
    }

    pub async fn cancel(&self, id: &ServiceId) -> bool {
        self.registry.lock().await.cancel(id)
    }

    pub async fn schedule_daily_check(&self, time: Option<&str>) -> Result<TimeOfDay, MonitorError> {
        self.registry.lock().await.schedule_daily_check(time)
    }

    pub async fn cancel_daily_check(&self) -> bool {
        self.registry.lock().await.cancel_daily_check()
    }

    pub async fn daily_check_time(&self) -> Option<TimeOfDay> {
        self.registry.lock().await.daily_time()
    }

    pub async fn trigger_for(&self, id: &ServiceId) -> Option<Trigger> {
        self.registry.lock().await.trigger_for(id)
    }

    pub async fn scheduled_services(&self) -> usize {
        self.registry.lock().await.len()
    }

    pub async fn check_one(&self, id: &ServiceId) -> Result<CheckAccepted, MonitorError> {
        self.coordinator.check_one(id).await
    }

    pub async fn check_all(&self) -> Result<BulkCheckAccepted, MonitorError> {
        self.coordinator.check_all().await
    }

    /// Wait for on-demand checks started so far
    pub async fn wait_idle(&self) {
        self.coordinator.wait_idle().await
    }

    /// Store a new service under the next integer id and schedule it
    pub async fn add_service(&self, new: NewService) -> Result<Service, MonitorError> {
        let mut draft = Service::new(0, new.name, new.url);
        draft.method = new.method;
        draft.interval = new.interval.unwrap_or_default();
        draft.auth = new.auth;
        draft.body = new.body;
        draft.file_config = new.file_config;
        validate_service(&draft).into_result()?;

        let service = self
            .reconciler()
            .mutate(|services| {
                let next_id = services
                    .iter()
                    .filter_map(|s| match s.id {
                        ServiceId::Int(id) => Some(id),
                        ServiceId::Text(_) => None,
                    })
                    .max()
                    .unwrap_or(0)
                    .saturating_add(1);

                draft.id = ServiceId::Int(next_id);
                draft.status = ServiceStatus::Unknown;
                services.push(draft.clone());
                (draft, true)
            })
            .await?;

        info!(service = %service.id, "Added service {}", service.label());
        self.schedule(&service).await;
        Ok(service)
    }

    /// Merge changes into a stored service and reschedule it
    pub async fn update_service(
        &self,
        id: &ServiceId,
        update: ServiceUpdate,
    ) -> Result<Service, MonitorError> {
        let service = self
            .reconciler()
            .mutate(|services| {
                let Some(current) = services.iter_mut().find(|s| &s.id == id) else {
                    return (Err(MonitorError::NotFound(id.clone())), false);
                };

                let mut updated = current.clone();
                update.apply(&mut updated);
                if let Err(e) = validate_service(&updated).into_result() {
                    return (Err(e), false);
                }

                *current = updated.clone();
                (Ok(updated), true)
            })
            .await??;

        info!(service = %service.id, "Updated service {}", service.label());
        self.reschedule(&service).await;
        Ok(service)
    }

    /// Delete a stored service and cancel its job
    pub async fn remove_service(&self, id: &ServiceId) -> Result<Service, MonitorError> {
        let removed = self
            .reconciler()
            .mutate(|services| match services.iter().position(|s| &s.id == id) {
                Some(index) => (Some(services.remove(index)), true),
                None => (None, false),
            })
            .await?
            .ok_or_else(|| MonitorError::NotFound(id.clone()))?;

        self.cancel(id).await;
        info!(service = %id, "Removed service {}", removed.label());
        Ok(removed)
    }
}
