use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

use super::interval::IntervalDescriptor;
use super::trigger::{TimeOfDay, Trigger};
use crate::error::MonitorError;
use crate::models::{Service, ServiceId};
use crate::orchestrator::runner::CheckRunner;

/// Handle of one recurring timer.
///
/// Cancelling stops future firings only: each firing runs as its own task, so
/// a check already in flight completes normally. A firing that finds the
/// previous check of its service still running is skipped.
pub struct ScheduledJob {
    trigger: Trigger,
    handle: JoinHandle<()>,
}

impl ScheduledJob {
    fn spawn<F>(trigger: Trigger, fire: F) -> Self
    where
        F: Fn() + Send + 'static,
    {
        let handle = tokio::spawn(async move {
            let mut last_fire = Utc::now();
            loop {
                // Never fire the same slot twice if the wall clock lags the timer
                let next = trigger.next_after(last_fire.max(Utc::now()));
                let wait = (next - Utc::now()).to_std().unwrap_or_default();
                tokio::time::sleep(wait).await;
                last_fire = next;
                fire();
            }
        });

        Self { trigger, handle }
    }

    pub fn trigger(&self) -> Trigger {
        self.trigger
    }

    pub fn is_active(&self) -> bool {
        !self.handle.is_finished()
    }

    fn cancel(&self) {
        self.handle.abort();
    }
}

impl Drop for ScheduledJob {
    fn drop(&mut self) {
        self.handle.abort();
    }
}

/// Changes made by [`JobRegistry::sync`]
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncReport {
    pub scheduled: usize,
    pub rescheduled: usize,
    pub cancelled: usize,
}

impl SyncReport {
    pub fn is_empty(&self) -> bool {
        self.scheduled == 0 && self.rescheduled == 0 && self.cancelled == 0
    }
}

/// Job registry - owns every recurring timer.
///
/// At most one job exists per service identity, plus at most one daily
/// aggregate job. Schedules are never persisted; they are rebuilt from the
/// stored services on startup.
pub struct JobRegistry {
    runner: Arc<CheckRunner>,
    jobs: HashMap<ServiceId, ScheduledJob>,
    daily: Option<(TimeOfDay, ScheduledJob)>,
}

impl JobRegistry {
    pub fn new(runner: Arc<CheckRunner>) -> Self {
        Self { runner, jobs: HashMap::new(), daily: None }
    }

    /// Install the recurring job of a service, replacing any existing one
    pub fn schedule(&mut self, service: &Service) -> Trigger {
        if let Some(previous) = self.jobs.remove(&service.id) {
            previous.cancel();
            debug!(service = %service.id, "Replacing scheduled job");
        }

        let interval = IntervalDescriptor::parse(&service.interval);
        let trigger = interval.to_trigger();

        let runner = self.runner.clone();
        let id = service.id.clone();
        let job = ScheduledJob::spawn(trigger, move || {
            let runner = runner.clone();
            let id = id.clone();
            tokio::spawn(async move {
                if let Err(e) = runner.run_scheduled(&id).await {
                    error!(service = %id, "Scheduled check failed: {}", e);
                }
            });
        });

        self.jobs.insert(service.id.clone(), job);
        info!(
            service = %service.id,
            "Scheduled service: {} (every {}, {})",
            service.label(),
            interval,
            trigger
        );
        trigger
    }

    /// Replace the job of an updated service
    pub fn reschedule(&mut self, service: &Service) -> Trigger {
        self.schedule(service)
    }

    /// Stop the job of a service; returns false if there was none
    pub fn cancel(&mut self, id: &ServiceId) -> bool {
        match self.jobs.remove(id) {
            Some(job) => {
                job.cancel();
                info!(service = %id, "Cancelled scheduled job");
                true
            }
            None => false,
        }
    }

    /// Validate `HH:MM` (default 09:00) and install the daily aggregate job
    pub fn schedule_daily_check(&mut self, time: Option<&str>) -> Result<TimeOfDay, MonitorError> {
        let time = match time {
            Some(raw) => raw.parse::<TimeOfDay>()?,
            None => TimeOfDay::DEFAULT,
        };
        self.schedule_daily_at(time);
        Ok(time)
    }

    pub fn schedule_daily_at(&mut self, time: TimeOfDay) {
        self.cancel_daily_check();

        let runner = self.runner.clone();
        let job = ScheduledJob::spawn(Trigger::daily_at(time), move || {
            let runner = runner.clone();
            tokio::spawn(async move { runner.run_daily().await });
        });

        self.daily = Some((time, job));
        info!("Daily check scheduled for {} every day", time);
    }

    /// Stop the daily job; returns false if none was scheduled
    pub fn cancel_daily_check(&mut self) -> bool {
        match self.daily.take() {
            Some((_, job)) => {
                job.cancel();
                info!("Cancelled daily check job");
                true
            }
            None => false,
        }
    }

    /// Make the registry match a record set: schedule new services, reschedule
    /// changed intervals, cancel services that disappeared
    pub fn sync(&mut self, services: &[Service]) -> SyncReport {
        let mut report = SyncReport::default();

        for service in services {
            let wanted = IntervalDescriptor::parse(&service.interval).to_trigger();
            match self.jobs.get(&service.id) {
                None => {
                    self.schedule(service);
                    report.scheduled += 1;
                }
                Some(job) if job.trigger() != wanted => {
                    self.reschedule(service);
                    report.rescheduled += 1;
                }
                Some(_) => {}
            }
        }

        let live: HashSet<&ServiceId> = services.iter().map(|s| &s.id).collect();
        let stale: Vec<ServiceId> = self.jobs.keys().filter(|id| !live.contains(id)).cloned().collect();
        for id in stale {
            self.cancel(&id);
            report.cancelled += 1;
        }

        report
    }

    pub fn cancel_all(&mut self) {
        for (_, job) in self.jobs.drain() {
            job.cancel();
        }
        self.cancel_daily_check();
    }

    pub fn len(&self) -> usize {
        self.jobs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.jobs.is_empty()
    }

    pub fn is_scheduled(&self, id: &ServiceId) -> bool {
        self.jobs.get(id).is_some_and(ScheduledJob::is_active)
    }

    pub fn trigger_for(&self, id: &ServiceId) -> Option<Trigger> {
        self.jobs.get(id).map(ScheduledJob::trigger)
    }

    pub fn daily_time(&self) -> Option<TimeOfDay> {
        self.daily.as_ref().map(|(time, _)| *time)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{RawInterval, ServiceStatus};
    use crate::monitoring::ProbeExecutor;
    use crate::orchestrator::reconciler::StateReconciler;
    use crate::storage::memory::MemoryStore;
    use crate::test_support::{StubServer, service};
    use std::time::Duration;

    fn registry(store: Arc<MemoryStore>) -> JobRegistry {
        let executor = ProbeExecutor::new(5, "uptime-service-test").unwrap();
        let reconciler = Arc::new(StateReconciler::new(store));
        JobRegistry::new(Arc::new(CheckRunner::new(executor, reconciler)))
    }

    #[tokio::test]
    async fn test_schedule_twice_keeps_one_job() {
        let server = StubServer::start(200).await;
        let svc = service(1, server.url("/"), RawInterval::Seconds(1));
        let store = Arc::new(MemoryStore::with_services(vec![svc.clone()]));
        let mut registry = registry(store);

        registry.schedule(&svc);
        registry.schedule(&svc);
        assert_eq!(registry.len(), 1);
        assert!(registry.is_scheduled(&svc.id));

        tokio::time::sleep(Duration::from_millis(2_500)).await;
        let fired = server.requests().await.len();
        assert!((1..=3).contains(&fired), "one job should fire at most once per second, got {fired}");
    }

    #[tokio::test]
    async fn test_timer_fires_and_reconciles() {
        let server = StubServer::start(200).await;
        let svc = service(1, server.url("/"), RawInterval::Text("1 second".into()));
        let store = Arc::new(MemoryStore::with_services(vec![svc.clone()]));
        let mut registry = registry(store.clone());

        let trigger = registry.schedule(&svc);
        assert_eq!(trigger.expression(), "*/1 * * * * *");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            let current = store.get(&svc.id).await.unwrap();
            if current.status == ServiceStatus::Up {
                assert!(current.last_checked.is_some());
                break;
            }
            assert!(tokio::time::Instant::now() < deadline, "timer never reconciled");
            tokio::time::sleep(Duration::from_millis(100)).await;
        }
    }

    #[tokio::test]
    async fn test_cancel_stops_future_firings() {
        let server = StubServer::start(200).await;
        let svc = service(1, server.url("/"), RawInterval::Seconds(1));
        let mut registry = registry(Arc::new(MemoryStore::with_services(vec![svc.clone()])));

        registry.schedule(&svc);
        assert!(registry.cancel(&svc.id));
        assert!(!registry.is_scheduled(&svc.id));

        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(server.requests().await.is_empty());
    }

    #[tokio::test]
    async fn test_slow_probe_does_not_queue_firings() {
        let server = StubServer::start_with_delay(200, Duration::from_millis(2_500)).await;
        let svc = service(1, server.url("/"), RawInterval::Seconds(1));
        let mut registry = registry(Arc::new(MemoryStore::with_services(vec![svc.clone()])));

        registry.schedule(&svc);
        tokio::time::sleep(Duration::from_millis(4_200)).await;
        let at_cancel = server.requests().await.len();
        assert!((1..=2).contains(&at_cancel), "firings overlapped a running check: {at_cancel}");

        assert!(registry.cancel(&svc.id));
        tokio::time::sleep(Duration::from_millis(4_000)).await;
        assert_eq!(server.requests().await.len(), at_cancel);
    }

    #[tokio::test]
    async fn test_cancel_unknown_is_noop() {
        let mut registry = registry(Arc::new(MemoryStore::default()));
        assert!(!registry.cancel(&ServiceId::Int(404)));
        assert!(!registry.cancel_daily_check());
        assert!(registry.is_empty());
    }

    #[tokio::test]
    async fn test_timer_of_deleted_record_does_not_probe() {
        let server = StubServer::start(200).await;
        let svc = service(1, server.url("/"), RawInterval::Seconds(1));
        let store = Arc::new(MemoryStore::default());
        let mut registry = registry(store.clone());

        registry.schedule(&svc);
        tokio::time::sleep(Duration::from_millis(1_500)).await;
        assert!(server.requests().await.is_empty());
        assert!(store.get(&svc.id).await.is_none());
    }

    #[tokio::test]
    async fn test_daily_check_is_a_validated_singleton() {
        let mut registry = registry(Arc::new(MemoryStore::default()));

        assert!(matches!(
            registry.schedule_daily_check(Some("24:10")),
            Err(MonitorError::InvalidTimeOfDay(_))
        ));
        assert_eq!(registry.daily_time(), None);

        assert_eq!(registry.schedule_daily_check(None).unwrap(), TimeOfDay::DEFAULT);
        registry.schedule_daily_check(Some("07:30")).unwrap();
        assert_eq!(registry.daily_time(), Some(TimeOfDay::new(7, 30).unwrap()));

        assert!(registry.cancel_daily_check());
        assert!(!registry.cancel_daily_check());
        assert_eq!(registry.daily_time(), None);
    }

    #[tokio::test]
    async fn test_sync_reconciles_jobs_with_records() {
        let url = "http://127.0.0.1:9/".to_string();
        let mut registry = registry(Arc::new(MemoryStore::default()));

        let a = service(1, url.clone(), RawInterval::Text("10 minutes".into()));
        let b = service(2, url.clone(), RawInterval::Text("1 hour".into()));
        let report = registry.sync(&[a.clone(), b.clone()]);
        assert_eq!(report, SyncReport { scheduled: 2, rescheduled: 0, cancelled: 0 });

        assert!(registry.sync(&[a.clone(), b.clone()]).is_empty());

        let b_faster = b.clone().with_interval(RawInterval::Text("5 minutes".into()));
        let c = service(3, url, RawInterval::Seconds(30));
        let report = registry.sync(&[b_faster, c]);
        assert_eq!(report, SyncReport { scheduled: 1, rescheduled: 1, cancelled: 1 });
        assert!(!registry.is_scheduled(&a.id));
        assert_eq!(registry.trigger_for(&b.id).unwrap().expression(), "0 */5 * * * *");
        assert_eq!(registry.len(), 2);
    }
}
