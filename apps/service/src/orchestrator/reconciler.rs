//! Merges probe outcomes into the persisted record set.
//!
//! Every mutation is a read-modify-write of the whole set. All of them go
//! through one async mutex, and each starts from a fresh read taken after the
//! mutex is held, so two reconciliations can never lose each other's updates.

use chrono::Utc;
use std::collections::HashSet;
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::error::StorageError;
use crate::models::{Service, ServiceId, ServiceStatus};
use crate::monitoring::types::ProbeResult;
use crate::storage::ServiceStore;

/// What happened to a reconciled result
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reconciled {
    Applied,
    /// The identity was deleted while its probe was in flight
    Discarded,
}

/// Single writer of the record set
pub struct StateReconciler {
    store: Arc<dyn ServiceStore>,
    write_lock: Mutex<()>,
}

impl StateReconciler {
    pub fn new(store: Arc<dyn ServiceStore>) -> Self {
        Self { store, write_lock: Mutex::new(()) }
    }

    /// Current record set
    pub async fn load(&self) -> Result<Vec<Service>, StorageError> {
        self.store.list_services().await
    }

    /// Current record set; a storage failure is logged and reads as empty
    pub async fn list(&self) -> Vec<Service> {
        match self.load().await {
            Ok(services) => services,
            Err(e) => {
                error!("Failed to read services: {}", e);
                Vec::new()
            }
        }
    }

    /// Current record for one identity
    pub async fn find(&self, id: &ServiceId) -> Result<Option<Service>, StorageError> {
        Ok(self.load().await?.into_iter().find(|s| &s.id == id))
    }

    /// Run a read-modify-write under the writer lock.
    ///
    /// The closure returns its output and whether the set must be written back.
    pub async fn mutate<T>(
        &self,
        apply: impl FnOnce(&mut Vec<Service>) -> (T, bool),
    ) -> Result<T, StorageError> {
        let _guard = self.write_lock.lock().await;

        let mut services = self.store.list_services().await?;
        let (output, dirty) = apply(&mut services);
        if dirty {
            self.store.save_services(&services).await?;
        }
        Ok(output)
    }

    /// Merge one probe result into its record
    pub async fn apply_result(
        &self,
        id: &ServiceId,
        result: &ProbeResult,
    ) -> Result<Reconciled, StorageError> {
        let outcome = self
            .mutate(|services| match services.iter_mut().find(|s| &s.id == id) {
                Some(service) => {
                    merge(service, result);
                    (Reconciled::Applied, true)
                }
                None => (Reconciled::Discarded, false),
            })
            .await
            .inspect_err(|e| error!(service = %id, "Failed to reconcile check result: {}", e))?;

        if outcome == Reconciled::Discarded {
            info!(service = %id, "Discarded check result: service not found");
        }
        Ok(outcome)
    }

    /// Merge a batch of results with a single write; returns how many applied
    pub async fn apply_results(
        &self,
        results: &[(ServiceId, ProbeResult)],
    ) -> Result<usize, StorageError> {
        let (applied, discarded) = self
            .mutate(|services| {
                let mut applied = 0;
                let mut discarded = Vec::new();
                for (id, result) in results {
                    match services.iter_mut().find(|s| &s.id == id) {
                        Some(service) => {
                            merge(service, result);
                            applied += 1;
                        }
                        None => discarded.push(id.clone()),
                    }
                }
                ((applied, discarded), applied > 0)
            })
            .await
            .inspect_err(|e| error!("Failed to reconcile {} check results: {}", results.len(), e))?;

        for id in discarded {
            info!(service = %id, "Discarded check result: service not found");
        }
        Ok(applied)
    }

    /// Mark the given identities `checking`; returns the records that exist
    pub async fn mark_checking(&self, ids: &[ServiceId]) -> Result<Vec<Service>, StorageError> {
        let wanted: HashSet<&ServiceId> = ids.iter().collect();
        let marked = self
            .mutate(|services| {
                let marked: Vec<Service> = services
                    .iter_mut()
                    .filter(|s| wanted.contains(&s.id))
                    .map(|service| {
                        service.status = ServiceStatus::Checking;
                        service.clone()
                    })
                    .collect();
                let dirty = !marked.is_empty();
                (marked, dirty)
            })
            .await?;

        debug!("Marked {} of {} services as checking", marked.len(), ids.len());
        Ok(marked)
    }
}

/// Apply a result to a record; `lastChecked` is the reconciliation time
fn merge(service: &mut Service, result: &ProbeResult) {
    service.status = result.status.into();
    service.last_checked = Some(Utc::now());
    service.status_code = result.status_code;
    service.error = result.error.clone();
    service.response_time_ms = result.latency_ms;
}
