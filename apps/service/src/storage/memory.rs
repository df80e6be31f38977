use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use async_trait::async_trait;
use tokio::sync::Mutex;

use super::ServiceStore;
use crate::error::StorageError;
use crate::models::{Service, ServiceId};

/// In-memory record set for tests, with switchable write failures
#[derive(Default)]
pub struct MemoryStore {
    services: Mutex<Vec<Service>>,
    fail_writes: AtomicBool,
    writes: AtomicUsize,
}

impl MemoryStore {
    pub fn with_services(services: Vec<Service>) -> Self {
        Self { services: Mutex::new(services), ..Default::default() }
    }

    pub async fn get(&self, id: &ServiceId) -> Option<Service> {
        self.services.lock().await.iter().find(|s| &s.id == id).cloned()
    }

    /// Delete a record behind the reconciler's back, as an external writer would
    pub async fn remove(&self, id: &ServiceId) {
        self.services.lock().await.retain(|s| &s.id != id);
    }

    pub async fn len(&self) -> usize {
        self.services.lock().await.len()
    }

    pub fn set_fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    pub fn write_count(&self) -> usize {
        self.writes.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl ServiceStore for MemoryStore {
    async fn list_services(&self) -> Result<Vec<Service>, StorageError> {
        Ok(self.services.lock().await.clone())
    }

    async fn save_services(&self, services: &[Service]) -> Result<(), StorageError> {
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StorageError::Write {
                path: "memory".into(),
                source: std::io::Error::other("writes disabled"),
            });
        }
        *self.services.lock().await = services.to_vec();
        self.writes.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
