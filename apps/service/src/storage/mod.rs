/// Flat record-set storage
///
/// The whole set of services is read and written as one document. Callers that
/// mutate it must go through the `StateReconciler`, which serializes writers.
pub mod json_file;
#[cfg(test)]
pub mod memory;

pub use json_file::JsonFileStore;

use async_trait::async_trait;

use crate::error::StorageError;
use crate::models::Service;

#[async_trait]
pub trait ServiceStore: Send + Sync {
    /// Return the full current record set
    async fn list_services(&self) -> Result<Vec<Service>, StorageError>;

    /// Overwrite the full record set
    async fn save_services(&self, services: &[Service]) -> Result<(), StorageError>;
}
