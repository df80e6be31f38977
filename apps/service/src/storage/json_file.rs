use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::fs;
use tracing::debug;

use super::ServiceStore;
use crate::error::StorageError;
use crate::models::Service;

/// Record set kept as a pretty-printed JSON array on disk
pub struct JsonFileStore {
    path: PathBuf,
}

impl JsonFileStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sibling file the new document is staged in before the rename
    fn staging_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait]
impl ServiceStore for JsonFileStore {
    async fn list_services(&self) -> Result<Vec<Service>, StorageError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No record set at {}, starting empty", self.path.display());
                return Ok(Vec::new());
            }
            Err(source) => return Err(StorageError::Read { path: self.path.clone(), source }),
        };

        if raw.trim().is_empty() {
            return Ok(Vec::new());
        }

        serde_json::from_str(&raw)
            .map_err(|source| StorageError::Parse { path: self.path.clone(), source })
    }

    async fn save_services(&self, services: &[Service]) -> Result<(), StorageError> {
        let document = serde_json::to_string_pretty(services)?;

        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent)
                .await
                .map_err(|source| StorageError::Write { path: parent.to_path_buf(), source })?;
        }

        // Readers must never see a half-written document
        let staging = self.staging_path();
        fs::write(&staging, document)
            .await
            .map_err(|source| StorageError::Write { path: staging.clone(), source })?;
        fs::rename(&staging, &self.path)
            .await
            .map_err(|source| StorageError::Write { path: self.path.clone(), source })?;

        debug!("Wrote {} services to {}", services.len(), self.path.display());
        Ok(())
    }
}
