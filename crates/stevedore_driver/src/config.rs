use std::path::PathBuf;
use std::sync::Arc;

use serde::Deserialize;

use super::errors::Result;
use super::{FilesystemDriver, InMemoryDriver, S3Config, StorageDriver};

/// Storage backend selection, deserialized from the registry config file.
///
/// ```yaml
/// storage:
///   type: filesystem
///   rootdirectory: /var/lib/stevedore
/// ```
#[derive(Clone, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum DriverConfig {
    Filesystem { rootdirectory: PathBuf },
    Inmemory,
    S3(S3Config),
}

impl DriverConfig {
    pub async fn new_driver(&self) -> Result<Arc<dyn StorageDriver>> {
        match self {
            DriverConfig::Filesystem { rootdirectory } => {
                tracing::info!("using filesystem storage at {}", rootdirectory.display());
                Ok(Arc::new(FilesystemDriver::new(rootdirectory.clone())))
            }
            DriverConfig::Inmemory => {
                tracing::warn!("using in-memory storage, contents will not survive restart");
                Ok(Arc::new(InMemoryDriver::new()))
            }
            DriverConfig::S3(cfg) => Ok(Arc::new(cfg.new_driver().await?)),
        }
    }
}
