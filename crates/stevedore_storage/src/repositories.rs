use std::sync::Arc;

use async_trait::async_trait;

use stevedore_core::registry::{RepositoryStore, RepositoryStoreManager};
use stevedore_core::{RepositoryError, RepositoryName};
use stevedore_driver::StorageDriver;

use super::blobs::DriverBlobStore;
use super::errors::Error;
use super::manifests::DriverManifestStore;
use super::paths::PathMapper;
use super::tags::DriverTagStore;

/// Hands out [`DriverRepository`] instances over a shared storage driver.
#[derive(Clone)]
pub struct DriverRegistry {
    driver: Arc<dyn StorageDriver>,
    paths: PathMapper,
    skip_dependency_verification: bool,
}

impl DriverRegistry {
    pub fn new(driver: Arc<dyn StorageDriver>) -> Self {
        Self {
            driver,
            paths: PathMapper::new(),
            skip_dependency_verification: false,
        }
    }

    /// Disable manifest dependency verification. Only sensible for
    /// proxy-cache deployments that pull content on demand.
    pub fn with_skipped_dependency_verification(mut self) -> Self {
        self.skip_dependency_verification = true;
        self
    }

    pub fn paths(&self) -> &PathMapper {
        &self.paths
    }

    pub fn driver(&self) -> &Arc<dyn StorageDriver> {
        &self.driver
    }

    fn repository(&self, name: &RepositoryName) -> DriverRepository {
        DriverRepository {
            driver: self.driver.clone(),
            paths: self.paths.clone(),
            name: name.clone(),
            skip_dependency_verification: self.skip_dependency_verification,
        }
    }

    /// Recursively search the repositories tree for directories holding
    /// registry state (`_manifests`, `_layers`, or `_uploads`). A
    /// repository's own components never start with `_`, so the markers
    /// terminate recursion.
    async fn find_repositories(&self) -> Result<Vec<String>, Error> {
        let root = self.paths.repositories_path();
        let mut pending = match self.driver.list(&root).await {
            Ok(children) => children,
            Err(stevedore_driver::Error::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let prefix = format!("{root}/");
        let mut found = Vec::new();
        while let Some(dir) = pending.pop() {
            let children = match self.driver.list(&dir).await {
                Ok(children) => children,
                Err(stevedore_driver::Error::NotFound(_)) => continue,
                Err(e) => return Err(e.into()),
            };
            let is_repository = children
                .iter()
                .filter_map(|c| c.rsplit('/').next())
                .any(|base| matches!(base, "_manifests" | "_layers" | "_uploads"));
            if is_repository {
                if let Some(name) = dir.strip_prefix(&prefix) {
                    found.push(name.to_string());
                }
                continue;
            }
            pending.extend(
                children
                    .into_iter()
                    .filter(|c| c.rsplit('/').next().map_or(false, |b| !b.starts_with('_'))),
            );
        }
        found.sort();
        Ok(found)
    }
}

#[async_trait]
impl RepositoryStoreManager for DriverRegistry {
    type RepositoryStore = DriverRepository;

    async fn get(
        &self,
        name: &RepositoryName,
    ) -> std::result::Result<Option<DriverRepository>, RepositoryError> {
        let exists = self
            .driver
            .exists(&self.paths.repository_path(name))
            .await
            .map_err(|e| RepositoryError::from(Error::from(e)))?;
        Ok(exists.then(|| self.repository(name)))
    }

    async fn create(
        &self,
        name: &RepositoryName,
    ) -> std::result::Result<DriverRepository, RepositoryError> {
        // repositories materialize on first write; nothing to persist here
        Ok(self.repository(name))
    }

    async fn list(
        &self,
        n: Option<usize>,
        last: Option<&str>,
    ) -> std::result::Result<Vec<String>, RepositoryError> {
        let mut names = self
            .find_repositories()
            .await
            .map_err(RepositoryError::from)?;
        if let Some(last) = last {
            names.retain(|name| name.as_str() > last);
        }
        if let Some(n) = n {
            names.truncate(n);
        }
        Ok(names)
    }
}

/// Stores of a single repository, bound to its validated name.
#[derive(Clone)]
pub struct DriverRepository {
    driver: Arc<dyn StorageDriver>,
    paths: PathMapper,
    name: RepositoryName,
    skip_dependency_verification: bool,
}

impl RepositoryStore for DriverRepository {
    type BlobStore = DriverBlobStore;
    type ManifestStore = DriverManifestStore;
    type TagStore = DriverTagStore;

    fn name(&self) -> &RepositoryName {
        &self.name
    }

    fn get_blob_store(&self) -> DriverBlobStore {
        DriverBlobStore::new(self.driver.clone(), self.paths.clone(), self.name.clone())
    }

    fn get_manifest_store(&self) -> DriverManifestStore {
        DriverManifestStore::new(
            self.driver.clone(),
            self.paths.clone(),
            self.name.clone(),
            self.skip_dependency_verification,
        )
    }

    fn get_tag_store(&self) -> DriverTagStore {
        DriverTagStore::new(self.driver.clone(), self.paths.clone(), self.name.clone())
    }
}
