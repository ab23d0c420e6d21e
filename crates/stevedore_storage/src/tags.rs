use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use stevedore_core::registry::{ManifestMetadata, TagStore};
use stevedore_core::{ContentDigest, RepositoryName, TagError};
use stevedore_driver::StorageDriver;

use super::errors::Error;
use super::links::{read_link, write_link};
use super::manifests::fetch_manifest;
use super::paths::PathMapper;

/// Tag bindings for one repository.
///
/// Updates append the digest to the tag's `index` history before replacing
/// `current`; a crash in between leaves the tag unchanged with the index
/// one entry ahead, which readers never observe because they only follow
/// `current`. The `current` replacement itself is the driver's atomic
/// content replace, so concurrent updates degrade to last-writer-wins with
/// both digests preserved in the index.
pub struct DriverTagStore {
    driver: Arc<dyn StorageDriver>,
    paths: PathMapper,
    name: RepositoryName,
}

impl DriverTagStore {
    pub fn new(driver: Arc<dyn StorageDriver>, paths: PathMapper, name: RepositoryName) -> Self {
        Self {
            driver,
            paths,
            name,
        }
    }

    async fn current(&self, tag: &str) -> std::result::Result<Option<ContentDigest>, TagError> {
        let link = self.paths.tag_current_link_path(&self.name, tag);
        read_link(self.driver.as_ref(), &link)
            .await
            .map_err(TagError::from)
    }
}

#[async_trait]
impl TagStore for DriverTagStore {
    async fn tag(&self, tag: &str, digest: &ContentDigest) -> std::result::Result<(), TagError> {
        // history first, current second
        write_link(
            self.driver.as_ref(),
            &self.paths.tag_index_entry_link_path(&self.name, tag, digest),
            digest,
        )
        .await
        .map_err(TagError::from)?;
        write_link(
            self.driver.as_ref(),
            &self.paths.tag_current_link_path(&self.name, tag),
            digest,
        )
        .await
        .map_err(TagError::from)?;
        tracing::debug!(repository = %self.name, tag, digest = %digest, "tag updated");
        Ok(())
    }

    async fn get(&self, tag: &str) -> std::result::Result<Option<ManifestMetadata>, TagError> {
        let Some(digest) = self.current(tag).await? else {
            return Ok(None);
        };
        let fetched = fetch_manifest(self.driver.as_ref(), &self.paths, &digest)
            .await
            .map_err(TagError::from)?;
        Ok(fetched.map(|(metadata, _)| metadata))
    }

    async fn untag(&self, tag: &str) -> std::result::Result<(), TagError> {
        let dir = self.paths.tag_path(&self.name, tag);
        match self.driver.delete(&dir).await {
            Ok(()) => Ok(()),
            Err(stevedore_driver::Error::NotFound(_)) => Err(TagError::Unknown),
            Err(e) => Err(Error::from(e).into()),
        }
    }

    async fn all(&self) -> std::result::Result<Vec<String>, TagError> {
        let root = self.paths.tags_path(&self.name);
        let entries = match self.driver.list(&root).await {
            Ok(entries) => entries,
            Err(stevedore_driver::Error::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(Error::from(e).into()),
        };
        let mut tags: Vec<String> = entries
            .iter()
            .filter_map(|p| p.rsplit('/').next())
            .map(String::from)
            .collect();
        tags.sort();
        Ok(tags)
    }

    async fn list(
        &self,
        n: Option<usize>,
        last: Option<&str>,
    ) -> std::result::Result<Vec<String>, TagError> {
        let mut tags = self.all().await?;
        if let Some(last) = last {
            tags.retain(|t| t.as_str() > last);
        }
        if let Some(n) = n {
            tags.truncate(n);
        }
        Ok(tags)
    }

    async fn lookup(
        &self,
        digest: &ContentDigest,
    ) -> std::result::Result<Vec<String>, TagError> {
        // linear in the number of tags, which stays small in practice
        let mut found = Vec::new();
        for tag in self.all().await? {
            if self.current(&tag).await?.as_ref() == Some(digest) {
                found.push(tag);
            }
        }
        Ok(found)
    }

    async fn manifest_digests(
        &self,
        tag: &str,
    ) -> std::result::Result<Vec<ContentDigest>, TagError> {
        let index = self.paths.tag_index_path(&self.name, tag);
        let algorithms = match self.driver.list(&index).await {
            Ok(entries) => entries,
            Err(stevedore_driver::Error::NotFound(_)) => return Err(TagError::Unknown),
            Err(e) => return Err(Error::from(e).into()),
        };

        // index entries carry no ordering of their own; the link files'
        // mtimes recover append order
        let mut entries: Vec<(DateTime<Utc>, ContentDigest)> = Vec::new();
        for algorithm_path in algorithms {
            let Some(algorithm) = algorithm_path.rsplit('/').next().map(String::from) else {
                continue;
            };
            let hexes = match self.driver.list(&algorithm_path).await {
                Ok(entries) => entries,
                Err(stevedore_driver::Error::NotFound(_)) => continue,
                Err(e) => return Err(Error::from(e).into()),
            };
            for hex_path in hexes {
                let Some(hex) = hex_path.rsplit('/').next() else {
                    continue;
                };
                let Ok(digest) = ContentDigest::try_from(format!("{algorithm}:{hex}").as_str())
                else {
                    continue;
                };
                let link_path = format!("{hex_path}/link");
                match self.driver.stat(&link_path).await {
                    Ok(info) => entries.push((info.mtime, digest)),
                    Err(stevedore_driver::Error::NotFound(_)) => continue,
                    Err(e) => return Err(Error::from(e).into()),
                }
            }
        }
        entries.sort_by_key(|(mtime, _)| *mtime);
        Ok(entries.into_iter().map(|(_, digest)| digest).collect())
    }
}
