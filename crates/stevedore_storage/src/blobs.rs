use std::sync::Arc;

use async_trait::async_trait;
use futures::StreamExt;
use uuid::Uuid;

use stevedore_core::registry::{BlobMetadata, BlobStore, ByteRange, ByteStream};
use stevedore_core::{BlobError, ContentDigest, RepositoryName};
use stevedore_driver::StorageDriver;

use super::errors::Error;
use super::links::{read_link, write_link};
use super::paths::PathMapper;
use super::uploads::DriverBlobWriter;

/// Blob access for one repository over the storage driver.
///
/// Reads check the repository's `_layers` link before touching the global
/// blob tree, so a blob uploaded through one repository is invisible to
/// others until mounted.
pub struct DriverBlobStore {
    driver: Arc<dyn StorageDriver>,
    paths: PathMapper,
    name: RepositoryName,
}

impl DriverBlobStore {
    pub fn new(driver: Arc<dyn StorageDriver>, paths: PathMapper, name: RepositoryName) -> Self {
        Self {
            driver,
            paths,
            name,
        }
    }

    /// Metadata if the blob is linked into this repository and its bytes
    /// are published.
    async fn linked_metadata(
        &self,
        digest: &ContentDigest,
    ) -> std::result::Result<Option<BlobMetadata>, BlobError> {
        let link_path = self.paths.layer_link_path(&self.name, digest);
        let linked = read_link(self.driver.as_ref(), &link_path)
            .await
            .map_err(BlobError::from)?;
        let Some(linked) = linked else {
            return Ok(None);
        };

        match self.driver.stat(&self.paths.blob_data_path(&linked)).await {
            Ok(info) => Ok(Some(BlobMetadata {
                digest: linked,
                size: info.size,
            })),
            Err(stevedore_driver::Error::NotFound(_)) => {
                tracing::warn!(
                    repository = %self.name,
                    digest = %digest,
                    "repository links a blob with no published data"
                );
                Ok(None)
            }
            Err(e) => Err(Error::from(e).into()),
        }
    }
}

#[async_trait]
impl BlobStore for DriverBlobStore {
    type Writer = DriverBlobWriter;

    async fn head(
        &self,
        digest: &ContentDigest,
    ) -> std::result::Result<Option<BlobMetadata>, BlobError> {
        self.linked_metadata(digest).await
    }

    async fn get(
        &self,
        digest: &ContentDigest,
        range: Option<ByteRange>,
    ) -> std::result::Result<Option<(BlobMetadata, ByteStream)>, BlobError> {
        let Some(metadata) = self.linked_metadata(digest).await? else {
            return Ok(None);
        };

        let offset = range.map(|r| r.start).unwrap_or(0);
        let stream = match self
            .driver
            .reader(&self.paths.blob_data_path(&metadata.digest), offset)
            .await
        {
            Ok(stream) => stream,
            Err(stevedore_driver::Error::InvalidOffset { offset, .. }) => {
                return Err(BlobError::RangeInvalid {
                    offset,
                    size: metadata.size,
                })
            }
            Err(e) => return Err(Error::from(e).into()),
        };

        let limit = range.and_then(|r| r.end).map(|end| end + 1 - offset);
        let body = clip_stream(stream, limit);
        Ok(Some((metadata, body)))
    }

    async fn start_upload(&self) -> std::result::Result<Self::Writer, BlobError> {
        DriverBlobWriter::start(
            self.driver.clone(),
            self.paths.clone(),
            self.name.clone(),
        )
        .await
    }

    async fn resume_upload(&self, uuid: &Uuid) -> std::result::Result<Self::Writer, BlobError> {
        DriverBlobWriter::resume(
            self.driver.clone(),
            self.paths.clone(),
            self.name.clone(),
            *uuid,
        )
        .await
    }

    async fn cancel_upload(&self, uuid: &Uuid) -> std::result::Result<(), BlobError> {
        let dir = self.paths.upload_path(&self.name, uuid);
        match self.driver.delete(&dir).await {
            Ok(()) => Ok(()),
            Err(stevedore_driver::Error::NotFound(_)) => Err(BlobError::UploadUnknown),
            Err(e) => Err(Error::from(e).into()),
        }
    }

    async fn mount(
        &self,
        digest: &ContentDigest,
        from: &RepositoryName,
    ) -> std::result::Result<Option<BlobMetadata>, BlobError> {
        let source_link = self.paths.layer_link_path(from, digest);
        let linked = read_link(self.driver.as_ref(), &source_link)
            .await
            .map_err(BlobError::from)?;
        let Some(linked) = linked else {
            return Ok(None);
        };

        let info = match self.driver.stat(&self.paths.blob_data_path(&linked)).await {
            Ok(info) => info,
            Err(stevedore_driver::Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(Error::from(e).into()),
        };

        write_link(
            self.driver.as_ref(),
            &self.paths.layer_link_path(&self.name, &linked),
            &linked,
        )
        .await
        .map_err(BlobError::from)?;

        tracing::info!(
            repository = %self.name,
            from = %from,
            digest = %linked,
            "blob mounted across repositories"
        );
        Ok(Some(BlobMetadata {
            digest: linked,
            size: info.size,
        }))
    }

    async fn delete(&self, digest: &ContentDigest) -> std::result::Result<(), BlobError> {
        let link_path = self.paths.layer_link_path(&self.name, digest);
        let linked = read_link(self.driver.as_ref(), &link_path)
            .await
            .map_err(BlobError::from)?;
        if linked.is_none() {
            return Err(BlobError::Unknown);
        }
        // only the membership link goes away; the bytes are the garbage
        // collector's to reclaim once no repository links remain
        match self.driver.delete(&link_path).await {
            Ok(()) | Err(stevedore_driver::Error::NotFound(_)) => Ok(()),
            Err(e) => Err(Error::from(e).into()),
        }
    }
}

/// Truncate a driver stream after `limit` bytes and box the error type for
/// the response body.
fn clip_stream(
    stream: stevedore_driver::FileReader,
    limit: Option<u64>,
) -> ByteStream {
    match limit {
        None => stream
            .map(|chunk| {
                chunk.map_err(|e| Box::new(e) as Box<dyn std::error::Error + Send + Sync>)
            })
            .boxed(),
        Some(limit) => stream
            .scan(limit, |remaining, chunk| {
                let result = match chunk {
                    Err(e) => Some(Err(Box::new(e) as Box<dyn std::error::Error + Send + Sync>)),
                    Ok(chunk) => {
                        if *remaining == 0 {
                            None
                        } else if (chunk.len() as u64) <= *remaining {
                            *remaining -= chunk.len() as u64;
                            Some(Ok(chunk))
                        } else {
                            let take = *remaining as usize;
                            *remaining = 0;
                            Some(Ok(chunk.slice(..take)))
                        }
                    }
                };
                futures::future::ready(result)
            })
            .boxed(),
    }
}
