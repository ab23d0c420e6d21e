//! Resumable upload sessions.
//!
//! A session is a directory under the owning repository's `_uploads` tree:
//! an append-only `data` file, a `startedat` timestamp, and digest
//! checkpoints under `hashstate`. No session state is held in memory
//! between requests; any registry instance sharing the driver can resume
//! any session.
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Duration, Utc};
use futures::StreamExt;
use hyper::body::{Body, HttpBody};
use uuid::Uuid;

use stevedore_core::registry::{BlobMetadata, BlobWriter, ExpectedDescriptor};
use stevedore_core::{
    BlobError, ContentDigest, DigestAlgorithm, Digester, RepositoryName,
};
use stevedore_driver::{FileWriter, StorageDriver};

use super::errors::{Error, Result};
use super::links::write_link;
use super::paths::PathMapper;

/// An open upload session bound to one request.
///
/// The driver-level write handle is opened lazily on the first append and
/// committed when the request's body has been drained, so partial progress
/// is durable even when the client goes away mid-chunk.
pub struct DriverBlobWriter {
    driver: Arc<dyn StorageDriver>,
    paths: PathMapper,
    name: RepositoryName,
    uuid: Uuid,
    started_at: DateTime<Utc>,
    digester: Digester,
    writer: Option<Box<dyn FileWriter>>,
}

impl DriverBlobWriter {
    pub(crate) async fn start(
        driver: Arc<dyn StorageDriver>,
        paths: PathMapper,
        name: RepositoryName,
    ) -> std::result::Result<Self, BlobError> {
        let uuid = Uuid::new_v4();
        let started_at = Utc::now();

        let writer = Self {
            driver,
            paths,
            name,
            uuid,
            started_at,
            digester: Digester::default(),
            writer: None,
        };
        writer
            .driver
            .put_content(
                &writer.paths.upload_started_at_path(&writer.name, &uuid),
                started_at.to_rfc3339().into(),
            )
            .await
            .map_err(|e| BlobError::from(Error::from(e)))?;
        // the empty data file makes the session immediately resumable
        writer
            .driver
            .put_content(
                &writer.paths.upload_data_path(&writer.name, &uuid),
                bytes::Bytes::new(),
            )
            .await
            .map_err(|e| BlobError::from(Error::from(e)))?;
        writer.checkpoint().await.map_err(BlobError::from)?;

        tracing::debug!(repository = %writer.name, upload = %uuid, "upload session started");
        Ok(writer)
    }

    pub(crate) async fn resume(
        driver: Arc<dyn StorageDriver>,
        paths: PathMapper,
        name: RepositoryName,
        uuid: Uuid,
    ) -> std::result::Result<Self, BlobError> {
        let data_path = paths.upload_data_path(&name, &uuid);
        let size = match driver.stat(&data_path).await {
            Ok(info) => info.size,
            Err(stevedore_driver::Error::NotFound(_)) => return Err(BlobError::UploadUnknown),
            Err(e) => return Err(Error::from(e).into()),
        };

        let started_at_path = paths.upload_started_at_path(&name, &uuid);
        let started_at = match driver.get_content(&started_at_path).await {
            Ok(content) => {
                let text = String::from_utf8_lossy(&content).into_owned();
                DateTime::parse_from_rfc3339(text.trim())
                    .map(|t| t.with_timezone(&Utc))
                    .map_err(|_| {
                        BlobError::from(Error::CorruptTimestamp {
                            path: started_at_path.clone(),
                            value: text,
                        })
                    })?
            }
            Err(stevedore_driver::Error::NotFound(_)) => return Err(BlobError::UploadUnknown),
            Err(e) => return Err(Error::from(e).into()),
        };

        // The hash compressor is not serializable, so the digester is
        // rebuilt by replaying the stored bytes; the checkpoint files only
        // record how far the previous instance got.
        let mut digester = Digester::default();
        if size > 0 {
            let mut stream = driver
                .reader(&data_path, 0)
                .await
                .map_err(|e| BlobError::from(Error::from(e)))?;
            while let Some(chunk) = stream.next().await {
                let chunk = chunk
                    .map_err(|e| BlobError::Internal(format!("replaying upload data: {e}")))?;
                digester.update(&chunk);
            }
        }

        let writer = Self {
            driver,
            paths,
            name,
            uuid,
            started_at,
            digester,
            writer: None,
        };
        if let Some(checkpointed) = writer.latest_checkpoint().await? {
            if checkpointed != size {
                tracing::debug!(
                    upload = %uuid,
                    checkpointed,
                    size,
                    "digest checkpoint lags upload data"
                );
            }
        }
        Ok(writer)
    }

    /// Offset of the most recent digest checkpoint, if any.
    async fn latest_checkpoint(&self) -> std::result::Result<Option<u64>, BlobError> {
        let dir = format!(
            "{}/{}",
            self.paths.upload_hashstates_path(&self.name, &self.uuid),
            self.digester.algorithm()
        );
        let entries = match self.driver.list(&dir).await {
            Ok(entries) => entries,
            Err(stevedore_driver::Error::NotFound(_)) => return Ok(None),
            Err(e) => return Err(Error::from(e).into()),
        };
        Ok(entries
            .iter()
            .filter_map(|p| p.rsplit('/').next())
            .filter_map(|n| n.parse::<u64>().ok())
            .max())
    }

    async fn checkpoint(&self) -> Result<()> {
        let state = self.digester.state();
        let path = self.paths.upload_hashstate_path(
            &self.name,
            &self.uuid,
            state.algorithm,
            state.offset,
        );
        self.driver
            .put_content(&path, serde_json::to_vec(&state)?.into())
            .await?;
        Ok(())
    }

    /// Durably persist everything appended so far.
    async fn flush(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.take() {
            writer.commit().await?;
        }
        self.checkpoint().await
    }

    /// Digest the stored data with a non-canonical algorithm.
    async fn redigest(&self, algorithm: DigestAlgorithm) -> Result<ContentDigest> {
        let mut digester = algorithm.digester();
        let data_path = self.paths.upload_data_path(&self.name, &self.uuid);
        let mut stream = self.driver.reader(&data_path, 0).await?;
        while let Some(chunk) = stream.next().await {
            let chunk = chunk.map_err(|e| Error::Driver(stevedore_driver::Error::Io {
                path: data_path.clone(),
                source: e,
            }))?;
            digester.update(&chunk);
        }
        Ok(digester.finalize())
    }

    async fn destroy(&self) {
        let dir = self.paths.upload_path(&self.name, &self.uuid);
        match self.driver.delete(&dir).await {
            Ok(()) | Err(stevedore_driver::Error::NotFound(_)) => {}
            Err(e) => {
                tracing::warn!(upload = %self.uuid, "failed to remove upload session: {e}");
            }
        }
    }
}

#[async_trait]
impl BlobWriter for DriverBlobWriter {
    fn uuid(&self) -> &Uuid {
        &self.uuid
    }

    fn size(&self) -> u64 {
        self.digester.bytes()
    }

    fn started_at(&self) -> DateTime<Utc> {
        self.started_at
    }

    async fn append(&mut self, body: Body) -> std::result::Result<u64, BlobError> {
        if self.writer.is_none() {
            let data_path = self.paths.upload_data_path(&self.name, &self.uuid);
            let writer = self
                .driver
                .writer(&data_path, true)
                .await
                .map_err(|e| BlobError::from(Error::from(e)))?;
            self.writer = Some(writer);
        }
        let writer = self.writer.as_mut().expect("writer was just opened");

        let mut body = body;
        let mut disconnected = false;
        while let Some(chunk) = body.data().await {
            match chunk {
                Ok(chunk) => {
                    self.digester.update(&chunk);
                    writer
                        .write(chunk)
                        .await
                        .map_err(|e| BlobError::from(Error::from(e)))?;
                }
                Err(e) => {
                    tracing::info!(upload = %self.uuid, "client went away mid-upload: {e}");
                    disconnected = true;
                    break;
                }
            }
        }

        // keep what arrived either way; the session stays resumable
        self.flush().await.map_err(BlobError::from)?;

        if disconnected {
            Err(BlobError::ClientDisconnect)
        } else {
            Ok(self.digester.bytes())
        }
    }

    async fn commit(
        mut self,
        expected: ExpectedDescriptor,
    ) -> std::result::Result<BlobMetadata, BlobError> {
        self.flush().await.map_err(BlobError::from)?;

        let size = self.digester.bytes();
        if let Some(expected_size) = expected.size {
            if expected_size != size {
                return Err(BlobError::SizeInvalid {
                    expected: expected_size,
                    received: size,
                });
            }
        }

        let computed = if expected.digest.algorithm() == self.digester.algorithm() {
            std::mem::take(&mut self.digester).finalize()
        } else {
            self.redigest(expected.digest.algorithm())
                .await
                .map_err(BlobError::from)?
        };
        if computed != expected.digest {
            self.destroy().await;
            return Err(BlobError::DigestMismatch {
                expected: expected.digest.to_string(),
                computed: computed.to_string(),
            });
        }

        let blob_data = self.paths.blob_data_path(&expected.digest);
        let exists = self
            .driver
            .exists(&blob_data)
            .await
            .map_err(|e| BlobError::from(Error::from(e)))?;
        if exists {
            // content-addressed dedup: identical bytes are already
            // published, this upload's copy is discarded with the session
            tracing::debug!(digest = %expected.digest, "blob already exists, discarding upload");
        } else {
            self.driver
                .rename(
                    &self.paths.upload_data_path(&self.name, &self.uuid),
                    &blob_data,
                )
                .await
                .map_err(|e| BlobError::from(Error::from(e)))?;
        }

        write_link(
            self.driver.as_ref(),
            &self.paths.layer_link_path(&self.name, &expected.digest),
            &expected.digest,
        )
        .await
        .map_err(BlobError::from)?;

        self.destroy().await;
        tracing::info!(
            repository = %self.name,
            digest = %expected.digest,
            size,
            "blob committed"
        );
        Ok(BlobMetadata {
            digest: expected.digest,
            size,
        })
    }

    async fn cancel(self) -> std::result::Result<(), BlobError> {
        self.destroy().await;
        Ok(())
    }
}

/// Remove upload sessions older than `age`.
///
/// Coordinates through the driver alone: concurrent sweeps may race on the
/// same session, and losers treat the resulting not-found as already done.
pub async fn purge_stale_uploads(
    driver: &Arc<dyn StorageDriver>,
    paths: &PathMapper,
    age: Duration,
) -> Result<usize> {
    let root = paths.repositories_path();
    let files = match driver.walk(&root).await {
        Ok(files) => files,
        Err(stevedore_driver::Error::NotFound(_)) => return Ok(0),
        Err(e) => return Err(e.into()),
    };

    let now = Utc::now();
    let mut purged = 0;
    for info in files {
        if !info.path.ends_with("/startedat") || !info.path.contains("/_uploads/") {
            continue;
        }
        let content = match driver.get_content(&info.path).await {
            Ok(content) => content,
            Err(stevedore_driver::Error::NotFound(_)) => continue,
            Err(e) => return Err(e.into()),
        };
        let text = String::from_utf8_lossy(&content);
        let started_at = match DateTime::parse_from_rfc3339(text.trim()) {
            Ok(t) => t.with_timezone(&Utc),
            Err(_) => {
                tracing::warn!(path = %info.path, "unreadable startedat, skipping session");
                continue;
            }
        };
        if now - started_at <= age {
            continue;
        }

        let session_dir = info.path.trim_end_matches("/startedat");
        match driver.delete(session_dir).await {
            Ok(()) => {
                tracing::info!(session = %session_dir, "purged stale upload session");
                purged += 1;
            }
            // another sweeper got there first
            Err(stevedore_driver::Error::NotFound(_)) => {}
            Err(e) => return Err(e.into()),
        }
    }
    Ok(purged)
}
