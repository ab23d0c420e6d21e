use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use futures::StreamExt;

use stevedore_core::manifest::{self, ReferenceKind};
use stevedore_core::registry::{ByteStream, ManifestMetadata, ManifestRef, ManifestStore, TagStore};
use stevedore_core::{
    BlobError, ContentDigest, DigestAlgorithm, ManifestError, RepositoryName, VerificationError,
};
use stevedore_driver::StorageDriver;

use super::errors::{Error, Result};
use super::links::{read_link, write_link};
use super::paths::PathMapper;
use super::tags::DriverTagStore;

/// Manifest access for one repository.
///
/// A manifest's bytes live in the global blob tree like any other blob; the
/// repository holds a revision link to them. Typed parsing happens on the
/// way in (for verification) and on the way out (for the stored media
/// type), but the payload itself is never reserialized.
pub struct DriverManifestStore {
    driver: Arc<dyn StorageDriver>,
    paths: PathMapper,
    name: RepositoryName,
    skip_dependency_verification: bool,
}

impl DriverManifestStore {
    pub fn new(
        driver: Arc<dyn StorageDriver>,
        paths: PathMapper,
        name: RepositoryName,
        skip_dependency_verification: bool,
    ) -> Self {
        Self {
            driver,
            paths,
            name,
            skip_dependency_verification,
        }
    }

    fn tag_store(&self) -> DriverTagStore {
        DriverTagStore::new(self.driver.clone(), self.paths.clone(), self.name.clone())
    }

    /// Resolve a reference to the digest of a stored revision, if any.
    async fn resolve(&self, key: &ManifestRef) -> Result<Option<ContentDigest>> {
        match key {
            ManifestRef::Digest(digest) => {
                let link = self.paths.manifest_revision_link_path(&self.name, digest);
                Ok(read_link(self.driver.as_ref(), &link).await?)
            }
            ManifestRef::Tag(tag) => {
                let link = self.paths.tag_current_link_path(&self.name, tag);
                Ok(read_link(self.driver.as_ref(), &link).await?)
            }
        }
    }

    /// Collect every verification failure instead of stopping at the first,
    /// so the client learns about all missing dependencies in one response.
    async fn verify(&self, parsed: &manifest::ParsedManifest) -> Result<Vec<VerificationError>> {
        let mut failures = Vec::new();
        for reference in parsed.references() {
            if !reference.verifiable {
                continue;
            }
            let digest = match ContentDigest::try_from(reference.digest.as_str()) {
                Ok(digest) => digest,
                Err(_) => {
                    failures.push(VerificationError::InvalidDigest(reference.digest.clone()));
                    continue;
                }
            };
            match reference.kind {
                ReferenceKind::Config | ReferenceKind::Layer => {
                    let link = self.paths.layer_link_path(&self.name, &digest);
                    if read_link(self.driver.as_ref(), &link).await?.is_none() {
                        failures.push(VerificationError::UnknownBlob(digest.to_string()));
                    }
                }
                ReferenceKind::Manifest => {
                    let link = self.paths.manifest_revision_link_path(&self.name, &digest);
                    if read_link(self.driver.as_ref(), &link).await?.is_none() {
                        failures.push(VerificationError::UnknownManifest(digest.to_string()));
                    }
                }
            }
        }
        Ok(failures)
    }
}

/// Load a stored manifest's bytes and derive its metadata.
///
/// The media type comes from re-parsing the stored payload; serving uses
/// the original bytes untouched.
pub(crate) async fn fetch_manifest(
    driver: &dyn StorageDriver,
    paths: &PathMapper,
    digest: &ContentDigest,
) -> Result<Option<(ManifestMetadata, Bytes)>> {
    let bytes = match driver.get_content(&paths.blob_data_path(digest)).await {
        Ok(bytes) => bytes,
        Err(stevedore_driver::Error::NotFound(_)) => {
            tracing::warn!(digest = %digest, "manifest revision links missing blob data");
            return Ok(None);
        }
        Err(e) => return Err(e.into()),
    };
    let media_type = match manifest::parse(None, &bytes) {
        Ok(parsed) => Some(parsed.media_type),
        Err(e) => {
            tracing::warn!(digest = %digest, "stored manifest failed to parse: {e}");
            None
        }
    };
    Ok(Some((
        ManifestMetadata {
            digest: digest.clone(),
            size: bytes.len() as u64,
            media_type,
        },
        bytes,
    )))
}

#[async_trait]
impl ManifestStore for DriverManifestStore {
    async fn head(
        &self,
        key: &ManifestRef,
    ) -> std::result::Result<Option<ManifestMetadata>, ManifestError> {
        let Some(digest) = self.resolve(key).await.map_err(ManifestError::from)? else {
            return Ok(None);
        };
        let fetched = fetch_manifest(self.driver.as_ref(), &self.paths, &digest)
            .await
            .map_err(ManifestError::from)?;
        Ok(fetched.map(|(metadata, _)| metadata))
    }

    async fn get(
        &self,
        key: &ManifestRef,
    ) -> std::result::Result<Option<(ManifestMetadata, ByteStream)>, ManifestError> {
        let Some(digest) = self.resolve(key).await.map_err(ManifestError::from)? else {
            return Ok(None);
        };
        let Some((metadata, bytes)) = fetch_manifest(self.driver.as_ref(), &self.paths, &digest)
            .await
            .map_err(ManifestError::from)?
        else {
            return Ok(None);
        };
        let body = futures::stream::once(async move { Ok(bytes) }).boxed();
        Ok(Some((metadata, body)))
    }

    async fn put(
        &self,
        key: &ManifestRef,
        media_type: Option<&str>,
        bytes: Bytes,
    ) -> std::result::Result<ManifestMetadata, ManifestError> {
        let parsed = manifest::parse(media_type, &bytes)?;

        // the digest is computed over the payload exactly as received; a
        // push by digest must agree with it
        let algorithm = match key {
            ManifestRef::Digest(d) => d.algorithm(),
            ManifestRef::Tag(_) => DigestAlgorithm::Sha256,
        };
        let mut digester = algorithm.digester();
        digester.update(&bytes);
        let digest = digester.finalize();
        if let ManifestRef::Digest(expected) = key {
            if expected != &digest {
                return Err(ManifestError::Blob(BlobError::DigestMismatch {
                    expected: expected.to_string(),
                    computed: digest.to_string(),
                }));
            }
        }

        if !self.skip_dependency_verification {
            let failures = self.verify(&parsed).await.map_err(ManifestError::from)?;
            if !failures.is_empty() {
                return Err(ManifestError::Verification(failures));
            }
        }

        // store the payload in the global blob tree, then link the revision
        let blob_data = self.paths.blob_data_path(&digest);
        let exists = self
            .driver
            .exists(&blob_data)
            .await
            .map_err(|e| ManifestError::from(Error::from(e)))?;
        if !exists {
            self.driver
                .put_content(&blob_data, bytes.clone())
                .await
                .map_err(|e| ManifestError::from(Error::from(e)))?;
        }
        write_link(
            self.driver.as_ref(),
            &self.paths.manifest_revision_link_path(&self.name, &digest),
            &digest,
        )
        .await
        .map_err(ManifestError::from)?;

        if let ManifestRef::Tag(tag) = key {
            self.tag_store()
                .tag(tag, &digest)
                .await
                .map_err(|e| ManifestError::Internal(format!("tagging manifest: {e}")))?;
        }

        tracing::info!(
            repository = %self.name,
            digest = %digest,
            media_type = %parsed.media_type,
            "manifest stored"
        );
        Ok(ManifestMetadata {
            digest,
            size: bytes.len() as u64,
            media_type: Some(parsed.media_type),
        })
    }

    async fn delete(&self, key: &ManifestRef) -> std::result::Result<(), ManifestError> {
        match key {
            ManifestRef::Digest(digest) => {
                let link = self.paths.manifest_revision_link_path(&self.name, digest);
                if read_link(self.driver.as_ref(), &link)
                    .await
                    .map_err(ManifestError::from)?
                    .is_none()
                {
                    return Err(ManifestError::Unknown);
                }
                self.driver
                    .delete(&self.paths.manifest_revision_path(&self.name, digest))
                    .await
                    .map_err(|e| ManifestError::from(Error::from(e)))?;

                // cascading untag keeps every remaining tag resolvable
                let tags = self.tag_store();
                let pointing = tags
                    .lookup(digest)
                    .await
                    .map_err(|e| ManifestError::Internal(format!("{e}")))?;
                for tag in pointing {
                    tracing::debug!(repository = %self.name, tag, "untagging deleted manifest");
                    tags.untag(&tag)
                        .await
                        .map_err(|e| ManifestError::Internal(format!("{e}")))?;
                }
                Ok(())
            }
            ManifestRef::Tag(tag) => {
                let link = self.paths.tag_current_link_path(&self.name, tag);
                if read_link(self.driver.as_ref(), &link)
                    .await
                    .map_err(ManifestError::from)?
                    .is_none()
                {
                    return Err(ManifestError::Unknown);
                }
                self.tag_store()
                    .untag(tag)
                    .await
                    .map_err(|e| ManifestError::Internal(format!("{e}")))
            }
        }
    }

    async fn revisions(&self) -> std::result::Result<Vec<ContentDigest>, ManifestError> {
        let root = self.paths.manifest_revisions_path(&self.name);
        let algorithms = match self.driver.list(&root).await {
            Ok(entries) => entries,
            Err(stevedore_driver::Error::NotFound(_)) => return Ok(Vec::new()),
            Err(e) => return Err(ManifestError::from(Error::from(e))),
        };

        let mut digests = Vec::new();
        for algorithm_path in algorithms {
            let Some(algorithm) = algorithm_path.rsplit('/').next().map(String::from) else {
                continue;
            };
            let hexes = match self.driver.list(&algorithm_path).await {
                Ok(entries) => entries,
                Err(stevedore_driver::Error::NotFound(_)) => continue,
                Err(e) => return Err(ManifestError::from(Error::from(e))),
            };
            for hex_path in hexes {
                let Some(hex) = hex_path.rsplit('/').next() else {
                    continue;
                };
                if let Ok(digest) = ContentDigest::try_from(format!("{algorithm}:{hex}").as_str())
                {
                    digests.push(digest);
                }
            }
        }
        Ok(digests)
    }
}
