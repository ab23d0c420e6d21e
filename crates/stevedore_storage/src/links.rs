//! Link files: the registry's membership primitive.
//!
//! A link file's content is exactly one digest in ASCII. Repositories use
//! them to express blob membership (`_layers`), manifest revisions, and tag
//! bindings; the files themselves are the authoritative reachability set an
//! external garbage collector starts from.
use bytes::Bytes;

use stevedore_core::ContentDigest;
use stevedore_driver::StorageDriver;

use super::errors::{Error, Result};

/// Read the digest a link file points at, or `None` if the link does not
/// exist.
pub(crate) async fn read_link(
    driver: &dyn StorageDriver,
    path: &str,
) -> Result<Option<ContentDigest>> {
    let content = match driver.get_content(path).await {
        Ok(bytes) => bytes,
        Err(stevedore_driver::Error::NotFound(_)) => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    let text = std::str::from_utf8(&content)
        .map_err(|_| Error::CorruptLink {
            path: path.to_string(),
            content: String::from_utf8_lossy(&content).into_owned(),
        })?
        .trim();
    let digest = ContentDigest::try_from(text).map_err(|_| Error::CorruptLink {
        path: path.to_string(),
        content: text.to_string(),
    })?;
    Ok(Some(digest))
}

/// Write (or atomically replace) a link file.
pub(crate) async fn write_link(
    driver: &dyn StorageDriver,
    path: &str,
    digest: &ContentDigest,
) -> Result<()> {
    driver
        .put_content(path, Bytes::from(digest.to_string()))
        .await?;
    Ok(())
}
