//! Narrow object-store interface the registry layers everything on top of.
//!
//! A [`StorageDriver`] is a dumb key-value store over `/`-separated paths:
//! it never interprets path contents. Everything the registry persists --
//! blob data, link files, upload sessions -- goes through this interface,
//! which keeps backends pluggable. Three backends ship here: a filesystem
//! driver, an in-memory driver used heavily by tests, and an S3 driver.
//!
//! Multiple writers to the same path yield undefined ordering; higher
//! layers serialize. [`StorageDriver::rename`] must be atomic for the
//! single-file case, which blob commit relies on for publication.
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use once_cell::sync::Lazy;
use regex::Regex;

mod errors;
pub use errors::{Error, Result};

pub mod config;
pub use config::DriverConfig;

mod filesystem;
pub use filesystem::FilesystemDriver;

mod inmemory;
pub use inmemory::InMemoryDriver;

mod s3;
pub use s3::{S3Config, S3Driver};

// Matches the repository layout, which includes `_manifests`-style marker
// directories and host:port repository components.
static PATH_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r"^(/[A-Za-z0-9._:-]+)+$").unwrap());

/// Reject paths outside the driver's grammar before they reach a backend.
pub(crate) fn check_path(path: &str) -> Result<()> {
    if PATH_RE.is_match(path) {
        Ok(())
    } else {
        Err(Error::InvalidPath(path.to_string()))
    }
}

/// Metadata for a stored file or directory.
#[derive(Clone, Debug)]
pub struct FileInfo {
    pub path: String,
    pub size: u64,
    pub mtime: DateTime<Utc>,
    pub is_dir: bool,
}

/// Streamed file contents.
pub type FileReader = BoxStream<'static, std::io::Result<Bytes>>;

/// An open write handle.
///
/// `commit` durably publishes the bytes written so far at the path; the
/// path may later be reopened with `append` to continue. `cancel` discards
/// the path entirely.
#[async_trait]
pub trait FileWriter: Send + Sync {
    async fn write(&mut self, data: Bytes) -> Result<()>;

    /// Total size of the file as of the last write, including any
    /// pre-existing bytes when opened for append.
    fn size(&self) -> u64;

    async fn commit(self: Box<Self>) -> Result<()>;

    async fn cancel(self: Box<Self>) -> Result<()>;
}

/// Common interface over backend object stores.
///
/// Paths are `/`-separated and validated against the driver grammar at this
/// boundary. Missing paths surface [`Error::NotFound`]; backends map their
/// own error types into [`Error`] before returning.
#[async_trait]
pub trait StorageDriver: Send + Sync + 'static {
    /// Short backend identifier, used in logs and config echoes.
    fn name(&self) -> &'static str;

    /// Retrieve the full contents stored at `path`.
    async fn get_content(&self, path: &str) -> Result<Bytes>;

    /// Store `content` at `path`, atomically replacing any previous value.
    async fn put_content(&self, path: &str, content: Bytes) -> Result<()>;

    /// Stream the contents of `path` starting at byte `offset`.
    async fn reader(&self, path: &str, offset: u64) -> Result<FileReader>;

    /// Open a write handle for `path`, optionally appending to existing
    /// contents.
    async fn writer(&self, path: &str, append: bool) -> Result<Box<dyn FileWriter>>;

    /// Metadata for `path`.
    async fn stat(&self, path: &str) -> Result<FileInfo>;

    /// Direct children of `path`, as full paths, sorted.
    async fn list(&self, path: &str) -> Result<Vec<String>>;

    /// Atomically rename `from` to `to`. Atomicity is required for the
    /// single-file case; a backend that cannot rename in place emulates it
    /// with copy-then-delete and loses multi-writer safety.
    async fn rename(&self, from: &str, to: &str) -> Result<()>;

    /// Remove `path` recursively.
    async fn delete(&self, path: &str) -> Result<()>;

    /// Depth-first traversal of every regular file under `path`, sorted by
    /// path.
    async fn walk(&self, path: &str) -> Result<Vec<FileInfo>>;

    /// Whether `path` exists as a file or directory.
    async fn exists(&self, path: &str) -> Result<bool> {
        match self.stat(path).await {
            Ok(_) => Ok(true),
            Err(Error::NotFound(_)) => Ok(false),
            Err(e) => Err(e),
        }
    }
}
