//! # Registry Abstractions
//!
//! Defines the interoperability layer between [`stevedore_http`] and backend
//! implementations.
//!
//! A backend provides repositories through a [`RepositoryStoreManager`];
//! each [`RepositoryStore`] hands out blob, manifest, and tag stores bound
//! to a single repository name. All bulk data flows as byte streams; the
//! HTTP layer never buffers blob contents.
use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures::stream::BoxStream;
use hyper::body::Body;
use once_cell::sync::Lazy;
use regex::Regex;
use uuid::Uuid;

use crate::errors::{BlobError, ManifestError, RepositoryError, TagError};
use crate::{ContentDigest, Error, RepositoryName};

pub type TryBytes = std::result::Result<Bytes, Box<dyn std::error::Error + Send + Sync>>;

/// Streamed object contents, served without buffering.
pub type ByteStream = BoxStream<'static, TryBytes>;

/// Committed blob metadata.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BlobMetadata {
    pub digest: ContentDigest,
    pub size: u64,
}

/// Stored manifest metadata. `media_type` is the stored content type; the
/// payload on the wire is always the exact stored bytes.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestMetadata {
    pub digest: ContentDigest,
    pub size: u64,
    pub media_type: Option<String>,
}

/// What a client claims about the blob it is committing. The digest is
/// always required; the size is checked only when supplied.
#[derive(Clone, Debug)]
pub struct ExpectedDescriptor {
    pub digest: ContentDigest,
    pub size: Option<u64>,
}

/// An inclusive byte range requested for a blob read. `end` of `None` means
/// "through the end of the blob".
#[derive(Clone, Copy, Debug)]
pub struct ByteRange {
    pub start: u64,
    pub end: Option<u64>,
}

/// Provides access to [`RepositoryStore`] instances.
///
/// Repositories come into existence implicitly on first write: read paths
/// use [`get`](Self::get) and treat `None` as name-unknown, write paths use
/// [`create`](Self::create).
#[async_trait]
pub trait RepositoryStoreManager: Clone + Send + Sync + 'static {
    type RepositoryStore: RepositoryStore;

    async fn get(
        &self,
        name: &RepositoryName,
    ) -> std::result::Result<Option<Self::RepositoryStore>, RepositoryError>;

    async fn create(
        &self,
        name: &RepositoryName,
    ) -> std::result::Result<Self::RepositoryStore, RepositoryError>;

    /// Lexicographically ordered repository names for the catalog listing,
    /// starting after `last` when given.
    async fn list(
        &self,
        n: Option<usize>,
        last: Option<&str>,
    ) -> std::result::Result<Vec<String>, RepositoryError>;
}

/// Provides access to the stores of a single repository.
pub trait RepositoryStore: Clone + Send + Sync + 'static {
    type BlobStore: BlobStore;
    type ManifestStore: ManifestStore;
    type TagStore: TagStore;

    /// The name this store is bound to.
    fn name(&self) -> &RepositoryName;

    fn get_blob_store(&self) -> Self::BlobStore;

    fn get_manifest_store(&self) -> Self::ManifestStore;

    fn get_tag_store(&self) -> Self::TagStore;
}

/// Content-addressed blob access scoped to one repository.
///
/// Reads only succeed for blobs linked into the repository; the bytes
/// themselves are stored once globally and deduplicated on commit.
#[async_trait]
pub trait BlobStore: Send + Sync + 'static {
    type Writer: BlobWriter;

    async fn head(
        &self,
        digest: &ContentDigest,
    ) -> std::result::Result<Option<BlobMetadata>, BlobError>;

    async fn get(
        &self,
        digest: &ContentDigest,
        range: Option<ByteRange>,
    ) -> std::result::Result<Option<(BlobMetadata, ByteStream)>, BlobError>;

    /// Open a fresh upload session.
    async fn start_upload(&self) -> std::result::Result<Self::Writer, BlobError>;

    /// Reopen an existing upload session; `UploadUnknown` if it was never
    /// created, already committed, or cancelled.
    async fn resume_upload(&self, uuid: &Uuid) -> std::result::Result<Self::Writer, BlobError>;

    /// Discard an upload session and its bytes.
    async fn cancel_upload(&self, uuid: &Uuid) -> std::result::Result<(), BlobError>;

    /// Cross-repository mount: if `digest` is linked in `from`, link it here
    /// too and return its metadata without opening an upload session.
    async fn mount(
        &self,
        digest: &ContentDigest,
        from: &RepositoryName,
    ) -> std::result::Result<Option<BlobMetadata>, BlobError>;

    /// Unlink the blob from this repository. The bytes stay behind for an
    /// external garbage collector to reclaim.
    async fn delete(&self, digest: &ContentDigest) -> std::result::Result<(), BlobError>;
}

/// An open, resumable upload session.
///
/// Writes within one session are serialized by the protocol layer; the
/// session token's offset check rejects requests that would interleave.
#[async_trait]
pub trait BlobWriter: Send + 'static {
    fn uuid(&self) -> &Uuid;

    /// Bytes accepted so far.
    fn size(&self) -> u64;

    fn started_at(&self) -> DateTime<Utc>;

    /// Append the request body, returning the new session size. A client
    /// disconnect persists whatever arrived and surfaces
    /// [`BlobError::ClientDisconnect`]; the session remains resumable.
    async fn append(&mut self, body: Body) -> std::result::Result<u64, BlobError>;

    /// Verify against the expected descriptor and atomically publish the
    /// bytes at the canonical blob path, linking the blob into the owning
    /// repository. The session is destroyed on success and on digest
    /// mismatch.
    async fn commit(
        self,
        expected: ExpectedDescriptor,
    ) -> std::result::Result<BlobMetadata, BlobError>;

    /// Discard the session and its bytes.
    async fn cancel(self) -> std::result::Result<(), BlobError>;
}

/// Typed manifest access scoped to one repository.
#[async_trait]
pub trait ManifestStore: Send + Sync + 'static {
    async fn head(
        &self,
        key: &ManifestRef,
    ) -> std::result::Result<Option<ManifestMetadata>, ManifestError>;

    async fn get(
        &self,
        key: &ManifestRef,
    ) -> std::result::Result<Option<(ManifestMetadata, ByteStream)>, ManifestError>;

    /// Parse, verify, and store the manifest payload exactly as received.
    /// When `key` is a tag the tag is moved to the new digest with history
    /// preserved.
    async fn put(
        &self,
        key: &ManifestRef,
        media_type: Option<&str>,
        bytes: Bytes,
    ) -> std::result::Result<ManifestMetadata, ManifestError>;

    /// Delete by digest removes the repository's revision link and untags
    /// every tag currently resolving to it; delete by tag only untags.
    async fn delete(&self, key: &ManifestRef) -> std::result::Result<(), ManifestError>;

    /// Enumerate the digests of every manifest revision in the repository.
    async fn revisions(&self) -> std::result::Result<Vec<ContentDigest>, ManifestError>;
}

/// Tag bindings of one repository, with append-only history.
#[async_trait]
pub trait TagStore: Send + Sync + 'static {
    /// Bind `tag` to `digest`, recording the digest in the tag's history
    /// before replacing the current binding.
    async fn tag(&self, tag: &str, digest: &ContentDigest) -> std::result::Result<(), TagError>;

    /// Resolve the current binding, with the manifest's stored metadata.
    async fn get(&self, tag: &str) -> std::result::Result<Option<ManifestMetadata>, TagError>;

    /// Remove the tag and its history.
    async fn untag(&self, tag: &str) -> std::result::Result<(), TagError>;

    /// All tag names, sorted.
    async fn all(&self) -> std::result::Result<Vec<String>, TagError>;

    /// Paginated tag listing: lexicographic, starting after `last`.
    async fn list(
        &self,
        n: Option<usize>,
        last: Option<&str>,
    ) -> std::result::Result<Vec<String>, TagError>;

    /// Reverse lookup: names of tags whose current binding is `digest`.
    async fn lookup(&self, digest: &ContentDigest)
        -> std::result::Result<Vec<String>, TagError>;

    /// Every digest the tag has ever pointed to, oldest first.
    async fn manifest_digests(
        &self,
        tag: &str,
    ) -> std::result::Result<Vec<ContentDigest>, TagError>;
}

/// Reference to a manifest as specified by the distribution spec.
///
/// This is the `<reference>` portion of endpoints taking the form
/// `/v2/<name>/manifests/<reference>`: either the digest of the manifest or
/// a tag matching `[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ManifestRef {
    Digest(ContentDigest),
    Tag(String),
}

static TAG_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z0-9_][a-zA-Z0-9._-]{0,127}$").unwrap());

impl std::str::FromStr for ManifestRef {
    type Err = Error;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        // Anything with a `:` must be a digest; a tag can never contain one.
        if s.contains(':') {
            return Ok(Self::Digest(ContentDigest::try_from(s)?));
        }
        if TAG_RE.is_match(s) {
            return Ok(Self::Tag(String::from(s)));
        }
        Err(Error::InvalidTag(s.to_string()))
    }
}

impl std::fmt::Display for ManifestRef {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ManifestRef::Digest(d) => write!(f, "{d}"),
            ManifestRef::Tag(t) => f.write_str(t),
        }
    }
}

#[cfg(test)]
mod test {
    use std::str::FromStr;

    use rstest::*;

    use super::*;

    #[rstest]
    #[case::tag("v1.0", true)]
    #[case::tag_leading_underscore("_internal", true)]
    #[case::digest(
        "sha256:2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824",
        true
    )]
    #[case::bad_digest("sha256:nope", false)]
    #[case::leading_dash("-v1", false)]
    #[case::too_long_tag(
        "t0000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000000",
        false
    )]
    fn parse_reference(#[case] input: &str, #[case] ok: bool) {
        assert_eq!(ManifestRef::from_str(input).is_ok(), ok, "{input}");
    }
}
