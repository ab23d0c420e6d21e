use http::StatusCode;
use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
    #[error("unsupported digest algorithm: {0}")]
    UnsupportedDigestAlgorithm(String),
    #[error("invalid repository name: {0}")]
    InvalidRepositoryName(String),
    #[error("invalid tag: {0}")]
    InvalidTag(String),

    #[error("backend error: {0}")]
    Backend(String),
}

/// Error codes of the distribution protocol.
///
/// This is the wire-visible taxonomy: every error a handler renders maps to
/// exactly one of these codes and the status code fixed for it below. The
/// set is a superset of the codes in the OCI distribution spec because the
/// docker registry protocol this implements predates it (`RANGE_INVALID`,
/// `MANIFEST_UNVERIFIED`, `UNAVAILABLE` and `UNKNOWN` in particular).
#[derive(Clone, Copy, Debug, PartialEq, Eq, serde::Serialize)]
pub enum DistributionErrorCode {
    #[serde(rename = "BLOB_UNKNOWN")]
    BlobUnknown,
    #[serde(rename = "BLOB_UPLOAD_INVALID")]
    BlobUploadInvalid,
    #[serde(rename = "BLOB_UPLOAD_UNKNOWN")]
    BlobUploadUnknown,
    #[serde(rename = "DIGEST_INVALID")]
    DigestInvalid,
    #[serde(rename = "SIZE_INVALID")]
    SizeInvalid,
    #[serde(rename = "RANGE_INVALID")]
    RangeInvalid,
    #[serde(rename = "NAME_INVALID")]
    NameInvalid,
    #[serde(rename = "NAME_UNKNOWN")]
    NameUnknown,
    #[serde(rename = "TAG_INVALID")]
    TagInvalid,
    #[serde(rename = "MANIFEST_UNKNOWN")]
    ManifestUnknown,
    #[serde(rename = "MANIFEST_INVALID")]
    ManifestInvalid,
    #[serde(rename = "MANIFEST_UNVERIFIED")]
    ManifestUnverified,
    #[serde(rename = "MANIFEST_BLOB_UNKNOWN")]
    ManifestBlobUnknown,
    #[serde(rename = "UNAUTHORIZED")]
    Unauthorized,
    #[serde(rename = "DENIED")]
    Denied,
    #[serde(rename = "UNSUPPORTED")]
    Unsupported,
    #[serde(rename = "TOOMANYREQUESTS")]
    TooManyRequests,
    #[serde(rename = "UNAVAILABLE")]
    Unavailable,
    #[serde(rename = "UNKNOWN")]
    Unknown,
}

impl DistributionErrorCode {
    pub fn status_code(&self) -> StatusCode {
        match self {
            DistributionErrorCode::BlobUnknown => StatusCode::NOT_FOUND,
            DistributionErrorCode::BlobUploadInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::BlobUploadUnknown => StatusCode::NOT_FOUND,
            DistributionErrorCode::DigestInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::SizeInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::RangeInvalid => StatusCode::RANGE_NOT_SATISFIABLE,
            DistributionErrorCode::NameInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::NameUnknown => StatusCode::NOT_FOUND,
            DistributionErrorCode::TagInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::ManifestUnknown => StatusCode::NOT_FOUND,
            DistributionErrorCode::ManifestInvalid => StatusCode::BAD_REQUEST,
            DistributionErrorCode::ManifestUnverified => StatusCode::BAD_REQUEST,
            DistributionErrorCode::ManifestBlobUnknown => StatusCode::BAD_REQUEST,
            DistributionErrorCode::Unauthorized => StatusCode::UNAUTHORIZED,
            DistributionErrorCode::Denied => StatusCode::FORBIDDEN,
            DistributionErrorCode::Unsupported => StatusCode::METHOD_NOT_ALLOWED,
            DistributionErrorCode::TooManyRequests => StatusCode::TOO_MANY_REQUESTS,
            DistributionErrorCode::Unavailable => StatusCode::SERVICE_UNAVAILABLE,
            DistributionErrorCode::Unknown => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn default_message(&self) -> &'static str {
        match self {
            DistributionErrorCode::BlobUnknown => "blob unknown to registry",
            DistributionErrorCode::BlobUploadInvalid => "blob upload invalid",
            DistributionErrorCode::BlobUploadUnknown => "blob upload unknown to registry",
            DistributionErrorCode::DigestInvalid => {
                "provided digest did not match uploaded content"
            }
            DistributionErrorCode::SizeInvalid => "provided length did not match content length",
            DistributionErrorCode::RangeInvalid => "requested range not satisfiable",
            DistributionErrorCode::NameInvalid => "invalid repository name",
            DistributionErrorCode::NameUnknown => "repository name not known to registry",
            DistributionErrorCode::TagInvalid => "manifest tag did not match URI",
            DistributionErrorCode::ManifestUnknown => "manifest unknown to registry",
            DistributionErrorCode::ManifestInvalid => "manifest invalid",
            DistributionErrorCode::ManifestUnverified => {
                "manifest failed signature verification"
            }
            DistributionErrorCode::ManifestBlobUnknown => {
                "manifest references a manifest or blob unknown to registry"
            }
            DistributionErrorCode::Unauthorized => "authentication required",
            DistributionErrorCode::Denied => "requested access to the resource is denied",
            DistributionErrorCode::Unsupported => "the operation is unsupported",
            DistributionErrorCode::TooManyRequests => "too many requests",
            DistributionErrorCode::Unavailable => "service unavailable",
            DistributionErrorCode::Unknown => "unknown error",
        }
    }
}

/// Blob and upload-session failures surfaced by a
/// [`BlobStore`](crate::registry::BlobStore).
#[derive(thiserror::Error, Debug)]
pub enum BlobError {
    #[error("blob unknown to registry")]
    Unknown,
    #[error("blob upload unknown to registry")]
    UploadUnknown,
    #[error("blob upload invalid: {0}")]
    UploadInvalid(String),
    #[error("invalid digest: {0}")]
    DigestInvalid(String),
    #[error("unsupported digest algorithm: {0}")]
    DigestUnsupported(String),
    #[error("digest mismatch: expected {expected}, computed {computed}")]
    DigestMismatch { expected: String, computed: String },
    #[error("content length mismatch: expected {expected}, received {received}")]
    SizeInvalid { expected: u64, received: u64 },
    #[error("chunk start {offset} does not match upload size {size}")]
    RangeInvalid { offset: u64, size: u64 },
    #[error("client disconnected mid-upload")]
    ClientDisconnect,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Error> for BlobError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidDigest(s) => BlobError::DigestInvalid(s),
            Error::UnsupportedDigestAlgorithm(s) => BlobError::DigestUnsupported(s),
            e => BlobError::Internal(format!("{e}")),
        }
    }
}

impl From<uuid::Error> for BlobError {
    fn from(e: uuid::Error) -> Self {
        BlobError::UploadInvalid(format!("invalid upload id: {e}"))
    }
}

/// A single failure discovered while verifying a manifest against the
/// repository it is being pushed to. Verification collects these rather than
/// stopping at the first, so a client sees every missing dependency at once.
#[derive(thiserror::Error, Debug)]
pub enum VerificationError {
    #[error("unknown blob: {0}")]
    UnknownBlob(String),
    #[error("unknown sub-manifest: {0}")]
    UnknownManifest(String),
    #[error("invalid digest: {0}")]
    InvalidDigest(String),
}

impl VerificationError {
    pub fn code(&self) -> DistributionErrorCode {
        match self {
            VerificationError::UnknownBlob(_) => DistributionErrorCode::ManifestBlobUnknown,
            VerificationError::UnknownManifest(_) => DistributionErrorCode::ManifestBlobUnknown,
            VerificationError::InvalidDigest(_) => DistributionErrorCode::DigestInvalid,
        }
    }

    /// The machine-readable `detail` rendered alongside the code: the digest
    /// the failure is about.
    pub fn detail(&self) -> &str {
        match self {
            VerificationError::UnknownBlob(d)
            | VerificationError::UnknownManifest(d)
            | VerificationError::InvalidDigest(d) => d,
        }
    }
}

/// Manifest failures surfaced by a
/// [`ManifestStore`](crate::registry::ManifestStore).
#[derive(thiserror::Error, Debug)]
pub enum ManifestError {
    #[error("manifest unknown to registry")]
    Unknown,
    #[error("manifest invalid")]
    Invalid,
    #[error("manifest invalid: {0}")]
    InvalidPayload(String),
    #[error("manifest too large")]
    TooBig,
    #[error("invalid tag: {0}")]
    TagInvalid(String),
    #[error("manifest verification failed")]
    Verification(Vec<VerificationError>),
    #[error(transparent)]
    Blob(#[from] BlobError),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Error> for ManifestError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidDigest(s) => ManifestError::Blob(BlobError::DigestInvalid(s)),
            Error::UnsupportedDigestAlgorithm(s) => {
                ManifestError::Blob(BlobError::DigestUnsupported(s))
            }
            Error::InvalidTag(s) => ManifestError::TagInvalid(s),
            e => ManifestError::Internal(format!("{e}")),
        }
    }
}

/// Tag failures surfaced by a [`TagStore`](crate::registry::TagStore).
#[derive(thiserror::Error, Debug)]
pub enum TagError {
    #[error("tag unknown to registry")]
    Unknown,
    #[error("invalid tag: {0}")]
    Invalid(String),
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

/// Repository-level failures, including access control outcomes.
#[derive(thiserror::Error, Debug)]
pub enum RepositoryError {
    #[error("invalid repository name: {0}")]
    NameInvalid(String),
    #[error("repository name not known to registry")]
    NameUnknown,
    #[error("authentication required")]
    Unauthorized,
    #[error("access denied")]
    Denied,
    #[error("too many requests")]
    TooManyRequests,
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl From<Error> for RepositoryError {
    fn from(e: Error) -> Self {
        match e {
            Error::InvalidRepositoryName(s) => RepositoryError::NameInvalid(s),
            e => RepositoryError::Internal(format!("{e}")),
        }
    }
}
