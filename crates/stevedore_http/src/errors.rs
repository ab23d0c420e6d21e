use axum::response::{IntoResponse, Response};
use http::StatusCode;
use serde::Serialize;
use thiserror;

use stevedore_core::{
    BlobError, DistributionErrorCode, Error as CoreError, ManifestError, RepositoryError,
    TagError, VerificationError,
};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("http invalid header name")]
    HTTPInvalidHeaderName(#[from] http::header::InvalidHeaderName),
    #[error("http invalid header value")]
    HTTPInvalidHeaderValue(#[from] http::header::InvalidHeaderValue),

    #[error("missing query parameter: {0}")]
    MissingQueryParameter(&'static str),

    #[error("client closed request")]
    ClientClosedRequest,

    #[error("{}", .0.default_message())]
    Code(DistributionErrorCode, Option<String>),

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Blob(#[from] BlobError),

    #[error(transparent)]
    Manifest(#[from] ManifestError),

    #[error(transparent)]
    Tag(#[from] TagError),

    #[error(transparent)]
    Repository(#[from] RepositoryError),

    #[error("internal server error: {0}")]
    Internal(String),
}

// Wire form of an error: https://distribution.github.io/distribution/spec/api/#errors
#[derive(Debug, Serialize)]
pub(crate) struct ErrorInfo {
    code: DistributionErrorCode,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    detail: Option<serde_json::Value>,
}

impl ErrorInfo {
    fn new(code: DistributionErrorCode, message: Option<String>) -> Self {
        Self {
            code,
            message: message.unwrap_or_else(|| code.default_message().to_string()),
            detail: None,
        }
    }

    fn with_detail(mut self, detail: impl Into<String>) -> Self {
        self.detail = Some(serde_json::Value::String(detail.into()));
        self
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct ErrorEnvelope {
    errors: Vec<ErrorInfo>,
}

/// Render one or more error infos as the JSON envelope; the status comes
/// from the first (most significant) code.
pub(crate) fn envelope_response(errors: Vec<ErrorInfo>) -> Response {
    let status = errors
        .first()
        .map(|e| e.code.status_code())
        .unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
    (status, axum::Json(ErrorEnvelope { errors })).into_response()
}

fn single(code: DistributionErrorCode, message: Option<String>) -> Response {
    envelope_response(vec![ErrorInfo::new(code, message)])
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::Code(code, message) => single(code, message),
            Error::Core(e) => core_error_to_response(e),
            Error::Blob(e) => blob_error_to_response(e),
            Error::Manifest(e) => manifest_error_to_response(e),
            Error::Tag(e) => tag_error_to_response(e),
            Error::Repository(e) => repository_error_to_response(e),
            Error::ClientClosedRequest => {
                // nonstandard status for disconnected clients; the session
                // stays resumable so this is informational, not an error
                let status = StatusCode::from_u16(499).expect("499 is a valid status code");
                (status, "").into_response()
            }
            Error::MissingQueryParameter(_) => {
                (StatusCode::BAD_REQUEST, format!("{self}")).into_response()
            }
            Error::HTTPInvalidHeaderName(_) | Error::HTTPInvalidHeaderValue(_) => {
                (StatusCode::BAD_REQUEST, format!("{self}")).into_response()
            }
            Error::Internal(s) => {
                tracing::warn!("internal error: {s}");
                single(DistributionErrorCode::Unknown, None)
            }
        }
    }
}

#[inline]
fn core_error_to_response(e: CoreError) -> Response {
    match e {
        CoreError::InvalidDigest(s) => single(
            DistributionErrorCode::DigestInvalid,
            Some(format!("invalid digest: {s}")),
        ),
        CoreError::UnsupportedDigestAlgorithm(s) => single(
            DistributionErrorCode::DigestInvalid,
            Some(format!("unsupported digest algorithm: {s}")),
        ),
        CoreError::InvalidRepositoryName(s) => single(
            DistributionErrorCode::NameInvalid,
            Some(format!("invalid repository name: {s}")),
        ),
        CoreError::InvalidTag(s) => single(
            DistributionErrorCode::TagInvalid,
            Some(format!("invalid tag: {s}")),
        ),
        CoreError::Backend(s) => {
            tracing::warn!("backend error: {s}");
            single(DistributionErrorCode::Unknown, None)
        }
    }
}

#[inline]
fn blob_error_to_response(e: BlobError) -> Response {
    match e {
        BlobError::Unknown => single(DistributionErrorCode::BlobUnknown, None),
        BlobError::UploadUnknown => single(DistributionErrorCode::BlobUploadUnknown, None),
        BlobError::UploadInvalid(s) => {
            single(DistributionErrorCode::BlobUploadInvalid, Some(s))
        }
        BlobError::DigestInvalid(s) => envelope_response(vec![ErrorInfo::new(
            DistributionErrorCode::DigestInvalid,
            Some("invalid digest".to_string()),
        )
        .with_detail(s)]),
        BlobError::DigestUnsupported(s) => envelope_response(vec![ErrorInfo::new(
            DistributionErrorCode::DigestInvalid,
            Some("unsupported digest algorithm".to_string()),
        )
        .with_detail(s)]),
        BlobError::DigestMismatch { expected, computed } => single(
            DistributionErrorCode::DigestInvalid,
            Some(format!(
                "digest mismatch: expected {expected}, computed {computed}"
            )),
        ),
        BlobError::SizeInvalid { expected, received } => single(
            DistributionErrorCode::SizeInvalid,
            Some(format!(
                "content length mismatch: expected {expected}, received {received}"
            )),
        ),
        BlobError::RangeInvalid { offset, size } => single(
            DistributionErrorCode::RangeInvalid,
            Some(format!(
                "chunk start {offset} does not match upload size {size}"
            )),
        ),
        BlobError::ClientDisconnect => Error::ClientClosedRequest.into_response(),
        BlobError::Unavailable(s) => {
            tracing::warn!("storage unavailable: {s}");
            single(DistributionErrorCode::Unavailable, None)
        }
        BlobError::Internal(s) => {
            tracing::warn!("blob store internal error: {s}");
            single(DistributionErrorCode::Unknown, None)
        }
    }
}

#[inline]
fn verification_to_infos(failures: Vec<VerificationError>) -> Vec<ErrorInfo> {
    failures
        .into_iter()
        .map(|f| {
            let detail = f.detail().to_string();
            ErrorInfo::new(f.code(), Some(format!("{f}"))).with_detail(detail)
        })
        .collect()
}

#[inline]
fn manifest_error_to_response(e: ManifestError) -> Response {
    match e {
        ManifestError::Unknown => single(DistributionErrorCode::ManifestUnknown, None),
        ManifestError::Invalid => single(DistributionErrorCode::ManifestInvalid, None),
        ManifestError::InvalidPayload(s) => {
            single(DistributionErrorCode::ManifestInvalid, Some(s))
        }
        ManifestError::TooBig => single(
            DistributionErrorCode::SizeInvalid,
            Some("manifest payload too large".to_string()),
        ),
        ManifestError::TagInvalid(s) => envelope_response(vec![ErrorInfo::new(
            DistributionErrorCode::TagInvalid,
            None,
        )
        .with_detail(s)]),
        // the one deliberately multi-error response: every missing
        // dependency is enumerated for the client
        ManifestError::Verification(failures) => {
            envelope_response(verification_to_infos(failures))
        }
        ManifestError::Blob(e) => blob_error_to_response(e),
        ManifestError::Unavailable(s) => {
            tracing::warn!("storage unavailable: {s}");
            single(DistributionErrorCode::Unavailable, None)
        }
        ManifestError::Internal(s) => {
            tracing::warn!("manifest store internal error: {s}");
            single(DistributionErrorCode::Unknown, None)
        }
    }
}

#[inline]
fn tag_error_to_response(e: TagError) -> Response {
    match e {
        TagError::Unknown => single(DistributionErrorCode::ManifestUnknown, None),
        TagError::Invalid(s) => {
            envelope_response(vec![
                ErrorInfo::new(DistributionErrorCode::TagInvalid, None).with_detail(s)
            ])
        }
        TagError::Unavailable(s) => {
            tracing::warn!("storage unavailable: {s}");
            single(DistributionErrorCode::Unavailable, None)
        }
        TagError::Internal(s) => {
            tracing::warn!("tag store internal error: {s}");
            single(DistributionErrorCode::Unknown, None)
        }
    }
}

#[inline]
fn repository_error_to_response(e: RepositoryError) -> Response {
    match e {
        RepositoryError::NameInvalid(s) => {
            single(DistributionErrorCode::NameInvalid, Some(s))
        }
        RepositoryError::NameUnknown => single(DistributionErrorCode::NameUnknown, None),
        RepositoryError::Unauthorized => single(DistributionErrorCode::Unauthorized, None),
        RepositoryError::Denied => single(DistributionErrorCode::Denied, None),
        RepositoryError::TooManyRequests => {
            single(DistributionErrorCode::TooManyRequests, None)
        }
        RepositoryError::Unavailable(s) => {
            tracing::warn!("storage unavailable: {s}");
            single(DistributionErrorCode::Unavailable, None)
        }
        RepositoryError::Internal(s) => {
            tracing::warn!("repository internal error: {s}");
            single(DistributionErrorCode::Unknown, None)
        }
    }
}
