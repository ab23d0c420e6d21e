use thiserror;

use stevedore_core::{BlobError, ManifestError, RepositoryError, TagError};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error(transparent)]
    Core(#[from] stevedore_core::Error),

    #[error(transparent)]
    Driver(#[from] stevedore_driver::Error),

    #[error("corrupt link file at {path}: {content:?}")]
    CorruptLink { path: String, content: String },

    #[error("corrupt timestamp at {path}: {value:?}")]
    CorruptTimestamp { path: String, value: String },

    #[error("error serializing digest state")]
    SerdeJson(#[from] serde_json::Error),
}

// Driver failures surface as UNAVAILABLE; anything else that escapes
// uncaught is an internal error. NotFound is deliberately not mapped --
// stores handle it at the call site, where its meaning is known.
fn is_transient(e: &stevedore_driver::Error) -> bool {
    matches!(
        e,
        stevedore_driver::Error::Io { .. }
            | stevedore_driver::Error::S3(_)
            | stevedore_driver::Error::QuotaExceeded { .. }
    )
}

impl From<Error> for BlobError {
    fn from(e: Error) -> Self {
        match e {
            Error::Core(c) => c.into(),
            Error::Driver(d) if is_transient(&d) => BlobError::Unavailable(format!("{d}")),
            e => BlobError::Internal(format!("{e}")),
        }
    }
}

impl From<Error> for ManifestError {
    fn from(e: Error) -> Self {
        match e {
            Error::Core(c) => c.into(),
            Error::Driver(d) if is_transient(&d) => ManifestError::Unavailable(format!("{d}")),
            e => ManifestError::Internal(format!("{e}")),
        }
    }
}

impl From<Error> for TagError {
    fn from(e: Error) -> Self {
        match e {
            Error::Driver(d) if is_transient(&d) => TagError::Unavailable(format!("{d}")),
            e => TagError::Internal(format!("{e}")),
        }
    }
}

impl From<Error> for RepositoryError {
    fn from(e: Error) -> Self {
        match e {
            Error::Core(c) => c.into(),
            Error::Driver(d) if is_transient(&d) => RepositoryError::Unavailable(format!("{d}")),
            e => RepositoryError::Internal(format!("{e}")),
        }
    }
}
