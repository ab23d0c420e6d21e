use thiserror;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("path not found: {0}")]
    NotFound(String),

    #[error("invalid path: {0}")]
    InvalidPath(String),

    #[error("invalid offset {offset} for path: {path}")]
    InvalidOffset { path: String, offset: u64 },

    #[error("storage quota exceeded at {path}")]
    QuotaExceeded { path: String },

    #[error("io error at {path}: {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("s3 error: {0}")]
    S3(String),

    #[error("driver error: {0}")]
    Driver(String),
}

impl Error {
    /// Wrap an I/O error, translating the kinds callers are expected to
    /// match on into the driver's own variants.
    pub(crate) fn from_io(path: &str, source: std::io::Error) -> Self {
        match source.kind() {
            std::io::ErrorKind::NotFound => Error::NotFound(path.to_string()),
            std::io::ErrorKind::StorageFull | std::io::ErrorKind::QuotaExceeded => {
                Error::QuotaExceeded {
                    path: path.to_string(),
                }
            }
            _ => Error::Io {
                path: path.to_string(),
                source,
            },
        }
    }
}
