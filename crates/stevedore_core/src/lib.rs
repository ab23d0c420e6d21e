//! # Stevedore Core
//!
//! `stevedore_core` provides the interoperability types between
//! [`stevedore_http`], an implementation of the [OCI Distribution
//! Spec](https://github.com/opencontainers/distribution-spec), and storage
//! backends such as [`stevedore_storage`], which lays content-addressed
//! state out over a [`stevedore_driver`] object store.
//!
//! The primary set of interoperability types can be found in the
//! [`crate::registry`] module.
pub mod errors;
pub use errors::{
    BlobError, DistributionErrorCode, Error, ManifestError, RepositoryError, Result, TagError,
    VerificationError,
};

mod content_digest;
pub use content_digest::{ContentDigest, DigestAlgorithm, DigestState, Digester};

mod name;
pub use name::RepositoryName;

pub mod manifest;

pub mod registry;
