//! # Stevedore Storage
//!
//! Driver-backed implementation of the [`stevedore_core::registry`] traits.
//!
//! All registry state lives in the [`stevedore_driver`] object store using
//! the standard `docker/registry/v2` layout: a global content-addressed
//! blob tree plus per-repository link files expressing membership, tag
//! bindings, and manifest revisions. The process itself keeps no state, so
//! any number of registry instances may share one driver backend; the only
//! primitive that coordinates them is the driver's atomic single-file
//! rename, which publishes committed blobs.
mod errors;
pub use errors::{Error, Result};

mod paths;
pub use paths::PathMapper;

mod links;

mod blobs;
pub use blobs::DriverBlobStore;

mod uploads;
pub use uploads::{purge_stale_uploads, DriverBlobWriter};

mod manifests;
pub use manifests::DriverManifestStore;

mod tags;
pub use tags::DriverTagStore;

mod repositories;
pub use repositories::{DriverRegistry, DriverRepository};
