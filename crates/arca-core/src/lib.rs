#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate,
    clippy::module_name_repetitions
)]

//! Content-addressed artifact store and installer.
//!
//! Manifests bind names to tree hashes; this crate turns those bindings into
//! verified, read-only directories under a shared store root, safe to fill
//! from several processes at once.

pub mod config;
pub mod error;
mod fs;
pub mod install;
mod net;
pub mod resolver;
pub mod store;

pub use arca_domain as domain;

pub use config::{Config, NetworkConfig, StoreConfig};
pub use error::{ArtifactError, SourceFailure, SourceFailureKind};
pub use install::{download_hash, CancelToken, Fetcher, HttpFetcher, Installer, Interrupted};
pub use resolver::{artifact_hash, bind_artifact, bind_artifact_entry, bind_artifact_file, Artifacts};
pub use store::{
    archive_dir_canonical, archive_dir_canonical_to_writer, extract_archive, tree_hash,
    ContentStore, Reservation,
};
