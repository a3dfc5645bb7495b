#![deny(clippy::all, warnings)]
#![allow(
    clippy::missing_errors_doc,
    clippy::missing_panics_doc,
    clippy::must_use_candidate
)]

//! Typed model of artifact manifests: names bound to content hashes,
//! optional per-platform fan-out, and the download sources for each entry.

pub mod hash;
pub mod manifest;
pub mod platform;

pub use hash::{ContentHash, DownloadHash, HashParseError, DIGEST_LEN};
pub use manifest::io::{
    load_manifest, load_manifest_optional, parse_manifest, render_manifest, write_manifest,
};
pub use manifest::{
    Binding, DownloadDescriptor, Manifest, ManifestEntry, ManifestError, DOWNLOAD_HASH_KEY,
    DOWNLOAD_KEY, DOWNLOAD_URL_KEY, HASH_KEY, LAZY_KEY,
};
pub use platform::{select, HostPlatform, PlatformConstraints, ARCH_KEY, LIBC_KEY, OS_KEY};
