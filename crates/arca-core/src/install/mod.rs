use std::path::Path;

use anyhow::Result;
use arca_domain::{ContentHash, DownloadDescriptor, DownloadHash, ManifestEntry, DIGEST_LEN};
use sha2::{Digest, Sha256};
use tracing::{debug, info, warn};

use crate::error::{store_write_error, ArtifactError, SourceFailure, SourceFailureKind};
use crate::store::{extract_archive, tree_hash, ContentStore};

pub(crate) mod cancel;
mod fetch;

pub use cancel::{CancelToken, Interrupted};
pub use fetch::{Fetcher, HttpFetcher};

/// SHA-256 of raw downloaded bytes.
#[must_use]
pub fn download_hash(bytes: &[u8]) -> DownloadHash {
    let mut out = [0_u8; DIGEST_LEN];
    out.copy_from_slice(&Sha256::digest(bytes));
    DownloadHash::from_bytes(out)
}

/// Materializes manifest entries into a [`ContentStore`].
pub struct Installer<'a> {
    store: &'a ContentStore,
    fetcher: &'a dyn Fetcher,
}

impl<'a> Installer<'a> {
    #[must_use]
    pub fn new(store: &'a ContentStore, fetcher: &'a dyn Fetcher) -> Self {
        Self { store, fetcher }
    }

    /// Make `entry.hash` present in the store.
    ///
    /// Already-present content returns immediately without touching the
    /// network. Otherwise each download source is tried in order; a source
    /// only counts if both its raw bytes and its unpacked tree verify. Nothing
    /// is published unless a source fully verifies.
    ///
    /// # Errors
    ///
    /// `NotInstallable` when the entry lists no sources, `AllSourcesFailed`
    /// with one diagnostic per source, `Cancelled` once `cancel` fires, and
    /// `StoreWriteFailure` for local I/O problems.
    pub fn install(&self, entry: &ManifestEntry, cancel: &CancelToken) -> Result<ContentHash> {
        let hash = entry.hash;
        if self.store.exists(&hash) {
            debug!(%hash, "artifact already installed");
            return Ok(hash);
        }
        if !entry.is_installable() {
            return Err(ArtifactError::NotInstallable { hash }.into());
        }

        let mut reservation = self.store.reserve(&hash)?;
        if reservation.is_published() {
            debug!(%hash, "artifact installed by a concurrent writer");
            return Ok(hash);
        }

        let mut failures = Vec::new();
        for source in &entry.downloads {
            if cancel.is_cancelled() {
                failures.push(SourceFailure::new(&source.url, SourceFailureKind::Cancelled));
                return Err(ArtifactError::Cancelled { hash, failures }.into());
            }
            let staging = reservation.stage()?.to_path_buf();
            match self.try_source(&hash, source, &staging, cancel) {
                Ok(()) => {
                    let path = reservation.publish()?;
                    info!(%hash, url = %source.url, path = %path.display(), "artifact installed");
                    return Ok(hash);
                }
                Err(kind) => {
                    let failure = SourceFailure::new(&source.url, kind);
                    warn!(%hash, %failure, "download source rejected");
                    reservation.discard();
                    let cancelled = failure.kind == SourceFailureKind::Cancelled;
                    failures.push(failure);
                    if cancelled {
                        return Err(ArtifactError::Cancelled { hash, failures }.into());
                    }
                }
            }
        }
        Err(ArtifactError::AllSourcesFailed { hash, failures }.into())
    }

    fn try_source(
        &self,
        expected: &ContentHash,
        source: &DownloadDescriptor,
        staging: &Path,
        cancel: &CancelToken,
    ) -> Result<(), SourceFailureKind> {
        let bytes = self
            .fetcher
            .fetch(&source.url, cancel)
            .map_err(|err| classify(&err, SourceFailureKind::Fetch))?;
        let actual = download_hash(&bytes);
        if actual != source.sha256 {
            return Err(SourceFailureKind::DownloadHashMismatch {
                expected: source.sha256,
                actual,
            });
        }
        if cancel.is_cancelled() {
            return Err(SourceFailureKind::Cancelled);
        }
        extract_archive(&bytes, staging, cancel)
            .map_err(|err| classify(&err, SourceFailureKind::Extract))?;
        let actual =
            tree_hash(staging).map_err(|err| classify(&err, SourceFailureKind::Extract))?;
        if actual != *expected {
            return Err(SourceFailureKind::TreeHashMismatch {
                expected: *expected,
                actual,
            });
        }
        Ok(())
    }

    /// Author new content: `populate` fills a fresh scratch directory, the
    /// result is hashed and published under that hash.
    ///
    /// Content that is already present is left as is and its hash returned.
    pub fn create<F>(&self, populate: F) -> Result<ContentHash>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        let scratch = self.store.staging().map_err(store_write_error)?;
        populate(scratch.path())?;
        let hash = tree_hash(scratch.path())?;
        if self.store.exists(&hash) {
            debug!(%hash, "created artifact already present");
            return Ok(hash);
        }
        let reservation = self.store.reserve(&hash)?;
        let path = reservation.publish_dir(scratch.path())?;
        info!(%hash, path = %path.display(), "artifact created");
        Ok(hash)
    }
}

fn classify(err: &anyhow::Error, kind: fn(String) -> SourceFailureKind) -> SourceFailureKind {
    if cancel::is_interrupted(err) {
        SourceFailureKind::Cancelled
    } else {
        kind(format!("{err:#}"))
    }
}
