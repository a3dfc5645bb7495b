use std::fs::{self, File};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arca_domain::ContentHash;
use tracing::debug;

use super::ContentStore;
use crate::error::store_write_error;
use crate::fs::{fsync_dir, fsync_tree, make_read_only_recursive, StagingDir};

/// Exclusive right to populate one hash directory.
///
/// Content is written into a private staging directory and only becomes
/// visible through [`publish`](Self::publish). Dropping the reservation
/// without publishing deletes the staging directory and releases the lock,
/// leaving the store as it was.
#[derive(Debug)]
pub struct Reservation {
    store: ContentStore,
    hash: ContentHash,
    staging: Option<StagingDir>,
    _lock: File,
}

impl Reservation {
    pub(super) fn new(store: ContentStore, hash: ContentHash, lock: File) -> Self {
        Self {
            store,
            hash,
            staging: None,
            _lock: lock,
        }
    }

    #[must_use]
    pub fn hash(&self) -> &ContentHash {
        &self.hash
    }

    /// True when a previous writer already published this hash.
    #[must_use]
    pub fn is_published(&self) -> bool {
        self.store.exists(&self.hash)
    }

    /// A fresh, empty staging directory. Anything staged earlier through this
    /// reservation is discarded first.
    pub fn stage(&mut self) -> Result<&Path> {
        self.discard();
        let staging = self.store.staging().map_err(store_write_error)?;
        Ok(self.staging.insert(staging).path())
    }

    /// Throw away staged content, keeping the lock.
    pub fn discard(&mut self) {
        if let Some(staging) = self.staging.take() {
            debug!(hash = %self.hash, path = %staging.path().display(), "discarding staged content");
        }
    }

    /// Atomically move the staged tree to its hash path.
    pub fn publish(mut self) -> Result<PathBuf> {
        let staging = self
            .staging
            .take()
            .context("nothing staged for this reservation")?;
        self.publish_from(staging.path()).map_err(store_write_error)
    }

    /// Atomically move `source` (a directory on the store's filesystem) to the
    /// hash path. If the hash was published meanwhile, `source` is left alone
    /// and the existing directory wins.
    pub fn publish_dir(self, source: &Path) -> Result<PathBuf> {
        self.publish_from(source).map_err(store_write_error)
    }

    fn publish_from(&self, source: &Path) -> Result<PathBuf> {
        let target = self.store.path(&self.hash);
        if self.is_published() {
            debug!(hash = %self.hash, "already published; dropping staged copy");
            return Ok(target);
        }
        self.store.clear_target(&self.hash)?;
        fsync_tree(source)?;
        fs::rename(source, &target).with_context(|| {
            format!(
                "failed to move artifact into place ({} -> {})",
                source.display(),
                target.display()
            )
        })?;
        fsync_dir(self.store.root()).ok();
        make_read_only_recursive(&target)?;
        debug!(hash = %self.hash, path = %target.display(), "artifact published");
        Ok(target)
    }
}
