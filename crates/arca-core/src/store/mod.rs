//! Content-addressed directory store.
//!
//! Layout under the root:
//!
//! ```text
//! <root>/<hex>/            published artifact, read-only
//! <root>/.locks/<hex>.lock advisory lock serializing writers of <hex>
//! <root>/.tmp/stage-*      staging and trash directories
//! ```
//!
//! A hash directory only ever appears through a rename from `.tmp`, so a
//! reader sees either nothing or the complete tree.

use std::fs::{self, File, OpenOptions};
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use arca_domain::ContentHash;
use fs4::FileExt;
use tracing::debug;

use crate::error::store_write_error;
use crate::fs::{fsync_dir, make_writable_recursive, remove_dir_all_writable, StagingDir};

mod archive;
mod reservation;
mod tree_hash;

pub use archive::{archive_dir_canonical, archive_dir_canonical_to_writer, extract_archive};
pub use reservation::Reservation;
pub use tree_hash::tree_hash;

const LOCKS_DIR: &str = ".locks";
const STAGING_DIR: &str = ".tmp";
pub(crate) const STAGING_PREFIX: &str = "stage-";

/// Hash-keyed directories under one root.
///
/// Cheap to clone; every clone addresses the same on-disk store.
#[derive(Clone, Debug)]
pub struct ContentStore {
    root: PathBuf,
}

impl ContentStore {
    /// Open (creating if needed) the store rooted at `root`.
    pub fn new(root: impl Into<PathBuf>) -> Result<Self> {
        let store = Self { root: root.into() };
        store.ensure_layout()?;
        Ok(store)
    }

    #[must_use]
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where `hash` lives; says nothing about whether it is there.
    #[must_use]
    pub fn path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(hash.to_hex())
    }

    /// Existence only. Published content is trusted.
    #[must_use]
    pub fn exists(&self, hash: &ContentHash) -> bool {
        fs::symlink_metadata(self.path(hash)).is_ok_and(|meta| meta.is_dir())
    }

    /// Block until this process holds the write lock for `hash`.
    ///
    /// Writers of the same hash are serialized across threads and processes;
    /// different hashes never contend. Callers must check
    /// [`Reservation::is_published`] before populating, since another writer
    /// may have finished while this one waited.
    pub fn reserve(&self, hash: &ContentHash) -> Result<Reservation> {
        self.ensure_layout().map_err(store_write_error)?;
        let lock = self.acquire_lock(hash).map_err(store_write_error)?;
        debug!(%hash, "store reservation acquired");
        Ok(Reservation::new(self.clone(), *hash, lock))
    }

    /// Every published hash, sorted. Bookkeeping directories and names that
    /// are not canonical hashes are skipped.
    pub fn list(&self) -> Result<Vec<ContentHash>> {
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => {
                return Err(err)
                    .with_context(|| format!("failed to read store {}", self.root.display()))
            }
        };
        let mut hashes = Vec::new();
        for entry in entries {
            let entry = entry?;
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if name.starts_with('.') {
                continue;
            }
            let Ok(hash) = name.parse::<ContentHash>() else {
                continue;
            };
            if hash.to_hex() != name || !entry.file_type()?.is_dir() {
                continue;
            }
            hashes.push(hash);
        }
        hashes.sort();
        Ok(hashes)
    }

    /// Delete the directory for `hash` under its lock, then its lock file. The
    /// tree is first renamed into staging so readers never see it
    /// half-deleted.
    pub fn remove(&self, hash: &ContentHash) -> Result<bool> {
        let _reservation = self.reserve(hash)?;
        let target = self.path(hash);
        if !self.exists(hash) {
            let _ = fs::remove_file(self.lock_path(hash));
            return Ok(false);
        }
        let trash = self.staging()?;
        // Moving a directory to a new parent rewrites its `..` entry.
        make_writable_recursive(&target);
        let parked = trash.path().join(hash.to_hex());
        fs::rename(&target, &parked).with_context(|| {
            format!(
                "failed to move {} out of the store ({})",
                target.display(),
                parked.display()
            )
        })?;
        fsync_dir(&self.root).ok();
        drop(trash);
        // Waiters holding the old handle notice the unlink and reopen.
        let _ = fs::remove_file(self.lock_path(hash));
        debug!(%hash, "store entry removed");
        Ok(true)
    }

    /// Recompute the tree hash of a published directory. `false` when the
    /// directory is missing or its content no longer matches its name.
    pub fn verify(&self, hash: &ContentHash) -> Result<bool> {
        if !self.exists(hash) {
            return Ok(false);
        }
        let actual = tree_hash(&self.path(hash))?;
        if actual != *hash {
            debug!(%hash, %actual, "store entry does not match its hash");
        }
        Ok(actual == *hash)
    }

    pub(crate) fn staging(&self) -> Result<StagingDir> {
        StagingDir::new_in(&self.root.join(STAGING_DIR), STAGING_PREFIX)
    }

    fn ensure_layout(&self) -> Result<()> {
        for dir in [self.root.clone(), self.root.join(LOCKS_DIR), self.root.join(STAGING_DIR)] {
            fs::create_dir_all(&dir)
                .with_context(|| format!("failed to create store directory {}", dir.display()))?;
        }
        Ok(())
    }

    fn lock_path(&self, hash: &ContentHash) -> PathBuf {
        self.root.join(LOCKS_DIR).join(format!("{hash}.lock"))
    }

    fn acquire_lock(&self, hash: &ContentHash) -> Result<File> {
        let path = self.lock_path(hash);
        loop {
            let file = OpenOptions::new()
                .create(true)
                .read(true)
                .write(true)
                .truncate(false)
                .open(&path)
                .with_context(|| format!("failed to open store lock {}", path.display()))?;
            file.lock_exclusive()
                .with_context(|| format!("failed to lock {}", path.display()))?;
            if lock_is_current(&file, &path) {
                return Ok(file);
            }
            debug!(%hash, "lock file was pruned while waiting; retrying");
        }
    }

    /// Remove a leftover directory at the target path that is not a complete
    /// publish (only possible if something outside the store wrote there).
    pub(crate) fn clear_target(&self, hash: &ContentHash) -> Result<()> {
        remove_dir_all_writable(&self.path(hash))
    }
}

/// The locked handle still names the file at `path`, i.e. `remove` did not
/// unlink it while this process was waiting.
#[cfg(unix)]
fn lock_is_current(file: &File, path: &Path) -> bool {
    use std::os::unix::fs::MetadataExt;
    match (file.metadata(), fs::metadata(path)) {
        (Ok(held), Ok(current)) => held.dev() == current.dev() && held.ino() == current.ino(),
        _ => false,
    }
}

// Open files cannot be deleted here, so a held lock is never pruned.
#[cfg(not(unix))]
fn lock_is_current(_file: &File, _path: &Path) -> bool {
    true
}

#[cfg(test)]
mod tests;
