use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use arca_domain::{
    load_manifest_optional, write_manifest, Binding, ContentHash, DownloadHash, HostPlatform,
    Manifest, ManifestEntry, ManifestError,
};
use tracing::debug;

use crate::config::Config;
use crate::error::ArtifactError;
use crate::install::{download_hash, CancelToken, Fetcher, HttpFetcher, Installer};
use crate::store::{archive_dir_canonical, ContentStore};

/// Resolve `name` for `host`: `None` when it is unbound or no entry applies.
#[must_use]
pub fn artifact_hash(name: &str, manifest: &Manifest, host: &HostPlatform) -> Option<ContentHash> {
    manifest.resolve(name, host).map(|entry| entry.hash)
}

/// Bind `name` to `hash` as a platform-independent entry. Without
/// `overwrite`, rebinding to the same hash keeps the existing entry and a
/// different hash is refused; with it the entry is replaced.
pub fn bind_artifact(
    manifest: &mut Manifest,
    name: &str,
    hash: ContentHash,
    overwrite: bool,
) -> Result<(), ManifestError> {
    bind_artifact_entry(manifest, name, ManifestEntry::new(hash), overwrite)
}

/// Bind a full entry. Entries carrying platform constraints join (or
/// replace their slot in) the name's platform list.
pub fn bind_artifact_entry(
    manifest: &mut Manifest,
    name: &str,
    entry: ManifestEntry,
    overwrite: bool,
) -> Result<(), ManifestError> {
    if entry.platform.is_empty() {
        manifest.set_binding(name, Binding::Single(entry), overwrite)
    } else {
        manifest.bind_platform_entry(name, entry, overwrite)
    }
}

/// Load the manifest at `path` (or start empty), bind, and write it back
/// atomically. The file is only rewritten when its content changes.
pub fn bind_artifact_file(
    path: &Path,
    name: &str,
    entry: ManifestEntry,
    overwrite: bool,
) -> Result<()> {
    let mut manifest = load_manifest_optional(path)?.unwrap_or_default();
    bind_artifact_entry(&mut manifest, name, entry, overwrite)?;
    write_manifest(path, &manifest)
}

/// Public entry point: a store plus the transport used to fill it.
#[derive(Clone)]
pub struct Artifacts {
    store: ContentStore,
    fetcher: Arc<dyn Fetcher>,
}

impl Artifacts {
    #[must_use]
    pub fn new(store: ContentStore, fetcher: Arc<dyn Fetcher>) -> Self {
        Self { store, fetcher }
    }

    /// Store at the configured root, downloads over HTTP.
    pub fn from_config(config: &Config) -> Result<Self> {
        let store = ContentStore::new(&config.store().root)?;
        let fetcher = HttpFetcher::new(config.network())?;
        Ok(Self::new(store, Arc::new(fetcher)))
    }

    #[must_use]
    pub fn store(&self) -> &ContentStore {
        &self.store
    }

    #[must_use]
    pub fn installer(&self) -> Installer<'_> {
        Installer::new(&self.store, self.fetcher.as_ref())
    }

    #[must_use]
    pub fn artifact_exists(&self, hash: &ContentHash) -> bool {
        self.store.exists(hash)
    }

    /// Path for `hash`. Never installs; see [`Self::ensure_installed`].
    #[must_use]
    pub fn artifact_path(&self, hash: &ContentHash) -> PathBuf {
        self.store.path(hash)
    }

    /// Resolve `name` and install it if missing, returning its path.
    ///
    /// This is the on-demand half of the lazy policy: it installs whatever
    /// it is asked for, lazy or not.
    pub fn ensure_installed(
        &self,
        name: &str,
        manifest: &Manifest,
        host: &HostPlatform,
        cancel: &CancelToken,
    ) -> Result<PathBuf> {
        let entry = resolve_entry(name, manifest, host)?;
        if !self.store.exists(&entry.hash) && !entry.lazy {
            debug!(name, hash = %entry.hash, "installing eager artifact on demand");
        }
        let hash = self.installer().install(entry, cancel)?;
        Ok(self.store.path(&hash))
    }

    /// Entries `ensure_all_installed` would install: resolvable for `host`,
    /// not yet present, and non-lazy unless `include_lazy`.
    #[must_use]
    pub fn select_downloadable<'m>(
        &self,
        manifest: &'m Manifest,
        host: &HostPlatform,
        include_lazy: bool,
    ) -> Vec<(&'m str, &'m ManifestEntry)> {
        manifest
            .iter()
            .filter_map(|(name, binding)| binding.select(host).map(|entry| (name, entry)))
            .filter(|(_, entry)| include_lazy || !entry.lazy)
            .filter(|(_, entry)| !self.store.exists(&entry.hash))
            .collect()
    }

    /// Install every eager binding for `host` (and lazy ones when asked).
    /// Stops at the first failure.
    pub fn ensure_all_installed(
        &self,
        manifest: &Manifest,
        host: &HostPlatform,
        include_lazy: bool,
        cancel: &CancelToken,
    ) -> Result<Vec<(String, ContentHash)>> {
        let installer = self.installer();
        let mut installed = Vec::new();
        for (name, entry) in self.select_downloadable(manifest, host, include_lazy) {
            let hash = installer
                .install(entry, cancel)
                .with_context(|| format!("failed to install artifact '{name}'"))?;
            installed.push((name.to_string(), hash));
        }
        Ok(installed)
    }

    pub fn create<F>(&self, populate: F) -> Result<ContentHash>
    where
        F: FnOnce(&Path) -> Result<()>,
    {
        self.installer().create(populate)
    }

    pub fn verify_artifact(&self, hash: &ContentHash) -> Result<bool> {
        self.store.verify(hash)
    }

    pub fn remove_artifact(&self, hash: &ContentHash) -> Result<bool> {
        self.store.remove(hash)
    }

    pub fn installed_artifacts(&self) -> Result<Vec<ContentHash>> {
        self.store.list()
    }

    /// Write a canonical `.tar.gz` of an installed artifact to `dest` and
    /// return the hash to list in its download descriptor.
    pub fn archive_artifact(&self, hash: &ContentHash, dest: &Path) -> Result<DownloadHash> {
        if !self.store.exists(hash) {
            return Err(ArtifactError::MissingArtifact { hash: *hash }.into());
        }
        let bytes = archive_dir_canonical(&self.store.path(hash))?;
        let parent = match dest.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        fs::create_dir_all(parent)
            .with_context(|| format!("failed to create {}", parent.display()))?;
        let mut tmp = tempfile::NamedTempFile::new_in(parent)
            .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
        tmp.write_all(&bytes)?;
        tmp.as_file().sync_all()?;
        tmp.persist(dest)
            .map_err(|err| err.error)
            .with_context(|| format!("failed to write {}", dest.display()))?;
        let sha256 = download_hash(&bytes);
        debug!(%hash, %sha256, dest = %dest.display(), "artifact archived");
        Ok(sha256)
    }
}

fn resolve_entry<'m>(
    name: &str,
    manifest: &'m Manifest,
    host: &HostPlatform,
) -> Result<&'m ManifestEntry, ArtifactError> {
    let binding = manifest.lookup(name).ok_or_else(|| ArtifactError::Unbound {
        name: name.to_string(),
    })?;
    binding
        .select(host)
        .ok_or_else(|| ArtifactError::PlatformUnresolved {
            name: name.to_string(),
            host: host.to_string(),
        })
}
