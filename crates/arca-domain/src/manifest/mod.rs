use indexmap::IndexMap;

use crate::hash::{ContentHash, DownloadHash};
use crate::platform::{self, HostPlatform, PlatformConstraints};

pub(crate) mod io;


pub const HASH_KEY: &str = "git-tree-sha256";
pub const HASH_ALIAS_KEY: &str = "hash";
pub const LAZY_KEY: &str = "lazy";
pub const DOWNLOAD_KEY: &str = "download";
pub const DOWNLOAD_URL_KEY: &str = "url";
pub const DOWNLOAD_HASH_KEY: &str = "sha256";

/// SHA-1 tree hashes are not accepted; the key is reserved so it can never
/// be mistaken for a platform constraint.
pub(crate) const SHA1_HASH_KEY: &str = "git-tree-sha1";

const RESERVED_KEYS: &[&str] = &[
    HASH_KEY,
    HASH_ALIAS_KEY,
    SHA1_HASH_KEY,
    LAZY_KEY,
    DOWNLOAD_KEY,
];

/// Errors raised while reading or mutating a manifest.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum ManifestError {
    #[error("[AR100] malformed artifact manifest: {0}")]
    Malformed(String),
    #[error("[AR110] artifact '{name}' is already bound ({existing})")]
    NameAlreadyBound { name: String, existing: String },
}

impl ManifestError {
    #[must_use]
    pub fn code(&self) -> &'static str {
        match self {
            Self::Malformed(_) => "AR100",
            Self::NameAlreadyBound { .. } => "AR110",
        }
    }
}

/// One place a packaged form of an artifact can be fetched from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DownloadDescriptor {
    pub url: String,
    pub sha256: DownloadHash,
}

impl DownloadDescriptor {
    #[must_use]
    pub fn new(url: impl Into<String>, sha256: DownloadHash) -> Self {
        Self {
            url: url.into(),
            sha256,
        }
    }
}

/// A content hash plus everything needed to materialize it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ManifestEntry {
    pub hash: ContentHash,
    pub lazy: bool,
    /// Empty for platform-independent bindings.
    pub platform: PlatformConstraints,
    /// Sources tried in order. Empty means the content must be produced locally.
    pub downloads: Vec<DownloadDescriptor>,
}

impl ManifestEntry {
    #[must_use]
    pub fn new(hash: ContentHash) -> Self {
        Self {
            hash,
            lazy: false,
            platform: PlatformConstraints::new(),
            downloads: Vec::new(),
        }
    }

    #[must_use]
    pub fn lazy(mut self, lazy: bool) -> Self {
        self.lazy = lazy;
        self
    }

    #[must_use]
    pub fn with_download(mut self, download: DownloadDescriptor) -> Self {
        self.downloads.push(download);
        self
    }

    #[must_use]
    pub fn with_constraint(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.platform.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn is_installable(&self) -> bool {
        !self.downloads.is_empty()
    }
}

/// What a name in the manifest points at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Binding {
    Single(ManifestEntry),
    /// Disambiguated per host at lookup time; order is declaration order.
    Platforms(Vec<ManifestEntry>),
}

impl Binding {
    /// Resolve the binding for `host`. Single bindings always resolve.
    #[must_use]
    pub fn select(&self, host: &HostPlatform) -> Option<&ManifestEntry> {
        match self {
            Self::Single(entry) => Some(entry),
            Self::Platforms(entries) => platform::select(entries, host),
        }
    }

    #[must_use]
    pub fn entries(&self) -> &[ManifestEntry] {
        match self {
            Self::Single(entry) => std::slice::from_ref(entry),
            Self::Platforms(entries) => entries,
        }
    }

    #[must_use]
    pub fn is_platform_dependent(&self) -> bool {
        matches!(self, Self::Platforms(_))
    }

    fn describe(&self) -> String {
        match self {
            Self::Single(entry) => format!("{HASH_KEY} = {}", entry.hash),
            Self::Platforms(entries) => format!("{} platform entries", entries.len()),
        }
    }

    fn same_content(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Single(a), Self::Single(b)) => a.hash == b.hash,
            (Self::Platforms(a), Self::Platforms(b)) => {
                a.len() == b.len()
                    && a
                        .iter()
                        .zip(b)
                        .all(|(x, y)| x.hash == y.hash && x.platform == y.platform)
            }
            _ => false,
        }
    }

    pub(crate) fn validate(&self, name: &str) -> Result<(), ManifestError> {
        match self {
            Self::Single(entry) => {
                validate_entry(name, entry)?;
                if !entry.platform.is_empty() {
                    return Err(ManifestError::Malformed(format!(
                        "artifact '{name}' is platform-independent but declares platform keys"
                    )));
                }
            }
            Self::Platforms(entries) => {
                if entries.is_empty() {
                    return Err(ManifestError::Malformed(format!(
                        "artifact '{name}' has an empty platform list"
                    )));
                }
                for (idx, entry) in entries.iter().enumerate() {
                    validate_entry(name, entry)?;
                    if entries[..idx].iter().any(|prev| prev.platform == entry.platform) {
                        return Err(ManifestError::Malformed(format!(
                            "artifact '{name}' declares two entries for the same platform"
                        )));
                    }
                }
            }
        }
        Ok(())
    }
}

fn validate_entry(name: &str, entry: &ManifestEntry) -> Result<(), ManifestError> {
    if let Some(key) = entry
        .platform
        .keys()
        .find(|key| key.is_empty() || RESERVED_KEYS.contains(&key.as_str()))
    {
        return Err(ManifestError::Malformed(format!(
            "artifact '{name}' uses reserved or empty platform key '{key}'"
        )));
    }
    for download in &entry.downloads {
        url::Url::parse(&download.url).map_err(|err| {
            ManifestError::Malformed(format!(
                "artifact '{name}' has invalid download url '{}': {err}",
                download.url
            ))
        })?;
    }
    Ok(())
}

/// Name to binding table for one project.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Manifest {
    bindings: IndexMap<String, Binding>,
}

impl Manifest {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn lookup(&self, name: &str) -> Option<&Binding> {
        self.bindings.get(name)
    }

    /// Resolve `name` for `host`; `None` covers both unbound and unresolved.
    #[must_use]
    pub fn resolve(&self, name: &str, host: &HostPlatform) -> Option<&ManifestEntry> {
        self.lookup(name).and_then(|binding| binding.select(host))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.bindings.keys().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Binding)> {
        self.bindings.iter().map(|(name, binding)| (name.as_str(), binding))
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.bindings.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.bindings.is_empty()
    }

    /// Bind `name` to `binding`.
    ///
    /// Without `overwrite`, rebinding a name to the same content is a no-op
    /// that keeps the existing entry (and its download sources), and
    /// different content is refused. With `overwrite` the binding is always
    /// replaced.
    ///
    /// # Errors
    ///
    /// `NameAlreadyBound` on a conflicting rebind without `overwrite`,
    /// `Malformed` when the binding itself is not representable.
    pub fn set_binding(
        &mut self,
        name: &str,
        binding: Binding,
        overwrite: bool,
    ) -> Result<(), ManifestError> {
        validate_name(name)?;
        binding.validate(name)?;
        if let Some(existing) = self.bindings.get(name) {
            if !overwrite {
                if existing.same_content(&binding) {
                    return Ok(());
                }
                return Err(ManifestError::NameAlreadyBound {
                    name: name.to_string(),
                    existing: existing.describe(),
                });
            }
        }
        self.bindings.insert(name.to_string(), binding);
        Ok(())
    }

    /// Add or replace the entry of a platform-dependent binding whose
    /// constraints equal `entry.platform`. An entry with the same hash is
    /// kept as is unless `overwrite`.
    ///
    /// # Errors
    ///
    /// `NameAlreadyBound` when the name is bound platform-independently, or
    /// the same platform already maps to a different hash, and `overwrite`
    /// is false.
    pub fn bind_platform_entry(
        &mut self,
        name: &str,
        entry: ManifestEntry,
        overwrite: bool,
    ) -> Result<(), ManifestError> {
        validate_name(name)?;
        validate_entry(name, &entry)?;
        match self.bindings.get_mut(name) {
            None => {
                self.bindings
                    .insert(name.to_string(), Binding::Platforms(vec![entry]));
            }
            Some(existing @ Binding::Single(_)) => {
                if !overwrite {
                    return Err(ManifestError::NameAlreadyBound {
                        name: name.to_string(),
                        existing: existing.describe(),
                    });
                }
                *existing = Binding::Platforms(vec![entry]);
            }
            Some(Binding::Platforms(entries)) => {
                match entries.iter().position(|e| e.platform == entry.platform) {
                    Some(idx) if !overwrite && entries[idx].hash == entry.hash => {}
                    Some(idx) => {
                        if !overwrite {
                            return Err(ManifestError::NameAlreadyBound {
                                name: name.to_string(),
                                existing: format!("{HASH_KEY} = {}", entries[idx].hash),
                            });
                        }
                        entries[idx] = entry;
                    }
                    None => entries.push(entry),
                }
            }
        }
        Ok(())
    }

    /// Remove a binding entirely.
    pub fn unbind(&mut self, name: &str) -> Option<Binding> {
        self.bindings.shift_remove(name)
    }

    /// Remove the platform entry with exactly `constraints`; drops the name
    /// once its last entry is gone.
    pub fn unbind_platform(
        &mut self,
        name: &str,
        constraints: &PlatformConstraints,
    ) -> Option<ManifestEntry> {
        let Some(Binding::Platforms(entries)) = self.bindings.get_mut(name) else {
            return None;
        };
        let idx = entries.iter().position(|e| &e.platform == constraints)?;
        let removed = entries.remove(idx);
        if entries.is_empty() {
            self.bindings.shift_remove(name);
        }
        Some(removed)
    }

    pub(crate) fn insert_parsed(&mut self, name: String, binding: Binding) {
        self.bindings.insert(name, binding);
    }
}

fn validate_name(name: &str) -> Result<(), ManifestError> {
    if name.trim().is_empty() {
        return Err(ManifestError::Malformed(
            "artifact names must not be empty".to_string(),
        ));
    }
    Ok(())
}
