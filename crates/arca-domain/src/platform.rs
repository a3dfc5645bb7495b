use std::collections::BTreeMap;
use std::fmt;

use crate::manifest::ManifestEntry;

pub const OS_KEY: &str = "os";
pub const ARCH_KEY: &str = "arch";
pub const LIBC_KEY: &str = "libc";

/// Open-ended `key = value` tags a platform-dependent entry requires of the host.
pub type PlatformConstraints = BTreeMap<String, String>;

/// Descriptor of the machine resolving artifacts.
///
/// The core never inspects the running system; callers decide which tags
/// describe their host (and normalize anything that needs ranges, like
/// libc versions, into exact strings before calling in).
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct HostPlatform {
    tags: BTreeMap<String, String>,
}

impl HostPlatform {
    #[must_use]
    pub fn new(os: impl Into<String>, arch: impl Into<String>) -> Self {
        Self::default().with_tag(OS_KEY, os).with_tag(ARCH_KEY, arch)
    }

    #[must_use]
    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }

    #[must_use]
    pub fn from_tags<I, K, V>(tags: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        Self {
            tags: tags
                .into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        }
    }

    #[must_use]
    pub fn tag(&self, key: &str) -> Option<&str> {
        self.tags.get(key).map(String::as_str)
    }

    #[must_use]
    pub fn os(&self) -> Option<&str> {
        self.tag(OS_KEY)
    }

    #[must_use]
    pub fn arch(&self) -> Option<&str> {
        self.tag(ARCH_KEY)
    }

    #[must_use]
    pub fn tags(&self) -> &BTreeMap<String, String> {
        &self.tags
    }

    /// True when every constraint key exists on the host with exactly the same value.
    #[must_use]
    pub fn satisfies(&self, constraints: &PlatformConstraints) -> bool {
        constraints
            .iter()
            .all(|(key, value)| self.tag(key) == Some(value.as_str()))
    }
}

impl fmt::Display for HostPlatform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let rendered: Vec<String> = self
            .tags
            .iter()
            .map(|(key, value)| format!("{key}={value}"))
            .collect();
        f.write_str(&rendered.join(","))
    }
}

/// Pick the entry of a platform-dependent binding that applies to `host`.
///
/// Only candidates whose constraints are all satisfied are considered. The
/// one declaring the most constraint keys wins; equal counts fall back to
/// declaration order, first wins.
#[must_use]
pub fn select<'a>(candidates: &'a [ManifestEntry], host: &HostPlatform) -> Option<&'a ManifestEntry> {
    let mut best: Option<&ManifestEntry> = None;
    for candidate in candidates {
        if !host.satisfies(&candidate.platform) {
            continue;
        }
        let better = match best {
            None => true,
            Some(current) => candidate.platform.len() > current.platform.len(),
        };
        if better {
            best = Some(candidate);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hash::ContentHash;

    fn hash(byte: u8) -> ContentHash {
        ContentHash::from_bytes([byte; 32])
    }

    fn entry(byte: u8, tags: &[(&str, &str)]) -> ManifestEntry {
        let mut entry = ManifestEntry::new(hash(byte));
        for (key, value) in tags {
            entry.platform.insert((*key).to_string(), (*value).to_string());
        }
        entry
    }

    #[test]
    fn most_specific_candidate_wins() {
        let candidates = vec![
            entry(1, &[("os", "linux")]),
            entry(2, &[("os", "linux"), ("libc", "musl")]),
        ];

        let musl = HostPlatform::default()
            .with_tag("os", "linux")
            .with_tag("libc", "musl");
        assert_eq!(select(&candidates, &musl).map(|e| e.hash), Some(hash(2)));

        let glibc = HostPlatform::default()
            .with_tag("os", "linux")
            .with_tag("libc", "glibc");
        assert_eq!(select(&candidates, &glibc).map(|e| e.hash), Some(hash(1)));

        let mac = HostPlatform::default().with_tag("os", "macos");
        assert!(select(&candidates, &mac).is_none());
    }

    #[test]
    fn equal_specificity_prefers_declaration_order() {
        let candidates = vec![
            entry(1, &[("os", "linux"), ("arch", "x86_64")]),
            entry(2, &[("os", "linux"), ("libc", "glibc")]),
        ];
        let host = HostPlatform::new("linux", "x86_64").with_tag("libc", "glibc");
        assert_eq!(select(&candidates, &host).map(|e| e.hash), Some(hash(1)));
    }

    #[test]
    fn unconstrained_candidate_acts_as_fallback() {
        let candidates = vec![entry(1, &[]), entry(2, &[("os", "windows")])];
        let host = HostPlatform::new("linux", "aarch64");
        assert_eq!(select(&candidates, &host).map(|e| e.hash), Some(hash(1)));
        let windows = HostPlatform::new("windows", "x86_64");
        assert_eq!(select(&candidates, &windows).map(|e| e.hash), Some(hash(2)));
    }

    #[test]
    fn extra_host_tags_do_not_prevent_a_match() {
        let candidates = vec![entry(7, &[("arch", "aarch64")])];
        let host = HostPlatform::new("macos", "aarch64").with_tag("cxxstring_abi", "cxx11");
        assert!(select(&candidates, &host).is_some());
        assert_eq!(host.to_string(), "arch=aarch64,cxxstring_abi=cxx11,os=macos");
    }
}
