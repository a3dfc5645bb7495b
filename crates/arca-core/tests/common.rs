#![allow(dead_code)]

use std::collections::HashMap;
use std::fs;
use std::path::Path;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use arca_core::domain::{ContentHash, DownloadDescriptor, ManifestEntry};
use arca_core::{
    archive_dir_canonical, download_hash, tree_hash, Artifacts, CancelToken, ContentStore, Fetcher,
};
use tempfile::TempDir;

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_test_writer()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .try_init();
}

/// Transport serving canned bodies and recording every request.
#[derive(Default)]
pub struct FakeFetcher {
    responses: Mutex<HashMap<String, Vec<u8>>>,
    calls: Mutex<Vec<String>>,
}

impl FakeFetcher {
    pub fn serve(&self, url: &str, bytes: &[u8]) {
        self.responses
            .lock()
            .expect("responses lock")
            .insert(url.to_string(), bytes.to_vec());
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().expect("calls lock").clone()
    }

    pub fn calls_to(&self, url: &str) -> usize {
        self.calls().iter().filter(|call| *call == url).count()
    }
}

impl Fetcher for FakeFetcher {
    fn fetch(&self, url: &str, cancel: &CancelToken) -> Result<Vec<u8>> {
        self.calls.lock().expect("calls lock").push(url.to_string());
        cancel.check()?;
        self.responses
            .lock()
            .expect("responses lock")
            .get(url)
            .cloned()
            .ok_or_else(|| anyhow!("no route to {url}"))
    }
}

pub struct Harness {
    pub temp: TempDir,
    pub fetcher: Arc<FakeFetcher>,
    pub artifacts: Artifacts,
}

pub fn harness() -> Harness {
    init_tracing();
    let temp = tempfile::tempdir().expect("tempdir");
    let fetcher = Arc::new(FakeFetcher::default());
    let store = ContentStore::new(temp.path().join("store")).expect("store");
    let artifacts = Artifacts::new(store, fetcher.clone());
    Harness {
        temp,
        fetcher,
        artifacts,
    }
}

/// A packed tree ready to be served, with both of its hashes.
pub struct Tarball {
    pub bytes: Vec<u8>,
    pub tree: ContentHash,
}

impl Tarball {
    pub fn descriptor(&self, url: &str) -> DownloadDescriptor {
        DownloadDescriptor::new(url, download_hash(&self.bytes))
    }

    pub fn entry(&self, urls: &[&str]) -> ManifestEntry {
        urls.iter()
            .fold(ManifestEntry::new(self.tree), |entry, url| {
                entry.with_download(self.descriptor(url))
            })
    }
}

pub fn tarball(files: &[(&str, &str)]) -> Tarball {
    let dir = tempfile::tempdir().expect("tempdir");
    write_files(dir.path(), files);
    Tarball {
        bytes: archive_dir_canonical(dir.path()).expect("archive"),
        tree: tree_hash(dir.path()).expect("tree hash"),
    }
}

pub fn write_files(root: &Path, files: &[(&str, &str)]) {
    for (name, contents) in files {
        let path = root.join(name);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).expect("parent dirs");
        }
        fs::write(path, contents).expect("write file");
    }
}

/// Names in the store root that are neither bookkeeping nor `expected`.
pub fn stray_entries(store: &ContentStore, expected: &[ContentHash]) -> Vec<String> {
    let keep: Vec<String> = expected.iter().map(ContentHash::to_hex).collect();
    let mut stray: Vec<String> = fs::read_dir(store.root())
        .expect("read store root")
        .filter_map(Result::ok)
        .map(|entry| entry.file_name().to_string_lossy().into_owned())
        .filter(|name| name != ".locks" && name != ".tmp" && !keep.contains(name))
        .collect();
    let staging = fs::read_dir(store.root().join(".tmp"))
        .expect("read staging dir")
        .filter_map(Result::ok)
        .map(|entry| format!(".tmp/{}", entry.file_name().to_string_lossy()));
    stray.extend(staging);
    stray
}
