//! Git-style tree hashing over SHA-256.
//!
//! Blobs hash `"blob <len>\0" + bytes`, trees hash `"tree <len>\0" + entries`
//! where each entry is `"<mode> <name>\0<raw digest>"`. Entries are ordered
//! the way git orders them (directories compare as `name/`). Empty
//! directories are not tracked.

use std::cmp::Ordering;
use std::ffi::OsStr;
use std::fs::{self, File};
use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use arca_domain::{ContentHash, DIGEST_LEN};
use sha2::{Digest, Sha256};

const MODE_FILE: &str = "100644";
const MODE_EXECUTABLE: &str = "100755";
const MODE_SYMLINK: &str = "120000";
const MODE_TREE: &str = "40000";

type Digest32 = [u8; DIGEST_LEN];

struct TreeEntry {
    name: Vec<u8>,
    mode: &'static str,
    digest: Digest32,
}

impl TreeEntry {
    fn is_tree(&self) -> bool {
        self.mode == MODE_TREE
    }
}

/// Hash the directory at `root`.
pub fn tree_hash(root: &Path) -> Result<ContentHash> {
    let meta =
        fs::metadata(root).with_context(|| format!("failed to stat {}", root.display()))?;
    if !meta.is_dir() {
        anyhow::bail!("{} is not a directory", root.display());
    }
    let digest = match hash_dir(root)? {
        Some(digest) => digest,
        None => hash_object("tree", &[]),
    };
    Ok(ContentHash::from_bytes(digest))
}

fn hash_dir(dir: &Path) -> Result<Option<Digest32>> {
    let mut entries = Vec::new();
    for entry in fs::read_dir(dir).with_context(|| format!("failed to read {}", dir.display()))? {
        let entry = entry?;
        let path = entry.path();
        let meta = fs::symlink_metadata(&path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        let file_type = meta.file_type();
        let (mode, digest) = if file_type.is_symlink() {
            let target = fs::read_link(&path)
                .with_context(|| format!("failed to read symlink {}", path.display()))?;
            (MODE_SYMLINK, hash_object("blob", &os_bytes(target.as_os_str())))
        } else if file_type.is_dir() {
            match hash_dir(&path)? {
                Some(digest) => (MODE_TREE, digest),
                None => continue,
            }
        } else if file_type.is_file() {
            let mode = if is_executable(&meta) {
                MODE_EXECUTABLE
            } else {
                MODE_FILE
            };
            (mode, hash_file(&path, meta.len())?)
        } else {
            continue;
        };
        entries.push(TreeEntry {
            name: os_bytes(&entry.file_name()),
            mode,
            digest,
        });
    }
    if entries.is_empty() {
        return Ok(None);
    }
    entries.sort_by(git_order);

    let mut body = Vec::new();
    for entry in &entries {
        body.extend_from_slice(entry.mode.as_bytes());
        body.push(b' ');
        body.extend_from_slice(&entry.name);
        body.push(0);
        body.extend_from_slice(&entry.digest);
    }
    Ok(Some(hash_object("tree", &body)))
}

fn git_order(a: &TreeEntry, b: &TreeEntry) -> Ordering {
    let a_key = a.name.iter().copied().chain(a.is_tree().then_some(b'/'));
    let b_key = b.name.iter().copied().chain(b.is_tree().then_some(b'/'));
    a_key.cmp(b_key)
}

fn hash_object(kind: &str, body: &[u8]) -> Digest32 {
    let mut hasher = Sha256::new();
    hasher.update(format!("{kind} {}\0", body.len()).as_bytes());
    hasher.update(body);
    finalize(hasher)
}

fn hash_file(path: &Path, len: u64) -> Result<Digest32> {
    let mut file =
        File::open(path).with_context(|| format!("failed to open {}", path.display()))?;
    let mut hasher = Sha256::new();
    hasher.update(format!("blob {len}\0").as_bytes());
    let copied = io::copy(&mut file, &mut hasher)
        .with_context(|| format!("failed to read {}", path.display()))?;
    if copied != len {
        anyhow::bail!("{} changed while hashing", path.display());
    }
    Ok(finalize(hasher))
}

fn finalize(hasher: Sha256) -> Digest32 {
    let mut out = [0_u8; DIGEST_LEN];
    out.copy_from_slice(&hasher.finalize());
    out
}

#[cfg(unix)]
fn os_bytes(value: &OsStr) -> Vec<u8> {
    use std::os::unix::ffi::OsStrExt;
    value.as_bytes().to_vec()
}

#[cfg(not(unix))]
fn os_bytes(value: &OsStr) -> Vec<u8> {
    value.to_string_lossy().replace('\\', "/").into_bytes()
}

#[cfg(unix)]
pub(crate) fn is_executable(metadata: &fs::Metadata) -> bool {
    use std::os::unix::fs::PermissionsExt;
    metadata.permissions().mode() & 0o111 != 0
}

#[cfg(not(unix))]
pub(crate) fn is_executable(_metadata: &fs::Metadata) -> bool {
    false
}
