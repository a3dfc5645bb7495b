use std::fs::{self, File};
use std::io::{Read, Write};
use std::path::Path;

use anyhow::{anyhow, bail, Context, Result};
use flate2::{read::GzDecoder, Compression, GzBuilder};
use tar::{Archive, EntryType, Header};
use tracing::debug;

use super::tree_hash::is_executable;
use crate::install::CancelToken;

const GZIP_MAGIC: &[u8] = &[0x1f, 0x8b];
const BZIP2_MAGIC: &[u8] = b"BZh";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Codec {
    Gzip,
    Bzip2,
    None,
}

fn sniff(bytes: &[u8]) -> Codec {
    if bytes.starts_with(GZIP_MAGIC) {
        Codec::Gzip
    } else if bytes.starts_with(BZIP2_MAGIC) {
        Codec::Bzip2
    } else {
        Codec::None
    }
}

/// Unpack a tar archive (plain, gzip or bzip2) into `dest`.
///
/// Entries that would land outside `dest` are rejected. A well-formed archive
/// with no entries unpacks to an empty tree. The token is polled
/// between entries; on cancellation `dest` is left partially written and the
/// caller is expected to discard it.
pub fn extract_archive(bytes: &[u8], dest: &Path, cancel: &CancelToken) -> Result<()> {
    fs::create_dir_all(dest).with_context(|| format!("failed to create {}", dest.display()))?;
    match sniff(bytes) {
        Codec::Gzip => unpack(GzDecoder::new(bytes), dest, cancel),
        Codec::Bzip2 => unpack(bzip2::read::BzDecoder::new(bytes), dest, cancel),
        Codec::None => unpack(bytes, dest, cancel),
    }
}

fn unpack<R: Read>(reader: R, dest: &Path, cancel: &CancelToken) -> Result<()> {
    let mut archive = Archive::new(reader);
    archive.set_preserve_permissions(true);
    archive.set_overwrite(true);
    let mut unpacked = 0_usize;
    for entry in archive.entries().context("failed to read archive")? {
        cancel.check()?;
        let mut entry = entry.context("corrupt archive entry")?;
        let path = entry
            .path()
            .map(|path| path.display().to_string())
            .unwrap_or_default();
        let inside = entry
            .unpack_in(dest)
            .with_context(|| format!("failed to unpack '{path}'"))?;
        if !inside {
            bail!("archive entry '{path}' escapes the destination");
        }
        unpacked += 1;
    }
    debug!(entries = unpacked, dest = %dest.display(), "archive extracted");
    Ok(())
}

fn normalize_archive_path(path: &Path) -> Result<String> {
    let normalized = path.to_string_lossy().replace('\\', "/");
    if normalized.starts_with('/') {
        return Err(anyhow!(
            "archive entries must be relative (got {})",
            normalized
        ));
    }
    if normalized.is_empty() {
        return Err(anyhow!("archive entry path is empty"));
    }
    Ok(normalized)
}

/// Write a deterministic gzip-compressed tar of `root`: sorted entries, zero
/// timestamps and owners, modes reduced to what the tree hash observes.
/// Symlink targets are stored verbatim so the unpacked tree hashes the same.
pub fn archive_dir_canonical_to_writer<W: Write>(root: &Path, writer: W) -> Result<W> {
    let encoder = GzBuilder::new()
        .mtime(0)
        .write(writer, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.follow_symlinks(false);
    for entry in walkdir::WalkDir::new(root).sort_by(|a, b| a.file_name().cmp(b.file_name())) {
        let entry = entry.with_context(|| format!("failed to walk {}", root.display()))?;
        let path = entry.path();
        if path == root {
            continue;
        }
        let rel = path
            .strip_prefix(root)
            .context("failed to relativize path")?;
        let rel_path = normalize_archive_path(rel)?;
        let metadata = fs::symlink_metadata(path)
            .with_context(|| format!("failed to stat {}", path.display()))?;
        let file_type = metadata.file_type();
        let mut header = Header::new_gnu();
        header.set_mtime(0);
        header.set_uid(0);
        header.set_gid(0);
        let _ = header.set_username("");
        let _ = header.set_groupname("");
        if file_type.is_dir() {
            header.set_entry_type(EntryType::Directory);
            header.set_mode(0o755);
            header.set_size(0);
            builder.append_data(&mut header, Path::new(&rel_path), std::io::empty())?;
        } else if file_type.is_file() {
            header.set_entry_type(EntryType::Regular);
            header.set_mode(if is_executable(&metadata) {
                0o755
            } else {
                0o644
            });
            header.set_size(metadata.len());
            let file = File::open(path)
                .with_context(|| format!("failed to open {}", path.display()))?;
            builder.append_data(&mut header, Path::new(&rel_path), file)?;
        } else if file_type.is_symlink() {
            header.set_entry_type(EntryType::Symlink);
            header.set_mode(0o777);
            header.set_size(0);
            let target = fs::read_link(path)
                .with_context(|| format!("failed to read symlink target {}", path.display()))?;
            builder
                .append_link(&mut header, Path::new(&rel_path), &target)
                .with_context(|| format!("failed to archive symlink {}", path.display()))?;
        } else {
            debug!(path = %path.display(), "skipping special file during archive");
        }
    }
    builder.finish()?;
    let encoder = builder.into_inner()?;
    Ok(encoder.finish()?)
}

/// In-memory form of [`archive_dir_canonical_to_writer`].
pub fn archive_dir_canonical(root: &Path) -> Result<Vec<u8>> {
    archive_dir_canonical_to_writer(root, Vec::new())
}
