use std::fs;
use std::io::Write;
use std::path::Path;

use anyhow::{Context, Result};
use toml_edit::{ArrayOfTables, DocumentMut, Item, Table, TableLike, Value as TomlValue};
use tracing::debug;

use super::{
    Binding, DownloadDescriptor, Manifest, ManifestEntry, ManifestError, DOWNLOAD_HASH_KEY,
    DOWNLOAD_KEY, DOWNLOAD_URL_KEY, HASH_ALIAS_KEY, HASH_KEY, LAZY_KEY, SHA1_HASH_KEY,
};
use crate::hash::{ContentHash, DownloadHash};
use crate::platform::PlatformConstraints;

pub fn load_manifest(path: &Path) -> Result<Manifest> {
    let contents = fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    parse_manifest(&contents).with_context(|| format!("failed to parse {}", path.display()))
}

pub fn load_manifest_optional(path: &Path) -> Result<Option<Manifest>> {
    if path.exists() {
        Ok(Some(load_manifest(path)?))
    } else {
        Ok(None)
    }
}

pub fn parse_manifest(contents: &str) -> Result<Manifest> {
    let doc: DocumentMut = contents
        .parse()
        .map_err(|err: toml_edit::TomlError| ManifestError::Malformed(err.to_string()))?;
    let mut manifest = Manifest::new();
    for (name, item) in doc.iter() {
        let binding = parse_binding(name, item)?;
        binding.validate(name)?;
        manifest.insert_parsed(name.to_string(), binding);
    }
    Ok(manifest)
}

/// Render a manifest in canonical form: names sorted, entry keys in a fixed
/// order, downloads and platform entries in declaration order.
pub fn render_manifest(manifest: &Manifest) -> String {
    let mut doc = DocumentMut::new();
    let mut ordered: Vec<(&str, &Binding)> = manifest.iter().collect();
    ordered.sort_by(|a, b| a.0.cmp(b.0));
    for (name, binding) in ordered {
        match binding {
            Binding::Single(entry) => {
                doc.insert(name, Item::Table(render_entry(entry)));
            }
            Binding::Platforms(entries) => {
                let mut tables = ArrayOfTables::new();
                for entry in entries {
                    tables.push(render_entry(entry));
                }
                doc.insert(name, Item::ArrayOfTables(tables));
            }
        }
    }
    doc.to_string()
}

/// Replace `path` with the rendered manifest via a sibling temp file and rename.
/// Unchanged content is left untouched on disk.
pub fn write_manifest(path: &Path, manifest: &Manifest) -> Result<()> {
    let rendered = render_manifest(manifest);
    if let Ok(existing) = fs::read_to_string(path) {
        if existing == rendered {
            debug!(path = %path.display(), "artifact manifest unchanged");
            return Ok(());
        }
    }
    let parent = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    fs::create_dir_all(parent)
        .with_context(|| format!("failed to create {}", parent.display()))?;
    let mut tmp = tempfile::NamedTempFile::new_in(parent)
        .with_context(|| format!("failed to create temp file in {}", parent.display()))?;
    tmp.write_all(rendered.as_bytes())?;
    tmp.as_file()
        .sync_all()
        .with_context(|| format!("failed to flush manifest for {}", path.display()))?;
    tmp.persist(path)
        .map_err(|err| err.error)
        .with_context(|| format!("failed to write {}", path.display()))?;
    debug!(path = %path.display(), bindings = manifest.len(), "artifact manifest written");
    Ok(())
}

fn render_entry(entry: &ManifestEntry) -> Table {
    let mut table = Table::new();
    table.insert(HASH_KEY, Item::Value(TomlValue::from(entry.hash.to_hex())));
    if entry.lazy {
        table.insert(LAZY_KEY, Item::Value(TomlValue::from(true)));
    }
    for (key, value) in &entry.platform {
        table.insert(key, Item::Value(TomlValue::from(value.as_str())));
    }
    if !entry.downloads.is_empty() {
        let mut downloads = ArrayOfTables::new();
        for download in &entry.downloads {
            let mut source = Table::new();
            source.insert(
                DOWNLOAD_URL_KEY,
                Item::Value(TomlValue::from(download.url.as_str())),
            );
            source.insert(
                DOWNLOAD_HASH_KEY,
                Item::Value(TomlValue::from(download.sha256.to_hex())),
            );
            downloads.push(source);
        }
        table.insert(DOWNLOAD_KEY, Item::ArrayOfTables(downloads));
    }
    table
}

fn malformed(name: &str, detail: impl std::fmt::Display) -> ManifestError {
    ManifestError::Malformed(format!("artifact '{name}' {detail}"))
}

fn table_list(item: &Item) -> Option<Vec<&dyn TableLike>> {
    if let Some(tables) = item.as_array_of_tables() {
        return Some(tables.iter().map(|t| t as &dyn TableLike).collect());
    }
    item.as_array()?
        .iter()
        .map(|value| value.as_inline_table().map(|t| t as &dyn TableLike))
        .collect()
}

fn parse_binding(name: &str, item: &Item) -> Result<Binding, ManifestError> {
    if let Some(tables) = table_list(item) {
        let entries = tables
            .into_iter()
            .map(|table| parse_entry(name, table, true))
            .collect::<Result<Vec<_>, _>>()?;
        return Ok(Binding::Platforms(entries));
    }
    if let Some(table) = item.as_table_like() {
        return parse_entry(name, table, false).map(Binding::Single);
    }
    Err(malformed(name, "must be a table or an array of tables"))
}

fn parse_entry(
    name: &str,
    table: &dyn TableLike,
    in_list: bool,
) -> Result<ManifestEntry, ManifestError> {
    let mut hash: Option<ContentHash> = None;
    let mut lazy = false;
    let mut platform = PlatformConstraints::new();
    let mut downloads = Vec::new();
    for (key, value) in table.iter() {
        match key {
            HASH_KEY | HASH_ALIAS_KEY => {
                if hash.is_some() {
                    return Err(malformed(name, "declares its content hash twice"));
                }
                let raw = value
                    .as_str()
                    .ok_or_else(|| malformed(name, format!("has a non-string '{key}'")))?;
                let parsed = raw
                    .parse::<ContentHash>()
                    .map_err(|err| malformed(name, format!("has an invalid '{key}': {err}")))?;
                hash = Some(parsed);
            }
            SHA1_HASH_KEY => {
                return Err(malformed(
                    name,
                    format!("uses '{SHA1_HASH_KEY}', which is not supported; use '{HASH_KEY}'"),
                ));
            }
            LAZY_KEY => {
                lazy = value
                    .as_bool()
                    .ok_or_else(|| malformed(name, "has a non-boolean 'lazy'"))?;
            }
            DOWNLOAD_KEY => {
                let sources = table_list(value)
                    .ok_or_else(|| malformed(name, "must list downloads as an array of tables"))?;
                for source in sources {
                    downloads.push(parse_download(name, source)?);
                }
            }
            other if in_list => {
                let tag = value.as_str().ok_or_else(|| {
                    malformed(name, format!("has a non-string platform key '{other}'"))
                })?;
                platform.insert(other.to_string(), tag.to_string());
            }
            other => {
                return Err(malformed(name, format!("has unexpected key '{other}'")));
            }
        }
    }
    let hash =
        hash.ok_or_else(|| malformed(name, format!("is missing required key '{HASH_KEY}'")))?;
    Ok(ManifestEntry {
        hash,
        lazy,
        platform,
        downloads,
    })
}

fn parse_download(name: &str, table: &dyn TableLike) -> Result<DownloadDescriptor, ManifestError> {
    let mut url = None;
    let mut sha256 = None;
    for (key, value) in table.iter() {
        match key {
            DOWNLOAD_URL_KEY => {
                url = Some(
                    value
                        .as_str()
                        .ok_or_else(|| malformed(name, "has a non-string download url"))?
                        .to_string(),
                );
            }
            DOWNLOAD_HASH_KEY | HASH_ALIAS_KEY => {
                if sha256.is_some() {
                    return Err(malformed(name, "declares a download hash twice"));
                }
                let raw = value
                    .as_str()
                    .ok_or_else(|| malformed(name, "has a non-string download hash"))?;
                sha256 = Some(raw.parse::<DownloadHash>().map_err(|err| {
                    malformed(name, format!("has an invalid download hash: {err}"))
                })?);
            }
            other => {
                return Err(malformed(
                    name,
                    format!("has unexpected download key '{other}'"),
                ));
            }
        }
    }
    let url = url.ok_or_else(|| malformed(name, "has a download without 'url'"))?;
    let sha256 = sha256
        .ok_or_else(|| malformed(name, format!("has a download without '{DOWNLOAD_HASH_KEY}'")))?;
    Ok(DownloadDescriptor { url, sha256 })
}
