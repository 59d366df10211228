//! Streaming gzip + tar extraction.

use flate2::read::GzDecoder;
use std::collections::HashSet;
use std::fs::{self, OpenOptions};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, EntryType};

#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("invalid entry name: {0}")]
    InvalidPath(String),

    #[error("unknown entry type {kind:?} in {name}")]
    UnsupportedEntry { kind: EntryType, name: String },

    #[error("{context}: {source}")]
    Io {
        context: String,
        #[source]
        source: io::Error,
    },
}

fn io_err(context: impl Into<String>) -> impl FnOnce(io::Error) -> ExtractError {
    let context = context.into();
    move |source| ExtractError::Io { context, source }
}

/// Lexically clean `name` into a path relative to the extraction root.
///
/// Leading `/` is dropped. Returns `None` if the path climbs above the root.
pub fn clean_entry_path(name: &Path) -> Option<PathBuf> {
    let mut cleaned = PathBuf::new();
    for component in name.components() {
        match component {
            Component::Normal(part) => cleaned.push(part),
            Component::ParentDir => {
                if !cleaned.pop() {
                    return None;
                }
            }
            Component::CurDir | Component::RootDir | Component::Prefix(_) => {}
        }
    }
    Some(cleaned)
}

/// Extract a gzip-compressed tar stream into `destination`.
///
/// Only directories and regular files are accepted; any other entry type
/// fails the whole extraction. File modes keep the permission bits only.
pub fn extract_tar_gz<R: Read>(reader: R, destination: &Path) -> Result<(), ExtractError> {
    let mut archive = Archive::new(GzDecoder::new(reader));
    let mut created: HashSet<PathBuf> = HashSet::new();

    let mut ensure_dir = |dir: &Path| -> Result<(), ExtractError> {
        if created.contains(dir) {
            return Ok(());
        }
        fs::create_dir_all(dir).map_err(io_err(format!("mkdir {}", dir.display())))?;
        created.insert(dir.to_path_buf());
        Ok(())
    };

    let entries = archive.entries().map_err(io_err("reading archive"))?;
    for entry in entries {
        let mut entry = entry.map_err(io_err("reading next entry"))?;
        let raw = entry.path().map_err(io_err("reading entry name"))?.into_owned();
        let relative = clean_entry_path(&raw)
            .ok_or_else(|| ExtractError::InvalidPath(raw.display().to_string()))?;
        let target = destination.join(&relative);

        let kind = entry.header().entry_type();
        match kind {
            EntryType::Directory => ensure_dir(&target)?,
            EntryType::Regular | EntryType::Continuous => {
                if let Some(parent) = target.parent() {
                    ensure_dir(parent)?;
                }
                let mode = entry.header().mode().unwrap_or(0o644) & 0o777;
                let mut options = OpenOptions::new();
                options.write(true).create(true).truncate(true);
                #[cfg(unix)]
                {
                    use std::os::unix::fs::OpenOptionsExt;
                    options.mode(mode);
                }
                #[cfg(not(unix))]
                let _ = mode;
                let mut file = options
                    .open(&target)
                    .map_err(io_err(format!("create {}", target.display())))?;
                io::copy(&mut entry, &mut file)
                    .map_err(io_err(format!("copy {}", target.display())))?;
            }
            // Archive-wide pax metadata carries no content.
            EntryType::XGlobalHeader => {}
            other => {
                return Err(ExtractError::UnsupportedEntry {
                    kind: other,
                    name: raw.display().to_string(),
                });
            }
        }
    }
    Ok(())
}
