//! Zip and gzip archive helpers for fetched packages.

use crate::tarextract::{self, ExtractError, clean_entry_path};
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::Path;
use zip::ZipArchive;
use zip::write::{SimpleFileOptions, ZipWriter};

const ZIP_MAGIC: [u8; 4] = [0x50, 0x4b, 0x03, 0x04];
const GZIP_MAGIC: [u8; 2] = [0x1f, 0x8b];

/// Archive format recognised by its leading bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveKind {
    Zip,
    TarGz,
}

/// Sniff the archive format of a regular file.
///
/// Directories and short or unrecognised files yield `None`.
pub fn detect(path: &Path) -> io::Result<Option<ArchiveKind>> {
    if !fs::metadata(path)?.is_file() {
        return Ok(None);
    }
    let mut head = [0u8; 4];
    let mut file = File::open(path)?;
    let mut filled = 0;
    while filled < head.len() {
        let n = file.read(&mut head[filled..])?;
        if n == 0 {
            break;
        }
        filled += n;
    }
    if filled >= ZIP_MAGIC.len() && head == ZIP_MAGIC {
        Ok(Some(ArchiveKind::Zip))
    } else if filled >= GZIP_MAGIC.len() && head[..2] == GZIP_MAGIC {
        Ok(Some(ArchiveKind::TarGz))
    } else {
        Ok(None)
    }
}

/// Unpack `src` of the given kind into the `dst` directory.
pub fn extract(kind: ArchiveKind, src: &Path, dst: &Path) -> Result<(), ExtractError> {
    fs::create_dir_all(dst).map_err(|source| ExtractError::Io {
        context: format!("mkdir {}", dst.display()),
        source,
    })?;
    match kind {
        ArchiveKind::Zip => extract_zip(src, dst),
        ArchiveKind::TarGz => {
            let file = File::open(src).map_err(|source| ExtractError::Io {
                context: format!("open {}", src.display()),
                source,
            })?;
            tarextract::extract_tar_gz(io::BufReader::new(file), dst)
        }
    }
}

fn zip_io(context: String) -> impl FnOnce(io::Error) -> ExtractError {
    move |source| ExtractError::Io { context, source }
}

fn zip_err(e: zip::result::ZipError) -> ExtractError {
    ExtractError::Io {
        context: "reading zip archive".to_string(),
        source: io::Error::new(io::ErrorKind::InvalidData, e),
    }
}

/// Extract a zip file, rejecting entries that would land outside `dst`.
pub fn extract_zip(src: &Path, dst: &Path) -> Result<(), ExtractError> {
    let file = File::open(src).map_err(zip_io(format!("open {}", src.display())))?;
    let mut archive = ZipArchive::new(file).map_err(zip_err)?;

    for index in 0..archive.len() {
        let mut entry = archive.by_index(index).map_err(zip_err)?;
        let name = entry.name().to_string();
        let relative = clean_entry_path(Path::new(&name))
            .ok_or_else(|| ExtractError::InvalidPath(name.clone()))?;
        let target = dst.join(relative);

        if entry.is_dir() {
            fs::create_dir_all(&target).map_err(zip_io(format!("mkdir {}", target.display())))?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).map_err(zip_io(format!("mkdir {}", parent.display())))?;
        }
        let mut out =
            File::create(&target).map_err(zip_io(format!("create {}", target.display())))?;
        io::copy(&mut entry, &mut out).map_err(zip_io(format!("copy {}", target.display())))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = entry.unix_mode() {
                fs::set_permissions(&target, fs::Permissions::from_mode(mode & 0o777))
                    .map_err(zip_io(format!("chmod {}", target.display())))?;
            }
        }
    }
    Ok(())
}

/// Zip `src` into the file `dst`.
///
/// A directory contributes its contents (not itself) at the archive root;
/// a single file is stored under its own name.
pub fn zip_path(src: &Path, dst: &Path) -> io::Result<()> {
    let out = File::create(dst)?;
    let mut writer = ZipWriter::new(out);
    let options = SimpleFileOptions::default();

    if fs::metadata(src)?.is_dir() {
        add_dir(&mut writer, src, "", options)?;
    } else {
        let name = src
            .file_name()
            .and_then(|n| n.to_str())
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "unnamed source file"))?;
        add_file(&mut writer, src, name, options)?;
    }

    writer.finish().map_err(io::Error::other)?.flush()
}

fn add_dir<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    dir: &Path,
    prefix: &str,
    options: SimpleFileOptions,
) -> io::Result<()> {
    let mut entries: Vec<_> = fs::read_dir(dir)?.collect::<io::Result<_>>()?;
    entries.sort_by_key(|e| e.file_name());

    for entry in entries {
        let file_name = entry.file_name();
        let Some(file_name) = file_name.to_str() else {
            return Err(io::Error::new(
                io::ErrorKind::InvalidData,
                "non UTF-8 file name",
            ));
        };
        let name = format!("{prefix}{file_name}");
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            writer
                .add_directory(format!("{name}/"), options)
                .map_err(io::Error::other)?;
            add_dir(writer, &path, &format!("{name}/"), options)?;
        } else {
            add_file(writer, &path, &name, options)?;
        }
    }
    Ok(())
}

fn add_file<W: Write + io::Seek>(
    writer: &mut ZipWriter<W>,
    path: &Path,
    name: &str,
    options: SimpleFileOptions,
) -> io::Result<()> {
    #[cfg(unix)]
    let options = {
        use std::os::unix::fs::PermissionsExt;
        options.unix_permissions(fs::metadata(path)?.permissions().mode() & 0o777)
    };
    writer.start_file(name, options).map_err(io::Error::other)?;
    let mut file = File::open(path)?;
    io::copy(&mut file, writer)?;
    Ok(())
}
