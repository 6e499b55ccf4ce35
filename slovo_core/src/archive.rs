//! Directory packaging for single-stream transfer.
//!
//! A directory is packed into a deflate-compressed zip next to it
//! (`photos/` becomes `photos.zip`). Entry names are relative to the
//! directory root, so unpacking writes the contents straight into the
//! destination directory. Both functions block; call them from
//! `tokio::task::spawn_blocking` inside async code.

use crate::error::{Result, TransferError};
use crate::transfer::constants::ARCHIVE_SUFFIX;
use std::fs::{self, File};
use std::io::{self, BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::debug;
use walkdir::WalkDir;
use zip::CompressionMethod;
use zip::write::FileOptions;

/// Path of the archive `pack` writes for `directory`
pub fn archive_path_for(directory: &Path) -> PathBuf {
    // Normalizing drops a trailing separator, so "dir/" maps to "dir.zip"
    let normalized: PathBuf = directory.components().collect();
    let mut name = normalized.into_os_string();
    name.push(ARCHIVE_SUFFIX);
    PathBuf::from(name)
}

/// Whether a received file name marks a packed directory
pub fn is_archive_name(file_name: &str) -> bool {
    file_name.len() > ARCHIVE_SUFFIX.len() && file_name.ends_with(ARCHIVE_SUFFIX)
}

/// Pack every file under `directory` into `<directory>.zip` and return its path
pub fn pack(directory: &Path) -> Result<PathBuf> {
    if !directory.is_dir() {
        return Err(TransferError::Io(io::Error::new(
            io::ErrorKind::NotFound,
            format!("{} is not a directory", directory.display()),
        )));
    }

    // "." or "dir/.." have no usable name and would put the archive inside the walk
    let root = fs::canonicalize(directory)?;
    let archive_path = archive_path_for(&root);
    let file = File::create(&archive_path)?;
    let mut zip = zip::ZipWriter::new(BufWriter::new(file));
    let options = FileOptions::default().compression_method(CompressionMethod::Deflated);

    let mut entries = 0usize;
    for entry in WalkDir::new(&root).min_depth(1).sort_by_file_name() {
        let entry = entry.map_err(io::Error::from)?;
        if entry.path() == archive_path.as_path() {
            continue;
        }
        let rel_path = entry
            .path()
            .strip_prefix(&root)
            .map_err(|e| io::Error::other(e.to_string()))?;
        let name = entry_name(rel_path);

        if entry.file_type().is_dir() {
            zip.add_directory(name, options)?;
        } else if entry.file_type().is_file() {
            debug!("Packing {}", name);
            zip.start_file(name, options)?;
            let mut src = File::open(entry.path())?;
            io::copy(&mut src, &mut zip)?;
            entries += 1;
        }
    }

    zip.finish()?.flush()?;
    debug!(
        "Packed {} files from {} into {}",
        entries,
        root.display(),
        archive_path.display()
    );
    Ok(archive_path)
}

/// Expand `archive` into `destination`, preserving relative paths
pub fn unpack(archive: &Path, destination: &Path) -> Result<()> {
    let file = File::open(archive)?;
    let mut zip = zip::ZipArchive::new(file)?;
    fs::create_dir_all(destination)?;

    for i in 0..zip.len() {
        let mut entry = zip.by_index(i)?;
        let rel_path = entry.enclosed_name().map(Path::to_path_buf).ok_or_else(|| {
            TransferError::Io(io::Error::new(
                io::ErrorKind::InvalidData,
                format!("unsafe path in archive: {}", entry.name()),
            ))
        })?;
        let dest_path = destination.join(&rel_path);

        if entry.is_dir() {
            fs::create_dir_all(&dest_path)?;
            continue;
        }

        if let Some(parent) = dest_path.parent() {
            fs::create_dir_all(parent)?;
        }
        debug!("Extracting {}", rel_path.display());
        let mut out = File::create(&dest_path)?;
        io::copy(&mut entry, &mut out)?;
    }

    Ok(())
}

/// Zip entry names always use forward slashes
fn entry_name(rel_path: &Path) -> String {
    rel_path
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}
