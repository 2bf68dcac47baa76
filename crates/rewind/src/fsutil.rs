//! Small filesystem helpers shared by the fetcher, assembler and coordinator.

use rewind_core::{Result, RewindError};
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

/// Recursively copy `src` into `dst`, creating `dst` if needed.
pub fn copy_dir_recursive(src: &Path, dst: &Path) -> Result<()> {
    fs::create_dir_all(dst)?;
    for entry in fs::read_dir(src)? {
        let entry = entry?;
        let target = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            copy_dir_recursive(&entry.path(), &target)?;
        } else {
            fs::copy(entry.path(), &target)?;
        }
    }
    Ok(())
}

pub fn dir_is_empty(dir: &Path) -> Result<bool> {
    if !dir.exists() {
        return Ok(true);
    }
    Ok(fs::read_dir(dir)?.next().is_none())
}

/// Total size of all files under `dir`.
pub fn dir_size(dir: &Path) -> Result<u64> {
    let mut size = 0u64;
    for entry in walkdir::WalkDir::new(dir) {
        let entry = entry.map_err(|e| RewindError::Io(std::io::Error::other(e.to_string())))?;
        if entry.file_type().is_file() {
            size += entry
                .metadata()
                .map_err(|e| RewindError::Io(std::io::Error::other(e.to_string())))?
                .len();
        }
    }
    Ok(size)
}

/// SHA-256 over all file contents under `dir`, in file-name order.
pub fn dir_checksum(dir: &Path) -> Result<String> {
    let mut hasher = Sha256::new();
    for entry in walkdir::WalkDir::new(dir).sort_by_file_name() {
        let entry = entry.map_err(|e| RewindError::Io(std::io::Error::other(e.to_string())))?;
        if entry.file_type().is_file() {
            hasher.update(fs::read(entry.path())?);
        }
    }
    Ok(format!("{:x}", hasher.finalize()))
}

/// Unpack a `.tar.gz` archive into `dest` and remove the archive.
pub fn unpack_tarball(archive: &Path, dest: &Path) -> Result<()> {
    let file = fs::File::open(archive)?;
    let tar = flate2::read::GzDecoder::new(file);
    let mut archive_reader = tar::Archive::new(tar);
    archive_reader.unpack(dest).map_err(RewindError::Io)?;
    fs::remove_file(archive)?;
    Ok(())
}
