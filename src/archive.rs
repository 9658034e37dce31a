//! Zip extraction with protections against zip slip and zip bomb attacks.

use anyhow::{bail, Context, Result};
use std::fs::{self, File};
use std::io::{self, Read};
use std::path::{Component, Path, PathBuf};

/// Maximum uncompressed size for any single zip entry (1 GB)
pub(crate) const MAX_UNCOMPRESSED_SIZE: u64 = 1024 * 1024 * 1024;
/// Maximum compression ratio to detect zip bombs (normal files rarely exceed 20:1)
pub(crate) const MAX_COMPRESSION_RATIO: f64 = 100.0;
/// Maximum total extracted size for all entries combined (2 GB)
pub(crate) const MAX_TOTAL_EXTRACTED_SIZE: u64 = 2 * 1024 * 1024 * 1024;

/// A reader that refuses to yield more than `limit` bytes.
///
/// Catches entries that lie about their uncompressed size in headers.
pub(crate) struct LimitedReader<R> {
    inner: R,
    remaining: u64,
}

impl<R> LimitedReader<R> {
    pub(crate) fn new(inner: R, limit: u64) -> Self {
        Self {
            inner,
            remaining: limit,
        }
    }
}

impl<R: Read> Read for LimitedReader<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(io::Error::other(
                "Zip entry exceeds maximum allowed size during extraction - possible zip bomb",
            ));
        }

        let max_read = std::cmp::min(buf.len() as u64, self.remaining) as usize;
        let bytes_read = self.inner.read(&mut buf[..max_read])?;
        self.remaining = self.remaining.saturating_sub(bytes_read as u64);

        Ok(bytes_read)
    }
}

/// Reject entries that are too large or compress suspiciously well.
pub(crate) fn validate_zip_entry<R: Read + ?Sized>(file: &zip::read::ZipFile<'_, R>) -> Result<()> {
    let compressed = file.compressed_size();
    let uncompressed = file.size();

    if uncompressed > MAX_UNCOMPRESSED_SIZE {
        bail!(
            "Zip entry '{}' too large: {} bytes (max: {} bytes)",
            file.name(),
            uncompressed,
            MAX_UNCOMPRESSED_SIZE
        );
    }

    if compressed > 0 {
        let ratio = uncompressed as f64 / compressed as f64;
        if ratio > MAX_COMPRESSION_RATIO {
            bail!(
                "Suspicious compression ratio in '{}': {:.1}x (max: {:.1}x) - possible zip bomb",
                file.name(),
                ratio,
                MAX_COMPRESSION_RATIO
            );
        }
    }

    Ok(())
}

/// Resolve an entry name below `dest_dir`, rejecting traversal and absolute paths.
pub(crate) fn safe_extract_path(dest_dir: &Path, entry_name: &str) -> Result<PathBuf> {
    let entry_path = Path::new(entry_name);
    if entry_path.is_absolute() || entry_name.starts_with('/') || entry_name.starts_with('\\') {
        bail!("Zip slip attack detected: absolute path in archive - '{entry_name}'");
    }

    fs::create_dir_all(dest_dir).context("Failed to create destination directory")?;
    let canonical_dest = dest_dir
        .canonicalize()
        .context("Failed to canonicalize destination directory")?;

    let mut normalized = canonical_dest.clone();
    for component in entry_path.components() {
        match component {
            Component::Normal(c) => normalized.push(c),
            Component::CurDir => {}
            Component::ParentDir => {
                bail!("Zip slip attack detected: parent directory traversal in '{entry_name}'");
            }
            Component::RootDir | Component::Prefix(_) => {
                bail!("Zip slip attack detected: absolute path component in '{entry_name}'");
            }
        }
    }

    if !normalized.starts_with(&canonical_dest) {
        bail!(
            "Zip slip attack detected: resolved path '{}' escapes destination directory '{}'",
            normalized.display(),
            canonical_dest.display()
        );
    }

    Ok(normalized)
}

fn entry_name<R: Read + ?Sized>(file: &zip::read::ZipFile<'_, R>) -> String {
    file.enclosed_name()
        .map(|p| p.to_string_lossy().to_string())
        .unwrap_or_else(|| file.mangled_name().to_string_lossy().to_string())
}

/// Extract `archive_path` into `dest_dir`, overwriting existing files.
///
/// Every entry is validated before anything is written, so a malicious archive
/// leaves the destination untouched.
pub fn extract_zip(archive_path: &Path, dest_dir: &Path) -> Result<()> {
    let file = File::open(archive_path)
        .with_context(|| format!("Failed to open archive: {}", archive_path.display()))?;
    let mut archive = zip::ZipArchive::new(file)
        .with_context(|| format!("Failed to read zip archive: {}", archive_path.display()))?;

    let mut total_uncompressed_size: u64 = 0;
    for i in 0..archive.len() {
        let file = archive.by_index(i).context("Failed to read zip entry")?;
        validate_zip_entry(&file)?;

        total_uncompressed_size = total_uncompressed_size
            .checked_add(file.size())
            .ok_or_else(|| {
                anyhow::anyhow!("Total uncompressed size overflow - possible zip bomb")
            })?;
        if total_uncompressed_size > MAX_TOTAL_EXTRACTED_SIZE {
            bail!(
                "Total uncompressed size {total_uncompressed_size} exceeds maximum {MAX_TOTAL_EXTRACTED_SIZE} bytes - possible zip bomb"
            );
        }

        let name = entry_name(&file);
        if !name.is_empty() {
            safe_extract_path(dest_dir, &name)?;
        }
    }

    fs::create_dir_all(dest_dir)
        .with_context(|| format!("Failed to create directory: {}", dest_dir.display()))?;

    for i in 0..archive.len() {
        let mut file = archive.by_index(i)?;
        let name = entry_name(&file);
        if name.is_empty() {
            continue;
        }

        let outpath = safe_extract_path(dest_dir, &name)?;
        if file.is_dir() {
            fs::create_dir_all(&outpath)
                .with_context(|| format!("Failed to create directory: {}", outpath.display()))?;
            continue;
        }

        if let Some(parent) = outpath.parent() {
            fs::create_dir_all(parent)?;
        }
        let mut outfile = File::create(&outpath)
            .with_context(|| format!("Failed to create file: {}", outpath.display()))?;
        let mut limited_reader = LimitedReader::new(&mut file, MAX_UNCOMPRESSED_SIZE);
        io::copy(&mut limited_reader, &mut outfile)
            .with_context(|| format!("Failed to extract file: {name}"))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Some(mode) = file.unix_mode().filter(|m| m & 0o777 != 0) {
                fs::set_permissions(&outpath, fs::Permissions::from_mode(mode & 0o777))
                    .with_context(|| format!("Failed to set permissions: {}", outpath.display()))?;
            }
        }
    }

    Ok(())
}
