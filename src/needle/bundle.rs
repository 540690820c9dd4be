//! Bundle
//!
//! Per-partition append-only container of needles.
//!
//! ## Concurrency
//! - Appends (and their rollback truncation) are serialized by `append_lock`
//! - Reads use positional I/O and take no lock: a needle is immutable once
//!   its index entry has been persisted

use std::fs::{File, OpenOptions};
use std::io::{self, Read};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{PackError, Result};

use super::header::{is_aligned, ALIGNMENT};

/// Magic bytes at the start of the superblock
const SUPERBLOCK_MAGIC: &[u8; 4] = b"PKBL";

/// Current superblock version
pub const SUPERBLOCK_VERSION: u32 = 1;

/// Append-only needle container
pub struct Bundle {
    path: PathBuf,
    file: File,
    append_lock: Mutex<()>,
}

impl Bundle {
    /// Open a bundle, creating it with a fresh superblock if absent
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let file = OpenOptions::new()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        let len = file.metadata()?.len();
        if len == 0 {
            // Superblock occupies the whole first alignment block
            let mut superblock = vec![0u8; ALIGNMENT as usize];
            superblock[0..4].copy_from_slice(SUPERBLOCK_MAGIC);
            superblock[4..8].copy_from_slice(&SUPERBLOCK_VERSION.to_le_bytes());
            file.write_all_at(&superblock, 0)?;
            file.sync_all()?;
            tracing::debug!(path = %path.display(), "created bundle");
        } else {
            let mut head = [0u8; 8];
            file.read_exact_at(&mut head, 0)?;
            if &head[0..4] != SUPERBLOCK_MAGIC {
                return Err(PackError::Corruption(format!(
                    "Invalid bundle magic in {}: {:?}",
                    path.display(),
                    &head[0..4]
                )));
            }
            let version = u32::from_le_bytes([head[4], head[5], head[6], head[7]]);
            if version != SUPERBLOCK_VERSION {
                return Err(PackError::Corruption(format!(
                    "Unsupported bundle version {} in {}",
                    version,
                    path.display()
                )));
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            append_lock: Mutex::new(()),
        })
    }

    /// Append one fully-encoded needle and run `persist` with its offset
    ///
    /// `persist` runs under the append lock. If the write or `persist` fails,
    /// the file is truncated back to the pre-append length so no partial
    /// needle is ever reachable by a later append.
    pub fn append<F>(&self, needle: &[u8], persist: F) -> Result<u64>
    where
        F: FnOnce(u64) -> Result<()>,
    {
        if !is_aligned(needle.len() as u64) {
            return Err(PackError::FatalInvariant(format!(
                "Needle of {} bytes is not {}-aligned",
                needle.len(),
                ALIGNMENT
            )));
        }

        let _guard = self.append_lock.lock();
        let offset = self.file.metadata()?.len();
        if !is_aligned(offset) {
            tracing::error!(path = %self.path.display(), offset, "bundle end is not aligned");
            return Err(PackError::FatalInvariant(format!(
                "Bundle {} ends at unaligned offset {}",
                self.path.display(),
                offset
            )));
        }

        let result = preallocate(&self.file, offset, needle.len() as u64)
            .and_then(|_| self.file.write_all_at(needle, offset).map_err(PackError::from))
            .and_then(|_| self.file.sync_data().map_err(PackError::from))
            .and_then(|_| persist(offset));

        if let Err(e) = result {
            tracing::warn!(
                path = %self.path.display(),
                offset,
                error = %e,
                "needle append failed, rolling back"
            );
            if let Err(te) = self.file.set_len(offset) {
                tracing::error!(path = %self.path.display(), error = %te, "rollback truncate failed");
            }
            return Err(e);
        }

        Ok(offset)
    }

    /// Read `len` bytes at `offset`
    pub fn read_at(&self, offset: u64, len: usize) -> Result<Vec<u8>> {
        let mut buf = vec![0u8; len];
        self.file.read_exact_at(&mut buf, offset)?;
        Ok(buf)
    }

    /// Reader over a byte range of the bundle
    pub fn section_reader(self: &Arc<Self>, offset: u64, len: u64) -> SectionReader {
        SectionReader {
            bundle: Arc::clone(self),
            position: offset,
            end: offset + len,
        }
    }

    /// Deallocate a byte range while keeping the file size
    ///
    /// Returns `Ok(false)` when the filesystem cannot punch holes.
    pub fn punch_hole(&self, offset: u64, len: u64) -> Result<bool> {
        if len == 0 {
            return Ok(true);
        }
        punch_hole(&self.file, offset, len)
    }

    /// Current file length
    pub fn len(&self) -> Result<u64> {
        Ok(self.file.metadata()?.len())
    }

    /// A bundle holding only its superblock
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? <= ALIGNMENT)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Byte-range reader over a bundle
pub struct SectionReader {
    bundle: Arc<Bundle>,
    position: u64,
    end: u64,
}

impl SectionReader {
    /// Bytes left to read
    pub fn remaining(&self) -> u64 {
        self.end - self.position
    }
}

impl Read for SectionReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let remaining = self.remaining();
        if remaining == 0 {
            return Ok(0);
        }
        let want = buf.len().min(remaining as usize);
        let n = self.bundle.file.read_at(&mut buf[..want], self.position)?;
        if n == 0 {
            return Err(io::Error::new(
                io::ErrorKind::UnexpectedEof,
                "bundle shorter than indexed needle",
            ));
        }
        self.position += n as u64;
        Ok(n)
    }
}

// =============================================================================
// Platform helpers
// =============================================================================

#[cfg(target_os = "linux")]
fn preallocate(file: &File, offset: u64, len: u64) -> Result<()> {
    use std::os::unix::io::AsRawFd;

    let res = unsafe {
        libc::fallocate(file.as_raw_fd(), 0, offset as libc::off_t, len as libc::off_t)
    };
    if res == 0 {
        return Ok(());
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(libc::ENOSPC) => Err(PackError::ResourceExhausted(format!(
            "no space to preallocate {} bytes",
            len
        ))),
        // Filesystem without fallocate: the write itself extends the file
        Some(code) if code == libc::EOPNOTSUPP || code == libc::ENOSYS => Ok(()),
        _ => Err(PackError::Io(err)),
    }
}

#[cfg(not(target_os = "linux"))]
fn preallocate(_file: &File, _offset: u64, _len: u64) -> Result<()> {
    Ok(())
}

#[cfg(target_os = "linux")]
fn punch_hole(file: &File, offset: u64, len: u64) -> Result<bool> {
    use std::os::unix::io::AsRawFd;

    let mode = libc::FALLOC_FL_PUNCH_HOLE | libc::FALLOC_FL_KEEP_SIZE;
    let res = unsafe {
        libc::fallocate(file.as_raw_fd(), mode, offset as libc::off_t, len as libc::off_t)
    };
    if res == 0 {
        return Ok(true);
    }
    let err = io::Error::last_os_error();
    match err.raw_os_error() {
        Some(code) if code == libc::EOPNOTSUPP || code == libc::ENOSYS => Ok(false),
        _ => Err(PackError::Io(err)),
    }
}

#[cfg(not(target_os = "linux"))]
fn punch_hole(_file: &File, _offset: u64, _len: u64) -> Result<bool> {
    Ok(false)
}
