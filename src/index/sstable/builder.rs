//! Index Table Builder
//!
//! Streams sorted rows into a new table file.

use std::fs::{File, OpenOptions};
use std::io::{BufWriter, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

use crate::error::{PackError, Result};

use super::{shared_prefix_len, SSTable, ENTRY_HEADER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// Offset of the entry count within the header
const COUNT_OFFSET: u64 = 6;

/// Writes one table; rows must arrive in strictly increasing key order
pub struct SSTableBuilder {
    path: PathBuf,
    writer: BufWriter<File>,
    /// Offset of the next entry
    offset: u64,
    /// Full key and offset of every entry, written as the index block
    index: Vec<(Vec<u8>, u64)>,
    shared_key_bytes: u64,
    crc: crc32fast::Hasher,
    /// Reused encoding buffer
    scratch: Vec<u8>,
}

impl SSTableBuilder {
    /// Create `path` and write a header whose count is patched by `finish`
    pub fn new(path: &Path) -> Result<Self> {
        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(true)
            .open(path)?;
        let mut writer = BufWriter::new(file);

        writer.write_all(MAGIC)?;
        writer.write_all(&VERSION.to_le_bytes())?;
        writer.write_all(&0u64.to_le_bytes())?;

        Ok(Self {
            path: path.to_path_buf(),
            writer,
            offset: HEADER_SIZE,
            index: Vec::new(),
            shared_key_bytes: 0,
            crc: crc32fast::Hasher::new(),
            scratch: Vec::new(),
        })
    }

    pub fn add(&mut self, key: &[u8], value: &[u8]) -> Result<()> {
        self.push(key, Some(value))
    }

    /// Record that `key` was deleted
    pub fn add_tombstone(&mut self, key: &[u8]) -> Result<()> {
        self.push(key, None)
    }

    fn push(&mut self, key: &[u8], value: Option<&[u8]>) -> Result<()> {
        let shared = match self.index.last() {
            Some((last, _)) if key <= last.as_slice() => {
                return Err(PackError::Corruption(format!(
                    "index rows out of order: {} after {}",
                    String::from_utf8_lossy(key),
                    String::from_utf8_lossy(last)
                )));
            }
            Some((last, _)) => shared_prefix_len(last, key),
            None => 0,
        };
        let tail = &key[shared..];
        let val_len = match value {
            Some(v) => u32::try_from(v.len())
                .ok()
                .filter(|&len| len != TOMBSTONE_MARKER)
                .ok_or_else(|| PackError::ResourceExhausted("index row too large".to_string()))?,
            None => TOMBSTONE_MARKER,
        };

        self.scratch.clear();
        self.scratch.extend_from_slice(&(shared as u32).to_le_bytes());
        self.scratch.extend_from_slice(&(tail.len() as u32).to_le_bytes());
        self.scratch.extend_from_slice(&val_len.to_le_bytes());
        self.scratch.extend_from_slice(tail);
        if let Some(v) = value {
            self.scratch.extend_from_slice(v);
        }

        self.writer.write_all(&self.scratch)?;
        self.crc.update(&self.scratch);
        self.index.push((key.to_vec(), self.offset));
        self.offset += self.scratch.len() as u64;
        self.shared_key_bytes += shared as u64;
        debug_assert_eq!(
            self.scratch.len() as u64,
            ENTRY_HEADER_SIZE + tail.len() as u64 + value.map_or(0, |v| v.len() as u64)
        );
        Ok(())
    }

    /// Write the index block and footer, then sync
    pub fn finish(mut self) -> Result<SSTable> {
        let index_offset = self.offset;
        for (key, offset) in &self.index {
            self.writer.write_all(&(key.len() as u32).to_le_bytes())?;
            self.writer.write_all(&offset.to_le_bytes())?;
            self.writer.write_all(key)?;
        }

        self.writer.write_all(&index_offset.to_le_bytes())?;
        self.writer.write_all(&self.crc.clone().finalize().to_le_bytes())?;
        self.writer.write_all(&[0u8; 4])?;
        self.writer.flush()?;

        let entry_count = self.index.len() as u64;
        let mut file = self
            .writer
            .into_inner()
            .map_err(|e| PackError::Io(e.into_error()))?;
        file.seek(SeekFrom::Start(COUNT_OFFSET))?;
        file.write_all(&entry_count.to_le_bytes())?;
        file.sync_all()?;

        Ok(SSTable {
            path: self.path,
            entry_count,
            file_size: file.metadata()?.len(),
            shared_key_bytes: self.shared_key_bytes,
        })
    }
}
