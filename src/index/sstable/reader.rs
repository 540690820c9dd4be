//! Index Table Reader
//!
//! Loads a table's key index into memory and verifies its data CRC on open.
//! Values are read with positional I/O, so lookups and scans take `&self`.

use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::os::unix::fs::FileExt;
use std::path::{Path, PathBuf};

use crate::error::{PackError, Result};
use crate::index::memtable::MemTableEntry;

use super::iterator::SSTableIterator;
use super::{ENTRY_HEADER_SIZE, FOOTER_SIZE, HEADER_SIZE, MAGIC, TOMBSTONE_MARKER, VERSION};

/// An open, verified table
pub struct SSTableReader {
    path: PathBuf,
    file: File,
    /// In-memory index: key → file offset
    index: BTreeMap<Vec<u8>, u64>,
    entry_count: u64,
    /// Index block starting offset (end of the data block)
    index_offset: u64,
}

impl SSTableReader {
    /// Open an SSTable for reading
    ///
    /// Validates header and data CRC, then loads the index into memory.
    pub fn open(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        let file_size = file.metadata()?.len();
        if file_size < HEADER_SIZE + FOOTER_SIZE {
            return Err(PackError::Corruption(format!(
                "SSTable {} too short ({} bytes)",
                path.display(),
                file_size
            )));
        }

        // Read and validate header
        let mut header = [0u8; HEADER_SIZE as usize];
        file.read_exact(&mut header)?;

        if &header[0..4] != MAGIC {
            return Err(PackError::Corruption(format!(
                "Invalid SSTable magic in {}: {:?}",
                path.display(),
                &header[0..4]
            )));
        }

        let version = u16::from_le_bytes([header[4], header[5]]);
        if version != VERSION {
            return Err(PackError::Corruption(format!(
                "Unsupported SSTable version: {}",
                version
            )));
        }

        let entry_count = read_u64(&header[6..14]);

        // Read footer to get index offset
        file.seek(SeekFrom::End(-(FOOTER_SIZE as i64)))?;
        let mut footer = [0u8; FOOTER_SIZE as usize];
        file.read_exact(&mut footer)?;

        let index_offset = read_u64(&footer[0..8]);
        let data_crc = u32::from_le_bytes([footer[8], footer[9], footer[10], footer[11]]);
        if index_offset < HEADER_SIZE || index_offset > file_size - FOOTER_SIZE {
            return Err(PackError::Corruption(format!(
                "SSTable {} has invalid index offset {}",
                path.display(),
                index_offset
            )));
        }

        // Validate the data block
        let mut hasher = crc32fast::Hasher::new();
        let mut data = BufReader::new(&file);
        data.seek(SeekFrom::Start(HEADER_SIZE))?;
        let mut remaining = index_offset - HEADER_SIZE;
        let mut chunk = vec![0u8; 64 * 1024];
        while remaining > 0 {
            let want = chunk.len().min(remaining as usize);
            data.read_exact(&mut chunk[..want])?;
            hasher.update(&chunk[..want]);
            remaining -= want as u64;
        }
        if hasher.finalize() != data_crc {
            return Err(PackError::Corruption(format!(
                "SSTable {} data CRC mismatch",
                path.display()
            )));
        }

        // Load index into memory: [key_len(4)][offset(8)][key]
        let index_block_size = file_size - FOOTER_SIZE - index_offset;
        let mut index_data = vec![0u8; index_block_size as usize];
        file.read_exact_at(&mut index_data, index_offset)?;

        let mut index = BTreeMap::new();
        let mut pos = 0;
        while pos + 12 <= index_data.len() {
            let key_len = u32::from_le_bytes([
                index_data[pos],
                index_data[pos + 1],
                index_data[pos + 2],
                index_data[pos + 3],
            ]) as usize;
            let offset = read_u64(&index_data[pos + 4..pos + 12]);
            pos += 12;

            if pos + key_len > index_data.len() {
                return Err(PackError::Corruption(format!(
                    "SSTable {} index block truncated",
                    path.display()
                )));
            }
            index.insert(index_data[pos..pos + key_len].to_vec(), offset);
            pos += key_len;
        }

        Ok(Self {
            path: path.to_path_buf(),
            file,
            index,
            entry_count,
            index_offset,
        })
    }

    /// Look up `key` through the in-memory index
    ///
    /// Returns `Ok(None)` when the key is not in this table.
    pub fn get(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        match self.index.get(key) {
            Some(&offset) => self.read_entry(offset).map(Some),
            None => Ok(None),
        }
    }

    /// Entries whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, MemTableEntry)>> {
        self.index
            .range(prefix.to_vec()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, &offset)| Ok((k.clone(), self.read_entry(offset)?)))
            .collect()
    }

    /// Value of the entry at `offset`; the key comes from the index
    fn read_entry(&self, offset: u64) -> Result<MemTableEntry> {
        let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
        self.file.read_exact_at(&mut header, offset)?;

        let tail_len = u32::from_le_bytes([header[4], header[5], header[6], header[7]]) as u64;
        let val_len = u32::from_le_bytes([header[8], header[9], header[10], header[11]]);
        if val_len == TOMBSTONE_MARKER {
            return Ok(MemTableEntry::Tombstone);
        }

        let value_offset = offset + ENTRY_HEADER_SIZE + tail_len;
        if value_offset + val_len as u64 > self.index_offset {
            return Err(PackError::Corruption(format!(
                "{}: entry at {} runs past the data block",
                self.path.display(),
                offset
            )));
        }
        let mut value = vec![0u8; val_len as usize];
        self.file.read_exact_at(&mut value, value_offset)?;
        Ok(MemTableEntry::Value(value))
    }

    pub fn entry_count(&self) -> u64 {
        self.entry_count
    }

    /// Quick check if a key might be in this SSTable (range check)
    pub fn might_contain(&self, key: &[u8]) -> bool {
        match (self.index.keys().next(), self.index.keys().next_back()) {
            (Some(min), Some(max)) => key >= min.as_slice() && key <= max.as_slice(),
            _ => false,
        }
    }

    /// Sequential iterator over all entries (for compaction)
    pub fn iter(&self) -> Result<SSTableIterator> {
        SSTableIterator::new(self.file.try_clone()?, self.index_offset)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn read_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    buf.copy_from_slice(&bytes[..8]);
    u64::from_le_bytes(buf)
}
