//! Sequential scan of a table's data block, used by compaction.

use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};

use crate::error::{PackError, Result};
use crate::index::memtable::MemTableEntry;

use super::{ENTRY_HEADER_SIZE, HEADER_SIZE, TOMBSTONE_MARKER};

/// Every row of a table in key order
pub struct SSTableIterator {
    file: BufReader<File>,
    /// Start of the index block
    end: u64,
    position: u64,
    /// Previous full key; the next entry's shared prefix comes from it
    key: Vec<u8>,
}

impl SSTableIterator {
    pub(super) fn new(file: File, end: u64) -> Result<Self> {
        let mut file = BufReader::new(file);
        file.seek(SeekFrom::Start(HEADER_SIZE))?;
        Ok(Self {
            file,
            end,
            position: HEADER_SIZE,
            key: Vec::new(),
        })
    }

    fn read_next(&mut self) -> Result<(Vec<u8>, MemTableEntry)> {
        let mut header = [0u8; ENTRY_HEADER_SIZE as usize];
        self.file.read_exact(&mut header)?;
        let field = |i: usize| u32::from_le_bytes([header[i], header[i + 1], header[i + 2], header[i + 3]]);
        let shared = field(0) as usize;
        let tail_len = field(4) as usize;
        let val_len = field(8);

        if shared > self.key.len() {
            return Err(PackError::Corruption(format!(
                "index entry at {} shares {} bytes of a {}-byte key",
                self.position,
                shared,
                self.key.len()
            )));
        }
        self.key.truncate(shared);
        let start = self.key.len();
        self.key.resize(start + tail_len, 0);
        self.file.read_exact(&mut self.key[start..])?;

        let mut size = ENTRY_HEADER_SIZE + tail_len as u64;
        let entry = if val_len == TOMBSTONE_MARKER {
            MemTableEntry::Tombstone
        } else {
            let mut value = vec![0u8; val_len as usize];
            self.file.read_exact(&mut value)?;
            size += val_len as u64;
            MemTableEntry::Value(value)
        };

        self.position += size;
        if self.position > self.end {
            return Err(PackError::Corruption(
                "index entry crosses into the index block".to_string(),
            ));
        }
        Ok((self.key.clone(), entry))
    }
}

impl Iterator for SSTableIterator {
    type Item = Result<(Vec<u8>, MemTableEntry)>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.position >= self.end {
            return None;
        }
        let item = self.read_next();
        if item.is_err() {
            // Fuse after an error
            self.position = self.end;
        }
        Some(item)
    }
}
