//! Sequential reader over the index log

use std::fs::File;
use std::io::{BufReader, Read};
use std::path::Path;

use crate::error::{PackError, Result};

use super::entry::{WalEntry, HEADER_SIZE};

/// Refuse payloads larger than this; a bigger length field means a torn header
const MAX_PAYLOAD: usize = 64 * 1024 * 1024;

/// Yields records in log order
pub struct WalReader {
    reader: BufReader<File>,
    /// Offset just past the last entry returned
    position: u64,
    file_len: u64,
}

impl WalReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let file_len = file.metadata()?.len();
        Ok(Self {
            reader: BufReader::new(file),
            position: 0,
            file_len,
        })
    }

    /// Next record, or `None` at a clean end of log
    ///
    /// Returns `Ok(None)` at a clean end of file and `WalCorruption` for a
    /// torn or damaged record.
    pub fn next_entry(&mut self) -> Result<Option<WalEntry>> {
        if self.position >= self.file_len {
            return Ok(None);
        }
        if self.file_len - self.position < HEADER_SIZE as u64 {
            return Err(PackError::WalCorruption(format!(
                "Partial header at offset {}",
                self.position
            )));
        }

        let mut header = [0u8; HEADER_SIZE];
        self.reader.read_exact(&mut header)?;
        let lsn = u64::from_le_bytes(header[0..8].try_into().unwrap_or_default());
        let crc = u32::from_le_bytes(header[8..12].try_into().unwrap_or_default());
        let len = u32::from_le_bytes(header[12..16].try_into().unwrap_or_default()) as usize;

        let remaining = self.file_len - self.position - HEADER_SIZE as u64;
        if len > MAX_PAYLOAD || len as u64 > remaining {
            return Err(PackError::WalCorruption(format!(
                "Partial payload at offset {} (len {})",
                self.position, len
            )));
        }

        let mut payload = vec![0u8; len];
        self.reader.read_exact(&mut payload)?;
        let entry = WalEntry::deserialize(lsn, crc, &payload)?;

        self.position += (HEADER_SIZE + len) as u64;
        Ok(Some(entry))
    }

    /// Offset just past the last valid entry read
    pub fn position(&self) -> u64 {
        self.position
    }
}
