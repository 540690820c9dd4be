//! Index log replay after a crash

use std::fs::OpenOptions;
use std::path::Path;

use crate::error::{PackError, Result};

use super::entry::WalEntry;
use super::reader::WalReader;

/// Replays an index log, cutting off a torn or corrupt tail
pub struct WalRecovery;

/// What a replay found
#[derive(Debug, Default)]
pub struct RecoveryResult {
    pub entries_recovered: u64,
    /// Bytes discarded after the last valid entry
    pub bytes_discarded: u64,
    pub last_lsn: u64,
    /// A damaged tail was cut off
    pub was_truncated: bool,
}

impl WalRecovery {
    /// Every record up to the first torn or corrupt one, in order. The log is
    /// truncated to end after the last good record.
    pub fn recover(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult)> {
        let (entries, mut result, valid_len) = Self::scan(path)?;

        if result.bytes_discarded > 0 {
            let file = OpenOptions::new().write(true).open(path)?;
            file.set_len(valid_len)?;
            file.sync_all()?;
            result.was_truncated = true;
        }

        Ok((entries, result))
    }

    /// Scan a log without truncating it
    pub fn verify(path: &Path) -> Result<RecoveryResult> {
        let (_, result, _) = Self::scan(path)?;
        Ok(result)
    }

    fn scan(path: &Path) -> Result<(Vec<WalEntry>, RecoveryResult, u64)> {
        let file_len = std::fs::metadata(path)?.len();
        let mut reader = WalReader::open(path)?;
        let mut entries = Vec::new();
        let mut result = RecoveryResult::default();

        loop {
            match reader.next_entry() {
                Ok(Some(entry)) => {
                    result.entries_recovered += 1;
                    result.last_lsn = entry.lsn;
                    entries.push(entry);
                }
                Ok(None) => break,
                Err(PackError::WalCorruption(reason)) => {
                    tracing::warn!(path = %path.display(), %reason, "discarding WAL tail");
                    break;
                }
                Err(e) => return Err(e),
            }
        }

        let valid_len = reader.position();
        result.bytes_discarded = file_len - valid_len;
        Ok((entries, result, valid_len))
    }
}
