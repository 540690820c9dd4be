//! Metadata Index
//!
//! An embedded ordered key-value store, one per (device, policy), mapping
//! `/{partition}/{suffix}/{hash}/{part}` keys to encoded index records.
//!
//! ```text
//!   put/delete ──► log ──► memtable ──(size limit)──► table
//!   get        ──► memtable, then tables newest first
//!   scan       ──► tables oldest first, overlaid with the memtable
//! ```
//!
//! Single-key operations are atomic. Sequences of them are not.

mod memtable;
mod sstable;
mod tables;
pub mod wal;

use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::Mutex;

use crate::config::IndexConfig;
use crate::error::Result;

pub use memtable::{MemTable, MemTableEntry};
pub use sstable::{SSTable, SSTableBuilder, SSTableIterator, SSTableReader};
pub use tables::TableSet;
use wal::{Operation, WalRecovery, WalWriter};

/// Ordered key-value metadata index
///
/// One writer at a time: `put`, `delete` and `flush` take `writer`. Readers
/// never wait on it.
pub struct MetaIndex {
    dir: PathBuf,
    options: IndexConfig,
    log: Mutex<WalWriter>,
    memtable: MemTable,
    tables: TableSet,
    writer: Mutex<()>,
}

impl MetaIndex {
    const LOG_FILE: &'static str = "index.log";
    const TABLE_DIR: &'static str = "tables";

    /// Open or create an index in `dir`, replaying any logged rows into a
    /// new table before the log is reset
    pub fn open(dir: &Path, options: &IndexConfig) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let log_path = dir.join(Self::LOG_FILE);
        let tables = TableSet::open(&dir.join(Self::TABLE_DIR))?;
        let memtable = MemTable::new();

        if log_path.exists() {
            let (entries, recovery) = WalRecovery::recover(&log_path)?;
            if recovery.entries_recovered > 0 || recovery.was_truncated {
                tracing::info!(
                    dir = %dir.display(),
                    recovered = recovery.entries_recovered,
                    discarded_bytes = recovery.bytes_discarded,
                    last_lsn = recovery.last_lsn,
                    "replayed index log"
                );
            }

            for entry in entries {
                match entry.operation {
                    Operation::Put { key, value } => {
                        memtable.put(key, value);
                    }
                    Operation::Delete { key } => {
                        memtable.delete(key);
                    }
                }
            }
        }

        let mut log = WalWriter::open(&log_path, options.wal_sync_strategy)?;
        if !memtable.is_empty() {
            tables.flush(&memtable)?;
            memtable.clear();
            log.truncate()?;
        }

        Ok(Self {
            dir: dir.to_path_buf(),
            options: options.clone(),
            log: Mutex::new(log),
            memtable,
            tables,
            writer: Mutex::new(()),
        })
    }

    /// Get a value by key
    pub fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>> {
        let entry = match self.memtable.get(key) {
            Some(entry) => Some(entry),
            None => self.tables.get(key)?,
        };
        Ok(match entry {
            Some(MemTableEntry::Value(value)) => Some(value),
            _ => None,
        })
    }

    /// Put a key-value pair; durable when this returns (with `EveryWrite`)
    pub fn put(&self, key: &[u8], value: &[u8]) -> Result<()> {
        let _writer = self.writer.lock();

        self.log.lock().append(Operation::Put {
            key: key.to_vec(),
            value: value.to_vec(),
        })?;
        let new_size = self.memtable.put(key.to_vec(), value.to_vec());

        self.maybe_flush(new_size)
    }

    /// Delete a key (no-op if absent)
    pub fn delete(&self, key: &[u8]) -> Result<()> {
        let _writer = self.writer.lock();

        self.log.lock().append(Operation::Delete { key: key.to_vec() })?;
        let new_size = self.memtable.delete(key.to_vec());

        self.maybe_flush(new_size)
    }

    /// All live entries whose key starts with `prefix`, in key order
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Vec<(Vec<u8>, Vec<u8>)>> {
        // Memtable first: a concurrent flush moves rows into the tables,
        // never out of both
        let recent = self.memtable.scan_prefix(prefix);
        let mut merged = self.tables.scan_prefix(prefix)?;
        for (key, entry) in recent {
            merged.insert(key, entry);
        }

        Ok(merged
            .into_iter()
            .filter_map(|(key, entry)| match entry {
                MemTableEntry::Value(value) => Some((key, value)),
                MemTableEntry::Tombstone => None,
            })
            .collect())
    }

    /// Force a memtable flush
    pub fn flush(&self) -> Result<()> {
        let _writer = self.writer.lock();
        self.flush_internal()
    }

    fn maybe_flush(&self, memtable_size: usize) -> Result<()> {
        if memtable_size >= self.options.memtable_size_limit {
            self.flush_internal()?;
        }
        Ok(())
    }

    /// Caller holds `writer`
    fn flush_internal(&self) -> Result<()> {
        if self.memtable.is_empty() {
            return Ok(());
        }

        self.tables.flush(&self.memtable)?;
        self.memtable.clear();
        self.log.lock().truncate()?;

        if self.tables.len() > self.options.max_sstables {
            self.tables.compact()?;
        }

        Ok(())
    }

    /// Sync the log; its rows are replayed on the next open
    pub fn close(&self) -> Result<()> {
        let _writer = self.writer.lock();
        self.log.lock().sync()
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn memtable_entry_count(&self) -> usize {
        self.memtable.entry_count()
    }

    pub fn table_count(&self) -> usize {
        self.tables.len()
    }
}
