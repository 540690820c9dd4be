//! The on-disk tables of one metadata index.
//!
//! Tables are numbered files (`00000042.pki`) in a single directory. A
//! higher number always holds newer rows, so lookups walk the list from the
//! highest number down and merges apply it from the lowest number up.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;

use crate::error::Result;

use super::memtable::{MemTable, MemTableEntry};
use super::sstable::{SSTable, SSTableBuilder, SSTableReader};

const TABLE_EXT: &str = "pki";
const PARTIAL_EXT: &str = "partial";

type Rows = BTreeMap<Vec<u8>, MemTableEntry>;

struct Tables {
    /// Highest sequence number first
    readers: Vec<SSTableReader>,
    next_seq: u64,
}

/// Ordered set of immutable index tables
pub struct TableSet {
    dir: PathBuf,
    tables: RwLock<Tables>,
}

fn table_seq(path: &Path) -> Option<u64> {
    if path.extension()? != TABLE_EXT {
        return None;
    }
    path.file_stem()?.to_str()?.parse().ok()
}

impl TableSet {
    /// Load every table in `dir`, discarding partial writes from a crash
    pub fn open(dir: &Path) -> Result<Self> {
        fs::create_dir_all(dir)?;

        let mut found = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            if path.extension().map_or(false, |ext| ext == PARTIAL_EXT) {
                tracing::warn!(path = %path.display(), "discarding partial index table");
                fs::remove_file(&path)?;
            } else if let Some(seq) = table_seq(&path) {
                found.push((seq, path));
            }
        }
        found.sort_unstable_by(|a, b| b.0.cmp(&a.0));

        let next_seq = found.first().map_or(1, |(seq, _)| seq + 1);
        let readers = found
            .iter()
            .map(|(_, path)| SSTableReader::open(path))
            .collect::<Result<Vec<_>>>()?;

        Ok(Self {
            dir: dir.to_path_buf(),
            tables: RwLock::new(Tables { readers, next_seq }),
        })
    }

    /// Newest row for `key`, tombstones included
    pub fn get(&self, key: &[u8]) -> Result<Option<MemTableEntry>> {
        let tables = self.tables.read();
        for reader in tables.readers.iter().filter(|r| r.might_contain(key)) {
            if let Some(entry) = reader.get(key)? {
                return Ok(Some(entry));
            }
        }
        Ok(None)
    }

    /// Newest row of every key under `prefix`, tombstones included
    pub fn scan_prefix(&self, prefix: &[u8]) -> Result<Rows> {
        let tables = self.tables.read();
        let mut rows = Rows::new();
        for reader in tables.readers.iter().rev() {
            rows.extend(reader.scan_prefix(prefix)?);
        }
        Ok(rows)
    }

    /// Persist the memtable's rows as the newest table
    pub fn flush(&self, memtable: &MemTable) -> Result<Option<SSTable>> {
        let rows = memtable.snapshot();
        if rows.is_empty() {
            return Ok(None);
        }

        let seq = {
            let mut tables = self.tables.write();
            tables.next_seq += 1;
            tables.next_seq - 1
        };
        // Readers keep using the older tables while this one is written
        let table = self.write(seq, rows.into_iter().map(Ok))?;
        let reader = SSTableReader::open(&table.path)?;
        self.tables.write().readers.insert(0, reader);

        tracing::debug!(
            path = %table.path.display(),
            entries = table.entry_count,
            bytes = table.file_size,
            prefix_saved = table.shared_key_bytes,
            "flushed index rows"
        );
        Ok(Some(table))
    }

    /// Rewrite all tables as one, dropping deleted rows.
    ///
    /// The merged table is numbered above its inputs, which are unlinked only
    /// once it is durable, so a crash at any point leaves a readable set.
    pub fn compact(&self) -> Result<()> {
        let mut tables = self.tables.write();
        if tables.readers.len() < 2 {
            return Ok(());
        }

        let mut rows = Rows::new();
        for reader in tables.readers.iter().rev() {
            for row in reader.iter()? {
                let (key, entry) = row?;
                rows.insert(key, entry);
            }
        }
        let live = rows
            .into_iter()
            .filter(|(_, entry)| !matches!(entry, MemTableEntry::Tombstone))
            .map(Ok);

        let table = self.write(tables.next_seq, live)?;
        tables.next_seq += 1;
        let merged = SSTableReader::open(&table.path)?;
        for old in std::mem::replace(&mut tables.readers, vec![merged]) {
            fs::remove_file(old.path())?;
        }

        tracing::info!(dir = %self.dir.display(), entries = table.entry_count, "compacted index tables");
        Ok(())
    }

    fn write<I>(&self, seq: u64, rows: I) -> Result<SSTable>
    where
        I: Iterator<Item = Result<(Vec<u8>, MemTableEntry)>>,
    {
        let path = self.dir.join(format!("{:08}.{}", seq, TABLE_EXT));
        let partial = path.with_extension(PARTIAL_EXT);

        let mut builder = SSTableBuilder::new(&partial)?;
        for row in rows {
            match row? {
                (key, MemTableEntry::Value(value)) => builder.add(&key, &value)?,
                (key, MemTableEntry::Tombstone) => builder.add_tombstone(&key)?,
            }
        }
        let mut table = builder.finish()?;

        fs::rename(&partial, &path)?;
        fs::File::open(&self.dir)?.sync_all()?;
        table.path = path;
        Ok(table)
    }

    pub fn len(&self) -> usize {
        self.tables.read().readers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
