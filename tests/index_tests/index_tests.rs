//! Tests for the metadata index
//!
//! These tests verify:
//! - Point reads, writes and deletes across memtable and SSTables
//! - Prefix scans merging both layers in key order
//! - Recovery from the WAL, including a torn tail
//! - Compaction dropping deleted rows
//! - SSTable building and lookups

use std::fs::OpenOptions;
use std::io::Write;
use std::path::Path;

use packstore::config::{IndexConfig, WalSyncStrategy};
use packstore::index::wal::{Operation, WalRecovery, WalWriter};
use packstore::index::{MemTableEntry, MetaIndex, SSTableBuilder, SSTableReader};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

fn options() -> IndexConfig {
    IndexConfig {
        wal_sync_strategy: WalSyncStrategy::EveryWrite,
        memtable_size_limit: 4 * 1024 * 1024,
        max_sstables: 4,
    }
}

fn row(partition: u32, suffix: &str, n: u32, part: &str) -> Vec<u8> {
    format!("/{}/{}/{:029x}{}/{}", partition, suffix, n, suffix, part).into_bytes()
}

fn open(dir: &Path) -> MetaIndex {
    MetaIndex::open(dir, &options()).unwrap()
}

// =============================================================================
// Point Operations
// =============================================================================

#[test]
fn test_put_get_delete() {
    let temp = TempDir::new().unwrap();
    let index = open(temp.path());

    let key = row(1, "abc", 1, "d");
    assert_eq!(index.get(&key).unwrap(), None);

    index.put(&key, b"record").unwrap();
    assert_eq!(index.get(&key).unwrap(), Some(b"record".to_vec()));

    index.put(&key, b"newer").unwrap();
    assert_eq!(index.get(&key).unwrap(), Some(b"newer".to_vec()));

    index.delete(&key).unwrap();
    assert_eq!(index.get(&key).unwrap(), None);
}

#[test]
fn test_delete_absent_key_is_noop() {
    let temp = TempDir::new().unwrap();
    let index = open(temp.path());

    index.delete(b"/1/abc/missing/d").unwrap();
    assert_eq!(index.get(b"/1/abc/missing/d").unwrap(), None);
}

#[test]
fn test_reads_after_flush() {
    let temp = TempDir::new().unwrap();
    let index = open(temp.path());

    index.put(&row(1, "abc", 1, "d"), b"one").unwrap();
    index.put(&row(1, "abc", 2, "d"), b"two").unwrap();
    index.flush().unwrap();

    assert_eq!(index.memtable_entry_count(), 0);
    assert_eq!(index.table_count(), 1);
    assert_eq!(index.get(&row(1, "abc", 1, "d")).unwrap(), Some(b"one".to_vec()));

    // A delete in the memtable shadows the flushed value
    index.delete(&row(1, "abc", 1, "d")).unwrap();
    assert_eq!(index.get(&row(1, "abc", 1, "d")).unwrap(), None);
    assert_eq!(index.get(&row(1, "abc", 2, "d")).unwrap(), Some(b"two".to_vec()));
}

// =============================================================================
// Prefix Scans
// =============================================================================

#[test]
fn test_scan_prefix_merges_layers_in_order() {
    let temp = TempDir::new().unwrap();
    let index = open(temp.path());

    index.put(&row(1, "abc", 2, "d"), b"old").unwrap();
    index.put(&row(1, "abc", 3, "d"), b"gone").unwrap();
    index.put(&row(1, "fff", 1, "d"), b"other suffix").unwrap();
    index.put(&row(10, "abc", 1, "d"), b"other partition").unwrap();
    index.flush().unwrap();

    index.put(&row(1, "abc", 1, "d"), b"fresh").unwrap();
    index.put(&row(1, "abc", 2, "d"), b"new").unwrap();
    index.delete(&row(1, "abc", 3, "d")).unwrap();

    let scanned = index.scan_prefix(b"/1/abc/").unwrap();
    let expected = vec![
        (row(1, "abc", 1, "d"), b"fresh".to_vec()),
        (row(1, "abc", 2, "d"), b"new".to_vec()),
    ];
    assert_eq!(scanned, expected);

    // "/1/" must not match partition 10
    let partition = index.scan_prefix(b"/1/").unwrap();
    assert_eq!(partition.len(), 3);
}

// =============================================================================
// Recovery
// =============================================================================

#[test]
fn test_reopen_replays_wal() {
    let temp = TempDir::new().unwrap();
    {
        let index = open(temp.path());
        index.put(&row(1, "abc", 1, "d"), b"one").unwrap();
        index.put(&row(1, "abc", 2, "d"), b"two").unwrap();
        index.delete(&row(1, "abc", 1, "d")).unwrap();
        index.close().unwrap();
    }

    let index = open(temp.path());
    assert_eq!(index.get(&row(1, "abc", 1, "d")).unwrap(), None);
    assert_eq!(index.get(&row(1, "abc", 2, "d")).unwrap(), Some(b"two".to_vec()));
    // Recovered rows are flushed on open
    assert_eq!(index.memtable_entry_count(), 0);
}

#[test]
fn test_torn_log_tail_is_discarded() {
    let temp = TempDir::new().unwrap();
    {
        let index = open(temp.path());
        index.put(&row(1, "abc", 1, "d"), b"one").unwrap();
        index.put(&row(1, "abc", 2, "d"), b"two").unwrap();
        index.close().unwrap();
    }

    let log_path = temp.path().join("index.log");
    let mut file = OpenOptions::new().append(true).open(&log_path).unwrap();
    file.write_all(&[0x07, 0x00, 0x00]).unwrap();
    drop(file);

    let index = open(temp.path());
    assert_eq!(index.get(&row(1, "abc", 1, "d")).unwrap(), Some(b"one".to_vec()));
    assert_eq!(index.get(&row(1, "abc", 2, "d")).unwrap(), Some(b"two".to_vec()));
}

#[test]
fn test_wal_recovery_stops_at_corrupt_entry() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("test.wal");
    {
        let mut writer = WalWriter::open(&path, WalSyncStrategy::EveryWrite).unwrap();
        for i in 0..3u32 {
            writer
                .append(Operation::Put {
                    key: row(1, "abc", i, "d"),
                    value: vec![i as u8; 16],
                })
                .unwrap();
        }
    }

    // Flip a payload byte of the last entry
    let len = std::fs::metadata(&path).unwrap().len();
    let mut bytes = std::fs::read(&path).unwrap();
    bytes[len as usize - 1] ^= 0xFF;
    std::fs::write(&path, &bytes).unwrap();

    let (entries, result) = WalRecovery::recover(&path).unwrap();
    assert_eq!(entries.len(), 2);
    assert_eq!(result.entries_recovered, 2);
    assert!(result.was_truncated);
    assert!(std::fs::metadata(&path).unwrap().len() < len);
}

// =============================================================================
// Compaction
// =============================================================================

#[test]
fn test_compaction_keeps_live_rows_only() {
    let temp = TempDir::new().unwrap();
    let index = open(temp.path());

    for i in 0..6u32 {
        index.put(&row(1, "abc", i, "d"), format!("v{}", i).as_bytes()).unwrap();
        if i == 2 {
            index.delete(&row(1, "abc", 0, "d")).unwrap();
        }
        index.flush().unwrap();
    }

    // More tables than max_sstables triggers a merge
    assert!(index.table_count() <= options().max_sstables);
    assert_eq!(index.get(&row(1, "abc", 0, "d")).unwrap(), None);
    for i in 1..6u32 {
        assert_eq!(
            index.get(&row(1, "abc", i, "d")).unwrap(),
            Some(format!("v{}", i).into_bytes())
        );
    }
    assert_eq!(index.scan_prefix(b"/1/abc/").unwrap().len(), 5);
}

// =============================================================================
// SSTables
// =============================================================================

#[test]
fn test_sstable_lookup_and_tombstones() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("00000001.pki");

    let mut builder = SSTableBuilder::new(&path).unwrap();
    builder.add(&row(1, "abc", 1, "d"), b"one").unwrap();
    builder.add_tombstone(&row(1, "abc", 2, "d")).unwrap();
    builder.add(&row(1, "abd", 1, "d"), b"other").unwrap();
    let table = builder.finish().unwrap();
    assert_eq!(table.entry_count, 3);

    let reader = SSTableReader::open(&path).unwrap();
    assert_eq!(
        reader.get(&row(1, "abc", 1, "d")).unwrap(),
        Some(MemTableEntry::Value(b"one".to_vec()))
    );
    assert_eq!(
        reader.get(&row(1, "abc", 2, "d")).unwrap(),
        Some(MemTableEntry::Tombstone)
    );
    assert_eq!(reader.get(&row(1, "abc", 3, "d")).unwrap(), None);

    let scanned = reader.scan_prefix(b"/1/abc/").unwrap();
    assert_eq!(scanned.len(), 2);
}

#[test]
fn test_sstable_rejects_unsorted_keys() {
    let temp = TempDir::new().unwrap();
    let mut builder = SSTableBuilder::new(&temp.path().join("bad.pki")).unwrap();

    builder.add(b"/1/abd/", b"b").unwrap();
    assert!(builder.add(b"/1/abc/", b"a").is_err());
}
