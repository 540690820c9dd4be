//! Index Tables
//!
//! Immutable sorted runs of index rows, produced by memtable flushes and
//! compactions.
//!
//! Rows of one object, suffix or partition share long key prefixes
//! (`/{partition}/{suffix}/{hash}/`), so each entry stores only the bytes
//! that differ from the previous key. The index block keeps full keys.
//!
//! ## File Format
//! ```text
//! Header   "PKIX" | version u16 | entry count u64                  14 bytes
//! Data     [shared u32][unshared u32][val_len u32][key tail][value] ...
//!          val_len = u32::MAX marks a deleted row (no value bytes)
//! Index    [key_len u32][offset u64][key] ...
//! Footer   index offset u64 | data CRC32 u32 | padding u32          16 bytes
//! ```
//! All integers are little-endian.

mod builder;
mod iterator;
mod reader;

use std::path::PathBuf;

pub use builder::SSTableBuilder;
pub use iterator::SSTableIterator;
pub use reader::SSTableReader;

/// Magic bytes of an index table
pub(crate) const MAGIC: &[u8; 4] = b"PKIX";

pub(crate) const VERSION: u16 = 1;

pub(crate) const HEADER_SIZE: u64 = 14;

pub(crate) const FOOTER_SIZE: u64 = 16;

/// `val_len` of a deleted row
pub(crate) const TOMBSTONE_MARKER: u32 = u32::MAX;

/// Shared (4) + unshared (4) + value length (4)
pub(crate) const ENTRY_HEADER_SIZE: u64 = 12;

/// Length of the common prefix of two keys
pub(crate) fn shared_prefix_len(a: &[u8], b: &[u8]) -> usize {
    a.iter().zip(b).take_while(|(x, y)| x == y).count()
}

/// A finished table
#[derive(Debug, Clone)]
pub struct SSTable {
    pub path: PathBuf,
    pub entry_count: u64,
    pub file_size: u64,
    /// Bytes saved by prefix-compressing keys
    pub shared_key_bytes: u64,
}
