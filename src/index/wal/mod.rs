//! Index Log
//!
//! Every index row change is appended here before the memtable sees it.
//! On open the log is replayed into a fresh memtable, flushed to a table,
//! and truncated; a torn or corrupt tail ends the replay.
//!
//! ## Entry Layout
//! ```text
//! ┌─────────┬─────────┬─────────┬──────────────────────┐
//! │ LSN (8) │ CRC (4) │ Len (4) │ bincode(Operation)   │
//! └─────────┴─────────┴─────────┴──────────────────────┘
//! ```
//! The CRC covers the encoded operation. Integers are little-endian.

mod entry;
mod reader;
mod recovery;
mod writer;

pub use entry::{Operation, WalEntry, HEADER_SIZE};
pub use reader::WalReader;
pub use recovery::{RecoveryResult, WalRecovery};
pub use writer::WalWriter;
