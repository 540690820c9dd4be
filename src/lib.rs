//! # packstore
//!
//! Pack storage engine for a Swift-compatible object server:
//! - Small objects appended as aligned needles to one bundle per partition
//! - Large objects stored as plain files
//! - Per-device metadata index (WAL + memtable + SSTables)
//! - Suffix hash caches for replication
//! - Auditor and replicator daemons talking to the object server over TCP
//!
//! ## Architecture Overview
//!
//! ```text
//! ┌──────────────┐   ┌──────────────┐          ┌──────────────┐
//! │   Auditor    │   │  Replicator  │─ ─ ─ ─ ─▶│  Peer server │
//! └──────┬───────┘   └──────┬───────┘  peer    └──────────────┘
//!        │   localhost RPC  │          port           ▲
//! ┌──────▼──────────────────▼───────┐                 │
//! │      Server / Router            │─── Sync ────────┘
//! └──────────────┬──────────────────┘
//!                │
//! ┌──────────────▼──────────────────┐
//! │         PackDeviceMgr           │
//! └──────────────┬──────────────────┘
//!                │ (device, policy)
//! ┌──────────────▼──────────────────┐
//! │           PackDevice            │
//! │  ┌────────┐ ┌────────┐ ┌──────┐ │
//! │  │Bundles │ │  LO    │ │Index │ │
//! │  │(needle)│ │ files  │ │(LSM) │ │
//! │  └────────┘ └────────┘ └──────┘ │
//! └─────────────────────────────────┘
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod config;
pub mod cancel;

pub mod needle;
pub mod index;
pub mod object;
pub mod device;
pub mod audit;
pub mod replicator;
pub mod network;
pub mod protocol;

// =============================================================================
// Public API Re-exports
// =============================================================================

pub use cancel::CancelToken;
pub use config::Config;
pub use device::{PackDevice, PackDeviceMgr};
pub use error::{PackError, Result};
pub use index::MetaIndex;
pub use object::{ObjectKey, ObjectMeta, Timestamp};

// =============================================================================
// Version Info
// =============================================================================

/// Current version of packstore
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
