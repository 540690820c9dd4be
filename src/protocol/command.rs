//! Command definitions
//!
//! Requests on both surfaces: the localhost RPC surface driven by the
//! auditor and replicator, and the peer surface other object servers use
//! during replication.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::audit::AuditQuota;
use crate::error::{PackError, Result};
use crate::object::{ObjectMeta, Timestamp};
use crate::replicator::diff::ObjectTimestamps;
use crate::replicator::Node;

use super::messages::{DeviceTarget, HashesRequest};

/// Command types
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CommandType {
    Ping = 0x01,

    // RPC surface
    ListPartitions = 0x02,
    ListPartitionSuffixes = 0x03,
    AuditPartition = 0x04,
    GetHashes = 0x05,
    Sync = 0x06,
    DeleteHandoff = 0x07,

    // Peer surface
    Replicate = 0x10,
    Diff = 0x11,
    PutObject = 0x12,
    PostObject = 0x13,
    DeleteObject = 0x14,
    GetObject = 0x15,
}

impl CommandType {
    pub fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x01 => CommandType::Ping,
            0x02 => CommandType::ListPartitions,
            0x03 => CommandType::ListPartitionSuffixes,
            0x04 => CommandType::AuditPartition,
            0x05 => CommandType::GetHashes,
            0x06 => CommandType::Sync,
            0x07 => CommandType::DeleteHandoff,
            0x10 => CommandType::Replicate,
            0x11 => CommandType::Diff,
            0x12 => CommandType::PutObject,
            0x13 => CommandType::PostObject,
            0x14 => CommandType::DeleteObject,
            0x15 => CommandType::GetObject,
            _ => {
                return Err(PackError::Protocol(format!(
                    "Unknown command type: 0x{:02x}",
                    byte
                )))
            }
        })
    }

    /// Whether the command is served on the localhost RPC surface
    pub fn is_rpc(self) -> bool {
        matches!(
            self,
            CommandType::Ping
                | CommandType::ListPartitions
                | CommandType::ListPartitionSuffixes
                | CommandType::AuditPartition
                | CommandType::GetHashes
                | CommandType::Sync
                | CommandType::DeleteHandoff
        )
    }

    /// Whether the command is served on the peer surface
    pub fn is_peer(self) -> bool {
        self == CommandType::Ping || !self.is_rpc()
    }
}

/// A parsed command
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Command {
    /// Health check
    Ping,

    /// Partitions present on a device
    ListPartitions { target: DeviceTarget },

    /// Suffixes present in a partition
    ListPartitionSuffixes { target: DeviceTarget, partition: u32 },

    /// Audit every object of a partition
    AuditPartition {
        target: DeviceTarget,
        partition: u32,
        quota: AuditQuota,
    },

    /// Suffix digests of a partition
    GetHashes {
        target: DeviceTarget,
        partition: u32,
        request: HashesRequest,
    },

    /// Push the given suffixes of a local partition to a peer
    Sync {
        target: DeviceTarget,
        partition: u32,
        peer: Node,
        suffixes: Vec<String>,
    },

    /// Remove a handoff partition pushed to all its primaries
    DeleteHandoff { target: DeviceTarget, partition: u32 },

    /// Peer asks for suffix digests, recalculating `recalculate` first
    Replicate {
        target: DeviceTarget,
        partition: u32,
        recalculate: Vec<String>,
    },

    /// Peer offers object timestamps; answer is the wanted parts
    Diff {
        target: DeviceTarget,
        partition: u32,
        offered: BTreeMap<String, ObjectTimestamps>,
    },

    /// Store an object; `content_length` raw bytes follow the frame
    PutObject {
        target: DeviceTarget,
        partition: u32,
        hash: String,
        meta: ObjectMeta,
        content_length: u64,
    },

    /// Apply a metadata update
    PostObject {
        target: DeviceTarget,
        partition: u32,
        hash: String,
        meta: ObjectMeta,
    },

    /// Tombstone an object
    DeleteObject {
        target: DeviceTarget,
        partition: u32,
        hash: String,
        name: String,
        timestamp: Timestamp,
    },

    /// Fetch an object; the response is followed by its raw bytes
    GetObject {
        target: DeviceTarget,
        partition: u32,
        hash: String,
    },
}

impl Command {
    /// Get the command type
    pub fn command_type(&self) -> CommandType {
        match self {
            Command::Ping => CommandType::Ping,
            Command::ListPartitions { .. } => CommandType::ListPartitions,
            Command::ListPartitionSuffixes { .. } => CommandType::ListPartitionSuffixes,
            Command::AuditPartition { .. } => CommandType::AuditPartition,
            Command::GetHashes { .. } => CommandType::GetHashes,
            Command::Sync { .. } => CommandType::Sync,
            Command::DeleteHandoff { .. } => CommandType::DeleteHandoff,
            Command::Replicate { .. } => CommandType::Replicate,
            Command::Diff { .. } => CommandType::Diff,
            Command::PutObject { .. } => CommandType::PutObject,
            Command::PostObject { .. } => CommandType::PostObject,
            Command::DeleteObject { .. } => CommandType::DeleteObject,
            Command::GetObject { .. } => CommandType::GetObject,
        }
    }

    /// Length of the raw body following the frame
    pub fn body_len(&self) -> u64 {
        match self {
            Command::PutObject { content_length, .. } => *content_length,
            _ => 0,
        }
    }
}
