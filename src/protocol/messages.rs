//! Payload types shared by commands and responses

use serde::{Deserialize, Serialize};

/// A (device, policy) pair on the receiving server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceTarget {
    pub device: String,
    pub policy: u32,
}

impl DeviceTarget {
    pub fn new(device: impl Into<String>, policy: u32) -> Self {
        Self {
            device: device.into(),
            policy,
        }
    }
}

impl std::fmt::Display for DeviceTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}/{}", self.device, self.policy)
    }
}

/// Options of a GetHashes call
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HashesRequest {
    /// Tombstones older than this many seconds are reclaimed
    pub reclaim_age_secs: u64,
    /// Relist every suffix instead of trusting the cache
    pub list_dir: bool,
    /// Suffixes to recompute regardless of the cache
    pub recalculate: Vec<String>,
}
