//! Object Model
//!
//! Keys, timestamps, metadata and the index record stored per object part.

mod key;
mod timestamp;

use std::collections::BTreeMap;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};

pub use key::{
    is_valid_suffix, partition_prefix, suffix_prefix, ObjectKey, KEY_HEX_LEN, SUFFIX_LEN,
};
pub use timestamp::Timestamp;

/// Largest object stored inline as a needle (inclusive)
pub const SMALL_OBJECT_MAX: u64 = 4 * 1024 * 1024;

/// Prefix of system metadata keys carried over on POST
pub const SYSMETA_PREFIX: &str = "x-object-sysmeta-";

pub const CONTENT_TYPE: &str = "content-type";
pub const CONTENT_LENGTH: &str = "content-length";
pub const ETAG: &str = "etag";

// =============================================================================
// Part Types
// =============================================================================

/// Which index row of an object
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PartType {
    Data,
    Meta,
    Tombstone,
}

impl PartType {
    pub const ALL: [PartType; 3] = [PartType::Data, PartType::Meta, PartType::Tombstone];

    /// Single-character tag used in index keys
    pub fn tag(self) -> &'static str {
        match self {
            PartType::Data => "d",
            PartType::Meta => "m",
            PartType::Tombstone => "t",
        }
    }

    pub fn from_tag(tag: &str) -> Option<Self> {
        match tag {
            "d" => Some(PartType::Data),
            "m" => Some(PartType::Meta),
            "t" => Some(PartType::Tombstone),
            _ => None,
        }
    }

    /// File extension used for large-object parts
    pub fn extension(self) -> &'static str {
        match self {
            PartType::Data => "data",
            PartType::Meta => "meta",
            PartType::Tombstone => "ts",
        }
    }
}

// =============================================================================
// Metadata
// =============================================================================

/// Metadata of one object part
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// `/account/container/object`
    pub name: String,
    pub timestamp: Timestamp,
    pub data_size: u64,
    /// content-type, content-length, etag and `x-object-sysmeta-*`
    pub system_meta: BTreeMap<String, String>,
    /// Replaced wholesale on every POST
    pub user_meta: BTreeMap<String, String>,
}

impl ObjectMeta {
    pub fn new(name: impl Into<String>, timestamp: Timestamp) -> Self {
        Self {
            name: name.into(),
            timestamp,
            ..Default::default()
        }
    }

    pub fn etag(&self) -> Option<&str> {
        self.system_meta.get(ETAG).map(String::as_str)
    }

    pub fn content_type(&self) -> Option<&str> {
        self.system_meta.get(CONTENT_TYPE).map(String::as_str)
    }

    /// Overlay a POST: system metadata is unioned, user metadata replaced
    pub fn apply_update(&mut self, update: &ObjectMeta) {
        for (k, v) in &update.system_meta {
            self.system_meta.insert(k.clone(), v.clone());
        }
        self.user_meta = update.user_meta.clone();
    }
}

/// Where a small object's needle lives in its bundle (absolute offsets)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NeedleIndex {
    pub offset: u64,
    pub size: u64,
    pub data_offset: u64,
    pub data_size: u64,
    pub meta_offset: u64,
    pub meta_size: u64,
}

/// Value stored in the metadata index for one object part
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexRecord {
    /// Present only for small objects
    pub needle: Option<NeedleIndex>,
    pub meta: ObjectMeta,
}

impl IndexRecord {
    pub fn encode(&self) -> Result<Vec<u8>> {
        Ok(bincode::serialize(self)?)
    }

    pub fn decode(bytes: &[u8]) -> Result<Self> {
        bincode::deserialize(bytes)
            .map_err(|e| PackError::Corruption(format!("Index record decode failed: {}", e)))
    }

    pub fn timestamp(&self) -> &Timestamp {
        &self.meta.timestamp
    }

    pub fn is_small(&self) -> bool {
        self.needle.is_some()
    }
}

// =============================================================================
// Object Variant
// =============================================================================

/// Physical location of an object's bytes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Object {
    /// Inline needle in the partition bundle
    Small(NeedleIndex),
    /// Standalone file in the object's hashed directory
    Large(PathBuf),
}

impl Object {
    pub fn is_small(&self) -> bool {
        matches!(self, Object::Small(_))
    }
}

/// Size class for an object of `len` bytes
pub fn is_small_size(len: u64) -> bool {
    len <= SMALL_OBJECT_MAX
}
