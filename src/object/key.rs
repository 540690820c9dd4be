//! Object keys
//!
//! An object's key is the truncated SHA-256 of `prefix + name + suffix`; its
//! last three hex characters pick the suffix shard. Index rows live under
//! `/partition/suffix/key/part`.

use std::fmt;

use sha2::{Digest, Sha256};

use crate::error::{PackError, Result};

use super::PartType;

/// Hex characters in an object key
pub const KEY_HEX_LEN: usize = 32;

/// Hex characters in a suffix
pub const SUFFIX_LEN: usize = 3;

/// Location of an object in the keyspace of a device
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ObjectKey {
    pub partition: u32,
    pub suffix: String,
    pub hash: String,
}

impl ObjectKey {
    /// Key for the object named `/account/container/object`
    pub fn for_name(partition: u32, name: &str, hash_prefix: &str, hash_suffix: &str) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(hash_prefix.as_bytes());
        hasher.update(name.as_bytes());
        hasher.update(hash_suffix.as_bytes());
        let digest = hasher.finalize();
        let hash = hex::encode(&digest[..KEY_HEX_LEN / 2]);
        Self::from_parts(partition, hash)
    }

    /// Key from an already-computed hash (validated)
    pub fn from_hash(partition: u32, hash: &str) -> Result<Self> {
        if hash.len() != KEY_HEX_LEN || !hash.bytes().all(|b| b.is_ascii_hexdigit()) {
            return Err(PackError::Protocol(format!("Invalid object hash: {:?}", hash)));
        }
        Ok(Self::from_parts(partition, hash.to_ascii_lowercase()))
    }

    fn from_parts(partition: u32, hash: String) -> Self {
        let suffix = hash[KEY_HEX_LEN - SUFFIX_LEN..].to_string();
        Self {
            partition,
            suffix,
            hash,
        }
    }

    /// Index row key for one part of this object
    pub fn index_key(&self, part: PartType) -> Vec<u8> {
        format!(
            "/{}/{}/{}/{}",
            self.partition,
            self.suffix,
            self.hash,
            part.tag()
        )
        .into_bytes()
    }

    /// Parse an index row key back into (key, part)
    pub fn parse_index_key(raw: &[u8]) -> Result<(Self, PartType)> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| PackError::Corruption("Index key is not UTF-8".to_string()))?;
        let bad = || PackError::Corruption(format!("Malformed index key: {:?}", text));

        let mut fields = text.strip_prefix('/').ok_or_else(bad)?.split('/');
        let partition = fields.next().and_then(|p| p.parse().ok()).ok_or_else(bad)?;
        let suffix = fields.next().ok_or_else(bad)?;
        let hash = fields.next().ok_or_else(bad)?;
        let tag = fields.next().ok_or_else(bad)?;
        if fields.next().is_some() {
            return Err(bad());
        }

        let key = Self::from_hash(partition, hash).map_err(|_| bad())?;
        if key.suffix != suffix {
            return Err(bad());
        }
        let part = PartType::from_tag(tag).ok_or_else(bad)?;
        Ok((key, part))
    }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}/{}/{}", self.partition, self.suffix, self.hash)
    }
}

/// Scan prefix for every row of a partition
pub fn partition_prefix(partition: u32) -> Vec<u8> {
    format!("/{}/", partition).into_bytes()
}

/// Scan prefix for every row of one suffix
pub fn suffix_prefix(partition: u32, suffix: &str) -> Vec<u8> {
    format!("/{}/{}/", partition, suffix).into_bytes()
}

pub fn is_valid_suffix(suffix: &str) -> bool {
    suffix.len() == SUFFIX_LEN && suffix.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
}
