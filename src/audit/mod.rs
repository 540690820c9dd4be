//! Auditor
//!
//! Re-reads stored objects at a bounded rate and compares each digest with
//! the ETag recorded at write time. A mismatch is re-checked against the
//! current index row before quarantining, since the object may have been
//! overwritten while it was being read.

mod auditor;
mod ratelimit;

use std::io::{ErrorKind, Read};
use std::ops::AddAssign;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::cancel::{CancelToken, COPY_CHUNK};
use crate::device::{LoadedObject, ObjectState, PackDevice};
use crate::error::{PackError, Result};
use crate::needle::{NeedleHeader, HEADER_SIZE};
use crate::object::{partition_prefix, IndexRecord, Object, ObjectKey, PartType};

pub use auditor::Auditor;
pub use ratelimit::RateLimiter;

/// Audit pacing limits; zero disables a limit
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct AuditQuota {
    pub files_per_second: f64,
    pub bytes_per_second: f64,
}

/// Counters from one or more partition audits
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct AuditStats {
    pub processed_bytes: u64,
    pub processed_files: u64,
    pub errors: u64,
    pub quarantines: u64,
}

impl AddAssign for AuditStats {
    fn add_assign(&mut self, other: Self) {
        self.processed_bytes += other.processed_bytes;
        self.processed_files += other.processed_files;
        self.errors += other.errors;
        self.quarantines += other.quarantines;
    }
}

enum Verdict {
    Intact,
    Corrupt(String),
}

/// Audit every live object of `partition`
///
/// Undecodable index rows count as errors and are skipped; an I/O error
/// aborts the partition.
pub fn audit_partition(
    device: &PackDevice,
    partition: u32,
    quota: AuditQuota,
    cancel: &CancelToken,
) -> Result<AuditStats> {
    let mut files = RateLimiter::new(quota.files_per_second);
    let mut bytes = RateLimiter::new(quota.bytes_per_second);
    let mut stats = AuditStats::default();

    for (raw, value) in device.index().scan_prefix(&partition_prefix(partition))? {
        cancel.check()?;

        let key = match ObjectKey::parse_index_key(&raw) {
            Ok((key, PartType::Data)) => key,
            Ok(_) => continue,
            Err(e) => {
                tracing::warn!(partition, error = %e, "malformed index key");
                stats.errors += 1;
                continue;
            }
        };
        if let Err(e) = IndexRecord::decode(&value) {
            tracing::warn!(key = %key, error = %e, "undecodable index record");
            stats.errors += 1;
            continue;
        }
        let object = match device.load_object_meta(&key) {
            Ok(ObjectState::Exists(object)) => object,
            Ok(_) => continue,
            Err(PackError::Corruption(reason)) => {
                tracing::warn!(key = %key, reason, "undecodable index record");
                stats.errors += 1;
                continue;
            }
            Err(e) => return Err(e),
        };

        files.wait(1);
        let (verdict, read) = check_object(device, &object, &mut bytes, cancel)?;
        stats.processed_files += 1;
        stats.processed_bytes += read;

        if let Verdict::Corrupt(reason) = verdict {
            if still_current(device, &object)? {
                tracing::error!(
                    device = %device.device(),
                    key = %key,
                    reason,
                    "object failed audit"
                );
                device.quarantine(&key)?;
                stats.quarantines += 1;
            } else {
                tracing::debug!(key = %key, "object changed during audit, skipping");
            }
        }
    }

    tracing::info!(
        device = %device.device(),
        policy = device.policy(),
        partition,
        files = stats.processed_files,
        bytes = stats.processed_bytes,
        errors = stats.errors,
        quarantines = stats.quarantines,
        "audited partition"
    );
    Ok(stats)
}

/// Whether the index still points at the version that was audited
fn still_current(device: &PackDevice, audited: &LoadedObject) -> Result<bool> {
    Ok(match device.load_object_meta(&audited.key)? {
        ObjectState::Exists(current) => current.data_timestamp() == audited.data_timestamp(),
        _ => false,
    })
}

/// Digest the object's data and compare with its ETag
fn check_object(
    device: &PackDevice,
    object: &LoadedObject,
    limiter: &mut RateLimiter,
    cancel: &CancelToken,
) -> Result<(Verdict, u64)> {
    let expected = match object.data_meta.etag() {
        Some(etag) => etag.to_string(),
        None => return Ok((Verdict::Corrupt("no etag recorded".to_string()), 0)),
    };

    if let Object::Small(needle) = &object.object {
        let bundle = device.bundle(object.key.partition)?;
        let raw = match bundle.read_at(needle.offset, HEADER_SIZE) {
            Ok(raw) => raw,
            Err(PackError::Io(e)) if e.kind() == ErrorKind::UnexpectedEof => {
                return Ok((Verdict::Corrupt("needle beyond bundle end".to_string()), 0))
            }
            Err(e) => return Err(e),
        };
        let header = NeedleHeader::decode(&raw)?;
        if let Err(e) = header.validate() {
            return Ok((Verdict::Corrupt(e.to_string()), 0));
        }
        if header.data_size as u64 != needle.data_size
            || needle.offset + header.data_offset as u64 != needle.data_offset
        {
            return Ok((Verdict::Corrupt("needle header disagrees with index".to_string()), 0));
        }
    }

    let mut reader = match device.open_reader(object) {
        Ok(reader) => reader,
        Err(PackError::Io(e)) if e.kind() == ErrorKind::NotFound => {
            return Ok((Verdict::Corrupt("data file missing".to_string()), 0))
        }
        Err(e) => return Err(e),
    };

    let mut hasher = Sha256::new();
    let mut buf = vec![0u8; COPY_CHUNK];
    let mut read = 0u64;
    loop {
        cancel.check()?;
        let n = match reader.read(&mut buf) {
            Ok(n) => n,
            Err(e) if e.kind() == ErrorKind::UnexpectedEof => {
                return Ok((Verdict::Corrupt("data truncated".to_string()), read))
            }
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        };
        if n == 0 {
            break;
        }
        limiter.wait(n as u64);
        hasher.update(&buf[..n]);
        read += n as u64;
    }

    if read != object.size() {
        return Ok((
            Verdict::Corrupt(format!("size {} differs from recorded {}", read, object.size())),
            read,
        ));
    }
    let actual = hex::encode(hasher.finalize());
    if actual != expected {
        return Ok((
            Verdict::Corrupt(format!("etag {} differs from recorded {}", actual, expected)),
            read,
        ));
    }
    Ok((Verdict::Intact, read))
}
