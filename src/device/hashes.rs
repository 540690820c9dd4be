//! Suffix hashes, replica diffing and handoff removal
//!
//! Each partition keeps `hashes.json` (suffix -> digest) and an append-only
//! `hashes.invalid` listing suffixes touched since the cache was written.
//! A digest covers every object in the suffix: its key and the timestamps
//! of the rows defining it, in index order.

use std::collections::{BTreeMap, BTreeSet};
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{PackError, Result};
use crate::object::{
    is_valid_suffix, partition_prefix, suffix_prefix, IndexRecord, ObjectKey, PartType, Timestamp,
};
use crate::replicator::diff::{wanted_parts, ObjectTimestamps, WantedParts};

use super::{ObjectParts, PackDevice};

const HASHES_FILE: &str = "hashes.json";
const INVALID_FILE: &str = "hashes.invalid";

/// Suffix digests of one partition
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct HashesResult {
    /// Suffixes whose digest was recomputed by this call
    pub hashed: usize,
    pub hashes: BTreeMap<String, String>,
}

impl PackDevice {
    pub(crate) fn invalid_path(&self, partition: u32) -> PathBuf {
        self.partition_dir(partition).join(INVALID_FILE)
    }

    fn hashes_path(&self, partition: u32) -> PathBuf {
        self.partition_dir(partition).join(HASHES_FILE)
    }

    /// Partitions present on this device
    pub fn list_partitions(&self) -> Result<Vec<u32>> {
        let mut partitions = Vec::new();
        for entry in fs::read_dir(self.objects_dir())? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            if let Some(partition) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                partitions.push(partition);
            }
        }
        partitions.sort_unstable();
        Ok(partitions)
    }

    /// Suffixes holding at least one index row in `partition`
    pub fn list_partition_suffixes(&self, partition: u32) -> Result<Vec<String>> {
        let mut suffixes = BTreeSet::new();
        for (raw, _) in self.index().scan_prefix(&partition_prefix(partition))? {
            match ObjectKey::parse_index_key(&raw) {
                Ok((key, _)) => {
                    suffixes.insert(key.suffix);
                }
                Err(e) => tracing::warn!(partition, error = %e, "skipping malformed index key"),
            }
        }
        Ok(suffixes.into_iter().collect())
    }

    /// Every object under `prefix`, grouped from its rows in key order
    pub(crate) fn scan_objects(&self, prefix: &[u8]) -> Result<Vec<(ObjectKey, ObjectParts)>> {
        let mut objects: Vec<(ObjectKey, ObjectParts)> = Vec::new();
        for (raw, value) in self.index().scan_prefix(prefix)? {
            let (key, part) = match ObjectKey::parse_index_key(&raw) {
                Ok(parsed) => parsed,
                Err(e) => {
                    tracing::warn!(error = %e, "skipping malformed index key");
                    continue;
                }
            };
            let record = match IndexRecord::decode(&value) {
                Ok(record) => record,
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "skipping undecodable index record");
                    continue;
                }
            };
            match objects.last_mut() {
                Some((last, parts)) if *last == key => *parts.slot(part) = Some(record),
                _ => {
                    let mut parts = ObjectParts::default();
                    *parts.slot(part) = Some(record);
                    objects.push((key, parts));
                }
            }
        }
        Ok(objects)
    }

    /// Current timestamps of every object in `suffixes`, keyed by object hash
    pub fn list_suffix_objects(
        &self,
        partition: u32,
        suffixes: &[String],
    ) -> Result<BTreeMap<String, ObjectTimestamps>> {
        let mut listed = BTreeMap::new();
        for suffix in suffixes.iter().filter(|s| is_valid_suffix(s)) {
            for (key, parts) in self.scan_objects(&suffix_prefix(partition, suffix))? {
                if let Some(timestamps) = parts.timestamps() {
                    listed.insert(key.hash, timestamps);
                }
            }
        }
        Ok(listed)
    }

    /// Parts of each offered object this device wants pushed to it
    pub fn diff_replica(
        &self,
        partition: u32,
        offered: &BTreeMap<String, ObjectTimestamps>,
    ) -> Result<BTreeMap<String, WantedParts>> {
        let mut wanted = BTreeMap::new();
        for (hash, theirs) in offered {
            let key = ObjectKey::from_hash(partition, hash)?;
            let ours = self.load_parts(&key)?.timestamps();
            let want = wanted_parts(ours.as_ref(), theirs);
            if want.any() {
                wanted.insert(hash.clone(), want);
            }
        }
        Ok(wanted)
    }

    // -------------------------------------------------------------------------
    // Hash Cache
    // -------------------------------------------------------------------------

    /// Suffix digests of `partition`, recomputing invalidated ones
    ///
    /// `list_dir` forces a full relisting of suffixes; `recalculate` forces
    /// the named suffixes. Tombstones older than `reclaim_age` are removed
    /// while hashing.
    pub fn get_hashes(
        &self,
        partition: u32,
        reclaim_age: Duration,
        list_dir: bool,
        recalculate: &[String],
    ) -> Result<HashesResult> {
        let _op = self.begin_op()?;
        let _partition = self.lock_partition(partition);

        if !self.partition_dir(partition).is_dir() {
            return Ok(HashesResult::default());
        }

        let hashes_path = self.hashes_path(partition);
        let invalid_path = self.invalid_path(partition);
        let mut force_listing = list_dir;

        let mut cache = {
            let _guard = self.hash_lock.lock();
            let mut cache = match read_cache(&hashes_path) {
                Ok(Some(cache)) => cache,
                Ok(None) => {
                    force_listing = true;
                    BTreeMap::new()
                }
                Err(e) => {
                    tracing::warn!(path = %hashes_path.display(), error = %e, "discarding unreadable hash cache");
                    force_listing = true;
                    BTreeMap::new()
                }
            };
            let invalid = read_invalid(&invalid_path)?;
            if !invalid.is_empty() {
                for suffix in invalid {
                    cache.insert(suffix, None);
                }
                self.write_cache(&hashes_path, &cache)?;
                OpenOptions::new()
                    .write(true)
                    .truncate(true)
                    .open(&invalid_path)?;
            }
            cache
        };

        for suffix in recalculate.iter().filter(|s| is_valid_suffix(s)) {
            cache.insert(suffix.clone(), None);
        }
        if force_listing {
            for suffix in self.list_partition_suffixes(partition)? {
                cache.entry(suffix).or_insert(None);
            }
        }

        let reclaim_before = Timestamp::now().offset(-reclaim_age.as_secs_f64());
        let mut hashed = 0;
        for (suffix, digest) in cache.iter_mut() {
            if digest.is_none() {
                *digest = self.hash_suffix(partition, suffix, &reclaim_before)?;
                hashed += 1;
            }
        }
        cache.retain(|_, digest| digest.is_some());

        {
            let _guard = self.hash_lock.lock();
            self.write_cache(&hashes_path, &cache)?;
        }

        tracing::debug!(
            device = %self.device(),
            partition,
            hashed,
            suffixes = cache.len(),
            "computed suffix hashes"
        );
        Ok(HashesResult {
            hashed,
            hashes: cache
                .into_iter()
                .filter_map(|(suffix, digest)| digest.map(|d| (suffix, d)))
                .collect(),
        })
    }

    /// Digest of one suffix, `None` when it holds no live object
    fn hash_suffix(
        &self,
        partition: u32,
        suffix: &str,
        reclaim_before: &Timestamp,
    ) -> Result<Option<String>> {
        let mut hasher = Sha256::new();
        let mut objects = 0usize;

        for (key, parts) in self.scan_objects(&suffix_prefix(partition, suffix))? {
            let timestamps = match parts.timestamps() {
                Some(timestamps) => timestamps,
                None => continue,
            };
            if let Some(tombstone) = &timestamps.tombstone {
                if tombstone < reclaim_before {
                    self.reclaim_tombstone(&key, tombstone)?;
                    continue;
                }
            }

            hasher.update(key.hash.as_bytes());
            let rows = [
                (PartType::Data, &timestamps.data),
                (PartType::Meta, &timestamps.meta),
                (PartType::Tombstone, &timestamps.tombstone),
            ];
            for (part, ts) in rows {
                if let Some(ts) = ts {
                    hasher.update(part.tag().as_bytes());
                    hasher.update(ts.as_str().as_bytes());
                }
            }
            objects += 1;
        }

        if objects == 0 {
            return Ok(None);
        }
        Ok(Some(hex::encode(&hasher.finalize()[..16])))
    }

    /// Drop every row of an object deleted at `tombstone`, if still so
    fn reclaim_tombstone(&self, key: &ObjectKey, tombstone: &Timestamp) -> Result<()> {
        let _lock = self.lock_object(key);
        let parts = self.load_parts(key)?;
        let still_deleted = parts
            .timestamps()
            .and_then(|t| t.tombstone)
            .map_or(false, |ts| ts == *tombstone);
        if !still_deleted {
            return Ok(());
        }

        self.clear_rows(key, &parts, &PartType::ALL)?;
        if let Some(record) = &parts.tombstone {
            self.reclaim(key, PartType::Tombstone, record);
        }
        tracing::debug!(key = %key, tombstone = %tombstone, "reclaimed tombstone");
        Ok(())
    }

    fn write_cache(&self, path: &Path, cache: &BTreeMap<String, Option<String>>) -> Result<()> {
        let bytes = serde_json::to_vec(cache)?;
        self.write_file_durable(path, &bytes)
    }

    // -------------------------------------------------------------------------
    // Handoff Removal
    // -------------------------------------------------------------------------

    /// Remove a handoff partition after it was pushed to every primary
    ///
    /// Fails with `Race` if anything invalidated the partition meanwhile, in
    /// which case the remaining data stays for the next pass.
    pub fn delete_handoff(&self, partition: u32) -> Result<()> {
        let _op = self.begin_op()?;
        let _partition = self.lock_partition(partition);
        let _writes = self.partition_write_exclusive(partition);

        let dir = self.partition_dir(partition);
        fs::create_dir_all(&dir)?;
        let invalid_path = self.invalid_path(partition);
        {
            let _guard = self.hash_lock.lock();
            OpenOptions::new()
                .create(true)
                .append(true)
                .open(&invalid_path)?;
        }
        let before = modified(&invalid_path)?;
        let changed = || -> Result<bool> { Ok(modified(&invalid_path)? != before) };

        let rows = self.index().scan_prefix(&partition_prefix(partition))?;
        let total = rows.len();
        for (key, value) in rows {
            if changed()? || self.index().get(&key)?.as_deref() != Some(value.as_slice()) {
                return Err(PackError::Race(format!(
                    "partition {} modified during handoff removal",
                    partition
                )));
            }
            self.index().delete(&key)?;
        }
        if changed()? {
            return Err(PackError::Race(format!(
                "partition {} modified during handoff removal",
                partition
            )));
        }

        self.forget_bundle(partition);
        fs::remove_dir_all(&dir)?;
        tracing::info!(device = %self.device(), partition, rows = total, "removed handoff partition");
        Ok(())
    }
}

fn modified(path: &Path) -> Result<SystemTime> {
    Ok(fs::metadata(path)?.modified()?)
}

fn read_cache(path: &Path) -> Result<Option<BTreeMap<String, Option<String>>>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
        Err(e) => return Err(e.into()),
    };
    Ok(Some(serde_json::from_slice(&bytes)?))
}

fn read_invalid(path: &Path) -> Result<Vec<String>> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => return Err(e.into()),
    };
    let mut suffixes = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line?;
        let suffix = line.trim();
        if is_valid_suffix(suffix) {
            suffixes.push(suffix.to_string());
        }
    }
    Ok(suffixes)
}
