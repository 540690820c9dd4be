//! Pack Device
//!
//! One device directory serving one storage policy:
//!
//! ```text
//! {devices_root}/{device}/
//!   objects[-{policy}]/{partition}/
//!     pack.bundle                      small-object needles
//!     hashes.json / hashes.invalid     suffix hash cache
//!     {suffix}/{hash}/{ts}.data|.meta|.ts   large objects
//!   objects[-{policy}]/tmp/            in-progress large writes
//!   pack-meta[-{policy}]/              metadata index
//!   quarantined/objects[-{policy}]/{hash}/
//! ```
//!
//! Every object part is one index row; whichever of DATA and TOMBSTONE is
//! newer defines the object, and a META row applies only when newer than
//! the DATA it overlays.

mod hashes;
mod manager;
mod quarantine;
mod reader;
mod tasks;
mod writer;

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::{Condvar, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

use crate::config::Config;
use crate::error::{PackError, Result};
use crate::index::MetaIndex;
use crate::needle::Bundle;
use crate::object::{IndexRecord, Object, ObjectKey, ObjectMeta, PartType, Timestamp};
use crate::replicator::diff::ObjectTimestamps;

pub use hashes::HashesResult;
pub use manager::PackDeviceMgr;
pub use reader::ObjectReader;
pub use tasks::{Task, TaskQueue};
pub use writer::ObjectWriter;

const OBJECT_LOCK_STRIPES: usize = 64;
const PARTITION_LOCK_STRIPES: usize = 16;

/// File name of a partition's bundle
pub const BUNDLE_FILE: &str = "pack.bundle";

/// Directory name for a policy-scoped area (`objects`, `objects-1`, ...)
pub fn policy_dir(base: &str, policy: u32) -> String {
    if policy == 0 {
        base.to_string()
    } else {
        format!("{}-{}", base, policy)
    }
}

// =============================================================================
// Object State
// =============================================================================

/// Every index row currently stored for one object
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ObjectParts {
    pub data: Option<IndexRecord>,
    pub meta: Option<IndexRecord>,
    pub tombstone: Option<IndexRecord>,
}

impl ObjectParts {
    pub fn is_empty(&self) -> bool {
        self.data.is_none() && self.meta.is_none() && self.tombstone.is_none()
    }

    fn slot(&mut self, part: PartType) -> &mut Option<IndexRecord> {
        match part {
            PartType::Data => &mut self.data,
            PartType::Meta => &mut self.meta,
            PartType::Tombstone => &mut self.tombstone,
        }
    }

    /// The tombstone, if it is what defines the object
    fn live_tombstone(&self) -> Option<&IndexRecord> {
        let tombstone = self.tombstone.as_ref()?;
        match &self.data {
            Some(data) if data.timestamp() > tombstone.timestamp() => None,
            _ => Some(tombstone),
        }
    }

    /// The META row, if it applies over the current DATA
    fn live_meta(&self) -> Option<&IndexRecord> {
        let data = self.data.as_ref()?;
        self.meta
            .as_ref()
            .filter(|meta| meta.timestamp() > data.timestamp())
    }

    /// Newest timestamp among the rows that define the object
    pub fn state_timestamp(&self) -> Option<&Timestamp> {
        match self.live_tombstone() {
            Some(tombstone) => Some(tombstone.timestamp()),
            None => self.data.as_ref().map(IndexRecord::timestamp),
        }
    }

    /// Timestamps offered to a replication peer, `None` for missing objects
    pub fn timestamps(&self) -> Option<ObjectTimestamps> {
        if let Some(tombstone) = self.live_tombstone() {
            return Some(ObjectTimestamps {
                name: tombstone.meta.name.clone(),
                tombstone: Some(tombstone.timestamp().clone()),
                ..Default::default()
            });
        }
        let data = self.data.as_ref()?;
        Some(ObjectTimestamps {
            name: data.meta.name.clone(),
            data: Some(data.timestamp().clone()),
            meta: self.live_meta().map(|m| m.timestamp().clone()),
            tombstone: None,
        })
    }
}

/// An object that exists, with its merged metadata
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadedObject {
    pub key: ObjectKey,
    pub object: Object,
    /// Metadata of the DATA row as written by PUT
    pub data_meta: ObjectMeta,
    /// Metadata of the last applicable POST
    pub meta_update: Option<ObjectMeta>,
    /// DATA metadata with the POST overlaid
    pub meta: ObjectMeta,
}

impl LoadedObject {
    pub fn data_timestamp(&self) -> &Timestamp {
        &self.data_meta.timestamp
    }

    pub fn meta_timestamp(&self) -> Option<&Timestamp> {
        self.meta_update.as_ref().map(|m| &m.timestamp)
    }

    pub fn size(&self) -> u64 {
        self.data_meta.data_size
    }
}

/// Result of resolving an object's rows
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ObjectState {
    Exists(LoadedObject),
    /// Deleted at the given timestamp
    Deleted(Timestamp),
    Missing,
}

// =============================================================================
// In-flight Operations
// =============================================================================

#[derive(Default)]
struct Inflight {
    count: Mutex<usize>,
    idle: Condvar,
}

/// Held by a device-mutating operation for its whole duration
pub(crate) struct OpGuard<'a> {
    inflight: &'a Inflight,
}

impl Drop for OpGuard<'_> {
    fn drop(&mut self) {
        let mut count = self.inflight.count.lock();
        *count -= 1;
        if *count == 0 {
            self.inflight.idle.notify_all();
        }
    }
}

// =============================================================================
// Pack Device
// =============================================================================

/// Storage engine for one (device, policy)
pub struct PackDevice {
    device: String,
    policy: u32,
    device_path: PathBuf,
    objects_dir: PathBuf,
    quarantine_dir: PathBuf,
    hash_prefix: String,
    hash_suffix: String,

    index: MetaIndex,
    bundles: RwLock<HashMap<u32, Arc<Bundle>>>,
    tasks: TaskQueue,

    /// Serializes hash cache consolidation against invalidations
    hash_lock: Arc<Mutex<()>>,

    /// Striped locks serializing read-check-write of a single object
    object_locks: Vec<Mutex<()>>,

    /// Striped locks serializing hash computation and handoff removal
    partition_locks: Vec<Mutex<()>>,

    /// Commits into a partition hold this shared; handoff removal holds it
    /// exclusively so no commit lands between its scan and the unlink
    partition_writes: Vec<RwLock<()>>,

    inflight: Inflight,
    closed: AtomicBool,
}

impl PackDevice {
    /// Open the device at `{devices_root}/{device}` for `policy`
    pub fn open(config: &Config, device: &str, policy: u32) -> Result<Self> {
        let device_path = config.devices_root.join(device);
        if !device_path.is_dir() {
            return Err(PackError::NotFound(format!("device {}", device)));
        }

        let objects_dir = device_path.join(policy_dir("objects", policy));
        let meta_dir = device_path.join(policy_dir("pack-meta", policy));
        let quarantine_dir = device_path
            .join("quarantined")
            .join(policy_dir("objects", policy));

        fs::create_dir_all(&objects_dir)?;
        let tmp_dir = objects_dir.join("tmp");
        if tmp_dir.exists() {
            // Large writes that never committed
            fs::remove_dir_all(&tmp_dir)?;
        }
        fs::create_dir_all(&tmp_dir)?;

        let index = MetaIndex::open(&meta_dir, &config.index)?;
        let tasks = TaskQueue::new(format!("{}-{}", device, policy), config.background_workers)?;

        tracing::info!(device, policy, path = %device_path.display(), "opened pack device");

        Ok(Self {
            device: device.to_string(),
            policy,
            device_path,
            objects_dir,
            quarantine_dir,
            hash_prefix: config.hash_path_prefix.clone(),
            hash_suffix: config.hash_path_suffix.clone(),
            index,
            bundles: RwLock::new(HashMap::new()),
            tasks,
            hash_lock: Arc::new(Mutex::new(())),
            object_locks: (0..OBJECT_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            partition_locks: (0..PARTITION_LOCK_STRIPES).map(|_| Mutex::new(())).collect(),
            partition_writes: (0..PARTITION_LOCK_STRIPES).map(|_| RwLock::new(())).collect(),
            inflight: Inflight::default(),
            closed: AtomicBool::new(false),
        })
    }

    pub fn device(&self) -> &str {
        &self.device
    }

    pub fn policy(&self) -> u32 {
        self.policy
    }

    pub fn device_path(&self) -> &Path {
        &self.device_path
    }

    pub fn objects_dir(&self) -> &Path {
        &self.objects_dir
    }

    pub fn quarantine_dir(&self) -> &Path {
        &self.quarantine_dir
    }

    pub fn index(&self) -> &MetaIndex {
        &self.index
    }

    pub fn tasks(&self) -> &TaskQueue {
        &self.tasks
    }

    /// Key for an object name using this device's hash path secrets
    pub fn object_key(&self, partition: u32, name: &str) -> ObjectKey {
        ObjectKey::for_name(partition, name, &self.hash_prefix, &self.hash_suffix)
    }

    pub(crate) fn lock_object(&self, key: &ObjectKey) -> MutexGuard<'_, ()> {
        let stripe = u32::from_str_radix(&key.suffix, 16).unwrap_or(0) as usize;
        self.object_locks[stripe % self.object_locks.len()].lock()
    }

    pub(crate) fn lock_partition(&self, partition: u32) -> MutexGuard<'_, ()> {
        self.partition_locks[partition as usize % self.partition_locks.len()].lock()
    }

    /// Taken after the object lock, never before it
    pub(crate) fn partition_write(&self, partition: u32) -> RwLockReadGuard<'_, ()> {
        self.partition_writes[partition as usize % self.partition_writes.len()].read()
    }

    pub(crate) fn partition_write_exclusive(&self, partition: u32) -> RwLockWriteGuard<'_, ()> {
        self.partition_writes[partition as usize % self.partition_writes.len()].write()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Register a mutating operation; refused once closing has begun
    pub(crate) fn begin_op(&self) -> Result<OpGuard<'_>> {
        let mut count = self.inflight.count.lock();
        if self.is_closed() {
            return Err(PackError::Unmounted(self.device.clone()));
        }
        *count += 1;
        Ok(OpGuard {
            inflight: &self.inflight,
        })
    }

    /// Stop accepting operations, wait for in-flight ones and drain
    /// background work
    pub fn close(&self) -> Result<()> {
        {
            let mut count = self.inflight.count.lock();
            if self.closed.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            while *count > 0 {
                self.inflight.idle.wait(&mut count);
            }
        }
        self.tasks.shutdown();
        self.bundles.write().clear();
        self.index.close()?;
        tracing::info!(device = %self.device, policy = self.policy, "closed pack device");
        Ok(())
    }

    // -------------------------------------------------------------------------
    // Paths
    // -------------------------------------------------------------------------

    pub(crate) fn partition_dir(&self, partition: u32) -> PathBuf {
        self.objects_dir.join(partition.to_string())
    }

    pub(crate) fn tmp_dir(&self) -> PathBuf {
        self.objects_dir.join("tmp")
    }

    /// Directory holding a large object's files
    pub(crate) fn hashed_dir(&self, key: &ObjectKey) -> PathBuf {
        self.partition_dir(key.partition)
            .join(&key.suffix)
            .join(&key.hash)
    }

    /// File of one large-object part
    pub(crate) fn large_path(&self, key: &ObjectKey, part: PartType, ts: &Timestamp) -> PathBuf {
        self.hashed_dir(key)
            .join(format!("{}.{}", ts, part.extension()))
    }

    // -------------------------------------------------------------------------
    // Bundles
    // -------------------------------------------------------------------------

    /// Cached bundle for `partition`, opened on first use
    pub fn bundle(&self, partition: u32) -> Result<Arc<Bundle>> {
        if let Some(bundle) = self.bundles.read().get(&partition) {
            return Ok(Arc::clone(bundle));
        }

        let mut bundles = self.bundles.write();
        if let Some(bundle) = bundles.get(&partition) {
            return Ok(Arc::clone(bundle));
        }
        let path = self.partition_dir(partition).join(BUNDLE_FILE);
        let bundle = Arc::new(Bundle::open(&path)?);
        bundles.insert(partition, Arc::clone(&bundle));
        Ok(bundle)
    }

    pub(crate) fn forget_bundle(&self, partition: u32) {
        self.bundles.write().remove(&partition);
    }

    // -------------------------------------------------------------------------
    // Loading
    // -------------------------------------------------------------------------

    /// Every stored row of `key`
    pub fn load_parts(&self, key: &ObjectKey) -> Result<ObjectParts> {
        let mut parts = ObjectParts::default();
        for part in PartType::ALL {
            if let Some(raw) = self.index.get(&key.index_key(part))? {
                *parts.slot(part) = Some(IndexRecord::decode(&raw)?);
            }
        }
        Ok(parts)
    }

    /// Resolve an object's current state from its rows
    pub fn load_object_meta(&self, key: &ObjectKey) -> Result<ObjectState> {
        let parts = self.load_parts(key)?;
        Ok(self.resolve(key, &parts))
    }

    pub(crate) fn resolve(&self, key: &ObjectKey, parts: &ObjectParts) -> ObjectState {
        if let Some(tombstone) = parts.live_tombstone() {
            return ObjectState::Deleted(tombstone.timestamp().clone());
        }
        let data = match &parts.data {
            Some(data) => data,
            None => return ObjectState::Missing,
        };

        let object = match data.needle {
            Some(needle) => Object::Small(needle),
            None => Object::Large(self.large_path(key, PartType::Data, data.timestamp())),
        };
        let meta_update = parts.live_meta().map(|m| m.meta.clone());
        let mut meta = data.meta.clone();
        if let Some(update) = &meta_update {
            meta.apply_update(update);
        }

        ObjectState::Exists(LoadedObject {
            key: key.clone(),
            object,
            data_meta: data.meta.clone(),
            meta_update,
            meta,
        })
    }

    // -------------------------------------------------------------------------
    // Reclamation
    // -------------------------------------------------------------------------

    /// Queue release of the bytes held by superseded rows
    pub(crate) fn reclaim(&self, key: &ObjectKey, part: PartType, record: &IndexRecord) {
        match record.needle {
            Some(needle) => match self.bundle(key.partition) {
                Ok(bundle) => self.tasks.submit(Task::PunchHole {
                    bundle,
                    offset: needle.offset,
                    len: needle.size,
                }),
                Err(e) => {
                    tracing::warn!(key = %key, error = %e, "cannot open bundle to reclaim needle");
                }
            },
            None => self.tasks.submit(Task::RemoveFile {
                path: self.large_path(key, part, record.timestamp()),
            }),
        }
    }

    /// Delete index rows, ignoring parts that are not stored
    pub(crate) fn clear_rows(
        &self,
        key: &ObjectKey,
        parts: &ObjectParts,
        which: &[PartType],
    ) -> Result<()> {
        for &part in which {
            let present = match part {
                PartType::Data => parts.data.is_some(),
                PartType::Meta => parts.meta.is_some(),
                PartType::Tombstone => parts.tombstone.is_some(),
            };
            if present {
                self.index.delete(&key.index_key(part))?;
            }
        }
        Ok(())
    }

    /// Synchronously record that `key`'s suffix hash is stale
    pub(crate) fn invalidate_suffix(&self, key: &ObjectKey) -> Result<()> {
        tasks::append_invalidation(
            &self.hash_lock,
            &self.invalid_path(key.partition),
            &key.suffix,
        )
    }

    pub(crate) fn invalidate_suffix_async(&self, key: &ObjectKey) {
        self.tasks.submit(Task::InvalidateSuffix {
            lock: Arc::clone(&self.hash_lock),
            invalid_path: self.invalid_path(key.partition),
            suffix: key.suffix.clone(),
        });
    }
}

impl Drop for PackDevice {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            tracing::error!(device = %self.device, error = %e, "error closing pack device");
        }
    }
}
