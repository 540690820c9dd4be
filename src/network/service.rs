//! Device Service
//!
//! The operations daemons run against an object server's devices.
//! [`LocalService`] executes them in-process; [`super::RpcClient`] forwards
//! them to a server's localhost RPC port.

use std::collections::BTreeMap;
use std::io::Read;
use std::sync::Arc;
use std::time::Duration;

use crate::audit::{audit_partition, AuditQuota, AuditStats};
use crate::cancel::CancelToken;
use crate::config::Config;
use crate::device::{HashesResult, ObjectReader, ObjectState, PackDevice, PackDeviceMgr};
use crate::error::{PackError, Result};
use crate::object::{ObjectKey, ObjectMeta, Timestamp};
use crate::protocol::{DeviceTarget, HashesRequest};
use crate::replicator::{sync_partition, Node, ObjectTimestamps, SyncResult, WantedParts};

/// Device operations used by the auditor and replicator
pub trait DeviceService: Send + Sync {
    fn list_partitions(&self, target: &DeviceTarget) -> Result<Vec<u32>>;

    fn list_partition_suffixes(&self, target: &DeviceTarget, partition: u32)
        -> Result<Vec<String>>;

    fn audit_partition(
        &self,
        target: &DeviceTarget,
        partition: u32,
        quota: AuditQuota,
    ) -> Result<AuditStats>;

    fn get_hashes(
        &self,
        target: &DeviceTarget,
        partition: u32,
        request: &HashesRequest,
    ) -> Result<HashesResult>;

    fn sync(
        &self,
        target: &DeviceTarget,
        partition: u32,
        peer: &Node,
        suffixes: &[String],
    ) -> Result<SyncResult>;

    fn delete_handoff(&self, target: &DeviceTarget, partition: u32) -> Result<()>;
}

/// Executes device operations against this node's devices
pub struct LocalService {
    mgr: Arc<PackDeviceMgr>,
    reclaim_age: Duration,
    node_timeout: Duration,
    cancel: CancelToken,
}

impl LocalService {
    pub fn new(mgr: Arc<PackDeviceMgr>, config: &Config, cancel: CancelToken) -> Self {
        Self {
            mgr,
            reclaim_age: Duration::from_secs(config.replicator.reclaim_age_secs),
            node_timeout: Duration::from_millis(config.replicator.node_timeout_ms),
            cancel,
        }
    }

    pub fn mgr(&self) -> &Arc<PackDeviceMgr> {
        &self.mgr
    }

    pub fn cancel_token(&self) -> &CancelToken {
        &self.cancel
    }

    fn device(&self, target: &DeviceTarget) -> Result<Arc<PackDevice>> {
        self.mgr.get(&target.device, target.policy)
    }

    // -------------------------------------------------------------------------
    // Peer Surface
    // -------------------------------------------------------------------------

    /// Suffix digests for a peer, recalculating `recalculate` first
    pub fn replicate(
        &self,
        target: &DeviceTarget,
        partition: u32,
        recalculate: &[String],
    ) -> Result<BTreeMap<String, String>> {
        let device = self.device(target)?;
        Ok(device
            .get_hashes(partition, self.reclaim_age, false, recalculate)?
            .hashes)
    }

    pub fn diff(
        &self,
        target: &DeviceTarget,
        partition: u32,
        offered: &BTreeMap<String, ObjectTimestamps>,
    ) -> Result<BTreeMap<String, WantedParts>> {
        self.device(target)?.diff_replica(partition, offered)
    }

    pub fn put_object(
        &self,
        target: &DeviceTarget,
        partition: u32,
        hash: &str,
        meta: ObjectMeta,
        content_length: u64,
        body: &mut dyn Read,
    ) -> Result<()> {
        let device = self.device(target)?;
        let key = ObjectKey::from_hash(partition, hash)?;
        device.put_object(&key, meta, content_length, body, &self.cancel)
    }

    pub fn post_object(
        &self,
        target: &DeviceTarget,
        partition: u32,
        hash: &str,
        meta: ObjectMeta,
    ) -> Result<()> {
        let key = ObjectKey::from_hash(partition, hash)?;
        self.device(target)?.commit_meta(&key, meta)
    }

    pub fn delete_object(
        &self,
        target: &DeviceTarget,
        partition: u32,
        hash: &str,
        name: &str,
        timestamp: Timestamp,
    ) -> Result<()> {
        let key = ObjectKey::from_hash(partition, hash)?;
        self.device(target)?.delete(&key, name, timestamp)
    }

    /// Merged metadata and a data reader for an existing object
    pub fn open_object(
        &self,
        target: &DeviceTarget,
        partition: u32,
        hash: &str,
    ) -> Result<(ObjectMeta, ObjectReader)> {
        let device = self.device(target)?;
        let key = ObjectKey::from_hash(partition, hash)?;
        match device.load_object_meta(&key)? {
            ObjectState::Exists(object) => {
                let reader = device.open_reader(&object)?;
                Ok((object.meta, reader))
            }
            ObjectState::Deleted(ts) => Err(PackError::NotFound(format!("{} deleted at {}", key, ts))),
            ObjectState::Missing => Err(PackError::NotFound(key.to_string())),
        }
    }
}

impl DeviceService for LocalService {
    fn list_partitions(&self, target: &DeviceTarget) -> Result<Vec<u32>> {
        self.device(target)?.list_partitions()
    }

    fn list_partition_suffixes(
        &self,
        target: &DeviceTarget,
        partition: u32,
    ) -> Result<Vec<String>> {
        self.device(target)?.list_partition_suffixes(partition)
    }

    fn audit_partition(
        &self,
        target: &DeviceTarget,
        partition: u32,
        quota: AuditQuota,
    ) -> Result<AuditStats> {
        let device = self.device(target)?;
        audit_partition(&device, partition, quota, &self.cancel)
    }

    fn get_hashes(
        &self,
        target: &DeviceTarget,
        partition: u32,
        request: &HashesRequest,
    ) -> Result<HashesResult> {
        self.device(target)?.get_hashes(
            partition,
            Duration::from_secs(request.reclaim_age_secs),
            request.list_dir,
            &request.recalculate,
        )
    }

    fn sync(
        &self,
        target: &DeviceTarget,
        partition: u32,
        peer: &Node,
        suffixes: &[String],
    ) -> Result<SyncResult> {
        let device = self.device(target)?;
        sync_partition(&device, partition, peer, suffixes, self.node_timeout, &self.cancel)
    }

    fn delete_handoff(&self, target: &DeviceTarget, partition: u32) -> Result<()> {
        self.device(target)?.delete_handoff(partition)
    }
}
