//! Replicator
//!
//! Background daemon keeping every replica of every local partition in
//! step. For each partition it compares suffix hashes with each peer, pushes
//! differing suffixes through the local object server's Sync RPC, and
//! removes handoff partitions once every primary has them.

pub mod diff;
mod ring;
mod sync;

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use rand::seq::SliceRandom;

use crate::cancel::CancelToken;
use crate::config::ReplicatorConfig;
use crate::error::{PackError, Result};
use crate::network::{DeviceService, PeerClient};
use crate::protocol::{DeviceTarget, HashesRequest};

pub use diff::{wanted_parts, ObjectTimestamps, WantedParts};
pub use ring::{Node, Ring, StaticRing};
pub use sync::{sync_partition, SyncResult};

/// Counters from one replication pass
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReplicationStats {
    pub partitions: u64,
    /// Peer syncs that completed
    pub synced: u64,
    /// Peer syncs or partitions that failed
    pub failures: u64,
    pub handoffs_removed: u64,
}

#[derive(Debug, Default)]
struct PartitionReport {
    synced: u64,
    failed: u64,
    handoff_removed: bool,
}

/// Replication daemon for the local devices of one policy
pub struct Replicator {
    service: Arc<dyn DeviceService>,
    ring: Arc<dyn Ring>,
    local_devices: Vec<Node>,
    policy: u32,
    config: ReplicatorConfig,
    cancel: CancelToken,
}

impl Replicator {
    pub fn new(
        service: Arc<dyn DeviceService>,
        ring: Arc<dyn Ring>,
        local_devices: Vec<Node>,
        policy: u32,
        config: ReplicatorConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            service,
            ring,
            local_devices,
            policy,
            config,
            cancel,
        }
    }

    fn node_timeout(&self) -> Duration {
        Duration::from_millis(self.config.node_timeout_ms)
    }

    fn hashes_request(&self, recalculate: Vec<String>) -> HashesRequest {
        HashesRequest {
            reclaim_age_secs: self.config.reclaim_age_secs,
            list_dir: false,
            recalculate,
        }
    }

    /// Replicate every local partition once, in random order
    pub fn run_once(&self) -> ReplicationStats {
        let mut jobs = Vec::new();
        for local in &self.local_devices {
            let target = DeviceTarget::new(local.device.clone(), self.policy);
            match self.service.list_partitions(&target) {
                Ok(partitions) => jobs.extend(partitions.into_iter().map(|p| (local.clone(), p))),
                Err(e) => tracing::warn!(device = %target, error = %e, "cannot list partitions"),
            }
        }
        jobs.shuffle(&mut rand::thread_rng());

        let (sender, receiver) = crossbeam::channel::unbounded();
        for job in jobs {
            let _ = sender.send(job);
        }
        drop(sender);

        let stats = Mutex::new(ReplicationStats::default());
        let workers = self.config.concurrency.max(1);
        let scoped = crossbeam::thread::scope(|scope| {
            for _ in 0..workers {
                let receiver = receiver.clone();
                let stats = &stats;
                scope.spawn(move |_| {
                    for (local, partition) in receiver.iter() {
                        if self.cancel.is_cancelled() {
                            break;
                        }
                        let outcome = self.replicate_partition(&local, partition);
                        let mut stats = stats.lock();
                        stats.partitions += 1;
                        match outcome {
                            Ok(report) => {
                                stats.synced += report.synced;
                                stats.failures += report.failed;
                                stats.handoffs_removed += u64::from(report.handoff_removed);
                            }
                            Err(e) => {
                                tracing::warn!(device = %local.device, partition, error = %e, "partition replication failed");
                                stats.failures += 1;
                            }
                        }
                    }
                });
            }
        });
        if scoped.is_err() {
            tracing::error!("replication worker panicked");
        }

        let stats = stats.into_inner();
        tracing::info!(
            policy = self.policy,
            partitions = stats.partitions,
            synced = stats.synced,
            failures = stats.failures,
            handoffs_removed = stats.handoffs_removed,
            "replication pass complete"
        );
        stats
    }

    /// Run passes every `interval_secs` until cancelled
    pub fn run_forever(&self) {
        let interval = Duration::from_secs(self.config.interval_secs);
        while !self.cancel.is_cancelled() {
            self.run_once();
            sleep_unless_cancelled(interval, &self.cancel);
        }
    }

    fn replicate_partition(&self, local: &Node, partition: u32) -> Result<PartitionReport> {
        let target = DeviceTarget::new(local.device.clone(), self.policy);
        let (nodes, handoff) = self.ring.get_job_nodes(partition, local.id);
        let local_hashes = self
            .service
            .get_hashes(&target, partition, &self.hashes_request(Vec::new()))?
            .hashes;

        let required = nodes.len();
        let spares: Vec<Node> = self
            .ring
            .get_more_nodes(partition)
            .into_iter()
            .filter(|n| n.id != local.id && !nodes.contains(n))
            .collect();
        let mut spares = spares.into_iter();
        let mut queue: VecDeque<Node> = nodes.into();
        let mut report = PartitionReport::default();

        while let Some(node) = queue.pop_front() {
            self.cancel.check()?;
            match self.sync_node(&target, partition, &node, &local_hashes) {
                Ok(()) => report.synced += 1,
                Err(PackError::Unmounted(_)) => {
                    // An unmounted peer does not use up an attempt
                    match spares.next() {
                        Some(spare) => {
                            tracing::debug!(peer = %node, spare = %spare, partition, "peer unmounted, trying handoff");
                            queue.push_back(spare);
                        }
                        None => report.failed += 1,
                    }
                }
                Err(e) => {
                    tracing::warn!(peer = %node, partition, error = %e, "sync failed");
                    report.failed += 1;
                }
            }
        }

        if handoff && required > 0 && report.failed == 0 && report.synced as usize >= required {
            match self.service.delete_handoff(&target, partition) {
                Ok(()) => report.handoff_removed = true,
                Err(PackError::Race(reason)) => {
                    tracing::info!(device = %target, partition, reason, "handoff changed, keeping it");
                }
                Err(e) => {
                    tracing::warn!(device = %target, partition, error = %e, "handoff removal failed");
                }
            }
        }
        Ok(report)
    }

    /// Bring one peer's copy of `partition` up to date
    fn sync_node(
        &self,
        target: &DeviceTarget,
        partition: u32,
        node: &Node,
        local_hashes: &BTreeMap<String, String>,
    ) -> Result<()> {
        let peer_target = DeviceTarget::new(node.device.clone(), self.policy);
        let remote = PeerClient::connect(node, self.node_timeout())?.replicate(
            &peer_target,
            partition,
            Vec::new(),
        )?;

        let differing: Vec<String> = local_hashes
            .iter()
            .filter(|(suffix, digest)| remote.get(*suffix) != Some(*digest))
            .map(|(suffix, _)| suffix.clone())
            .collect();
        if differing.is_empty() {
            return Ok(());
        }

        // The local cache may be stale for exactly these suffixes
        let recalculated = self
            .service
            .get_hashes(target, partition, &self.hashes_request(differing.clone()))?
            .hashes;
        let suffixes: Vec<String> = differing
            .into_iter()
            .filter(|s| recalculated.get(s).map_or(false, |d| remote.get(s) != Some(d)))
            .collect();
        if suffixes.is_empty() {
            return Ok(());
        }

        let result = self.service.sync(target, partition, node, &suffixes)?;
        if !result.success {
            return Err(PackError::Network(format!(
                "incomplete sync of partition {} to {}",
                partition, node
            )));
        }

        PeerClient::connect(node, self.node_timeout())?.replicate(&peer_target, partition, suffixes)?;
        tracing::debug!(peer = %node, partition, pushed = result.candidates.len(), "peer updated");
        Ok(())
    }
}

/// Sleep for `duration` in short steps, returning early on cancellation
pub(crate) fn sleep_unless_cancelled(duration: Duration, cancel: &CancelToken) {
    let step = Duration::from_millis(100);
    let mut slept = Duration::ZERO;
    while slept < duration && !cancel.is_cancelled() {
        let nap = step.min(duration - slept);
        std::thread::sleep(nap);
        slept += nap;
    }
}
