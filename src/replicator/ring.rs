//! Ring
//!
//! Partition placement as the replicator consumes it. The consistent-hashing
//! ring itself is an external collaborator; [`StaticRing`] is a fixed
//! round-robin placement for single-cluster deployments and tests.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};

/// One device of one object server
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Node {
    /// Unique across the ring
    pub id: u32,
    pub ip: String,
    /// Peer-surface port of the node's object server
    pub port: u16,
    pub device: String,
}

impl Node {
    pub fn addr(&self) -> String {
        format!("{}:{}", self.ip, self.port)
    }
}

impl std::fmt::Display for Node {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}/{}", self.ip, self.port, self.device)
    }
}

/// Placement queries used by replication
pub trait Ring: Send + Sync {
    fn replica_count(&self) -> usize;

    fn partition_count(&self) -> u32;

    /// Primary nodes of `partition`
    fn get_nodes(&self, partition: u32) -> Vec<Node>;

    /// Handoff candidates for `partition`, in preference order
    fn get_more_nodes(&self, partition: u32) -> Vec<Node>;

    /// Devices of the object server at `ip:port`
    fn local_devices(&self, ip: &str, port: u16) -> Vec<Node>;

    /// Nodes a local device must sync `partition` to, and whether the local
    /// device holds it only as a handoff
    fn get_job_nodes(&self, partition: u32, local_id: u32) -> (Vec<Node>, bool) {
        let nodes = self.get_nodes(partition);
        if nodes.iter().any(|n| n.id == local_id) {
            (nodes.into_iter().filter(|n| n.id != local_id).collect(), false)
        } else {
            (nodes, true)
        }
    }
}

/// Round-robin placement: replica `r` of partition `p` lives on
/// `devices[(p + r) % devices.len()]`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StaticRing {
    pub partitions: u32,
    pub replicas: usize,
    pub devices: Vec<Node>,
}

impl StaticRing {
    pub fn new(partitions: u32, replicas: usize, devices: Vec<Node>) -> Result<Self> {
        let ring = Self {
            partitions,
            replicas,
            devices,
        };
        ring.validate()?;
        Ok(ring)
    }

    /// Load a ring description from a JSON file
    pub fn load(path: &Path) -> Result<Self> {
        let ring: StaticRing = serde_json::from_slice(&fs::read(path)?)?;
        ring.validate()?;
        Ok(ring)
    }

    fn validate(&self) -> Result<()> {
        if self.partitions == 0 {
            return Err(PackError::Config("ring has no partitions".to_string()));
        }
        if self.replicas == 0 || self.replicas > self.devices.len() {
            return Err(PackError::Config(format!(
                "ring needs between 1 and {} replicas, got {}",
                self.devices.len(),
                self.replicas
            )));
        }
        let mut ids: Vec<u32> = self.devices.iter().map(|d| d.id).collect();
        ids.sort_unstable();
        ids.dedup();
        if ids.len() != self.devices.len() {
            return Err(PackError::Config("duplicate device ids in ring".to_string()));
        }
        Ok(())
    }

    fn device_at(&self, partition: u32, slot: usize) -> Node {
        let n = self.devices.len();
        self.devices[(partition as usize + slot) % n].clone()
    }
}

impl Ring for StaticRing {
    fn replica_count(&self) -> usize {
        self.replicas
    }

    fn partition_count(&self) -> u32 {
        self.partitions
    }

    fn get_nodes(&self, partition: u32) -> Vec<Node> {
        (0..self.replicas)
            .map(|r| self.device_at(partition, r))
            .collect()
    }

    fn get_more_nodes(&self, partition: u32) -> Vec<Node> {
        (self.replicas..self.devices.len())
            .map(|slot| self.device_at(partition, slot))
            .collect()
    }

    fn local_devices(&self, ip: &str, port: u16) -> Vec<Node> {
        self.devices
            .iter()
            .filter(|d| d.ip == ip && d.port == port)
            .cloned()
            .collect()
    }
}
