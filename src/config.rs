//! Configuration for packstore
//!
//! Centralized configuration with sensible defaults.

use std::path::PathBuf;

/// Main configuration for a packstore object server
#[derive(Debug, Clone)]
pub struct Config {
    // -------------------------------------------------------------------------
    // Storage Configuration
    // -------------------------------------------------------------------------
    /// Root directory holding one directory per device.
    /// Internal structure:
    ///   {devices_root}/{device}/
    ///     ├── objects[-{policy}]/      (bundles, large-object dirs, hash caches)
    ///     ├── pack-meta[-{policy}]/    (metadata index)
    ///     └── quarantined/objects[-{policy}]/
    pub devices_root: PathBuf,

    /// Only serve devices that are real mount points
    pub mount_check: bool,

    /// Storage policy indexes served by this node
    pub policies: Vec<u32>,

    /// Mixed into every object key so keys are not guessable
    pub hash_path_prefix: String,
    pub hash_path_suffix: String,

    /// Threads per device draining deferred reclamation work
    pub background_workers: usize,

    // -------------------------------------------------------------------------
    // Metadata Index Configuration
    // -------------------------------------------------------------------------
    pub index: IndexConfig,

    // -------------------------------------------------------------------------
    // Network Configuration
    // -------------------------------------------------------------------------
    /// Peer-facing listen address
    pub listen_addr: String,

    /// Localhost RPC address used by the daemons
    pub rpc_addr: String,

    /// Max concurrent client connections
    pub max_connections: usize,

    /// Connection read timeout (milliseconds)
    pub read_timeout_ms: u64,

    /// Connection write timeout (milliseconds)
    pub write_timeout_ms: u64,

    // -------------------------------------------------------------------------
    // Daemon Configuration
    // -------------------------------------------------------------------------
    pub auditor: AuditorConfig,

    pub replicator: ReplicatorConfig,
}

/// Metadata index tuning
#[derive(Debug, Clone)]
pub struct IndexConfig {
    /// Sync strategy: how often to fsync the index WAL
    pub wal_sync_strategy: WalSyncStrategy,

    /// Max size of memtable before flush (in bytes)
    pub memtable_size_limit: usize,

    /// Number of SSTables that triggers a full compaction
    pub max_sstables: usize,
}

/// WAL sync strategy
#[derive(Debug, Clone, Copy)]
pub enum WalSyncStrategy {
    /// fsync after every write (safest, slowest)
    EveryWrite,

    /// fsync after N uncommitted entries (balanced durability/performance)
    EveryNEntries { count: usize },
}

/// Auditor quotas and pacing
#[derive(Debug, Clone)]
pub struct AuditorConfig {
    pub files_per_second: f64,
    pub bytes_per_second: f64,
    /// Pause between full passes
    pub interval_secs: u64,
}

/// Replicator pacing
#[derive(Debug, Clone)]
pub struct ReplicatorConfig {
    /// Partitions replicated in parallel
    pub concurrency: usize,
    /// Pause between full passes
    pub interval_secs: u64,
    /// Tombstones older than this are reclaimed while hashing
    pub reclaim_age_secs: u64,
    /// Timeout for each peer call (milliseconds)
    pub node_timeout_ms: u64,
}

impl Default for IndexConfig {
    fn default() -> Self {
        Self {
            wal_sync_strategy: WalSyncStrategy::EveryWrite,
            memtable_size_limit: 4 * 1024 * 1024, // 4 MB
            max_sstables: 8,
        }
    }
}

impl Default for AuditorConfig {
    fn default() -> Self {
        Self {
            files_per_second: 20.0,
            bytes_per_second: 10.0 * 1024.0 * 1024.0,
            interval_secs: 30,
        }
    }
}

impl Default for ReplicatorConfig {
    fn default() -> Self {
        Self {
            concurrency: 4,
            interval_secs: 30,
            reclaim_age_secs: 7 * 24 * 3600, // one week
            node_timeout_ms: 10_000,
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            devices_root: PathBuf::from("/srv/node"),
            mount_check: true,
            policies: vec![0],
            hash_path_prefix: String::new(),
            hash_path_suffix: "changeme".to_string(),
            background_workers: 2,
            index: IndexConfig::default(),
            listen_addr: "0.0.0.0:6200".to_string(),
            rpc_addr: "127.0.0.1:6201".to_string(),
            max_connections: 256,
            read_timeout_ms: 30_000,
            write_timeout_ms: 30_000,
            auditor: AuditorConfig::default(),
            replicator: ReplicatorConfig::default(),
        }
    }
}

impl Config {
    /// Create a new config builder
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }
}

/// Builder for Config
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
}

impl ConfigBuilder {
    /// Set the directory holding the device mounts
    pub fn devices_root(mut self, path: impl Into<PathBuf>) -> Self {
        self.config.devices_root = path.into();
        self
    }

    /// Require devices to be mount points
    pub fn mount_check(mut self, enabled: bool) -> Self {
        self.config.mount_check = enabled;
        self
    }

    /// Set the storage policies served by this node
    pub fn policies(mut self, policies: Vec<u32>) -> Self {
        self.config.policies = policies;
        self
    }

    /// Set the hash path prefix/suffix secrets
    pub fn hash_path(mut self, prefix: impl Into<String>, suffix: impl Into<String>) -> Self {
        self.config.hash_path_prefix = prefix.into();
        self.config.hash_path_suffix = suffix.into();
        self
    }

    pub fn background_workers(mut self, count: usize) -> Self {
        self.config.background_workers = count.max(1);
        self
    }

    /// Set the index WAL sync strategy
    pub fn wal_sync_strategy(mut self, strategy: WalSyncStrategy) -> Self {
        self.config.index.wal_sync_strategy = strategy;
        self
    }

    /// Set the memtable size limit (in bytes)
    pub fn memtable_size_limit(mut self, size: usize) -> Self {
        self.config.index.memtable_size_limit = size;
        self
    }

    /// Set the SSTable count that triggers compaction
    pub fn max_sstables(mut self, count: usize) -> Self {
        self.config.index.max_sstables = count.max(2);
        self
    }

    /// Set the peer listen address
    pub fn listen_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.listen_addr = addr.into();
        self
    }

    /// Set the localhost RPC address
    pub fn rpc_addr(mut self, addr: impl Into<String>) -> Self {
        self.config.rpc_addr = addr.into();
        self
    }

    /// Set the maximum number of concurrent connections
    pub fn max_connections(mut self, count: usize) -> Self {
        self.config.max_connections = count;
        self
    }

    /// Set the read timeout (in milliseconds)
    pub fn read_timeout_ms(mut self, ms: u64) -> Self {
        self.config.read_timeout_ms = ms;
        self
    }

    /// Set the write timeout (in milliseconds)
    pub fn write_timeout_ms(mut self, ms: u64) -> Self {
        self.config.write_timeout_ms = ms;
        self
    }

    /// Set the auditor quotas
    pub fn audit_quota(mut self, files_per_second: f64, bytes_per_second: f64) -> Self {
        self.config.auditor.files_per_second = files_per_second;
        self.config.auditor.bytes_per_second = bytes_per_second;
        self
    }

    pub fn audit_interval_secs(mut self, secs: u64) -> Self {
        self.config.auditor.interval_secs = secs;
        self
    }

    /// Set the number of partitions replicated in parallel
    pub fn replicator_concurrency(mut self, count: usize) -> Self {
        self.config.replicator.concurrency = count.max(1);
        self
    }

    pub fn replicator_interval_secs(mut self, secs: u64) -> Self {
        self.config.replicator.interval_secs = secs;
        self
    }

    /// Set the tombstone reclaim age (in seconds)
    pub fn reclaim_age_secs(mut self, secs: u64) -> Self {
        self.config.replicator.reclaim_age_secs = secs;
        self
    }

    pub fn node_timeout_ms(mut self, ms: u64) -> Self {
        self.config.replicator.node_timeout_ms = ms;
        self
    }

    pub fn build(self) -> Config {
        self.config
    }
}
