use std::sync::Arc;
use std::time::Duration;

use crate::cancel::CancelToken;
use crate::config::AuditorConfig;
use crate::network::DeviceService;
use crate::protocol::DeviceTarget;
use crate::replicator::sleep_unless_cancelled;

use super::{AuditQuota, AuditStats};

/// Audit daemon walking every partition of a set of devices
pub struct Auditor {
    service: Arc<dyn DeviceService>,
    targets: Vec<DeviceTarget>,
    config: AuditorConfig,
    cancel: CancelToken,
}

impl Auditor {
    pub fn new(
        service: Arc<dyn DeviceService>,
        targets: Vec<DeviceTarget>,
        config: AuditorConfig,
        cancel: CancelToken,
    ) -> Self {
        Self {
            service,
            targets,
            config,
            cancel,
        }
    }

    fn quota(&self) -> AuditQuota {
        AuditQuota {
            files_per_second: self.config.files_per_second,
            bytes_per_second: self.config.bytes_per_second,
        }
    }

    /// Audit every partition of every target once
    ///
    /// A failed partition counts one error and the pass moves on.
    pub fn run_once(&self) -> AuditStats {
        let mut total = AuditStats::default();
        for target in &self.targets {
            let partitions = match self.service.list_partitions(target) {
                Ok(partitions) => partitions,
                Err(e) => {
                    tracing::warn!(device = %target, error = %e, "skipping device");
                    continue;
                }
            };
            for partition in partitions {
                if self.cancel.is_cancelled() {
                    return total;
                }
                match self.service.audit_partition(target, partition, self.quota()) {
                    Ok(stats) => total += stats,
                    Err(e) => {
                        tracing::error!(device = %target, partition, error = %e, "partition audit failed");
                        total.errors += 1;
                    }
                }
            }
        }

        tracing::info!(
            files = total.processed_files,
            bytes = total.processed_bytes,
            errors = total.errors,
            quarantines = total.quarantines,
            "audit pass complete"
        );
        total
    }

    /// Run passes every `interval_secs` until cancelled
    pub fn run_forever(&self) {
        let interval = Duration::from_secs(self.config.interval_secs);
        while !self.cancel.is_cancelled() {
            self.run_once();
            sleep_unless_cancelled(interval, &self.cancel);
        }
    }
}
