//! Pack Device Manager
//!
//! Owns every open (device, policy) pair of a node. Devices come and go with
//! their mounts: `refresh` opens newly mounted devices and closes ones whose
//! mount disappeared.

use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::path::Path;
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

use parking_lot::{Mutex, RwLock};

use crate::cancel::CancelToken;
use crate::config::Config;
use crate::error::{PackError, Result};

use super::PackDevice;

/// Registry of open pack devices
pub struct PackDeviceMgr {
    config: Config,
    devices: RwLock<HashMap<(String, u32), Arc<PackDevice>>>,
    /// One refresh at a time, so a device is never opened twice
    refresh_lock: Mutex<()>,
}

impl PackDeviceMgr {
    /// Open every mounted device under the devices root
    pub fn open(config: Config) -> Result<Self> {
        if config.policies.is_empty() {
            return Err(PackError::Config("no storage policies configured".to_string()));
        }
        fs::create_dir_all(&config.devices_root)?;

        let mgr = Self {
            config,
            devices: RwLock::new(HashMap::new()),
            refresh_lock: Mutex::new(()),
        };
        mgr.refresh()?;
        Ok(mgr)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Reconcile open devices with what is mounted now
    pub fn refresh(&self) -> Result<()> {
        let mut present = Vec::new();
        for entry in fs::read_dir(&self.config.devices_root)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let name = match entry.file_name().into_string() {
                Ok(name) => name,
                Err(_) => continue,
            };
            if self.is_mounted(&entry.path()) {
                present.push(name);
            }
        }

        let _refresh = self.refresh_lock.lock();

        // Map lock is held only to swap entries, never across close or open
        let gone: Vec<((String, u32), Arc<PackDevice>)> = {
            let mut devices = self.devices.write();
            let ids: Vec<(String, u32)> = devices
                .keys()
                .filter(|(device, _)| !present.contains(device))
                .cloned()
                .collect();
            ids.into_iter()
                .filter_map(|id| devices.remove(&id).map(|device| (id, device)))
                .collect()
        };
        for (id, device) in gone {
            tracing::warn!(device = %id.0, policy = id.1, "device no longer mounted, closing");
            if let Err(e) = device.close() {
                tracing::error!(device = %id.0, error = %e, "error closing device");
            }
        }

        let missing: Vec<(String, u32)> = {
            let devices = self.devices.read();
            present
                .iter()
                .flat_map(|name| self.config.policies.iter().map(move |&p| (name.clone(), p)))
                .filter(|id| !devices.contains_key(id))
                .collect()
        };
        for (name, policy) in missing {
            match PackDevice::open(&self.config, &name, policy) {
                Ok(device) => {
                    self.devices.write().insert((name, policy), Arc::new(device));
                }
                Err(e) => {
                    tracing::error!(device = %name, policy, error = %e, "failed to open device");
                }
            }
        }
        Ok(())
    }

    /// With mount checking on, a device must sit on a different filesystem
    /// than the devices root
    fn is_mounted(&self, path: &Path) -> bool {
        if !self.config.mount_check {
            return true;
        }
        match (fs::metadata(path), fs::metadata(&self.config.devices_root)) {
            (Ok(device), Ok(root)) => device.dev() != root.dev(),
            _ => false,
        }
    }

    /// The open device for (device, policy)
    ///
    /// `Unmounted` when the device directory exists but is not served,
    /// `NotFound` when there is no such device.
    pub fn get(&self, device: &str, policy: u32) -> Result<Arc<PackDevice>> {
        if let Some(found) = self.devices.read().get(&(device.to_string(), policy)) {
            return Ok(Arc::clone(found));
        }
        if !self.config.policies.contains(&policy) {
            return Err(PackError::NotFound(format!("policy {}", policy)));
        }
        if self.config.devices_root.join(device).is_dir() {
            Err(PackError::Unmounted(device.to_string()))
        } else {
            Err(PackError::NotFound(format!("device {}", device)))
        }
    }

    /// Every open device
    pub fn devices(&self) -> Vec<Arc<PackDevice>> {
        let mut devices: Vec<_> = self.devices.read().values().cloned().collect();
        devices.sort_by(|a, b| (a.device(), a.policy()).cmp(&(b.device(), b.policy())));
        devices
    }

    /// Close and forget one device, e.g. before an operator unmounts it
    pub fn close_device(&self, device: &str, policy: u32) -> Result<()> {
        let removed = self.devices.write().remove(&(device.to_string(), policy));
        match removed {
            Some(device) => device.close(),
            None => Ok(()),
        }
    }

    pub fn close_all(&self) -> Result<()> {
        let devices: Vec<_> = self.devices.write().drain().map(|(_, d)| d).collect();
        let mut first_error = None;
        for device in devices {
            if let Err(e) = device.close() {
                tracing::error!(device = %device.device(), error = %e, "error closing device");
                first_error.get_or_insert(e);
            }
        }
        first_error.map_or(Ok(()), Err)
    }

    /// Background thread calling `refresh` every `interval` until cancelled
    pub fn spawn_monitor(
        self: &Arc<Self>,
        interval: Duration,
        cancel: CancelToken,
    ) -> Result<JoinHandle<()>> {
        let mgr = Arc::clone(self);
        let handle = std::thread::Builder::new()
            .name("mount-monitor".to_string())
            .spawn(move || {
                let tick = Duration::from_millis(100).min(interval);
                let mut waited = Duration::ZERO;
                while !cancel.is_cancelled() {
                    std::thread::sleep(tick);
                    waited += tick;
                    if waited < interval {
                        continue;
                    }
                    waited = Duration::ZERO;
                    if let Err(e) = mgr.refresh() {
                        tracing::error!(error = %e, "device refresh failed");
                    }
                }
            })?;
        Ok(handle)
    }
}
