use std::fs;
use std::path::PathBuf;

use crate::error::Result;
use crate::object::{IndexRecord, ObjectKey, PartType};

use super::PackDevice;

impl PackDevice {
    /// Move a corrupt object out of service
    ///
    /// The DATA and META rows are cleared first so the object reads as
    /// missing and gets re-replicated. A large object's hashed directory is
    /// moved under the quarantine area; the removed rows are kept next to
    /// it as `data.json` / `meta.json`.
    pub fn quarantine(&self, key: &ObjectKey) -> Result<PathBuf> {
        let _op = self.begin_op()?;
        let _lock = self.lock_object(key);
        let _writes = self.partition_write(key.partition);

        let parts = self.load_parts(key)?;
        self.clear_rows(key, &parts, &[PartType::Data, PartType::Meta])?;

        fs::create_dir_all(self.quarantine_dir())?;
        let mut target = self.quarantine_dir().join(&key.hash);
        if target.exists() {
            target = self
                .quarantine_dir()
                .join(format!("{}-{:016x}", key.hash, rand::random::<u64>()));
        }

        let hashed = self.hashed_dir(key);
        let large = parts.data.as_ref().map_or(false, |d| !d.is_small());
        if large && hashed.is_dir() {
            fs::rename(&hashed, &target)?;
        } else {
            fs::create_dir_all(&target)?;
        }

        write_sidecar(&target, "data.json", parts.data.as_ref())?;
        write_sidecar(&target, "meta.json", parts.meta.as_ref())?;

        self.invalidate_suffix_async(key);
        tracing::warn!(
            device = %self.device(),
            key = %key,
            path = %target.display(),
            "quarantined object"
        );
        Ok(target)
    }
}

fn write_sidecar(dir: &std::path::Path, name: &str, record: Option<&IndexRecord>) -> Result<()> {
    if let Some(record) = record {
        fs::write(dir.join(name), serde_json::to_vec_pretty(record)?)?;
    }
    Ok(())
}
