//! Sync sender
//!
//! Pushes the objects of some suffixes of a local partition to one peer:
//! offer every object's timestamps, then send whatever parts the peer says
//! it is missing.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::cancel::CancelToken;
use crate::device::{ObjectState, PackDevice};
use crate::error::{PackError, Result};
use crate::network::PeerClient;
use crate::object::{ObjectKey, Timestamp};
use crate::protocol::DeviceTarget;

use super::diff::{ObjectTimestamps, WantedParts};
use super::ring::Node;

/// Outcome of one sync
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SyncResult {
    /// Every wanted object reached the peer
    pub success: bool,
    /// Objects pushed, with the timestamp that was sent
    pub candidates: BTreeMap<String, Timestamp>,
}

/// Push `suffixes` of `partition` from `device` to `peer`
pub fn sync_partition(
    device: &PackDevice,
    partition: u32,
    peer: &Node,
    suffixes: &[String],
    timeout: Duration,
    cancel: &CancelToken,
) -> Result<SyncResult> {
    let offered = device.list_suffix_objects(partition, suffixes)?;
    if offered.is_empty() {
        return Ok(SyncResult {
            success: true,
            candidates: BTreeMap::new(),
        });
    }

    let target = DeviceTarget::new(peer.device.clone(), device.policy());
    let mut client = PeerClient::connect(peer, timeout)?;
    let wanted = client.diff(&target, partition, offered.clone())?;

    let mut result = SyncResult {
        success: true,
        candidates: BTreeMap::new(),
    };
    for (hash, want) in wanted {
        cancel.check()?;
        let offer = match offered.get(&hash) {
            Some(offer) => offer,
            None => continue,
        };
        match push_object(device, &mut client, &target, partition, &hash, offer, want, cancel) {
            Ok(Some(timestamp)) => {
                result.candidates.insert(hash, timestamp);
            }
            Ok(None) => {}
            Err(PackError::Conflict(_)) => {
                tracing::debug!(peer = %peer, hash, "peer already holds a newer version");
            }
            Err(PackError::Cancelled) => return Err(PackError::Cancelled),
            Err(e) => {
                tracing::warn!(peer = %peer, partition, hash, error = %e, "failed to push object");
                result.success = false;
                if e.is_device_fault() || matches!(e, PackError::Network(_)) {
                    // The connection may be mid-body; stop using it
                    break;
                }
            }
        }
    }

    tracing::debug!(
        device = %device.device(),
        partition,
        peer = %peer,
        pushed = result.candidates.len(),
        success = result.success,
        "synced partition"
    );
    Ok(result)
}

/// Send the parts of one object the peer wants; `None` if it vanished
#[allow(clippy::too_many_arguments)]
fn push_object(
    device: &PackDevice,
    client: &mut PeerClient,
    target: &DeviceTarget,
    partition: u32,
    hash: &str,
    offer: &ObjectTimestamps,
    want: WantedParts,
    cancel: &CancelToken,
) -> Result<Option<Timestamp>> {
    let key = ObjectKey::from_hash(partition, hash)?;
    match device.load_object_meta(&key)? {
        ObjectState::Deleted(timestamp) => {
            if want.data {
                client.delete_object(target, partition, hash, &offer.name, &timestamp)?;
            }
            Ok(Some(timestamp))
        }
        ObjectState::Exists(object) => {
            if want.data {
                let mut reader = device.open_reader(&object)?;
                client.put_object(
                    target,
                    partition,
                    hash,
                    object.data_meta.clone(),
                    object.size(),
                    &mut reader,
                    cancel,
                )?;
            }
            if want.meta {
                if let Some(update) = &object.meta_update {
                    client.post_object(target, partition, hash, update.clone())?;
                }
            }
            Ok(Some(object.data_timestamp().clone()))
        }
        ObjectState::Missing => Ok(None),
    }
}
