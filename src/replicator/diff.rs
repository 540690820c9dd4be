//! Replica diffing
//!
//! A sender offers the timestamps of every object in the suffixes it wants
//! to reconcile; the receiver answers with which parts it is missing.

use serde::{Deserialize, Serialize};

use crate::object::Timestamp;

/// Current timestamps of one object as seen by its holder
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ObjectTimestamps {
    pub name: String,
    /// Set when the object exists
    pub data: Option<Timestamp>,
    /// Set when a POST newer than the data applies
    pub meta: Option<Timestamp>,
    /// Set when the object is deleted
    pub tombstone: Option<Timestamp>,
}

impl ObjectTimestamps {
    /// Timestamp of whichever of data or tombstone defines the object
    pub fn state_timestamp(&self) -> Option<&Timestamp> {
        match (&self.data, &self.tombstone) {
            (Some(d), Some(t)) => Some(d.max(t)),
            (Some(d), None) => Some(d),
            (None, t) => t.as_ref(),
        }
    }
}

/// Parts a receiver asks the sender to push
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct WantedParts {
    pub data: bool,
    pub meta: bool,
}

impl WantedParts {
    pub fn any(&self) -> bool {
        self.data || self.meta
    }
}

/// What the local side wants given what it holds and what is offered
pub fn wanted_parts(local: Option<&ObjectTimestamps>, offered: &ObjectTimestamps) -> WantedParts {
    let offered_ts = match offered.state_timestamp() {
        Some(ts) => ts,
        None => return WantedParts::default(),
    };

    let local = match local {
        Some(local) => local,
        None => {
            return WantedParts {
                data: true,
                meta: offered.meta.is_some(),
            }
        }
    };

    if let Some(tombstone) = &local.tombstone {
        if offered_ts <= tombstone {
            return WantedParts::default();
        }
    }

    let local_data = match &local.data {
        Some(data) => data,
        None => {
            return WantedParts {
                data: true,
                meta: offered.meta.is_some(),
            }
        }
    };

    WantedParts {
        data: offered_ts > local_data,
        meta: match (&offered.meta, &local.meta) {
            (Some(theirs), Some(ours)) => theirs > ours,
            (Some(_), None) => true,
            (None, _) => false,
        },
    }
}
