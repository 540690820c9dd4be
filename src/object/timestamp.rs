//! Object timestamps
//!
//! Normalized fixed-width decimal seconds (`%016.5f`), so string order equals
//! numeric order and both sides of a replication exchange compare equal bytes.

use std::fmt;
use std::time::{Duration, SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};

use crate::error::{PackError, Result};

/// Normalized object timestamp, e.g. `1700000000.12345`
///
/// Decoding accepts only the normalized form, so a timestamp read off the wire
/// or out of an index row is always safe to use as a file name.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub struct Timestamp(String);

impl Timestamp {
    pub fn from_secs_f64(secs: f64) -> Self {
        Timestamp(format!("{:016.5}", secs))
    }

    pub fn now() -> Self {
        let secs = SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or(Duration::ZERO)
            .as_secs_f64();
        Self::from_secs_f64(secs)
    }

    /// Parse and normalize a decimal-seconds string
    pub fn parse(s: &str) -> Result<Self> {
        let secs: f64 = s
            .trim()
            .parse()
            .map_err(|_| PackError::Protocol(format!("Invalid timestamp: {:?}", s)))?;
        if !secs.is_finite() || secs < 0.0 {
            return Err(PackError::Protocol(format!("Invalid timestamp: {:?}", s)));
        }
        Ok(Self::from_secs_f64(secs))
    }

    pub fn as_secs_f64(&self) -> f64 {
        self.0.parse().unwrap_or(0.0)
    }

    /// This timestamp shifted by `secs` (negative moves back)
    pub fn offset(&self, secs: f64) -> Self {
        Self::from_secs_f64((self.as_secs_f64() + secs).max(0.0))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl TryFrom<String> for Timestamp {
    type Error = PackError;

    fn try_from(s: String) -> Result<Self> {
        let ts = Self::parse(&s)?;
        if ts.0 != s {
            return Err(PackError::Protocol(format!("Timestamp not normalized: {:?}", s)));
        }
        Ok(ts)
    }
}

impl From<Timestamp> for String {
    fn from(ts: Timestamp) -> Self {
        ts.0
    }
}

impl Default for Timestamp {
    fn default() -> Self {
        Timestamp::from_secs_f64(0.0)
    }
}

impl fmt::Display for Timestamp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
