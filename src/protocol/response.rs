//! Response definitions

use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::{PackError, Result};

/// Response status codes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum Status {
    Ok = 0x00,
    NotFound = 0x01,
    Error = 0x02,
    /// Target device exists but is not mounted
    Unmounted = 0x03,
    /// Write refused because a newer version is stored
    Conflict = 0x04,
    /// State changed underneath the operation; retry later
    Race = 0x05,
}

impl Status {
    pub fn from_u8(byte: u8) -> Result<Self> {
        Ok(match byte {
            0x00 => Status::Ok,
            0x01 => Status::NotFound,
            0x02 => Status::Error,
            0x03 => Status::Unmounted,
            0x04 => Status::Conflict,
            0x05 => Status::Race,
            _ => {
                return Err(PackError::Protocol(format!(
                    "Unknown response status: 0x{:02x}",
                    byte
                )))
            }
        })
    }
}

/// A response to send to client
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    pub status: Status,

    /// bincode value for OK, message otherwise
    pub payload: Option<Vec<u8>>,
}

impl Response {
    /// Create an OK response with optional payload
    pub fn ok(payload: Option<Vec<u8>>) -> Self {
        Self {
            status: Status::Ok,
            payload,
        }
    }

    /// OK response carrying a bincode-encoded value
    pub fn value<T: Serialize>(value: &T) -> Result<Self> {
        let payload = bincode::serialize(value)?;
        Ok(Self::ok(if payload.is_empty() { None } else { Some(payload) }))
    }

    pub fn not_found(message: &str) -> Self {
        Self::with_message(Status::NotFound, message)
    }

    pub fn error(message: &str) -> Self {
        Self::with_message(Status::Error, message)
    }

    fn with_message(status: Status, message: &str) -> Self {
        Self {
            status,
            payload: Some(message.as_bytes().to_vec()),
        }
    }

    /// Map an operation error onto a status
    pub fn from_error(error: &PackError) -> Self {
        let status = match error {
            PackError::NotFound(_) => Status::NotFound,
            PackError::Unmounted(_) => Status::Unmounted,
            PackError::Conflict(_) => Status::Conflict,
            PackError::Race(_) => Status::Race,
            _ => Status::Error,
        };
        Self::with_message(status, &error.to_string())
    }

    fn message(&self) -> String {
        self.payload
            .as_deref()
            .map(|p| String::from_utf8_lossy(p).into_owned())
            .unwrap_or_default()
    }

    /// Decode the value of an OK response, or turn the status into an error
    pub fn into_value<T: DeserializeOwned>(self) -> Result<T> {
        match self.status {
            Status::Ok => {
                let payload = self.payload.unwrap_or_default();
                Ok(bincode::deserialize(&payload)?)
            }
            Status::NotFound => Err(PackError::NotFound(self.message())),
            Status::Unmounted => Err(PackError::Unmounted(self.message())),
            Status::Conflict => Err(PackError::Conflict(self.message())),
            Status::Race => Err(PackError::Race(self.message())),
            Status::Error => Err(PackError::Network(format!("remote error: {}", self.message()))),
        }
    }
}
