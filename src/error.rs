//! Error types for packstore
//!
//! One error type for the engine, the index and both network surfaces.

use thiserror::Error;

/// Result type alias using PackError
pub type Result<T> = std::result::Result<T, PackError>;

/// Unified error type for packstore operations
#[derive(Debug, Error)]
pub enum PackError {
    // -------------------------------------------------------------------------
    // I/O Errors
    // -------------------------------------------------------------------------
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // -------------------------------------------------------------------------
    // Lookup Errors
    // -------------------------------------------------------------------------
    /// Device, partition, engine or object absent
    #[error("Not found: {0}")]
    NotFound(String),

    /// Device directory exists but is not a mount point
    #[error("Device unmounted: {0}")]
    Unmounted(String),

    // -------------------------------------------------------------------------
    // Integrity Errors
    // -------------------------------------------------------------------------
    /// Index decode failure, or a digest mismatch that survived the race check
    #[error("Corruption: {0}")]
    Corruption(String),

    /// The on-disk append invariant itself is broken; never retried
    #[error("Fatal on-disk invariant violated: {0}")]
    FatalInvariant(String),

    #[error("WAL corruption detected: {0}")]
    WalCorruption(String),

    // -------------------------------------------------------------------------
    // Storage Errors
    // -------------------------------------------------------------------------
    /// No space left while preallocating
    #[error("Resource exhausted: {0}")]
    ResourceExhausted(String),

    /// Partition touched concurrently during handoff deletion
    #[error("Race detected: {0}")]
    Race(String),

    /// Incoming write does not dominate the stored timestamp
    #[error("Conflict: {0}")]
    Conflict(String),

    // -------------------------------------------------------------------------
    // Serialization Errors
    // -------------------------------------------------------------------------
    #[error("Serialization error: {0}")]
    Serialization(String),

    // -------------------------------------------------------------------------
    // Network Errors
    // -------------------------------------------------------------------------
    #[error("Network error: {0}")]
    Network(String),

    #[error("Protocol error: {0}")]
    Protocol(String),

    #[error("Operation cancelled")]
    Cancelled,

    // -------------------------------------------------------------------------
    // Configuration Errors
    // -------------------------------------------------------------------------
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<bincode::Error> for PackError {
    fn from(e: bincode::Error) -> Self {
        PackError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for PackError {
    fn from(e: serde_json::Error) -> Self {
        PackError::Serialization(e.to_string())
    }
}

impl PackError {
    /// Whether the error reflects a disk that went away rather than a bad request
    pub fn is_device_fault(&self) -> bool {
        matches!(
            self,
            PackError::Io(_) | PackError::Unmounted(_) | PackError::FatalInvariant(_)
        )
    }
}
