//! Cooperative cancellation for long copies and scans

use std::io::{Read, Write};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::error::{PackError, Result};

/// Chunk size for streaming copies and digests
pub const COPY_CHUNK: usize = 64 * 1024;

/// Shared flag checked between chunks of streaming work
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }

    /// `Err(Cancelled)` once cancelled
    pub fn check(&self) -> Result<()> {
        if self.is_cancelled() {
            Err(PackError::Cancelled)
        } else {
            Ok(())
        }
    }
}

/// Copy exactly `len` bytes, checking `cancel` between chunks
pub fn copy_exact<R, W>(reader: &mut R, writer: &mut W, len: u64, cancel: &CancelToken) -> Result<()>
where
    R: Read + ?Sized,
    W: Write + ?Sized,
{
    let mut buf = vec![0u8; COPY_CHUNK.min(len as usize).max(1)];
    let mut remaining = len;
    while remaining > 0 {
        cancel.check()?;
        let want = buf.len().min(remaining as usize);
        reader.read_exact(&mut buf[..want])?;
        writer.write_all(&buf[..want])?;
        remaining -= want as u64;
    }
    Ok(())
}
