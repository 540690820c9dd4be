//! Needle header codec
//!
//! Bit-exact encode/decode of the fixed 40-byte header plus alignment math.

use bytes::{Buf, BufMut};

use crate::error::{PackError, Result};

/// Magic number at the start of every needle ("NDLE")
pub const NEEDLE_MAGIC: u32 = 0x454C_444E;

/// Encoded header size in bytes
pub const HEADER_SIZE: usize = 40;

/// Needle start offsets and sizes are multiples of this
pub const ALIGNMENT: u64 = 4096;

/// Decoded needle header
///
/// Offsets are relative to the needle start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct NeedleHeader {
    pub magic: u32,
    pub needle_size: i64,
    pub meta_offset: i64,
    pub meta_size: i32,
    pub data_offset: i64,
    pub data_size: i64,
}

impl NeedleHeader {
    /// Header for a needle carrying `data_size` data bytes followed by `meta_size` meta bytes
    pub fn new(data_size: u64, meta_size: u32) -> Self {
        let needle_size = calculate_disk_size(HEADER_SIZE as u64, data_size, meta_size as u64);
        Self {
            magic: NEEDLE_MAGIC,
            needle_size: needle_size as i64,
            meta_offset: (HEADER_SIZE as u64 + data_size) as i64,
            meta_size: meta_size as i32,
            data_offset: HEADER_SIZE as i64,
            data_size: data_size as i64,
        }
    }

    /// Encode into a fresh 40-byte array
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut out = [0u8; HEADER_SIZE];
        self.encode_into(&mut out[..]);
        out
    }

    /// Encode into the first 40 bytes of `buf` (panics if `buf` is shorter)
    pub fn encode_into(&self, mut buf: &mut [u8]) {
        buf.put_u32_le(self.magic);
        buf.put_i64_le(self.needle_size);
        buf.put_i64_le(self.meta_offset);
        buf.put_i32_le(self.meta_size);
        buf.put_i64_le(self.data_offset);
        buf.put_i64_le(self.data_size);
    }

    /// Decode the first 40 bytes of `bytes`
    ///
    /// Pure transform: no field is validated here, see [`NeedleHeader::validate`].
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() < HEADER_SIZE {
            return Err(PackError::Corruption(format!(
                "Incomplete needle header: expected {} bytes, got {}",
                HEADER_SIZE,
                bytes.len()
            )));
        }

        let mut buf = &bytes[..HEADER_SIZE];
        Ok(Self {
            magic: buf.get_u32_le(),
            needle_size: buf.get_i64_le(),
            meta_offset: buf.get_i64_le(),
            meta_size: buf.get_i32_le(),
            data_offset: buf.get_i64_le(),
            data_size: buf.get_i64_le(),
        })
    }

    /// Check the header describes a well-formed needle
    pub fn validate(&self) -> Result<()> {
        if self.magic != NEEDLE_MAGIC {
            return Err(PackError::Corruption(format!(
                "Invalid needle magic: 0x{:08x}",
                self.magic
            )));
        }
        if self.needle_size <= 0 || !is_aligned(self.needle_size as u64) {
            return Err(PackError::Corruption(format!(
                "Needle size {} is not a positive multiple of {}",
                self.needle_size, ALIGNMENT
            )));
        }
        if self.data_size < 0 || self.meta_size < 0 {
            return Err(PackError::Corruption("Negative needle section size".to_string()));
        }
        if self.data_offset + self.data_size > self.needle_size
            || self.meta_offset + self.meta_size as i64 > self.needle_size
        {
            return Err(PackError::Corruption(format!(
                "Needle sections overflow needle size {}",
                self.needle_size
            )));
        }
        Ok(())
    }
}

/// Total on-disk size of a needle, rounded up to the alignment
pub fn calculate_disk_size(header_size: u64, data_size: u64, meta_size: u64) -> u64 {
    align_up(header_size + data_size + meta_size)
}

/// Round `n` up to the next multiple of [`ALIGNMENT`]
pub fn align_up(n: u64) -> u64 {
    (n + ALIGNMENT - 1) & !(ALIGNMENT - 1)
}

pub fn is_aligned(n: u64) -> bool {
    n % ALIGNMENT == 0
}
