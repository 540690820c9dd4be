//! Tests for the needle codec and bundles
//!
//! These tests verify:
//! - Header layout and validation
//! - Alignment arithmetic
//! - Bundle superblock creation and checking
//! - Appends, rollback on failed persistence, and ranged reads

use std::io::Read;
use std::sync::Arc;

use packstore::needle::{
    align_up, calculate_disk_size, is_aligned, Bundle, NeedleHeader, ALIGNMENT, HEADER_SIZE,
    NEEDLE_MAGIC,
};
use packstore::PackError;
use proptest::prelude::*;
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

/// A complete needle carrying `data` and `meta`
fn needle(data: &[u8], meta: &[u8]) -> (NeedleHeader, Vec<u8>) {
    let header = NeedleHeader::new(data.len() as u64, meta.len() as u32);
    let mut bytes = header.encode().to_vec();
    bytes.extend_from_slice(data);
    bytes.extend_from_slice(meta);
    bytes.resize(header.needle_size as usize, 0);
    (header, bytes)
}

// =============================================================================
// Header Tests
// =============================================================================

#[test]
fn test_header_layout_is_little_endian() {
    let header = NeedleHeader::new(10, 5);
    let bytes = header.encode();

    assert_eq!(bytes.len(), HEADER_SIZE);
    assert_eq!(&bytes[0..4], &NEEDLE_MAGIC.to_le_bytes());
    assert_eq!(&bytes[4..12], &4096i64.to_le_bytes());
    assert_eq!(&bytes[12..20], &50i64.to_le_bytes());
    assert_eq!(&bytes[20..24], &5i32.to_le_bytes());
    assert_eq!(&bytes[24..32], &40i64.to_le_bytes());
    assert_eq!(&bytes[32..40], &10i64.to_le_bytes());
}

#[test]
fn test_header_sizes() {
    let header = NeedleHeader::new(4096, 100);
    assert_eq!(header.needle_size, 8192);
    assert_eq!(header.data_offset, HEADER_SIZE as i64);
    assert_eq!(header.meta_offset, HEADER_SIZE as i64 + 4096);
    header.validate().unwrap();
}

#[test]
fn test_decode_short_input() {
    let result = NeedleHeader::decode(&[0u8; HEADER_SIZE - 1]);
    assert!(matches!(result, Err(PackError::Corruption(_))));
}

#[test]
fn test_validate_rejects_bad_magic() {
    let mut header = NeedleHeader::new(1, 1);
    header.magic = 0xDEAD_BEEF;
    assert!(matches!(header.validate(), Err(PackError::Corruption(_))));
}

#[test]
fn test_validate_rejects_unaligned_size() {
    let mut header = NeedleHeader::new(1, 1);
    header.needle_size = 4000;
    assert!(header.validate().is_err());
}

#[test]
fn test_validate_rejects_overflowing_sections() {
    let mut header = NeedleHeader::new(100, 10);
    header.data_size = 5000;
    assert!(header.validate().is_err());

    let mut header = NeedleHeader::new(100, 10);
    header.meta_size = -1;
    assert!(header.validate().is_err());
}

#[test]
fn test_alignment_helpers() {
    assert_eq!(align_up(0), 0);
    assert_eq!(align_up(1), ALIGNMENT);
    assert_eq!(align_up(ALIGNMENT), ALIGNMENT);
    assert_eq!(align_up(ALIGNMENT + 1), 2 * ALIGNMENT);
    assert!(is_aligned(3 * ALIGNMENT));
    assert!(!is_aligned(3 * ALIGNMENT - 1));
    assert_eq!(calculate_disk_size(40, 4056, 0), 4096);
    assert_eq!(calculate_disk_size(40, 4056, 1), 8192);
}

proptest! {
    #[test]
    fn prop_header_roundtrip_and_valid(data in 0u64..64 * 1024 * 1024, meta in 0u32..1 << 20) {
        let header = NeedleHeader::new(data, meta);
        let decoded = NeedleHeader::decode(&header.encode()).unwrap();
        prop_assert_eq!(decoded, header);
        prop_assert!(decoded.validate().is_ok());
        prop_assert!(is_aligned(decoded.needle_size as u64));
        prop_assert!(decoded.needle_size as u64 >= HEADER_SIZE as u64 + data + meta as u64);
    }
}

// =============================================================================
// Bundle Tests
// =============================================================================

#[test]
fn test_open_writes_superblock() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("7").join("pack.bundle");

    let bundle = Bundle::open(&path).unwrap();
    assert_eq!(bundle.len().unwrap(), ALIGNMENT);
    assert!(bundle.is_empty().unwrap());

    let head = std::fs::read(&path).unwrap();
    assert_eq!(&head[0..4], b"PKBL");
    assert_eq!(&head[4..8], &1u32.to_le_bytes());
}

#[test]
fn test_open_rejects_foreign_file() {
    let temp = TempDir::new().unwrap();
    let path = temp.path().join("pack.bundle");
    std::fs::write(&path, vec![b'x'; 4096]).unwrap();

    assert!(matches!(Bundle::open(&path), Err(PackError::Corruption(_))));
}

#[test]
fn test_append_and_read_back() {
    let temp = TempDir::new().unwrap();
    let bundle = Arc::new(Bundle::open(&temp.path().join("pack.bundle")).unwrap());

    let (first_header, first) = needle(b"hello", b"meta");
    let (_, second) = needle(&vec![9u8; 5000], b"");

    let mut persisted = Vec::new();
    let first_offset = bundle
        .append(&first, |off| {
            persisted.push(off);
            Ok(())
        })
        .unwrap();
    let second_offset = bundle.append(&second, |_| Ok(())).unwrap();

    assert_eq!(first_offset, ALIGNMENT);
    assert_eq!(second_offset, ALIGNMENT + first.len() as u64);
    assert_eq!(persisted, vec![ALIGNMENT]);
    assert!(is_aligned(bundle.len().unwrap()));

    let raw = bundle.read_at(first_offset, HEADER_SIZE).unwrap();
    assert_eq!(NeedleHeader::decode(&raw).unwrap(), first_header);

    let mut data = String::new();
    bundle
        .section_reader(first_offset + HEADER_SIZE as u64, 5)
        .read_to_string(&mut data)
        .unwrap();
    assert_eq!(data, "hello");
}

#[test]
fn test_failed_persist_rolls_back() {
    let temp = TempDir::new().unwrap();
    let bundle = Bundle::open(&temp.path().join("pack.bundle")).unwrap();
    let (_, bytes) = needle(b"data", b"");

    let result = bundle.append(&bytes, |_| {
        Err(PackError::Io(std::io::Error::new(
            std::io::ErrorKind::Other,
            "index down",
        )))
    });
    assert!(result.is_err());
    assert_eq!(bundle.len().unwrap(), ALIGNMENT);

    // The next append lands where the failed one would have
    let offset = bundle.append(&bytes, |_| Ok(())).unwrap();
    assert_eq!(offset, ALIGNMENT);
}

#[test]
fn test_append_rejects_unaligned_needle() {
    let temp = TempDir::new().unwrap();
    let bundle = Bundle::open(&temp.path().join("pack.bundle")).unwrap();

    let result = bundle.append(&[0u8; 100], |_| Ok(()));
    assert!(matches!(result, Err(PackError::FatalInvariant(_))));
    assert_eq!(bundle.len().unwrap(), ALIGNMENT);
}

#[test]
fn test_punch_hole_keeps_length() {
    let temp = TempDir::new().unwrap();
    let bundle = Bundle::open(&temp.path().join("pack.bundle")).unwrap();
    let (_, bytes) = needle(&vec![1u8; 10_000], b"");
    let offset = bundle.append(&bytes, |_| Ok(())).unwrap();
    let len = bundle.len().unwrap();

    if bundle.punch_hole(offset, bytes.len() as u64).unwrap() {
        assert_eq!(bundle.read_at(offset, 16).unwrap(), vec![0u8; 16]);
    }
    assert_eq!(bundle.len().unwrap(), len);
}

#[test]
fn test_section_reader_past_end_of_file() {
    let temp = TempDir::new().unwrap();
    let bundle = Arc::new(Bundle::open(&temp.path().join("pack.bundle")).unwrap());

    let mut reader = bundle.section_reader(ALIGNMENT, 100);
    let mut buf = Vec::new();
    assert!(reader.read_to_end(&mut buf).is_err());
}
