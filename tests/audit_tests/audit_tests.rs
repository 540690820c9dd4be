//! Tests for the auditor
//!
//! These tests verify:
//! - Intact objects pass
//! - ETag, size and needle header damage leads to quarantine
//! - The daemon walks every partition through a device service

use std::io::Cursor;
use std::os::unix::fs::FileExt;
use std::sync::Arc;

use packstore::audit::{audit_partition, AuditQuota, Auditor};
use packstore::config::AuditorConfig;
use packstore::device::{ObjectState, PackDevice, PackDeviceMgr};
use packstore::network::LocalService;
use packstore::object::{IndexRecord, ObjectKey, ObjectMeta, PartType, Timestamp, SMALL_OBJECT_MAX};
use packstore::protocol::DeviceTarget;
use packstore::{CancelToken, Config};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const UNLIMITED: AuditQuota = AuditQuota {
    files_per_second: 0.0,
    bytes_per_second: 0.0,
};

fn config(root: &std::path::Path) -> Config {
    Config::builder()
        .devices_root(root)
        .mount_check(false)
        .background_workers(1)
        .build()
}

fn setup_device() -> (TempDir, PackDevice) {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("sda")).unwrap();
    let device = PackDevice::open(&config(temp.path()), "sda", 0).unwrap();
    (temp, device)
}

fn put(device: &PackDevice, partition: u32, name: &str, body: &[u8]) -> ObjectKey {
    let key = device.object_key(partition, name);
    let meta = ObjectMeta::new(name, Timestamp::from_secs_f64(1_700_000_000.0));
    device
        .put_object(
            &key,
            meta,
            body.len() as u64,
            &mut Cursor::new(body),
            &CancelToken::new(),
        )
        .unwrap();
    key
}

fn audit(device: &PackDevice, partition: u32) -> packstore::audit::AuditStats {
    audit_partition(device, partition, UNLIMITED, &CancelToken::new()).unwrap()
}

// =============================================================================
// Partition Audit Tests
// =============================================================================

#[test]
fn test_intact_partition() {
    let (_temp, device) = setup_device();
    put(&device, 1, "/a/c/one", b"first");
    put(&device, 1, "/a/c/two", &vec![7u8; 10_000]);
    let deleted = put(&device, 1, "/a/c/three", b"third");
    device
        .delete(&deleted, "/a/c/three", Timestamp::from_secs_f64(1_700_000_001.0))
        .unwrap();

    let stats = audit(&device, 1);
    assert_eq!(stats.processed_files, 2);
    assert_eq!(stats.processed_bytes, 10_005);
    assert_eq!(stats.errors, 0);
    assert_eq!(stats.quarantines, 0);

    // A second pass over unchanged data finds the same thing
    let again = audit(&device, 1);
    assert_eq!(again, stats);
}

#[test]
fn test_empty_partition() {
    let (_temp, device) = setup_device();
    let stats = audit(&device, 42);
    assert_eq!(stats, Default::default());
}

#[test]
fn test_etag_mismatch_quarantines_small_object() {
    let (_temp, device) = setup_device();
    let key = put(&device, 1, "/a/c/o", b"payload");
    let healthy = put(&device, 1, "/a/c/healthy", b"fine");

    let index_key = key.index_key(PartType::Data);
    let raw = device.index().get(&index_key).unwrap().unwrap();
    let mut record = IndexRecord::decode(&raw).unwrap();
    record
        .meta
        .system_meta
        .insert("etag".to_string(), "f".repeat(64));
    device.index().put(&index_key, &record.encode().unwrap()).unwrap();

    let stats = audit(&device, 1);
    assert_eq!(stats.processed_files, 2);
    assert_eq!(stats.quarantines, 1);

    assert_eq!(device.load_object_meta(&key).unwrap(), ObjectState::Missing);
    assert!(device.quarantine_dir().join(&key.hash).join("data.json").is_file());
    assert!(device.read_object(&healthy).is_ok());

    // Quarantined objects are not audited again
    assert_eq!(audit(&device, 1).quarantines, 0);
}

#[test]
fn test_damaged_needle_header_quarantines() {
    let (_temp, device) = setup_device();
    let key = put(&device, 2, "/a/c/o", b"payload");

    let offset = match device.load_object_meta(&key).unwrap() {
        ObjectState::Exists(object) => match object.object {
            packstore::object::Object::Small(needle) => needle.offset,
            other => panic!("expected small object, got {:?}", other),
        },
        other => panic!("expected object, got {:?}", other),
    };
    let bundle = std::fs::OpenOptions::new()
        .write(true)
        .open(device.objects_dir().join("2").join("pack.bundle"))
        .unwrap();
    bundle.write_at(&[0u8; 4], offset).unwrap();
    bundle.sync_all().unwrap();

    let stats = audit(&device, 2);
    assert_eq!(stats.quarantines, 1);
    assert_eq!(device.load_object_meta(&key).unwrap(), ObjectState::Missing);
}

#[test]
fn test_corrupt_large_object_is_moved() {
    let (_temp, device) = setup_device();
    let size = SMALL_OBJECT_MAX as usize + 100;
    let key = put(&device, 3, "/a/c/big", &vec![1u8; size]);

    let hashed_dir = device
        .objects_dir()
        .join("3")
        .join(&key.suffix)
        .join(&key.hash);
    let data_file = std::fs::read_dir(&hashed_dir)
        .unwrap()
        .map(|e| e.unwrap().path())
        .find(|p| p.extension().map_or(false, |ext| ext == "data"))
        .unwrap();
    let file = std::fs::OpenOptions::new().write(true).open(&data_file).unwrap();
    file.write_at(b"rot", 1000).unwrap();
    file.sync_all().unwrap();

    let stats = audit(&device, 3);
    assert_eq!(stats.processed_bytes, size as u64);
    assert_eq!(stats.quarantines, 1);
    assert!(!hashed_dir.exists());

    let quarantined = device.quarantine_dir().join(&key.hash);
    assert!(quarantined.join(data_file.file_name().unwrap()).is_file());
    assert!(quarantined.join("data.json").is_file());
}

#[test]
fn test_truncated_large_object_quarantines() {
    let (_temp, device) = setup_device();
    let key = put(&device, 3, "/a/c/big", &vec![2u8; SMALL_OBJECT_MAX as usize + 1]);

    let hashed_dir = device
        .objects_dir()
        .join("3")
        .join(&key.suffix)
        .join(&key.hash);
    for entry in std::fs::read_dir(&hashed_dir).unwrap() {
        let path = entry.unwrap().path();
        std::fs::OpenOptions::new()
            .write(true)
            .open(&path)
            .unwrap()
            .set_len(10)
            .unwrap();
    }

    assert_eq!(audit(&device, 3).quarantines, 1);
    assert_eq!(device.load_object_meta(&key).unwrap(), ObjectState::Missing);
}

#[test]
fn test_cancelled_audit_stops() {
    let (_temp, device) = setup_device();
    put(&device, 1, "/a/c/o", b"x");
    let cancel = CancelToken::new();
    cancel.cancel();

    assert!(audit_partition(&device, 1, UNLIMITED, &cancel).is_err());
}

// =============================================================================
// Daemon Tests
// =============================================================================

#[test]
fn test_auditor_pass_covers_every_partition() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("sda")).unwrap();
    let config = config(temp.path());
    let mgr = Arc::new(PackDeviceMgr::open(config.clone()).unwrap());

    let device = mgr.get("sda", 0).unwrap();
    put(&device, 1, "/a/c/one", b"one");
    put(&device, 2, "/a/c/two", b"two");
    let bad = put(&device, 3, "/a/c/three", b"three");
    let index_key = bad.index_key(PartType::Data);
    let mut record = IndexRecord::decode(&device.index().get(&index_key).unwrap().unwrap()).unwrap();
    record.meta.system_meta.insert("etag".to_string(), "0".repeat(64));
    device.index().put(&index_key, &record.encode().unwrap()).unwrap();

    let cancel = CancelToken::new();
    let service = Arc::new(LocalService::new(Arc::clone(&mgr), &config, cancel.clone()));
    let auditor = Auditor::new(
        service,
        vec![
            DeviceTarget::new("sda", 0),
            // Unknown devices are skipped
            DeviceTarget::new("sdz", 0),
        ],
        AuditorConfig {
            files_per_second: 0.0,
            bytes_per_second: 0.0,
            interval_secs: 1,
        },
        cancel,
    );

    let stats = auditor.run_once();
    assert_eq!(stats.processed_files, 3);
    assert_eq!(stats.quarantines, 1);
    assert_eq!(stats.errors, 0);

    mgr.close_all().unwrap();
}
