//! Tests for PackDevice and PackDeviceMgr
//!
//! These tests verify:
//! - Small (needle) and large (file) object writes and reads
//! - Timestamp ordering: conflicts, POST merging, tombstones
//! - Reclamation of superseded versions
//! - Suffix hashes, replica diffing and handoff removal
//! - Quarantine, close and reopen
//! - Device discovery and mount checking

use std::collections::BTreeMap;
use std::io::{Cursor, Write};
use std::path::PathBuf;
use std::time::Duration;

use packstore::device::{ObjectState, PackDevice, PackDeviceMgr};
use packstore::object::{ObjectKey, ObjectMeta, PartType, Timestamp, SMALL_OBJECT_MAX};
use packstore::replicator::ObjectTimestamps;
use packstore::{CancelToken, Config, PackError};
use sha2::{Digest, Sha256};
use tempfile::TempDir;

// =============================================================================
// Helper Functions
// =============================================================================

const WEEK: Duration = Duration::from_secs(7 * 24 * 3600);

fn config(root: &std::path::Path) -> Config {
    Config::builder()
        .devices_root(root)
        .mount_check(false)
        .hash_path("", "test-secret")
        .background_workers(1)
        .build()
}

fn setup_device() -> (TempDir, PackDevice) {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("sda")).unwrap();
    let device = PackDevice::open(&config(temp.path()), "sda", 0).unwrap();
    (temp, device)
}

fn ts(offset: f64) -> Timestamp {
    Timestamp::from_secs_f64(1_700_000_000.0 + offset)
}

fn put(device: &PackDevice, partition: u32, name: &str, at: Timestamp, body: &[u8]) -> ObjectKey {
    let key = device.object_key(partition, name);
    let meta = ObjectMeta::new(name, at);
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

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

fn large_data_path(device: &PackDevice, key: &ObjectKey, at: &Timestamp) -> PathBuf {
    device
        .objects_dir()
        .join(key.partition.to_string())
        .join(&key.suffix)
        .join(&key.hash)
        .join(format!("{}.data", at))
}

// =============================================================================
// Write / Read Tests
// =============================================================================

#[test]
fn test_small_object_roundtrip() {
    let (_temp, device) = setup_device();
    let key = put(&device, 3, "/a/c/small", ts(0.0), b"hello world");

    let (object, data) = device.read_object(&key).unwrap();
    assert_eq!(data, b"hello world");
    assert!(object.object.is_small());
    assert_eq!(object.size(), 11);
    assert_eq!(object.meta.etag(), Some(sha256_hex(b"hello world").as_str()));
    assert_eq!(
        object.meta.system_meta.get("content-length").map(String::as_str),
        Some("11")
    );

    let bundle = device.objects_dir().join("3").join("pack.bundle");
    assert!(bundle.is_file());
    assert_eq!(std::fs::metadata(&bundle).unwrap().len() % 4096, 0);
}

#[test]
fn test_empty_object() {
    let (_temp, device) = setup_device();
    let key = put(&device, 1, "/a/c/empty", ts(0.0), b"");

    let (object, data) = device.read_object(&key).unwrap();
    assert!(data.is_empty());
    assert_eq!(object.meta.etag(), Some(sha256_hex(b"").as_str()));
}

#[test]
fn test_size_class_threshold() {
    let (_temp, device) = setup_device();

    let at_limit = vec![1u8; SMALL_OBJECT_MAX as usize];
    let small = put(&device, 1, "/a/c/limit", ts(0.0), &at_limit);
    assert!(device.read_object(&small).unwrap().0.object.is_small());

    let over = vec![2u8; SMALL_OBJECT_MAX as usize + 1];
    let large = put(&device, 1, "/a/c/over", ts(0.0), &over);
    let (object, data) = device.read_object(&large).unwrap();
    assert!(!object.object.is_small());
    assert_eq!(data, over);
    assert!(large_data_path(&device, &large, &ts(0.0)).is_file());
}

#[test]
fn test_supplied_etag_must_match() {
    let (_temp, device) = setup_device();
    let key = device.object_key(1, "/a/c/o");

    let mut meta = ObjectMeta::new("/a/c/o", ts(0.0));
    meta.system_meta.insert("etag".to_string(), "0".repeat(64));
    let result = device.put_object(&key, meta, 3, &mut Cursor::new(b"abc"), &CancelToken::new());
    assert!(matches!(result, Err(PackError::Protocol(_))));

    let mut meta = ObjectMeta::new("/a/c/o", ts(0.0));
    meta.system_meta.insert("etag".to_string(), sha256_hex(b"abc"));
    device
        .put_object(&key, meta, 3, &mut Cursor::new(b"abc"), &CancelToken::new())
        .unwrap();
}

#[test]
fn test_short_body_is_rejected() {
    let (_temp, device) = setup_device();
    let key = device.object_key(1, "/a/c/o");

    let mut writer = device.new_writer(&key, 10).unwrap();
    writer.write_all(b"short").unwrap();
    let result = writer.commit(ObjectMeta::new("/a/c/o", ts(0.0)));
    assert!(matches!(result, Err(PackError::Protocol(_))));
    assert_eq!(device.load_object_meta(&key).unwrap(), ObjectState::Missing);
}

#[test]
fn test_overlong_write_is_rejected() {
    let (_temp, device) = setup_device();
    let key = device.object_key(1, "/a/c/o");

    let mut writer = device.new_writer(&key, 2).unwrap();
    assert!(writer.write_all(b"too long").is_err());
}

#[test]
fn test_abandoned_large_writer_cleans_tmp() {
    let (_temp, device) = setup_device();
    let key = device.object_key(1, "/a/c/big");
    let tmp = device.objects_dir().join("tmp");

    {
        let mut writer = device.new_writer(&key, SMALL_OBJECT_MAX + 10).unwrap();
        writer.write_all(&[0u8; 1024]).unwrap();
        assert_eq!(std::fs::read_dir(&tmp).unwrap().count(), 1);
    }
    assert_eq!(std::fs::read_dir(&tmp).unwrap().count(), 0);
}

#[test]
fn test_cancelled_put_leaves_no_object() {
    let (_temp, device) = setup_device();
    let key = device.object_key(1, "/a/c/o");
    let cancel = CancelToken::new();
    cancel.cancel();

    let result = device.put_object(
        &key,
        ObjectMeta::new("/a/c/o", ts(0.0)),
        3,
        &mut Cursor::new(b"abc"),
        &cancel,
    );
    assert!(matches!(result, Err(PackError::Cancelled)));
    assert_eq!(device.load_object_meta(&key).unwrap(), ObjectState::Missing);
}

// =============================================================================
// Timestamp Ordering Tests
// =============================================================================

#[test]
fn test_put_requires_newer_timestamp() {
    let (_temp, device) = setup_device();
    let key = put(&device, 1, "/a/c/o", ts(10.0), b"v1");

    for at in [ts(10.0), ts(5.0)] {
        let result = device.put_object(
            &key,
            ObjectMeta::new("/a/c/o", at),
            2,
            &mut Cursor::new(b"v0"),
            &CancelToken::new(),
        );
        assert!(matches!(result, Err(PackError::Conflict(_))));
    }

    put(&device, 1, "/a/c/o", ts(11.0), b"v2");
    assert_eq!(device.read_object(&key).unwrap().1, b"v2");
}

#[test]
fn test_post_merges_metadata() {
    let (_temp, device) = setup_device();
    let key = device.object_key(1, "/a/c/o");

    let mut meta = ObjectMeta::new("/a/c/o", ts(0.0));
    meta.system_meta.insert("content-type".to_string(), "text/plain".to_string());
    meta.system_meta.insert("x-object-sysmeta-a".to_string(), "1".to_string());
    meta.user_meta.insert("x-object-meta-color".to_string(), "red".to_string());
    device
        .put_object(&key, meta, 4, &mut Cursor::new(b"body"), &CancelToken::new())
        .unwrap();

    let mut first = ObjectMeta::new("", ts(1.0));
    first.system_meta.insert("x-object-sysmeta-b".to_string(), "2".to_string());
    first.system_meta.insert("etag".to_string(), "bogus".to_string());
    first.user_meta.insert("x-object-meta-size".to_string(), "big".to_string());
    device.commit_meta(&key, first).unwrap();

    let mut second = ObjectMeta::new("", ts(2.0));
    second.system_meta.insert("x-object-sysmeta-c".to_string(), "3".to_string());
    device.commit_meta(&key, second).unwrap();

    let object = match device.load_object_meta(&key).unwrap() {
        ObjectState::Exists(object) => object,
        other => panic!("expected object, got {:?}", other),
    };
    let sys = &object.meta.system_meta;
    assert_eq!(sys.get("x-object-sysmeta-a").map(String::as_str), Some("1"));
    assert_eq!(sys.get("x-object-sysmeta-b").map(String::as_str), Some("2"));
    assert_eq!(sys.get("x-object-sysmeta-c").map(String::as_str), Some("3"));
    assert_eq!(sys.get("content-type").map(String::as_str), Some("text/plain"));
    assert_eq!(object.meta.etag(), Some(sha256_hex(b"body").as_str()));
    // User metadata is replaced, not merged
    assert!(object.meta.user_meta.is_empty());
    assert_eq!(object.meta_timestamp(), Some(&ts(2.0)));
    assert_eq!(device.read_object(&key).unwrap().1, b"body");
}

#[test]
fn test_post_ordering() {
    let (_temp, device) = setup_device();
    let missing = device.object_key(1, "/a/c/missing");
    let result = device.commit_meta(&missing, ObjectMeta::new("", ts(1.0)));
    assert!(matches!(result, Err(PackError::NotFound(_))));

    let key = put(&device, 1, "/a/c/o", ts(5.0), b"x");
    let result = device.commit_meta(&key, ObjectMeta::new("", ts(5.0)));
    assert!(matches!(result, Err(PackError::Conflict(_))));

    device.commit_meta(&key, ObjectMeta::new("", ts(7.0))).unwrap();
    let result = device.commit_meta(&key, ObjectMeta::new("", ts(6.0)));
    assert!(matches!(result, Err(PackError::Conflict(_))));
}

#[test]
fn test_post_on_large_object_writes_meta_file() {
    let (_temp, device) = setup_device();
    let body = vec![3u8; SMALL_OBJECT_MAX as usize + 1];
    let key = put(&device, 1, "/a/c/big", ts(0.0), &body);

    let mut update = ObjectMeta::new("", ts(1.0));
    update.user_meta.insert("x-object-meta-k".to_string(), "v".to_string());
    device.commit_meta(&key, update).unwrap();

    let meta_file = large_data_path(&device, &key, &ts(1.0)).with_extension("meta");
    assert!(meta_file.is_file());
    let (object, _) = device.read_object(&key).unwrap();
    assert_eq!(
        object.meta.user_meta.get("x-object-meta-k").map(String::as_str),
        Some("v")
    );
}

#[test]
fn test_delete_and_recreate() {
    let (_temp, device) = setup_device();
    let key = put(&device, 1, "/a/c/o", ts(0.0), b"v1");

    device.delete(&key, "/a/c/o", ts(1.0)).unwrap();
    assert_eq!(
        device.load_object_meta(&key).unwrap(),
        ObjectState::Deleted(ts(1.0))
    );
    assert!(matches!(device.read_object(&key), Err(PackError::NotFound(_))));
    assert!(device
        .index()
        .get(&key.index_key(PartType::Data))
        .unwrap()
        .is_none());

    // Older writes and deletes lose to the tombstone
    let result = device.put_object(
        &key,
        ObjectMeta::new("/a/c/o", ts(0.5)),
        2,
        &mut Cursor::new(b"v0"),
        &CancelToken::new(),
    );
    assert!(matches!(result, Err(PackError::Conflict(_))));
    assert!(matches!(
        device.delete(&key, "/a/c/o", ts(1.0)),
        Err(PackError::Conflict(_))
    ));

    put(&device, 1, "/a/c/o", ts(2.0), b"v2");
    assert_eq!(device.read_object(&key).unwrap().1, b"v2");
    assert!(device
        .index()
        .get(&key.index_key(PartType::Tombstone))
        .unwrap()
        .is_none());
}

#[test]
fn test_large_overwrite_and_delete_reclaim_files() {
    let (_temp, device) = setup_device();
    let body = vec![4u8; SMALL_OBJECT_MAX as usize + 1];
    let key = put(&device, 1, "/a/c/big", ts(0.0), &body);
    put(&device, 1, "/a/c/big", ts(1.0), &body);
    device.tasks().drain();

    assert!(!large_data_path(&device, &key, &ts(0.0)).exists());
    assert!(large_data_path(&device, &key, &ts(1.0)).is_file());

    device.delete(&key, "/a/c/big", ts(2.0)).unwrap();
    device.tasks().drain();

    let dir = large_data_path(&device, &key, &ts(2.0));
    let dir = dir.parent().unwrap();
    let names: Vec<String> = std::fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().into_string().unwrap())
        .collect();
    assert_eq!(names, vec![format!("{}.ts", ts(2.0))]);
}

// =============================================================================
// Listing and Hash Tests
// =============================================================================

#[test]
fn test_list_partitions_and_suffixes() {
    let (_temp, device) = setup_device();
    let a = put(&device, 7, "/a/c/one", ts(0.0), b"1");
    let b = put(&device, 7, "/a/c/two", ts(0.0), b"2");
    put(&device, 2, "/a/c/three", ts(0.0), b"3");

    assert_eq!(device.list_partitions().unwrap(), vec![2, 7]);

    let mut expected = vec![a.suffix.clone(), b.suffix.clone()];
    expected.sort();
    expected.dedup();
    assert_eq!(device.list_partition_suffixes(7).unwrap(), expected);
    assert!(device.list_partition_suffixes(9).unwrap().is_empty());
}

#[test]
fn test_get_hashes_cache_and_invalidation() {
    let (_temp, device) = setup_device();
    let key = put(&device, 4, "/a/c/o", ts(0.0), b"v1");

    let first = device.get_hashes(4, WEEK, false, &[]).unwrap();
    assert_eq!(first.hashed, 1);
    let digest = first.hashes.get(&key.suffix).cloned().unwrap();
    assert_eq!(digest.len(), 32);

    let cached = device.get_hashes(4, WEEK, false, &[]).unwrap();
    assert_eq!(cached.hashed, 0);
    assert_eq!(cached.hashes, first.hashes);

    put(&device, 4, "/a/c/o", ts(1.0), b"v2");
    let changed = device.get_hashes(4, WEEK, false, &[]).unwrap();
    assert_eq!(changed.hashed, 1);
    assert_ne!(changed.hashes.get(&key.suffix), Some(&digest));

    let forced = device
        .get_hashes(4, WEEK, false, &[key.suffix.clone()])
        .unwrap();
    assert_eq!(forced.hashed, 1);
    assert_eq!(forced.hashes, changed.hashes);
}

/// A name in `partition` whose key falls in `suffix` (or outside it)
fn name_in_suffix(device: &PackDevice, partition: u32, suffix: &str, inside: bool) -> String {
    (0..100_000)
        .map(|i| format!("/a/c/obj-{}", i))
        .find(|name| (device.object_key(partition, name).suffix == suffix) == inside)
        .unwrap()
}

#[test]
fn test_new_object_changes_only_its_suffix() {
    let (_temp, device) = setup_device();
    let first = put(&device, 4, "/a/c/first", ts(0.0), b"one");
    let other_name = name_in_suffix(&device, 4, &first.suffix, false);
    let other = put(&device, 4, &other_name, ts(0.0), b"two");

    let before = device.get_hashes(4, WEEK, false, &[]).unwrap();
    assert_eq!(before.hashes.len(), 2);

    let again = device.get_hashes(4, WEEK, false, &[]).unwrap();
    assert_eq!(again.hashes, before.hashes);

    let sibling = name_in_suffix(&device, 4, &first.suffix, true);
    assert_ne!(sibling, "/a/c/first");
    put(&device, 4, &sibling, ts(1.0), b"three");

    let after = device.get_hashes(4, WEEK, false, &[]).unwrap();
    assert_eq!(after.hashed, 1);
    assert_ne!(after.hashes[&first.suffix], before.hashes[&first.suffix]);
    assert_eq!(after.hashes[&other.suffix], before.hashes[&other.suffix]);
}

#[test]
fn test_get_hashes_missing_partition() {
    let (_temp, device) = setup_device();
    let result = device.get_hashes(99, WEEK, true, &[]).unwrap();
    assert!(result.hashes.is_empty());
}

#[test]
fn test_get_hashes_reclaims_old_tombstones() {
    let (_temp, device) = setup_device();
    let key = device.object_key(6, "/a/c/old");
    let old = Timestamp::from_secs_f64(1000.0);
    device.delete(&key, "/a/c/old", old).unwrap();
    let kept = put(&device, 6, "/a/c/live", ts(0.0), b"x");

    let result = device.get_hashes(6, WEEK, true, &[]).unwrap();
    assert_eq!(device.load_object_meta(&key).unwrap(), ObjectState::Missing);
    assert!(result.hashes.contains_key(&kept.suffix));
    if key.suffix != kept.suffix {
        assert!(!result.hashes.contains_key(&key.suffix));
    }
}

#[test]
fn test_list_suffix_objects_and_diff() {
    let (_temp, device) = setup_device();
    let key = put(&device, 8, "/a/c/o", ts(5.0), b"x");
    device.commit_meta(&key, ObjectMeta::new("", ts(6.0))).unwrap();

    let listed = device
        .list_suffix_objects(8, &[key.suffix.clone()])
        .unwrap();
    let mine = listed.get(&key.hash).unwrap();
    assert_eq!(mine.data, Some(ts(5.0)));
    assert_eq!(mine.meta, Some(ts(6.0)));
    assert_eq!(mine.tombstone, None);

    // Same state offered back: nothing wanted
    assert!(device.diff_replica(8, &listed).unwrap().is_empty());

    let mut offered = BTreeMap::new();
    offered.insert(
        key.hash.clone(),
        ObjectTimestamps {
            name: "/a/c/o".to_string(),
            data: Some(ts(9.0)),
            ..Default::default()
        },
    );
    let unknown = device.object_key(8, "/a/c/unknown");
    offered.insert(
        unknown.hash.clone(),
        ObjectTimestamps {
            name: "/a/c/unknown".to_string(),
            data: Some(ts(1.0)),
            meta: Some(ts(2.0)),
            ..Default::default()
        },
    );
    let wanted = device.diff_replica(8, &offered).unwrap();
    assert!(wanted[&key.hash].data);
    assert!(wanted[&unknown.hash].data);
    assert!(wanted[&unknown.hash].meta);
}

#[test]
fn test_delete_handoff_removes_partition() {
    let (_temp, device) = setup_device();
    let key = put(&device, 11, "/a/c/o", ts(0.0), b"x");
    let kept = put(&device, 12, "/a/c/o", ts(0.0), b"x");
    device.get_hashes(11, WEEK, false, &[]).unwrap();

    device.delete_handoff(11).unwrap();

    assert!(!device.objects_dir().join("11").exists());
    assert_eq!(device.list_partitions().unwrap(), vec![12]);
    assert_eq!(device.load_object_meta(&key).unwrap(), ObjectState::Missing);
    assert!(device.read_object(&kept).is_ok());

    // The partition can be written again afterwards
    put(&device, 11, "/a/c/o", ts(1.0), b"y");
    assert_eq!(device.read_object(&key).unwrap().1, b"y");
}

#[test]
fn test_handoff_removal_never_strands_committed_rows() {
    let (_temp, device) = setup_device();
    put(&device, 13, "/a/c/seed", ts(0.0), b"seed");

    let names: Vec<String> = (0..200).map(|i| format!("/a/c/racing-{}", i)).collect();
    std::thread::scope(|scope| {
        scope.spawn(|| {
            for name in &names {
                put(&device, 13, name, ts(1.0), name.as_bytes());
            }
        });
        scope.spawn(|| {
            for _ in 0..50 {
                // Races are expected; the partition is simply kept
                let _ = device.delete_handoff(13);
                std::thread::yield_now();
            }
        });
    });

    // Whatever survived must still be readable in full
    for name in &names {
        let key = device.object_key(13, name);
        if let ObjectState::Exists(_) = device.load_object_meta(&key).unwrap() {
            let (_, data) = device.read_object(&key).unwrap();
            assert_eq!(data, name.as_bytes());
        }
    }
}

// =============================================================================
// Quarantine, Close and Reopen Tests
// =============================================================================

#[test]
fn test_quarantine_small_object() {
    let (_temp, device) = setup_device();
    let key = put(&device, 1, "/a/c/o", ts(0.0), b"x");

    let path = device.quarantine(&key).unwrap();
    assert!(path.starts_with(device.quarantine_dir()));
    assert!(path.join("data.json").is_file());
    assert!(!path.join("meta.json").exists());
    assert_eq!(device.load_object_meta(&key).unwrap(), ObjectState::Missing);

    // A second quarantine of the same hash gets its own directory
    put(&device, 1, "/a/c/o", ts(1.0), b"y");
    let again = device.quarantine(&key).unwrap();
    assert_ne!(again, path);
}

#[test]
fn test_quarantine_large_object_moves_files() {
    let (_temp, device) = setup_device();
    let body = vec![5u8; SMALL_OBJECT_MAX as usize + 1];
    let key = put(&device, 1, "/a/c/big", ts(0.0), &body);

    let path = device.quarantine(&key).unwrap();
    assert!(path.join(format!("{}.data", ts(0.0))).is_file());
    assert!(!large_data_path(&device, &key, &ts(0.0)).exists());
}

#[test]
fn test_closed_device_refuses_operations() {
    let (_temp, device) = setup_device();
    let key = put(&device, 1, "/a/c/o", ts(0.0), b"x");

    device.close().unwrap();
    device.close().unwrap();
    assert!(device.is_closed());

    assert!(matches!(
        device.delete(&key, "/a/c/o", ts(1.0)),
        Err(PackError::Unmounted(_))
    ));
    assert!(matches!(
        device.new_writer(&key, 1),
        Err(PackError::Unmounted(_))
    ));
}

#[test]
fn test_reopen_keeps_objects_and_clears_tmp() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("sda")).unwrap();
    let body = vec![6u8; SMALL_OBJECT_MAX as usize + 1];

    let (small, large) = {
        let device = PackDevice::open(&config(temp.path()), "sda", 1).unwrap();
        let small = put(&device, 1, "/a/c/s", ts(0.0), b"small");
        let large = put(&device, 1, "/a/c/l", ts(0.0), &body);
        std::fs::write(device.objects_dir().join("tmp").join("stale"), b"junk").unwrap();
        (small, large)
    };

    assert!(temp.path().join("sda").join("objects-1").is_dir());
    assert!(temp.path().join("sda").join("pack-meta-1").is_dir());

    let device = PackDevice::open(&config(temp.path()), "sda", 1).unwrap();
    assert_eq!(device.read_object(&small).unwrap().1, b"small");
    assert_eq!(device.read_object(&large).unwrap().1, body);
    assert_eq!(
        std::fs::read_dir(device.objects_dir().join("tmp")).unwrap().count(),
        0
    );
}

#[test]
fn test_open_missing_device() {
    let temp = TempDir::new().unwrap();
    let result = PackDevice::open(&config(temp.path()), "nope", 0);
    assert!(matches!(result, Err(PackError::NotFound(_))));
}

// =============================================================================
// Manager Tests
// =============================================================================

#[test]
fn test_manager_opens_devices_per_policy() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("sda")).unwrap();
    std::fs::create_dir_all(temp.path().join("sdb")).unwrap();
    let mut cfg = config(temp.path());
    cfg.policies = vec![0, 1];

    let mgr = PackDeviceMgr::open(cfg).unwrap();
    assert_eq!(mgr.devices().len(), 4);
    assert_eq!(mgr.get("sdb", 1).unwrap().policy(), 1);
    assert!(matches!(mgr.get("sdz", 0), Err(PackError::NotFound(_))));
    assert!(matches!(mgr.get("sda", 5), Err(PackError::NotFound(_))));

    std::fs::create_dir_all(temp.path().join("sdc")).unwrap();
    assert!(matches!(mgr.get("sdc", 0), Err(PackError::Unmounted(_))));
    mgr.refresh().unwrap();
    assert!(mgr.get("sdc", 0).is_ok());

    mgr.close_device("sda", 0).unwrap();
    assert!(matches!(mgr.get("sda", 0), Err(PackError::Unmounted(_))));
    mgr.close_all().unwrap();
    assert!(mgr.devices().is_empty());
}

#[test]
fn test_manager_mount_check_skips_plain_directories() {
    let temp = TempDir::new().unwrap();
    std::fs::create_dir_all(temp.path().join("sda")).unwrap();
    let mut cfg = config(temp.path());
    cfg.mount_check = true;

    let mgr = PackDeviceMgr::open(cfg).unwrap();
    assert!(mgr.devices().is_empty());
    assert!(matches!(mgr.get("sda", 0), Err(PackError::Unmounted(_))));
}

#[test]
fn test_manager_requires_policies() {
    let temp = TempDir::new().unwrap();
    let mut cfg = config(temp.path());
    cfg.policies.clear();
    assert!(matches!(PackDeviceMgr::open(cfg), Err(PackError::Config(_))));
}
