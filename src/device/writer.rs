//! Object writes: PUT, POST and DELETE
//!
//! Every commit follows the same order:
//! 1. clear stale sibling index rows
//! 2. write the bytes (needle append, or rename into the hashed directory)
//! 3. persist the new index row
//! 4. invalidate the suffix hash and queue reclamation of superseded bytes
//!
//! A crash between steps leaves rows that readers still resolve correctly by
//! comparing timestamps.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};

use sha2::{Digest, Sha256};

use crate::cancel::{copy_exact, CancelToken};
use crate::error::{PackError, Result};
use crate::needle::{align_up, NeedleHeader, HEADER_SIZE};
use crate::object::{
    is_small_size, IndexRecord, NeedleIndex, ObjectKey, ObjectMeta, PartType, Timestamp,
    CONTENT_LENGTH, ETAG,
};

use super::{ObjectParts, ObjectState, PackDevice, Task};

/// Metadata bytes reserved up front in a small-object buffer
const META_RESERVE: usize = 512;

enum Sink {
    /// Header placeholder followed by the data
    Small(Vec<u8>),
    Large { file: File, path: PathBuf },
}

/// Streams one object's data, then commits it with its metadata
pub struct ObjectWriter<'a> {
    device: &'a PackDevice,
    key: ObjectKey,
    declared: u64,
    written: u64,
    hasher: Sha256,
    sink: Option<Sink>,
}

impl PackDevice {
    /// Start writing `size` bytes for `key`
    ///
    /// Objects up to the small-object threshold are buffered in memory and
    /// become needles; larger ones stream to a temp file.
    pub fn new_writer(&self, key: &ObjectKey, size: u64) -> Result<ObjectWriter<'_>> {
        if self.is_closed() {
            return Err(PackError::Unmounted(self.device().to_string()));
        }

        let sink = if is_small_size(size) {
            let capacity = align_up((HEADER_SIZE + size as usize + META_RESERVE) as u64) as usize;
            let mut buf = Vec::with_capacity(capacity);
            buf.resize(HEADER_SIZE, 0);
            Sink::Small(buf)
        } else {
            let path = self
                .tmp_dir()
                .join(format!("{}.{:016x}", key.hash, rand::random::<u64>()));
            let file = OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)?;
            Sink::Large { file, path }
        };

        Ok(ObjectWriter {
            device: self,
            key: key.clone(),
            declared: size,
            written: 0,
            hasher: Sha256::new(),
            sink: Some(sink),
        })
    }

    /// Stream `size` bytes from `body` and commit them under `meta`
    pub fn put_object<R: Read + ?Sized>(
        &self,
        key: &ObjectKey,
        meta: ObjectMeta,
        size: u64,
        body: &mut R,
        cancel: &CancelToken,
    ) -> Result<()> {
        let mut writer = self.new_writer(key, size)?;
        copy_exact(body, &mut writer, size, cancel)?;
        writer.commit(meta)
    }

    /// Apply a POST to an existing object
    ///
    /// System metadata is unioned with the previous POST's, user metadata
    /// replaced. Small objects get a meta-only needle; large objects a
    /// `.meta` file.
    pub fn commit_meta(&self, key: &ObjectKey, update: ObjectMeta) -> Result<()> {
        let _op = self.begin_op()?;
        let _lock = self.lock_object(key);
        let _writes = self.partition_write(key.partition);

        let parts = self.load_parts(key)?;
        let loaded = match self.resolve(key, &parts) {
            ObjectState::Exists(loaded) => loaded,
            ObjectState::Deleted(_) | ObjectState::Missing => {
                return Err(PackError::NotFound(key.to_string()))
            }
        };
        if update.timestamp <= *loaded.data_timestamp()
            || parts
                .meta
                .as_ref()
                .map_or(false, |m| update.timestamp <= *m.timestamp())
        {
            return Err(PackError::Conflict(format!(
                "{} already has metadata at or after {}",
                key, update.timestamp
            )));
        }

        let mut meta = ObjectMeta::new(loaded.data_meta.name.clone(), update.timestamp.clone());
        if let Some(previous) = &loaded.meta_update {
            meta.system_meta = previous.system_meta.clone();
        }
        for (k, v) in update.system_meta {
            if k != ETAG && k != CONTENT_LENGTH {
                meta.system_meta.insert(k, v);
            }
        }
        meta.user_meta = update.user_meta;

        let index_key = key.index_key(PartType::Meta);
        if loaded.object.is_small() {
            let needle = encode_needle(Vec::from([0u8; HEADER_SIZE]), &meta)?;
            let bundle = self.bundle(key.partition)?;
            let mut record = IndexRecord { needle: None, meta };
            bundle.append(&needle.bytes, |offset| {
                record.needle = Some(needle.index_at(offset));
                self.index().put(&index_key, &record.encode()?)
            })?;
        } else {
            let path = self.large_path(key, PartType::Meta, &meta.timestamp);
            let bytes = bincode::serialize(&meta)?;
            self.write_file_durable(&path, &bytes)?;
            let record = IndexRecord { needle: None, meta };
            if let Err(e) = self.index().put(&index_key, &record.encode()?) {
                let _ = fs::remove_file(&path);
                return Err(e);
            }
        }

        self.invalidate_suffix(key)?;
        if let Some(previous) = &parts.meta {
            self.reclaim(key, PartType::Meta, previous);
        }
        tracing::debug!(key = %key, "committed metadata");
        Ok(())
    }

    /// Delete an object at `timestamp`
    ///
    /// Writes a TOMBSTONE row (plus a `.ts` file for large objects), then
    /// drops the DATA and META rows and queues reclamation of their bytes.
    pub fn delete(&self, key: &ObjectKey, name: &str, timestamp: Timestamp) -> Result<()> {
        let _op = self.begin_op()?;
        let _lock = self.lock_object(key);
        let _writes = self.partition_write(key.partition);

        let parts = self.load_parts(key)?;
        check_newer(key, &parts, &timestamp)?;

        let large = parts.data.as_ref().map_or(false, |d| !d.is_small());
        if large {
            let path = self.large_path(key, PartType::Tombstone, &timestamp);
            self.write_file_durable(&path, &[])?;
        }

        let record = IndexRecord {
            needle: None,
            meta: ObjectMeta::new(name, timestamp.clone()),
        };
        self.index()
            .put(&key.index_key(PartType::Tombstone), &record.encode()?)?;
        self.clear_rows(key, &parts, &[PartType::Data, PartType::Meta])?;
        self.invalidate_suffix(key)?;

        self.reclaim_parts(key, &parts);
        if large {
            self.tasks().submit(Task::CleanupDir {
                dir: self.hashed_dir(key),
                before: timestamp,
            });
        }
        tracing::debug!(key = %key, "committed tombstone");
        Ok(())
    }

    fn commit_small(
        &self,
        key: &ObjectKey,
        parts: &ObjectParts,
        buf: Vec<u8>,
        meta: ObjectMeta,
    ) -> Result<()> {
        let needle = encode_needle(buf, &meta)?;

        self.clear_rows(key, parts, &[PartType::Tombstone, PartType::Meta])?;

        let bundle = self.bundle(key.partition)?;
        let index_key = key.index_key(PartType::Data);
        let mut record = IndexRecord { needle: None, meta };
        bundle.append(&needle.bytes, |offset| {
            record.needle = Some(needle.index_at(offset));
            self.index().put(&index_key, &record.encode()?)
        })?;

        self.invalidate_suffix(key)?;
        self.reclaim_parts(key, parts);
        Ok(())
    }

    fn commit_large(
        &self,
        key: &ObjectKey,
        parts: &ObjectParts,
        file: File,
        tmp_path: &Path,
        meta: ObjectMeta,
    ) -> Result<()> {
        file.sync_all()?;
        drop(file);

        self.clear_rows(key, parts, &[PartType::Tombstone, PartType::Meta])?;

        let path = self.large_path(key, PartType::Data, &meta.timestamp);
        let dir = self.hashed_dir(key);
        fs::create_dir_all(&dir)?;
        fs::rename(tmp_path, &path)?;
        File::open(&dir)?.sync_all()?;

        let timestamp = meta.timestamp.clone();
        let record = IndexRecord { needle: None, meta };
        if let Err(e) = self
            .index()
            .put(&key.index_key(PartType::Data), &record.encode()?)
        {
            let _ = fs::remove_file(&path);
            return Err(e);
        }

        self.invalidate_suffix(key)?;
        self.reclaim_parts(key, parts);
        self.tasks().submit(Task::CleanupDir {
            dir,
            before: timestamp,
        });
        Ok(())
    }

    fn reclaim_parts(&self, key: &ObjectKey, parts: &ObjectParts) {
        let rows = [
            (PartType::Data, &parts.data),
            (PartType::Meta, &parts.meta),
            (PartType::Tombstone, &parts.tombstone),
        ];
        for (part, row) in rows {
            if let Some(record) = row {
                self.reclaim(key, part, record);
            }
        }
    }

    /// Write `bytes` to `path` via the device tmp dir, fsyncing file and
    /// directory
    pub(crate) fn write_file_durable(&self, path: &Path, bytes: &[u8]) -> Result<()> {
        let tmp = self
            .tmp_dir()
            .join(format!("write.{:016x}", rand::random::<u64>()));
        {
            let mut file = File::create(&tmp)?;
            file.write_all(bytes)?;
            file.sync_all()?;
        }
        let dir = path
            .parent()
            .ok_or_else(|| PackError::Config(format!("{} has no parent", path.display())))?;
        fs::create_dir_all(dir)?;
        fs::rename(&tmp, path)?;
        File::open(dir)?.sync_all()?;
        Ok(())
    }
}

/// A write must be strictly newer than whatever defines the object now
fn check_newer(key: &ObjectKey, parts: &ObjectParts, timestamp: &Timestamp) -> Result<()> {
    match parts.state_timestamp() {
        Some(current) if timestamp <= current => Err(PackError::Conflict(format!(
            "{} already at {} (offered {})",
            key, current, timestamp
        ))),
        _ => Ok(()),
    }
}

/// A fully encoded, aligned needle
struct EncodedNeedle {
    bytes: Vec<u8>,
    header: NeedleHeader,
}

impl EncodedNeedle {
    fn index_at(&self, offset: u64) -> NeedleIndex {
        NeedleIndex {
            offset,
            size: self.header.needle_size as u64,
            data_offset: offset + self.header.data_offset as u64,
            data_size: self.header.data_size as u64,
            meta_offset: offset + self.header.meta_offset as u64,
            meta_size: self.header.meta_size as u64,
        }
    }
}

/// Finish `buf` (header placeholder + data) into a needle carrying `meta`
fn encode_needle(mut buf: Vec<u8>, meta: &ObjectMeta) -> Result<EncodedNeedle> {
    let data_size = (buf.len() - HEADER_SIZE) as u64;
    let meta_bytes = bincode::serialize(meta)?;
    let meta_size = u32::try_from(meta_bytes.len())
        .map_err(|_| PackError::Protocol("object metadata too large".to_string()))?;

    let header = NeedleHeader::new(data_size, meta_size);
    buf.extend_from_slice(&meta_bytes);
    buf.resize(header.needle_size as usize, 0);
    header.encode_into(&mut buf[..HEADER_SIZE]);
    Ok(EncodedNeedle { bytes: buf, header })
}

impl ObjectWriter<'_> {
    pub fn key(&self) -> &ObjectKey {
        &self.key
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    /// Durably store the written data under `meta`
    ///
    /// Fills in etag, content-length and size from the data. A caller-supplied
    /// etag must match.
    pub fn commit(mut self, mut meta: ObjectMeta) -> Result<()> {
        if self.written != self.declared {
            return Err(PackError::Protocol(format!(
                "short body for {}: declared {} bytes, got {}",
                self.key, self.declared, self.written
            )));
        }

        let etag = hex::encode(std::mem::take(&mut self.hasher).finalize());
        if let Some(expected) = meta.etag() {
            if expected != etag {
                return Err(PackError::Protocol(format!(
                    "etag mismatch for {}: expected {}, computed {}",
                    self.key, expected, etag
                )));
            }
        }
        meta.system_meta.insert(ETAG.to_string(), etag);
        meta.system_meta
            .insert(CONTENT_LENGTH.to_string(), self.written.to_string());
        meta.data_size = self.written;

        let device = self.device;
        let _op = device.begin_op()?;
        let _lock = device.lock_object(&self.key);
        let _writes = device.partition_write(self.key.partition);
        let parts = device.load_parts(&self.key)?;
        check_newer(&self.key, &parts, &meta.timestamp)?;

        let result = match self.sink.take() {
            Some(Sink::Small(buf)) => device.commit_small(&self.key, &parts, buf, meta),
            Some(Sink::Large { file, path }) => {
                let result = device.commit_large(&self.key, &parts, file, &path, meta);
                if result.is_err() {
                    let _ = fs::remove_file(&path);
                }
                result
            }
            None => Err(PackError::Protocol("writer already committed".to_string())),
        };

        if result.is_ok() {
            tracing::debug!(key = %self.key, size = self.written, "committed object");
        }
        result
    }
}

impl Write for ObjectWriter<'_> {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        if self.written + buf.len() as u64 > self.declared {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                "write exceeds declared object size",
            ));
        }
        match self.sink.as_mut() {
            Some(Sink::Small(data)) => data.extend_from_slice(buf),
            Some(Sink::Large { file, .. }) => file.write_all(buf)?,
            None => {
                return Err(io::Error::new(
                    io::ErrorKind::Other,
                    "writer already committed",
                ))
            }
        }
        self.hasher.update(buf);
        self.written += buf.len() as u64;
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        match self.sink.as_mut() {
            Some(Sink::Large { file, .. }) => file.flush(),
            _ => Ok(()),
        }
    }
}

impl Drop for ObjectWriter<'_> {
    fn drop(&mut self) {
        if let Some(Sink::Large { path, .. }) = self.sink.take() {
            let _ = fs::remove_file(path);
        }
    }
}
