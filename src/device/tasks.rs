//! Background Task Queue
//!
//! Deferred work that must not block a commit: reclaiming space held by
//! superseded versions and invalidating suffix hashes. Each device owns one
//! queue; closing the device drains it.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::thread::JoinHandle;

use crossbeam::channel::{self, Receiver, Sender};
use parking_lot::{Condvar, Mutex};

use crate::error::Result;
use crate::needle::Bundle;
use crate::object::Timestamp;

/// One unit of deferred work
pub enum Task {
    /// Deallocate a superseded needle
    PunchHole {
        bundle: Arc<Bundle>,
        offset: u64,
        len: u64,
    },
    /// Remove a superseded large-object file, and its directory if now empty
    RemoveFile { path: PathBuf },
    /// Remove files of a hashed directory older than `before`
    CleanupDir { dir: PathBuf, before: Timestamp },
    /// Record a suffix whose cached hash is stale
    InvalidateSuffix {
        lock: Arc<Mutex<()>>,
        invalid_path: PathBuf,
        suffix: String,
    },
}

impl Task {
    fn run(self) -> Result<()> {
        match self {
            Task::PunchHole {
                bundle,
                offset,
                len,
            } => {
                if !bundle.punch_hole(offset, len)? {
                    tracing::debug!(
                        path = %bundle.path().display(),
                        offset,
                        len,
                        "hole punching unsupported, space not reclaimed"
                    );
                }
                Ok(())
            }
            Task::RemoveFile { path } => {
                remove_if_exists(&path)?;
                if let Some(parent) = path.parent() {
                    // Fails harmlessly when the directory still has entries
                    let _ = fs::remove_dir(parent);
                }
                Ok(())
            }
            Task::CleanupDir { dir, before } => {
                let entries = match fs::read_dir(&dir) {
                    Ok(entries) => entries,
                    Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(()),
                    Err(e) => return Err(e.into()),
                };
                for entry in entries {
                    let path = entry?.path();
                    let stale = path
                        .file_name()
                        .and_then(|name| name.to_str())
                        .and_then(|name| name.rsplit_once('.'))
                        .and_then(|(stem, _)| Timestamp::parse(stem).ok())
                        .map_or(false, |ts| ts < before);
                    if stale {
                        remove_if_exists(&path)?;
                    }
                }
                Ok(())
            }
            Task::InvalidateSuffix {
                lock,
                invalid_path,
                suffix,
            } => append_invalidation(&lock, &invalid_path, &suffix),
        }
    }

    fn name(&self) -> &'static str {
        match self {
            Task::PunchHole { .. } => "punch_hole",
            Task::RemoveFile { .. } => "remove_file",
            Task::CleanupDir { .. } => "cleanup_dir",
            Task::InvalidateSuffix { .. } => "invalidate_suffix",
        }
    }
}

/// Append `suffix` to a partition's invalidation file
pub(crate) fn append_invalidation(
    lock: &Mutex<()>,
    invalid_path: &std::path::Path,
    suffix: &str,
) -> Result<()> {
    let _guard = lock.lock();
    if let Some(parent) = invalid_path.parent() {
        fs::create_dir_all(parent)?;
    }
    let mut file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(invalid_path)?;
    file.write_all(format!("{}\n", suffix).as_bytes())?;
    Ok(())
}

fn remove_if_exists(path: &std::path::Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}

/// Worker pool executing [`Task`]s with drain-on-shutdown
pub struct TaskQueue {
    name: String,
    sender: Mutex<Option<Sender<Task>>>,
    pending: Arc<Pending>,
    workers: Mutex<Vec<JoinHandle<()>>>,
}

#[derive(Default)]
struct Pending {
    count: Mutex<usize>,
    idle: Condvar,
}

impl Pending {
    fn done(&self) {
        let mut count = self.count.lock();
        *count -= 1;
        if *count == 0 {
            self.idle.notify_all();
        }
    }
}

impl TaskQueue {
    pub fn new(name: impl Into<String>, workers: usize) -> Result<Self> {
        let name = name.into();
        let (sender, receiver) = channel::unbounded::<Task>();
        let pending = Arc::new(Pending::default());

        let mut handles = Vec::with_capacity(workers.max(1));
        for i in 0..workers.max(1) {
            let receiver: Receiver<Task> = receiver.clone();
            let pending = Arc::clone(&pending);
            let queue_name = name.clone();
            let handle = std::thread::Builder::new()
                .name(format!("tasks-{}-{}", queue_name, i))
                .spawn(move || {
                    for task in receiver.iter() {
                        let task_name = task.name();
                        if let Err(e) = task.run() {
                            tracing::warn!(queue = %queue_name, task = task_name, error = %e, "background task failed");
                        }
                        pending.done();
                    }
                })?;
            handles.push(handle);
        }

        Ok(Self {
            name,
            sender: Mutex::new(Some(sender)),
            pending,
            workers: Mutex::new(handles),
        })
    }

    /// Queue a task; after shutdown it runs inline
    pub fn submit(&self, task: Task) {
        let sender = self.sender.lock().clone();
        match sender {
            Some(sender) => {
                *self.pending.count.lock() += 1;
                if let Err(rejected) = sender.send(task) {
                    self.pending.done();
                    Self::run_inline(&self.name, rejected.into_inner());
                }
            }
            None => Self::run_inline(&self.name, task),
        }
    }

    fn run_inline(queue: &str, task: Task) {
        let task_name = task.name();
        if let Err(e) = task.run() {
            tracing::warn!(queue = %queue, task = task_name, error = %e, "background task failed");
        }
    }

    /// Block until every queued task has finished
    pub fn drain(&self) {
        let mut count = self.pending.count.lock();
        while *count > 0 {
            self.pending.idle.wait(&mut count);
        }
    }

    /// Number of queued or running tasks
    pub fn pending(&self) -> usize {
        *self.pending.count.lock()
    }

    /// Stop accepting work, finish what is queued and join the workers
    pub fn shutdown(&self) {
        self.sender.lock().take();
        self.drain();
        for handle in self.workers.lock().drain(..) {
            if handle.join().is_err() {
                tracing::error!(queue = %self.name, "task worker panicked");
            }
        }
    }
}

impl Drop for TaskQueue {
    fn drop(&mut self) {
        self.shutdown();
    }
}
