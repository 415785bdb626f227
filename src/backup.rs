use crate::error::MemoryResult;
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::mpsc::{self, RecvTimeoutError, Sender};
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const BACKUP_PREFIX: &str = "memories_backup_";
pub const BACKUP_EXT: &str = "bin";
pub const DEFAULT_KEEP: usize = 5;

/// Timestamped copies of the table file with bounded retention
#[derive(Debug, Clone)]
pub struct BackupManager {
    source: PathBuf,
    dir: PathBuf,
    keep: usize,
}

impl BackupManager {
    pub fn new(source: impl Into<PathBuf>, dir: impl Into<PathBuf>, keep: usize) -> Self {
        Self {
            source: source.into(),
            dir: dir.into(),
            keep,
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Name for a backup taken at `at`; names sort in time order
    fn backup_name(at: DateTime<Utc>) -> String {
        format!(
            "{}{}.{}",
            BACKUP_PREFIX,
            at.format("%Y%m%d_%H%M%S_%6f"),
            BACKUP_EXT
        )
    }

    /// A path no existing backup uses
    fn next_path(&self) -> PathBuf {
        let mut at = Utc::now();
        loop {
            let path = self.dir.join(Self::backup_name(at));
            if !path.exists() {
                return path;
            }
            at = at + ChronoDuration::microseconds(1);
        }
    }

    fn copy_source(&self) -> MemoryResult<PathBuf> {
        fs::create_dir_all(&self.dir)?;
        let path = self.next_path();
        fs::copy(&self.source, &path)?;
        Ok(path)
    }

    /// Copy the table into the backup directory and prune old copies.
    ///
    /// Returns `None` when there is no table file yet.
    pub fn snapshot(&self) -> MemoryResult<Option<PathBuf>> {
        if !self.source.exists() {
            tracing::debug!(source = %self.source.display(), "nothing to back up");
            return Ok(None);
        }

        let path = self.copy_source()?;
        tracing::info!(backup = %path.display(), "created backup");
        self.prune()?;
        Ok(Some(path))
    }

    /// Move a copy of an unreadable table out of the way
    pub fn quarantine(&self) -> MemoryResult<PathBuf> {
        let path = self.copy_source()?;
        self.prune()?;
        Ok(path)
    }

    /// Backups, oldest first
    pub fn list(&self) -> MemoryResult<Vec<PathBuf>> {
        if !self.dir.exists() {
            return Ok(Vec::new());
        }

        let mut backups: Vec<PathBuf> = fs::read_dir(&self.dir)?
            .filter_map(|entry| entry.ok())
            .map(|entry| entry.path())
            .filter(|path| {
                path.is_file()
                    && path
                        .file_name()
                        .and_then(|n| n.to_str())
                        .map_or(false, |n| n.starts_with(BACKUP_PREFIX))
            })
            .collect();
        backups.sort();
        Ok(backups)
    }

    /// Delete all but the newest `keep` backups; returns how many went
    pub fn prune(&self) -> MemoryResult<usize> {
        let backups = self.list()?;
        let excess = backups.len().saturating_sub(self.keep);

        for path in &backups[..excess] {
            fs::remove_file(path)?;
            tracing::debug!(backup = %path.display(), "pruned backup");
        }
        Ok(excess)
    }
}

/// Handle to the background backup thread; stops it on drop
pub struct BackupHandle {
    stop: Option<Sender<()>>,
    thread: Option<JoinHandle<()>>,
}

impl BackupHandle {
    /// Stop the loop and wait for the thread to exit
    pub fn stop(mut self) {
        self.shutdown();
    }

    fn shutdown(&mut self) {
        if let Some(stop) = self.stop.take() {
            let _ = stop.send(());
        }
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                tracing::error!("backup thread panicked");
            }
        }
    }
}

impl Drop for BackupHandle {
    fn drop(&mut self) {
        self.shutdown();
    }
}

/// Run `task` every `interval` on a dedicated thread until stopped
pub fn spawn_backup_loop<F>(interval: Duration, mut task: F) -> io::Result<BackupHandle>
where
    F: FnMut() + Send + 'static,
{
    let (stop, rx) = mpsc::channel::<()>();

    let thread = thread::Builder::new()
        .name("memvault-backup".to_string())
        .spawn(move || loop {
            match rx.recv_timeout(interval) {
                Err(RecvTimeoutError::Timeout) => task(),
                Ok(()) | Err(RecvTimeoutError::Disconnected) => break,
            }
        })?;

    tracing::info!(interval_secs = interval.as_secs_f64(), "backup loop started");
    Ok(BackupHandle {
        stop: Some(stop),
        thread: Some(thread),
    })
}
