//! Processing lock: one active mutating sync per fabric.
//!
//! The lock is a sidecar file under `.hnp/`, created atomically with
//! `create_new`. Acquisition is non-blocking: a live lock fails the caller
//! immediately with `LockContention`; a lock older than [`STALE_AFTER_SECONDS`]
//! is presumed to belong to a crashed process and is reclaimed by deletion.
//! Release is RAII (`Drop`), so the file goes away on every exit path
//! including panic unwind. Validation-only operations never acquire the lock.

use crate::core::error::HnpError;
use crate::core::layout::FgdLayout;
use crate::core::time;
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::PathBuf;

pub const STALE_AFTER_SECONDS: i64 = 300;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LockInfo {
    pub pid: u32,
    pub started_at: String,
    pub fabric: String,
}

#[derive(Debug)]
pub struct ProcessingLock {
    path: PathBuf,
}

impl ProcessingLock {
    /// Non-blocking acquisition. A stale lock is reclaimed and acquisition
    /// retried exactly once; losing the retry race is still contention.
    pub fn acquire(layout: &FgdLayout, fabric_id: &str) -> Result<ProcessingLock, HnpError> {
        fs::create_dir_all(layout.meta_dir()).map_err(HnpError::IoError)?;
        let path = layout.lock_path();

        match Self::try_create(&path, fabric_id) {
            Ok(lock) => Ok(lock),
            Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                if Self::is_stale(&path) {
                    let _ = fs::remove_file(&path);
                    match Self::try_create(&path, fabric_id) {
                        Ok(lock) => Ok(lock),
                        Err(_) => Err(HnpError::LockContention(fabric_id.to_string())),
                    }
                } else {
                    Err(HnpError::LockContention(fabric_id.to_string()))
                }
            }
            Err(e) => Err(HnpError::IoError(e)),
        }
    }

    fn try_create(path: &PathBuf, fabric_id: &str) -> Result<ProcessingLock, std::io::Error> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        let info = LockInfo {
            pid: std::process::id(),
            started_at: time::now_rfc3339(),
            fabric: fabric_id.to_string(),
        };
        let body = serde_yaml_ng::to_string(&info)
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        file.write_all(body.as_bytes())?;
        Ok(ProcessingLock { path: path.clone() })
    }

    /// A lock body that cannot be read or parsed counts as stale: its
    /// writer died between create and write.
    fn is_stale(path: &PathBuf) -> bool {
        let Ok(content) = fs::read_to_string(path) else {
            return true;
        };
        let Ok(info) = serde_yaml_ng::from_str::<LockInfo>(&content) else {
            return true;
        };
        match time::age_seconds(&info.started_at) {
            Some(age) => age > STALE_AFTER_SECONDS,
            None => true,
        }
    }

    pub fn read(layout: &FgdLayout) -> Option<LockInfo> {
        let content = fs::read_to_string(layout.lock_path()).ok()?;
        serde_yaml_ng::from_str(&content).ok()
    }
}

impl Drop for ProcessingLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}
