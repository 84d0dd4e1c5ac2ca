// Copyright 2026 Layne Penney
// SPDX-License-Identifier: AGPL-3.0-or-later

//! File persistence primitives shared by the task board, mailboxes, and
//! team directory.
//!
//! Two disciplines live here:
//!
//! - **Atomic writes**: every shared JSON document is written to a sibling
//!   temp file and renamed into place, so a failed write never leaves a
//!   half-written file visible.
//! - **File locking with staleness recovery**: cross-process mutual exclusion
//!   via a create-if-absent lock file carrying a unique owner token. A lock
//!   older than the staleness threshold is presumed abandoned by a crashed
//!   holder and forcibly reclaimed, which keeps the board live across worker
//!   crashes.

use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::LockError;
use crate::types::{generate_id, now};

/// Retry and staleness policy for file locks.
#[derive(Debug, Clone, Copy)]
pub struct LockOptions {
    /// Maximum acquisition attempts before giving up.
    pub max_attempts: u32,
    /// First backoff delay; doubles on each contended attempt.
    pub initial_backoff: Duration,
    /// Total time budget across all attempts.
    pub max_wait: Duration,
    /// A lock file older than this is treated as abandoned and reclaimed.
    pub stale_after: Duration,
}

impl Default for LockOptions {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            initial_backoff: Duration::from_millis(100),
            max_wait: Duration::from_secs(5),
            stale_after: Duration::from_secs(30),
        }
    }
}

/// On-disk body of a lock file. The owner token is what distinguishes a
/// reclaimed lock from one we still hold.
#[derive(Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LockBody {
    owner: String,
    pid: u32,
    acquired_at: DateTime<Utc>,
}

/// An acquired file lock. Released explicitly via [`LockGuard::release`] or
/// on drop; release only deletes the lock file while the on-disk owner token
/// still matches, so a holder that lost its lock to staleness recovery never
/// deletes the new holder's lock.
pub struct LockGuard {
    path: PathBuf,
    owner: String,
    released: bool,
}

impl LockGuard {
    /// The unique owner token for this acquisition.
    pub fn owner(&self) -> &str {
        &self.owner
    }

    /// Release the lock.
    pub fn release(mut self) {
        self.release_inner();
    }

    fn release_inner(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        match read_owner(&self.path) {
            Some(owner) if owner == self.owner => {
                if let Err(err) = std::fs::remove_file(&self.path) {
                    warn!(path = %self.path.display(), %err, "Failed to remove lock file");
                }
            }
            Some(_) => {
                // Our lock was reclaimed as stale; the file belongs to
                // someone else now.
                warn!(path = %self.path.display(), "Lock was reclaimed while held, not removing");
            }
            None => {}
        }
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        self.release_inner();
    }
}

/// Exclusive file-based lock with retry, backoff, and staleness recovery.
pub struct FileLock;

impl FileLock {
    /// Acquire the lock at `path`, retrying with exponential backoff within
    /// the configured budget. A stale lock file is removed and re-contended.
    pub async fn acquire(path: &Path, options: &LockOptions) -> Result<LockGuard, LockError> {
        let owner = generate_id();
        let started = Instant::now();
        let mut backoff = options.initial_backoff;
        let mut attempts: u32 = 0;

        loop {
            attempts += 1;
            match try_create(path, &owner) {
                Ok(()) => {
                    debug!(path = %path.display(), owner = %owner, attempts, "Lock acquired");
                    return Ok(LockGuard {
                        path: path.to_path_buf(),
                        owner,
                        released: false,
                    });
                }
                Err(err) if err.kind() == std::io::ErrorKind::AlreadyExists => {
                    if let Some(age) = lock_age(path) {
                        if age > options.stale_after {
                            let dead_owner = read_owner(path).unwrap_or_default();
                            warn!(
                                path = %path.display(),
                                age_secs = age.as_secs(),
                                dead_owner = %dead_owner,
                                "Reclaiming stale lock"
                            );
                            // Another contender may reclaim first; the
                            // ensuing create_new race is safe either way.
                            let _ = std::fs::remove_file(path);
                            continue;
                        }
                    }

                    if attempts >= options.max_attempts
                        || started.elapsed() + backoff > options.max_wait
                    {
                        return Err(LockError::Contended {
                            path: path.to_path_buf(),
                            attempts,
                        });
                    }
                    tokio::time::sleep(backoff).await;
                    backoff *= 2;
                }
                Err(err) => {
                    return Err(LockError::Io {
                        path: path.to_path_buf(),
                        message: err.to_string(),
                    });
                }
            }
        }
    }
}

fn try_create(path: &Path, owner: &str) -> std::io::Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let file = std::fs::OpenOptions::new()
        .write(true)
        .create_new(true)
        .open(path)?;
    let body = LockBody {
        owner: owner.to_string(),
        pid: std::process::id(),
        acquired_at: now(),
    };
    serde_json::to_writer(file, &body)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::Other, e))?;
    Ok(())
}

fn read_owner(path: &Path) -> Option<String> {
    let content = std::fs::read_to_string(path).ok()?;
    let body: LockBody = serde_json::from_str(&content).ok()?;
    Some(body.owner)
}

fn lock_age(path: &Path) -> Option<Duration> {
    let modified = std::fs::metadata(path).ok()?.modified().ok()?;
    modified.elapsed().ok()
}

/// Write `bytes` to `path` via a sibling temp file and atomic rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let parent = path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent)?;

    let mut tmp = path.as_os_str().to_os_string();
    tmp.push(format!(".tmp-{}", generate_id()));
    let tmp = PathBuf::from(tmp);

    std::fs::write(&tmp, bytes)?;
    std::fs::rename(&tmp, path)
}

/// Load a JSON document, returning `None` when the file does not exist.
/// Corrupted JSON surfaces as `InvalidData` for callers to classify.
pub fn load_json<T: DeserializeOwned>(path: &Path) -> std::io::Result<Option<T>> {
    let content = match std::fs::read_to_string(path) {
        Ok(content) => content,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
        Err(err) => return Err(err),
    };
    serde_json::from_str(&content)
        .map(Some)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
}

/// Store a JSON document atomically, pretty-printed for inspectability.
pub fn store_json<T: Serialize>(path: &Path, value: &T) -> std::io::Result<()> {
    let json = serde_json::to_vec_pretty(value)
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;
    write_atomic(path, &json)
}
