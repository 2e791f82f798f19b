//! Atomic publication of stage outputs.
//!
//! Every artifact is written under a staging name next to its final path and
//! renamed into place only once complete, so readers never observe a
//! partially written file or directory. Staging names start with `.` and end
//! in `.partial`; nothing in the output layout matches them.

use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{StoreError, StoreResult};

/// Bounded retry with exponential backoff for transient IO failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    /// Maximum number of retry attempts after the first failure.
    pub max_retries: u32,
    /// Initial retry delay in milliseconds (doubles each retry).
    pub retry_delay_ms: u64,
    /// Upper bound on the retry delay in milliseconds.
    pub max_retry_delay_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay_ms: 200,
            max_retry_delay_ms: 5_000,
        }
    }
}

impl RetryPolicy {
    /// No retries at all.
    pub fn none() -> Self {
        Self {
            max_retries: 0,
            ..Default::default()
        }
    }

    /// Run `op`, retrying transient failures up to `max_retries` times.
    pub fn run<T, F>(&self, what: &str, op: F) -> StoreResult<T>
    where
        F: FnMut() -> StoreResult<T>,
    {
        self.run_with(what, StoreError::is_transient, op)
    }

    /// Like [`run`](Self::run) for any error type; `is_transient` decides
    /// which failures are retried.
    pub fn run_with<T, E, F, P>(&self, what: &str, is_transient: P, mut op: F) -> Result<T, E>
    where
        F: FnMut() -> Result<T, E>,
        P: Fn(&E) -> bool,
        E: std::fmt::Display,
    {
        let mut retry_count = 0;
        let mut delay = Duration::from_millis(self.retry_delay_ms);
        let max_delay = Duration::from_millis(self.max_retry_delay_ms.max(self.retry_delay_ms));

        loop {
            match op() {
                Ok(value) => return Ok(value),
                Err(e) if is_transient(&e) && retry_count < self.max_retries => {
                    retry_count += 1;
                    warn!(
                        operation = what,
                        error = %e,
                        retry = retry_count,
                        max_retries = self.max_retries,
                        delay_ms = delay.as_millis() as u64,
                        "IO operation failed, retrying"
                    );
                    std::thread::sleep(delay);
                    delay = std::cmp::min(delay * 2, max_delay);
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Create `dir` and its parents, tolerating concurrent creation.
pub fn ensure_dir(dir: &Path, retry: &RetryPolicy) -> StoreResult<()> {
    retry.run("create_dir", || {
        fs::create_dir_all(dir).map_err(|e| StoreError::io(dir, e))
    })
}

/// Whether `path` is a staging name left behind by an interrupted write.
pub fn is_staging_name(path: &Path) -> bool {
    path.file_name()
        .and_then(|n| n.to_str())
        .is_some_and(|n| n.starts_with('.') && n.ends_with(".partial"))
}

/// Sibling staging path for `target`, unique within the process.
pub fn staging_path(target: &Path) -> PathBuf {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let name = target
        .file_name()
        .and_then(|n| n.to_str())
        .unwrap_or("output");
    let count = COUNTER.fetch_add(1, Ordering::Relaxed);
    target.with_file_name(format!(
        ".{}.{}-{}.partial",
        name,
        std::process::id(),
        count
    ))
}

/// Write a file through `write` at a staging path and rename it to `target`.
pub fn publish_file<F>(target: &Path, retry: &RetryPolicy, write: F) -> StoreResult<()>
where
    F: FnMut(&Path) -> StoreResult<()>,
{
    publish(target, retry, write, false)
}

/// Build a directory through `write` at a staging path and rename it to `target`.
///
/// An existing directory at `target` is replaced.
pub fn publish_dir<F>(target: &Path, retry: &RetryPolicy, write: F) -> StoreResult<()>
where
    F: FnMut(&Path) -> StoreResult<()>,
{
    publish(target, retry, write, true)
}

fn publish<F>(target: &Path, retry: &RetryPolicy, mut write: F, is_dir: bool) -> StoreResult<()>
where
    F: FnMut(&Path) -> StoreResult<()>,
{
    if let Some(parent) = target.parent() {
        ensure_dir(parent, retry)?;
    }

    retry.run("publish", || {
        let staging = staging_path(target);
        let result = write(&staging).and_then(|()| swap_into_place(&staging, target, is_dir));
        if result.is_err() {
            remove_path(&staging);
        }
        result
    })?;

    debug!(path = %target.display(), "Published");
    Ok(())
}

fn swap_into_place(staging: &Path, target: &Path, is_dir: bool) -> StoreResult<()> {
    if is_dir && target.exists() {
        // Directories cannot be renamed over a non-empty directory.
        let old = staging_path(target);
        fs::rename(target, &old).map_err(|e| StoreError::io(target, e))?;
        if let Err(e) = fs::rename(staging, target) {
            // Put the previous output back.
            if let Err(restore) = fs::rename(&old, target) {
                warn!(
                    path = %old.display(),
                    error = %restore,
                    "Failed to restore previous output"
                );
            }
            return Err(StoreError::io(target, e));
        }
        remove_path(&old);
        return Ok(());
    }
    fs::rename(staging, target).map_err(|e| StoreError::io(target, e))
}

fn remove_path(path: &Path) {
    let result = if path.is_dir() {
        fs::remove_dir_all(path)
    } else if path.exists() {
        fs::remove_file(path)
    } else {
        Ok(())
    };
    if let Err(e) = result {
        warn!(path = %path.display(), error = %e, "Failed to remove staging path");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;

    #[test]
    fn test_publish_file_replaces_atomically() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("nested").join("out.txt");

        publish_file(&target, &RetryPolicy::none(), |tmp| {
            assert!(is_staging_name(tmp));
            fs::write(tmp, b"first").map_err(|e| StoreError::io(tmp, e))
        })
        .unwrap();
        publish_file(&target, &RetryPolicy::none(), |tmp| {
            fs::write(tmp, b"second").map_err(|e| StoreError::io(tmp, e))
        })
        .unwrap();

        assert_eq!(fs::read_to_string(&target).unwrap(), "second");
        let leftovers: Vec<_> = fs::read_dir(target.parent().unwrap())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_staging_name(&e.path()))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_failed_write_leaves_no_target() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.zarr");

        let result = publish_dir(&target, &RetryPolicy::none(), |tmp| {
            fs::create_dir_all(tmp).map_err(|e| StoreError::io(tmp, e))?;
            fs::write(tmp.join("half"), b"x").map_err(|e| StoreError::io(tmp, e))?;
            Err(StoreError::invalid_metadata("boom"))
        });

        assert!(result.is_err());
        assert!(!target.exists());
        assert_eq!(fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn test_publish_dir_replaces_existing() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.zarr");
        for content in ["a", "b"] {
            publish_dir(&target, &RetryPolicy::none(), |tmp| {
                fs::create_dir_all(tmp).map_err(|e| StoreError::io(tmp, e))?;
                fs::write(tmp.join("f"), content).map_err(|e| StoreError::io(tmp, e))
            })
            .unwrap();
        }
        assert_eq!(fs::read_to_string(target.join("f")).unwrap(), "b");
    }

    #[test]
    fn test_failed_swap_restores_previous_dir() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("out.zarr");
        fs::create_dir_all(&target).unwrap();
        fs::write(target.join("f"), "old").unwrap();

        // A vanished staging directory makes the second rename fail.
        let staging = staging_path(&target);
        let err = swap_into_place(&staging, &target, true).unwrap_err();
        assert!(matches!(err, StoreError::Io { .. }));

        assert_eq!(fs::read_to_string(target.join("f")).unwrap(), "old");
        let leftovers = fs::read_dir(dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| is_staging_name(&e.path()))
            .count();
        assert_eq!(leftovers, 0);
    }

    #[test]
    fn test_transient_errors_retried() {
        let attempts = Cell::new(0);
        let policy = RetryPolicy {
            max_retries: 2,
            retry_delay_ms: 1,
            max_retry_delay_ms: 1,
        };
        let value = policy
            .run("flaky", || {
                attempts.set(attempts.get() + 1);
                if attempts.get() < 3 {
                    Err(StoreError::io(
                        "/tmp/x",
                        std::io::Error::new(std::io::ErrorKind::Interrupted, "flaky"),
                    ))
                } else {
                    Ok(7)
                }
            })
            .unwrap();
        assert_eq!(value, 7);
        assert_eq!(attempts.get(), 3);
    }

    #[test]
    fn test_non_transient_errors_not_retried() {
        let attempts = Cell::new(0);
        let policy = RetryPolicy {
            max_retries: 5,
            retry_delay_ms: 1,
            max_retry_delay_ms: 1,
        };
        let result: StoreResult<()> = policy.run("bad", || {
            attempts.set(attempts.get() + 1);
            Err(StoreError::invalid_metadata("bad"))
        });
        assert!(result.is_err());
        assert_eq!(attempts.get(), 1);
    }
}
