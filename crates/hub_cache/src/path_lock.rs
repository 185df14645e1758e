//! Cross-process mutual exclusion scoped to a filesystem path.

use std::{
    fmt::{Debug, Formatter},
    path::{Path, PathBuf},
    time::Duration,
};

use fs4::fs_std::FileExt;

use crate::{content_cache::CacheError, task::run_blocking};

/// An exclusive advisory lock scoped to a target filesystem path.
///
/// The lock is backed by a companion `{target}.lock` file sitting next to the
/// resource it protects, so it is visible to every thread and every process
/// sharing the same cache root. Dropping the guard releases the lock; the
/// operating system releases it automatically if the holding process crashes.
///
/// Acquiring the same target twice from the same task deadlocks and must not
/// be attempted; sequential reuse across separate acquisitions is the
/// expected pattern. Locks on different targets never contend.
pub struct PathLock {
    file: std::fs::File,
    lock_path: PathBuf,
}

impl Debug for PathLock {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PathLock")
            .field("lock_path", &self.lock_path)
            .finish()
    }
}

impl Drop for PathLock {
    fn drop(&mut self) {
        // Ensure that the lock is released when the guard is dropped.
        let _ = fs4::fs_std::FileExt::unlock(&self.file);
    }
}

impl PathLock {
    /// Acquires an exclusive lock scoped to `target`, blocking until the lock
    /// is free.
    ///
    /// The wait happens on a blocking thread; dropping the returned future
    /// abandons the wait without leaking the lock. There is no timeout:
    /// callers needing a bounded wait wrap the returned future themselves.
    pub async fn acquire(target: &Path) -> Result<Self, CacheError> {
        let lock_path = lock_path_for(target);
        let display_path = lock_path.display().to_string();

        let acquire_fut = run_blocking(move || {
            let file = std::fs::OpenOptions::new()
                .create(true)
                .truncate(false)
                .write(true)
                .read(true)
                .open(&lock_path)
                .map_err(|e| {
                    CacheError::Lock(
                        format!("failed to open lock file '{}'", lock_path.display()),
                        e,
                    )
                })?;

            file.lock_exclusive().map_err(|e| {
                CacheError::Lock(
                    format!("failed to acquire lock on '{}'", lock_path.display()),
                    e,
                )
            })?;

            Ok(PathLock { file, lock_path })
        });

        tokio::select!(
            lock = acquire_fut => lock,
            _ = warn_timeout_future(
                format!("blocked waiting for file lock on '{display_path}'")
            ) => unreachable!("warn_timeout_future should never finish")
        )
    }

    /// Returns the path of the companion lock file.
    pub fn lock_path(&self) -> &Path {
        &self.lock_path
    }
}

/// Derives the companion lock path for `target`: the same path with `.lock`
/// appended. `Path::with_extension` would strip an existing extension, so the
/// suffix is appended to the full file name instead.
fn lock_path_for(target: &Path) -> PathBuf {
    let mut path = target.as_os_str().to_os_string();
    path.push(".lock");
    PathBuf::from(path)
}

async fn warn_timeout_future(message: String) {
    loop {
        tokio::time::sleep(Duration::from_secs(30)).await;
        tracing::warn!("{}", &message);
    }
}

#[cfg(test)]
mod tests {
    use std::{path::Path, time::Duration};

    use assert_matches::assert_matches;

    use super::{lock_path_for, PathLock};
    use crate::content_cache::CacheError;

    #[test]
    fn lock_path_preserves_extension() {
        assert_eq!(
            lock_path_for(Path::new("/cache/blobs/abc.bin")),
            Path::new("/cache/blobs/abc.bin.lock")
        );
    }

    #[tokio::test]
    async fn sequential_reacquisition() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("blob");

        let lock = PathLock::acquire(&target).await.unwrap();
        drop(lock);

        // A released lock can be taken again immediately.
        let _lock = PathLock::acquire(&target).await.unwrap();
    }

    #[tokio::test]
    async fn distinct_targets_do_not_contend() {
        let dir = tempfile::tempdir().unwrap();

        let _lock_a = PathLock::acquire(&dir.path().join("a")).await.unwrap();
        let _lock_b = PathLock::acquire(&dir.path().join("b")).await.unwrap();
    }

    #[tokio::test]
    async fn missing_parent_directory_fails_before_critical_section() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("missing").join("blob");

        let result = PathLock::acquire(&target).await;
        assert_matches!(result, Err(CacheError::Lock(_, _)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn same_target_is_exclusive() {
        let dir = tempfile::tempdir().unwrap();
        let target = dir.path().join("blob");

        let held = PathLock::acquire(&target).await.unwrap();

        let contender_target = target.clone();
        let mut contender = tokio::spawn(async move {
            let _lock = PathLock::acquire(&contender_target).await.unwrap();
        });

        // The second acquisition must not complete while the lock is held.
        let wait = tokio::time::timeout(Duration::from_millis(200), &mut contender).await;
        assert!(wait.is_err(), "lock was acquired while already held");

        drop(held);
        tokio::time::timeout(Duration::from_secs(5), contender)
            .await
            .expect("contender never acquired the released lock")
            .unwrap();
    }
}
