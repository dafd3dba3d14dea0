//! Filesystem primitives hardened for request handlers.
//!
//! - [`SafeFs::ensure_directory`] is idempotent.
//! - [`SafeFs::safe_delete`] clears read-only bits and retries transient
//!   failures on a fixed schedule.
//! - [`SafeFs::safe_move`] moves directories entry by entry instead of
//!   relying on a single rename, so it works across filesystems. It is not
//!   atomic.
//! - [`SafeFs::recursive_copy`] deep-copies a tree.
//!
//! Tree walks are iterative (explicit stack) so deep trees cannot overflow
//! the task stack.

use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use tokio::fs;

use crate::error::{VfsError, VfsResult};

/// Default number of delete attempts.
pub const DEFAULT_DELETE_ATTEMPTS: u32 = 3;

/// Default pause between delete attempts.
pub const DEFAULT_DELETE_RETRY_DELAY: Duration = Duration::from_millis(250);

/// Bounded retry schedule for deletes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, including the first. Clamped to at least one.
    pub attempts: u32,
    /// Fixed pause between attempts.
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: DEFAULT_DELETE_ATTEMPTS,
            delay: DEFAULT_DELETE_RETRY_DELAY,
        }
    }
}

impl RetryPolicy {
    /// A policy with `attempts` tries spaced `delay` apart.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

/// Safe file and directory operations.
#[derive(Debug, Clone, Default)]
pub struct SafeFs {
    retry: RetryPolicy,
}

impl SafeFs {
    /// Create with the given delete retry policy.
    pub fn new(retry: RetryPolicy) -> Self {
        Self { retry }
    }

    /// Create `path` and all missing parents. No-op if it already exists.
    pub async fn ensure_directory(&self, path: &Path) -> VfsResult<()> {
        fs::create_dir_all(path)
            .await
            .map_err(|e| VfsError::at(path, e))
    }

    /// Delete a file or directory tree, retrying on failure.
    ///
    /// A missing path counts as deleted. With `ignore_errors` the last
    /// failure is logged and dropped; otherwise it is returned.
    pub async fn safe_delete(&self, path: &Path, ignore_errors: bool) -> VfsResult<()> {
        let attempts = self.retry.attempts.max(1);
        let mut attempt = 1;

        loop {
            let err = match delete_once(path).await {
                Ok(()) => return Ok(()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(()),
                Err(e) => e,
            };

            if attempt >= attempts {
                if ignore_errors {
                    tracing::warn!(path = %path.display(), attempts, error = %err, "delete failed, ignoring");
                    return Ok(());
                }
                return Err(VfsError::at(path, err));
            }

            tracing::debug!(path = %path.display(), attempt, error = %err, "delete failed, retrying");
            attempt += 1;
            tokio::time::sleep(self.retry.delay).await;
        }
    }

    /// Move `src` to `dst`, replacing whatever is at `dst`.
    pub async fn safe_move(&self, src: &Path, dst: &Path) -> VfsResult<()> {
        let meta = fs::symlink_metadata(src).await.map_err(|e| match e.kind() {
            io::ErrorKind::NotFound => VfsError::source_not_found(src.display().to_string()),
            _ => VfsError::at(src, e),
        })?;

        if fs::symlink_metadata(dst).await.is_ok() {
            self.safe_delete(dst, false).await?;
        }

        if !meta.is_dir() {
            if let Some(parent) = dst.parent() {
                self.ensure_directory(parent).await?;
            }
            return move_file(src, dst).await;
        }

        let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
        let mut drained: Vec<PathBuf> = Vec::new();

        while let Some((from, to)) = pending.pop() {
            self.ensure_directory(&to).await?;
            let mut dir = fs::read_dir(&from).await.map_err(|e| VfsError::at(&from, e))?;
            while let Some(entry) = dir.next_entry().await.map_err(|e| VfsError::at(&from, e))? {
                let target = to.join(entry.file_name());
                let file_type = entry.file_type().await.map_err(|e| VfsError::at(&from, e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), target));
                } else {
                    move_file(&entry.path(), &target).await?;
                }
            }
            drained.push(from);
        }

        // Parents were pushed before their children.
        for dir in drained.into_iter().rev() {
            fs::remove_dir(&dir).await.map_err(|e| VfsError::at(&dir, e))?;
        }
        Ok(())
    }

    /// Deep-copy the directory tree at `src` into `dst`.
    ///
    /// `dst` is created if missing. Existing files are replaced only when
    /// `overwrite` is set.
    pub async fn recursive_copy(&self, src: &Path, dst: &Path, overwrite: bool) -> VfsResult<()> {
        match fs::metadata(src).await {
            Ok(meta) if meta.is_dir() => {}
            Ok(_) => return Err(VfsError::other(format!("not a directory: {}", src.display()))),
            Err(_) => return Err(VfsError::source_not_found(src.display().to_string())),
        }

        let mut pending = vec![(src.to_path_buf(), dst.to_path_buf())];
        while let Some((from, to)) = pending.pop() {
            self.ensure_directory(&to).await?;
            let mut dir = fs::read_dir(&from).await.map_err(|e| VfsError::at(&from, e))?;
            while let Some(entry) = dir.next_entry().await.map_err(|e| VfsError::at(&from, e))? {
                let target = to.join(entry.file_name());
                let file_type = entry.file_type().await.map_err(|e| VfsError::at(&from, e))?;
                if file_type.is_dir() {
                    pending.push((entry.path(), target));
                    continue;
                }
                if !overwrite && fs::symlink_metadata(&target).await.is_ok() {
                    return Err(VfsError::already_exists(target.display().to_string()));
                }
                fs::copy(entry.path(), &target)
                    .await
                    .map_err(|e| VfsError::at(&target, e))?;
            }
        }
        Ok(())
    }

    /// Open a file for exclusive writing, creating it and its parents.
    ///
    /// The file is truncated only after the lock is held, so a writer that
    /// loses the race never clobbers the winner's bytes.
    pub async fn open_exclusive_write(&self, path: &Path) -> VfsResult<fs::File> {
        if let Some(parent) = path.parent() {
            self.ensure_directory(parent).await?;
        }

        let file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)
            .await
            .map_err(|e| VfsError::at(path, e))?;

        lock_exclusive(&file, path)?;
        file.set_len(0).await.map_err(|e| VfsError::at(path, e))?;
        Ok(file)
    }
}

async fn delete_once(path: &Path) -> io::Result<()> {
    let meta = fs::symlink_metadata(path).await?;
    if meta.is_dir() {
        clear_readonly_tree(path).await?;
        fs::remove_dir_all(path).await
    } else {
        clear_readonly(path, &meta).await?;
        fs::remove_file(path).await
    }
}

async fn clear_readonly_tree(root: &Path) -> io::Result<()> {
    let mut pending = vec![root.to_path_buf()];
    while let Some(dir) = pending.pop() {
        let meta = fs::symlink_metadata(&dir).await?;
        clear_readonly(&dir, &meta).await?;
        let mut entries = fs::read_dir(&dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let meta = fs::symlink_metadata(entry.path()).await?;
            if meta.is_dir() {
                pending.push(entry.path());
            } else if !meta.file_type().is_symlink() {
                clear_readonly(&entry.path(), &meta).await?;
            }
        }
    }
    Ok(())
}

#[cfg(unix)]
async fn clear_readonly(path: &Path, meta: &std::fs::Metadata) -> io::Result<()> {
    use std::os::unix::fs::PermissionsExt;

    let mode = meta.permissions().mode();
    if mode & 0o200 == 0 {
        fs::set_permissions(path, std::fs::Permissions::from_mode(mode | 0o200)).await?;
    }
    Ok(())
}

#[cfg(not(unix))]
async fn clear_readonly(path: &Path, meta: &std::fs::Metadata) -> io::Result<()> {
    let mut perm = meta.permissions();
    if perm.readonly() {
        #[allow(clippy::permissions_set_readonly_false)]
        perm.set_readonly(false);
        fs::set_permissions(path, perm).await?;
    }
    Ok(())
}

async fn move_file(src: &Path, dst: &Path) -> VfsResult<()> {
    match fs::rename(src, dst).await {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == io::ErrorKind::CrossesDevices => {
            fs::copy(src, dst).await.map_err(|e| VfsError::at(dst, e))?;
            fs::remove_file(src).await.map_err(|e| VfsError::at(src, e))
        }
        Err(e) => Err(VfsError::at(src, e)),
    }
}

#[cfg(unix)]
fn lock_exclusive(file: &fs::File, path: &Path) -> VfsResult<()> {
    use rustix::fs::{FlockOperation, flock};

    match flock(file, FlockOperation::NonBlockingLockExclusive) {
        Ok(()) => Ok(()),
        Err(e) if e == rustix::io::Errno::WOULDBLOCK => {
            Err(VfsError::locked(path.display().to_string()))
        }
        Err(e) => Err(VfsError::Io(e.into())),
    }
}

#[cfg(not(unix))]
fn lock_exclusive(_file: &fs::File, _path: &Path) -> VfsResult<()> {
    Ok(())
}
