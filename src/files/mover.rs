//! Copy-then-delete file move
//!
//! Each attempt copies, waits for the copy to settle, then removes the
//! original. When removal fails the copy is deleted again, unless the
//! original is already gone, so each attempt leaves exactly one of source or
//! destination behind.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::config::{secs, FileOperationsConfig};
use crate::error::{AppError, Result};
use crate::retry::RetryPolicy;

/// Filesystem calls the mover needs; swapped out in tests to inject failures.
pub trait FileSystem: Send + Sync {
    fn exists(&self, path: &Path) -> bool;
    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64>;
    fn remove_file(&self, path: &Path) -> io::Result<()>;
    fn create_dir_all(&self, path: &Path) -> io::Result<()>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct StdFileSystem;

impl FileSystem for StdFileSystem {
    fn exists(&self, path: &Path) -> bool {
        fs::symlink_metadata(path).is_ok()
    }

    fn copy(&self, from: &Path, to: &Path) -> io::Result<u64> {
        // fs::copy opens and closes both handles before returning
        fs::copy(from, to)
    }

    fn remove_file(&self, path: &Path) -> io::Result<()> {
        fs::remove_file(path)
    }

    fn create_dir_all(&self, path: &Path) -> io::Result<()> {
        fs::create_dir_all(path)
    }
}

#[derive(Debug, Clone)]
pub struct MoveOptions {
    /// Total attempts
    pub max_retries: u32,
    pub retry_delay: Duration,
    /// Growth factor for `retry_delay` between attempts
    pub retry_backoff: f64,
    /// Pause between the copy and removing the original
    pub settle_delay: Duration,
    pub backup_originals: bool,
    /// Refuse to replace an existing destination
    pub confirm_overwrites: bool,
}

impl Default for MoveOptions {
    fn default() -> Self {
        Self {
            max_retries: 3,
            retry_delay: Duration::from_secs(1),
            retry_backoff: 1.0,
            settle_delay: Duration::from_millis(500),
            backup_originals: false,
            confirm_overwrites: true,
        }
    }
}

impl From<&FileOperationsConfig> for MoveOptions {
    fn from(config: &FileOperationsConfig) -> Self {
        Self {
            max_retries: config.safe_move_retries,
            retry_delay: secs(config.retry_delay_seconds),
            retry_backoff: config.retry_backoff,
            settle_delay: secs(config.move_delay_seconds),
            backup_originals: config.backup_originals,
            confirm_overwrites: config.confirm_overwrites,
        }
    }
}

pub struct SafeMover<F: FileSystem = StdFileSystem> {
    fs: F,
    options: MoveOptions,
}

impl SafeMover<StdFileSystem> {
    pub fn new(options: MoveOptions) -> Self {
        Self::with_fs(StdFileSystem, options)
    }
}

impl<F: FileSystem> SafeMover<F> {
    pub fn with_fs(fs: F, options: MoveOptions) -> Self {
        Self { fs, options }
    }

    /// Move `src` to `dst`.
    ///
    /// On every return path exactly one of the two exists: the original when
    /// an error is returned, the destination on success.
    pub async fn move_file(&self, src: &Path, dst: &Path) -> Result<()> {
        if self.options.confirm_overwrites && self.fs.exists(dst) {
            return Err(AppError::DestinationExists(dst.to_path_buf()));
        }

        if let Some(parent) = dst.parent().filter(|p| !p.as_os_str().is_empty()) {
            if !self.fs.exists(parent) {
                self.fs
                    .create_dir_all(parent)
                    .map_err(|e| AppError::from_io(format!("create {}", parent.display()), e))?;
            }
        }

        let backup = if self.options.backup_originals {
            self.create_backup(src)
        } else {
            None
        };

        let policy = RetryPolicy::new(self.options.max_retries, self.options.retry_delay)
            .with_multiplier(self.options.retry_backoff);
        let label = format!("Move {} -> {}", src.display(), dst.display());
        let result = policy
            .run(
                &label,
                |e: &AppError| matches!(e, AppError::MoveFailed(_)),
                |_| self.copy_then_delete(src, dst),
            )
            .await;

        match result {
            Ok(()) => {
                if let Some(backup) = backup {
                    if let Err(e) = self.fs.remove_file(&backup) {
                        tracing::warn!("Could not remove backup {}: {}", backup.display(), e);
                    }
                }
                tracing::debug!("Moved {} -> {}", src.display(), dst.display());
                Ok(())
            }
            Err(e) => {
                if let Some(backup) = backup {
                    self.restore_backup(&backup, src);
                }
                Err(match e {
                    AppError::Permission(_) => e,
                    other => AppError::MoveFailed(format!(
                        "{} -> {} gave up after {} attempt(s): {}",
                        src.display(),
                        dst.display(),
                        self.options.max_retries.max(1),
                        other
                    )),
                })
            }
        }
    }

    async fn copy_then_delete(&self, src: &Path, dst: &Path) -> Result<()> {
        if !self.fs.exists(src) {
            return Err(AppError::FileNotFound(src.to_path_buf()));
        }

        if let Err(e) = self.fs.copy(src, dst) {
            self.discard_copy(dst);
            return Err(AppError::from_io(format!("copy to {}", dst.display()), e));
        }

        if !self.options.settle_delay.is_zero() {
            tokio::time::sleep(self.options.settle_delay).await;
        }

        match self.fs.remove_file(src) {
            Ok(()) => Ok(()),
            // the removal went through even though it was reported as failed;
            // the copy is now the only one left
            Err(e) if !self.fs.exists(src) => {
                tracing::warn!(
                    "Removing {} reported an error but the file is gone ({}); keeping {}",
                    src.display(),
                    e,
                    dst.display()
                );
                Ok(())
            }
            Err(e) => {
                self.discard_copy(dst);
                Err(AppError::from_io(format!("remove {}", src.display()), e))
            }
        }
    }

    fn discard_copy(&self, dst: &Path) {
        if self.fs.exists(dst) {
            if let Err(e) = self.fs.remove_file(dst) {
                tracing::error!("Could not remove partial copy {}: {}", dst.display(), e);
            }
        }
    }

    fn create_backup(&self, src: &Path) -> Option<PathBuf> {
        let backup = backup_path(src);
        match self.fs.copy(src, &backup) {
            Ok(_) => Some(backup),
            Err(e) => {
                tracing::warn!(
                    "Could not back up {} ({}); continuing without a backup",
                    src.display(),
                    e
                );
                None
            }
        }
    }

    fn restore_backup(&self, backup: &Path, src: &Path) {
        if !self.fs.exists(src) {
            match self.fs.copy(backup, src) {
                Ok(_) => tracing::info!("Restored {} from backup", src.display()),
                Err(e) => {
                    tracing::error!(
                        "Could not restore {} from {}: {}; backup left in place",
                        src.display(),
                        backup.display(),
                        e
                    );
                    return;
                }
            }
        }
        if let Err(e) = self.fs.remove_file(backup) {
            tracing::warn!("Could not remove backup {}: {}", backup.display(), e);
        }
    }
}

/// `photo.jpg` → `photo.jpg.backup`
pub fn backup_path(src: &Path) -> PathBuf {
    let mut name = src.file_name().unwrap_or_default().to_os_string();
    name.push(".backup");
    src.with_file_name(name)
}
