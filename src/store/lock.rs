//! Process-exclusive lock on the install root.
//!
//! The lock is an exclusive-create file next to the package database. Only
//! one transaction may hold it per install root; the guard removes the file
//! on drop, so every exit path releases it.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum LockError {
    #[error("another process holds the lock at {0}")]
    Busy(PathBuf),

    #[error("failed to create lock at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

/// Held lock; released when dropped.
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
}

impl LockGuard {
    /// Acquire the lock or fail immediately with [`LockError::Busy`].
    pub fn acquire(path: &Path) -> Result<Self, LockError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| LockError::Io {
                path: path.to_path_buf(),
                source,
            })?;
        }

        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(path)
            .map_err(|source| {
                if source.kind() == std::io::ErrorKind::AlreadyExists {
                    LockError::Busy(path.to_path_buf())
                } else {
                    LockError::Io {
                        path: path.to_path_buf(),
                        source,
                    }
                }
            })?;

        // The pid is informational, for `rm`-ing a stale lock by hand.
        let _ = writeln!(file, "{}", std::process::id());

        tracing::debug!(lock = %path.display(), "acquired");
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        if let Err(e) = std::fs::remove_file(&self.path) {
            tracing::warn!(lock = %self.path.display(), error = %e, "failed to release lock");
        } else {
            tracing::debug!(lock = %self.path.display(), "released");
        }
    }
}
