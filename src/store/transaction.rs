//! The package transaction: lock + database transaction + file journal.
//!
//! A [`Transaction`] is the only way basalt mutates an install root. It
//! couples three artifacts with one lifetime: the advisory lock, an open
//! database transaction, and the crash journal. Either `commit` lands all of
//! them, or rollback (explicit, on drop, or via post-crash recovery) returns
//! the system to its prior state.
//!
//! Commit ordering: the database commits first, then the journal is deleted,
//! then the lock is released. A crash between the first two steps is
//! resolved pessimistically by recovery: the journaled files are deleted
//! even though their rows committed, and a later reinstall re-extracts them.
//! Under this ordering no crash can leave unowned files behind.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::core::package::Package;
use crate::store::db::{Database, DbError};
use crate::store::journal::{self, Journal, JournalError};
use crate::store::lock::{LockError, LockGuard};

#[derive(Error, Debug)]
pub enum TransactionError {
    #[error("another package operation holds the lock on this root")]
    LockBusy,

    #[error("an interrupted transaction was detected (journal at {0}); run recovery first")]
    PendingRecovery(PathBuf),

    #[error(transparent)]
    Db(#[from] DbError),

    #[error(transparent)]
    Journal(#[from] JournalError),

    #[error("lock error: {0}")]
    Lock(LockError),

    #[error("failed to remove journal {path}: {source}")]
    JournalCleanup {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl From<LockError> for TransactionError {
    fn from(err: LockError) -> Self {
        match err {
            LockError::Busy(_) => TransactionError::LockBusy,
            other => TransactionError::Lock(other),
        }
    }
}

/// Journal location for a given database path: `{db_path}.journal`.
pub fn journal_path(db_path: &Path) -> PathBuf {
    let mut os = db_path.as_os_str().to_os_string();
    os.push(".journal");
    PathBuf::from(os)
}

fn lock_path(db_path: &Path) -> PathBuf {
    db_path
        .parent()
        .unwrap_or_else(|| Path::new("."))
        .join("lock")
}

/// True when a previous transaction died and left its journal behind.
pub fn recovery_pending(db_path: &Path) -> bool {
    journal_path(db_path).exists()
}

/// An open transaction over one install root.
#[derive(Debug)]
pub struct Transaction {
    db: Database,
    journal: Option<Journal>,
    journal_file: PathBuf,
    // Option so Drop can release in order; present until commit/rollback.
    lock: Option<LockGuard>,
    committed: bool,
}

impl Transaction {
    /// Acquire the lock and begin. Refuses to start over a stale journal:
    /// the caller must run [`recover`] first.
    pub fn open(db_path: &Path) -> Result<Self, TransactionError> {
        let lock = LockGuard::acquire(&lock_path(db_path))?;

        let journal_file = journal_path(db_path);
        if journal_file.exists() {
            // lock drops here, releasing the root untouched
            return Err(TransactionError::PendingRecovery(journal_file));
        }

        let db = Database::open(db_path)?;
        let journal = Journal::create(&journal_file)?;
        if let Err(e) = db.begin() {
            // don't leave a journal behind for a transaction that never began
            drop(journal);
            let _ = fs::remove_file(&journal_file);
            return Err(e.into());
        }

        tracing::debug!(db = %db_path.display(), "transaction opened");
        Ok(Self {
            db,
            journal: Some(journal),
            journal_file,
            lock: Some(lock),
            committed: false,
        })
    }

    /// Read access to the database within this transaction.
    pub fn db(&self) -> &Database {
        &self.db
    }

    /// Record a physical path written by the extractor. Durable on return.
    pub fn append_journal(&mut self, physical: &Path) -> Result<(), TransactionError> {
        self.journal
            .as_mut()
            .expect("journal lives until commit or rollback")
            .append(physical)?;
        Ok(())
    }

    pub fn register_package(&self, pkg: &Package) -> Result<(), TransactionError> {
        Ok(self.db.register(pkg)?)
    }

    pub fn remove_package(&self, name: &str) -> Result<(), TransactionError> {
        Ok(self.db.remove(name)?)
    }

    pub fn mark_healthy(&self, name: &str) -> Result<(), TransactionError> {
        Ok(self.db.mark_healthy(name)?)
    }

    pub fn mark_broken(&self, name: &str) -> Result<(), TransactionError> {
        Ok(self.db.mark_broken(name)?)
    }

    /// Commit the database, then delete the journal, then release the lock.
    pub fn commit(mut self) -> Result<(), TransactionError> {
        self.db.commit()?;
        self.committed = true;

        drop(self.journal.take());
        fs::remove_file(&self.journal_file).map_err(|source| TransactionError::JournalCleanup {
            path: self.journal_file.clone(),
            source,
        })?;

        drop(self.lock.take());
        tracing::debug!("transaction committed");
        Ok(())
    }

    /// Undo everything: abort the database transaction and delete every
    /// journaled file from disk.
    pub fn rollback(mut self) -> Result<(), TransactionError> {
        self.rollback_inner();
        Ok(())
    }

    fn rollback_inner(&mut self) {
        if let Err(e) = self.db.rollback() {
            tracing::warn!(error = %e, "database rollback failed");
        }

        drop(self.journal.take());
        match journal::read_entries(&self.journal_file) {
            Ok(entries) => {
                // newest first, so files inside freshly created directories
                // go before their parents are pruned
                for path in entries.iter().rev() {
                    remove_journaled_path(path);
                }
            }
            Err(e) => tracing::warn!(error = %e, "could not read journal during rollback"),
        }
        if let Err(e) = fs::remove_file(&self.journal_file) {
            tracing::warn!(error = %e, "could not delete journal during rollback");
        }

        drop(self.lock.take());
        self.committed = true; // nothing further for Drop to do
        tracing::debug!("transaction rolled back");
    }
}

impl Drop for Transaction {
    fn drop(&mut self) {
        if !self.committed {
            tracing::warn!("transaction dropped without commit, rolling back");
            self.rollback_inner();
        }
    }
}

/// Crash recovery: with the lock held, delete every journaled path that is
/// still present, prune emptied directories, and remove the journal.
/// Returns the number of files deleted. A missing journal is a no-op.
pub fn recover(db_path: &Path) -> Result<usize, TransactionError> {
    let _lock = LockGuard::acquire(&lock_path(db_path))?;

    let journal_file = journal_path(db_path);
    if !journal_file.exists() {
        return Ok(0);
    }

    let entries = journal::read_entries(&journal_file)?;
    let mut removed = 0;
    for path in entries.iter().rev() {
        if path.exists() || path.is_symlink() {
            remove_journaled_path(path);
            removed += 1;
        }
    }

    fs::remove_file(&journal_file).map_err(|source| TransactionError::JournalCleanup {
        path: journal_file.clone(),
        source,
    })?;

    tracing::info!(files = removed, "recovery complete");
    Ok(removed)
}

/// Delete one journaled path and prune parent directories that became
/// empty. Already-absent paths are fine: recovery must be idempotent. A
/// journaled directory that still has content stays; it predates the
/// transaction or other owners share it.
fn remove_journaled_path(path: &Path) {
    if path.is_dir() && !path.is_symlink() {
        // fails on non-empty directories, which is exactly the ones to keep
        let _ = fs::remove_dir(path);
        return;
    }
    match fs::remove_file(path) {
        Ok(()) => {}
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
        Err(e) => {
            tracing::warn!(path = %path.display(), error = %e, "could not remove journaled path");
            return;
        }
    }

    let mut parent = path.parent();
    while let Some(dir) = parent {
        // remove_dir refuses non-empty directories, which is the stop
        if fs::remove_dir(dir).is_err() {
            break;
        }
        parent = dir.parent();
    }
}
