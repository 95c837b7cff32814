//! The file journal: crash log of paths written by a transaction.
//!
//! One UTF-8 absolute path per line. Every append is fsynced before the
//! next extraction starts, so after a crash the journal covers every file
//! written by earlier entries; only the single entry in flight at the
//! moment of the crash can be missing. The journal's presence at
//! `{db}.journal` is the sole signal of an interrupted transaction.

use std::fs::{File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum JournalError {
    #[error("journal I/O at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
}

impl JournalError {
    fn at(path: &Path, source: std::io::Error) -> Self {
        Self::Io {
            path: path.to_path_buf(),
            source,
        }
    }
}

/// Open, appendable journal owned by the active transaction.
#[derive(Debug)]
pub struct Journal {
    file: File,
    path: PathBuf,
}

impl Journal {
    /// Create an empty journal. Fails if one already exists; that case must
    /// be routed through recovery instead.
    pub fn create(path: &Path) -> Result<Self, JournalError> {
        let file = OpenOptions::new()
            .append(true)
            .create_new(true)
            .open(path)
            .map_err(|e| JournalError::at(path, e))?;
        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Append one physical path, synced to disk before return.
    pub fn append(&mut self, physical: &Path) -> Result<(), JournalError> {
        let mut line = physical.display().to_string();
        line.push('\n');
        self.file
            .write_all(line.as_bytes())
            .and_then(|()| self.file.sync_data())
            .map_err(|e| JournalError::at(&self.path, e))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

/// Read all journaled paths, oldest first. Used by rollback and recovery.
pub fn read_entries(path: &Path) -> Result<Vec<PathBuf>, JournalError> {
    let file = File::open(path).map_err(|e| JournalError::at(path, e))?;
    let mut entries = Vec::new();
    for line in BufReader::new(file).lines() {
        let line = line.map_err(|e| JournalError::at(path, e))?;
        if !line.is_empty() {
            entries.push(PathBuf::from(line));
        }
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_append_and_read_back() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packages.db.journal");

        let mut journal = Journal::create(&path).unwrap();
        journal.append(Path::new("/usr/bin/foo")).unwrap();
        journal.append(Path::new("/usr/share/foo/data")).unwrap();

        let entries = read_entries(&path).unwrap();
        assert_eq!(
            entries,
            vec![
                PathBuf::from("/usr/bin/foo"),
                PathBuf::from("/usr/share/foo/data")
            ]
        );
    }

    #[test]
    fn test_create_refuses_existing() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packages.db.journal");

        let _journal = Journal::create(&path).unwrap();
        assert!(Journal::create(&path).is_err());
    }

    #[test]
    fn test_empty_journal_reads_empty() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("packages.db.journal");
        let _journal = Journal::create(&path).unwrap();

        assert!(read_entries(&path).unwrap().is_empty());
    }
}
