//! SQLite package database.
//!
//! Persists the installed set: one row per package plus its file list and
//! dependency relations. All writes run inside the transaction owned by
//! [`crate::store::transaction::Transaction`]; nothing here commits on its
//! own.

use std::collections::HashMap;
use std::path::Path;

use rusqlite::{params, Connection};
use thiserror::Error;

use crate::core::package::{InstallReason, Package};

#[derive(Error, Debug)]
pub enum DbError {
    #[error("database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("package not found: {0}")]
    PackageNotFound(String),
}

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS packages (
    id INTEGER PRIMARY KEY,
    name TEXT NOT NULL UNIQUE,
    version TEXT NOT NULL,
    arch TEXT NOT NULL,
    description TEXT NOT NULL DEFAULT '',
    install_date INTEGER NOT NULL,
    install_reason TEXT NOT NULL DEFAULT 'explicit',
    is_broken INTEGER NOT NULL DEFAULT 0
);

CREATE TABLE IF NOT EXISTS files (
    package_id INTEGER NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
    path TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS dependencies (
    package_id INTEGER NOT NULL REFERENCES packages(id) ON DELETE CASCADE,
    dep_name TEXT NOT NULL,
    type TEXT NOT NULL CHECK (type IN ('dep','conflict','provides','replaces','backup'))
);

CREATE INDEX IF NOT EXISTS idx_files_package ON files(package_id);
CREATE INDEX IF NOT EXISTS idx_dependencies_package ON dependencies(package_id);
";

/// Open connection to the package database.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open (and initialize if needed) the database at `path`.
    pub fn open(path: &Path) -> Result<Self, DbError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).ok();
        }
        let conn = Connection::open(path)?;

        // WAL keeps readers (list, info) from blocking behind a writer;
        // foreign keys make the ON DELETE CASCADE rows real.
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA foreign_keys=ON;")?;
        conn.execute_batch(SCHEMA)?;

        Ok(Self { conn })
    }

    // Transaction control is reserved for the Transaction wrapper; the
    // write methods below assume a transaction is already active.

    pub(crate) fn begin(&self) -> Result<(), DbError> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    pub(crate) fn commit(&self) -> Result<(), DbError> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    pub(crate) fn rollback(&self) -> Result<(), DbError> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }

    /// Insert a package with its files and relations. The name must not be
    /// installed; updates remove the old record first.
    pub fn register(&self, pkg: &Package) -> Result<(), DbError> {
        let now = chrono::Utc::now().timestamp();
        self.conn.execute(
            "INSERT INTO packages (name, version, arch, description, install_date, install_reason, is_broken)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                pkg.name,
                pkg.version,
                pkg.arch,
                pkg.description,
                now,
                pkg.reason.as_str(),
                pkg.broken,
            ],
        )?;
        let id = self.conn.last_insert_rowid();

        let mut file_stmt = self
            .conn
            .prepare("INSERT INTO files (package_id, path) VALUES (?1, ?2)")?;
        for path in &pkg.files {
            file_stmt.execute(params![id, path])?;
        }
        drop(file_stmt);

        let mut dep_stmt = self
            .conn
            .prepare("INSERT INTO dependencies (package_id, dep_name, type) VALUES (?1, ?2, ?3)")?;
        for (entries, kind) in [
            (&pkg.depends, "dep"),
            (&pkg.conflicts, "conflict"),
            (&pkg.provides, "provides"),
            (&pkg.replaces, "replaces"),
            (&pkg.backup, "backup"),
        ] {
            for entry in entries {
                dep_stmt.execute(params![id, entry, kind])?;
            }
        }

        Ok(())
    }

    /// Delete a package row; files and relations cascade.
    pub fn remove(&self, name: &str) -> Result<(), DbError> {
        let deleted = self
            .conn
            .execute("DELETE FROM packages WHERE name = ?1", params![name])?;
        if deleted == 0 {
            return Err(DbError::PackageNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn mark_healthy(&self, name: &str) -> Result<(), DbError> {
        self.set_broken(name, false)
    }

    pub fn mark_broken(&self, name: &str) -> Result<(), DbError> {
        self.set_broken(name, true)
    }

    fn set_broken(&self, name: &str, broken: bool) -> Result<(), DbError> {
        let updated = self.conn.execute(
            "UPDATE packages SET is_broken = ?1 WHERE name = ?2",
            params![broken, name],
        )?;
        if updated == 0 {
            return Err(DbError::PackageNotFound(name.to_string()));
        }
        Ok(())
    }

    pub fn is_installed(&self, name: &str) -> Result<bool, DbError> {
        let count: u32 = self.conn.query_row(
            "SELECT count(*) FROM packages WHERE name = ?1",
            params![name],
            |row| row.get(0),
        )?;
        Ok(count > 0)
    }

    /// Load a single package with files and relations populated.
    pub fn get(&self, name: &str) -> Result<Option<Package>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, version, arch, description, install_reason, is_broken
             FROM packages WHERE name = ?1",
        )?;
        let mut rows = stmt.query(params![name])?;
        let Some(row) = rows.next()? else {
            return Ok(None);
        };

        let id: i64 = row.get(0)?;
        let mut pkg = package_from_row(row)?;

        let mut file_stmt = self
            .conn
            .prepare("SELECT path FROM files WHERE package_id = ?1 ORDER BY rowid")?;
        let files = file_stmt.query_map(params![id], |r| r.get::<_, String>(0))?;
        pkg.files = files.collect::<Result<_, _>>()?;

        let mut dep_stmt = self
            .conn
            .prepare("SELECT dep_name, type FROM dependencies WHERE package_id = ?1 ORDER BY rowid")?;
        let deps = dep_stmt.query_map(params![id], |r| {
            Ok((r.get::<_, String>(0)?, r.get::<_, String>(1)?))
        })?;
        for dep in deps {
            let (dep_name, kind) = dep?;
            attach_relation(&mut pkg, dep_name, &kind);
        }

        Ok(Some(pkg))
    }

    /// All installed packages, fully populated.
    ///
    /// Exactly three queries regardless of the package count; the rows are
    /// stitched together in memory.
    pub fn list_all(&self) -> Result<Vec<Package>, DbError> {
        let mut stmt = self.conn.prepare(
            "SELECT id, name, version, arch, description, install_reason, is_broken
             FROM packages ORDER BY name",
        )?;
        let mut packages: Vec<Package> = Vec::new();
        let mut by_id: HashMap<i64, usize> = HashMap::new();
        let mut rows = stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            by_id.insert(id, packages.len());
            packages.push(package_from_row(row)?);
        }

        let mut file_stmt = self
            .conn
            .prepare("SELECT package_id, path FROM files ORDER BY rowid")?;
        let mut rows = file_stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            if let Some(&idx) = by_id.get(&id) {
                packages[idx].files.push(row.get(1)?);
            }
        }

        let mut dep_stmt = self
            .conn
            .prepare("SELECT package_id, dep_name, type FROM dependencies ORDER BY rowid")?;
        let mut rows = dep_stmt.query([])?;
        while let Some(row) = rows.next()? {
            let id: i64 = row.get(0)?;
            let dep_name: String = row.get(1)?;
            let kind: String = row.get(2)?;
            if let Some(&idx) = by_id.get(&id) {
                attach_relation(&mut packages[idx], dep_name, &kind);
            }
        }

        Ok(packages)
    }

    /// Names of packages currently flagged broken.
    pub fn list_broken(&self) -> Result<Vec<String>, DbError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM packages WHERE is_broken = 1 ORDER BY name")?;
        let names = stmt.query_map([], |row| row.get::<_, String>(0))?;
        names.collect::<Result<_, _>>().map_err(Into::into)
    }
}

fn package_from_row(row: &rusqlite::Row<'_>) -> Result<Package, DbError> {
    let reason: String = row.get(5)?;
    Ok(Package {
        name: row.get(1)?,
        version: row.get(2)?,
        arch: row.get(3)?,
        description: row.get(4)?,
        packager: String::new(),
        url: String::new(),
        licenses: Vec::new(),
        build_date: 0,
        depends: Vec::new(),
        optdepends: Vec::new(),
        conflicts: Vec::new(),
        provides: Vec::new(),
        replaces: Vec::new(),
        backup: Vec::new(),
        checksum: String::new(),
        installed_size: 0,
        files: Vec::new(),
        reason: InstallReason::from_db(&reason),
        broken: row.get(6)?,
    })
}

fn attach_relation(pkg: &mut Package, dep_name: String, kind: &str) {
    match kind {
        "dep" => pkg.depends.push(dep_name),
        "conflict" => pkg.conflicts.push(dep_name),
        "provides" => pkg.provides.push(dep_name),
        "replaces" => pkg.replaces.push(dep_name),
        "backup" => pkg.backup.push(dep_name),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn sample(name: &str) -> Package {
        Package {
            name: name.into(),
            version: "1.0-1".into(),
            arch: "x86_64".into(),
            description: format!("{name} description"),
            packager: String::new(),
            url: String::new(),
            licenses: vec![],
            build_date: 0,
            depends: vec!["glibc".into()],
            optdepends: vec![],
            conflicts: vec!["old-tool".into()],
            provides: vec!["tool=1.0".into()],
            replaces: vec![],
            backup: vec![],
            checksum: String::new(),
            installed_size: 0,
            files: vec![format!("/usr/bin/{name}"), format!("/usr/share/{name}/README")],
            reason: InstallReason::Explicit,
            broken: false,
        }
    }

    fn open_test_db(dir: &tempfile::TempDir) -> Database {
        Database::open(&dir.path().join("packages.db")).unwrap()
    }

    #[test]
    fn test_register_and_get() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        db.register(&sample("ripgrep")).unwrap();

        let pkg = db.get("ripgrep").unwrap().unwrap();
        assert_eq!(pkg.version, "1.0-1");
        assert_eq!(pkg.files.len(), 2);
        assert_eq!(pkg.depends, vec!["glibc"]);
        assert_eq!(pkg.conflicts, vec!["old-tool"]);
        assert_eq!(pkg.provides, vec!["tool=1.0"]);
        assert!(!pkg.broken);

        assert!(db.get("missing").unwrap().is_none());
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        db.register(&sample("ripgrep")).unwrap();
        assert!(db.register(&sample("ripgrep")).is_err());
    }

    #[test]
    fn test_remove_cascades() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        db.register(&sample("ripgrep")).unwrap();

        db.remove("ripgrep").unwrap();
        assert!(db.get("ripgrep").unwrap().is_none());

        // cascade wiped the child tables
        let files: u32 = db
            .conn
            .query_row("SELECT count(*) FROM files", [], |r| r.get(0))
            .unwrap();
        let deps: u32 = db
            .conn
            .query_row("SELECT count(*) FROM dependencies", [], |r| r.get(0))
            .unwrap();
        assert_eq!(files, 0);
        assert_eq!(deps, 0);
    }

    #[test]
    fn test_remove_missing_is_error() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        assert!(matches!(
            db.remove("ghost"),
            Err(DbError::PackageNotFound(_))
        ));
    }

    #[test]
    fn test_list_all_populates_relations() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        db.register(&sample("a")).unwrap();
        db.register(&sample("b")).unwrap();

        let all = db.list_all().unwrap();
        assert_eq!(all.len(), 2);
        for pkg in &all {
            assert_eq!(pkg.depends, vec!["glibc"]);
            assert_eq!(pkg.files.len(), 2);
        }
    }

    #[test]
    fn test_broken_flag_round_trip() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        db.register(&sample("a")).unwrap();

        db.mark_broken("a").unwrap();
        assert_eq!(db.list_broken().unwrap(), vec!["a"]);
        assert!(db.get("a").unwrap().unwrap().broken);

        db.mark_healthy("a").unwrap();
        assert!(db.list_broken().unwrap().is_empty());
    }

    #[test]
    fn test_is_installed() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        assert!(!db.is_installed("a").unwrap());
        db.register(&sample("a")).unwrap();
        assert!(db.is_installed("a").unwrap());
    }

    #[test]
    fn test_rollback_discards_registration() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);

        db.begin().unwrap();
        db.register(&sample("a")).unwrap();
        db.rollback().unwrap();

        assert!(!db.is_installed("a").unwrap());
    }

    #[test]
    fn test_install_reason_persisted() {
        let dir = tempdir().unwrap();
        let db = open_test_db(&dir);
        let mut pkg = sample("dep-pkg");
        pkg.reason = InstallReason::Dependency;
        db.register(&pkg).unwrap();

        let loaded = db.get("dep-pkg").unwrap().unwrap();
        assert_eq!(loaded.reason, InstallReason::Dependency);
    }
}
