//! basalt - a transactional package manager.
//!
//! Resolves dependencies against signed repository indices, downloads and
//! verifies package archives, and applies installs, removals and updates to
//! an install root under a file-journal transaction with crash recovery.

pub mod core;
pub mod io;
pub mod ops;
pub mod store;
pub mod ui;

// Re-exports for convenience
pub use crate::core::package::Package;
pub use crate::core::version::Version;
pub use crate::store::transaction::Transaction;

use std::path::{Path, PathBuf};

/// On-disk layout of one install root.
///
/// The root is the directory basalt treats as `/`; it may be the real root
/// or a bootstrap directory (`--root`). Everything basalt reads or writes
/// lives underneath it, cache included, so bootstrap installs stay
/// self-contained.
#[derive(Debug, Clone)]
pub struct Paths {
    root: PathBuf,
}

impl Paths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// The install root itself.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// State directory: `var/lib/basalt`.
    pub fn state_dir(&self) -> PathBuf {
        self.root.join("var/lib/basalt")
    }

    /// Package database: `var/lib/basalt/packages.db`.
    pub fn db_path(&self) -> PathBuf {
        self.state_dir().join("packages.db")
    }

    /// Download cache: `var/cache/basalt`.
    pub fn cache_dir(&self) -> PathBuf {
        self.root.join("var/cache/basalt")
    }

    /// Repository configuration: `etc/basalt/repolist`.
    pub fn repolist_path(&self) -> PathBuf {
        self.root.join("etc/basalt/repolist")
    }

    /// Hooks shipped by packages: `usr/share/libalpm/hooks`.
    pub fn system_hook_dir(&self) -> PathBuf {
        self.root.join("usr/share/libalpm/hooks")
    }

    /// Administrator hooks: `etc/basalt/hooks`. Shadows the system
    /// directory by file name.
    pub fn user_hook_dir(&self) -> PathBuf {
        self.root.join("etc/basalt/hooks")
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new("/")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_layout_is_root_relative() {
        let paths = Paths::new("/mnt/target");
        assert_eq!(
            paths.db_path(),
            PathBuf::from("/mnt/target/var/lib/basalt/packages.db")
        );
        assert_eq!(
            paths.cache_dir(),
            PathBuf::from("/mnt/target/var/cache/basalt")
        );
        assert_eq!(
            paths.repolist_path(),
            PathBuf::from("/mnt/target/etc/basalt/repolist")
        );
    }
}
