//! Package metadata.
//!
//! A [`Package`] is the unit everything else works on: the solver resolves
//! them, the database persists them, the installer extracts their archives.
//! Repository indices and the in-archive `.PKGINFO` manifest both decode to
//! this shape.

use std::collections::HashMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::version::{Requirement, Version, VersionError};

/// Reserved entry name carrying the package manifest at the archive root.
pub const MANIFEST_ENTRY: &str = ".PKGINFO";
/// Reserved entry name carrying the optional install scriptlet.
pub const SCRIPT_ENTRY: &str = ".INSTALL";

#[derive(Error, Debug)]
pub enum PackageError {
    #[error("manifest is missing required field '{0}'")]
    MissingField(&'static str),

    #[error("manifest line {0} is not a 'key = value' pair")]
    MalformedLine(usize),

    #[error("invalid version: {0}")]
    Version(#[from] VersionError),
}

/// Why a package is present on the system.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum InstallReason {
    /// Requested by the user.
    Explicit,
    /// Pulled in to satisfy another package.
    Dependency,
}

impl InstallReason {
    pub fn as_str(self) -> &'static str {
        match self {
            InstallReason::Explicit => "explicit",
            InstallReason::Dependency => "dependency",
        }
    }

    pub fn from_db(s: &str) -> Self {
        match s {
            "dependency" => InstallReason::Dependency,
            _ => InstallReason::Explicit,
        }
    }
}

impl fmt::Display for InstallReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A named, versioned package artifact.
///
/// `files`, `reason` and `broken` are install-local: repository records leave
/// them at their defaults until the package lands on a system.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Package {
    pub name: String,
    pub version: String,
    pub arch: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub packager: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub licenses: Vec<String>,
    #[serde(default)]
    pub build_date: i64,
    #[serde(default)]
    pub depends: Vec<String>,
    #[serde(default)]
    pub optdepends: Vec<String>,
    #[serde(default)]
    pub conflicts: Vec<String>,
    #[serde(default)]
    pub provides: Vec<String>,
    #[serde(default)]
    pub replaces: Vec<String>,
    #[serde(default)]
    pub backup: Vec<String>,
    /// SHA-256 of the package archive, lowercase hex.
    #[serde(default)]
    pub checksum: String,
    #[serde(default)]
    pub installed_size: u64,
    /// Absolute paths rooted at the install root; filled at install time.
    #[serde(default)]
    pub files: Vec<String>,
    #[serde(default = "default_reason")]
    pub reason: InstallReason,
    #[serde(default)]
    pub broken: bool,
}

fn default_reason() -> InstallReason {
    InstallReason::Explicit
}

impl Package {
    /// Parsed form of the version field.
    pub fn parsed_version(&self) -> Result<Version, VersionError> {
        Version::parse(&self.version)
    }

    /// Canonical archive file name, e.g. `vim-9.1.0-2-x86_64.pkg`.
    pub fn archive_name(&self) -> String {
        format!("{}-{}-{}.pkg", self.name, self.version, self.arch)
    }

    /// Runtime dependencies as parsed requirements. Malformed entries are
    /// surfaced so the caller can refuse the package rather than silently
    /// dropping a constraint.
    pub fn requirements(&self) -> Result<Vec<Requirement>, VersionError> {
        self.depends.iter().map(|d| Requirement::parse(d)).collect()
    }

    /// Does this package declare `capability`, either by name or through a
    /// provision entry (with or without an `=version` qualifier)?
    pub fn provides_capability(&self, capability: &str) -> bool {
        if self.name == capability {
            return true;
        }
        self.provides
            .iter()
            .any(|p| provision_name(p) == capability)
    }

    /// Version a provision entry declares for `capability`, if any.
    pub fn provision_version(&self, capability: &str) -> Option<Version> {
        self.provides
            .iter()
            .find(|p| provision_name(p) == capability)
            .and_then(|p| p.split_once('=').map(|(_, v)| v))
            .and_then(|v| Version::parse(v).ok())
    }
}

/// Name part of a provision entry (`libfoo.so=2` -> `libfoo.so`).
pub fn provision_name(entry: &str) -> &str {
    entry.split_once('=').map_or(entry, |(name, _)| name)
}

/// Parse a `.PKGINFO`-style manifest: `key = value` pairs, arrays by key
/// repetition, `#` comment lines ignored.
pub fn parse_manifest(input: &str) -> Result<Package, PackageError> {
    let mut fields: HashMap<&str, Vec<&str>> = HashMap::new();

    for (lineno, line) in input.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }
        let (key, value) = line
            .split_once('=')
            .ok_or(PackageError::MalformedLine(lineno + 1))?;
        fields.entry(key.trim()).or_default().push(value.trim());
    }

    let single = |key: &'static str| -> Result<String, PackageError> {
        fields
            .get(key)
            .and_then(|v| v.first())
            .map(|s| (*s).to_string())
            .ok_or(PackageError::MissingField(key))
    };
    let optional = |key: &str| -> String {
        fields
            .get(key)
            .and_then(|v| v.first())
            .map(|s| (*s).to_string())
            .unwrap_or_default()
    };
    let many = |key: &str| -> Vec<String> {
        fields
            .get(key)
            .map(|v| v.iter().map(|s| (*s).to_string()).collect())
            .unwrap_or_default()
    };

    let version = single("pkgver")?;
    Version::parse(&version)?;

    Ok(Package {
        name: single("pkgname")?,
        version,
        arch: single("arch")?,
        description: optional("pkgdesc"),
        packager: optional("packager"),
        url: optional("url"),
        licenses: many("license"),
        build_date: optional("builddate").parse().unwrap_or(0),
        depends: many("depend"),
        optdepends: many("optdepend"),
        conflicts: many("conflict"),
        provides: many("provides"),
        replaces: many("replaces"),
        backup: many("backup"),
        checksum: String::new(),
        installed_size: optional("size").parse().unwrap_or(0),
        files: Vec::new(),
        reason: InstallReason::Explicit,
        broken: false,
    })
}
