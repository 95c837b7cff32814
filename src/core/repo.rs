//! Repository configuration and index documents.
//!
//! `etc/basalt/repolist` declares the repositories a system syncs from, one
//! INI-like `[id]` section per repository. The synced artifact per repo is a
//! [`RepositoryIndex`]: a JSON snapshot of the packages it serves, verified
//! against a detached signature before use.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::core::package::Package;

#[derive(Error, Debug)]
pub enum RepoError {
    #[error("failed to read {path}: {source}")]
    Read {
        path: String,
        source: std::io::Error,
    },

    #[error("repolist line {0}: expected 'key = value' inside a [section]")]
    MalformedLine(usize),

    #[error("repolist line {0}: unterminated section header")]
    BadSection(usize),

    #[error("repository '{0}' has no url")]
    MissingUrl(String),

    #[error("malformed repository index: {0}")]
    BadIndex(#[from] serde_json::Error),
}

/// One configured repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Repository {
    /// Section id; also the index file stem (`{id}.idx`).
    pub id: String,
    /// Human-readable display name.
    pub name: String,
    /// Base URL packages and indices are fetched from.
    pub url: String,
    pub enabled: bool,
    /// Key the repository's index signature is checked against.
    pub gpgkey: String,
}

/// Parse a repolist document. Unknown keys are ignored so newer
/// configuration fields do not break older clients.
pub fn parse_repolist(input: &str) -> Result<Vec<Repository>, RepoError> {
    let mut repos: Vec<Repository> = Vec::new();
    let mut current: Option<Repository> = None;

    for (lineno, raw) in input.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') || line.starts_with(';') {
            continue;
        }

        if let Some(rest) = line.strip_prefix('[') {
            let id = rest
                .strip_suffix(']')
                .ok_or(RepoError::BadSection(lineno + 1))?;
            if let Some(repo) = current.take() {
                repos.push(repo);
            }
            current = Some(Repository {
                id: id.trim().to_string(),
                name: String::new(),
                url: String::new(),
                enabled: true,
                gpgkey: String::new(),
            });
            continue;
        }

        let (key, value) = line
            .split_once('=')
            .ok_or(RepoError::MalformedLine(lineno + 1))?;
        let repo = current
            .as_mut()
            .ok_or(RepoError::MalformedLine(lineno + 1))?;
        match key.trim() {
            "name" => repo.name = value.trim().to_string(),
            "url" => repo.url = value.trim().trim_end_matches('/').to_string(),
            "enabled" => repo.enabled = value.trim().eq_ignore_ascii_case("true"),
            "gpgkey" => repo.gpgkey = value.trim().to_string(),
            _ => {}
        }
    }
    if let Some(repo) = current.take() {
        repos.push(repo);
    }

    for repo in &repos {
        if repo.url.is_empty() {
            return Err(RepoError::MissingUrl(repo.id.clone()));
        }
    }

    Ok(repos)
}

/// Load the repolist from disk. A missing file means no repositories are
/// configured, not an error.
pub fn load_repolist(path: &Path) -> Result<Vec<Repository>, RepoError> {
    if !path.exists() {
        return Ok(Vec::new());
    }
    let input = fs::read_to_string(path).map_err(|source| RepoError::Read {
        path: path.display().to_string(),
        source,
    })?;
    parse_repolist(&input)
}

/// A snapshot of the packages a repository serves.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RepositoryIndex {
    pub name: String,
    /// Generation time, seconds since the epoch.
    pub timestamp: i64,
    pub count: usize,
    pub packages: Vec<Package>,
}

impl RepositoryIndex {
    pub fn from_json(input: &str) -> Result<Self, RepoError> {
        Ok(serde_json::from_str(input)?)
    }

    pub fn to_json(&self) -> Result<String, RepoError> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn load(path: &Path) -> Result<Self, RepoError> {
        let input = fs::read_to_string(path).map_err(|source| RepoError::Read {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_json(&input)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const REPOLIST: &str = "\
# system repositories
[core]
name = Core
url = https://pkgs.example.org/core/
enabled = true
gpgkey = core@example.org

[extra]
name = Extra
url = https://pkgs.example.org/extra
enabled = false
gpgkey = extra@example.org
";

    #[test]
    fn test_parse_repolist() {
        let repos = parse_repolist(REPOLIST).unwrap();
        assert_eq!(repos.len(), 2);
        assert_eq!(repos[0].id, "core");
        assert_eq!(repos[0].name, "Core");
        // trailing slash normalized away
        assert_eq!(repos[0].url, "https://pkgs.example.org/core");
        assert!(repos[0].enabled);
        assert!(!repos[1].enabled);
        assert_eq!(repos[1].gpgkey, "extra@example.org");
    }

    #[test]
    fn test_parse_repolist_defaults() {
        let repos = parse_repolist("[solo]\nurl = http://localhost\n").unwrap();
        assert!(repos[0].enabled);
        assert!(repos[0].name.is_empty());
    }

    #[test]
    fn test_parse_repolist_rejects_orphan_keys() {
        assert!(parse_repolist("url = http://x\n").is_err());
    }

    #[test]
    fn test_parse_repolist_rejects_missing_url() {
        assert!(matches!(
            parse_repolist("[broken]\nname = Broken\n"),
            Err(RepoError::MissingUrl(id)) if id == "broken"
        ));
    }

    #[test]
    fn test_parse_repolist_bad_section() {
        assert!(matches!(
            parse_repolist("[oops\n"),
            Err(RepoError::BadSection(1))
        ));
    }

    #[test]
    fn test_load_missing_repolist_is_empty() {
        let dir = tempfile::tempdir().unwrap();
        let repos = load_repolist(&dir.path().join("repolist")).unwrap();
        assert!(repos.is_empty());
    }

    #[test]
    fn test_index_round_trip() {
        let index = RepositoryIndex {
            name: "core".into(),
            timestamp: 1_719_100_000,
            count: 0,
            packages: vec![],
        };
        let json = index.to_json().unwrap();
        let back = RepositoryIndex::from_json(&json).unwrap();
        assert_eq!(back.name, "core");
        assert_eq!(back.timestamp, index.timestamp);
    }
}
