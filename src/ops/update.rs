//! System update flow: staged extraction and atomic swap.
//!
//! Updates extract every new archive in staging mode first, so each payload
//! file sits next to its predecessor as `<final>.new`. Only when a
//! package's staging completes does the swap phase rename the staged files
//! into place; the rename is atomic per file, so `<final>` is never absent.
//! Files owned by the old version but missing from the new one are orphans
//! and stay in place.

use std::collections::HashSet;
use std::path::PathBuf;

use crate::core::conflict;
use crate::core::hooks::{self, HookEvent, Operation, When};
use crate::core::package::Package;
use crate::core::repo::{self, Repository, RepositoryIndex};
use crate::core::version::{is_newer, Version};
use crate::io::extract::{self, ExtractMode};
use crate::io::fetch::{Fetcher, PackageDownload};
use crate::ops::error::OpError;
use crate::store::transaction::Transaction;
use crate::ui::Reporter;
use crate::Paths;

/// One planned upgrade.
#[derive(Debug, Clone)]
pub struct UpgradePair {
    pub current: Package,
    pub candidate: Package,
}

/// Plan and apply every available version upgrade.
pub async fn update(
    paths: &Paths,
    fetcher: &Fetcher,
    reporter: &impl Reporter,
) -> Result<(), OpError> {
    let mut tx = Transaction::open(&paths.db_path())?;
    let installed = tx.db().list_all()?;

    let repos = repo::load_repolist(&paths.repolist_path())?;
    let indexed = Fetcher::load_cached_indices(&repos, &paths.state_dir())?;
    if indexed.is_empty() {
        return Err(OpError::NoIndices);
    }

    let pairs = plan_upgrades(&installed, &indexed);
    if pairs.is_empty() {
        tx.rollback()?;
        reporter.info("system is up to date");
        return Ok(());
    }

    // Same validation as install, but a package never conflicts with the
    // version of itself it is replacing.
    let candidates: Vec<&Package> = pairs.iter().map(|p| &p.candidate).collect();
    let upgrading: HashSet<&str> = pairs.iter().map(|p| p.current.name.as_str()).collect();
    let others: Vec<Package> = installed
        .iter()
        .filter(|p| !upgrading.contains(p.name.as_str()))
        .cloned()
        .collect();
    conflict::validate(&candidates, &others)?;

    reporter.section("retrieving packages");
    let mut jobs = Vec::new();
    for pair in &pairs {
        jobs.push(download_job(&pair.candidate, &indexed)?);
    }
    let archives = fetcher.download_packages(jobs, &paths.cache_dir()).await?;

    let mut events = Vec::new();
    for (pair, archive) in pairs.iter().zip(&archives) {
        events.push(HookEvent {
            operation: Operation::Upgrade,
            package: pair.candidate.name.clone(),
            files: extract::list_files(archive)?,
        });
    }
    let hooks = hooks::load_hooks(&paths.system_hook_dir(), &paths.user_hook_dir());
    hooks::run_hooks(&hooks, When::PreTransaction, &events, paths.root())?;

    for (pair, archive) in pairs.iter().zip(&archives) {
        let name = &pair.candidate.name;
        reporter.working(name, &pair.candidate.version, "updating");

        // Phase 1: stage. Payload lands as `<final>.new`, all journaled.
        let mut staged: Vec<PathBuf> = Vec::new();
        let mut files: Vec<String> = Vec::new();
        extract::extract_archive(
            archive,
            paths.root(),
            ExtractMode::Staging,
            |physical, manifest| {
                tx.append_journal(physical).map_err(std::io::Error::other)?;
                files.push(manifest.to_string());
                staged.push(physical.to_path_buf());
                Ok(())
            },
        )?;

        // Phase 2: swap. Renames are atomic within the filesystem; after a
        // crash past this point recovery finds the `.new` names absent and
        // the overwritten finals stay, which rollback never claims to undo.
        for physical in &staged {
            if let Some(final_path) = extract::final_name(physical) {
                std::fs::rename(physical, &final_path)?;
            }
        }

        tx.remove_package(name)?;
        let record = Package {
            files,
            reason: pair.current.reason,
            ..pair.candidate.clone()
        };
        tx.register_package(&record)?;
        reporter.done(name, &pair.candidate.version, "updated");
    }

    tx.commit()?;
    reporter.summary(pairs.len(), "updated");

    if let Err(e) = hooks::run_hooks(&hooks, When::PostTransaction, &events, paths.root()) {
        reporter.warning(&format!("post-transaction hook failed: {e}"));
    }

    Ok(())
}

/// Pair every installed package with the newest repository candidate that
/// outranks it. Repository order breaks version ties.
pub fn plan_upgrades(
    installed: &[Package],
    indexed: &[(Repository, RepositoryIndex)],
) -> Vec<UpgradePair> {
    let mut pairs = Vec::new();

    for current in installed {
        let Ok(current_version) = Version::parse(&current.version) else {
            continue;
        };

        let mut best: Option<(&Package, Version)> = None;
        for (_, index) in indexed {
            for candidate in index.packages.iter().filter(|p| p.name == current.name) {
                let Ok(candidate_version) = candidate.parsed_version() else {
                    continue;
                };
                let better_than_best = match &best {
                    Some((_, best_version)) => is_newer(best_version, &candidate_version),
                    None => true,
                };
                if better_than_best {
                    best = Some((candidate, candidate_version));
                }
            }
        }

        if let Some((candidate, version)) = best {
            if is_newer(&current_version, &version) {
                pairs.push(UpgradePair {
                    current: current.clone(),
                    candidate: candidate.clone(),
                });
            }
        }
    }

    pairs
}

fn download_job(
    pkg: &Package,
    indexed: &[(Repository, RepositoryIndex)],
) -> Result<PackageDownload, OpError> {
    for (repo, index) in indexed {
        if index
            .packages
            .iter()
            .any(|p| p.name == pkg.name && p.version == pkg.version)
        {
            return Ok(PackageDownload {
                repo_url: repo.url.clone(),
                filename: pkg.archive_name(),
                checksum: pkg.checksum.clone(),
            });
        }
    }
    Err(OpError::NotAvailable(pkg.name.clone()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::package::InstallReason;

    fn pkg(name: &str, version: &str) -> Package {
        Package {
            name: name.into(),
            version: version.into(),
            arch: "x86_64".into(),
            description: String::new(),
            packager: String::new(),
            url: String::new(),
            licenses: vec![],
            build_date: 0,
            depends: vec![],
            optdepends: vec![],
            conflicts: vec![],
            provides: vec![],
            replaces: vec![],
            backup: vec![],
            checksum: String::new(),
            installed_size: 0,
            files: vec![],
            reason: InstallReason::Explicit,
            broken: false,
        }
    }

    fn repo_with(id: &str, packages: Vec<Package>) -> (Repository, RepositoryIndex) {
        (
            Repository {
                id: id.into(),
                name: id.into(),
                url: format!("https://pkgs.example.org/{id}"),
                enabled: true,
                gpgkey: String::new(),
            },
            RepositoryIndex {
                name: id.into(),
                timestamp: 0,
                count: packages.len(),
                packages,
            },
        )
    }

    #[test]
    fn test_plan_picks_newer_versions() {
        let installed = vec![pkg("foo", "1.0-1"), pkg("bar", "2.0-1")];
        let indexed = vec![repo_with(
            "core",
            vec![pkg("foo", "1.1-1"), pkg("bar", "2.0-1")],
        )];

        let pairs = plan_upgrades(&installed, &indexed);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].current.version, "1.0-1");
        assert_eq!(pairs[0].candidate.version, "1.1-1");
    }

    #[test]
    fn test_plan_ignores_downgrades() {
        let installed = vec![pkg("foo", "2.0-1")];
        let indexed = vec![repo_with("core", vec![pkg("foo", "1.9-1")])];
        assert!(plan_upgrades(&installed, &indexed).is_empty());
    }

    #[test]
    fn test_plan_prefers_highest_across_repos() {
        let installed = vec![pkg("foo", "1.0-1")];
        let indexed = vec![
            repo_with("core", vec![pkg("foo", "1.1-1")]),
            repo_with("extra", vec![pkg("foo", "1.2-1")]),
        ];

        let pairs = plan_upgrades(&installed, &indexed);
        assert_eq!(pairs[0].candidate.version, "1.2-1");
    }

    #[test]
    fn test_plan_epoch_outranks() {
        let installed = vec![pkg("foo", "2024.1-1")];
        let indexed = vec![repo_with("core", vec![pkg("foo", "1:1.0-1")])];

        let pairs = plan_upgrades(&installed, &indexed);
        assert_eq!(pairs.len(), 1);
        assert_eq!(pairs[0].candidate.version, "1:1.0-1");
    }
}
