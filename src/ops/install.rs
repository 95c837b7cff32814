//! Package installation flow.
//!
//! resolve -> validate conflicts -> download -> pre-hooks -> extract and
//! register -> commit -> post-hooks. Everything between transaction open
//! and commit is undone by rollback if any step fails; post-commit hook
//! failures are reported but never undo the commit.

use std::collections::{HashMap, HashSet};
use std::path::PathBuf;

use crate::core::conflict;
use crate::core::hooks::{self, HookEvent, Operation, When};
use crate::core::package::{InstallReason, Package};
use crate::core::repo::{self, Repository, RepositoryIndex};
use crate::core::resolver::Resolver;
use crate::io::extract::{self, ExtractMode};
use crate::io::fetch::{Fetcher, PackageDownload};
use crate::ops::error::OpError;
use crate::ops::remove::delete_package_files;
use crate::store::transaction::Transaction;
use crate::ui::Reporter;
use crate::Paths;

/// Install `targets` (repository names or local `.pkg` paths) into the
/// root. `force` bypasses the already-installed check and reinstalls.
pub async fn install(
    paths: &Paths,
    fetcher: &Fetcher,
    reporter: &impl Reporter,
    targets: &[String],
    force: bool,
) -> Result<(), OpError> {
    let mut tx = Transaction::open(&paths.db_path())?;
    let installed = tx.db().list_all()?;
    let installed_names: HashSet<String> = installed.iter().map(|p| p.name.clone()).collect();

    // Local archive targets bypass the repositories entirely.
    let mut local_archives: HashMap<String, PathBuf> = HashMap::new();
    let mut local_packages: Vec<Package> = Vec::new();
    let mut requests: Vec<String> = Vec::new();

    for target in targets {
        let path = PathBuf::from(target);
        let name = if target.ends_with(".pkg") && path.exists() {
            let pkg = extract::read_manifest(&path)?;
            let name = pkg.name.clone();
            local_archives.insert(name.clone(), path);
            local_packages.push(pkg);
            name
        } else {
            target.clone()
        };

        if installed_names.contains(&name) && !force {
            reporter.info(&format!("{name} is already installed -- skipping"));
            continue;
        }
        requests.push(name);
    }

    if requests.is_empty() {
        tx.rollback()?;
        return Ok(());
    }

    let repos = repo::load_repolist(&paths.repolist_path())?;
    let indexed = Fetcher::load_cached_indices(&repos, &paths.state_dir())?;
    if indexed.is_empty() && local_packages.is_empty() {
        return Err(OpError::NoIndices);
    }

    // A local archive shadows any repository package of the same name.
    let mut available = local_packages;
    for (_, index) in &indexed {
        for pkg in &index.packages {
            if !local_archives.contains_key(&pkg.name) {
                available.push(pkg.clone());
            }
        }
    }

    // Forced targets must re-enter the plan even though they are installed.
    let resolver_installed = installed_names
        .iter()
        .filter(|n| !(force && requests.contains(*n)))
        .map(String::as_str);
    let resolver = Resolver::new(&available, resolver_installed);

    reporter.section("resolving dependencies");
    let mut plan: Vec<&Package> = Vec::new();
    let mut planned: HashSet<&str> = HashSet::new();
    for request in &requests {
        for pkg in resolver.resolve(request)? {
            if planned.insert(pkg.name.as_str()) {
                plan.push(pkg);
            }
        }
    }

    let replaced = conflict::validate(&plan, &installed)?;

    // Obtain every archive before anything touches the root.
    reporter.section("retrieving packages");
    let mut archives: Vec<Option<PathBuf>> = vec![None; plan.len()];
    let mut jobs: Vec<(usize, PackageDownload)> = Vec::new();
    for (i, pkg) in plan.iter().enumerate() {
        match local_archives.get(&pkg.name) {
            Some(path) => archives[i] = Some(path.clone()),
            None => jobs.push((i, download_job(pkg, &indexed)?)),
        }
    }
    let fetched = fetcher
        .download_packages(jobs.iter().map(|(_, j)| j.clone()).collect(), &paths.cache_dir())
        .await?;
    for ((i, _), path) in jobs.iter().zip(fetched) {
        archives[*i] = Some(path);
    }
    let archives: Vec<PathBuf> = archives.into_iter().flatten().collect();

    // Hook events carry the archive file listings so pre-transaction hooks
    // can match files that are not on disk yet.
    let mut events: Vec<HookEvent> = Vec::new();
    for (pkg, archive) in plan.iter().zip(&archives) {
        events.push(HookEvent {
            operation: Operation::Install,
            package: pkg.name.clone(),
            files: extract::list_files(archive)?,
        });
    }
    for name in &replaced {
        if let Some(old) = installed.iter().find(|p| &p.name == name) {
            events.push(HookEvent {
                operation: Operation::Remove,
                package: old.name.clone(),
                files: old.files.clone(),
            });
        }
    }

    let hooks = hooks::load_hooks(&paths.system_hook_dir(), &paths.user_hook_dir());
    hooks::run_hooks(&hooks, When::PreTransaction, &events, paths.root())?;

    // Scheduled removals (replaces) leave the root before their successors
    // arrive; file-set overlap is only legal through replacement.
    for name in &replaced {
        if let Some(old) = installed.iter().find(|p| &p.name == name) {
            reporter.working(&old.name, &old.version, "replacing");
            delete_package_files(paths, old);
            tx.remove_package(name)?;
        }
    }

    for (pkg, archive) in plan.iter().zip(&archives) {
        reporter.working(&pkg.name, &pkg.version, "installing");

        if installed_names.contains(&pkg.name) && !replaced.contains(&pkg.name) {
            // forced reinstall: drop the old record and files first
            if let Some(old) = installed.iter().find(|p| p.name == pkg.name) {
                delete_package_files(paths, old);
            }
            tx.remove_package(&pkg.name)?;
        }

        let mut files: Vec<String> = Vec::new();
        extract::extract_archive(archive, paths.root(), ExtractMode::Direct, |physical, manifest| {
            tx.append_journal(physical).map_err(std::io::Error::other)?;
            files.push(manifest.to_string());
            Ok(())
        })?;

        let record = Package {
            files,
            reason: if requests.contains(&pkg.name) {
                InstallReason::Explicit
            } else {
                InstallReason::Dependency
            },
            ..(*pkg).clone()
        };
        tx.register_package(&record)?;
        reporter.done(&pkg.name, &pkg.version, "installed");
    }

    tx.commit()?;
    reporter.summary(plan.len(), "installed");

    // Post-transaction hook failures are reported, never rolled back.
    if let Err(e) = hooks::run_hooks(&hooks, When::PostTransaction, &events, paths.root()) {
        reporter.warning(&format!("post-transaction hook failed: {e}"));
    }

    Ok(())
}

/// Locate the repository serving exactly this package version.
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
