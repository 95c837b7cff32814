//! Package removal flow.

use std::path::Path;

use crate::core::hooks::{self, HookEvent, Operation, When};
use crate::core::package::Package;
use crate::ops::error::OpError;
use crate::store::transaction::Transaction;
use crate::ui::Reporter;
use crate::Paths;

/// Remove an installed package.
///
/// Reverse-dependency protection is advisory: with dependants present the
/// removal is refused unless `yes` or `force` is given, in which case the
/// dependants are reported and the removal proceeds (audit will flag them).
pub fn remove(
    paths: &Paths,
    reporter: &impl Reporter,
    name: &str,
    yes: bool,
    force: bool,
) -> Result<(), OpError> {
    let tx = Transaction::open(&paths.db_path())?;

    let Some(pkg) = tx.db().get(name)? else {
        return Err(OpError::NotInstalled(name.to_string()));
    };

    let dependants = dependants_of(&pkg, &tx.db().list_all()?);
    if !dependants.is_empty() {
        if !(yes || force) {
            return Err(OpError::RequiredBy {
                name: name.to_string(),
                dependants,
            });
        }
        reporter.warning(&format!(
            "removing '{name}' although it is required by: {}",
            dependants.join(", ")
        ));
    }

    let events = [HookEvent {
        operation: Operation::Remove,
        package: pkg.name.clone(),
        files: pkg.files.clone(),
    }];
    let hooks = hooks::load_hooks(&paths.system_hook_dir(), &paths.user_hook_dir());
    hooks::run_hooks(&hooks, When::PreTransaction, &events, paths.root())?;

    reporter.working(&pkg.name, &pkg.version, "removing");
    delete_package_files(paths, &pkg);
    tx.remove_package(name)?;
    tx.commit()?;
    reporter.done(&pkg.name, &pkg.version, "removed");

    if let Err(e) = hooks::run_hooks(&hooks, When::PostTransaction, &events, paths.root()) {
        reporter.warning(&format!("post-transaction hook failed: {e}"));
    }

    Ok(())
}

/// Installed packages whose dependency list names `pkg` or one of its
/// provisions.
fn dependants_of(pkg: &Package, installed: &[Package]) -> Vec<String> {
    installed
        .iter()
        .filter(|other| other.name != pkg.name)
        .filter(|other| {
            other.depends.iter().any(|dep| {
                crate::core::version::Requirement::parse(dep)
                    .is_ok_and(|req| pkg.provides_capability(&req.name))
            })
        })
        .map(|other| other.name.clone())
        .collect()
}

/// Delete a package's files from the root, newest journal order (reverse of
/// the recorded list), pruning directories that become empty. Paths on the
/// package's backup list are preserved in place.
pub(crate) fn delete_package_files(paths: &Paths, pkg: &Package) {
    for manifest_path in pkg.files.iter().rev() {
        let relative = manifest_path.trim_start_matches('/');
        if pkg.backup.iter().any(|b| b == relative) {
            tracing::info!(path = %manifest_path, "preserving configuration file");
            continue;
        }

        let physical = paths.root().join(relative);
        remove_entry(&physical);
    }
}

fn remove_entry(physical: &Path) {
    let result = if physical.is_dir() && !physical.is_symlink() {
        std::fs::remove_dir(physical)
    } else {
        std::fs::remove_file(physical)
    };
    match result {
        Ok(()) => prune_empty_parents(physical),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
        Err(e) => {
            tracing::warn!(path = %physical.display(), error = %e, "could not remove file");
        }
    }
}

fn prune_empty_parents(path: &Path) {
    let mut parent = path.parent();
    while let Some(dir) = parent {
        if std::fs::remove_dir(dir).is_err() {
            break;
        }
        parent = dir.parent();
    }
}
