//! Installed-set audit: find and flag broken packages.
//!
//! A package is broken when a runtime dependency is satisfied by no
//! installed package or provision, or when it is in live conflict with
//! another installed package in either direction. The audit walks the whole
//! installed set once, flags newly broken packages and heals packages whose
//! graph recovered.

use crate::core::package::Package;
use crate::core::version::{Requirement, Version};
use crate::ops::error::OpError;
use crate::store::transaction::Transaction;
use crate::ui::Reporter;
use crate::Paths;

/// Outcome of one audit pass.
#[derive(Debug, Default)]
pub struct AuditReport {
    pub newly_broken: Vec<String>,
    pub healed: Vec<String>,
    pub total_broken: usize,
}

/// Scan the installed set, persist flag changes, report.
pub fn audit(paths: &Paths, reporter: &impl Reporter) -> Result<AuditReport, OpError> {
    let tx = Transaction::open(&paths.db_path())?;
    let installed = tx.db().list_all()?;

    let mut report = AuditReport::default();
    for pkg in &installed {
        let broken_now = !find_problems(pkg, &installed).is_empty();

        if broken_now {
            report.total_broken += 1;
        }
        if broken_now && !pkg.broken {
            for problem in find_problems(pkg, &installed) {
                reporter.warning(&format!("{}: {problem}", pkg.name));
            }
            tx.mark_broken(&pkg.name)?;
            report.newly_broken.push(pkg.name.clone());
        } else if !broken_now && pkg.broken {
            tx.mark_healthy(&pkg.name)?;
            report.healed.push(pkg.name.clone());
        }
    }

    tx.commit()?;

    if report.total_broken == 0 {
        reporter.info("dependency graph is healthy");
    } else {
        reporter.summary(report.total_broken, "broken");
    }
    Ok(report)
}

/// Human-readable reasons a package is broken, empty when healthy.
fn find_problems(pkg: &Package, installed: &[Package]) -> Vec<String> {
    let mut problems = Vec::new();

    for dep in &pkg.depends {
        if !dependency_satisfied(dep, installed) {
            problems.push(format!("dependency '{dep}' is not satisfied"));
        }
    }

    for entry in &pkg.conflicts {
        if let Some(other) = conflicting_package(entry, installed, &pkg.name) {
            problems.push(format!("conflicts with installed package '{other}'"));
        }
    }
    for other in installed.iter().filter(|o| o.name != pkg.name) {
        if other
            .conflicts
            .iter()
            .any(|entry| entry_matches(entry, pkg))
        {
            problems.push(format!("installed package '{}' conflicts with it", other.name));
        }
    }

    problems
}

fn dependency_satisfied(dep: &str, installed: &[Package]) -> bool {
    let Ok(req) = Requirement::parse(dep) else {
        return false;
    };
    installed.iter().any(|candidate| {
        if candidate.name == req.name {
            return Version::parse(&candidate.version)
                .map(|v| req.satisfied_by(&v))
                .unwrap_or(false);
        }
        candidate.provides_capability(&req.name)
            && req.satisfied_by_provision(candidate.provision_version(&req.name).as_ref())
    })
}

fn conflicting_package(entry: &str, installed: &[Package], this: &str) -> Option<String> {
    installed
        .iter()
        .filter(|p| p.name != this)
        .find(|p| entry_matches(entry, p))
        .map(|p| p.name.clone())
}

fn entry_matches(entry: &str, pkg: &Package) -> bool {
    let Ok(req) = Requirement::parse(entry) else {
        return false;
    };
    req.name == pkg.name
        && Version::parse(&pkg.version)
            .map(|v| req.satisfied_by(&v))
            .unwrap_or(true)
}
