//! Conflict validation.
//!
//! Before a plan touches the filesystem, every incoming package is checked
//! against the installed set in both directions. A `replaces` declaration
//! turns a conflict into a scheduled removal of the superseded package.

use thiserror::Error;

use crate::core::package::Package;
use crate::core::version::{Requirement, Version};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ConflictError {
    #[error("'{package}' conflicts with installed package '{conflict}'")]
    Forward { package: String, conflict: String },

    #[error("installed package '{installed}' conflicts with '{package}'")]
    Reverse { installed: String, package: String },
}

/// Validate a plan against the installed set.
///
/// Returns the installed packages scheduled for removal through `replaces`,
/// in the order they were encountered.
pub fn validate(plan: &[&Package], installed: &[Package]) -> Result<Vec<String>, ConflictError> {
    let mut removals: Vec<String> = Vec::new();

    for new in plan {
        for entry in &new.conflicts {
            let Some(hit) = match_conflict(entry, installed) else {
                continue;
            };
            if new.replaces.iter().any(|r| r == &hit) {
                schedule(&mut removals, hit);
            } else {
                return Err(ConflictError::Forward {
                    package: new.name.clone(),
                    conflict: hit,
                });
            }
        }

        for existing in installed {
            let conflicted = existing.conflicts.iter().any(|entry| {
                Requirement::parse(entry).is_ok_and(|req| {
                    req.name == new.name
                        && new
                            .parsed_version()
                            .map(|v| req.satisfied_by(&v))
                            .unwrap_or(true)
                })
            });
            if !conflicted {
                continue;
            }
            if new.replaces.iter().any(|r| r == &existing.name) {
                schedule(&mut removals, existing.name.clone());
            } else {
                return Err(ConflictError::Reverse {
                    installed: existing.name.clone(),
                    package: new.name.clone(),
                });
            }
        }
    }

    Ok(removals)
}

/// First installed package matching a (possibly versioned) conflict entry.
fn match_conflict(entry: &str, installed: &[Package]) -> Option<String> {
    let req = Requirement::parse(entry).ok()?;
    installed
        .iter()
        .find(|pkg| {
            pkg.name == req.name
                && Version::parse(&pkg.version)
                    .map(|v| req.satisfied_by(&v))
                    .unwrap_or(true)
        })
        .map(|pkg| pkg.name.clone())
}

fn schedule(removals: &mut Vec<String>, name: String) {
    if !removals.contains(&name) {
        removals.push(name);
    }
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

    #[test]
    fn test_no_conflicts() {
        let vim = pkg("vim", "9.1");
        let installed = vec![pkg("bash", "5.2")];
        assert_eq!(validate(&[&vim], &installed).unwrap(), Vec::<String>::new());
    }

    #[test]
    fn test_forward_conflict() {
        let mut vim = pkg("vim", "9.1");
        vim.conflicts = vec!["nano".into()];
        let installed = vec![pkg("nano", "7.2")];

        assert_eq!(
            validate(&[&vim], &installed).unwrap_err(),
            ConflictError::Forward {
                package: "vim".into(),
                conflict: "nano".into()
            }
        );
    }

    #[test]
    fn test_reverse_conflict() {
        let mut installed_vim = pkg("vim", "9.1");
        installed_vim.conflicts = vec!["nano".into()];
        let nano = pkg("nano", "7.2");

        assert_eq!(
            validate(&[&nano], &[installed_vim]).unwrap_err(),
            ConflictError::Reverse {
                installed: "vim".into(),
                package: "nano".into()
            }
        );
    }

    #[test]
    fn test_replaces_schedules_removal() {
        let mut neovim = pkg("neovim", "0.10");
        neovim.conflicts = vec!["vim".into()];
        neovim.replaces = vec!["vim".into()];
        let installed = vec![pkg("vim", "9.1")];

        assert_eq!(validate(&[&neovim], &installed).unwrap(), vec!["vim"]);
    }

    #[test]
    fn test_replaces_covers_reverse_direction() {
        let mut installed_vim = pkg("vim", "9.1");
        installed_vim.conflicts = vec!["neovim".into()];
        let mut neovim = pkg("neovim", "0.10");
        neovim.replaces = vec!["vim".into()];

        assert_eq!(validate(&[&neovim], &[installed_vim]).unwrap(), vec!["vim"]);
    }

    #[test]
    fn test_versioned_conflict_entry() {
        let mut app = pkg("app", "2.0");
        app.conflicts = vec!["lib<1.5".into()];

        // installed lib 1.4 matches lib<1.5
        assert!(validate(&[&app], &[pkg("lib", "1.4")]).is_err());
        // installed lib 1.6 does not
        assert!(validate(&[&app], &[pkg("lib", "1.6")]).is_ok());
    }

    #[test]
    fn test_removal_scheduled_once() {
        let mut a = pkg("a", "1");
        a.conflicts = vec!["old".into()];
        a.replaces = vec!["old".into()];
        let mut b = pkg("b", "1");
        b.conflicts = vec!["old".into()];
        b.replaces = vec!["old".into()];

        let removals = validate(&[&a, &b], &[pkg("old", "1")]).unwrap();
        assert_eq!(removals, vec!["old"]);
    }
}
