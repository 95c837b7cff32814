//! Dependency resolution.
//!
//! Depth-first traversal from a target request over the available package
//! set, producing a leaves-first installation plan. Virtual capabilities are
//! honored through a `provides -> packages` index built up front.

use std::collections::{HashMap, HashSet};

use thiserror::Error;

use crate::core::package::{provision_name, Package};
use crate::core::version::{is_newer, Requirement};

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    #[error("unable to satisfy dependency '{request}'")]
    UnresolvedDependency { request: String },

    #[error("circular dependency detected at '{request}'")]
    CircularDependency { request: String },
}

/// Resolves install requests against a set of available packages.
///
/// Construction collapses the input to the latest version per name (first
/// repository wins ties, so repository order is preference order) and builds
/// the provides index.
#[derive(Debug)]
pub struct Resolver<'a> {
    available: HashMap<&'a str, &'a Package>,
    provides: HashMap<&'a str, Vec<&'a Package>>,
    installed: HashSet<&'a str>,
}

impl<'a> Resolver<'a> {
    pub fn new<I>(available: &'a [Package], installed: I) -> Self
    where
        I: IntoIterator<Item = &'a str>,
    {
        let mut latest: HashMap<&str, &Package> = HashMap::new();
        for pkg in available {
            match latest.get(pkg.name.as_str()) {
                Some(existing) => {
                    let newer = match (existing.parsed_version(), pkg.parsed_version()) {
                        (Ok(cur), Ok(cand)) => is_newer(&cur, &cand),
                        _ => false,
                    };
                    if newer {
                        latest.insert(pkg.name.as_str(), pkg);
                    }
                }
                None => {
                    latest.insert(pkg.name.as_str(), pkg);
                }
            }
        }

        let mut provides: HashMap<&str, Vec<&Package>> = HashMap::new();
        for &pkg in latest.values() {
            for entry in &pkg.provides {
                provides.entry(provision_name(entry)).or_default().push(pkg);
            }
        }
        // Deterministic provider choice regardless of hash order.
        for providers in provides.values_mut() {
            providers.sort_by(|a, b| a.name.cmp(&b.name));
        }

        Self {
            available: latest,
            provides,
            installed: installed.into_iter().collect(),
        }
    }

    /// Resolve `target` to an installation plan: every package's runtime
    /// dependencies appear earlier in the plan or in the installed set, and
    /// each provider appears at most once.
    pub fn resolve(&self, target: &str) -> Result<Vec<&'a Package>, ResolveError> {
        let mut plan = Vec::new();
        let mut visited = HashSet::new();
        let mut stack = Vec::new();
        self.resolve_request(target, &mut plan, &mut visited, &mut stack)?;
        Ok(plan)
    }

    fn resolve_request(
        &self,
        request: &str,
        plan: &mut Vec<&'a Package>,
        visited: &mut HashSet<&'a str>,
        stack: &mut Vec<String>,
    ) -> Result<(), ResolveError> {
        let requirement =
            Requirement::parse(request).map_err(|_| ResolveError::UnresolvedDependency {
                request: request.to_string(),
            })?;

        // Installed packages are terminal: the plan never revisits them.
        if self.installed.contains(requirement.name.as_str()) {
            return Ok(());
        }

        if stack.iter().any(|r| r == &requirement.name) {
            return Err(ResolveError::CircularDependency {
                request: requirement.name,
            });
        }

        let provider = self.select_provider(&requirement)?;
        if visited.contains(provider.name.as_str()) {
            return Ok(());
        }

        stack.push(requirement.name.clone());
        for dep in &provider.depends {
            self.resolve_request(dep, plan, visited, stack)?;
        }
        stack.pop();

        visited.insert(provider.name.as_str());
        plan.push(provider);
        Ok(())
    }

    /// Exact name first, then the provides index; the constraint (if any) is
    /// checked against whatever was selected.
    fn select_provider(&self, requirement: &Requirement) -> Result<&'a Package, ResolveError> {
        let unresolved = || ResolveError::UnresolvedDependency {
            request: requirement.to_string(),
        };

        if let Some(pkg) = self.available.get(requirement.name.as_str()) {
            let version = pkg.parsed_version().map_err(|_| unresolved())?;
            if requirement.satisfied_by(&version) {
                return Ok(pkg);
            }
            return Err(unresolved());
        }

        let providers = self.provides.get(requirement.name.as_str()).ok_or_else(unresolved)?;
        providers
            .iter()
            .find(|p| {
                requirement.satisfied_by_provision(p.provision_version(&requirement.name).as_ref())
            })
            .copied()
            .ok_or_else(unresolved)
    }
}
