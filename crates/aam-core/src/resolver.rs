//! Dependency resolution.
//!
//! A chronological backtracking solver over one version per package name.
//! Candidates are tried highest version first (a preferred pin from the
//! current lock goes before everything else). When a package has no
//! candidate satisfying every constraint imposed on it, the solver returns
//! to the most recent decision and tries that package's next candidate.
//!
//! Resolution is synchronous and only reads from a [`Catalog`] snapshot, so
//! identical catalogs and roots always produce identical graphs.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;

use aam_schema::{Constraint, PackageName, Sha256Digest, Version};
use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Where a package version comes from.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Provenance {
    Registry {
        name: String,
    },
    Source {
        name: String,
        revision: String,
        /// Artifact path inside the source.
        path: String,
    },
}

impl Provenance {
    /// Registry or source name.
    pub fn origin(&self) -> &str {
        match self {
            Self::Registry { name } | Self::Source { name, .. } => name,
        }
    }

    pub fn revision(&self) -> Option<&str> {
        match self {
            Self::Registry { .. } => None,
            Self::Source { revision, .. } => Some(revision),
        }
    }

    pub fn is_source(&self) -> bool {
        matches!(self, Self::Source { .. })
    }
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Registry { name } => write!(f, "registry:{name}"),
            Self::Source { name, revision, .. } => {
                write!(f, "source:{name}@{}", revision.get(..12).unwrap_or(revision))
            }
        }
    }
}

/// One version of a package offered by a registry or source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CatalogEntry {
    pub version: Version,
    pub provenance: Provenance,
    /// Archive digest, when known before fetching (registries).
    pub digest: Option<Sha256Digest>,
    pub dependencies: BTreeMap<PackageName, Constraint>,
}

impl CatalogEntry {
    /// Whether this entry satisfies `constraint`.
    ///
    /// Source entries are pins: only the wildcard, an exact version or a
    /// revision prefix can match them.
    pub fn satisfies(&self, constraint: &Constraint) -> bool {
        match &self.provenance {
            Provenance::Registry { .. } => constraint.matches(&self.version),
            Provenance::Source { revision, .. } => constraint.matches_pin(&self.version, revision),
        }
    }

    /// Short label used in conflict messages.
    fn label(&self) -> String {
        match self.provenance.revision() {
            Some(rev) => format!("{} (rev {})", self.version, rev.get(..12).unwrap_or(rev)),
            None => self.version.to_string(),
        }
    }
}

/// Looks up the available versions of a package.
pub trait Catalog {
    /// All known entries for `name`, in registry/source priority order.
    fn lookup(&self, name: &PackageName) -> Vec<CatalogEntry>;
}

impl<F> Catalog for F
where
    F: Fn(&PackageName) -> Vec<CatalogEntry>,
{
    fn lookup(&self, name: &PackageName) -> Vec<CatalogEntry> {
        self(name)
    }
}

/// An in-memory catalog snapshot.
#[derive(Debug, Clone, Default)]
pub struct MemoryCatalog {
    entries: BTreeMap<PackageName, Vec<CatalogEntry>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry. A duplicate (same version and provenance) only fills
    /// in a digest the earlier entry lacked.
    pub fn add(&mut self, name: PackageName, entry: CatalogEntry) {
        let list = self.entries.entry(name).or_default();
        match list
            .iter_mut()
            .find(|e| e.version == entry.version && e.provenance == entry.provenance)
        {
            Some(existing) => {
                if existing.digest.is_none() {
                    existing.digest = entry.digest;
                }
            }
            None => list.push(entry),
        }
    }

    pub fn names(&self) -> impl Iterator<Item = &PackageName> {
        self.entries.keys()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl Catalog for MemoryCatalog {
    fn lookup(&self, name: &PackageName) -> Vec<CatalogEntry> {
        self.entries.get(name).cloned().unwrap_or_default()
    }
}

/// Who imposed a constraint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Requester {
    Root,
    Package { name: PackageName, version: Version },
}

impl fmt::Display for Requester {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Root => write!(f, "project"),
            Self::Package { name, version } => write!(f, "{name}@{version}"),
        }
    }
}

/// A constraint together with its origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Requirement {
    pub constraint: Constraint,
    pub requester: Requester,
}

/// No version of `package` satisfies the constraints imposed on it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Conflict {
    pub package: PackageName,
    pub constraints: Vec<Requirement>,
    /// Versions (or pinned revisions) that were considered.
    pub available: Vec<String>,
}

impl fmt::Display for Conflict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "No version of {} satisfies all constraints: ",
            self.package
        )?;
        let parts: Vec<String> = self
            .constraints
            .iter()
            .map(|r| format!("{} (required by {})", r.constraint, r.requester))
            .collect();
        write!(f, "{}", parts.join(", "))?;
        if self.available.is_empty() {
            Ok(())
        } else {
            write!(f, "; available: {}", self.available.join(", "))
        }
    }
}

/// Knobs for a resolve call.
#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Versions to try first when they still satisfy every constraint,
    /// typically taken from the current lock.
    pub prefer: BTreeMap<PackageName, Pin>,
}

/// A specific version from a specific origin.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Pin {
    pub version: Version,
    pub provenance: Provenance,
}

/// One chosen package in a [`DependencyGraph`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ResolvedPackage {
    pub name: PackageName,
    pub version: Version,
    pub provenance: Provenance,
    pub digest: Option<Sha256Digest>,
    /// The root constraint, or the first constraint that pulled it in.
    pub constraint: Constraint,
    pub dependencies: BTreeMap<PackageName, Constraint>,
    /// Packages in the graph that depend on this one.
    pub required_by: BTreeSet<PackageName>,
}

impl ResolvedPackage {
    pub fn pin(&self) -> Pin {
        Pin {
            version: self.version.clone(),
            provenance: self.provenance.clone(),
        }
    }
}

/// The result of a successful resolve: one version per package name.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct DependencyGraph {
    pub roots: BTreeMap<PackageName, Constraint>,
    pub packages: BTreeMap<PackageName, ResolvedPackage>,
}

impl DependencyGraph {
    pub fn get(&self, name: &PackageName) -> Option<&ResolvedPackage> {
        self.packages.get(name)
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Every declared constraint is satisfied by the chosen version.
    pub fn is_consistent(&self) -> bool {
        let satisfied = |name: &PackageName, c: &Constraint| {
            self.packages.get(name).is_some_and(|p| {
                CatalogEntry {
                    version: p.version.clone(),
                    provenance: p.provenance.clone(),
                    digest: None,
                    dependencies: BTreeMap::new(),
                }
                .satisfies(c)
            })
        };
        self.roots.iter().all(|(n, c)| satisfied(n, c))
            && self
                .packages
                .values()
                .all(|p| p.dependencies.iter().all(|(n, c)| satisfied(n, c)))
    }
}

#[derive(Debug)]
enum Failure {
    NotFound {
        package: PackageName,
        required_by: Requester,
    },
    Conflict(Conflict),
}

impl From<Failure> for Error {
    fn from(f: Failure) -> Self {
        match f {
            Failure::NotFound {
                package,
                required_by,
            } => Error::PackageNotFound {
                package,
                required_by: match required_by {
                    Requester::Root => None,
                    other => Some(other.to_string()),
                },
            },
            Failure::Conflict(c) => Error::ResolutionConflict(Box::new(c)),
        }
    }
}

#[derive(Debug, Clone)]
struct Demand {
    name: PackageName,
    requirement: Requirement,
}

struct Solver<'a> {
    catalog: &'a dyn Catalog,
    options: &'a ResolveOptions,
    cache: BTreeMap<PackageName, Vec<CatalogEntry>>,
    demands: Vec<Demand>,
    chosen: BTreeMap<PackageName, CatalogEntry>,
    steps: usize,
}

/// Resolve `roots` against `catalog`.
///
/// # Errors
///
/// [`Error::PackageNotFound`] when a required package is in no catalog, and
/// [`Error::ResolutionConflict`] naming the package whose constraints could
/// not be met when the search is exhausted.
pub fn resolve(
    roots: &BTreeMap<PackageName, Constraint>,
    catalog: &dyn Catalog,
    options: &ResolveOptions,
) -> Result<DependencyGraph> {
    let mut solver = Solver {
        catalog,
        options,
        cache: BTreeMap::new(),
        demands: roots
            .iter()
            .map(|(name, constraint)| Demand {
                name: name.clone(),
                requirement: Requirement {
                    constraint: constraint.clone(),
                    requester: Requester::Root,
                },
            })
            .collect(),
        chosen: BTreeMap::new(),
        steps: 0,
    };

    solver.solve()?;
    tracing::debug!(
        roots = roots.len(),
        packages = solver.chosen.len(),
        steps = solver.steps,
        "Resolved dependency graph"
    );
    Ok(solver.into_graph(roots))
}

impl Solver<'_> {
    fn candidates(&mut self, name: &PackageName) -> &[CatalogEntry] {
        if !self.cache.contains_key(name) {
            let mut entries = self.catalog.lookup(name);
            let preferred = self.options.prefer.get(name);
            // Stable: equal versions keep catalog priority order.
            entries.sort_by(|a, b| {
                let a_pref = preferred.is_some_and(|p| p.version == a.version && p.provenance == a.provenance);
                let b_pref = preferred.is_some_and(|p| p.version == b.version && p.provenance == b.provenance);
                b_pref.cmp(&a_pref).then_with(|| b.version.cmp(&a.version))
            });
            self.cache.insert(name.clone(), entries);
        }
        self.cache.get(name).map_or(&[], Vec::as_slice)
    }

    fn requirements_on(&self, name: &PackageName) -> Vec<Requirement> {
        self.demands
            .iter()
            .filter(|d| &d.name == name)
            .map(|d| d.requirement.clone())
            .collect()
    }

    fn solve(&mut self) -> std::result::Result<(), Failure> {
        self.steps += 1;
        let Some(next) = self
            .demands
            .iter()
            .find(|d| !self.chosen.contains_key(&d.name))
            .cloned()
        else {
            return Ok(());
        };
        let name = next.name;
        let requirements = self.requirements_on(&name);
        let entries = self.candidates(&name).to_vec();

        if entries.is_empty() {
            return Err(Failure::NotFound {
                package: name,
                required_by: next.requirement.requester,
            });
        }

        let viable: Vec<CatalogEntry> = entries
            .iter()
            .filter(|e| requirements.iter().all(|r| e.satisfies(&r.constraint)))
            .cloned()
            .collect();

        if viable.is_empty() {
            return Err(Failure::Conflict(Conflict {
                package: name,
                constraints: requirements,
                available: entries.iter().map(CatalogEntry::label).collect(),
            }));
        }

        let mut last_failure = None;
        for entry in viable {
            let requester = Requester::Package {
                name: name.clone(),
                version: entry.version.clone(),
            };

            if let Some(conflict) = self.clashes_with_chosen(&entry, &requester) {
                tracing::trace!(package = %name, version = %entry.version, "Candidate clashes with an earlier decision");
                last_failure = Some(Failure::Conflict(conflict));
                continue;
            }

            let mark = self.demands.len();
            self.demands
                .extend(entry.dependencies.iter().map(|(dep, constraint)| Demand {
                    name: dep.clone(),
                    requirement: Requirement {
                        constraint: constraint.clone(),
                        requester: requester.clone(),
                    },
                }));
            self.chosen.insert(name.clone(), entry);

            match self.solve() {
                Ok(()) => return Ok(()),
                Err(failure) => {
                    tracing::trace!(package = %name, "Backtracking");
                    self.chosen.remove(&name);
                    self.demands.truncate(mark);
                    last_failure = Some(failure);
                }
            }
        }

        Err(last_failure.unwrap_or_else(|| {
            Failure::Conflict(Conflict {
                package: name,
                constraints: requirements,
                available: Vec::new(),
            })
        }))
    }

    /// A dependency of `entry` that an already-chosen package fails to meet.
    fn clashes_with_chosen(&self, entry: &CatalogEntry, requester: &Requester) -> Option<Conflict> {
        entry.dependencies.iter().find_map(|(dep, constraint)| {
            let chosen = self.chosen.get(dep)?;
            if chosen.satisfies(constraint) {
                return None;
            }
            let mut constraints = self.requirements_on(dep);
            constraints.push(Requirement {
                constraint: constraint.clone(),
                requester: requester.clone(),
            });
            Some(Conflict {
                package: dep.clone(),
                constraints,
                available: vec![chosen.label()],
            })
        })
    }

    fn into_graph(self, roots: &BTreeMap<PackageName, Constraint>) -> DependencyGraph {
        let mut required_by: BTreeMap<PackageName, BTreeSet<PackageName>> = BTreeMap::new();
        for (name, entry) in &self.chosen {
            for dep in entry.dependencies.keys() {
                required_by.entry(dep.clone()).or_default().insert(name.clone());
            }
        }

        let first_constraint: BTreeMap<&PackageName, &Constraint> =
            self.demands.iter().rev().map(|d| (&d.name, &d.requirement.constraint)).collect();

        let packages = self
            .chosen
            .iter()
            .map(|(name, entry)| {
                let constraint = roots
                    .get(name)
                    .or_else(|| first_constraint.get(name).copied())
                    .cloned()
                    .unwrap_or_default();
                (
                    name.clone(),
                    ResolvedPackage {
                        name: name.clone(),
                        version: entry.version.clone(),
                        provenance: entry.provenance.clone(),
                        digest: entry.digest.clone(),
                        constraint,
                        dependencies: entry.dependencies.clone(),
                        required_by: required_by.remove(name).unwrap_or_default(),
                    },
                )
            })
            .collect();

        DependencyGraph {
            roots: roots.clone(),
            packages,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn n(s: &str) -> PackageName {
        PackageName::parse(s).unwrap()
    }

    fn c(s: &str) -> Constraint {
        Constraint::parse(s).unwrap()
    }

    fn entry(version: &str, deps: &[(&str, &str)]) -> CatalogEntry {
        CatalogEntry {
            version: Version::parse(version).unwrap(),
            provenance: Provenance::Registry {
                name: "local".into(),
            },
            digest: None,
            dependencies: deps.iter().map(|(d, k)| (n(d), c(k))).collect(),
        }
    }

    fn mock_catalog(spec: &[(&str, Vec<CatalogEntry>)]) -> MemoryCatalog {
        let mut catalog = MemoryCatalog::new();
        for (name, entries) in spec {
            for e in entries {
                catalog.add(n(name), e.clone());
            }
        }
        catalog
    }

    fn roots(spec: &[(&str, &str)]) -> BTreeMap<PackageName, Constraint> {
        spec.iter().map(|(name, k)| (n(name), c(k))).collect()
    }

    #[test]
    fn picks_highest_compatible_version() {
        let catalog = mock_catalog(&[(
            "dep-a",
            vec![entry("1.0.0", &[]), entry("1.2.0", &[]), entry("2.0.0", &[])],
        )]);
        let graph = resolve(&roots(&[("dep-a", "^1.0.0")]), &catalog, &ResolveOptions::default())
            .unwrap();
        assert_eq!(graph.get(&n("dep-a")).unwrap().version.to_string(), "1.2.0");
    }

    #[test]
    fn incompatible_siblings_report_conflict() {
        let catalog = mock_catalog(&[
            ("a", vec![entry("1.0.0", &[("dep-a", "^1.0.0")])]),
            ("b", vec![entry("1.0.0", &[("dep-a", "^2.0.0")])]),
            ("dep-a", vec![entry("1.0.0", &[]), entry("2.0.0", &[])]),
        ]);
        let err = resolve(&roots(&[("a", "*"), ("b", "*")]), &catalog, &ResolveOptions::default())
            .unwrap_err();
        match err {
            Error::ResolutionConflict(conflict) => {
                assert_eq!(conflict.package, n("dep-a"));
                assert_eq!(conflict.constraints.len(), 2);
                let msg = conflict.to_string();
                assert!(msg.contains("^1.0.0 (required by a@1.0.0)"), "{msg}");
                assert!(msg.contains("^2.0.0 (required by b@1.0.0)"), "{msg}");
            }
            other => panic!("expected conflict, got {other}"),
        }
    }

    #[test]
    fn backtracks_to_older_parent() {
        // a@2 needs shared ^2 but b pins shared ^1; a@1 is compatible.
        let catalog = mock_catalog(&[
            (
                "a",
                vec![
                    entry("1.0.0", &[("shared", "^1.0.0")]),
                    entry("2.0.0", &[("shared", "^2.0.0")]),
                ],
            ),
            ("b", vec![entry("1.0.0", &[("shared", "^1.0.0")])]),
            ("shared", vec![entry("1.5.0", &[]), entry("2.1.0", &[])]),
        ]);
        let graph = resolve(&roots(&[("a", "*"), ("b", "*")]), &catalog, &ResolveOptions::default())
            .unwrap();
        assert_eq!(graph.get(&n("a")).unwrap().version, Version::new(1, 0, 0));
        assert_eq!(graph.get(&n("shared")).unwrap().version, Version::new(1, 5, 0));
        assert!(graph.is_consistent());
    }

    #[test]
    fn cycles_resolve_to_single_versions() {
        let catalog = mock_catalog(&[
            ("a", vec![entry("1.0.0", &[("b", "^1")])]),
            ("b", vec![entry("1.0.0", &[("a", "^1")])]),
        ]);
        let graph = resolve(&roots(&[("a", "*")]), &catalog, &ResolveOptions::default()).unwrap();
        assert_eq!(graph.len(), 2);
        assert!(graph.get(&n("a")).unwrap().required_by.contains(&n("b")));
        assert!(graph.is_consistent());
    }

    #[test]
    fn missing_dependency_names_requester() {
        let catalog = mock_catalog(&[("a", vec![entry("1.0.0", &[("ghost", "*")])])]);
        let err = resolve(&roots(&[("a", "*")]), &catalog, &ResolveOptions::default()).unwrap_err();
        match err {
            Error::PackageNotFound {
                package,
                required_by,
            } => {
                assert_eq!(package, n("ghost"));
                assert_eq!(required_by.as_deref(), Some("a@1.0.0"));
            }
            other => panic!("expected not found, got {other}"),
        }
    }

    #[test]
    fn preferred_pin_wins_when_still_valid() {
        let catalog = mock_catalog(&[("p", vec![entry("1.0.0", &[]), entry("1.1.0", &[])])]);
        let mut options = ResolveOptions::default();
        options.prefer.insert(
            n("p"),
            Pin {
                version: Version::new(1, 0, 0),
                provenance: Provenance::Registry {
                    name: "local".into(),
                },
            },
        );
        let graph = resolve(&roots(&[("p", "^1")]), &catalog, &options).unwrap();
        assert_eq!(graph.get(&n("p")).unwrap().version, Version::new(1, 0, 0));

        let graph = resolve(&roots(&[("p", "^1.1")]), &catalog, &options).unwrap();
        assert_eq!(graph.get(&n("p")).unwrap().version, Version::new(1, 1, 0));
    }

    #[test]
    fn source_pins_reject_ranges() {
        let mut catalog = MemoryCatalog::new();
        catalog.add(
            n("@community/lint"),
            CatalogEntry {
                version: Version::new(0, 0, 0),
                provenance: Provenance::Source {
                    name: "community".into(),
                    revision: "abcdef0123".into(),
                    path: "skills/lint".into(),
                },
                digest: None,
                dependencies: BTreeMap::new(),
            },
        );
        let ok = |k: &str| {
            resolve(&roots(&[("@community/lint", k)]), &catalog, &ResolveOptions::default()).is_ok()
        };
        assert!(ok("*"));
        assert!(ok("rev:abcdef"));
        assert!(!ok("rev:999999"));
        assert!(!ok("^0.0.0"));
    }

    #[test]
    fn resolution_is_deterministic() {
        let catalog = mock_catalog(&[
            ("a", vec![entry("1.0.0", &[("c", "^1")]), entry("1.1.0", &[("c", "^1")])]),
            ("b", vec![entry("2.0.0", &[("c", ">=1.1, <2")])]),
            ("c", vec![entry("1.0.0", &[]), entry("1.1.0", &[]), entry("1.2.0", &[])]),
        ]);
        let r = roots(&[("a", "*"), ("b", "^2")]);
        let first = resolve(&r, &catalog, &ResolveOptions::default()).unwrap();
        let second = resolve(&r, &catalog, &ResolveOptions::default()).unwrap();
        assert_eq!(first, second);
        assert!(first.is_consistent());
    }
}
