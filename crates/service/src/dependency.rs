//! Dependency resolution for holon packages
//!
//! Resolution is a pure function of a root package and a catalog of the
//! published versions reachable from it. It picks one version per package,
//! then orders the chosen graph so every dependency precedes its dependents.

use oasis_types::{OasisError, OasisResult, Package, PackageKind, Version};
use std::collections::{HashMap, HashSet, VecDeque};
use std::fmt;

/// Identity of a package independent of its version
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PackageRef {
	pub kind: PackageKind,
	pub name: String,
}

impl PackageRef {
	pub fn new(kind: PackageKind, name: impl Into<String>) -> Self {
		Self {
			kind,
			name: name.into(),
		}
	}

	pub fn of(package: &Package) -> Self {
		Self::new(package.kind.clone(), package.name.clone())
	}

	/// Targets of a package's dependency edges, in declaration order
	pub fn dependencies_of(package: &Package) -> Vec<PackageRef> {
		package
			.dependencies
			.iter()
			.map(|edge| PackageRef::new(edge.kind.target_kind(&package.kind), edge.target.clone()))
			.collect()
	}
}

impl fmt::Display for PackageRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{}/{}", self.kind, self.name)
	}
}

/// Published, non-deleted versions known to the resolver
#[derive(Debug, Clone, Default)]
pub struct Catalog {
	versions: HashMap<PackageRef, Vec<Package>>,
}

impl Catalog {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn insert(&mut self, package: Package) {
		self.versions
			.entry(PackageRef::of(&package))
			.or_default()
			.push(package);
	}

	pub fn versions(&self, package: &PackageRef) -> &[Package] {
		self.versions
			.get(package)
			.map(Vec::as_slice)
			.unwrap_or(&[])
	}

	pub fn contains(&self, package: &PackageRef) -> bool {
		self.versions.contains_key(package)
	}

	/// Total number of versions across every package
	pub fn len(&self) -> usize {
		self.versions.values().map(Vec::len).sum()
	}

	pub fn is_empty(&self) -> bool {
		self.versions.is_empty()
	}
}

/// Packages to install, dependencies first and the root last
#[derive(Debug, Clone, PartialEq)]
pub struct ResolutionPlan {
	pub order: Vec<Package>,
}

impl ResolutionPlan {
	pub fn names(&self) -> Vec<&str> {
		self.order.iter().map(|p| p.name.as_str()).collect()
	}
}

#[derive(Debug, Clone)]
struct Requirement {
	by: String,
	min_version: Option<Version>,
}

impl fmt::Display for Requirement {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match &self.min_version {
			Some(version) => write!(f, "{} requires >= {}", self.by, version),
			None => write!(f, "{} requires any version", self.by),
		}
	}
}

pub struct DependencyResolver;

impl DependencyResolver {
	/// Choose a version for every package reachable from `root` and order them
	///
	/// When several dependents constrain the same package the highest minimum
	/// wins, and the newest published version of that major is chosen. Minimums
	/// on different majors are a version conflict.
	pub fn resolve(root: &Package, catalog: &Catalog) -> OasisResult<ResolutionPlan> {
		let root_ref = PackageRef::of(root);
		let mut chosen: HashMap<PackageRef, Package> = HashMap::new();
		chosen.insert(root_ref.clone(), root.clone());

		let max_passes = catalog.len() + 2;
		let mut converged = false;
		for _ in 0..max_passes {
			let requirements = Self::requirements(&root_ref, &chosen);

			let mut next = HashMap::with_capacity(requirements.len() + 1);
			next.insert(root_ref.clone(), root.clone());
			for (package, required) in &requirements {
				if *package == root_ref {
					Self::check_root(root, required)?;
					continue;
				}
				next.insert(package.clone(), Self::select(package, required, catalog)?);
			}

			if Self::same_choices(&chosen, &next) {
				converged = true;
				break;
			}
			chosen = next;
		}

		if !converged {
			return Err(OasisError::VersionConflict {
				package: root.name.clone(),
				required: vec!["dependency versions do not converge".to_string()],
			});
		}

		let order = TopologicalWalk::new(&chosen).run(&root_ref)?;
		let order = order
			.into_iter()
			.filter_map(|package| chosen.remove(&package))
			.collect();
		Ok(ResolutionPlan { order })
	}

	/// Requirements declared by the chosen packages reachable from the root
	fn requirements(
		root: &PackageRef,
		chosen: &HashMap<PackageRef, Package>,
	) -> HashMap<PackageRef, Vec<Requirement>> {
		let mut requirements: HashMap<PackageRef, Vec<Requirement>> = HashMap::new();
		let mut seen = HashSet::from([root.clone()]);
		let mut queue = VecDeque::from([root.clone()]);

		while let Some(current) = queue.pop_front() {
			let Some(package) = chosen.get(&current) else {
				continue;
			};
			for edge in &package.dependencies {
				let target = PackageRef::new(edge.kind.target_kind(&package.kind), edge.target.clone());
				requirements
					.entry(target.clone())
					.or_default()
					.push(Requirement {
						by: package.name.clone(),
						min_version: edge.min_version,
					});
				if seen.insert(target.clone()) {
					queue.push_back(target);
				}
			}
		}

		requirements
	}

	fn conflict(package: &PackageRef, required: &[Requirement]) -> OasisError {
		OasisError::VersionConflict {
			package: package.to_string(),
			required: required.iter().map(ToString::to_string).collect(),
		}
	}

	/// Highest minimum among `required`, failing on mixed majors
	fn floor(package: &PackageRef, required: &[Requirement]) -> OasisResult<Option<Version>> {
		let minimums: Vec<Version> = required.iter().filter_map(|r| r.min_version).collect();
		let majors: HashSet<u32> = minimums.iter().map(|v| v.major).collect();
		if majors.len() > 1 {
			return Err(Self::conflict(package, required));
		}
		Ok(minimums.into_iter().max())
	}

	fn check_root(root: &Package, required: &[Requirement]) -> OasisResult<()> {
		let root_ref = PackageRef::of(root);
		match Self::floor(&root_ref, required)? {
			Some(floor) if !(root.version.is_compatible_with(&floor) && root.version >= floor) => {
				Err(Self::conflict(&root_ref, required))
			},
			_ => Ok(()),
		}
	}

	fn select(package: &PackageRef, required: &[Requirement], catalog: &Catalog) -> OasisResult<Package> {
		let versions = catalog.versions(package);
		if versions.is_empty() {
			return Err(OasisError::not_found("package", package.to_string()));
		}

		let floor = Self::floor(package, required)?;
		versions
			.iter()
			.filter(|candidate| match floor {
				Some(floor) => candidate.version.is_compatible_with(&floor) && candidate.version >= floor,
				None => true,
			})
			.max_by_key(|candidate| (candidate.version, candidate.version_sequence))
			.cloned()
			.ok_or_else(|| Self::conflict(package, required))
	}

	fn same_choices(a: &HashMap<PackageRef, Package>, b: &HashMap<PackageRef, Package>) -> bool {
		a.len() == b.len()
			&& a.iter().all(|(package, chosen)| {
				b.get(package).is_some_and(|other| {
					other.version == chosen.version && other.version_sequence == chosen.version_sequence
				})
			})
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mark {
	Visiting,
	Done,
}

/// Depth-first post-order walk that reports the first cycle it meets
struct TopologicalWalk<'a> {
	graph: &'a HashMap<PackageRef, Package>,
	marks: HashMap<PackageRef, Mark>,
	path: Vec<PackageRef>,
	order: Vec<PackageRef>,
}

impl<'a> TopologicalWalk<'a> {
	fn new(graph: &'a HashMap<PackageRef, Package>) -> Self {
		Self {
			graph,
			marks: HashMap::new(),
			path: Vec::new(),
			order: Vec::new(),
		}
	}

	fn run(mut self, root: &PackageRef) -> OasisResult<Vec<PackageRef>> {
		self.visit(root)?;
		Ok(self.order)
	}

	fn visit(&mut self, node: &PackageRef) -> OasisResult<()> {
		match self.marks.get(node) {
			Some(Mark::Done) => return Ok(()),
			Some(Mark::Visiting) => {
				let start = self.path.iter().position(|p| p == node).unwrap_or(0);
				let mut cycle: Vec<String> =
					self.path[start..].iter().map(|p| p.name.clone()).collect();
				cycle.push(node.name.clone());
				return Err(OasisError::CycleDetected { cycle });
			},
			None => {},
		}

		self.marks.insert(node.clone(), Mark::Visiting);
		self.path.push(node.clone());

		let dependencies = self
			.graph
			.get(node)
			.map(PackageRef::dependencies_of)
			.unwrap_or_default();
		for dependency in &dependencies {
			self.visit(dependency)?;
		}

		self.path.pop();
		self.marks.insert(node.clone(), Mark::Done);
		self.order.push(node.clone());
		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use chrono::Utc;
	use oasis_types::{DependencyEdge, DependencyKind, ErrorKind};

	fn package(kind: PackageKind, name: &str, version: &str, deps: Vec<DependencyEdge>) -> Package {
		Package {
			id: format!("{}-{}", name, version),
			name: name.to_string(),
			kind,
			version: Version::parse(version).unwrap(),
			version_sequence: 1,
			description: None,
			dependencies: deps,
			metadata: HashMap::new(),
			created_by: "u1".to_string(),
			created_at: Utc::now(),
			published_at: Some(Utc::now()),
			artifact_key: None,
			artifact_size: None,
		}
	}

	fn library(name: &str, version: &str, deps: Vec<DependencyEdge>) -> Package {
		package(PackageKind::Library, name, version, deps)
	}

	fn lib_edge(name: &str) -> DependencyEdge {
		DependencyEdge::new(DependencyKind::Library, name)
	}

	#[test]
	fn test_dependencies_precede_dependents() {
		let root = package(
			PackageKind::Plugin,
			"app",
			"1.0.0",
			vec![
				lib_edge("ui"),
				DependencyEdge::new(DependencyKind::Runtime, "dotnet"),
			],
		);
		let mut catalog = Catalog::new();
		catalog.insert(library("ui", "1.0.0", vec![lib_edge("core")]));
		catalog.insert(library("core", "1.0.0", vec![]));
		catalog.insert(package(PackageKind::Runtime, "dotnet", "8.0.0", vec![]));

		let plan = DependencyResolver::resolve(&root, &catalog).unwrap();
		assert_eq!(plan.names(), vec!["core", "ui", "dotnet", "app"]);
	}

	#[test]
	fn test_cycle_is_reported_with_path() {
		let root = package(
			PackageKind::Plugin,
			"a",
			"1.0.0",
			vec![DependencyEdge::new(DependencyKind::Package, "b")],
		);
		let mut catalog = Catalog::new();
		catalog.insert(package(
			PackageKind::Plugin,
			"b",
			"1.0.0",
			vec![DependencyEdge::new(DependencyKind::Package, "a")],
		));

		let error = DependencyResolver::resolve(&root, &catalog).unwrap_err();
		assert_eq!(error.kind(), ErrorKind::CycleDetected);
		assert_eq!(error.to_string(), "circular dependency: a -> b -> a");
	}

	#[test]
	fn test_diamond_takes_highest_minimum() {
		let root = package(
			PackageKind::Plugin,
			"app",
			"1.0.0",
			vec![
				lib_edge("left"),
				lib_edge("right"),
				lib_edge("shared").at_least(Version::new(1, 0, 0)),
			],
		);
		let mut catalog = Catalog::new();
		catalog.insert(library("left", "1.0.0", vec![lib_edge("shared").at_least(Version::new(1, 1, 0))]));
		catalog.insert(library("right", "1.0.0", vec![lib_edge("shared").at_least(Version::new(1, 2, 0))]));
		catalog.insert(library("shared", "1.0.0", vec![]));
		catalog.insert(library("shared", "1.2.5", vec![]));
		catalog.insert(library("shared", "1.1.0", vec![]));
		catalog.insert(library("shared", "2.0.0", vec![]));

		let plan = DependencyResolver::resolve(&root, &catalog).unwrap();
		let shared: Vec<&Package> = plan.order.iter().filter(|p| p.name == "shared").collect();
		assert_eq!(shared.len(), 1);
		assert_eq!(shared[0].version, Version::new(1, 2, 5));
		assert_eq!(plan.order.last().map(|p| p.name.as_str()), Some("app"));
	}

	#[test]
	fn test_incompatible_majors_conflict() {
		let root = package(
			PackageKind::Plugin,
			"app",
			"1.0.0",
			vec![lib_edge("left"), lib_edge("shared").at_least(Version::new(1, 0, 0))],
		);
		let mut catalog = Catalog::new();
		catalog.insert(library("left", "1.0.0", vec![lib_edge("shared").at_least(Version::new(2, 0, 0))]));
		catalog.insert(library("shared", "1.4.0", vec![]));
		catalog.insert(library("shared", "2.1.0", vec![]));

		let error = DependencyResolver::resolve(&root, &catalog).unwrap_err();
		assert_eq!(error.kind(), ErrorKind::VersionConflict);
		assert!(error.to_string().contains("library/shared"));
	}

	#[test]
	fn test_missing_dependency_is_not_found() {
		let root = package(PackageKind::Plugin, "app", "1.0.0", vec![lib_edge("ghost")]);
		let error = DependencyResolver::resolve(&root, &Catalog::new()).unwrap_err();
		assert_eq!(error.kind(), ErrorKind::NotFound);
	}

	#[test]
	fn test_unsatisfiable_minimum_conflicts() {
		let root = package(
			PackageKind::Plugin,
			"app",
			"1.0.0",
			vec![lib_edge("core").at_least(Version::new(1, 5, 0))],
		);
		let mut catalog = Catalog::new();
		catalog.insert(library("core", "1.4.9", vec![]));

		let error = DependencyResolver::resolve(&root, &catalog).unwrap_err();
		assert_eq!(error.kind(), ErrorKind::VersionConflict);
	}
}
