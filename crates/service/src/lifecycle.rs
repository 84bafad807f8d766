//! Holon package lifecycle
//!
//! One manager serves one package kind. Drafts, published metadata, artifacts,
//! version indexes, sequence counters and install records all live under the
//! kind's key prefix and reach storage through the router, so they inherit
//! its failover. Dependencies of other kinds are read through their own
//! schemas.

use chrono::Utc;
use oasis_config::LifecycleSettings;
use oasis_types::{
	CreatePackageRequest, Envelope, InstalledPackage, OasisError, OasisResult, Package, PackageKind,
	PackageSchema, PackageVersion, RoutedRequest,
};
use serde::Serialize;
use std::collections::{HashMap, HashSet, VecDeque};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::context;
use crate::dependency::{Catalog, DependencyResolver, PackageRef};
use crate::locks::KeyedLocks;
use crate::router::{Router, RouterSession};

/// Published package together with its artifact bytes
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DownloadedPackage {
	pub package: Package,
	pub artifact: Vec<u8>,
}

/// Outcome of an install, dependencies first
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct InstallReport {
	pub installed: Vec<InstalledPackage>,
	/// Packages already present at the resolved version or newer
	pub skipped: Vec<InstalledPackage>,
}

pub struct LifecycleManager {
	schema: PackageSchema,
	dependency_schemas: HashMap<PackageKind, PackageSchema>,
	router: Router,
	install_root: String,
	locks: KeyedLocks,
}

impl LifecycleManager {
	pub fn new(schema: PackageSchema, router: Router) -> Self {
		Self {
			schema,
			dependency_schemas: HashMap::new(),
			router,
			install_root: LifecycleSettings::default().install_root,
			locks: KeyedLocks::new(),
		}
	}

	pub fn from_settings(schema: PackageSchema, router: Router, settings: &LifecycleSettings) -> Self {
		Self::new(schema, router).with_install_root(settings.install_root.clone())
	}

	pub fn with_install_root(mut self, root: impl Into<String>) -> Self {
		self.install_root = root.into().trim_end_matches('/').to_string();
		self
	}

	/// Schema used for dependencies of `schema.kind` instead of the default prefix
	pub fn with_dependency_schema(mut self, schema: PackageSchema) -> Self {
		self.dependency_schemas.insert(schema.kind.clone(), schema);
		self
	}

	pub fn schema(&self) -> &PackageSchema {
		&self.schema
	}

	fn schema_for(&self, kind: &PackageKind) -> PackageSchema {
		if *kind == self.schema.kind {
			return self.schema.clone();
		}
		self.dependency_schemas
			.get(kind)
			.cloned()
			.unwrap_or_else(|| PackageSchema::new(kind.clone()))
	}

	/// Validate and store a draft; drafts carry sequence zero
	pub async fn create(
		&self,
		request: CreatePackageRequest,
		cancel: &CancellationToken,
	) -> Envelope<Package> {
		let mut session = self.router.session(cancel);
		let result = async {
			self.schema.validate(&request)?;
			let package = Package {
				id: Uuid::new_v4().to_string(),
				name: request.name.trim().to_string(),
				kind: self.schema.kind.clone(),
				version: request.version,
				version_sequence: 0,
				description: request.description,
				dependencies: request.dependencies,
				metadata: request.metadata,
				created_by: context::current_id(),
				created_at: Utc::now(),
				published_at: None,
				artifact_key: None,
				artifact_size: None,
			};
			session
				.store_json(&self.schema.draft_key(&package.id), &package)
				.await?;
			info!(
				package_id = %package.id,
				name = %package.name,
				kind = %package.kind,
				version = %package.version,
				"Package draft created"
			);
			Ok::<_, OasisError>(package)
		}
		.await;
		session.finish(result)
	}

	pub async fn get_draft(&self, package_id: &str, cancel: &CancellationToken) -> Envelope<Package> {
		let mut session = self.router.session(cancel);
		let result = self.load_draft(&mut session, package_id).await;
		session.finish(result)
	}

	async fn load_draft(&self, session: &mut RouterSession<'_>, package_id: &str) -> OasisResult<Package> {
		session
			.read_json_opt::<Package>(&self.schema.draft_key(package_id))
			.await?
			.ok_or_else(|| OasisError::not_found("package", package_id))
	}

	/// Publish a draft under the next version sequence of its name
	///
	/// The sequence counter is advanced before anything else is written, so a
	/// publish that fails halfway burns its sequence instead of reusing it.
	pub async fn publish(
		&self,
		package_id: &str,
		artifact: Vec<u8>,
		cancel: &CancellationToken,
	) -> Envelope<Package> {
		let mut session = self.router.session(cancel);
		let result = self.publish_inner(&mut session, package_id, artifact).await;
		session.finish(result)
	}

	async fn publish_inner(
		&self,
		session: &mut RouterSession<'_>,
		package_id: &str,
		artifact: Vec<u8>,
	) -> OasisResult<Package> {
		let draft = self.load_draft(session, package_id).await?;
		let _guard = self.locks.lock(&draft.name).await;

		let sequence_key = self.schema.sequence_key(&draft.name);
		let current = session.read_json_opt::<u64>(&sequence_key).await?.unwrap_or(0);
		let sequence = current + 1;
		session.store_json(&sequence_key, &sequence).await?;

		let artifact_key = self.schema.artifact_key(&draft.name, sequence);
		let artifact_size = artifact.len() as u64;
		session.store_blob(&artifact_key, artifact).await?;

		let published_at = Utc::now();
		let package = Package {
			version_sequence: sequence,
			published_at: Some(published_at),
			artifact_key: Some(artifact_key),
			artifact_size: Some(artifact_size),
			..draft
		};
		session
			.store_json(&self.schema.metadata_key(&package.name, sequence), &package)
			.await?;

		let versions_key = self.schema.versions_key(&package.name);
		let mut versions = session
			.read_json_opt::<Vec<PackageVersion>>(&versions_key)
			.await?
			.unwrap_or_default();
		versions.push(PackageVersion {
			package_id: package.id.clone(),
			version: package.version,
			version_sequence: sequence,
			published_at,
			deleted: false,
		});
		session.store_json(&versions_key, &versions).await?;

		info!(
			name = %package.name,
			kind = %package.kind,
			version = %package.version,
			sequence,
			size = artifact_size,
			"Package published"
		);
		Ok(package)
	}

	/// Version index of `name`, deleted entries included
	pub async fn list_versions(&self, name: &str, cancel: &CancellationToken) -> Envelope<Vec<PackageVersion>> {
		let mut session = self.router.session(cancel);
		let result = Self::versions(&mut session, &self.schema, name).await;
		session.finish(result)
	}

	async fn versions(
		session: &mut RouterSession<'_>,
		schema: &PackageSchema,
		name: &str,
	) -> OasisResult<Vec<PackageVersion>> {
		session
			.read_json_opt::<Vec<PackageVersion>>(&schema.versions_key(name))
			.await?
			.ok_or_else(|| OasisError::not_found("package", format!("{}/{}", schema.kind, name)))
	}

	/// Metadata of one published version; `None` picks the latest live one
	async fn fetch_version(
		session: &mut RouterSession<'_>,
		schema: &PackageSchema,
		name: &str,
		sequence: Option<u64>,
	) -> OasisResult<Package> {
		let versions = Self::versions(session, schema, name).await?;
		let mut live = versions.iter().filter(|v| !v.deleted);
		let entry = match sequence {
			Some(sequence) => live.find(|v| v.version_sequence == sequence),
			None => live.max_by_key(|v| v.version_sequence),
		};
		let Some(entry) = entry else {
			let id = match sequence {
				Some(sequence) => format!("{}/{}#{}", schema.kind, name, sequence),
				None => format!("{}/{}", schema.kind, name),
			};
			return Err(OasisError::not_found("package version", id));
		};
		session
			.read_json(&schema.metadata_key(name, entry.version_sequence))
			.await
	}

	pub async fn download(
		&self,
		name: &str,
		sequence: Option<u64>,
		cancel: &CancellationToken,
	) -> Envelope<DownloadedPackage> {
		let mut session = self.router.session(cancel);
		let result = async {
			let package = Self::fetch_version(&mut session, &self.schema, name, sequence).await?;
			let (artifact, _) = self.fetch_artifact(&mut session, &package).await?;
			Ok::<_, OasisError>(DownloadedPackage { package, artifact })
		}
		.await;
		session.finish(result)
	}

	/// Artifact bytes and the id of the provider that served them
	async fn fetch_artifact(
		&self,
		session: &mut RouterSession<'_>,
		package: &Package,
	) -> OasisResult<(Vec<u8>, String)> {
		let key = match &package.artifact_key {
			Some(key) => key.clone(),
			None => self
				.schema_for(&package.kind)
				.artifact_key(&package.name, package.version_sequence),
		};
		let envelope = self
			.router
			.read_blob(RoutedRequest::read_blob(&key), session.cancel())
			.await;
		let source = envelope.provider_id().unwrap_or_default().to_string();
		let artifact = session.absorb(envelope)?;

		if let Some(expected) = package.artifact_size {
			if artifact.len() as u64 != expected {
				return Err(OasisError::permanent(format!(
					"artifact {} is {} bytes, expected {}",
					key,
					artifact.len(),
					expected
				)));
			}
		}
		Ok((artifact, source))
	}

	/// Withdraw one published version; its sequence is never handed out again
	pub async fn delete(&self, name: &str, sequence: u64, cancel: &CancellationToken) -> Envelope<PackageVersion> {
		let mut session = self.router.session(cancel);
		let result = async {
			let _guard = self.locks.lock(name).await;

			let mut versions = Self::versions(&mut session, &self.schema, name).await?;
			let Some(entry) = versions
				.iter_mut()
				.find(|v| v.version_sequence == sequence && !v.deleted)
			else {
				return Err(OasisError::not_found(
					"package version",
					format!("{}/{}#{}", self.schema.kind, name, sequence),
				));
			};
			entry.deleted = true;
			let deleted = entry.clone();
			session
				.store_json(&self.schema.versions_key(name), &versions)
				.await?;

			match session
				.delete_entity(&self.schema.metadata_key(name, sequence))
				.await
			{
				Ok(()) | Err(OasisError::NotFound { .. }) => {},
				Err(e) => return Err(e),
			}

			info!(name, sequence, kind = %self.schema.kind, "Package version deleted");
			Ok(deleted)
		}
		.await;
		session.finish(result)
	}

	/// Install a package and everything it depends on
	///
	/// Nothing is installed when resolution fails. Packages already installed
	/// at the resolved version or newer are skipped.
	pub async fn install(
		&self,
		name: &str,
		sequence: Option<u64>,
		cancel: &CancellationToken,
	) -> Envelope<InstallReport> {
		let mut session = self.router.session(cancel);
		let result = self.install_inner(&mut session, name, sequence).await;
		if let Err(e) = &result {
			warn!(name, kind = %self.schema.kind, error = %e, "Package install failed");
		}
		session.finish(result)
	}

	async fn install_inner(
		&self,
		session: &mut RouterSession<'_>,
		name: &str,
		sequence: Option<u64>,
	) -> OasisResult<InstallReport> {
		let root = Self::fetch_version(session, &self.schema, name, sequence).await?;
		let catalog = self.build_catalog(session, &root).await?;
		let plan = DependencyResolver::resolve(&root, &catalog)?;
		debug!(name, order = ?plan.names(), "Install plan resolved");

		let mut report = InstallReport::default();
		for package in plan.order {
			let schema = self.schema_for(&package.kind);
			let installed_key = schema.installed_key(&package.name);

			if let Some(existing) = session
				.read_json_opt::<InstalledPackage>(&installed_key)
				.await?
			{
				if (existing.version, existing.version_sequence)
					>= (package.version, package.version_sequence)
				{
					debug!(name = %package.name, version = %existing.version, "Already installed");
					report.skipped.push(existing);
					continue;
				}
			}

			let (_, source) = self.fetch_artifact(session, &package).await?;
			let record = InstalledPackage {
				package_id: package.id.clone(),
				name: package.name.clone(),
				kind: package.kind.clone(),
				version: package.version,
				version_sequence: package.version_sequence,
				source,
				destination: format!("{}/{}/{}", self.install_root, package.kind, package.name),
				installed_by: context::current_id(),
				installed_at: Utc::now(),
			};
			session.store_json(&installed_key, &record).await?;
			info!(
				name = %record.name,
				kind = %record.kind,
				version = %record.version,
				source = %record.source,
				"Package installed"
			);
			report.installed.push(record);
		}

		Ok(report)
	}

	/// Every published version reachable from `root` through any version's edges
	async fn build_catalog(&self, session: &mut RouterSession<'_>, root: &Package) -> OasisResult<Catalog> {
		let mut catalog = Catalog::new();
		let root_ref = PackageRef::of(root);
		let mut seen = HashSet::from([root_ref]);
		let mut queue: VecDeque<PackageRef> = PackageRef::dependencies_of(root).into();

		while let Some(current) = queue.pop_front() {
			if !seen.insert(current.clone()) {
				continue;
			}
			let schema = self.schema_for(&current.kind);
			let versions = match Self::versions(session, &schema, &current.name).await {
				Ok(versions) => versions,
				Err(OasisError::NotFound { .. }) => continue,
				Err(e) => return Err(e),
			};

			for entry in versions.iter().filter(|v| !v.deleted) {
				let package: Package = session
					.read_json(&schema.metadata_key(&current.name, entry.version_sequence))
					.await?;
				queue.extend(PackageRef::dependencies_of(&package));
				catalog.insert(package);
			}
		}

		Ok(catalog)
	}

	pub async fn is_installed(&self, name: &str, cancel: &CancellationToken) -> Envelope<bool> {
		let mut session = self.router.session(cancel);
		let result = session
			.read_json_opt::<InstalledPackage>(&self.schema.installed_key(name))
			.await
			.map(|record| record.is_some());
		session.finish(result)
	}

	pub async fn get_installed(&self, name: &str, cancel: &CancellationToken) -> Envelope<InstalledPackage> {
		let mut session = self.router.session(cancel);
		let result = session
			.read_json_opt::<InstalledPackage>(&self.schema.installed_key(name))
			.await
			.and_then(|record| {
				record.ok_or_else(|| OasisError::not_found("installed package", name))
			});
		session.finish(result)
	}

	/// Remove the install record of `name`; dependencies stay installed
	pub async fn uninstall(&self, name: &str, cancel: &CancellationToken) -> Envelope<InstalledPackage> {
		let mut session = self.router.session(cancel);
		let result = async {
			let key = self.schema.installed_key(name);
			let record = session
				.read_json_opt::<InstalledPackage>(&key)
				.await?
				.ok_or_else(|| OasisError::not_found("installed package", name))?;
			session.delete_entity(&key).await?;
			info!(name, kind = %self.schema.kind, "Package uninstalled");
			Ok::<_, OasisError>(record)
		}
		.await;
		session.finish(result)
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::router::RouterConfig;
	use oasis_adapters::ProviderRegistry;
	use oasis_storage::MemoryStore;
	use oasis_types::{DependencyEdge, DependencyKind, ErrorKind, Version};
	use std::sync::Arc;

	struct Harness {
		plugins: LifecycleManager,
		libraries: LifecycleManager,
		runtimes: LifecycleManager,
		store: MemoryStore,
		cancel: CancellationToken,
	}

	fn harness() -> Harness {
		let registry = Arc::new(ProviderRegistry::default());
		let store = MemoryStore::new("ledger");
		registry.register(Arc::new(store.clone()));
		let router = Router::new(registry, RouterConfig::default());
		Harness {
			plugins: LifecycleManager::new(PackageSchema::new(PackageKind::Plugin), router.clone()),
			libraries: LifecycleManager::new(PackageSchema::new(PackageKind::Library), router.clone()),
			runtimes: LifecycleManager::new(PackageSchema::new(PackageKind::Runtime), router),
			store,
			cancel: CancellationToken::new(),
		}
	}

	async fn publish(
		manager: &LifecycleManager,
		request: CreatePackageRequest,
		cancel: &CancellationToken,
	) -> Package {
		let draft = manager.create(request, cancel).await.into_result().unwrap();
		manager
			.publish(&draft.id, b"artifact".to_vec(), cancel)
			.await
			.into_result()
			.unwrap()
	}

	#[tokio::test]
	async fn test_create_stores_draft() {
		let h = harness();
		let draft = context::with_identity_id(
			"u1",
			h.libraries
				.create(CreatePackageRequest::new("lib-x", Version::new(1, 0, 0)), &h.cancel),
		)
		.await
		.into_result()
		.unwrap();

		assert_eq!(draft.version_sequence, 0);
		assert_eq!(draft.created_by, "u1");
		assert!(!draft.is_published());
		let loaded = h.libraries.get_draft(&draft.id, &h.cancel).await;
		assert_eq!(loaded.payload(), Some(&draft));
	}

	#[tokio::test]
	async fn test_create_rejects_missing_metadata() {
		let h = harness();
		let manager = LifecycleManager::new(
			PackageSchema::new(PackageKind::Plugin).requiring("entry_point"),
			h.plugins.router.clone(),
		);
		let result = manager
			.create(CreatePackageRequest::new("app", Version::new(1, 0, 0)), &h.cancel)
			.await;
		assert_eq!(result.error_kind(), Some(ErrorKind::Permanent));
		assert_eq!(h.store.stats().entities, 0);
	}

	#[tokio::test]
	async fn test_sequences_increase_and_are_never_reused() {
		let h = harness();
		let draft = h
			.libraries
			.create(CreatePackageRequest::new("lib-x", Version::new(1, 0, 0)), &h.cancel)
			.await
			.into_result()
			.unwrap();

		let first = h.libraries.publish(&draft.id, b"v1".to_vec(), &h.cancel).await;
		let second = h.libraries.publish(&draft.id, b"v2".to_vec(), &h.cancel).await;
		assert_eq!(first.payload().unwrap().version_sequence, 1);
		assert_eq!(second.payload().unwrap().version_sequence, 2);

		let deleted = h.libraries.delete("lib-x", 2, &h.cancel).await;
		assert!(deleted.payload().unwrap().deleted);

		let third = h.libraries.publish(&draft.id, b"v3".to_vec(), &h.cancel).await;
		assert_eq!(third.payload().unwrap().version_sequence, 3);

		let versions = h.libraries.list_versions("lib-x", &h.cancel).await.into_result().unwrap();
		let flags: Vec<(u64, bool)> = versions.iter().map(|v| (v.version_sequence, v.deleted)).collect();
		assert_eq!(flags, vec![(1, false), (2, true), (3, false)]);
	}

	#[tokio::test]
	async fn test_deleting_first_sequence_does_not_free_it() {
		let h = harness();
		let draft = h
			.libraries
			.create(CreatePackageRequest::new("lib-x", Version::new(1, 0, 0)), &h.cancel)
			.await
			.into_result()
			.unwrap();

		let first = h.libraries.publish(&draft.id, b"v1".to_vec(), &h.cancel).await;
		assert!(first.warnings().is_empty(), "{:?}", first.warnings());
		h.libraries.publish(&draft.id, b"v2".to_vec(), &h.cancel).await;

		h.libraries.delete("lib-x", 1, &h.cancel).await.into_result().unwrap();
		let third = h.libraries.publish(&draft.id, b"v3".to_vec(), &h.cancel).await;
		assert_eq!(third.payload().unwrap().version_sequence, 3);

		h.libraries.delete("lib-x", 2, &h.cancel).await.into_result().unwrap();
		h.libraries.delete("lib-x", 3, &h.cancel).await.into_result().unwrap();
		let fourth = h.libraries.publish(&draft.id, b"v4".to_vec(), &h.cancel).await;
		assert_eq!(fourth.payload().unwrap().version_sequence, 4);

		assert!(h.libraries.locks.is_empty());
	}

	#[tokio::test]
	async fn test_download_latest_and_deleted() {
		let h = harness();
		let draft = h
			.libraries
			.create(CreatePackageRequest::new("lib-x", Version::new(1, 0, 0)), &h.cancel)
			.await
			.into_result()
			.unwrap();
		h.libraries.publish(&draft.id, b"one".to_vec(), &h.cancel).await;
		h.libraries.publish(&draft.id, b"two".to_vec(), &h.cancel).await;

		let latest = h.libraries.download("lib-x", None, &h.cancel).await.into_result().unwrap();
		assert_eq!(latest.package.version_sequence, 2);
		assert_eq!(latest.artifact, b"two".to_vec());

		h.libraries.delete("lib-x", 2, &h.cancel).await;
		let latest = h.libraries.download("lib-x", None, &h.cancel).await.into_result().unwrap();
		assert_eq!(latest.artifact, b"one".to_vec());

		let gone = h.libraries.download("lib-x", Some(2), &h.cancel).await;
		assert_eq!(gone.error_kind(), Some(ErrorKind::NotFound));
		let again = h.libraries.delete("lib-x", 2, &h.cancel).await;
		assert_eq!(again.error_kind(), Some(ErrorKind::NotFound));
	}

	#[tokio::test]
	async fn test_install_orders_dependencies_first() {
		let h = harness();
		publish(
			&h.runtimes,
			CreatePackageRequest::new("dotnet", Version::new(8, 0, 0)),
			&h.cancel,
		)
		.await;
		publish(
			&h.libraries,
			CreatePackageRequest::new("lib-x", Version::new(1, 2, 0))
				.with_dependency(DependencyEdge::new(DependencyKind::Runtime, "dotnet")),
			&h.cancel,
		)
		.await;
		publish(
			&h.plugins,
			CreatePackageRequest::new("app", Version::new(0, 1, 0))
				.with_dependency(DependencyEdge::new(DependencyKind::Library, "lib-x").at_least(Version::new(1, 0, 0)))
				.with_dependency(DependencyEdge::new(DependencyKind::Runtime, "dotnet")),
			&h.cancel,
		)
		.await;

		let report = context::with_identity_id("u1", h.plugins.install("app", None, &h.cancel))
			.await
			.into_result()
			.unwrap();
		let names: Vec<&str> = report.installed.iter().map(|p| p.name.as_str()).collect();
		assert_eq!(names, vec!["dotnet", "lib-x", "app"]);
		assert!(report.installed.iter().all(|p| p.installed_by == "u1" && p.source == "ledger"));
		assert_eq!(report.installed[0].destination, "installed/runtime/dotnet");

		assert_eq!(h.runtimes.is_installed("dotnet", &h.cancel).await.payload(), Some(&true));

		let again = h.plugins.install("app", None, &h.cancel).await.into_result().unwrap();
		assert!(again.installed.is_empty());
		assert_eq!(again.skipped.len(), 3);
	}

	#[tokio::test]
	async fn test_cycle_installs_nothing() {
		let h = harness();
		publish(
			&h.plugins,
			CreatePackageRequest::new("a", Version::new(1, 0, 0))
				.with_dependency(DependencyEdge::new(DependencyKind::Package, "b")),
			&h.cancel,
		)
		.await;
		publish(
			&h.plugins,
			CreatePackageRequest::new("b", Version::new(1, 0, 0))
				.with_dependency(DependencyEdge::new(DependencyKind::Package, "a")),
			&h.cancel,
		)
		.await;

		let result = h.plugins.install("a", None, &h.cancel).await;
		assert_eq!(result.error_kind(), Some(ErrorKind::CycleDetected));
		assert_eq!(h.plugins.is_installed("a", &h.cancel).await.payload(), Some(&false));
		assert_eq!(h.plugins.is_installed("b", &h.cancel).await.payload(), Some(&false));
	}

	#[tokio::test]
	async fn test_conflicting_majors_install_nothing() {
		let h = harness();
		publish(&h.libraries, CreatePackageRequest::new("core", Version::new(1, 0, 0)), &h.cancel).await;
		publish(&h.libraries, CreatePackageRequest::new("core", Version::new(2, 0, 0)), &h.cancel).await;
		publish(
			&h.libraries,
			CreatePackageRequest::new("ui", Version::new(1, 0, 0))
				.with_dependency(DependencyEdge::new(DependencyKind::Library, "core").at_least(Version::new(2, 0, 0))),
			&h.cancel,
		)
		.await;
		publish(
			&h.plugins,
			CreatePackageRequest::new("app", Version::new(1, 0, 0))
				.with_dependency(DependencyEdge::new(DependencyKind::Library, "ui"))
				.with_dependency(DependencyEdge::new(DependencyKind::Library, "core").at_least(Version::new(1, 0, 0))),
			&h.cancel,
		)
		.await;

		let result = h.plugins.install("app", None, &h.cancel).await;
		assert_eq!(result.error_kind(), Some(ErrorKind::VersionConflict));
		assert_eq!(h.libraries.is_installed("core", &h.cancel).await.payload(), Some(&false));
	}

	#[tokio::test]
	async fn test_uninstall_removes_record() {
		let h = harness();
		publish(&h.libraries, CreatePackageRequest::new("lib-x", Version::new(1, 0, 0)), &h.cancel).await;
		h.libraries.install("lib-x", Some(1), &h.cancel).await.into_result().unwrap();

		let removed = h.libraries.uninstall("lib-x", &h.cancel).await;
		assert_eq!(removed.payload().map(|r| r.version_sequence), Some(1));
		assert_eq!(h.libraries.is_installed("lib-x", &h.cancel).await.payload(), Some(&false));
		let missing = h.libraries.uninstall("lib-x", &h.cancel).await;
		assert_eq!(missing.error_kind(), Some(ErrorKind::NotFound));
	}
}
