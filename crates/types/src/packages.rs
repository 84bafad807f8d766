//! Versioned package (holon) model
//!
//! Packages are generic over their kind. Each kind is described by a
//! [`PackageSchema`] that fixes the storage key prefix and the metadata keys a
//! package of that kind must carry.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::errors::{OasisError, OasisResult};

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PackageKind {
	Plugin,
	Library,
	Runtime,
	Template,
	GameAsset,
	Quest,
	NftCollection,
	Other(String),
}

impl PackageKind {
	pub fn as_str(&self) -> &str {
		match self {
			PackageKind::Plugin => "plugin",
			PackageKind::Library => "library",
			PackageKind::Runtime => "runtime",
			PackageKind::Template => "template",
			PackageKind::GameAsset => "game_asset",
			PackageKind::Quest => "quest",
			PackageKind::NftCollection => "nft_collection",
			PackageKind::Other(name) => name,
		}
	}

	/// Storage prefix used when a schema does not override it
	pub fn default_key_prefix(&self) -> String {
		format!("holons/{}", self.as_str())
	}
}

impl std::fmt::Display for PackageKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// What a dependency edge points at
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum DependencyKind {
	Runtime,
	Library,
	Template,
	/// Another package of the depending package's own kind
	Package,
}

impl DependencyKind {
	/// Package kind the edge target lives under
	pub fn target_kind(&self, own: &PackageKind) -> PackageKind {
		match self {
			DependencyKind::Runtime => PackageKind::Runtime,
			DependencyKind::Library => PackageKind::Library,
			DependencyKind::Template => PackageKind::Template,
			DependencyKind::Package => own.clone(),
		}
	}
}

/// `major.minor.patch` version
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Version {
	pub major: u32,
	pub minor: u32,
	pub patch: u32,
}

impl Version {
	pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
		Self {
			major,
			minor,
			patch,
		}
	}

	pub fn parse(s: &str) -> OasisResult<Self> {
		let parts: Vec<&str> = s.trim().trim_start_matches('v').split('.').collect();
		if parts.len() != 3 {
			return Err(OasisError::permanent(format!(
				"invalid input: version '{}' is not major.minor.patch",
				s
			)));
		}

		let mut numbers = [0u32; 3];
		for (slot, part) in numbers.iter_mut().zip(&parts) {
			*slot = part.parse::<u32>().map_err(|_| {
				OasisError::permanent(format!("invalid input: version '{}' is not numeric", s))
			})?;
		}

		Ok(Self::new(numbers[0], numbers[1], numbers[2]))
	}

	/// Same major version
	pub fn is_compatible_with(&self, other: &Version) -> bool {
		self.major == other.major
	}
}

impl std::fmt::Display for Version {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
	}
}

impl std::str::FromStr for Version {
	type Err = OasisError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		Version::parse(s)
	}
}

/// Directed dependency from a package to another package, runtime or library
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct DependencyEdge {
	pub kind: DependencyKind,
	/// Name of the target package
	pub target: String,
	/// Minimum acceptable version; any published version when absent
	pub min_version: Option<Version>,
}

impl DependencyEdge {
	pub fn new(kind: DependencyKind, target: impl Into<String>) -> Self {
		Self {
			kind,
			target: target.into(),
			min_version: None,
		}
	}

	pub fn at_least(mut self, version: Version) -> Self {
		self.min_version = Some(version);
		self
	}
}

/// A package version, draft or published
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Package {
	pub id: String,
	pub name: String,
	pub kind: PackageKind,
	pub version: Version,
	/// Assigned at publish time; zero while the package is a draft
	pub version_sequence: u64,
	pub description: Option<String>,
	pub dependencies: Vec<DependencyEdge>,
	pub metadata: HashMap<String, serde_json::Value>,
	pub created_by: String,
	pub created_at: DateTime<Utc>,
	pub published_at: Option<DateTime<Utc>>,
	/// Blob key of the uploaded artifact
	pub artifact_key: Option<String>,
	pub artifact_size: Option<u64>,
}

impl Package {
	pub fn is_published(&self) -> bool {
		self.published_at.is_some() && self.version_sequence > 0
	}
}

/// Input of `create`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreatePackageRequest {
	pub name: String,
	pub version: Version,
	pub description: Option<String>,
	pub dependencies: Vec<DependencyEdge>,
	pub metadata: HashMap<String, serde_json::Value>,
}

impl CreatePackageRequest {
	pub fn new(name: impl Into<String>, version: Version) -> Self {
		Self {
			name: name.into(),
			version,
			description: None,
			dependencies: Vec::new(),
			metadata: HashMap::new(),
		}
	}

	pub fn with_dependency(mut self, edge: DependencyEdge) -> Self {
		self.dependencies.push(edge);
		self
	}

	pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
		self.metadata.insert(key.into(), value.into());
		self
	}
}

/// Entry in a package's version index
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageVersion {
	pub package_id: String,
	pub version: Version,
	pub version_sequence: u64,
	pub published_at: DateTime<Utc>,
	pub deleted: bool,
}

/// Record written once a package and its whole dependency graph are installed
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct InstalledPackage {
	pub package_id: String,
	pub name: String,
	pub kind: PackageKind,
	pub version: Version,
	pub version_sequence: u64,
	/// Provider the artifact was fetched from
	pub source: String,
	/// Install destination path or key
	pub destination: String,
	pub installed_by: String,
	pub installed_at: DateTime<Utc>,
}

/// Per-kind parameters of the lifecycle engine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PackageSchema {
	pub kind: PackageKind,
	pub key_prefix: String,
	/// Metadata keys every package of this kind must define
	pub required_metadata: Vec<String>,
}

impl PackageSchema {
	pub fn new(kind: PackageKind) -> Self {
		let key_prefix = kind.default_key_prefix();
		Self {
			kind,
			key_prefix,
			required_metadata: Vec::new(),
		}
	}

	pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
		self.key_prefix = prefix.into().trim_end_matches('/').to_string();
		self
	}

	pub fn requiring(mut self, key: impl Into<String>) -> Self {
		self.required_metadata.push(key.into());
		self
	}

	pub fn validate(&self, request: &CreatePackageRequest) -> OasisResult<()> {
		let name = request.name.trim();
		if name.is_empty() {
			return Err(OasisError::permanent("invalid input: package name is required"));
		}
		if !name
			.chars()
			.all(|c| c.is_alphanumeric() || c == '-' || c == '_' || c == '.')
		{
			return Err(OasisError::permanent(format!(
				"invalid input: package name '{}' contains invalid characters",
				name
			)));
		}

		for key in &self.required_metadata {
			if !request.metadata.contains_key(key) {
				return Err(OasisError::permanent(format!(
					"invalid input: {} metadata requires '{}'",
					self.kind, key
				)));
			}
		}

		if request.dependencies.iter().any(|d| {
			d.target == request.name && d.kind.target_kind(&self.kind) == self.kind
		}) {
			return Err(OasisError::CycleDetected {
				cycle: vec![request.name.clone(), request.name.clone()],
			});
		}

		Ok(())
	}

	pub fn metadata_key(&self, name: &str, sequence: u64) -> String {
		format!("{}/packages/{}/{}", self.key_prefix, name, sequence)
	}

	pub fn draft_key(&self, package_id: &str) -> String {
		format!("{}/drafts/{}", self.key_prefix, package_id)
	}

	pub fn artifact_key(&self, name: &str, sequence: u64) -> String {
		format!("{}/artifacts/{}/{}", self.key_prefix, name, sequence)
	}

	pub fn versions_key(&self, name: &str) -> String {
		format!("{}/versions/{}", self.key_prefix, name)
	}

	pub fn sequence_key(&self, name: &str) -> String {
		format!("{}/sequence/{}", self.key_prefix, name)
	}

	pub fn installed_key(&self, name: &str) -> String {
		format!("{}/installed/{}", self.key_prefix, name)
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_version_parse_and_order() {
		let v = Version::parse("v1.2.3").unwrap();
		assert_eq!(v, Version::new(1, 2, 3));
		assert!(Version::new(1, 10, 0) > Version::new(1, 9, 9));
		assert!(Version::new(2, 0, 0).is_compatible_with(&Version::new(2, 5, 1)));
		assert!(!Version::new(1, 0, 0).is_compatible_with(&Version::new(2, 0, 0)));
		assert!(Version::parse("1.2").is_err());
		assert!(Version::parse("1.x.0").is_err());
	}

	#[test]
	fn test_schema_validation() {
		let schema = PackageSchema::new(PackageKind::Plugin)
			.with_key_prefix("oapps/")
			.requiring("entry_point");

		let request = CreatePackageRequest::new("lib-x", Version::new(1, 0, 0));
		assert!(schema.validate(&request).is_err());

		let request = request.with_metadata("entry_point", "main.wasm");
		assert!(schema.validate(&request).is_ok());
		assert_eq!(schema.sequence_key("lib-x"), "oapps/sequence/lib-x");
	}

	#[test]
	fn test_self_dependency_is_a_cycle() {
		let schema = PackageSchema::new(PackageKind::Library);
		let request = CreatePackageRequest::new("lib-x", Version::new(1, 0, 0))
			.with_dependency(DependencyEdge::new(DependencyKind::Library, "lib-x"));
		let error = schema.validate(&request).unwrap_err();
		assert_eq!(error.to_string(), "circular dependency: lib-x -> lib-x");
	}

	#[test]
	fn test_dependency_target_kind() {
		assert_eq!(
			DependencyKind::Package.target_kind(&PackageKind::Quest),
			PackageKind::Quest
		);
		assert_eq!(
			DependencyKind::Runtime.target_kind(&PackageKind::Quest),
			PackageKind::Runtime
		);
	}
}
