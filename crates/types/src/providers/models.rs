//! Provider descriptors and health snapshots

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::constants::limits::{DEFAULT_PROVIDER_PRIORITY, DEFAULT_PROVIDER_WEIGHT};

/// Capability category a provider can serve
///
/// A provider may declare several categories at once, e.g. a chain that is
/// both a storage backend and an NFT backend.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum ProviderCategory {
	Storage,
	Network,
	Blockchain,
	Nft,
}

impl ProviderCategory {
	pub fn as_str(&self) -> &'static str {
		match self {
			ProviderCategory::Storage => "storage",
			ProviderCategory::Network => "network",
			ProviderCategory::Blockchain => "blockchain",
			ProviderCategory::Nft => "nft",
		}
	}
}

impl std::str::FromStr for ProviderCategory {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		match s.to_ascii_lowercase().as_str() {
			"storage" => Ok(ProviderCategory::Storage),
			"network" => Ok(ProviderCategory::Network),
			"blockchain" => Ok(ProviderCategory::Blockchain),
			"nft" => Ok(ProviderCategory::Nft),
			other => Err(format!("unknown provider category: {}", other)),
		}
	}
}

impl std::fmt::Display for ProviderCategory {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Static description of a provider, declared at registration time
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderInfo {
	/// Unique identifier used by the registry and in request overrides
	pub id: String,

	/// Human-readable name
	pub name: String,

	/// Categories served by this provider; fixed for the provider's lifetime
	pub categories: BTreeSet<ProviderCategory>,

	/// Priority rank; lower ranks are tried first
	pub priority: u32,

	/// Relative weight for weighted round-robin (minimum 1)
	pub weight: u32,

	/// Region used for geographic affinity
	pub region: Option<String>,

	/// Relative cost per operation, used by cost-based selection
	pub cost: u32,

	/// Blockchain served by this provider, if any
	pub chain: Option<String>,
}

impl ProviderInfo {
	pub fn new(
		id: impl Into<String>,
		name: impl Into<String>,
		categories: impl IntoIterator<Item = ProviderCategory>,
	) -> Self {
		Self {
			id: id.into(),
			name: name.into(),
			categories: categories.into_iter().collect(),
			priority: DEFAULT_PROVIDER_PRIORITY,
			weight: DEFAULT_PROVIDER_WEIGHT,
			region: None,
			cost: 0,
			chain: None,
		}
	}

	pub fn with_priority(mut self, priority: u32) -> Self {
		self.priority = priority;
		self
	}

	pub fn with_weight(mut self, weight: u32) -> Self {
		self.weight = weight.max(1);
		self
	}

	pub fn with_region(mut self, region: impl Into<String>) -> Self {
		self.region = Some(region.into());
		self
	}

	pub fn with_cost(mut self, cost: u32) -> Self {
		self.cost = cost;
		self
	}

	pub fn with_chain(mut self, chain: impl Into<String>) -> Self {
		self.chain = Some(chain.into());
		self
	}

	pub fn supports(&self, category: ProviderCategory) -> bool {
		self.categories.contains(&category)
	}
}

/// Point-in-time copy of a provider's health counters
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderStats {
	pub provider_id: String,
	pub live: bool,
	pub active: bool,
	pub total_requests: u64,
	pub successful_requests: u64,
	pub failed_requests: u64,
	pub consecutive_failures: u32,
	pub failed_health_checks: u32,
	pub last_latency_ms: Option<u64>,
	pub last_used: Option<DateTime<Utc>>,
	pub last_health_check: Option<DateTime<Utc>>,
}

impl ProviderStats {
	/// Success rate over all routed attempts, 1.0 when nothing was routed yet
	pub fn success_rate(&self) -> f64 {
		if self.total_requests == 0 {
			1.0
		} else {
			self.successful_requests as f64 / self.total_requests as f64
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_category_parsing() {
		assert_eq!("NFT".parse::<ProviderCategory>(), Ok(ProviderCategory::Nft));
		assert_eq!(
			"storage".parse::<ProviderCategory>(),
			Ok(ProviderCategory::Storage)
		);
		assert!("ledger".parse::<ProviderCategory>().is_err());
	}

	#[test]
	fn test_multi_category_info() {
		let info = ProviderInfo::new(
			"holochain",
			"Holochain",
			[ProviderCategory::Storage, ProviderCategory::Nft, ProviderCategory::Storage],
		)
		.with_priority(2)
		.with_weight(0);

		assert_eq!(info.categories.len(), 2);
		assert!(info.supports(ProviderCategory::Nft));
		assert!(!info.supports(ProviderCategory::Blockchain));
		assert_eq!(info.weight, 1);
		assert_eq!(info.priority, 2);
	}
}
