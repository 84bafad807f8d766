//! Configuration settings structures

use oasis_types::constants::limits::{
	DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_BASE_BACKOFF_MS, DEFAULT_BRIDGE_ORDER_EXPIRY_MINUTES,
	DEFAULT_DEACTIVATE_AFTER_FAILED_CHECKS, DEFAULT_EVENT_BUFFER_SIZE,
	DEFAULT_HEALTH_CHECK_INTERVAL_SECS, DEFAULT_MAX_BACKOFF_MS, DEFAULT_OBSERVER_POLL_INTERVAL_MS,
	DEFAULT_PROVIDER_PRIORITY, DEFAULT_PROVIDER_RETRIES, DEFAULT_PROVIDER_WEIGHT,
	DEFAULT_UNHEALTHY_THRESHOLD, MAX_ATTEMPT_TIMEOUT_MS, MAX_PROVIDER_RETRIES,
	MIN_ATTEMPT_TIMEOUT_MS,
};
use oasis_types::{ProviderCategory, ProviderInfo, ReplicationPolicy, SelectionStrategy};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};

use crate::configurable_value::ConfigurableValue;

/// Main application settings
#[derive(Debug, Serialize, Deserialize, Clone, Default)]
#[serde(default)]
pub struct Settings {
	pub environment: EnvironmentSettings,
	pub router: RouterSettings,
	pub providers: HashMap<String, ProviderSettings>,
	pub health: HealthSettings,
	pub observers: ObserverSettings,
	pub bridge: BridgeSettings,
	pub lifecycle: LifecycleSettings,
	pub price_feed: PriceFeedSettings,
	pub logging: LoggingSettings,
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct EnvironmentSettings {
	pub profile: EnvironmentProfile,
	pub debug: bool,
}

impl Default for EnvironmentSettings {
	fn default() -> Self {
		Self {
			profile: EnvironmentProfile::Development,
			debug: true,
		}
	}
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum EnvironmentProfile {
	Development,
	Staging,
	Production,
}

/// Retry, failover and replication policy of the router
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct RouterSettings {
	/// Strategy used for requests that do not name one
	pub default_strategy: String,
	/// Retries of the same provider after a transient failure
	pub max_retries: u32,
	pub base_backoff_ms: u64,
	pub max_backoff_ms: u64,
	pub attempt_timeout_ms: u64,
	/// Consecutive routed failures before a provider stops being live
	pub unhealthy_threshold: u32,
	pub replication: ReplicationPolicy,
}

impl Default for RouterSettings {
	fn default() -> Self {
		Self {
			default_strategy: SelectionStrategy::Priority.as_str().to_string(),
			max_retries: DEFAULT_PROVIDER_RETRIES,
			base_backoff_ms: DEFAULT_BASE_BACKOFF_MS,
			max_backoff_ms: DEFAULT_MAX_BACKOFF_MS,
			attempt_timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
			unhealthy_threshold: DEFAULT_UNHEALTHY_THRESHOLD,
			replication: ReplicationPolicy::FirstSuccess,
		}
	}
}

impl RouterSettings {
	/// Parsed default strategy; unknown names fall back to priority order
	pub fn strategy(&self) -> SelectionStrategy {
		self.default_strategy
			.parse()
			.unwrap_or(SelectionStrategy::Priority)
	}
}

/// Backend adapter a configured provider is built from
#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "snake_case")]
pub enum ProviderAdapter {
	/// In-process entity and blob store
	Memory,
	/// HTTP price feed
	PriceFeed,
}

/// Individual provider configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct ProviderSettings {
	pub id: String,
	pub adapter: ProviderAdapter,
	pub name: Option<String>,
	pub categories: Vec<ProviderCategory>,
	#[serde(default = "default_priority")]
	pub priority: u32,
	#[serde(default = "default_weight")]
	pub weight: u32,
	pub region: Option<String>,
	#[serde(default)]
	pub cost: u32,
	pub chain: Option<String>,
	#[serde(default = "default_enabled")]
	pub enabled: bool,
}

fn default_priority() -> u32 {
	DEFAULT_PROVIDER_PRIORITY
}

fn default_weight() -> u32 {
	DEFAULT_PROVIDER_WEIGHT
}

fn default_enabled() -> bool {
	true
}

impl From<&ProviderSettings> for ProviderInfo {
	fn from(settings: &ProviderSettings) -> Self {
		let mut info = ProviderInfo::new(
			settings.id.clone(),
			settings.name.clone().unwrap_or_else(|| settings.id.clone()),
			settings.categories.iter().copied(),
		)
		.with_priority(settings.priority)
		.with_weight(settings.weight)
		.with_cost(settings.cost);
		info.region = settings.region.clone();
		info.chain = settings.chain.clone();
		info
	}
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HealthSettings {
	pub enabled: bool,
	pub interval_secs: u64,
	/// Consecutive failed health checks before a provider is deactivated
	pub deactivate_after: u32,
	/// Persist health counters through the router after every check
	pub persist_counters: bool,
}

impl Default for HealthSettings {
	fn default() -> Self {
		Self {
			enabled: true,
			interval_secs: DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
			deactivate_after: DEFAULT_DEACTIVATE_AFTER_FAILED_CHECKS,
			persist_counters: true,
		}
	}
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct ObserverSettings {
	pub enabled: bool,
	pub poll_interval_ms: u64,
	pub event_buffer_size: usize,
}

impl Default for ObserverSettings {
	fn default() -> Self {
		Self {
			enabled: true,
			poll_interval_ms: DEFAULT_OBSERVER_POLL_INTERVAL_MS,
			event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
		}
	}
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct BridgeSettings {
	pub order_key_prefix: String,
	pub order_expiry_minutes: i64,
	/// Currency both legs are priced in when computing exchange rates
	pub quote_currency: String,
	/// Account holding locked funds between the lock and release legs
	pub escrow_account: String,
}

impl Default for BridgeSettings {
	fn default() -> Self {
		Self {
			order_key_prefix: "bridge_orders".to_string(),
			order_expiry_minutes: DEFAULT_BRIDGE_ORDER_EXPIRY_MINUTES,
			quote_currency: "USD".to_string(),
			escrow_account: "oasis-bridge-escrow".to_string(),
		}
	}
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LifecycleSettings {
	/// Root of install destinations
	pub install_root: String,
}

impl Default for LifecycleSettings {
	fn default() -> Self {
		Self {
			install_root: "installed".to_string(),
		}
	}
}

#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct PriceFeedSettings {
	pub endpoint: String,
	pub timeout_ms: u64,
	pub api_key: Option<ConfigurableValue>,
	/// Ticker symbol to feed-specific asset id, e.g. `XRD -> radix`
	pub asset_ids: HashMap<String, String>,
}

impl Default for PriceFeedSettings {
	fn default() -> Self {
		let asset_ids = [
			("BTC", "bitcoin"),
			("ETH", "ethereum"),
			("SOL", "solana"),
			("XRD", "radix"),
			("ARB", "arbitrum"),
		]
		.into_iter()
		.map(|(symbol, id)| (symbol.to_string(), id.to_string()))
		.collect();

		Self {
			endpoint: "https://api.coingecko.com/api/v3".to_string(),
			timeout_ms: DEFAULT_ATTEMPT_TIMEOUT_MS,
			api_key: Some(ConfigurableValue::from_env("PRICE_FEED_API_KEY")),
			asset_ids,
		}
	}
}

/// Logging configuration
#[derive(Debug, Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct LoggingSettings {
	pub level: String,
	pub format: LogFormat,
	pub structured: bool,
}

impl Default for LoggingSettings {
	fn default() -> Self {
		Self {
			level: "info".to_string(),
			format: LogFormat::Pretty,
			structured: false,
		}
	}
}

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
	Json,
	Pretty,
	Compact,
}

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigValidationError {
	#[error("{field} must be greater than zero")]
	ZeroValue { field: String },

	#[error("{field} must be between {min} and {max}, got {value}")]
	OutOfRange {
		field: String,
		min: u64,
		max: u64,
		value: u64,
	},

	#[error("unknown selection strategy '{0}'")]
	UnknownStrategy(String),

	#[error("provider entry '{key}' has an empty id")]
	EmptyProviderId { key: String },

	#[error("duplicate provider id '{0}'")]
	DuplicateProviderId(String),

	#[error("provider '{0}' declares no categories")]
	NoCategories(String),
}

impl Settings {
	/// Enabled providers, ordered by rank then id
	pub fn enabled_providers(&self) -> Vec<&ProviderSettings> {
		let mut providers: Vec<&ProviderSettings> =
			self.providers.values().filter(|p| p.enabled).collect();
		providers.sort_by(|a, b| a.priority.cmp(&b.priority).then_with(|| a.id.cmp(&b.id)));
		providers
	}

	pub fn is_production(&self) -> bool {
		self.environment.profile == EnvironmentProfile::Production
	}

	pub fn is_debug(&self) -> bool {
		self.environment.debug && !self.is_production()
	}

	pub fn validate(&self) -> Result<(), ConfigValidationError> {
		let router = &self.router;

		if router
			.default_strategy
			.parse::<SelectionStrategy>()
			.is_err()
		{
			return Err(ConfigValidationError::UnknownStrategy(
				router.default_strategy.clone(),
			));
		}

		if router.attempt_timeout_ms < MIN_ATTEMPT_TIMEOUT_MS
			|| router.attempt_timeout_ms > MAX_ATTEMPT_TIMEOUT_MS
		{
			return Err(ConfigValidationError::OutOfRange {
				field: "router.attempt_timeout_ms".to_string(),
				min: MIN_ATTEMPT_TIMEOUT_MS,
				max: MAX_ATTEMPT_TIMEOUT_MS,
				value: router.attempt_timeout_ms,
			});
		}

		if router.max_retries > MAX_PROVIDER_RETRIES {
			return Err(ConfigValidationError::OutOfRange {
				field: "router.max_retries".to_string(),
				min: 0,
				max: MAX_PROVIDER_RETRIES as u64,
				value: router.max_retries as u64,
			});
		}

		for (field, value) in [
			("router.unhealthy_threshold", router.unhealthy_threshold as u64),
			("health.interval_secs", self.health.interval_secs),
			("health.deactivate_after", self.health.deactivate_after as u64),
			("observers.poll_interval_ms", self.observers.poll_interval_ms),
			("observers.event_buffer_size", self.observers.event_buffer_size as u64),
			("bridge.order_expiry_minutes", self.bridge.order_expiry_minutes.max(0) as u64),
			("price_feed.timeout_ms", self.price_feed.timeout_ms),
		] {
			if value == 0 {
				return Err(ConfigValidationError::ZeroValue {
					field: field.to_string(),
				});
			}
		}

		let mut seen = HashSet::new();
		for (key, provider) in &self.providers {
			if provider.id.trim().is_empty() {
				return Err(ConfigValidationError::EmptyProviderId { key: key.clone() });
			}
			if !seen.insert(provider.id.as_str()) {
				return Err(ConfigValidationError::DuplicateProviderId(provider.id.clone()));
			}
			if provider.categories.is_empty() {
				return Err(ConfigValidationError::NoCategories(provider.id.clone()));
			}
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	fn provider(id: &str, priority: u32) -> ProviderSettings {
		ProviderSettings {
			id: id.to_string(),
			adapter: ProviderAdapter::Memory,
			name: None,
			categories: vec![ProviderCategory::Storage],
			priority,
			weight: 1,
			region: None,
			cost: 0,
			chain: None,
			enabled: true,
		}
	}

	#[test]
	fn test_default_settings_are_valid() {
		let settings = Settings::default();
		assert!(settings.validate().is_ok());
		assert_eq!(settings.router.strategy(), SelectionStrategy::Priority);
	}

	#[test]
	fn test_rejects_zero_timeout() {
		let mut settings = Settings::default();
		settings.router.attempt_timeout_ms = 0;
		assert!(matches!(
			settings.validate(),
			Err(ConfigValidationError::OutOfRange { .. })
		));
	}

	#[test]
	fn test_rejects_unknown_strategy() {
		let mut settings = Settings::default();
		settings.router.default_strategy = "fastest".to_string();
		assert_eq!(
			settings.validate(),
			Err(ConfigValidationError::UnknownStrategy("fastest".to_string()))
		);
	}

	#[test]
	fn test_rejects_duplicate_provider_ids() {
		let mut settings = Settings::default();
		settings.providers.insert("a".to_string(), provider("mongo", 1));
		settings.providers.insert("b".to_string(), provider("mongo", 2));
		assert_eq!(
			settings.validate(),
			Err(ConfigValidationError::DuplicateProviderId("mongo".to_string()))
		);
	}

	#[test]
	fn test_enabled_providers_sorted_by_rank() {
		let mut settings = Settings::default();
		settings.providers.insert("x".to_string(), provider("ipfs", 2));
		settings.providers.insert("y".to_string(), provider("mongo", 1));
		let mut disabled = provider("neo4j", 0);
		disabled.enabled = false;
		settings.providers.insert("z".to_string(), disabled);

		let ids: Vec<&str> = settings
			.enabled_providers()
			.iter()
			.map(|p| p.id.as_str())
			.collect();
		assert_eq!(ids, vec!["mongo", "ipfs"]);
	}

	#[test]
	fn test_provider_settings_into_info() {
		let mut settings = provider("radix", 3);
		settings.categories = vec![ProviderCategory::Blockchain, ProviderCategory::Nft];
		settings.chain = Some("radix".to_string());

		let info = ProviderInfo::from(&settings);
		assert_eq!(info.name, "radix");
		assert_eq!(info.chain.as_deref(), Some("radix"));
		assert!(info.supports(ProviderCategory::Nft));
	}
}
