//! OASIS HyperDrive
//!
//! Routes storage, blockchain and network requests across interchangeable
//! providers with failover, and runs the chain observers, bridge manager and
//! holon lifecycle engine on top of that routing layer.

use std::sync::Arc;

use oasis_adapters::{HttpPriceFeedProvider, PriceFeedConfig};
use oasis_config::{log_service_shutdown, ProviderAdapter, ProviderSettings};
use tokio::sync::Mutex;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

// Core domain types
pub use oasis_types::{
	chrono,
	serde_json,
	BridgeOrder,
	BridgeOrderStatus,
	Caller,
	CallerIdentity,
	CreateBridgeOrderRequest,
	CreatePackageRequest,
	DependencyEdge,
	DependencyKind,
	Envelope,
	ErrorKind,
	InstalledPackage,
	OasisError,
	OasisResult,
	Package,
	PackageKind,
	PackageSchema,
	PackageVersion,
	Provider,
	ProviderCategory,
	ProviderError,
	ProviderInfo,
	ProviderResult,
	ProviderStats,
	ReplicationPolicy,
	RoutedRequest,
	SelectionStrategy,
	Version,
};

// Service layer
pub use oasis_service::{
	context, BridgeConfig, BridgeManager, ChainClient, ChainObserver, DependencyResolver,
	HealthMonitor, HealthMonitorConfig, InstallReport, LifecycleManager, ObserverConfig,
	ObserverRegistry, PollingChainObserver, ProviderChainClient, ProviderSelector,
	ProviderSelectorTrait, Router, RouterConfig,
};

pub use oasis_adapters::{ProviderHandle, ProviderRegistry};
pub use oasis_config::{load_config, log_service_info, log_startup_complete, Settings};
pub use oasis_storage::MemoryStore;

pub mod storage {
	pub use oasis_storage::*;
}

pub mod config {
	pub use oasis_config::*;
}

pub mod adapters {
	pub use oasis_adapters::*;
}

pub mod service {
	pub use oasis_service::*;
}

// Re-exported for implementors of custom providers
pub use async_trait;

/// Builder wiring the registry, router and services of a node
#[derive(Default)]
pub struct OasisBuilder {
	settings: Option<Settings>,
	providers: Vec<Arc<dyn Provider>>,
	observers: Vec<Arc<dyn ChainObserver>>,
	selector: Option<Arc<dyn ProviderSelectorTrait>>,
}

impl OasisBuilder {
	pub fn new() -> Self {
		Self::default()
	}

	/// Set custom settings
	pub fn with_settings(mut self, settings: Settings) -> Self {
		self.settings = Some(settings);
		self
	}

	/// Register a provider in addition to the configured ones
	pub fn with_provider(mut self, provider: Arc<dyn Provider>) -> Self {
		self.providers.push(provider);
		self
	}

	/// Use `observer` for its chain instead of a polling observer
	pub fn with_observer(mut self, observer: Arc<dyn ChainObserver>) -> Self {
		self.observers.push(observer);
		self
	}

	pub fn with_selector(mut self, selector: Arc<dyn ProviderSelectorTrait>) -> Self {
		self.selector = Some(selector);
		self
	}

	pub fn settings(&self) -> Option<&Settings> {
		self.settings.as_ref()
	}

	/// Initialize tracing with configuration-based settings
	pub fn init_tracing_from_settings(settings: &Settings) -> Result<(), Box<dyn std::error::Error>> {
		use oasis_config::LogFormat;

		let log_level = &settings.logging.level;
		let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
			.unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level));

		let result = match settings.logging.format {
			LogFormat::Json => {
				let subscriber = tracing_subscriber::fmt().json().with_env_filter(env_filter);
				if settings.logging.structured {
					subscriber.with_target(true).with_thread_ids(true).try_init()
				} else {
					subscriber.try_init()
				}
			},
			LogFormat::Pretty => {
				let subscriber = tracing_subscriber::fmt()
					.pretty()
					.with_env_filter(env_filter);
				if settings.logging.structured {
					subscriber.with_target(true).with_thread_ids(true).try_init()
				} else {
					subscriber.try_init()
				}
			},
			LogFormat::Compact => {
				let subscriber = tracing_subscriber::fmt()
					.compact()
					.with_env_filter(env_filter);
				if settings.logging.structured {
					subscriber.with_target(true).with_thread_ids(true).try_init()
				} else {
					subscriber.try_init()
				}
			},
		};
		result.map_err(|e| format!("Failed to initialize tracing: {}", e))?;

		info!(
			"Logging configuration applied: level={}, format={:?}, structured={}",
			settings.logging.level, settings.logging.format, settings.logging.structured
		);
		Ok(())
	}

	fn provider_from_settings(
		settings: &Settings,
		provider: &ProviderSettings,
	) -> Result<Arc<dyn Provider>, String> {
		let info = ProviderInfo::from(provider);
		match provider.adapter {
			ProviderAdapter::Memory => Ok(Arc::new(MemoryStore::with_info(info))),
			ProviderAdapter::PriceFeed => {
				let feed = &settings.price_feed;
				let mut config = PriceFeedConfig::new(feed.endpoint.clone(), feed.timeout_ms);
				config.api_key = feed.api_key.as_ref().and_then(|key| key.resolve_optional());
				for (symbol, asset_id) in &feed.asset_ids {
					config = config.with_asset_id(symbol, asset_id);
				}
				let provider = HttpPriceFeedProvider::with_info(info, config)
					.map_err(|e| format!("Provider '{}' could not be built: {}", provider.id, e))?;
				Ok(Arc::new(provider))
			},
		}
	}

	/// Validate settings and wire every component; nothing is started yet
	pub fn build(self) -> Result<OasisNode, Box<dyn std::error::Error>> {
		let settings = self.settings.unwrap_or_default();
		settings
			.validate()
			.map_err(|e| format!("Invalid configuration: {}", e))?;

		let registry = Arc::new(ProviderRegistry::new(settings.router.unhealthy_threshold));
		let mut errors = Vec::new();
		for provider_settings in settings.enabled_providers() {
			match Self::provider_from_settings(&settings, provider_settings) {
				Ok(provider) => {
					registry.register(provider);
				},
				Err(e) => errors.push(e),
			}
		}
		if !errors.is_empty() {
			return Err(format!("Configuration errors found:\n{}", errors.join("\n")).into());
		}
		for provider in self.providers {
			registry.register(provider);
		}

		let observers = Arc::new(ObserverRegistry::new());
		for observer in self.observers {
			observers.register(observer);
		}
		Self::register_polling_observers(&settings, &registry, &observers);

		let mut router = Router::new(registry, RouterConfig::from(&settings.router))
			.with_observers(observers);
		if let Some(selector) = self.selector {
			router = router.with_selector(selector);
		}

		let health = Arc::new(HealthMonitor::new(
			router.clone(),
			HealthMonitorConfig::from(&settings.health),
		));
		let bridge = Arc::new(BridgeManager::new(
			router.clone(),
			BridgeConfig::from(&settings.bridge),
		));

		Ok(OasisNode {
			settings,
			router,
			health,
			bridge,
			cancel: CancellationToken::new(),
			health_task: Mutex::new(None),
		})
	}

	/// One polling observer per chain served by a registered blockchain provider
	fn register_polling_observers(
		settings: &Settings,
		registry: &ProviderRegistry,
		observers: &ObserverRegistry,
	) {
		let price_source = registry
			.list_by_category(ProviderCategory::Network)
			.into_iter()
			.find(|h| h.info().chain.is_none())
			.map(|h| h.provider());

		let config = ObserverConfig {
			quote_currency: settings.bridge.quote_currency.clone(),
			..ObserverConfig::from(&settings.observers)
		};

		for handle in registry.list_by_category(ProviderCategory::Blockchain) {
			let Some(chain) = handle.info().chain.clone() else {
				warn!(provider_id = %handle.id(), "Blockchain provider has no chain; not observed");
				continue;
			};
			if observers.get(&chain).is_ok() {
				continue;
			}
			let mut client = ProviderChainClient::new(handle.provider());
			if let Some(source) = &price_source {
				client = client.with_price_source(source.clone());
			}
			observers.register(Arc::new(PollingChainObserver::new(
				chain,
				Arc::new(client),
				config.clone(),
			)));
		}
	}

	/// Load configuration, start the node and run until interrupted
	pub async fn start_node(mut self) -> Result<(), Box<dyn std::error::Error>> {
		dotenvy::dotenv().ok();

		let settings = match self.settings.take() {
			Some(settings) => settings,
			None => load_config().unwrap_or_default(),
		};
		Self::init_tracing_from_settings(&settings)?;
		log_service_info(&settings);

		let node = self.with_settings(settings).build()?;
		let started = node.start().await;
		for warning in started.warnings() {
			warn!("Startup: {}", warning);
		}
		log_startup_complete(
			node.registry().len(),
			started.payload().copied().unwrap_or_default(),
		);

		tokio::signal::ctrl_c().await?;
		node.shutdown().await;
		Ok(())
	}
}

/// A wired node: providers, router, observers and services
pub struct OasisNode {
	settings: Settings,
	router: Router,
	health: Arc<HealthMonitor>,
	bridge: Arc<BridgeManager>,
	cancel: CancellationToken,
	health_task: Mutex<Option<JoinHandle<()>>>,
}

impl OasisNode {
	pub fn settings(&self) -> &Settings {
		&self.settings
	}

	pub fn registry(&self) -> &Arc<ProviderRegistry> {
		self.router.registry()
	}

	pub fn router(&self) -> &Router {
		&self.router
	}

	pub fn observers(&self) -> &Arc<ObserverRegistry> {
		self.router.observers()
	}

	pub fn health(&self) -> &Arc<HealthMonitor> {
		&self.health
	}

	pub fn bridge(&self) -> &Arc<BridgeManager> {
		&self.bridge
	}

	/// Token cancelled when the node shuts down
	pub fn cancel_token(&self) -> &CancellationToken {
		&self.cancel
	}

	/// Lifecycle manager for one package kind, sharing the node's router
	pub fn lifecycle(&self, schema: PackageSchema) -> LifecycleManager {
		LifecycleManager::from_settings(schema, self.router.clone(), &self.settings.lifecycle)
	}

	/// Activate providers, then start observers and the health monitor
	///
	/// Returns the number of observers started; activation failures become
	/// warnings and leave the provider inactive.
	pub async fn start(&self) -> Envelope<usize> {
		let mut warnings = Vec::new();
		for handle in self.registry().list_all() {
			let result = self.registry().activate(handle.id()).await;
			if result.is_error() {
				warnings.push(format!("provider {} not activated: {}", handle.id(), result.message()));
			}
		}

		let mut observers_started = 0;
		if self.settings.observers.enabled {
			let result = self.observers().start_all(&self.cancel).await;
			warnings.extend(result.warnings().iter().cloned());
			observers_started = result.payload().copied().unwrap_or_default();
		}

		if self.settings.health.enabled {
			let mut task = self.health_task.lock().await;
			if task.is_none() {
				*task = Some(self.health.clone().start(self.cancel.child_token()));
			}
		}

		info!(
			providers = self.registry().len(),
			observers = observers_started,
			"Node started"
		);
		Envelope::success(observers_started).with_warnings(warnings)
	}

	/// Stop background work and deactivate every provider
	pub async fn shutdown(&self) -> Envelope<usize> {
		self.cancel.cancel();
		if let Some(task) = self.health_task.lock().await.take() {
			if let Err(e) = task.await {
				warn!(error = %e, "Health monitor task ended abnormally");
			}
		}
		self.observers().stop_all(&CancellationToken::new()).await;
		let result = self.registry().shutdown().await;
		log_service_shutdown();
		result
	}
}
