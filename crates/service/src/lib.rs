//! OASIS Service
//!
//! Provider routing with failover, chain observation, cross-chain bridge
//! orders and the holon package lifecycle.

pub mod bridge;
pub mod context;
pub mod dependency;
pub mod health;
pub mod lifecycle;
pub mod locks;
pub mod observer;
pub mod router;
pub mod selection;

pub use bridge::{BridgeConfig, BridgeManager};
pub use dependency::{Catalog, DependencyResolver, PackageRef, ResolutionPlan};
pub use health::{HealthCheckOutcome, HealthMonitor, HealthMonitorConfig, HEALTH_KEY_PREFIX};
pub use lifecycle::{DownloadedPackage, InstallReport, LifecycleManager};
pub use locks::{KeyedGuard, KeyedLocks};
pub use observer::{
	ChainClient, ChainObserver, ObserverConfig, ObserverRegistry, PollingChainObserver,
	ProviderChainClient,
};
pub use router::{Router, RouterConfig, RouterSession};
pub use selection::{ProviderSelector, ProviderSelectorTrait, REGION_PARAM};
