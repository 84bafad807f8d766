//! OASIS Configuration
//!
//! Configuration management and startup utilities for the OASIS HyperDrive node.

pub mod configurable_value;
pub mod loader;
pub mod settings;
pub mod startup_logger;

pub use configurable_value::{ConfigurableValue, ConfigurableValueError, ValueType};
pub use loader::{load_config, load_config_from, ConfigLoadError};
pub use settings::{
	BridgeSettings, ConfigValidationError, EnvironmentProfile, HealthSettings, LifecycleSettings,
	LogFormat, LoggingSettings, ObserverSettings, PriceFeedSettings, ProviderAdapter,
	ProviderSettings, RouterSettings, Settings,
};
pub use startup_logger::{log_service_info, log_service_shutdown, log_startup_complete};
