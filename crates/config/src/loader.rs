//! Configuration loading utilities

use config::{Config, ConfigError, Environment, File};

use crate::settings::{ConfigValidationError, Settings};

#[derive(Debug, thiserror::Error)]
pub enum ConfigLoadError {
	#[error("failed to read configuration: {0}")]
	Source(#[from] ConfigError),

	#[error("invalid configuration: {0}")]
	Validation(#[from] ConfigValidationError),
}

/// Load configuration from `config/config.*` with `OASIS__*` overrides
pub fn load_config() -> Result<Settings, ConfigLoadError> {
	load_config_from("config/config")
}

/// Load configuration from the given file stem; the file is optional
pub fn load_config_from(path: &str) -> Result<Settings, ConfigLoadError> {
	let s = Config::builder()
		.add_source(File::with_name(path).required(false))
		.add_source(
			Environment::with_prefix("OASIS")
				.prefix_separator("__")
				.separator("__")
				.try_parsing(true),
		)
		.build()?;

	let settings: Settings = s.try_deserialize()?;
	settings.validate()?;
	Ok(settings)
}
