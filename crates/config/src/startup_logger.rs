//! Node startup and shutdown logging

use std::env;
use tracing::info;

use crate::Settings;

/// Logs service, platform and configuration summary at startup
pub fn log_service_info(settings: &Settings) {
	// Root package name, not this crate's
	let service_name = "oasis-hyperdrive";
	let service_version = env!("CARGO_PKG_VERSION");

	info!("=== OASIS HyperDrive Node Starting ===");
	info!("🚀 Service: {} v{}", service_name, service_version);
	info!("💻 Platform: {} ({})", env::consts::OS, env::consts::ARCH);

	if let Ok(cwd) = env::current_dir() {
		info!("📁 Working Directory: {}", cwd.display());
	}

	if let Ok(rust_log) = env::var("RUST_LOG") {
		info!("🔧 Log Level: {}", rust_log);
	}

	info!(
		"🧭 Routing: strategy={}, max_retries={}, attempt_timeout={}ms, replication={:?}",
		settings.router.default_strategy,
		settings.router.max_retries,
		settings.router.attempt_timeout_ms,
		settings.router.replication
	);

	if let Some(api_key) = &settings.price_feed.api_key {
		info!("🔑 Price feed key: {}", api_key.description());
	}

	info!(
		"🕒 Started at: {}",
		chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
	);
}

pub fn log_service_shutdown() {
	info!("🛑 OASIS HyperDrive Node Shutting Down");
	info!(
		"🕒 Shutdown at: {}",
		chrono::Utc::now().format("%Y-%m-%d %H:%M:%S UTC")
	);
}

/// Logs the wiring that came up
pub fn log_startup_complete(providers: usize, observers: usize) {
	info!("✅ OASIS HyperDrive Node Started Successfully");
	info!("🔌 Providers registered: {}", providers);
	info!("⛓️ Chain observers running: {}", observers);
}
