//! Periodic provider health checks
//!
//! Each round probes every provider concurrently. A provider that fails
//! `deactivate_after` consecutive checks is deactivated; one that was
//! deactivated that way comes back as soon as a check passes. Providers shut
//! down by an operator are left alone.

use futures::future::join_all;
use oasis_adapters::{ProviderHandle, ProviderRegistry};
use oasis_config::HealthSettings;
use oasis_types::constants::limits::{
	DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_DEACTIVATE_AFTER_FAILED_CHECKS,
	DEFAULT_HEALTH_CHECK_INTERVAL_SECS,
};
use oasis_types::Envelope;
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::router::Router;

/// Key prefix health counters are persisted under
pub const HEALTH_KEY_PREFIX: &str = "health";

#[derive(Debug, Clone, PartialEq)]
pub struct HealthMonitorConfig {
	pub interval: Duration,
	pub check_timeout: Duration,
	pub deactivate_after: u32,
	pub persist_counters: bool,
}

impl Default for HealthMonitorConfig {
	fn default() -> Self {
		Self {
			interval: Duration::from_secs(DEFAULT_HEALTH_CHECK_INTERVAL_SECS),
			check_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
			deactivate_after: DEFAULT_DEACTIVATE_AFTER_FAILED_CHECKS,
			persist_counters: false,
		}
	}
}

impl From<&HealthSettings> for HealthMonitorConfig {
	fn from(settings: &HealthSettings) -> Self {
		Self {
			interval: Duration::from_secs(settings.interval_secs),
			deactivate_after: settings.deactivate_after.max(1),
			persist_counters: settings.persist_counters,
			..Self::default()
		}
	}
}

/// Result of probing one provider
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HealthCheckOutcome {
	pub provider_id: String,
	pub passed: bool,
	pub failed_checks: u32,
	pub latency_ms: u64,
	pub deactivated: bool,
	pub reactivated: bool,
}

pub struct HealthMonitor {
	registry: Arc<ProviderRegistry>,
	router: Router,
	config: HealthMonitorConfig,
}

impl HealthMonitor {
	pub fn new(router: Router, config: HealthMonitorConfig) -> Self {
		Self {
			registry: router.registry().clone(),
			router,
			config,
		}
	}

	/// Probe every provider that is active or eligible for revival
	pub async fn check_all(&self, cancel: &CancellationToken) -> Envelope<Vec<HealthCheckOutcome>> {
		let handles: Vec<ProviderHandle> = self
			.registry
			.list_all()
			.into_iter()
			.filter(|h| h.is_active() || h.was_auto_deactivated())
			.collect();

		let probes = handles.iter().map(|handle| self.probe(handle));
		let mut outcomes = join_all(probes).await;

		for outcome in outcomes.iter_mut() {
			self.apply(outcome).await;
		}

		let mut session = self.router.session(cancel);
		if self.config.persist_counters {
			for handle in &handles {
				let key = format!("{}/{}", HEALTH_KEY_PREFIX, handle.id());
				if let Err(e) = session.store_json(&key, &handle.stats()).await {
					debug!(provider_id = %handle.id(), error = %e, "Health counters not persisted");
					session.warn(format!("health counters for {} not persisted: {}", handle.id(), e));
				}
			}
		}

		session.finish(Ok(outcomes))
	}

	async fn probe(&self, handle: &ProviderHandle) -> HealthCheckOutcome {
		let started = Instant::now();
		let passed = match tokio::time::timeout(
			self.config.check_timeout,
			handle.provider().health_check(),
		)
		.await
		{
			Ok(Ok(healthy)) => healthy,
			Ok(Err(e)) => {
				debug!(provider_id = %handle.id(), error = %e, "Health check errored");
				false
			},
			Err(_) => {
				debug!(provider_id = %handle.id(), "Health check timed out");
				false
			},
		};

		let failed_checks = handle.record_health_check(passed);
		HealthCheckOutcome {
			provider_id: handle.id().to_string(),
			passed,
			failed_checks,
			latency_ms: started.elapsed().as_millis() as u64,
			deactivated: false,
			reactivated: false,
		}
	}

	async fn apply(&self, outcome: &mut HealthCheckOutcome) {
		let Ok(handle) = self.registry.get(&outcome.provider_id) else {
			return;
		};

		if outcome.passed {
			if !handle.is_active() && handle.was_auto_deactivated() {
				let result = self.registry.activate(&outcome.provider_id).await;
				outcome.reactivated = result.is_success();
				if outcome.reactivated {
					info!(provider_id = %outcome.provider_id, "Provider recovered and reactivated");
				}
			}
			return;
		}

		if handle.is_active() && outcome.failed_checks >= self.config.deactivate_after {
			warn!(
				provider_id = %outcome.provider_id,
				failed_checks = outcome.failed_checks,
				"Deactivating unhealthy provider"
			);
			outcome.deactivated = self
				.registry
				.deactivate_unhealthy(&outcome.provider_id)
				.await
				.is_success();
		}
	}

	/// Run check rounds on an interval until `cancel` fires
	pub fn start(self: Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
		tokio::spawn(async move {
			let mut ticker = tokio::time::interval(self.config.interval);
			ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
			info!(
				interval_secs = self.config.interval.as_secs(),
				deactivate_after = self.config.deactivate_after,
				"Health monitor started"
			);
			loop {
				tokio::select! {
					_ = cancel.cancelled() => break,
					_ = ticker.tick() => {
						let round = self.check_all(&cancel).await;
						if let Some(outcomes) = round.payload() {
							let failing = outcomes.iter().filter(|o| !o.passed).count();
							debug!(checked = outcomes.len(), failing, "Health check round complete");
						}
					},
				}
			}
			info!("Health monitor stopped");
		})
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::router::RouterConfig;
	use oasis_storage::MemoryStore;
	use oasis_types::test_utils::ScriptedProvider;
	use oasis_types::{ProviderStats, RoutedRequest};

	fn monitor(providers: Vec<Arc<ScriptedProvider>>, persist: bool) -> (HealthMonitor, Router) {
		let registry = Arc::new(ProviderRegistry::default());
		for provider in providers {
			registry.register(provider);
		}
		registry.register(Arc::new(MemoryStore::new("ledger")));
		let router = Router::new(registry, RouterConfig::default());
		let config = HealthMonitorConfig {
			deactivate_after: 2,
			persist_counters: persist,
			..HealthMonitorConfig::default()
		};
		(HealthMonitor::new(router.clone(), config), router)
	}

	#[tokio::test]
	async fn test_failed_checks_deactivate_then_recovery_reactivates() {
		let flaky = Arc::new(ScriptedProvider::storage("flaky").unhealthy());
		let (monitor, router) = monitor(vec![flaky.clone()], false);
		let cancel = CancellationToken::new();

		monitor.check_all(&cancel).await;
		assert!(router.registry().get("flaky").unwrap().is_active());

		let round = monitor.check_all(&cancel).await;
		let outcome = round
			.payload()
			.unwrap()
			.iter()
			.find(|o| o.provider_id == "flaky")
			.cloned()
			.unwrap();
		assert!(outcome.deactivated);
		let handle = router.registry().get("flaky").unwrap();
		assert!(!handle.is_active());
		assert!(handle.was_auto_deactivated());
		assert_eq!(flaky.deactivations(), 1);

		flaky.set_healthy(true);
		let round = monitor.check_all(&cancel).await;
		assert!(round.payload().unwrap().iter().any(|o| o.reactivated));
		assert!(router.registry().get("flaky").unwrap().is_live());
	}

	#[tokio::test]
	async fn test_operator_shutdown_is_not_revived() {
		let node = Arc::new(ScriptedProvider::storage("node"));
		let (monitor, router) = monitor(vec![node.clone()], false);
		router.registry().deactivate("node").await;

		let round = monitor.check_all(&CancellationToken::new()).await;
		assert!(round.payload().unwrap().iter().all(|o| o.provider_id != "node"));
		assert!(!router.registry().get("node").unwrap().is_active());
	}

	#[tokio::test]
	async fn test_counters_are_persisted_through_router() {
		let node = Arc::new(ScriptedProvider::storage("node").with_priority(500));
		let (monitor, router) = monitor(vec![node], true);
		let cancel = CancellationToken::new();

		monitor.check_all(&cancel).await;

		let stored = router
			.read_entity(RoutedRequest::read_entity("health/node"), &cancel)
			.await;
		let stats: ProviderStats = serde_json::from_value(stored.payload().cloned().unwrap()).unwrap();
		assert_eq!(stats.provider_id, "node");
		assert_eq!(stats.failed_health_checks, 0);
	}
}
