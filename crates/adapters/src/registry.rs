//! Provider registry with lock-free health counters
//!
//! Handles are never removed, only deactivated, because other components keep
//! referring to providers by id for the life of the process.

use chrono::{DateTime, TimeZone, Utc};
use dashmap::DashMap;
use oasis_types::constants::limits::DEFAULT_UNHEALTHY_THRESHOLD;
use oasis_types::{
	Envelope, ErrorKind, OasisError, OasisResult, Provider, ProviderCategory, ProviderInfo,
	ProviderStats,
};
use std::sync::atomic::{AtomicBool, AtomicI64, AtomicU32, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

const NO_LATENCY: u64 = u64::MAX;
const NEVER: i64 = i64::MIN;

/// Per-provider counters shared by every router invocation
#[derive(Debug)]
pub struct ProviderHealth {
	active: AtomicBool,
	/// Set when the health monitor (not an operator) deactivated the provider
	auto_deactivated: AtomicBool,
	consecutive_failures: AtomicU32,
	failed_health_checks: AtomicU32,
	total_requests: AtomicU64,
	successful_requests: AtomicU64,
	failed_requests: AtomicU64,
	last_latency_ms: AtomicU64,
	last_used_ms: AtomicI64,
	last_health_check_ms: AtomicI64,
	unhealthy_threshold: u32,
}

impl ProviderHealth {
	fn new(unhealthy_threshold: u32) -> Self {
		Self {
			active: AtomicBool::new(true),
			auto_deactivated: AtomicBool::new(false),
			consecutive_failures: AtomicU32::new(0),
			failed_health_checks: AtomicU32::new(0),
			total_requests: AtomicU64::new(0),
			successful_requests: AtomicU64::new(0),
			failed_requests: AtomicU64::new(0),
			last_latency_ms: AtomicU64::new(NO_LATENCY),
			last_used_ms: AtomicI64::new(NEVER),
			last_health_check_ms: AtomicI64::new(NEVER),
			unhealthy_threshold: unhealthy_threshold.max(1),
		}
	}
}

fn millis_to_datetime(ms: i64) -> Option<DateTime<Utc>> {
	if ms == NEVER {
		None
	} else {
		Utc.timestamp_millis_opt(ms).single()
	}
}

/// Live handle to a registered provider
#[derive(Debug, Clone)]
pub struct ProviderHandle {
	provider: Arc<dyn Provider>,
	health: Arc<ProviderHealth>,
}

impl ProviderHandle {
	pub fn new(provider: Arc<dyn Provider>, unhealthy_threshold: u32) -> Self {
		Self {
			provider,
			health: Arc::new(ProviderHealth::new(unhealthy_threshold)),
		}
	}

	pub fn id(&self) -> &str {
		self.provider.id()
	}

	pub fn info(&self) -> &ProviderInfo {
		self.provider.info()
	}

	pub fn provider(&self) -> Arc<dyn Provider> {
		Arc::clone(&self.provider)
	}

	pub fn supports(&self, category: ProviderCategory) -> bool {
		self.provider.supports(category)
	}

	pub fn is_active(&self) -> bool {
		self.health.active.load(Ordering::SeqCst)
	}

	pub fn was_auto_deactivated(&self) -> bool {
		self.health.auto_deactivated.load(Ordering::SeqCst)
	}

	/// Active and below the consecutive-failure threshold
	pub fn is_live(&self) -> bool {
		self.is_active()
			&& self.health.consecutive_failures.load(Ordering::SeqCst)
				< self.health.unhealthy_threshold
	}

	pub fn consecutive_failures(&self) -> u32 {
		self.health.consecutive_failures.load(Ordering::SeqCst)
	}

	/// Last successful latency, `None` until one was recorded
	pub fn last_latency_ms(&self) -> Option<u64> {
		match self.health.last_latency_ms.load(Ordering::SeqCst) {
			NO_LATENCY => None,
			ms => Some(ms),
		}
	}

	/// Milliseconds timestamp of the last routed attempt, `i64::MIN` if never
	pub fn last_used_millis(&self) -> i64 {
		self.health.last_used_ms.load(Ordering::SeqCst)
	}

	pub fn record_success(&self, latency: Duration) {
		let health = &self.health;
		health.total_requests.fetch_add(1, Ordering::SeqCst);
		health.successful_requests.fetch_add(1, Ordering::SeqCst);
		health.consecutive_failures.store(0, Ordering::SeqCst);
		health
			.last_latency_ms
			.store(latency.as_millis().min((NO_LATENCY - 1) as u128) as u64, Ordering::SeqCst);
		health
			.last_used_ms
			.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
	}

	/// Returns the consecutive failure count after this failure
	pub fn record_failure(&self) -> u32 {
		let health = &self.health;
		health.total_requests.fetch_add(1, Ordering::SeqCst);
		health.failed_requests.fetch_add(1, Ordering::SeqCst);
		health
			.last_used_ms
			.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
		let failures = health.consecutive_failures.fetch_add(1, Ordering::SeqCst) + 1;
		if failures == health.unhealthy_threshold {
			warn!(
				provider_id = %self.id(),
				consecutive_failures = failures,
				"Provider marked not live after consecutive failures"
			);
		}
		failures
	}

	/// Record a health check; returns the consecutive failed check count
	pub fn record_health_check(&self, passed: bool) -> u32 {
		let health = &self.health;
		health
			.last_health_check_ms
			.store(Utc::now().timestamp_millis(), Ordering::SeqCst);
		if passed {
			health.failed_health_checks.store(0, Ordering::SeqCst);
			health.consecutive_failures.store(0, Ordering::SeqCst);
			0
		} else {
			health.failed_health_checks.fetch_add(1, Ordering::SeqCst) + 1
		}
	}

	pub fn last_health_check(&self) -> Option<DateTime<Utc>> {
		millis_to_datetime(self.health.last_health_check_ms.load(Ordering::SeqCst))
	}

	fn set_active(&self, active: bool, automatic: bool) {
		self.health.active.store(active, Ordering::SeqCst);
		self.health
			.auto_deactivated
			.store(!active && automatic, Ordering::SeqCst);
	}

	pub fn stats(&self) -> ProviderStats {
		let health = &self.health;
		ProviderStats {
			provider_id: self.id().to_string(),
			live: self.is_live(),
			active: self.is_active(),
			total_requests: health.total_requests.load(Ordering::SeqCst),
			successful_requests: health.successful_requests.load(Ordering::SeqCst),
			failed_requests: health.failed_requests.load(Ordering::SeqCst),
			consecutive_failures: health.consecutive_failures.load(Ordering::SeqCst),
			failed_health_checks: health.failed_health_checks.load(Ordering::SeqCst),
			last_latency_ms: self.last_latency_ms(),
			last_used: millis_to_datetime(self.last_used_millis()),
			last_health_check: self.last_health_check(),
		}
	}
}

/// Mapping from provider id to live handle
#[derive(Debug)]
pub struct ProviderRegistry {
	providers: DashMap<String, ProviderHandle>,
	unhealthy_threshold: u32,
}

impl Default for ProviderRegistry {
	fn default() -> Self {
		Self::new(DEFAULT_UNHEALTHY_THRESHOLD)
	}
}

impl ProviderRegistry {
	pub fn new(unhealthy_threshold: u32) -> Self {
		Self {
			providers: DashMap::new(),
			unhealthy_threshold,
		}
	}

	/// Register a provider; re-registering an id replaces its handle
	pub fn register(&self, provider: Arc<dyn Provider>) -> ProviderHandle {
		let handle = ProviderHandle::new(provider, self.unhealthy_threshold);
		let id = handle.id().to_string();
		if self.providers.insert(id.clone(), handle.clone()).is_some() {
			info!(provider_id = %id, "Replaced provider registration");
		} else {
			info!(
				provider_id = %id,
				categories = ?handle.info().categories,
				"Registered provider"
			);
		}
		handle
	}

	pub fn get(&self, id: &str) -> OasisResult<ProviderHandle> {
		self.providers
			.get(id)
			.map(|entry| entry.value().clone())
			.ok_or_else(|| OasisError::not_found("provider", id))
	}

	pub fn contains(&self, id: &str) -> bool {
		self.providers.contains_key(id)
	}

	pub fn len(&self) -> usize {
		self.providers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.providers.is_empty()
	}

	/// Every handle, ordered by priority rank then id
	pub fn list_all(&self) -> Vec<ProviderHandle> {
		let mut handles: Vec<ProviderHandle> =
			self.providers.iter().map(|entry| entry.value().clone()).collect();
		sort_by_rank(&mut handles);
		handles
	}

	/// Handles serving `category`, ordered by priority rank then id
	pub fn list_by_category(&self, category: ProviderCategory) -> Vec<ProviderHandle> {
		let mut handles: Vec<ProviderHandle> = self
			.providers
			.iter()
			.filter(|entry| entry.value().supports(category))
			.map(|entry| entry.value().clone())
			.collect();
		sort_by_rank(&mut handles);
		handles
	}

	pub fn list_ids_by_category(&self, category: ProviderCategory) -> Vec<String> {
		self.list_by_category(category)
			.iter()
			.map(|h| h.id().to_string())
			.collect()
	}

	/// Live blockchain providers serving `chain`
	pub fn live_for_chain(&self, chain: &str) -> Vec<ProviderHandle> {
		self.list_by_category(ProviderCategory::Blockchain)
			.into_iter()
			.filter(|h| h.is_live() && serves_chain(h, chain))
			.collect()
	}

	pub fn stats(&self) -> Vec<ProviderStats> {
		self.list_all().iter().map(|h| h.stats()).collect()
	}

	/// Bring a provider (back) up through its activation hook
	pub async fn activate(&self, id: &str) -> Envelope<()> {
		let handle = match self.get(id) {
			Ok(handle) => handle,
			Err(e) => return Envelope::from_error(&e),
		};

		match handle.provider.activate().await {
			Ok(()) => {
				handle.set_active(true, false);
				handle.record_health_check(true);
				info!(provider_id = %id, "Provider activated");
				Envelope::success(()).with_provider(id)
			},
			Err(e) => {
				warn!(provider_id = %id, error = %e, "Provider activation failed");
				Envelope::from_error(&OasisError::from(e)).with_provider(id)
			},
		}
	}

	/// Operator shutdown of a provider
	pub async fn deactivate(&self, id: &str) -> Envelope<()> {
		self.deactivate_with(id, false).await
	}

	/// Deactivation triggered by failed health checks; eligible for revival
	pub async fn deactivate_unhealthy(&self, id: &str) -> Envelope<()> {
		self.deactivate_with(id, true).await
	}

	async fn deactivate_with(&self, id: &str, automatic: bool) -> Envelope<()> {
		let handle = match self.get(id) {
			Ok(handle) => handle,
			Err(e) => return Envelope::from_error(&e),
		};

		if !handle.is_active() {
			debug!(provider_id = %id, "Provider already inactive");
			return Envelope::success(()).with_provider(id);
		}

		// Marked inactive even when the hook fails so no new requests reach it
		handle.set_active(false, automatic);
		match handle.provider.deactivate().await {
			Ok(()) => {
				info!(provider_id = %id, automatic, "Provider deactivated");
				Envelope::success(()).with_provider(id)
			},
			Err(e) => {
				warn!(provider_id = %id, error = %e, "Provider deactivation hook failed");
				Envelope::success(())
					.with_provider(id)
					.with_warning(format!("deactivation hook failed: {}", e.reason()))
			},
		}
	}

	/// Deactivate every active provider, for node shutdown
	pub async fn shutdown(&self) -> Envelope<usize> {
		let mut count = 0;
		let mut warnings = Vec::new();
		for handle in self.list_all() {
			if !handle.is_active() {
				continue;
			}
			let result = self.deactivate(handle.id()).await;
			if result.error_kind() == Some(ErrorKind::NotFound) {
				continue;
			}
			warnings.extend(result.warnings().iter().cloned());
			count += 1;
		}
		Envelope::success(count).with_warnings(warnings)
	}
}

fn serves_chain(handle: &ProviderHandle, chain: &str) -> bool {
	handle
		.info()
		.chain
		.as_deref()
		.is_some_and(|c| c.eq_ignore_ascii_case(chain))
}

fn sort_by_rank(handles: &mut [ProviderHandle]) {
	handles.sort_by(|a, b| {
		a.info()
			.priority
			.cmp(&b.info().priority)
			.then_with(|| a.id().cmp(b.id()))
	});
}
