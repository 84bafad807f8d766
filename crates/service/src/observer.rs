//! Chain observers
//!
//! An observer polls one chain's tip on a background task, publishes block and
//! reorg events, and keeps a health snapshot the router and bridge consult
//! synchronously. Point-in-time queries go straight to the chain client and
//! never wait on the monitoring loop.

use async_trait::async_trait;
use chrono::Utc;
use dashmap::DashMap;
use oasis_config::ObserverSettings;
use oasis_types::constants::limits::{
	DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_EVENT_BUFFER_SIZE, DEFAULT_OBSERVER_POLL_INTERVAL_MS,
};
use oasis_types::{
	BlockInfo, ChainEvent, ChainHealthSnapshot, ChainState, Envelope, ObserverErrorEvent,
	ObserverState, OasisError, OasisResult, PriceFeed, PriceQuote, Provider, ProviderError,
	ProviderResult, TransactionInfo, TransactionStatus,
};
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{broadcast, watch, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Raw chain access used by an observer
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait ChainClient: Send + Sync {
	async fn latest_block(&self) -> ProviderResult<BlockInfo>;

	async fn get_transaction(&self, hash: &str) -> ProviderResult<TransactionInfo>;

	async fn get_balance(&self, address: &str, token: Option<String>) -> ProviderResult<f64>;

	async fn get_price_feed(&self, symbol: &str, currency: &str) -> ProviderResult<PriceFeed>;
}

/// Chain client backed by a registered blockchain provider
///
/// Prices come from a separate price source when one is configured, since
/// chain nodes rarely serve market data.
#[derive(Debug, Clone)]
pub struct ProviderChainClient {
	provider: Arc<dyn Provider>,
	price_source: Option<Arc<dyn Provider>>,
}

impl ProviderChainClient {
	pub fn new(provider: Arc<dyn Provider>) -> Self {
		Self {
			provider,
			price_source: None,
		}
	}

	pub fn with_price_source(mut self, price_source: Arc<dyn Provider>) -> Self {
		self.price_source = Some(price_source);
		self
	}
}

#[async_trait]
impl ChainClient for ProviderChainClient {
	async fn latest_block(&self) -> ProviderResult<BlockInfo> {
		self.provider.latest_block().await
	}

	async fn get_transaction(&self, hash: &str) -> ProviderResult<TransactionInfo> {
		self.provider.get_transaction(hash).await
	}

	async fn get_balance(&self, address: &str, token: Option<String>) -> ProviderResult<f64> {
		self.provider.query_balance(address, token.as_deref()).await
	}

	async fn get_price_feed(&self, symbol: &str, currency: &str) -> ProviderResult<PriceFeed> {
		let source = self.price_source.as_ref().unwrap_or(&self.provider);
		source.get_price_feed(symbol, currency).await
	}
}

/// Public contract of a chain observer
#[async_trait]
pub trait ChainObserver: Send + Sync {
	fn chain(&self) -> &str;

	/// Current snapshot, readable without awaiting
	fn health_snapshot(&self) -> ChainHealthSnapshot;

	fn subscribe_events(&self) -> broadcast::Receiver<ChainEvent>;

	fn subscribe_errors(&self) -> broadcast::Receiver<ObserverErrorEvent>;

	async fn start_monitoring(&self, cancel: &CancellationToken) -> Envelope<()>;

	async fn stop_monitoring(&self, cancel: &CancellationToken) -> Envelope<()>;

	async fn get_chain_state(&self, cancel: &CancellationToken) -> Envelope<ChainState>;

	async fn get_latest_block(&self, cancel: &CancellationToken) -> Envelope<BlockInfo>;

	async fn get_transaction(
		&self,
		hash: &str,
		cancel: &CancellationToken,
	) -> Envelope<TransactionInfo>;

	/// Whether a transaction is known and confirmed; unknown hashes verify false
	async fn verify_transaction(&self, hash: &str, cancel: &CancellationToken) -> Envelope<bool>;

	async fn get_balance(
		&self,
		address: &str,
		token: Option<&str>,
		cancel: &CancellationToken,
	) -> Envelope<f64>;

	async fn get_price(&self, symbol: &str, cancel: &CancellationToken) -> Envelope<PriceQuote>;

	async fn get_price_feed(
		&self,
		symbol: &str,
		currency: &str,
		cancel: &CancellationToken,
	) -> Envelope<PriceFeed>;

	async fn get_chain_health(&self, cancel: &CancellationToken) -> Envelope<ChainHealthSnapshot>;
}

/// Tuning of a polling observer
#[derive(Debug, Clone, PartialEq)]
pub struct ObserverConfig {
	pub poll_interval: Duration,
	pub query_timeout: Duration,
	pub event_buffer_size: usize,
	pub quote_currency: String,
}

impl Default for ObserverConfig {
	fn default() -> Self {
		Self {
			poll_interval: Duration::from_millis(DEFAULT_OBSERVER_POLL_INTERVAL_MS),
			query_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
			event_buffer_size: DEFAULT_EVENT_BUFFER_SIZE,
			quote_currency: "USD".to_string(),
		}
	}
}

impl From<&ObserverSettings> for ObserverConfig {
	fn from(settings: &ObserverSettings) -> Self {
		Self {
			poll_interval: Duration::from_millis(settings.poll_interval_ms),
			event_buffer_size: settings.event_buffer_size.max(1),
			..Self::default()
		}
	}
}

struct MonitorTask {
	cancel: CancellationToken,
	handle: JoinHandle<()>,
}

struct ObserverInner {
	chain: String,
	client: Arc<dyn ChainClient>,
	config: ObserverConfig,
	snapshot: watch::Sender<ChainHealthSnapshot>,
	tip: std::sync::Mutex<Option<BlockInfo>>,
	events: broadcast::Sender<ChainEvent>,
	errors: broadcast::Sender<ObserverErrorEvent>,
	monitor: Mutex<Option<MonitorTask>>,
}

/// Observer that polls the chain tip at a fixed interval
#[derive(Clone)]
pub struct PollingChainObserver {
	inner: Arc<ObserverInner>,
}

impl PollingChainObserver {
	pub fn new(chain: impl Into<String>, client: Arc<dyn ChainClient>, config: ObserverConfig) -> Self {
		let chain = chain.into();
		let (snapshot, _) = watch::channel(ChainHealthSnapshot::new(chain.clone()));
		let (events, _) = broadcast::channel(config.event_buffer_size.max(1));
		let (errors, _) = broadcast::channel(config.event_buffer_size.max(1));
		Self {
			inner: Arc::new(ObserverInner {
				chain,
				client,
				config,
				snapshot,
				tip: std::sync::Mutex::new(None),
				events,
				errors,
				monitor: Mutex::new(None),
			}),
		}
	}

	/// Watch the health snapshot as it changes
	pub fn watch_health(&self) -> watch::Receiver<ChainHealthSnapshot> {
		self.inner.snapshot.subscribe()
	}

	/// Poll the chain tip once outside the monitoring loop
	pub async fn poll_now(&self) -> ChainHealthSnapshot {
		self.inner.poll_once().await;
		self.health_snapshot()
	}

	/// Run a client query bounded by the query timeout and `cancel`
	async fn query<T, Fut>(&self, cancel: &CancellationToken, call: Fut) -> OasisResult<T>
	where
		Fut: Future<Output = ProviderResult<T>>,
	{
		let timeout = self.inner.config.query_timeout;
		tokio::select! {
			biased;
			_ = cancel.cancelled() => Err(OasisError::Cancelled),
			outcome = tokio::time::timeout(timeout, call) => match outcome {
				Ok(result) => result.map_err(OasisError::from),
				Err(_) => Err(OasisError::from(ProviderError::Timeout {
					timeout_ms: timeout.as_millis() as u64,
				})),
			},
		}
	}
}

impl ObserverInner {
	/// One poll of the chain tip; updates the snapshot and publishes events
	async fn poll_once(&self) {
		let started = Instant::now();
		let outcome =
			tokio::time::timeout(self.config.query_timeout, self.client.latest_block()).await;
		let result = match outcome {
			Ok(result) => result,
			Err(_) => Err(ProviderError::Timeout {
				timeout_ms: self.config.query_timeout.as_millis() as u64,
			}),
		};

		match result {
			Ok(block) => self.observe_block(block, started.elapsed()),
			Err(e) => self.observe_error(e),
		}
	}

	fn observe_block(&self, block: BlockInfo, latency: Duration) {
		let previous = {
			let mut tip = self.tip.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
			tip.replace(block.clone())
		};

		let event = match previous {
			None => Some(ChainEvent::NewBlock {
				chain: self.chain.clone(),
				block: block.clone(),
			}),
			Some(previous) if previous.hash == block.hash => None,
			Some(previous) => {
				let extends_tip = block.height == previous.height + 1
					&& block
						.parent_hash
						.as_deref()
						.map_or(true, |p| p == previous.hash);
				// skipped blocks between polls are not a reorg
				if extends_tip || block.height > previous.height + 1 {
					Some(ChainEvent::NewBlock {
						chain: self.chain.clone(),
						block: block.clone(),
					})
				} else {
					warn!(
						chain = %self.chain,
						previous_height = previous.height,
						height = block.height,
						"Chain reorganisation detected"
					);
					Some(ChainEvent::Reorg {
						chain: self.chain.clone(),
						previous,
						block: block.clone(),
					})
				}
			},
		};

		// Only the monitoring loop moves the state; a poll while idle just
		// refreshes the tip
		self.snapshot.send_modify(|snapshot| {
			if snapshot.monitoring {
				if snapshot.state == ObserverState::Error {
					info!(chain = %self.chain, "Chain observer recovered");
				}
				snapshot.state = ObserverState::Monitoring;
			}
			snapshot.error_count = 0;
			snapshot.last_block_height = Some(block.height);
			snapshot.last_block_hash = Some(block.hash.clone());
			snapshot.last_latency_ms = Some(latency.as_millis() as u64);
			snapshot.last_updated = Some(Utc::now());
		});

		if let Some(event) = event {
			debug!(chain = %self.chain, height = block.height, "Observed chain tip");
			// no subscribers is fine
			let _ = self.events.send(event);
		}
	}

	fn observe_error(&self, error: ProviderError) {
		let mut error_count = 0;
		self.snapshot.send_modify(|snapshot| {
			if snapshot.monitoring {
				snapshot.state = ObserverState::Error;
			}
			snapshot.error_count += 1;
			snapshot.last_updated = Some(Utc::now());
			error_count = snapshot.error_count;
		});

		warn!(
			chain = %self.chain,
			error_count,
			error = %error,
			"Chain poll failed"
		);
		let _ = self.errors.send(ObserverErrorEvent {
			chain: self.chain.clone(),
			message: error.to_string(),
			error_count,
			at: Utc::now(),
		});
	}

	async fn run(self: Arc<Self>, cancel: CancellationToken) {
		let mut ticker = tokio::time::interval(self.config.poll_interval);
		ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
		loop {
			tokio::select! {
				_ = cancel.cancelled() => break,
				_ = async {
					ticker.tick().await;
					self.poll_once().await;
				} => {},
			}
		}
		debug!(chain = %self.chain, "Chain monitoring loop stopped");
	}
}

#[async_trait]
impl ChainObserver for PollingChainObserver {
	fn chain(&self) -> &str {
		&self.inner.chain
	}

	fn health_snapshot(&self) -> ChainHealthSnapshot {
		self.inner.snapshot.borrow().clone()
	}

	fn subscribe_events(&self) -> broadcast::Receiver<ChainEvent> {
		self.inner.events.subscribe()
	}

	fn subscribe_errors(&self) -> broadcast::Receiver<ObserverErrorEvent> {
		self.inner.errors.subscribe()
	}

	/// `cancel` only aborts the start; the loop runs until `stop_monitoring`
	async fn start_monitoring(&self, cancel: &CancellationToken) -> Envelope<()> {
		if cancel.is_cancelled() {
			return Envelope::from_error(&OasisError::Cancelled);
		}
		let mut monitor = self.inner.monitor.lock().await;
		if monitor.as_ref().is_some_and(|task| !task.handle.is_finished()) {
			return Envelope::success(()).with_message("already monitoring");
		}
		if let Some(stale) = monitor.take() {
			warn!(chain = %self.inner.chain, "Monitoring loop had ended; restarting");
			stale.cancel.cancel();
		}

		let task_cancel = CancellationToken::new();
		self.inner.snapshot.send_modify(|snapshot| {
			snapshot.state = ObserverState::Monitoring;
			snapshot.monitoring = true;
			snapshot.error_count = 0;
		});
		let handle = tokio::spawn(self.inner.clone().run(task_cancel.clone()));
		*monitor = Some(MonitorTask {
			cancel: task_cancel,
			handle,
		});

		info!(
			chain = %self.inner.chain,
			interval_ms = self.inner.config.poll_interval.as_millis() as u64,
			"Chain monitoring started"
		);
		Envelope::success(())
	}

	async fn stop_monitoring(&self, _cancel: &CancellationToken) -> Envelope<()> {
		let task = self.inner.monitor.lock().await.take();
		let Some(task) = task else {
			return Envelope::success(()).with_message("not monitoring");
		};

		task.cancel.cancel();
		if let Err(e) = task.handle.await {
			warn!(chain = %self.inner.chain, error = %e, "Monitoring task ended abnormally");
		}
		self.inner.snapshot.send_modify(|snapshot| {
			snapshot.state = ObserverState::Idle;
			snapshot.monitoring = false;
		});

		info!(chain = %self.inner.chain, "Chain monitoring stopped");
		Envelope::success(())
	}

	async fn get_chain_state(&self, cancel: &CancellationToken) -> Envelope<ChainState> {
		let latest = self.query(cancel, self.inner.client.latest_block()).await;
		let snapshot = self.health_snapshot();
		Envelope::from_result(latest.map(|block| ChainState {
			chain: self.inner.chain.clone(),
			state: snapshot.state,
			latest_block: Some(block),
			observed_at: Utc::now(),
		}))
	}

	async fn get_latest_block(&self, cancel: &CancellationToken) -> Envelope<BlockInfo> {
		Envelope::from_result(self.query(cancel, self.inner.client.latest_block()).await)
	}

	async fn get_transaction(
		&self,
		hash: &str,
		cancel: &CancellationToken,
	) -> Envelope<TransactionInfo> {
		Envelope::from_result(
			self.query(cancel, self.inner.client.get_transaction(hash))
				.await,
		)
	}

	async fn verify_transaction(&self, hash: &str, cancel: &CancellationToken) -> Envelope<bool> {
		match self
			.query(cancel, self.inner.client.get_transaction(hash))
			.await
		{
			Ok(info) => Envelope::success(info.status == TransactionStatus::Confirmed),
			Err(OasisError::NotFound { .. }) => Envelope::success(false),
			Err(e) => Envelope::from_error(&e),
		}
	}

	async fn get_balance(
		&self,
		address: &str,
		token: Option<&str>,
		cancel: &CancellationToken,
	) -> Envelope<f64> {
		let token = token.map(str::to_string);
		Envelope::from_result(
			self.query(cancel, self.inner.client.get_balance(address, token))
				.await,
		)
	}

	async fn get_price(&self, symbol: &str, cancel: &CancellationToken) -> Envelope<PriceQuote> {
		let currency = self.inner.config.quote_currency.clone();
		let feed = self
			.query(cancel, self.inner.client.get_price_feed(symbol, &currency))
			.await;
		Envelope::from_result(feed.map(|feed| PriceQuote {
			symbol: feed.symbol,
			currency: feed.currency,
			price: feed.price,
			at: feed.at,
		}))
	}

	async fn get_price_feed(
		&self,
		symbol: &str,
		currency: &str,
		cancel: &CancellationToken,
	) -> Envelope<PriceFeed> {
		Envelope::from_result(
			self.query(cancel, self.inner.client.get_price_feed(symbol, currency))
				.await,
		)
	}

	async fn get_chain_health(&self, _cancel: &CancellationToken) -> Envelope<ChainHealthSnapshot> {
		Envelope::success(self.health_snapshot())
	}
}

/// Observers keyed by lowercased chain name
#[derive(Default)]
pub struct ObserverRegistry {
	observers: DashMap<String, Arc<dyn ChainObserver>>,
}

impl ObserverRegistry {
	pub fn new() -> Self {
		Self::default()
	}

	pub fn register(&self, observer: Arc<dyn ChainObserver>) {
		let chain = observer.chain().to_lowercase();
		info!(chain = %chain, "Registered chain observer");
		self.observers.insert(chain, observer);
	}

	pub fn get(&self, chain: &str) -> OasisResult<Arc<dyn ChainObserver>> {
		self.observers
			.get(&chain.to_lowercase())
			.map(|entry| entry.value().clone())
			.ok_or_else(|| OasisError::not_found("chain observer", chain))
	}

	pub fn snapshot(&self, chain: &str) -> Option<ChainHealthSnapshot> {
		self.observers
			.get(&chain.to_lowercase())
			.map(|entry| entry.value().health_snapshot())
	}

	pub fn chains(&self) -> Vec<String> {
		let mut chains: Vec<String> = self.observers.iter().map(|e| e.key().clone()).collect();
		chains.sort();
		chains
	}

	pub fn snapshots(&self) -> Vec<ChainHealthSnapshot> {
		self.chains()
			.iter()
			.filter_map(|chain| self.snapshot(chain))
			.collect()
	}

	pub fn len(&self) -> usize {
		self.observers.len()
	}

	pub fn is_empty(&self) -> bool {
		self.observers.is_empty()
	}

	fn all(&self) -> Vec<Arc<dyn ChainObserver>> {
		self.observers.iter().map(|e| e.value().clone()).collect()
	}

	/// Start every observer; returns how many were started
	pub async fn start_all(&self, cancel: &CancellationToken) -> Envelope<usize> {
		let mut started = 0;
		let mut warnings = Vec::new();
		for observer in self.all() {
			let result = observer.start_monitoring(cancel).await;
			if result.is_success() {
				started += 1;
			} else {
				warnings.push(format!("{}: {}", observer.chain(), result.message()));
			}
		}
		Envelope::success(started).with_warnings(warnings)
	}

	pub async fn stop_all(&self, cancel: &CancellationToken) -> Envelope<usize> {
		let mut stopped = 0;
		for observer in self.all() {
			if observer.stop_monitoring(cancel).await.is_success() {
				stopped += 1;
			}
		}
		Envelope::success(stopped)
	}
}
