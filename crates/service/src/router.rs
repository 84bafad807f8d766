//! Multi-provider request router
//!
//! Executes a routed operation against the providers of a category with
//! per-attempt timeouts, bounded retries with exponential backoff, ordered
//! failover and optional replication. Every outcome is folded into an
//! [`Envelope`]; fallbacks and failed replicas surface as warnings.

use futures::stream::{FuturesUnordered, StreamExt};
use oasis_adapters::{ProviderHandle, ProviderRegistry};
use oasis_config::RouterSettings;
use oasis_types::constants::limits::{
	DEFAULT_ATTEMPT_TIMEOUT_MS, DEFAULT_BASE_BACKOFF_MS, DEFAULT_MAX_BACKOFF_MS,
	DEFAULT_PROVIDER_RETRIES, MAX_PROVIDER_RETRIES,
};
use oasis_types::{
	DurabilityMode, Envelope, ErrorKind, OasisError, OasisResult, OperationKind, Provider, ProviderCategory,
	ProviderError, ProviderFailure, ProviderResult, ReplicationPolicy, RoutedRequest,
	SelectionStrategy, TransactionReceipt, TransactionRequest,
};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::future::Future;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::context;
use crate::observer::ObserverRegistry;
use crate::selection::{ProviderSelector, ProviderSelectorTrait};

/// Retry, timeout and replication knobs of the router
#[derive(Debug, Clone, PartialEq)]
pub struct RouterConfig {
	pub default_strategy: SelectionStrategy,
	pub max_retries: u32,
	pub base_backoff: Duration,
	pub max_backoff: Duration,
	pub attempt_timeout: Duration,
	pub replication: ReplicationPolicy,
}

impl Default for RouterConfig {
	fn default() -> Self {
		Self {
			default_strategy: SelectionStrategy::Priority,
			max_retries: DEFAULT_PROVIDER_RETRIES,
			base_backoff: Duration::from_millis(DEFAULT_BASE_BACKOFF_MS),
			max_backoff: Duration::from_millis(DEFAULT_MAX_BACKOFF_MS),
			attempt_timeout: Duration::from_millis(DEFAULT_ATTEMPT_TIMEOUT_MS),
			replication: ReplicationPolicy::FirstSuccess,
		}
	}
}

impl From<&RouterSettings> for RouterConfig {
	fn from(settings: &RouterSettings) -> Self {
		Self {
			default_strategy: settings.strategy(),
			max_retries: settings.max_retries.min(MAX_PROVIDER_RETRIES),
			base_backoff: Duration::from_millis(settings.base_backoff_ms),
			max_backoff: Duration::from_millis(settings.max_backoff_ms),
			attempt_timeout: Duration::from_millis(settings.attempt_timeout_ms),
			replication: settings.replication,
		}
	}
}

impl RouterConfig {
	/// Delay before retry number `retry` (0-based): base * 2^retry, capped
	pub fn backoff_for(&self, retry: u32) -> Duration {
		let factor = 2_u32.saturating_pow(retry.min(10));
		self.base_backoff
			.saturating_mul(factor)
			.min(self.max_backoff)
	}
}

/// Why a single provider could not serve a request
#[derive(Debug)]
enum AttemptError {
	Cancelled,
	Failed { error: ProviderError, attempts: u32 },
}

/// Routes operations across the provider registry
#[derive(Clone)]
pub struct Router {
	registry: Arc<ProviderRegistry>,
	observers: Arc<ObserverRegistry>,
	selector: Arc<dyn ProviderSelectorTrait>,
	config: RouterConfig,
}

impl Router {
	pub fn new(registry: Arc<ProviderRegistry>, config: RouterConfig) -> Self {
		let selector = Arc::new(ProviderSelector::new(config.default_strategy));
		Self {
			registry,
			observers: Arc::new(ObserverRegistry::new()),
			selector,
			config,
		}
	}

	/// Exclude providers whose chain observer reports an error state
	pub fn with_observers(mut self, observers: Arc<ObserverRegistry>) -> Self {
		self.observers = observers;
		self
	}

	pub fn with_selector(mut self, selector: Arc<dyn ProviderSelectorTrait>) -> Self {
		self.selector = selector;
		self
	}

	pub fn registry(&self) -> &Arc<ProviderRegistry> {
		&self.registry
	}

	pub fn observers(&self) -> &Arc<ObserverRegistry> {
		&self.observers
	}

	pub fn config(&self) -> &RouterConfig {
		&self.config
	}

	/// Live candidates for a request, in the order they will be tried
	pub fn candidates(&self, request: &RoutedRequest) -> Vec<ProviderHandle> {
		let live: Vec<ProviderHandle> = self
			.registry
			.list_by_category(request.category)
			.into_iter()
			.filter(|handle| handle.is_live())
			.filter(|handle| self.serves_requested_chain(handle, request))
			.filter(|handle| self.chain_is_healthy(handle))
			.collect();

		let strategy = request.strategy.unwrap_or(self.config.default_strategy);
		self.selector.order(live, strategy, request)
	}

	fn serves_requested_chain(&self, handle: &ProviderHandle, request: &RoutedRequest) -> bool {
		match &request.chain {
			Some(chain) => handle
				.info()
				.chain
				.as_deref()
				.is_some_and(|c| c.eq_ignore_ascii_case(chain)),
			None => true,
		}
	}

	fn chain_is_healthy(&self, handle: &ProviderHandle) -> bool {
		let Some(chain) = handle.info().chain.as_deref() else {
			return true;
		};
		match self.observers.snapshot(chain) {
			Some(snapshot) if !snapshot.is_healthy() => {
				debug!(
					provider_id = %handle.id(),
					chain,
					error_count = snapshot.error_count,
					"Skipping provider on unhealthy chain"
				);
				false
			},
			_ => true,
		}
	}

	/// Execute `op` for `request` and fold the outcome into an envelope
	///
	/// `op` receives the provider and the shared request; it is invoked once
	/// per attempt and must be safe to call repeatedly.
	pub async fn execute<T, F, Fut>(
		&self,
		request: RoutedRequest,
		cancel: &CancellationToken,
		op: F,
	) -> Envelope<T>
	where
		T: Send + 'static,
		F: Fn(Arc<dyn Provider>, Arc<RoutedRequest>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ProviderResult<T>> + Send + 'static,
	{
		if let Err(e) = request.validate() {
			return Envelope::from_error(&e);
		}
		if cancel.is_cancelled() {
			return Envelope::from_error(&OasisError::Cancelled);
		}

		debug!(
			operation = %request.operation,
			key = %request.key,
			category = %request.category,
			priority = request.priority,
			caller = %context::current_id(),
			"Routing request"
		);

		let request = Arc::new(request);
		let op = Arc::new(op);

		if let Some(provider_id) = request.provider_override.clone() {
			return self.execute_override(&provider_id, request, cancel, op).await;
		}

		let candidates = self.candidates(&request);
		if candidates.is_empty() {
			warn!(
				operation = %request.operation,
				category = %request.category,
				chain = ?request.chain,
				"No live provider for request"
			);
			return Envelope::from_error(&OasisError::Exhausted {
				context: no_candidates_context(&request),
				failures: Vec::new(),
			});
		}

		match request.durability {
			DurabilityMode::Single => self.execute_failover(candidates, request, cancel, op).await,
			DurabilityMode::Replicate => {
				self.execute_replicated(candidates, request, cancel, op).await
			},
		}
	}

	async fn execute_override<T, F, Fut>(
		&self,
		provider_id: &str,
		request: Arc<RoutedRequest>,
		cancel: &CancellationToken,
		op: Arc<F>,
	) -> Envelope<T>
	where
		F: Fn(Arc<dyn Provider>, Arc<RoutedRequest>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ProviderResult<T>> + Send + 'static,
	{
		let handle = match self.registry.get(provider_id) {
			Ok(handle) => handle,
			Err(e) => return Envelope::from_error(&e),
		};

		match self.attempt(&handle, &request, cancel, op.as_ref()).await {
			Ok(value) => Envelope::success(value).with_provider(provider_id),
			Err(AttemptError::Cancelled) => {
				Envelope::from_error(&OasisError::Cancelled).with_provider(provider_id)
			},
			Err(AttemptError::Failed { error, attempts }) => {
				let error = if error.is_transient() {
					OasisError::Exhausted {
						context: request.operation.to_string(),
						failures: vec![ProviderFailure {
							provider_id: provider_id.to_string(),
							reason: error.reason(),
							attempts,
						}],
					}
				} else {
					OasisError::from(error)
				};
				Envelope::from_error(&error).with_provider(provider_id)
			},
		}
	}

	async fn execute_failover<T, F, Fut>(
		&self,
		candidates: Vec<ProviderHandle>,
		request: Arc<RoutedRequest>,
		cancel: &CancellationToken,
		op: Arc<F>,
	) -> Envelope<T>
	where
		F: Fn(Arc<dyn Provider>, Arc<RoutedRequest>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ProviderResult<T>> + Send + 'static,
	{
		let mut warnings = Vec::new();
		let mut failures = Vec::new();
		let mut candidates = candidates.into_iter().peekable();

		while let Some(handle) = candidates.next() {
			match self.attempt(&handle, &request, cancel, op.as_ref()).await {
				Ok(value) => {
					if !warnings.is_empty() {
						info!(
							provider_id = %handle.id(),
							operation = %request.operation,
							fallbacks = warnings.len(),
							"Request served after failover"
						);
					}
					return Envelope::success(value)
						.with_provider(handle.id())
						.with_warnings(warnings);
				},
				Err(AttemptError::Cancelled) => {
					return Envelope::from_error(&OasisError::Cancelled).with_warnings(warnings);
				},
				Err(AttemptError::Failed { error, attempts }) => {
					if error.is_fatal_for_request() {
						warn!(
							provider_id = %handle.id(),
							operation = %request.operation,
							error = %error,
							"Request rejected by provider"
						);
						return Envelope::from_error(&OasisError::permanent(error.to_string()))
							.with_provider(handle.id())
							.with_warnings(warnings);
					}

					// The last candidate's reason only goes into the aggregated error
					if candidates.peek().is_some() {
						warn!(
							provider_id = %handle.id(),
							operation = %request.operation,
							attempts,
							reason = %error.reason(),
							"Falling back to next provider"
						);
						warnings.push(format!("fell back from {}: {}", handle.id(), error.reason()));
					} else {
						debug!(
							provider_id = %handle.id(),
							operation = %request.operation,
							attempts,
							reason = %error.reason(),
							"Last candidate failed"
						);
					}
					failures.push((handle.id().to_string(), error, attempts));
				},
			}
		}

		Envelope::from_error(&exhausted(&request, failures)).with_warnings(warnings)
	}

	async fn execute_replicated<T, F, Fut>(
		&self,
		candidates: Vec<ProviderHandle>,
		request: Arc<RoutedRequest>,
		cancel: &CancellationToken,
		op: Arc<F>,
	) -> Envelope<T>
	where
		T: Send + 'static,
		F: Fn(Arc<dyn Provider>, Arc<RoutedRequest>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = ProviderResult<T>> + Send + 'static,
	{
		let order: Vec<String> = candidates.iter().map(|h| h.id().to_string()).collect();
		let mut replicas = FuturesUnordered::new();
		for handle in candidates {
			let router = self.clone();
			let request = request.clone();
			let cancel = cancel.clone();
			let op = op.clone();
			let provider_id = handle.id().to_string();
			let task = context::spawn_with_caller(async move {
				let result = router.attempt(&handle, &request, &cancel, op.as_ref()).await;
				(handle.id().to_string(), result)
			});
			replicas.push(async move {
				match task.await {
					Ok(outcome) => outcome,
					Err(e) => {
						let error = ProviderError::Unavailable(format!("replica task failed: {}", e));
						(provider_id, Err(AttemptError::Failed { error, attempts: 1 }))
					},
				}
			});
		}

		let mut successes: Vec<(String, T)> = Vec::new();
		let mut failures = Vec::new();
		let mut cancelled = false;

		while let Some((provider_id, result)) = replicas.next().await {
			match result {
				Ok(value) => {
					successes.push((provider_id, value));
					if self.config.replication == ReplicationPolicy::FirstSuccess {
						break;
					}
				},
				Err(AttemptError::Cancelled) => cancelled = true,
				Err(AttemptError::Failed { error, attempts }) => {
					failures.push((provider_id, error, attempts));
				},
			}
		}

		if !replicas.is_empty() {
			let operation = request.operation.clone();
			tokio::spawn(async move {
				while let Some((provider_id, result)) = replicas.next().await {
					if let Err(AttemptError::Failed { error, .. }) = result {
						warn!(
							provider_id = %provider_id,
							operation = %operation,
							reason = %error.reason(),
							"Background replica failed"
						);
					}
				}
			});
		}

		let warnings: Vec<String> = failures
			.iter()
			.map(|(id, error, _)| format!("replica {} failed: {}", id, error.reason()))
			.collect();

		// Report the highest-ranked replica that succeeded
		successes.sort_by_key(|(id, _)| order.iter().position(|o| o == id));
		let mut successes = successes.into_iter();
		match successes.next() {
			Some((provider_id, value)) => {
				debug!(
					provider_id = %provider_id,
					operation = %request.operation,
					failed_replicas = failures.len(),
					"Replicated request succeeded"
				);
				Envelope::success(value)
					.with_provider(provider_id)
					.with_warnings(warnings)
			},
			None if cancelled => Envelope::from_error(&OasisError::Cancelled).with_warnings(warnings),
			None => Envelope::from_error(&exhausted(&request, failures)).with_warnings(warnings),
		}
	}

	/// Run `op` against one provider with timeout and bounded retries
	async fn attempt<T, F, Fut>(
		&self,
		handle: &ProviderHandle,
		request: &Arc<RoutedRequest>,
		cancel: &CancellationToken,
		op: &F,
	) -> Result<T, AttemptError>
	where
		F: Fn(Arc<dyn Provider>, Arc<RoutedRequest>) -> Fut,
		Fut: Future<Output = ProviderResult<T>>,
	{
		let mut attempts = 0_u32;
		loop {
			attempts += 1;
			let started = Instant::now();
			let call = tokio::time::timeout(
				self.config.attempt_timeout,
				op(handle.provider(), request.clone()),
			);

			let outcome = tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(AttemptError::Cancelled),
				outcome = call => outcome,
			};

			let error = match outcome {
				Ok(Ok(value)) => {
					handle.record_success(started.elapsed());
					return Ok(value);
				},
				Ok(Err(error)) => error,
				Err(_) => ProviderError::Timeout {
					timeout_ms: self.config.attempt_timeout.as_millis() as u64,
				},
			};
			handle.record_failure();

			if !error.is_transient() || attempts > self.config.max_retries {
				return Err(AttemptError::Failed { error, attempts });
			}

			let delay = self.config.backoff_for(attempts - 1);
			debug!(
				provider_id = %handle.id(),
				attempt = attempts,
				delay_ms = delay.as_millis() as u64,
				reason = %error.reason(),
				"Retrying provider after transient failure"
			);
			tokio::select! {
				biased;
				_ = cancel.cancelled() => return Err(AttemptError::Cancelled),
				_ = tokio::time::sleep(delay) => {},
			}
		}
	}

	fn expect_operation(request: &RoutedRequest, expected: OperationKind) -> OasisResult<()> {
		if request.operation == expected {
			Ok(())
		} else {
			Err(OasisError::permanent(format!(
				"invalid input: expected a {} request, got {}",
				expected, request.operation
			)))
		}
	}

	pub async fn store_entity(
		&self,
		request: RoutedRequest,
		cancel: &CancellationToken,
	) -> Envelope<()> {
		if let Err(e) = Self::expect_operation(&request, OperationKind::StoreEntity) {
			return Envelope::from_error(&e);
		}
		self.execute(request, cancel, |provider, request| async move {
			let value = request.param("value").cloned().unwrap_or_default();
			provider.store_entity(&request.key, &value).await
		})
		.await
	}

	pub async fn read_entity(
		&self,
		request: RoutedRequest,
		cancel: &CancellationToken,
	) -> Envelope<serde_json::Value> {
		if let Err(e) = Self::expect_operation(&request, OperationKind::ReadEntity) {
			return Envelope::from_error(&e);
		}
		self.execute(request, cancel, |provider, request| async move {
			provider.read_entity(&request.key).await
		})
		.await
	}

	pub async fn delete_entity(
		&self,
		request: RoutedRequest,
		cancel: &CancellationToken,
	) -> Envelope<()> {
		if let Err(e) = Self::expect_operation(&request, OperationKind::DeleteEntity) {
			return Envelope::from_error(&e);
		}
		self.execute(request, cancel, |provider, request| async move {
			provider.delete_entity(&request.key).await
		})
		.await
	}

	pub async fn store_blob(
		&self,
		request: RoutedRequest,
		data: Vec<u8>,
		cancel: &CancellationToken,
	) -> Envelope<()> {
		if let Err(e) = Self::expect_operation(&request, OperationKind::StoreBlob) {
			return Envelope::from_error(&e);
		}
		let data = Arc::new(data);
		self.execute(request, cancel, move |provider, request| {
			let data = data.clone();
			async move { provider.store_blob(&request.key, &data).await }
		})
		.await
	}

	pub async fn read_blob(
		&self,
		request: RoutedRequest,
		cancel: &CancellationToken,
	) -> Envelope<Vec<u8>> {
		if let Err(e) = Self::expect_operation(&request, OperationKind::ReadBlob) {
			return Envelope::from_error(&e);
		}
		self.execute(request, cancel, |provider, request| async move {
			provider.read_blob(&request.key).await
		})
		.await
	}

	pub async fn submit_transaction(
		&self,
		request: RoutedRequest,
		cancel: &CancellationToken,
	) -> Envelope<TransactionReceipt> {
		if let Err(e) = Self::expect_operation(&request, OperationKind::SubmitTransaction) {
			return Envelope::from_error(&e);
		}
		let transaction: TransactionRequest = match request.transaction() {
			Ok(transaction) => transaction,
			Err(e) => return Envelope::from_error(&e),
		};
		let transaction = Arc::new(transaction);
		self.execute(request, cancel, move |provider, _| {
			let transaction = transaction.clone();
			async move { provider.submit_transaction(&transaction).await }
		})
		.await
	}

	pub async fn query_balance(
		&self,
		request: RoutedRequest,
		cancel: &CancellationToken,
	) -> Envelope<f64> {
		if let Err(e) = Self::expect_operation(&request, OperationKind::QueryBalance) {
			return Envelope::from_error(&e);
		}
		self.execute(request, cancel, |provider, request| async move {
			let address = request.param_opt_str("address").unwrap_or_default();
			let token = request.param_opt_str("token");
			provider.query_balance(&address, token.as_deref()).await
		})
		.await
	}

	pub async fn get_price(&self, request: RoutedRequest, cancel: &CancellationToken) -> Envelope<f64> {
		if let Err(e) = Self::expect_operation(&request, OperationKind::GetPrice) {
			return Envelope::from_error(&e);
		}
		self.execute(request, cancel, |provider, request| async move {
			let symbol = request.param_opt_str("symbol").unwrap_or_default();
			let currency = request
				.param_opt_str("currency")
				.unwrap_or_else(|| "USD".to_string());
			provider.get_price(&symbol, &currency).await
		})
		.await
	}

	/// Start a session that collects warnings across several routed calls
	pub fn session<'a>(&'a self, cancel: &'a CancellationToken) -> RouterSession<'a> {
		RouterSession {
			router: self,
			cancel,
			warnings: Vec::new(),
		}
	}
}

fn no_candidates_context(request: &RoutedRequest) -> String {
	match &request.chain {
		Some(chain) => format!(
			"no live {} provider for {} on chain {}",
			request.category, request.operation, chain
		),
		None => format!("no live {} provider for {}", request.category, request.operation),
	}
}

fn exhausted(request: &RoutedRequest, failures: Vec<(String, ProviderError, u32)>) -> OasisError {
	let all_missing = !failures.is_empty()
		&& failures
			.iter()
			.all(|(_, error, _)| matches!(error, ProviderError::NotFound(_)));
	if all_missing {
		return OasisError::not_found("entity", request.key.clone());
	}

	OasisError::Exhausted {
		context: request.operation.to_string(),
		failures: failures
			.into_iter()
			.map(|(provider_id, error, attempts)| ProviderFailure {
				provider_id,
				reason: error.reason(),
				attempts,
			})
			.collect(),
	}
}

fn decode_entity<D: DeserializeOwned>(key: &str, value: serde_json::Value) -> OasisResult<D> {
	serde_json::from_value(value)
		.map_err(|e| OasisError::permanent(format!("corrupt entity at {}: {}", key, e)))
}

/// A run of routed calls made on behalf of one component operation
///
/// Calls return plain results for `?` propagation while their warnings are
/// accumulated and attached to the final envelope by [`RouterSession::finish`].
pub struct RouterSession<'a> {
	router: &'a Router,
	cancel: &'a CancellationToken,
	warnings: Vec<String>,
}

impl RouterSession<'_> {
	/// Fold an envelope from a direct router call into the session
	pub fn absorb<T>(&mut self, envelope: Envelope<T>) -> OasisResult<T> {
		let (result, warnings) = envelope.into_parts();
		self.warnings.extend(warnings);
		result
	}

	pub fn warn(&mut self, warning: impl Into<String>) {
		self.warnings.push(warning.into());
	}

	pub async fn store_json<S: Serialize>(&mut self, key: &str, value: &S) -> OasisResult<()> {
		let value = serde_json::to_value(value)
			.map_err(|e| OasisError::permanent(format!("serialization error: {}", e)))?;
		let envelope = self
			.router
			.store_entity(RoutedRequest::store_entity(key, value), self.cancel)
			.await;
		self.absorb(envelope)
	}

	pub async fn read_json<D: DeserializeOwned>(&mut self, key: &str) -> OasisResult<D> {
		let envelope = self
			.router
			.read_entity(RoutedRequest::read_entity(key), self.cancel)
			.await;
		let value = self.absorb(envelope)?;
		decode_entity(key, value)
	}

	/// Like `read_json` but a missing entity reads as `None`
	///
	/// Providers answering "not found" on the way to that answer are not a
	/// failover, so their warnings are dropped.
	pub async fn read_json_opt<D: DeserializeOwned>(&mut self, key: &str) -> OasisResult<Option<D>> {
		let envelope = self
			.router
			.read_entity(RoutedRequest::read_entity(key), self.cancel)
			.await;
		if envelope.error_kind() == Some(ErrorKind::NotFound) {
			return Ok(None);
		}
		let value = self.absorb(envelope)?;
		decode_entity(key, value).map(Some)
	}

	pub async fn delete_entity(&mut self, key: &str) -> OasisResult<()> {
		let envelope = self
			.router
			.delete_entity(RoutedRequest::delete_entity(key), self.cancel)
			.await;
		self.absorb(envelope)
	}

	pub async fn store_blob(&mut self, key: &str, data: Vec<u8>) -> OasisResult<()> {
		let request = RoutedRequest::store_blob(key, data.len());
		let envelope = self.router.store_blob(request, data, self.cancel).await;
		self.absorb(envelope)
	}

	pub async fn read_blob(&mut self, key: &str) -> OasisResult<Vec<u8>> {
		let envelope = self
			.router
			.read_blob(RoutedRequest::read_blob(key), self.cancel)
			.await;
		self.absorb(envelope)
	}

	pub async fn submit_transaction(
		&mut self,
		transaction: &TransactionRequest,
	) -> OasisResult<TransactionReceipt> {
		let envelope = self
			.router
			.submit_transaction(RoutedRequest::submit_transaction(transaction), self.cancel)
			.await;
		self.absorb(envelope)
	}

	pub async fn get_price(
		&mut self,
		symbol: &str,
		currency: &str,
		category: ProviderCategory,
	) -> OasisResult<f64> {
		let request = RoutedRequest::get_price(symbol, currency).with_category(category);
		let envelope = self.router.get_price(request, self.cancel).await;
		self.absorb(envelope)
	}

	pub fn cancel(&self) -> &CancellationToken {
		self.cancel
	}

	pub fn warnings(&self) -> &[String] {
		&self.warnings
	}

	/// Close the session into an envelope carrying every collected warning
	pub fn finish<T>(self, result: OasisResult<T>) -> Envelope<T> {
		Envelope::from_result(result).with_warnings(self.warnings)
	}
}
