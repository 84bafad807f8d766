//! Cross-chain bridge orders
//!
//! An order moves funds from a source chain to a destination chain through
//! an escrow account: quote, lock on the source, release on the destination,
//! settle once the release is confirmed. A failure after funds are locked
//! keeps the order in `locked` or `released` with the reason recorded, so a
//! refund is always possible from there.
//!
//! A transaction that went through on chain is never submitted again: when
//! the order cannot be saved afterwards it is kept in memory and preferred
//! over the stored copy until a save succeeds.
//!
//! Orders are persisted through the router and every mutation of an order
//! runs under that order's lock, so concurrent calls observe whole
//! transitions only.

use chrono::Utc;
use dashmap::DashMap;
use oasis_config::BridgeSettings;
use oasis_types::constants::limits::{
	BRIDGE_SAVE_ATTEMPTS_AFTER_SUBMIT, DEFAULT_BRIDGE_ORDER_EXPIRY_MINUTES,
};
use oasis_types::{
	BalanceCheck, BridgeOrder, BridgeOrderStatus, CreateBridgeOrderRequest, Envelope, OasisError,
	OasisResult, ProviderCategory, TransactionRequest,
};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use uuid::Uuid;

use crate::context;
use crate::locks::KeyedLocks;
use crate::observer::ObserverRegistry;
use crate::router::{Router, RouterSession};

#[derive(Debug, Clone, PartialEq)]
pub struct BridgeConfig {
	pub key_prefix: String,
	pub order_expiry: chrono::Duration,
	pub quote_currency: String,
	pub escrow_account: String,
}

impl Default for BridgeConfig {
	fn default() -> Self {
		Self::from(&BridgeSettings::default())
	}
}

impl From<&BridgeSettings> for BridgeConfig {
	fn from(settings: &BridgeSettings) -> Self {
		let minutes = if settings.order_expiry_minutes > 0 {
			settings.order_expiry_minutes
		} else {
			DEFAULT_BRIDGE_ORDER_EXPIRY_MINUTES
		};
		Self {
			key_prefix: settings.order_key_prefix.trim_end_matches('/').to_string(),
			order_expiry: chrono::Duration::minutes(minutes),
			quote_currency: settings.quote_currency.clone(),
			escrow_account: settings.escrow_account.clone(),
		}
	}
}

pub struct BridgeManager {
	router: Router,
	observers: Arc<ObserverRegistry>,
	config: BridgeConfig,
	locks: KeyedLocks,
	/// Orders whose last transaction went through but whose save failed
	unsaved: DashMap<String, BridgeOrder>,
}

impl BridgeManager {
	pub fn new(router: Router, config: BridgeConfig) -> Self {
		Self {
			observers: router.observers().clone(),
			router,
			config,
			locks: KeyedLocks::new(),
			unsaved: DashMap::new(),
		}
	}

	fn order_key(&self, order_id: &str) -> String {
		format!("{}/{}", self.config.key_prefix, order_id)
	}

	async fn load(&self, session: &mut RouterSession<'_>, order_id: &str) -> OasisResult<BridgeOrder> {
		if let Some(order) = self.unsaved.get(order_id) {
			return Ok(order.value().clone());
		}
		match session.read_json(&self.order_key(order_id)).await {
			Err(OasisError::NotFound { .. }) => Err(OasisError::not_found("bridge order", order_id)),
			other => other,
		}
	}

	async fn save(&self, session: &mut RouterSession<'_>, order: &BridgeOrder) -> OasisResult<()> {
		session.store_json(&self.order_key(&order.id), order).await?;
		self.unsaved.remove(&order.id);
		Ok(())
	}

	/// Save an order right after one of its transactions went through
	///
	/// The save is retried; when every attempt fails the order is kept in
	/// memory so no later call submits the same transaction again.
	async fn save_after_submit(
		&self,
		session: &mut RouterSession<'_>,
		order: &BridgeOrder,
		tx_hash: &str,
	) -> OasisResult<()> {
		let mut last_error = None;
		for attempt in 1..=BRIDGE_SAVE_ATTEMPTS_AFTER_SUBMIT {
			match self.save(session, order).await {
				Ok(()) => return Ok(()),
				Err(e) => {
					warn!(order_id = %order.id, attempt, error = %e, "Bridge order save failed");
					last_error = Some(e);
				},
			}
		}

		self.unsaved.insert(order.id.clone(), order.clone());
		let reason = last_error.map(|e| e.to_string()).unwrap_or_default();
		error!(
			order_id = %order.id,
			status = %order.status,
			tx_hash,
			error = %reason,
			"Bridge order could not be saved after its transaction"
		);
		Err(OasisError::Transient(format!(
			"order {} is {} by transaction {} but could not be saved: {}",
			order.id, order.status, tx_hash, reason
		)))
	}

	fn expect_status(order: &BridgeOrder, expected: BridgeOrderStatus) -> OasisResult<()> {
		if order.status == expected {
			Ok(())
		} else {
			Err(OasisError::InvalidState(format!(
				"order {} is {}, expected {}",
				order.id, order.status, expected
			)))
		}
	}

	/// A chain can take part in an order when it has a live provider and a
	/// healthy observer
	fn ensure_chain_ready(&self, chain: &str) -> OasisResult<()> {
		if self.router.registry().live_for_chain(chain).is_empty() {
			return Err(OasisError::not_found("live provider for chain", chain));
		}
		let observer = self.observers.get(chain)?;
		let snapshot = observer.health_snapshot();
		if !snapshot.is_healthy() {
			return Err(OasisError::Transient(format!(
				"observer for chain {} is unhealthy ({} consecutive errors)",
				chain, snapshot.error_count
			)));
		}
		Ok(())
	}

	/// Record a failure that leaves the order in its current state
	async fn record_failure(&self, session: &mut RouterSession<'_>, order: &mut BridgeOrder, reason: String) {
		order.failure_reason = Some(reason);
		order.updated_at = Utc::now();
		if let Err(e) = self.save(session, order).await {
			error!(order_id = %order.id, error = %e, "Order failure could not be persisted");
		}
	}

	/// Move an order without locked funds to `failed`; persistence problems
	/// are logged only
	async fn fail_and_save(
		&self,
		session: &mut RouterSession<'_>,
		order: &mut BridgeOrder,
		reason: String,
	) {
		if let Err(e) = order.transition(BridgeOrderStatus::Failed, Some(reason)) {
			warn!(order_id = %order.id, error = %e, "Order could not be marked failed");
			return;
		}
		if let Err(e) = self.save(session, order).await {
			error!(order_id = %order.id, error = %e, "Failed order could not be persisted");
		}
	}

	async fn rate(&self, session: &mut RouterSession<'_>, from: &str, to: &str) -> OasisResult<f64> {
		if from.eq_ignore_ascii_case(to) {
			return Ok(1.0);
		}
		let currency = self.config.quote_currency.clone();
		let from_price = session
			.get_price(from, &currency, ProviderCategory::Network)
			.await?;
		let to_price = session
			.get_price(to, &currency, ProviderCategory::Network)
			.await?;
		if !to_price.is_finite() || to_price <= 0.0 || !from_price.is_finite() {
			return Err(OasisError::permanent(format!(
				"invalid price for {}/{}: {} / {}",
				from, to, from_price, to_price
			)));
		}
		Ok(from_price / to_price)
	}

	async fn quote_stage(&self, session: &mut RouterSession<'_>, order: &mut BridgeOrder) -> OasisResult<()> {
		Self::expect_status(order, BridgeOrderStatus::Created)?;
		self.ensure_not_expired(session, order).await?;

		let rate = self
			.rate(session, &order.source.token, &order.destination.token)
			.await?;
		order.exchange_rate = Some(rate);
		order.destination_amount = Some(order.amount * rate);
		order.transition(BridgeOrderStatus::Quoted, None)?;
		self.save(session, order).await?;

		info!(
			order_id = %order.id,
			rate,
			destination_amount = order.amount * rate,
			"Bridge order quoted"
		);
		Ok(())
	}

	async fn ensure_not_expired(
		&self,
		session: &mut RouterSession<'_>,
		order: &mut BridgeOrder,
	) -> OasisResult<()> {
		if order.funds_locked() || !order.is_expired(Utc::now()) {
			return Ok(());
		}
		self.fail_and_save(session, order, "order expired".to_string())
			.await;
		Err(OasisError::InvalidState(format!("order {} expired", order.id)))
	}

	async fn lock_stage(&self, session: &mut RouterSession<'_>, order: &mut BridgeOrder) -> OasisResult<()> {
		Self::expect_status(order, BridgeOrderStatus::Quoted)?;
		self.ensure_not_expired(session, order).await?;

		let transaction = TransactionRequest {
			chain: order.source.chain.clone(),
			from: order.source.address.clone(),
			to: self.config.escrow_account.clone(),
			amount: order.amount,
			token: Some(order.source.token.clone()),
			memo: Some(format!("bridge:{}:lock", order.id)),
		};
		match session.submit_transaction(&transaction).await {
			Ok(receipt) => {
				order.lock_tx = Some(receipt.hash.clone());
				order.transition(BridgeOrderStatus::Locked, None)?;
				self.save_after_submit(session, order, &receipt.hash).await?;
				info!(order_id = %order.id, chain = %order.source.chain, "Bridge funds locked");
				Ok(())
			},
			Err(e) => {
				self.fail_and_save(session, order, format!("lock failed: {}", e))
					.await;
				Err(e)
			},
		}
	}

	async fn release_stage(
		&self,
		session: &mut RouterSession<'_>,
		order: &mut BridgeOrder,
	) -> OasisResult<()> {
		Self::expect_status(order, BridgeOrderStatus::Locked)?;

		let transaction = TransactionRequest {
			chain: order.destination.chain.clone(),
			from: self.config.escrow_account.clone(),
			to: order.destination.address.clone(),
			amount: order.destination_amount.unwrap_or(order.amount),
			token: Some(order.destination.token.clone()),
			memo: Some(format!("bridge:{}:release", order.id)),
		};
		match session.submit_transaction(&transaction).await {
			Ok(receipt) => {
				order.release_tx = Some(receipt.hash.clone());
				order.transition(BridgeOrderStatus::Released, None)?;
				self.save_after_submit(session, order, &receipt.hash).await?;
				info!(order_id = %order.id, chain = %order.destination.chain, "Bridge funds released");
				Ok(())
			},
			Err(e) => {
				self.record_failure(session, order, format!("release failed: {}", e))
					.await;
				session.warn(format!(
					"funds for order {} remain locked on {}",
					order.id, order.source.chain
				));
				Err(e)
			},
		}
	}

	async fn settle_stage(&self, session: &mut RouterSession<'_>, order: &mut BridgeOrder) -> OasisResult<()> {
		Self::expect_status(order, BridgeOrderStatus::Released)?;
		let release_tx = order.release_tx.clone().ok_or_else(|| {
			OasisError::InvalidState(format!("order {} has no release transaction", order.id))
		})?;

		let observer = self.observers.get(&order.destination.chain)?;
		let confirmed = observer
			.verify_transaction(&release_tx, session.cancel())
			.await
			.into_result()?;
		if !confirmed {
			return Err(OasisError::Transient(format!(
				"release {} not yet confirmed on {}",
				release_tx, order.destination.chain
			)));
		}

		order.transition(BridgeOrderStatus::Settled, None)?;
		self.save(session, order).await?;
		info!(order_id = %order.id, "Bridge order settled");
		Ok(())
	}

	async fn refund_stage(&self, session: &mut RouterSession<'_>, order: &mut BridgeOrder) -> OasisResult<()> {
		if !order.funds_locked() {
			return Err(OasisError::InvalidState(format!(
				"order {} has no locked funds",
				order.id
			)));
		}
		if !order.status.can_transition_to(BridgeOrderStatus::Refunded) {
			return Err(OasisError::InvalidState(format!(
				"order {} cannot be refunded while {}",
				order.id, order.status
			)));
		}

		let transaction = TransactionRequest {
			chain: order.source.chain.clone(),
			from: self.config.escrow_account.clone(),
			to: order.source.address.clone(),
			amount: order.amount,
			token: Some(order.source.token.clone()),
			memo: Some(format!("bridge:{}:refund", order.id)),
		};
		match session.submit_transaction(&transaction).await {
			Ok(receipt) => {
				order.refund_tx = Some(receipt.hash.clone());
				order.transition(BridgeOrderStatus::Refunded, order.failure_reason.clone())?;
				self.save_after_submit(session, order, &receipt.hash).await?;
				info!(order_id = %order.id, "Bridge order refunded");
				Ok(())
			},
			Err(e) => {
				error!(
					order_id = %order.id,
					chain = %order.source.chain,
					error = %e,
					"Refund failed; funds remain locked"
				);
				let cause = order
					.failure_reason
					.as_deref()
					.and_then(|r| r.split("; refund failed").next())
					.filter(|r| !r.is_empty() && !r.starts_with("refund failed"));
				let reason = match cause {
					Some(cause) => format!("{}; refund failed: {}", cause, e),
					None => format!("refund failed: {}", e),
				};
				self.record_failure(session, order, reason).await;
				Err(e)
			},
		}
	}

	/// Create an order and quote it
	///
	/// A quoting failure fails the call but leaves the order persisted in
	/// `created`, ready to be quoted again.
	pub async fn create_order(
		&self,
		request: CreateBridgeOrderRequest,
		cancel: &CancellationToken,
	) -> Envelope<BridgeOrder> {
		let mut session = self.router.session(cancel);
		let result = self.create_order_inner(&mut session, request).await;
		session.finish(result)
	}

	async fn create_order_inner(
		&self,
		session: &mut RouterSession<'_>,
		request: CreateBridgeOrderRequest,
	) -> OasisResult<BridgeOrder> {
		request.validate()?;
		self.ensure_chain_ready(&request.source.chain)?;
		self.ensure_chain_ready(&request.destination.chain)?;

		let mut order = BridgeOrder::new(
			Uuid::new_v4().to_string(),
			request,
			context::current_id(),
			Utc::now() + self.config.order_expiry,
		);
		let _guard = self.locks.lock(&order.id).await;

		self.save(session, &order).await?;
		info!(
			order_id = %order.id,
			source_chain = %order.source.chain,
			destination_chain = %order.destination.chain,
			amount = order.amount,
			created_by = %order.created_by,
			"Bridge order created"
		);

		if let Err(e) = self.quote_stage(session, &mut order).await {
			warn!(order_id = %order.id, error = %e, "Bridge order quote failed");
			session.warn(format!("order {} remains created: {}", order.id, e));
			return Err(e);
		}
		Ok(order)
	}

	pub async fn quote_order(&self, order_id: &str, cancel: &CancellationToken) -> Envelope<BridgeOrder> {
		self.run_stage(order_id, cancel, Stage::Quote).await
	}

	pub async fn lock_funds(&self, order_id: &str, cancel: &CancellationToken) -> Envelope<BridgeOrder> {
		self.run_stage(order_id, cancel, Stage::Lock).await
	}

	pub async fn release_funds(&self, order_id: &str, cancel: &CancellationToken) -> Envelope<BridgeOrder> {
		self.run_stage(order_id, cancel, Stage::Release).await
	}

	pub async fn settle_order(&self, order_id: &str, cancel: &CancellationToken) -> Envelope<BridgeOrder> {
		self.run_stage(order_id, cancel, Stage::Settle).await
	}

	pub async fn refund_order(&self, order_id: &str, cancel: &CancellationToken) -> Envelope<BridgeOrder> {
		self.run_stage(order_id, cancel, Stage::Refund).await
	}

	/// Abandon an order that holds no funds; orders with locked funds must be
	/// refunded instead
	pub async fn fail_order(
		&self,
		order_id: &str,
		reason: &str,
		cancel: &CancellationToken,
	) -> Envelope<BridgeOrder> {
		let _guard = self.locks.lock(order_id).await;
		let mut session = self.router.session(cancel);

		let result = async {
			let mut order = self.load(&mut session, order_id).await?;
			if order.funds_locked() {
				return Err(OasisError::InvalidState(format!(
					"order {} holds locked funds and must be refunded",
					order.id
				)));
			}
			order.transition(BridgeOrderStatus::Failed, Some(reason.to_string()))?;
			self.save(&mut session, &order).await?;
			warn!(order_id, reason, "Bridge order failed");
			Ok::<_, OasisError>(order)
		}
		.await;
		session.finish(result)
	}

	async fn run_stage(&self, order_id: &str, cancel: &CancellationToken, stage: Stage) -> Envelope<BridgeOrder> {
		let _guard = self.locks.lock(order_id).await;
		let mut session = self.router.session(cancel);

		let result = async {
			let mut order = self.load(&mut session, order_id).await?;
			match stage {
				Stage::Quote => self.quote_stage(&mut session, &mut order).await?,
				Stage::Lock => self.lock_stage(&mut session, &mut order).await?,
				Stage::Release => self.release_stage(&mut session, &mut order).await?,
				Stage::Settle => self.settle_stage(&mut session, &mut order).await?,
				Stage::Refund => self.refund_stage(&mut session, &mut order).await?,
			}
			Ok::<_, OasisError>(order)
		}
		.await;
		session.finish(result)
	}

	/// Drive an order through every remaining stage
	///
	/// When the release fails the order is refunded from `locked` before the
	/// failure is returned. A failed refund leaves it `locked` for a later
	/// `refund_order`.
	pub async fn execute_order(&self, order_id: &str, cancel: &CancellationToken) -> Envelope<BridgeOrder> {
		let _guard = self.locks.lock(order_id).await;
		let mut session = self.router.session(cancel);

		let result = self.execute_inner(&mut session, order_id).await;
		session.finish(result)
	}

	async fn execute_inner(&self, session: &mut RouterSession<'_>, order_id: &str) -> OasisResult<BridgeOrder> {
		let mut order = self.load(session, order_id).await?;
		loop {
			let releasing = order.status == BridgeOrderStatus::Locked;
			let outcome = match order.status {
				BridgeOrderStatus::Created => self.quote_stage(session, &mut order).await,
				BridgeOrderStatus::Quoted => self.lock_stage(session, &mut order).await,
				BridgeOrderStatus::Locked => self.release_stage(session, &mut order).await,
				BridgeOrderStatus::Released => self.settle_stage(session, &mut order).await,
				BridgeOrderStatus::Settled
				| BridgeOrderStatus::Refunded
				| BridgeOrderStatus::Failed => return Ok(order),
			};

			let Err(e) = outcome else {
				continue;
			};

			// A release that went through but was not saved leaves the order
			// `released` in memory and must not be refunded
			if releasing && order.status == BridgeOrderStatus::Locked {
				match self.refund_stage(session, &mut order).await {
					Ok(()) => session.warn(format!("order {} refunded after failure", order.id)),
					Err(refund_error) => session.warn(format!(
						"order {} refund failed, funds remain locked: {}",
						order.id, refund_error
					)),
				}
			}
			return Err(e);
		}
	}

	/// Check the destination balance against the expected amount
	///
	/// The check is appended to the order's history; its status never changes.
	pub async fn check_order_balance(
		&self,
		order_id: &str,
		cancel: &CancellationToken,
	) -> Envelope<BalanceCheck> {
		let _guard = self.locks.lock(order_id).await;
		let mut session = self.router.session(cancel);

		let result = async {
			let mut order = self.load(&mut session, order_id).await?;
			let observer = self.observers.get(&order.destination.chain)?;
			let observed_balance = observer
				.get_balance(
					&order.destination.address,
					Some(&order.destination.token),
					cancel,
				)
				.await
				.into_result()?;

			let expected_amount = order.destination_amount.unwrap_or(order.amount);
			let check = BalanceCheck {
				checked_at: Utc::now(),
				chain: order.destination.chain.clone(),
				address: order.destination.address.clone(),
				observed_balance,
				expected_amount,
				sufficient: observed_balance >= expected_amount,
			};
			order.balance_checks.push(check.clone());
			self.save(&mut session, &order).await?;
			Ok::<_, OasisError>(check)
		}
		.await;
		session.finish(result)
	}

	pub async fn get_exchange_rate(
		&self,
		from_token: &str,
		to_token: &str,
		cancel: &CancellationToken,
	) -> Envelope<f64> {
		let mut session = self.router.session(cancel);
		let result = self.rate(&mut session, from_token, to_token).await;
		session.finish(result)
	}

	pub async fn get_order(&self, order_id: &str, cancel: &CancellationToken) -> Envelope<BridgeOrder> {
		let mut session = self.router.session(cancel);
		let result = self.load(&mut session, order_id).await;
		session.finish(result)
	}
}

#[derive(Debug, Clone, Copy)]
enum Stage {
	Quote,
	Lock,
	Release,
	Settle,
	Refund,
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::observer::{ChainObserver, ObserverConfig, PollingChainObserver, ProviderChainClient};
	use crate::router::RouterConfig;
	use oasis_adapters::ProviderRegistry;
	use oasis_storage::MemoryStore;
	use async_trait::async_trait;
	use oasis_types::test_utils::ScriptedProvider;
	use oasis_types::{
		BridgeLeg, ErrorKind, ObserverState, Provider, ProviderError, ProviderInfo, ProviderResult,
	};
	use std::sync::atomic::{AtomicU32, Ordering};
	use std::time::Duration;

	/// Ledger whose writes of orders in one status fail a set number of times
	#[derive(Debug)]
	struct FlakyLedger {
		inner: MemoryStore,
		status: &'static str,
		failures: AtomicU32,
	}

	impl FlakyLedger {
		fn new(status: &'static str, failures: u32) -> Self {
			Self {
				inner: MemoryStore::new("ledger"),
				status,
				failures: AtomicU32::new(failures),
			}
		}
	}

	#[async_trait]
	impl Provider for FlakyLedger {
		fn info(&self) -> &ProviderInfo {
			self.inner.info()
		}

		async fn store_entity(&self, key: &str, value: &serde_json::Value) -> ProviderResult<()> {
			let failing = value["status"] == self.status
				&& self
					.failures
					.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
					.is_ok();
			if failing {
				return Err(ProviderError::Unavailable("disk full".to_string()));
			}
			self.inner.store_entity(key, value).await
		}

		async fn read_entity(&self, key: &str) -> ProviderResult<serde_json::Value> {
			self.inner.read_entity(key).await
		}

		async fn delete_entity(&self, key: &str) -> ProviderResult<()> {
			self.inner.delete_entity(key).await
		}
	}

	struct Harness {
		bridge: Arc<BridgeManager>,
		radix: Arc<ScriptedProvider>,
		solana: Arc<ScriptedProvider>,
		observers: Arc<ObserverRegistry>,
	}

	fn harness() -> Harness {
		harness_with_ledger(Arc::new(MemoryStore::new("ledger")))
	}

	fn harness_with_ledger(ledger: Arc<dyn Provider>) -> Harness {
		let registry = Arc::new(ProviderRegistry::default());
		registry.register(ledger);
		let radix = Arc::new(ScriptedProvider::blockchain("radix-node", "radix"));
		let solana = Arc::new(ScriptedProvider::blockchain("solana-node", "solana"));
		registry.register(radix.clone());
		registry.register(solana.clone());
		registry.register(Arc::new(
			ScriptedProvider::new("prices", &[ProviderCategory::Network])
				.with_price("XRD", 0.05)
				.with_price("SOL", 100.0),
		));

		let observers = Arc::new(ObserverRegistry::new());
		for (chain, node) in [("radix", radix.clone()), ("solana", solana.clone())] {
			observers.register(Arc::new(PollingChainObserver::new(
				chain,
				Arc::new(ProviderChainClient::new(node)),
				ObserverConfig::default(),
			)));
		}

		let config = RouterConfig {
			max_retries: 0,
			attempt_timeout: Duration::from_millis(500),
			..RouterConfig::default()
		};
		let router = Router::new(registry, config).with_observers(observers.clone());
		Harness {
			bridge: Arc::new(BridgeManager::new(router, BridgeConfig::default())),
			radix,
			solana,
			observers,
		}
	}

	fn request(destination_token: &str) -> CreateBridgeOrderRequest {
		CreateBridgeOrderRequest {
			source: BridgeLeg::new("radix", "XRD", "account_rdx1"),
			destination: BridgeLeg::new("solana", destination_token, "So1anaDest"),
			amount: 10.0,
		}
	}

	#[tokio::test]
	async fn test_create_order_quotes_with_price_ratio() {
		let h = harness();
		let cancel = CancellationToken::new();

		let created =
			context::with_identity_id("u1", h.bridge.create_order(request("SOL"), &cancel)).await;
		let order = created.payload().cloned().unwrap();

		assert_eq!(order.status, BridgeOrderStatus::Quoted);
		assert_eq!(order.created_by, "u1");
		assert!((order.exchange_rate.unwrap() - 0.0005).abs() < 1e-12);
		assert!((order.destination_amount.unwrap() - 0.005).abs() < 1e-12);

		let stored = h.bridge.get_order(&order.id, &cancel).await;
		assert_eq!(stored.payload().map(|o| o.status), Some(BridgeOrderStatus::Quoted));
	}

	#[tokio::test]
	async fn test_execute_order_settles() {
		let h = harness();
		let cancel = CancellationToken::new();
		let order = h.bridge.create_order(request("SOL"), &cancel).await.into_result().unwrap();

		let executed = h.bridge.execute_order(&order.id, &cancel).await;
		let order = executed.payload().cloned().unwrap();

		assert_eq!(order.status, BridgeOrderStatus::Settled);
		assert!(order.passed_through(BridgeOrderStatus::Locked));
		assert_eq!(order.lock_tx.as_deref(), Some("radix-node-tx-1"));
		assert_eq!(order.release_tx.as_deref(), Some("solana-node-tx-1"));
		assert_eq!(h.radix.submitted_transactions()[0].to, "oasis-bridge-escrow");
		assert_eq!(h.solana.submitted_transactions()[0].to, "So1anaDest");
	}

	#[tokio::test]
	async fn test_release_failure_refunds_locked_funds() {
		let h = harness();
		let cancel = CancellationToken::new();
		let order = h.bridge.create_order(request("SOL"), &cancel).await.into_result().unwrap();
		h.solana
			.set_always_fail(Some(ProviderError::Unavailable("validator down".to_string())));

		let executed = h.bridge.execute_order(&order.id, &cancel).await;
		assert!(executed.is_error());
		assert!(executed
			.warnings()
			.iter()
			.any(|w| w.contains("refunded after failure")));

		let order = h.bridge.get_order(&order.id, &cancel).await.into_result().unwrap();
		assert_eq!(order.status, BridgeOrderStatus::Refunded);
		assert_eq!(order.refund_tx.as_deref(), Some("radix-node-tx-2"));
		let history: Vec<String> = order
			.history
			.iter()
			.map(|c| format!("{}->{}", c.from, c.to))
			.collect();
		assert_eq!(history, vec!["created->quoted", "quoted->locked", "locked->refunded"]);
		assert!(!order.passed_through(BridgeOrderStatus::Failed));
		assert!(order.failure_reason.unwrap().starts_with("release failed"));
	}

	#[tokio::test]
	async fn test_failed_refund_stays_locked_and_can_be_retried() {
		let h = harness();
		let cancel = CancellationToken::new();
		let order = h.bridge.create_order(request("SOL"), &cancel).await.into_result().unwrap();
		h.bridge.lock_funds(&order.id, &cancel).await.into_result().unwrap();
		h.solana
			.set_always_fail(Some(ProviderError::Unavailable("validator down".to_string())));
		h.radix
			.set_always_fail(Some(ProviderError::Unavailable("node down".to_string())));

		let executed = h.bridge.execute_order(&order.id, &cancel).await;
		assert!(executed.is_error());
		assert!(executed
			.warnings()
			.iter()
			.any(|w| w.contains("funds remain locked")));

		let stuck = h.bridge.get_order(&order.id, &cancel).await.into_result().unwrap();
		assert_eq!(stuck.status, BridgeOrderStatus::Locked);
		assert!(stuck.failure_reason.as_deref().unwrap().contains("refund failed"));

		let failed = h.bridge.fail_order(&order.id, "give up", &cancel).await;
		assert_eq!(failed.error_kind(), Some(ErrorKind::InvalidState));

		h.radix.set_always_fail(None);
		let refunded = h.bridge.refund_order(&order.id, &cancel).await.into_result().unwrap();
		assert_eq!(refunded.status, BridgeOrderStatus::Refunded);
		assert!(!refunded.passed_through(BridgeOrderStatus::Failed));
	}

	#[tokio::test]
	async fn test_release_save_is_retried_without_resubmitting() {
		let h = harness_with_ledger(Arc::new(FlakyLedger::new("released", 2)));
		let cancel = CancellationToken::new();
		let order = h.bridge.create_order(request("SOL"), &cancel).await.into_result().unwrap();

		let settled = h.bridge.execute_order(&order.id, &cancel).await.into_result().unwrap();
		assert_eq!(settled.status, BridgeOrderStatus::Settled);
		assert_eq!(h.solana.submitted_transactions().len(), 1);
		assert_eq!(h.radix.submitted_transactions().len(), 1);
	}

	#[tokio::test]
	async fn test_unsaved_release_is_never_submitted_twice() {
		let h = harness_with_ledger(Arc::new(FlakyLedger::new(
			"released",
			BRIDGE_SAVE_ATTEMPTS_AFTER_SUBMIT,
		)));
		let cancel = CancellationToken::new();
		let order = h.bridge.create_order(request("SOL"), &cancel).await.into_result().unwrap();

		let first = h.bridge.execute_order(&order.id, &cancel).await;
		assert_eq!(first.error_kind(), Some(ErrorKind::Transient));
		assert!(first.message().contains("solana-node-tx-1"));
		assert_eq!(h.radix.submitted_transactions().len(), 1);

		let second = h.bridge.execute_order(&order.id, &cancel).await.into_result().unwrap();
		assert_eq!(second.status, BridgeOrderStatus::Settled);
		assert_eq!(second.release_tx.as_deref(), Some("solana-node-tx-1"));
		assert_eq!(h.solana.submitted_transactions().len(), 1);
		assert_eq!(h.radix.submitted_transactions().len(), 1);
		assert!(h.bridge.unsaved.is_empty());
	}

	#[tokio::test]
	async fn test_order_locks_are_released() {
		let h = harness();
		let cancel = CancellationToken::new();
		let order = h.bridge.create_order(request("SOL"), &cancel).await.into_result().unwrap();
		h.bridge.execute_order(&order.id, &cancel).await.into_result().unwrap();
		h.bridge.check_order_balance(&order.id, &cancel).await;

		assert!(h.bridge.locks.is_empty());
	}

	#[tokio::test]
	async fn test_quote_failure_leaves_order_created() {
		let h = harness();
		let cancel = CancellationToken::new();

		let created = h.bridge.create_order(request("DOGE"), &cancel).await;
		assert_eq!(created.error_kind(), Some(ErrorKind::Permanent));
		assert!(created.message().contains("DOGE"));

		let warning = created
			.warnings()
			.iter()
			.find(|w| w.contains("remains created"))
			.cloned()
			.unwrap();
		let order_id = warning.split_whitespace().nth(1).unwrap();
		let order = h.bridge.get_order(order_id, &cancel).await.into_result().unwrap();
		assert_eq!(order.status, BridgeOrderStatus::Created);
	}

	#[tokio::test]
	async fn test_create_order_rejects_unusable_chains() {
		let h = harness();
		let cancel = CancellationToken::new();

		let mut unknown = request("SOL");
		unknown.destination.chain = "cardano".to_string();
		let result = h.bridge.create_order(unknown, &cancel).await;
		assert_eq!(result.error_kind(), Some(ErrorKind::NotFound));

		let mut same_chain = request("SOL");
		same_chain.destination.chain = "Radix".to_string();
		let result = h.bridge.create_order(same_chain, &cancel).await;
		assert_eq!(result.error_kind(), Some(ErrorKind::Permanent));
	}

	#[tokio::test]
	async fn test_unhealthy_observer_blocks_new_orders() {
		let h = harness();
		h.solana
			.set_always_fail(Some(ProviderError::Network("unreachable".to_string())));
		let observer = PollingChainObserver::new(
			"solana",
			Arc::new(ProviderChainClient::new(h.solana.clone())),
			ObserverConfig::default(),
		);
		let mut health = observer.watch_health();
		observer.start_monitoring(&CancellationToken::new()).await;
		health
			.wait_for(|s| s.state == ObserverState::Error)
			.await
			.unwrap();
		h.observers.register(Arc::new(observer.clone()));

		let result = h
			.bridge
			.create_order(request("SOL"), &CancellationToken::new())
			.await;
		assert_eq!(result.error_kind(), Some(ErrorKind::Transient));
		observer.stop_monitoring(&CancellationToken::new()).await;
	}

	#[tokio::test]
	async fn test_out_of_order_stage_is_invalid_state() {
		let h = harness();
		let cancel = CancellationToken::new();
		let order = h.bridge.create_order(request("SOL"), &cancel).await.into_result().unwrap();

		let settled = h.bridge.settle_order(&order.id, &cancel).await;
		assert_eq!(settled.error_kind(), Some(ErrorKind::InvalidState));

		let refunded = h.bridge.refund_order(&order.id, &cancel).await;
		assert_eq!(refunded.error_kind(), Some(ErrorKind::InvalidState));

		let missing = h.bridge.lock_funds("no-such-order", &cancel).await;
		assert_eq!(missing.error_kind(), Some(ErrorKind::NotFound));
	}

	#[tokio::test]
	async fn test_concurrent_locks_apply_once() {
		let h = harness();
		let cancel = CancellationToken::new();
		let order = h.bridge.create_order(request("SOL"), &cancel).await.into_result().unwrap();

		let first = {
			let bridge = h.bridge.clone();
			let id = order.id.clone();
			tokio::spawn(async move { bridge.lock_funds(&id, &CancellationToken::new()).await })
		};
		let second = {
			let bridge = h.bridge.clone();
			let id = order.id.clone();
			tokio::spawn(async move { bridge.lock_funds(&id, &CancellationToken::new()).await })
		};
		let results = [first.await.unwrap(), second.await.unwrap()];

		assert_eq!(results.iter().filter(|r| r.is_success()).count(), 1);
		assert_eq!(
			results.iter().filter_map(|r| r.error_kind()).collect::<Vec<_>>(),
			vec![ErrorKind::InvalidState]
		);
		assert_eq!(h.radix.submitted_transactions().len(), 1);
	}

	#[tokio::test]
	async fn test_balance_check_does_not_change_status() {
		let h = harness();
		let cancel = CancellationToken::new();
		let order = h.bridge.create_order(request("SOL"), &cancel).await.into_result().unwrap();
		h.solana.set_balance("So1anaDest", 0.01);

		let check = h.bridge.check_order_balance(&order.id, &cancel).await;
		let check = check.payload().cloned().unwrap();
		assert!(check.sufficient);
		assert_eq!(check.observed_balance, 0.01);

		let order = h.bridge.get_order(&order.id, &cancel).await.into_result().unwrap();
		assert_eq!(order.status, BridgeOrderStatus::Quoted);
		assert_eq!(order.balance_checks.len(), 1);
	}

	#[tokio::test]
	async fn test_exchange_rate_for_unknown_symbol() {
		let h = harness();
		let cancel = CancellationToken::new();

		let rate = h.bridge.get_exchange_rate("SOL", "XRD", &cancel).await;
		assert_eq!(rate.payload(), Some(&2000.0));

		let unknown = h.bridge.get_exchange_rate("NOPE", "XRD", &cancel).await;
		assert_eq!(unknown.error_kind(), Some(ErrorKind::Permanent));
		assert!(unknown.message().contains("symbol not supported"));
	}
}
