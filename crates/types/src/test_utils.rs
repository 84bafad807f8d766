//! Test utilities for building providers with scripted behaviour
//!
//! `ScriptedProvider` keeps entities, blobs, balances and prices in memory
//! and can be told to fail a number of calls (or every call) with a given
//! `ProviderError`, so router, bridge and lifecycle tests can exercise retry,
//! failover and replication without a real backend.

use async_trait::async_trait;
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicU32, AtomicU64, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use crate::chain::{
	BlockInfo, TransactionInfo, TransactionReceipt, TransactionRequest, TransactionStatus,
};
use crate::errors::{ProviderError, ProviderResult};
use crate::providers::{Provider, ProviderCategory, ProviderInfo};

#[derive(Debug)]
pub struct ScriptedProvider {
	info: ProviderInfo,
	failures: Mutex<VecDeque<ProviderError>>,
	always_fail: Mutex<Option<ProviderError>>,
	delay: Option<Duration>,
	healthy: AtomicBool,
	calls: AtomicU32,
	height: AtomicU64,
	activations: AtomicU32,
	deactivations: AtomicU32,
	entities: Mutex<HashMap<String, serde_json::Value>>,
	blobs: Mutex<HashMap<String, Vec<u8>>>,
	balances: Mutex<HashMap<String, f64>>,
	prices: Mutex<HashMap<String, f64>>,
	transactions: Mutex<Vec<TransactionRequest>>,
}

impl ScriptedProvider {
	pub fn new(id: &str, categories: &[ProviderCategory]) -> Self {
		Self::from_info(ProviderInfo::new(id, id, categories.iter().copied()))
	}

	pub fn from_info(info: ProviderInfo) -> Self {
		Self {
			info,
			failures: Mutex::new(VecDeque::new()),
			always_fail: Mutex::new(None),
			delay: None,
			healthy: AtomicBool::new(true),
			calls: AtomicU32::new(0),
			height: AtomicU64::new(0),
			activations: AtomicU32::new(0),
			deactivations: AtomicU32::new(0),
			entities: Mutex::new(HashMap::new()),
			blobs: Mutex::new(HashMap::new()),
			balances: Mutex::new(HashMap::new()),
			prices: Mutex::new(HashMap::new()),
			transactions: Mutex::new(Vec::new()),
		}
	}

	/// Storage-only provider
	pub fn storage(id: &str) -> Self {
		Self::new(id, &[ProviderCategory::Storage])
	}

	/// Blockchain provider serving `chain`
	pub fn blockchain(id: &str, chain: &str) -> Self {
		Self::from_info(
			ProviderInfo::new(id, id, [ProviderCategory::Blockchain]).with_chain(chain),
		)
	}

	pub fn with_priority(mut self, priority: u32) -> Self {
		self.info.priority = priority;
		self
	}

	pub fn with_weight(mut self, weight: u32) -> Self {
		self.info.weight = weight.max(1);
		self
	}

	pub fn with_region(mut self, region: &str) -> Self {
		self.info.region = Some(region.to_string());
		self
	}

	pub fn with_cost(mut self, cost: u32) -> Self {
		self.info.cost = cost;
		self
	}

	/// Sleep before answering each operation call
	pub fn with_delay(mut self, delay: Duration) -> Self {
		self.delay = Some(delay);
		self
	}

	/// Fail the next `times` operation calls with `error`
	pub fn fail_times(self, times: usize, error: ProviderError) -> Self {
		self.push_failures(times, error);
		self
	}

	/// Fail every operation call with `error`
	pub fn always_failing(self, error: ProviderError) -> Self {
		self.set_always_fail(Some(error));
		self
	}

	pub fn with_price(self, symbol: &str, price: f64) -> Self {
		self.lock(&self.prices).insert(symbol.to_uppercase(), price);
		self
	}

	pub fn with_balance(self, address: &str, balance: f64) -> Self {
		self.lock(&self.balances).insert(address.to_string(), balance);
		self
	}

	pub fn unhealthy(self) -> Self {
		self.healthy.store(false, Ordering::SeqCst);
		self
	}

	pub fn push_failures(&self, times: usize, error: ProviderError) {
		let mut failures = self.lock(&self.failures);
		for _ in 0..times {
			failures.push_back(error.clone());
		}
	}

	pub fn set_always_fail(&self, error: Option<ProviderError>) {
		*self.lock(&self.always_fail) = error;
	}

	pub fn set_healthy(&self, healthy: bool) {
		self.healthy.store(healthy, Ordering::SeqCst);
	}

	pub fn set_balance(&self, address: &str, balance: f64) {
		self.lock(&self.balances).insert(address.to_string(), balance);
	}

	/// Number of operation calls received, failed ones included
	pub fn calls(&self) -> u32 {
		self.calls.load(Ordering::SeqCst)
	}

	pub fn activations(&self) -> u32 {
		self.activations.load(Ordering::SeqCst)
	}

	pub fn deactivations(&self) -> u32 {
		self.deactivations.load(Ordering::SeqCst)
	}

	pub fn stored_entity(&self, key: &str) -> Option<serde_json::Value> {
		self.lock(&self.entities).get(key).cloned()
	}

	pub fn entity_keys(&self) -> Vec<String> {
		let mut keys: Vec<String> = self.lock(&self.entities).keys().cloned().collect();
		keys.sort();
		keys
	}

	pub fn submitted_transactions(&self) -> Vec<TransactionRequest> {
		self.lock(&self.transactions).clone()
	}

	fn lock<'a, T>(&self, mutex: &'a Mutex<T>) -> std::sync::MutexGuard<'a, T> {
		mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
	}

	async fn begin_call(&self) -> ProviderResult<()> {
		self.calls.fetch_add(1, Ordering::SeqCst);

		if let Some(delay) = self.delay {
			tokio::time::sleep(delay).await;
		}

		if let Some(error) = self.lock(&self.always_fail).clone() {
			return Err(error);
		}
		match self.lock(&self.failures).pop_front() {
			Some(error) => Err(error),
			None => Ok(()),
		}
	}
}

#[async_trait]
impl Provider for ScriptedProvider {
	fn info(&self) -> &ProviderInfo {
		&self.info
	}

	async fn activate(&self) -> ProviderResult<()> {
		self.activations.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn deactivate(&self) -> ProviderResult<()> {
		self.deactivations.fetch_add(1, Ordering::SeqCst);
		Ok(())
	}

	async fn health_check(&self) -> ProviderResult<bool> {
		Ok(self.healthy.load(Ordering::SeqCst))
	}

	async fn store_entity(&self, key: &str, value: &serde_json::Value) -> ProviderResult<()> {
		self.begin_call().await?;
		self.lock(&self.entities).insert(key.to_string(), value.clone());
		Ok(())
	}

	async fn read_entity(&self, key: &str) -> ProviderResult<serde_json::Value> {
		self.begin_call().await?;
		self.lock(&self.entities)
			.get(key)
			.cloned()
			.ok_or_else(|| ProviderError::NotFound(key.to_string()))
	}

	async fn delete_entity(&self, key: &str) -> ProviderResult<()> {
		self.begin_call().await?;
		self.lock(&self.entities)
			.remove(key)
			.map(|_| ())
			.ok_or_else(|| ProviderError::NotFound(key.to_string()))
	}

	async fn store_blob(&self, key: &str, data: &[u8]) -> ProviderResult<()> {
		self.begin_call().await?;
		self.lock(&self.blobs).insert(key.to_string(), data.to_vec());
		Ok(())
	}

	async fn read_blob(&self, key: &str) -> ProviderResult<Vec<u8>> {
		self.begin_call().await?;
		self.lock(&self.blobs)
			.get(key)
			.cloned()
			.ok_or_else(|| ProviderError::NotFound(key.to_string()))
	}

	async fn submit_transaction(
		&self,
		request: &TransactionRequest,
	) -> ProviderResult<TransactionReceipt> {
		if !self.supports(ProviderCategory::Blockchain) {
			return Err(self.unsupported("submit_transaction"));
		}
		self.begin_call().await?;

		let mut transactions = self.lock(&self.transactions);
		transactions.push(request.clone());
		Ok(TransactionReceipt {
			hash: format!("{}-tx-{}", self.info.id, transactions.len()),
			chain: request.chain.clone(),
			status: TransactionStatus::Confirmed,
			block_height: Some(transactions.len() as u64),
		})
	}

	/// Each call advances the tip by one block
	async fn latest_block(&self) -> ProviderResult<BlockInfo> {
		if !self.supports(ProviderCategory::Blockchain) {
			return Err(self.unsupported("latest_block"));
		}
		self.begin_call().await?;

		let height = self.height.fetch_add(1, Ordering::SeqCst) + 1;
		Ok(BlockInfo {
			height,
			hash: format!("{}-block-{}", self.info.id, height),
			parent_hash: (height > 1).then(|| format!("{}-block-{}", self.info.id, height - 1)),
			timestamp: chrono::Utc::now(),
		})
	}

	async fn get_transaction(&self, hash: &str) -> ProviderResult<TransactionInfo> {
		if !self.supports(ProviderCategory::Blockchain) {
			return Err(self.unsupported("get_transaction"));
		}
		self.begin_call().await?;

		let transactions = self.lock(&self.transactions);
		let index = hash
			.rsplit('-')
			.next()
			.and_then(|n| n.parse::<usize>().ok())
			.filter(|n| hash.starts_with(&self.info.id) && *n >= 1 && *n <= transactions.len())
			.ok_or_else(|| ProviderError::NotFound(hash.to_string()))?;
		let request = &transactions[index - 1];
		Ok(TransactionInfo {
			hash: hash.to_string(),
			from: request.from.clone(),
			to: request.to.clone(),
			amount: request.amount,
			token: request.token.clone(),
			status: TransactionStatus::Confirmed,
			block_height: Some(index as u64),
			confirmations: 1,
		})
	}

	async fn query_balance(&self, address: &str, _token: Option<&str>) -> ProviderResult<f64> {
		if !self.supports(ProviderCategory::Blockchain) {
			return Err(self.unsupported("query_balance"));
		}
		self.begin_call().await?;
		Ok(self.lock(&self.balances).get(address).copied().unwrap_or(0.0))
	}

	async fn get_price(&self, symbol: &str, _currency: &str) -> ProviderResult<f64> {
		if !self.supports(ProviderCategory::Network) {
			return Err(self.unsupported("get_price"));
		}
		self.begin_call().await?;
		self.lock(&self.prices)
			.get(&symbol.to_uppercase())
			.copied()
			.ok_or_else(|| ProviderError::SymbolNotSupported(symbol.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn test_scripted_failures_then_success() {
		let provider = ScriptedProvider::storage("a")
			.fail_times(1, ProviderError::Timeout { timeout_ms: 50 });

		let value = serde_json::json!({"n": 1});
		assert!(provider.store_entity("k", &value).await.is_err());
		assert!(provider.store_entity("k", &value).await.is_ok());
		assert_eq!(provider.calls(), 2);
		assert_eq!(provider.read_entity("k").await, Ok(value));
	}

	#[tokio::test]
	async fn test_price_requires_network_category() {
		let provider = ScriptedProvider::storage("a").with_price("XRD", 0.05);
		assert!(matches!(
			provider.get_price("XRD", "USD").await,
			Err(ProviderError::UnsupportedOperation { .. })
		));

		let feed = ScriptedProvider::new("feed", &[ProviderCategory::Network]).with_price("XRD", 0.05);
		assert_eq!(feed.get_price("xrd", "USD").await, Ok(0.05));
		assert_eq!(
			feed.get_price("DOGE", "USD").await,
			Err(ProviderError::SymbolNotSupported("DOGE".to_string()))
		);
	}
}
