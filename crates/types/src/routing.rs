//! Routed request model
//!
//! A routed request names the operation, the entity key it targets and how a
//! provider should be picked. Its parameter bag stays an open string map, but
//! each operation kind declares the keys it needs and `validate` enforces them
//! before any provider is touched.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

use crate::chain::TransactionRequest;
use crate::errors::{OasisError, OasisResult};
use crate::providers::ProviderCategory;

/// Operation tag carried by every routed request
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum OperationKind {
	StoreEntity,
	ReadEntity,
	DeleteEntity,
	StoreBlob,
	ReadBlob,
	SubmitTransaction,
	QueryBalance,
	GetPrice,
	Custom(String),
}

impl OperationKind {
	pub fn name(&self) -> &str {
		match self {
			OperationKind::StoreEntity => "store_entity",
			OperationKind::ReadEntity => "read_entity",
			OperationKind::DeleteEntity => "delete_entity",
			OperationKind::StoreBlob => "store_blob",
			OperationKind::ReadBlob => "read_blob",
			OperationKind::SubmitTransaction => "submit_transaction",
			OperationKind::QueryBalance => "query_balance",
			OperationKind::GetPrice => "get_price",
			OperationKind::Custom(name) => name,
		}
	}

	/// Category a request of this kind is routed to unless it says otherwise
	pub fn default_category(&self) -> ProviderCategory {
		match self {
			OperationKind::SubmitTransaction | OperationKind::QueryBalance => {
				ProviderCategory::Blockchain
			},
			OperationKind::GetPrice => ProviderCategory::Network,
			_ => ProviderCategory::Storage,
		}
	}

	/// Parameter keys that must be present in the request's bag
	pub fn required_params(&self) -> &'static [&'static str] {
		match self {
			OperationKind::StoreEntity => &["value"],
			OperationKind::SubmitTransaction => &["from", "to", "amount"],
			OperationKind::QueryBalance => &["address"],
			OperationKind::GetPrice => &["symbol"],
			_ => &[],
		}
	}

	/// Whether the request key must name an entity or blob
	pub fn requires_key(&self) -> bool {
		matches!(
			self,
			OperationKind::StoreEntity
				| OperationKind::ReadEntity
				| OperationKind::DeleteEntity
				| OperationKind::StoreBlob
				| OperationKind::ReadBlob
		)
	}
}

impl std::fmt::Display for OperationKind {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.name())
	}
}

/// Ordering applied to the live candidates of a category
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "snake_case")]
pub enum SelectionStrategy {
	/// Configured default, or priority order when the default is itself auto
	#[default]
	Auto,
	Priority,
	RoundRobin,
	WeightedRoundRobin,
	LeastRecentlyUsed,
	Geographic,
	CostBased,
	Performance,
}

impl SelectionStrategy {
	pub fn as_str(&self) -> &'static str {
		match self {
			SelectionStrategy::Auto => "auto",
			SelectionStrategy::Priority => "priority",
			SelectionStrategy::RoundRobin => "round_robin",
			SelectionStrategy::WeightedRoundRobin => "weighted_round_robin",
			SelectionStrategy::LeastRecentlyUsed => "least_recently_used",
			SelectionStrategy::Geographic => "geographic",
			SelectionStrategy::CostBased => "cost_based",
			SelectionStrategy::Performance => "performance",
		}
	}
}

impl std::str::FromStr for SelectionStrategy {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let strategy = match s.to_ascii_lowercase().replace('-', "_").as_str() {
			"auto" => SelectionStrategy::Auto,
			"priority" => SelectionStrategy::Priority,
			"round_robin" => SelectionStrategy::RoundRobin,
			"weighted_round_robin" => SelectionStrategy::WeightedRoundRobin,
			"least_recently_used" | "lru" => SelectionStrategy::LeastRecentlyUsed,
			"geographic" => SelectionStrategy::Geographic,
			"cost_based" | "cost" => SelectionStrategy::CostBased,
			"performance" => SelectionStrategy::Performance,
			other => return Err(format!("unknown selection strategy: {}", other)),
		};
		Ok(strategy)
	}
}

impl std::fmt::Display for SelectionStrategy {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// How many providers a request is executed against
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum DurabilityMode {
	/// One provider, with retry and failover
	#[default]
	Single,
	/// Every live candidate concurrently
	Replicate,
}

/// When a replicated request reports back
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum ReplicationPolicy {
	/// Return on the first successful replica; the rest finish best-effort
	#[default]
	FirstSuccess,
	/// Wait for every replica
	All,
}

/// A request to be routed to one (or, when replicating, several) providers
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoutedRequest {
	pub operation: OperationKind,

	/// Target entity or blob key
	pub key: String,

	pub category: ProviderCategory,

	/// Caller-assigned priority (higher = more urgent); carried for tracing
	pub priority: i32,

	/// When set, only this provider is invoked and auto-selection is skipped
	pub provider_override: Option<String>,

	/// Per-request strategy; the router default applies when absent
	pub strategy: Option<SelectionStrategy>,

	pub durability: DurabilityMode,

	/// Restrict candidates to providers serving this chain
	pub chain: Option<String>,

	pub params: HashMap<String, serde_json::Value>,
}

impl RoutedRequest {
	pub fn new(operation: OperationKind, key: impl Into<String>) -> Self {
		let category = operation.default_category();
		Self {
			operation,
			key: key.into(),
			category,
			priority: 0,
			provider_override: None,
			strategy: None,
			durability: DurabilityMode::Single,
			chain: None,
			params: HashMap::new(),
		}
	}

	pub fn store_entity(key: impl Into<String>, value: serde_json::Value) -> Self {
		Self::new(OperationKind::StoreEntity, key).with_param("value", value)
	}

	pub fn read_entity(key: impl Into<String>) -> Self {
		Self::new(OperationKind::ReadEntity, key)
	}

	pub fn delete_entity(key: impl Into<String>) -> Self {
		Self::new(OperationKind::DeleteEntity, key)
	}

	/// Blob payloads travel beside the request; only their size is recorded
	pub fn store_blob(key: impl Into<String>, size: usize) -> Self {
		Self::new(OperationKind::StoreBlob, key).with_param("size", size as u64)
	}

	pub fn read_blob(key: impl Into<String>) -> Self {
		Self::new(OperationKind::ReadBlob, key)
	}

	/// Transfer routed to providers of the transaction's chain
	pub fn submit_transaction(transaction: &TransactionRequest) -> Self {
		let mut request = Self::new(OperationKind::SubmitTransaction, "")
			.on_chain(transaction.chain.clone())
			.with_param("from", transaction.from.clone())
			.with_param("to", transaction.to.clone())
			.with_param("amount", transaction.amount);
		if let Some(token) = &transaction.token {
			request = request.with_param("token", token.clone());
		}
		if let Some(memo) = &transaction.memo {
			request = request.with_param("memo", memo.clone());
		}
		request
	}

	pub fn query_balance(chain: impl Into<String>, address: impl Into<String>) -> Self {
		Self::new(OperationKind::QueryBalance, "")
			.on_chain(chain)
			.with_param("address", address.into())
	}

	pub fn get_price(symbol: impl Into<String>, currency: impl Into<String>) -> Self {
		Self::new(OperationKind::GetPrice, "")
			.with_param("symbol", symbol.into())
			.with_param("currency", currency.into())
	}

	/// Rebuild the transfer carried by a `SubmitTransaction` request
	pub fn transaction(&self) -> OasisResult<TransactionRequest> {
		let chain = self
			.chain
			.clone()
			.ok_or_else(|| OasisError::permanent("invalid input: transaction requires a chain"))?;
		Ok(TransactionRequest {
			chain,
			from: self.param_str("from")?.to_string(),
			to: self.param_str("to")?.to_string(),
			amount: self.param_f64("amount")?,
			token: self.param_opt_str("token"),
			memo: self.param_opt_str("memo"),
		})
	}

	pub fn with_category(mut self, category: ProviderCategory) -> Self {
		self.category = category;
		self
	}

	pub fn with_priority(mut self, priority: i32) -> Self {
		self.priority = priority;
		self
	}

	pub fn with_provider(mut self, provider_id: impl Into<String>) -> Self {
		self.provider_override = Some(provider_id.into());
		self
	}

	pub fn with_strategy(mut self, strategy: SelectionStrategy) -> Self {
		self.strategy = Some(strategy);
		self
	}

	pub fn replicated(mut self) -> Self {
		self.durability = DurabilityMode::Replicate;
		self
	}

	pub fn on_chain(mut self, chain: impl Into<String>) -> Self {
		self.chain = Some(chain.into());
		self
	}

	pub fn with_param(mut self, key: impl Into<String>, value: impl Into<serde_json::Value>) -> Self {
		self.params.insert(key.into(), value.into());
		self
	}

	pub fn param(&self, key: &str) -> Option<&serde_json::Value> {
		self.params.get(key)
	}

	pub fn param_str(&self, key: &str) -> OasisResult<&str> {
		self.params
			.get(key)
			.and_then(|v| v.as_str())
			.ok_or_else(|| self.invalid_param(key, "a string"))
	}

	pub fn param_opt_str(&self, key: &str) -> Option<String> {
		self.params
			.get(key)
			.and_then(|v| v.as_str())
			.map(str::to_string)
	}

	pub fn param_f64(&self, key: &str) -> OasisResult<f64> {
		self.params
			.get(key)
			.and_then(|v| v.as_f64())
			.ok_or_else(|| self.invalid_param(key, "a number"))
	}

	fn invalid_param(&self, key: &str, expected: &str) -> OasisError {
		OasisError::permanent(format!(
			"invalid input: parameter '{}' of {} must be {}",
			key, self.operation, expected
		))
	}

	/// Check the request's shape for its operation kind
	pub fn validate(&self) -> OasisResult<()> {
		if self.operation.requires_key() && self.key.trim().is_empty() {
			return Err(OasisError::permanent(format!(
				"invalid input: {} requires a non-empty key",
				self.operation
			)));
		}

		if let Some(provider_id) = &self.provider_override {
			if provider_id.trim().is_empty() {
				return Err(OasisError::permanent(
					"invalid input: provider override must not be empty",
				));
			}
		}

		for key in self.operation.required_params() {
			if !self.params.contains_key(*key) {
				return Err(OasisError::permanent(format!(
					"invalid input: {} requires parameter '{}'",
					self.operation, key
				)));
			}
		}

		match self.operation {
			OperationKind::SubmitTransaction => {
				if self.chain.is_none() {
					return Err(OasisError::permanent(
						"invalid input: transaction requires a chain",
					));
				}
				let amount = self.param_f64("amount")?;
				if !amount.is_finite() || amount <= 0.0 {
					return Err(OasisError::permanent(
						"invalid input: transaction amount must be positive",
					));
				}
				self.param_str("to")?;
				self.param_str("from")?;
			},
			OperationKind::QueryBalance => {
				self.param_str("address")?;
			},
			OperationKind::GetPrice => {
				self.param_str("symbol")?;
			},
			_ => {},
		}

		Ok(())
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_default_category_follows_operation() {
		assert_eq!(
			RoutedRequest::new(OperationKind::SubmitTransaction, "").category,
			ProviderCategory::Blockchain
		);
		assert_eq!(
			RoutedRequest::new(OperationKind::ReadBlob, "a").category,
			ProviderCategory::Storage
		);
	}

	#[test]
	fn test_validate_requires_declared_params() {
		let request = RoutedRequest::new(OperationKind::StoreEntity, "avatars/1");
		let error = request.validate().unwrap_err();
		assert!(error.to_string().contains("'value'"));

		let request = request.with_param("value", serde_json::json!({"name": "x"}));
		assert!(request.validate().is_ok());
	}

	#[test]
	fn test_validate_rejects_empty_key() {
		let request = RoutedRequest::new(OperationKind::ReadEntity, "  ");
		assert!(request.validate().is_err());
	}

	#[test]
	fn test_transaction_round_trip_through_params() {
		let transaction = TransactionRequest {
			chain: "radix".to_string(),
			from: "a".to_string(),
			to: "b".to_string(),
			amount: 3.0,
			token: Some("XRD".to_string()),
			memo: None,
		};
		let request = RoutedRequest::submit_transaction(&transaction);
		assert!(request.validate().is_ok());
		assert_eq!(request.category, ProviderCategory::Blockchain);
		assert_eq!(request.transaction().unwrap(), transaction);
	}

	#[test]
	fn test_validate_transaction_amount() {
		let request = RoutedRequest::new(OperationKind::SubmitTransaction, "")
			.on_chain("radix")
			.with_param("from", "a")
			.with_param("to", "b")
			.with_param("amount", -1.0);
		assert!(request.validate().is_err());

		let request = request.with_param("amount", 2.5);
		assert!(request.validate().is_ok());
	}

	#[test]
	fn test_strategy_parsing() {
		assert_eq!(
			"weighted-round-robin".parse::<SelectionStrategy>(),
			Ok(SelectionStrategy::WeightedRoundRobin)
		);
		assert_eq!("lru".parse::<SelectionStrategy>(), Ok(SelectionStrategy::LeastRecentlyUsed));
		assert!("fastest".parse::<SelectionStrategy>().is_err());
	}
}
