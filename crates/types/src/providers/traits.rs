//! Provider capability contract implemented by every backend adapter

use async_trait::async_trait;
use std::collections::BTreeSet;
use std::fmt::Debug;

use super::{ProviderCategory, ProviderInfo};
use crate::chain::{BlockInfo, PriceFeed, TransactionInfo, TransactionReceipt, TransactionRequest};
use crate::errors::{ProviderError, ProviderResult};

/// Uniform provider contract
///
/// A provider declares its capability set through [`ProviderInfo::categories`]
/// and overrides the operations of the categories it serves. Every operation
/// it does not override reports `UnsupportedOperation`, so the router can treat
/// all providers the same way without knowing any of them by name.
#[async_trait]
pub trait Provider: Send + Sync + Debug {
	/// Static descriptor; the only required method besides the ones a
	/// provider's categories call for
	fn info(&self) -> &ProviderInfo;

	fn id(&self) -> &str {
		&self.info().id
	}

	fn categories(&self) -> &BTreeSet<ProviderCategory> {
		&self.info().categories
	}

	fn supports(&self, category: ProviderCategory) -> bool {
		self.info().supports(category)
	}

	/// Bring the backend up. Must be idempotent.
	async fn activate(&self) -> ProviderResult<()> {
		Ok(())
	}

	/// Release backend resources. Must be idempotent.
	async fn deactivate(&self) -> ProviderResult<()> {
		Ok(())
	}

	/// Lightweight liveness probe used by the health monitor
	async fn health_check(&self) -> ProviderResult<bool> {
		Ok(true)
	}

	async fn store_entity(&self, _key: &str, _value: &serde_json::Value) -> ProviderResult<()> {
		Err(self.unsupported("store_entity"))
	}

	async fn read_entity(&self, _key: &str) -> ProviderResult<serde_json::Value> {
		Err(self.unsupported("read_entity"))
	}

	async fn delete_entity(&self, _key: &str) -> ProviderResult<()> {
		Err(self.unsupported("delete_entity"))
	}

	async fn store_blob(&self, _key: &str, _data: &[u8]) -> ProviderResult<()> {
		Err(self.unsupported("store_blob"))
	}

	async fn read_blob(&self, _key: &str) -> ProviderResult<Vec<u8>> {
		Err(self.unsupported("read_blob"))
	}

	/// Submit an on-chain transfer
	async fn submit_transaction(
		&self,
		_request: &TransactionRequest,
	) -> ProviderResult<TransactionReceipt> {
		Err(self.unsupported("submit_transaction"))
	}

	/// Balance of `address` in `token` (native token when `None`)
	async fn query_balance(&self, _address: &str, _token: Option<&str>) -> ProviderResult<f64> {
		Err(self.unsupported("query_balance"))
	}

	/// Current chain tip
	async fn latest_block(&self) -> ProviderResult<BlockInfo> {
		Err(self.unsupported("latest_block"))
	}

	async fn get_transaction(&self, _hash: &str) -> ProviderResult<TransactionInfo> {
		Err(self.unsupported("get_transaction"))
	}

	/// Spot price of `symbol` quoted in `currency`
	async fn get_price(&self, _symbol: &str, _currency: &str) -> ProviderResult<f64> {
		Err(self.unsupported("get_price"))
	}

	/// Price with market data; providers without market data report the
	/// spot price alone
	async fn get_price_feed(&self, symbol: &str, currency: &str) -> ProviderResult<PriceFeed> {
		let price = self.get_price(symbol, currency).await?;
		Ok(PriceFeed {
			symbol: symbol.to_uppercase(),
			currency: currency.to_uppercase(),
			price,
			change_24h: None,
			volume_24h: None,
			market_cap: None,
			source: self.id().to_string(),
			at: chrono::Utc::now(),
		})
	}

	fn unsupported(&self, operation: &str) -> ProviderError {
		ProviderError::UnsupportedOperation {
			operation: operation.to_string(),
			provider_id: self.id().to_string(),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[derive(Debug)]
	struct NullProvider {
		info: ProviderInfo,
	}

	#[async_trait]
	impl Provider for NullProvider {
		fn info(&self) -> &ProviderInfo {
			&self.info
		}
	}

	#[tokio::test]
	async fn test_default_operations_are_unsupported() {
		let provider = NullProvider {
			info: ProviderInfo::new("null", "Null", [ProviderCategory::Storage]),
		};

		assert!(provider.activate().await.is_ok());
		assert_eq!(
			provider.read_blob("k").await,
			Err(ProviderError::UnsupportedOperation {
				operation: "read_blob".to_string(),
				provider_id: "null".to_string(),
			})
		);
		assert!(provider.supports(ProviderCategory::Storage));
	}
}
