//! Blockchain models shared by providers, chain observers and the bridge

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Transfer submitted through a blockchain provider
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionRequest {
	pub chain: String,
	pub from: String,
	pub to: String,
	pub amount: f64,
	/// Token symbol; native token when absent
	pub token: Option<String>,
	pub memo: Option<String>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum TransactionStatus {
	Pending,
	Confirmed,
	Failed,
}

/// Acknowledgement returned once a transaction has been accepted by a chain
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionReceipt {
	pub hash: String,
	pub chain: String,
	pub status: TransactionStatus,
	pub block_height: Option<u64>,
}

/// Transaction as seen by a chain observer
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TransactionInfo {
	pub hash: String,
	pub from: String,
	pub to: String,
	pub amount: f64,
	pub token: Option<String>,
	pub status: TransactionStatus,
	pub block_height: Option<u64>,
	pub confirmations: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct BlockInfo {
	pub height: u64,
	pub hash: String,
	pub parent_hash: Option<String>,
	pub timestamp: DateTime<Utc>,
}

/// Observer state machine
///
/// `Idle -> Monitoring -> Idle` on stop, `Monitoring -> Error -> Monitoring`
/// when a failed poll is followed by a good one.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum ObserverState {
	#[default]
	Idle,
	Monitoring,
	Error,
}

/// Read-only health view of one chain, consumed by provider selection
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainHealthSnapshot {
	pub chain: String,
	pub state: ObserverState,
	pub monitoring: bool,
	pub last_block_height: Option<u64>,
	pub last_block_hash: Option<String>,
	/// Consecutive failed polls; reset by a successful poll
	pub error_count: u32,
	pub last_latency_ms: Option<u64>,
	pub last_updated: Option<DateTime<Utc>>,
}

impl ChainHealthSnapshot {
	pub fn new(chain: impl Into<String>) -> Self {
		Self {
			chain: chain.into(),
			state: ObserverState::Idle,
			monitoring: false,
			last_block_height: None,
			last_block_hash: None,
			error_count: 0,
			last_latency_ms: None,
			last_updated: None,
		}
	}

	/// Whether routing to this chain should be attempted
	///
	/// A chain that is not being monitored has no evidence against it, so only
	/// an observer in the error state rules it out.
	pub fn is_healthy(&self) -> bool {
		self.state != ObserverState::Error
	}
}

/// Current chain state returned by `get_chain_state`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainState {
	pub chain: String,
	pub state: ObserverState,
	pub latest_block: Option<BlockInfo>,
	pub observed_at: DateTime<Utc>,
}

/// Event emitted on an observer's chain event stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ChainEvent {
	NewBlock {
		chain: String,
		block: BlockInfo,
	},
	/// The chain tip moved to a block whose parent is not the previously seen tip
	Reorg {
		chain: String,
		previous: BlockInfo,
		block: BlockInfo,
	},
}

impl ChainEvent {
	pub fn chain(&self) -> &str {
		match self {
			ChainEvent::NewBlock { chain, .. } | ChainEvent::Reorg { chain, .. } => chain,
		}
	}
}

/// Event emitted on an observer's error stream
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ObserverErrorEvent {
	pub chain: String,
	pub message: String,
	pub error_count: u32,
	pub at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceQuote {
	pub symbol: String,
	pub currency: String,
	pub price: f64,
	pub at: DateTime<Utc>,
}

/// Price quote enriched with market data
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PriceFeed {
	pub symbol: String,
	pub currency: String,
	pub price: f64,
	pub change_24h: Option<f64>,
	pub volume_24h: Option<f64>,
	pub market_cap: Option<f64>,
	pub source: String,
	pub at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_fresh_snapshot_is_routable() {
		let mut snapshot = ChainHealthSnapshot::new("radix");
		assert!(snapshot.is_healthy());

		snapshot.state = ObserverState::Error;
		snapshot.error_count = 1;
		assert!(!snapshot.is_healthy());
	}

	#[test]
	fn test_chain_event_serialization() {
		let event = ChainEvent::NewBlock {
			chain: "radix".to_string(),
			block: BlockInfo {
				height: 7,
				hash: "0xabc".to_string(),
				parent_hash: None,
				timestamp: Utc::now(),
			},
		};
		let json = serde_json::to_value(&event).unwrap();
		assert_eq!(json["type"], "new_block");
		assert_eq!(event.chain(), "radix");
	}
}
