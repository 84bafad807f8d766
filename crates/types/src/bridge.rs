//! Cross-chain bridge order model and its state machine

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{OasisError, OasisResult};

/// Lifecycle of a bridge order
///
/// `Created -> Quoted -> Locked -> Released -> Settled`, with `Failed`
/// reachable from every non-terminal state and `Refunded` reachable only
/// from `Locked` or `Released`.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum BridgeOrderStatus {
	Created,
	Quoted,
	Locked,
	Released,
	Settled,
	Failed,
	Refunded,
}

impl BridgeOrderStatus {
	pub fn as_str(&self) -> &'static str {
		match self {
			BridgeOrderStatus::Created => "created",
			BridgeOrderStatus::Quoted => "quoted",
			BridgeOrderStatus::Locked => "locked",
			BridgeOrderStatus::Released => "released",
			BridgeOrderStatus::Settled => "settled",
			BridgeOrderStatus::Failed => "failed",
			BridgeOrderStatus::Refunded => "refunded",
		}
	}

	/// Whether `self -> next` is a legal transition
	pub fn can_transition_to(&self, next: BridgeOrderStatus) -> bool {
		use BridgeOrderStatus::*;

		match (*self, next) {
			(Created, Quoted) | (Quoted, Locked) | (Locked, Released) | (Released, Settled) => true,
			(Locked, Refunded) | (Released, Refunded) => true,
			(Created | Quoted | Locked | Released, Failed) => true,
			_ => false,
		}
	}

	/// No further transition is possible from a terminal state
	pub fn is_terminal(&self) -> bool {
		matches!(
			self,
			BridgeOrderStatus::Settled | BridgeOrderStatus::Refunded | BridgeOrderStatus::Failed
		)
	}
}

impl std::fmt::Display for BridgeOrderStatus {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.write_str(self.as_str())
	}
}

/// One side of a swap
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeLeg {
	pub chain: String,
	pub token: String,
	pub address: String,
}

impl BridgeLeg {
	pub fn new(chain: impl Into<String>, token: impl Into<String>, address: impl Into<String>) -> Self {
		Self {
			chain: chain.into(),
			token: token.into(),
			address: address.into(),
		}
	}
}

/// Input of `create_order`
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CreateBridgeOrderRequest {
	pub source: BridgeLeg,
	pub destination: BridgeLeg,
	pub amount: f64,
}

impl CreateBridgeOrderRequest {
	pub fn validate(&self) -> OasisResult<()> {
		if !self.amount.is_finite() || self.amount <= 0.0 {
			return Err(OasisError::permanent(
				"invalid input: amount must be greater than zero",
			));
		}

		for (side, leg) in [("source", &self.source), ("destination", &self.destination)] {
			if leg.chain.trim().is_empty() {
				return Err(OasisError::permanent(format!(
					"invalid input: {} chain is required",
					side
				)));
			}
			if leg.token.trim().is_empty() {
				return Err(OasisError::permanent(format!(
					"invalid input: {} token is required",
					side
				)));
			}
			if leg.address.trim().is_empty() {
				return Err(OasisError::permanent(format!(
					"invalid input: {} address is required",
					side
				)));
			}
		}

		if self.source.chain.eq_ignore_ascii_case(&self.destination.chain) {
			return Err(OasisError::permanent(
				"invalid input: source and destination chains must differ",
			));
		}

		Ok(())
	}
}

/// Outcome of one balance check against the destination leg
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BalanceCheck {
	pub checked_at: DateTime<Utc>,
	pub chain: String,
	pub address: String,
	pub observed_balance: f64,
	pub expected_amount: f64,
	pub sufficient: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StatusChange {
	pub from: BridgeOrderStatus,
	pub to: BridgeOrderStatus,
	pub at: DateTime<Utc>,
	pub reason: Option<String>,
}

/// A cross-chain swap tracked through its state machine
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BridgeOrder {
	pub id: String,
	pub source: BridgeLeg,
	pub destination: BridgeLeg,
	pub amount: f64,
	pub status: BridgeOrderStatus,

	/// Source-to-destination rate fixed when the order was quoted
	pub exchange_rate: Option<f64>,
	pub destination_amount: Option<f64>,

	pub lock_tx: Option<String>,
	pub release_tx: Option<String>,
	pub refund_tx: Option<String>,

	pub failure_reason: Option<String>,
	pub balance_checks: Vec<BalanceCheck>,
	pub history: Vec<StatusChange>,

	pub created_by: String,
	pub created_at: DateTime<Utc>,
	pub updated_at: DateTime<Utc>,
	pub expires_at: DateTime<Utc>,
}

impl BridgeOrder {
	pub fn new(
		id: impl Into<String>,
		request: CreateBridgeOrderRequest,
		created_by: impl Into<String>,
		expires_at: DateTime<Utc>,
	) -> Self {
		let now = Utc::now();
		Self {
			id: id.into(),
			source: request.source,
			destination: request.destination,
			amount: request.amount,
			status: BridgeOrderStatus::Created,
			exchange_rate: None,
			destination_amount: None,
			lock_tx: None,
			release_tx: None,
			refund_tx: None,
			failure_reason: None,
			balance_checks: Vec::new(),
			history: Vec::new(),
			created_by: created_by.into(),
			created_at: now,
			updated_at: now,
			expires_at,
		}
	}

	/// Funds sit on the source leg and have not been returned
	pub fn funds_locked(&self) -> bool {
		self.lock_tx.is_some() && self.refund_tx.is_none()
	}

	pub fn is_terminal(&self) -> bool {
		self.status.is_terminal()
	}

	pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
		now >= self.expires_at
	}

	/// Apply a transition, rejecting anything the state machine forbids
	pub fn transition(&mut self, next: BridgeOrderStatus, reason: Option<String>) -> OasisResult<()> {
		if !self.status.can_transition_to(next) {
			return Err(OasisError::InvalidState(format!(
				"order {} cannot move from {} to {}",
				self.id, self.status, next
			)));
		}

		let now = Utc::now();
		self.history.push(StatusChange {
			from: self.status,
			to: next,
			at: now,
			reason: reason.clone(),
		});
		if next == BridgeOrderStatus::Failed {
			self.failure_reason = reason;
		}
		self.status = next;
		self.updated_at = now;
		Ok(())
	}

	/// Whether the order ever held `status`
	pub fn passed_through(&self, status: BridgeOrderStatus) -> bool {
		self.status == status || self.history.iter().any(|c| c.from == status || c.to == status)
	}
}
