//! Error taxonomy shared by every component
//!
//! `ProviderError` is what an adapter reports for a single call. The router
//! classifies it (transient vs permanent) and everything above the router
//! speaks `OasisError`, which maps one-to-one onto the envelope's `ErrorKind`.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Result alias used by internal helpers before conversion into an envelope
pub type OasisResult<T> = Result<T, OasisError>;

/// Result alias for provider adapter calls
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Coarse error classification carried on every error envelope
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
	NotFound,
	Transient,
	Permanent,
	Exhausted,
	Cancelled,
	CycleDetected,
	VersionConflict,
	InvalidState,
}

/// Failure reported by a provider adapter for one invocation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ProviderError {
	#[error("timeout after {timeout_ms}ms")]
	Timeout { timeout_ms: u64 },

	#[error("rate limited by provider {provider_id}")]
	RateLimited { provider_id: String },

	#[error("network error: {0}")]
	Network(String),

	#[error("provider unavailable: {0}")]
	Unavailable(String),

	#[error("invalid input: {0}")]
	InvalidInput(String),

	#[error("unauthorized: {0}")]
	Unauthorized(String),

	#[error("unsupported operation: {operation} for provider {provider_id}")]
	UnsupportedOperation {
		operation: String,
		provider_id: String,
	},

	#[error("symbol not supported: {0}")]
	SymbolNotSupported(String),

	#[error("not found: {0}")]
	NotFound(String),

	#[error("serialization error: {0}")]
	Serialization(String),
}

impl ProviderError {
	/// Failures worth retrying against the same provider
	pub fn is_transient(&self) -> bool {
		matches!(
			self,
			ProviderError::Timeout { .. }
				| ProviderError::RateLimited { .. }
				| ProviderError::Network(_)
				| ProviderError::Unavailable(_)
		)
	}

	/// Permanent failures caused by the request itself; no other provider can
	/// do better, so the router stops immediately.
	pub fn is_fatal_for_request(&self) -> bool {
		matches!(
			self,
			ProviderError::InvalidInput(_)
				| ProviderError::Unauthorized(_)
				| ProviderError::SymbolNotSupported(_)
				| ProviderError::Serialization(_)
		)
	}

	/// Short human-readable reason used in failover warnings
	pub fn reason(&self) -> String {
		match self {
			ProviderError::Timeout { .. } => "timeout".to_string(),
			ProviderError::RateLimited { .. } => "rate limited".to_string(),
			ProviderError::Network(msg) => format!("network error ({})", msg),
			ProviderError::Unavailable(msg) => format!("unavailable ({})", msg),
			ProviderError::InvalidInput(msg) => format!("invalid input ({})", msg),
			ProviderError::Unauthorized(_) => "unauthorized".to_string(),
			ProviderError::UnsupportedOperation { operation, .. } => {
				format!("unsupported operation {}", operation)
			},
			ProviderError::SymbolNotSupported(symbol) => format!("symbol not supported {}", symbol),
			ProviderError::NotFound(what) => format!("not found ({})", what),
			ProviderError::Serialization(msg) => format!("serialization error ({})", msg),
		}
	}

	/// Create an HTTP failure error from a response status code
	pub fn from_http_status(status_code: u16, provider_id: &str) -> Self {
		match status_code {
			400 | 422 => ProviderError::InvalidInput(format!("HTTP {}", status_code)),
			401 | 403 => ProviderError::Unauthorized(format!("HTTP {}", status_code)),
			404 => ProviderError::NotFound(format!("HTTP {}", status_code)),
			408 | 504 => ProviderError::Timeout { timeout_ms: 0 },
			429 => ProviderError::RateLimited {
				provider_id: provider_id.to_string(),
			},
			500..=599 => ProviderError::Unavailable(format!("HTTP {}", status_code)),
			_ => ProviderError::Network(format!("HTTP {}", status_code)),
		}
	}
}

impl From<serde_json::Error> for ProviderError {
	fn from(e: serde_json::Error) -> Self {
		ProviderError::Serialization(e.to_string())
	}
}

/// One provider's failure inside an aggregated exhausted error
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ProviderFailure {
	pub provider_id: String,
	pub reason: String,
	pub attempts: u32,
}

/// Error taxonomy for every public operation
#[derive(Error, Debug, Clone, PartialEq)]
pub enum OasisError {
	#[error("{entity} not found: {id}")]
	NotFound { entity: String, id: String },

	#[error("transient failure: {0}")]
	Transient(String),

	#[error("{0}")]
	Permanent(String),

	#[error("all providers failed: {}", format_failures(.failures, .context))]
	Exhausted {
		context: String,
		failures: Vec<ProviderFailure>,
	},

	#[error("operation cancelled")]
	Cancelled,

	#[error("circular dependency: {}", .cycle.join(" -> "))]
	CycleDetected { cycle: Vec<String> },

	#[error("version conflict for {package}: {}", .required.join(", "))]
	VersionConflict {
		package: String,
		required: Vec<String>,
	},

	#[error("invalid state: {0}")]
	InvalidState(String),
}

fn format_failures(failures: &[ProviderFailure], context: &str) -> String {
	if failures.is_empty() {
		return context.to_string();
	}
	failures
		.iter()
		.map(|f| format!("{}: {}", f.provider_id, f.reason))
		.collect::<Vec<_>>()
		.join("; ")
}

impl OasisError {
	pub fn kind(&self) -> ErrorKind {
		match self {
			OasisError::NotFound { .. } => ErrorKind::NotFound,
			OasisError::Transient(_) => ErrorKind::Transient,
			OasisError::Permanent(_) => ErrorKind::Permanent,
			OasisError::Exhausted { .. } => ErrorKind::Exhausted,
			OasisError::Cancelled => ErrorKind::Cancelled,
			OasisError::CycleDetected { .. } => ErrorKind::CycleDetected,
			OasisError::VersionConflict { .. } => ErrorKind::VersionConflict,
			OasisError::InvalidState(_) => ErrorKind::InvalidState,
		}
	}

	pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
		OasisError::NotFound {
			entity: entity.into(),
			id: id.into(),
		}
	}

	pub fn permanent(message: impl Into<String>) -> Self {
		OasisError::Permanent(message.into())
	}

	/// Rebuild an error from an envelope's kind and message
	pub fn from_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
		let message = message.into();
		match kind {
			ErrorKind::NotFound => OasisError::NotFound {
				entity: "resource".to_string(),
				id: message,
			},
			ErrorKind::Transient => OasisError::Transient(message),
			ErrorKind::Permanent => OasisError::Permanent(message),
			ErrorKind::Exhausted => OasisError::Exhausted {
				context: message,
				failures: Vec::new(),
			},
			ErrorKind::Cancelled => OasisError::Cancelled,
			ErrorKind::CycleDetected => OasisError::CycleDetected {
				cycle: vec![message],
			},
			ErrorKind::VersionConflict => OasisError::VersionConflict {
				package: message,
				required: Vec::new(),
			},
			ErrorKind::InvalidState => OasisError::InvalidState(message),
		}
	}
}

impl From<ProviderError> for OasisError {
	fn from(e: ProviderError) -> Self {
		match &e {
			ProviderError::NotFound(what) => OasisError::not_found("entity", what.clone()),
			_ if e.is_transient() => OasisError::Transient(e.to_string()),
			_ => OasisError::Permanent(e.to_string()),
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[test]
	fn test_transient_classification() {
		assert!(ProviderError::Timeout { timeout_ms: 10 }.is_transient());
		assert!(ProviderError::RateLimited {
			provider_id: "a".to_string()
		}
		.is_transient());
		assert!(!ProviderError::InvalidInput("bad".to_string()).is_transient());
		assert!(ProviderError::InvalidInput("bad".to_string()).is_fatal_for_request());
		assert!(!ProviderError::UnsupportedOperation {
			operation: "read_blob".to_string(),
			provider_id: "a".to_string()
		}
		.is_fatal_for_request());
	}

	#[test]
	fn test_http_status_mapping() {
		assert!(ProviderError::from_http_status(429, "p").is_transient());
		assert!(ProviderError::from_http_status(503, "p").is_transient());
		assert!(ProviderError::from_http_status(401, "p").is_fatal_for_request());
		assert_eq!(
			ProviderError::from_http_status(404, "p"),
			ProviderError::NotFound("HTTP 404".to_string())
		);
	}

	#[test]
	fn test_exhausted_message_lists_providers() {
		let error = OasisError::Exhausted {
			context: "store_entity".to_string(),
			failures: vec![
				ProviderFailure {
					provider_id: "a".to_string(),
					reason: "timeout".to_string(),
					attempts: 3,
				},
				ProviderFailure {
					provider_id: "b".to_string(),
					reason: "unauthorized".to_string(),
					attempts: 1,
				},
			],
		};
		assert_eq!(
			error.to_string(),
			"all providers failed: a: timeout; b: unauthorized"
		);
		assert_eq!(error.kind(), ErrorKind::Exhausted);
	}

	#[test]
	fn test_cycle_message() {
		let error = OasisError::CycleDetected {
			cycle: vec!["a".to_string(), "b".to_string(), "a".to_string()],
		};
		assert_eq!(error.to_string(), "circular dependency: a -> b -> a");
	}
}
