//! OASIS Types
//!
//! Shared models and traits for the OASIS HyperDrive provider router.
//! This crate contains the result envelope, the error taxonomy and the
//! domain models organized by component.

pub mod bridge;
pub mod caller;
pub mod chain;
pub mod constants;
pub mod envelope;
pub mod errors;
pub mod packages;
pub mod providers;
pub mod routing;

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;

// Re-export chrono and serde_json for convenience
pub use chrono;
pub use serde_json;

pub use envelope::Envelope;
pub use errors::{ErrorKind, OasisError, OasisResult, ProviderError, ProviderFailure, ProviderResult};

pub use providers::{Provider, ProviderCategory, ProviderInfo, ProviderStats};

pub use routing::{DurabilityMode, OperationKind, ReplicationPolicy, RoutedRequest, SelectionStrategy};

pub use caller::{Caller, CallerIdentity, SYSTEM_CALLER_ID};

pub use chain::{
	BlockInfo, ChainEvent, ChainHealthSnapshot, ChainState, ObserverErrorEvent, ObserverState,
	PriceFeed, PriceQuote, TransactionInfo, TransactionReceipt, TransactionRequest,
	TransactionStatus,
};

pub use bridge::{
	BalanceCheck, BridgeLeg, BridgeOrder, BridgeOrderStatus, CreateBridgeOrderRequest, StatusChange,
};

pub use packages::{
	CreatePackageRequest, DependencyEdge, DependencyKind, InstalledPackage, Package, PackageKind,
	PackageSchema, PackageVersion, Version,
};
