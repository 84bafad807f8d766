//! OASIS Adapters
//!
//! Provider registry and the bundled HTTP price feed adapter.

pub mod price_feed;
pub mod registry;

pub use oasis_types::{Provider, ProviderError, ProviderResult};
pub use price_feed::{HttpPriceFeedProvider, PriceFeedConfig};
pub use registry::{ProviderHandle, ProviderHealth, ProviderRegistry};
