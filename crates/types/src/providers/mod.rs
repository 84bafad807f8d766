//! Provider domain model and capability trait

pub mod models;
pub mod traits;

pub use models::{ProviderCategory, ProviderInfo, ProviderStats};
pub use traits::Provider;
