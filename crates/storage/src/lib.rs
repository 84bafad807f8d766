//! OASIS Storage
//!
//! In-process storage provider for the OASIS HyperDrive router.

pub mod memory_store;

pub use memory_store::{MemoryStore, StorageStats};
