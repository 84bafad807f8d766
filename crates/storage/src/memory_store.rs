//! In-memory storage provider using DashMap

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use oasis_types::{Provider, ProviderCategory, ProviderError, ProviderInfo, ProviderResult};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tracing::{debug, info};

/// Storage entry with its last write time
#[derive(Debug, Clone)]
struct Stored<T> {
	value: T,
	updated_at: DateTime<Utc>,
}

/// Entity and blob store living in the process
///
/// Serves the storage category; clones share the same maps.
#[derive(Debug, Clone)]
pub struct MemoryStore {
	info: ProviderInfo,
	entities: Arc<DashMap<String, Stored<serde_json::Value>>>,
	blobs: Arc<DashMap<String, Stored<Vec<u8>>>>,
	active: Arc<AtomicBool>,
}

/// Counts of what the store currently holds
#[derive(Debug, Clone, PartialEq)]
pub struct StorageStats {
	pub entities: usize,
	pub blobs: usize,
	pub blob_bytes: usize,
	pub last_write: Option<DateTime<Utc>>,
}

impl MemoryStore {
	pub fn new(id: &str) -> Self {
		Self::with_info(ProviderInfo::new(id, "In-memory store", [ProviderCategory::Storage]))
	}

	/// Build from a configured descriptor; the storage category is always added
	pub fn with_info(mut info: ProviderInfo) -> Self {
		info.categories.insert(ProviderCategory::Storage);
		Self {
			info,
			entities: Arc::new(DashMap::new()),
			blobs: Arc::new(DashMap::new()),
			active: Arc::new(AtomicBool::new(true)),
		}
	}

	pub fn is_active(&self) -> bool {
		self.active.load(Ordering::SeqCst)
	}

	/// Keys of stored entities starting with `prefix`
	pub fn entity_keys(&self, prefix: &str) -> Vec<String> {
		let mut keys: Vec<String> = self
			.entities
			.iter()
			.filter(|entry| entry.key().starts_with(prefix))
			.map(|entry| entry.key().clone())
			.collect();
		keys.sort();
		keys
	}

	pub fn stats(&self) -> StorageStats {
		let entity_write = self.entities.iter().map(|e| e.value().updated_at).max();
		let blob_write = self.blobs.iter().map(|e| e.value().updated_at).max();

		StorageStats {
			entities: self.entities.len(),
			blobs: self.blobs.len(),
			blob_bytes: self.blobs.iter().map(|e| e.value().value.len()).sum(),
			last_write: entity_write.max(blob_write),
		}
	}

	fn ensure_active(&self) -> ProviderResult<()> {
		if self.is_active() {
			Ok(())
		} else {
			Err(ProviderError::Unavailable(format!(
				"{} is deactivated",
				self.info.id
			)))
		}
	}
}

#[async_trait]
impl Provider for MemoryStore {
	fn info(&self) -> &ProviderInfo {
		&self.info
	}

	async fn activate(&self) -> ProviderResult<()> {
		if !self.active.swap(true, Ordering::SeqCst) {
			info!(provider_id = %self.info.id, "Memory store activated");
		}
		Ok(())
	}

	async fn deactivate(&self) -> ProviderResult<()> {
		if self.active.swap(false, Ordering::SeqCst) {
			info!(provider_id = %self.info.id, "Memory store deactivated");
		}
		Ok(())
	}

	async fn health_check(&self) -> ProviderResult<bool> {
		Ok(self.is_active())
	}

	async fn store_entity(&self, key: &str, value: &serde_json::Value) -> ProviderResult<()> {
		self.ensure_active()?;
		debug!(provider_id = %self.info.id, key, "Storing entity");
		self.entities.insert(
			key.to_string(),
			Stored {
				value: value.clone(),
				updated_at: Utc::now(),
			},
		);
		Ok(())
	}

	async fn read_entity(&self, key: &str) -> ProviderResult<serde_json::Value> {
		self.ensure_active()?;
		self.entities
			.get(key)
			.map(|entry| entry.value.clone())
			.ok_or_else(|| ProviderError::NotFound(key.to_string()))
	}

	async fn delete_entity(&self, key: &str) -> ProviderResult<()> {
		self.ensure_active()?;
		self.entities
			.remove(key)
			.map(|_| ())
			.ok_or_else(|| ProviderError::NotFound(key.to_string()))
	}

	async fn store_blob(&self, key: &str, data: &[u8]) -> ProviderResult<()> {
		self.ensure_active()?;
		debug!(provider_id = %self.info.id, key, bytes = data.len(), "Storing blob");
		self.blobs.insert(
			key.to_string(),
			Stored {
				value: data.to_vec(),
				updated_at: Utc::now(),
			},
		);
		Ok(())
	}

	async fn read_blob(&self, key: &str) -> ProviderResult<Vec<u8>> {
		self.ensure_active()?;
		self.blobs
			.get(key)
			.map(|entry| entry.value.clone())
			.ok_or_else(|| ProviderError::NotFound(key.to_string()))
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use serde_json::json;

	#[tokio::test]
	async fn test_entity_round_trip_and_delete() {
		let store = MemoryStore::new("memory");
		store.store_entity("avatars/1", &json!({"name": "david"})).await.unwrap();

		assert_eq!(
			store.read_entity("avatars/1").await.unwrap(),
			json!({"name": "david"})
		);
		store.delete_entity("avatars/1").await.unwrap();
		assert_eq!(
			store.read_entity("avatars/1").await,
			Err(ProviderError::NotFound("avatars/1".to_string()))
		);
	}

	#[tokio::test]
	async fn test_blob_storage_and_stats() {
		let store = MemoryStore::new("memory");
		store.store_blob("artifacts/a", &[1, 2, 3]).await.unwrap();
		store.store_entity("x", &json!(1)).await.unwrap();

		assert_eq!(store.read_blob("artifacts/a").await.unwrap(), vec![1, 2, 3]);
		let stats = store.stats();
		assert_eq!(stats.blobs, 1);
		assert_eq!(stats.blob_bytes, 3);
		assert_eq!(stats.entities, 1);
		assert!(stats.last_write.is_some());
	}

	#[tokio::test]
	async fn test_deactivated_store_is_unavailable() {
		let store = MemoryStore::new("memory");
		store.deactivate().await.unwrap();
		store.deactivate().await.unwrap();

		assert!(!store.health_check().await.unwrap());
		let error = store.read_entity("k").await.unwrap_err();
		assert!(error.is_transient());

		store.activate().await.unwrap();
		assert!(store.health_check().await.unwrap());
	}

	#[tokio::test]
	async fn test_clones_share_state() {
		let store = MemoryStore::new("memory");
		let clone = store.clone();
		clone.store_entity("bridge_orders/1", &json!({})).await.unwrap();
		clone.store_entity("health/a", &json!({})).await.unwrap();

		assert_eq!(store.entity_keys("bridge_orders/"), vec!["bridge_orders/1".to_string()]);
	}

	#[test]
	fn test_storage_category_is_forced() {
		let store = MemoryStore::with_info(ProviderInfo::new("m", "M", [ProviderCategory::Nft]));
		assert!(store.supports(ProviderCategory::Storage));
		assert!(store.supports(ProviderCategory::Nft));
	}
}
