//! Policy Administration Point: storage of per-instance policy overrides.
//!
//! Level-4 overrides are keyed by `(entity id, entity type, attribute path)`
//! and persist independently of the entity they describe. The core consumes
//! them through [`PolicyStore`]; [`MemoryPolicyStore`] is the in-process
//! backend and [`CachedPolicyStore`] adds a bounded TTL cache in front of any
//! backend.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{Duration, Utc};
use idmcore_types::{AttributePath, EntityType};
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::debug;

use crate::cache::SieveCache;
use crate::policy::Flow;

/// Errors raised by a policy store backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PolicyStoreError {
    /// The backend could not be reached.
    #[error("Policy store unavailable: {0}")]
    Unavailable(String),

    /// The override was rejected by the backend.
    #[error("Invalid policy override: {0}")]
    InvalidOverride(String),
}

/// Durable storage of per-instance attribute policies.
#[async_trait]
pub trait PolicyStore: Send + Sync {
    /// Returns the override for one exact path, if any.
    async fn get_override(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
    ) -> Result<Option<Vec<Flow>>, PolicyStoreError>;

    /// Stores an override, replacing any prior override for the same path.
    async fn set_override(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
        flows: Vec<Flow>,
    ) -> Result<(), PolicyStoreError>;

    /// Every override stored for one entity.
    async fn overrides_for(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<BTreeMap<AttributePath, Vec<Flow>>, PolicyStoreError>;
}

type EntityKey = (String, EntityType);

// ============================================================================
// In-memory store
// ============================================================================

/// Policy store held in process memory.
#[derive(Debug, Default)]
pub struct MemoryPolicyStore {
    overrides: RwLock<HashMap<EntityKey, BTreeMap<AttributePath, Vec<Flow>>>>,
}

impl MemoryPolicyStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl PolicyStore for MemoryPolicyStore {
    async fn get_override(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
    ) -> Result<Option<Vec<Flow>>, PolicyStoreError> {
        let overrides = self.overrides.read().await;
        Ok(overrides
            .get(&(entity_id.to_string(), entity_type.clone()))
            .and_then(|paths| paths.get(path))
            .cloned())
    }

    async fn set_override(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
        flows: Vec<Flow>,
    ) -> Result<(), PolicyStoreError> {
        if path.is_reserved() {
            return Err(PolicyStoreError::InvalidOverride(format!(
                "attribute '{path}' is reserved"
            )));
        }
        let mut overrides = self.overrides.write().await;
        overrides
            .entry((entity_id.to_string(), entity_type.clone()))
            .or_default()
            .insert(path.clone(), flows);
        Ok(())
    }

    async fn overrides_for(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<BTreeMap<AttributePath, Vec<Flow>>, PolicyStoreError> {
        let overrides = self.overrides.read().await;
        Ok(overrides
            .get(&(entity_id.to_string(), entity_type.clone()))
            .cloned()
            .unwrap_or_default())
    }
}

// ============================================================================
// Cached store
// ============================================================================

type OverrideKey = (String, EntityType, AttributePath);

/// Settings for [`CachedPolicyStore`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CacheSettings {
    pub capacity: usize,
    pub ttl: Duration,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            capacity: 1024,
            ttl: Duration::seconds(300),
        }
    }
}

/// Cached lookups plus the write generation guarding miss fills.
struct CacheState {
    entries: SieveCache<OverrideKey, Option<Vec<Flow>>>,
    /// Bumped by every write and invalidation. A miss fill whose lookup
    /// straddled a bump is dropped instead of cached.
    generation: u64,
}

/// A [`PolicyStore`] that caches single-path lookups (hits and misses) of an
/// inner store. Writes go through to the inner store and invalidate the
/// cached key.
pub struct CachedPolicyStore<S> {
    inner: S,
    state: Mutex<CacheState>,
}

impl<S: PolicyStore> CachedPolicyStore<S> {
    pub fn new(inner: S, settings: CacheSettings) -> Self {
        Self {
            inner,
            state: Mutex::new(CacheState {
                entries: SieveCache::new(settings.capacity, settings.ttl),
                generation: 0,
            }),
        }
    }

    /// Drops every cached override of one entity. Hook for an external
    /// invalidation channel.
    pub async fn invalidate(&self, entity_id: &str, entity_type: &EntityType) -> usize {
        let mut state = self.state.lock().await;
        state.generation = state.generation.wrapping_add(1);
        let removed = state
            .entries
            .remove_where(|(id, ty, _)| id == entity_id && ty == entity_type);
        debug!(entity_id, entity_type = %entity_type, removed, "policy cache invalidated");
        removed
    }

    /// Number of cached lookups.
    pub async fn cached_len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub fn inner(&self) -> &S {
        &self.inner
    }
}

#[async_trait]
impl<S: PolicyStore> PolicyStore for CachedPolicyStore<S> {
    async fn get_override(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
    ) -> Result<Option<Vec<Flow>>, PolicyStoreError> {
        let key = (entity_id.to_string(), entity_type.clone(), path.clone());
        let generation = {
            let mut state = self.state.lock().await;
            if let Some(hit) = state.entries.get(&key, Utc::now()) {
                return Ok(hit);
            }
            state.generation
        };

        let fetched = self.inner.get_override(entity_id, entity_type, path).await?;

        let mut state = self.state.lock().await;
        if state.generation == generation {
            state.entries.insert(key, fetched.clone(), Utc::now());
        } else {
            debug!(
                entity_id,
                entity_type = %entity_type,
                path = %path,
                "policy written during lookup, not caching"
            );
        }
        Ok(fetched)
    }

    async fn set_override(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
        flows: Vec<Flow>,
    ) -> Result<(), PolicyStoreError> {
        self.inner
            .set_override(entity_id, entity_type, path, flows)
            .await?;
        let key = (entity_id.to_string(), entity_type.clone(), path.clone());
        let mut state = self.state.lock().await;
        state.generation = state.generation.wrapping_add(1);
        state.entries.remove(&key);
        Ok(())
    }

    async fn overrides_for(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<BTreeMap<AttributePath, Vec<Flow>>, PolicyStoreError> {
        self.inner.overrides_for(entity_id, entity_type).await
    }
}

#[async_trait]
impl<T: PolicyStore + ?Sized> PolicyStore for Arc<T> {
    async fn get_override(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
    ) -> Result<Option<Vec<Flow>>, PolicyStoreError> {
        (**self).get_override(entity_id, entity_type, path).await
    }

    async fn set_override(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
        flows: Vec<Flow>,
    ) -> Result<(), PolicyStoreError> {
        (**self)
            .set_override(entity_id, entity_type, path, flows)
            .await
    }

    async fn overrides_for(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<BTreeMap<AttributePath, Vec<Flow>>, PolicyStoreError> {
        (**self).overrides_for(entity_id, entity_type).await
    }
}
