//! # idmcore-storage: Entity and group storage
//!
//! The access-control core reaches durable data only through [`Storage`].
//! The trait exposes raw CRUD: no authorization, no declassification. Entities
//! are keyed by `(id, type)`, groups by `(group_name, owner)`.
//!
//! [`MemoryStorage`] is the in-process backend used by default and in tests.

use std::collections::BTreeMap;

use async_trait::async_trait;
use idmcore_types::{AttributeCriterion, Attributes, Entity, EntityType, Group};
use thiserror::Error;
use tokio::sync::RwLock;
use tracing::debug;


/// Errors raised by a storage backend.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    /// No record under this key.
    #[error("{kind} '{key}' not found")]
    NotFound { kind: &'static str, key: String },

    /// A record already exists under this key.
    #[error("{kind} '{key}' already exists")]
    AlreadyExists { kind: &'static str, key: String },

    /// The backend could not be reached.
    #[error("Storage unavailable: {0}")]
    Unavailable(String),
}

impl StorageError {
    fn entity_not_found(id: &str, entity_type: &EntityType) -> Self {
        Self::NotFound {
            kind: "entity",
            key: format!("{entity_type} {id}"),
        }
    }

    fn group_not_found(group_name: &str, owner: &str) -> Self {
        Self::NotFound {
            kind: "group",
            key: format!("{group_name} ({owner})"),
        }
    }
}

/// Result type for storage operations.
pub type Result<T> = std::result::Result<T, StorageError>;

/// Raw entity and group persistence.
#[async_trait]
pub trait Storage: Send + Sync {
    /// Stores a new entity. Fails with `AlreadyExists` if `(id, type)` is
    /// taken.
    async fn create_entity(
        &self,
        id: &str,
        entity_type: &EntityType,
        owner: &str,
        attributes: Attributes,
    ) -> Result<Entity>;

    async fn read_entity(&self, id: &str, entity_type: &EntityType) -> Result<Entity>;

    /// Replaces a stored entity, group back-references included.
    async fn update_entity(&self, entity: Entity) -> Result<Entity>;

    async fn delete_entity(&self, id: &str, entity_type: &EntityType) -> Result<()>;

    /// Entities matching every criterion, optionally restricted to one type.
    async fn query_by_attributes(
        &self,
        criteria: &[AttributeCriterion],
        entity_type: Option<&EntityType>,
    ) -> Result<Vec<Entity>>;

    /// Stores a new group. Fails with `AlreadyExists` if
    /// `(group_name, owner)` is taken.
    async fn create_group(&self, group: Group) -> Result<Group>;

    async fn read_group(&self, group_name: &str, owner: &str) -> Result<Group>;

    /// Replaces a stored group, membership included.
    async fn update_group(&self, group: Group) -> Result<Group>;

    async fn delete_group(&self, group_name: &str, owner: &str) -> Result<()>;

    /// Releases backend resources. Further calls may fail.
    async fn disconnect(&self) -> Result<()> {
        Ok(())
    }
}

// ============================================================================
// In-memory backend
// ============================================================================

type EntityKey = (EntityType, String);
type GroupKey = (String, String);

#[derive(Debug, Default)]
struct Tables {
    entities: BTreeMap<EntityKey, Entity>,
    groups: BTreeMap<GroupKey, Group>,
    disconnected: bool,
}

impl Tables {
    fn ensure_connected(&self) -> Result<()> {
        if self.disconnected {
            Err(StorageError::Unavailable("storage disconnected".to_string()))
        } else {
            Ok(())
        }
    }
}

/// Storage held in process memory. Iteration order is by type, then id.
#[derive(Debug, Default)]
pub struct MemoryStorage {
    tables: RwLock<Tables>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entities.
    pub async fn entity_count(&self) -> usize {
        self.tables.read().await.entities.len()
    }
}

#[async_trait]
impl Storage for MemoryStorage {
    async fn create_entity(
        &self,
        id: &str,
        entity_type: &EntityType,
        owner: &str,
        attributes: Attributes,
    ) -> Result<Entity> {
        let mut tables = self.tables.write().await;
        tables.ensure_connected()?;
        let key = (entity_type.clone(), id.to_string());
        if tables.entities.contains_key(&key) {
            return Err(StorageError::AlreadyExists {
                kind: "entity",
                key: format!("{entity_type} {id}"),
            });
        }
        let entity = Entity::new(id, entity_type.clone(), owner, attributes);
        tables.entities.insert(key, entity.clone());
        debug!(entity_id = id, entity_type = %entity_type, "entity stored");
        Ok(entity)
    }

    async fn read_entity(&self, id: &str, entity_type: &EntityType) -> Result<Entity> {
        let tables = self.tables.read().await;
        tables.ensure_connected()?;
        tables
            .entities
            .get(&(entity_type.clone(), id.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::entity_not_found(id, entity_type))
    }

    async fn update_entity(&self, entity: Entity) -> Result<Entity> {
        let mut tables = self.tables.write().await;
        tables.ensure_connected()?;
        let slot = tables
            .entities
            .get_mut(&(entity.entity_type.clone(), entity.id.clone()))
            .ok_or_else(|| StorageError::entity_not_found(&entity.id, &entity.entity_type))?;
        *slot = entity.clone();
        Ok(entity)
    }

    async fn delete_entity(&self, id: &str, entity_type: &EntityType) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.ensure_connected()?;
        tables
            .entities
            .remove(&(entity_type.clone(), id.to_string()))
            .map(|_| ())
            .ok_or_else(|| StorageError::entity_not_found(id, entity_type))
    }

    async fn query_by_attributes(
        &self,
        criteria: &[AttributeCriterion],
        entity_type: Option<&EntityType>,
    ) -> Result<Vec<Entity>> {
        let tables = self.tables.read().await;
        tables.ensure_connected()?;
        Ok(tables
            .entities
            .values()
            .filter(|e| entity_type.is_none_or(|t| *t == e.entity_type))
            .filter(|e| criteria.iter().all(|c| c.matches(e)))
            .cloned()
            .collect())
    }

    async fn create_group(&self, group: Group) -> Result<Group> {
        let mut tables = self.tables.write().await;
        tables.ensure_connected()?;
        let key = (group.group_name.clone(), group.owner.clone());
        if tables.groups.contains_key(&key) {
            return Err(StorageError::AlreadyExists {
                kind: "group",
                key: format!("{} ({})", group.group_name, group.owner),
            });
        }
        tables.groups.insert(key, group.clone());
        Ok(group)
    }

    async fn read_group(&self, group_name: &str, owner: &str) -> Result<Group> {
        let tables = self.tables.read().await;
        tables.ensure_connected()?;
        tables
            .groups
            .get(&(group_name.to_string(), owner.to_string()))
            .cloned()
            .ok_or_else(|| StorageError::group_not_found(group_name, owner))
    }

    async fn update_group(&self, group: Group) -> Result<Group> {
        let mut tables = self.tables.write().await;
        tables.ensure_connected()?;
        let slot = tables
            .groups
            .get_mut(&(group.group_name.clone(), group.owner.clone()))
            .ok_or_else(|| StorageError::group_not_found(&group.group_name, &group.owner))?;
        *slot = group.clone();
        Ok(group)
    }

    async fn delete_group(&self, group_name: &str, owner: &str) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.ensure_connected()?;
        tables
            .groups
            .remove(&(group_name.to_string(), owner.to_string()))
            .map(|_| ())
            .ok_or_else(|| StorageError::group_not_found(group_name, owner))
    }

    async fn disconnect(&self) -> Result<()> {
        self.tables.write().await.disconnected = true;
        debug!("storage disconnected");
        Ok(())
    }
}
