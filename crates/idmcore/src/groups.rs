//! Group service.
//!
//! Membership is recorded on both sides: the group lists `(entity_id,
//! entity_type)` members and each member entity lists `{group_name, owner}`
//! back-references. Changes write the group first, then the entity. When the
//! entity write fails the group write is reverted before the error returns.
//! Retrying a partially applied change converges, since neither side ever
//! holds a duplicate.

use idmcore_abac::Operation;
use idmcore_storage::StorageError;
use idmcore_types::{EntityType, Group, Identity, Member};
use tracing::{debug, info, warn};

use crate::error::{IdmError, Result};
use crate::service::IdmCore;

impl IdmCore {
    /// Creates an empty group named `group_name`, owned by `actor`.
    pub async fn create_group(&self, actor: &Identity, group_name: &str) -> Result<Group> {
        if group_name.is_empty() {
            return Err(IdmError::Validation("group name must not be empty".to_string()));
        }
        let group = Group::new(group_name, actor.id.clone());
        self.authorize(actor, &Operation::Create, &group.as_subject())
            .await?;
        let stored = self.storage.create_group(group).await?;

        if self.audit_enabled {
            info!(actor = %actor.id, group = %stored.group_name, "Group created");
        }
        Ok(stored)
    }

    pub async fn read_group(&self, actor: &Identity, group_name: &str, owner: &str) -> Result<Group> {
        let group = self.storage.read_group(group_name, owner).await?;
        self.authorize(actor, &Operation::Read, &group.as_subject())
            .await?;
        Ok(group)
    }

    /// Deletes a group and removes its back-reference from every member.
    pub async fn delete_group(&self, actor: &Identity, group_name: &str, owner: &str) -> Result<()> {
        let group = self.storage.read_group(group_name, owner).await?;
        self.authorize(actor, &Operation::Delete, &group.as_subject())
            .await?;

        let group_ref = group.group_ref();
        for member in &group.entities {
            match self
                .storage
                .read_entity(&member.entity_id, &member.entity_type)
                .await
            {
                Ok(mut entity) => {
                    if entity.remove_group(&group_ref) {
                        self.storage.update_entity(entity).await?;
                    }
                }
                Err(StorageError::NotFound { .. }) => {
                    debug!(
                        entity_id = %member.entity_id,
                        entity_type = %member.entity_type,
                        "member already gone, skipping detach"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.storage.delete_group(group_name, owner).await?;

        if self.audit_enabled {
            info!(
                actor = %actor.id,
                group = %group_name,
                owner = %owner,
                members = group.entities.len(),
                "Group deleted"
            );
        }
        Ok(())
    }

    /// Adds an entity to a group, on both sides.
    ///
    /// Both the group and the entity must exist. `actor` needs write access
    /// to both. Returns the updated group.
    pub async fn add_entity_to_group(
        &self,
        actor: &Identity,
        group_name: &str,
        owner: &str,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<Group> {
        let original = self.storage.read_group(group_name, owner).await?;
        let mut entity = self.storage.read_entity(entity_id, entity_type).await?;

        self.authorize(actor, &Operation::Write, &original.as_subject())
            .await?;
        self.authorize(actor, &Operation::Write, &entity).await?;

        let mut group = original.clone();
        let group_changed = group.add_member(entity.member_key());
        let entity_changed = entity.add_group(group.group_ref());

        if group_changed {
            group = self.storage.update_group(group).await?;
        }
        if entity_changed {
            if let Err(err) = self.storage.update_entity(entity).await {
                if group_changed {
                    self.revert_group(original).await;
                }
                return Err(err.into());
            }
        }

        if self.audit_enabled {
            info!(
                actor = %actor.id,
                group = %group_name,
                owner = %owner,
                entity_id = %entity_id,
                entity_type = %entity_type,
                "Entity added to group"
            );
        }
        Ok(group)
    }

    /// Removes an entity from a group, on both sides.
    ///
    /// The group must exist. Removing an entity that is a member on neither
    /// side is a conflict. A member whose entity no longer exists is removed
    /// from the group alone. Returns the updated group.
    pub async fn remove_entity_from_group(
        &self,
        actor: &Identity,
        group_name: &str,
        owner: &str,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<Group> {
        let original = self.storage.read_group(group_name, owner).await?;
        let entity = match self.storage.read_entity(entity_id, entity_type).await {
            Ok(entity) => Some(entity),
            Err(StorageError::NotFound { .. }) => None,
            Err(e) => return Err(e.into()),
        };

        let group_ref = original.group_ref();
        let member = Member::new(entity_id, entity_type.clone());
        let in_group = original.has_member(&member);
        let in_entity = entity.as_ref().is_some_and(|e| e.is_member_of(&group_ref));
        if !in_group && !in_entity {
            return Err(IdmError::Conflict(format!(
                "{entity_type} {entity_id} is not a member of group '{group_name}' owned by {owner}"
            )));
        }

        self.authorize(actor, &Operation::Write, &original.as_subject())
            .await?;
        if let Some(entity) = &entity {
            self.authorize(actor, &Operation::Write, entity).await?;
        }

        let mut group = original.clone();
        if in_group {
            group.remove_member(&member);
            group = self.storage.update_group(group).await?;
        }
        if let Some(mut entity) = entity.filter(|_| in_entity) {
            entity.remove_group(&group_ref);
            if let Err(err) = self.storage.update_entity(entity).await {
                if in_group {
                    self.revert_group(original).await;
                }
                return Err(err.into());
            }
        }

        if self.audit_enabled {
            info!(
                actor = %actor.id,
                group = %group_name,
                owner = %owner,
                entity_id = %entity_id,
                entity_type = %entity_type,
                "Entity removed from group"
            );
        }
        Ok(group)
    }

    /// Best-effort restore of a group after the entity side of a membership
    /// change failed. The caller reports the original error either way.
    async fn revert_group(&self, original: Group) {
        let group_name = original.group_name.clone();
        if let Err(err) = self.storage.update_group(original).await {
            warn!(
                group = %group_name,
                error = %err,
                "Failed to revert group after membership change; retry the call to reconcile"
            );
        }
    }
}
