//! Policy administration for individual entities.

use idmcore_abac::{EntityPolicies, Flow, Operation};
use idmcore_types::{AttributePath, EntityType, Identity};
use tracing::info;

use crate::error::{IdmError, Result};
use crate::service::IdmCore;

impl IdmCore {
    /// The policy tree of an entity: the top-level policy under `self`, and
    /// every attribute policy (type default or instance override) nested by
    /// path segment.
    ///
    /// Viewing policies is governed by whole-entity read. A denial reports
    /// `NotFound`.
    pub async fn get_entity_policies(
        &self,
        actor: &Identity,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<EntityPolicies> {
        let entity = self.storage.read_entity(entity_id, entity_type).await?;
        self.authorize(actor, &Operation::Read, &entity)
            .await
            .map_err(|err| match err {
                IdmError::Forbidden(_) => {
                    IdmError::NotFound(format!("policies of {entity_type} {entity_id}"))
                }
                other => other,
            })?;
        Ok(self
            .resolver()
            .entity_policies(entity_id, entity_type)
            .await?)
    }

    /// Replaces the instance policy of one attribute path. `actor` needs
    /// write access to the whole entity. Returns the updated policy tree.
    pub async fn set_entity_policy(
        &self,
        actor: &Identity,
        entity_id: &str,
        entity_type: &EntityType,
        attribute: &str,
        flows: Vec<Flow>,
    ) -> Result<EntityPolicies> {
        let path = AttributePath::parse(attribute)?;
        let entity = self.storage.read_entity(entity_id, entity_type).await?;
        self.authorize(actor, &Operation::Write, &entity).await?;

        let count = flows.len();
        self.resolver()
            .set_attribute_policy(entity_id, entity_type, &path, flows)
            .await?;

        if self.audit_enabled {
            info!(
                actor = %actor.id,
                entity_id = %entity_id,
                entity_type = %entity_type,
                attribute = %path,
                flows = count,
                "Attribute policy set"
            );
        }
        Ok(self
            .resolver()
            .entity_policies(entity_id, entity_type)
            .await?)
    }

    /// The flows governing one attribute path: instance override, else type
    /// default, else the nearest ancestor's, else the top-level flows.
    pub async fn get_attribute_policy(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        attribute: &str,
    ) -> Result<Vec<Flow>> {
        let path = AttributePath::parse(attribute)?;
        let effective = self
            .resolver()
            .effective_attribute_policy(entity_id, entity_type, &path)
            .await?;
        Ok(effective.flows)
    }

    /// Seeds an entity with the type-level attribute defaults as instance
    /// policies. Used during bootstrap, before any actor can authorize.
    /// Returns the number of paths written.
    pub async fn set_default_entity_policies(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<usize> {
        Ok(self
            .resolver()
            .set_default_entity_policies(entity_id, entity_type)
            .await?)
    }
}
