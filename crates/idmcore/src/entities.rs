//! Entity service: create, read, update-attribute, delete and search.

use idmcore_abac::Operation;
use idmcore_storage::StorageError;
use idmcore_types::{
    AttributeCriterion, AttributePath, Attributes, Entity, EntityType, Identity, TypesError,
    strip_reserved,
};
use serde_json::Value;
use tracing::{debug, info};

use crate::error::{IdmError, Result};
use crate::service::IdmCore;

impl IdmCore {
    /// Creates an entity owned by `actor`.
    ///
    /// Returns the stored record as written, without declassification.
    pub async fn create_entity(
        &self,
        actor: &Identity,
        id: &str,
        entity_type: &EntityType,
        attributes: Attributes,
    ) -> Result<Entity> {
        self.create_owned(actor, id, entity_type, attributes, &actor.id)
            .await
    }

    /// Creates an entity on behalf of `owner`. Authorization is decided for
    /// `actor`; ownership goes to `owner` so a provisioned identity can
    /// administer its own attributes afterwards.
    pub async fn create_entity_and_set_owner(
        &self,
        actor: &Identity,
        id: &str,
        entity_type: &EntityType,
        attributes: Attributes,
        owner: &str,
    ) -> Result<Entity> {
        self.create_owned(actor, id, entity_type, attributes, owner)
            .await
    }

    async fn create_owned(
        &self,
        actor: &Identity,
        id: &str,
        entity_type: &EntityType,
        attributes: Attributes,
        owner: &str,
    ) -> Result<Entity> {
        if id.is_empty() {
            return Err(IdmError::Validation("entity id must not be empty".to_string()));
        }
        self.check_entity_type(entity_type)?;

        let attributes = strip_reserved(attributes);
        self.schemas.validate(entity_type, &attributes)?;

        let prospective = Entity::new(id, entity_type.clone(), owner, attributes.clone());
        self.authorize(actor, &Operation::Create, &prospective)
            .await?;

        let stored = self
            .storage
            .create_entity(id, entity_type, owner, attributes)
            .await?;

        if self.audit_enabled {
            info!(
                actor = %actor.id,
                entity_id = %stored.id,
                entity_type = %stored.entity_type,
                owner = %stored.owner,
                "Entity created"
            );
        }
        Ok(stored)
    }

    /// Reads an entity and strips the attributes `actor` may not see.
    pub async fn read_entity(
        &self,
        actor: &Identity,
        id: &str,
        entity_type: &EntityType,
    ) -> Result<Entity> {
        let entity = self.storage.read_entity(id, entity_type).await?;
        self.authorize(actor, &Operation::Read, &entity).await?;
        Ok(self.declassifier.declassify(actor, &entity).await?)
    }

    /// Sets one attribute, addressed by dotted path, and persists the entity.
    ///
    /// Returns the updated record, without declassification.
    pub async fn set_entity_attribute(
        &self,
        actor: &Identity,
        id: &str,
        entity_type: &EntityType,
        attribute: &str,
        value: Value,
    ) -> Result<Entity> {
        let path = AttributePath::parse(attribute)?;
        if path.is_reserved() {
            return Err(TypesError::ReservedAttribute(path.to_string()).into());
        }

        let mut entity = self.storage.read_entity(id, entity_type).await?;
        self.authorize(actor, &Operation::WriteAttribute(path.clone()), &entity)
            .await?;

        entity.set_attribute(&path, value)?;
        self.schemas
            .validate(&entity.entity_type, &entity.attributes)?;
        let stored = self.storage.update_entity(entity).await?;

        if self.audit_enabled {
            info!(
                actor = %actor.id,
                entity_id = %stored.id,
                entity_type = %stored.entity_type,
                attribute = %path,
                "Entity attribute updated"
            );
        }
        Ok(stored)
    }

    /// Deletes an entity and detaches it from every group it belongs to.
    pub async fn delete_entity(
        &self,
        actor: &Identity,
        id: &str,
        entity_type: &EntityType,
    ) -> Result<()> {
        let entity = self.storage.read_entity(id, entity_type).await?;
        self.authorize(actor, &Operation::Delete, &entity).await?;

        let member = entity.member_key();
        for group_ref in &entity.groups {
            match self
                .storage
                .read_group(&group_ref.group_name, &group_ref.owner)
                .await
            {
                Ok(mut group) => {
                    if group.remove_member(&member) {
                        self.storage.update_group(group).await?;
                    }
                }
                Err(StorageError::NotFound { .. }) => {
                    debug!(
                        group = %group_ref.group_name,
                        owner = %group_ref.owner,
                        "group already gone, skipping detach"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        self.storage.delete_entity(id, entity_type).await?;

        if self.audit_enabled {
            info!(
                actor = %actor.id,
                entity_id = %id,
                entity_type = %entity_type,
                groups = entity.groups.len(),
                "Entity deleted"
            );
        }
        Ok(())
    }

    /// Finds the entities matching every criterion, optionally of one type,
    /// as `actor` may see them.
    ///
    /// Entities `actor` may not read are dropped, and so are entities whose
    /// matching value is withheld from `actor`: a search never reveals a
    /// value the caller cannot read. An empty result is not an error.
    pub async fn list_entities_by_attribute_value_and_type(
        &self,
        actor: &Identity,
        criteria: &[AttributeCriterion],
        entity_type: Option<&EntityType>,
    ) -> Result<Vec<Entity>> {
        let candidates = self
            .storage
            .query_by_attributes(criteria, entity_type)
            .await?;
        let verdicts = self.pdp.can_read_array(actor, &candidates).await?;

        let mut visible = Vec::with_capacity(candidates.len());
        for (entity, verdict) in candidates.iter().zip(&verdicts) {
            if !verdict.allowed() {
                continue;
            }
            let declassified = self.declassifier.declassify(actor, entity).await?;
            if criteria.iter().all(|c| c.matches(&declassified)) {
                visible.push(declassified);
            }
        }

        debug!(
            actor = %actor.id,
            candidates = candidates.len(),
            visible = visible.len(),
            "attribute search"
        );
        Ok(visible)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use idmcore_abac::PolicyDocument;
    use serde_json::json;

    fn admin() -> Identity {
        Identity::new("bob!@!agile-local", "/user").with_attribute("role", "admin")
    }

    fn stranger() -> Identity {
        Identity::new("carol!@!agile-local", "/user").with_attribute("role", "student")
    }

    fn attrs(value: Value) -> Attributes {
        value.as_object().cloned().unwrap()
    }

    fn core() -> IdmCore {
        IdmCore::builder(PolicyDocument::standard())
            .with_entity_types(["/user", "/sensor"])
            .without_audit()
            .build()
    }

    #[tokio::test]
    async fn unknown_type_is_a_validation_error() {
        let err = core()
            .create_entity(&admin(), "1", &EntityType::new("/car"), Attributes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 400);
    }

    #[tokio::test]
    async fn declared_types_match_case_insensitively() {
        let created = core()
            .create_entity(&admin(), "324", &EntityType::new("/Sensor"), Attributes::new())
            .await
            .unwrap();
        assert_eq!(created.id, "324");
    }

    #[tokio::test]
    async fn reserved_keys_are_stripped_on_create() {
        let created = core()
            .create_entity(
                &admin(),
                "323",
                &EntityType::new("/sensor"),
                attrs(json!({"owner": "mallory", "id": "x", "token": "t"})),
            )
            .await
            .unwrap();
        assert_eq!(created.owner, admin().id);
        assert_eq!(created.id, "323");
        assert_eq!(created.attributes, attrs(json!({"token": "t"})));
    }

    #[tokio::test]
    async fn duplicate_create_is_a_conflict() {
        let core = core();
        let sensor = EntityType::new("/sensor");
        core.create_entity(&admin(), "323", &sensor, Attributes::new())
            .await
            .unwrap();
        let err = core
            .create_entity(&admin(), "323", &sensor, Attributes::new())
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 409);
    }

    #[tokio::test]
    async fn reserved_attributes_cannot_be_set() {
        let core = core();
        let sensor = EntityType::new("/sensor");
        core.create_entity(&admin(), "323", &sensor, Attributes::new())
            .await
            .unwrap();
        let err = core
            .set_entity_attribute(&admin(), "323", &sensor, "owner", json!("carol"))
            .await
            .unwrap_err();
        assert!(matches!(err, IdmError::Validation(_)));
    }

    #[tokio::test]
    async fn nested_attribute_write_by_non_owner_is_forbidden() {
        let core = core();
        let sensor = EntityType::new("/sensor");
        core.create_entity(&admin(), "323", &sensor, Attributes::new())
            .await
            .unwrap();
        let err = core
            .set_entity_attribute(&stranger(), "323", &sensor, "location.room", json!("B12"))
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
    }

    #[tokio::test]
    async fn nested_attribute_write_creates_intermediate_objects() {
        let core = core();
        let sensor = EntityType::new("/sensor");
        core.create_entity(&admin(), "323", &sensor, Attributes::new())
            .await
            .unwrap();
        let updated = core
            .set_entity_attribute(&admin(), "323", &sensor, "location.room", json!("B12"))
            .await
            .unwrap();
        assert_eq!(updated.attributes, attrs(json!({"location": {"room": "B12"}})));
    }

    #[tokio::test]
    async fn delete_by_stranger_is_forbidden_and_keeps_the_entity() {
        let core = core();
        let sensor = EntityType::new("/sensor");
        core.create_entity(&admin(), "323", &sensor, Attributes::new())
            .await
            .unwrap();
        let err = core
            .delete_entity(&stranger(), "323", &sensor)
            .await
            .unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert!(core.read_entity(&admin(), "323", &sensor).await.is_ok());
    }
}
