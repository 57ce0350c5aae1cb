use std::collections::BTreeSet;

use idmcore_abac::{Operation, Pdp, Result};
use idmcore_types::{AttributePath, Attributes, Entity, Identity};
use serde_json::Value;
use tracing::warn;

/// Strips unreadable attributes from entities.
#[derive(Clone)]
pub struct Declassifier {
    pdp: Pdp,
    audit_enabled: bool,
}

impl Declassifier {
    pub fn new(pdp: Pdp) -> Self {
        Self {
            pdp,
            audit_enabled: true,
        }
    }

    /// Disables audit logging (for testing).
    pub fn without_audit(mut self) -> Self {
        self.audit_enabled = false;
        self
    }

    pub fn pdp(&self) -> &Pdp {
        &self.pdp
    }

    /// Paths of `entity` that `actor` may not read, decided depth-first in
    /// key order. A denied object is not descended into, so no returned path
    /// lies below another returned path.
    pub async fn denied_paths(
        &self,
        actor: &Identity,
        entity: &Entity,
    ) -> Result<BTreeSet<AttributePath>> {
        let mut denied = BTreeSet::new();
        let mut stack: Vec<(AttributePath, &Value)> = entity
            .attributes
            .iter()
            .rev()
            .map(|(key, value)| (AttributePath::root(key.clone()), value))
            .collect();

        while let Some((path, value)) = stack.pop() {
            let verdict = self
                .pdp
                .decide(actor, &Operation::ReadAttribute(path.clone()), entity)
                .await?;
            if !verdict.allowed() {
                denied.insert(path);
                continue;
            }
            if let Value::Object(children) = value {
                stack.extend(
                    children
                        .iter()
                        .rev()
                        .map(|(key, child)| (path.child(key.clone()), child)),
                );
            }
        }

        Ok(denied)
    }

    /// Returns a copy of `entity` without the attributes `actor` may not
    /// read. The entity must already be cleared for whole-entity read.
    pub async fn declassify(&self, actor: &Identity, entity: &Entity) -> Result<Entity> {
        let denied = self.denied_paths(actor, entity).await?;
        if self.audit_enabled && !denied.is_empty() {
            let paths: Vec<String> = denied.iter().map(ToString::to_string).collect();
            warn!(
                actor = %actor.id,
                entity_id = %entity.id,
                entity_type = %entity.entity_type,
                pruned = ?paths,
                "Attributes withheld by policy"
            );
        }
        Ok(prune(entity, &denied))
    }

    /// Element-wise [`Declassifier::declassify`], preserving order.
    pub async fn declassify_array(
        &self,
        actor: &Identity,
        entities: &[Entity],
    ) -> Result<Vec<Entity>> {
        let mut out = Vec::with_capacity(entities.len());
        for entity in entities {
            out.push(self.declassify(actor, entity).await?);
        }
        Ok(out)
    }
}

/// Builds a new entity without the `denied` attribute paths. Siblings of a
/// removed path are kept.
pub fn prune(entity: &Entity, denied: &BTreeSet<AttributePath>) -> Entity {
    Entity {
        id: entity.id.clone(),
        entity_type: entity.entity_type.clone(),
        owner: entity.owner.clone(),
        groups: entity.groups.clone(),
        attributes: prune_map(&entity.attributes, None, denied),
    }
}

fn prune_map(
    map: &Attributes,
    parent: Option<&AttributePath>,
    denied: &BTreeSet<AttributePath>,
) -> Attributes {
    map.iter()
        .filter_map(|(key, value)| {
            let path = match parent {
                Some(parent) => parent.child(key.clone()),
                None => AttributePath::root(key.clone()),
            };
            if denied.contains(&path) {
                return None;
            }
            let kept = match value {
                Value::Object(children) => Value::Object(prune_map(children, Some(&path), denied)),
                other => other.clone(),
            };
            Some((key.clone(), kept))
        })
        .collect()
}
