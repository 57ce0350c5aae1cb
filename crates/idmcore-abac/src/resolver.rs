//! Policy resolution.
//!
//! Merges the immutable [`PolicyDocument`] (levels 1-3) with the per-instance
//! overrides held by a [`PolicyStore`] (level 4).
//!
//! For one attribute path the effective policy is the instance override for
//! that exact path, else the type-level default for that exact path. A path
//! with neither inherits from its nearest ancestor that has one; with no such
//! ancestor it falls back to the top-level flows.

use std::collections::BTreeMap;
use std::sync::Arc;

use idmcore_types::{AttributePath, EntityType};
use serde::Serialize;
use tracing::debug;

use crate::error::{AbacError, Result};
use crate::policy::{Flow, PolicyDocument, TopLevelPolicy, validate_flows};
use crate::store::PolicyStore;

/// Where an effective attribute policy came from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PolicyOrigin {
    /// Per-instance override for the exact path.
    Instance,
    /// Type-level default for the exact path.
    TypeDefault,
    /// Inherited from the given ancestor path.
    Inherited(AttributePath),
    /// No attribute policy on the path or its ancestors.
    TopLevel,
}

/// The flows governing one attribute path, with their provenance.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EffectivePolicy {
    pub flows: Vec<Flow>,
    pub origin: PolicyOrigin,
}

/// One node of the nested policy view: the flows of this path (`self`) plus
/// one child per next segment.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PolicyNode {
    #[serde(rename = "self", skip_serializing_if = "Option::is_none")]
    pub flows: Option<Vec<Flow>>,
    #[serde(flatten)]
    pub children: BTreeMap<String, PolicyNode>,
}

/// Every policy of one entity: top-level policy under `self`, attribute
/// policies nested by path segment.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityPolicies {
    #[serde(rename = "self")]
    pub top_level: TopLevelPolicy,
    #[serde(flatten)]
    pub attributes: BTreeMap<String, PolicyNode>,
}

impl EntityPolicies {
    /// Looks up the node for a path.
    pub fn node(&self, path: &AttributePath) -> Option<&PolicyNode> {
        let (first, rest) = path.segments().split_first()?;
        let mut node = self.attributes.get(first)?;
        for segment in rest {
            node = node.children.get(segment)?;
        }
        Some(node)
    }
}

/// Resolves effective policies from the document and the policy store.
#[derive(Clone)]
pub struct PolicyResolver {
    document: Arc<PolicyDocument>,
    store: Arc<dyn PolicyStore>,
}

impl PolicyResolver {
    pub fn new(document: Arc<PolicyDocument>, store: Arc<dyn PolicyStore>) -> Self {
        Self { document, store }
    }

    pub fn document(&self) -> &PolicyDocument {
        &self.document
    }

    /// Level 1.
    pub fn create_flows(&self) -> &[Flow] {
        &self.document.create_entity_policy
    }

    /// Level 2.
    pub fn top_level(&self) -> &TopLevelPolicy {
        &self.document.top_level_policy
    }

    /// The attribute policy for one exact path: override, else type default.
    pub async fn attribute_policy(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
    ) -> Result<Option<(Vec<Flow>, PolicyOrigin)>> {
        if let Some(flows) = self.store.get_override(entity_id, entity_type, path).await? {
            return Ok(Some((flows, PolicyOrigin::Instance)));
        }
        Ok(self
            .document
            .attribute_default(entity_type, path)
            .map(|flows| (flows.to_vec(), PolicyOrigin::TypeDefault)))
    }

    /// The flows actually governing `path`, following inheritance.
    pub async fn effective_attribute_policy(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
    ) -> Result<EffectivePolicy> {
        if let Some((flows, origin)) = self.attribute_policy(entity_id, entity_type, path).await? {
            return Ok(EffectivePolicy { flows, origin });
        }
        for ancestor in path.ancestors() {
            if let Some((flows, _)) = self
                .attribute_policy(entity_id, entity_type, &ancestor)
                .await?
            {
                debug!(path = %path, ancestor = %ancestor, "attribute policy inherited");
                return Ok(EffectivePolicy {
                    flows,
                    origin: PolicyOrigin::Inherited(ancestor),
                });
            }
        }
        Ok(EffectivePolicy {
            flows: self.document.top_level_policy.flows.clone(),
            origin: PolicyOrigin::TopLevel,
        })
    }

    /// All attribute policies of an entity: type defaults with overrides
    /// applied on top.
    pub async fn attribute_policies(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<BTreeMap<AttributePath, Vec<Flow>>> {
        let mut merged: BTreeMap<AttributePath, Vec<Flow>> = self
            .document
            .attribute_defaults(entity_type)
            .into_iter()
            .map(|(path, flows)| (path, flows.to_vec()))
            .collect();
        merged.extend(self.store.overrides_for(entity_id, entity_type).await?);
        Ok(merged)
    }

    /// The nested policy view of one entity.
    pub async fn entity_policies(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<EntityPolicies> {
        let mut attributes: BTreeMap<String, PolicyNode> = BTreeMap::new();
        for (path, flows) in self.attribute_policies(entity_id, entity_type).await? {
            let (first, rest) = path
                .segments()
                .split_first()
                .ok_or_else(|| AbacError::InvalidPolicy("empty attribute path".to_string()))?;
            let mut node = attributes.entry(first.clone()).or_default();
            for segment in rest {
                node = node.children.entry(segment.clone()).or_default();
            }
            node.flows = Some(flows);
        }
        Ok(EntityPolicies {
            top_level: self.document.top_level_policy.clone(),
            attributes,
        })
    }

    /// Stores a per-instance override, replacing any prior one.
    pub async fn set_attribute_policy(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
        path: &AttributePath,
        flows: Vec<Flow>,
    ) -> Result<()> {
        if path.is_reserved() {
            return Err(AbacError::InvalidPolicy(format!(
                "attribute '{path}' is reserved"
            )));
        }
        validate_flows(&flows)?;
        self.store
            .set_override(entity_id, entity_type, path, flows)
            .await?;
        Ok(())
    }

    /// Seeds an entity with the type-level defaults as instance overrides.
    /// Returns the number of paths written.
    pub async fn set_default_entity_policies(
        &self,
        entity_id: &str,
        entity_type: &EntityType,
    ) -> Result<usize> {
        let defaults = self.document.attribute_defaults(entity_type);
        let count = defaults.len();
        for (path, flows) in defaults {
            self.store
                .set_override(entity_id, entity_type, &path, flows.to_vec())
                .await?;
        }
        debug!(entity_id, entity_type = %entity_type, count, "default policies seeded");
        Ok(count)
    }
}
