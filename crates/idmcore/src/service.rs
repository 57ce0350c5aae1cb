//! The `IdmCore` handle and its builder.

use std::sync::Arc;

use anyhow::Context;
use chrono::Duration;
use idmcore_abac::{
    CacheSettings, CachedPolicyStore, LockEvaluator, LockRegistry, MemoryPolicyStore, Operation,
    Pdp, PolicyDocument, PolicyResolver, PolicyStore, Verdict,
};
use idmcore_config::IdmConfig;
use idmcore_pep::Declassifier;
use idmcore_storage::{MemoryStorage, Storage};
use idmcore_types::{Entity, EntityType, Identity, strip_reserved};
use tracing::{info, warn};

use crate::error::{IdmError, Result};
use crate::schema::{SchemaRegistry, SchemaValidator};

/// Builder for [`IdmCore`]. Every collaborator has an in-memory default.
pub struct IdmCoreBuilder {
    document: PolicyDocument,
    storage: Option<Arc<dyn Storage>>,
    policy_store: Option<Arc<dyn PolicyStore>>,
    locks: Option<Arc<dyn LockEvaluator>>,
    schemas: Option<Arc<dyn SchemaValidator>>,
    entity_types: Vec<EntityType>,
    audit_enabled: bool,
}

impl IdmCoreBuilder {
    pub fn with_storage(mut self, storage: Arc<dyn Storage>) -> Self {
        self.storage = Some(storage);
        self
    }

    pub fn with_policy_store(mut self, store: Arc<dyn PolicyStore>) -> Self {
        self.policy_store = Some(store);
        self
    }

    pub fn with_lock_evaluator(mut self, locks: Arc<dyn LockEvaluator>) -> Self {
        self.locks = Some(locks);
        self
    }

    pub fn with_schema_validator(mut self, schemas: Arc<dyn SchemaValidator>) -> Self {
        self.schemas = Some(schemas);
        self
    }

    /// Restricts creation to the given entity types. Empty accepts any type.
    pub fn with_entity_types<I, T>(mut self, types: I) -> Self
    where
        I: IntoIterator<Item = T>,
        T: Into<EntityType>,
    {
        self.entity_types = types.into_iter().map(Into::into).collect();
        self
    }

    /// Disables audit logging (for testing).
    pub fn without_audit(mut self) -> Self {
        self.audit_enabled = false;
        self
    }

    pub fn build(self) -> IdmCore {
        let storage = self
            .storage
            .unwrap_or_else(|| Arc::new(MemoryStorage::new()));
        let store = self
            .policy_store
            .unwrap_or_else(|| Arc::new(MemoryPolicyStore::new()));
        let locks = self
            .locks
            .unwrap_or_else(|| Arc::new(LockRegistry::with_builtin_locks()));
        let schemas = self
            .schemas
            .unwrap_or_else(|| Arc::new(SchemaRegistry::new()));

        let resolver = PolicyResolver::new(Arc::new(self.document), store);
        let mut pdp = Pdp::new(resolver, locks);
        if !self.audit_enabled {
            pdp = pdp.without_audit();
        }
        let mut declassifier = Declassifier::new(pdp.clone());
        if !self.audit_enabled {
            declassifier = declassifier.without_audit();
        }

        IdmCore {
            storage,
            pdp,
            declassifier,
            schemas,
            entity_types: self.entity_types,
            audit_enabled: self.audit_enabled,
        }
    }
}

/// Access-controlled entity and group store.
///
/// Every operation takes the acting [`Identity`] first, resolves the relevant
/// policies, adjudicates, performs the storage call and, for reads,
/// declassifies the result.
#[derive(Clone)]
pub struct IdmCore {
    pub(crate) storage: Arc<dyn Storage>,
    pub(crate) pdp: Pdp,
    pub(crate) declassifier: Declassifier,
    pub(crate) schemas: Arc<dyn SchemaValidator>,
    pub(crate) entity_types: Vec<EntityType>,
    pub(crate) audit_enabled: bool,
}

impl IdmCore {
    /// Starts a builder over the given policy document.
    pub fn builder(document: PolicyDocument) -> IdmCoreBuilder {
        IdmCoreBuilder {
            document,
            storage: None,
            policy_store: None,
            locks: None,
            schemas: None,
            entity_types: Vec::new(),
            audit_enabled: true,
        }
    }

    /// An in-memory core over `document`.
    pub fn new(document: PolicyDocument) -> Self {
        Self::builder(document).build()
    }

    /// Wires an in-memory core from configuration: policies, policy cache,
    /// schemas and the entity type taxonomy.
    pub fn from_config(config: &IdmConfig) -> anyhow::Result<Self> {
        let document = config.load_policies()?;
        let schemas = SchemaRegistry::from_values(&config.schemas)
            .map_err(|v| anyhow::anyhow!("{v}"))
            .context("Failed to load entity schemas")?;

        let store: Arc<dyn PolicyStore> = if config.pap.cache.enabled {
            let settings = CacheSettings {
                capacity: config.pap.cache.capacity,
                ttl: Duration::seconds(
                    i64::try_from(config.pap.cache.ttl_secs).unwrap_or(i64::MAX),
                ),
            };
            Arc::new(CachedPolicyStore::new(MemoryPolicyStore::new(), settings))
        } else {
            Arc::new(MemoryPolicyStore::new())
        };

        info!(
            project = %config.project.name,
            db_name = %config.storage.db_name,
            cache = config.pap.cache.enabled,
            "IDM core configured"
        );

        Ok(Self::builder(document)
            .with_policy_store(store)
            .with_schema_validator(Arc::new(schemas))
            .with_entity_types(config.entity_types.iter().map(String::as_str))
            .build())
    }

    pub fn pdp(&self) -> &Pdp {
        &self.pdp
    }

    pub fn resolver(&self) -> &PolicyResolver {
        self.pdp.resolver()
    }

    pub fn declassifier(&self) -> &Declassifier {
        &self.declassifier
    }

    pub fn storage(&self) -> &Arc<dyn Storage> {
        &self.storage
    }

    /// Stores a bootstrap identity owned by itself and seeds its attribute
    /// policies with the type defaults. No actor is consulted: this is the
    /// path for the first administrator, before anyone can authorize. The
    /// type and schema checks of an ordinary create still apply.
    pub async fn bootstrap_admin(&self, identity: Entity) -> Result<Entity> {
        if identity.id.is_empty() {
            return Err(IdmError::Validation("entity id must not be empty".to_string()));
        }
        self.check_entity_type(&identity.entity_type)?;
        let attributes = strip_reserved(identity.attributes);
        self.schemas.validate(&identity.entity_type, &attributes)?;

        let stored = self
            .storage
            .create_entity(&identity.id, &identity.entity_type, &identity.id, attributes)
            .await?;
        let seeded = self
            .resolver()
            .set_default_entity_policies(&stored.id, &stored.entity_type)
            .await?;
        info!(
            entity_id = %stored.id,
            entity_type = %stored.entity_type,
            policies = seeded,
            "Bootstrap identity stored"
        );
        Ok(stored)
    }

    /// Releases the storage backend.
    pub async fn disconnect(&self) -> Result<()> {
        self.storage.disconnect().await?;
        info!("IDM core disconnected");
        Ok(())
    }

    pub(crate) fn check_entity_type(&self, entity_type: &EntityType) -> Result<()> {
        let declared = self
            .entity_types
            .iter()
            .any(|t| t.as_str().eq_ignore_ascii_case(entity_type.as_str()));
        if self.entity_types.is_empty() || declared {
            Ok(())
        } else {
            Err(IdmError::Validation(format!(
                "unknown entity type '{entity_type}'"
            )))
        }
    }

    /// Decides `operation` and turns a denial into an error, after running
    /// the actions the denial carries. A withheld whole-entity read reports
    /// `NotFound` so the caller cannot tell the entity exists.
    pub(crate) async fn authorize(
        &self,
        actor: &Identity,
        operation: &Operation,
        subject: &Entity,
    ) -> Result<()> {
        let verdict = self.pdp.decide(actor, operation, subject).await?;
        if verdict.allowed() {
            return Ok(());
        }
        self.run_denial_actions(actor, subject, &verdict);
        let target = format!("{} {}", subject.entity_type, subject.id);
        if matches!(operation, Operation::Read) && verdict.withholds() {
            return Err(IdmError::NotFound(target));
        }
        Err(IdmError::Forbidden(format!(
            "{operation} on {target}: {}",
            verdict.decision.reason
        )))
    }

    fn run_denial_actions(&self, actor: &Identity, subject: &Entity, verdict: &Verdict) {
        if verdict.logs() {
            warn!(
                actor = %actor.id,
                entity_id = %subject.id,
                entity_type = %subject.entity_type,
                reason = %verdict.decision.reason,
                "Denial recorded by policy action"
            );
        }
    }
}
