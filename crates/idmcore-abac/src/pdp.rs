//! Access Decision Orchestrator (Policy Decision Point).
//!
//! Resolves the flows of the level an operation belongs to and evaluates them
//! against the actor and the subject:
//!
//! | Operation                        | Level                                 |
//! |----------------------------------|---------------------------------------|
//! | `Create`                         | create-entity flows                   |
//! | `Read`, `Write`, `Delete`        | top-level flows                       |
//! | `ReadAttribute`/`WriteAttribute` | effective attribute policy (inherited) |
//!
//! Denials carry the top-level actions configured for the operation class so
//! the enforcement layer can run them.

use std::sync::Arc;

use idmcore_types::{Entity, Identity};
use tracing::{info, warn};

use crate::error::{AbacError, Result};
use crate::evaluator::{self, Decision};
use crate::locks::LockEvaluator;
use crate::policy::{ActionKind, Flow, Op, Operation};
use crate::resolver::PolicyResolver;

/// A decision plus the actions to run because of it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub decision: Decision,
    /// Actions configured for a denial of this operation class. Empty when
    /// access was granted.
    pub actions: Vec<ActionKind>,
}

impl Verdict {
    pub fn allowed(&self) -> bool {
        self.decision.allowed
    }

    /// Returns `true` if the denied data must be withheld from the caller.
    pub fn withholds(&self) -> bool {
        self.actions.contains(&ActionKind::Delete)
    }

    /// Returns `true` if the denial must be recorded.
    pub fn logs(&self) -> bool {
        self.actions.contains(&ActionKind::Log)
    }
}

/// Policy decision point.
#[derive(Clone)]
pub struct Pdp {
    resolver: PolicyResolver,
    locks: Arc<dyn LockEvaluator>,
    audit_enabled: bool,
}

impl Pdp {
    pub fn new(resolver: PolicyResolver, locks: Arc<dyn LockEvaluator>) -> Self {
        Self {
            resolver,
            locks,
            audit_enabled: true,
        }
    }

    /// Disables audit logging (for testing).
    pub fn without_audit(mut self) -> Self {
        self.audit_enabled = false;
        self
    }

    pub fn resolver(&self) -> &PolicyResolver {
        &self.resolver
    }

    /// Decides `operation` by `actor` on `subject`.
    ///
    /// Fails only when a collaborator is unavailable or the policy is
    /// malformed; a denial is a successful [`Verdict`].
    pub async fn decide(
        &self,
        actor: &Identity,
        operation: &Operation,
        subject: &Entity,
    ) -> Result<Verdict> {
        let op = operation.class();
        let decision = if let Some(path) = operation.path() {
            let effective = self
                .resolver
                .effective_attribute_policy(&subject.id, &subject.entity_type, path)
                .await?;
            // With no attribute policy on the path or above it, the
            // top-level flows decide.
            self.decide_flows(&effective.flows, op, actor, subject).await?
        } else if *operation == Operation::Create {
            self.decide_flows(self.resolver.create_flows(), op, actor, subject)
                .await?
        } else {
            self.decide_flows(&self.resolver.top_level().flows, op, actor, subject)
                .await?
        };

        let actions = if decision.allowed {
            Vec::new()
        } else {
            self.resolver
                .top_level()
                .actions_for(op)
                .iter()
                .map(|a| a.action)
                .collect()
        };

        if self.audit_enabled {
            if decision.allowed {
                info!(
                    actor = %actor.id,
                    entity_id = %subject.id,
                    entity_type = %subject.entity_type,
                    op = %operation,
                    "Access granted"
                );
            } else {
                warn!(
                    actor = %actor.id,
                    entity_id = %subject.id,
                    entity_type = %subject.entity_type,
                    op = %operation,
                    reason = %decision.reason,
                    "Access denied"
                );
            }
        }

        Ok(Verdict { decision, actions })
    }

    /// Evaluates an explicit flow list.
    pub async fn decide_flows(
        &self,
        flows: &[Flow],
        op: Op,
        actor: &Identity,
        subject: &Entity,
    ) -> Result<Decision> {
        Ok(evaluator::evaluate(flows, op, actor, subject, self.locks.as_ref()).await?)
    }

    /// Decides `operation` and converts a denial into [`AbacError::Denied`].
    pub async fn check(
        &self,
        actor: &Identity,
        operation: &Operation,
        subject: &Entity,
    ) -> Result<Verdict> {
        let verdict = self.decide(actor, operation, subject).await?;
        if verdict.allowed() {
            Ok(verdict)
        } else {
            Err(AbacError::Denied {
                operation: operation.to_string(),
                subject: format!("{} {}", subject.entity_type, subject.id),
                reason: verdict.decision.reason,
            })
        }
    }

    pub async fn check_create(&self, actor: &Identity, subject: &Entity) -> Result<()> {
        self.check(actor, &Operation::Create, subject).await.map(|_| ())
    }

    pub async fn check_read(&self, actor: &Identity, subject: &Entity) -> Result<()> {
        self.check(actor, &Operation::Read, subject).await.map(|_| ())
    }

    pub async fn check_write(&self, actor: &Identity, subject: &Entity) -> Result<()> {
        self.check(actor, &Operation::Write, subject).await.map(|_| ())
    }

    pub async fn check_delete(&self, actor: &Identity, subject: &Entity) -> Result<()> {
        self.check(actor, &Operation::Delete, subject).await.map(|_| ())
    }

    /// Batch form of whole-entity read: one verdict per entity, in order.
    pub async fn can_read_array(&self, actor: &Identity, subjects: &[Entity]) -> Result<Vec<Verdict>> {
        let mut verdicts = Vec::with_capacity(subjects.len());
        for subject in subjects {
            verdicts.push(self.decide(actor, &Operation::Read, subject).await?);
        }
        Ok(verdicts)
    }
}
