//! Flow evaluation engine.
//!
//! Evaluates an operation class against a list of flows. Flows are OR-combined:
//! the first satisfied flow grants access. Within a flow, locks are
//! AND-combined and short-circuit on the first `false`. A flow whose locks
//! fail to evaluate is treated as unsatisfied; only connectivity failures of
//! the lock evaluator abort the evaluation.

use idmcore_types::{Entity, Identity};
use tracing::debug;

use crate::locks::{LockError, LockEvaluator};
use crate::policy::{Flow, Op};

// ============================================================================
// Decision
// ============================================================================

/// The result of evaluating flows for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    /// Whether access is granted.
    pub allowed: bool,
    /// Index of the flow that granted access, if any.
    pub matched_flow: Option<usize>,
    /// Human-readable explanation of the decision.
    pub reason: String,
}

impl Decision {
    fn granted(index: usize) -> Self {
        Self {
            allowed: true,
            matched_flow: Some(index),
            reason: format!("granted by flow #{index}"),
        }
    }

    fn denied(reason: String) -> Self {
        Self {
            allowed: false,
            matched_flow: None,
            reason,
        }
    }
}

// ============================================================================
// Public API
// ============================================================================

/// Evaluates `flows` for operation class `op`.
///
/// # Postcondition
///
/// Returns a denial when no flow applies (deny-by-default). Returns `Err`
/// only for [`LockError::Unavailable`].
pub async fn evaluate(
    flows: &[Flow],
    op: Op,
    actor: &Identity,
    subject: &Entity,
    locks: &dyn LockEvaluator,
) -> Result<Decision, LockError> {
    let mut applicable = 0usize;
    let mut failures: Vec<String> = Vec::new();

    for (index, flow) in flows.iter().enumerate() {
        if !flow.applies_to(op, &actor.entity_type, &subject.entity_type) {
            continue;
        }
        applicable += 1;

        match flow_satisfied(flow, actor, subject, locks).await {
            Ok(None) => return Ok(Decision::granted(index)),
            Ok(Some(failed_lock)) => failures.push(format!("flow #{index}: {failed_lock}")),
            Err(LockError::Unavailable(msg)) => return Err(LockError::Unavailable(msg)),
            Err(err) => {
                debug!(flow = index, error = %err, "lock evaluation failed; flow unsatisfied");
                failures.push(format!("flow #{index}: {err}"));
            }
        }
    }

    if applicable == 0 {
        return Ok(Decision::denied(format!("no {op} flow applies")));
    }
    Ok(Decision::denied(format!(
        "no {op} flow satisfied ({})",
        failures.join("; ")
    )))
}

/// Returns `Ok(None)` when every lock holds, or the first failing lock.
async fn flow_satisfied(
    flow: &Flow,
    actor: &Identity,
    subject: &Entity,
    locks: &dyn LockEvaluator,
) -> Result<Option<String>, LockError> {
    for lock in &flow.locks {
        let holds = locks
            .evaluate(&lock.name, actor, subject, &lock.args)
            .await?;
        if holds == lock.negated {
            return Ok(Some(lock.to_string()));
        }
    }
    Ok(None)
}

// ============================================================================
// Tests
// ============================================================================
