//! Lock predicates.
//!
//! The core only depends on the [`LockEvaluator`] contract. [`LockRegistry`]
//! is the string-keyed implementation: a map from lock name to predicate
//! function, shipped with the built-in predicates used by the standard
//! policies.
//!
//! | Lock                  | Holds when                                   |
//! |-----------------------|----------------------------------------------|
//! | `isOwner`             | `actor.id == subject.owner`                  |
//! | `hasType(t)`          | `actor.type == t` (`/any` always holds)      |
//! | `attrEq(attr, value)` | actor attribute `attr` equals `value`        |
//! | `hasId(id)`           | `actor.id == id`                             |
//! | `isSelf`              | the actor is the subject                     |

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use idmcore_types::{AttributePath, Entity, EntityType, Identity};
use serde_json::Value;
use thiserror::Error;

/// Errors raised while evaluating a lock.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LockError {
    /// No predicate is registered under this name.
    #[error("Unknown lock '{0}'")]
    UnknownLock(String),

    /// The predicate was called with unusable arguments.
    #[error("Invalid arguments for lock '{lock}': {reason}")]
    InvalidArguments { lock: String, reason: String },

    /// The evaluator backend could not be reached.
    #[error("Lock evaluator unavailable: {0}")]
    Unavailable(String),
}

/// Evaluates a named boolean predicate over an actor and a subject.
#[async_trait]
pub trait LockEvaluator: Send + Sync {
    async fn evaluate(
        &self,
        name: &str,
        actor: &Identity,
        subject: &Entity,
        args: &[String],
    ) -> Result<bool, LockError>;
}

/// Signature of a registered predicate.
pub type LockFn = dyn Fn(&Identity, &Entity, &[String]) -> Result<bool, LockError> + Send + Sync;

/// Registry of lock predicates keyed by name.
#[derive(Clone, Default)]
pub struct LockRegistry {
    locks: HashMap<String, Arc<LockFn>>,
}

impl LockRegistry {
    /// Creates an empty registry. Every lock evaluated against it fails.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry holding the built-in predicates.
    pub fn with_builtin_locks() -> Self {
        Self::new()
            .register("isOwner", is_owner)
            .register("hasType", has_type)
            .register("attrEq", attr_eq)
            .register("hasId", has_id)
            .register("isSelf", is_self)
    }

    /// Registers (or replaces) a predicate.
    pub fn register<F>(mut self, name: impl Into<String>, predicate: F) -> Self
    where
        F: Fn(&Identity, &Entity, &[String]) -> Result<bool, LockError> + Send + Sync + 'static,
    {
        self.locks.insert(name.into(), Arc::new(predicate));
        self
    }

    pub fn contains(&self, name: &str) -> bool {
        self.locks.contains_key(name)
    }

    /// Registered lock names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.locks.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}

impl fmt::Debug for LockRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LockRegistry")
            .field("locks", &self.names())
            .finish()
    }
}

#[async_trait]
impl LockEvaluator for LockRegistry {
    async fn evaluate(
        &self,
        name: &str,
        actor: &Identity,
        subject: &Entity,
        args: &[String],
    ) -> Result<bool, LockError> {
        let predicate = self
            .locks
            .get(name)
            .ok_or_else(|| LockError::UnknownLock(name.to_string()))?;
        predicate(actor, subject, args)
    }
}

// ============================================================================
// Built-in predicates
// ============================================================================

fn expect_args<'a>(lock: &str, args: &'a [String], count: usize) -> Result<&'a [String], LockError> {
    if args.len() == count {
        Ok(args)
    } else {
        Err(LockError::InvalidArguments {
            lock: lock.to_string(),
            reason: format!("expected {count} argument(s), got {}", args.len()),
        })
    }
}

fn is_owner(actor: &Identity, subject: &Entity, args: &[String]) -> Result<bool, LockError> {
    expect_args("isOwner", args, 0)?;
    Ok(actor.id == subject.owner)
}

fn has_type(actor: &Identity, _subject: &Entity, args: &[String]) -> Result<bool, LockError> {
    let args = expect_args("hasType", args, 1)?;
    Ok(EntityType::new(args[0].as_str()).admits(&actor.entity_type))
}

fn attr_eq(actor: &Identity, _subject: &Entity, args: &[String]) -> Result<bool, LockError> {
    let args = expect_args("attrEq", args, 2)?;
    let path = AttributePath::parse(&args[0]).map_err(|e| LockError::InvalidArguments {
        lock: "attrEq".to_string(),
        reason: e.to_string(),
    })?;
    Ok(match actor.attribute(&path) {
        Some(Value::String(s)) => *s == args[1],
        Some(v @ (Value::Number(_) | Value::Bool(_))) => v.to_string() == args[1],
        _ => false,
    })
}

fn has_id(actor: &Identity, _subject: &Entity, args: &[String]) -> Result<bool, LockError> {
    let args = expect_args("hasId", args, 1)?;
    Ok(actor.id == args[0])
}

fn is_self(actor: &Identity, subject: &Entity, args: &[String]) -> Result<bool, LockError> {
    expect_args("isSelf", args, 0)?;
    Ok(actor.id == subject.id && actor.entity_type == subject.entity_type)
}

#[cfg(test)]
mod tests {
    use super::*;
    use idmcore_types::Attributes;
    use test_case::test_case;

    fn alice() -> Identity {
        Identity::new("alice!@!agile-local", "/user").with_attribute("role", "student")
    }

    fn bob() -> Identity {
        Identity::new("bob!@!agile-local", "/user").with_attribute("role", "admin")
    }

    fn sensor_owned_by(owner: &str) -> Entity {
        Entity::new("323", "/sensor", owner, Attributes::new())
    }

    fn args(values: &[&str]) -> Vec<String> {
        values.iter().map(|s| (*s).to_string()).collect()
    }

    #[test_case("isOwner", &[], true; "owner")]
    #[test_case("hasType", &["/user"], true; "has user type")]
    #[test_case("hasType", &["/any"], true; "has any type")]
    #[test_case("hasType", &["/sensor"], false; "lacks sensor type")]
    #[test_case("attrEq", &["role", "student"], true; "role matches")]
    #[test_case("attrEq", &["role", "admin"], false; "role differs")]
    #[test_case("attrEq", &["missing", "x"], false; "attribute absent")]
    #[test_case("hasId", &["alice!@!agile-local"], true; "id matches")]
    #[test_case("isSelf", &[], false; "not the subject")]
    #[tokio::test]
    async fn builtin_locks_for_owner(name: &str, raw_args: &[&str], expected: bool) {
        let registry = LockRegistry::with_builtin_locks();
        let subject = sensor_owned_by("alice!@!agile-local");
        let result = registry
            .evaluate(name, &alice(), &subject, &args(raw_args))
            .await
            .unwrap();
        assert_eq!(result, expected);
    }

    #[tokio::test]
    async fn is_owner_fails_for_other_actor() {
        let registry = LockRegistry::with_builtin_locks();
        let subject = sensor_owned_by("alice!@!agile-local");
        assert!(!registry.evaluate("isOwner", &bob(), &subject, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn is_self_matches_the_subject_identity() {
        let registry = LockRegistry::with_builtin_locks();
        let subject = Entity::new(
            "alice!@!agile-local",
            "/user",
            "alice!@!agile-local",
            Attributes::new(),
        );
        assert!(registry.evaluate("isSelf", &alice(), &subject, &[]).await.unwrap());
    }

    #[tokio::test]
    async fn unknown_lock_is_an_error() {
        let registry = LockRegistry::with_builtin_locks();
        let subject = sensor_owned_by("x");
        assert_eq!(
            registry.evaluate("isFriday", &alice(), &subject, &[]).await,
            Err(LockError::UnknownLock("isFriday".to_string()))
        );
    }

    #[tokio::test]
    async fn wrong_arity_is_an_error() {
        let registry = LockRegistry::with_builtin_locks();
        let subject = sensor_owned_by("x");
        let result = registry
            .evaluate("attrEq", &alice(), &subject, &args(&["role"]))
            .await;
        assert!(matches!(result, Err(LockError::InvalidArguments { .. })));
    }

    #[tokio::test]
    async fn custom_locks_can_be_registered() {
        let registry = LockRegistry::new().register("always", |_, _, _| Ok(true));
        assert_eq!(registry.names(), vec!["always"]);
        let subject = sensor_owned_by("x");
        assert!(registry.evaluate("always", &alice(), &subject, &[]).await.unwrap());
        assert!(!registry.contains("isOwner"));
    }
}
