//! ABAC policy definitions.
//!
//! A policy is a list of [`Flow`]s. Each flow is one admissibility clause: an
//! optional actor type selector (`source`), an optional subject type selector
//! (`target`), an optional operation class, and zero or more [`Lock`]s that
//! must all hold. Flows are OR-combined; an empty list denies.
//!
//! Flows are organized in levels, held by a [`PolicyDocument`]:
//! 1. create-entity flows
//! 2. top-level flows (whole-entity read/write/delete) plus [`Action`]s
//! 3. attribute-level flows, keyed by entity type then attribute path
//!
//! Level 4 (per-instance overrides) lives in the policy store.

use std::collections::BTreeMap;
use std::fmt;
use std::path::Path;

use idmcore_types::{AttributePath, EntityType};
use serde::{Deserialize, Serialize};

use crate::error::{AbacError, Result};

// ============================================================================
// Operations
// ============================================================================

/// The operation class a flow grants: reading or writing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Op {
    Read,
    Write,
}

impl fmt::Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Op::Read => f.write_str("read"),
            Op::Write => f.write_str("write"),
        }
    }
}

/// A requested operation, resolved against a policy level.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Operation {
    /// Create an entity (create-entity level).
    Create,
    /// Read a whole entity (top level).
    Read,
    /// Update a whole entity (top level).
    Write,
    /// Delete a whole entity; a write against the top level.
    Delete,
    /// Read one attribute path (attribute level).
    ReadAttribute(AttributePath),
    /// Write one attribute path (attribute level).
    WriteAttribute(AttributePath),
}

impl Operation {
    /// The operation class flows are matched against.
    pub fn class(&self) -> Op {
        match self {
            Operation::Read | Operation::ReadAttribute(_) => Op::Read,
            Operation::Create
            | Operation::Write
            | Operation::Delete
            | Operation::WriteAttribute(_) => Op::Write,
        }
    }

    /// The attribute path addressed by the operation, if any.
    pub fn path(&self) -> Option<&AttributePath> {
        match self {
            Operation::ReadAttribute(path) | Operation::WriteAttribute(path) => Some(path),
            _ => None,
        }
    }
}

impl fmt::Display for Operation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Operation::Create => f.write_str("create"),
            Operation::Read => f.write_str("read"),
            Operation::Write => f.write_str("write"),
            Operation::Delete => f.write_str("delete"),
            Operation::ReadAttribute(path) => write!(f, "read({path})"),
            Operation::WriteAttribute(path) => write!(f, "write({path})"),
        }
    }
}

// ============================================================================
// Flow
// ============================================================================

/// Type constraint on the actor (`source`) or the subject (`target`) of a
/// flow.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Selector {
    #[serde(rename = "type")]
    pub entity_type: EntityType,
}

impl Selector {
    pub fn new(entity_type: impl Into<EntityType>) -> Self {
        Self {
            entity_type: entity_type.into(),
        }
    }

    pub fn admits(&self, entity_type: &EntityType) -> bool {
        self.entity_type.admits(entity_type)
    }
}

/// A named predicate with positional arguments, optionally negated.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Lock {
    #[serde(rename = "lock")]
    pub name: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub args: Vec<String>,
    #[serde(default, rename = "not", skip_serializing_if = "is_false")]
    pub negated: bool,
}

#[allow(clippy::trivially_copy_pass_by_ref)]
fn is_false(value: &bool) -> bool {
    !*value
}

impl Lock {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            args: Vec::new(),
            negated: false,
        }
    }

    pub fn with_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Inverts the predicate.
    pub fn negate(mut self) -> Self {
        self.negated = !self.negated;
        self
    }

    /// `isOwner`
    pub fn is_owner() -> Self {
        Self::new("isOwner")
    }

    /// `hasType(t)`
    pub fn has_type(entity_type: &str) -> Self {
        Self::new("hasType").with_args([entity_type])
    }

    /// `attrEq(attribute, value)`
    pub fn attr_eq(attribute: &str, value: &str) -> Self {
        Self::new("attrEq").with_args([attribute, value])
    }
}

impl fmt::Display for Lock {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.negated {
            f.write_str("!")?;
        }
        write!(f, "{}({})", self.name, self.args.join(", "))
    }
}

/// One admissibility clause. A flow with no locks whose selectors match is
/// unconditionally satisfied.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<Selector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<Selector>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub op: Option<Op>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub locks: Vec<Lock>,
}

impl Flow {
    /// A flow applying to every operation class.
    pub fn any() -> Self {
        Self::default()
    }

    /// A flow restricted to reads.
    pub fn read() -> Self {
        Self {
            op: Some(Op::Read),
            ..Self::default()
        }
    }

    /// A flow restricted to writes.
    pub fn write() -> Self {
        Self {
            op: Some(Op::Write),
            ..Self::default()
        }
    }

    /// Restricts the actor type.
    pub fn from_source(mut self, entity_type: impl Into<EntityType>) -> Self {
        self.source = Some(Selector::new(entity_type));
        self
    }

    /// Restricts the subject type.
    pub fn to_target(mut self, entity_type: impl Into<EntityType>) -> Self {
        self.target = Some(Selector::new(entity_type));
        self
    }

    pub fn with_lock(mut self, lock: Lock) -> Self {
        self.locks.push(lock);
        self
    }

    /// Returns `true` if this flow is relevant for the given operation class
    /// and actor/subject types. Locks are not considered here.
    pub fn applies_to(&self, op: Op, actor_type: &EntityType, subject_type: &EntityType) -> bool {
        self.op.is_none_or(|o| o == op)
            && self.source.as_ref().is_none_or(|s| s.admits(actor_type))
            && self.target.as_ref().is_none_or(|t| t.admits(subject_type))
    }
}

// ============================================================================
// Actions
// ============================================================================

/// Side effect to run after a denial of the keyed operation class.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ActionKind {
    /// Withhold the denied data from the caller.
    Delete,
    /// Emit an audit record for the denial.
    Log,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Action {
    pub action: ActionKind,
}

impl Action {
    pub fn new(action: ActionKind) -> Self {
        Self { action }
    }
}

/// Level-2 policy: whole-entity flows plus the actions run on denial.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TopLevelPolicy {
    #[serde(default)]
    pub flows: Vec<Flow>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub actions: BTreeMap<Op, Vec<Action>>,
}

impl TopLevelPolicy {
    pub fn new(flows: Vec<Flow>) -> Self {
        Self {
            flows,
            actions: BTreeMap::new(),
        }
    }

    pub fn with_action(mut self, op: Op, action: ActionKind) -> Self {
        self.actions.entry(op).or_default().push(Action::new(action));
        self
    }

    /// Actions configured for denials of `op`.
    pub fn actions_for(&self, op: Op) -> &[Action] {
        self.actions.get(&op).map_or(&[], Vec::as_slice)
    }
}

// ============================================================================
// Policy document (levels 1-3)
// ============================================================================

/// Attribute path -> flows, for one entity type.
pub type AttributePolicies = BTreeMap<String, Vec<Flow>>;

/// Process-wide default policy: create-entity, top-level and attribute-level
/// flows. Loaded once at startup and never mutated.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyDocument {
    pub create_entity_policy: Vec<Flow>,
    pub top_level_policy: TopLevelPolicy,
    /// Keyed by entity type without the leading `/`, then by dotted path.
    pub attribute_level_policies: BTreeMap<String, AttributePolicies>,
}

impl PolicyDocument {
    /// Parses a JSON policy document and validates it.
    pub fn from_json_str(json: &str) -> Result<Self> {
        let document: Self =
            serde_json::from_str(json).map_err(|e| AbacError::InvalidPolicy(e.to_string()))?;
        document.validate()?;
        Ok(document)
    }

    /// Reads and parses a JSON policy document from disk.
    pub fn from_json_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let json = std::fs::read_to_string(path).map_err(|e| {
            AbacError::InvalidPolicy(format!("cannot read {}: {e}", path.display()))
        })?;
        Self::from_json_str(&json)
    }

    pub fn with_create_flow(mut self, flow: Flow) -> Self {
        self.create_entity_policy.push(flow);
        self
    }

    pub fn with_top_level(mut self, policy: TopLevelPolicy) -> Self {
        self.top_level_policy = policy;
        self
    }

    pub fn with_attribute_policy(
        mut self,
        entity_type: &EntityType,
        path: &str,
        flows: Vec<Flow>,
    ) -> Self {
        self.attribute_level_policies
            .entry(entity_type.short_name().to_string())
            .or_default()
            .insert(path.to_string(), flows);
        self
    }

    /// Type-level attribute defaults for `entity_type`, parsed into paths.
    pub fn attribute_defaults(&self, entity_type: &EntityType) -> BTreeMap<AttributePath, &[Flow]> {
        self.attribute_level_policies
            .get(entity_type.short_name())
            .into_iter()
            .flatten()
            .filter_map(|(raw, flows)| {
                AttributePath::parse(raw)
                    .ok()
                    .map(|path| (path, flows.as_slice()))
            })
            .collect()
    }

    /// Type-level default for one exact path.
    pub fn attribute_default(&self, entity_type: &EntityType, path: &AttributePath) -> Option<&[Flow]> {
        self.attribute_level_policies
            .get(entity_type.short_name())?
            .get(&path.to_string())
            .map(Vec::as_slice)
    }

    /// Checks that every attribute key is a valid, non-reserved path and
    /// every lock is named.
    pub fn validate(&self) -> Result<()> {
        for (entity_type, policies) in &self.attribute_level_policies {
            for (raw, flows) in policies {
                let path = AttributePath::parse(raw).map_err(|e| {
                    AbacError::InvalidPolicy(format!("{entity_type}: {e}"))
                })?;
                if path.is_reserved() {
                    return Err(AbacError::InvalidPolicy(format!(
                        "{entity_type}: attribute '{raw}' is reserved"
                    )));
                }
                validate_flows(flows)?;
            }
        }
        validate_flows(&self.create_entity_policy)?;
        validate_flows(&self.top_level_policy.flows)
    }

    /// The owner/admin policy used when no policy file is configured:
    ///
    /// - anyone may create entities;
    /// - anyone may read whole entities; only the owner or an admin user may
    ///   write or delete them; denied reads withhold the data;
    /// - `/user` passwords and `credentials.dropbox` are readable by the
    ///   owner only; roles are writable by admins only.
    pub fn standard() -> Self {
        let user = EntityType::new(EntityType::USER);
        let owner_write = Flow::write()
            .with_lock(Lock::has_type(EntityType::USER))
            .with_lock(Lock::is_owner());
        let admin_write = Flow::write()
            .with_lock(Lock::has_type(EntityType::USER))
            .with_lock(Lock::attr_eq("role", "admin"));
        let owner_read = Flow::read()
            .with_lock(Lock::has_type(EntityType::USER))
            .with_lock(Lock::is_owner());

        let owner_only = vec![owner_read, owner_write.clone(), admin_write.clone()];

        Self::default()
            .with_create_flow(Flow::write())
            .with_create_flow(Flow::read())
            .with_top_level(
                TopLevelPolicy::new(vec![Flow::read(), owner_write.clone(), admin_write.clone()])
                    .with_action(Op::Read, ActionKind::Delete),
            )
            .with_attribute_policy(&user, "password", owner_only.clone())
            .with_attribute_policy(&user, "role", vec![Flow::read(), admin_write.clone()])
            .with_attribute_policy(
                &user,
                "credentials",
                vec![Flow::read(), owner_write, admin_write],
            )
            .with_attribute_policy(&user, "credentials.dropbox", owner_only)
    }
}

pub(crate) fn validate_flows(flows: &[Flow]) -> Result<()> {
    for flow in flows {
        if let Some(lock) = flow.locks.iter().find(|l| l.name.is_empty()) {
            return Err(AbacError::InvalidPolicy(format!(
                "lock without a name: {lock:?}"
            )));
        }
    }
    Ok(())
}
