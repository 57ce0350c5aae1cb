//! # idmcore-types: Core types for the IDM access-control core
//!
//! This crate contains the shared data model used across the system:
//! - Entity typing ([`EntityType`])
//! - Acting principals ([`Identity`])
//! - Stored records ([`Entity`], [`Group`]) and their two-sided membership
//!   references ([`GroupRef`], [`Member`])
//! - Attribute addressing ([`AttributePath`]) and search criteria
//!   ([`AttributeCriterion`])
//!
//! Entities and identities serialize to the flat JSON shape used by the
//! storage layer: the structural keys (`id`, `type`, `owner`, `groups`) sit
//! next to the open attribute map.

use std::fmt::{self, Display};

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Open, arbitrarily nested attribute map of an entity.
pub type Attributes = serde_json::Map<String, Value>;

/// Separator between the name and the authority of a composite identity id.
pub const ID_SEPARATOR: &str = "!@!";

/// Keys managed by the core itself. They never appear in the open attribute
/// map and are never declassified.
pub const RESERVED_KEYS: [&str; 4] = ["id", "type", "owner", "groups"];

/// Returns `true` if `key` is one of [`RESERVED_KEYS`].
pub fn is_reserved_key(key: &str) -> bool {
    RESERVED_KEYS.contains(&key)
}

/// Removes the reserved keys from an incoming attribute map.
pub fn strip_reserved(mut attributes: Attributes) -> Attributes {
    for key in RESERVED_KEYS {
        attributes.remove(key);
    }
    attributes
}

// ============================================================================
// Errors
// ============================================================================

/// Errors raised while building core types from caller input.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TypesError {
    /// The attribute path is empty or contains an empty segment.
    #[error("invalid attribute path: {0:?}")]
    InvalidPath(String),

    /// The attribute path addresses a key managed by the core.
    #[error("attribute '{0}' is reserved")]
    ReservedAttribute(String),

    /// An intermediate segment of the path holds a non-object value.
    #[error("cannot descend into non-object value at '{0}'")]
    NotAnObject(String),
}

// ============================================================================
// Entity Type
// ============================================================================

/// Type tag of an entity or identity, e.g. `/user` or `/sensor`.
///
/// Always stored with a leading `/`; `EntityType::new("user")` and
/// `EntityType::new("/user")` are equal.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub struct EntityType(String);

impl EntityType {
    /// Wildcard type matching every other type in selectors.
    pub const ANY: &'static str = "/any";
    /// Type of group records.
    pub const GROUP: &'static str = "/group";
    /// Type of user identities.
    pub const USER: &'static str = "/user";

    pub fn new(name: impl Into<String>) -> Self {
        let name = name.into();
        if name.starts_with('/') {
            Self(name)
        } else {
            Self(format!("/{name}"))
        }
    }

    pub fn any() -> Self {
        Self(Self::ANY.to_string())
    }

    pub fn group() -> Self {
        Self(Self::GROUP.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// The type name without its leading `/`, as used for keying
    /// attribute-level policies (`/user` -> `user`).
    pub fn short_name(&self) -> &str {
        &self.0[1..]
    }

    pub fn is_any(&self) -> bool {
        self.0 == Self::ANY
    }

    /// Returns `true` if this type, used as a selector, admits `other`.
    pub fn admits(&self, other: &EntityType) -> bool {
        self.is_any() || self.0.eq_ignore_ascii_case(&other.0)
    }
}

impl Display for EntityType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<String> for EntityType {
    fn from(value: String) -> Self {
        Self::new(value)
    }
}

impl From<&str> for EntityType {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

impl From<EntityType> for String {
    fn from(value: EntityType) -> Self {
        value.0
    }
}

// ============================================================================
// Attribute Path
// ============================================================================

/// A dot-separated path into an entity's attribute tree, e.g.
/// `credentials.dropbox`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct AttributePath(Vec<String>);

impl AttributePath {
    /// Parses a dotted path. Empty paths and empty segments are rejected.
    pub fn parse(path: &str) -> Result<Self, TypesError> {
        if path.is_empty() {
            return Err(TypesError::InvalidPath(path.to_string()));
        }
        let segments: Vec<String> = path.split('.').map(str::to_string).collect();
        if segments.iter().any(String::is_empty) {
            return Err(TypesError::InvalidPath(path.to_string()));
        }
        Ok(Self(segments))
    }

    /// Builds a single-segment path from a key (the key may contain dots).
    pub fn root(key: impl Into<String>) -> Self {
        Self(vec![key.into()])
    }

    /// Returns a new path extended by one segment.
    pub fn child(&self, key: impl Into<String>) -> Self {
        let mut segments = self.0.clone();
        segments.push(key.into());
        Self(segments)
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn depth(&self) -> usize {
        self.0.len()
    }

    /// The first segment of the path.
    pub fn head(&self) -> &str {
        &self.0[0]
    }

    /// The path one level up, or `None` for a root-level path.
    pub fn parent(&self) -> Option<Self> {
        if self.0.len() <= 1 {
            None
        } else {
            Some(Self(self.0[..self.0.len() - 1].to_vec()))
        }
    }

    /// Proper ancestors of this path, nearest first.
    pub fn ancestors(&self) -> impl Iterator<Item = AttributePath> + '_ {
        (1..self.0.len())
            .rev()
            .map(|len| Self(self.0[..len].to_vec()))
    }

    /// Returns `true` if `self` equals `other` or lies above it.
    pub fn is_prefix_of(&self, other: &AttributePath) -> bool {
        other.0.len() >= self.0.len() && other.0[..self.0.len()] == self.0[..]
    }

    /// Returns `true` if the path starts at a reserved key.
    pub fn is_reserved(&self) -> bool {
        is_reserved_key(self.head())
    }

    /// Looks up the value at this path inside an attribute map.
    pub fn lookup<'a>(&self, attributes: &'a Attributes) -> Option<&'a Value> {
        let (first, rest) = self.0.split_first()?;
        let mut current = attributes.get(first)?;
        for segment in rest {
            current = current.as_object()?.get(segment)?;
        }
        Some(current)
    }

    /// Writes `value` at this path, creating intermediate objects as needed.
    pub fn assign(&self, attributes: &mut Attributes, value: Value) -> Result<(), TypesError> {
        let Some((last, parents)) = self.0.split_last() else {
            return Err(TypesError::InvalidPath(String::new()));
        };
        let mut current = attributes;
        for (depth, segment) in parents.iter().enumerate() {
            let slot = current
                .entry(segment.clone())
                .or_insert_with(|| Value::Object(Attributes::new()));
            current = slot
                .as_object_mut()
                .ok_or_else(|| TypesError::NotAnObject(self.0[..=depth].join(".")))?;
        }
        current.insert(last.clone(), value);
        Ok(())
    }
}

impl Display for AttributePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0.join("."))
    }
}

impl std::str::FromStr for AttributePath {
    type Err = TypesError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

// ============================================================================
// Identity
// ============================================================================

/// The acting principal of a request.
///
/// Carries a composite id (`<name>!@!<authority>`), a type tag, and the
/// attributes lock predicates inspect (role, etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Identity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl Identity {
    pub fn new(id: impl Into<String>, entity_type: impl Into<EntityType>) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            attributes: Attributes::new(),
        }
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builds the composite id `<name>!@!<authority>`.
    pub fn compose_id(name: &str, authority: &str) -> String {
        format!("{name}{ID_SEPARATOR}{authority}")
    }

    /// Splits the composite id into `(name, authority)`.
    pub fn split_id(&self) -> Option<(&str, &str)> {
        self.id.split_once(ID_SEPARATOR)
    }

    /// Looks up an attribute by dotted path.
    pub fn attribute(&self, path: &AttributePath) -> Option<&Value> {
        path.lookup(&self.attributes)
    }
}

impl Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.id, self.entity_type)
    }
}

// ============================================================================
// Groups and membership
// ============================================================================

/// Back-reference from an entity to a group it belongs to.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GroupRef {
    pub group_name: String,
    pub owner: String,
}

impl GroupRef {
    pub fn new(group_name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            owner: owner.into(),
        }
    }
}

/// A group member: the `(id, type)` key of an entity.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Member {
    pub entity_id: String,
    #[serde(rename = "entity_type")]
    pub entity_type: EntityType,
}

impl Member {
    pub fn new(entity_id: impl Into<String>, entity_type: impl Into<EntityType>) -> Self {
        Self {
            entity_id: entity_id.into(),
            entity_type: entity_type.into(),
        }
    }
}

/// A group record, keyed by `(group_name, owner)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Group {
    pub group_name: String,
    pub owner: String,
    #[serde(default)]
    pub entities: Vec<Member>,
}

impl Group {
    pub fn new(group_name: impl Into<String>, owner: impl Into<String>) -> Self {
        Self {
            group_name: group_name.into(),
            owner: owner.into(),
            entities: Vec::new(),
        }
    }

    pub fn group_ref(&self) -> GroupRef {
        GroupRef::new(self.group_name.clone(), self.owner.clone())
    }

    pub fn has_member(&self, member: &Member) -> bool {
        self.entities.contains(member)
    }

    /// Adds a member. Returns `false` if it was already present.
    pub fn add_member(&mut self, member: Member) -> bool {
        if self.has_member(&member) {
            return false;
        }
        self.entities.push(member);
        true
    }

    /// Removes a member. Returns `false` if it was not present.
    pub fn remove_member(&mut self, member: &Member) -> bool {
        let before = self.entities.len();
        self.entities.retain(|m| m != member);
        self.entities.len() != before
    }

    /// A synthetic entity view of the group, used as the subject of access
    /// decisions about the group itself.
    pub fn as_subject(&self) -> Entity {
        Entity::new(
            self.group_name.clone(),
            EntityType::group(),
            self.owner.clone(),
            Attributes::new(),
        )
    }
}

// ============================================================================
// Entity
// ============================================================================

/// A stored record uniquely keyed by `(id, type)`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Entity {
    pub id: String,
    #[serde(rename = "type")]
    pub entity_type: EntityType,
    pub owner: String,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub groups: Vec<GroupRef>,
    #[serde(flatten)]
    pub attributes: Attributes,
}

impl Entity {
    pub fn new(
        id: impl Into<String>,
        entity_type: impl Into<EntityType>,
        owner: impl Into<String>,
        attributes: Attributes,
    ) -> Self {
        Self {
            id: id.into(),
            entity_type: entity_type.into(),
            owner: owner.into(),
            groups: Vec::new(),
            attributes: strip_reserved(attributes),
        }
    }

    /// Looks up an attribute by dotted path.
    pub fn attribute(&self, path: &AttributePath) -> Option<&Value> {
        path.lookup(&self.attributes)
    }

    /// Sets an attribute by dotted path. Reserved keys are rejected.
    pub fn set_attribute(&mut self, path: &AttributePath, value: Value) -> Result<(), TypesError> {
        if path.is_reserved() {
            return Err(TypesError::ReservedAttribute(path.to_string()));
        }
        path.assign(&mut self.attributes, value)
    }

    /// Views this entity as an acting identity (used when a stored user
    /// record becomes the actor of a later call).
    pub fn as_identity(&self) -> Identity {
        Identity {
            id: self.id.clone(),
            entity_type: self.entity_type.clone(),
            attributes: self.attributes.clone(),
        }
    }

    pub fn is_member_of(&self, group: &GroupRef) -> bool {
        self.groups.contains(group)
    }

    /// Adds a group back-reference. Returns `false` if already present.
    pub fn add_group(&mut self, group: GroupRef) -> bool {
        if self.is_member_of(&group) {
            return false;
        }
        self.groups.push(group);
        true
    }

    /// Removes a group back-reference. Returns `false` if it was absent.
    pub fn remove_group(&mut self, group: &GroupRef) -> bool {
        let before = self.groups.len();
        self.groups.retain(|g| g != group);
        self.groups.len() != before
    }

    pub fn member_key(&self) -> Member {
        Member::new(self.id.clone(), self.entity_type.clone())
    }
}

// ============================================================================
// Search criteria
// ============================================================================

/// One `(attribute, value)` equality constraint of an attribute search.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AttributeCriterion {
    /// Attribute name; may be a dotted path.
    pub attribute_type: String,
    pub attribute_value: String,
}

impl AttributeCriterion {
    pub fn new(attribute_type: impl Into<String>, attribute_value: impl Into<String>) -> Self {
        Self {
            attribute_type: attribute_type.into(),
            attribute_value: attribute_value.into(),
        }
    }

    /// Returns `true` if the entity holds the expected value at the
    /// criterion's path. Strings compare by equality, other scalars by their
    /// JSON text.
    pub fn matches(&self, entity: &Entity) -> bool {
        let Ok(path) = AttributePath::parse(&self.attribute_type) else {
            return false;
        };
        match entity.attribute(&path) {
            Some(Value::String(s)) => *s == self.attribute_value,
            Some(v @ (Value::Number(_) | Value::Bool(_))) => {
                v.to_string() == self.attribute_value
            }
            _ => false,
        }
    }
}
