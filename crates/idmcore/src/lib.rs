//! # idmcore: Attribute-based access control for entity stores
//!
//! `idmcore` guards every create, read, update and delete on stored entities
//! and groups with an ABAC decision, and strips the attributes an actor may
//! not see from every result it returns.
//!
//! ## Quick Start
//!
//! ```
//! use idmcore::{EntityType, IdmCore, Identity, PolicyDocument};
//! use serde_json::json;
//!
//! # tokio_test_block_on(async {
//! let core = IdmCore::new(PolicyDocument::standard());
//! let admin = Identity::new("bob!@!agile-local", "/user").with_attribute("role", "admin");
//!
//! let attrs = json!({"name": "Barack Obam2a", "token": "DC 20500"});
//! let sensor = EntityType::new("/sensor");
//! let created = core
//!     .create_entity(&admin, "323", &sensor, attrs.as_object().cloned().unwrap())
//!     .await
//!     .unwrap();
//! assert_eq!(created.owner, admin.id);
//!
//! let read = core.read_entity(&admin, "323", &sensor).await.unwrap();
//! assert_eq!(read, created);
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │                       IdmCore                        │
//! │   entities  ·  groups  ·  policies  ·  schemas       │
//! ├────────────────────────┬─────────────────────────────┤
//! │  Declassifier (pep)    │  Pdp + PolicyResolver (abac)│
//! ├────────────────────────┴─────────────────────────────┤
//! │  Storage  ·  PolicyStore  ·  LockEvaluator           │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Every collaborator sits behind a trait and is injected through
//! [`IdmCore::builder`]; [`IdmCore::from_config`] wires the in-memory
//! defaults from an [`IdmConfig`].

mod entities;
mod error;
mod groups;
mod service;
mod policies;
pub mod schema;

pub use error::{IdmError, Result};
pub use service::{IdmCore, IdmCoreBuilder};
pub use schema::{Schema, SchemaRegistry, SchemaValidator, SchemaViolation};

// Re-export the data model and collaborator seams.
pub use idmcore_abac::{
    ActionKind, CacheSettings, CachedPolicyStore, EntityPolicies, Flow, Lock, LockError,
    LockEvaluator, LockRegistry, MemoryPolicyStore, Op, Operation, PolicyDocument, PolicyNode,
    PolicyStore, PolicyStoreError, TopLevelPolicy,
};
pub use idmcore_config::{ConfigLoader, IdmConfig};
pub use idmcore_pep::Declassifier;
pub use idmcore_storage::{MemoryStorage, Storage, StorageError};
pub use idmcore_types::{
    AttributeCriterion, AttributePath, Attributes, Entity, EntityType, Group, GroupRef, Identity,
    Member,
};
