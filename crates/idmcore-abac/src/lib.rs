//! # idmcore-abac: Attribute-Based Access Control
//!
//! Policy model, policy resolution and access decisions for the IDM core.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────┐
//! │  Access Request                              │
//! │  (Actor Identity + Operation + Subject)      │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Policy Resolver                             │
//! │  ├─ Levels 1-3 from the PolicyDocument       │
//! │  ├─ Level 4 overrides from the PolicyStore   │
//! │  └─ Nearest-ancestor inheritance             │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Pdp                                         │
//! │  ├─ OR across flows, AND across locks        │
//! │  ├─ Locks via the LockEvaluator              │
//! │  └─ Deny by default                          │
//! └─────────────────┬───────────────────────────┘
//!                   │
//!                   ▼
//! ┌─────────────────────────────────────────────┐
//! │  Verdict                                     │
//! │  - Decision (allowed, matched flow, reason)  │
//! │  - Actions to run on denial                  │
//! └─────────────────────────────────────────────┘
//! ```
//!
//! ## Examples
//!
//! ```
//! use std::sync::Arc;
//! use idmcore_abac::{LockRegistry, MemoryPolicyStore, Operation, Pdp, PolicyDocument, PolicyResolver};
//! use idmcore_types::{Attributes, Entity, Identity};
//!
//! # tokio_test_block_on(async {
//! let resolver = PolicyResolver::new(
//!     Arc::new(PolicyDocument::standard()),
//!     Arc::new(MemoryPolicyStore::new()),
//! );
//! let pdp = Pdp::new(resolver, Arc::new(LockRegistry::with_builtin_locks())).without_audit();
//!
//! let actor = Identity::new("alice!@!agile-local", "/user");
//! let sensor = Entity::new("323", "/sensor", "alice!@!agile-local", Attributes::new());
//!
//! let verdict = pdp.decide(&actor, &Operation::Delete, &sensor).await.unwrap();
//! assert!(verdict.allowed());
//! # });
//! # fn tokio_test_block_on<F: std::future::Future>(f: F) -> F::Output {
//! #     tokio::runtime::Builder::new_current_thread().build().unwrap().block_on(f)
//! # }
//! ```

mod cache;
pub mod error;
pub mod evaluator;
pub mod locks;
pub mod pdp;
pub mod policy;
pub mod resolver;
pub mod store;

pub use error::{AbacError, Result};
pub use evaluator::{Decision, evaluate};
pub use locks::{LockError, LockEvaluator, LockRegistry};
pub use pdp::{Pdp, Verdict};
pub use policy::{
    Action, ActionKind, AttributePolicies, Flow, Lock, Op, Operation, PolicyDocument, Selector,
    TopLevelPolicy,
};
pub use resolver::{EffectivePolicy, EntityPolicies, PolicyNode, PolicyOrigin, PolicyResolver};
pub use store::{CacheSettings, CachedPolicyStore, MemoryPolicyStore, PolicyStore, PolicyStoreError};
