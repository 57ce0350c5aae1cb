//! # idmcore-pep: Policy Enforcement Point
//!
//! Removes the attributes an actor may not read from entities before they are
//! returned. Pruning is two-phase:
//!
//! 1. [`Declassifier::denied_paths`] walks the attribute tree depth-first and
//!    asks the [`Pdp`](idmcore_abac::Pdp) about every path. A denied object is
//!    not descended into.
//! 2. [`prune`] rebuilds a new tree without the denied paths. The input entity
//!    is never modified.
//!
//! Structural keys (`id`, `type`, `owner`, `groups`) are never pruned. Arrays
//! are leaves.

mod declassify;

#[cfg(test)]
mod tests;

pub use declassify::{Declassifier, prune};
