//! # stackforge-compose
//!
//! Builds the resource graph of a service blueprint and resolves
//! everything the provider needs before realization.
//!
//! Handles:
//! - **Naming**: Structured, collision-checked resource ids.
//! - **Node**: Resource descriptions and their attribute references.
//! - **Graph**: Dependency graph construction and deterministic ordering.
//! - **Permission**: Least-privilege policy statements between resources.
//! - **Scaling**: Autoscaling policy resolution from declarative intent.
//! - **Trigger**: Source-control event bindings for build resources.
//! - **Export**: Named outputs published for the pass and other stacks.
//! - **Blueprint**: Declarative assembly of all of the above.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod blueprint;
pub mod export;
pub mod graph;
pub mod naming;
pub mod node;
pub mod permission;
pub mod scaling;
pub mod trigger;
