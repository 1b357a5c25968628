//! Realization of resolved blueprints for the Stackforge engine.
//!
//! Drives a blueprint through its composition phases, hands each node to
//! a [`provider::ResourceProvider`], and persists cross-stack exports so
//! later passes can import them.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod engine;
pub mod provider;
pub mod store;
