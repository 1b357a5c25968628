//! # stackforge-common
//!
//! Shared types, error definitions, blueprint configuration models, and
//! constants used across the entire Stackforge workspace.
//!
//! This crate is the leaf of the dependency graph: it depends on no other
//! internal crate and provides the primitives the composition and runtime
//! crates build upon.

#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used, clippy::panic))]

pub mod config;
pub mod constants;
pub mod error;
pub mod types;
