//! Unified error types for the Stackforge workspace.
//!
//! Every violation is raised at the point where it is detected. None of
//! these variants is ever downgraded to a warning.

use std::path::PathBuf;

use thiserror::Error;

use crate::types::{ResourceId, ResourceKind};

/// Top-level error type shared across the workspace.
#[derive(Debug, Error)]
pub enum StackforgeError {
    /// An I/O operation failed.
    #[error("I/O error at {path}: {source}")]
    Io {
        /// Path where the I/O error occurred.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// A configuration value is invalid.
    #[error("invalid configuration: {message}")]
    Config {
        /// Description of the invalid configuration.
        message: String,
    },

    /// A required resource was not found.
    #[error("{kind} not found: {id}")]
    NotFound {
        /// Type of the missing resource.
        kind: &'static str,
        /// Identifier of the missing resource.
        id: String,
    },

    /// Serialization or deserialization failed.
    #[error("serialization error: {source}")]
    Serialization {
        /// Underlying serialization error.
        #[from]
        source: serde_json::Error,
    },

    /// A resource id was issued or inserted twice.
    #[error("duplicate resource id: {id}")]
    DuplicateResource {
        /// The colliding id.
        id: ResourceId,
    },

    /// Adding a dependency edge would close a cycle.
    #[error("dependency {from} -> {to} would create a cycle")]
    Cycle {
        /// Dependent node.
        from: ResourceId,
        /// Dependency node.
        to: ResourceId,
    },

    /// An action verb is not recognized for the resource kind.
    #[error("action \"{verb}\" is not supported on {kind} resources")]
    UnsupportedAction {
        /// The verb as supplied by the caller.
        verb: String,
        /// Kind of the resource the grant targets.
        kind: ResourceKind,
    },

    /// A grant was requested with no actions.
    #[error("grant from {principal} on {resource} names no actions")]
    EmptyGrant {
        /// Principal of the rejected grant.
        principal: ResourceId,
        /// Rendered grant target.
        resource: String,
    },

    /// A verb's scope does not match the grant target.
    #[error("action {verb} is {scope}-scoped and cannot target {resource}")]
    ScopeMismatch {
        /// Canonical verb.
        verb: String,
        /// Scope the verb requires (`resource` or `account`).
        scope: &'static str,
        /// Rendered grant target.
        resource: String,
    },

    /// A scaling intent violates its invariants.
    #[error("invalid scaling intent for {target}: {reason}")]
    InvalidScalingIntent {
        /// Node the intent targets.
        target: ResourceId,
        /// Which invariant failed.
        reason: String,
    },

    /// A trigger filter is malformed.
    #[error("invalid trigger filter: {reason}")]
    InvalidFilter {
        /// Which part of the filter is wrong.
        reason: String,
    },

    /// A build resource already has a trigger binding.
    #[error("{target} already has a trigger binding")]
    DuplicateBinding {
        /// The already-bound target.
        target: ResourceId,
    },

    /// An export name is already taken.
    #[error("export name already published: {name}")]
    DuplicateExport {
        /// The colliding export name.
        name: String,
    },

    /// The resource provider failed to realize a node.
    #[error("provider failed to realize {id}: {message}")]
    Provider {
        /// Node being realized.
        id: ResourceId,
        /// Provider-supplied description.
        message: String,
    },

    /// Realization was aborted from outside the driver.
    #[error("realization cancelled")]
    Cancelled,

    /// An operation was invoked in the wrong composition phase.
    #[error("composition is {actual}, expected {expected}")]
    InvalidState {
        /// Phase the operation requires.
        expected: &'static str,
        /// Phase the composition is in.
        actual: String,
    },

    /// Realization stopped part way through the graph.
    #[error(
        "partial realization: {} realized, {} pending: {source}",
        realized.len(),
        pending.len()
    )]
    PartialRealization {
        /// Nodes realized before the failure, in realization order.
        realized: Vec<ResourceId>,
        /// Nodes not realized, in the order they would have been.
        pending: Vec<ResourceId>,
        /// The failure that stopped realization.
        #[source]
        source: Box<StackforgeError>,
    },
}

/// Convenience alias used throughout the workspace.
pub type Result<T> = std::result::Result<T, StackforgeError>;
