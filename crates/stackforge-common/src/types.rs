//! Domain primitive types used across the Stackforge workspace.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a resource node within one composition.
///
/// Ids are normally issued by the compose crate's identity registry,
/// which checks them for collisions.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct ResourceId(String);

impl ResourceId {
    /// Creates a resource id from a string value.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Returns the inner string representation.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ResourceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The kind of infrastructure unit a node describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResourceKind {
    /// Virtual network with subnets and NAT gateways.
    Network,
    /// Container cluster.
    Cluster,
    /// Containerized task definition.
    TaskDefinition,
    /// Load-balanced service running a task definition.
    Service,
    /// Build/CI project.
    BuildProject,
    /// Container image repository.
    Repository,
    /// Access role.
    Role,
    /// Log group receiving container logs.
    LogGroup,
    /// Object storage bucket for build artifacts.
    Bucket,
}

impl ResourceKind {
    /// Every kind, in declaration order.
    pub const ALL: [Self; 9] = [
        Self::Network,
        Self::Cluster,
        Self::TaskDefinition,
        Self::Service,
        Self::BuildProject,
        Self::Repository,
        Self::Role,
        Self::LogGroup,
        Self::Bucket,
    ];

    /// Short lowercase name used in ids, logs and error messages.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Network => "network",
            Self::Cluster => "cluster",
            Self::TaskDefinition => "task-definition",
            Self::Service => "service",
            Self::BuildProject => "build-project",
            Self::Repository => "repository",
            Self::Role => "role",
            Self::LogGroup => "log-group",
            Self::Bucket => "bucket",
        }
    }
}

impl fmt::Display for ResourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Named values a provider returns once a node is realized.
pub type ProducedValues = BTreeMap<String, String>;

/// Who may read an export.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Visibility {
    /// Visible only in the output set of the pass that published it.
    Local,
    /// Importable by name from other composition passes.
    CrossStack,
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Local => write!(f, "local"),
            Self::CrossStack => write!(f, "cross-stack"),
        }
    }
}

/// Lifecycle phase of a composition pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum CompositionPhase {
    /// Nodes and edges are being accumulated.
    Building,
    /// Order is fixed and nodes are annotated.
    Resolved,
    /// Nodes are being handed to the provider.
    Realizing,
    /// Every node is realized and outputs are published.
    Realized,
    /// Terminal failure.
    Failed,
}

impl CompositionPhase {
    /// Lowercase phase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Building => "building",
            Self::Resolved => "resolved",
            Self::Realizing => "realizing",
            Self::Realized => "realized",
            Self::Failed => "failed",
        }
    }
}

impl fmt::Display for CompositionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
