//! Resource provider abstraction.
//!
//! The engine never talks to a cloud API itself. A provider receives one
//! node at a time, with every attribute reference already resolved, and
//! reports the values the realized resource produced.

pub mod simulated;

use std::collections::BTreeMap;

use serde_json::Value;
use stackforge_common::error::Result;
use stackforge_common::types::{ProducedValues, ResourceId, ResourceKind};
use stackforge_compose::node::ResourceNode;
use stackforge_compose::scaling::ScalingPolicy;
use stackforge_compose::trigger::TriggerBinding;

/// Everything a provider needs to realize one node.
#[derive(Debug, Clone)]
pub struct RealizeRequest<'a> {
    /// The node being realized.
    pub node: &'a ResourceNode,
    /// Node configuration with references replaced by concrete values.
    pub config: BTreeMap<String, Value>,
    /// Policy documents in which the node is the principal.
    pub policies: Vec<Value>,
}

impl RealizeRequest<'_> {
    /// Id of the node being realized.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        self.node.id()
    }

    /// Kind of the node being realized.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.node.kind()
    }

    /// A resolved string attribute.
    #[must_use]
    pub fn str_value(&self, key: &str) -> Option<&str> {
        self.config.get(key).and_then(Value::as_str)
    }

    /// Autoscaling policy to attach, for service nodes.
    #[must_use]
    pub const fn scaling(&self) -> Option<&ScalingPolicy> {
        self.node.scaling()
    }

    /// Source-control trigger to register, for build nodes.
    #[must_use]
    pub const fn trigger(&self) -> Option<&TriggerBinding> {
        self.node.trigger()
    }
}

/// Materializes resource nodes.
///
/// Implementors are handed nodes in creation order and must be safe to
/// share across threads.
pub trait ResourceProvider: Send + Sync {
    /// Realizes a node and returns the values it produced.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be created.
    fn realize(&self, request: &RealizeRequest<'_>) -> Result<ProducedValues>;

    /// Tears down a previously realized node.
    ///
    /// # Errors
    ///
    /// Returns an error if the resource cannot be removed.
    fn teardown(&self, node: &ResourceNode) -> Result<()> {
        tracing::debug!(id = %node.id(), "teardown is a no-op for this provider");
        Ok(())
    }
}
