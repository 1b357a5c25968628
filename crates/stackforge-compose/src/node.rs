//! Resource nodes and their configuration attributes.
//!
//! A node's configuration may read values that other nodes produce once
//! realized, or values another stack exported. Those references are kept
//! symbolic until realization, when [`Attribute::resolve`] turns them into
//! concrete JSON values.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use stackforge_common::constants::INTERPOLATION_PLACEHOLDER;
use stackforge_common::error::{Result, StackforgeError};
use stackforge_common::types::{ProducedValues, ResourceId, ResourceKind};

use crate::permission::PolicyStatement;
use crate::scaling::ScalingPolicy;
use crate::trigger::TriggerBinding;

/// A named value produced by a realized node.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputRef {
    /// Producing node.
    pub node: ResourceId,
    /// Key in the node's produced values.
    pub key: String,
}

/// One configuration value of a node or export.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Attribute {
    /// A fixed value.
    Literal(Value),
    /// A value another node produces.
    Output(OutputRef),
    /// A produced value spliced into a template at `{}`.
    Interpolated {
        /// Template containing the placeholder.
        template: String,
        /// Value substituted for the placeholder.
        output: OutputRef,
    },
    /// A cross-stack export published by another composition pass.
    Import {
        /// Qualified export name.
        export: String,
    },
}

impl Attribute {
    /// Creates a literal attribute.
    #[must_use]
    pub fn literal(value: impl Into<Value>) -> Self {
        Self::Literal(value.into())
    }

    /// Creates a reference to a produced value.
    #[must_use]
    pub fn output(node: &ResourceId, key: impl Into<String>) -> Self {
        Self::Output(OutputRef {
            node: node.clone(),
            key: key.into(),
        })
    }

    /// Creates a template with a produced value substituted for `{}`.
    #[must_use]
    pub fn interpolated(template: impl Into<String>, node: &ResourceId, key: impl Into<String>) -> Self {
        Self::Interpolated {
            template: template.into(),
            output: OutputRef {
                node: node.clone(),
                key: key.into(),
            },
        }
    }

    /// Creates a reference to another stack's export.
    #[must_use]
    pub fn import(export: impl Into<String>) -> Self {
        Self::Import {
            export: export.into(),
        }
    }

    /// The node this attribute reads from, if any.
    #[must_use]
    pub const fn dependency(&self) -> Option<&ResourceId> {
        match self {
            Self::Output(output) | Self::Interpolated { output, .. } => Some(&output.node),
            Self::Literal(_) | Self::Import { .. } => None,
        }
    }

    /// Checks the attribute is well formed.
    ///
    /// # Errors
    ///
    /// Returns an error if an interpolation template has no placeholder or
    /// a reference has an empty key or export name.
    pub fn check(&self) -> Result<()> {
        let problem = match self {
            Self::Literal(_) => None,
            Self::Output(output) => output.key.is_empty().then_some("empty output key"),
            Self::Interpolated { template, output } => {
                if template.contains(INTERPOLATION_PLACEHOLDER) {
                    output.key.is_empty().then_some("empty output key")
                } else {
                    Some("template has no {} placeholder")
                }
            }
            Self::Import { export } => export.is_empty().then_some("empty export name"),
        };
        problem.map_or(Ok(()), |why| {
            Err(StackforgeError::Config {
                message: format!("malformed attribute: {why}"),
            })
        })
    }

    /// Resolves the attribute to a concrete value.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::NotFound`] if a referenced node has not
    /// produced the key, or an imported export does not exist.
    pub fn resolve(&self, scope: &ValueScope<'_>) -> Result<Value> {
        match self {
            Self::Literal(value) => Ok(value.clone()),
            Self::Output(output) => scope.produced(output).map(Value::from),
            Self::Interpolated { template, output } => {
                let value = scope.produced(output)?;
                Ok(Value::from(template.replace(INTERPOLATION_PLACEHOLDER, &value)))
            }
            Self::Import { export } => scope
                .imports
                .get(export)
                .map(|value| Value::from(value.as_str()))
                .ok_or_else(|| StackforgeError::NotFound {
                    kind: "export",
                    id: export.clone(),
                }),
        }
    }
}

/// Where attribute references are looked up during realization.
#[derive(Debug, Clone, Copy)]
pub struct ValueScope<'a> {
    /// Realized nodes of the current pass.
    pub nodes: &'a crate::graph::DependencyGraph,
    /// Cross-stack exports available to the pass.
    pub imports: &'a BTreeMap<String, String>,
}

impl ValueScope<'_> {
    fn produced(&self, output: &OutputRef) -> Result<String> {
        self.nodes
            .node(&output.node)
            .and_then(|node| node.produced_value(&output.key))
            .map(str::to_owned)
            .ok_or_else(|| StackforgeError::NotFound {
                kind: "produced value",
                id: format!("{}.{}", output.node, output.key),
            })
    }
}

/// A typed description of one infrastructure unit.
#[derive(Debug, Clone)]
pub struct ResourceNode {
    id: ResourceId,
    kind: ResourceKind,
    config: BTreeMap<String, Attribute>,
    produced: Option<ProducedValues>,
    policies: Vec<PolicyStatement>,
    scaling: Option<ScalingPolicy>,
    trigger: Option<TriggerBinding>,
}

impl ResourceNode {
    /// Creates an unrealized node.
    #[must_use]
    pub fn new(id: ResourceId, kind: ResourceKind, config: BTreeMap<String, Attribute>) -> Self {
        Self {
            id,
            kind,
            config,
            produced: None,
            policies: Vec::new(),
            scaling: None,
            trigger: None,
        }
    }

    /// Node identity.
    #[must_use]
    pub const fn id(&self) -> &ResourceId {
        &self.id
    }

    /// Node kind.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        self.kind
    }

    /// Kind-specific configuration.
    #[must_use]
    pub const fn config(&self) -> &BTreeMap<String, Attribute> {
        &self.config
    }

    /// Nodes this node's configuration reads from.
    pub fn referenced_nodes(&self) -> impl Iterator<Item = &ResourceId> {
        self.config.values().filter_map(Attribute::dependency)
    }

    /// Values produced by realization, once realized.
    #[must_use]
    pub const fn produced(&self) -> Option<&ProducedValues> {
        self.produced.as_ref()
    }

    /// A single produced value.
    #[must_use]
    pub fn produced_value(&self, key: &str) -> Option<&str> {
        self.produced.as_ref()?.get(key).map(String::as_str)
    }

    /// Whether the provider has realized this node.
    #[must_use]
    pub const fn is_realized(&self) -> bool {
        self.produced.is_some()
    }

    /// Records the provider's produced values.
    ///
    /// # Errors
    ///
    /// Returns an error if the node was already realized.
    pub fn record_produced(&mut self, values: ProducedValues) -> Result<()> {
        if self.produced.is_some() {
            return Err(StackforgeError::Config {
                message: format!("node {} is already realized", self.id),
            });
        }
        self.produced = Some(values);
        Ok(())
    }

    /// Policy statements in which this node is the principal.
    #[must_use]
    pub fn policies(&self) -> &[PolicyStatement] {
        &self.policies
    }

    /// Resolved autoscaling policy, for service nodes.
    #[must_use]
    pub const fn scaling(&self) -> Option<&ScalingPolicy> {
        self.scaling.as_ref()
    }

    /// Source-control trigger, for build nodes.
    #[must_use]
    pub const fn trigger(&self) -> Option<&TriggerBinding> {
        self.trigger.as_ref()
    }

    pub(crate) fn attach_policy(&mut self, statement: PolicyStatement) {
        self.policies.push(statement);
    }

    pub(crate) fn attach_scaling(&mut self, policy: ScalingPolicy) {
        self.scaling = Some(policy);
    }

    pub(crate) fn attach_trigger(&mut self, binding: TriggerBinding) {
        self.trigger = Some(binding);
    }
}
