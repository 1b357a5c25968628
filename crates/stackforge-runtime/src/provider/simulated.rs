//! In-process provider that fabricates produced values.
//!
//! Every node gets an ARN-like `arn` plus the kind-specific keys other
//! nodes and exports read. Values are derived from the node id only, so
//! two runs over the same blueprint produce identical outputs.

use std::collections::{BTreeMap, HashSet};
use std::sync::{Mutex, PoisonError};

use serde_json::Value;
use stackforge_common::constants::{
    APP_NAME, ARN_OUTPUT, OUTPUT_BUCKET_NAME, OUTPUT_CLUSTER_NAME, OUTPUT_LOAD_BALANCER_DNS,
    OUTPUT_LOG_GROUP_NAME, OUTPUT_PROJECT_NAME, OUTPUT_REPOSITORY_URI, OUTPUT_SERVICE_NAME,
    OUTPUT_VPC_ID,
};
use stackforge_common::error::{Result, StackforgeError};
use stackforge_common::types::{ProducedValues, ResourceId, ResourceKind};
use stackforge_compose::node::ResourceNode;

use super::{RealizeRequest, ResourceProvider};

const ACCOUNT: &str = "000000000000";
const REGION: &str = "sim-local-1";

/// What the provider saw for one realized node.
#[derive(Debug, Clone, PartialEq)]
pub struct RealizedRecord {
    /// Realized node.
    pub id: ResourceId,
    /// Node kind.
    pub kind: ResourceKind,
    /// Resolved configuration it was handed.
    pub config: BTreeMap<String, Value>,
    /// Policy documents it was handed.
    pub policies: Vec<Value>,
}

/// Deterministic provider for dry runs and tests.
#[derive(Debug, Default)]
pub struct SimulatedProvider {
    failing: HashSet<ResourceId>,
    realized: Mutex<Vec<RealizedRecord>>,
    torn_down: Mutex<Vec<ResourceId>>,
}

impl SimulatedProvider {
    /// Creates a provider that realizes every node.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes realization of `id` fail with a provider error.
    #[must_use]
    pub fn failing_on(mut self, id: ResourceId) -> Self {
        let _ = self.failing.insert(id);
        self
    }

    /// Nodes realized so far, in the order they were handed over.
    #[must_use]
    pub fn realized(&self) -> Vec<ResourceId> {
        self.records().into_iter().map(|record| record.id).collect()
    }

    /// Full records of realized nodes.
    #[must_use]
    pub fn records(&self) -> Vec<RealizedRecord> {
        self.realized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Nodes torn down so far, in order.
    #[must_use]
    pub fn torn_down(&self) -> Vec<ResourceId> {
        self.torn_down
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl ResourceProvider for SimulatedProvider {
    fn realize(&self, request: &RealizeRequest<'_>) -> Result<ProducedValues> {
        let id = request.id();
        if self.failing.contains(id) {
            tracing::warn!(id = %id, "simulated provider failure");
            return Err(StackforgeError::Provider {
                id: id.clone(),
                message: "simulated failure".into(),
            });
        }

        let values = fabricate(request);
        tracing::info!(id = %id, kind = %request.kind(), outputs = values.len(), "realized (simulated)");
        self.realized
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(RealizedRecord {
                id: id.clone(),
                kind: request.kind(),
                config: request.config.clone(),
                policies: request.policies.clone(),
            });
        Ok(values)
    }

    fn teardown(&self, node: &ResourceNode) -> Result<()> {
        tracing::info!(id = %node.id(), "torn down (simulated)");
        self.torn_down
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(node.id().clone());
        Ok(())
    }
}

fn fabricate(request: &RealizeRequest<'_>) -> ProducedValues {
    let id = request.id().as_str();
    let kind = request.kind();
    let mut values = ProducedValues::new();
    let _ = values.insert(
        ARN_OUTPUT.into(),
        format!("arn:{APP_NAME}:{}:{REGION}:{ACCOUNT}:{id}", kind.as_str()),
    );

    let extra = match kind {
        ResourceKind::Network => Some((OUTPUT_VPC_ID, format!("vpc-{id}"))),
        ResourceKind::Cluster => Some((OUTPUT_CLUSTER_NAME, id.to_string())),
        ResourceKind::Repository => Some((
            OUTPUT_REPOSITORY_URI,
            format!("{ACCOUNT}.dkr.ecr.{REGION}.example.com/{id}"),
        )),
        ResourceKind::Service => {
            let _ = values.insert(
                OUTPUT_LOAD_BALANCER_DNS.into(),
                format!("{id}.elb.{REGION}.example.com"),
            );
            Some((OUTPUT_SERVICE_NAME, named(request, "service_name")))
        }
        ResourceKind::BuildProject => Some((OUTPUT_PROJECT_NAME, named(request, "project_name"))),
        ResourceKind::LogGroup => Some((OUTPUT_LOG_GROUP_NAME, id.to_string())),
        ResourceKind::Bucket => Some((OUTPUT_BUCKET_NAME, id.to_string())),
        ResourceKind::Role | ResourceKind::TaskDefinition => None,
    };
    if let Some((key, value)) = extra {
        let _ = values.insert(key.into(), value);
    }
    values
}

fn named(request: &RealizeRequest<'_>, key: &str) -> String {
    request
        .str_value(key)
        .map_or_else(|| request.id().to_string(), str::to_owned)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn node(id: &str, kind: ResourceKind) -> ResourceNode {
        ResourceNode::new(ResourceId::new(id), kind, BTreeMap::new())
    }

    fn request(node: &ResourceNode) -> RealizeRequest<'_> {
        RealizeRequest {
            node,
            config: BTreeMap::new(),
            policies: Vec::new(),
        }
    }

    #[test]
    fn fabricates_kind_specific_outputs() {
        let provider = SimulatedProvider::new();
        let vpc = node("ecs-vpc-demo", ResourceKind::Network);
        let values = provider.realize(&request(&vpc)).expect("realize");
        assert_eq!(values.get(OUTPUT_VPC_ID).map(String::as_str), Some("vpc-ecs-vpc-demo"));
        assert!(values[ARN_OUTPUT].contains("network"));
    }

    #[test]
    fn service_name_comes_from_config() {
        let provider = SimulatedProvider::new();
        let svc = node("ecs-service-demo", ResourceKind::Service);
        let mut req = request(&svc);
        let _ = req.config.insert("service_name".into(), Value::from("api"));
        let values = provider.realize(&req).expect("realize");
        assert_eq!(values.get(OUTPUT_SERVICE_NAME).map(String::as_str), Some("api"));
        assert!(values.contains_key(OUTPUT_LOAD_BALANCER_DNS));
    }

    #[test]
    fn output_is_deterministic() {
        let repo = node("ecr-repo-demo", ResourceKind::Repository);
        let first = SimulatedProvider::new().realize(&request(&repo)).expect("first");
        let second = SimulatedProvider::new().realize(&request(&repo)).expect("second");
        assert_eq!(first, second);
    }

    #[test]
    fn failing_node_is_not_recorded() {
        let provider = SimulatedProvider::new().failing_on(ResourceId::new("bad"));
        let bad = node("bad", ResourceKind::Role);
        let err = provider.realize(&request(&bad)).unwrap_err();
        assert!(matches!(err, StackforgeError::Provider { .. }));
        assert!(provider.realized().is_empty());
    }

    #[test]
    fn records_realization_and_teardown_order() {
        let provider = SimulatedProvider::new();
        let a = node("a", ResourceKind::Bucket);
        let b = node("b", ResourceKind::LogGroup);
        let _ = provider.realize(&request(&a)).expect("a");
        let _ = provider.realize(&request(&b)).expect("b");
        provider.teardown(&b).expect("teardown b");
        assert_eq!(provider.realized(), vec![ResourceId::new("a"), ResourceId::new("b")]);
        assert_eq!(provider.torn_down(), vec![ResourceId::new("b")]);
    }
}
