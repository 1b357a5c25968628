//! Declarative blueprint assembly.
//!
//! A [`Blueprint`] accumulates resource nodes, dependency edges, access
//! grants, scaling intents, trigger bindings and export declarations.
//! Each declaration is checked when it is made. [`Blueprint::resolve`] then
//! fixes the creation order and annotates every node with what the provider
//! needs to realize it.
//!
//! [`Blueprint::from_config`] walks a [`BlueprintConfig`] into the standard
//! load-balanced service topology: image repository, network, cluster,
//! task definition with its roles and log group, service, artifact bucket
//! and build project.

use std::collections::BTreeMap;
use std::path::Path;

use serde_json::json;
use stackforge_common::config::BlueprintConfig;
use stackforge_common::constants::{
    ARN_OUTPUT, BUILD_SPEC_VERSION, IMAGE_DEFINITIONS_FILE, LOG_STREAM_PREFIX,
    OUTPUT_BUCKET_NAME, OUTPUT_CLUSTER_NAME, OUTPUT_LOAD_BALANCER_DNS, OUTPUT_LOG_GROUP_NAME,
    OUTPUT_PROJECT_NAME, OUTPUT_REPOSITORY_URI, OUTPUT_SERVICE_NAME, OUTPUT_VPC_ID,
    TASK_SERVICE_PRINCIPAL,
};
use stackforge_common::error::{Result, StackforgeError};
use stackforge_common::types::{ResourceId, ResourceKind, Visibility};

use crate::export::{ExportDecl, qualified_name};
use crate::graph::DependencyGraph;
use crate::naming::IdentityRegistry;
use crate::node::{Attribute, ResourceNode};
use crate::permission::{GrantTarget, PermissionSynthesizer};
use crate::scaling::{self, ScalingIntent};
use crate::trigger::{EventSource, FilterSpec, TriggerBinder};

/// A service blueprint under construction.
#[derive(Debug, Clone)]
pub struct Blueprint {
    stack_name: String,
    ids: IdentityRegistry,
    graph: DependencyGraph,
    permissions: PermissionSynthesizer,
    scaling: Vec<ScalingIntent>,
    triggers: TriggerBinder,
    exports: Vec<ExportDecl>,
}

impl Blueprint {
    /// Creates an empty blueprint.
    ///
    /// # Errors
    ///
    /// Returns an error if the stack name is empty or the project prefix is
    /// not a valid id segment.
    pub fn new(stack_name: impl Into<String>, project_prefix: &str) -> Result<Self> {
        let stack_name = stack_name.into();
        if stack_name.trim().is_empty() {
            return Err(StackforgeError::Config {
                message: "stack name must not be empty".into(),
            });
        }
        Ok(Self {
            stack_name,
            ids: IdentityRegistry::new(project_prefix)?,
            graph: DependencyGraph::new(),
            permissions: PermissionSynthesizer::new(),
            scaling: Vec::new(),
            triggers: TriggerBinder::new(),
            exports: Vec::new(),
        })
    }

    /// Name of the stack this blueprint deploys.
    #[must_use]
    pub fn stack_name(&self) -> &str {
        &self.stack_name
    }

    /// Suffix shared by every id and cross-stack export name.
    #[must_use]
    pub fn namespace(&self) -> &str {
        self.ids.suffix()
    }

    /// The graph accumulated so far.
    #[must_use]
    pub const fn graph(&self) -> &DependencyGraph {
        &self.graph
    }

    /// Grants accumulated so far.
    #[must_use]
    pub const fn permissions(&self) -> &PermissionSynthesizer {
        &self.permissions
    }

    /// Declared exports.
    #[must_use]
    pub fn exports(&self) -> &[ExportDecl] {
        &self.exports
    }

    /// Adds a resource and the edges implied by its attribute references.
    ///
    /// # Errors
    ///
    /// Returns an error if an attribute is malformed, references an unknown
    /// node, or the id collides with an existing one.
    pub fn add_resource<K>(
        &mut self,
        kind: ResourceKind,
        logical: &str,
        config: impl IntoIterator<Item = (K, Attribute)>,
    ) -> Result<ResourceId>
    where
        K: Into<String>,
    {
        let config: BTreeMap<String, Attribute> =
            config.into_iter().map(|(k, v)| (k.into(), v)).collect();
        for attribute in config.values() {
            attribute.check()?;
            if let Some(dep) = attribute.dependency() {
                let _ = require(&self.graph, dep)?;
            }
        }

        let id = self.ids.issue(kind, logical)?;
        let node = ResourceNode::new(id.clone(), kind, config);
        let deps: Vec<ResourceId> = node.referenced_nodes().cloned().collect();
        self.graph.add_node(node)?;
        for dep in &deps {
            self.graph.add_edge(&id, dep)?;
        }
        tracing::debug!(id = %id, %kind, dependencies = deps.len(), "declared resource");
        Ok(id)
    }

    /// Declares that `from` must be realized after `to`.
    ///
    /// # Errors
    ///
    /// Returns an error if either node is unknown or the edge closes a cycle.
    pub fn depends_on(&mut self, from: &ResourceId, to: &ResourceId) -> Result<()> {
        self.graph.add_edge(from, to)
    }

    /// Grants `principal` the `actions` on the node `target`.
    ///
    /// The principal is realized after the target so its policy can name
    /// the target's ARN.
    ///
    /// # Errors
    ///
    /// Returns an error if either node is unknown, the implied edge closes a
    /// cycle, or the synthesizer rejects the grant. Nothing is recorded on
    /// failure.
    pub fn grant<S: AsRef<str>>(
        &mut self,
        principal: &ResourceId,
        target: &ResourceId,
        actions: &[S],
    ) -> Result<()> {
        self.graph.check_edge(principal, target)?;
        let grant_target = GrantTarget::resource(require(&self.graph, target)?);
        let principal_node = require(&self.graph, principal)?;
        let _ = self.permissions.grant(principal_node, grant_target, actions)?;
        self.graph.add_edge(principal, target)
    }

    /// Grants `principal` account-scoped `actions` on every resource of
    /// `kind`.
    ///
    /// # Errors
    ///
    /// Returns an error if the principal is unknown or the synthesizer
    /// rejects the grant.
    pub fn grant_any<S: AsRef<str>>(
        &mut self,
        principal: &ResourceId,
        kind: ResourceKind,
        actions: &[S],
    ) -> Result<()> {
        let principal_node = require(&self.graph, principal)?;
        let _ = self
            .permissions
            .grant(principal_node, GrantTarget::AnyOf(kind), actions)?;
        Ok(())
    }

    /// Declares the scaling intent of a service.
    ///
    /// Bounds are checked when the blueprint is resolved.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is unknown, not a service, or already
    /// has an intent.
    pub fn scale(&mut self, intent: ScalingIntent) -> Result<()> {
        scaling::check_target(&intent, require(&self.graph, &intent.target)?)?;
        if self.scaling.iter().any(|s| s.target == intent.target) {
            return Err(StackforgeError::InvalidScalingIntent {
                target: intent.target,
                reason: "target already has a scaling intent".into(),
            });
        }
        self.scaling.push(intent);
        Ok(())
    }

    /// Binds a source-control event source to a build resource.
    ///
    /// # Errors
    ///
    /// Returns an error if the target is unknown or not a build project, the
    /// filter is malformed, or the target is already bound.
    pub fn trigger(
        &mut self,
        source: EventSource,
        target: &ResourceId,
        filter: &FilterSpec,
    ) -> Result<()> {
        let target_node = require(&self.graph, target)?;
        let _ = self.triggers.bind(source, target_node, filter)?;
        Ok(())
    }

    /// Declares an output to publish once the graph is realized.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::DuplicateExport`] if the name is already
    /// declared, or an error if the value is malformed or references an
    /// unknown node.
    pub fn export(
        &mut self,
        name: impl Into<String>,
        value: Attribute,
        visibility: Visibility,
    ) -> Result<()> {
        let name = name.into();
        value.check()?;
        if let Some(dep) = value.dependency() {
            let _ = require(&self.graph, dep)?;
        }
        if self.exports.iter().any(|decl| decl.name == name) {
            return Err(StackforgeError::DuplicateExport { name });
        }
        self.exports.push(ExportDecl {
            name,
            value,
            visibility,
        });
        Ok(())
    }

    /// Fixes the creation order and annotates nodes with their policies,
    /// scaling policy and trigger binding.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::InvalidScalingIntent`] if a scaling intent
    /// violates its bounds.
    pub fn resolve(self) -> Result<ResolvedBlueprint> {
        let Self {
            stack_name,
            ids,
            mut graph,
            permissions,
            scaling: intents,
            triggers,
            exports,
        } = self;

        let order = graph.topological_order()?;
        let waves = graph.realization_waves()?;

        for statement in permissions.statements() {
            if let Some(node) = graph.node_mut(statement.principal()) {
                node.attach_policy(statement.clone());
            }
        }
        for intent in &intents {
            if let Some(node) = graph.node_mut(&intent.target) {
                let policy = scaling::resolve(intent, node)?;
                node.attach_scaling(policy);
            }
        }
        for binding in triggers.bindings() {
            if let Some(node) = graph.node_mut(&binding.target) {
                node.attach_trigger(binding.clone());
            }
        }

        tracing::info!(
            stack = %stack_name,
            nodes = graph.len(),
            edges = graph.edge_count(),
            waves = waves.len(),
            "blueprint resolved"
        );
        Ok(ResolvedBlueprint {
            stack_name,
            namespace: ids.suffix().to_string(),
            graph,
            order,
            waves,
            exports,
        })
    }

    /// Builds the standard load-balanced service topology from a validated
    /// configuration.
    ///
    /// # Errors
    ///
    /// Returns an error if the configuration is invalid or any declaration
    /// is rejected.
    pub fn from_config(config: &BlueprintConfig) -> Result<Self> {
        config.validate()?;
        let mut bp = Self::new(&config.stack_name, &config.project_prefix)?;
        let container_name = bp.ids.qualify("container");

        let repo = bp.add_resource(ResourceKind::Repository, "ecr-repo", no_attributes())?;
        let network = bp.add_resource(
            ResourceKind::Network,
            "ecs-vpc",
            [
                ("cidr_block", Attribute::literal(config.network.cidr_block.as_str())),
                ("max_azs", Attribute::literal(config.network.max_azs)),
                ("nat_gateways", Attribute::literal(config.network.nat_gateways)),
            ],
        )?;
        let cluster = bp.add_resource(
            ResourceKind::Cluster,
            "ecs-cluster",
            [("vpc_id", Attribute::output(&network, OUTPUT_VPC_ID))],
        )?;
        let logs = bp.add_resource(
            ResourceKind::LogGroup,
            "ecs-logs",
            [("stream_prefix", Attribute::literal(LOG_STREAM_PREFIX))],
        )?;
        let task_role_name = bp.ids.qualify("ecs-taskrole");
        let task_role = bp.add_resource(
            ResourceKind::Role,
            "ecs-taskrole",
            [
                ("role_name", Attribute::literal(task_role_name)),
                ("assumed_by", Attribute::literal(TASK_SERVICE_PRINCIPAL)),
            ],
        )?;
        let exec_role = bp.add_resource(
            ResourceKind::Role,
            "ecs-execrole",
            [("assumed_by", Attribute::literal(TASK_SERVICE_PRINCIPAL))],
        )?;
        let task_def = bp.add_resource(
            ResourceKind::TaskDefinition,
            "ecs-taskdef",
            [
                ("cpu", Attribute::literal(config.container.cpu)),
                ("memory_mib", Attribute::literal(config.container.memory_mib)),
                ("container_name", Attribute::literal(container_name.as_str())),
                ("image", Attribute::literal(config.container.image.as_str())),
                ("container_port", Attribute::literal(config.container.container_port)),
                ("protocol", Attribute::literal("tcp")),
                ("task_role_arn", Attribute::output(&task_role, ARN_OUTPUT)),
                ("execution_role_arn", Attribute::output(&exec_role, ARN_OUTPUT)),
                ("log_group", Attribute::output(&logs, OUTPUT_LOG_GROUP_NAME)),
                ("log_stream_prefix", Attribute::literal(LOG_STREAM_PREFIX)),
            ],
        )?;
        let service = bp.add_resource(
            ResourceKind::Service,
            "ecs-service",
            [
                ("service_name", Attribute::literal(config.service_name.as_str())),
                ("cluster_arn", Attribute::output(&cluster, ARN_OUTPUT)),
                ("task_definition_arn", Attribute::output(&task_def, ARN_OUTPUT)),
                ("vpc_id", Attribute::output(&network, OUTPUT_VPC_ID)),
                ("desired_count", Attribute::literal(config.container.desired_count)),
                ("listener_port", Attribute::literal(config.container.listener_port)),
                (
                    "public_load_balancer",
                    Attribute::literal(config.container.public_load_balancer),
                ),
            ],
        )?;
        let artifacts = bp.add_resource(ResourceKind::Bucket, "artifacts", no_attributes())?;
        let project_name = bp.ids.qualify("project");
        let project = bp.add_resource(
            ResourceKind::BuildProject,
            "project",
            [
                ("project_name", Attribute::literal(project_name.as_str())),
                ("build_image", Attribute::literal(config.build.build_image.as_str())),
                ("privileged", Attribute::literal(config.build.privileged)),
                ("badge", Attribute::literal(true)),
                ("env.cluster_name", Attribute::output(&cluster, OUTPUT_CLUSTER_NAME)),
                ("env.ecr_repo_uri", Attribute::output(&repo, OUTPUT_REPOSITORY_URI)),
                (
                    "env.container_image_file",
                    Attribute::literal(image_definitions_template(&container_name)),
                ),
                (
                    "env.source_token",
                    Attribute::literal(json!({
                        "type": "secrets_manager",
                        "secret": config.secrets.source_token_secret,
                    })),
                ),
                ("artifact_bucket", Attribute::output(&artifacts, OUTPUT_BUCKET_NAME)),
                ("build_spec", Attribute::literal(build_spec(&config.build.image_tag))),
            ],
        )?;

        bp.grant_any(&exec_role, ResourceKind::Repository, &["ecr:GetAuthorizationToken"])?;
        bp.grant(&exec_role, &repo, &["pull"])?;
        bp.grant(&exec_role, &logs, &["logs:CreateLogStream", "logs:PutLogEvents"])?;
        bp.grant(&project, &repo, &["pull", "push"])?;
        bp.grant_any(&project, ResourceKind::Repository, &["ecr:GetAuthorizationToken"])?;
        bp.grant(&project, &cluster, &["ecs:DescribeClusters"])?;
        bp.grant(&project, &artifacts, &["read", "write"])?;

        let service_node = require(&bp.graph, &service)?;
        let intent = ScalingIntent::from_config(service_node, &config.scaling);
        bp.scale(intent)?;

        bp.trigger(
            EventSource::new(&config.source.owner, &config.source.repository)?,
            &project,
            &FilterSpec {
                event: config.source.event.clone(),
                branch: config.source.branch.clone(),
            },
        )?;

        let tagged = format!("{{}}:{}", config.build.image_tag);
        bp.export(
            "imageUri",
            Attribute::interpolated(tagged, &repo, OUTPUT_REPOSITORY_URI),
            Visibility::Local,
        )?;
        bp.export(
            "loadBalancerDnsName",
            Attribute::output(&service, OUTPUT_LOAD_BALANCER_DNS),
            Visibility::Local,
        )?;
        bp.export("projectArn", Attribute::output(&project, ARN_OUTPUT), Visibility::CrossStack)?;
        bp.export(
            "projectName",
            Attribute::output(&project, OUTPUT_PROJECT_NAME),
            Visibility::CrossStack,
        )?;
        bp.export(
            "serviceClusterArn",
            Attribute::output(&cluster, ARN_OUTPUT),
            Visibility::CrossStack,
        )?;
        bp.export("serviceArn", Attribute::output(&service, ARN_OUTPUT), Visibility::CrossStack)?;
        bp.export(
            "serviceName",
            Attribute::output(&service, OUTPUT_SERVICE_NAME),
            Visibility::CrossStack,
        )?;

        tracing::info!(
            stack = %bp.stack_name,
            resources = bp.graph.len(),
            grants = bp.permissions.len(),
            "blueprint assembled from configuration"
        );
        Ok(bp)
    }
}

fn require<'a>(graph: &'a DependencyGraph, id: &ResourceId) -> Result<&'a ResourceNode> {
    graph.node(id).ok_or_else(|| StackforgeError::NotFound {
        kind: "resource",
        id: id.to_string(),
    })
}

fn no_attributes() -> [(&'static str, Attribute); 0] {
    []
}

fn image_definitions_template(container_name: &str) -> String {
    json!([{ "name": container_name, "imageUri": "%s" }]).to_string()
}

fn build_spec(image_tag: &str) -> serde_json::Value {
    json!({
        "version": BUILD_SPEC_VERSION,
        "phases": {
            "pre_build": {
                "commands": ["env", format!("export tag={image_tag}")]
            },
            "build": {
                "commands": [
                    "docker build --build-arg SOURCE_TOKEN=$source_token -t $ecr_repo_uri:$tag .",
                    "aws ecr get-login-password | docker login --username AWS --password-stdin ${ecr_repo_uri%%/*}",
                    "docker push $ecr_repo_uri:$tag"
                ]
            },
            "post_build": {
                "commands": [
                    format!("printf $container_image_file $ecr_repo_uri:$tag > {IMAGE_DEFINITIONS_FILE}")
                ]
            }
        },
        "artifacts": { "files": [IMAGE_DEFINITIONS_FILE] }
    })
}

/// A blueprint with its order fixed and nodes annotated.
#[derive(Debug, Clone)]
pub struct ResolvedBlueprint {
    /// Stack that owns the cross-stack exports.
    pub stack_name: String,
    /// Suffix of cross-stack export names.
    pub namespace: String,
    /// Annotated graph.
    pub graph: DependencyGraph,
    /// Creation order.
    pub order: Vec<ResourceId>,
    /// Independent groups of nodes, in creation order.
    pub waves: Vec<Vec<ResourceId>>,
    /// Outputs to publish after realization.
    pub exports: Vec<ExportDecl>,
}

impl ResolvedBlueprint {
    /// Qualified names the pass will publish for other stacks.
    pub fn cross_stack_names(&self) -> impl Iterator<Item = String> + '_ {
        self.exports
            .iter()
            .filter(|decl| decl.visibility == Visibility::CrossStack)
            .map(|decl| qualified_name(&decl.name, &self.namespace))
    }
}

/// Format of a blueprint document.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlueprintFormat {
    /// YAML document.
    Yaml,
    /// JSON document.
    Json,
}

impl BlueprintFormat {
    /// Picks the format from a file extension.
    ///
    /// # Errors
    ///
    /// Returns an error for anything but `.yaml`, `.yml` or `.json`.
    pub fn from_path(path: &Path) -> Result<Self> {
        match path.extension().and_then(|ext| ext.to_str()) {
            Some("yaml" | "yml") => Ok(Self::Yaml),
            Some("json") => Ok(Self::Json),
            _ => Err(StackforgeError::Config {
                message: format!(
                    "blueprint {} must have a .yaml, .yml or .json extension",
                    path.display()
                ),
            }),
        }
    }
}

/// Parses and validates a blueprint document.
///
/// # Errors
///
/// Returns an error if the document does not deserialize or fails
/// validation.
pub fn parse_blueprint(text: &str, format: BlueprintFormat) -> Result<BlueprintConfig> {
    let config: BlueprintConfig = match format {
        BlueprintFormat::Yaml => serde_yaml::from_str(text).map_err(|e| StackforgeError::Config {
            message: format!("invalid blueprint document: {e}"),
        })?,
        BlueprintFormat::Json => serde_json::from_str(text)?,
    };
    config.validate()?;
    Ok(config)
}

/// Reads, parses and validates a blueprint file.
///
/// # Errors
///
/// Returns an error if the file cannot be read, has an unknown extension,
/// or does not parse and validate.
pub fn load_blueprint(path: &Path) -> Result<BlueprintConfig> {
    tracing::info!(path = %path.display(), "loading blueprint");
    let format = BlueprintFormat::from_path(path)?;
    let text = std::fs::read_to_string(path).map_err(|e| StackforgeError::Io {
        path: path.to_path_buf(),
        source: e,
    })?;
    parse_blueprint(&text, format)
}

#[cfg(test)]
mod tests {
    use stackforge_common::config::{
        BuildConfig, ContainerConfig, NetworkConfig, ScalingConfig, SecretsConfig, SourceConfig,
    };

    use super::*;

    fn sample_config() -> BlueprintConfig {
        BlueprintConfig {
            project_prefix: "Demo".into(),
            stack_name: "demo-service".into(),
            service_name: "demo-api".into(),
            source: SourceConfig {
                owner: "example-org".into(),
                repository: "demo-api".into(),
                branch: "main".into(),
                event: "push".into(),
            },
            secrets: SecretsConfig {
                source_token_secret: "demo-source-token".into(),
            },
            network: NetworkConfig {
                cidr_block: "10.0.0.0/16".into(),
                max_azs: 3,
                nat_gateways: 1,
            },
            container: ContainerConfig {
                image: "public.ecr.aws/amazonlinux/amazonlinux:2022".into(),
                cpu: 256,
                memory_mib: 256,
                container_port: 5000,
                listener_port: 80,
                desired_count: 1,
                public_load_balancer: true,
            },
            build: BuildConfig {
                build_image: "aws/codebuild/amazonlinux2-x86_64-standard:4.0".into(),
                privileged: true,
                image_tag: "latest".into(),
            },
            scaling: ScalingConfig::default(),
        }
    }

    fn id(name: &str) -> ResourceId {
        ResourceId::new(name)
    }

    #[test]
    fn attribute_references_add_edges() {
        let mut bp = Blueprint::new("stack", "demo").expect("blueprint");
        let network = bp
            .add_resource(ResourceKind::Network, "vpc", no_attributes())
            .expect("network");
        let cluster = bp
            .add_resource(
                ResourceKind::Cluster,
                "cluster",
                [("vpc_id", Attribute::output(&network, OUTPUT_VPC_ID))],
            )
            .expect("cluster");
        assert_eq!(bp.graph().dependencies_of(&cluster), vec![&network]);
    }

    #[test]
    fn reference_to_unknown_node_is_rejected() {
        let mut bp = Blueprint::new("stack", "demo").expect("blueprint");
        let err = bp
            .add_resource(
                ResourceKind::Cluster,
                "cluster",
                [("vpc_id", Attribute::output(&id("ghost"), OUTPUT_VPC_ID))],
            )
            .unwrap_err();
        assert!(matches!(err, StackforgeError::NotFound { .. }));
        assert!(bp.graph().is_empty());
    }

    #[test]
    fn grant_orders_principal_after_target() {
        let mut bp = Blueprint::new("stack", "demo").expect("blueprint");
        let project = bp
            .add_resource(ResourceKind::BuildProject, "project", no_attributes())
            .expect("project");
        let repo = bp
            .add_resource(ResourceKind::Repository, "repo", no_attributes())
            .expect("repo");
        bp.grant(&project, &repo, &["pull", "push"]).expect("grant");
        bp.grant(&project, &repo, &["push"]).expect("grant again");

        assert_eq!(bp.permissions().len(), 1);
        let order = bp.graph().topological_order().expect("order");
        assert_eq!(order, vec![repo, project]);
    }

    #[test]
    fn rejected_grant_adds_no_edge() {
        let mut bp = Blueprint::new("stack", "demo").expect("blueprint");
        let project = bp
            .add_resource(ResourceKind::BuildProject, "project", no_attributes())
            .expect("project");
        let repo = bp
            .add_resource(ResourceKind::Repository, "repo", no_attributes())
            .expect("repo");
        assert!(bp.grant(&project, &repo, &["ecr:Teleport"]).is_err());
        assert_eq!(bp.graph().edge_count(), 0);
        assert!(bp.permissions().is_empty());
    }

    #[test]
    fn grant_that_would_cycle_is_rejected_before_synthesis() {
        let mut bp = Blueprint::new("stack", "demo").expect("blueprint");
        let role = bp
            .add_resource(ResourceKind::Role, "role", no_attributes())
            .expect("role");
        let service = bp
            .add_resource(
                ResourceKind::Service,
                "svc",
                [("role_arn", Attribute::output(&role, ARN_OUTPUT))],
            )
            .expect("service");
        bp.grant(&service, &role, &["iam:PassRole"])
            .expect("service already follows role");
        let err = bp.grant(&role, &service, &["ecs:DescribeServices"]).unwrap_err();
        assert!(matches!(err, StackforgeError::Cycle { .. }));
        assert_eq!(bp.permissions().len(), 1);
    }

    #[test]
    fn duplicate_export_is_rejected_at_declaration() {
        let mut bp = Blueprint::new("stack", "demo").expect("blueprint");
        bp.export("name", Attribute::literal("a"), Visibility::Local)
            .expect("first");
        let err = bp
            .export("name", Attribute::literal("b"), Visibility::CrossStack)
            .unwrap_err();
        assert!(matches!(err, StackforgeError::DuplicateExport { .. }));
    }

    #[test]
    fn second_scaling_intent_for_target_is_rejected() {
        let mut bp = Blueprint::new("stack", "demo").expect("blueprint");
        let svc = bp
            .add_resource(ResourceKind::Service, "svc", no_attributes())
            .expect("svc");
        let node = bp.graph().node(&svc).expect("node").clone();
        let intent = ScalingIntent::from_config(&node, &ScalingConfig::default());
        bp.scale(intent.clone()).expect("first");
        assert!(bp.scale(intent).is_err());
    }

    #[test]
    fn resolved_lists_qualified_cross_stack_names() {
        let resolved = Blueprint::from_config(&sample_config())
            .expect("blueprint")
            .resolve()
            .expect("resolve");
        let mut names: Vec<String> = resolved.cross_stack_names().collect();
        names.sort_unstable();
        assert_eq!(
            names,
            vec![
                "projectArn-demo",
                "projectName-demo",
                "serviceArn-demo",
                "serviceClusterArn-demo",
                "serviceName-demo",
            ]
        );
    }

    #[test]
    fn scaling_a_cluster_is_rejected() {
        let mut bp = Blueprint::new("stack", "demo").expect("blueprint");
        let cluster = bp
            .add_resource(ResourceKind::Cluster, "cluster", no_attributes())
            .expect("cluster");
        let svc = bp
            .add_resource(ResourceKind::Service, "svc", no_attributes())
            .expect("svc");
        let node = bp.graph().node(&svc).expect("node").clone();
        let intent = ScalingIntent {
            target: cluster.clone(),
            ..ScalingIntent::from_config(&node, &ScalingConfig::default())
        };

        let err = bp.scale(intent).unwrap_err();
        assert!(matches!(err, StackforgeError::InvalidScalingIntent { .. }));
        let resolved = bp.resolve().expect("resolve");
        assert!(
            resolved
                .graph
                .node(&cluster)
                .and_then(ResourceNode::scaling)
                .is_none()
        );
    }

    #[test]
    fn invalid_scaling_fails_at_resolve() {
        let mut bp = Blueprint::new("stack", "demo").expect("blueprint");
        let svc = bp
            .add_resource(ResourceKind::Service, "svc", no_attributes())
            .expect("svc");
        let node = bp.graph().node(&svc).expect("node").clone();
        let config = ScalingConfig {
            min_capacity: 5,
            max_capacity: 2,
            ..ScalingConfig::default()
        };
        bp.scale(ScalingIntent::from_config(&node, &config))
            .expect("declared");
        assert!(matches!(
            bp.resolve(),
            Err(StackforgeError::InvalidScalingIntent { .. })
        ));
    }

    #[test]
    fn from_config_builds_standard_topology() {
        let bp = Blueprint::from_config(&sample_config()).expect("blueprint");
        assert_eq!(bp.namespace(), "demo");
        assert_eq!(bp.graph().len(), 10);
        assert_eq!(bp.exports().len(), 7);

        let order = bp.graph().topological_order().expect("order");
        let pos = |name: &str| {
            order
                .iter()
                .position(|n| n.as_str() == name)
                .unwrap_or_else(|| panic!("{name} missing from {order:?}"))
        };
        assert!(pos("ecs-vpc-demo") < pos("ecs-cluster-demo"));
        assert!(pos("ecs-cluster-demo") < pos("ecs-service-demo"));
        assert!(pos("ecs-taskdef-demo") < pos("ecs-service-demo"));
        assert!(pos("ecs-taskrole-demo") < pos("ecs-taskdef-demo"));
        assert!(pos("ecr-repo-demo") < pos("project-demo"));
        assert!(pos("artifacts-demo") < pos("project-demo"));
    }

    #[test]
    fn from_config_resolves_annotations() {
        let resolved = Blueprint::from_config(&sample_config())
            .expect("blueprint")
            .resolve()
            .expect("resolve");

        let service = resolved.graph.node(&id("ecs-service-demo")).expect("service");
        let scaling = service.scaling().expect("scaling policy");
        assert_eq!(scaling.max_capacity, 6);
        assert_eq!(scaling.target_utilization_percent, 10);

        let project = resolved.graph.node(&id("project-demo")).expect("project");
        let trigger = project.trigger().expect("trigger");
        assert_eq!(trigger.filter.branch(), "main");
        assert_eq!(project.policies().len(), 4);

        let wildcard: Vec<_> = project
            .policies()
            .iter()
            .filter(|p| p.target().is_wildcard())
            .collect();
        assert_eq!(wildcard.len(), 1);
        assert_eq!(
            wildcard[0].actions().iter().map(|a| a.as_str()).collect::<Vec<_>>(),
            vec!["ecr:GetAuthorizationToken"]
        );

        let exec = resolved.graph.node(&id("ecs-execrole-demo")).expect("exec role");
        assert_eq!(exec.policies().len(), 3);
        assert_eq!(resolved.order.len(), resolved.graph.len());
    }

    #[test]
    fn from_config_rejects_invalid_config() {
        let mut config = sample_config();
        config.network.cidr_block = "not-a-cidr".into();
        assert!(Blueprint::from_config(&config).is_err());
    }

    #[test]
    fn from_config_rejects_bad_trigger_event() {
        let mut config = sample_config();
        config.source.event = "release".into();
        assert!(matches!(
            Blueprint::from_config(&config),
            Err(StackforgeError::InvalidFilter { .. })
        ));
    }

    #[test]
    fn load_blueprint_reads_json_and_yaml() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = sample_config();

        let json_path = dir.path().join("service.json");
        std::fs::write(&json_path, serde_json::to_string(&config).expect("json"))
            .expect("write json");
        assert_eq!(load_blueprint(&json_path).expect("load json"), config);

        let yaml_path = dir.path().join("service.yaml");
        std::fs::write(&yaml_path, serde_yaml::to_string(&config).expect("yaml"))
            .expect("write yaml");
        assert_eq!(load_blueprint(&yaml_path).expect("load yaml"), config);
    }

    #[test]
    fn load_blueprint_rejects_unknown_extension() {
        let err = load_blueprint(Path::new("service.toml")).unwrap_err();
        assert!(err.to_string().contains(".yaml"), "got: {err}");
    }

    #[test]
    fn build_spec_uses_configured_tag() {
        let spec = build_spec("v1.2.3");
        assert_eq!(spec["phases"]["pre_build"]["commands"][1], "export tag=v1.2.3");
        assert_eq!(spec["artifacts"]["files"][0], IMAGE_DEFINITIONS_FILE);
    }
}
