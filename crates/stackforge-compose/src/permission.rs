//! Least-privilege permission synthesis.
//!
//! Access grants name a principal, a target and a set of action verbs.
//! Verbs are checked against a catalog per target kind, which also fixes
//! their canonical spelling and whether they apply to a specific resource
//! or only account-wide. Grants between the same principal and target merge
//! into a single statement.

use std::collections::{BTreeSet, HashMap};
use std::fmt;

use serde_json::{Value, json};
use stackforge_common::error::{Result, StackforgeError};
use stackforge_common::types::{ResourceId, ResourceKind};

use crate::node::ResourceNode;

/// Whether a verb acts on one resource or on the whole account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VerbScope {
    /// Must be granted on a specific resource.
    Resource,
    /// Only meaningful against every resource of a kind.
    Account,
}

impl VerbScope {
    const fn as_str(self) -> &'static str {
        match self {
            Self::Resource => "resource",
            Self::Account => "account",
        }
    }
}

#[derive(Debug)]
struct VerbSpec {
    name: &'static str,
    scope: VerbScope,
    /// Concrete actions an abstract verb stands for; empty for concrete verbs.
    expands_to: &'static [&'static str],
}

impl VerbSpec {
    const fn resource(name: &'static str) -> Self {
        Self {
            name,
            scope: VerbScope::Resource,
            expands_to: &[],
        }
    }

    const fn account(name: &'static str) -> Self {
        Self {
            name,
            scope: VerbScope::Account,
            expands_to: &[],
        }
    }

    const fn group(name: &'static str, expands_to: &'static [&'static str]) -> Self {
        Self {
            name,
            scope: VerbScope::Resource,
            expands_to,
        }
    }
}

const IMAGE_PULL: &[&str] = &[
    "ecr:BatchCheckLayerAvailability",
    "ecr:GetDownloadUrlForLayer",
    "ecr:BatchGetImage",
];

const IMAGE_PUSH: &[&str] = &[
    "ecr:BatchCheckLayerAvailability",
    "ecr:InitiateLayerUpload",
    "ecr:UploadLayerPart",
    "ecr:CompleteLayerUpload",
    "ecr:PutImage",
];

const OBJECT_READ: &[&str] = &[
    "s3:GetObject",
    "s3:GetObjectVersion",
    "s3:GetBucketLocation",
    "s3:ListBucket",
];

const OBJECT_WRITE: &[&str] = &["s3:PutObject", "s3:DeleteObject", "s3:AbortMultipartUpload"];

const REPOSITORY_VERBS: &[VerbSpec] = &[
    VerbSpec::group("pull", IMAGE_PULL),
    VerbSpec::group("push", IMAGE_PUSH),
    VerbSpec::resource("ecr:BatchCheckLayerAvailability"),
    VerbSpec::resource("ecr:GetDownloadUrlForLayer"),
    VerbSpec::resource("ecr:BatchGetImage"),
    VerbSpec::resource("ecr:InitiateLayerUpload"),
    VerbSpec::resource("ecr:UploadLayerPart"),
    VerbSpec::resource("ecr:CompleteLayerUpload"),
    VerbSpec::resource("ecr:PutImage"),
    VerbSpec::resource("ecr:DescribeImages"),
    VerbSpec::account("ecr:GetAuthorizationToken"),
];

const CLUSTER_VERBS: &[VerbSpec] = &[
    VerbSpec::resource("ecs:DescribeClusters"),
    VerbSpec::resource("ecs:ListServices"),
    VerbSpec::resource("ecs:ListTasks"),
    VerbSpec::account("ecs:ListClusters"),
];

const SERVICE_VERBS: &[VerbSpec] = &[
    VerbSpec::resource("ecs:DescribeServices"),
    VerbSpec::resource("ecs:UpdateService"),
];

const TASK_DEFINITION_VERBS: &[VerbSpec] = &[
    VerbSpec::resource("ecs:RunTask"),
    VerbSpec::account("ecs:DescribeTaskDefinition"),
    VerbSpec::account("ecs:RegisterTaskDefinition"),
];

const ROLE_VERBS: &[VerbSpec] = &[
    VerbSpec::resource("iam:PassRole"),
    VerbSpec::resource("sts:AssumeRole"),
];

const NETWORK_VERBS: &[VerbSpec] = &[
    VerbSpec::account("ec2:DescribeVpcs"),
    VerbSpec::account("ec2:DescribeSubnets"),
    VerbSpec::account("ec2:DescribeSecurityGroups"),
];

const BUILD_PROJECT_VERBS: &[VerbSpec] = &[
    VerbSpec::resource("codebuild:StartBuild"),
    VerbSpec::resource("codebuild:StopBuild"),
    VerbSpec::resource("codebuild:BatchGetBuilds"),
];

const LOG_GROUP_VERBS: &[VerbSpec] = &[
    VerbSpec::resource("logs:CreateLogStream"),
    VerbSpec::resource("logs:PutLogEvents"),
    VerbSpec::resource("logs:DescribeLogStreams"),
];

const BUCKET_VERBS: &[VerbSpec] = &[
    VerbSpec::group("read", OBJECT_READ),
    VerbSpec::group("write", OBJECT_WRITE),
    VerbSpec::resource("s3:GetObject"),
    VerbSpec::resource("s3:GetObjectVersion"),
    VerbSpec::resource("s3:GetBucketLocation"),
    VerbSpec::resource("s3:ListBucket"),
    VerbSpec::resource("s3:PutObject"),
    VerbSpec::resource("s3:DeleteObject"),
    VerbSpec::resource("s3:AbortMultipartUpload"),
];

const fn catalog(kind: ResourceKind) -> &'static [VerbSpec] {
    match kind {
        ResourceKind::Repository => REPOSITORY_VERBS,
        ResourceKind::Cluster => CLUSTER_VERBS,
        ResourceKind::Service => SERVICE_VERBS,
        ResourceKind::TaskDefinition => TASK_DEFINITION_VERBS,
        ResourceKind::Role => ROLE_VERBS,
        ResourceKind::Network => NETWORK_VERBS,
        ResourceKind::BuildProject => BUILD_PROJECT_VERBS,
        ResourceKind::LogGroup => LOG_GROUP_VERBS,
        ResourceKind::Bucket => BUCKET_VERBS,
    }
}

fn lookup(kind: ResourceKind, raw: &str) -> Option<&'static VerbSpec> {
    let wanted = raw.trim();
    catalog(kind)
        .iter()
        .find(|spec| spec.name.eq_ignore_ascii_case(wanted))
}

/// Kinds that can hold a policy and act as a principal.
const PRINCIPAL_KINDS: [ResourceKind; 4] = [
    ResourceKind::BuildProject,
    ResourceKind::Role,
    ResourceKind::TaskDefinition,
    ResourceKind::Service,
];

/// A catalog-confirmed action verb in its canonical spelling.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ActionVerb(&'static str);

impl ActionVerb {
    /// Normalizes a caller-supplied verb against the catalog of `kind`.
    ///
    /// Matching ignores ASCII case and surrounding whitespace; the result
    /// carries the catalog's spelling.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::UnsupportedAction`] if the verb is not in
    /// the catalog for `kind`.
    pub fn parse(kind: ResourceKind, raw: &str) -> Result<Self> {
        lookup(kind, raw)
            .map(|spec| Self(spec.name))
            .ok_or_else(|| StackforgeError::UnsupportedAction {
                verb: raw.to_string(),
                kind,
            })
    }

    /// Canonical spelling.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        self.0
    }
}

impl fmt::Display for ActionVerb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.0)
    }
}

/// What a grant applies to.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum GrantTarget {
    /// One specific resource.
    Resource {
        /// Target node.
        id: ResourceId,
        /// Target kind.
        kind: ResourceKind,
    },
    /// Every resource of a kind; renders as a wildcard.
    AnyOf(ResourceKind),
}

impl GrantTarget {
    /// Targets a specific node.
    #[must_use]
    pub fn resource(node: &ResourceNode) -> Self {
        Self::Resource {
            id: node.id().clone(),
            kind: node.kind(),
        }
    }

    /// Kind whose verb catalog applies.
    #[must_use]
    pub const fn kind(&self) -> ResourceKind {
        match self {
            Self::Resource { kind, .. } | Self::AnyOf(kind) => *kind,
        }
    }

    /// The targeted node, unless this is a wildcard.
    #[must_use]
    pub const fn resource_id(&self) -> Option<&ResourceId> {
        match self {
            Self::Resource { id, .. } => Some(id),
            Self::AnyOf(_) => None,
        }
    }

    /// Whether the target renders as `*`.
    #[must_use]
    pub const fn is_wildcard(&self) -> bool {
        matches!(self, Self::AnyOf(_))
    }
}

impl fmt::Display for GrantTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Resource { id, .. } => write!(f, "{id}"),
            Self::AnyOf(kind) => write!(f, "any {kind}"),
        }
    }
}

/// One allow statement: a principal may perform actions on a target.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyStatement {
    principal: ResourceId,
    target: GrantTarget,
    actions: BTreeSet<ActionVerb>,
}

impl PolicyStatement {
    /// Principal holding the permission.
    #[must_use]
    pub const fn principal(&self) -> &ResourceId {
        &self.principal
    }

    /// Target of the permission.
    #[must_use]
    pub const fn target(&self) -> &GrantTarget {
        &self.target
    }

    /// Granted verbs as declared, deduplicated and sorted.
    #[must_use]
    pub const fn actions(&self) -> &BTreeSet<ActionVerb> {
        &self.actions
    }

    /// Concrete actions, with abstract verbs such as `pull` expanded.
    #[must_use]
    pub fn expanded_actions(&self) -> BTreeSet<&'static str> {
        let kind = self.target.kind();
        self.actions
            .iter()
            .flat_map(|verb| match lookup(kind, verb.as_str()) {
                Some(spec) if !spec.expands_to.is_empty() => spec.expands_to.to_vec(),
                _ => vec![verb.as_str()],
            })
            .collect()
    }

    /// Renders the statement as a policy document entry.
    ///
    /// `target_arn` is the realized target's ARN; it is ignored for
    /// wildcard targets.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::NotFound`] if the target is a specific
    /// resource and no ARN is supplied.
    pub fn to_document(&self, target_arn: Option<&str>) -> Result<Value> {
        let resource = match (&self.target, target_arn) {
            (GrantTarget::AnyOf(_), _) => "*".to_string(),
            (GrantTarget::Resource { .. }, Some(arn)) => arn.to_string(),
            (GrantTarget::Resource { id, .. }, None) => {
                return Err(StackforgeError::NotFound {
                    kind: "resource arn",
                    id: id.to_string(),
                });
            }
        };
        Ok(json!({
            "Effect": "Allow",
            "Action": self.expanded_actions().into_iter().collect::<Vec<_>>(),
            "Resource": [resource],
        }))
    }
}

/// Accumulates grants and merges them into minimal statements.
#[derive(Debug, Clone, Default)]
pub struct PermissionSynthesizer {
    statements: Vec<PolicyStatement>,
    by_pair: HashMap<(ResourceId, GrantTarget), usize>,
}

impl PermissionSynthesizer {
    /// Creates an empty synthesizer.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Grants `principal` the `actions` on `target`.
    ///
    /// A grant on a pair that already has a statement widens that statement.
    /// A failing grant leaves the synthesizer unchanged.
    ///
    /// # Errors
    ///
    /// - [`StackforgeError::Config`] if `principal` cannot hold a policy.
    /// - [`StackforgeError::EmptyGrant`] if `actions` is empty.
    /// - [`StackforgeError::UnsupportedAction`] for a verb outside the
    ///   target kind's catalog.
    /// - [`StackforgeError::ScopeMismatch`] if an account-scoped verb targets a
    ///   specific resource or a resource-scoped verb targets a wildcard.
    pub fn grant<I, S>(
        &mut self,
        principal: &ResourceNode,
        target: GrantTarget,
        actions: I,
    ) -> Result<PolicyStatement>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        if !PRINCIPAL_KINDS.contains(&principal.kind()) {
            return Err(StackforgeError::Config {
                message: format!(
                    "{} resource {} cannot act as a principal",
                    principal.kind(),
                    principal.id()
                ),
            });
        }

        let verbs = Self::validate(principal.id(), &target, actions)?;
        let key = (principal.id().clone(), target.clone());
        let slot = match self.by_pair.get(&key) {
            Some(&slot) => {
                self.statements[slot].actions.extend(verbs);
                slot
            }
            None => {
                self.statements.push(PolicyStatement {
                    principal: principal.id().clone(),
                    target,
                    actions: verbs,
                });
                let slot = self.statements.len() - 1;
                let _ = self.by_pair.insert(key, slot);
                slot
            }
        };

        let statement = &self.statements[slot];
        tracing::info!(
            principal = %statement.principal,
            target = %statement.target,
            actions = ?statement.actions,
            "granted access"
        );
        Ok(statement.clone())
    }

    fn validate<I, S>(
        principal: &ResourceId,
        target: &GrantTarget,
        actions: I,
    ) -> Result<BTreeSet<ActionVerb>>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let kind = target.kind();
        let mut verbs = BTreeSet::new();
        for raw in actions {
            let raw = raw.as_ref();
            let spec = lookup(kind, raw).ok_or_else(|| StackforgeError::UnsupportedAction {
                verb: raw.to_string(),
                kind,
            })?;
            let scope_fits = match spec.scope {
                VerbScope::Resource => !target.is_wildcard(),
                VerbScope::Account => target.is_wildcard(),
            };
            if !scope_fits {
                return Err(StackforgeError::ScopeMismatch {
                    verb: spec.name.to_string(),
                    scope: spec.scope.as_str(),
                    resource: target.to_string(),
                });
            }
            let _ = verbs.insert(ActionVerb(spec.name));
        }
        if verbs.is_empty() {
            return Err(StackforgeError::EmptyGrant {
                principal: principal.clone(),
                resource: target.to_string(),
            });
        }
        Ok(verbs)
    }

    /// All statements, in the order their pairs were first granted.
    #[must_use]
    pub fn statements(&self) -> &[PolicyStatement] {
        &self.statements
    }

    /// Statements held by one principal.
    pub fn statements_for<'a>(
        &'a self,
        principal: &'a ResourceId,
    ) -> impl Iterator<Item = &'a PolicyStatement> + 'a {
        self.statements
            .iter()
            .filter(move |statement| &statement.principal == principal)
    }

    /// Number of distinct statements.
    #[must_use]
    pub fn len(&self) -> usize {
        self.statements.len()
    }

    /// Whether no grant has been made.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.statements.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeMap;

    use super::*;

    fn node(name: &str, kind: ResourceKind) -> ResourceNode {
        ResourceNode::new(ResourceId::new(name), kind, BTreeMap::new())
    }

    fn verbs(statement: &PolicyStatement) -> Vec<&'static str> {
        statement.actions().iter().map(|v| v.as_str()).collect()
    }

    #[test]
    fn grants_on_same_pair_merge_into_one_statement() {
        let project = node("project", ResourceKind::BuildProject);
        let repo = node("repo", ResourceKind::Repository);
        let mut synth = PermissionSynthesizer::new();

        let _ = synth
            .grant(&project, GrantTarget::resource(&repo), ["pull", "push"])
            .expect("first grant");
        let merged = synth
            .grant(&project, GrantTarget::resource(&repo), ["push"])
            .expect("second grant");

        assert_eq!(synth.len(), 1);
        assert_eq!(verbs(&merged), vec!["pull", "push"]);
        assert_eq!(synth.statements()[0], merged);
    }

    #[test]
    fn disjoint_grants_union_actions() {
        let role = node("role", ResourceKind::Role);
        let logs = node("logs", ResourceKind::LogGroup);
        let mut synth = PermissionSynthesizer::new();
        let _ = synth
            .grant(&role, GrantTarget::resource(&logs), ["logs:CreateLogStream"])
            .expect("a");
        let _ = synth
            .grant(&role, GrantTarget::resource(&logs), ["logs:PutLogEvents"])
            .expect("b");
        assert_eq!(synth.len(), 1);
        assert_eq!(
            verbs(&synth.statements()[0]),
            vec!["logs:CreateLogStream", "logs:PutLogEvents"]
        );
    }

    #[test]
    fn different_targets_stay_separate() {
        let project = node("project", ResourceKind::BuildProject);
        let repo = node("repo", ResourceKind::Repository);
        let mut synth = PermissionSynthesizer::new();
        let _ = synth
            .grant(&project, GrantTarget::resource(&repo), ["pull"])
            .expect("resource");
        let _ = synth
            .grant(
                &project,
                GrantTarget::AnyOf(ResourceKind::Repository),
                ["ecr:GetAuthorizationToken"],
            )
            .expect("account");
        assert_eq!(synth.len(), 2);
        assert_eq!(synth.statements_for(project.id()).count(), 2);
    }

    #[test]
    fn verbs_are_case_normalized_to_catalog_spelling() {
        let role = node("role", ResourceKind::Role);
        let repo = node("repo", ResourceKind::Repository);
        let mut synth = PermissionSynthesizer::new();
        let statement = synth
            .grant(
                &role,
                GrantTarget::resource(&repo),
                ["ecr:batchgetimage", "ECR:BatchGetImage", " ecr:getdownloadurlforlayer "],
            )
            .expect("grant");
        assert_eq!(
            verbs(&statement),
            vec!["ecr:BatchGetImage", "ecr:GetDownloadUrlForLayer"]
        );
    }

    #[test]
    fn unknown_verb_names_verb_and_kind() {
        let project = node("project", ResourceKind::BuildProject);
        let cluster = node("cluster", ResourceKind::Cluster);
        let mut synth = PermissionSynthesizer::new();
        let err = synth
            .grant(&project, GrantTarget::resource(&cluster), ["ecs:describecluster"])
            .unwrap_err();
        match err {
            StackforgeError::UnsupportedAction { verb, kind } => {
                assert_eq!(verb, "ecs:describecluster");
                assert_eq!(kind, ResourceKind::Cluster);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn verb_from_another_kind_is_unsupported() {
        let project = node("project", ResourceKind::BuildProject);
        let cluster = node("cluster", ResourceKind::Cluster);
        let mut synth = PermissionSynthesizer::new();
        assert!(matches!(
            synth.grant(&project, GrantTarget::resource(&cluster), ["push"]),
            Err(StackforgeError::UnsupportedAction { .. })
        ));
    }

    #[test]
    fn failed_grant_leaves_existing_statement_untouched() {
        let project = node("project", ResourceKind::BuildProject);
        let repo = node("repo", ResourceKind::Repository);
        let mut synth = PermissionSynthesizer::new();
        let _ = synth
            .grant(&project, GrantTarget::resource(&repo), ["pull"])
            .expect("grant");
        assert!(
            synth
                .grant(&project, GrantTarget::resource(&repo), ["push", "ecr:Bogus"])
                .is_err()
        );
        assert_eq!(verbs(&synth.statements()[0]), vec!["pull"]);
    }

    #[test]
    fn empty_actions_are_rejected() {
        let project = node("project", ResourceKind::BuildProject);
        let repo = node("repo", ResourceKind::Repository);
        let mut synth = PermissionSynthesizer::new();
        let err = synth
            .grant(&project, GrantTarget::resource(&repo), Vec::<String>::new())
            .unwrap_err();
        assert!(matches!(err, StackforgeError::EmptyGrant { .. }));
        assert!(synth.is_empty());
    }

    #[test]
    fn account_scoped_verb_requires_wildcard_target() {
        let role = node("role", ResourceKind::Role);
        let repo = node("repo", ResourceKind::Repository);
        let mut synth = PermissionSynthesizer::new();
        let err = synth
            .grant(&role, GrantTarget::resource(&repo), ["ecr:GetAuthorizationToken"])
            .unwrap_err();
        assert!(matches!(err, StackforgeError::ScopeMismatch { scope: "account", .. }));
    }

    #[test]
    fn resource_scoped_verb_rejects_wildcard_target() {
        let role = node("role", ResourceKind::Role);
        let mut synth = PermissionSynthesizer::new();
        let err = synth
            .grant(&role, GrantTarget::AnyOf(ResourceKind::Repository), ["pull"])
            .unwrap_err();
        assert!(matches!(err, StackforgeError::ScopeMismatch { scope: "resource", .. }));
    }

    #[test]
    fn non_principal_kind_is_rejected() {
        let network = node("vpc", ResourceKind::Network);
        let repo = node("repo", ResourceKind::Repository);
        let mut synth = PermissionSynthesizer::new();
        assert!(matches!(
            synth.grant(&network, GrantTarget::resource(&repo), ["pull"]),
            Err(StackforgeError::Config { .. })
        ));
    }

    #[test]
    fn documents_expand_groups_and_scope_resources() {
        let project = node("project", ResourceKind::BuildProject);
        let repo = node("repo", ResourceKind::Repository);
        let mut synth = PermissionSynthesizer::new();
        let scoped = synth
            .grant(&project, GrantTarget::resource(&repo), ["pull", "push"])
            .expect("grant");
        let doc = scoped
            .to_document(Some("arn:aws:ecr:region:acct:repository/repo"))
            .expect("document");
        assert_eq!(doc["Effect"], "Allow");
        assert_eq!(doc["Resource"], json!(["arn:aws:ecr:region:acct:repository/repo"]));
        let actions = doc["Action"].as_array().expect("actions");
        assert_eq!(actions.len(), 7);
        assert!(actions.contains(&json!("ecr:PutImage")));
        assert!(actions.contains(&json!("ecr:BatchGetImage")));

        assert!(scoped.to_document(None).is_err());

        let wildcard = synth
            .grant(
                &project,
                GrantTarget::AnyOf(ResourceKind::Repository),
                ["ecr:GetAuthorizationToken"],
            )
            .expect("grant");
        let doc = wildcard.to_document(None).expect("document");
        assert_eq!(doc["Resource"], json!(["*"]));
    }

    #[test]
    fn parse_rejects_unknown_and_keeps_canonical() {
        let verb = ActionVerb::parse(ResourceKind::Cluster, "ECS:DESCRIBECLUSTERS").expect("verb");
        assert_eq!(verb.as_str(), "ecs:DescribeClusters");
        assert!(ActionVerb::parse(ResourceKind::Cluster, "ecs:describecluster").is_err());
    }
}
