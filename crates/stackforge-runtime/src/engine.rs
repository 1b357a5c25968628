//! Composition driver and runtime engine.
//!
//! A [`Composition`] walks one blueprint through
//! `Building -> Resolved -> Realizing -> Realized`, or into the terminal
//! `Failed` phase. The [`Engine`] wraps a provider and an optional export
//! store and runs whole passes: deploy, plan and decommission.

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use serde_json::Value;
use stackforge_common::constants::ARN_OUTPUT;
use stackforge_common::error::{Result, StackforgeError};
use stackforge_common::types::{CompositionPhase, ProducedValues, ResourceId};
use stackforge_compose::blueprint::{Blueprint, ResolvedBlueprint};
use stackforge_compose::export::{ExportEntry, OutputExporter};
use stackforge_compose::graph::DependencyGraph;
use stackforge_compose::node::ValueScope;
use uuid::Uuid;

use crate::provider::{RealizeRequest, ResourceProvider};
use crate::store::ExportStore;

/// Shared flag that stops a realization before its next node.
#[derive(Debug, Clone, Default)]
pub struct CancelFlag(Arc<AtomicBool>);

impl CancelFlag {
    /// Creates an unset flag.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Requests cancellation.
    pub fn cancel(&self) {
        self.0.store(true, Ordering::Release);
    }

    /// Whether cancellation was requested.
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Result of a successful composition pass.
#[derive(Debug, Clone)]
pub struct RealizedGraph {
    /// Identifier of the pass that realized the graph.
    pub pass_id: Uuid,
    /// Stack that owns the outputs.
    pub stack_name: String,
    /// Order in which nodes were realized.
    pub order: Vec<ResourceId>,
    /// Graph with produced values populated.
    pub graph: DependencyGraph,
    /// Published outputs.
    pub outputs: OutputExporter,
}

impl RealizedGraph {
    /// Values a node produced.
    #[must_use]
    pub fn produced(&self, id: &ResourceId) -> Option<&ProducedValues> {
        self.graph.node(id)?.produced()
    }

    /// A published output value.
    #[must_use]
    pub fn output(&self, name: &str) -> Option<&str> {
        self.outputs.value(name)
    }

    /// Outputs importable by other passes.
    pub fn cross_stack(&self) -> impl Iterator<Item = &ExportEntry> {
        self.outputs.cross_stack()
    }

    /// Order in which the graph must be torn down.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph has no valid order, which cannot
    /// happen for a graph built through [`Blueprint`].
    pub fn teardown_order(&self) -> Result<Vec<ResourceId>> {
        self.graph.teardown_order()
    }
}

/// One composition pass over a blueprint.
#[derive(Debug)]
pub struct Composition {
    pass_id: Uuid,
    phase: CompositionPhase,
    blueprint: Option<Blueprint>,
    resolved: Option<ResolvedBlueprint>,
    imports: BTreeMap<String, String>,
    failure: Option<String>,
}

impl Composition {
    /// Starts a pass in the `Building` phase.
    #[must_use]
    pub fn new(blueprint: Blueprint) -> Self {
        let pass_id = Uuid::new_v4();
        tracing::info!(%pass_id, stack = %blueprint.stack_name(), "composition started");
        Self {
            pass_id,
            phase: CompositionPhase::Building,
            blueprint: Some(blueprint),
            resolved: None,
            imports: BTreeMap::new(),
            failure: None,
        }
    }

    /// Makes cross-stack exports of earlier passes available to `Import`
    /// attributes.
    #[must_use]
    pub fn with_imports(mut self, imports: BTreeMap<String, String>) -> Self {
        self.imports = imports;
        self
    }

    /// Pass identifier.
    #[must_use]
    pub const fn pass_id(&self) -> Uuid {
        self.pass_id
    }

    /// Current phase.
    #[must_use]
    pub const fn phase(&self) -> CompositionPhase {
        self.phase
    }

    /// The first error, once the pass has failed.
    #[must_use]
    pub fn failure(&self) -> Option<&str> {
        self.failure.as_deref()
    }

    /// The blueprint, while it can still be extended.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::InvalidState`] outside `Building`.
    pub fn blueprint_mut(&mut self) -> Result<&mut Blueprint> {
        self.expect_phase(CompositionPhase::Building)?;
        let phase = self.phase;
        self.blueprint
            .as_mut()
            .ok_or_else(|| invalid_state(phase, "building"))
    }

    /// The resolved blueprint, once resolved.
    #[must_use]
    pub const fn resolved(&self) -> Option<&ResolvedBlueprint> {
        self.resolved.as_ref()
    }

    /// Fixes creation order and annotates nodes.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::InvalidState`] outside `Building`, or the
    /// resolution error, in which case the pass is `Failed`.
    pub fn resolve(&mut self) -> Result<&ResolvedBlueprint> {
        self.expect_phase(CompositionPhase::Building)?;
        let blueprint = self
            .blueprint
            .take()
            .ok_or_else(|| invalid_state(self.phase, "building"))?;
        match blueprint.resolve() {
            Ok(resolved) => {
                self.transition(CompositionPhase::Resolved);
                Ok(&*self.resolved.insert(resolved))
            }
            Err(e) => Err(self.fail(e)),
        }
    }

    /// Hands every node to `provider` in creation order, then publishes
    /// the declared outputs.
    ///
    /// Realization halts at the first provider error or when `cancel` is
    /// set. Nodes already realized are left in place.
    ///
    /// # Errors
    ///
    /// - [`StackforgeError::InvalidState`] outside `Resolved`.
    /// - [`StackforgeError::PartialRealization`] if a node could not be
    ///   realized; its source is the provider error or
    ///   [`StackforgeError::Cancelled`].
    /// - An export error if a declared output cannot be published.
    pub fn realize(
        &mut self,
        provider: &dyn ResourceProvider,
        cancel: &CancelFlag,
    ) -> Result<RealizedGraph> {
        self.expect_phase(CompositionPhase::Resolved)?;
        let mut resolved = self
            .resolved
            .take()
            .ok_or_else(|| invalid_state(self.phase, "resolved"))?;
        self.transition(CompositionPhase::Realizing);

        if let Err(e) = realize_nodes(&mut resolved, &self.imports, provider, cancel) {
            return Err(self.fail(e));
        }
        let outputs = match publish_outputs(&resolved, &self.imports) {
            Ok(outputs) => outputs,
            Err(e) => return Err(self.fail(e)),
        };

        self.transition(CompositionPhase::Realized);
        Ok(RealizedGraph {
            pass_id: self.pass_id,
            stack_name: resolved.stack_name,
            order: resolved.order,
            graph: resolved.graph,
            outputs,
        })
    }

    fn expect_phase(&self, expected: CompositionPhase) -> Result<()> {
        if self.phase == expected {
            Ok(())
        } else {
            Err(invalid_state(self.phase, expected.as_str()))
        }
    }

    fn transition(&mut self, next: CompositionPhase) {
        tracing::info!(pass_id = %self.pass_id, from = %self.phase, to = %next, "composition phase");
        self.phase = next;
    }

    fn fail(&mut self, error: StackforgeError) -> StackforgeError {
        tracing::error!(pass_id = %self.pass_id, phase = %self.phase, error = %error, "composition failed");
        self.failure = Some(error.to_string());
        self.phase = CompositionPhase::Failed;
        error
    }
}

fn invalid_state(actual: CompositionPhase, expected: &'static str) -> StackforgeError {
    StackforgeError::InvalidState {
        expected,
        actual: actual.to_string(),
    }
}

fn realize_nodes(
    resolved: &mut ResolvedBlueprint,
    imports: &BTreeMap<String, String>,
    provider: &dyn ResourceProvider,
    cancel: &CancelFlag,
) -> Result<()> {
    for (position, id) in resolved.order.iter().enumerate() {
        let outcome = if cancel.is_cancelled() {
            Err(StackforgeError::Cancelled)
        } else {
            realize_node(&mut resolved.graph, id, imports, provider)
        };
        if let Err(source) = outcome {
            let realized = resolved.order[..position].to_vec();
            let pending = resolved.order[position..].to_vec();
            tracing::warn!(
                id = %id,
                realized = realized.len(),
                pending = pending.len(),
                "realization halted"
            );
            return Err(StackforgeError::PartialRealization {
                realized,
                pending,
                source: Box::new(source),
            });
        }
    }
    Ok(())
}

fn realize_node(
    graph: &mut DependencyGraph,
    id: &ResourceId,
    imports: &BTreeMap<String, String>,
    provider: &dyn ResourceProvider,
) -> Result<()> {
    let produced = {
        let node = graph.node(id).ok_or_else(|| StackforgeError::NotFound {
            kind: "resource",
            id: id.to_string(),
        })?;
        let scope = ValueScope {
            nodes: graph,
            imports,
        };
        let config = node
            .config()
            .iter()
            .map(|(key, attribute)| attribute.resolve(&scope).map(|value| (key.clone(), value)))
            .collect::<Result<BTreeMap<_, _>>>()?;
        let policies = node
            .policies()
            .iter()
            .map(|statement| {
                let arn = statement
                    .target()
                    .resource_id()
                    .and_then(|target| graph.node(target))
                    .and_then(|target| target.produced_value(ARN_OUTPUT));
                statement.to_document(arn)
            })
            .collect::<Result<Vec<_>>>()?;

        tracing::debug!(id = %id, attributes = config.len(), policies = policies.len(), "realizing node");
        provider.realize(&RealizeRequest {
            node,
            config,
            policies,
        })?
    };

    graph
        .node_mut(id)
        .ok_or_else(|| StackforgeError::NotFound {
            kind: "resource",
            id: id.to_string(),
        })?
        .record_produced(produced)
}

fn publish_outputs(
    resolved: &ResolvedBlueprint,
    imports: &BTreeMap<String, String>,
) -> Result<OutputExporter> {
    let scope = ValueScope {
        nodes: &resolved.graph,
        imports,
    };
    let mut outputs = OutputExporter::new(resolved.namespace.as_str());
    for decl in &resolved.exports {
        let value = match decl.value.resolve(&scope)? {
            Value::String(s) => s,
            other => other.to_string(),
        };
        let _ = outputs.publish(decl.name.as_str(), value, decl.visibility)?;
    }
    Ok(outputs)
}

/// Resolves and realizes `blueprint` in one pass.
///
/// # Errors
///
/// Returns the first resolution, realization or export error.
pub fn compose(blueprint: Blueprint, provider: &dyn ResourceProvider) -> Result<RealizedGraph> {
    let mut composition = Composition::new(blueprint);
    let _ = composition.resolve()?;
    composition.realize(provider, &CancelFlag::new())
}

/// Runs composition passes against one provider.
pub struct Engine {
    provider: Box<dyn ResourceProvider>,
    store: Option<ExportStore>,
}

impl Engine {
    /// Creates an engine without an export store.
    ///
    /// Cross-stack exports are then neither persisted nor importable.
    #[must_use]
    pub fn new(provider: Box<dyn ResourceProvider>) -> Self {
        Self {
            provider,
            store: None,
        }
    }

    /// Persists cross-stack exports to `store` and serves imports from it.
    #[must_use]
    pub fn with_store(mut self, store: ExportStore) -> Self {
        self.store = Some(store);
        self
    }

    /// The export store, if any.
    #[must_use]
    pub const fn store(&self) -> Option<&ExportStore> {
        self.store.as_ref()
    }

    /// Resolves a blueprint without realizing it.
    ///
    /// # Errors
    ///
    /// Returns the resolution error.
    pub fn plan(&self, blueprint: Blueprint) -> Result<ResolvedBlueprint> {
        let mut composition = Composition::new(blueprint);
        let _ = composition.resolve()?;
        let phase = composition.phase;
        composition
            .resolved
            .take()
            .ok_or_else(|| invalid_state(phase, "resolved"))
    }

    /// Realizes a blueprint and persists its cross-stack exports.
    ///
    /// Export ownership is checked against the store once the blueprint is
    /// resolved, so a conflicting pass realizes nothing.
    ///
    /// # Errors
    ///
    /// Returns the first resolution, ownership, realization, export or
    /// store error.
    pub fn deploy(&mut self, blueprint: Blueprint, cancel: &CancelFlag) -> Result<RealizedGraph> {
        let imports = self
            .store
            .as_ref()
            .map(ExportStore::imports)
            .unwrap_or_default();
        let mut composition = Composition::new(blueprint).with_imports(imports);
        let resolved = composition.resolve()?;
        let conflict = self.store.as_ref().and_then(|store| {
            store
                .check_publishable(&resolved.stack_name, resolved.cross_stack_names())
                .err()
        });
        if let Some(e) = conflict {
            return Err(composition.fail(e));
        }
        let realized = composition.realize(self.provider.as_ref(), cancel)?;

        if let Some(store) = self.store.as_mut() {
            let published = store.publish(&realized)?;
            store.save()?;
            tracing::info!(stack = %realized.stack_name, published, "persisted cross-stack exports");
        }
        Ok(realized)
    }

    /// Loads a blueprint file, assembles the standard service topology
    /// from it and deploys it.
    ///
    /// # Errors
    ///
    /// Returns the load, assembly or deploy error.
    pub fn deploy_file(&mut self, path: &Path, cancel: &CancelFlag) -> Result<RealizedGraph> {
        let config = stackforge_compose::blueprint::load_blueprint(path)?;
        let blueprint = Blueprint::from_config(&config)?;
        self.deploy(blueprint, cancel)
    }

    /// Tears a realized graph down in reverse creation order and withdraws
    /// its exports.
    ///
    /// # Errors
    ///
    /// Returns the first teardown or store error.
    pub fn decommission(&mut self, realized: &RealizedGraph) -> Result<Vec<ResourceId>> {
        let order = realized.teardown_order()?;
        for id in &order {
            if let Some(node) = realized.graph.node(id) {
                self.provider.teardown(node)?;
            }
        }
        if let Some(store) = self.store.as_mut() {
            let removed = store.remove_stack(&realized.stack_name);
            store.save()?;
            tracing::info!(stack = %realized.stack_name, removed, "withdrew cross-stack exports");
        }
        tracing::info!(stack = %realized.stack_name, resources = order.len(), "decommissioned");
        Ok(order)
    }
}

#[cfg(test)]
mod tests {
    use stackforge_common::types::{ResourceKind, Visibility};
    use stackforge_compose::node::Attribute;

    use super::*;
    use crate::provider::simulated::SimulatedProvider;

    fn chain(length: usize) -> (Blueprint, Vec<ResourceId>) {
        let mut bp = Blueprint::new("chain", "demo").expect("blueprint");
        let mut ids: Vec<ResourceId> = Vec::new();
        for i in 0..length {
            let attrs: Vec<(String, Attribute)> = ids
                .last()
                .map(|prev| ("upstream".to_string(), Attribute::output(prev, ARN_OUTPUT)))
                .into_iter()
                .collect();
            let id = bp
                .add_resource(ResourceKind::Bucket, &format!("b{i}"), attrs)
                .expect("node");
            ids.push(id);
        }
        (bp, ids)
    }

    #[test]
    fn phases_advance_to_realized() {
        let (bp, ids) = chain(2);
        let provider = SimulatedProvider::new();
        let mut composition = Composition::new(bp);
        assert_eq!(composition.phase(), CompositionPhase::Building);
        let _ = composition.resolve().expect("resolve");
        assert_eq!(composition.phase(), CompositionPhase::Resolved);
        let realized = composition
            .realize(&provider, &CancelFlag::new())
            .expect("realize");
        assert_eq!(composition.phase(), CompositionPhase::Realized);
        assert_eq!(realized.order, ids);
        assert!(realized.produced(&ids[1]).is_some());
    }

    #[test]
    fn upstream_values_are_resolved_before_handoff() {
        let (bp, ids) = chain(2);
        let provider = SimulatedProvider::new();
        let _ = compose(bp, &provider).expect("compose");
        let records = provider.records();
        let upstream = records[1].config["upstream"].as_str().expect("string");
        assert!(upstream.ends_with(ids[0].as_str()), "got: {upstream}");
    }

    #[test]
    fn realize_before_resolve_is_invalid_state() {
        let (bp, _) = chain(1);
        let mut composition = Composition::new(bp);
        let err = composition
            .realize(&SimulatedProvider::new(), &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, StackforgeError::InvalidState { expected: "resolved", .. }));
        assert_eq!(composition.phase(), CompositionPhase::Building);
    }

    #[test]
    fn failed_pass_is_terminal() {
        let (bp, ids) = chain(3);
        let provider = SimulatedProvider::new().failing_on(ids[1].clone());
        let mut composition = Composition::new(bp);
        let _ = composition.resolve().expect("resolve");
        let err = composition
            .realize(&provider, &CancelFlag::new())
            .unwrap_err();
        assert!(matches!(err, StackforgeError::PartialRealization { .. }));
        assert_eq!(composition.phase(), CompositionPhase::Failed);
        assert!(composition.failure().is_some());

        assert!(matches!(
            composition.resolve(),
            Err(StackforgeError::InvalidState { .. })
        ));
        assert!(matches!(
            composition.blueprint_mut(),
            Err(StackforgeError::InvalidState { .. })
        ));
    }

    #[test]
    fn blueprint_is_frozen_after_resolve() {
        let (bp, _) = chain(1);
        let mut composition = Composition::new(bp);
        let _ = composition
            .blueprint_mut()
            .expect("building")
            .add_resource(ResourceKind::LogGroup, "extra", Vec::<(String, Attribute)>::new())
            .expect("extra node");
        let resolved = composition.resolve().expect("resolve");
        assert_eq!(resolved.order.len(), 2);
        assert!(composition.blueprint_mut().is_err());
    }

    #[test]
    fn cancelled_before_start_leaves_everything_pending() {
        let (bp, ids) = chain(3);
        let cancel = CancelFlag::new();
        cancel.cancel();
        let mut composition = Composition::new(bp);
        let _ = composition.resolve().expect("resolve");
        let err = composition
            .realize(&SimulatedProvider::new(), &cancel)
            .unwrap_err();
        match err {
            StackforgeError::PartialRealization {
                realized,
                pending,
                source,
            } => {
                assert!(realized.is_empty());
                assert_eq!(pending, ids);
                assert!(matches!(*source, StackforgeError::Cancelled));
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn missing_import_fails_the_pass() {
        let mut bp = Blueprint::new("consumer", "demo").expect("blueprint");
        let _ = bp
            .add_resource(
                ResourceKind::Service,
                "svc",
                [("cluster_arn", Attribute::import("serviceClusterArn-other"))],
            )
            .expect("node");
        let err = compose(bp, &SimulatedProvider::new()).unwrap_err();
        let StackforgeError::PartialRealization { source, .. } = err else {
            panic!("expected partial realization");
        };
        assert!(matches!(*source, StackforgeError::NotFound { kind: "export", .. }));
    }

    #[test]
    fn non_string_outputs_are_rendered_as_json() {
        let mut bp = Blueprint::new("stack", "demo").expect("blueprint");
        bp.export("desiredCount", Attribute::literal(2), Visibility::Local)
            .expect("export");
        let realized = compose(bp, &SimulatedProvider::new()).expect("compose");
        assert_eq!(realized.output("desiredCount"), Some("2"));
    }

    #[test]
    fn engine_decommissions_in_reverse_order() {
        let (bp, ids) = chain(3);
        let mut engine = Engine::new(Box::new(SimulatedProvider::new()));
        let realized = engine.deploy(bp, &CancelFlag::new()).expect("deploy");
        let order = engine.decommission(&realized).expect("decommission");
        let mut reversed = ids;
        reversed.reverse();
        assert_eq!(order, reversed);
    }

    #[test]
    fn plan_does_not_touch_provider() {
        let (bp, ids) = chain(2);
        let engine = Engine::new(Box::new(SimulatedProvider::new()));
        let plan = engine.plan(bp).expect("plan");
        assert_eq!(plan.order, ids);
        assert_eq!(plan.waves.len(), 2);
    }
}
