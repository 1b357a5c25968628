//! Dependency graph management using `petgraph`.
//!
//! Holds the resource nodes of a composition and the edges between them.
//! Acyclicity is enforced on insertion, so every graph this type hands out
//! has a valid creation order.

use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};

use petgraph::Direction;
use petgraph::graph::NodeIndex;
use stackforge_common::error::{Result, StackforgeError};
use stackforge_common::types::ResourceId;

use crate::node::ResourceNode;

/// A directed acyclic graph of resource nodes.
#[derive(Debug, Clone, Default)]
pub struct DependencyGraph {
    /// Edges point from a dependency to its dependent, so a walk along
    /// edges follows creation order.
    graph: petgraph::Graph<ResourceNode, ()>,
    index: HashMap<ResourceId, NodeIndex>,
}

impl DependencyGraph {
    /// Creates an empty dependency graph.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a resource node.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::DuplicateResource`] if a node with the
    /// same id is already present.
    pub fn add_node(&mut self, node: ResourceNode) -> Result<()> {
        if self.index.contains_key(node.id()) {
            return Err(StackforgeError::DuplicateResource {
                id: node.id().clone(),
            });
        }
        let id = node.id().clone();
        let idx = self.graph.add_node(node);
        tracing::debug!(id = %id, "added resource node");
        let _ = self.index.insert(id, idx);
        Ok(())
    }

    /// Records that `from` must be realized after `to`.
    ///
    /// Re-adding an existing edge is a no-op.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::NotFound`] if either node is missing and
    /// [`StackforgeError::Cycle`] if the edge would close a cycle. The graph
    /// is unchanged in both cases.
    pub fn add_edge(&mut self, from: &ResourceId, to: &ResourceId) -> Result<()> {
        let (dependent, dependency) = self.edge_endpoints(from, to)?;
        if self.graph.find_edge(dependency, dependent).is_none() {
            let _ = self.graph.add_edge(dependency, dependent, ());
            tracing::debug!(%from, %to, "added dependency edge");
        }
        Ok(())
    }

    /// Checks that `add_edge(from, to)` would succeed, without adding it.
    ///
    /// # Errors
    ///
    /// Returns the error `add_edge` would return.
    pub fn check_edge(&self, from: &ResourceId, to: &ResourceId) -> Result<()> {
        self.edge_endpoints(from, to).map(|_| ())
    }

    /// Returns a creation order in which every node follows its
    /// dependencies.
    ///
    /// Ties between independent nodes are broken by insertion order, so the
    /// same sequence of insertions always yields the same order.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains a cycle, which `add_edge`
    /// prevents.
    pub fn topological_order(&self) -> Result<Vec<ResourceId>> {
        Ok(self
            .sorted_indices()?
            .into_iter()
            .map(|idx| self.graph[idx].id().clone())
            .collect())
    }

    /// Groups nodes into waves: every node's dependencies lie in earlier
    /// waves, and nodes within one wave are independent of each other.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains a cycle.
    pub fn realization_waves(&self) -> Result<Vec<Vec<ResourceId>>> {
        let mut level = vec![0_usize; self.graph.node_count()];
        let mut waves: Vec<Vec<ResourceId>> = Vec::new();
        for idx in self.sorted_indices()? {
            let wave = self
                .graph
                .neighbors_directed(idx, Direction::Incoming)
                .map(|dep| level[dep.index()] + 1)
                .max()
                .unwrap_or(0);
            level[idx.index()] = wave;
            if waves.len() <= wave {
                waves.resize_with(wave + 1, Vec::new);
            }
            waves[wave].push(self.graph[idx].id().clone());
        }
        Ok(waves)
    }

    /// Returns the order in which the graph is torn down: dependents first.
    ///
    /// # Errors
    ///
    /// Returns an error if the graph contains a cycle.
    pub fn teardown_order(&self) -> Result<Vec<ResourceId>> {
        let mut order = self.topological_order()?;
        order.reverse();
        Ok(order)
    }

    /// Direct dependencies of a node, in insertion order.
    #[must_use]
    pub fn dependencies_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.neighbors(id, Direction::Incoming)
    }

    /// Direct dependents of a node, in insertion order.
    #[must_use]
    pub fn dependents_of(&self, id: &ResourceId) -> Vec<&ResourceId> {
        self.neighbors(id, Direction::Outgoing)
    }

    /// Looks up a node by id.
    #[must_use]
    pub fn node(&self, id: &ResourceId) -> Option<&ResourceNode> {
        self.index.get(id).map(|&idx| &self.graph[idx])
    }

    /// Looks up a node by id for mutation.
    pub fn node_mut(&mut self, id: &ResourceId) -> Option<&mut ResourceNode> {
        let idx = *self.index.get(id)?;
        Some(&mut self.graph[idx])
    }

    /// Returns whether a node with this id exists.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.index.contains_key(id)
    }

    /// Iterates nodes in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &ResourceNode> {
        self.graph.node_weights()
    }

    /// Number of nodes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.graph.node_count()
    }

    /// Whether the graph has no nodes.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.graph.node_count() == 0
    }

    /// Number of dependency edges.
    #[must_use]
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Resolves both ends of a prospective edge and rejects cycles.
    fn edge_endpoints(&self, from: &ResourceId, to: &ResourceId) -> Result<(NodeIndex, NodeIndex)> {
        let dependent = self.lookup(from)?;
        let dependency = self.lookup(to)?;

        // The new edge runs dependency -> dependent, so it closes a cycle
        // exactly when the dependent already reaches the dependency.
        if dependent == dependency
            || petgraph::algo::has_path_connecting(&self.graph, dependent, dependency, None)
        {
            return Err(StackforgeError::Cycle {
                from: from.clone(),
                to: to.clone(),
            });
        }
        Ok((dependent, dependency))
    }

    fn lookup(&self, id: &ResourceId) -> Result<NodeIndex> {
        self.index
            .get(id)
            .copied()
            .ok_or_else(|| StackforgeError::NotFound {
                kind: "resource",
                id: id.to_string(),
            })
    }

    fn neighbors(&self, id: &ResourceId, direction: Direction) -> Vec<&ResourceId> {
        let Some(&idx) = self.index.get(id) else {
            return Vec::new();
        };
        let mut found: Vec<NodeIndex> = self.graph.neighbors_directed(idx, direction).collect();
        found.sort_unstable();
        found.into_iter().map(|n| self.graph[n].id()).collect()
    }

    /// Kahn's algorithm with a min-heap on insertion index.
    fn sorted_indices(&self) -> Result<Vec<NodeIndex>> {
        let mut in_degree: Vec<usize> = self
            .graph
            .node_indices()
            .map(|idx| {
                self.graph
                    .neighbors_directed(idx, Direction::Incoming)
                    .count()
            })
            .collect();
        let mut ready: BinaryHeap<Reverse<NodeIndex>> = self
            .graph
            .node_indices()
            .filter(|idx| in_degree[idx.index()] == 0)
            .map(Reverse)
            .collect();

        let mut order = Vec::with_capacity(self.graph.node_count());
        while let Some(Reverse(idx)) = ready.pop() {
            order.push(idx);
            for next in self.graph.neighbors_directed(idx, Direction::Outgoing) {
                in_degree[next.index()] -= 1;
                if in_degree[next.index()] == 0 {
                    ready.push(Reverse(next));
                }
            }
        }

        if order.len() != self.graph.node_count() {
            return Err(StackforgeError::Config {
                message: "cyclic dependency detected in resource graph".into(),
            });
        }
        Ok(order)
    }
}
