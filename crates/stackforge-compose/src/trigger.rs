//! Source-control trigger bindings for build resources.
//!
//! A binding records that events from a repository should start a build.
//! The event source evaluates the filter itself; this module only checks
//! that the filter is well formed and that each build has one binding.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use stackforge_common::error::{Result, StackforgeError};
use stackforge_common::types::{ResourceId, ResourceKind};

use crate::node::ResourceNode;

/// A source-control repository that emits events.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventSource {
    /// Repository owner or organization.
    pub owner: String,
    /// Repository name.
    pub repository: String,
}

impl EventSource {
    /// Creates an event source.
    ///
    /// # Errors
    ///
    /// Returns an error if the owner or repository is empty.
    pub fn new(owner: impl Into<String>, repository: impl Into<String>) -> Result<Self> {
        let source = Self {
            owner: owner.into(),
            repository: repository.into(),
        };
        if source.owner.trim().is_empty() || source.repository.trim().is_empty() {
            return Err(StackforgeError::Config {
                message: format!("event source \"{source}\" needs an owner and a repository"),
            });
        }
        Ok(source)
    }
}

impl fmt::Display for EventSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.owner, self.repository)
    }
}

/// Repository events a build can react to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventType {
    /// Commits pushed to a branch.
    Push,
    /// A pull request was opened.
    PullRequestCreated,
    /// A pull request received new commits.
    PullRequestUpdated,
    /// A pull request was merged.
    PullRequestMerged,
}

impl EventType {
    const ALL: [Self; 4] = [
        Self::Push,
        Self::PullRequestCreated,
        Self::PullRequestUpdated,
        Self::PullRequestMerged,
    ];

    /// Wire name used by the event source.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Push => "PUSH",
            Self::PullRequestCreated => "PULL_REQUEST_CREATED",
            Self::PullRequestUpdated => "PULL_REQUEST_UPDATED",
            Self::PullRequestMerged => "PULL_REQUEST_MERGED",
        }
    }

    /// Parses an event name, ignoring ASCII case.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL
            .into_iter()
            .find(|event| event.as_str().eq_ignore_ascii_case(name))
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Unvalidated filter as written in a blueprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FilterSpec {
    /// Event type name, e.g. `push`.
    pub event: String,
    /// Branch name, e.g. `main`.
    pub branch: String,
}

/// A validated predicate over (event type, branch).
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EventFilter {
    event: EventType,
    branch: String,
}

impl EventFilter {
    /// Validates a filter spec.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::InvalidFilter`] for an unknown event type
    /// or an empty or whitespace-containing branch.
    pub fn new(spec: &FilterSpec) -> Result<Self> {
        let event = EventType::parse(&spec.event).ok_or_else(|| StackforgeError::InvalidFilter {
            reason: format!("unknown event type \"{}\"", spec.event),
        })?;
        let branch = spec.branch.trim();
        if branch.is_empty() {
            return Err(StackforgeError::InvalidFilter {
                reason: "branch name is empty".into(),
            });
        }
        if branch.chars().any(char::is_whitespace) {
            return Err(StackforgeError::InvalidFilter {
                reason: format!("branch name \"{branch}\" contains whitespace"),
            });
        }
        Ok(Self {
            event,
            branch: branch.to_string(),
        })
    }

    /// Event type that passes the filter.
    #[must_use]
    pub const fn event(&self) -> EventType {
        self.event
    }

    /// Branch that passes the filter.
    #[must_use]
    pub fn branch(&self) -> &str {
        &self.branch
    }

    /// Evaluates the predicate.
    #[must_use]
    pub fn matches(&self, event: EventType, branch: &str) -> bool {
        self.event == event && self.branch == branch
    }

    /// Anchored head-ref pattern for event sources that filter by regex.
    #[must_use]
    pub fn head_ref_pattern(&self) -> String {
        format!("^refs/heads/{}$", regex::escape(&self.branch))
    }
}

/// A source bound to a build resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TriggerBinding {
    /// Event source.
    pub source: EventSource,
    /// Bound build resource.
    pub target: ResourceId,
    /// Events that start a build.
    pub filter: EventFilter,
}

/// Tracks bindings and enforces one per build resource.
#[derive(Debug, Clone, Default)]
pub struct TriggerBinder {
    bindings: BTreeMap<ResourceId, TriggerBinding>,
}

impl TriggerBinder {
    /// Creates a binder with no bindings.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Binds `source` to the build resource `target`.
    ///
    /// # Errors
    ///
    /// - [`StackforgeError::Config`] if `target` is not a build project.
    /// - [`StackforgeError::InvalidFilter`] if the filter is malformed.
    /// - [`StackforgeError::DuplicateBinding`] if `target` is already bound.
    pub fn bind(
        &mut self,
        source: EventSource,
        target: &ResourceNode,
        filter: &FilterSpec,
    ) -> Result<TriggerBinding> {
        if target.kind() != ResourceKind::BuildProject {
            return Err(StackforgeError::Config {
                message: format!(
                    "triggers bind to build projects, not {} {}",
                    target.kind(),
                    target.id()
                ),
            });
        }
        let filter = EventFilter::new(filter)?;
        if self.bindings.contains_key(target.id()) {
            return Err(StackforgeError::DuplicateBinding {
                target: target.id().clone(),
            });
        }

        let binding = TriggerBinding {
            source,
            target: target.id().clone(),
            filter,
        };
        tracing::info!(
            source = %binding.source,
            target = %binding.target,
            event = %binding.filter.event,
            branch = %binding.filter.branch,
            "bound trigger"
        );
        let _ = self
            .bindings
            .insert(binding.target.clone(), binding.clone());
        Ok(binding)
    }

    /// The binding of a build resource, if any.
    #[must_use]
    pub fn binding(&self, target: &ResourceId) -> Option<&TriggerBinding> {
        self.bindings.get(target)
    }

    /// All bindings ordered by target id.
    pub fn bindings(&self) -> impl Iterator<Item = &TriggerBinding> {
        self.bindings.values()
    }
}
