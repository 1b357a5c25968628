//! Named outputs of a composition pass.
//!
//! Every pass publishes a flat `name -> value` map. Cross-stack entries
//! additionally carry a qualified export name under which other passes
//! import them.

use std::collections::{BTreeMap, HashMap};

use serde::{Deserialize, Serialize};
use stackforge_common::constants::NAME_SEPARATOR;
use stackforge_common::error::{Result, StackforgeError};
use stackforge_common::types::Visibility;

use crate::node::Attribute;

/// An output a blueprint declares, resolved once the graph is realized.
#[derive(Debug, Clone, PartialEq)]
pub struct ExportDecl {
    /// Output name, unique within the pass.
    pub name: String,
    /// Where the value comes from.
    pub value: Attribute,
    /// Who may read it.
    pub visibility: Visibility,
}

/// Name under which a cross-stack output is imported by other passes.
#[must_use]
pub fn qualified_name(name: &str, namespace: &str) -> String {
    format!("{name}{NAME_SEPARATOR}{namespace}")
}

/// A published output.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExportEntry {
    /// Output name.
    pub name: String,
    /// Qualified name other passes import it by; cross-stack entries only.
    pub export_name: Option<String>,
    /// Published value.
    pub value: String,
    /// Who may read it.
    pub visibility: Visibility,
}

/// Publishes outputs under one namespace and rejects collisions.
#[derive(Debug, Clone)]
pub struct OutputExporter {
    namespace: String,
    entries: Vec<ExportEntry>,
    index: HashMap<String, usize>,
}

impl OutputExporter {
    /// Creates an exporter whose cross-stack names end in `namespace`.
    #[must_use]
    pub fn new(namespace: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            entries: Vec::new(),
            index: HashMap::new(),
        }
    }

    /// Namespace appended to cross-stack export names.
    #[must_use]
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Publishes an output.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::DuplicateExport`] if `name` was already
    /// published in this pass, and [`StackforgeError::Config`] if it is empty.
    pub fn publish(
        &mut self,
        name: impl Into<String>,
        value: impl Into<String>,
        visibility: Visibility,
    ) -> Result<&ExportEntry> {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(StackforgeError::Config {
                message: "export name must not be empty".into(),
            });
        }
        if self.index.contains_key(&name) {
            return Err(StackforgeError::DuplicateExport { name });
        }

        let export_name =
            (visibility == Visibility::CrossStack).then(|| qualified_name(&name, &self.namespace));
        let entry = ExportEntry {
            name: name.clone(),
            export_name,
            value: value.into(),
            visibility,
        };
        tracing::info!(name = %entry.name, %visibility, "published output");
        let slot = self.entries.len();
        self.entries.push(entry);
        let _ = self.index.insert(name, slot);
        Ok(&self.entries[slot])
    }

    /// Looks up a published entry.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&ExportEntry> {
        self.index.get(name).map(|&slot| &self.entries[slot])
    }

    /// Looks up a published value.
    #[must_use]
    pub fn value(&self, name: &str) -> Option<&str> {
        self.get(name).map(|entry| entry.value.as_str())
    }

    /// All entries in publication order.
    #[must_use]
    pub fn entries(&self) -> &[ExportEntry] {
        &self.entries
    }

    /// Entries importable by other passes.
    pub fn cross_stack(&self) -> impl Iterator<Item = &ExportEntry> {
        self.entries
            .iter()
            .filter(|entry| entry.visibility == Visibility::CrossStack)
    }

    /// The pass's flat output map.
    #[must_use]
    pub fn outputs(&self) -> BTreeMap<String, String> {
        self.entries
            .iter()
            .map(|entry| (entry.name.clone(), entry.value.clone()))
            .collect()
    }

    /// Number of published entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether nothing was published.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
