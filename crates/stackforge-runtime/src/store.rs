//! Persistent cross-stack export store.
//!
//! A JSON file keyed by qualified export name. Each entry remembers which
//! stack published it, so one stack cannot take over another's exports.
//! Local outputs never reach the store.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use stackforge_common::constants::DEFAULT_EXPORT_STORE;
use stackforge_common::error::{Result, StackforgeError};
use uuid::Uuid;

use crate::engine::RealizedGraph;

/// A persisted cross-stack export.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredExport {
    /// Stack that published the export.
    pub stack: String,
    /// Exported value.
    pub value: String,
    /// Pass that published it.
    pub pass_id: Uuid,
    /// Publication time.
    pub exported_at: DateTime<Utc>,
}

#[derive(Debug, Default, Serialize, Deserialize)]
struct StoreFile {
    exports: BTreeMap<String, StoredExport>,
}

/// Cross-stack exports backed by a JSON file.
#[derive(Debug, Clone)]
pub struct ExportStore {
    path: PathBuf,
    exports: BTreeMap<String, StoredExport>,
}

impl ExportStore {
    /// Opens the store at `path`. A missing file is an empty store.
    ///
    /// # Errors
    ///
    /// Returns an error if the file exists but cannot be read or parsed.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let exports = if path.exists() {
            let content = std::fs::read_to_string(&path).map_err(|e| StackforgeError::Io {
                path: path.clone(),
                source: e,
            })?;
            serde_json::from_str::<StoreFile>(&content)?.exports
        } else {
            BTreeMap::new()
        };
        tracing::debug!(path = %path.display(), entries = exports.len(), "opened export store");
        Ok(Self { path, exports })
    }

    /// Opens the store at its default location under `root`.
    ///
    /// # Errors
    ///
    /// See [`ExportStore::open`].
    pub fn open_in(root: &Path) -> Result<Self> {
        Self::open(root.join(DEFAULT_EXPORT_STORE))
    }

    /// Location of the backing file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Writes the store to disk, replacing the previous file atomically.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be written.
    pub fn save(&self) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            std::fs::create_dir_all(parent).map_err(|e| StackforgeError::Io {
                path: parent.to_path_buf(),
                source: e,
            })?;
        }
        let file = StoreFile {
            exports: self.exports.clone(),
        };
        let content = serde_json::to_string_pretty(&file)?;
        let tmp = self.path.with_extension("json.tmp");
        std::fs::write(&tmp, content).map_err(|e| StackforgeError::Io {
            path: tmp.clone(),
            source: e,
        })?;
        std::fs::rename(&tmp, &self.path).map_err(|e| StackforgeError::Io {
            path: self.path.clone(),
            source: e,
        })?;
        tracing::debug!(path = %self.path.display(), entries = self.exports.len(), "saved export store");
        Ok(())
    }

    /// Checks that `stack` may publish every name in `names`.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::DuplicateExport`] for the first name that
    /// another stack owns.
    pub fn check_publishable<S: AsRef<str>>(
        &self,
        stack: &str,
        names: impl IntoIterator<Item = S>,
    ) -> Result<()> {
        for name in names {
            let name = name.as_ref();
            if self
                .exports
                .get(name)
                .is_some_and(|existing| existing.stack != stack)
            {
                return Err(StackforgeError::DuplicateExport {
                    name: name.to_string(),
                });
            }
        }
        Ok(())
    }

    /// Records the cross-stack outputs of a realized pass.
    ///
    /// Entries previously published by the same stack are replaced.
    /// Returns the number of entries recorded.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::DuplicateExport`] if another stack owns
    /// one of the names; the store is then unchanged.
    pub fn publish(&mut self, realized: &RealizedGraph) -> Result<usize> {
        let stack = realized.stack_name.as_str();
        let incoming: Vec<(&str, &str)> = realized
            .cross_stack()
            .filter_map(|entry| {
                entry
                    .export_name
                    .as_deref()
                    .map(|name| (name, entry.value.as_str()))
            })
            .collect();

        self.check_publishable(stack, incoming.iter().map(|(name, _)| name))?;

        let _ = self.remove_stack(stack);
        let exported_at = Utc::now();
        for (name, value) in &incoming {
            tracing::info!(export = %name, stack, "stored cross-stack export");
            let _ = self.exports.insert(
                (*name).to_string(),
                StoredExport {
                    stack: stack.to_string(),
                    value: (*value).to_string(),
                    pass_id: realized.pass_id,
                    exported_at,
                },
            );
        }
        Ok(incoming.len())
    }

    /// Value of a stored export.
    #[must_use]
    pub fn import(&self, name: &str) -> Option<&str> {
        self.exports.get(name).map(|export| export.value.as_str())
    }

    /// A stored export with its metadata.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&StoredExport> {
        self.exports.get(name)
    }

    /// Every stored export as `name -> value`, the form `Import`
    /// attributes are resolved against.
    #[must_use]
    pub fn imports(&self) -> BTreeMap<String, String> {
        self.exports
            .iter()
            .map(|(name, export)| (name.clone(), export.value.clone()))
            .collect()
    }

    /// Drops every export a stack published and returns how many there
    /// were.
    pub fn remove_stack(&mut self, stack: &str) -> usize {
        let before = self.exports.len();
        self.exports.retain(|_, export| export.stack != stack);
        before - self.exports.len()
    }

    /// Number of stored exports.
    #[must_use]
    pub fn len(&self) -> usize {
        self.exports.len()
    }

    /// Whether the store holds nothing.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.exports.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use stackforge_common::types::Visibility;
    use stackforge_compose::blueprint::Blueprint;
    use stackforge_compose::node::Attribute;

    use super::*;
    use crate::engine::compose;
    use crate::provider::simulated::SimulatedProvider;

    fn realized(stack: &str, exports: &[(&str, &str, Visibility)]) -> RealizedGraph {
        let mut bp = Blueprint::new(stack, "demo").expect("blueprint");
        for (name, value, visibility) in exports {
            bp.export(*name, Attribute::literal(*value), *visibility)
                .expect("export");
        }
        compose(bp, &SimulatedProvider::new()).expect("compose")
    }

    #[test]
    fn missing_file_is_empty_store() {
        let dir = tempfile::tempdir().expect("tempdir");
        let store = ExportStore::open_in(dir.path()).expect("open");
        assert!(store.is_empty());
        assert!(store.path().ends_with(DEFAULT_EXPORT_STORE));
    }

    #[test]
    fn only_cross_stack_entries_are_stored() {
        let mut store = ExportStore::open("unused.json").expect("open");
        let graph = realized(
            "producer",
            &[
                ("imageUri", "repo:latest", Visibility::Local),
                ("serviceArn", "arn:svc", Visibility::CrossStack),
            ],
        );
        assert_eq!(store.publish(&graph).expect("publish"), 1);
        assert_eq!(store.import("serviceArn-demo"), Some("arn:svc"));
        assert_eq!(store.import("imageUri-demo"), None);
        assert_eq!(store.get("serviceArn-demo").expect("entry").stack, "producer");
    }

    #[test]
    fn other_stack_cannot_claim_name() {
        let mut store = ExportStore::open("unused.json").expect("open");
        let first = realized("a", &[("serviceArn", "one", Visibility::CrossStack)]);
        let second = realized("b", &[("serviceArn", "two", Visibility::CrossStack)]);
        let _ = store.publish(&first).expect("first");
        let err = store.publish(&second).unwrap_err();
        assert!(matches!(err, StackforgeError::DuplicateExport { .. }));
        assert_eq!(store.import("serviceArn-demo"), Some("one"));
    }

    #[test]
    fn ownership_is_checked_by_name() {
        let mut store = ExportStore::open("unused.json").expect("open");
        let _ = store
            .publish(&realized("a", &[("serviceArn", "one", Visibility::CrossStack)]))
            .expect("publish");

        assert!(store.check_publishable("a", ["serviceArn-demo"]).is_ok());
        assert!(store.check_publishable("b", ["projectArn-demo"]).is_ok());
        let err = store
            .check_publishable("b", ["projectArn-demo", "serviceArn-demo"])
            .unwrap_err();
        assert!(matches!(
            err,
            StackforgeError::DuplicateExport { ref name } if name == "serviceArn-demo"
        ));
    }

    #[test]
    fn same_stack_replaces_its_entries() {
        let mut store = ExportStore::open("unused.json").expect("open");
        let first = realized(
            "a",
            &[
                ("serviceArn", "one", Visibility::CrossStack),
                ("projectArn", "p", Visibility::CrossStack),
            ],
        );
        let second = realized("a", &[("serviceArn", "two", Visibility::CrossStack)]);
        let _ = store.publish(&first).expect("first");
        let _ = store.publish(&second).expect("second");
        assert_eq!(store.import("serviceArn-demo"), Some("two"));
        assert_eq!(store.import("projectArn-demo"), None);
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn save_and_reopen_keeps_entries() {
        let dir = tempfile::tempdir().expect("tempdir");
        let mut store = ExportStore::open_in(dir.path()).expect("open");
        let graph = realized("a", &[("serviceName", "api", Visibility::CrossStack)]);
        let _ = store.publish(&graph).expect("publish");
        store.save().expect("save");

        let reopened = ExportStore::open_in(dir.path()).expect("reopen");
        let entry = reopened.get("serviceName-demo").expect("entry");
        assert_eq!(entry.value, "api");
        assert_eq!(entry.pass_id, graph.pass_id);
    }

    #[test]
    fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("exports.json");
        std::fs::write(&path, "{not json").expect("write");
        assert!(matches!(
            ExportStore::open(&path),
            Err(StackforgeError::Serialization { .. })
        ));
    }

    #[test]
    fn remove_stack_drops_only_its_entries() {
        let mut store = ExportStore::open("unused.json").expect("open");
        let _ = store
            .publish(&realized("a", &[("x", "1", Visibility::CrossStack)]))
            .expect("a");
        let mut bp = Blueprint::new("b", "other").expect("blueprint");
        bp.export("x", Attribute::literal("2"), Visibility::CrossStack)
            .expect("export");
        let b = compose(bp, &SimulatedProvider::new()).expect("compose");
        let _ = store.publish(&b).expect("b");
        assert_eq!(store.remove_stack("a"), 1);
        assert_eq!(store.imports().keys().collect::<Vec<_>>(), vec!["x-other"]);
    }
}
