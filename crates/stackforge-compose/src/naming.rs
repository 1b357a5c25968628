//! Structured resource identity generation.
//!
//! Every id in a composition is `<logical-name>-<suffix>`, where the suffix
//! derives from the project prefix. The registry remembers what it issued
//! and refuses to hand out the same id twice.

use std::collections::HashSet;

use stackforge_common::constants::NAME_SEPARATOR;
use stackforge_common::error::{Result, StackforgeError};
use stackforge_common::types::{ResourceId, ResourceKind};

/// Issues collision-checked resource ids for one composition.
#[derive(Debug, Clone)]
pub struct IdentityRegistry {
    suffix: String,
    issued: HashSet<ResourceId>,
}

impl IdentityRegistry {
    /// Creates a registry for the given project prefix.
    ///
    /// # Errors
    ///
    /// Returns an error if the prefix is empty or contains characters other
    /// than ASCII letters, digits and `-`.
    pub fn new(project_prefix: &str) -> Result<Self> {
        let suffix = resource_suffix(project_prefix)?;
        Ok(Self {
            suffix,
            issued: HashSet::new(),
        })
    }

    /// Returns the suffix appended to every id and export name.
    #[must_use]
    pub fn suffix(&self) -> &str {
        &self.suffix
    }

    /// Issues the id for a logical resource name.
    ///
    /// # Errors
    ///
    /// Returns [`StackforgeError::Config`] for a malformed logical name and
    /// [`StackforgeError::DuplicateResource`] if the id was already issued.
    pub fn issue(&mut self, kind: ResourceKind, logical: &str) -> Result<ResourceId> {
        validate_segment("logical name", logical)?;
        let id = ResourceId::new(self.qualify(logical));
        if !self.issued.insert(id.clone()) {
            return Err(StackforgeError::DuplicateResource { id });
        }
        tracing::debug!(id = %id, %kind, "issued resource id");
        Ok(id)
    }

    /// Appends the suffix to a name, as used for export names.
    #[must_use]
    pub fn qualify(&self, name: &str) -> String {
        format!("{name}{NAME_SEPARATOR}{}", self.suffix)
    }

    /// Returns whether an id was issued by this registry.
    #[must_use]
    pub fn contains(&self, id: &ResourceId) -> bool {
        self.issued.contains(id)
    }
}

/// Derives the id suffix from a project prefix.
///
/// # Errors
///
/// Returns an error if the prefix is not a valid name segment.
pub fn resource_suffix(project_prefix: &str) -> Result<String> {
    validate_segment("project prefix", project_prefix)?;
    Ok(project_prefix.to_ascii_lowercase())
}

fn validate_segment(what: &str, value: &str) -> Result<()> {
    let well_formed = !value.is_empty()
        && !value.starts_with(NAME_SEPARATOR)
        && !value.ends_with(NAME_SEPARATOR)
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == NAME_SEPARATOR);
    if well_formed {
        Ok(())
    } else {
        Err(StackforgeError::Config {
            message: format!(
                "{what} \"{value}\" must be non-empty ASCII letters, digits and inner '-'"
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn issued_ids_carry_lowercased_suffix() {
        let mut ids = IdentityRegistry::new("Sample3").expect("registry");
        let id = ids.issue(ResourceKind::Repository, "ecr-repo").expect("id");
        assert_eq!(id.as_str(), "ecr-repo-sample3");
        assert!(ids.contains(&id));
    }

    #[test]
    fn issuing_twice_is_a_collision() {
        let mut ids = IdentityRegistry::new("demo").expect("registry");
        let _ = ids.issue(ResourceKind::Role, "taskrole").expect("first");
        let err = ids.issue(ResourceKind::Role, "taskrole").unwrap_err();
        assert!(matches!(err, StackforgeError::DuplicateResource { .. }));
    }

    #[test]
    fn qualify_matches_id_format() {
        let ids = IdentityRegistry::new("demo").expect("registry");
        assert_eq!(ids.qualify("projectArn"), "projectArn-demo");
    }

    #[test]
    fn malformed_names_are_rejected() {
        assert!(IdentityRegistry::new("").is_err());
        assert!(IdentityRegistry::new("has space").is_err());
        let mut ids = IdentityRegistry::new("demo").expect("registry");
        assert!(ids.issue(ResourceKind::Network, "-vpc").is_err());
        assert!(ids.issue(ResourceKind::Network, "vpc_1").is_err());
    }
}
