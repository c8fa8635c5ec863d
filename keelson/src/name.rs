//! Stable, versioned names for command and event payload shapes.
use std::fmt;

use serde::{Deserialize, Serialize};

/// An immutable `(name, version)` pair identifying a command or event payload
/// shape.
///
/// Equality and hashing are structural. The display form is `name/version`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct VersionedName {
    name: String,
    version: String,
}

impl VersionedName {
    /// Creates a new versioned name.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
        }
    }

    /// Returns the name part.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the version part.
    pub fn version(&self) -> &str {
        &self.version
    }

    /// Returns the same name at a different version.
    #[must_use]
    pub fn with_version(&self, version: impl Into<String>) -> Self {
        Self::new(self.name.clone(), version)
    }
}

impl fmt::Display for VersionedName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.name, self.version)
    }
}

#[cfg(test)]
mod tests {
    use std::collections::HashSet;

    use super::*;

    #[test]
    fn formats_as_name_slash_version() {
        assert_eq!(VersionedName::new("created", "0").to_string(), "created/0");
    }

    #[test]
    fn equality_is_structural() {
        let mut seen = HashSet::new();
        seen.insert(VersionedName::new("created", "0"));
        assert!(seen.contains(&VersionedName::new("created", "0")));
        assert!(!seen.contains(&VersionedName::new("created", "1")));
    }
}
