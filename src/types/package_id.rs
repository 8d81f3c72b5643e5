//! Package identifiers for managed mods.

use serde::{Deserialize, Deserializer, Serialize};
use std::fmt;
use std::sync::OnceLock;

use super::relation::RelationKind;

/// Validation error raised while constructing the constraint model.
///
/// These are rejected at construction time and never reach the sorter.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    /// Identifier was empty after trimming.
    #[error("Package identifier is empty")]
    EmptyIdentifier,
    /// Identifier contains characters that cannot appear in a package id.
    #[error("Invalid package identifier: {0:?}")]
    InvalidIdentifier(String),
    /// A relation points from an entity to itself.
    #[error("Self-referential {kind} relation on {id}")]
    SelfReference {
        /// The offending identifier.
        id: PackageId,
        /// Kind of the rejected relation.
        kind: RelationKind,
    },
}

fn identifier_pattern() -> &'static regex_lite::Regex {
    static PATTERN: OnceLock<regex_lite::Regex> = OnceLock::new();
    PATTERN.get_or_init(|| {
        // Canonical form only: lowercase, no whitespace or control characters.
        regex_lite::Regex::new(r"^[a-z0-9_][a-z0-9_.\-]*$").expect("package id pattern is valid")
    })
}

/// Unique, case-insensitive identifier of a mod (`packageId`).
///
/// Always stored in canonical form: trimmed and lowercased. Two ids that
/// canonicalize to the same string are the same entity. Implements `Ord`
/// so every collection keyed by it iterates deterministically.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(transparent)]
pub struct PackageId(String);

impl PackageId {
    /// Canonicalize and validate a raw identifier.
    pub fn parse(raw: &str) -> Result<Self, ValidationError> {
        let canonical = raw.trim().to_lowercase();
        if canonical.is_empty() {
            return Err(ValidationError::EmptyIdentifier);
        }
        if !identifier_pattern().is_match(&canonical) {
            return Err(ValidationError::InvalidIdentifier(raw.to_string()));
        }
        Ok(Self(canonical))
    }

    /// Get the canonical string form.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PackageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for PackageId {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl AsRef<str> for PackageId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl<'de> Deserialize<'de> for PackageId {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::parse(&raw).map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_canonicalizes_case_and_whitespace() {
        let a = PackageId::parse("  Brrainz.Harmony ").unwrap();
        let b = PackageId::parse("brrainz.harmony").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.as_str(), "brrainz.harmony");
    }

    #[test]
    fn test_rejects_empty() {
        assert_eq!(PackageId::parse("   "), Err(ValidationError::EmptyIdentifier));
    }

    #[test]
    fn test_rejects_inner_whitespace() {
        assert!(matches!(
            PackageId::parse("ludeon rimworld"),
            Err(ValidationError::InvalidIdentifier(_))
        ));
    }

    #[test]
    fn test_ordering_is_lexicographic() {
        let a = PackageId::parse("a.mod").unwrap();
        let b = PackageId::parse("b.mod").unwrap();
        assert!(a < b);
    }

    #[test]
    fn test_deserialize_canonicalizes() {
        let id: PackageId = serde_json::from_str("\"Ludeon.RimWorld.Royalty\"").unwrap();
        assert_eq!(id.as_str(), "ludeon.rimworld.royalty");
        assert!(serde_json::from_str::<PackageId>("\"\"").is_err());
    }
}
