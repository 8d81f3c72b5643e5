//! Relation types between mods.

use serde::{Deserialize, Serialize};
use std::fmt;

use super::package_id::{PackageId, ValidationError};

/// Kind of constraint one mod places on another.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum RelationKind {
    /// Subject needs the object present and active.
    Requires,
    /// Subject must precede the object.
    LoadBefore,
    /// Subject must follow the object.
    LoadAfter,
    /// Subject and object must not both be active (symmetric).
    IncompatibleWith,
}

impl RelationKind {
    /// Whether this kind constrains position in the load order.
    pub fn is_ordering(&self) -> bool {
        matches!(self, Self::LoadBefore | Self::LoadAfter)
    }

    /// Whether the relation holds in both directions.
    pub fn is_symmetric(&self) -> bool {
        matches!(self, Self::IncompatibleWith)
    }
}

impl fmt::Display for RelationKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Requires => write!(f, "requires"),
            Self::LoadBefore => write!(f, "loadBefore"),
            Self::LoadAfter => write!(f, "loadAfter"),
            Self::IncompatibleWith => write!(f, "incompatibleWith"),
        }
    }
}

/// Where a relation came from.
///
/// Variant order is authority order: `Declared < Community < Manual`.
/// Comparing two sources answers "which one wins".
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuleSource {
    /// Self-declared in the mod's own metadata (lowest authority).
    Declared,
    /// Downloaded community rule set.
    Community,
    /// Authored by the user (highest authority).
    Manual,
}

impl RuleSource {
    /// Numeric authority rank, higher wins.
    pub fn rank(&self) -> u8 {
        match self {
            Self::Declared => 0,
            Self::Community => 1,
            Self::Manual => 2,
        }
    }

    /// Whether the sorter may drop an edge of this source to break a cycle.
    pub fn is_droppable(&self) -> bool {
        !matches!(self, Self::Manual)
    }
}

impl fmt::Display for RuleSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Declared => write!(f, "declared"),
            Self::Community => write!(f, "community"),
            Self::Manual => write!(f, "manual"),
        }
    }
}

/// A single validated constraint between two mods.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Relation {
    /// Mod the relation is declared on.
    pub subject: PackageId,
    /// Kind of constraint.
    pub kind: RelationKind,
    /// Mod the relation points at.
    pub object: PackageId,
    /// Origin of the relation.
    pub source: RuleSource,
}

impl Relation {
    /// Create a relation, rejecting self-references.
    pub fn new(
        subject: PackageId,
        kind: RelationKind,
        object: PackageId,
        source: RuleSource,
    ) -> Result<Self, ValidationError> {
        if subject == object {
            return Err(ValidationError::SelfReference { id: subject, kind });
        }
        Ok(Self { subject, kind, object, source })
    }

    /// Normalize an ordering relation to "before precedes after" form.
    ///
    /// `loadAfter(A, B)` becomes `B -> A`. Returns `None` for non-ordering kinds.
    pub fn as_ordering(&self) -> Option<OrderingRule> {
        match self.kind {
            RelationKind::LoadBefore => Some(OrderingRule {
                before: self.subject.clone(),
                after: self.object.clone(),
                source: self.source,
            }),
            RelationKind::LoadAfter => Some(OrderingRule {
                before: self.object.clone(),
                after: self.subject.clone(),
                source: self.source,
            }),
            _ => None,
        }
    }

    /// Unordered pair of endpoints, smallest id first.
    pub fn canonical_pair(&self) -> (PackageId, PackageId) {
        canonical_pair(&self.subject, &self.object)
    }
}

/// Order two ids so the smaller comes first.
pub fn canonical_pair(a: &PackageId, b: &PackageId) -> (PackageId, PackageId) {
    if a <= b {
        (a.clone(), b.clone())
    } else {
        (b.clone(), a.clone())
    }
}

/// Ordering relation in normalized directed form: `before` precedes `after`.
///
/// Canonical ordering: (before, after, source).
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OrderingRule {
    /// Mod that must load first.
    pub before: PackageId,
    /// Mod that must load later.
    pub after: PackageId,
    /// Origin of the rule.
    pub source: RuleSource,
}

impl OrderingRule {
    /// Unordered endpoint pair of this rule.
    pub fn pair(&self) -> (PackageId, PackageId) {
        canonical_pair(&self.before, &self.after)
    }
}

impl fmt::Display for OrderingRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} -> {} ({})", self.before, self.after, self.source)
    }
}

/// Placement hint from `loadTop` / `loadBottom` rules.
///
/// Variant order is placement order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Pin {
    /// Prefer the very start of the order.
    Top,
    /// No placement preference.
    None,
    /// Prefer the very end of the order.
    Bottom,
}

impl Default for Pin {
    fn default() -> Self {
        Self::None
    }
}
