//! Classified issues and order results.
//!
//! ## Issue Kinds
//!
//! | Kind | Severity | Color | Raised when |
//! |------|----------|-------|-------------|
//! | MissingDependency | Error | Yellow | a `requires` target is not active |
//! | Incompatible | Error | Red | both ends of an `incompatibleWith` pair are active |
//! | OrderViolation | Warning | Blue | the final order breaks an ordering rule |
//! | Cycle | Warning | Blue | the sorter had to drop or ignore rules to terminate |
//!
//! Relations with no issue render green.

use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::fmt;

use super::package_id::PackageId;
use super::relation::{OrderingRule, RuleSource};

/// Severity of an issue. Variant order is display order (errors first).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Severity {
    /// Must be fixed for the list to work.
    Error,
    /// Likely problem; the list still loads.
    Warning,
    /// Informational.
    Info,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Error => write!(f, "ERROR"),
            Self::Warning => write!(f, "WARNING"),
            Self::Info => write!(f, "INFO"),
        }
    }
}

/// Color the presentation layer uses for an edge or issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DisplayColor {
    /// Incompatibility.
    Red,
    /// Missing dependency.
    Yellow,
    /// Order violation or cycle.
    Blue,
    /// Satisfied relation.
    Green,
}

/// Classification of an issue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueKind {
    /// A required mod is not active.
    MissingDependency,
    /// Two active mods are incompatible.
    Incompatible,
    /// The order does not satisfy an ordering rule.
    OrderViolation,
    /// A cycle had to be broken or ignored.
    Cycle,
}

impl IssueKind {
    /// Severity this kind of issue is always reported with.
    pub fn severity(&self) -> Severity {
        match self {
            Self::MissingDependency | Self::Incompatible => Severity::Error,
            Self::OrderViolation | Self::Cycle => Severity::Warning,
        }
    }

    /// Presentation color.
    pub fn color(&self) -> DisplayColor {
        match self {
            Self::MissingDependency => DisplayColor::Yellow,
            Self::Incompatible => DisplayColor::Red,
            Self::OrderViolation | Self::Cycle => DisplayColor::Blue,
        }
    }
}

impl fmt::Display for IssueKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::MissingDependency => write!(f, "missing_dependency"),
            Self::Incompatible => write!(f, "incompatible"),
            Self::OrderViolation => write!(f, "order_violation"),
            Self::Cycle => write!(f, "cycle"),
        }
    }
}

/// A classified, severity-ranked problem with the constraint set.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Issue {
    /// What went wrong.
    pub kind: IssueKind,
    /// How bad it is.
    pub severity: Severity,
    /// Mods involved; the first one is the "owner" used for grouping.
    pub involved: Vec<PackageId>,
    /// Source of the rule that produced the issue, when there is one.
    pub source_of_rule: Option<RuleSource>,
    /// Human-readable description.
    pub message: String,
}

impl Issue {
    /// Create an issue with the kind's default severity.
    pub fn new(
        kind: IssueKind,
        involved: Vec<PackageId>,
        source_of_rule: Option<RuleSource>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            severity: kind.severity(),
            involved,
            source_of_rule,
            message: message.into(),
        }
    }

    /// Identifier used for grouping, if any.
    pub fn primary(&self) -> Option<&PackageId> {
        self.involved.first()
    }

    /// Presentation color.
    pub fn color(&self) -> DisplayColor {
        self.kind.color()
    }

    /// Whether the issue names the given mod.
    pub fn involves(&self, id: &PackageId) -> bool {
        self.involved.contains(id)
    }
}

// Display ordering: severity, then first involved id, then the rest for a total order.
impl PartialOrd for Issue {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Issue {
    fn cmp(&self, other: &Self) -> Ordering {
        self.severity
            .cmp(&other.severity)
            .then_with(|| self.primary().cmp(&other.primary()))
            .then_with(|| self.kind.cmp(&other.kind))
            .then_with(|| self.involved.cmp(&other.involved))
            .then_with(|| self.source_of_rule.cmp(&other.source_of_rule))
            .then_with(|| self.message.cmp(&other.message))
    }
}

/// An ordering rule between two active mods with its rendered status.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RelationReport {
    /// The rule.
    pub rule: OrderingRule,
    /// Whether the final order satisfies it.
    pub satisfied: bool,
    /// Color for rendering: green when satisfied, blue otherwise.
    pub color: DisplayColor,
}

/// Result of planning: the total order plus everything wrong with it.
///
/// Recomputed on every request; never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderResult {
    /// Every active mod exactly once.
    pub order: Vec<PackageId>,
    /// Classified issues, errors first.
    pub issues: Vec<Issue>,
    /// Every ordering rule between active mods, colored.
    pub relations: Vec<RelationReport>,
    /// xxh64 fingerprint of `order`, `issues` and `relations`.
    pub fingerprint: String,
}

impl OrderResult {
    /// Issues of one kind.
    pub fn issues_of(&self, kind: IssueKind) -> impl Iterator<Item = &Issue> {
        self.issues.iter().filter(move |i| i.kind == kind)
    }

    /// Whether any issue has severity `Error`.
    pub fn has_errors(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Error)
    }

    /// Zero-based position of a mod in the order.
    pub fn position(&self, id: &PackageId) -> Option<usize> {
        self.order.iter().position(|o| o == id)
    }
}
