//! Core types for the constraint model.

pub mod package_id;
pub mod relation;
pub mod entity;
pub mod issue;

pub use package_id::{PackageId, ValidationError};
pub use relation::{canonical_pair, OrderingRule, Pin, Relation, RelationKind, RuleSource};
pub use entity::{EntityDescriptor, ModEntity, SourceTag};
pub use issue::{DisplayColor, Issue, IssueKind, OrderResult, RelationReport, Severity};
