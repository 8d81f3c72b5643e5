//! # modorder-kernel
//!
//! Deterministic load-order planning for interdependent mods.
//!
//! The kernel answers one question:
//!
//! > Given the installed mods and every rule about them, in what order should
//! > the active ones load, and what is wrong with that order?
//!
//! ## Core Contract
//!
//! 1. Merge manual, community and self-declared rules by authority
//! 2. Build a constraint graph over the active mods
//! 3. Sort it topologically, preferring the prior order on ties and breaking
//!    cycles by dropping the lowest-authority edge
//! 4. Classify missing dependencies, incompatibilities, order violations and
//!    cycles into a severity-ranked issue list
//!
//! ## Architecture
//!
//! ```text
//! RuleCache (fetch/load) ─► community RuleSet ─┐
//!                            manual RuleSet ───┼─► merge ─► ConstraintGraph ─► sort ─► classify ─► OrderResult
//!          ModEntity snapshot (declared) ──────┘
//!                    ↓
//!               RuleStore (file or memory)
//! ```
//!
//! ## Determinism Guarantees
//!
//! - Same snapshot + same rules + same reference order → identical `OrderResult`
//! - Merge output does not depend on input iteration order
//! - Sorting an output again with itself as reference returns it unchanged
//! - Every `OrderResult` carries an xxh64 fingerprint

#![warn(missing_docs)]
#![warn(clippy::all)]

pub mod types;
pub mod rules;
pub mod store;
pub mod graph;
pub mod sorter;
pub mod classifier;
pub mod planner;
pub mod fingerprint;
pub mod config;

// Re-exports
pub use types::{
    DisplayColor, EntityDescriptor, Issue, IssueKind, ModEntity, OrderResult, OrderingRule,
    PackageId, Pin, Relation, RelationKind, RelationReport, RuleSource, Severity, SourceTag,
    ValidationError,
};
pub use rules::{
    merge, CacheRecord, MergedRules, ModRule, RuleCache, RuleCacheError, RuleCacheStats,
    RuleConflict, RuleDocument, RuleFetcher, RuleSet,
};
#[cfg(feature = "fetch")]
pub use rules::HttpRuleFetcher;
pub use store::{FileRuleStore, InMemoryRuleStore, RuleStore};
pub use graph::{ConstraintGraph, GraphError, Requirement, RequirementStatus};
pub use sorter::{sort, CycleReport, CycleResolution, SortOutcome};
pub use classifier::{classify, Classification};
pub use planner::{plan_with_rules, LoadOrderPlanner, PlanError};
pub use fingerprint::fingerprint;
pub use config::KernelConfig;

/// Schema version of persisted records.
/// Increment on breaking changes to `CacheRecord` or `RuleDocument`.
pub const MODORDER_SCHEMA_VERSION: &str = "1.0.0";
