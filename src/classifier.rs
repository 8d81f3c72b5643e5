//! Conflict classifier.
//!
//! Walks the constraint graph against a total order and reports what is
//! wrong with it. Never fails: contradictions are results, not errors.
//!
//! The returned issue list is sorted by severity (errors first), then by the
//! first involved identifier, so two runs over the same input render the same.

use std::collections::BTreeMap;

use crate::graph::{ConstraintGraph, Requirement, RequirementStatus};
use crate::sorter::CycleReport;
use crate::types::{DisplayColor, Issue, IssueKind, PackageId, Relation, RelationReport};

/// Issues plus the per-edge rendering of an order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Classification {
    /// Sorted, deduplicated issues.
    pub issues: Vec<Issue>,
    /// One report per ordering edge whose endpoints are both in the order.
    pub relations: Vec<RelationReport>,
}

/// Classify `order` against the graph and its side tables.
///
/// `order` may be partial (an audited list that omits some active mods);
/// edges with an endpoint outside it are neither satisfied nor violated and
/// are left out of `relations`.
pub fn classify(
    graph: &ConstraintGraph,
    order: &[PackageId],
    requires: &[Requirement],
    incompatible: &[Relation],
    cycles: &[CycleReport],
) -> Classification {
    let mut position: BTreeMap<&PackageId, usize> = BTreeMap::new();
    for (pos, id) in order.iter().enumerate() {
        position.entry(id).or_insert(pos);
    }

    let mut issues = Vec::new();

    for req in requires.iter().filter(|r| r.is_missing()) {
        let state = match req.status {
            RequirementStatus::Inactive => "is installed but not active",
            _ => "is not installed",
        };
        issues.push(Issue::new(
            IssueKind::MissingDependency,
            vec![req.subject.clone(), req.object.clone()],
            Some(req.source),
            format!("{} requires {}, which {}", req.subject, req.object, state),
        ));
    }

    for pair in incompatible {
        if graph.contains(&pair.subject) && graph.contains(&pair.object) {
            issues.push(Issue::new(
                IssueKind::Incompatible,
                vec![pair.subject.clone(), pair.object.clone()],
                Some(pair.source),
                format!("{} is incompatible with {}", pair.subject, pair.object),
            ));
        }
    }

    let mut relations = Vec::with_capacity(graph.edge_count());
    for rule in graph.edges() {
        let (Some(&b), Some(&a)) = (position.get(&rule.before), position.get(&rule.after)) else {
            continue;
        };
        let satisfied = b < a;
        if !satisfied {
            issues.push(Issue::new(
                IssueKind::OrderViolation,
                vec![rule.before.clone(), rule.after.clone()],
                Some(rule.source),
                format!("{} should load before {} ({} rule)", rule.before, rule.after, rule.source),
            ));
        }
        relations.push(RelationReport {
            rule: rule.clone(),
            satisfied,
            color: if satisfied {
                DisplayColor::Green
            } else {
                IssueKind::OrderViolation.color()
            },
        });
    }

    issues.extend(cycles.iter().map(CycleReport::to_issue));
    issues.sort();
    issues.dedup();

    tracing::debug!(
        issues = issues.len(),
        relations = relations.len(),
        "Classified load order"
    );

    Classification { issues, relations }
}
