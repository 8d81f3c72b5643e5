//! Load order planner.
//!
//! Ties the pure pipeline together:
//!
//! ```text
//! manual + community + declared → merge → ConstraintGraph → sort → classify → OrderResult
//! ```
//!
//! The planner owns no mutable state and performs no I/O. It is safe to share
//! behind an `Arc` and call from many tasks at once.

use std::collections::BTreeSet;

use crate::classifier::{classify, Classification};
use crate::graph::{ConstraintGraph, GraphError};
use crate::rules::{merge, MergedRules, RuleDocument, RuleSet};
use crate::sorter::sort;
use crate::types::{ModEntity, OrderResult, PackageId, RuleSource};

/// Error type for planner operations.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PlanError {
    /// The entity snapshot is malformed.
    #[error("Invalid snapshot: {0}")]
    Graph(#[from] GraphError),
}

/// Computes load orders from a fixed pair of manual and community rule sets.
///
/// Declared rules come from the entities passed to each call, so one planner
/// serves any number of snapshots.
#[derive(Debug, Clone)]
pub struct LoadOrderPlanner {
    manual: RuleSet,
    community: RuleSet,
}

impl Default for LoadOrderPlanner {
    fn default() -> Self {
        Self::new(RuleSet::new(RuleSource::Manual), RuleSet::new(RuleSource::Community))
    }
}

impl LoadOrderPlanner {
    /// Create a planner. Each set's relations are re-tagged with the set's role.
    pub fn new(manual: RuleSet, community: RuleSet) -> Self {
        Self {
            manual: retag(manual, RuleSource::Manual),
            community: retag(community, RuleSource::Community),
        }
    }

    /// Create a planner from parsed rule documents.
    pub fn from_documents(manual: &RuleDocument, community: &RuleDocument) -> Self {
        Self {
            manual: manual.to_rule_set(RuleSource::Manual),
            community: community.to_rule_set(RuleSource::Community),
        }
    }

    /// Manual rules in effect.
    pub fn manual(&self) -> &RuleSet {
        &self.manual
    }

    /// Community rules in effect.
    pub fn community(&self) -> &RuleSet {
        &self.community
    }

    /// Merge the planner's rules with the entities' declared rules.
    pub fn merged(&self, entities: &[ModEntity]) -> MergedRules {
        merge(&self.manual, &self.community, &RuleSet::from_entities(entities))
    }

    /// Compute a total order of the active entities plus its issues.
    ///
    /// `reference` is the prior order used to break ties; mods it does not
    /// list are placed after the listed ones in snapshot order.
    pub fn plan(&self, entities: &[ModEntity], reference: &[PackageId]) -> Result<OrderResult, PlanError> {
        let rules = self.merged(entities);
        plan_with_rules(entities, &rules, reference)
    }

    /// Classify an existing order without resorting it.
    ///
    /// Entries that are not active mods are ignored; active mods the order
    /// omits are appended in snapshot order so the result still covers the
    /// whole active set.
    pub fn audit(&self, entities: &[ModEntity], current: &[PackageId]) -> Result<OrderResult, PlanError> {
        let rules = self.merged(entities);
        let graph = ConstraintGraph::build(entities, &rules)?;

        let mut seen = BTreeSet::new();
        let mut order: Vec<PackageId> = Vec::with_capacity(graph.node_count());
        for id in current {
            if graph.contains(id) && seen.insert(id) {
                order.push(id.clone());
            }
        }
        let listed = order.len();
        for id in graph.nodes() {
            if seen.insert(id) {
                order.push(id.clone());
            }
        }
        if order.len() > listed {
            tracing::info!(appended = order.len() - listed, "Audited order omitted active mods");
        }

        let Classification { issues, relations } =
            classify(&graph, &order, graph.requires(), graph.incompatible(), &[]);
        Ok(OrderResult::new(order, issues, relations))
    }
}

/// Plan against an already merged rule set.
pub fn plan_with_rules(
    entities: &[ModEntity],
    rules: &MergedRules,
    reference: &[PackageId],
) -> Result<OrderResult, PlanError> {
    let graph = ConstraintGraph::build(entities, rules)?;
    let outcome = sort(&graph, reference);
    let Classification { issues, relations } = classify(
        &graph,
        &outcome.order,
        graph.requires(),
        graph.incompatible(),
        &outcome.cycles,
    );

    tracing::info!(
        mods = outcome.order.len(),
        edges = graph.edge_count(),
        cycles = outcome.cycles.len(),
        issues = issues.len(),
        "Planned load order"
    );

    Ok(OrderResult::new(outcome.order, issues, relations))
}

fn retag(set: RuleSet, source: RuleSource) -> RuleSet {
    if set.source == source {
        return set;
    }
    let mut out = RuleSet::new(source);
    for relation in set.relations {
        out.insert(relation);
    }
    out.pins = set.pins;
    out
}
