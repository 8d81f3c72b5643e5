//! Constraint graph over the active mod set.
//!
//! Nodes are stored in an indexed `Vec` and referenced by index; edges refer
//! to node indices, never to each other, so mutually-referencing mods do not
//! create ownership cycles.
//!
//! ## Contents
//!
//! - nodes: exactly the active entities, in snapshot order
//! - edges: ordering rules whose endpoints are both active, one per ordered pair
//! - side tables: `requires` (with the target's status) and `incompatibleWith`,
//!   which do not constrain order on their own

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::rules::MergedRules;
use crate::types::{ModEntity, OrderingRule, PackageId, Pin, Relation, RuleSource};

/// Error type for graph construction.
///
/// Only true input malformation ends up here; contradictory constraints never do.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum GraphError {
    /// Two entities canonicalize to the same identifier.
    #[error("Duplicate entity in snapshot: {0}")]
    DuplicateEntity(PackageId),
}

/// State of a `requires` target relative to the snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequirementStatus {
    /// Target is installed and active.
    Satisfied,
    /// Target is installed but disabled.
    Inactive,
    /// Target is not in the snapshot at all.
    NotInstalled,
}

/// A `requires` relation from an active mod, with its target's status.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Requirement {
    /// Active mod with the dependency.
    pub subject: PackageId,
    /// Required mod.
    pub object: PackageId,
    /// Winning rule source.
    pub source: RuleSource,
    /// Whether the dependency is met.
    pub status: RequirementStatus,
}

impl Requirement {
    /// Whether this requirement is a missing-dependency candidate.
    pub fn is_missing(&self) -> bool {
        self.status != RequirementStatus::Satisfied
    }
}

/// Directed constraint graph of active mods.
#[derive(Debug, Clone)]
pub struct ConstraintGraph {
    nodes: Vec<PackageId>,
    index: BTreeMap<PackageId, usize>,
    pins: Vec<Pin>,
    edges: Vec<OrderingRule>,
    /// `(before, after)` node indices, aligned with `edges`.
    endpoints: Vec<(usize, usize)>,
    /// Outgoing edge indices per node.
    successors: Vec<Vec<usize>>,
    requires: Vec<Requirement>,
    incompatible: Vec<Relation>,
    installed: BTreeSet<PackageId>,
}

impl ConstraintGraph {
    /// Assemble the graph from a snapshot and merged rules.
    ///
    /// `entities` is the whole snapshot; inactive entries only serve to tell
    /// "disabled" from "not installed". Ordering rules touching an inactive
    /// or unknown mod are dropped, since such a mod cannot take part in the order.
    pub fn build(entities: &[ModEntity], rules: &MergedRules) -> Result<Self, GraphError> {
        let mut installed = BTreeSet::new();
        let mut nodes = Vec::new();
        let mut index = BTreeMap::new();

        for entity in entities {
            if !installed.insert(entity.package_id.clone()) {
                return Err(GraphError::DuplicateEntity(entity.package_id.clone()));
            }
            if entity.active {
                index.insert(entity.package_id.clone(), nodes.len());
                nodes.push(entity.package_id.clone());
            }
        }

        let pins = nodes.iter().map(|id| rules.pin_of(id)).collect();

        // One edge per ordered pair, highest source wins.
        let mut unique: BTreeMap<(usize, usize), OrderingRule> = BTreeMap::new();
        let mut skipped = 0usize;
        for rule in &rules.ordering {
            if rule.before == rule.after {
                tracing::warn!(package_id = %rule.before, source = %rule.source, "Ignoring self-referential ordering rule");
                skipped += 1;
                continue;
            }
            match (index.get(&rule.before), index.get(&rule.after)) {
                (Some(&b), Some(&a)) => {
                    let slot = unique.entry((b, a)).or_insert_with(|| rule.clone());
                    if rule.source > slot.source {
                        *slot = rule.clone();
                    }
                }
                _ => skipped += 1,
            }
        }

        let mut successors = vec![Vec::new(); nodes.len()];
        let mut edges = Vec::with_capacity(unique.len());
        let mut endpoints = Vec::with_capacity(unique.len());
        let mut sorted: Vec<_> = unique.into_iter().collect();
        sorted.sort_by(|a, b| a.1.cmp(&b.1));
        for ((b, a), rule) in sorted {
            successors[b].push(edges.len());
            endpoints.push((b, a));
            edges.push(rule);
        }

        let requires = rules
            .requires
            .iter()
            .filter(|r| r.subject != r.object && index.contains_key(&r.subject))
            .map(|r| Requirement {
                subject: r.subject.clone(),
                object: r.object.clone(),
                source: r.source,
                status: if index.contains_key(&r.object) {
                    RequirementStatus::Satisfied
                } else if installed.contains(&r.object) {
                    RequirementStatus::Inactive
                } else {
                    RequirementStatus::NotInstalled
                },
            })
            .collect();

        let incompatible = rules
            .incompatible
            .iter()
            .filter(|r| r.subject != r.object)
            .filter(|r| index.contains_key(&r.subject) || index.contains_key(&r.object))
            .cloned()
            .collect();

        tracing::debug!(
            nodes = nodes.len(),
            edges = edges.len(),
            skipped_ordering = skipped,
            "Built constraint graph"
        );

        Ok(Self {
            nodes,
            index,
            pins,
            edges,
            endpoints,
            successors,
            requires,
            incompatible,
            installed,
        })
    }

    /// Active mods in snapshot order.
    pub fn nodes(&self) -> &[PackageId] {
        &self.nodes
    }

    /// Number of active mods.
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Number of ordering edges.
    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    /// Index of an active mod.
    pub fn index_of(&self, id: &PackageId) -> Option<usize> {
        self.index.get(id).copied()
    }

    /// Whether a mod is an active node.
    pub fn contains(&self, id: &PackageId) -> bool {
        self.index.contains_key(id)
    }

    /// Whether a mod is in the snapshot, active or not.
    pub fn is_installed(&self, id: &PackageId) -> bool {
        self.installed.contains(id)
    }

    /// Identifier of a node.
    pub fn node(&self, idx: usize) -> &PackageId {
        &self.nodes[idx]
    }

    /// Placement pin of a node.
    pub fn pin(&self, idx: usize) -> Pin {
        self.pins[idx]
    }

    /// All ordering edges, canonically ordered.
    pub fn edges(&self) -> &[OrderingRule] {
        &self.edges
    }

    /// Edge by index.
    pub fn edge(&self, edge: usize) -> &OrderingRule {
        &self.edges[edge]
    }

    /// `(before, after)` node indices of an edge.
    pub fn endpoints(&self, edge: usize) -> (usize, usize) {
        self.endpoints[edge]
    }

    /// Outgoing edge indices of a node.
    pub fn successors(&self, idx: usize) -> &[usize] {
        &self.successors[idx]
    }

    /// `requires` side table, active subjects only.
    pub fn requires(&self) -> &[Requirement] {
        &self.requires
    }

    /// `incompatibleWith` side table, pairs touching at least one active mod.
    pub fn incompatible(&self) -> &[Relation] {
        &self.incompatible
    }
}
