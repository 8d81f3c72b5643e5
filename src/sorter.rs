//! Deterministic topological sorter.
//!
//! ## Algorithm
//!
//! 1. Kahn's algorithm over the active edges. Among nodes with in-degree zero,
//!    pick the smallest `(pin, reference position, node index)`: pinned-top
//!    mods first, pinned-bottom last, otherwise the prior order is kept.
//! 2. If elimination stalls, compute the strongly connected components of the
//!    unplaced remainder (iterative Tarjan). A component is cyclic when it
//!    has an internal edge, which includes a single mod with a self-loop.
//! 3. In every cyclic component drop the lowest-authority droppable edge,
//!    ties broken by the smallest `(before, after)` pair.
//! 4. A cyclic component with only `manual` edges left has all its internal
//!    edges ignored; its members then fall back to reference order among
//!    themselves while edges leaving the component stay in force.
//! 5. Run again until every node is placed.
//!
//! Which edges get dropped depends only on the graph, never on the reference
//! order, so sorting the output again yields the same order.
//!
//! Every pass is `O((V + E) log V)` and deactivates at least one edge, so the
//! number of passes is bounded by the number of edges.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BinaryHeap};

use crate::graph::ConstraintGraph;
use crate::types::{Issue, IssueKind, OrderingRule, PackageId, Pin, RuleSource};

/// How a cycle was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CycleResolution {
    /// A droppable edge was removed.
    Dropped,
    /// Only manual edges were left; all of them were ignored.
    Ignored,
}

/// A cycle the sorter had to override.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleReport {
    /// Every mod of the strongly connected component, sorted.
    pub members: Vec<PackageId>,
    /// Edges that were dropped or ignored.
    pub edges: Vec<OrderingRule>,
    /// Resolution applied.
    pub resolution: CycleResolution,
}

impl CycleReport {
    /// Convert to a `Cycle` issue naming every member.
    pub fn to_issue(&self) -> Issue {
        let members = join(&self.members);
        let rules = self
            .edges
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ");
        let (source, message) = match self.resolution {
            CycleResolution::Dropped => (
                self.edges.first().map(|e| e.source),
                format!("Load order cycle among {members}; dropped rule {rules}"),
            ),
            CycleResolution::Ignored => (
                Some(RuleSource::Manual),
                format!("Unresolvable load order cycle among {members}; ignored rules {rules}"),
            ),
        };
        Issue::new(IssueKind::Cycle, self.members.clone(), source, message)
    }
}

fn join(ids: &[PackageId]) -> String {
    ids.iter().map(PackageId::as_str).collect::<Vec<_>>().join(", ")
}

/// Output of a sort: a total order plus every cycle that was overridden.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortOutcome {
    /// Every active mod exactly once.
    pub order: Vec<PackageId>,
    /// Cycles in the order they were broken.
    pub cycles: Vec<CycleReport>,
}

/// Sort the graph, preferring `reference` order where constraints allow.
///
/// Mods missing from `reference` rank after every referenced mod, in graph
/// (snapshot) order. Never fails and always covers every node.
pub fn sort(graph: &ConstraintGraph, reference: &[PackageId]) -> SortOutcome {
    let rank = reference_ranks(graph, reference);
    let mut active = vec![true; graph.edge_count()];
    let mut cycles = Vec::new();

    loop {
        let (order, placed) = kahn(graph, &active, &rank);
        if order.len() == graph.node_count() {
            return SortOutcome {
                order: order.into_iter().map(|i| graph.node(i).clone()).collect(),
                cycles,
            };
        }

        let remaining: Vec<bool> = placed.iter().map(|p| !p).collect();
        for component in strongly_connected(graph, &active, &remaining) {
            let inside = internal_edges(graph, &active, &component);
            if inside.is_empty() {
                continue;
            }

            let candidate = inside
                .iter()
                .copied()
                .filter(|&e| graph.edge(e).source.is_droppable())
                .min_by(|&x, &y| {
                    let (ex, ey) = (graph.edge(x), graph.edge(y));
                    (ex.source, &ex.before, &ex.after).cmp(&(ey.source, &ey.before, &ey.after))
                });

            match candidate {
                Some(e) => {
                    active[e] = false;
                    tracing::debug!(rule = %graph.edge(e), members = component.len(), "Dropped edge to break cycle");
                    cycles.push(CycleReport {
                        members: member_ids(graph, &component),
                        edges: vec![graph.edge(e).clone()],
                        resolution: CycleResolution::Dropped,
                    });
                }
                None => {
                    for &e in &inside {
                        active[e] = false;
                    }
                    let members = member_ids(graph, &component);
                    tracing::warn!(
                        members = %join(&members),
                        ignored = inside.len(),
                        "Cycle of manual rules cannot be broken; ignoring its rules"
                    );
                    cycles.push(CycleReport {
                        members,
                        edges: inside.iter().map(|&e| graph.edge(e).clone()).collect(),
                        resolution: CycleResolution::Ignored,
                    });
                }
            }
        }
    }
}

/// Position of each node in the reference order; unreferenced nodes go last.
fn reference_ranks(graph: &ConstraintGraph, reference: &[PackageId]) -> Vec<usize> {
    let mut first_seen: BTreeMap<&PackageId, usize> = BTreeMap::new();
    for (pos, id) in reference.iter().enumerate() {
        first_seen.entry(id).or_insert(pos);
    }
    graph
        .nodes()
        .iter()
        .enumerate()
        .map(|(i, id)| first_seen.get(id).copied().unwrap_or(reference.len() + i))
        .collect()
}

/// Kahn's algorithm with a deterministic min-heap tie-break.
///
/// Returns the placed node indices in order and a placed-mask.
fn kahn(graph: &ConstraintGraph, active: &[bool], rank: &[usize]) -> (Vec<usize>, Vec<bool>) {
    let n = graph.node_count();
    let mut in_degree = vec![0usize; n];
    for e in (0..graph.edge_count()).filter(|&e| active[e]) {
        in_degree[graph.endpoints(e).1] += 1;
    }

    let key = |i: usize| -> Reverse<(Pin, usize, usize)> { Reverse((graph.pin(i), rank[i], i)) };
    let mut ready: BinaryHeap<_> = (0..n).filter(|&i| in_degree[i] == 0).map(key).collect();
    let mut order = Vec::with_capacity(n);
    let mut placed = vec![false; n];

    while let Some(Reverse((_, _, v))) = ready.pop() {
        order.push(v);
        placed[v] = true;
        for &e in graph.successors(v) {
            if !active[e] {
                continue;
            }
            let w = graph.endpoints(e).1;
            in_degree[w] -= 1;
            if in_degree[w] == 0 {
                ready.push(key(w));
            }
        }
    }

    (order, placed)
}

/// Iterative Tarjan SCC restricted to nodes in `within` and `active` edges.
fn strongly_connected(graph: &ConstraintGraph, active: &[bool], within: &[bool]) -> Vec<Vec<usize>> {
    const UNVISITED: usize = usize::MAX;
    let n = graph.node_count();
    let mut index = vec![UNVISITED; n];
    let mut low = vec![0usize; n];
    let mut on_stack = vec![false; n];
    let mut stack: Vec<usize> = Vec::new();
    let mut next = 0usize;
    let mut components = Vec::new();

    for root in 0..n {
        if !within[root] || index[root] != UNVISITED {
            continue;
        }
        index[root] = next;
        low[root] = next;
        next += 1;
        stack.push(root);
        on_stack[root] = true;
        let mut call: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some(frame) = call.last_mut() {
            let v = frame.0;
            let succ = graph.successors(v);
            if frame.1 < succ.len() {
                let e = succ[frame.1];
                frame.1 += 1;
                if !active[e] {
                    continue;
                }
                let w = graph.endpoints(e).1;
                if !within[w] {
                    continue;
                }
                if index[w] == UNVISITED {
                    index[w] = next;
                    low[w] = next;
                    next += 1;
                    stack.push(w);
                    on_stack[w] = true;
                    call.push((w, 0));
                } else if on_stack[w] {
                    low[v] = low[v].min(index[w]);
                }
            } else {
                call.pop();
                if let Some(&(parent, _)) = call.last() {
                    low[parent] = low[parent].min(low[v]);
                }
                if low[v] == index[v] {
                    let mut component = Vec::new();
                    while let Some(w) = stack.pop() {
                        on_stack[w] = false;
                        component.push(w);
                        if w == v {
                            break;
                        }
                    }
                    component.sort_unstable();
                    components.push(component);
                }
            }
        }
    }

    components
}

/// Active edges with both endpoints in `component`.
fn internal_edges(graph: &ConstraintGraph, active: &[bool], component: &[usize]) -> Vec<usize> {
    let mut edges = Vec::new();
    for &v in component {
        for &e in graph.successors(v) {
            if active[e] && component.binary_search(&graph.endpoints(e).1).is_ok() {
                edges.push(e);
            }
        }
    }
    edges.sort_unstable();
    edges
}

fn member_ids(graph: &ConstraintGraph, component: &[usize]) -> Vec<PackageId> {
    let mut ids: Vec<PackageId> = component.iter().map(|&i| graph.node(i).clone()).collect();
    ids.sort();
    ids
}
