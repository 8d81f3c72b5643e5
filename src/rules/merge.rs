//! Authority-ranked merge of manual, community and declared rules.
//!
//! ## Resolution
//!
//! Ordering candidates are grouped by their unordered endpoint pair. Within a
//! pair the highest-authority source present decides the direction:
//!
//! - one direction at the top source: that rule wins, lower-source rules in the
//!   opposite direction are recorded as overridden
//! - both directions at the top source: a tie. Both rules are kept so the
//!   sorter surfaces the contradiction as a cycle, and the tie is recorded in
//!   `conflicts`
//!
//! `requires` and `incompatibleWith` never conflict on direction; duplicates
//! collapse to the highest source.
//!
//! ## Determinism
//!
//! Candidates are sorted by `(pair, source rank desc, before, after)` before
//! resolution and every output collection is a `BTreeSet`/`BTreeMap`, so the
//! serialized result is byte-identical for identical inputs regardless of the
//! order they were collected in.

use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use crate::fingerprint::fingerprint;
use crate::types::{canonical_pair, OrderingRule, PackageId, Pin, Relation, RelationKind, RuleSource};
use super::document::RuleSet;

/// Two rules of equal authority that disagree on direction.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct RuleConflict {
    /// Smaller id of the pair.
    pub first: PackageId,
    /// Larger id of the pair.
    pub second: PackageId,
    /// Source both contradicting rules came from.
    pub source: RuleSource,
}

/// A placement pin with the source that set it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRule {
    /// The pin.
    pub pin: Pin,
    /// Winning source.
    pub source: RuleSource,
}

/// Unified relation set after authority resolution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergedRules {
    /// Ordering rules in normalized `before -> after` form.
    pub ordering: BTreeSet<OrderingRule>,
    /// `requires` relations, subject needs object.
    pub requires: BTreeSet<Relation>,
    /// `incompatibleWith` relations, stored with `subject < object`.
    pub incompatible: BTreeSet<Relation>,
    /// Placement pins.
    pub pins: BTreeMap<PackageId, PinRule>,
    /// Same-source direction ties that were kept unresolved.
    pub conflicts: BTreeSet<RuleConflict>,
    /// Lower-authority ordering rules that lost to the opposite direction.
    pub overridden: BTreeSet<OrderingRule>,
}

impl MergedRules {
    /// Deterministic fingerprint of the merged set.
    pub fn fingerprint(&self) -> String {
        fingerprint(self)
    }

    /// Pin for a mod, `Pin::None` when unset.
    pub fn pin_of(&self, id: &PackageId) -> Pin {
        self.pins.get(id).map(|p| p.pin).unwrap_or_default()
    }

    /// Total number of resolved relations.
    pub fn len(&self) -> usize {
        self.ordering.len() + self.requires.len() + self.incompatible.len()
    }

    /// Whether nothing survived the merge.
    pub fn is_empty(&self) -> bool {
        self.len() == 0 && self.pins.is_empty()
    }
}

/// Merge three rule sets by authority: manual > community > declared.
pub fn merge(manual: &RuleSet, community: &RuleSet, declared: &RuleSet) -> MergedRules {
    let mut merged = MergedRules::default();

    let all = || {
        manual
            .relations
            .iter()
            .chain(community.relations.iter())
            .chain(declared.relations.iter())
    };

    resolve_ordering(all().filter_map(Relation::as_ordering), &mut merged);

    let mut requires: BTreeMap<(PackageId, PackageId), RuleSource> = BTreeMap::new();
    let mut incompatible: BTreeMap<(PackageId, PackageId), RuleSource> = BTreeMap::new();
    for rel in all() {
        let (table, key) = match rel.kind {
            RelationKind::Requires => (&mut requires, (rel.subject.clone(), rel.object.clone())),
            RelationKind::IncompatibleWith => (&mut incompatible, rel.canonical_pair()),
            _ => continue,
        };
        let slot = table.entry(key).or_insert(rel.source);
        *slot = (*slot).max(rel.source);
    }
    merged.requires = requires
        .into_iter()
        .map(|((subject, object), source)| Relation {
            subject,
            kind: RelationKind::Requires,
            object,
            source,
        })
        .collect();
    merged.incompatible = incompatible
        .into_iter()
        .map(|((subject, object), source)| Relation {
            subject,
            kind: RelationKind::IncompatibleWith,
            object,
            source,
        })
        .collect();

    // Higher sources first so the first pin seen for an id wins.
    for set in [manual, community, declared] {
        for (id, pin) in &set.pins {
            merged
                .pins
                .entry(id.clone())
                .or_insert(PinRule { pin: *pin, source: set.source });
        }
    }

    tracing::debug!(
        ordering = merged.ordering.len(),
        requires = merged.requires.len(),
        incompatible = merged.incompatible.len(),
        conflicts = merged.conflicts.len(),
        overridden = merged.overridden.len(),
        "Merged rule sets"
    );

    merged
}

fn resolve_ordering(candidates: impl Iterator<Item = OrderingRule>, merged: &mut MergedRules) {
    let mut candidates: Vec<OrderingRule> = candidates.collect::<BTreeSet<_>>().into_iter().collect();
    candidates.sort_by(|a, b| {
        a.pair()
            .cmp(&b.pair())
            .then_with(|| Reverse(a.source).cmp(&Reverse(b.source)))
            .then_with(|| (&a.before, &a.after).cmp(&(&b.before, &b.after)))
    });

    for group in candidates.chunk_by(|a, b| a.pair() == b.pair()) {
        let top = group[0].source;
        let winners: BTreeSet<(&PackageId, &PackageId)> = group
            .iter()
            .filter(|r| r.source == top)
            .map(|r| (&r.before, &r.after))
            .collect();

        if winners.len() > 1 {
            let (first, second) = canonical_pair(&group[0].before, &group[0].after);
            tracing::warn!(
                first = %first,
                second = %second,
                source = %top,
                "Equal-authority rules disagree on load direction"
            );
            merged.conflicts.insert(RuleConflict { first, second, source: top });
        }

        for rule in group {
            let direction = (&rule.before, &rule.after);
            if rule.source == top {
                merged.ordering.insert(rule.clone());
            } else if !winners.contains(&direction) {
                merged.overridden.insert(rule.clone());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id(s: &str) -> PackageId {
        PackageId::parse(s).unwrap()
    }

    fn set(source: RuleSource, rels: &[(&str, RelationKind, &str)]) -> RuleSet {
        let mut s = RuleSet::new(source);
        for (a, kind, b) in rels {
            s.add(id(a), *kind, id(b)).unwrap();
        }
        s
    }

    #[test]
    fn test_manual_beats_community_in_opposite_direction() {
        let manual = set(RuleSource::Manual, &[("a", RelationKind::LoadAfter, "b")]);
        let community = set(RuleSource::Community, &[("a", RelationKind::LoadBefore, "b")]);
        let declared = RuleSet::new(RuleSource::Declared);

        let merged = merge(&manual, &community, &declared);
        assert_eq!(merged.ordering.len(), 1);
        let rule = merged.ordering.iter().next().unwrap();
        assert_eq!((&rule.before, &rule.after), (&id("b"), &id("a")));
        assert_eq!(rule.source, RuleSource::Manual);
        assert_eq!(merged.overridden.len(), 1);
        assert!(merged.conflicts.is_empty());
    }

    #[test]
    fn test_same_direction_collapses_to_highest_source() {
        let community = set(RuleSource::Community, &[("a", RelationKind::LoadBefore, "b")]);
        let declared = set(RuleSource::Declared, &[("b", RelationKind::LoadAfter, "a")]);
        let merged = merge(&RuleSet::new(RuleSource::Manual), &community, &declared);
        assert_eq!(merged.ordering.len(), 1);
        assert_eq!(merged.ordering.iter().next().unwrap().source, RuleSource::Community);
        assert!(merged.overridden.is_empty());
    }

    #[test]
    fn test_same_source_tie_is_reported_and_kept() {
        let declared = set(
            RuleSource::Declared,
            &[("a", RelationKind::LoadBefore, "b"), ("b", RelationKind::LoadBefore, "a")],
        );
        let merged = merge(&RuleSet::new(RuleSource::Manual), &RuleSet::new(RuleSource::Community), &declared);
        assert_eq!(merged.ordering.len(), 2);
        assert_eq!(merged.conflicts.len(), 1);
        let conflict = merged.conflicts.iter().next().unwrap();
        assert_eq!((&conflict.first, &conflict.second), (&id("a"), &id("b")));
    }

    #[test]
    fn test_incompatible_is_symmetric_and_deduplicated() {
        let community = set(RuleSource::Community, &[("b", RelationKind::IncompatibleWith, "a")]);
        let declared = set(RuleSource::Declared, &[("a", RelationKind::IncompatibleWith, "b")]);
        let merged = merge(&RuleSet::new(RuleSource::Manual), &community, &declared);
        assert_eq!(merged.incompatible.len(), 1);
        let rel = merged.incompatible.iter().next().unwrap();
        assert_eq!(rel.subject, id("a"));
        assert_eq!(rel.source, RuleSource::Community);
    }

    #[test]
    fn test_pins_follow_authority() {
        let mut manual = RuleSet::new(RuleSource::Manual);
        manual.pin(id("a"), Pin::Bottom);
        let mut community = RuleSet::new(RuleSource::Community);
        community.pin(id("a"), Pin::Top);
        community.pin(id("b"), Pin::Top);
        let merged = merge(&manual, &community, &RuleSet::new(RuleSource::Declared));
        assert_eq!(merged.pin_of(&id("a")), Pin::Bottom);
        assert_eq!(merged.pin_of(&id("b")), Pin::Top);
        assert_eq!(merged.pin_of(&id("c")), Pin::None);
    }

    #[test]
    fn test_merge_is_byte_identical_across_input_order() {
        let rels = [
            ("c", RelationKind::LoadAfter, "a"),
            ("a", RelationKind::LoadBefore, "b"),
            ("b", RelationKind::Requires, "a"),
            ("b", RelationKind::LoadBefore, "a"),
        ];
        let mut reversed = rels;
        reversed.reverse();

        let m1 = merge(
            &RuleSet::new(RuleSource::Manual),
            &set(RuleSource::Community, &rels),
            &RuleSet::new(RuleSource::Declared),
        );
        let m2 = merge(
            &RuleSet::new(RuleSource::Manual),
            &set(RuleSource::Community, &reversed),
            &RuleSet::new(RuleSource::Declared),
        );
        assert_eq!(serde_json::to_vec(&m1).unwrap(), serde_json::to_vec(&m2).unwrap());
        assert_eq!(m1.fingerprint(), m2.fingerprint());
    }
}
