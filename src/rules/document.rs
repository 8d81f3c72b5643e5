//! Rule documents and rule sets.
//!
//! The remote community database and the user's manual overrides share one
//! JSON shape:
//!
//! ```text
//! {
//!   "timestamp": 1700000000,
//!   "rules": {
//!     "<packageId>": {
//!       "loadBefore": ["<id>", ...] | {"<id>": {...}, ...},
//!       "loadAfter": ...,
//!       "incompatibleWith": ...,
//!       "requires": ...,
//!       "loadTop": true | {"value": true},
//!       "loadBottom": true | {"value": true}
//!     }
//!   }
//! }
//! ```
//!
//! Id lists may be arrays or objects keyed by id (the community database
//! stores per-target comments as values). Structural failures are
//! `MalformedRuleData`; a single bad entry is skipped with a warning so one
//! typo upstream does not discard the whole database.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

use crate::types::{ModEntity, PackageId, Pin, Relation, RelationKind, RuleSource};
use super::RuleCacheError;

/// Sorting rules for a single mod.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ModRule {
    /// Mods this one must precede.
    pub load_before: BTreeSet<PackageId>,
    /// Mods this one must follow.
    pub load_after: BTreeSet<PackageId>,
    /// Mods this one cannot run alongside.
    pub incompatible_with: BTreeSet<PackageId>,
    /// Hard dependencies.
    pub requires: BTreeSet<PackageId>,
    /// Placement hint.
    pub pin: Pin,
}

impl ModRule {
    /// Whether the rule carries no constraint at all.
    pub fn is_empty(&self) -> bool {
        self.load_before.is_empty()
            && self.load_after.is_empty()
            && self.incompatible_with.is_empty()
            && self.requires.is_empty()
            && self.pin == Pin::None
    }

    fn targets(&self, kind: RelationKind) -> &BTreeSet<PackageId> {
        match kind {
            RelationKind::Requires => &self.requires,
            RelationKind::LoadBefore => &self.load_before,
            RelationKind::LoadAfter => &self.load_after,
            RelationKind::IncompatibleWith => &self.incompatible_with,
        }
    }

    fn targets_mut(&mut self, kind: RelationKind) -> &mut BTreeSet<PackageId> {
        match kind {
            RelationKind::Requires => &mut self.requires,
            RelationKind::LoadBefore => &mut self.load_before,
            RelationKind::LoadAfter => &mut self.load_after,
            RelationKind::IncompatibleWith => &mut self.incompatible_with,
        }
    }
}

/// A parsed rule document, keyed by canonical package id.
///
/// Deserializing a stored document drops self-references and empty rules,
/// the same way [`parse`](Self::parse) does for fetched bytes.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "StoredDocument")]
pub struct RuleDocument {
    /// Upstream timestamp of the document, when it carries one.
    #[serde(default)]
    pub timestamp: Option<i64>,
    /// Rules by mod.
    #[serde(default)]
    pub rules: BTreeMap<PackageId, ModRule>,
}

/// Serde shape of a persisted document, before validation.
#[derive(Deserialize)]
struct StoredDocument {
    #[serde(default)]
    timestamp: Option<i64>,
    #[serde(default)]
    rules: BTreeMap<PackageId, ModRule>,
}

impl From<StoredDocument> for RuleDocument {
    fn from(stored: StoredDocument) -> Self {
        let mut rules = stored.rules;
        for (subject, rule) in rules.iter_mut() {
            for (kind, _) in KIND_FIELDS {
                if rule.targets_mut(kind).remove(subject) {
                    tracing::warn!(package_id = %subject, kind = %kind, "Dropping self-referential stored rule");
                }
            }
        }
        rules.retain(|_, rule| !rule.is_empty());
        Self { timestamp: stored.timestamp, rules }
    }
}

const KIND_FIELDS: [(RelationKind, &str); 4] = [
    (RelationKind::LoadBefore, "loadBefore"),
    (RelationKind::LoadAfter, "loadAfter"),
    (RelationKind::IncompatibleWith, "incompatibleWith"),
    (RelationKind::Requires, "requires"),
];

impl RuleDocument {
    /// Create an empty document.
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a raw rule document.
    ///
    /// Fails with `MalformedRuleData` when the bytes are not JSON or the
    /// top level is not an object with a `rules` object.
    pub fn parse(bytes: &[u8]) -> Result<Self, RuleCacheError> {
        let root: Value = serde_json::from_slice(bytes)
            .map_err(|e| RuleCacheError::MalformedRuleData(e.to_string()))?;
        let root = root
            .as_object()
            .ok_or_else(|| RuleCacheError::MalformedRuleData("top level is not an object".into()))?;
        let rules = root
            .get("rules")
            .and_then(Value::as_object)
            .ok_or_else(|| RuleCacheError::MalformedRuleData("missing \"rules\" object".into()))?;

        let timestamp = root.get("timestamp").and_then(Value::as_i64);
        let mut doc = Self { timestamp, rules: BTreeMap::new() };

        for (raw_id, raw_rule) in rules {
            let subject = match PackageId::parse(raw_id) {
                Ok(id) => id,
                Err(e) => {
                    tracing::warn!(package_id = %raw_id, error = %e, "Skipping rule with invalid package id");
                    continue;
                }
            };
            let Some(fields) = raw_rule.as_object() else {
                tracing::warn!(package_id = %subject, "Skipping rule that is not an object");
                continue;
            };

            let rule = doc.rules.entry(subject.clone()).or_default();
            for (kind, field) in KIND_FIELDS {
                for raw_target in id_list(fields.get(field)) {
                    match PackageId::parse(&raw_target) {
                        Ok(target) if target == subject => {
                            tracing::warn!(package_id = %subject, kind = %kind, "Skipping self-referential rule");
                        }
                        Ok(target) => {
                            rule.targets_mut(kind).insert(target);
                        }
                        Err(e) => {
                            tracing::warn!(package_id = %subject, target = %raw_target, error = %e, "Skipping invalid rule target");
                        }
                    }
                }
            }

            if flag(fields.get("loadTop")) {
                rule.pin = Pin::Top;
            } else if flag(fields.get("loadBottom")) {
                rule.pin = Pin::Bottom;
            }
        }

        doc.rules.retain(|_, rule| !rule.is_empty());
        Ok(doc)
    }

    /// Look up the rule for a mod.
    pub fn rule_for(&self, id: &PackageId) -> Option<&ModRule> {
        self.rules.get(id)
    }

    /// Number of mods with rules.
    pub fn len(&self) -> usize {
        self.rules.len()
    }

    /// Whether the document has no rules.
    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Flatten into a rule set tagged with `source`.
    pub fn to_rule_set(&self, source: RuleSource) -> RuleSet {
        let mut set = RuleSet::new(source);
        for (subject, rule) in &self.rules {
            for (kind, _) in KIND_FIELDS {
                for object in rule.targets(kind) {
                    match Relation::new(subject.clone(), kind, object.clone(), source) {
                        Ok(relation) => {
                            set.relations.insert(relation);
                        }
                        Err(e) => tracing::warn!(error = %e, "Skipping invalid rule"),
                    }
                }
            }
            if rule.pin != Pin::None {
                set.pins.insert(subject.clone(), rule.pin);
            }
        }
        set
    }
}

/// Interpret an id list that may be an array or an object keyed by id.
fn id_list(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        Some(Value::Object(map)) => map.keys().cloned().collect(),
        Some(Value::String(single)) => vec![single.clone()],
        _ => Vec::new(),
    }
}

/// Interpret `true` or `{"value": true}`.
fn flag(value: Option<&Value>) -> bool {
    match value {
        Some(Value::Bool(b)) => *b,
        Some(Value::Object(map)) => map.get("value").and_then(Value::as_bool).unwrap_or(false),
        _ => false,
    }
}

/// Relations and pins from a single source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RuleSet {
    /// Source every relation in the set carries.
    pub source: RuleSource,
    /// Relations, canonically ordered.
    pub relations: BTreeSet<Relation>,
    /// Placement pins by mod.
    pub pins: BTreeMap<PackageId, Pin>,
}

impl RuleSet {
    /// Create an empty set for a source.
    pub fn new(source: RuleSource) -> Self {
        Self {
            source,
            relations: BTreeSet::new(),
            pins: BTreeMap::new(),
        }
    }

    /// Collect the self-declared relations of every entity, active or not.
    pub fn from_entities<'a>(entities: impl IntoIterator<Item = &'a ModEntity>) -> Self {
        let mut set = Self::new(RuleSource::Declared);
        for entity in entities {
            set.relations.extend(entity.declared_relations());
        }
        set
    }

    /// Add a relation; its source is overwritten with the set's source.
    ///
    /// A self-referential relation is skipped and `false` returned.
    pub fn insert(&mut self, mut relation: Relation) -> bool {
        if relation.subject == relation.object {
            tracing::warn!(package_id = %relation.subject, kind = %relation.kind, "Skipping self-referential rule");
            return false;
        }
        relation.source = self.source;
        self.relations.insert(relation)
    }

    /// Add a relation by parts.
    pub fn add(
        &mut self,
        subject: PackageId,
        kind: RelationKind,
        object: PackageId,
    ) -> Result<(), crate::types::ValidationError> {
        let relation = Relation::new(subject, kind, object, self.source)?;
        self.relations.insert(relation);
        Ok(())
    }

    /// Set a placement pin.
    pub fn pin(&mut self, id: PackageId, pin: Pin) {
        self.pins.insert(id, pin);
    }

    /// Number of relations.
    pub fn len(&self) -> usize {
        self.relations.len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.relations.is_empty() && self.pins.is_empty()
    }
}
