//! Mod entities as supplied by the discovery layer.

use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::fmt;

use super::package_id::{PackageId, ValidationError};
use super::relation::{Relation, RelationKind, RuleSource};

/// Where a mod was installed from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceTag {
    /// Steam workshop subscription.
    Workshop,
    /// Local mods folder.
    Local,
    /// Official expansion (DLC) or the core game.
    Expansion,
}

impl SourceTag {
    /// Parse source tag from string.
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "workshop" | "steam" => Some(Self::Workshop),
            "local" => Some(Self::Local),
            "expansion" | "dlc" | "core" => Some(Self::Expansion),
            _ => None,
        }
    }
}

impl Default for SourceTag {
    fn default() -> Self {
        Self::Local
    }
}

impl fmt::Display for SourceTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Workshop => write!(f, "workshop"),
            Self::Local => write!(f, "local"),
            Self::Expansion => write!(f, "expansion"),
        }
    }
}

/// Raw entity record from a scan snapshot, before validation.
///
/// This is the wire shape the discovery collaborator produces.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EntityDescriptor {
    /// Raw `packageId`.
    pub package_id: String,
    /// Display name.
    pub name: String,
    /// Install source.
    pub source: SourceTag,
    /// Display-only category.
    pub category: Option<String>,
    /// Whether the mod is enabled.
    pub active: bool,
    /// Hard dependencies.
    pub requires: Vec<String>,
    /// Mods this one must precede.
    pub load_before: Vec<String>,
    /// Mods this one must follow.
    pub load_after: Vec<String>,
    /// Mods this one cannot run alongside.
    pub incompatible_with: Vec<String>,
}

/// A validated mod with its self-declared relations.
///
/// Identity is the canonical `package_id`; everything else is snapshot data.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModEntity {
    /// Canonical identifier.
    pub package_id: PackageId,
    /// Display name.
    pub name: String,
    /// Install source.
    pub source: SourceTag,
    /// Display-only category; irrelevant to ordering.
    pub category: Option<String>,
    /// Whether the mod is enabled.
    pub active: bool,
    requires: BTreeSet<PackageId>,
    load_before: BTreeSet<PackageId>,
    load_after: BTreeSet<PackageId>,
    incompatible_with: BTreeSet<PackageId>,
}

impl ModEntity {
    /// Create an entity with no declared relations.
    pub fn new(package_id: PackageId, name: impl Into<String>, source: SourceTag, active: bool) -> Self {
        Self {
            package_id,
            name: name.into(),
            source,
            category: None,
            active,
            requires: BTreeSet::new(),
            load_before: BTreeSet::new(),
            load_after: BTreeSet::new(),
            incompatible_with: BTreeSet::new(),
        }
    }

    /// Validate and canonicalize a raw descriptor.
    pub fn from_descriptor(desc: EntityDescriptor) -> Result<Self, ValidationError> {
        let mut entity = Self::new(PackageId::parse(&desc.package_id)?, desc.name, desc.source, desc.active);
        entity.category = desc.category;
        for (kind, targets) in [
            (RelationKind::Requires, &desc.requires),
            (RelationKind::LoadBefore, &desc.load_before),
            (RelationKind::LoadAfter, &desc.load_after),
            (RelationKind::IncompatibleWith, &desc.incompatible_with),
        ] {
            for raw in targets {
                entity.declare(kind, PackageId::parse(raw)?)?;
            }
        }
        Ok(entity)
    }

    /// Add a self-declared relation.
    pub fn declare(&mut self, kind: RelationKind, target: PackageId) -> Result<(), ValidationError> {
        if target == self.package_id {
            return Err(ValidationError::SelfReference { id: target, kind });
        }
        let set = match kind {
            RelationKind::Requires => &mut self.requires,
            RelationKind::LoadBefore => &mut self.load_before,
            RelationKind::LoadAfter => &mut self.load_after,
            RelationKind::IncompatibleWith => &mut self.incompatible_with,
        };
        set.insert(target);
        Ok(())
    }

    /// Builder form of [`declare`](Self::declare).
    pub fn with(mut self, kind: RelationKind, target: PackageId) -> Result<Self, ValidationError> {
        self.declare(kind, target)?;
        Ok(self)
    }

    /// Declared targets of one relation kind, in canonical order.
    pub fn relations_of(&self, kind: RelationKind) -> &BTreeSet<PackageId> {
        match kind {
            RelationKind::Requires => &self.requires,
            RelationKind::LoadBefore => &self.load_before,
            RelationKind::LoadAfter => &self.load_after,
            RelationKind::IncompatibleWith => &self.incompatible_with,
        }
    }

    /// All declared relations of this entity with source `declared`.
    pub fn declared_relations(&self) -> impl Iterator<Item = Relation> + '_ {
        [
            RelationKind::Requires,
            RelationKind::LoadBefore,
            RelationKind::LoadAfter,
            RelationKind::IncompatibleWith,
        ]
        .into_iter()
        .flat_map(move |kind| {
            self.relations_of(kind).iter().map(move |target| Relation {
                subject: self.package_id.clone(),
                kind,
                object: target.clone(),
                source: RuleSource::Declared,
            })
        })
    }
}
