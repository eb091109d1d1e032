//! Relation taxonomy.
//!
//! Primary relations are asserted by sources. Each primary type implies an
//! ordered list of atomic relations that the reasoner materializes alongside
//! it. One primary type is designated the equivalence relation, used by the
//! transitive pass and by traversal clustering.

use serde::{Deserialize, Serialize};
use smallvec::{smallvec, SmallVec};

use crate::{Error, Result};

/// The fixed set of relation labels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum RelationType {
    #[serde(rename = "hg:sameHgConcept")]
    SameHgConcept,
    #[serde(rename = "hg:absorbedBy")]
    AbsorbedBy,
    #[serde(rename = "hg:isUsedFor")]
    IsUsedFor,
    #[serde(rename = "hg:liesIn")]
    LiesIn,
    #[serde(rename = "hga:conceptIdentical")]
    ConceptIdentical,
    #[serde(rename = "hga:typeIdentical")]
    TypeIdentical,
    #[serde(rename = "hga:conceptIn")]
    ConceptIn,
    #[serde(rename = "hga:periodBefore")]
    PeriodBefore,
    #[serde(rename = "hga:geometryIntersects")]
    GeometryIntersects,
}

impl RelationType {
    pub const ALL: [RelationType; 9] = [
        RelationType::SameHgConcept,
        RelationType::AbsorbedBy,
        RelationType::IsUsedFor,
        RelationType::LiesIn,
        RelationType::ConceptIdentical,
        RelationType::TypeIdentical,
        RelationType::ConceptIn,
        RelationType::PeriodBefore,
        RelationType::GeometryIntersects,
    ];

    /// Wire label, also used as the stored relationship type.
    pub fn label(&self) -> &'static str {
        match self {
            RelationType::SameHgConcept => "hg:sameHgConcept",
            RelationType::AbsorbedBy => "hg:absorbedBy",
            RelationType::IsUsedFor => "hg:isUsedFor",
            RelationType::LiesIn => "hg:liesIn",
            RelationType::ConceptIdentical => "hga:conceptIdentical",
            RelationType::TypeIdentical => "hga:typeIdentical",
            RelationType::ConceptIn => "hga:conceptIn",
            RelationType::PeriodBefore => "hga:periodBefore",
            RelationType::GeometryIntersects => "hga:geometryIntersects",
        }
    }

    pub fn from_label(label: &str) -> Result<Self> {
        Self::ALL
            .into_iter()
            .find(|t| t.label() == label)
            .ok_or_else(|| Error::Malformed(format!("unknown relation label: {label}")))
    }
}

impl std::fmt::Display for RelationType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.label())
    }
}

/// Atomic labels implied by one primary label, in inference order.
pub type AtomicList = SmallVec<[RelationType; 4]>;

/// Immutable mapping primary → atomic, plus the designated equivalence type.
#[derive(Debug, Clone, PartialEq)]
pub struct Taxonomy {
    table: Vec<(RelationType, AtomicList)>,
    equivalence: RelationType,
}

impl Default for Taxonomy {
    fn default() -> Self {
        use RelationType::*;
        Self {
            table: vec![
                (SameHgConcept, smallvec![ConceptIdentical, TypeIdentical]),
                (AbsorbedBy, smallvec![ConceptIn, PeriodBefore, TypeIdentical, GeometryIntersects]),
                (IsUsedFor, smallvec![ConceptIdentical, TypeIdentical]),
                (LiesIn, smallvec![GeometryIntersects]),
            ],
            equivalence: SameHgConcept,
        }
    }
}

impl Taxonomy {
    /// Build a taxonomy from an explicit table.
    ///
    /// Fails if a primary label appears twice, one of its atomic labels is
    /// itself primary, or `equivalence` is not primary.
    pub fn new(
        table: Vec<(RelationType, AtomicList)>,
        equivalence: RelationType,
    ) -> Result<Self> {
        for (i, (primary, atomics)) in table.iter().enumerate() {
            if table[..i].iter().any(|(p, _)| p == primary) {
                return Err(Error::Config(format!("{primary} listed twice in taxonomy")));
            }
            if let Some(a) = atomics.iter().find(|a| table.iter().any(|(p, _)| p == *a)) {
                return Err(Error::Config(format!("atomic label {a} of {primary} is primary")));
            }
        }
        Self { table, equivalence: RelationType::SameHgConcept }.with_equivalence(equivalence)
    }

    /// Same table with a different equivalence type, which must be primary.
    pub fn with_equivalence(mut self, equivalence: RelationType) -> Result<Self> {
        if !self.is_primary(equivalence) {
            return Err(Error::Config(format!("equivalence relation {equivalence} is not primary")));
        }
        self.equivalence = equivalence;
        Ok(self)
    }

    pub fn equivalence(&self) -> RelationType {
        self.equivalence
    }

    pub fn is_primary(&self, rel: RelationType) -> bool {
        self.table.iter().any(|(p, _)| *p == rel)
    }

    /// A(L): atomic labels implied by `primary`. Empty for non-primary labels.
    pub fn atomic_for(&self, primary: RelationType) -> &[RelationType] {
        self.table
            .iter()
            .find(|(p, _)| *p == primary)
            .map(|(_, atomics)| atomics.as_slice())
            .unwrap_or_default()
    }

    /// Every primary label whose atomic list contains `atomic`.
    pub fn primaries_for(&self, atomic: RelationType) -> SmallVec<[RelationType; 4]> {
        self.table
            .iter()
            .filter(|(_, atomics)| atomics.contains(&atomic))
            .map(|(p, _)| *p)
            .collect()
    }
}
