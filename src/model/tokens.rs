//! Property keys and labels shared across the crate.

/// Label carried by every PIT node.
pub const PIT_LABEL: &str = "PIT";

/// PIT node property keys.
pub mod pit {
    pub const HGID: &str = "hgid";
    pub const NAME: &str = "name";
    pub const TYPE: &str = "type";
    pub const SOURCE: &str = "source";
    pub const URI: &str = "uri";
    pub const GEOMETRY: &str = "geometry";
    pub const HAS_BEGINNING: &str = "hasBeginning";
    pub const HAS_END: &str = "hasEnd";
    pub const DATA: &str = "data";
}

/// Relationship property keys.
pub mod relation {
    pub const SOURCE: &str = "source";
    pub const FROM_ID_METHOD: &str = "from_id_method";
    pub const TO_ID_METHOD: &str = "to_id_method";
}

/// Provenance marker prefix for atomic edges: `inferred_from_<source>`.
pub const INFERRED_FROM_PREFIX: &str = "inferred_from_";

/// Provenance marker for edges created by the transitive pass.
pub const INFERRED_TRANSITIVE: &str = "inferred_transitive_equivalence";

/// Derived provenance of an atomic edge inferred from a relation with `source`.
pub fn inferred_from(source: &str) -> String {
    format!("{INFERRED_FROM_PREFIX}{source}")
}
