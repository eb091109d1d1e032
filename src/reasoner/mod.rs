//! # Reasoner
//!
//! Two inferencers keep derived relations in step with asserted ones:
//!
//! - [`atomic`] materializes (and retracts) the atomic relations implied by
//!   a primary relation, chained after each relation add or delete.
//! - [`transitive`] is a batch pass that copies relations across the
//!   equivalence relation until a fixed point is reached.

pub mod atomic;
pub mod transitive;

pub use atomic::{infer_atomic, retract_atomic, PrimaryEdge};
pub use transitive::{infer_transitive, TransitiveReport};

use crate::identity::IdMethod;
use crate::model::{tokens, PropertyMap, Value};

/// Properties of an edge the reasoner creates between two nodes.
pub(crate) fn inferred_properties(source: &str) -> PropertyMap {
    let mut props = PropertyMap::new();
    props.insert(tokens::relation::SOURCE.into(), Value::from(source));
    props.insert(tokens::relation::FROM_ID_METHOD.into(), Value::from(IdMethod::Hgid.as_str()));
    props.insert(tokens::relation::TO_ID_METHOD.into(), Value::from(IdMethod::Hgid.as_str()));
    props
}
