//! # PIT Graph Model
//!
//! Clean DTOs for the histograph property graph.
//! These types cross every boundary: storage ↔ engines ↔ queue ↔ traversal.
//!
//! Design rule: this module is pure data with no I/O or async.

pub mod node;
pub mod relationship;
pub mod value;
pub mod property_map;
pub mod tokens;

pub use node::{Node, NodeId};
pub use relationship::{Relationship, RelId, Direction};
pub use value::Value;
pub use property_map::PropertyMap;
