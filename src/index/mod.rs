//! Index management.

use serde::{Deserialize, Serialize};

/// Type of property index.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum IndexType {
    /// Equality lookup on a label+property pair (e.g. `PIT.uri`).
    Exact,
    /// Equality lookup that also backs a uniqueness constraint (e.g. `PIT.hgid`).
    Unique,
}
