//! # Storage Backend Trait
//!
//! This is THE contract between the histograph engines and any graph store.
//! The engines only need transactional node/relationship CRUD, one
//! uniqueness constraint (`PIT.hgid`), an equality index (`PIT.uri`) and a
//! full relationship scan for the transitive pass.
//!
//! ## Implementations
//!
//! | Backend | Module | Description |
//! |---------|--------|-------------|
//! | `MemoryBackend` | `memory` | In-memory with undo-log rollback, for testing/embedding |

pub mod memory;

use async_trait::async_trait;
use crate::model::*;
use crate::tx::{Transaction, TxMode};
use crate::index::IndexType;
use crate::{Error, Result};

pub use memory::{MemoryBackend, MemoryTx};

// ============================================================================
// Constraint types
// ============================================================================

/// Type of constraint to create on a label+property pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConstraintType {
    /// Property value must be unique for nodes with this label.
    Unique,
}

// ============================================================================
// StorageBackend Trait
// ============================================================================

/// The universal storage contract.
///
/// Backends should return `Error::StorageError("not supported")` for
/// operations they can't handle rather than growing optional methods.
#[async_trait]
pub trait StorageBackend: Send + Sync + 'static {
    /// The transaction type for this backend.
    type Tx: Transaction;

    // ========================================================================
    // Transactions
    // ========================================================================

    /// Begin a new transaction.
    async fn begin_tx(&self, mode: TxMode) -> Result<Self::Tx>;

    /// Commit a transaction.
    async fn commit_tx(&self, tx: Self::Tx) -> Result<()>;

    /// Roll back a transaction, reverting every write made through it.
    async fn rollback_tx(&self, tx: Self::Tx) -> Result<()>;

    // ========================================================================
    // Node CRUD
    // ========================================================================

    /// Create a node with the given labels and properties.
    ///
    /// Fails with `Error::DuplicateKey` if a uniqueness constraint is violated.
    async fn create_node(
        &self,
        tx: &mut Self::Tx,
        labels: &[&str],
        props: PropertyMap,
    ) -> Result<NodeId>;

    /// Get a node by ID. Returns None if not found.
    async fn get_node(&self, tx: &Self::Tx, id: NodeId) -> Result<Option<Node>>;

    /// Delete a node. Returns true if it existed.
    /// Fails if the node still has relationships.
    async fn delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<bool>;

    /// Clear every property of a node and set `props` in their place.
    async fn replace_node_properties(
        &self,
        tx: &mut Self::Tx,
        id: NodeId,
        props: PropertyMap,
    ) -> Result<()>;

    /// Delete a node and all its relationships in one operation, returning
    /// the relationships that were removed.
    ///
    /// Default: get all relationships, delete each, then delete the node.
    async fn detach_delete_node(&self, tx: &mut Self::Tx, id: NodeId) -> Result<Vec<Relationship>> {
        if self.get_node(tx, id).await?.is_none() {
            return Err(Error::NotFound(format!("Node {id}")));
        }
        let rels = self.get_relationships(tx, id, Direction::Both, None).await?;
        for rel in &rels {
            self.delete_relationship(tx, rel.id).await?;
        }
        self.delete_node(tx, id).await?;
        Ok(rels)
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    /// Create a relationship between two nodes.
    async fn create_relationship(
        &self,
        tx: &mut Self::Tx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId>;

    /// Get a relationship by ID.
    async fn get_relationship(&self, tx: &Self::Tx, id: RelId) -> Result<Option<Relationship>>;

    /// Delete a relationship. Returns true if it existed.
    async fn delete_relationship(&self, tx: &mut Self::Tx, id: RelId) -> Result<bool>;

    /// Find the relationship `src -[rel_type]-> dst`, optionally restricted
    /// to a given `source` provenance.
    ///
    /// Default: scans the outgoing relationships of `src`.
    async fn find_relationship(
        &self,
        tx: &Self::Tx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        source: Option<&str>,
    ) -> Result<Option<Relationship>> {
        let rels = self.get_relationships(tx, src, Direction::Outgoing, Some(rel_type)).await?;
        Ok(rels.into_iter().find(|r| {
            r.dst == dst && source.is_none_or(|s| r.source() == Some(s))
        }))
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    /// Get all relationships of a node, optionally filtered by direction and type.
    async fn get_relationships(
        &self,
        tx: &Self::Tx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>>;

    /// Number of relationships attached to a node (self-loops count once).
    async fn degree(&self, tx: &Self::Tx, node: NodeId) -> Result<usize> {
        Ok(self.get_relationships(tx, node, Direction::Both, None).await?.len())
    }

    // ========================================================================
    // Index
    // ========================================================================

    /// Create an index on a label+property combination.
    async fn create_index(
        &self,
        label: &str,
        property: &str,
        index_type: IndexType,
    ) -> Result<()>;

    // ========================================================================
    // Schema introspection
    // ========================================================================

    /// Total number of nodes.
    async fn node_count(&self, tx: &Self::Tx) -> Result<u64>;

    /// Total number of relationships.
    async fn relationship_count(&self, tx: &Self::Tx) -> Result<u64>;

    // ========================================================================
    // Scan
    // ========================================================================

    /// Return every relationship in the graph, ordered by ID.
    ///
    /// The result is a materialized snapshot: callers may mutate the graph
    /// while walking it.
    async fn all_relationships(&self, tx: &Self::Tx) -> Result<Vec<Relationship>>;

    /// Find nodes by label + property value (index-backed if available).
    async fn nodes_by_property(
        &self,
        tx: &Self::Tx,
        label: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<Node>>;

    /// Find all relationships of a given type.
    ///
    /// Default: filters the full relationship scan.
    async fn relationships_by_type(
        &self,
        tx: &Self::Tx,
        rel_type: &str,
    ) -> Result<Vec<Relationship>> {
        let mut rels = self.all_relationships(tx).await?;
        rels.retain(|r| r.rel_type == rel_type);
        Ok(rels)
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    /// Create a schema constraint.
    ///
    /// Default returns "not supported".
    async fn create_constraint(
        &self,
        _label: &str,
        _property: &str,
        _constraint_type: ConstraintType,
    ) -> Result<()> {
        Err(Error::StorageError("constraints not supported".into()))
    }
}
