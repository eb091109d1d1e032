//! Atomic relation inference.
//!
//! A primary relation `(n1)-[L {source: S}]->(n2)` implies, for every atomic
//! label `a` in A(L), an edge `(n1)-[a {source: inferred_from_S}]->(n2)`.
//!
//! On retraction an atomic edge survives while any primary relation from the
//! same source that implies it still links the same pair. That check reads
//! the current graph; nothing is reference counted.

use crate::model::{tokens, NodeId, RelId, Relationship};
use crate::storage::StorageBackend;
use crate::taxonomy::{RelationType, Taxonomy};
use crate::tx::TxMode;
use crate::{Error, Result};

use super::inferred_properties;

/// A primary relation between two resolved nodes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PrimaryEdge {
    pub src: NodeId,
    pub dst: NodeId,
    pub label: RelationType,
    pub source: String,
}

impl PrimaryEdge {
    /// Read a stored relationship back as a primary edge.
    pub fn from_relationship(rel: &Relationship) -> Result<Self> {
        let source = rel
            .source()
            .ok_or_else(|| Error::Integrity(format!("relationship {} has no source", rel.id)))?;
        Ok(Self {
            src: rel.src,
            dst: rel.dst,
            label: RelationType::from_label(&rel.rel_type)?,
            source: source.to_owned(),
        })
    }
}

/// Create the atomic edges implied by a committed primary edge.
///
/// Each edge is created in its own transaction. Atomic edges that already
/// exist are skipped. Returns the IDs of the edges created.
pub async fn infer_atomic<B: StorageBackend>(
    backend: &B,
    taxonomy: &Taxonomy,
    edge: &PrimaryEdge,
) -> Result<Vec<RelId>> {
    let provenance = tokens::inferred_from(&edge.source);
    let mut created = Vec::new();

    for &atomic in taxonomy.atomic_for(edge.label) {
        let mut tx = backend.begin_tx(TxMode::ReadWrite).await?;
        let step = infer_one(backend, &mut tx, edge, atomic, &provenance).await;
        match step {
            Ok(Some(id)) => {
                backend.commit_tx(tx).await?;
                tracing::debug!(label = %atomic, src = %edge.src, dst = %edge.dst, "inferred atomic relation");
                created.push(id);
            }
            Ok(None) => {
                backend.commit_tx(tx).await?;
                tracing::debug!(label = %atomic, src = %edge.src, dst = %edge.dst, "atomic relation exists");
            }
            Err(e) => {
                backend.rollback_tx(tx).await?;
                return Err(e);
            }
        }
    }

    Ok(created)
}

async fn infer_one<B: StorageBackend>(
    backend: &B,
    tx: &mut B::Tx,
    edge: &PrimaryEdge,
    atomic: RelationType,
    provenance: &str,
) -> Result<Option<RelId>> {
    let existing = backend
        .find_relationship(tx, edge.src, edge.dst, atomic.label(), Some(provenance))
        .await?;
    if existing.is_some() {
        return Ok(None);
    }
    let id = backend
        .create_relationship(tx, edge.src, edge.dst, atomic.label(), inferred_properties(provenance))
        .await?;
    Ok(Some(id))
}

/// Delete the atomic edges of a primary edge that has just been removed,
/// unless another primary edge still justifies them.
///
/// Returns the number of atomic edges deleted.
pub async fn retract_atomic<B: StorageBackend>(
    backend: &B,
    taxonomy: &Taxonomy,
    edge: &PrimaryEdge,
) -> Result<usize> {
    let provenance = tokens::inferred_from(&edge.source);
    let mut removed = 0;

    for &atomic in taxonomy.atomic_for(edge.label) {
        let mut tx = backend.begin_tx(TxMode::ReadWrite).await?;
        match retract_one(backend, &mut tx, taxonomy, edge, atomic, &provenance).await {
            Ok(deleted) => {
                backend.commit_tx(tx).await?;
                if deleted {
                    removed += 1;
                }
            }
            Err(e) => {
                backend.rollback_tx(tx).await?;
                return Err(e);
            }
        }
    }

    Ok(removed)
}

async fn retract_one<B: StorageBackend>(
    backend: &B,
    tx: &mut B::Tx,
    taxonomy: &Taxonomy,
    edge: &PrimaryEdge,
    atomic: RelationType,
    provenance: &str,
) -> Result<bool> {
    let Some(inferred) = backend
        .find_relationship(tx, edge.src, edge.dst, atomic.label(), Some(provenance))
        .await?
    else {
        return Ok(false);
    };

    for primary in taxonomy.primaries_for(atomic) {
        let justification = backend
            .find_relationship(tx, edge.src, edge.dst, primary.label(), Some(&edge.source))
            .await?;
        if justification.is_some() {
            tracing::debug!(label = %atomic, still_justified_by = %primary, "keeping atomic relation");
            return Ok(false);
        }
    }

    backend.delete_relationship(tx, inferred.id).await?;
    tracing::debug!(label = %atomic, src = %edge.src, dst = %edge.dst, "retracted atomic relation");
    Ok(true)
}
