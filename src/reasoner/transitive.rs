//! Transitive inference over the equivalence relation.
//!
//! For every equivalence edge `(n)-[E]->(n2)` both endpoints receive copies
//! of each other's relations:
//!
//! ```text
//! (n1) -E- (n2) -[T]-> (n3)   ⇒   (n1) -[T]-> (n3)
//! (n1) -E- (n2) <-[T]- (n3)   ⇒   (n1) <-[T]- (n3)
//! ```
//!
//! Rounds repeat until one creates nothing. Each round reads a snapshot of
//! the equivalence edges taken at its start and commits as one transaction.

use serde::{Deserialize, Serialize};

use crate::model::{tokens, Direction, NodeId};
use crate::storage::StorageBackend;
use crate::taxonomy::Taxonomy;
use crate::tx::TxMode;
use crate::Result;

use super::inferred_properties;

/// Outcome of a transitive pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransitiveReport {
    /// Rounds run, including the final one that created nothing.
    pub rounds: usize,
    /// Edges created over all rounds.
    pub inferred: usize,
}

/// Run the fixed-point pass to completion.
pub async fn infer_transitive<B: StorageBackend>(
    backend: &B,
    taxonomy: &Taxonomy,
) -> Result<TransitiveReport> {
    let equivalence = taxonomy.equivalence().label();
    let mut report = TransitiveReport::default();

    loop {
        let mut tx = backend.begin_tx(TxMode::ReadWrite).await?;
        let round = match run_round(backend, &mut tx, equivalence).await {
            Ok(n) => n,
            Err(e) => {
                backend.rollback_tx(tx).await?;
                return Err(e);
            }
        };
        backend.commit_tx(tx).await?;

        report.rounds += 1;
        report.inferred += round;
        tracing::info!(round = report.rounds, inferred = round, "transitive round");
        if round == 0 {
            break;
        }
    }

    tracing::info!(rounds = report.rounds, inferred = report.inferred, "transitive pass complete");
    Ok(report)
}

async fn run_round<B: StorageBackend>(
    backend: &B,
    tx: &mut B::Tx,
    equivalence: &str,
) -> Result<usize> {
    let snapshot = backend.relationships_by_type(tx, equivalence).await?;
    let mut inferred = 0;
    for rel in &snapshot {
        inferred += propagate(backend, tx, rel.src, rel.dst).await?;
        inferred += propagate(backend, tx, rel.dst, rel.src).await?;
    }
    Ok(inferred)
}

/// Copy the relations of `n2` onto `n1`.
async fn propagate<B: StorageBackend>(
    backend: &B,
    tx: &mut B::Tx,
    n1: NodeId,
    n2: NodeId,
) -> Result<usize> {
    let mut created = 0;

    for rel in backend.get_relationships(tx, n2, Direction::Outgoing, None).await? {
        let n3 = rel.dst;
        if n3 == n1 {
            continue;
        }
        if backend.find_relationship(tx, n1, n3, &rel.rel_type, None).await?.is_none() {
            backend
                .create_relationship(tx, n1, n3, &rel.rel_type, inferred_properties(tokens::INFERRED_TRANSITIVE))
                .await?;
            created += 1;
        }
    }

    for rel in backend.get_relationships(tx, n2, Direction::Incoming, None).await? {
        let n3 = rel.src;
        if n3 == n1 {
            continue;
        }
        if backend.find_relationship(tx, n3, n1, &rel.rel_type, None).await?.is_none() {
            backend
                .create_relationship(tx, n3, n1, &rel.rel_type, inferred_properties(tokens::INFERRED_TRANSITIVE))
                .await?;
            created += 1;
        }
    }

    Ok(created)
}
