//! # Mutation engine
//!
//! Applies one parsed [`Task`] to the graph. Every node write and every
//! relation pair of a fan-out runs in its own transaction; atomic inference
//! is chained only after the relation it derives from has committed.
//!
//! A relation whose endpoint does not resolve is not an error: it becomes a
//! [`MutationOutcome::RelationRejected`] and a record in the rejection sink,
//! so it can be retried once the missing PIT arrives.

use hashbrown::HashSet;
use serde::Serialize;

use crate::identity::{self, IdMethod};
use crate::model::{tokens, Direction, Node, NodeId, PropertyMap, Relationship, Value};
use crate::queue::{PitData, RelationParams, Task};
use crate::reasoner::{infer_atomic, retract_atomic, PrimaryEdge};
use crate::sink::{RejectionRecord, RejectionSink};
use crate::storage::StorageBackend;
use crate::taxonomy::{RelationType, Taxonomy};
use crate::tx::TxMode;
use crate::{Error, Result};

/// What applying a task did.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "outcome", rename_all = "snake_case")]
pub enum MutationOutcome {
    PitAdded {
        node: NodeId,
        hgid: String,
        uri: Option<String>,
        /// Relations created for the new node because it shares a URI with
        /// nodes that were already related by that URI.
        relations_copied: usize,
    },
    PitUpdated {
        node: NodeId,
        hgid: String,
    },
    PitDeleted {
        hgid: String,
        /// Every relation removed with the node.
        removed: Vec<RelationParams>,
        /// Removed relations that no longer hold between any aliases of
        /// their endpoints, sent back to the rejection sink.
        rejected: Vec<RejectionRecord>,
    },
    RelationsAdded {
        created: usize,
        skipped: usize,
        inferred: usize,
    },
    RelationRejected {
        record: RejectionRecord,
    },
    RelationsDeleted {
        deleted: usize,
        retracted: usize,
    },
}

/// Applies tasks against a backend.
pub struct MutationEngine<'a, B: StorageBackend> {
    backend: &'a B,
    taxonomy: &'a Taxonomy,
    rejections: &'a dyn RejectionSink,
}

impl<'a, B: StorageBackend> MutationEngine<'a, B> {
    pub fn new(backend: &'a B, taxonomy: &'a Taxonomy, rejections: &'a dyn RejectionSink) -> Self {
        Self { backend, taxonomy, rejections }
    }

    pub async fn apply(&self, task: &Task) -> Result<MutationOutcome> {
        match task {
            Task::AddPit(pit) => self.add_pit(pit).await,
            Task::UpdatePit(pit) => self.update_pit(pit).await,
            Task::DeletePit { hgid } => self.delete_pit(hgid).await,
            Task::AddRelation { relation, rejection_cause } => {
                if let Some(cause) = rejection_cause {
                    tracing::debug!(%cause, from = %relation.from, to = %relation.to, "retrying rejected relation");
                }
                self.add_relation(relation).await
            }
            Task::UpdateRelation(_) => Err(Error::Unsupported("updating relations".into())),
            Task::DeleteRelation(relation) => self.delete_relation(relation).await,
        }
    }

    // ========================================================================
    // PITs
    // ========================================================================

    async fn add_pit(&self, pit: &PitData) -> Result<MutationOutcome> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let node = match self
            .backend
            .create_node(&mut tx, &[tokens::PIT_LABEL], pit.to_properties())
            .await
        {
            Ok(id) => id,
            Err(e) => {
                self.backend.rollback_tx(tx).await?;
                return Err(e);
            }
        };
        self.backend.commit_tx(tx).await?;
        tracing::debug!(hgid = %pit.hgid, %node, "added PIT");

        let relations_copied = match &pit.uri {
            Some(uri) => self.copy_uri_relations(node, uri).await?,
            None => 0,
        };

        Ok(MutationOutcome::PitAdded {
            node,
            hgid: pit.hgid.clone(),
            uri: pit.uri.clone(),
            relations_copied,
        })
    }

    async fn update_pit(&self, pit: &PitData) -> Result<MutationOutcome> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        match self.replace_pit(&mut tx, pit).await {
            Ok(node) => {
                self.backend.commit_tx(tx).await?;
                Ok(MutationOutcome::PitUpdated { node, hgid: pit.hgid.clone() })
            }
            Err(e) => {
                self.backend.rollback_tx(tx).await?;
                Err(e)
            }
        }
    }

    async fn replace_pit(&self, tx: &mut B::Tx, pit: &PitData) -> Result<NodeId> {
        let node = identity::resolve_hgid(self.backend, tx, &pit.hgid)
            .await?
            .ok_or_else(|| Error::NotFound(format!("PIT {}", pit.hgid)))?;
        self.backend.replace_node_properties(tx, node.id, pit.to_properties()).await?;
        Ok(node.id)
    }

    async fn delete_pit(&self, hgid: &str) -> Result<MutationOutcome> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let removed = match self.detach_pit(&mut tx, hgid).await {
            Ok(removed) => removed,
            Err(e) => {
                self.backend.rollback_tx(tx).await?;
                return Err(e);
            }
        };
        self.backend.commit_tx(tx).await?;
        tracing::debug!(%hgid, relations = removed.len(), "deleted PIT");

        // A relation addressed by URI may still hold through another alias.
        // Those that no longer hold anywhere go back to the rejection sink,
        // once per relation however many aliases it was fanned out to.
        let mut rejected = Vec::new();
        {
            let mut seen = HashSet::new();
            for params in removed.iter().filter(|p| self.is_asserted(p)) {
                if !seen.insert(params) {
                    continue;
                }
                if self.relation_absent(params).await? {
                    let record = RejectionRecord::new(params, hgid);
                    self.rejections.reject(record.clone()).await?;
                    rejected.push(record);
                }
            }
        }

        Ok(MutationOutcome::PitDeleted { hgid: hgid.to_owned(), removed, rejected })
    }

    async fn detach_pit(&self, tx: &mut B::Tx, hgid: &str) -> Result<Vec<RelationParams>> {
        let node = identity::resolve_hgid(self.backend, tx, hgid)
            .await?
            .ok_or_else(|| Error::NotFound(format!("PIT {hgid}")))?;

        let rels = self.backend.get_relationships(tx, node.id, Direction::Both, None).await?;
        let mut params = Vec::with_capacity(rels.len());
        for rel in &rels {
            match self.relation_params(tx, &node, rel).await? {
                Some(p) => params.push(p),
                None => tracing::warn!(rel = %rel.id, rel_type = %rel.rel_type, "skipping relation with unknown label"),
            }
        }

        self.backend.detach_delete_node(tx, node.id).await?;
        Ok(params)
    }

    /// Describe a stored relation by the identifiers its endpoints were
    /// given with. `known` is one of its endpoints.
    async fn relation_params(
        &self,
        tx: &B::Tx,
        known: &Node,
        rel: &Relationship,
    ) -> Result<Option<RelationParams>> {
        let Ok(label) = RelationType::from_label(&rel.rel_type) else {
            return Ok(None);
        };
        let src = self.endpoint(tx, known, rel.src).await?;
        let dst = self.endpoint(tx, known, rel.dst).await?;
        let (Some(src), Some(dst)) = (src, dst) else {
            return Err(Error::Integrity(format!("relationship {} has a dangling endpoint", rel.id)));
        };

        let (from, from_id_method) = endpoint_identifier(&src, id_method(rel, tokens::relation::FROM_ID_METHOD));
        let (to, to_id_method) = endpoint_identifier(&dst, id_method(rel, tokens::relation::TO_ID_METHOD));
        Ok(Some(RelationParams {
            from,
            from_id_method,
            to,
            to_id_method,
            label,
            source: rel.source().unwrap_or_default().to_owned(),
        }))
    }

    async fn endpoint(&self, tx: &B::Tx, known: &Node, id: NodeId) -> Result<Option<Node>> {
        if id == known.id {
            return Ok(Some(known.clone()));
        }
        self.backend.get_node(tx, id).await
    }

    /// Asserted by a source rather than derived by the reasoner.
    fn is_asserted(&self, params: &RelationParams) -> bool {
        self.taxonomy.is_primary(params.label)
            && !params.source.starts_with(tokens::INFERRED_FROM_PREFIX)
            && params.source != tokens::INFERRED_TRANSITIVE
    }

    async fn relation_absent(&self, params: &RelationParams) -> Result<bool> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let from = identity::resolve(self.backend, &tx, &params.from, params.from_id_method).await?;
        let to = identity::resolve(self.backend, &tx, &params.to, params.to_id_method).await?;
        for f in &from {
            for t in &to {
                let found = self
                    .backend
                    .find_relationship(&tx, f.id, t.id, params.label.label(), Some(&params.source))
                    .await?;
                if found.is_some() {
                    self.backend.commit_tx(tx).await?;
                    return Ok(false);
                }
            }
        }
        self.backend.commit_tx(tx).await?;
        Ok(true)
    }

    /// Re-apply, for a newly added node, every relation its URI siblings
    /// hold by that URI.
    async fn copy_uri_relations(&self, node: NodeId, uri: &str) -> Result<usize> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let siblings = identity::resolve(self.backend, &tx, uri, IdMethod::Uri).await?;

        let mut pending: Vec<RelationParams> = Vec::new();
        let mut seen = HashSet::new();
        for sibling in siblings.iter().filter(|n| n.id != node) {
            for rel in self.backend.get_relationships(&tx, sibling.id, Direction::Both, None).await? {
                let uri_end = if rel.src == sibling.id {
                    tokens::relation::FROM_ID_METHOD
                } else {
                    tokens::relation::TO_ID_METHOD
                };
                if id_method(&rel, uri_end) != IdMethod::Uri {
                    continue;
                }
                let Some(params) = self.relation_params(&tx, sibling, &rel).await? else {
                    continue;
                };
                if self.is_asserted(&params) && seen.insert(params.clone()) {
                    pending.push(params);
                }
            }
        }
        self.backend.commit_tx(tx).await?;

        let mut copied = 0;
        for params in &pending {
            match self.add_relation_quiet(params).await? {
                Some((created, _)) => copied += created,
                None => tracing::warn!(from = %params.from, to = %params.to, "URI relation no longer resolves"),
            }
        }
        if copied > 0 {
            tracing::debug!(%uri, copied, "copied URI relations to new PIT");
        }
        Ok(copied)
    }

    // ========================================================================
    // Relations
    // ========================================================================

    async fn add_relation(&self, relation: &RelationParams) -> Result<MutationOutcome> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let from = identity::resolve(self.backend, &tx, &relation.from, relation.from_id_method).await?;
        let to = identity::resolve(self.backend, &tx, &relation.to, relation.to_id_method).await?;
        self.backend.commit_tx(tx).await?;

        let unresolved = if from.is_empty() {
            Some(&relation.from)
        } else if to.is_empty() {
            Some(&relation.to)
        } else {
            None
        };
        if let Some(cause) = unresolved {
            let record = RejectionRecord::new(relation, cause.clone());
            self.rejections.reject(record.clone()).await?;
            tracing::debug!(%cause, label = %relation.label, "rejected relation");
            return Ok(MutationOutcome::RelationRejected { record });
        }

        let (created, skipped, inferred) = self.create_fan_out(relation, &from, &to).await?;
        Ok(MutationOutcome::RelationsAdded { created, skipped, inferred })
    }

    /// Add a relation whose endpoints are expected to resolve.
    /// Returns `None` instead of rejecting when they do not.
    async fn add_relation_quiet(&self, relation: &RelationParams) -> Result<Option<(usize, usize)>> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let from = identity::resolve(self.backend, &tx, &relation.from, relation.from_id_method).await?;
        let to = identity::resolve(self.backend, &tx, &relation.to, relation.to_id_method).await?;
        self.backend.commit_tx(tx).await?;
        if from.is_empty() || to.is_empty() {
            return Ok(None);
        }
        let (created, _, inferred) = self.create_fan_out(relation, &from, &to).await?;
        Ok(Some((created, inferred)))
    }

    /// Create `relation` for every from×to pair, then infer atomic relations
    /// for the pairs that committed. Returns (created, skipped, inferred).
    async fn create_fan_out(
        &self,
        relation: &RelationParams,
        from: &[Node],
        to: &[Node],
    ) -> Result<(usize, usize, usize)> {
        let mut created = Vec::new();
        let mut skipped = 0;
        let mut failure = None;

        'pairs: for f in from {
            for t in to {
                match self.create_pair(relation, f.id, t.id).await {
                    Ok(Some(edge)) => created.push(edge),
                    Ok(None) => skipped += 1,
                    Err(e) => {
                        failure = Some(e);
                        break 'pairs;
                    }
                }
            }
        }

        let mut inferred = 0;
        for edge in &created {
            inferred += infer_atomic(self.backend, self.taxonomy, edge).await?.len();
        }
        if let Some(e) = failure {
            tracing::warn!(committed = created.len(), "relation fan-out failed part way");
            return Err(e);
        }

        tracing::debug!(label = %relation.label, created = created.len(), skipped, inferred, "added relation");
        Ok((created.len(), skipped, inferred))
    }

    async fn create_pair(
        &self,
        relation: &RelationParams,
        src: NodeId,
        dst: NodeId,
    ) -> Result<Option<PrimaryEdge>> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let step = async {
            let existing = self
                .backend
                .find_relationship(&tx, src, dst, relation.label.label(), Some(&relation.source))
                .await?;
            if existing.is_some() {
                return Ok(false);
            }
            self.backend
                .create_relationship(&mut tx, src, dst, relation.label.label(), relation_properties(relation))
                .await?;
            Ok::<_, Error>(true)
        }
        .await;

        match step {
            Ok(true) => {
                self.backend.commit_tx(tx).await?;
                Ok(Some(PrimaryEdge {
                    src,
                    dst,
                    label: relation.label,
                    source: relation.source.clone(),
                }))
            }
            Ok(false) => {
                self.backend.commit_tx(tx).await?;
                Ok(None)
            }
            Err(e) => {
                self.backend.rollback_tx(tx).await?;
                Err(e)
            }
        }
    }

    async fn delete_relation(&self, relation: &RelationParams) -> Result<MutationOutcome> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        let from = identity::resolve(self.backend, &tx, &relation.from, relation.from_id_method).await?;
        let to = identity::resolve(self.backend, &tx, &relation.to, relation.to_id_method).await?;
        self.backend.commit_tx(tx).await?;

        if from.is_empty() {
            return Err(Error::NotFound(format!("PIT {}", relation.from)));
        }
        if to.is_empty() {
            return Err(Error::NotFound(format!("PIT {}", relation.to)));
        }

        let mut deleted = Vec::new();
        let mut failure = None;
        'pairs: for f in &from {
            for t in &to {
                match self.delete_pair(relation, f.id, t.id).await {
                    Ok(Some(edge)) => deleted.push(edge),
                    Ok(None) => {}
                    Err(e) => {
                        failure = Some(e);
                        break 'pairs;
                    }
                }
            }
        }

        let mut retracted = 0;
        for edge in &deleted {
            retracted += retract_atomic(self.backend, self.taxonomy, edge).await?;
        }
        if let Some(e) = failure {
            return Err(e);
        }
        if deleted.is_empty() {
            return Err(Error::NotFound(format!(
                "relation {} -[{}]-> {} from {}",
                relation.from, relation.label, relation.to, relation.source
            )));
        }

        tracing::debug!(label = %relation.label, deleted = deleted.len(), retracted, "deleted relation");
        Ok(MutationOutcome::RelationsDeleted { deleted: deleted.len(), retracted })
    }

    async fn delete_pair(
        &self,
        relation: &RelationParams,
        src: NodeId,
        dst: NodeId,
    ) -> Result<Option<PrimaryEdge>> {
        let mut tx = self.backend.begin_tx(TxMode::ReadWrite).await?;
        let step = async {
            let Some(existing) = self
                .backend
                .find_relationship(&tx, src, dst, relation.label.label(), Some(&relation.source))
                .await?
            else {
                return Ok(false);
            };
            self.backend.delete_relationship(&mut tx, existing.id).await
        }
        .await;

        match step {
            Ok(deleted) => {
                self.backend.commit_tx(tx).await?;
                Ok(deleted.then(|| PrimaryEdge {
                    src,
                    dst,
                    label: relation.label,
                    source: relation.source.clone(),
                }))
            }
            Err(e) => {
                self.backend.rollback_tx(tx).await?;
                Err(e)
            }
        }
    }
}

fn relation_properties(relation: &RelationParams) -> PropertyMap {
    let mut props = PropertyMap::new();
    props.insert(tokens::relation::SOURCE.into(), Value::from(relation.source.as_str()));
    props.insert(tokens::relation::FROM_ID_METHOD.into(), Value::from(relation.from_id_method.as_str()));
    props.insert(tokens::relation::TO_ID_METHOD.into(), Value::from(relation.to_id_method.as_str()));
    props
}

/// Stored id method of one end of a relation. Defaults to `hgid`.
fn id_method(rel: &Relationship, key: &str) -> IdMethod {
    rel.properties
        .get(key)
        .and_then(Value::as_str)
        .and_then(IdMethod::parse)
        .unwrap_or(IdMethod::Hgid)
}

/// Identifier of `node` under `method`, falling back to its hgid when the
/// node lacks a URI.
fn endpoint_identifier(node: &Node, method: IdMethod) -> (String, IdMethod) {
    match identity::identifier_of(node, method) {
        Some(id) => (id.to_owned(), method),
        None => (node.hgid().unwrap_or_default().to_owned(), IdMethod::Hgid),
    }
}
