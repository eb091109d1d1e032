//! In-memory storage backend.
//!
//! This is the reference implementation of `StorageBackend`.
//! It uses simple HashMaps protected by RwLock.
//!
//! ## Semantics
//!
//! - **Undo-log transactions**: writes are applied immediately and recorded
//!   in the transaction's undo log. `commit_tx()` discards the log,
//!   `rollback_tx()` replays it in reverse. There is no isolation between
//!   concurrent writers; the histograph worker is the single writer.
//! - **Uniqueness constraints** are checked on create and on property
//!   replacement.
//! - **Property indexes** cover string values only; other lookups scan the
//!   label index.
//!
//! Lock order is always nodes → relationships → adjacency → label index →
//! property index.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use hashbrown::HashMap;
use parking_lot::RwLock;
use async_trait::async_trait;

use crate::model::*;
use crate::tx::{Transaction, TxMode, TxId};
use crate::index::IndexType;
use crate::{Error, Result};
use super::{ConstraintType, StorageBackend};

// ============================================================================
// MemoryBackend
// ============================================================================

/// In-memory property graph storage.
#[derive(Clone, Default)]
pub struct MemoryBackend {
    inner: Arc<MemoryInner>,
}

/// (label, property) pair naming an index or constraint.
type SchemaKey = (String, String);

#[derive(Default)]
struct MemoryInner {
    nodes: RwLock<HashMap<NodeId, Node>>,
    relationships: RwLock<HashMap<RelId, Relationship>>,
    /// node_id → list of relationship IDs
    adjacency: RwLock<HashMap<NodeId, Vec<RelId>>>,
    /// label → node IDs
    label_index: RwLock<HashMap<String, Vec<NodeId>>>,
    /// (label, property) → string value → node IDs
    property_index: RwLock<HashMap<SchemaKey, HashMap<String, Vec<NodeId>>>>,
    unique: RwLock<Vec<SchemaKey>>,
    next_node_id: AtomicU64,
    next_rel_id: AtomicU64,
    next_tx_id: AtomicU64,
}

impl MemoryBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

// ============================================================================
// MemoryTx
// ============================================================================

/// One reversible write.
#[derive(Debug)]
enum Undo {
    NodeCreated(NodeId),
    NodeDeleted(Node),
    PropertiesReplaced { id: NodeId, old: PropertyMap },
    RelCreated(RelId),
    RelDeleted(Relationship),
}

/// In-memory transaction: an identifier plus the undo log of its writes.
#[derive(Debug)]
pub struct MemoryTx {
    id: TxId,
    mode: TxMode,
    undo: Vec<Undo>,
}

impl MemoryTx {
    fn writable(&mut self) -> Result<&mut Vec<Undo>> {
        if self.is_read_only() {
            return Err(Error::TxError(format!("{} is read-only", self.id)));
        }
        Ok(&mut self.undo)
    }

    /// Number of writes recorded so far.
    pub fn pending_writes(&self) -> usize {
        self.undo.len()
    }
}

impl Transaction for MemoryTx {
    fn mode(&self) -> TxMode { self.mode }
    fn id(&self) -> TxId { self.id }
}

// ============================================================================
// Raw (non-logged) mutations, shared by the trait impl and rollback
// ============================================================================

impl MemoryInner {
    fn index_node(&self, node: &Node) {
        {
            let mut idx = self.label_index.write();
            for label in &node.labels {
                idx.entry(label.clone()).or_default().push(node.id);
            }
        }
        let mut pidx = self.property_index.write();
        for ((label, key), values) in pidx.iter_mut() {
            if !node.has_label(label) {
                continue;
            }
            if let Some(v) = node.get_str(key) {
                values.entry(v.to_owned()).or_default().push(node.id);
            }
        }
    }

    fn unindex_node(&self, node: &Node) {
        {
            let mut idx = self.label_index.write();
            for label in &node.labels {
                if let Some(ids) = idx.get_mut(label) {
                    ids.retain(|nid| *nid != node.id);
                }
            }
        }
        let mut pidx = self.property_index.write();
        for ((label, key), values) in pidx.iter_mut() {
            if !node.has_label(label) {
                continue;
            }
            if let Some(ids) = node.get_str(key).and_then(|v| values.get_mut(v)) {
                ids.retain(|nid| *nid != node.id);
            }
        }
    }

    fn insert_node_raw(&self, node: Node) {
        self.index_node(&node);
        let id = node.id;
        self.nodes.write().insert(id, node);
        self.adjacency.write().entry(id).or_default();
    }

    fn remove_node_raw(&self, id: NodeId) -> Option<Node> {
        let removed = self.nodes.write().remove(&id);
        self.adjacency.write().remove(&id);
        if let Some(node) = &removed {
            self.unindex_node(node);
        }
        removed
    }

    /// Swap a node's properties, returning the old ones.
    fn replace_props_raw(&self, id: NodeId, props: PropertyMap) -> Result<PropertyMap> {
        let old_node = self.nodes.read().get(&id).cloned()
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        self.unindex_node(&old_node);
        let mut new_node = old_node.clone();
        new_node.properties = props;
        self.index_node(&new_node);
        self.nodes.write().insert(id, new_node);
        Ok(old_node.properties)
    }

    fn insert_rel_raw(&self, rel: Relationship) {
        let (id, src, dst) = (rel.id, rel.src, rel.dst);
        self.relationships.write().insert(id, rel);
        let mut adj = self.adjacency.write();
        adj.entry(src).or_default().push(id);
        if src != dst {
            adj.entry(dst).or_default().push(id);
        }
    }

    fn remove_rel_raw(&self, id: RelId) -> Option<Relationship> {
        let removed = self.relationships.write().remove(&id);
        if let Some(rel) = &removed {
            let mut adj = self.adjacency.write();
            if let Some(rels) = adj.get_mut(&rel.src) {
                rels.retain(|rid| *rid != id);
            }
            if rel.src != rel.dst {
                if let Some(rels) = adj.get_mut(&rel.dst) {
                    rels.retain(|rid| *rid != id);
                }
            }
        }
        removed
    }

    fn lookup(&self, label: &str, key: &str, value: &Value) -> Vec<Node> {
        let nodes = self.nodes.read();
        if let Some(v) = value.as_str() {
            let pidx = self.property_index.read();
            if let Some(values) = pidx.get(&(label.to_owned(), key.to_owned())) {
                return values
                    .get(v)
                    .map(|ids| ids.iter().filter_map(|id| nodes.get(id).cloned()).collect())
                    .unwrap_or_default();
            }
        }
        // Brute force scan over the label
        let idx = self.label_index.read();
        idx.get(label)
            .map(|ids| {
                ids.iter()
                    .filter_map(|id| nodes.get(id))
                    .filter(|n| n.get(key) == Some(value))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    fn check_unique(
        &self,
        labels: &[String],
        props: &PropertyMap,
        exclude: Option<NodeId>,
    ) -> Result<()> {
        let unique = self.unique.read().clone();
        for (label, key) in unique {
            if !labels.iter().any(|l| *l == label) {
                continue;
            }
            let Some(value) = props.get(&key) else { continue };
            let clash = self
                .lookup(&label, &key, value)
                .into_iter()
                .any(|n| Some(n.id) != exclude);
            if clash {
                return Err(Error::DuplicateKey(format!(
                    "Node with {label}.{key} = {value} already exists"
                )));
            }
        }
        Ok(())
    }

    fn undo(&self, log: Vec<Undo>) {
        for entry in log.into_iter().rev() {
            match entry {
                Undo::NodeCreated(id) => { self.remove_node_raw(id); }
                Undo::NodeDeleted(node) => self.insert_node_raw(node),
                Undo::PropertiesReplaced { id, old } => {
                    // The node exists: it was replaced inside this same tx.
                    let _ = self.replace_props_raw(id, old);
                }
                Undo::RelCreated(id) => { self.remove_rel_raw(id); }
                Undo::RelDeleted(rel) => self.insert_rel_raw(rel),
            }
        }
    }
}

// ============================================================================
// StorageBackend impl
// ============================================================================

#[async_trait]
impl StorageBackend for MemoryBackend {
    type Tx = MemoryTx;

    async fn begin_tx(&self, mode: TxMode) -> Result<MemoryTx> {
        let id = TxId(self.inner.next_tx_id.fetch_add(1, Ordering::Relaxed) + 1);
        Ok(MemoryTx { id, mode, undo: Vec::new() })
    }

    /// Writes are already applied: commit just forgets the undo log.
    async fn commit_tx(&self, tx: MemoryTx) -> Result<()> {
        tracing::trace!(tx = %tx.id, writes = tx.undo.len(), "commit");
        Ok(())
    }

    async fn rollback_tx(&self, tx: MemoryTx) -> Result<()> {
        tracing::debug!(tx = %tx.id, writes = tx.undo.len(), "rollback");
        self.inner.undo(tx.undo);
        Ok(())
    }

    // ========================================================================
    // Node CRUD
    // ========================================================================

    async fn create_node(
        &self,
        tx: &mut MemoryTx,
        labels: &[&str],
        props: PropertyMap,
    ) -> Result<NodeId> {
        let log = tx.writable()?;
        let labels: Vec<String> = labels.iter().map(|l| l.to_string()).collect();
        self.inner.check_unique(&labels, &props, None)?;

        let id = NodeId(self.inner.next_node_id.fetch_add(1, Ordering::Relaxed) + 1);
        self.inner.insert_node_raw(Node { id, labels, properties: props });
        log.push(Undo::NodeCreated(id));
        Ok(id)
    }

    async fn get_node(&self, _tx: &MemoryTx, id: NodeId) -> Result<Option<Node>> {
        Ok(self.inner.nodes.read().get(&id).cloned())
    }

    async fn delete_node(&self, tx: &mut MemoryTx, id: NodeId) -> Result<bool> {
        let log = tx.writable()?;
        {
            let adj = self.inner.adjacency.read();
            if let Some(rels) = adj.get(&id) {
                if !rels.is_empty() {
                    return Err(Error::ConstraintViolation(format!(
                        "Cannot delete node {id} with {} relationships. Delete relationships first.",
                        rels.len()
                    )));
                }
            }
        }

        match self.inner.remove_node_raw(id) {
            Some(node) => {
                log.push(Undo::NodeDeleted(node));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn replace_node_properties(
        &self,
        tx: &mut MemoryTx,
        id: NodeId,
        props: PropertyMap,
    ) -> Result<()> {
        let log = tx.writable()?;
        let labels = self.inner.nodes.read().get(&id)
            .map(|n| n.labels.clone())
            .ok_or_else(|| Error::NotFound(format!("Node {id}")))?;
        self.inner.check_unique(&labels, &props, Some(id))?;
        let old = self.inner.replace_props_raw(id, props)?;
        log.push(Undo::PropertiesReplaced { id, old });
        Ok(())
    }

    // ========================================================================
    // Relationship CRUD
    // ========================================================================

    async fn create_relationship(
        &self,
        tx: &mut MemoryTx,
        src: NodeId,
        dst: NodeId,
        rel_type: &str,
        props: PropertyMap,
    ) -> Result<RelId> {
        let log = tx.writable()?;
        {
            let nodes = self.inner.nodes.read();
            if !nodes.contains_key(&src) {
                return Err(Error::NotFound(format!("Source node {src}")));
            }
            if !nodes.contains_key(&dst) {
                return Err(Error::NotFound(format!("Target node {dst}")));
            }
        }

        let id = RelId(self.inner.next_rel_id.fetch_add(1, Ordering::Relaxed) + 1);
        let rel = Relationship {
            id,
            src,
            dst,
            rel_type: rel_type.to_string(),
            properties: props,
        };
        self.inner.insert_rel_raw(rel);
        log.push(Undo::RelCreated(id));
        Ok(id)
    }

    async fn get_relationship(&self, _tx: &MemoryTx, id: RelId) -> Result<Option<Relationship>> {
        Ok(self.inner.relationships.read().get(&id).cloned())
    }

    async fn delete_relationship(&self, tx: &mut MemoryTx, id: RelId) -> Result<bool> {
        let log = tx.writable()?;
        match self.inner.remove_rel_raw(id) {
            Some(rel) => {
                log.push(Undo::RelDeleted(rel));
                Ok(true)
            }
            None => Ok(false),
        }
    }

    // ========================================================================
    // Traversal
    // ========================================================================

    async fn get_relationships(
        &self,
        _tx: &MemoryTx,
        node: NodeId,
        dir: Direction,
        rel_type: Option<&str>,
    ) -> Result<Vec<Relationship>> {
        let rels = self.inner.relationships.read();
        let adj = self.inner.adjacency.read();

        let mut result = Vec::new();
        for rid in adj.get(&node).map(Vec::as_slice).unwrap_or_default() {
            if let Some(rel) = rels.get(rid) {
                let matches_dir = match dir {
                    Direction::Outgoing => rel.src == node,
                    Direction::Incoming => rel.dst == node,
                    Direction::Both => true,
                };
                let matches_type = rel_type.is_none_or(|t| rel.rel_type == t);

                if matches_dir && matches_type {
                    result.push(rel.clone());
                }
            }
        }

        Ok(result)
    }

    // ========================================================================
    // Index
    // ========================================================================

    async fn create_index(&self, label: &str, property: &str, index_type: IndexType) -> Result<()> {
        let key = (label.to_owned(), property.to_owned());
        {
            let nodes = self.inner.nodes.read();
            let idx = self.inner.label_index.read();
            let mut pidx = self.inner.property_index.write();
            if !pidx.contains_key(&key) {
                let mut values: HashMap<String, Vec<NodeId>> = HashMap::new();
                for id in idx.get(label).map(Vec::as_slice).unwrap_or_default() {
                    if let Some(v) = nodes.get(id).and_then(|n| n.get_str(property)) {
                        values.entry(v.to_owned()).or_default().push(*id);
                    }
                }
                pidx.insert(key.clone(), values);
            }
        }
        if index_type == IndexType::Unique {
            let mut unique = self.inner.unique.write();
            if !unique.contains(&key) {
                unique.push(key);
            }
        }
        Ok(())
    }

    // ========================================================================
    // Schema introspection
    // ========================================================================

    async fn node_count(&self, _tx: &MemoryTx) -> Result<u64> {
        Ok(self.inner.nodes.read().len() as u64)
    }

    async fn relationship_count(&self, _tx: &MemoryTx) -> Result<u64> {
        Ok(self.inner.relationships.read().len() as u64)
    }

    // ========================================================================
    // Scan
    // ========================================================================

    async fn all_relationships(&self, _tx: &MemoryTx) -> Result<Vec<Relationship>> {
        let mut rels: Vec<Relationship> = self.inner.relationships.read().values().cloned().collect();
        rels.sort_by_key(|r| r.id);
        Ok(rels)
    }

    async fn nodes_by_property(
        &self,
        _tx: &MemoryTx,
        label: &str,
        key: &str,
        value: &Value,
    ) -> Result<Vec<Node>> {
        Ok(self.inner.lookup(label, key, value))
    }

    // ========================================================================
    // Constraints
    // ========================================================================

    async fn create_constraint(
        &self,
        label: &str,
        property: &str,
        constraint_type: ConstraintType,
    ) -> Result<()> {
        match constraint_type {
            ConstraintType::Unique => self.create_index(label, property, IndexType::Unique).await,
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::property_map::props;

    async fn unique_hgid_db() -> MemoryBackend {
        let db = MemoryBackend::new();
        db.create_constraint("PIT", "hgid", ConstraintType::Unique).await.unwrap();
        db.create_index("PIT", "uri", IndexType::Exact).await.unwrap();
        db
    }

    #[tokio::test]
    async fn test_create_and_get_node() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let id = db.create_node(&mut tx, &["PIT"], props([("name", "Amsterdam")])).await.unwrap();
        let node = db.get_node(&tx, id).await.unwrap().unwrap();

        assert_eq!(node.labels, vec!["PIT"]);
        assert_eq!(node.get("name"), Some(&Value::from("Amsterdam")));
    }

    #[tokio::test]
    async fn test_unique_constraint_rejects_duplicate() {
        let db = unique_hgid_db().await;
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        db.create_node(&mut tx, &["PIT"], props([("hgid", "tgn/1")])).await.unwrap();
        let err = db.create_node(&mut tx, &["PIT"], props([("hgid", "tgn/1")])).await;
        assert!(matches!(err, Err(Error::DuplicateKey(_))));
        assert_eq!(db.node_count(&tx).await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_property_index_follows_replacement() {
        let db = unique_hgid_db().await;
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let id = db.create_node(&mut tx, &["PIT"], props([("hgid", "a/1"), ("uri", "http://x")])).await.unwrap();
        db.replace_node_properties(&mut tx, id, props([("hgid", "a/1")])).await.unwrap();

        let by_uri = db.nodes_by_property(&tx, "PIT", "uri", &Value::from("http://x")).await.unwrap();
        assert!(by_uri.is_empty());
        let by_hgid = db.nodes_by_property(&tx, "PIT", "hgid", &Value::from("a/1")).await.unwrap();
        assert_eq!(by_hgid.len(), 1);
    }

    #[tokio::test]
    async fn test_rollback_reverts_writes() {
        let db = unique_hgid_db().await;

        let mut setup = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let a = db.create_node(&mut setup, &["PIT"], props([("hgid", "a/1"), ("name", "old")])).await.unwrap();
        let b = db.create_node(&mut setup, &["PIT"], props([("hgid", "a/2")])).await.unwrap();
        let keep = db.create_relationship(&mut setup, a, b, "hg:liesIn", PropertyMap::new()).await.unwrap();
        db.commit_tx(setup).await.unwrap();

        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        db.create_node(&mut tx, &["PIT"], props([("hgid", "a/3")])).await.unwrap();
        db.create_relationship(&mut tx, b, a, "hg:liesIn", PropertyMap::new()).await.unwrap();
        db.delete_relationship(&mut tx, keep).await.unwrap();
        db.replace_node_properties(&mut tx, a, props([("hgid", "a/1"), ("name", "new")])).await.unwrap();
        assert_eq!(tx.pending_writes(), 4);
        db.rollback_tx(tx).await.unwrap();

        let check = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert_eq!(db.node_count(&check).await.unwrap(), 2);
        let rels = db.all_relationships(&check).await.unwrap();
        assert_eq!(rels.len(), 1);
        assert_eq!(rels[0].id, keep);
        let node = db.get_node(&check, a).await.unwrap().unwrap();
        assert_eq!(node.get_str("name"), Some("old"));
        let found = db.nodes_by_property(&check, "PIT", "hgid", &Value::from("a/3")).await.unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn test_read_only_tx_rejects_writes() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        let res = db.create_node(&mut tx, &["PIT"], PropertyMap::new()).await;
        assert!(matches!(res, Err(Error::TxError(_))));
    }

    #[tokio::test]
    async fn test_cannot_delete_connected_node() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let a = db.create_node(&mut tx, &["PIT"], PropertyMap::new()).await.unwrap();
        let b = db.create_node(&mut tx, &["PIT"], PropertyMap::new()).await.unwrap();
        db.create_relationship(&mut tx, a, b, "hg:liesIn", PropertyMap::new()).await.unwrap();

        assert!(db.delete_node(&mut tx, a).await.is_err());
    }

    #[tokio::test]
    async fn test_detach_delete_node_returns_relationships() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let a = db.create_node(&mut tx, &["PIT"], PropertyMap::new()).await.unwrap();
        let b = db.create_node(&mut tx, &["PIT"], PropertyMap::new()).await.unwrap();
        db.create_relationship(&mut tx, a, b, "hg:liesIn", PropertyMap::new()).await.unwrap();
        db.create_relationship(&mut tx, b, a, "hg:absorbedBy", PropertyMap::new()).await.unwrap();

        let removed = db.detach_delete_node(&mut tx, a).await.unwrap();
        assert_eq!(removed.len(), 2);
        assert!(db.get_node(&tx, a).await.unwrap().is_none());
        assert_eq!(db.relationship_count(&tx).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_find_relationship_by_source() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let a = db.create_node(&mut tx, &["PIT"], PropertyMap::new()).await.unwrap();
        let b = db.create_node(&mut tx, &["PIT"], PropertyMap::new()).await.unwrap();
        db.create_relationship(&mut tx, a, b, "hg:liesIn", props([("source", "tgn")])).await.unwrap();

        assert!(db.find_relationship(&tx, a, b, "hg:liesIn", Some("tgn")).await.unwrap().is_some());
        assert!(db.find_relationship(&tx, a, b, "hg:liesIn", Some("geonames")).await.unwrap().is_none());
        assert!(db.find_relationship(&tx, a, b, "hg:liesIn", None).await.unwrap().is_some());
        assert!(db.find_relationship(&tx, b, a, "hg:liesIn", None).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_relationships_by_type() {
        let db = MemoryBackend::new();
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();

        let a = db.create_node(&mut tx, &["PIT"], PropertyMap::new()).await.unwrap();
        let b = db.create_node(&mut tx, &["PIT"], PropertyMap::new()).await.unwrap();
        let c = db.create_node(&mut tx, &["PIT"], PropertyMap::new()).await.unwrap();

        db.create_relationship(&mut tx, a, b, "hg:liesIn", PropertyMap::new()).await.unwrap();
        db.create_relationship(&mut tx, b, c, "hg:sameHgConcept", PropertyMap::new()).await.unwrap();
        db.create_relationship(&mut tx, a, c, "hg:liesIn", PropertyMap::new()).await.unwrap();

        assert_eq!(db.relationships_by_type(&tx, "hg:liesIn").await.unwrap().len(), 2);
        assert_eq!(db.relationships_by_type(&tx, "hg:sameHgConcept").await.unwrap().len(), 1);
        assert_eq!(db.degree(&tx, a).await.unwrap(), 2);
    }

    #[tokio::test]
    async fn test_unindexed_lookup_scans_label() {
        let db = unique_hgid_db().await;
        let mut tx = db.begin_tx(TxMode::ReadWrite).await.unwrap();
        let a = db.create_node(&mut tx, &["PIT"], props([("hgid", "a/1"), ("name", "Utrecht")])).await.unwrap();
        let b = db.create_node(&mut tx, &["Other"], props([("hgid", "a/1"), ("name", "Utrecht")])).await.unwrap();
        let r = db.create_relationship(&mut tx, a, b, "hg:liesIn", PropertyMap::new()).await.unwrap();
        db.commit_tx(tx).await.unwrap();

        let tx = db.begin_tx(TxMode::ReadOnly).await.unwrap();
        assert_eq!(db.get_relationship(&tx, r).await.unwrap().unwrap().dst, b);

        // No index on name: the lookup walks the PIT label only.
        let found = db.nodes_by_property(&tx, "PIT", "name", &Value::from("Utrecht")).await.unwrap();
        assert_eq!(found.iter().map(|n| n.id).collect::<Vec<_>>(), vec![a]);
    }
}
