//! # Traversal engine
//!
//! Groups PITs into clusters connected by the equivalence relation and
//! renders each cluster as a GeoJSON feature whose geometry is a
//! `GeometryCollection` of its members' geometries.
//!
//! Members are ordered by degree (descending), then hgid. A seed that falls
//! inside an already emitted cluster does not start a new one. Clusters
//! with no geometry at all are left out of the response.

use std::cmp::Reverse;
use std::collections::VecDeque;

use hashbrown::HashSet;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

use crate::identity;
use crate::model::{tokens, Direction, Node, NodeId, Value};
use crate::storage::StorageBackend;
use crate::taxonomy::Taxonomy;
use crate::tx::TxMode;
use crate::Result;

pub const GEOMETRY_INDEX: &str = "geometryIndex";

/// `{ "hgids": [...] }`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TraversalRequest {
    pub hgids: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TraversalResponse {
    #[serde(rename = "type")]
    pub kind: String,
    pub features: Vec<Feature>,
    pub hgids_not_found: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Feature {
    #[serde(rename = "type")]
    pub kind: String,
    pub properties: FeatureProperties,
    pub geometry: GeometryCollection,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureProperties {
    /// Type of the first member.
    #[serde(rename = "type", skip_serializing_if = "Option::is_none")]
    pub pit_type: Option<String>,
    pub pits: Vec<Map<String, Json>>,
    pub relations: Vec<FeatureRelation>,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FeatureRelation {
    pub from: String,
    pub to: String,
    pub label: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GeometryCollection {
    #[serde(rename = "type")]
    pub kind: String,
    pub geometries: Vec<Json>,
}

/// Read-only cluster queries against a backend.
pub struct TraversalEngine<'a, B: StorageBackend> {
    backend: &'a B,
    taxonomy: &'a Taxonomy,
}

impl<'a, B: StorageBackend> TraversalEngine<'a, B> {
    pub fn new(backend: &'a B, taxonomy: &'a Taxonomy) -> Self {
        Self { backend, taxonomy }
    }

    pub async fn traverse(&self, request: &TraversalRequest) -> Result<TraversalResponse> {
        let tx = self.backend.begin_tx(TxMode::ReadOnly).await?;
        match self.traverse_in(&tx, request).await {
            Ok(response) => {
                self.backend.commit_tx(tx).await?;
                Ok(response)
            }
            Err(e) => {
                self.backend.rollback_tx(tx).await?;
                Err(e)
            }
        }
    }

    async fn traverse_in(&self, tx: &B::Tx, request: &TraversalRequest) -> Result<TraversalResponse> {
        let mut visited = HashSet::new();
        let mut features = Vec::new();
        let mut not_found: Vec<String> = Vec::new();

        for hgid in &request.hgids {
            let Some(seed) = identity::resolve_hgid(self.backend, tx, hgid).await? else {
                if !not_found.contains(hgid) {
                    not_found.push(hgid.clone());
                }
                continue;
            };
            if !visited.insert(seed.id) {
                continue;
            }

            let members = self.cluster(tx, seed, &mut visited).await?;
            tracing::debug!(%hgid, members = members.len(), "traversed cluster");
            if let Some(feature) = self.feature(tx, members).await? {
                features.push(feature);
            }
        }

        Ok(TraversalResponse {
            kind: "FeatureCollection".into(),
            features,
            hgids_not_found: not_found,
        })
    }

    /// Breadth-first walk over equivalence edges in both directions.
    async fn cluster(&self, tx: &B::Tx, seed: Node, visited: &mut HashSet<NodeId>) -> Result<Vec<Node>> {
        let equivalence = self.taxonomy.equivalence().label();
        let mut members = Vec::new();
        let mut queue = VecDeque::from([seed]);

        while let Some(node) = queue.pop_front() {
            for rel in self.backend.get_relationships(tx, node.id, Direction::Both, Some(equivalence)).await? {
                let Some(other) = rel.other_node(node.id) else { continue };
                if visited.insert(other) {
                    if let Some(next) = self.backend.get_node(tx, other).await? {
                        queue.push_back(next);
                    }
                }
            }
            members.push(node);
        }

        Ok(members)
    }

    async fn feature(&self, tx: &B::Tx, members: Vec<Node>) -> Result<Option<Feature>> {
        let mut ranked = Vec::with_capacity(members.len());
        for node in members {
            let degree = self.backend.degree(tx, node.id).await?;
            ranked.push((degree, node));
        }
        ranked.sort_by(|(da, a), (db, b)| {
            (Reverse(*da), a.hgid().unwrap_or_default())
                .cmp(&(Reverse(*db), b.hgid().unwrap_or_default()))
        });

        let in_cluster: HashSet<_> = ranked.iter().map(|(_, n)| n.id).collect();
        let mut geometries = Vec::new();
        let mut relations = Vec::new();
        let mut seen = HashSet::new();
        let mut pits = Vec::with_capacity(ranked.len());

        for (_, node) in &ranked {
            let mut record = pit_record(node, &mut geometries);

            let mut outgoing: Map<String, Json> = Map::new();
            for rel in self.backend.get_relationships(tx, node.id, Direction::Outgoing, None).await? {
                if !in_cluster.contains(&rel.dst) {
                    continue;
                }
                let Some(target) = self.backend.get_node(tx, rel.dst).await? else { continue };
                let relation = FeatureRelation {
                    from: node.hgid().unwrap_or_default().to_owned(),
                    to: target.hgid().unwrap_or_default().to_owned(),
                    label: rel.rel_type,
                };
                // Several sources may assert the same relation.
                if !seen.insert(relation.clone()) {
                    continue;
                }
                if let Json::Array(targets) = outgoing
                    .entry(relation.label.clone())
                    .or_insert_with(|| Json::Array(Vec::new()))
                {
                    targets.push(Json::String(relation.to.clone()));
                }
                relations.push(relation);
            }
            if !outgoing.is_empty() {
                record.insert("relations".into(), Json::Object(outgoing));
            }
            pits.push(record);
        }

        if geometries.is_empty() {
            return Ok(None);
        }

        Ok(Some(Feature {
            kind: "Feature".into(),
            properties: FeatureProperties {
                pit_type: ranked
                    .first()
                    .and_then(|(_, n)| n.get_str(tokens::pit::TYPE))
                    .map(str::to_owned),
                pits,
                relations,
            },
            geometry: GeometryCollection {
                kind: "GeometryCollection".into(),
                geometries,
            },
        }))
    }
}

/// JSON record of one PIT. Its geometry is moved into `geometries` and
/// replaced by its index there; serialized `data` is parsed back.
fn pit_record(node: &Node, geometries: &mut Vec<Json>) -> Map<String, Json> {
    let mut keys: Vec<&String> = node.properties.keys().collect();
    keys.sort();

    let mut record = Map::new();
    let mut geometry_index = -1i64;
    for key in keys {
        let value = &node.properties[key];
        match key.as_str() {
            tokens::pit::GEOMETRY => {
                geometry_index = geometries.len() as i64;
                geometries.push(parse_embedded(node, key, value));
            }
            tokens::pit::DATA => {
                record.insert(key.clone(), parse_embedded(node, key, value));
            }
            _ => {
                record.insert(key.clone(), value.to_json());
            }
        }
    }
    record.insert(GEOMETRY_INDEX.into(), Json::from(geometry_index));
    record
}

fn parse_embedded(node: &Node, key: &str, value: &Value) -> Json {
    let Some(text) = value.as_str() else {
        return value.to_json();
    };
    match serde_json::from_str(text) {
        Ok(json) => json,
        Err(e) => {
            tracing::warn!(hgid = node.hgid().unwrap_or_default(), %key, error = %e, "stored JSON does not parse");
            Json::String(text.to_owned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::PropertyMap;

    #[test]
    fn test_pit_record_extracts_geometry() {
        let node = Node::new(NodeId(1))
            .with_property("hgid", "tgn/1")
            .with_property("geometry", r#"{"type":"Point","coordinates":[4.9,52.4]}"#)
            .with_property("data", r#"{"population":3}"#);
        let mut geometries = vec![Json::Null];

        let record = pit_record(&node, &mut geometries);
        assert_eq!(record[GEOMETRY_INDEX], 1);
        assert_eq!(geometries[1]["type"], "Point");
        assert_eq!(record["data"]["population"], 3);
        assert!(!record.contains_key("geometry"));
    }

    #[test]
    fn test_pit_record_without_geometry() {
        let node = Node { id: NodeId(1), labels: vec!["PIT".into()], properties: PropertyMap::new() };
        let mut geometries = Vec::new();
        let record = pit_record(&node, &mut geometries);
        assert_eq!(record[GEOMETRY_INDEX], -1);
        assert!(geometries.is_empty());
    }

    #[test]
    fn test_bad_embedded_json_kept_as_string() {
        let node = Node::new(NodeId(1)).with_property("data", "{not json");
        let record = pit_record(&node, &mut Vec::new());
        assert_eq!(record["data"], "{not json");
    }
}
