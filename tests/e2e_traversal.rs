//! End-to-end tests for cluster traversal.

use std::sync::Arc;

use histograph::{Histograph, MemoryBackend, MemoryRejectionLog, Task, TraversalRequest};
use pretty_assertions::assert_eq;
use serde_json::{json, Value as Json};

fn point(lon: f64, lat: f64) -> Json {
    json!({ "type": "Point", "coordinates": [lon, lat] })
}

fn add_pit(id: &str, pit_type: &str, geometry: Option<Json>) -> Task {
    let mut data = json!({ "id": id, "name": id.to_uppercase(), "type": pit_type });
    if let Some(geometry) = geometry {
        data["geometry"] = geometry;
    }
    Task::from_json(&json!({ "source": "tgn", "action": "add", "type": "pit", "data": data })).unwrap()
}

fn same(from: &str, to: &str) -> Task {
    Task::from_json(&json!({
        "source": "tgn", "action": "add", "type": "relation",
        "data": { "from": from, "to": to, "label": "hg:sameHgConcept" }
    }))
    .unwrap()
}

async fn open() -> Histograph<MemoryBackend> {
    Histograph::open_memory(Arc::new(MemoryRejectionLog::new())).await.unwrap()
}

fn request(hgids: &[&str]) -> TraversalRequest {
    TraversalRequest { hgids: hgids.iter().map(|s| s.to_string()).collect() }
}

async fn seeded(tasks: Vec<Task>) -> Histograph<MemoryBackend> {
    let graph = open().await;
    for task in &tasks {
        graph.apply(task).await.unwrap();
    }
    graph
}

fn hgids(pits: &[serde_json::Map<String, Json>]) -> Vec<&str> {
    pits.iter().map(|p| p["hgid"].as_str().unwrap()).collect()
}

#[tokio::test]
async fn test_single_pit_feature_shape() {
    let graph = open().await;
    let task = Task::parse(r#"{
        "source": "tgn", "action": "add", "type": "pit",
        "data": { "id": "1", "name": "A", "type": "hg:Place",
                  "geometry": {"type": "Point", "coordinates": [4.9, 52.37]},
                  "data": {"k": 1} }
    }"#).unwrap();
    graph.apply(&task).await.unwrap();

    let response = graph.traverse(&request(&["tgn/1"])).await.unwrap();
    assert_eq!(
        serde_json::to_value(&response).unwrap(),
        json!({
            "type": "FeatureCollection",
            "features": [{
                "type": "Feature",
                "properties": {
                    "type": "hg:Place",
                    "pits": [{
                        "data": {"k": 1},
                        "geometryIndex": 0,
                        "hgid": "tgn/1",
                        "name": "A",
                        "source": "tgn",
                        "type": "hg:Place"
                    }],
                    "relations": []
                },
                "geometry": {
                    "type": "GeometryCollection",
                    "geometries": [{"type": "Point", "coordinates": [4.9, 52.37]}]
                }
            }],
            "hgids_not_found": []
        })
    );
}

#[tokio::test]
async fn test_seed_inside_emitted_cluster_is_skipped() {
    let graph = seeded(vec![
        add_pit("a", "hg:Place", Some(point(1.0, 1.0))),
        add_pit("b", "hg:Place", None),
        same("a", "b"),
    ])
    .await;

    let response = graph.traverse(&request(&["tgn/a", "tgn/b"])).await.unwrap();
    assert_eq!(response.features.len(), 1);
    assert_eq!(response.features[0].properties.pits.len(), 2);

    let response = graph.traverse(&request(&["tgn/b"])).await.unwrap();
    assert_eq!(response.features.len(), 1);
}

#[tokio::test]
async fn test_cluster_without_geometry_dropped() {
    let graph = seeded(vec![
        add_pit("a", "hg:Place", None),
        add_pit("b", "hg:Place", None),
        add_pit("c", "hg:Place", Some(point(2.0, 2.0))),
        same("a", "b"),
    ])
    .await;

    let response = graph.traverse(&request(&["tgn/a", "tgn/c"])).await.unwrap();
    assert_eq!(response.features.len(), 1);
    assert_eq!(hgids(&response.features[0].properties.pits), vec!["tgn/c"]);
    assert!(response.hgids_not_found.is_empty());
}

#[tokio::test]
async fn test_geometries_and_indexes() {
    let graph = seeded(vec![
        add_pit("a", "hg:Place", Some(point(1.0, 1.0))),
        add_pit("b", "hg:Place", None),
        add_pit("c", "hg:Place", Some(point(3.0, 3.0))),
        same("a", "b"),
        same("b", "c"),
    ])
    .await;

    let response = graph.traverse(&request(&["tgn/a"])).await.unwrap();
    let feature = &response.features[0];
    assert_eq!(feature.geometry.geometries.len(), 2);

    for pit in &feature.properties.pits {
        let index = pit["geometryIndex"].as_i64().unwrap();
        if pit["hgid"] == "tgn/b" {
            assert_eq!(index, -1);
        } else {
            let geometry = &feature.geometry.geometries[index as usize];
            let expected = if pit["hgid"] == "tgn/a" { 1.0 } else { 3.0 };
            assert_eq!(geometry["coordinates"][0], expected);
        }
        assert!(!pit.contains_key("geometry"));
    }
}

#[tokio::test]
async fn test_members_ordered_by_degree_then_hgid() {
    // tgn/m carries both equivalence edges, its two peers tie.
    let graph = seeded(vec![
        add_pit("zz", "hg:Street", Some(point(0.0, 0.0))),
        add_pit("m", "hg:Place", Some(point(1.0, 1.0))),
        add_pit("aa", "hg:Building", None),
        same("m", "zz"),
        same("m", "aa"),
    ])
    .await;

    let response = graph.traverse(&request(&["tgn/zz"])).await.unwrap();
    let properties = &response.features[0].properties;
    assert_eq!(hgids(&properties.pits), vec!["tgn/m", "tgn/aa", "tgn/zz"]);
    assert_eq!(properties.pit_type.as_deref(), Some("hg:Place"));

    let relations = &properties.pits[0]["relations"];
    assert_eq!(relations["hg:sameHgConcept"], json!(["tgn/zz", "tgn/aa"]));
    assert_eq!(relations["hga:typeIdentical"].as_array().unwrap().len(), 2);
    assert!(properties.pits[1].get("relations").is_none());

    // Asserted and inferred relations among members, each listed once.
    assert_eq!(properties.relations.len(), 6);
    assert!(properties.relations.iter().all(|r| r.from == "tgn/m"));
}

#[tokio::test]
async fn test_unknown_seeds_reported_once() {
    let graph = seeded(vec![add_pit("a", "hg:Place", Some(point(1.0, 1.0)))]).await;

    let response = graph
        .traverse(&request(&["tgn/missing", "tgn/a", "tgn/missing", "geonames/1"]))
        .await
        .unwrap();
    assert_eq!(response.features.len(), 1);
    assert_eq!(response.hgids_not_found, vec!["tgn/missing".to_string(), "geonames/1".to_string()]);
}

#[tokio::test]
async fn test_empty_request() {
    let graph = open().await;
    let response = graph.traverse(&request(&[])).await.unwrap();
    assert_eq!(response.kind, "FeatureCollection");
    assert!(response.features.is_empty());
    assert!(response.hgids_not_found.is_empty());
}

#[tokio::test]
async fn test_relation_from_two_sources_listed_once() {
    let also = Task::from_json(&json!({
        "source": "geonames", "action": "add", "type": "relation",
        "data": { "from": "tgn/a", "to": "tgn/b", "label": "hg:sameHgConcept" }
    }))
    .unwrap();
    let graph = seeded(vec![
        add_pit("a", "hg:Place", Some(point(1.0, 1.0))),
        add_pit("b", "hg:Place", None),
        same("a", "b"),
        also,
    ])
    .await;

    let response = graph.traverse(&request(&["tgn/a"])).await.unwrap();
    let properties = &response.features[0].properties;
    let same_hg: Vec<_> = properties.relations.iter().filter(|r| r.label == "hg:sameHgConcept").collect();
    assert_eq!(same_hg.len(), 1);
    assert_eq!(properties.pits[0]["relations"]["hg:sameHgConcept"], json!(["tgn/b"]));
}
