//! Migration format round trips against a populated engine.

use cidgraph::migrate::GraphData;
use cidgraph::{GraphEngine, PropertyMap, Value};

fn populated_engine() -> GraphEngine {
    let engine = GraphEngine::new();
    let alice = engine.create_node(
        vec!["Person".into()],
        [
            ("name".to_string(), Value::from("Alice")),
            ("age".to_string(), Value::from(30)),
            ("tags".to_string(), Value::from(vec!["admin", "eng"])),
        ]
        .into_iter()
        .collect(),
    );
    let bob = engine.create_node(
        vec!["Person".into()],
        [("name".to_string(), Value::from("Bob"))].into_iter().collect(),
    );
    engine
        .create_relationship(
            "KNOWS",
            &alice.id,
            &bob.id,
            [("since".to_string(), Value::from(2020))].into_iter().collect(),
        )
        .unwrap();
    engine
}

// ============================================================================
// JSON — canonical round trip
// ============================================================================

#[test]
fn test_json_round_trip_structural_equality() {
    let engine = populated_engine();
    let exported = GraphData::from_engine(&engine);

    let text = exported.to_json_string().unwrap();
    let imported = GraphData::from_json_str(&text).unwrap();
    assert_eq!(imported, exported);

    // Importing into a fresh engine reproduces the live index.
    let fresh = GraphEngine::new();
    imported.into_engine(&fresh);
    assert_eq!(fresh.all_nodes(), engine.all_nodes());
    assert_eq!(fresh.all_relationships(), engine.all_relationships());
}

#[test]
fn test_json_wire_shape() {
    let engine = populated_engine();
    let text = GraphData::from_engine(&engine).to_json_string().unwrap();
    let value: serde_json::Value = serde_json::from_str(&text).unwrap();

    assert_eq!(value["metadata"]["node_count"], 2);
    assert_eq!(value["metadata"]["relationship_count"], 1);
    assert_eq!(value["metadata"]["version"], "1.0");
    assert!(value["nodes"][0]["id"].as_str().unwrap().starts_with("node-"));
    assert_eq!(value["relationships"][0]["type"], "KNOWS");
    assert_eq!(value["relationships"][0]["properties"]["since"], 2020);
}

// ============================================================================
// Pajek
// ============================================================================

#[test]
fn test_pajek_export_import_structure() {
    let engine = populated_engine();
    let exported = GraphData::from_engine(&engine);

    let text = exported.to_pajek();
    let imported = GraphData::from_pajek(&text).unwrap();

    assert_eq!(imported.nodes.len(), exported.nodes.len());
    assert_eq!(imported.relationships.len(), exported.relationships.len());
    // Vertex identity survives; properties do not (Pajek is structural).
    let ids: Vec<_> = imported.nodes.iter().map(|n| n.id.clone()).collect();
    for node in &exported.nodes {
        assert!(ids.contains(&node.id));
    }
    assert_eq!(imported.relationships[0].rel_type, "KNOWS");
}

#[test]
fn test_pajek_comments_and_arcs_sections() {
    let text = "\
% exported by some other tool
*Vertices 2
1 \"node-x\"
2 \"node-y\"
% edges follow
*Arcs
1 2 \"CITES\"
";
    let imported = GraphData::from_pajek(text).unwrap();
    assert_eq!(imported.nodes.len(), 2);
    assert_eq!(imported.relationships.len(), 1);
    assert_eq!(imported.relationships[0].rel_type, "CITES");
}

// ============================================================================
// CAR (feature-gated)
// ============================================================================

#[cfg(feature = "car")]
#[test]
fn test_car_round_trip() {
    let engine = populated_engine();
    let exported = GraphData::from_engine(&engine);

    let bytes = exported.to_car().unwrap();
    let imported = GraphData::from_car(&bytes).unwrap();
    assert_eq!(imported, exported);
}

#[cfg(not(feature = "car"))]
#[test]
fn test_car_reports_missing_dependency() {
    let engine = populated_engine();
    let err = GraphData::from_engine(&engine).to_car().unwrap_err();
    assert!(matches!(err, cidgraph::Error::MissingDependency(_)));
}

// ============================================================================
// Engine snapshot vs migration export agree
// ============================================================================

#[test]
fn test_export_counts_match_engine_stats() {
    let engine = populated_engine();
    let stats = engine.get_stats();
    let exported = GraphData::from_engine(&engine);
    assert_eq!(exported.metadata.node_count, stats.node_count);
    assert_eq!(exported.metadata.relationship_count, stats.relationship_count);
}
