//! Integration tests for the graph store: persistence, visibility and
//! the query/projection surface.

use std::fs;

use taleweave::graph::{GraphStats, KnowledgeGraph, NewRelation, SECRET_MARKER, ViewerMode};
use tempfile::TempDir;

// ── Helpers ───────────────────────────────────────────────────────────────────

fn saga() -> KnowledgeGraph {
    let mut g = KnowledgeGraph::new();
    g.add_relation(NewRelation::new("Iren", "Castellan Voss", "serves", 1).desc("sworn at midwinter"));
    g.add_relation(NewRelation::new("Iren", "Castellan Voss", "spies on", 2).revealed_at(9).secret(true));
    g.add_relation(NewRelation::new("Castellan Voss", "Iren", "distrusts", 4));
    g.add_relation(NewRelation::new("洛河", "Iren", "教导", 3));
    g
}

fn multiset(g: &KnowledgeGraph) -> Vec<(String, String, String, String, i64, i64, bool)> {
    let mut rows: Vec<_> = g
        .edges()
        .map(|e| {
            (
                e.source.to_string(),
                e.target.to_string(),
                e.edge.relation.clone(),
                e.edge.desc.clone(),
                e.edge.start_chapter,
                e.edge.reveal_chapter,
                e.edge.is_secret,
            )
        })
        .collect();
    rows.sort();
    rows
}

// ── Persistence ───────────────────────────────────────────────────────────────

#[test]
fn save_then_load_preserves_nodes_and_edges() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("projects").join("saga_graph.json");
    let g = saga();
    g.save(&path);

    let loaded = KnowledgeGraph::load(&path);
    assert_eq!(loaded.nodes().collect::<Vec<_>>(), g.nodes().collect::<Vec<_>>());
    assert_eq!(multiset(&loaded), multiset(&g));
}

#[test]
fn saved_file_is_node_link_json_with_unescaped_text() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("g.json");
    let mut g = KnowledgeGraph::new();
    g.add_relation(NewRelation::new("A", "B", "r", 1));
    g.add_relation(NewRelation::new("A", "B", "r", 1));
    g.add_relation(NewRelation::new("洛河", "A", "教导", 2));
    g.save(&path);

    let raw = fs::read_to_string(&path).unwrap();
    assert!(raw.contains("洛河"));
    let v: serde_json::Value = serde_json::from_str(&raw).unwrap();
    assert_eq!(v["directed"], true);
    assert_eq!(v["multigraph"], true);
    assert_eq!(v["nodes"][0]["id"], "A");
    assert_eq!(v["links"][0]["key"], 0);
    assert_eq!(v["links"][1]["key"], 1);
    assert_eq!(v["links"][2]["key"], 0);
}

#[test]
fn loads_files_written_by_other_tools() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("legacy.json");
    fs::write(
        &path,
        r#"{
            "directed": true, "multigraph": true, "graph": {},
            "nodes": [{"id": "Alice"}, {"id": "Lonely"}],
            "links": [
                {"source": "Alice", "target": "Bob", "key": 3, "relation": "knows", "start_chapter": 2, "weight": 0.4},
                {"source": "Alice", "target": "Carol", "relation": "owes", "reveal_chapter": 5, "is_secret": 1},
                {"source": " ", "target": "Bob", "relation": "ghost"}
            ]
        }"#,
    )
    .unwrap();

    let g = KnowledgeGraph::load(&path);
    assert!(g.contains_node("Lonely"));
    assert!(g.contains_node("Bob"));
    assert_eq!(g.edge_count(), 2);

    let out = g.successors("Alice");
    assert_eq!(out[0].1.reveal_chapter, 2);
    assert_eq!(out[1].1.start_chapter, 0);
    assert_eq!(out[1].1.reveal_chapter, 5);
    assert!(out[1].1.is_secret);
}

#[test]
fn missing_or_corrupt_file_loads_empty() {
    let dir = TempDir::new().unwrap();
    assert!(KnowledgeGraph::load(&dir.path().join("absent.json")).is_empty());

    let bad = dir.path().join("bad.json");
    fs::write(&bad, "{ this is not json").unwrap();
    assert!(KnowledgeGraph::load(&bad).is_empty());
}

// ── Visibility & query ────────────────────────────────────────────────────────

#[test]
fn reader_view_grows_with_chapter() {
    let g = saga();
    let at = |ch| g.query_context("Iren", ch, ViewerMode::Reader);

    assert_eq!(at(0), "");
    assert_eq!(at(1), "- Iren serves Castellan Voss (sworn at midwinter)");
    assert_eq!(at(8), at(1));
    assert_eq!(
        at(9),
        "- Iren serves Castellan Voss (sworn at midwinter)\n- Iren spies on Castellan Voss"
    );
}

#[test]
fn author_view_marks_secrets() {
    let g = saga();
    let text = g.query_context("Iren", 0, ViewerMode::Author);
    assert_eq!(
        text,
        format!("- Iren serves Castellan Voss (sworn at midwinter)\n- Iren spies on Castellan Voss{SECRET_MARKER}")
    );
}

#[test]
fn parallel_edges_are_all_reported() {
    let mut g = KnowledgeGraph::new();
    g.add_relation(NewRelation::new("A", "B", "meets", 1));
    g.add_relation(NewRelation::new("A", "B", "meets", 1));
    assert_eq!(g.query_context("A", 1, ViewerMode::Reader).lines().count(), 2);
    assert_eq!(g.degree("B"), Some(2));
}

// ── Projection & stats ────────────────────────────────────────────────────────

#[test]
fn projection_matches_renderer_contract() {
    let v = serde_json::to_value(saga().projection()).unwrap();
    let nodes = v["nodes"].as_array().unwrap();
    assert_eq!(nodes.len(), 3);
    let iren = nodes.iter().find(|n| n["name"] == "Iren").unwrap();
    // 2 out + 1 in + 1 in
    assert_eq!(iren["symbolSize"], 22);
    assert_eq!(iren["category"], 0);

    let links = v["links"].as_array().unwrap();
    assert_eq!(links.len(), 4);
    assert_eq!(links[1]["value"], "spies on");
    assert_eq!(links[1]["lineStyle"]["width"], 2);
    assert_eq!(links[0]["lineStyle"]["width"], 1);
}

#[test]
fn stats_summarise_the_graph() {
    assert_eq!(
        saga().stats(),
        GraphStats {
            nodes: 3,
            edges: 4,
            secret_edges: 1,
            max_chapter: 4,
        }
    );
}
