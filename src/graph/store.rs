//! In-memory directed multigraph keyed by entity label.
//!
//! Nodes live in an insertion-ordered arena and edges in a flat list of
//! records referencing node ids, so iteration and persistence order is
//! always insertion order. Parallel edges between the same pair are kept.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

type NodeId = usize;

/// Position of an edge in the store's edge list.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EdgeId(usize);

impl EdgeId {
    pub fn index(self) -> usize {
        self.0
    }
}

/// Attributes carried by one relation edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    pub relation: String,
    pub desc: String,
    /// Chapter at which the fact was extracted.
    pub start_chapter: i64,
    /// First chapter at which a reader may see the fact.
    pub reveal_chapter: i64,
    /// Foreshadowed fact; only annotated in author-mode output.
    pub is_secret: bool,
}

/// Input to [`KnowledgeGraph::add_relation`].
#[derive(Debug, Clone, PartialEq)]
pub struct NewRelation {
    pub source: String,
    pub target: String,
    pub relation: String,
    pub start_chapter: i64,
    /// Defaults to `start_chapter` when `None`.
    pub reveal_chapter: Option<i64>,
    pub is_secret: bool,
    pub desc: String,
}

impl NewRelation {
    pub fn new(
        source: impl Into<String>,
        target: impl Into<String>,
        relation: impl Into<String>,
        start_chapter: i64,
    ) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
            relation: relation.into(),
            start_chapter,
            reveal_chapter: None,
            is_secret: false,
            desc: String::new(),
        }
    }

    pub fn revealed_at(mut self, chapter: i64) -> Self {
        self.reveal_chapter = Some(chapter);
        self
    }

    pub fn secret(mut self, is_secret: bool) -> Self {
        self.is_secret = is_secret;
        self
    }

    pub fn desc(mut self, desc: impl Into<String>) -> Self {
        self.desc = desc.into();
        self
    }

    fn edge(&self) -> Edge {
        Edge {
            relation: self.relation.clone(),
            desc: self.desc.clone(),
            start_chapter: self.start_chapter,
            reveal_chapter: self.reveal_chapter.unwrap_or(self.start_chapter),
            is_secret: self.is_secret,
        }
    }
}

#[derive(Debug, Clone)]
struct EdgeRecord {
    source: NodeId,
    target: NodeId,
    edge: Edge,
}

/// An edge together with its endpoint labels.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct EdgeView<'a> {
    pub source: &'a str,
    pub target: &'a str,
    pub edge: &'a Edge,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
pub struct GraphStats {
    pub nodes: usize,
    pub edges: usize,
    pub secret_edges: usize,
    /// Highest `start_chapter` seen, 0 for an empty graph.
    pub max_chapter: i64,
}

#[derive(Debug, Clone, Default)]
pub struct KnowledgeGraph {
    labels: Vec<String>,
    index: HashMap<String, NodeId>,
    edges: Vec<EdgeRecord>,
    /// Outgoing edge ids per node, in insertion order.
    outgoing: Vec<Vec<EdgeId>>,
    in_degree: Vec<usize>,
}

impl KnowledgeGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a relation. Endpoints are trimmed; if either is empty the
    /// call is a no-op and `None` is returned.
    pub fn add_relation(&mut self, rel: NewRelation) -> Option<EdgeId> {
        let source = rel.source.trim();
        let target = rel.target.trim();
        if source.is_empty() || target.is_empty() {
            return None;
        }

        let s = self.ensure_node(source);
        let t = self.ensure_node(target);
        let id = EdgeId(self.edges.len());
        self.edges.push(EdgeRecord { source: s, target: t, edge: rel.edge() });
        self.outgoing[s].push(id);
        self.in_degree[t] += 1;
        Some(id)
    }

    /// Add a node with no edges. Returns `false` for an empty label.
    pub fn add_node(&mut self, label: &str) -> bool {
        let label = label.trim();
        if label.is_empty() {
            return false;
        }
        self.ensure_node(label);
        true
    }

    fn ensure_node(&mut self, label: &str) -> NodeId {
        if let Some(&id) = self.index.get(label) {
            return id;
        }
        let id = self.labels.len();
        self.labels.push(label.to_string());
        self.index.insert(label.to_string(), id);
        self.outgoing.push(Vec::new());
        self.in_degree.push(0);
        id
    }

    /// Whether an edge with exactly these endpoints and attributes exists.
    pub fn contains_edge(&self, rel: &NewRelation) -> bool {
        let (Some(&s), Some(&t)) = (self.index.get(rel.source.trim()), self.index.get(rel.target.trim()))
        else {
            return false;
        };
        let wanted = rel.edge();
        self.outgoing[s].iter().any(|id| {
            let rec = &self.edges[id.0];
            rec.target == t && rec.edge == wanted
        })
    }

    /// Outgoing edges of `entity` in insertion order, paired with the
    /// neighbour label. Empty when the entity is unknown.
    pub fn successors(&self, entity: &str) -> Vec<(&str, &Edge)> {
        let Some(&id) = self.index.get(entity.trim()) else {
            return Vec::new();
        };
        self.outgoing[id]
            .iter()
            .map(|e| {
                let rec = &self.edges[e.0];
                (self.labels[rec.target].as_str(), &rec.edge)
            })
            .collect()
    }

    pub fn contains_node(&self, entity: &str) -> bool {
        self.index.contains_key(entity.trim())
    }

    /// In + out degree, counting parallel edges. `None` for unknown nodes.
    pub fn degree(&self, entity: &str) -> Option<usize> {
        self.index.get(entity.trim()).map(|&id| self.degree_of(id))
    }

    pub(crate) fn degree_of(&self, id: NodeId) -> usize {
        self.outgoing[id].len() + self.in_degree[id]
    }

    /// Node labels in insertion order.
    pub fn nodes(&self) -> impl Iterator<Item = &str> + '_ {
        self.labels.iter().map(String::as_str)
    }

    /// All edges in insertion order.
    pub fn edges(&self) -> impl Iterator<Item = EdgeView<'_>> + '_ {
        self.edges.iter().map(|rec| EdgeView {
            source: &self.labels[rec.source],
            target: &self.labels[rec.target],
            edge: &rec.edge,
        })
    }

    pub fn edge(&self, id: EdgeId) -> Option<EdgeView<'_>> {
        self.edges.get(id.0).map(|rec| EdgeView {
            source: &self.labels[rec.source],
            target: &self.labels[rec.target],
            edge: &rec.edge,
        })
    }

    pub fn node_count(&self) -> usize {
        self.labels.len()
    }

    pub fn edge_count(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.labels.is_empty()
    }

    pub fn stats(&self) -> GraphStats {
        GraphStats {
            nodes: self.node_count(),
            edges: self.edge_count(),
            secret_edges: self.edges.iter().filter(|r| r.edge.is_secret).count(),
            max_chapter: self.edges.iter().map(|r| r.edge.start_chapter).max().unwrap_or(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn add_relation_creates_nodes_and_edge() {
        let mut g = KnowledgeGraph::new();
        let id = g.add_relation(NewRelation::new("Alice", "Bob", "knows", 1));
        assert!(id.is_some());
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.edge_count(), 1);
        assert!(g.contains_node("Alice"));
        assert!(g.contains_node("Bob"));
    }

    #[test]
    fn reveal_defaults_to_start_chapter() {
        let mut g = KnowledgeGraph::new();
        let id = g.add_relation(NewRelation::new("A", "B", "ally", 4)).unwrap();
        assert_eq!(g.edge(id).unwrap().edge.reveal_chapter, 4);

        let id = g
            .add_relation(NewRelation::new("A", "B", "traitor", 4).revealed_at(9).secret(true))
            .unwrap();
        let view = g.edge(id).unwrap();
        assert_eq!(view.edge.reveal_chapter, 9);
        assert!(view.edge.is_secret);
    }

    #[test]
    fn empty_endpoints_are_dropped() {
        let mut g = KnowledgeGraph::new();
        assert!(g.add_relation(NewRelation::new("", "Bob", "knows", 1)).is_none());
        assert!(g.add_relation(NewRelation::new("Alice", "   ", "knows", 1)).is_none());
        assert!(g.is_empty());
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn endpoints_are_trimmed() {
        let mut g = KnowledgeGraph::new();
        g.add_relation(NewRelation::new("  Alice ", "Bob\n", "knows", 1));
        g.add_relation(NewRelation::new("Alice", "Bob", "trusts", 2));
        assert_eq!(g.node_count(), 2);
        assert_eq!(g.nodes().collect::<Vec<_>>(), vec!["Alice", "Bob"]);
    }

    #[test]
    fn parallel_edges_are_retained() {
        let mut g = KnowledgeGraph::new();
        g.add_relation(NewRelation::new("A", "B", "ally", 1));
        g.add_relation(NewRelation::new("A", "B", "ally", 5));
        assert_eq!(g.edge_count(), 2);
        let chapters: Vec<i64> = g.successors("A").iter().map(|(_, e)| e.start_chapter).collect();
        assert_eq!(chapters, vec![1, 5]);
    }

    #[test]
    fn successors_in_insertion_order() {
        let mut g = KnowledgeGraph::new();
        g.add_relation(NewRelation::new("A", "C", "r1", 1));
        g.add_relation(NewRelation::new("B", "A", "r2", 1));
        g.add_relation(NewRelation::new("A", "B", "r3", 1));
        g.add_relation(NewRelation::new("A", "C", "r4", 1));
        let got: Vec<(&str, &str)> = g
            .successors("A")
            .into_iter()
            .map(|(n, e)| (n, e.relation.as_str()))
            .collect();
        assert_eq!(got, vec![("C", "r1"), ("B", "r3"), ("C", "r4")]);
        assert!(g.successors("Nobody").is_empty());
    }

    #[test]
    fn degree_counts_both_directions_and_parallels() {
        let mut g = KnowledgeGraph::new();
        g.add_relation(NewRelation::new("A", "B", "r", 1));
        g.add_relation(NewRelation::new("A", "B", "r", 2));
        g.add_relation(NewRelation::new("C", "A", "r", 1));
        assert_eq!(g.degree("A"), Some(3));
        assert_eq!(g.degree("B"), Some(2));
        assert_eq!(g.degree("Z"), None);
    }

    #[test]
    fn self_loop_counts_twice() {
        let mut g = KnowledgeGraph::new();
        g.add_relation(NewRelation::new("Narrator", "Narrator", "doubts", 1));
        assert_eq!(g.degree("Narrator"), Some(2));
        assert_eq!(g.node_count(), 1);
    }

    #[test]
    fn contains_edge_matches_full_attributes() {
        let mut g = KnowledgeGraph::new();
        let rel = NewRelation::new("A", "B", "ally", 1).desc("sworn");
        g.add_relation(rel.clone());
        assert!(g.contains_edge(&rel));
        assert!(g.contains_edge(&NewRelation::new(" A ", "B", "ally", 1).desc("sworn")));
        assert!(!g.contains_edge(&NewRelation::new("A", "B", "ally", 2).desc("sworn")));
        assert!(!g.contains_edge(&NewRelation::new("B", "A", "ally", 1).desc("sworn")));
    }

    #[test]
    fn stats_summarise_graph() {
        let mut g = KnowledgeGraph::new();
        assert_eq!(g.stats(), GraphStats::default());
        g.add_relation(NewRelation::new("A", "B", "r", 3));
        g.add_relation(NewRelation::new("B", "C", "r", 7).secret(true));
        let s = g.stats();
        assert_eq!((s.nodes, s.edges, s.secret_edges, s.max_chapter), (3, 2, 1, 7));
    }
}
