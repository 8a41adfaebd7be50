//! Renderer-agnostic node/link snapshot for force-directed graph views.

use serde::{Serialize, Serializer};

use super::store::KnowledgeGraph;

const HUB_DEGREE: usize = 5;
const MAX_SYMBOL_SIZE: usize = 60;

/// Visual category, serialised as its numeric index (0 normal, 1 hub).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeCategory {
    Normal,
    Hub,
}

impl NodeCategory {
    fn for_degree(degree: usize) -> Self {
        if degree > HUB_DEGREE { NodeCategory::Hub } else { NodeCategory::Normal }
    }

    pub fn index(self) -> u8 {
        match self {
            NodeCategory::Normal => 0,
            NodeCategory::Hub => 1,
        }
    }
}

impl Serialize for NodeCategory {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_u8(self.index())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedNode {
    pub name: String,
    pub symbol_size: usize,
    pub category: NodeCategory,
    pub draggable: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct LineStyle {
    pub width: u8,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProjectedLink {
    pub source: String,
    pub target: String,
    /// Relation label.
    pub value: String,
    pub line_style: LineStyle,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphProjection {
    pub nodes: Vec<ProjectedNode>,
    pub links: Vec<ProjectedLink>,
}

impl KnowledgeGraph {
    /// Snapshot for visualisation. Node size grows with degree
    /// (`min(degree * 3 + 10, 60)`), secret links are drawn twice as wide.
    pub fn projection(&self) -> GraphProjection {
        let nodes = self
            .nodes()
            .enumerate()
            .map(|(id, name)| {
                let degree = self.degree_of(id);
                ProjectedNode {
                    name: name.to_string(),
                    symbol_size: (degree * 3 + 10).min(MAX_SYMBOL_SIZE),
                    category: NodeCategory::for_degree(degree),
                    draggable: true,
                }
            })
            .collect();

        let links = self
            .edges()
            .map(|view| ProjectedLink {
                source: view.source.to_string(),
                target: view.target.to_string(),
                value: view.edge.relation.clone(),
                line_style: LineStyle { width: if view.edge.is_secret { 2 } else { 1 } },
            })
            .collect();

        GraphProjection { nodes, links }
    }
}
