//! JSON persistence in node-link form.
//!
//! ```json
//! { "directed": true, "multigraph": true, "graph": {},
//!   "nodes": [{"id": "Alice"}],
//!   "links": [{"source": "Alice", "target": "Bob", "key": 0,
//!              "relation": "knows", "desc": "", "start_chapter": 1,
//!              "reveal_chapter": 1, "is_secret": false}] }
//! ```
//!
//! Loading is best-effort: a missing or unreadable file yields an empty
//! graph. Saving reports failures through the log only.

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use super::store::{KnowledgeGraph, NewRelation};
use crate::error::AppError;

// ── Document shape ────────────────────────────────────────────────────────────

#[derive(Debug, Serialize)]
struct DocumentOut<'a> {
    directed: bool,
    multigraph: bool,
    graph: Map<String, Value>,
    nodes: Vec<NodeOut<'a>>,
    links: Vec<LinkOut<'a>>,
}

#[derive(Debug, Serialize)]
struct NodeOut<'a> {
    id: &'a str,
}

#[derive(Debug, Serialize)]
struct LinkOut<'a> {
    source: &'a str,
    target: &'a str,
    key: usize,
    relation: &'a str,
    desc: &'a str,
    start_chapter: i64,
    reveal_chapter: i64,
    is_secret: bool,
}

#[derive(Debug, Deserialize)]
struct DocumentIn {
    #[serde(default)]
    nodes: Vec<NodeIn>,
    #[serde(default, alias = "edges")]
    links: Vec<LinkIn>,
}

#[derive(Debug, Deserialize)]
struct NodeIn {
    id: Value,
}

// `key` and any extra attributes are ignored.
#[derive(Debug, Deserialize)]
struct LinkIn {
    source: Value,
    target: Value,
    #[serde(default)]
    relation: Value,
    #[serde(default)]
    desc: Value,
    #[serde(default)]
    start_chapter: Option<i64>,
    #[serde(default)]
    reveal_chapter: Option<i64>,
    #[serde(default)]
    is_secret: Value,
}

// ── Lenient value coercion ────────────────────────────────────────────────────

/// Label text for a JSON scalar. Strings are taken verbatim, numbers and
/// booleans are stringified; null, arrays and objects have no label.
pub(crate) fn scalar_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// Boolean reading of a JSON value: `true`, non-zero numbers and the
/// string `"true"` (any case) are true; everything else is false.
pub(crate) fn truthy(value: &Value) -> bool {
    match value {
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().is_some_and(|f| f != 0.0),
        Value::String(s) => s.trim().eq_ignore_ascii_case("true"),
        _ => false,
    }
}

// ── Load / save ───────────────────────────────────────────────────────────────

impl KnowledgeGraph {
    /// Load the graph stored at `path`, or an empty graph if the file is
    /// missing or cannot be decoded. Never fails.
    pub fn load(path: &Path) -> KnowledgeGraph {
        match Self::try_load(path) {
            Ok(Some(graph)) => {
                info!(
                    path = %path.display(),
                    nodes = graph.node_count(),
                    edges = graph.edge_count(),
                    "graph loaded"
                );
                graph
            }
            Ok(None) => {
                info!(path = %path.display(), "no graph file, starting empty");
                KnowledgeGraph::new()
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "graph load failed, starting empty");
                KnowledgeGraph::new()
            }
        }
    }

    /// Strict variant of [`load`](Self::load): `Ok(None)` when the file
    /// does not exist, `Err` when it cannot be read or decoded.
    pub fn try_load(path: &Path) -> Result<Option<KnowledgeGraph>, AppError> {
        let raw = match fs::read_to_string(path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(AppError::Graph(format!("cannot read {}: {e}", path.display())));
            }
        };
        Self::from_json(&raw).map(Some)
    }

    /// Decode a node-link JSON document.
    pub fn from_json(raw: &str) -> Result<KnowledgeGraph, AppError> {
        let doc: DocumentIn = serde_json::from_str(raw)
            .map_err(|e| AppError::Graph(format!("malformed graph document: {e}")))?;

        let mut graph = KnowledgeGraph::new();
        for node in &doc.nodes {
            if let Some(label) = scalar_text(&node.id) {
                graph.add_node(&label);
            }
        }

        let mut dropped = 0usize;
        for link in doc.links {
            let (Some(source), Some(target)) = (scalar_text(&link.source), scalar_text(&link.target))
            else {
                dropped += 1;
                continue;
            };
            let start_chapter = link.start_chapter.unwrap_or(0);
            let rel = NewRelation {
                source,
                target,
                relation: scalar_text(&link.relation).unwrap_or_default(),
                start_chapter,
                reveal_chapter: Some(link.reveal_chapter.unwrap_or(start_chapter)),
                is_secret: truthy(&link.is_secret),
                desc: scalar_text(&link.desc).unwrap_or_default(),
            };
            if graph.add_relation(rel).is_none() {
                dropped += 1;
            }
        }
        if dropped > 0 {
            debug!(dropped, "skipped links with missing or empty endpoints");
        }
        Ok(graph)
    }

    /// Encode as pretty-printed node-link JSON. Non-ASCII text is kept as is.
    pub fn to_json(&self) -> Result<String, AppError> {
        let mut parallel: HashMap<(&str, &str), usize> = HashMap::new();
        let links = self
            .edges()
            .map(|view| {
                let key = parallel.entry((view.source, view.target)).or_insert(0);
                let link = LinkOut {
                    source: view.source,
                    target: view.target,
                    key: *key,
                    relation: &view.edge.relation,
                    desc: &view.edge.desc,
                    start_chapter: view.edge.start_chapter,
                    reveal_chapter: view.edge.reveal_chapter,
                    is_secret: view.edge.is_secret,
                };
                *key += 1;
                link
            })
            .collect();

        let doc = DocumentOut {
            directed: true,
            multigraph: true,
            graph: Map::new(),
            nodes: self.nodes().map(|id| NodeOut { id }).collect(),
            links,
        };
        serde_json::to_string_pretty(&doc)
            .map_err(|e| AppError::Graph(format!("serialize graph: {e}")))
    }

    /// Write the graph to `path`, logging instead of failing.
    pub fn save(&self, path: &Path) {
        match self.try_save(path) {
            Ok(()) => debug!(
                path = %path.display(),
                nodes = self.node_count(),
                edges = self.edge_count(),
                "graph saved"
            ),
            Err(e) => warn!(path = %path.display(), error = %e, "graph save failed"),
        }
    }

    /// Write the graph to `path` via a temporary sibling file and rename, so
    /// a crash mid-write leaves the previous file intact.
    pub fn try_save(&self, path: &Path) -> Result<(), AppError> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| {
                AppError::Graph(format!("cannot create {}: {e}", parent.display()))
            })?;
        }
        let json = self.to_json()?;
        let tmp = tmp_path(path);
        fs::write(&tmp, json)
            .map_err(|e| AppError::Graph(format!("cannot write {}: {e}", tmp.display())))?;
        fs::rename(&tmp, path).map_err(|e| {
            AppError::Graph(format!("cannot move {} into place: {e}", tmp.display()))
        })?;
        Ok(())
    }
}

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}
