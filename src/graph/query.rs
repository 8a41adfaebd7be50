//! Plain-text context for prompt assembly.

use super::store::KnowledgeGraph;
use super::visibility::{ViewerMode, is_visible};

/// Appended to secret edges in author-mode output.
pub const SECRET_MARKER: &str = " [locked-secret]";

impl KnowledgeGraph {
    /// What the graph knows about `entity`, as seen by `viewer` at
    /// `current_chapter`.
    ///
    /// One line per visible outgoing edge, in insertion order:
    /// `- <entity> <relation> <neighbour> (<desc>)`, with
    /// [`SECRET_MARKER`] appended to secret edges in author mode. Returns an
    /// empty string when the entity is unknown or nothing is visible.
    pub fn query_context(&self, entity: &str, current_chapter: i64, viewer: ViewerMode) -> String {
        let entity = entity.trim();
        self.successors(entity)
            .into_iter()
            .filter(|(_, edge)| is_visible(edge, current_chapter, viewer))
            .map(|(neighbour, edge)| {
                let mut line = format!("- {entity} {} {neighbour}", edge.relation);
                if !edge.desc.is_empty() {
                    line.push_str(&format!(" ({})", edge.desc));
                }
                if viewer == ViewerMode::Author && edge.is_secret {
                    line.push_str(SECRET_MARKER);
                }
                line
            })
            .collect::<Vec<_>>()
            .join("\n")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewRelation;

    fn sample() -> KnowledgeGraph {
        let mut g = KnowledgeGraph::new();
        g.add_relation(NewRelation::new("Mara", "Tomas", "sister of", 1));
        g.add_relation(NewRelation::new("Mara", "The Guild", "informant for", 2).desc("paid in silver"));
        g.add_relation(
            NewRelation::new("Mara", "Tomas", "poisoned", 3)
                .revealed_at(12)
                .secret(true),
        );
        g.add_relation(NewRelation::new("Tomas", "Mara", "trusts", 1));
        g
    }

    #[test]
    fn reader_sees_only_revealed_edges() {
        let g = sample();
        assert_eq!(
            g.query_context("Mara", 5, ViewerMode::Reader),
            "- Mara sister of Tomas\n- Mara informant for The Guild (paid in silver)"
        );
        assert_eq!(g.query_context("Mara", 1, ViewerMode::Reader), "- Mara sister of Tomas");
    }

    #[test]
    fn reader_sees_secret_once_revealed_without_marker() {
        let g = sample();
        let text = g.query_context("Mara", 12, ViewerMode::Reader);
        assert!(text.ends_with("- Mara poisoned Tomas"));
        assert!(!text.contains(SECRET_MARKER));
    }

    #[test]
    fn author_sees_everything_with_marker() {
        let g = sample();
        let text = g.query_context("Mara", 0, ViewerMode::Author);
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 3);
        assert_eq!(lines[2], "- Mara poisoned Tomas [locked-secret]");
    }

    #[test]
    fn unknown_or_hidden_is_empty() {
        let g = sample();
        assert_eq!(g.query_context("Nobody", 99, ViewerMode::Author), "");
        assert_eq!(g.query_context("Mara", 0, ViewerMode::Reader), "");
    }

    #[test]
    fn entity_name_is_trimmed() {
        let g = sample();
        assert_eq!(g.query_context(" Tomas ", 1, ViewerMode::Reader), "- Tomas trusts Mara");
    }
}
