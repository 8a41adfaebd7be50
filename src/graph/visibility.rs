//! Spoiler visibility: who may see an edge at a given chapter.

use std::fmt;
use std::str::FromStr;

use super::store::Edge;

/// Perspective a query is answered from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ViewerMode {
    /// Omniscient: sees every edge, including unrevealed secrets.
    Author,
    /// Chapter-bounded: sees an edge once its reveal chapter is reached.
    #[default]
    Reader,
}

impl ViewerMode {
    pub fn as_str(self) -> &'static str {
        match self {
            ViewerMode::Author => "author",
            ViewerMode::Reader => "reader",
        }
    }
}

impl fmt::Display for ViewerMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ViewerMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "author" => Ok(ViewerMode::Author),
            "reader" => Ok(ViewerMode::Reader),
            other => Err(format!("unknown viewer mode '{other}' (expected author or reader)")),
        }
    }
}

/// Whether `edge` is observable by `viewer` at `current_chapter`.
pub fn is_visible(edge: &Edge, current_chapter: i64, viewer: ViewerMode) -> bool {
    match viewer {
        ViewerMode::Author => true,
        ViewerMode::Reader => current_chapter >= edge.reveal_chapter,
    }
}
