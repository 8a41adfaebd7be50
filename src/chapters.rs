//! Turning manuscripts into the ordered chapter list a build consumes.

use std::fs;
use std::path::Path;

use tracing::debug;

use crate::config::GraphConfig;
use crate::error::AppError;

/// The marker must appear this early for marker-based splitting.
const MARKER_WINDOW_CHARS: usize = 1000;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chapter {
    pub title: String,
    pub content: String,
}

impl Chapter {
    pub fn new(title: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            title: title.into(),
            content: content.into(),
        }
    }
}

/// Split a whole manuscript into chapters.
///
/// When `config.chapter_marker` occurs in the first 1000 characters the
/// text is split on it; pieces longer than `min_marked_chapter_chars` are
/// kept as `Ch<n>` (n = piece position, marker restored at the front).
/// Otherwise, or when no piece survives, the text is cut into
/// `fallback_chunk_chars` pieces titled `Part <n>`.
pub fn split_manuscript(text: &str, config: &GraphConfig) -> Vec<Chapter> {
    let marker = config.chapter_marker.as_str();
    let head = prefix_chars(text, MARKER_WINDOW_CHARS);

    if !marker.is_empty() && head.contains(marker) {
        let chapters: Vec<Chapter> = text
            .split(marker)
            .enumerate()
            .filter(|(_, piece)| piece.chars().count() > config.min_marked_chapter_chars)
            .map(|(i, piece)| Chapter::new(format!("Ch{i}"), format!("{marker}{piece}")))
            .collect();
        if !chapters.is_empty() {
            debug!(chapters = chapters.len(), marker, "manuscript split on chapter marker");
            return chapters;
        }
    }

    let chars: Vec<char> = text.chars().collect();
    let chapters: Vec<Chapter> = chars
        .chunks(config.fallback_chunk_chars.max(1))
        .enumerate()
        .map(|(i, chunk)| Chapter::new(format!("Part {}", i + 1), chunk.iter().collect::<String>()))
        .collect();
    debug!(chapters = chapters.len(), "manuscript split into fixed-size parts");
    chapters
}

/// Read every `*.txt` / `*.md` file in `dir`, sorted by file name, as one
/// chapter each (title = file stem).
pub fn load_dir(dir: &Path) -> Result<Vec<Chapter>, AppError> {
    let entries = fs::read_dir(dir)
        .map_err(|e| AppError::Config(format!("cannot read chapter dir {}: {e}", dir.display())))?;

    let mut paths = Vec::new();
    for entry in entries {
        let path = entry?.path();
        let is_text = path
            .extension()
            .and_then(|ext| ext.to_str())
            .is_some_and(|ext| ext.eq_ignore_ascii_case("txt") || ext.eq_ignore_ascii_case("md"));
        if path.is_file() && is_text {
            paths.push(path);
        }
    }
    paths.sort();

    let mut chapters = Vec::with_capacity(paths.len());
    for path in paths {
        let content = fs::read_to_string(&path)?;
        let title = path
            .file_stem()
            .map(|s| s.to_string_lossy().into_owned())
            .unwrap_or_default();
        chapters.push(Chapter::new(title, content));
    }
    Ok(chapters)
}

/// Chapters from either a directory of chapter files or a single
/// manuscript file.
pub fn load_source(path: &Path, config: &GraphConfig) -> Result<Vec<Chapter>, AppError> {
    if path.is_dir() {
        return load_dir(path);
    }
    let text = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read manuscript {}: {e}", path.display())))?;
    Ok(split_manuscript(&text, config))
}

fn prefix_chars(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn config() -> GraphConfig {
        GraphConfig::default()
    }

    #[test]
    fn splits_on_marker_and_drops_short_pieces() {
        let body = "风".repeat(120);
        let text = format!("序\n第一章 {body}第二章 短第三章 {body}");
        let chapters = split_manuscript(&text, &config());
        assert_eq!(chapters.len(), 2);
        assert_eq!(chapters[0].title, "Ch1");
        assert!(chapters[0].content.starts_with("第一章"));
        assert_eq!(chapters[1].title, "Ch3");
    }

    #[test]
    fn marker_outside_window_uses_fixed_parts() {
        let mut cfg = config();
        cfg.fallback_chunk_chars = 600;
        let text = format!("{}第{}", "a".repeat(1200), "b".repeat(300));
        let chapters = split_manuscript(&text, &cfg);
        assert_eq!(chapters.len(), 3);
        assert_eq!(chapters[0].title, "Part 1");
        assert_eq!(chapters[2].title, "Part 3");
        assert_eq!(chapters[2].content.chars().count(), 301);
    }

    #[test]
    fn all_marked_pieces_short_falls_back() {
        let chapters = split_manuscript("第一章 短。第二章 也短。", &config());
        assert_eq!(chapters.len(), 1);
        assert_eq!(chapters[0].title, "Part 1");
    }

    #[test]
    fn fixed_parts_split_on_char_boundaries() {
        let mut cfg = config();
        cfg.chapter_marker = "Chapter".into();
        cfg.fallback_chunk_chars = 2;
        let chapters = split_manuscript("龍虎鳳", &cfg);
        assert_eq!(chapters.iter().map(|c| c.content.as_str()).collect::<Vec<_>>(), ["龍虎", "鳳"]);
    }

    #[test]
    fn empty_manuscript_has_no_chapters() {
        assert!(split_manuscript("", &config()).is_empty());
    }

    #[test]
    fn load_dir_reads_text_files_in_order() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join("02-storm.md"), "second").unwrap();
        fs::write(dir.path().join("01-arrival.txt"), "first").unwrap();
        fs::write(dir.path().join("cover.png"), [0u8, 1, 2]).unwrap();
        fs::create_dir(dir.path().join("drafts.txt")).unwrap();

        let chapters = load_dir(dir.path()).unwrap();
        assert_eq!(
            chapters,
            vec![Chapter::new("01-arrival", "first"), Chapter::new("02-storm", "second")]
        );
    }

    #[test]
    fn load_source_handles_files_and_dirs() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("book.txt");
        fs::write(&file, "x".repeat(10)).unwrap();
        assert_eq!(load_source(&file, &config()).unwrap().len(), 1);
        assert_eq!(load_source(dir.path(), &config()).unwrap()[0].title, "book");
        assert!(load_source(&dir.path().join("missing.txt"), &config()).is_err());
    }
}
