//! `chapter_index`: per-project full-text index over chapter passages.
//!
//! ## Storage layout
//! ```text
//! {index_dir}/
//! └── chapters.db    # SQLite: chapter_meta table + FTS5 `passages` table
//! ```
//!
//! Passages use the FTS5 trigram tokenizer so substring matches work for
//! scripts without word separators. A chapter whose content hash is
//! unchanged is not re-indexed.

use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use rusqlite::{Connection, params};
use sha2::{Digest, Sha256};
use text_splitter::TextSplitter;
use tracing::debug;

use super::Retriever;
use crate::error::AppError;

const DB_FILENAME: &str = "chapters.db";
const SCHEMA_VERSION: i64 = 1;
/// Approximate characters per indexed passage.
const PASSAGE_CHARS: usize = 500;
/// Trigram tokenizer ignores shorter terms.
const MIN_TERM_CHARS: usize = 3;
const MAX_QUERY_TERMS: usize = 64;

#[derive(Debug, Clone)]
pub struct ChapterIndex {
    dir: PathBuf,
    db_path: PathBuf,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Passage {
    pub chapter_id: String,
    pub position: usize,
    pub text: String,
    pub score: f32,
}

impl ChapterIndex {
    pub fn open(dir: &Path) -> Result<Self, AppError> {
        fs::create_dir_all(dir).map_err(|e| {
            AppError::Retrieval(format!("chapter index: cannot create {}: {e}", dir.display()))
        })?;
        let index = Self {
            dir: dir.to_path_buf(),
            db_path: dir.join(DB_FILENAME),
        };
        index.init_db()?;
        Ok(index)
    }

    /// Split `text` into passages and index them under `(project_id,
    /// chapter_id)`, replacing earlier passages of that chapter.
    ///
    /// Returns the number of passages written; 0 when the content is
    /// unchanged since the last call.
    pub fn index_chapter(&self, project_id: &str, chapter_id: &str, text: &str) -> Result<usize, AppError> {
        let hash = sha256_hex(text);
        let mut conn = self.open_conn()?;
        if self.stored_hash(&conn, project_id, chapter_id)?.as_deref() == Some(hash.as_str()) {
            debug!(project_id, chapter_id, "chapter unchanged, skipping reindex");
            return Ok(0);
        }

        let splitter = TextSplitter::new(PASSAGE_CHARS);
        let passages: Vec<(usize, &str)> = splitter
            .chunk_indices(text)
            .filter(|(_, t)| !t.trim().is_empty())
            .collect();

        let tx = conn
            .transaction()
            .map_err(|e| AppError::Retrieval(format!("chapter index: begin index tx: {e}")))?;
        tx.execute(
            "DELETE FROM passages WHERE project_id = ?1 AND chapter_id = ?2",
            params![project_id, chapter_id],
        )
        .map_err(|e| AppError::Retrieval(format!("chapter index: clear {chapter_id}: {e}")))?;

        for (position, passage) in &passages {
            tx.execute(
                "INSERT INTO passages (id, project_id, chapter_id, position, text) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    uuid::Uuid::now_v7().to_string(),
                    project_id,
                    chapter_id,
                    *position as i64,
                    passage,
                ],
            )
            .map_err(|e| AppError::Retrieval(format!("chapter index: insert passage: {e}")))?;
        }

        tx.execute(
            "INSERT INTO chapter_meta (project_id, chapter_id, content_hash, indexed_at) VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(project_id, chapter_id) DO UPDATE SET content_hash = excluded.content_hash, indexed_at = excluded.indexed_at",
            params![project_id, chapter_id, hash, now_iso8601()],
        )
        .map_err(|e| AppError::Retrieval(format!("chapter index: upsert chapter_meta: {e}")))?;

        tx.commit()
            .map_err(|e| AppError::Retrieval(format!("chapter index: commit index tx: {e}")))?;
        debug!(project_id, chapter_id, passages = passages.len(), "chapter indexed");
        Ok(passages.len())
    }

    /// BM25-ranked passages of `project_id` sharing terms with `query`.
    pub fn search_passages(&self, query: &str, project_id: &str, top_k: usize) -> Result<Vec<Passage>, AppError> {
        let Some(fts_query) = fts_query(query) else {
            return Ok(Vec::new());
        };
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let conn = self.open_conn()?;
        let mut stmt = conn
            .prepare(
                "SELECT chapter_id, position, text, bm25(passages) AS rank
                 FROM passages
                 WHERE passages MATCH ?1 AND project_id = ?2
                 ORDER BY rank
                 LIMIT ?3",
            )
            .map_err(|e| AppError::Retrieval(format!("chapter index: prepare search: {e}")))?;

        let rows = stmt
            .query_map(params![fts_query, project_id, top_k as i64], |row| {
                let bm25: f64 = row.get(3)?;
                Ok(Passage {
                    chapter_id: row.get(0)?,
                    position: row.get::<_, i64>(1)? as usize,
                    text: row.get(2)?,
                    score: (-bm25) as f32,
                })
            })
            .map_err(|e| AppError::Retrieval(format!("chapter index: execute search: {e}")))?;

        let mut out = Vec::new();
        for row in rows {
            out.push(row.map_err(|e| AppError::Retrieval(format!("chapter index: map search row: {e}")))?);
        }
        Ok(out)
    }

    /// Drop every passage and chapter record of `project_id`.
    pub fn clear_project(&self, project_id: &str) -> Result<(), AppError> {
        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Retrieval(format!("chapter index: begin clear tx: {e}")))?;
        tx.execute("DELETE FROM passages WHERE project_id = ?1", params![project_id])
            .map_err(|e| AppError::Retrieval(format!("chapter index: clear passages: {e}")))?;
        tx.execute("DELETE FROM chapter_meta WHERE project_id = ?1", params![project_id])
            .map_err(|e| AppError::Retrieval(format!("chapter index: clear chapter_meta: {e}")))?;
        tx.commit()
            .map_err(|e| AppError::Retrieval(format!("chapter index: commit clear tx: {e}")))
    }

    /// Copy everything indexed for `from` into `to`, replacing what `to` had.
    pub fn clone_project(&self, from: &str, to: &str) -> Result<usize, AppError> {
        self.clear_project(to)?;
        let mut conn = self.open_conn()?;
        let tx = conn
            .transaction()
            .map_err(|e| AppError::Retrieval(format!("chapter index: begin clone tx: {e}")))?;

        let rows: Vec<(String, i64, String)> = {
            let mut stmt = tx
                .prepare("SELECT chapter_id, position, text FROM passages WHERE project_id = ?1")
                .map_err(|e| AppError::Retrieval(format!("chapter index: prepare clone: {e}")))?;
            let mapped = stmt
                .query_map(params![from], |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)))
                .map_err(|e| AppError::Retrieval(format!("chapter index: read clone source: {e}")))?;
            mapped
                .collect::<Result<_, _>>()
                .map_err(|e| AppError::Retrieval(format!("chapter index: map clone row: {e}")))?
        };

        for (chapter_id, position, text) in &rows {
            tx.execute(
                "INSERT INTO passages (id, project_id, chapter_id, position, text) VALUES (?1, ?2, ?3, ?4, ?5)",
                params![uuid::Uuid::now_v7().to_string(), to, chapter_id, position, text],
            )
            .map_err(|e| AppError::Retrieval(format!("chapter index: insert cloned passage: {e}")))?;
        }
        tx.execute(
            "INSERT INTO chapter_meta (project_id, chapter_id, content_hash, indexed_at)
             SELECT ?2, chapter_id, content_hash, ?3 FROM chapter_meta WHERE project_id = ?1",
            params![from, to, now_iso8601()],
        )
        .map_err(|e| AppError::Retrieval(format!("chapter index: clone chapter_meta: {e}")))?;

        tx.commit()
            .map_err(|e| AppError::Retrieval(format!("chapter index: commit clone tx: {e}")))?;
        Ok(rows.len())
    }

    /// Number of chapters indexed for `project_id`.
    pub fn chapter_count(&self, project_id: &str) -> Result<usize, AppError> {
        let conn = self.open_conn()?;
        let n: i64 = conn
            .query_row(
                "SELECT COUNT(*) FROM chapter_meta WHERE project_id = ?1",
                params![project_id],
                |row| row.get(0),
            )
            .map_err(|e| AppError::Retrieval(format!("chapter index: count chapters: {e}")))?;
        Ok(n as usize)
    }

    pub fn root_dir(&self) -> &Path {
        &self.dir
    }

    fn stored_hash(&self, conn: &Connection, project_id: &str, chapter_id: &str) -> Result<Option<String>, AppError> {
        let mut stmt = conn
            .prepare("SELECT content_hash FROM chapter_meta WHERE project_id = ?1 AND chapter_id = ?2")
            .map_err(|e| AppError::Retrieval(format!("chapter index: prepare hash lookup: {e}")))?;
        let mut rows = stmt
            .query(params![project_id, chapter_id])
            .map_err(|e| AppError::Retrieval(format!("chapter index: query hash: {e}")))?;
        match rows
            .next()
            .map_err(|e| AppError::Retrieval(format!("chapter index: read hash row: {e}")))?
        {
            Some(row) => Ok(Some(
                row.get(0)
                    .map_err(|e| AppError::Retrieval(format!("chapter index: decode hash: {e}")))?,
            )),
            None => Ok(None),
        }
    }

    fn init_db(&self) -> Result<(), AppError> {
        let conn = self.open_conn()?;
        let version: i64 = conn
            .query_row("PRAGMA user_version;", [], |row| row.get(0))
            .map_err(|e| AppError::Retrieval(format!("chapter index: read schema version: {e}")))?;

        if version == 0 {
            conn.execute_batch(
                "
                CREATE TABLE IF NOT EXISTS chapter_meta (
                    project_id TEXT NOT NULL,
                    chapter_id TEXT NOT NULL,
                    content_hash TEXT NOT NULL,
                    indexed_at TEXT NOT NULL,
                    PRIMARY KEY (project_id, chapter_id)
                );

                CREATE VIRTUAL TABLE IF NOT EXISTS passages USING fts5(
                    id UNINDEXED,
                    project_id UNINDEXED,
                    chapter_id UNINDEXED,
                    position UNINDEXED,
                    text,
                    tokenize = 'trigram'
                );

                PRAGMA user_version = 1;
                ",
            )
            .map_err(|e| AppError::Retrieval(format!("chapter index: initialize schema: {e}")))?;
            return Ok(());
        }

        if version != SCHEMA_VERSION {
            return Err(AppError::Retrieval(format!(
                "chapter index: unsupported schema version {version}, expected {SCHEMA_VERSION}"
            )));
        }
        Ok(())
    }

    fn open_conn(&self) -> Result<Connection, AppError> {
        let conn = Connection::open(&self.db_path).map_err(|e| {
            AppError::Retrieval(format!("chapter index: open {}: {e}", self.db_path.display()))
        })?;
        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| AppError::Retrieval(format!("chapter index: set journal_mode WAL: {e}")))?;
        conn.pragma_update(None, "busy_timeout", 5000)
            .map_err(|e| AppError::Retrieval(format!("chapter index: set busy_timeout: {e}")))?;
        Ok(conn)
    }
}

impl Retriever for ChapterIndex {
    fn search(&self, query: &str, project_id: &str, max_results: usize) -> Result<Vec<String>, AppError> {
        Ok(self
            .search_passages(query, project_id, max_results)?
            .into_iter()
            .map(|p| p.text)
            .collect())
    }
}

/// Build an FTS5 `OR` query from free text.
///
/// Words are split on anything that is not alphanumeric. ASCII words are
/// kept whole; other runs (e.g. CJK, which has no spaces) are cut into
/// overlapping three-character windows. Each term is quoted so FTS5 syntax
/// characters in the input cannot break the query.
fn fts_query(text: &str) -> Option<String> {
    let mut terms: Vec<String> = Vec::new();
    let mut push = |term: String| {
        if terms.len() < MAX_QUERY_TERMS && !terms.contains(&term) {
            terms.push(term);
        }
    };

    for word in text.split(|c: char| !c.is_alphanumeric()) {
        let chars: Vec<char> = word.chars().collect();
        if chars.len() < MIN_TERM_CHARS {
            continue;
        }
        if word.is_ascii() {
            push(word.to_lowercase());
        } else {
            for window in chars.windows(MIN_TERM_CHARS) {
                push(window.iter().collect());
            }
        }
    }

    if terms.is_empty() {
        return None;
    }
    Some(
        terms
            .iter()
            .map(|t| format!("\"{}\"", t.replace('"', "\"\"")))
            .collect::<Vec<_>>()
            .join(" OR "),
    )
}

fn sha256_hex(content: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content.as_bytes());
    hex::encode(hasher.finalize())
}

fn now_iso8601() -> String {
    Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true)
}
