//! Retrieval of similar passages used to disambiguate extraction.
//!
//! Retrieval is best-effort context: callers treat errors and empty
//! results the same as "no retriever configured".

#[cfg(feature = "chapter-index")]
pub mod chapter_index;

#[cfg(feature = "chapter-index")]
pub use chapter_index::{ChapterIndex, Passage};

use crate::error::AppError;

/// Source of passages similar to a query, scoped per project.
///
/// Implementations may block (the pipeline calls them on a blocking
/// thread), so they must be `Send + Sync`.
pub trait Retriever: Send + Sync {
    fn search(&self, query: &str, project_id: &str, max_results: usize) -> Result<Vec<String>, AppError>;
}
