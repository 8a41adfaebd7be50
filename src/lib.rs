//! taleweave: chapter-aware knowledge graph for long-form fiction.
//!
//! Chapters are fed to an LLM that extracts entity–relation triples; the
//! triples land in a persisted multigraph whose edges carry the chapter at
//! which a reader may learn them. Queries then answer "what is known about
//! X at chapter N" for an omniscient author or a spoiler-free reader.

pub mod builder;
pub mod chapters;
pub mod config;
pub mod context;
pub mod error;
pub mod extract;
pub mod graph;
pub mod llm;
pub mod logger;
pub mod retrieval;

pub use builder::{BatchBuilder, BuildProgress, BuildReport};
pub use chapters::Chapter;
pub use context::AppContext;
pub use error::AppError;
pub use extract::{ExtractOutcome, Extractor};
pub use graph::{KnowledgeGraph, NewRelation, ViewerMode};
