//! Chapter text → relation triples → graph edges.
//!
//! One [`Extractor::extract_chapter`] call per chapter: optional retrieval
//! of similar passages, one streamed completion, lenient JSON recovery and
//! edge commits. Nothing here returns an error; every failure degrades to
//! fewer (or zero) edges and a log line, reported as an [`ExtractOutcome`].

pub mod recover;

use std::fs;
use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::GraphConfig;
use crate::graph::KnowledgeGraph;
use crate::llm::LlmProvider;
use crate::retrieval::Retriever;
use recover::{Recovery, parse_triples, recover_json_array};

pub const EXTRACTION_SYSTEM_PROMPT: &str = "You are a data extractor. Output ONLY valid JSON list.";

const PROMPT_PATH: &str = "config/prompts/graph_extract.txt";

const DEFAULT_PROMPT: &str = "Knowledge graph extraction. Extract [entity - relation - entity] triples.
{{context}}
[JSON format]
[
  { \"source\": \"A\", \"relation\": \"relation\", \"target\": \"B\", \"desc\": \"description\", \"is_reveal\": false }
]
[Text to analyse]
{{text}}
";

/// Characters of the raw reply kept in log lines.
const RAW_LOG_CHARS: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExtractOutcome {
    /// Chapter too short to analyse.
    Skipped,
    /// The reply held no JSON array.
    NoStructure,
    /// Provider error or unparseable array.
    Failed,
    Extracted { committed: usize, skipped: usize },
}

impl ExtractOutcome {
    pub fn committed(self) -> usize {
        match self {
            ExtractOutcome::Extracted { committed, .. } => committed,
            _ => 0,
        }
    }
}

#[derive(Debug, Clone)]
pub struct Extractor {
    provider: LlmProvider,
    config: GraphConfig,
    project_id: String,
    template: String,
}

impl Extractor {
    /// Uses the prompt template at `config/prompts/graph_extract.txt` when
    /// present, the built-in one otherwise.
    pub fn new(provider: LlmProvider, config: GraphConfig, project_id: impl Into<String>) -> Self {
        let template = fs::read_to_string(Path::new(PROMPT_PATH)).unwrap_or_else(|_| DEFAULT_PROMPT.to_string());
        Self::with_template(provider, config, project_id, template)
    }

    pub fn with_template(
        provider: LlmProvider,
        config: GraphConfig,
        project_id: impl Into<String>,
        template: impl Into<String>,
    ) -> Self {
        Self {
            provider,
            config,
            project_id: project_id.into(),
            template: template.into(),
        }
    }

    pub fn project_id(&self) -> &str {
        &self.project_id
    }

    pub fn config(&self) -> &GraphConfig {
        &self.config
    }

    /// Extract relations from one chapter and commit them to `graph`, all
    /// stamped with `chapter_index` as both start and reveal chapter.
    pub async fn extract_chapter(
        &self,
        graph: &mut KnowledgeGraph,
        text: &str,
        chapter_index: i64,
        retriever: Option<&Arc<dyn Retriever>>,
    ) -> ExtractOutcome {
        let chars = text.chars().count();
        if chars < self.config.min_chapter_chars {
            debug!(chapter = chapter_index, chars, "chapter too short, skipping extraction");
            return ExtractOutcome::Skipped;
        }

        let context = match retriever {
            Some(r) if chars > self.config.retrieval_min_chars => self.reference_block(r, text).await,
            _ => String::new(),
        };
        let prompt = self.build_prompt(&context, text);

        let raw = match self.provider.complete(&prompt, Some(EXTRACTION_SYSTEM_PROMPT)).await {
            Ok(raw) => raw,
            Err(e) => {
                warn!(chapter = chapter_index, provider = self.provider.name(), error = %e, "extraction request failed");
                return ExtractOutcome::Failed;
            }
        };
        debug!(chapter = chapter_index, raw = %prefix(&raw, RAW_LOG_CHARS), "raw extraction reply");

        let items = match recover_json_array(&raw) {
            Recovery::Array(items) => items,
            Recovery::NoArray => {
                warn!(chapter = chapter_index, raw = %prefix(&raw, RAW_LOG_CHARS), "no JSON array in extraction reply");
                return ExtractOutcome::NoStructure;
            }
            Recovery::Invalid(e) => {
                warn!(chapter = chapter_index, error = %e, "extraction reply is not a valid JSON array");
                return ExtractOutcome::Failed;
            }
        };

        let (relations, mut skipped) = parse_triples(&items, chapter_index);
        let mut committed = 0;
        for rel in relations {
            if self.config.dedup_edges && graph.contains_edge(&rel) {
                skipped += 1;
                continue;
            }
            match graph.add_relation(rel) {
                Some(_) => committed += 1,
                None => skipped += 1,
            }
        }
        info!(project = %self.project_id, chapter = chapter_index, committed, skipped, "relations extracted");
        ExtractOutcome::Extracted { committed, skipped }
    }

    /// Passages similar to the chapter's opening and closing, wrapped as a
    /// reference block. Empty on any retrieval failure.
    async fn reference_block(&self, retriever: &Arc<dyn Retriever>, text: &str) -> String {
        let probe = self.config.retrieval_probe_chars;
        let query = format!("{} {}", prefix(text, probe), suffix(text, probe));
        let retriever = Arc::clone(retriever);
        let project_id = self.project_id.clone();
        let max_results = self.config.retrieval_max_results;

        let passages = match tokio::task::spawn_blocking(move || retriever.search(&query, &project_id, max_results)).await {
            Ok(Ok(passages)) => passages,
            Ok(Err(e)) => {
                warn!(error = %e, "retrieval failed, extracting without reference material");
                return String::new();
            }
            Err(e) => {
                warn!(error = %e, "retrieval task panicked, extracting without reference material");
                return String::new();
            }
        };

        let passages: Vec<&str> = passages.iter().map(|p| p.trim()).filter(|p| !p.is_empty()).collect();
        if passages.is_empty() {
            return String::new();
        }
        format!(
            "[Reference material]\n{}\nUse this material to disambiguate entities.",
            passages.join("\n---\n")
        )
    }

    fn build_prompt(&self, context: &str, text: &str) -> String {
        render_template(
            &self.template,
            &[("context", context), ("text", prefix(text, self.config.excerpt_chars))],
        )
    }
}

/// Substitute `{{name}}` placeholders in one pass over `template`.
/// Substituted values are never rescanned; unknown placeholders are kept.
fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(start) = rest.find("{{") {
        out.push_str(&rest[..start]);
        let after = &rest[start + 2..];
        let value = after
            .find("}}")
            .and_then(|end| vars.iter().find(|(name, _)| *name == &after[..end]).map(|(_, v)| (end, *v)));
        match value {
            Some((end, v)) => {
                out.push_str(v);
                rest = &after[end + 2..];
            }
            None => {
                out.push_str("{{");
                rest = after;
            }
        }
    }
    out.push_str(rest);
    out
}

/// First `n` characters of `s`.
fn prefix(s: &str, n: usize) -> &str {
    match s.char_indices().nth(n) {
        Some((i, _)) => &s[..i],
        None => s,
    }
}

/// Last `n` characters of `s`.
fn suffix(s: &str, n: usize) -> &str {
    if n == 0 {
        return "";
    }
    match s.char_indices().rev().nth(n - 1) {
        Some((i, _)) => &s[i..],
        None => s,
    }
}
