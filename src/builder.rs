//! Sequential graph build over an ordered chapter list.

use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::chapters::Chapter;
use crate::extract::{ExtractOutcome, Extractor};
use crate::graph::KnowledgeGraph;
use crate::retrieval::Retriever;

/// One progress notification, sent before a chapter is processed and once
/// more at the end of a complete build.
#[derive(Debug, Clone, PartialEq)]
pub struct BuildProgress {
    pub message: String,
    /// In `(0, 1]`.
    pub fraction: f32,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct BuildReport {
    pub chapters_total: usize,
    pub chapters_processed: usize,
    pub edges_added: usize,
    /// 1-based chapter numbers after which a checkpoint was saved.
    pub checkpoints: Vec<usize>,
    pub cancelled: bool,
}

pub struct BatchBuilder {
    extractor: Extractor,
    retriever: Option<Arc<dyn Retriever>>,
}

impl BatchBuilder {
    pub fn new(extractor: Extractor, retriever: Option<Arc<dyn Retriever>>) -> Self {
        Self { extractor, retriever }
    }

    /// Run extraction over `chapters` in order, saving `graph` to `path`
    /// every `checkpoint_every` chapters and once at the end (also when
    /// cancelled).
    pub async fn build_from_chapters(
        &self,
        graph: &mut KnowledgeGraph,
        path: &Path,
        chapters: &[Chapter],
        mut progress: Option<&mut dyn FnMut(BuildProgress)>,
        cancel: &CancellationToken,
    ) -> BuildReport {
        let config = self.extractor.config();
        let total = chapters.len();
        let checkpoint_every = config.checkpoint_every.max(1);
        let pause = Duration::from_millis(config.pause_ms);

        let mut report = BuildReport {
            chapters_total: total,
            ..BuildReport::default()
        };
        let mut last_fraction = 0.0_f32;

        info!(project = %self.extractor.project_id(), chapters = total, "graph build started");

        for (i, chapter) in chapters.iter().enumerate() {
            if cancel.is_cancelled() {
                report.cancelled = true;
                break;
            }

            last_fraction = (i + 1) as f32 / total as f32;
            if let Some(report_progress) = progress.as_deref_mut() {
                report_progress(BuildProgress {
                    message: format!("Analysing chapter {}/{}: {}", i + 1, total, chapter.title),
                    fraction: last_fraction,
                });
            }

            let outcome = self
                .extractor
                .extract_chapter(graph, &chapter.content, (i + 1) as i64, self.retriever.as_ref())
                .await;
            if matches!(outcome, ExtractOutcome::NoStructure | ExtractOutcome::Failed) {
                warn!(chapter = i + 1, title = %chapter.title, ?outcome, "chapter yielded no relations");
            }
            report.edges_added += outcome.committed();
            report.chapters_processed += 1;

            if i % checkpoint_every == 0 {
                graph.save(path);
                report.checkpoints.push(i + 1);
            }

            if !pause.is_zero() {
                tokio::select! {
                    _ = tokio::time::sleep(pause) => {}
                    _ = cancel.cancelled() => {}
                }
            }
        }

        graph.save(path);

        if !report.cancelled && last_fraction < 1.0 {
            if let Some(report_progress) = progress.as_deref_mut() {
                report_progress(BuildProgress {
                    message: "Done".to_string(),
                    fraction: 1.0,
                });
            }
        }

        info!(
            project = %self.extractor.project_id(),
            processed = report.chapters_processed,
            edges = report.edges_added,
            cancelled = report.cancelled,
            "graph build finished"
        );
        report
    }
}
