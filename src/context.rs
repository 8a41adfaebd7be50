//! Application context: built once at startup and passed by reference.
//!
//! Holds the resolved config, the optional retriever and the single active
//! project graph. The active graph lives behind an async mutex; a separate
//! flag rejects a second build while one is running instead of queueing it.

use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::builder::{BatchBuilder, BuildProgress, BuildReport};
use crate::chapters::Chapter;
use crate::config::Config;
use crate::error::AppError;
use crate::extract::Extractor;
use crate::graph::{GraphProjection, GraphStats, KnowledgeGraph, ViewerMode};
use crate::llm::{LlmProvider, providers};
use crate::retrieval::Retriever;

#[cfg(feature = "chapter-index")]
use crate::retrieval::ChapterIndex;

struct ActiveProject {
    id: String,
    path: PathBuf,
    graph: KnowledgeGraph,
}

pub struct AppContext {
    config: Config,
    retriever: Option<Arc<dyn Retriever>>,
    #[cfg(feature = "chapter-index")]
    chapter_index: Option<Arc<ChapterIndex>>,
    active: Mutex<Option<ActiveProject>>,
    graph_task_running: AtomicBool,
}

/// Clears the running flag when a build ends, however it ends.
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

impl AppContext {
    /// Build the context from `config`. With the `chapter-index` feature the
    /// index under `<work_dir>/index` becomes the retriever; if it cannot be
    /// opened, builds run without retrieval.
    pub fn new(config: Config) -> Self {
        #[cfg(feature = "chapter-index")]
        let chapter_index = match ChapterIndex::open(&config.index_dir()) {
            Ok(index) => Some(Arc::new(index)),
            Err(e) => {
                warn!(error = %e, "chapter index unavailable, building without retrieval");
                None
            }
        };
        #[cfg(feature = "chapter-index")]
        let retriever = chapter_index.clone().map(|index| index as Arc<dyn Retriever>);
        #[cfg(not(feature = "chapter-index"))]
        let retriever = None;

        Self {
            config,
            retriever,
            #[cfg(feature = "chapter-index")]
            chapter_index,
            active: Mutex::new(None),
            graph_task_running: AtomicBool::new(false),
        }
    }

    /// Context with an explicit retriever (or none).
    pub fn with_retriever(config: Config, retriever: Option<Arc<dyn Retriever>>) -> Self {
        Self {
            config,
            retriever,
            #[cfg(feature = "chapter-index")]
            chapter_index: None,
            active: Mutex::new(None),
            graph_task_running: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn is_build_running(&self) -> bool {
        self.graph_task_running.load(Ordering::Acquire)
    }

    /// Provider for the graph role, using the writer's model when the graph
    /// role has no credentials of its own.
    pub fn graph_provider(&self) -> Result<LlmProvider, AppError> {
        let model = self.config.roles.graph_effective();
        if model.requires_api_key() && !model.has_credentials() {
            return Err(AppError::Config(format!(
                "graph role uses provider '{}' but no API key is set (TALEWEAVE_GRAPH_API_KEY, TALEWEAVE_WRITER_API_KEY or LLM_API_KEY)",
                model.provider
            )));
        }
        Ok(providers::build(&model)?)
    }

    /// Make `project_id` the active project, saving and dropping the
    /// previous one. Re-activating the current project is a no-op.
    pub async fn activate_project(&self, project_id: &str) -> Result<(), AppError> {
        let project_id = project_id.trim();
        if project_id.is_empty() || project_id.contains(['/', '\\']) {
            return Err(AppError::Config(format!("invalid project id '{project_id}'")));
        }

        let mut active = self.active.lock().await;
        if active.as_ref().is_some_and(|p| p.id == project_id) {
            return Ok(());
        }
        if let Some(previous) = active.take() {
            previous.graph.save(&previous.path);
            info!(project = %previous.id, "project deactivated");
        }

        let path = self.config.graph_path(project_id);
        let graph = KnowledgeGraph::load(&path);
        info!(project = %project_id, nodes = graph.node_count(), edges = graph.edge_count(), "project activated");
        *active = Some(ActiveProject {
            id: project_id.to_string(),
            path,
            graph,
        });
        Ok(())
    }

    pub async fn active_project_id(&self) -> Option<String> {
        self.active.lock().await.as_ref().map(|p| p.id.clone())
    }

    /// Run `f` against the active graph.
    pub async fn with_graph<R>(&self, f: impl FnOnce(&KnowledgeGraph) -> R) -> Result<R, AppError> {
        let active = self.active.lock().await;
        let project = active.as_ref().ok_or(AppError::NoActiveProject)?;
        Ok(f(&project.graph))
    }

    pub async fn query_context(&self, entity: &str, current_chapter: i64, viewer: ViewerMode) -> Result<String, AppError> {
        self.with_graph(|g| g.query_context(entity, current_chapter, viewer)).await
    }

    pub async fn projection(&self) -> Result<GraphProjection, AppError> {
        self.with_graph(KnowledgeGraph::projection).await
    }

    pub async fn stats(&self) -> Result<GraphStats, AppError> {
        self.with_graph(KnowledgeGraph::stats).await
    }

    /// Save the active graph, surfacing write errors.
    pub async fn save_active(&self) -> Result<(), AppError> {
        let active = self.active.lock().await;
        let project = active.as_ref().ok_or(AppError::NoActiveProject)?;
        project.graph.try_save(&project.path)
    }

    /// Build the active project's graph from `chapters`.
    ///
    /// Fails fast with [`AppError::BuildInProgress`] while another build
    /// runs, with [`AppError::Config`] when the graph role lacks
    /// credentials, and with [`AppError::NoActiveProject`] when nothing is
    /// active.
    pub async fn build_project(
        &self,
        chapters: &[Chapter],
        progress: Option<&mut dyn FnMut(BuildProgress)>,
        cancel: &CancellationToken,
    ) -> Result<BuildReport, AppError> {
        if self
            .graph_task_running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            // The running build holds the graph lock, so don't wait for it.
            let project = self
                .active
                .try_lock()
                .ok()
                .and_then(|active| active.as_ref().map(|p| p.id.clone()))
                .unwrap_or_else(|| "(busy)".to_string());
            return Err(AppError::BuildInProgress(project));
        }
        let _running = RunningGuard(&self.graph_task_running);

        let provider = self.graph_provider()?;
        let mut active = self.active.lock().await;
        let project = active.as_mut().ok_or(AppError::NoActiveProject)?;

        let extractor = Extractor::new(provider, self.config.graph.clone(), project.id.clone());
        let builder = BatchBuilder::new(extractor, self.retriever.clone());
        let report = builder
            .build_from_chapters(&mut project.graph, &project.path, chapters, progress, cancel)
            .await;
        Ok(report)
    }

    /// Index `chapters` for retrieval under `project_id`. Returns the number
    /// of passages written (unchanged chapters contribute none).
    #[cfg(feature = "chapter-index")]
    pub async fn index_project(&self, project_id: &str, chapters: &[Chapter]) -> Result<usize, AppError> {
        let index = self
            .chapter_index
            .clone()
            .ok_or_else(|| AppError::Retrieval("chapter index is not available".into()))?;
        let project_id = project_id.to_string();
        let chapters = chapters.to_vec();

        tokio::task::spawn_blocking(move || {
            let mut written = 0;
            for chapter in &chapters {
                written += index.index_chapter(&project_id, &chapter.title, &chapter.content)?;
            }
            Ok::<_, AppError>(written)
        })
        .await
        .map_err(|e| AppError::Retrieval(format!("index task failed: {e}")))?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::graph::NewRelation;
    use tempfile::TempDir;

    fn context(dir: &TempDir) -> AppContext {
        AppContext::with_retriever(Config::defaults(dir.path()), None)
    }

    #[tokio::test]
    async fn queries_need_an_active_project() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert!(matches!(ctx.stats().await, Err(AppError::NoActiveProject)));
        assert!(matches!(
            ctx.build_project(&[], None, &CancellationToken::new()).await,
            Err(AppError::NoActiveProject)
        ));
        assert!(!ctx.is_build_running());
    }

    #[tokio::test]
    async fn switching_projects_saves_the_previous_graph() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        ctx.activate_project("alpha").await.unwrap();
        {
            let mut active = ctx.active.lock().await;
            let project = active.as_mut().unwrap();
            project.graph.add_relation(NewRelation::new("A", "B", "knows", 1));
        }
        ctx.activate_project("beta").await.unwrap();
        assert_eq!(ctx.active_project_id().await.as_deref(), Some("beta"));
        assert_eq!(ctx.stats().await.unwrap().edges, 0);

        let saved = KnowledgeGraph::load(&ctx.config().graph_path("alpha"));
        assert_eq!(saved.edge_count(), 1);

        ctx.activate_project("alpha").await.unwrap();
        assert_eq!(ctx.stats().await.unwrap().edges, 1);
    }

    #[tokio::test]
    async fn rejects_path_like_project_ids() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        assert!(ctx.activate_project("../escape").await.is_err());
        assert!(ctx.activate_project("  ").await.is_err());
    }

    #[tokio::test]
    async fn second_build_is_refused_while_running() {
        let dir = TempDir::new().unwrap();
        let ctx = context(&dir);
        ctx.activate_project("alpha").await.unwrap();
        ctx.graph_task_running.store(true, Ordering::Release);
        let err = ctx
            .build_project(&[], None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::BuildInProgress(ref id) if id == "alpha"));
    }

    #[tokio::test]
    async fn missing_credentials_block_the_build() {
        let dir = TempDir::new().unwrap();
        let mut config = Config::defaults(dir.path());
        config.roles.graph.provider = "openai".into();
        config.roles.graph.api_key = None;
        config.roles.writer.api_key = None;
        let ctx = AppContext::with_retriever(config, None);
        ctx.activate_project("alpha").await.unwrap();
        let err = ctx
            .build_project(&[], None, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Config(_)));
        assert!(!ctx.is_build_running());
    }
}
