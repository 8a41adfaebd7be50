//! Configuration loading with env-var overrides.
//!
//! Reads `config/default.toml` relative to the current working directory,
//! then applies `TALEWEAVE_WORK_DIR` and `TALEWEAVE_LOG_LEVEL` env overrides.
//! API keys are never read from TOML: each role looks up
//! `TALEWEAVE_<ROLE>_API_KEY` and falls back to `LLM_API_KEY`.

use std::{
    env, fs,
    path::{Path, PathBuf},
};

use serde::Deserialize;

use crate::error::AppError;

/// Schema version this build understands.
pub const CONFIG_VERSION: u32 = 1;

// ── Model settings ────────────────────────────────────────────────────────────

/// Partially specified model settings, as written in `[llm]` or
/// `[roles.<role>]`. Every field is optional so role sections can override
/// just what they need; [`ModelSettings::merge`] layers them.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ModelSettings {
    pub provider: Option<String>,
    pub api_base_url: Option<String>,
    pub model: Option<String>,
    pub temperature: Option<f32>,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    pub timeout_seconds: Option<u64>,
}

impl ModelSettings {
    /// Layer `overrides` on top of `defaults`: a field set in `overrides`
    /// wins, otherwise the default's value is kept.
    pub fn merge(defaults: &ModelSettings, overrides: &ModelSettings) -> ModelSettings {
        ModelSettings {
            provider: overrides.provider.clone().or_else(|| defaults.provider.clone()),
            api_base_url: overrides
                .api_base_url
                .clone()
                .or_else(|| defaults.api_base_url.clone()),
            model: overrides.model.clone().or_else(|| defaults.model.clone()),
            temperature: overrides.temperature.or(defaults.temperature),
            top_p: overrides.top_p.or(defaults.top_p),
            presence_penalty: overrides.presence_penalty.or(defaults.presence_penalty),
            frequency_penalty: overrides.frequency_penalty.or(defaults.frequency_penalty),
            timeout_seconds: overrides.timeout_seconds.or(defaults.timeout_seconds),
        }
    }

    /// Fill every remaining gap with built-in defaults.
    pub fn resolve(self, api_key: Option<String>) -> ModelConfig {
        ModelConfig {
            provider: self.provider.unwrap_or_else(default_llm_provider),
            api_base_url: self.api_base_url.unwrap_or_else(default_api_base_url),
            model: self.model.unwrap_or_else(default_model),
            temperature: self.temperature.unwrap_or(DEFAULT_TEMPERATURE),
            top_p: self.top_p,
            presence_penalty: self.presence_penalty,
            frequency_penalty: self.frequency_penalty,
            timeout_seconds: self.timeout_seconds.unwrap_or(DEFAULT_TIMEOUT_SECONDS),
            api_key: api_key.filter(|k| !k.trim().is_empty()),
        }
    }
}

/// Fully resolved settings for one model role.
#[derive(Debug, Clone, PartialEq)]
pub struct ModelConfig {
    /// `"dummy"`, `"openai"` or `"openai-compatible"`.
    pub provider: String,
    /// Full chat completions endpoint URL.
    pub api_base_url: String,
    pub model: String,
    pub temperature: f32,
    pub top_p: Option<f32>,
    pub presence_penalty: Option<f32>,
    pub frequency_penalty: Option<f32>,
    /// HTTP connect and per-read timeout in seconds.
    pub timeout_seconds: u64,
    /// From the environment only; `None` for keyless local models.
    pub api_key: Option<String>,
}

impl ModelConfig {
    /// Hosted OpenAI needs a key; local OpenAI-compatible servers and the
    /// offline providers do not.
    pub fn requires_api_key(&self) -> bool {
        self.provider == "openai"
    }

    pub fn has_credentials(&self) -> bool {
        !self.requires_api_key() || self.api_key.is_some()
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        ModelSettings::default().resolve(None)
    }
}

// ── Roles ─────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Writer,
    Reviewer,
    Analyzer,
    Chat,
    Graph,
}

impl Role {
    pub fn as_str(self) -> &'static str {
        match self {
            Role::Writer => "writer",
            Role::Reviewer => "reviewer",
            Role::Analyzer => "analyzer",
            Role::Chat => "chat",
            Role::Graph => "graph",
        }
    }

    /// Env var holding this role's API key.
    pub fn api_key_var(self) -> String {
        format!("TALEWEAVE_{}_API_KEY", self.as_str().to_ascii_uppercase())
    }
}

/// One resolved [`ModelConfig`] per role.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Roles {
    pub writer: ModelConfig,
    pub reviewer: ModelConfig,
    pub analyzer: ModelConfig,
    pub chat: ModelConfig,
    pub graph: ModelConfig,
}

impl Roles {
    /// Model settings the extraction pipeline should use.
    ///
    /// When the graph role needs a key it does not have but the writer role
    /// is credentialed, the writer's model settings are borrowed.
    pub fn graph_effective(&self) -> ModelConfig {
        let graph = &self.graph;
        if graph.requires_api_key() && graph.api_key.is_none() && self.writer.api_key.is_some() {
            self.writer.clone()
        } else {
            graph.clone()
        }
    }
}

// ── Graph settings ────────────────────────────────────────────────────────────

/// Tuning knobs for extraction and batch builds (`[graph]`).
#[derive(Debug, Clone, PartialEq)]
pub struct GraphConfig {
    /// Chapters shorter than this (in characters) are not extracted.
    pub min_chapter_chars: usize,
    /// Retrieval is only attempted for chapters longer than this.
    pub retrieval_min_chars: usize,
    /// Characters taken from each end of the chapter for the retrieval query.
    pub retrieval_probe_chars: usize,
    pub retrieval_max_results: usize,
    /// Prefix of the chapter fed to the model.
    pub excerpt_chars: usize,
    /// Checkpoint when `index % checkpoint_every == 0`.
    pub checkpoint_every: usize,
    /// Pause between chapters in milliseconds; 0 disables.
    pub pause_ms: u64,
    /// Skip triples whose exact attributes already exist in the graph.
    pub dedup_edges: bool,
    pub chapter_marker: String,
    pub min_marked_chapter_chars: usize,
    pub fallback_chunk_chars: usize,
}

impl Default for GraphConfig {
    fn default() -> Self {
        RawGraph::default().into()
    }
}

// ── Resolved config ───────────────────────────────────────────────────────────

#[derive(Debug, Clone)]
pub struct Config {
    pub version: u32,
    /// Root for all persistent data (already expanded, no `~`).
    pub work_dir: PathBuf,
    pub log_level: String,
    pub log_file: Option<PathBuf>,
    pub roles: Roles,
    pub graph: GraphConfig,
}

impl Config {
    /// Built-in defaults rooted at `work_dir`: offline `dummy` provider for
    /// every role, default graph tuning.
    pub fn defaults(work_dir: &Path) -> Self {
        Self {
            version: CONFIG_VERSION,
            work_dir: work_dir.to_path_buf(),
            log_level: "info".into(),
            log_file: None,
            roles: Roles::default(),
            graph: GraphConfig::default(),
        }
    }

    pub fn projects_dir(&self) -> PathBuf {
        self.work_dir.join("projects")
    }

    /// `<work_dir>/projects/<project_id>_graph.json`
    pub fn graph_path(&self, project_id: &str) -> PathBuf {
        self.projects_dir().join(format!("{project_id}_graph.json"))
    }

    pub fn index_dir(&self) -> PathBuf {
        self.work_dir.join("index")
    }
}

// ── Raw TOML shape ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct RawConfig {
    app: RawApp,
    #[serde(default)]
    llm: ModelSettings,
    #[serde(default)]
    roles: RawRoles,
    #[serde(default)]
    graph: RawGraph,
}

#[derive(Deserialize)]
struct RawApp {
    #[serde(default = "default_version")]
    version: u32,
    work_dir: String,
    log_level: String,
    #[serde(default)]
    log_file: Option<String>,
}

#[derive(Deserialize, Default)]
struct RawRoles {
    #[serde(default)]
    writer: ModelSettings,
    #[serde(default)]
    reviewer: ModelSettings,
    #[serde(default)]
    analyzer: ModelSettings,
    #[serde(default)]
    chat: ModelSettings,
    #[serde(default)]
    graph: ModelSettings,
}

#[derive(Deserialize)]
struct RawGraph {
    #[serde(default = "default_min_chapter_chars")]
    min_chapter_chars: usize,
    #[serde(default = "default_retrieval_min_chars")]
    retrieval_min_chars: usize,
    #[serde(default = "default_retrieval_probe_chars")]
    retrieval_probe_chars: usize,
    #[serde(default = "default_retrieval_max_results")]
    retrieval_max_results: usize,
    #[serde(default = "default_excerpt_chars")]
    excerpt_chars: usize,
    #[serde(default = "default_checkpoint_every")]
    checkpoint_every: usize,
    #[serde(default = "default_pause_ms")]
    pause_ms: u64,
    #[serde(default)]
    dedup_edges: bool,
    #[serde(default = "default_chapter_marker")]
    chapter_marker: String,
    #[serde(default = "default_min_marked_chapter_chars")]
    min_marked_chapter_chars: usize,
    #[serde(default = "default_fallback_chunk_chars")]
    fallback_chunk_chars: usize,
}

impl Default for RawGraph {
    fn default() -> Self {
        Self {
            min_chapter_chars: default_min_chapter_chars(),
            retrieval_min_chars: default_retrieval_min_chars(),
            retrieval_probe_chars: default_retrieval_probe_chars(),
            retrieval_max_results: default_retrieval_max_results(),
            excerpt_chars: default_excerpt_chars(),
            checkpoint_every: default_checkpoint_every(),
            pause_ms: default_pause_ms(),
            dedup_edges: false,
            chapter_marker: default_chapter_marker(),
            min_marked_chapter_chars: default_min_marked_chapter_chars(),
            fallback_chunk_chars: default_fallback_chunk_chars(),
        }
    }
}

impl From<RawGraph> for GraphConfig {
    fn from(raw: RawGraph) -> Self {
        Self {
            min_chapter_chars: raw.min_chapter_chars,
            retrieval_min_chars: raw.retrieval_min_chars,
            retrieval_probe_chars: raw.retrieval_probe_chars,
            retrieval_max_results: raw.retrieval_max_results,
            excerpt_chars: raw.excerpt_chars,
            // A zero interval would divide by zero in the build loop.
            checkpoint_every: raw.checkpoint_every.max(1),
            pause_ms: raw.pause_ms,
            dedup_edges: raw.dedup_edges,
            chapter_marker: raw.chapter_marker,
            min_marked_chapter_chars: raw.min_marked_chapter_chars,
            fallback_chunk_chars: raw.fallback_chunk_chars.max(1),
        }
    }
}

const DEFAULT_TEMPERATURE: f32 = 0.7;
const DEFAULT_TIMEOUT_SECONDS: u64 = 60;

fn default_version() -> u32 { CONFIG_VERSION }
fn default_llm_provider() -> String { "dummy".to_string() }
fn default_api_base_url() -> String { "https://api.openai.com/v1/chat/completions".to_string() }
fn default_model() -> String { "gpt-4o-mini".to_string() }
fn default_min_chapter_chars() -> usize { 50 }
fn default_retrieval_min_chars() -> usize { 200 }
fn default_retrieval_probe_chars() -> usize { 100 }
fn default_retrieval_max_results() -> usize { 3 }
fn default_excerpt_chars() -> usize { 2500 }
fn default_checkpoint_every() -> usize { 3 }
fn default_pause_ms() -> u64 { 500 }
fn default_chapter_marker() -> String { "第".to_string() }
fn default_min_marked_chapter_chars() -> usize { 100 }
fn default_fallback_chunk_chars() -> usize { 3000 }

// ── Loading ───────────────────────────────────────────────────────────────────

/// Load config from `path` (default `config/default.toml`), then apply
/// env-var overrides.
pub fn load(path: Option<&Path>) -> Result<Config, AppError> {
    let work_dir_override = env::var("TALEWEAVE_WORK_DIR").ok();
    let log_level_override = env::var("TALEWEAVE_LOG_LEVEL").ok();
    load_from(
        path.unwrap_or(Path::new("config/default.toml")),
        work_dir_override.as_deref(),
        log_level_override.as_deref(),
    )
}

/// Internal loader: accepts an explicit path and optional overrides.
/// Tests pass overrides directly instead of mutating env vars.
pub fn load_from(
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let raw = fs::read_to_string(path)
        .map_err(|e| AppError::Config(format!("cannot read {}: {e}", path.display())))?;
    parse(&raw, path, work_dir_override, log_level_override)
}

fn parse(
    raw: &str,
    path: &Path,
    work_dir_override: Option<&str>,
    log_level_override: Option<&str>,
) -> Result<Config, AppError> {
    let parsed: RawConfig = toml::from_str(raw)
        .map_err(|e| AppError::Config(format!("parse error in {}: {e}", path.display())))?;

    let app = parsed.app;
    if app.version != CONFIG_VERSION {
        return Err(AppError::Config(format!(
            "unsupported config version {} in {}, expected {CONFIG_VERSION}",
            app.version,
            path.display()
        )));
    }

    let work_dir = expand_home(work_dir_override.unwrap_or(&app.work_dir));
    let log_level = log_level_override.unwrap_or(&app.log_level).to_string();
    let log_file = app.log_file.map(|f| {
        let p = expand_home(&f);
        if p.is_absolute() { p } else { work_dir.join(p) }
    });

    let role = |role: Role, settings: &ModelSettings| {
        ModelSettings::merge(&parsed.llm, settings).resolve(api_key_for(role))
    };
    let roles = Roles {
        writer: role(Role::Writer, &parsed.roles.writer),
        reviewer: role(Role::Reviewer, &parsed.roles.reviewer),
        analyzer: role(Role::Analyzer, &parsed.roles.analyzer),
        chat: role(Role::Chat, &parsed.roles.chat),
        graph: role(Role::Graph, &parsed.roles.graph),
    };

    Ok(Config {
        version: app.version,
        work_dir,
        log_level,
        log_file,
        roles,
        graph: parsed.graph.into(),
    })
}

fn api_key_for(role: Role) -> Option<String> {
    env::var(role.api_key_var())
        .ok()
        .or_else(|| env::var("LLM_API_KEY").ok())
}

/// Expand a leading `~` to the user's home directory.
/// Absolute or relative paths without `~` are returned unchanged.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(rest);
        }
    }
    if path == "~" {
        if let Some(home) = dirs::home_dir() {
            return home;
        }
    }
    PathBuf::from(path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const MINIMAL_TOML: &str = r#"
[app]
work_dir = "~/.taleweave"
log_level = "info"
"#;

    fn write_toml(content: &str) -> NamedTempFile {
        let mut f = NamedTempFile::new().unwrap();
        f.write_all(content.as_bytes()).unwrap();
        f
    }

    #[test]
    fn shipped_default_config_parses() {
        let cfg = load_from(Path::new("config/default.toml"), Some("/tmp/taleweave-test"), None).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/taleweave-test"));
        assert_eq!(cfg.roles.graph.temperature, 0.1);
        assert_eq!(cfg.graph, GraphConfig::default());
    }

    #[test]
    fn parse_minimal_config_uses_defaults() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.version, CONFIG_VERSION);
        assert_eq!(cfg.log_level, "info");
        assert_eq!(cfg.roles.graph.provider, "dummy");
        assert_eq!(cfg.graph, GraphConfig::default());
        assert_eq!(cfg.graph.min_chapter_chars, 50);
        assert_eq!(cfg.graph.excerpt_chars, 2500);
        assert_eq!(cfg.graph.checkpoint_every, 3);
    }

    #[test]
    fn role_sections_override_llm_defaults() {
        let toml = r#"
[app]
work_dir = "/tmp/tw"
log_level = "debug"

[llm]
provider = "openai-compatible"
model = "base-model"
temperature = 0.5

[roles.graph]
model = "extractor-model"
temperature = 0.0
"#;
        let f = write_toml(toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.roles.writer.model, "base-model");
        assert_eq!(cfg.roles.writer.temperature, 0.5);
        assert_eq!(cfg.roles.graph.provider, "openai-compatible");
        assert_eq!(cfg.roles.graph.model, "extractor-model");
        assert_eq!(cfg.roles.graph.temperature, 0.0);
    }

    #[test]
    fn graph_section_parses() {
        let toml = r#"
[app]
work_dir = "/tmp/tw"
log_level = "info"

[graph]
pause_ms = 0
dedup_edges = true
checkpoint_every = 0
chapter_marker = "Chapter"
"#;
        let f = write_toml(toml);
        let cfg = load_from(f.path(), None, None).unwrap();
        assert_eq!(cfg.graph.pause_ms, 0);
        assert!(cfg.graph.dedup_edges);
        assert_eq!(cfg.graph.checkpoint_every, 1);
        assert_eq!(cfg.graph.chapter_marker, "Chapter");
    }

    #[test]
    fn unsupported_version_rejected() {
        let toml = r#"
[app]
version = 2
work_dir = "/tmp/tw"
log_level = "info"
"#;
        let f = write_toml(toml);
        let err = load_from(f.path(), None, None).unwrap_err();
        assert!(err.to_string().contains("unsupported config version 2"));
    }

    #[test]
    fn unknown_model_field_rejected() {
        let toml = r#"
[app]
work_dir = "/tmp/tw"
log_level = "info"

[roles.writer]
api_key = "sk-should-not-be-here"
"#;
        let f = write_toml(toml);
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn merge_prefers_overrides() {
        let defaults = ModelSettings {
            model: Some("a".into()),
            temperature: Some(0.7),
            ..ModelSettings::default()
        };
        let overrides = ModelSettings {
            model: Some("b".into()),
            ..ModelSettings::default()
        };
        let merged = ModelSettings::merge(&defaults, &overrides);
        assert_eq!(merged.model.as_deref(), Some("b"));
        assert_eq!(merged.temperature, Some(0.7));
    }

    #[test]
    fn blank_api_key_is_treated_as_missing() {
        let cfg = ModelSettings::default().resolve(Some("  ".into()));
        assert!(cfg.api_key.is_none());
    }

    #[test]
    fn graph_borrows_writer_credentials() {
        let mut roles = Roles::default();
        roles.writer = ModelConfig {
            provider: "openai".into(),
            model: "writer-model".into(),
            api_key: Some("sk-writer".into()),
            ..ModelConfig::default()
        };
        roles.graph = ModelConfig {
            provider: "openai".into(),
            ..ModelConfig::default()
        };
        let effective = roles.graph_effective();
        assert_eq!(effective.model, "writer-model");
        assert_eq!(effective.api_key.as_deref(), Some("sk-writer"));
    }

    #[test]
    fn keyless_graph_role_kept_as_is() {
        let roles = Roles::default();
        assert_eq!(roles.graph_effective(), roles.graph);
        assert!(roles.graph_effective().has_credentials());
    }

    #[test]
    fn role_api_key_var_names() {
        assert_eq!(Role::Graph.api_key_var(), "TALEWEAVE_GRAPH_API_KEY");
        assert_eq!(Role::Writer.api_key_var(), "TALEWEAVE_WRITER_API_KEY");
    }

    #[test]
    fn role_system_prompt_rejected() {
        let toml = r#"
[app]
work_dir = "/tmp/tw"
log_level = "info"

[roles.graph]
system_prompt = "extract"
"#;
        let f = write_toml(toml);
        assert!(load_from(f.path(), None, None).is_err());
    }

    #[test]
    fn graph_path_is_project_scoped() {
        let cfg = Config::defaults(Path::new("/data"));
        assert_eq!(
            cfg.graph_path("novel"),
            PathBuf::from("/data/projects/novel_graph.json")
        );
    }

    #[test]
    fn tilde_expands_to_home() {
        let home = dirs::home_dir().expect("home dir must exist in test env");
        let expanded = expand_home("~/.taleweave");
        assert!(expanded.starts_with(&home));
        assert!(expanded.ends_with(".taleweave"));
    }

    #[test]
    fn absolute_path_unchanged() {
        assert_eq!(expand_home("/absolute/path"), PathBuf::from("/absolute/path"));
    }

    #[test]
    fn missing_file_errors() {
        let result = load_from(Path::new("/nonexistent/config.toml"), None, None);
        let msg = result.unwrap_err().to_string();
        assert!(msg.contains("config error"));
    }

    #[test]
    fn env_overrides_apply() {
        let f = write_toml(MINIMAL_TOML);
        let cfg = load_from(f.path(), Some("/tmp/override"), Some("debug")).unwrap();
        assert_eq!(cfg.work_dir, PathBuf::from("/tmp/override"));
        assert_eq!(cfg.log_level, "debug");
    }
}
