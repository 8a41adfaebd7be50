//! taleweave: command-line entry point.
//!
//! Startup sequence:
//!   1. Load .env (if present)
//!   2. Parse CLI args
//!   3. Load config
//!   4. Resolve effective log level (CLI > env > config) and init logger
//!   5. Build the application context
//!   6. Run the requested command

use std::path::{Path, PathBuf};
use std::process;

use tokio_util::sync::CancellationToken;
use tracing::info;

use taleweave::config;
use taleweave::error::AppError;
use taleweave::logger;
use taleweave::{AppContext, BuildProgress, ViewerMode, chapters};

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        eprintln!("error: {e}");
        process::exit(1);
    }
}

async fn run() -> Result<(), AppError> {
    // Load .env if present; the file is optional.
    let _ = dotenvy::dotenv();

    let args = parse_cli_args();
    let Some(command) = args.command.as_deref() else {
        print_help();
        process::exit(2);
    };

    let config = config::load(args.config_path.as_deref().map(Path::new))?;

    let effective_log_level = match args.log_level.as_deref() {
        Some(level) => {
            logger::parse_level(level)?;
            level
        }
        None => config.log_level.as_str(),
    };
    if config.log_file.is_some() {
        std::fs::create_dir_all(&config.work_dir)?;
    }
    logger::init(effective_log_level, args.log_level.is_some(), config.log_file.as_deref())?;

    info!(
        work_dir = %config.work_dir.display(),
        configured_log_level = %config.log_level,
        effective_log_level = %effective_log_level,
        graph_provider = %config.roles.graph_effective().provider,
        "config loaded"
    );

    let ctx = AppContext::new(config);
    let rest = &args.rest;

    match command {
        "build" => {
            let (project, source) = two_args(rest, "build <project> <manuscript.txt | chapters-dir>")?;
            cmd_build(&ctx, project, Path::new(source)).await
        }
        "query" => {
            let (project, entity) = two_args(rest, "query <project> <entity>")?;
            cmd_query(&ctx, project, entity, args.chapter, args.mode).await
        }
        "viz" => {
            let project = one_arg(rest, "viz <project>")?;
            ctx.activate_project(project).await?;
            let projection = ctx.projection().await?;
            let json = serde_json::to_string_pretty(&projection)
                .map_err(|e| AppError::Graph(format!("cannot serialise projection: {e}")))?;
            println!("{json}");
            Ok(())
        }
        "stats" => {
            let project = one_arg(rest, "stats <project>")?;
            ctx.activate_project(project).await?;
            let stats = ctx.stats().await?;
            println!("project       {project}");
            println!("entities      {}", stats.nodes);
            println!("relations     {}", stats.edges);
            println!("secret        {}", stats.secret_edges);
            println!("last chapter  {}", stats.max_chapter);
            Ok(())
        }
        #[cfg(feature = "chapter-index")]
        "index" => {
            let (project, source) = two_args(rest, "index <project> <manuscript.txt | chapters-dir>")?;
            let chapters = chapters::load_source(Path::new(source), &ctx.config().graph)?;
            let written = ctx.index_project(project, &chapters).await?;
            println!("ok  indexed {} chapters ({written} new passages) for {project}", chapters.len());
            Ok(())
        }
        other => Err(AppError::Config(format!(
            "unknown command: {other}\n  run 'taleweave --help' for usage"
        ))),
    }
}

async fn cmd_build(ctx: &AppContext, project: &str, source: &Path) -> Result<(), AppError> {
    let chapters = chapters::load_source(source, &ctx.config().graph)?;
    ctx.activate_project(project).await?;

    // Ctrl-C stops the build at the next chapter boundary; the graph is
    // still saved.
    let cancel = CancellationToken::new();
    let ctrlc_token = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            info!("ctrl-c received, stopping after the current chapter");
            ctrlc_token.cancel();
        }
    });

    let mut print_progress = |p: BuildProgress| {
        eprintln!("[{:>3.0}%] {}", p.fraction * 100.0, p.message);
    };
    let report = ctx
        .build_project(&chapters, Some(&mut print_progress), &cancel)
        .await?;

    let state = if report.cancelled { "cancelled" } else { "ok" };
    println!(
        "{state}  {}/{} chapters, {} relations added, {} checkpoints → {}",
        report.chapters_processed,
        report.chapters_total,
        report.edges_added,
        report.checkpoints.len(),
        ctx.config().graph_path(project).display()
    );
    Ok(())
}

async fn cmd_query(
    ctx: &AppContext,
    project: &str,
    entity: &str,
    chapter: Option<i64>,
    mode: ViewerMode,
) -> Result<(), AppError> {
    ctx.activate_project(project).await?;
    let chapter = match chapter {
        Some(c) => c,
        None => ctx.stats().await?.max_chapter,
    };
    let text = ctx.query_context(entity, chapter, mode).await?;
    if text.is_empty() {
        println!("(nothing known about '{}' at chapter {chapter} in {mode} mode)", entity.trim());
    } else {
        println!("{text}");
    }
    Ok(())
}

fn one_arg<'a>(rest: &'a [String], usage: &str) -> Result<&'a str, AppError> {
    match rest {
        [a, ..] => Ok(a.as_str()),
        _ => Err(AppError::Config(format!("usage: taleweave {usage}"))),
    }
}

fn two_args<'a>(rest: &'a [String], usage: &str) -> Result<(&'a str, &'a str), AppError> {
    match rest {
        [a, b, ..] => Ok((a.as_str(), b.as_str())),
        _ => Err(AppError::Config(format!("usage: taleweave {usage}"))),
    }
}

// ── CLI arg parsing ────────────────────────────────────────────────────────

struct CliArgs {
    config_path: Option<PathBuf>,
    log_level: Option<String>,
    chapter: Option<i64>,
    mode: ViewerMode,
    command: Option<String>,
    rest: Vec<String>,
}

fn parse_cli_args() -> CliArgs {
    let mut verbosity = 0u8;
    let mut log_level = None;
    let mut config_path = None;
    let mut chapter = None;
    let mut mode = ViewerMode::default();
    let mut command = None;
    let mut rest = Vec::new();

    let mut iter = std::env::args().skip(1);
    while let Some(arg) = iter.next() {
        match arg.as_str() {
            "-h" | "--help" => {
                print_help();
                process::exit(0);
            }
            "-f" | "--config" => config_path = Some(PathBuf::from(required(&mut iter, "-f/--config"))),
            "--log-level" => log_level = Some(required(&mut iter, "--log-level")),
            "--chapter" => {
                let value = required(&mut iter, "--chapter");
                match value.parse::<i64>() {
                    Ok(n) => chapter = Some(n),
                    Err(_) => fail(&format!("--chapter expects an integer, got '{value}'")),
                }
            }
            "--mode" => {
                let value = required(&mut iter, "--mode");
                match value.parse::<ViewerMode>() {
                    Ok(m) => mode = m,
                    Err(e) => fail(&e),
                }
            }
            "--verbose" => verbosity = verbosity.saturating_add(1),
            a if a.starts_with('-') && a.len() > 1 && a.chars().skip(1).all(|c| c == 'v') => {
                verbosity = verbosity.saturating_add((a.len() - 1) as u8);
            }
            "--" => {
                rest.extend(iter.by_ref());
                break;
            }
            _ if command.is_none() => command = Some(arg),
            _ => rest.push(arg),
        }
    }

    // -v → info, -vv → debug, -vvv+ → trace
    if log_level.is_none() {
        log_level = match verbosity {
            0 => None,
            1 => Some("info".to_string()),
            2 => Some("debug".to_string()),
            _ => Some("trace".to_string()),
        };
    }

    CliArgs { config_path, log_level, chapter, mode, command, rest }
}

fn required(iter: &mut impl Iterator<Item = String>, flag: &str) -> String {
    iter.next().unwrap_or_else(|| fail(&format!("{flag} requires an argument")))
}

fn fail(message: &str) -> ! {
    eprintln!("error: {message}");
    process::exit(1);
}

fn print_help() {
    eprintln!("usage: taleweave [OPTIONS] <command> [args]");
    eprintln!();
    eprintln!("commands:");
    eprintln!("  build <project> <manuscript.txt | chapters-dir>   extract the relation graph");
    eprintln!("  query <project> <entity>                          what is known about an entity");
    eprintln!("  viz   <project>                                   node/link JSON for graph views");
    eprintln!("  stats <project>                                   graph size summary");
    #[cfg(feature = "chapter-index")]
    eprintln!("  index <project> <manuscript.txt | chapters-dir>   index chapters for retrieval");
    eprintln!();
    eprintln!("options:");
    eprintln!("  -f, --config <path>     config file (default: config/default.toml)");
    eprintln!("      --chapter <n>       chapter the reader has reached (query; default: latest)");
    eprintln!("      --mode <mode>       author | reader (query; default: reader)");
    eprintln!("      --log-level <lvl>   override the configured log level");
    eprintln!("  -v, -vv, -vvv           increase logging verbosity");
    eprintln!("  -h, --help              print this help");
}
