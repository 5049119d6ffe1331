use std::io::{BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tokio::sync::watch;
use tracing::{error, warn};
use tracing_subscriber::{EnvFilter, layer::SubscriberExt, util::SubscriberInitExt};

use litscope_ai::AiError;
use litscope_cli::services::Services;
use litscope_cli::workflow::{ResumePolicy, RunOptions};
use litscope_core::{AppConfig, CoreError, ExitCode, RunProgress};
use litscope_science::ScienceError;

// ─── CLI Definition ─────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(
    name = "litscope",
    about = "Resumable literature search, download and summarization",
    version,
    long_about = None
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output in JSON format. Also enabled by setting LITSCOPE_JSON=1.
    #[arg(long, global = true)]
    json: bool,

    /// Log level (trace, debug, info, warn, error); RUST_LOG takes precedence.
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Output logs as JSON.
    #[arg(long, global = true)]
    json_logs: bool,

    /// Config file (defaults to <config_dir>/litscope/config.toml).
    #[arg(long, global = true, env = "LITSCOPE_CONFIG")]
    config: Option<PathBuf>,

    /// Data directory, overriding the config file.
    #[arg(long, global = true)]
    data_dir: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Search, download and summarize in one resumable run.
    Run {
        #[arg(required = true)]
        keywords: Vec<String>,
        /// Unique results per keyword.
        #[arg(long)]
        limit: Option<usize>,
        /// Parallel summarization workers.
        #[arg(long)]
        workers: Option<usize>,
        /// Parallel downloads.
        #[arg(long)]
        download_workers: Option<usize>,
        /// Resume an unfinished run without asking.
        #[arg(long, conflicts_with = "fresh")]
        yes: bool,
        /// Archive any unfinished run and start over.
        #[arg(long)]
        fresh: bool,
        /// When resuming, retry papers that failed in that run.
        #[arg(long, conflicts_with = "fresh")]
        retry_failed: bool,
    },

    /// Search sources and add the results to the library.
    Search {
        #[arg(required = true)]
        keywords: Vec<String>,
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Download PDFs for library entries that have none.
    Download {
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Summarize every library entry that has a PDF.
    Summarize {
        #[arg(long)]
        workers: Option<usize>,
    },

    /// Remove entries without a PDF and leftover partial downloads.
    Cleanup,

    /// Show progress of the current run.
    Status,
}

// ─── Main ────────────────────────────────────────────────────────────────────

fn init_tracing(log_level: &str, json: bool) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(log_level));
    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(tracing_subscriber::fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(tracing_subscriber::fmt::layer().compact().with_writer(std::io::stderr))
            .init();
    }
}

#[tokio::main]
async fn main() {
    let start = Instant::now();
    let cli = Cli::parse();
    init_tracing(&cli.log_level, cli.json_logs);

    let json_output = cli.json || std::env::var("LITSCOPE_JSON").as_deref() == Ok("1");

    let code = match execute(cli, json_output, start).await {
        Ok(code) => code,
        Err(e) => {
            let code = exit_code_for(&e);
            error!(error = %format!("{e:#}"), "command failed");
            if json_output {
                print_json(&serde_json::json!({
                    "status": "error",
                    "error": format!("{code:?}"),
                    "message": format!("{e:#}"),
                    "meta": { "duration_ms": start.elapsed().as_millis() }
                }));
            } else {
                eprintln!("error: {e:#}");
            }
            code
        }
    };
    std::process::exit(code as i32);
}

async fn execute(cli: Cli, json_output: bool, start: Instant) -> Result<ExitCode> {
    let mut config = match &cli.config {
        Some(path) => {
            let mut config = AppConfig::load_from(path)?;
            config.apply_env_overrides();
            config
        }
        None => AppConfig::load()?,
    };
    if let Some(dir) = cli.data_dir {
        config.set_data_dir(dir);
    }

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received; finishing in-flight work before exiting");
            let _ = shutdown_tx.send(true);
        }
    });

    let services = Services::from_config(config, shutdown_rx.clone())?;
    let orchestrator = services.orchestrator(shutdown_rx);
    let cfg = &services.config;

    let code = match cli.command {
        Commands::Run {
            keywords,
            limit,
            workers,
            download_workers,
            yes,
            fresh,
            retry_failed,
        } => {
            let resume = if fresh {
                ResumePolicy::Fresh
            } else if yes || json_output || !std::io::stdin().is_terminal() {
                ResumePolicy::Resume
            } else {
                match orchestrator.pending_run()? {
                    Some(run) if !confirm_resume(&run)? => ResumePolicy::Fresh,
                    _ => ResumePolicy::Resume,
                }
            };
            let options = RunOptions {
                keywords,
                limit_per_keyword: limit.unwrap_or(cfg.search.limit_per_keyword),
                download_workers: download_workers.unwrap_or(cfg.download.workers),
                summarize_workers: workers.unwrap_or(cfg.summarize.max_workers),
                resume,
                retry_failed,
            };

            let result = orchestrator.run(&options).await?;
            let dur = start.elapsed().as_millis();
            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": result,
                    "meta": { "duration_ms": dur }
                }));
            } else {
                if result.resumed {
                    println!("Resumed run for: {}", result.keywords.join(", "));
                }
                println!("Papers found:         {}", result.papers_found);
                println!(
                    "PDFs downloaded:      {} ({} new, {} already present, {} failed)",
                    result.papers_downloaded,
                    result.papers_newly_downloaded,
                    result.papers_already_existed,
                    result.papers_failed_download
                );
                println!(
                    "Summaries:            {} generated, {} skipped, {} failed",
                    result.summaries_generated, result.summaries_skipped, result.summaries_failed
                );
                for d in result.download_results.iter().filter(|d| !d.success) {
                    let reason = d.failure_reason.map(|r| r.as_str()).unwrap_or("unknown");
                    println!("  ✗ download {}: {reason}", d.citation_key);
                }
                for s in result.summarization_results.iter().filter(|s| !s.success) {
                    println!(
                        "  ✗ summary {}: {}",
                        s.citation_key,
                        s.error.as_deref().unwrap_or("unknown error")
                    );
                }
                println!("Finished in {:.1}s", result.total_time);
            }
            result.exit_code()
        }

        Commands::Search { keywords, limit } => {
            let found = orchestrator
                .search(&keywords, limit.unwrap_or(cfg.search.limit_per_keyword))
                .await?;
            let dur = start.elapsed().as_millis();
            if json_output {
                let items: Vec<_> = found
                    .iter()
                    .map(|(key, r)| serde_json::json!({ "citation_key": key, "paper": r }))
                    .collect();
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "items": items, "total": found.len(), "keywords": keywords },
                    "meta": { "duration_ms": dur }
                }));
            } else if found.is_empty() {
                println!("No results for: {}", keywords.join(", "));
            } else {
                println!("Found {} papers:", found.len());
                for (key, r) in &found {
                    let year = r.year.map(|y| y.to_string()).unwrap_or_default();
                    println!("  {key:<32} {year:<5} {}", r.title);
                }
            }
            if found.is_empty() {
                ExitCode::NothingToDo
            } else {
                ExitCode::Success
            }
        }

        Commands::Download { workers } => {
            let results = orchestrator
                .download_missing(workers.unwrap_or(cfg.download.workers))
                .await?;
            let ok = results.iter().filter(|r| r.success).count();
            let dur = start.elapsed().as_millis();
            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "items": results, "downloaded": ok, "total": results.len() },
                    "meta": { "duration_ms": dur }
                }));
            } else if results.is_empty() {
                println!("Every library entry already has a PDF.");
            } else {
                for r in &results {
                    match &r.failure_reason {
                        None => println!("  ✓ {}", r.citation_key),
                        Some(reason) => println!("  ✗ {}: {reason}", r.citation_key),
                    }
                }
                println!("Downloaded {ok} of {}", results.len());
            }
            if results.is_empty() {
                ExitCode::NothingToDo
            } else if ok > 0 {
                ExitCode::Success
            } else {
                ExitCode::GeneralError
            }
        }

        Commands::Summarize { workers } => {
            let results = orchestrator
                .summarize_library(workers.unwrap_or(cfg.summarize.max_workers))
                .await?;
            let generated = results.iter().filter(|r| r.success && !r.skipped).count();
            let skipped = results.iter().filter(|r| r.skipped).count();
            let dur = start.elapsed().as_millis();
            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": { "items": results, "generated": generated, "skipped": skipped },
                    "meta": { "duration_ms": dur }
                }));
            } else if results.is_empty() {
                println!("No downloaded papers to summarize.");
            } else {
                for r in results.iter().filter(|r| !r.skipped) {
                    if r.success {
                        println!("  ✓ {} (score {:.2}, {} attempts)", r.citation_key, r.quality_score, r.attempts);
                    } else {
                        println!("  ✗ {}: {}", r.citation_key, r.error.as_deref().unwrap_or("unknown error"));
                    }
                }
                println!("{generated} generated, {skipped} already summarized");
            }
            if results.is_empty() {
                ExitCode::NothingToDo
            } else if generated + skipped > 0 {
                ExitCode::Success
            } else {
                ExitCode::GeneralError
            }
        }

        Commands::Cleanup => {
            let report = orchestrator.cleanup()?;
            let dur = start.elapsed().as_millis();
            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": report,
                    "meta": { "duration_ms": dur }
                }));
            } else if report.is_empty() {
                println!("Nothing to clean up.");
            } else {
                for key in &report.removed_entries {
                    println!("  removed entry {key}");
                }
                for path in &report.removed_temp_files {
                    println!("  removed {}", path.display());
                }
            }
            if report.is_empty() {
                ExitCode::NothingToDo
            } else {
                ExitCode::Success
            }
        }

        Commands::Status => {
            let run = orchestrator.status()?;
            let dur = start.elapsed().as_millis();
            if json_output {
                print_json(&serde_json::json!({
                    "status": "ok",
                    "data": run,
                    "meta": { "duration_ms": dur }
                }));
            } else {
                match &run {
                    None => println!("No run in progress."),
                    Some(run) => print_run(run),
                }
            }
            if run.is_some() {
                ExitCode::Success
            } else {
                ExitCode::NothingToDo
            }
        }
    };
    Ok(code)
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn print_json(val: &serde_json::Value) {
    match serde_json::to_string_pretty(val) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("error: cannot serialize output: {e}"),
    }
}

fn print_run(run: &RunProgress) {
    println!("Run {} started {}", run.run_id, run.created_at.format("%Y-%m-%d %H:%M"));
    if !run.keywords.is_empty() {
        println!("Keywords:   {}", run.keywords.join(", "));
    }
    println!(
        "Summarized: {}/{}  failed: {}  pending: {}",
        run.completed_summaries(),
        run.total_papers,
        run.failed(),
        run.pending_keys().len()
    );
    for entry in run.entries.values().filter(|e| e.last_error.is_some()) {
        println!(
            "  {} [{}] {}",
            entry.citation_key,
            entry.status,
            entry.last_error.as_deref().unwrap_or_default()
        );
    }
}

fn confirm_resume(run: &RunProgress) -> Result<bool> {
    eprint!(
        "Unfinished run from {} ({}/{} summarized, keywords: {}). Resume? [Y/n] ",
        run.created_at.format("%Y-%m-%d %H:%M"),
        run.completed_summaries(),
        run.total_papers,
        run.keywords.join(", ")
    );
    std::io::stderr().flush()?;
    let mut answer = String::new();
    std::io::stdin().lock().read_line(&mut answer)?;
    let answer = answer.trim().to_lowercase();
    Ok(answer.is_empty() || answer == "y" || answer == "yes")
}

fn exit_code_for(err: &anyhow::Error) -> ExitCode {
    for cause in err.chain() {
        if cause.is::<AiError>() {
            return ExitCode::AiError;
        }
        if cause.is::<ScienceError>() {
            return ExitCode::NetworkError;
        }
        if let Some(CoreError::ConfigError(_)) = cause.downcast_ref::<CoreError>() {
            return ExitCode::GeneralError;
        }
        if cause.is::<CoreError>() || cause.is::<std::io::Error>() {
            return ExitCode::FileSystemError;
        }
    }
    ExitCode::GeneralError
}
