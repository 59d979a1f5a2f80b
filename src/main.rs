use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use indicatif::{ProgressBar, ProgressStyle};
use searchgrep::retriever::{self, SearchOptions};
use searchgrep::runtime::{Runtime as AppRuntime, DEFAULT_STORE_NAME};
use searchgrep::synchronizer::{self, ProgressEvent, SyncOptions, SyncPhase};
use searchgrep::watcher::{self, WatchEvent, WatchEventKind, DEFAULT_DEBOUNCE};
use serde_json::json;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Debug, Parser)]
#[command(name = "searchgrep")]
#[command(version)]
#[command(about = "Local semantic code search: hybrid dense/BM25 retrieval over a durable chunk index.")]
struct Cli {
    /// Root of the source tree to operate on (defaults to the current directory).
    #[arg(long, global = true, value_name = "PATH")]
    root: Option<PathBuf>,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Scan `--root`, diff against the store by content hash, and upload changes.
    Sync {
        /// Report what would change without writing to the store.
        #[arg(long)]
        dry_run: bool,
        /// Max number of files embedded concurrently.
        #[arg(long, default_value_t = 10)]
        concurrency: usize,
    },
    /// Watch `--root` and keep the store in sync as files change.
    Watch,
    /// Run a hybrid search query against the store.
    Search {
        query: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
        /// Disable BM25 fusion; dense cosine ranking only.
        #[arg(long)]
        no_hybrid: bool,
        /// Restrict results to these file extensions (repeatable).
        #[arg(long = "type", value_name = "EXT")]
        file_type: Vec<String>,
    },
    /// Search then ask the configured chat model to answer using the results.
    Ask {
        query: String,
        #[arg(long, default_value_t = 10)]
        top_k: usize,
    },
    /// Print store statistics.
    Info,
    /// Delete the store file for `--root`'s store.
    Clear,
}

fn spinner(message: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap()
            .tick_strings(&["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"]),
    );
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar.set_message(message.to_string());
    bar
}

async fn run_sync(rt: &AppRuntime, root: PathBuf, dry_run: bool, concurrency: usize) -> Result<()> {
    let bar = spinner("scanning...");
    let bar_cb = bar.clone();
    let on_progress: synchronizer::ProgressCallback = Arc::new(move |e: ProgressEvent| {
        let label = match e.phase {
            SyncPhase::Scanning => "scanning".to_string(),
            SyncPhase::Comparing => "comparing".to_string(),
            SyncPhase::Uploading => format!("uploading {}/{}", e.current, e.total),
            SyncPhase::Deleting => format!("deleting {}/{}", e.current, e.total),
            SyncPhase::Done => "done".to_string(),
        };
        bar_cb.set_message(label);
    });

    let opts = SyncOptions { dry_run, concurrency };
    let result = synchronizer::sync(rt.store.clone(), &root, &rt.config, rt.clock.as_ref(), &opts, Some(on_progress))
        .await?;

    bar.finish_with_message(format!(
        "uploaded {} updated deleted {} skipped {} ({} errors, {}ms)",
        result.uploaded,
        result.deleted,
        result.skipped,
        result.errors.len(),
        result.duration_ms
    ));
    for (path, err) in &result.errors {
        eprintln!("[sync] {path}: {err}");
    }
    Ok(())
}

async fn run_watch(rt: &AppRuntime, root: PathBuf) -> Result<()> {
    eprintln!("[watch] watching {} (ctrl-c to stop)", root.display());
    let on_event: watcher::WatchCallback = Arc::new(|e: WatchEvent| {
        let verb = match e.kind {
            WatchEventKind::Upserted => "updated",
            WatchEventKind::Deleted => "deleted",
            WatchEventKind::Skipped => "unchanged",
        };
        eprintln!("[watch] {verb} {}", e.path);
    });

    let _handle = watcher::watch(root, rt.store.clone(), rt.clock.clone(), DEFAULT_DEBOUNCE, on_event).await?;
    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    eprintln!("[watch] stopping");
    Ok(())
}

async fn run_search(
    rt: &AppRuntime,
    query: &str,
    top_k: usize,
    no_hybrid: bool,
    file_type: Vec<String>,
) -> Result<()> {
    let opts = SearchOptions { hybrid: !no_hybrid, file_types: file_type };
    let guard = rt.store.read().await;
    let results = retriever::search(&guard, rt.embedder.as_ref(), query, top_k, &opts).await?;
    println!("{}", serde_json::to_string_pretty(&results)?);
    Ok(())
}

async fn run_ask(rt: &AppRuntime, query: &str, top_k: usize) -> Result<()> {
    let chat = rt.require_chat()?;
    let guard = rt.store.read().await;
    let answer = retriever::ask(&guard, rt.embedder.as_ref(), chat.as_ref(), query, top_k).await?;
    println!("{answer}");
    Ok(())
}

async fn run_info(rt: &AppRuntime) -> Result<()> {
    let guard = rt.store.read().await;
    let info = guard.get_info();
    println!(
        "{}",
        json!({
            "name": info.name,
            "fileCount": info.file_count,
            "totalSize": info.total_size,
            "lastUpdated": info.last_updated,
        })
    );
    Ok(())
}

async fn run_clear(rt: &AppRuntime) -> Result<()> {
    let mut guard = rt.store.write().await;
    guard.clear()?;
    eprintln!("[clear] store emptied");
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let cwd = std::env::current_dir().context("failed to get current directory")?;
    let root = cli.root.clone().unwrap_or_else(|| cwd.clone());
    let rt = AppRuntime::open(&cwd, DEFAULT_STORE_NAME)?;

    match cli.cmd {
        Command::Sync { dry_run, concurrency } => run_sync(&rt, root, dry_run, concurrency).await,
        Command::Watch => run_watch(&rt, root).await,
        Command::Search { query, top_k, no_hybrid, file_type } => {
            run_search(&rt, &query, top_k, no_hybrid, file_type).await
        }
        Command::Ask { query, top_k } => run_ask(&rt, &query, top_k).await,
        Command::Info => run_info(&rt).await,
        Command::Clear => run_clear(&rt).await,
    }
}
