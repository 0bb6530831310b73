//! ragsync CLI
//!
//! Command-line interface for building, watching and inspecting indexes.

mod signals;

use anyhow::{Context, Result};
use clap::{Args, Parser, Subcommand};
use ragsync_core::{IndexContext, Profile, ProfileLoader, ProfileOverrides, LOCAL_CONFIG_FILE};
use ragsync_indexer::{FileWatcher, IndexLocation, SyncReport, WatchLoop, WatcherOptions};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "ragsync")]
#[command(about = "ragsync - keep a retrieval index in step with a repository")]
#[command(version)]
struct Cli {
    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct ProfileArgs {
    /// Profile name (reads ~/.ragsync/profiles/<name>.yaml)
    #[arg(long)]
    profile: Option<String>,

    /// Project-local config (default: ./.ragsync.yaml)
    #[arg(long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Synchronize the index once
    Index {
        #[command(flatten)]
        profile: ProfileArgs,

        /// Local repo path (overrides profile.path)
        #[arg(long)]
        path: Option<PathBuf>,

        /// GitHub owner/repo (overrides profile.repo)
        #[arg(long)]
        repo: Option<String>,

        /// Git ref/branch/tag (overrides profile.ref)
        #[arg(long = "ref")]
        git_ref: Option<String>,

        /// Index directory (overrides profile.persist)
        #[arg(long)]
        persist: Option<PathBuf>,

        /// Rebuild from scratch
        #[arg(long)]
        full: bool,

        /// Print the manifest as JSON
        #[arg(long)]
        json: bool,
    },

    /// Watch a local repo and re-synchronize on changes
    Watch {
        #[command(flatten)]
        profile: ProfileArgs,

        /// Local repo to watch
        #[arg(long)]
        path: PathBuf,

        /// Seconds of quiet before a rebuild
        #[arg(long)]
        debounce: Option<f64>,

        /// Index directory (overrides profile.persist)
        #[arg(long)]
        persist: Option<PathBuf>,
    },

    /// Show the state of an index
    Inspect {
        #[command(flatten)]
        profile: ProfileArgs,

        /// Index directory (overrides profile.persist)
        #[arg(long)]
        persist: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_target(false)
        .init();

    match cli.command {
        Commands::Index {
            profile,
            path,
            repo,
            git_ref,
            persist,
            full,
            json,
        } => {
            let overrides = ProfileOverrides {
                path,
                repo,
                git_ref,
                persist,
                ..Default::default()
            };
            cmd_index(load_profile(&profile, overrides)?, full, json).await
        }
        Commands::Watch {
            profile,
            path,
            debounce,
            persist,
        } => {
            let overrides = ProfileOverrides {
                path: Some(path),
                persist,
                debounce_secs: debounce,
                ..Default::default()
            };
            cmd_watch(load_profile(&profile, overrides)?).await
        }
        Commands::Inspect { profile, persist } => {
            let overrides = ProfileOverrides {
                persist,
                ..Default::default()
            };
            cmd_inspect(load_profile(&profile, overrides)?).await
        }
    }
}

fn load_profile(args: &ProfileArgs, overrides: ProfileOverrides) -> Result<Profile> {
    let local = args
        .config
        .clone()
        .unwrap_or_else(|| PathBuf::from(LOCAL_CONFIG_FILE));
    let profile = ProfileLoader::new()
        .load(args.profile.as_deref(), Some(&local))
        .context("Failed to load profile")?;
    Ok(overrides.apply(profile))
}

async fn cmd_index(profile: Profile, full: bool, json: bool) -> Result<()> {
    let context = IndexContext::open(profile).context("Invalid index configuration")?;
    let synchronizer = context.synchronizer(full).await?;

    let report = synchronizer
        .synchronize()
        .await
        .context("Synchronization failed")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&report.manifest)?);
    } else {
        print_report(&report);
    }

    Ok(())
}

async fn cmd_watch(profile: Profile) -> Result<()> {
    let debounce = profile.debounce()?;
    let context = IndexContext::open(profile).context("Invalid index configuration")?;
    let filter = context
        .watch_filter()
        .context("Watch mode needs an existing local path")?;

    let synchronizer = Arc::new(context.synchronizer(false).await?);

    // Changes made during the initial run queue up in the watcher.
    let mut watcher = FileWatcher::new(WatcherOptions::default());
    watcher.watch(filter)?;

    match synchronizer.synchronize().await {
        Ok(report) => print_report(&report),
        Err(e) => println!("✗ Initial synchronization failed: {}", e),
    }

    let watch_loop = WatchLoop::new(synchronizer, debounce);
    let handle = watch_loop.handle();

    println!(
        "Watching {} (debounce {:.1}s). Press Ctrl+C to stop.",
        context.source_root().map(|p| p.display().to_string()).unwrap_or_default(),
        debounce.as_secs_f64()
    );

    let loop_task = tokio::spawn(watch_loop.run());
    let forward_task = tokio::spawn(watcher.forward(handle.clone()));

    signals::wait_for_shutdown().await;
    handle.shutdown().await?;

    let stats = loop_task.await.context("Watch loop panicked")?;
    forward_task.abort();

    println!(
        "✓ Stopped after {} rebuild(s) ({} failed), {} change(s) seen",
        stats.runs, stats.failed_runs, stats.notifications
    );

    Ok(())
}

async fn cmd_inspect(profile: Profile) -> Result<()> {
    let location = IndexLocation::new(profile.persist_dir());
    let summary = ragsync_core::inspect(&location).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);
    Ok(())
}

fn print_report(report: &SyncReport) {
    let manifest = &report.manifest;

    match &manifest.full_reason {
        Some(reason) => println!("✓ Full rebuild ({})", reason),
        None => println!("✓ Incremental update"),
    }
    println!();
    println!("  Files:      {}", manifest.file_count);
    println!("  Nodes:      {}", manifest.node_count);
    println!(
        "  Changes:    +{} ~{} -{} ={}",
        manifest.added, manifest.modified, manifest.removed, manifest.unchanged
    );
    println!(
        "  Delta:      {} inserted, {} deleted",
        manifest.nodes_inserted, manifest.nodes_deleted
    );
    println!("  Embedding:  {}", manifest.embed_fingerprint);
    println!("  Duration:   {}ms", manifest.duration_ms);

    if !manifest.failures.is_empty() {
        println!();
        println!("  Skipped {} file(s):", manifest.skipped_count);
        for failure in &manifest.failures {
            println!(
                "    ✗ {} ({:?}): {}",
                failure.path, failure.stage, failure.message
            );
        }
    }

    if let Some(e) = &report.manifest_error {
        println!();
        println!("  ✗ Manifest not written: {}", e);
    }
}
