use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use log::LevelFilter;
use monitor_logging::{monitor_info, monitor_warn, LogDestination};
use run_monitor_app::config::{load_config, write_template, Overrides, CONFIG_FILENAME};
use run_monitor_app::render::{
    bot_lines, exit_code, property_row_line, summary_lines, timeline_line,
};
use run_monitor_core::RunId;
use run_monitor_engine::{
    EngineSettings, ReqwestEventSource, ReqwestSnapshotClient, RunReconciler, SnapshotClient,
};

#[derive(Parser)]
#[command(name = "run-monitor")]
#[command(about = "Follow scraper bot runs and reconcile their results", long_about = None)]
struct Cli {
    /// RON configuration file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Backend origin, e.g. http://127.0.0.1:8000.
    #[arg(long, global = true, env = "RUN_MONITOR_BASE_URL")]
    base_url: Option<String>,

    #[arg(long = "bot", global = true, env = "RUN_MONITOR_BOT")]
    bot_slug: Option<String>,

    /// Also write logs to this file.
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Follow one run until it settles
    Follow {
        #[arg(long)]
        run_id: String,

        #[arg(long)]
        corroboration_timeout_secs: Option<u64>,

        #[arg(long)]
        max_stream_reopens: Option<u32>,
    },
    /// Print the bot summary, latest property rows and notifications
    Status,
    /// Write a configuration template with the default settings
    InitConfig {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    if let Commands::InitConfig { path } = &cli.command {
        let path = path.clone().unwrap_or_else(|| PathBuf::from(CONFIG_FILENAME));
        write_template(&path)?;
        println!("Wrote {}", path.display());
        return Ok(ExitCode::SUCCESS);
    }

    let (config_path, required) = match &cli.config {
        Some(path) => (path.clone(), true),
        None => (PathBuf::from(CONFIG_FILENAME), false),
    };
    let mut overrides = Overrides {
        base_url: cli.base_url.clone(),
        bot_slug: cli.bot_slug.clone(),
        log_file: cli.log_file.clone(),
        ..Overrides::default()
    };
    if let Commands::Follow {
        corroboration_timeout_secs,
        max_stream_reopens,
        ..
    } = &cli.command
    {
        overrides.corroboration_timeout_secs = *corroboration_timeout_secs;
        overrides.max_stream_reopens = *max_stream_reopens;
    }

    let level = if cli.verbose {
        LevelFilter::Debug
    } else {
        LevelFilter::Warn
    };
    let config = load_config(&config_path, required)?.with_overrides(overrides);
    let destination = match &config.log_file {
        Some(path) => LogDestination::Both(path.clone()),
        None => LogDestination::Terminal,
    };
    monitor_logging::initialize(level, destination);

    let settings = config.engine_settings()?;
    let runtime = tokio::runtime::Runtime::new().context("failed to start tokio runtime")?;
    runtime.block_on(async move {
        match cli.command {
            Commands::Follow { run_id, .. } => follow(settings, RunId::from(run_id)).await,
            Commands::Status => status(settings).await,
            Commands::InitConfig { .. } => Ok(ExitCode::SUCCESS),
        }
    })
}

async fn follow(settings: EngineSettings, run_id: RunId) -> Result<ExitCode> {
    let snapshots = ReqwestSnapshotClient::new(settings.clone())?;
    let events = ReqwestEventSource::new(settings.clone())?;
    let reconciler = RunReconciler::spawn(Arc::new(snapshots), Arc::new(events), &settings);

    monitor_info!("Following run {} on {}", run_id, settings.base_url);
    let session = reconciler.start_run(run_id).await?;
    let mut views = reconciler.subscribe();
    let mut printed = 0;
    let mut interrupted = false;

    let view = loop {
        let view = views.borrow_and_update().clone();
        for entry in view.timeline.iter().skip(printed) {
            println!("{}", timeline_line(entry));
        }
        printed = printed.max(view.timeline.len());
        if view.session != session || view.settled {
            break view;
        }

        tokio::select! {
            changed = views.changed() => {
                if changed.is_err() {
                    break view;
                }
            }
            signal = tokio::signal::ctrl_c(), if !interrupted => {
                if let Err(err) = signal {
                    monitor_warn!("Failed to listen for Ctrl-C: {}", err);
                }
                interrupted = true;
                reconciler.stop()?;
            }
        }
    };

    println!();
    for line in summary_lines(&view) {
        println!("{line}");
    }
    reconciler.shutdown().await;

    Ok(ExitCode::from(exit_code(&view, interrupted)))
}

async fn status(settings: EngineSettings) -> Result<ExitCode> {
    let client = ReqwestSnapshotClient::new(settings)?;
    let (summary, rows, notifications) = tokio::join!(
        client.bot_summary(),
        client.latest_properties(),
        client.notifications()
    );

    for line in bot_lines(&summary?) {
        println!("{line}");
    }
    let rows = rows?;
    println!("Latest properties: {}", rows.len());
    for row in &rows {
        println!("{}", property_row_line(row));
    }
    let notifications = notifications?;
    println!("Notifications: {}", notifications.len());
    for notification in &notifications {
        println!(
            "  {}  {}",
            notification.created_at.format("%Y-%m-%d %H:%M:%S"),
            notification.message
        );
    }
    Ok(ExitCode::SUCCESS)
}
