//! ==============================================================================
//! main.rs - enose-bridge command-line entry point
//! ==============================================================================
//!
//! purpose:
//!     headless front end for the bridge client. each subcommand is one of
//!     the operator's actions:
//!
//!     record    connect, sample until DONE (or duration / ctrl-c), save
//!     watch     print live readings from the data port
//!     send      one raw bridge command
//!     convert   csv -> ingestion json
//!     upload    push a recording to the ingestion api
//!     library   list saved recordings
//!     plot      render or open a gnuplot view of a recording
//!     stats     per-sensor statistics of a recording
//!
//! architecture:
//!
//!     ┌────────────────────────────────────────────────────────────┐
//!     │                    cli (this file)                         │
//!     │  ┌──────────────┐  ┌───────────────┐  ┌────────────────┐   │
//!     │  │ recorder     │  │ dashboard     │  │ export/upload  │   │
//!     │  │ (record)     │  │ (optional)    │  │ library/plot   │   │
//!     │  └──────┬───────┘  └───────┬───────┘  └────────────────┘   │
//!     │         │   arc<rwlock<>>  │                               │
//!     │         └──────────────────┘                               │
//!     └─────────┼──────────────────────────────────────────────────┘
//!               │ tcp
//!        ┌──────┴───────┐
//!        ▼              ▼
//!   :8082 commands   :8083 json lines
//!
//! ==============================================================================

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{info, warn};

use enose_bridge::command::{BridgeCommand, BridgeCommander};
use enose_bridge::config::BridgeConfig;
use enose_bridge::dashboard;
use enose_bridge::export;
use enose_bridge::library;
use enose_bridge::logging;
use enose_bridge::plot::PlotTool;
use enose_bridge::recorder::{RecordRequest, Recorder};
use enose_bridge::stats;
use enose_bridge::stream::{StreamClient, StreamEvent, TcpLineSource};
use enose_bridge::upload::Uploader;

#[derive(Parser, Debug)]
#[command(author, version, about = "Electronic nose bridge client")]
struct Cli {
    /// Config file (default: config/bridge.toml if present)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Record one sample until the bridge reports DONE
    Record(RecordArgs),
    /// Print live readings until ctrl-c
    Watch,
    /// Send one raw command, e.g. `send CONNECT_SERIAL COM3`
    Send {
        #[arg(required = true)]
        command: Vec<String>,
    },
    /// Convert a recording csv to ingestion json
    Convert { csv: PathBuf },
    /// Upload a recording (json, or csv converted on the fly)
    Upload {
        file: PathBuf,
        /// Ingestion api key (overrides the config file)
        #[arg(long, env = "EI_API_KEY", hide_env_values = true)]
        api_key: Option<String>,
        /// Label (default: derived from the file name)
        #[arg(long)]
        label: Option<String>,
    },
    /// List saved recordings, newest first
    Library,
    /// Render a png preview, or open an interactive window
    Plot {
        csv: PathBuf,
        #[arg(short, long)]
        interactive: bool,
    },
    /// Per-sensor statistics of a recording csv
    Stats { csv: PathBuf },
}

#[derive(clap::Args, Debug)]
struct RecordArgs {
    /// Sample name, used in the file name
    #[arg(short, long)]
    name: String,

    /// Sample type, one of the configured types
    #[arg(short = 't', long)]
    sample_type: String,

    /// Serial port the bridge should open first
    #[arg(short, long)]
    port: Option<String>,

    /// Stop after this many seconds even without DONE
    #[arg(short, long)]
    duration: Option<u64>,

    /// Keep data from an earlier run in this process
    #[arg(long)]
    keep_previous: bool,

    /// Skip writing the ingestion json
    #[arg(long)]
    no_json: bool,

    /// Render a png preview after saving
    #[arg(long)]
    preview: bool,

    /// Serve the live dashboard while recording
    #[arg(long)]
    dashboard: bool,
}

// ==============================================================================
// main entry point
// ==============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = match &cli.config {
        Some(path) => BridgeConfig::load(path)
            .with_context(|| format!("loading config {}", path.display()))?,
        None => BridgeConfig::load_or_default(),
    };
    logging::init(&config.logging, cli.verbose)?;

    match cli.command {
        Command::Record(args) => record(config, args).await,
        Command::Watch => watch(&config, ctrl_c()).await,
        Command::Send { command } => send(&config, &command.join(" ")).await,
        Command::Convert { csv } => {
            let json = export::convert_csv_to_json(&csv, &config.export)
                .with_context(|| format!("converting {}", csv.display()))?;
            println!("{}", json.display());
            Ok(())
        }
        Command::Upload {
            file,
            api_key,
            label,
        } => upload(&config, &file, api_key.as_deref(), label).await,
        Command::Library => {
            let entries = library::scan(&config.storage.data_dir)?;
            if entries.is_empty() {
                println!("no recordings in {}", config.storage.data_dir.display());
            } else {
                print!("{}", library::render_table(&entries));
            }
            Ok(())
        }
        Command::Plot { csv, interactive } => plot(&config, &csv, interactive),
        Command::Stats { csv } => {
            let recording = export::load_csv(&csv)?;
            println!("{} ({} points)", recording.sample_name, recording.len());
            let rows = stats::stats_table(&recording.sensor_names, &recording.channels);
            print!("{}", stats::render_table(&rows));
            Ok(())
        }
    }
}

// ==============================================================================
// subcommands
// ==============================================================================

async fn record(config: BridgeConfig, args: RecordArgs) -> Result<()> {
    config.print_summary();

    let request = RecordRequest {
        sample_name: args.name,
        sample_type: args.sample_type,
        serial_port: args.port.or_else(|| config.sampling.serial_port.clone()),
        duration: args.duration.map(Duration::from_secs),
        fresh: !args.keep_previous,
        write_json: config.storage.write_json && !args.no_json,
        preview: args.preview || config.storage.generate_previews,
    };

    let source = TcpLineSource::new(config.bridge.data_addr(), config.bridge.connect_timeout());
    let mut recorder = Recorder::new(config.clone());

    if args.dashboard || config.dashboard.enabled {
        let state = dashboard::shared();
        recorder = recorder.with_dashboard(state.clone());
        let bind = config.dashboard.bind.clone();
        tokio::spawn(async move {
            if let Err(e) = dashboard::serve(&bind, state).await {
                warn!("dashboard server error: {}", e);
            }
        });
    }

    let report = recorder
        .run(source, &request, ctrl_c())
        .await
        .context("recording failed")?;

    println!();
    println!("stopped: {:?} after {} points", report.stop_reason, report.points);
    if report.points > 0 {
        print!("{}", stats::render_table(&report.stats));
    }
    for path in [&report.csv_path, &report.json_path, &report.preview_path]
        .into_iter()
        .flatten()
    {
        println!("saved {}", path.display());
    }
    Ok(())
}

/// resolves on ctrl-c, never if the handler cannot be installed
async fn ctrl_c() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!("ctrl-c handler unavailable: {}", e);
        std::future::pending::<()>().await;
    }
}

async fn watch<F>(config: &BridgeConfig, shutdown: F) -> Result<()>
where
    F: std::future::Future<Output = ()>,
{
    let source = TcpLineSource::new(config.bridge.data_addr(), config.bridge.connect_timeout());
    let (tx, mut rx) = mpsc::unbounded_channel();
    let handle = StreamClient::new(source, config.bridge.retry_delay()).spawn(tx);

    info!("watching {} (ctrl-c to stop)", config.bridge.data_addr());
    // one future for the whole loop so a ctrl-c between events is not lost
    tokio::pin!(shutdown);
    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            event = rx.recv() => match event {
                Some(StreamEvent::Reading(r)) => {
                    let values: Vec<String> = r.channels.iter().map(|v| format!("{:.2}", v)).collect();
                    println!("[{:<8}] level {:>3} | {}", r.state.label(), r.level, values.join(" "));
                }
                Some(StreamEvent::Connected) => info!("connected"),
                Some(StreamEvent::Disconnected { reason }) => warn!("disconnected: {}", reason),
                Some(_) => {}
                None => break,
            },
        }
    }

    let summary = handle.shutdown().await;
    info!(
        attempts = summary.attempts,
        readings = summary.readings,
        skipped = summary.skipped,
        "watch finished"
    );
    Ok(())
}

async fn send(config: &BridgeConfig, line: &str) -> Result<()> {
    let command: BridgeCommand = line.parse()?;
    let commander = BridgeCommander::from_endpoint(&config.bridge);
    commander
        .send(&command)
        .await
        .with_context(|| format!("sending {} to {}", command, commander.addr()))?;
    println!("sent {}", command);
    Ok(())
}

async fn upload(
    config: &BridgeConfig,
    file: &Path,
    api_key: Option<&str>,
    label: Option<String>,
) -> Result<()> {
    let is_csv = file
        .extension()
        .map(|ext| ext.eq_ignore_ascii_case("csv"))
        .unwrap_or(false);

    let json = if is_csv {
        let json = export::json_path_for(file);
        if json.exists() {
            json
        } else {
            info!("no json next to {}, converting", file.display());
            export::convert_csv_to_json(file, &config.export)?
        }
    } else {
        file.to_path_buf()
    };

    let label = label.unwrap_or_else(|| {
        json.file_name()
            .map(|n| library::upload_label(&n.to_string_lossy()))
            .unwrap_or_default()
    });

    let uploader = Uploader::from_config(&config.upload, api_key)?;
    let receipt = uploader
        .upload(&json, Some(&label))
        .await
        .with_context(|| format!("uploading {}", json.display()))?;
    println!("uploaded {} as '{}' (HTTP {})", json.display(), label, receipt.status);
    Ok(())
}

fn plot(config: &BridgeConfig, csv: &Path, interactive: bool) -> Result<()> {
    if !csv.exists() {
        bail!("no such recording: {}", csv.display());
    }
    let tool = PlotTool::new(&config.plot, &config.storage.data_dir);
    if interactive {
        let child = tool.open_interactive(csv)?;
        println!("plot window opened (pid {})", child.id());
    } else {
        let png = tool.generate_png(csv)?;
        println!("{}", png.display());
    }
    Ok(())
}
