use action_recorder::capture::input::RdevInputSource;
use action_recorder::config::{load_config, CliOverrides};
use action_recorder::{load_action_log, OutputTarget, Recorder, RecordingState};
use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

#[derive(Parser, Debug)]
#[command(name = "action-recorder")]
#[command(about = "Record screen video with a time-aligned log of mouse and keyboard actions")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Record until Ctrl+C (or the max duration)
    Record {
        /// Directory for the video and action log
        #[arg(short, long)]
        output: PathBuf,

        /// Config file (defaults to action-recorder.json in the output directory)
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Output video height in pixels
        #[arg(long)]
        height: Option<u32>,

        /// Capture framerate
        #[arg(long)]
        framerate: Option<u32>,

        /// Stop automatically after this many seconds
        #[arg(long)]
        max_duration: Option<u64>,
    },
    /// Summarize an action log
    Inspect {
        /// Path to a .actions.json file
        log: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    action_recorder::init_tracing();
    let args = Args::parse();

    match args.command {
        Commands::Record {
            output,
            config,
            height,
            framerate,
            max_duration,
        } => {
            let overrides = CliOverrides {
                config_path: config,
                framerate,
                output_height: height,
                max_duration_secs: max_duration,
            };
            record(output, overrides).await
        }
        Commands::Inspect { log } => inspect(log),
    }
}

async fn record(output: PathBuf, overrides: CliOverrides) -> Result<()> {
    std::fs::create_dir_all(&output).context("Failed to create output directory")?;
    let config = load_config(&output, &overrides)?;
    tracing::info!(
        "Starting action-recorder v{} ({} fps, {}p)",
        env!("CARGO_PKG_VERSION"),
        config.framerate,
        config.output_height
    );

    let recorder = Recorder::with_ffmpeg(config, Arc::new(RdevInputSource::new()))
        .context("FFmpeg is required for screen capture")?;
    let mut states = recorder.subscribe();
    let handle = recorder
        .start(OutputTarget::timestamped(&output))
        .await
        .context("Failed to start recording")?;
    println!("Recording to {:?}. Press Ctrl+C to stop.", handle.video_path());

    tokio::select! {
        signal = tokio::signal::ctrl_c() => {
            signal.context("Failed to listen for Ctrl+C")?;
            tracing::info!("Ctrl+C received");
        }
        _ = async {
            let _ = states.wait_for(|state| *state == RecordingState::Idle).await;
        } => {
            tracing::info!("Session ended on its own");
        }
    }

    let log_path = recorder
        .stop(&handle)
        .await
        .context("Recording session failed")?;
    println!("Video: {:?}", handle.video_path());
    println!("Actions: {:?}", log_path);
    Ok(())
}

fn inspect(log: PathBuf) -> Result<()> {
    let actions =
        load_action_log(&log).with_context(|| format!("Failed to load action log {:?}", log))?;

    let mut counts: BTreeMap<&'static str, usize> = BTreeMap::new();
    for action in &actions {
        *counts.entry(action.kind()).or_default() += 1;
    }

    println!("{} actions", actions.len());
    for (kind, count) in counts {
        println!("  {:<12} {}", kind, count);
    }
    if let (Some(first), Some(last)) = (actions.first(), actions.last()) {
        println!(
            "  span         {:.3}s .. {:.3}s",
            first.start_time(),
            last.end_time()
        );
    }
    Ok(())
}
