//! parrot-v2w: extract audio tracks to WAV
//!
//! Converts each input to `<stem>.wav`, next to the input or in
//! `--output-dir`. Ctrl+C cancels the running conversion and stops the batch.

use anyhow::{Context, Result};
use clap::Parser;
use parrot_common::ConversionEvent;
use parrot_v2w::{
    AudioExtractor, BatchConverter, ChannelObserver, Compliance, ConversionRequest,
    ExtractorConfig,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::signal;
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

/// Command-line arguments for parrot-v2w
#[derive(Parser, Debug)]
#[command(name = "parrot-v2w")]
#[command(about = "Extract the audio track of media files into 16-bit PCM WAV")]
#[command(version)]
struct Args {
    /// Media files to convert
    #[arg(required = true)]
    inputs: Vec<PathBuf>,

    /// Directory for the WAV files (default: next to each input)
    #[arg(short, long, env = "PARROT_OUTPUT_DIR")]
    output_dir: Option<PathBuf>,

    /// Configuration file (default: $PARROT_CONFIG, then the per-user config)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Output sample rate in Hz (default: keep the source rate)
    #[arg(long)]
    target_rate: Option<u32>,

    /// Refuse experimental encoders
    #[arg(long)]
    strict: bool,
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let mut config =
        ExtractorConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    if let Some(rate) = args.target_rate {
        config.target_sample_rate = Some(rate);
    }
    if args.strict {
        config.compliance = Compliance::Strict;
    }

    // Initialize tracing
    let level = config.logging.level.clone();
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| format!("parrot_v2w={level},parrot_common={level}").into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    info!("Starting parrot-v2w with {} input file(s)", args.inputs.len());

    let extractor = AudioExtractor::new(config).context("Invalid configuration")?;
    let cancel = CancellationToken::new();

    tokio::spawn({
        let cancel = cancel.clone();
        async move {
            if signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, cancelling");
                cancel.cancel();
            }
        }
    });

    // Per-file outcomes
    let mut events = extractor.subscribe();
    tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            if let ConversionEvent::ConversionFinished {
                source_path,
                kind,
                message,
                ..
            } = event
            {
                match message {
                    Some(message) => warn!("{}: {} ({})", source_path.display(), kind, message),
                    None => info!("{}: {}", source_path.display(), kind),
                }
            }
        }
    });

    // Overall progress in 10% steps
    let (observer, mut progress_rx) = ChannelObserver::new();
    let progress_task = tokio::spawn(async move {
        let mut next_step = 0.1;
        while let Some(progress) = progress_rx.recv().await {
            if progress + f64::EPSILON >= next_step {
                info!("Progress: {:.0}%", progress * 100.0);
                next_step = (progress * 10.0).floor() / 10.0 + 0.1;
            }
        }
    });

    let requests = args
        .inputs
        .iter()
        .map(|path| ConversionRequest::new(path.clone()))
        .collect();

    let batch = BatchConverter::new(extractor);
    let report = batch
        .convert_all(requests, args.output_dir.as_deref(), Arc::new(observer), &cancel)
        .await;

    // The batch dropped its observer clones; the progress channel is closed
    let _ = progress_task.await;

    for path in &report.produced {
        info!("Wrote {}", path.display());
    }

    if report.cancelled {
        info!("Cancelled after {} file(s)", report.produced.len() + report.failures.len());
    }
    if !report.failures.is_empty() {
        anyhow::bail!(
            "{} of {} file(s) failed",
            report.failures.len(),
            args.inputs.len()
        );
    }

    info!("Done");
    Ok(())
}
