//! CLI entry point for the snapshot downloader.

use std::process::ExitCode;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use snapdl_core::snapshot::cancel::CancelSignal;
use snapdl_core::snapshot::downloader::{download, DownloadOptions};
use snapdl_core::snapshot::client::AwsEbsClient;
use snapdl_core::snapshot::error::DownloadError;
use snapdl_core::snapshot::retry::RetryPolicy;
use tracing::{debug, error, info, warn};

mod cli;

use cli::{Args, Command};

#[tokio::main]
async fn main() -> Result<ExitCode> {
    // Parse CLI arguments first (before tracing, so --help works without logs)
    let args = Args::parse();

    // Determine log level based on verbose/quiet flags
    // Priority: RUST_LOG env var > quiet flag > verbose flag > default (info)
    let default_level = if args.quiet {
        "error"
    } else {
        match args.verbose {
            0 => "info",
            1 => "debug",
            _ => "trace",
        }
    };

    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(default_level));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    debug!(?args, "CLI arguments parsed");

    let Command::Get(get) = args.command;

    info!(snapshot_id = %get.snapshot_id, "snapdl starting");

    std::fs::create_dir_all(&get.output)
        .with_context(|| format!("creating output directory {}", get.output.display()))?;

    let client = AwsEbsClient::from_env(Some(get.region.clone()), get.profile.clone()).await;

    let options = DownloadOptions {
        snapshot_id: get.snapshot_id.clone(),
        output_path: get.image_path(),
        force: get.force,
        n_workers: get.workers,
        retry_policy: RetryPolicy::default(),
    };

    let cancel = CancelSignal::new();
    let cancel_on_signal = Arc::clone(&cancel);
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupt received, cancelling download");
            cancel_on_signal.cancel();
        }
    });

    match download(Arc::new(client), options, cancel).await {
        Ok(summary) => {
            info!(
                output = %summary.output_path.display(),
                blocks_written = summary.blocks_written,
                volume_size_bytes = summary.volume_size_bytes,
                "download complete"
            );
            Ok(ExitCode::from(0))
        }
        Err(err) => {
            error!(error = %err, "download failed");
            let code = exit_code_for(&err);
            eprintln!("snapdl: {err}");
            Ok(ExitCode::from(code))
        }
    }
}

fn exit_code_for(err: &DownloadError) -> u8 {
    match err.exit_code() {
        code @ 0..=255 => code as u8,
        _ => 1,
    }
}
