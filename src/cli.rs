//! CLI argument definitions using clap derive macros.

use std::path::PathBuf;

use clap::{Args as ClapArgs, Parser, Subcommand};

use snapdl_core::snapshot::constants::{DEFAULT_REGION, DEFAULT_WORKERS, MAX_WORKERS, MIN_WORKERS};

/// Download an EBS-format snapshot into a local sparse image file.
///
/// `list`, `create`, `delete`, and `init` are not implemented by this tool;
/// `get` is the only supported subcommand.
#[derive(Parser, Debug)]
#[command(name = "snapdl")]
#[command(author, version, about)]
pub struct Args {
    #[command(subcommand)]
    pub command: Command,

    /// Increase output verbosity (-v for debug, -vv for trace)
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    pub verbose: u8,

    /// Suppress non-error output
    #[arg(short, long, global = true)]
    pub quiet: bool,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Download a snapshot into a local sparse image file.
    Get(GetArgs),
}

#[derive(ClapArgs, Debug)]
pub struct GetArgs {
    /// Snapshot id to download, e.g. snap-0123456789abcdef0.
    pub snapshot_id: String,

    /// Output directory; the image is written as `<snapshot-id>.img` inside it.
    #[arg(short, long, default_value = ".")]
    pub output: PathBuf,

    /// Overwrite the output path if it already exists.
    #[arg(short, long)]
    pub force: bool,

    /// Number of concurrent workers.
    #[arg(
        short,
        long,
        default_value_t = DEFAULT_WORKERS,
        value_parser = clap::builder::RangedU64ValueParser::<usize>::new()
            .range(MIN_WORKERS as u64..=MAX_WORKERS as u64)
    )]
    pub workers: usize,

    /// AWS region to use; defaults to the standard SDK resolution chain.
    #[arg(long, default_value = DEFAULT_REGION)]
    pub region: String,

    /// AWS credential profile name; defaults to the standard SDK resolution chain.
    #[arg(long)]
    pub profile: Option<String>,
}

impl GetArgs {
    /// Resolves the output image path from `--output` and the snapshot id.
    #[must_use]
    pub fn image_path(&self) -> PathBuf {
        self.output.join(format!("{}.img", self.snapshot_id))
    }
}
