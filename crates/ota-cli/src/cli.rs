use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "otactl",
    about = "Operator tooling for the OTA update store",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[arg(long, global = true, default_value = "text")]
    pub format: OutputFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, clap::ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show entity counts and the id counter of a snapshot
    Inspect(SnapshotArgs),
    /// Check every index of a snapshot against its records
    Fsck(SnapshotArgs),
    /// Print the effective service configuration
    Config(ConfigArgs),
}

#[derive(Args)]
pub struct SnapshotArgs {
    /// Snapshot file (the JSON value stored under the snapshot key)
    pub snapshot: PathBuf,
}

#[derive(Args)]
pub struct ConfigArgs {
    /// TOML configuration file; defaults apply to anything it omits
    #[arg(short, long)]
    pub file: Option<PathBuf>,
}
