use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

#[derive(Parser)]
#[command(
    name = "nstore",
    about = "Inspect, collect and repair nstore files",
    version
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    /// Store file to operate on
    #[arg(short, long, global = true, default_value = "nstore.json")]
    pub store: PathBuf,

    /// TOML store configuration
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true)]
    pub verbose: bool,
}

#[derive(Subcommand)]
pub enum Command {
    /// Show record counts per type and total size
    Stats,
    /// List stored pids
    Keys(KeysArgs),
    /// Dump a record and its children
    Show(ShowArgs),
    /// Delete records unreachable from a root pid
    Gc(GcArgs),
    /// Check records for unreadable values and dangling references
    Verify,
    /// Delete every record
    Clear(ClearArgs),
}

#[derive(Args)]
pub struct KeysArgs {
    /// Only pids of this type (`roots` for root pids)
    #[arg(short = 't', long = "type")]
    pub type_name: Option<String>,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Pid to start from; every root when omitted
    pub pid: Option<String>,
    #[arg(short, long, default_value_t = 3)]
    pub depth: usize,
}

#[derive(Args)]
pub struct GcArgs {
    /// Report what would be deleted without deleting
    #[arg(long)]
    pub dry_run: bool,
}

#[derive(Args)]
pub struct ClearArgs {
    /// Confirm deleting every record
    #[arg(long)]
    pub yes: bool,
}
