use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Set the logging level (trace, debug, info, warn, error)
    #[arg(short, long, global = true, default_value = "info")]
    pub log_level: String,

    /// Engine configuration file (YAML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Print the profile key of an executable
    Key(KeyArgs),
    /// Replay a recorded event trace through the engine
    Replay(ReplayArgs),
    /// Show version information
    Version,
}

#[derive(Parser, Debug)]
pub struct KeyArgs {
    /// Path to the executable
    pub path: PathBuf,
    /// Use the symlink itself rather than its target
    #[arg(long)]
    pub no_follow: bool,
}

#[derive(Parser, Debug)]
pub struct ReplayArgs {
    /// Trace file (YAML)
    pub trace: PathBuf,
    /// Override the configured mode (enforcing or audit)
    #[arg(short, long)]
    pub mode: Option<String>,
}
