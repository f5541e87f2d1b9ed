mod cli;

use std::path::Path;

use bpfbox::config::{BpfboxConfig, EnforcementMode};
use bpfbox::error::Result;
use bpfbox::logging::{init_logging, LogLevel};
use bpfbox::profile::ExecutableIdentity;
use bpfbox::replay::{replay, Trace};
use clap::Parser;
use cli::{Cli, Commands, KeyArgs, ReplayArgs};
use log::LevelFilter;

fn main() {
    let cli = Cli::parse();

    // Initialize logging based on CLI argument
    let log_level = match cli.log_level.parse::<LogLevel>() {
        Ok(level) => LevelFilter::from(level),
        Err(e) => {
            eprintln!("{}, defaulting to 'info'", e);
            LevelFilter::Info
        }
    };

    if let Err(e) = init_logging(log_level) {
        eprintln!("Failed to initialize logging: {}", e);
        std::process::exit(1);
    }

    log::debug!("bpfbox started with log level: {}", cli.log_level);

    let result = match &cli.command {
        Commands::Version => {
            println!("bpfbox v{}", env!("CARGO_PKG_VERSION"));
            println!("Process confinement engine");
            println!("License: GPL-3.0-or-later");
            Ok(())
        }
        Commands::Key(args) => print_key(args),
        Commands::Replay(args) => run_replay(cli.config.as_deref(), args),
    };

    if let Err(e) = result {
        log::error!("{}", e);
        eprintln!("❌ {}", e);
        std::process::exit(1);
    }
}

fn load_config(path: Option<&Path>) -> Result<BpfboxConfig> {
    match path {
        Some(path) => BpfboxConfig::load(path),
        None => Ok(BpfboxConfig::default()),
    }
}

fn print_key(args: &KeyArgs) -> Result<()> {
    let identity = ExecutableIdentity::from_path(&args.path, !args.no_follow)?;
    let key = identity.profile_key();
    println!("{}", args.path.display());
    println!("  device:  {:#x}", identity.device);
    println!("  inode:   {}", identity.inode);
    println!("  key:     {} ({})", key, key.0);
    Ok(())
}

fn run_replay(config_path: Option<&Path>, args: &ReplayArgs) -> Result<()> {
    let mut config = load_config(config_path)?;
    if let Some(mode) = &args.mode {
        config = config.with_mode(mode.parse::<EnforcementMode>()?);
    }

    let trace = Trace::load(&args.trace)?;
    log::info!(
        "Replaying {} ({} profiles, {} events) in {} mode",
        args.trace.display(),
        trace.profiles.len(),
        trace.events.len(),
        config.mode
    );

    let report = replay(&trace, config)?;
    for event in &report.events {
        println!("{}", serde_json::to_string(event)?);
    }
    println!("{}", serde_json::to_string(&report.summary)?);
    Ok(())
}
