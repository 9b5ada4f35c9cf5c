//! fdbb - store bridge driver
//!
//! Boots a host event loop, the completion bridge and the simulated store,
//! then runs one command through them the way a host program would.

mod commands;

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use fdb_bridge::Config;

use crate::commands::session::Session;

/// Default config file, read when present.
const DEFAULT_CONFIG: &str = "fdbb.toml";

/// Store bridge driver
#[derive(Parser, Debug)]
#[command(name = "fdbb")]
#[command(author, version, about = "Run store operations through the completion bridge")]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file (defaults to fdbb.toml if it exists)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Disable colored output
    #[arg(long, global = true)]
    no_color: bool,
}

#[derive(Clone, Copy, Debug, Default, ValueEnum)]
pub enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Read a key
    Get(commands::kv::GetArgs),

    /// Write a key
    Set(commands::kv::SetArgs),

    /// Clear a key or a range of keys
    Clear(commands::kv::ClearArgs),

    /// Read a range of keys
    Range(commands::kv::RangeArgs),

    /// Watch a key for changes
    Watch(commands::watch::WatchArgs),

    /// Show API, client and cluster versions
    Version(commands::version::VersionArgs),

    /// Measure round trips through the bridge
    Bench(commands::bench::BenchArgs),
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

fn load_config(path: Option<&Path>) -> Result<Config> {
    match path {
        Some(path) => Config::load(path).with_context(|| format!("loading {}", path.display())),
        None if Path::new(DEFAULT_CONFIG).exists() => Ok(Config::load(Path::new(DEFAULT_CONFIG))?),
        None => Ok(Config::default()),
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let use_color = !cli.no_color && atty::is(atty::Stream::Stdout);
    console::set_colors_enabled(use_color);

    let config = load_config(cli.config.as_deref())?;
    let mut session = Session::open(&config)?;

    let result = match cli.command {
        Commands::Get(args) => commands::kv::get(args, &mut session, cli.format),
        Commands::Set(args) => commands::kv::set(args, &mut session, cli.format),
        Commands::Clear(args) => commands::kv::clear(args, &mut session, cli.format),
        Commands::Range(args) => commands::kv::range(args, &mut session, cli.format),
        Commands::Watch(args) => commands::watch::run(args, &mut session, cli.format),
        Commands::Version(args) => commands::version::run(args, &mut session, cli.format),
        Commands::Bench(args) => commands::bench::run(args, &mut session, cli.format),
    };

    session.close();
    result
}
