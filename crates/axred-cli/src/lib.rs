//! axred command-line interface.
//!
//! Exposes the clap definitions so they can be tested without spawning
//! the binary.

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use axred_common::{LogFormat, LogLevel, ReduxSettings};
use clap::{CommandFactory, Parser, Subcommand};

pub mod commands;
pub mod logging;

use commands::{InfoCommand, RunCommand, SourceCommand};

/// axred - parametric axis-reduction kernels
#[derive(Debug, Parser)]
#[command(name = "axred")]
#[command(about = "Generate and run device-parallel axis-reduction kernels")]
#[command(long_about = r#"
axred synthesizes one reduction kernel per array rank and local size,
negotiates a local size the device compiler accepts and launches it.

Examples:
  # Print the OpenCL kernel summing the rows of a matrix
  axred source --redux 0,1 --header opencl

  # Sum along axis 1 on the host reference device
  axred run --shape 2,3 --data 1,2,3,4,5,6 --redux 0,1

  # Show the effective device limits
  axred info
"#)]
#[command(version)]
pub struct Cli {
    /// Configuration file path
    #[arg(short, long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<LogLevel>,

    /// Log format (pretty, compact, json)
    #[arg(long, value_name = "FORMAT", global = true)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Print the synthesized kernel source
    #[command(alias = "src")]
    Source(SourceCommand),

    /// Run a reduction over inline data
    Run(RunCommand),

    /// Show the effective device limits
    Info(InfoCommand),

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Debug, Subcommand)]
pub enum ConfigAction {
    /// Show the effective configuration as TOML
    Show,
    /// Show the configuration file path
    Path,
}

/// The clap command tree.
pub fn build_cli() -> clap::Command {
    Cli::command()
}

/// Settings from file and environment with the command-line overrides
/// applied.
pub fn load_settings(cli: &Cli) -> Result<ReduxSettings> {
    let mut settings =
        ReduxSettings::load(cli.config.as_deref()).context("failed to load configuration")?;
    if let Some(level) = cli.log_level {
        settings.log_level = level;
    }
    if let Some(format) = cli.log_format {
        settings.log_format = format;
    }
    Ok(settings)
}

/// Dispatch a parsed command line.
pub fn execute(cli: Cli, settings: &ReduxSettings) -> Result<()> {
    match cli.command {
        Some(Commands::Source(cmd)) => cmd.execute(settings),
        Some(Commands::Run(cmd)) => cmd.execute(settings),
        Some(Commands::Info(cmd)) => cmd.execute(settings),
        Some(Commands::Config { action }) => {
            handle_config_command(action, cli.config.as_deref(), settings)
        }
        None => {
            build_cli().print_help()?;
            Ok(())
        }
    }
}

fn handle_config_command(
    action: ConfigAction,
    path: Option<&Path>,
    settings: &ReduxSettings,
) -> Result<()> {
    match action {
        ConfigAction::Show => {
            let text = settings.to_toml().context("failed to serialize configuration")?;
            print!("{text}");
        }
        ConfigAction::Path => {
            let path = path.map(Path::to_path_buf).unwrap_or_else(ReduxSettings::default_path);
            println!("{}", path.display());
        }
    }
    Ok(())
}
