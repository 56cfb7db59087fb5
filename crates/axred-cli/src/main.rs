//! axred command-line entry point.

use anyhow::Result;
use axred_cli::{Cli, execute, load_settings, logging};
use clap::Parser;
use console::style;

fn main() {
    if let Err(e) = try_main() {
        eprintln!("{} {e}", style("error:").red().bold());
        let mut source = e.source();
        while let Some(err) = source {
            eprintln!("  {} {err}", style("caused by:").dim());
            source = err.source();
        }
        std::process::exit(1);
    }
}

fn try_main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load_settings(&cli)?;
    logging::init(&settings)?;
    execute(cli, &settings)
}
