//! Argument parsing and settings layering, without spawning the binary.

use anyhow::Result;
use axred_cli::commands::OutputFormat;
use axred_cli::{Cli, Commands, ConfigAction, build_cli, load_settings};
use axred_common::{DType, LogFormat, LogLevel};
use clap::Parser;
use serial_test::serial;

fn parse(args: &[&str]) -> Result<Cli> {
    Ok(Cli::try_parse_from(args)?)
}

#[test]
fn command_tree_is_consistent() {
    build_cli().debug_assert();
}

#[test]
fn run_arguments() -> Result<()> {
    let cli = parse(&[
        "axred", "run", "--shape", "2,3", "--data", "-1,2.5,3,4,5,6", "--redux", "0,true",
        "--dtype", "double",
    ])?;
    let Some(Commands::Run(cmd)) = cli.command else { panic!("expected run") };
    assert_eq!(cmd.shape, vec![2, 3]);
    assert_eq!(cmd.data, vec![-1.0, 2.5, 3.0, 4.0, 5.0, 6.0]);
    assert_eq!(cmd.reduction.redux, vec![false, true]);
    assert_eq!(cmd.reduction.dtype, DType::F64);
    assert_eq!(cmd.reduction.reduce, "a + b");
    assert_eq!(cmd.reduction.neutral, "0");
    assert_eq!(cmd.output_format, OutputFormat::Text);
    Ok(())
}

#[test]
fn negative_neutral_is_a_value() -> Result<()> {
    let cli = parse(&["axred", "source", "--redux", "1", "--neutral", "-INFINITY"])?;
    let Some(Commands::Source(cmd)) = cli.command else { panic!("expected source") };
    assert_eq!(cmd.reduction.neutral, "-INFINITY");
    assert_eq!(cmd.local_size, None);
    Ok(())
}

#[test]
fn redux_is_required() {
    assert!(parse(&["axred", "source"]).is_err());
}

#[test]
fn bad_axis_flag_is_rejected() {
    assert!(parse(&["axred", "source", "--redux", "0,2"]).is_err());
}

#[test]
fn global_flags_after_subcommand() -> Result<()> {
    let cli = parse(&["axred", "config", "show", "--log-level", "debug", "--log-format", "json"])?;
    assert_eq!(cli.log_level, Some(LogLevel::Debug));
    assert_eq!(cli.log_format, Some(LogFormat::Json));
    assert!(matches!(cli.command, Some(Commands::Config { action: ConfigAction::Show })));
    Ok(())
}

#[test]
#[serial]
fn command_line_overrides_config_file() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("axred.toml");
    std::fs::write(&path, "[redux]\nlog_level = \"info\"\nkernel_cache = true\n")?;
    let path_str = path.to_string_lossy().into_owned();

    let cli = parse(&["axred", "--config", &path_str, "--log-level", "trace", "info"])?;
    let settings = load_settings(&cli)?;
    assert_eq!(settings.log_level, LogLevel::Trace);
    assert!(settings.kernel_cache);
    Ok(())
}

#[test]
#[serial]
fn invalid_config_file_is_reported() -> Result<()> {
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("axred.toml");
    std::fs::write(&path, "[redux]\nbackend = \"cuda\"\n")?;
    let path_str = path.to_string_lossy().into_owned();

    let cli = parse(&["axred", "--config", &path_str, "info"])?;
    let err = load_settings(&cli).unwrap_err();
    assert!(err.to_string().contains("failed to load configuration"));
    Ok(())
}
