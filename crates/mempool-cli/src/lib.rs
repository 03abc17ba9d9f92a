//! mempool-cli library exports
//!
//! Argument definitions and the command implementations behind the
//! `mempool` binary.

pub mod commands;

use anyhow::{Context, Result, bail};
use clap::Parser;
use mempool_config::{BenchConfig, ConfigLoader, Validator};
use std::path::{Path, PathBuf};
use tracing::warn;

/// Prefix of the environment overrides, e.g. `MEMPOOL_BENCHMARK_OUTPUT`
pub const ENV_PREFIX: &str = "MEMPOOL";

#[derive(Parser)]
#[command(name = "mempool")]
#[command(author, version, about = "GPU memory pool read benchmark", long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Increase verbosity (-v, -vv, -vvv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// Run configuration file (TOML)
    #[arg(short, long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(clap::Subcommand)]
pub enum Commands {
    /// Run the full configuration sweep and write the CSV report
    Run {
        /// Report file, overriding the configured one
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Also print the report to stdout
        #[arg(long)]
        print: bool,
    },
    /// List the configurations the sweep would run on this device
    List,
    /// Show adapter capabilities and memory budgets
    Info,
    /// Run frames with the given settings and print the test information
    Monitor {
        /// Number of frames to run
        #[arg(short, long, default_value = "64")]
        frames: u32,
        /// Setting override, repeatable (e.g. --set HeapType=default)
        #[arg(long = "set", value_name = "NAME=VALUE")]
        set: Vec<String>,
    },
}

/// Load, override and validate the run configuration
pub fn load_config(path: Option<&Path>) -> Result<BenchConfig> {
    let mut loader = ConfigLoader::new();
    if let Some(path) = path {
        loader = loader.with_file(path);
    }
    let config = loader
        .with_env_prefix(ENV_PREFIX)
        .load()
        .context("Failed to load configuration")?;

    let result = Validator::new().validate(&config);
    for warning in &result.warnings {
        warn!("{}: {}", warning.field, warning.message);
    }
    if !result.is_valid() {
        let errors: Vec<String> = result.errors.iter().map(ToString::to_string).collect();
        bail!("Invalid configuration:\n  {}", errors.join("\n  "));
    }

    Ok(config)
}

/// Split a `NAME=VALUE` override
pub fn parse_setting(text: &str) -> Result<(&str, &str)> {
    let (name, value) = text
        .split_once('=')
        .with_context(|| format!("Expected NAME=VALUE, got '{}'", text))?;
    let name = name.trim();
    if name.is_empty() {
        bail!("Missing setting name in '{}'", text);
    }
    Ok((name, value.trim()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_run() {
        let cli = Cli::parse_from(["mempool", "-vv", "run", "--output", "out.csv", "--print"]);
        assert_eq!(cli.verbose, 2);
        match cli.command {
            Commands::Run { output, print } => {
                assert_eq!(output, Some(PathBuf::from("out.csv")));
                assert!(print);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_parse_monitor_overrides() {
        let cli = Cli::parse_from([
            "mempool",
            "monitor",
            "--frames",
            "8",
            "--set",
            "HeapType=default",
            "--set",
            "NumThreadGroups=16",
        ]);
        match cli.command {
            Commands::Monitor { frames, set } => {
                assert_eq!(frames, 8);
                assert_eq!(set, vec!["HeapType=default", "NumThreadGroups=16"]);
            }
            _ => panic!("expected monitor"),
        }
    }

    #[test]
    fn test_parse_setting() {
        assert_eq!(parse_setting("HeapType=default").unwrap(), ("HeapType", "default"));
        assert_eq!(parse_setting(" ElemsPerThread = 4 ").unwrap(), ("ElemsPerThread", "4"));
        assert!(parse_setting("HeapType").is_err());
        assert!(parse_setting("=4").is_err());
    }

    #[test]
    fn test_load_config_rejects_invalid_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("bad.toml");
        std::fs::write(&path, "[benchmark]\nmeasure_frames = 0\n").unwrap();
        assert!(load_config(Some(&path)).is_err());
    }

    #[test]
    fn test_load_config_defaults() {
        let config = load_config(None).unwrap();
        assert_eq!(config.benchmark.total_frames(), 72);
    }
}
