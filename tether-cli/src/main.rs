// Lint configuration for this crate
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! Tether CLI - connector health checks from the command line.
//!
//! # Examples
//!
//! ```bash
//! # Check a named connection from the config file
//! tether check archive
//!
//! # Check an ad-hoc endpoint
//! tether check --connector cmis \
//!     -P binding=atom -P endpoint=https://dms.example.com/atom \
//!     -P username=crawler -P password=secret
//!
//! # Watch every configured connection
//! tether watch --interval 30
//!
//! # One throttled sample fetch, JSON output
//! tether sample archive --format json --pretty
//!
//! # List connectors and their parameters
//! tether connectors
//! ```

mod commands;
mod output;

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand, ValueEnum};
use tether_store::{ConfigStore, LogLevel, default_config_path};
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use commands::{check, config, connectors, sample, watch};

// ============================================================================
// CLI Definition
// ============================================================================

/// Tether CLI - connector health checks.
#[derive(Parser)]
#[command(name = "tether")]
#[command(about = "Connection checks and throttled fetches for repository connectors")]
#[command(long_about = r#"
Tether keeps sessions to remote repositories alive, checks that they work,
and throttles fetches per endpoint.

Supported connectors:
  • CMIS (cmis)
  • MongoDB (mongodb)

Examples:
  tether check archive             # Check a named connection
  tether check -c mongodb -P host=db1 -P database=crawl -P collection=docs
  tether watch                     # Watch all named connections
  tether connectors                # List connectors
  tether config show               # Show configuration
"#)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output format (text or json).
    #[arg(long, short = 'f', default_value = "text", global = true)]
    pub format: OutputFormat,

    /// Pretty-print JSON output.
    #[arg(long, global = true)]
    pub pretty: bool,

    /// Config file to use instead of the default.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Verbose output (show debug info).
    #[arg(long, short, global = true)]
    pub verbose: bool,

    /// Disable colored output.
    #[arg(long, global = true)]
    pub no_color: bool,

    /// Quiet mode (minimal output).
    #[arg(long, short, global = true)]
    pub quiet: bool,
}

impl Cli {
    /// Returns the config file path in effect.
    pub fn config_path(&self) -> PathBuf {
        self.config.clone().unwrap_or_else(default_config_path)
    }
}

/// CLI commands.
#[derive(Subcommand)]
pub enum Commands {
    /// Test whether a connection works.
    #[command(visible_alias = "c")]
    Check(check::CheckArgs),

    /// Check connections periodically until interrupted.
    #[command(visible_alias = "w")]
    Watch(watch::WatchArgs),

    /// Perform one throttled sample fetch.
    #[command(visible_alias = "s")]
    Sample(sample::SampleArgs),

    /// List available connectors.
    #[command(visible_alias = "ls")]
    Connectors,

    /// Manage configuration.
    Config(config::ConfigArgs),
}

/// Output format options.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum, Default)]
pub enum OutputFormat {
    /// Human-readable text with colors.
    #[default]
    Text,
    /// JSON output for scripting.
    Json,
}

/// CLI exit codes.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitCode {
    /// Success.
    Success = 0,
    /// General error.
    Error = 1,
    /// The connection cannot work without operator action.
    ConnectionFailed = 2,
    /// The repository is temporarily unavailable.
    ServiceInterruption = 3,
    /// Interrupted before finishing.
    Cancelled = 4,
}

// ============================================================================
// Logging Setup
// ============================================================================

fn log_filter(verbose: bool, level: LogLevel) -> String {
    if verbose {
        "tether=debug,info".to_string()
    } else {
        format!("tether={level}")
    }
}

fn setup_logging(verbose: bool, quiet: bool, level: LogLevel) {
    if quiet {
        return; // No logging in quiet mode
    }

    tracing_subscriber::registry()
        .with(
            fmt::layer()
                .with_target(false)
                .without_time()
                .with_writer(std::io::stderr),
        )
        .with(EnvFilter::new(log_filter(verbose, level)))
        .init();
}

// ============================================================================
// Main Entry Point
// ============================================================================

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let store = match ConfigStore::load(cli.config_path()).await {
        Ok(store) => store,
        Err(e) => {
            setup_logging(cli.verbose, cli.quiet, LogLevel::default());
            if !cli.quiet {
                eprintln!("Error: {e}");
            }
            std::process::exit(ExitCode::Error as i32);
        }
    };
    let level = store.get().await.general.log_level;
    setup_logging(cli.verbose, cli.quiet, level);

    let result = match &cli.command {
        Commands::Check(args) => check::run(args, &cli, &store).await,
        Commands::Watch(args) => watch::run(args, &cli, &store).await,
        Commands::Sample(args) => sample::run(args, &cli, &store).await,
        Commands::Connectors => connectors::run(&cli).map(|()| ExitCode::Success),
        Commands::Config(args) => config::run(args, &cli, &store)
            .await
            .map(|()| ExitCode::Success),
    };

    match result {
        Ok(ExitCode::Success) => Ok(()),
        Ok(code) => std::process::exit(code as i32),
        Err(e) => {
            if !cli.quiet {
                eprintln!("Error: {e}");
            }
            std::process::exit(ExitCode::Error as i32);
        }
    }
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter(true, LogLevel::Error), "tether=debug,info");
        assert_eq!(log_filter(false, LogLevel::Warn), "tether=warn");
        assert_eq!(log_filter(false, LogLevel::Trace), "tether=trace");
        assert_eq!(log_filter(false, LogLevel::default()), "tether=warn");
    }

    #[test]
    fn test_parse_adhoc_check() {
        let cli = Cli::try_parse_from([
            "tether",
            "check",
            "--connector",
            "mongodb",
            "-P",
            "host=db1",
            "-P",
            "database=crawl",
            "--format",
            "json",
        ])
        .unwrap();
        assert_eq!(cli.format, OutputFormat::Json);
        let Commands::Check(args) = cli.command else {
            panic!("expected check");
        };
        assert_eq!(args.target.connector.as_deref(), Some("mongodb"));
        assert_eq!(
            args.target.params,
            vec![
                ("host".to_string(), "db1".to_string()),
                ("database".to_string(), "crawl".to_string())
            ]
        );
    }

    #[test]
    fn test_parse_rejects_malformed_param() {
        assert!(Cli::try_parse_from(["tether", "check", "-c", "cmis", "-P", "binding"]).is_err());
    }

    #[test]
    fn test_config_path_override() {
        let cli = Cli::try_parse_from(["tether", "--config", "/tmp/t.json", "connectors"]).unwrap();
        assert_eq!(cli.config_path(), PathBuf::from("/tmp/t.json"));
    }
}
