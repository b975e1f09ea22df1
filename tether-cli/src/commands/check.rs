//! Check command - test whether a connection works.

use anyhow::Result;
use chrono::Utc;
use clap::Args;
use tether_connectors::CheckStatus;
use tether_store::ConfigStore;
use tracing::info;

use super::{Target, TargetArgs, build_gate, cancel_on_ctrl_c, open_target};
use crate::output::{CheckOutput, JsonFormatter, TextFormatter};
use crate::{Cli, ExitCode, OutputFormat};

/// Arguments for the check command.
#[derive(Args, Debug)]
pub struct CheckArgs {
    #[command(flatten)]
    pub target: TargetArgs,
}

/// Maps a check outcome to the process exit code.
pub fn exit_code(status: &CheckStatus) -> ExitCode {
    match status {
        CheckStatus::Working => ExitCode::Success,
        CheckStatus::TemporarilyFailed { .. } => ExitCode::ServiceInterruption,
        CheckStatus::Failed { .. } => ExitCode::ConnectionFailed,
        CheckStatus::Cancelled => ExitCode::Cancelled,
    }
}

/// Builds the JSON record for a finished check.
pub fn check_output(target: &Target, status: CheckStatus) -> CheckOutput {
    CheckOutput {
        connection: target.label.clone(),
        connector: target.connector.descriptor().cli_name().to_string(),
        bin: target.connector.bin_name().to_string(),
        summary: status.to_string(),
        status,
        state: target.connector.state(),
        checked_at: Utc::now(),
    }
}

/// Runs the check command.
pub async fn run(args: &CheckArgs, cli: &Cli, store: &ConfigStore) -> Result<ExitCode> {
    let config = store.get().await;
    let gate = build_gate(&config);
    let target = open_target(&args.target, &config, &gate)?;
    info!(connection = %target.label, "Checking connection");

    let cancel = cancel_on_ctrl_c();
    let status = target.connector.check(&cancel).await;
    let code = exit_code(&status);

    match cli.format {
        OutputFormat::Text => {
            if !cli.quiet || code != ExitCode::Success {
                let formatter = TextFormatter::new(!cli.no_color);
                println!("{}", formatter.format_check(&target.label, &status));
            }
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format_checks(&[check_output(&target, status)])?);
        }
    }

    target.connector.disconnect().await;
    Ok(code)
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use tether_store::{Config, ConnectionConfig};

    #[test]
    fn test_exit_codes() {
        assert_eq!(exit_code(&CheckStatus::Working), ExitCode::Success);
        assert_eq!(
            exit_code(&CheckStatus::Failed {
                message: String::new()
            }),
            ExitCode::ConnectionFailed
        );
        assert_eq!(
            exit_code(&CheckStatus::TemporarilyFailed {
                message: String::new(),
                retry_after: Utc::now()
            }),
            ExitCode::ServiceInterruption
        );
        assert_eq!(exit_code(&CheckStatus::Cancelled), ExitCode::Cancelled);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn test_check_missing_parameter_fails() {
        let mut config = Config::default();
        config
            .add_connection(
                "broken",
                ConnectionConfig::new("mongodb").with_param("host", "127.0.0.1"),
            )
            .unwrap();
        let gate = build_gate(&config);
        let args = TargetArgs {
            connection: Some("broken".to_string()),
            ..TargetArgs::default()
        };
        let target = open_target(&args, &config, &gate).unwrap();

        let status = target.connector.check(&tether_core::CancelToken::new()).await;
        assert_eq!(
            status.to_string(),
            "Connection failed: Parameter database required but not set"
        );
        let output = check_output(&target, status);
        assert_eq!(output.connector, "mongodb");
        assert_eq!(output.bin, "127.0.0.1:27017");
        assert_eq!(target.connector.stats().workers_spawned, 0);
    }
}
