//! Sample command - one throttled fetch against a connection.

use anyhow::Result;
use clap::Args;
use tether_core::ClassifiedError;
use tether_fetch::Wait;
use tether_store::ConfigStore;
use tokio::time::Duration;
use tracing::info;

use super::{TargetArgs, build_gate, cancel_on_ctrl_c, open_target};
use crate::output::{JsonFormatter, SampleOutput, TextFormatter};
use crate::{Cli, ExitCode, OutputFormat};

/// Arguments for the sample command.
#[derive(Args, Debug)]
pub struct SampleArgs {
    #[command(flatten)]
    pub target: TargetArgs,

    /// Seconds to wait for a fetch permit; waits indefinitely if omitted.
    #[arg(long, short = 't')]
    pub permit_timeout: Option<u64>,
}

impl SampleArgs {
    fn wait(&self) -> Wait {
        self.permit_timeout
            .map_or(Wait::Blocking, |secs| Wait::within(Duration::from_secs(secs)))
    }
}

fn exit_code(err: &ClassifiedError) -> ExitCode {
    match err {
        ClassifiedError::Transient { .. } => ExitCode::ServiceInterruption,
        ClassifiedError::Fatal { .. } => ExitCode::ConnectionFailed,
        ClassifiedError::Cancelled => ExitCode::Cancelled,
    }
}

/// Runs the sample command.
pub async fn run(args: &SampleArgs, cli: &Cli, store: &ConfigStore) -> Result<ExitCode> {
    let config = store.get().await;
    let gate = build_gate(&config);
    let target = open_target(&args.target, &config, &gate)?;
    let bin = target.connector.bin_name().to_string();
    info!(connection = %target.label, %bin, "Sampling connection");

    let cancel = cancel_on_ctrl_c();
    let result = target.connector.sample(&cancel, args.wait()).await;
    let stats = target.connector.stats();
    target.connector.disconnect().await;

    let code = result.as_ref().map_or_else(exit_code, |_| ExitCode::Success);
    match cli.format {
        OutputFormat::Text => {
            let formatter = TextFormatter::new(!cli.no_color);
            match &result {
                Ok(bytes) => println!("{}", formatter.format_sample(&target.label, &bin, *bytes, &stats)),
                Err(e) => eprintln!("{}", formatter.format_error(&target.label, &e.to_string())),
            }
        }
        OutputFormat::Json => {
            let output = SampleOutput {
                connection: target.label.clone(),
                bin,
                bytes: result.as_ref().ok().copied(),
                error: result.as_ref().err().map(ToString::to_string),
                retry_after: result.as_ref().err().and_then(ClassifiedError::retry_after),
                stats,
            };
            println!("{}", JsonFormatter::new(cli.pretty).format(&output)?);
        }
    }

    Ok(code)
}

// ============================================================================
// Tests
// ============================================================================
