//! Watch command - periodic connection checks.

use std::io::{Write, stdout};

use anyhow::Result;
use clap::Args;
use futures::future::join_all;
use tether_connectors::CheckStatus;
use tether_core::CancelToken;
use tether_store::ConfigStore;
use tokio::time::{Duration, MissedTickBehavior, interval};
use tracing::{debug, info};

use super::{Target, build_gate, cancel_on_ctrl_c, open_connections};
use crate::output::{JsonFormatter, TextFormatter};
use crate::{Cli, ExitCode, OutputFormat};

/// Arguments for watch command.
#[derive(Args, Debug)]
pub struct WatchArgs {
    /// Named connections to watch; all configured connections if omitted.
    pub connections: Vec<String>,

    /// Refresh interval in seconds.
    #[arg(long, short, default_value = "30")]
    pub interval: u64,

    /// Minimum interval to use.
    #[arg(long, default_value = "5")]
    pub min_interval: u64,

    /// Stop after this many rounds.
    #[arg(long)]
    pub count: Option<u64>,
}

/// Runs the watch command.
pub async fn run(args: &WatchArgs, cli: &Cli, store: &ConfigStore) -> Result<ExitCode> {
    let config = store.get().await;
    let gate = build_gate(&config);
    let targets = open_connections(&args.connections, &config, &gate)?;

    let refresh_interval = args.interval.max(args.min_interval);
    info!(
        interval = refresh_interval,
        connections = targets.len(),
        "Starting watch mode"
    );

    let cancel = cancel_on_ctrl_c();
    let formatter = TextFormatter::new(!cli.no_color);
    let json = JsonFormatter::new(cli.pretty);

    let mut ticker = interval(Duration::from_secs(refresh_interval));
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut maintenance = interval(config.general.poll_interval());
    maintenance.set_missed_tick_behavior(MissedTickBehavior::Skip);

    let mut rounds = 0u64;
    loop {
        tokio::select! {
            () = cancel.cancelled() => break,
            _ = maintenance.tick() => {
                for target in &targets {
                    if target.connector.poll().await {
                        debug!(connection = %target.label, "Idle session released");
                    }
                }
                continue;
            }
            _ = ticker.tick() => {}
        }

        let statuses = check_all(&targets, &cancel).await;
        if cancel.is_cancelled() {
            break;
        }

        match cli.format {
            OutputFormat::Text => {
                // Clear screen
                print!("\x1b[2J\x1b[H");
                stdout().flush()?;

                println!(
                    "{}",
                    formatter.format_watch_header(chrono::Local::now(), refresh_interval)
                );
                println!();
                for (target, status) in targets.iter().zip(&statuses) {
                    println!(
                        "{}",
                        formatter.format_watch_line(&target.label, target.connector.state(), status)
                    );
                }
                println!();
                println!("Press Ctrl+C to exit");
            }
            OutputFormat::Json => {
                let outputs: Vec<_> = targets
                    .iter()
                    .zip(statuses)
                    .map(|(target, status)| super::check::check_output(target, status))
                    .collect();
                println!("{}", json.format(&outputs)?);
            }
        }

        rounds += 1;
        if args.count.is_some_and(|count| rounds >= count) {
            break;
        }
    }

    join_all(targets.iter().map(|target| target.connector.disconnect())).await;
    info!("Watch mode stopped");
    Ok(ExitCode::Success)
}

/// Checks every target concurrently, in order.
async fn check_all(targets: &[Target], cancel: &CancelToken) -> Vec<CheckStatus> {
    join_all(targets.iter().map(|target| target.connector.check(cancel))).await
}
