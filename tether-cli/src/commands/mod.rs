//! CLI command implementations.

pub mod check;
pub mod config;
pub mod connectors;
pub mod sample;
pub mod watch;

use std::sync::Arc;

use anyhow::{Context, Result, bail};
use clap::Args;
use tether_connectors::{ConnectorRegistry, ManagedConnector};
use tether_core::CancelToken;
use tether_fetch::FetchPermitGate;
use tether_session::SessionSettings;
use tether_store::Config;
use tracing::debug;

// ============================================================================
// Target Selection
// ============================================================================

/// Selects the connection a command talks to.
#[derive(Args, Debug, Clone, Default)]
pub struct TargetArgs {
    /// Named connection from the config file.
    pub connection: Option<String>,

    /// Connector to use for an ad-hoc connection (e.g., "cmis").
    #[arg(long, short = 'c')]
    pub connector: Option<String>,

    /// Connection parameter as name=value; overrides the named connection.
    #[arg(long = "param", short = 'P', value_parser = parse_param)]
    pub params: Vec<(String, String)>,
}

/// Parses a `name=value` pair.
pub fn parse_param(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((name, value)) if !name.trim().is_empty() => {
            Ok((name.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected name=value, got '{raw}'")),
    }
}

/// An opened connector plus the label it is reported under.
pub struct Target {
    pub label: String,
    pub connector: Arc<dyn ManagedConnector>,
}

/// Builds the gate shared by every connector a command opens.
pub fn build_gate(config: &Config) -> Arc<FetchPermitGate> {
    Arc::new(config.throttle.build_gate())
}

/// Opens the connector `args` selects.
pub fn open_target(args: &TargetArgs, config: &Config, gate: &Arc<FetchPermitGate>) -> Result<Target> {
    let (label, connector_name, mut params) = match (&args.connection, &args.connector) {
        (Some(name), connector) => {
            let stored = config.connection(name)?;
            let connector = connector.clone().unwrap_or_else(|| stored.connector.clone());
            (name.clone(), connector, stored.connection_params())
        }
        (None, Some(connector)) => (connector.clone(), connector.clone(), Default::default()),
        (None, None) => bail!("Specify a connection name or --connector"),
    };
    for (name, value) in &args.params {
        params = params.with(name.clone(), value.clone());
    }

    open_named(label, &connector_name, params, config, gate)
}

/// Opens every named connection, or only those listed in `names`.
pub fn open_connections(
    names: &[String],
    config: &Config,
    gate: &Arc<FetchPermitGate>,
) -> Result<Vec<Target>> {
    let selected: Vec<&String> = if names.is_empty() {
        config.connections.keys().collect()
    } else {
        names.iter().collect()
    };
    if selected.is_empty() {
        bail!("No connections configured; add one with `tether config add`");
    }

    selected
        .into_iter()
        .map(|name| {
            let stored = config.connection(name)?;
            open_named(
                name.clone(),
                &stored.connector,
                stored.connection_params(),
                config,
                gate,
            )
        })
        .collect()
}

fn open_named(
    label: String,
    connector_name: &str,
    params: tether_core::ConnectionParams,
    config: &Config,
    gate: &Arc<FetchPermitGate>,
) -> Result<Target> {
    debug!(connection = %label, connector = connector_name, "Opening connection");
    let connector = ConnectorRegistry::open_by_name(
        connector_name,
        &params,
        SessionSettings::from(&config.session),
        Arc::clone(gate),
    )
    .with_context(|| format!("Cannot open connection '{label}'"))?;
    Ok(Target { label, connector })
}

/// Returns a token cancelled when Ctrl+C is pressed.
pub fn cancel_on_ctrl_c() -> CancelToken {
    let token = CancelToken::new();
    let handle = token.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            debug!("Interrupted");
            handle.cancel();
        }
    });
    token
}

// ============================================================================
// Tests
// ============================================================================
