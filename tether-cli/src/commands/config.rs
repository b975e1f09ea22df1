//! Config command - manage configuration.

use std::collections::BTreeMap;

use anyhow::{Result, anyhow};
use clap::{Args, Subcommand};
use tether_connectors::ConnectorRegistry;
use tether_core::ConnectionParams;
use tether_store::{Config, ConfigStore, ConnectionConfig, default_config_dir};
use tracing::info;

use super::parse_param;
use crate::output::JsonFormatter;
use crate::{Cli, OutputFormat};

const MASK: &str = "********";

/// Arguments for the config command.
#[derive(Args, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub action: ConfigAction,
}

/// Config subcommands.
#[derive(Subcommand, Debug)]
pub enum ConfigAction {
    /// Show current configuration.
    Show,

    /// Show configuration paths.
    Path,

    /// Add a named connection.
    Add {
        /// Connection name.
        name: String,

        /// Connector CLI name or alias (e.g., "cmis").
        connector: String,

        /// Connection parameter as name=value.
        #[arg(long = "param", short = 'P', value_parser = parse_param)]
        params: Vec<(String, String)>,
    },

    /// Remove a named connection.
    Remove {
        /// Connection name.
        name: String,
    },

    /// Reset to defaults.
    Reset,
}

/// Runs the config command.
pub async fn run(args: &ConfigArgs, cli: &Cli, store: &ConfigStore) -> Result<()> {
    match &args.action {
        ConfigAction::Show => show_config(cli, store).await,
        ConfigAction::Path => show_paths(cli, store),
        ConfigAction::Add {
            name,
            connector,
            params,
        } => add_connection(store, name, connector, params).await,
        ConfigAction::Remove { name } => remove_connection(store, name).await,
        ConfigAction::Reset => reset_config(store).await,
    }
}

/// Returns a copy of `config` with secret parameter values masked.
fn masked(mut config: Config) -> Config {
    for connection in config.connections.values_mut() {
        let descriptor = ConnectorRegistry::get_by_cli_name(&connection.connector);
        for (name, value) in &mut connection.params {
            let secret = descriptor
                .and_then(|d| d.param(name))
                .map_or_else(|| ConnectionParams::is_secret(name), |p| p.secret);
            if secret && !value.is_empty() {
                *value = MASK.to_string();
            }
        }
    }
    config
}

async fn show_config(cli: &Cli, store: &ConfigStore) -> Result<()> {
    let config = masked(store.get().await);

    match cli.format {
        OutputFormat::Text => {
            println!("Tether Configuration");
            println!("{}", "─".repeat(40));
            println!();
            println!("Log level:          {}", config.general.log_level);
            println!("Poll interval:      {}s", config.general.poll_interval_secs);
            println!("Idle timeout:       {}ms", config.session.idle_timeout_ms);
            println!("Transient backoff:  {}ms", config.session.transient_backoff_ms);
            println!("Health retry:       {:?}", config.session.health_retry);
            println!(
                "Fetch concurrency:  {} per bin ({} overrides)",
                config.throttle.default.max_concurrent,
                config.throttle.bins.len()
            );
            println!();
            if config.connections.is_empty() {
                println!("No connections configured");
            } else {
                println!("Connections:");
                for (name, connection) in &config.connections {
                    println!("  • {name} ({})", connection.connector);
                    for (param, value) in &connection.params {
                        println!("      {param} = {value}");
                    }
                }
            }
        }
        OutputFormat::Json => {
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format(&config)?);
        }
    }

    Ok(())
}

fn show_paths(cli: &Cli, store: &ConfigStore) -> Result<()> {
    let config_dir = default_config_dir();
    let config_path = store.path();

    match cli.format {
        OutputFormat::Text => {
            println!("Configuration Paths");
            println!("{}", "─".repeat(40));
            println!();
            println!("Config dir:  {}", config_dir.display());
            println!("Config file: {}", config_path.display());
        }
        OutputFormat::Json => {
            let paths = serde_json::json!({
                "config_dir": config_dir.display().to_string(),
                "config_file": config_path.display().to_string(),
            });
            let formatter = JsonFormatter::new(cli.pretty);
            println!("{}", formatter.format(&paths)?);
        }
    }

    Ok(())
}

/// Builds the stored form of a new connection, checking names against the
/// connector's parameters.
fn build_connection(connector: &str, params: &[(String, String)]) -> Result<ConnectionConfig> {
    let desc = ConnectorRegistry::get_by_cli_name(connector)
        .ok_or_else(|| anyhow!("Unknown connector: {connector}"))?;

    let mut connection = ConnectionConfig::new(desc.cli_name());
    for (name, value) in params {
        if desc.param(name).is_none() {
            anyhow::bail!("Connector {} has no parameter '{name}'", desc.cli_name());
        }
        connection = connection.with_param(name.clone(), value.clone());
    }
    Ok(connection)
}

/// Lists required parameters a connection does not set and has no default for.
fn missing_required(connection: &ConnectionConfig) -> Vec<&'static str> {
    let params: BTreeMap<&str, &str> = connection
        .params
        .iter()
        .map(|(k, v)| (k.as_str(), v.as_str()))
        .filter(|(_, v)| !v.is_empty())
        .collect();
    ConnectorRegistry::get_by_cli_name(&connection.connector)
        .map(|desc| {
            desc.params
                .iter()
                .filter(|p| p.required && p.default.is_none() && !params.contains_key(p.name))
                .map(|p| p.name)
                .collect()
        })
        .unwrap_or_default()
}

async fn add_connection(
    store: &ConfigStore,
    name: &str,
    connector: &str,
    params: &[(String, String)],
) -> Result<()> {
    let connection = build_connection(connector, params)?;
    let missing = missing_required(&connection);

    store
        .update(|config| config.add_connection(name, connection))
        .await?;
    store.save().await?;

    info!(connection = name, "Connection added");
    println!("Added: {name}");
    if !missing.is_empty() {
        println!("Not yet set: {}", missing.join(", "));
    }

    Ok(())
}

async fn remove_connection(store: &ConfigStore, name: &str) -> Result<()> {
    let removed = store
        .update(|config| config.remove_connection(name))
        .await?;
    store.save().await?;

    info!(connection = name, connector = %removed.connector, "Connection removed");
    println!("Removed: {name}");

    Ok(())
}

async fn reset_config(store: &ConfigStore) -> Result<()> {
    let path = store.path();

    if path.exists() {
        tokio::fs::remove_file(path).await?;
        store
            .update(|config| {
                *config = Config::default();
                Ok(())
            })
            .await?;
        info!(path = %path.display(), "Configuration reset");
        println!("Configuration reset to defaults");
    } else {
        println!("No configuration file to reset");
    }

    Ok(())
}

// ============================================================================
// Tests
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    fn pairs(items: &[(&str, &str)]) -> Vec<(String, String)> {
        items
            .iter()
            .map(|(k, v)| ((*k).to_string(), (*v).to_string()))
            .collect()
    }

    #[test]
    fn test_build_connection_uses_canonical_name() {
        let connection =
            build_connection("mongo", &pairs(&[("host", "db1"), ("database", "crawl")])).unwrap();
        assert_eq!(connection.connector, "mongodb");
        assert_eq!(missing_required(&connection), vec!["collection"]);
    }

    #[test]
    fn test_build_connection_rejects_unknown_param() {
        let err = build_connection("cmis", &pairs(&[("colour", "blue")])).unwrap_err();
        assert!(err.to_string().contains("colour"));
        assert!(build_connection("ftp", &[]).is_err());
    }

    #[test]
    fn test_masked_hides_secrets() {
        let mut config = Config::default();
        config
            .add_connection(
                "dms",
                ConnectionConfig::new("cmis")
                    .with_param("username", "crawler")
                    .with_param("password", "hunter2"),
            )
            .unwrap();
        let shown = masked(config);
        let params = &shown.connections["dms"].params;
        assert_eq!(params["username"], "crawler");
        assert_eq!(params["password"], MASK);
    }

    #[tokio::test]
    async fn test_add_then_remove_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(path.clone()).await.unwrap();

        add_connection(&store, "archive", "mongodb", &pairs(&[("database", "crawl")]))
            .await
            .unwrap();
        let reloaded = Config::load_from(&path).await.unwrap();
        assert_eq!(reloaded.connections["archive"].connector, "mongodb");

        assert!(
            add_connection(&store, "archive", "mongodb", &[])
                .await
                .is_err()
        );

        remove_connection(&store, "archive").await.unwrap();
        let reloaded = Config::load_from(&path).await.unwrap();
        assert!(reloaded.connections.is_empty());
    }

    #[tokio::test]
    async fn test_reset_removes_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        let store = ConfigStore::load(path.clone()).await.unwrap();
        add_connection(&store, "archive", "mongodb", &[]).await.unwrap();

        reset_config(&store).await.unwrap();
        assert!(!path.exists());
        assert!(store.get().await.connections.is_empty());
    }
}
