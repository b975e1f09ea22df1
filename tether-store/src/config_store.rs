//! Config store with change notifications.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::{RwLock, watch};
use tracing::info;

use crate::config::Config;
use crate::error::StoreError;
use crate::persistence::default_config_path;

/// Persistent configuration with change notifications.
///
/// Subscribers receive a version number that increases with every update.
pub struct ConfigStore {
    config: Arc<RwLock<Config>>,
    path: PathBuf,
    notify: watch::Sender<u64>,
}

impl ConfigStore {
    /// Creates a store holding defaults for `path`.
    pub fn new(path: PathBuf) -> Self {
        Self::with_config(path, Config::default())
    }

    fn with_config(path: PathBuf, config: Config) -> Self {
        let (notify, _) = watch::channel(0);
        Self {
            config: Arc::new(RwLock::new(config)),
            path,
            notify,
        }
    }

    /// Loads the config from the default path.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub async fn load_default() -> Result<Self, StoreError> {
        Self::load(default_config_path()).await
    }

    /// Loads the config from `path`; a missing file gives defaults.
    ///
    /// # Errors
    ///
    /// Returns error if the file exists but cannot be read or parsed.
    pub async fn load(path: PathBuf) -> Result<Self, StoreError> {
        let config = Config::load_from(&path).await?;
        Ok(Self::with_config(path, config))
    }

    /// Returns the file path.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Gets a copy of the current config.
    pub async fn get(&self) -> Config {
        self.config.read().await.clone()
    }

    /// Applies a fallible change and notifies subscribers if it succeeds.
    ///
    /// # Errors
    ///
    /// Returns the error produced by `f`; the config is left unchanged.
    pub async fn update<F, T>(&self, f: F) -> Result<T, StoreError>
    where
        F: FnOnce(&mut Config) -> Result<T, StoreError>,
    {
        let result = {
            let mut config = self.config.write().await;
            let mut draft = config.clone();
            let value = f(&mut draft)?;
            *config = draft;
            value
        };
        self.notify.send_modify(|version| *version += 1);
        Ok(result)
    }

    /// Saves the config to disk.
    ///
    /// # Errors
    ///
    /// Returns error if the file cannot be written.
    pub async fn save(&self) -> Result<(), StoreError> {
        let config = self.config.read().await;
        config.save_to(&self.path).await?;
        info!(path = %self.path.display(), "Config saved");
        Ok(())
    }

    /// Subscribes to config changes.
    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.notify.subscribe()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ConnectionConfig;

    #[tokio::test]
    async fn test_update_notifies() {
        let store = ConfigStore::new(PathBuf::from("unused.json"));
        let mut rx = store.subscribe();

        store
            .update(|config| config.add_connection("docs", ConnectionConfig::new("cmis")))
            .await
            .unwrap();

        assert!(rx.has_changed().unwrap());
        assert_eq!(*rx.borrow_and_update(), 1);
        assert!(store.get().await.connections.contains_key("docs"));
    }

    #[tokio::test]
    async fn test_failed_update_leaves_config() {
        let store = ConfigStore::new(PathBuf::from("unused.json"));
        let rx = store.subscribe();

        let result = store
            .update(|config| {
                config.general.poll_interval_secs = 5;
                config.remove_connection("missing")
            })
            .await;

        assert!(matches!(result, Err(StoreError::ConnectionNotFound(_))));
        assert_eq!(store.get().await.general.poll_interval_secs, 30);
        assert!(!rx.has_changed().unwrap());
    }
}
