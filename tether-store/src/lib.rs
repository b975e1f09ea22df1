// Lint configuration for this crate
#![warn(missing_docs)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]
#![allow(clippy::must_use_candidate)]

//! # `Tether` Store
//!
//! Configuration storage for `Tether`.
//!
//! This crate provides:
//!
//! - **Config**: Session, throttle and connection settings (JSON)
//! - **ConfigStore**: The config with persistence and change notifications
//! - **Persistence**: File I/O helpers with owner-only permissions
//!
//! ## Usage
//!
//! ```ignore
//! use tether_session::SessionSettings;
//! use tether_store::ConfigStore;
//!
//! let store = ConfigStore::load_default().await?;
//! let config = store.get().await;
//!
//! let settings = SessionSettings::from(&config.session);
//! let gate = config.throttle.build_gate();
//! let docs = config.connection("docs")?;
//! ```

pub mod config;
pub mod config_store;
pub mod error;
pub mod persistence;

pub use config::{
    BinConfig, Config, ConnectionConfig, GeneralConfig, LogLevel, SessionConfig, ThrottleConfig,
};
pub use config_store::ConfigStore;
pub use error::StoreError;
pub use persistence::{
    default_config_dir, default_config_path, load_json, load_json_or_default, save_json,
};
